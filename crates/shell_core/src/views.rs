use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use shared::domain::{HostHandle, ViewName};

use crate::containers::TransitionContext;

/// An instantiated piece of UI state, cached by identity key.
pub trait View: Send {
    /// One-time setup after construction, before first activation.
    fn realize(&mut self) {}

    /// The view became the visible one in its container.
    fn activate(&mut self, _transition: &TransitionContext) {}

    fn refresh(&mut self) {}

    fn title(&self) -> Option<String> {
        None
    }

    /// Persistent views are exempt from invalidation policies.
    fn persistent(&self) -> bool {
        false
    }

    /// The instance is being dropped from the cache.
    fn destruct(&mut self) {}
}

pub type SharedView = Arc<Mutex<Box<dyn View + Send>>>;

pub fn lock_view(view: &SharedView) -> std::sync::MutexGuard<'_, Box<dyn View + Send>> {
    view.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub type ViewFactory =
    Box<dyn Fn(HostHandle, &Value, Option<&Value>) -> Box<dyn View + Send> + Send + Sync>;

pub struct ViewSpec {
    factory: ViewFactory,
    always_async: bool,
}

impl ViewSpec {
    pub fn new(
        factory: impl Fn(HostHandle, &Value, Option<&Value>) -> Box<dyn View + Send>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            always_async: false,
        }
    }

    /// Opt into asynchronous instantiation even when the providing unit is
    /// already loaded.
    pub fn always_async(mut self) -> Self {
        self.always_async = true;
        self
    }
}

/// Registry of instantiable views, owned by the embedding and typically
/// filled by unit activators as code units arrive.
#[derive(Default)]
pub struct ViewRegistry {
    entries: Mutex<HashMap<ViewName, ViewSpec>>,
}

impl ViewRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, name: impl Into<ViewName>, spec: ViewSpec) {
        self.lock().insert(name.into(), spec);
    }

    pub fn contains(&self, name: &ViewName) -> bool {
        self.lock().contains_key(name)
    }

    pub fn instantiates_synchronously(&self, name: &ViewName) -> bool {
        self.lock()
            .get(name)
            .map(|spec| !spec.always_async)
            .unwrap_or(false)
    }

    pub(crate) fn create(
        &self,
        name: &ViewName,
        mount: HostHandle,
        params: &Value,
        data: Option<&Value>,
    ) -> Option<Box<dyn View + Send>> {
        let entries = self.lock();
        let spec = entries.get(name)?;
        Some((spec.factory)(mount, params, data))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ViewName, ViewSpec>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
