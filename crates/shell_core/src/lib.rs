//! The view orchestrator: owns the container tree, the view-instance
//! cache, the modal stack and the invalidation policy, and drives the
//! transition lifecycle around the loader and the history tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use deferred::Deferred;
use loader::CodeUnitLoader;
use navigation::{HistoryMechanism, HistoryTracker};
use serde_json::Value;
use shared::domain::{Direction, HostHandle, LocationToken, ViewName};
use shared::keys::ViewKey;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub mod containers;
pub mod invalidation;
pub mod settings;
pub mod views;

pub use containers::{Container, ContainerBehavior, DefaultBehavior, Resolution, TransitionContext};
pub use invalidation::{DirectPolicy, InvalidationPolicy, SweepEntry, TimeoutPolicy};
pub use settings::{load_settings, ShellSettings};
pub use views::{lock_view, SharedView, View, ViewRegistry, ViewSpec};

use containers::ContainerNode;

#[derive(Debug, Error)]
pub enum ShowError {
    #[error("no containers registered")]
    NoContainers,
    #[error("container resolution denied for view {0}")]
    Denied(ViewName),
    #[error("no container found by the name: {0}")]
    UnknownContainer(String),
    #[error("view {0} is unregistered, missing from manifest?")]
    UnknownView(ViewName),
}

/// History item recorded per shown view. `params` is part of the cache
/// identity; `data` is carried for re-instantiation but never keyed.
#[derive(Clone)]
pub struct NavItem {
    pub name: ViewName,
    pub params: Value,
    pub data: Option<Value>,
    pub modal: bool,
    pub modal_level: u32,
    pub back_caption: Option<String>,
    /// Name of the container that hosted the view, filled in when the
    /// transition is recorded.
    pub container: Option<String>,
    /// Fulfilled with the cached instance when history unwinds past this
    /// modal view.
    pub dismissal: Option<Deferred<SharedView>>,
}

#[derive(Clone)]
struct ActivationParams {
    direction: Direction,
    from_history: bool,
    token: Option<LocationToken>,
}

impl ActivationParams {
    fn forward() -> Self {
        Self {
            direction: Direction::Forward,
            from_history: false,
            token: None,
        }
    }
}

struct ViewEntry {
    view: SharedView,
    mount: HostHandle,
    name: ViewName,
    last_used: Instant,
}

enum ShellSettlement {
    Dismissal(Deferred<SharedView>, SharedView),
    BackDone(Deferred<()>),
}

type TransitionListener = Box<dyn Fn(&TransitionContext) + Send + Sync>;

struct ShellState {
    containers: Vec<ContainerNode>,
    cache: HashMap<ViewKey, ViewEntry>,
    modal_level: u32,
    last_activated: Option<ViewName>,
    back_wait: Option<Deferred<()>>,
    transition_start_listeners: Vec<TransitionListener>,
    policy: Arc<dyn InvalidationPolicy>,
    invalidation_task_running: bool,
    /// Deferred settlements queued while the state lock is held; applied
    /// after it is released so handlers can re-enter the orchestrator.
    settlements: Vec<ShellSettlement>,
}

pub struct ViewOrchestrator {
    loader: Arc<CodeUnitLoader>,
    registry: Arc<ViewRegistry>,
    history: HistoryTracker<NavItem>,
    default_policy: Arc<dyn InvalidationPolicy>,
    invalidation_interval: Duration,
    inner: Mutex<ShellState>,
}

impl ViewOrchestrator {
    pub fn new(
        loader: Arc<CodeUnitLoader>,
        registry: Arc<ViewRegistry>,
        mechanism: Arc<dyn HistoryMechanism>,
        settings: &ShellSettings,
    ) -> Arc<Self> {
        let default_policy: Arc<dyn InvalidationPolicy> =
            Arc::new(TimeoutPolicy::new(settings.invalidation_timeout()));
        Arc::new(Self {
            loader,
            registry,
            history: HistoryTracker::new(mechanism),
            default_policy: Arc::clone(&default_policy),
            invalidation_interval: settings.invalidation_interval(),
            inner: Mutex::new(ShellState {
                containers: Vec::new(),
                cache: HashMap::new(),
                modal_level: 0,
                last_activated: None,
                back_wait: None,
                transition_start_listeners: Vec::new(),
                policy: default_policy,
                invalidation_task_running: false,
                settlements: Vec::new(),
            }),
        })
    }

    /// Registers a container. The first one registered is the root/default
    /// container; `parent` places the new container in the explicit tree
    /// walked during target resolution.
    pub async fn add_container(
        &self,
        name: impl Into<String>,
        host: HostHandle,
        uses_history: bool,
        behavior: Arc<dyn ContainerBehavior>,
        parent: Option<&str>,
    ) -> Result<(), ShowError> {
        let mut state = self.inner.lock().await;
        let parent = match parent {
            Some(parent_name) => Some(
                position_by_name(&state, parent_name)
                    .ok_or_else(|| ShowError::UnknownContainer(parent_name.to_string()))?,
            ),
            None => None,
        };
        let name = name.into();
        debug!(container = %name, "container added");
        state.containers.push(ContainerNode {
            container: Container {
                name,
                host,
                uses_history,
                behavior,
            },
            parent,
        });
        Ok(())
    }

    pub async fn remove_container(&self, name: &str) {
        let mut state = self.inner.lock().await;
        let Some(position) = position_by_name(&state, name) else {
            debug!(container = %name, "no container to remove");
            return;
        };
        let node = state.containers.remove(position);
        node.container.behavior.on_removed();
        for other in &mut state.containers {
            other.parent = match other.parent {
                Some(parent) if parent == position => None,
                Some(parent) if parent > position => Some(parent - 1),
                keep => keep,
            };
        }
    }

    pub async fn container_by_name(&self, name: &str) -> Option<Container> {
        let state = self.inner.lock().await;
        position_by_name(&state, name).map(|index| state.containers[index].container.clone())
    }

    /// Shows a view, resolving the target container from the source hint.
    pub async fn show_view(
        self: &Arc<Self>,
        source: Option<&HostHandle>,
        name: ViewName,
        params: Value,
        data: Option<Value>,
    ) -> Result<(), ShowError> {
        let (container_index, modal_level) = {
            let state = self.inner.lock().await;
            (
                resolve_target_container(&state, source, &name)?,
                state.modal_level,
            )
        };
        let item = plain_item(name, params, data, modal_level);
        self.activate_view(container_index, item, ActivationParams::forward())
            .await
    }

    /// Shows a view in the named container.
    pub async fn show_view_in(
        self: &Arc<Self>,
        container: &str,
        name: ViewName,
        params: Value,
        data: Option<Value>,
    ) -> Result<(), ShowError> {
        let (container_index, modal_level) = {
            let state = self.inner.lock().await;
            let index = position_by_name(&state, container)
                .ok_or_else(|| ShowError::UnknownContainer(container.to_string()))?;
            (index, state.modal_level)
        };
        let item = plain_item(name, params, data, modal_level);
        self.activate_view(container_index, item, ActivationParams::forward())
            .await
    }

    /// Pushes a view onto the modal stack, always targeting the root
    /// container. The returned deferred is fulfilled with the instance when
    /// the modal is later dismissed through a history unwind.
    pub async fn push_modal_view(
        self: &Arc<Self>,
        name: ViewName,
        params: Value,
        data: Option<Value>,
    ) -> Result<Deferred<SharedView>, ShowError> {
        let dismissal = Deferred::new();
        let modal_level = {
            let mut state = self.inner.lock().await;
            state.modal_level += 1;
            state.modal_level
        };

        let default_caption = if modal_level > 1 { "BACK" } else { "CANCEL" };
        let back_caption = params
            .get("back_button_text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default_caption.to_string());

        let item = NavItem {
            name,
            params,
            data,
            modal: true,
            modal_level,
            back_caption: Some(back_caption),
            container: None,
            dismissal: Some(dismissal.clone()),
        };

        match self.activate_view(0, item, ActivationParams::forward()).await {
            Ok(()) => Ok(dismissal),
            Err(err) => {
                let mut state = self.inner.lock().await;
                state.modal_level = state.modal_level.saturating_sub(1);
                Err(err)
            }
        }
    }

    /// Instantiates a view in the background, loading its unit first when
    /// necessary, without showing it.
    pub async fn instantiate_view(
        self: &Arc<Self>,
        name: ViewName,
        params: Value,
        data: Option<Value>,
    ) -> Deferred<SharedView> {
        let result = Deferred::new();
        let load = self.load_unit_for_view(&name).await;

        let this = Arc::clone(self);
        let on_load = result.clone();
        let on_fail = result.clone();
        load.on_settled(
            move |_| {
                tokio::spawn(async move {
                    let outcome = {
                        let mut state = this.inner.lock().await;
                        let item = plain_item(name, params, data, state.modal_level);
                        this.instantiate_locked(&mut state, &item)
                    };
                    let _ = match outcome {
                        Ok(view) => on_load.fulfill(view),
                        Err(err) => on_load.fail(anyhow::Error::new(err)),
                    };
                });
                Ok(())
            },
            move |failure| {
                let _ = on_fail.fail_shared(failure);
                Ok(())
            },
        );
        result
    }

    /// Explicitly invalidates a cached instance, independently of the
    /// active invalidation policy. Returns whether an instance was removed.
    pub async fn invalidate(&self, name: &ViewName, params: &Value) -> bool {
        let mut state = self.inner.lock().await;
        let key = ViewKey::new(name, params);
        match state.cache.remove(&key) {
            Some(entry) => {
                debug!(view = %entry.name, "explicitly invalidating view");
                lock_view(&entry.view).destruct();
                true
            }
            None => false,
        }
    }

    /// Asks a cached instance to refresh itself. Returns whether one was
    /// found.
    pub async fn refresh(&self, name: &ViewName, params: &Value) -> bool {
        let state = self.inner.lock().await;
        let key = ViewKey::new(name, params);
        match state.cache.get(&key) {
            Some(entry) => {
                debug!(view = %entry.name, "refreshing view");
                lock_view(&entry.view).refresh();
                true
            }
            None => false,
        }
    }

    pub async fn cached_view(&self, name: &ViewName, params: &Value) -> Option<SharedView> {
        let state = self.inner.lock().await;
        state
            .cache
            .get(&ViewKey::new(name, params))
            .map(|entry| Arc::clone(&entry.view))
    }

    pub async fn last_activated_view(&self) -> Option<ViewName> {
        self.inner.lock().await.last_activated.clone()
    }

    pub async fn modal_level(&self) -> u32 {
        self.inner.lock().await.modal_level
    }

    pub fn can_go_back(&self) -> bool {
        self.history.can_go_back()
    }

    /// Navigates one entry back. The returned deferred is fulfilled once
    /// the corresponding reconciled history change has been fully
    /// processed, including modal dismissal and one invalidation run.
    ///
    /// Like the external mechanism itself, this does not check whether
    /// going back is possible; use [`can_go_back`](Self::can_go_back).
    pub async fn back(self: &Arc<Self>) -> Deferred<()> {
        let deferred = Deferred::new();
        {
            let mut state = self.inner.lock().await;
            state.back_wait = Some(deferred.clone());
        }
        self.history.back();
        deferred
    }

    /// Navigates `delta` entries through the history. Modal views skipped
    /// over by a multi-entry jump do not get their dismissal fulfilled.
    pub fn go(&self, delta: i64) {
        self.history.go(delta);
    }

    /// Entry point for externally raised "location changed" notifications.
    /// Reconciles the change, re-shows the recorded view for replayed
    /// entries, and completes back-navigation processing.
    pub async fn handle_location_change(self: &Arc<Self>) -> Result<(), ShowError> {
        let Some(change) = self.history.observe_location_change() else {
            return Ok(());
        };

        if let Some(item) = change.new_item.clone() {
            let container_index = {
                let state = self.inner.lock().await;
                item.container
                    .as_deref()
                    .and_then(|name| position_by_name(&state, name))
                    .unwrap_or(0)
            };
            let activation = ActivationParams {
                direction: change.direction,
                from_history: change.from_history,
                token: Some(change.new_token.clone()),
            };
            self.activate_view(container_index, item, activation).await?;
        }

        if change.direction == Direction::Back {
            let settlements = {
                let mut guard = self.inner.lock().await;
                let state = &mut *guard;

                if let Some(previous) = &change.prev_item {
                    if let Some(dismissal) = &previous.dismissal {
                        let key = ViewKey::new(&previous.name, &previous.params);
                        if let Some(entry) = state.cache.get(&key) {
                            state.settlements.push(ShellSettlement::Dismissal(
                                dismissal.clone(),
                                Arc::clone(&entry.view),
                            ));
                            state.modal_level = state.modal_level.saturating_sub(1);
                        }
                    }
                }

                self.run_invalidation(state);

                if let Some(back_wait) = state.back_wait.take() {
                    state.settlements.push(ShellSettlement::BackDone(back_wait));
                }
                std::mem::take(&mut state.settlements)
            };
            apply_shell_settlements(settlements);
        }
        Ok(())
    }

    pub async fn set_invalidation_policy(&self, policy: Arc<dyn InvalidationPolicy>) {
        self.inner.lock().await.policy = policy;
    }

    /// Observes transition starts across all containers. Sparingly; heavy
    /// listeners make transitions judder.
    pub async fn add_transition_start_listener(
        &self,
        listener: impl Fn(&TransitionContext) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .await
            .transition_start_listeners
            .push(Box::new(listener));
    }

    /// Finds the nearest scroll target, walking the container tree upwards
    /// from the hinted container.
    pub async fn resolve_scroll_target(&self, hint: Option<&HostHandle>) -> Option<HostHandle> {
        let state = self.inner.lock().await;
        if state.containers.is_empty() {
            return None;
        }
        let mut index = hint
            .and_then(|host| position_by_host(&state, host))
            .unwrap_or(0);
        loop {
            if let Some(target) = state.containers[index].container.behavior.scroll_target() {
                return Some(target);
            }
            match state.containers[index].parent {
                Some(parent) => index = parent,
                None => return None,
            }
        }
    }

    /// Destructs all instantiated views and registered containers, resets
    /// the history and restores the default invalidation policy, returning
    /// the orchestrator to its initial state.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        for (_, entry) in state.cache.drain() {
            lock_view(&entry.view).destruct();
        }
        for node in state.containers.drain(..) {
            node.container.behavior.on_removed();
        }
        state.modal_level = 0;
        state.last_activated = None;
        state.back_wait = None;
        state.transition_start_listeners.clear();
        state.policy = Arc::clone(&self.default_policy);
        self.history.reset();
    }

    async fn activate_view(
        self: &Arc<Self>,
        container_index: usize,
        item: NavItem,
        activation: ActivationParams,
    ) -> Result<(), ShowError> {
        let go_async = {
            let mut state = self.inner.lock().await;
            if state.containers.get(container_index).is_none() {
                return Err(ShowError::NoContainers);
            }
            state.last_activated = Some(item.name.clone());

            let transition = self.build_context(&state, container_index, &item, &activation);
            fire_transition_start(&state, container_index, &transition);

            if self.registry.instantiates_synchronously(&item.name) {
                self.instantiate_locked(&mut state, &item)?;
                self.finish_transition(&mut state, container_index, &item, &activation, transition);
                false
            } else {
                true
            }
        };

        if go_async {
            self.activate_view_async(container_index, item, activation)
                .await;
        }
        Ok(())
    }

    /// Gated instantiation: loads the unit providing the view, then picks
    /// the activation back up.
    async fn activate_view_async(
        self: &Arc<Self>,
        container_index: usize,
        item: NavItem,
        activation: ActivationParams,
    ) {
        let load = self.load_unit_for_view(&item.name).await;
        let this = Arc::clone(self);
        let view_name = item.name.clone();
        load.on_settled(
            move |_| {
                tokio::spawn(async move {
                    let settlements = {
                        let mut state = this.inner.lock().await;
                        match this.instantiate_locked(&mut state, &item) {
                            Ok(_) => {
                                let transition = this.build_context(
                                    &state,
                                    container_index,
                                    &item,
                                    &activation,
                                );
                                this.finish_transition(
                                    &mut state,
                                    container_index,
                                    &item,
                                    &activation,
                                    transition,
                                );
                            }
                            Err(err) => {
                                error!(
                                    view = %item.name,
                                    error = %err,
                                    "view instantiation failed after unit load"
                                );
                            }
                        }
                        std::mem::take(&mut state.settlements)
                    };
                    apply_shell_settlements(settlements);
                });
                Ok(())
            },
            move |failure| {
                error!(view = %view_name, error = %failure, "unit load for view failed");
                Ok(())
            },
        );
    }

    /// Loads the unit that provides the view. Already-registered views
    /// need no load at all.
    async fn load_unit_for_view(self: &Arc<Self>, name: &ViewName) -> Deferred<()> {
        if self.registry.contains(name) {
            return Deferred::fulfilled(());
        }
        match self.loader.unit_for_view(name).await {
            Some(unit) => {
                debug!(view = %name, unit = %unit, "loading unit for view");
                self.loader.load(&[unit]).await
            }
            None => {
                warn!(view = %name, "no unit provides this view");
                Deferred::failed(anyhow!("no unit provides view {name}"))
            }
        }
    }

    /// Returns the cached instance for the item, creating and realizing a
    /// new one on a miss. A hit leaves the instance untouched apart from
    /// its last-used stamp; its mount and data are not re-applied.
    fn instantiate_locked(
        &self,
        state: &mut ShellState,
        item: &NavItem,
    ) -> Result<SharedView, ShowError> {
        let key = ViewKey::new(&item.name, &item.params);
        if let Some(entry) = state.cache.get_mut(&key) {
            debug!(view = %item.name, "view cache hit");
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.view));
        }

        let mount = HostHandle::fresh();
        let Some(mut view) = self
            .registry
            .create(&item.name, mount, &item.params, item.data.as_ref())
        else {
            return Err(ShowError::UnknownView(item.name.clone()));
        };
        view.realize();
        debug!(view = %item.name, "view cache miss");

        let shared: SharedView = Arc::new(std::sync::Mutex::new(view));
        state.cache.insert(
            key,
            ViewEntry {
                view: Arc::clone(&shared),
                mount,
                name: item.name.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(shared)
    }

    /// Records history for forward transitions, wires the back caption and
    /// scroll classification, and runs the container's end-of-transition
    /// hooks plus the view's own activate hook.
    fn finish_transition(
        &self,
        state: &mut ShellState,
        container_index: usize,
        item: &NavItem,
        activation: &ActivationParams,
        mut transition: TransitionContext,
    ) {
        let Some(node) = state.containers.get(container_index) else {
            return;
        };
        let uses_history = node.container.uses_history;
        let container_name = node.container.name.clone();
        let behavior = Arc::clone(&node.container.behavior);

        if uses_history && activation.direction == Direction::Forward && !activation.from_history {
            let mut recorded = item.clone();
            recorded.container = Some(container_name);
            self.history.add(recorded, activation.token.clone());
        }

        transition.back_view_name = None;
        transition.back_caption = None;
        if uses_history {
            if let Some(previous) = self.history.get_item(-1) {
                let previous_key = ViewKey::new(&previous.name, &previous.params);
                if let Some(previous_entry) = state.cache.get(&previous_key) {
                    let title = lock_view(&previous_entry.view).title();
                    transition.back_view_name = Some(previous_entry.name.clone());
                    transition.back_caption =
                        Some(title.unwrap_or_else(|| "[[BACK]]".to_string()));
                }
            }
        }

        let key = ViewKey::new(&item.name, &item.params);
        let Some(entry) = state.cache.get(&key) else {
            return;
        };
        transition.view_name = Some(entry.name.clone());
        transition.mount = Some(entry.mount);
        transition.scrollable = behavior.scroll_target().is_some() && !item.modal;

        behavior.transition_end(&transition);
        let title = lock_view(&entry.view).title().unwrap_or_default();
        behavior.update_title(&title);
        lock_view(&entry.view).activate(&transition);
    }

    fn build_context(
        &self,
        state: &ShellState,
        container_index: usize,
        item: &NavItem,
        activation: &ActivationParams,
    ) -> TransitionContext {
        TransitionContext {
            direction: activation.direction,
            modal: item.modal,
            modal_level: item.modal_level,
            back_button_text: item.back_caption.clone(),
            container: state
                .containers
                .get(container_index)
                .map(|node| node.container.name.clone()),
            view_name: None,
            mount: None,
            back_view_name: None,
            back_caption: None,
            scrollable: false,
        }
    }

    /// Runs the active invalidation policy once: periodic policies get a
    /// sweep task (if not already running), the others sweep inline.
    fn run_invalidation(self: &Arc<Self>, state: &mut ShellState) {
        let policy = Arc::clone(&state.policy);
        if policy.periodic() {
            self.ensure_invalidation_task(state);
        } else {
            self.sweep_views(state, policy.as_ref());
        }
    }

    fn ensure_invalidation_task(self: &Arc<Self>, state: &mut ShellState) {
        if state.invalidation_task_running {
            return;
        }
        state.invalidation_task_running = true;
        debug!("starting view invalidator");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.invalidation_interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let remaining = {
                    let mut state = this.inner.lock().await;
                    let policy = Arc::clone(&state.policy);
                    let remaining = this.sweep_views(&mut state, policy.as_ref());
                    if remaining == 0 {
                        state.invalidation_task_running = false;
                    }
                    remaining
                };
                if remaining == 0 {
                    debug!("stopping view invalidator");
                    break;
                }
            }
        });
    }

    /// One policy sweep over the cache. Only instances that are neither
    /// persistent nor reachable through the active navigation stack are
    /// eligible. Returns how many eligible instances remain cached.
    fn sweep_views(&self, state: &mut ShellState, policy: &dyn InvalidationPolicy) -> usize {
        let active: std::collections::HashSet<ViewKey> = self
            .history
            .get_items(1, -1)
            .into_iter()
            .flatten()
            .map(|item| ViewKey::new(&item.name, &item.params))
            .collect();

        let now = Instant::now();
        let entries: Vec<SweepEntry> = state
            .cache
            .iter()
            .map(|(key, entry)| SweepEntry {
                key: key.clone(),
                persistent: lock_view(&entry.view).persistent(),
                active: active.contains(key),
                age: now.duration_since(entry.last_used),
            })
            .collect();

        let victims = policy.decide(&entries);
        for key in &victims {
            if let Some(entry) = state.cache.remove(key) {
                debug!(view = %entry.name, "invalidating view");
                lock_view(&entry.view).destruct();
            }
        }

        entries
            .iter()
            .filter(|entry| !entry.persistent && !entry.active && !victims.contains(&entry.key))
            .count()
    }
}

fn plain_item(name: ViewName, params: Value, data: Option<Value>, modal_level: u32) -> NavItem {
    NavItem {
        name,
        params,
        data,
        modal: false,
        modal_level,
        back_caption: None,
        container: None,
        dismissal: None,
    }
}

fn fire_transition_start(state: &ShellState, container_index: usize, transition: &TransitionContext) {
    if let Some(node) = state.containers.get(container_index) {
        node.container.behavior.transition_start(transition);
    }
    for listener in &state.transition_start_listeners {
        listener(transition);
    }
}

fn position_by_name(state: &ShellState, name: &str) -> Option<usize> {
    state
        .containers
        .iter()
        .position(|node| node.container.name == name)
}

fn position_by_host(state: &ShellState, host: &HostHandle) -> Option<usize> {
    state
        .containers
        .iter()
        .position(|node| node.container.host == *host)
}

/// Walks from the hinted source container until a concrete target is
/// resolved or the request is denied. Delegation past the root container is
/// a hard failure.
fn resolve_target_container(
    state: &ShellState,
    source: Option<&HostHandle>,
    view: &ViewName,
) -> Result<usize, ShowError> {
    if state.containers.is_empty() {
        return Err(ShowError::NoContainers);
    }
    let mut current = source
        .and_then(|host| position_by_host(state, host))
        .unwrap_or(0);
    let mut hops = 0;
    loop {
        let node = &state.containers[current];
        match node.container.behavior.resolve_target(source, view) {
            Resolution::Same => return Ok(current),
            Resolution::Deny => return Err(ShowError::Denied(view.clone())),
            Resolution::Named(name) => {
                return position_by_name(state, &name).ok_or(ShowError::UnknownContainer(name));
            }
            Resolution::Host(host) => {
                return Ok(position_by_host(state, &host).unwrap_or(0));
            }
            Resolution::Parent => {
                if current == 0 {
                    return Err(ShowError::Denied(view.clone()));
                }
                current = node.parent.unwrap_or(0);
            }
        }
        hops += 1;
        if hops > state.containers.len() {
            return Err(ShowError::Denied(view.clone()));
        }
    }
}

fn apply_shell_settlements(settlements: Vec<ShellSettlement>) {
    for settlement in settlements {
        let result = match settlement {
            ShellSettlement::Dismissal(deferred, view) => deferred.fulfill(view),
            ShellSettlement::BackDone(deferred) => deferred.fulfill(()),
        };
        if let Err(err) = result {
            debug!(error = %err, "settlement target was already settled");
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
