use std::sync::Arc;

use shared::domain::{Direction, HostHandle, ViewName};

/// Answer of a container's target resolver.
pub enum Resolution {
    /// Show the view in this container.
    Same,
    /// Refuse to show the view.
    Deny,
    /// Let the parent container decide.
    Parent,
    /// Show the view in the container with this name.
    Named(String),
    /// Show the view in the container owning this host handle.
    Host(HostHandle),
}

/// Behavior hooks of a container. Every method has a neutral default, so an
/// embedding only implements what its presentation needs.
pub trait ContainerBehavior: Send + Sync {
    /// Decides where a view requested from this container should be shown.
    fn resolve_target(&self, _source: Option<&HostHandle>, _view: &ViewName) -> Resolution {
        Resolution::Same
    }

    /// Called when a view transition starts, before instantiation.
    fn transition_start(&self, _transition: &TransitionContext) {}

    /// Called when a view transition completes, after the instance is
    /// realized and mounted.
    fn transition_end(&self, _transition: &TransitionContext) {}

    fn update_title(&self, _title: &str) {}

    /// Handle of the element that scrolls this container's content, if any.
    fn scroll_target(&self) -> Option<HostHandle> {
        None
    }

    /// Called when the container is removed or the orchestrator resets.
    fn on_removed(&self) {}
}

/// Behavior with every hook left at its default.
pub struct DefaultBehavior;

impl ContainerBehavior for DefaultBehavior {}

#[derive(Clone)]
pub struct Container {
    pub name: String,
    pub host: HostHandle,
    /// Whether transitions in this container append navigation history.
    pub uses_history: bool,
    pub behavior: Arc<dyn ContainerBehavior>,
}

/// Arena node; containers form an explicit tree walked during target
/// resolution instead of a live presentation-tree traversal.
pub(crate) struct ContainerNode {
    pub container: Container,
    pub parent: Option<usize>,
}

/// Everything the transition hooks and the view's activate hook get to see
/// about the transition in progress.
#[derive(Clone)]
pub struct TransitionContext {
    pub direction: Direction,
    pub modal: bool,
    pub modal_level: u32,
    /// Caption override for modal back buttons.
    pub back_button_text: Option<String>,
    pub container: Option<String>,
    pub view_name: Option<ViewName>,
    pub mount: Option<HostHandle>,
    /// Name and title of the view one history entry back, for wiring
    /// back-navigation affordances.
    pub back_view_name: Option<ViewName>,
    pub back_caption: Option<String>,
    /// Scroll-affordance classification; the presentation layer applies it.
    pub scrollable: bool,
}
