use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::domain::{UnitName, ViewName};

/// Static configuration of one loadable code unit, emitted by the build
/// pipeline per deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Locale -> versioned resource locator. The locator doubles as the
    /// content-version tag for the persistent cache.
    pub resources: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<UnitName>,
    /// An essential unit that cannot be loaded takes the whole application
    /// down with it.
    #[serde(default)]
    pub essential: bool,
    /// Views this unit provides once activated.
    #[serde(default)]
    pub views: Vec<ViewName>,
    /// Static assets shipped alongside the unit, name -> locator.
    #[serde(default)]
    pub statics: HashMap<String, String>,
}

impl UnitManifest {
    pub fn for_locale(locale: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            resources: HashMap::from([(locale.into(), resource.into())]),
            ..Self::default()
        }
    }
}

pub type UnitCatalog = HashMap<UnitName, UnitManifest>;
