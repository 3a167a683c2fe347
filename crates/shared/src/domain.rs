use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

name_newtype!(UnitName);
name_newtype!(ViewName);
name_newtype!(LocationToken);

/// Opaque reference into the presentation layer. The runtime never inspects
/// what a handle points at; the embedding application correlates handles
/// with its own mount points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostHandle(pub i64);

static NEXT_HOST_HANDLE: AtomicI64 = AtomicI64::new(1);

impl HostHandle {
    /// Mints a handle for a freshly created mount point.
    pub fn fresh() -> Self {
        Self(NEXT_HOST_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Back,
    Forward,
    /// The shadow stack could not classify the jump (multi-step traversal,
    /// lost or duplicated host notifications).
    Unknown,
}
