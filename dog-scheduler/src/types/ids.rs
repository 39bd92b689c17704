use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Group used when a key is built from a bare name
pub const DEFAULT_GROUP: &str = "DEFAULT";

macro_rules! scheduler_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name {
            group: String,
            name: String,
        }

        impl $name {
            /// Create a key in the given group
            pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
                Self {
                    group: group.into(),
                    name: name.into(),
                }
            }

            /// Create a key in the default group
            pub fn named(name: impl Into<String>) -> Self {
                Self::new(DEFAULT_GROUP, name)
            }

            pub fn group(&self) -> &str {
                &self.group
            }

            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.group, self.name)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::named(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self::named(name)
            }
        }
    };
}

scheduler_key!(
    /// Identifies a job within one scheduler instance
    JobKey
);

scheduler_key!(
    /// Identifies a trigger within one scheduler instance
    TriggerKey
);

/// Unique identifier for a single fire event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FireId(pub String);

impl FireId {
    /// Generate a new unique fire ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FireId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FireId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
