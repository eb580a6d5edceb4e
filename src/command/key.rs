//! Command and group identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a logical operation family (e.g. `getUserCommand`).
///
/// Selects the circuit breaker and, through configuration, the bulkhead group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandKey(String);

impl CommandKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CommandKey {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifies a bulkhead (concurrency isolation unit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A command with no configured group is isolated in a group of its own.
impl From<&CommandKey> for GroupKey {
    fn from(key: &CommandKey) -> Self {
        Self::new(key.as_str())
    }
}
