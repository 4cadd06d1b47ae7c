use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a mod package. Unique per session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModId(pub String);

impl ModId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Index into the interaction handler table. Cheap to copy and compare.
///
/// Slot 0 is reserved, so `HandlerId(0)` doubles as the "registration failed"
/// value handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandlerId(pub u32);

impl HandlerId {
    pub const INVALID: HandlerId = HandlerId(0);

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::INVALID
    }
}
