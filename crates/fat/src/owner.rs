use serde::{Deserialize, Serialize};
use std::fmt;

use crate::MULTIPLE_OWNERS;

/// A directory or leaf's owning node, or the lack/conflict thereof.
///
/// The wire format (`OwnerNode` in `FileAnnouncement` and `NodeInfo`) is a
/// plain string: empty for [`Owner::Unknown`], the node name for
/// [`Owner::Single`], or the literal `"(multiple)"` for [`Owner::Multiple`].
/// This type exists so the invariant in the data model — a leaf's owner is
/// never `"(multiple)"`, only a directory's can be — is enforced by the
/// compiler rather than by convention.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Owner {
    #[default]
    Unknown,
    Single(String),
    Multiple,
}

impl Owner {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Owner::Unknown => "",
            Owner::Single(name) => name.as_str(),
            Owner::Multiple => MULTIPLE_OWNERS,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Owner::Unknown)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Owner {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Owner::Unknown
        } else if s == MULTIPLE_OWNERS {
            Owner::Multiple
        } else {
            Owner::Single(s.to_string())
        }
    }
}

impl From<String> for Owner {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Owner::Unknown
        } else if s == MULTIPLE_OWNERS {
            Owner::Multiple
        } else {
            Owner::Single(s)
        }
    }
}

impl Serialize for Owner {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Owner {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Owner::from(s))
    }
}
