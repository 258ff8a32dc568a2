//! Mapping from the configured trigger code to the operations to watch.

use std::fmt;
use tracing::warn;

/// Kind of document change a watcher subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Value of the `operationType` field in change stream documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use Operation::{Delete, Insert, Update};

/// Resolve a trigger code into the operations it names.
///
/// Codes are fixed combinations of insert=1, update=2, delete=4. Anything
/// outside `1..=7` selects nothing and is reported with a warning.
pub fn select(trigger: i64) -> &'static [Operation] {
    match trigger {
        1 => &[Insert],
        2 => &[Update],
        3 => &[Insert, Update],
        4 => &[Delete],
        5 => &[Insert, Delete],
        6 => &[Update, Delete],
        7 => &[Insert, Update, Delete],
        other => {
            warn!(trigger = other, "{} is not a valid trigger operation type", other);
            &[]
        }
    }
}
