pub mod campaign;
pub mod conversation;
pub mod draft;
pub mod inbound;
pub mod intent;
pub mod notification;
pub mod schedule;

use serde::{Deserialize, Serialize};

/// Result of an idempotent status transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChange {
    Applied,
    Unchanged,
}

impl StatusChange {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}
