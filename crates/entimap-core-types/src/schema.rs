//! Structured logging vocabulary
//!
//! Lifecycle events carry `component`, `op` and `event`; the remaining keys
//! are the ones repository and query operations attach.

use std::fmt;

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_ENTITY_TYPE: &str = "entity_type";
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

/// Phase of an operation as recorded in the `event` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Start,
    End,
    EndError,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Start => EVENT_START,
            Lifecycle::End => EVENT_END,
            Lifecycle::EndError => EVENT_END_ERROR,
        }
    }

    /// Parse an `event` field value; anything else is not a lifecycle event
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            EVENT_START => Some(Lifecycle::Start),
            EVENT_END => Some(Lifecycle::End),
            EVENT_END_ERROR => Some(Lifecycle::EndError),
            _ => None,
        }
    }

    /// `end` and `end_error` close an operation
    pub fn is_terminal(self) -> bool {
        !matches!(self, Lifecycle::Start)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
