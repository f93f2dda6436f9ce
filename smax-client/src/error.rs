//! Error types for the SMA-X client library.

use crate::config::ConfigError;
use crate::types::{InvalidPattern, TypeTag};
use std::time::Duration;
use thiserror::Error;

/// Placeholder used by the codec before the client knows which variable failed.
pub(crate) const UNNAMED: &str = "<value>";

/// Client errors.
#[derive(Debug, Error)]
pub enum SmaxError {
    /// The value's shape or element kinds cannot be represented.
    #[error("type mismatch for '{name}'{}: {reason}", as_tag(.tag))]
    TypeMismatch {
        name: String,
        /// The tag being encoded to or decoded from, when one was involved.
        tag: Option<TypeTag>,
        reason: String,
    },

    /// A type tag outside the fixed set was used where strictness was required.
    #[error("unknown type '{tag}' for '{name}'")]
    UnknownType { name: String, tag: String },

    /// The value does not fit even the widest type of its family.
    #[error("value {value} of '{name}' overflows {tag}, the widest type of its family")]
    EncodingOverflow {
        name: String,
        tag: TypeTag,
        value: String,
    },

    /// The store holds no such table/key.
    #[error("could not find {table}:{key} in the store")]
    KeyNotFound { table: String, key: String },

    /// Transport-level failure.
    #[error("connection error during {context}: {reason}")]
    Connection { context: String, reason: String },

    /// A blocking wait exceeded its deadline.
    #[error("timed out after {waited:?} waiting for a notification")]
    Timeout { waited: Duration },

    /// A wait was issued without any poll-group subscription.
    #[error("no active subscriptions to wait on")]
    NotSubscribed,

    /// The store answered with something this client cannot interpret.
    #[error("unexpected reply during {context}: {reason}")]
    Protocol { context: String, reason: String },

    /// A subscription pattern was rejected before reaching the store.
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(#[from] InvalidPattern),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SmaxError {
    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::TypeMismatch {
            name: UNNAMED.to_string(),
            tag: None,
            reason: reason.into(),
        }
    }

    /// Records the tag a codec error was working with, unless one is already set.
    #[must_use]
    pub(crate) fn with_tag(self, tag: TypeTag) -> Self {
        match self {
            Self::TypeMismatch {
                name,
                tag: None,
                reason,
            } => Self::TypeMismatch {
                name,
                tag: Some(tag),
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn overflow(tag: TypeTag, value: impl ToString) -> Self {
        Self::EncodingOverflow {
            name: UNNAMED.to_string(),
            tag,
            value: value.to_string(),
        }
    }

    pub(crate) fn protocol(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn connection(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Attaches the full variable name to a codec error.
    ///
    /// Errors that already carry a name, and non-codec errors, are returned as is.
    #[must_use]
    pub fn at(self, full_name: &str) -> Self {
        match self {
            Self::TypeMismatch { name, tag, reason } if name == UNNAMED => Self::TypeMismatch {
                name: full_name.to_string(),
                tag,
                reason,
            },
            Self::UnknownType { name, tag } if name == UNNAMED => Self::UnknownType {
                name: full_name.to_string(),
                tag,
            },
            Self::EncodingOverflow { name, tag, value } if name == UNNAMED => {
                Self::EncodingOverflow {
                    name: full_name.to_string(),
                    tag,
                    value,
                }
            }
            other => other,
        }
    }

    /// Returns true for transient transport failures worth retrying.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

fn as_tag(tag: &Option<TypeTag>) -> String {
    tag.map(|tag| format!(" as {tag}")).unwrap_or_default()
}

impl From<redis::RedisError> for SmaxError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() || e.is_timeout()
        {
            SmaxError::connection("redis request", e.to_string())
        } else {
            SmaxError::protocol("redis request", e.to_string())
        }
    }
}
