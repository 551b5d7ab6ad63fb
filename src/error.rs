//! Error types used by the livecell primitives and resource managers.
//!
//! This module defines three error enums:
//!
//! - [`StateError`] — programming errors raised at the call site (misuse).
//! - [`TransportError`] — connection-level failures, delivered to subscribers
//!   as ordinary values (see [`Update::Error`](crate::Update::Error)).
//! - [`TransitionError`] — hook failures raised by a
//!   [`Transition`](crate::Transition) driver.
//!
//! All types provide an `as_label` helper returning a short stable snake_case
//! label for logs and metrics.

use thiserror::Error;

/// # Programming errors.
///
/// These indicate misuse of a livecell primitive: settling a
/// [`Deferred`](crate::Deferred) twice, calling into a destroyed resource, or
/// registering a duplicate subscription label. They are returned synchronously
/// at the call site and never caught internally.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The deferred was already resolved or rejected.
    #[error("already settled")]
    AlreadySettled,

    /// The resource was destroyed; no further operations are accepted.
    #[error("already destroyed")]
    AlreadyDestroyed,

    /// A subscription or registry label is already taken.
    #[error("duplicate label: {label}")]
    DuplicateLabel {
        /// The label that was registered twice.
        label: String,
    },
}

impl StateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use livecell::StateError;
    ///
    /// assert_eq!(StateError::AlreadySettled.as_label(), "already_settled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::AlreadySettled => "already_settled",
            StateError::AlreadyDestroyed => "already_destroyed",
            StateError::DuplicateLabel { .. } => "duplicate_label",
        }
    }
}

/// # Connection-level failures.
///
/// These are never thrown across the resource boundary: a resource manager
/// wraps them into [`Update::Error`](crate::Update::Error) and fans them out
/// to subscribers through the store, so consumers observe them like any other
/// value update. Recovery is reconnection (automatic or manual), not
/// exception handling.
///
/// The type is `Clone` because one failure is delivered to every subscriber.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening a connection to the endpoint failed.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// Endpoint that refused the connection.
        url: String,
        /// Underlying failure message.
        reason: String,
    },

    /// The transport reported an error event on an open connection.
    #[error("stream error on {url}: {reason}")]
    Stream {
        /// Endpoint of the failing connection.
        url: String,
        /// Underlying failure message.
        reason: String,
    },

    /// The connection closed without a local disconnect request.
    #[error("connection to {url} closed")]
    Closed {
        /// Endpoint of the closed connection.
        url: String,
    },

    /// An inbound payload could not be decoded.
    #[error("decode failed: {reason}")]
    Decode {
        /// Underlying decode failure message.
        reason: String,
    },

    /// An outbound payload could not be transmitted.
    #[error("send failed: {reason}")]
    Send {
        /// Underlying send failure message.
        reason: String,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Connect { .. } => "transport_connect",
            TransportError::Stream { .. } => "transport_stream",
            TransportError::Closed { .. } => "transport_closed",
            TransportError::Decode { .. } => "transport_decode",
            TransportError::Send { .. } => "transport_send",
        }
    }

    /// The failing endpoint, where the error carries one.
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportError::Connect { url, .. }
            | TransportError::Stream { url, .. }
            | TransportError::Closed { url } => Some(url),
            TransportError::Decode { .. } | TransportError::Send { .. } => None,
        }
    }

    /// Indicates whether the failure ended the connection.
    ///
    /// Connection-ending failures trigger an automatic reconnect on
    /// resources configured for it; [`TransportError::Decode`] leaves the
    /// session open.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. }
                | TransportError::Stream { .. }
                | TransportError::Closed { .. }
                | TransportError::Send { .. }
        )
    }
}

/// # Transition driver failures.
///
/// Raised by [`Transition::step`](crate::Transition::step) when a start/end
/// hook fails. The hook error is wrapped with the hook's position so the
/// external driver can tell which registration failed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransitionError {
    /// A start hook failed; the run was aborted before its first step.
    #[error("start hook {index} failed: {reason}")]
    StartHook {
        /// Position of the failing hook in registration order.
        index: usize,
        /// Underlying hook failure message.
        reason: String,
    },

    /// An end hook failed after the last step; the index was still reset.
    #[error("end hook {index} failed: {reason}")]
    EndHook {
        /// Position of the failing hook in registration order.
        index: usize,
        /// Underlying hook failure message.
        reason: String,
    },
}

impl TransitionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransitionError::StartHook { .. } => "transition_start_hook",
            TransitionError::EndHook { .. } => "transition_end_hook",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_labels_are_stable() {
        assert_eq!(StateError::AlreadySettled.as_label(), "already_settled");
        assert_eq!(StateError::AlreadyDestroyed.as_label(), "already_destroyed");
        assert_eq!(
            StateError::DuplicateLabel {
                label: "x".to_string()
            }
            .as_label(),
            "duplicate_label"
        );
    }

    #[test]
    fn transport_error_url_accessor() {
        let err = TransportError::Connect {
            url: "tcp://feed:9000".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.url(), Some("tcp://feed:9000"));
        assert!(err.is_connection_lost());

        let decode = TransportError::Decode {
            reason: "bad json".to_string(),
        };
        assert_eq!(decode.url(), None);
        assert!(!decode.is_connection_lost());
    }

    #[test]
    fn transition_error_carries_hook_position() {
        let err = TransitionError::EndHook {
            index: 2,
            reason: "boom".to_string(),
        };
        assert_eq!(err.as_label(), "transition_end_hook");
        assert!(err.to_string().contains("end hook 2"));
    }
}
