//! Stream Session Types
//!
//! Identity and lifecycle state for a client's live subscription.
//!
//! # Lifecycle
//!
//! ```text
//! Open ──(cancel | error | unsubscribe)──► Draining ──► Closed
//! ```
//!
//! `Closed` is terminal. A session never yields again once it leaves `Open`.

use std::fmt;

use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0.simple())
    }
}

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Subscribed and yielding updates.
    Open,
    /// Shutting down; registration is being released.
    Draining,
    /// Terminal. No further updates are yielded.
    Closed,
}

impl SessionState {
    /// Whether the session may still yield updates.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the session has reached its terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Why a session left the `Open` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The consumer's cancellation signal fired.
    Cancelled,
    /// The consumer dropped the session.
    Dropped,
    /// A fatal session error ended the stream.
    Failed,
}

impl CloseReason {
    /// Reason name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        }
    }
}
