//! Sync status surfaced to the presentation layer.

use std::fmt::{Display, Formatter};

pub const MESSAGE_LOCAL_ONLY: &str = "Stored locally only";
pub const MESSAGE_CONNECTING: &str = "Connecting to shared store";
pub const MESSAGE_CONNECTED: &str = "Connected to shared store";
pub const MESSAGE_AUTH_FAILED: &str = "Authentication failed";
pub const MESSAGE_LOAD_FAILED: &str = "Failed to load shared data";
pub const MESSAGE_SAVE_FAILED: &str = "Failed to save shared data";
pub const MESSAGE_SYNC_FAILED: &str = "Sync error";

/// Coarse sync state.
///
/// `LocalOnly -> Connecting -> Connected | Error`, and `Connected -> Error`
/// on any later remote failure. Nothing reconnects on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    LocalOnly,
    Connecting,
    Connected,
    Error,
}

impl SyncState {
    /// Stable string id for logs and front ends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local-only",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub message: String,
}

impl SyncStatus {
    pub fn new(state: SyncState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn local_only() -> Self {
        Self::new(SyncState::LocalOnly, MESSAGE_LOCAL_ONLY)
    }

    pub fn connecting() -> Self {
        Self::new(SyncState::Connecting, MESSAGE_CONNECTING)
    }

    pub fn connected() -> Self {
        Self::new(SyncState::Connected, MESSAGE_CONNECTED)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(SyncState::Error, message)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::local_only()
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.state)
    }
}
