//! Core logic for the `rota` duty rotation.
//! This crate owns every rotation invariant and the local/remote sync policy;
//! front ends only read snapshots and call the coordinator's mutations.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod stats;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::rotation::{HistoryEntry, RotationError, RotationState, StateDecodeError};
pub use stats::{compute_statistics, PersonStat, Statistics};
pub use store::dir_remote::DirRemoteStore;
pub use store::local::{
    KeyValueStore, LocalResult, LocalStateStore, LocalStoreError, MemoryKvStore, SqliteKvStore,
};
pub use store::memory_remote::MemoryRemoteStore;
pub use store::remote::{
    Document, RemoteChange, RemoteError, RemoteIdentity, RemoteResult, RemoteStore, Subscription,
};
pub use sync::coordinator::{
    Applied, LoadSource, LocalWrite, RemoteApplyOutcome, RemoteWrite, StartupReport,
    SyncCoordinator, WriteReport,
};
pub use sync::status::{SyncState, SyncStatus};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
