//! Sync Coordinator.
//!
//! # Responsibility
//! - Load the initial state: remote document first, local store as fallback,
//!   local data pushed to an empty remote (first-writer bootstrap).
//! - Persist every effective mutation: local always, remote best-effort.
//! - Apply incoming remote snapshots wholesale (last write wins).
//!
//! # Invariants
//! - The coordinator is the only owner of the in-memory `RotationState`.
//! - A failed remote call never reverts the in-memory mutation or the local
//!   write; it only moves status to `Error`.
//! - Applying a remote snapshot never writes back to the remote store.
//! - Echoes of this session's own pushes never roll the state back, even
//!   when they arrive after later mutations.
//! - Identity failure detaches the remote for the rest of the session.

use crate::config::SyncConfig;
use crate::model::rotation::{HistoryEntry, RotationError, RotationState};
use crate::stats::{compute_statistics, Statistics};
use crate::store::local::{KeyValueStore, LocalStateStore};
use crate::store::remote::{RemoteChange, RemoteError, RemoteResult, RemoteStore, Subscription};
use crate::sync::status::{
    SyncStatus, MESSAGE_AUTH_FAILED, MESSAGE_LOAD_FAILED, MESSAGE_SAVE_FAILED,
    MESSAGE_SYNC_FAILED,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const MAX_PENDING_ECHOES: usize = 64;

/// Where the startup state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    /// Nothing stored anywhere; empty first-run state.
    Empty,
}

/// Outcome of `SyncCoordinator::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub source: LoadSource,
    /// Local data was pushed to an empty remote document.
    pub bootstrapped: bool,
    /// A remote change feed is active.
    pub subscribed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalWrite {
    Saved,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteWrite {
    /// No remote session attached.
    Skipped,
    Pushed,
    Failed(RemoteError),
}

/// Per-store result of persisting one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub local: LocalWrite,
    pub remote: RemoteWrite,
}

/// An effective mutation and how it was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub value: T,
    pub writes: WriteReport,
}

/// What an incoming remote notification did to the in-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplyOutcome {
    /// Missing or undecodable document; nothing changed.
    Ignored,
    /// Identical to the current state; observers need not re-render.
    Unchanged,
    /// State replaced; observers should re-render.
    Replaced,
    /// Listener reported a failure; status moved to `Error`.
    Failed,
}

/// Owner of the rotation state and its local/remote persistence.
pub struct SyncCoordinator<S: KeyValueStore> {
    config: SyncConfig,
    local: LocalStateStore<S>,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_attached: bool,
    subscription: Option<Subscription>,
    /// States pushed while subscribed whose echo has not come back yet,
    /// oldest first.
    pending_echoes: VecDeque<RotationState>,
    state: RotationState,
    status: SyncStatus,
    revision: u64,
}

impl<S: KeyValueStore> SyncCoordinator<S> {
    /// Creates a coordinator holding the empty state.
    ///
    /// Call `start` before serving mutations; until then nothing is loaded.
    pub fn new(config: SyncConfig, local: S, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let local = LocalStateStore::new(local, config.local_key.clone());
        Self {
            config,
            local,
            remote,
            remote_attached: false,
            subscription: None,
            pending_echoes: VecDeque::new(),
            state: RotationState::new(),
            status: SyncStatus::local_only(),
            revision: 0,
        }
    }

    /// Runs the startup sequence. Never fails; degraded paths are reflected
    /// in `status()` and the returned report.
    pub async fn start(&mut self) -> StartupReport {
        self.subscription = None;
        self.pending_echoes.clear();
        self.remote_attached = false;

        let Some(remote) = self.remote.clone() else {
            self.set_status(SyncStatus::local_only());
            let source = self.adopt_local();
            return self.finish_startup(source, false, false);
        };

        self.set_status(SyncStatus::connecting());
        let identity = with_timeout(
            self.config.remote_timeout,
            "establish_identity",
            remote.establish_identity(),
        )
        .await;
        match identity {
            Ok(identity) => info!(
                "event=remote_identity module=sync status=ok backend={} uid={}",
                remote.backend_id(),
                identity.uid
            ),
            Err(err) => {
                error!(
                    "event=remote_identity module=sync status=error backend={} error_code={} error={err}",
                    remote.backend_id(),
                    err.code()
                );
                self.set_status(SyncStatus::error(MESSAGE_AUTH_FAILED));
                let source = self.adopt_local();
                return self.finish_startup(source, false, false);
            }
        }

        self.remote_attached = true;
        self.set_status(SyncStatus::connected());

        let (source, bootstrapped) = self.load_attached(remote.as_ref()).await;
        let subscribed = self.open_subscription(remote.as_ref()).await;
        self.finish_startup(source, bootstrapped, subscribed)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local_store(&self) -> &LocalStateStore<S> {
        &self.local
    }

    /// Current snapshot for read-only consumers.
    pub fn state(&self) -> &RotationState {
        &self.state
    }

    pub fn current_person(&self) -> Option<&str> {
        self.state.current_person()
    }

    pub fn statistics(&self) -> Statistics {
        compute_statistics(&self.state)
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Bumped on every in-memory change; observers re-render when it moves.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether remote identity succeeded and writes are mirrored remotely.
    pub fn is_remote_attached(&self) -> bool {
        self.remote_attached
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Own pushes still waiting for their echo on the change feed.
    pub fn pending_echo_count(&self) -> usize {
        self.pending_echoes.len()
    }

    /// Adds a person and persists.
    ///
    /// Returns `Ok(None)` for a blank name; nothing is written then.
    pub async fn add_person(
        &mut self,
        name: &str,
    ) -> Result<Option<Applied<String>>, RotationError> {
        let added = match self.state.add_person(name) {
            Ok(Some(added)) => added,
            Ok(None) => {
                debug!("event=add_person module=sync status=skipped reason=blank_name");
                return Ok(None);
            }
            Err(err) => {
                info!("event=add_person module=sync status=rejected reason=duplicate_name");
                return Err(err);
            }
        };

        info!(
            "event=add_person module=sync status=ok people={}",
            self.state.people().len()
        );
        let writes = self.commit().await;
        Ok(Some(Applied {
            value: added,
            writes,
        }))
    }

    /// Removes the person at `index` and persists.
    pub async fn delete_person(&mut self, index: usize) -> Result<Applied<String>, RotationError> {
        let removed = match self.state.delete_person(index) {
            Ok(removed) => removed,
            Err(err) => {
                info!("event=delete_person module=sync status=rejected index={index} error={err}");
                return Err(err);
            }
        };

        info!(
            "event=delete_person module=sync status=ok index={index} people={} current_index={}",
            self.state.people().len(),
            self.state.current_index()
        );
        let writes = self.commit().await;
        Ok(Applied {
            value: removed,
            writes,
        })
    }

    /// Records a completed turn now. `None` when the rotation is empty.
    pub async fn mark_done(&mut self) -> Option<Applied<HistoryEntry>> {
        self.mark_done_at(Utc::now()).await
    }

    /// Records a completed turn at `at`. `None` when the rotation is empty.
    pub async fn mark_done_at(&mut self, at: DateTime<Utc>) -> Option<Applied<HistoryEntry>> {
        let Some(entry) = self.state.mark_done_at(at) else {
            debug!("event=mark_done module=sync status=skipped reason=empty_rotation");
            return None;
        };

        info!(
            "event=mark_done module=sync status=ok history={} current_index={}",
            self.state.history().len(),
            self.state.current_index()
        );
        let writes = self.commit().await;
        Some(Applied {
            value: entry,
            writes,
        })
    }

    /// Passes the turn on without history. `None` when the rotation is empty.
    pub async fn skip(&mut self) -> Option<Applied<String>> {
        let Some(skipped) = self.state.skip() else {
            debug!("event=skip module=sync status=skipped reason=empty_rotation");
            return None;
        };

        info!(
            "event=skip module=sync status=ok current_index={}",
            self.state.current_index()
        );
        let writes = self.commit().await;
        Some(Applied {
            value: skipped,
            writes,
        })
    }

    /// Clears everything and persists the empty state to both stores.
    ///
    /// Unconditional: confirmation belongs to the caller.
    pub async fn reset(&mut self) -> WriteReport {
        self.state.reset();
        warn!("event=reset module=sync status=ok");
        self.commit().await
    }

    /// Waits for the next remote notification.
    ///
    /// Returns `None` immediately when no feed is active, or once the feed
    /// closes. Pass the change to `apply_remote_change`.
    pub async fn next_remote_change(&mut self) -> Option<RemoteChange> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next().await,
            None => None,
        }
    }

    /// Applies every notification already delivered, without waiting.
    pub fn apply_pending_remote_changes(&mut self) -> Vec<RemoteApplyOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let Some(change) = self.subscription.as_mut().and_then(Subscription::try_next) else {
                break;
            };
            outcomes.push(self.apply_remote_change(change));
        }
        outcomes
    }

    /// Applies one remote notification with last-write-wins semantics.
    ///
    /// Replacement also refreshes the local copy; it never pushes remotely.
    pub fn apply_remote_change(&mut self, change: RemoteChange) -> RemoteApplyOutcome {
        let document = match change {
            RemoteChange::Snapshot(Some(document)) => document,
            RemoteChange::Snapshot(None) => {
                debug!("event=remote_change module=sync status=skipped reason=document_missing");
                return RemoteApplyOutcome::Ignored;
            }
            RemoteChange::Failed(err) => {
                error!(
                    "event=remote_change module=sync status=error error_code={} error={err}",
                    err.code()
                );
                self.set_status(SyncStatus::error(MESSAGE_SYNC_FAILED));
                return RemoteApplyOutcome::Failed;
            }
        };

        let incoming = match RotationState::from_document(document) {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!(
                    "event=remote_change module=sync status=error error_code=decode_failed error={err}"
                );
                return RemoteApplyOutcome::Ignored;
            }
        };

        if self.acknowledge_echo(&incoming) {
            debug!("event=remote_change module=sync status=skipped reason=own_write");
            return RemoteApplyOutcome::Unchanged;
        }
        if incoming == self.state {
            debug!("event=remote_change module=sync status=skipped reason=unchanged");
            return RemoteApplyOutcome::Unchanged;
        }

        // Feed order puts every earlier own push before this snapshot.
        self.pending_echoes.clear();
        self.state = incoming;
        self.revision += 1;
        info!(
            "event=remote_change module=sync status=ok people={} history={}",
            self.state.people().len(),
            self.state.history().len()
        );
        self.persist_local();
        self.set_status(SyncStatus::connected());
        RemoteApplyOutcome::Replaced
    }

    /// Stops the remote feed. Writes keep being mirrored while attached.
    pub fn close_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            self.pending_echoes.clear();
            debug!("event=remote_subscribe module=sync status=stopped");
        }
    }

    async fn load_attached(&mut self, remote: &dyn RemoteStore) -> (LoadSource, bool) {
        let fetched = with_timeout(
            self.config.remote_timeout,
            "get",
            remote.get(&self.config.collection, &self.config.document_id),
        )
        .await;

        let document = match fetched {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("event=remote_load module=sync status=ok document=absent");
                return self.bootstrap_from_local(remote).await;
            }
            Err(err) => {
                error!(
                    "event=remote_load module=sync status=error error_code={} error={err}",
                    err.code()
                );
                self.set_status(SyncStatus::error(MESSAGE_LOAD_FAILED));
                return (self.adopt_local(), false);
            }
        };

        match RotationState::from_document(document) {
            Ok(state) => {
                if let Some(local) = self.local.load() {
                    if local.has_data() && local != state {
                        warn!("event=remote_load module=sync status=ok local_discarded=true");
                    }
                }
                self.state = state;
                self.revision += 1;
                self.persist_local();
                (LoadSource::Remote, false)
            }
            Err(err) => {
                warn!(
                    "event=remote_load module=sync status=error error_code=decode_failed error={err}"
                );
                self.bootstrap_from_local(remote).await
            }
        }
    }

    async fn bootstrap_from_local(&mut self, remote: &dyn RemoteStore) -> (LoadSource, bool) {
        let source = self.adopt_local();
        if !self.state.has_data() {
            return (source, false);
        }

        let pushed = matches!(self.push_remote(remote).await, RemoteWrite::Pushed);
        info!(
            "event=remote_bootstrap module=sync status={}",
            if pushed { "ok" } else { "error" }
        );
        (source, pushed)
    }

    async fn open_subscription(&mut self, remote: &dyn RemoteStore) -> bool {
        let subscribed = with_timeout(
            self.config.remote_timeout,
            "subscribe",
            remote.subscribe(&self.config.collection, &self.config.document_id),
        )
        .await;

        match subscribed {
            Ok(subscription) => {
                debug!("event=remote_subscribe module=sync status=ok");
                self.subscription = Some(subscription);
                true
            }
            Err(err) => {
                error!(
                    "event=remote_subscribe module=sync status=error error_code={} error={err}",
                    err.code()
                );
                self.set_status(SyncStatus::error(MESSAGE_SYNC_FAILED));
                false
            }
        }
    }

    fn adopt_local(&mut self) -> LoadSource {
        match self.local.load() {
            Some(state) => {
                self.state = state;
                self.revision += 1;
                LoadSource::Local
            }
            None => {
                self.state = RotationState::new();
                LoadSource::Empty
            }
        }
    }

    fn finish_startup(
        &mut self,
        source: LoadSource,
        bootstrapped: bool,
        subscribed: bool,
    ) -> StartupReport {
        info!(
            "event=startup_load module=sync status=ok source={source:?} bootstrapped={bootstrapped} subscribed={subscribed} sync_state={} people={} history={}",
            self.status.state,
            self.state.people().len(),
            self.state.history().len()
        );
        StartupReport {
            source,
            bootstrapped,
            subscribed,
        }
    }

    async fn commit(&mut self) -> WriteReport {
        self.revision += 1;
        let local = self.persist_local();
        let remote = match self.attached_remote() {
            Some(remote) => self.push_remote(remote.as_ref()).await,
            None => RemoteWrite::Skipped,
        };
        WriteReport { local, remote }
    }

    fn attached_remote(&self) -> Option<Arc<dyn RemoteStore>> {
        if self.remote_attached {
            self.remote.clone()
        } else {
            None
        }
    }

    fn persist_local(&self) -> LocalWrite {
        match self.local.save(&self.state) {
            Ok(()) => {
                debug!("event=local_save module=sync status=ok");
                LocalWrite::Saved
            }
            Err(err) => {
                error!(
                    "event=local_save module=sync status=error error_code=persistence_failed error={err}"
                );
                LocalWrite::Failed(err.to_string())
            }
        }
    }

    async fn push_remote(&mut self, remote: &dyn RemoteStore) -> RemoteWrite {
        let pushed = match self.state.to_document() {
            Ok(document) => {
                // Recorded before the call: some stores echo inside `set`.
                self.expect_echo();
                with_timeout(
                    self.config.remote_timeout,
                    "set",
                    remote.set(&self.config.collection, &self.config.document_id, document),
                )
                .await
            }
            Err(err) => Err(RemoteError::Backend(format!(
                "failed to encode rotation state: {err}"
            ))),
        };

        match pushed {
            Ok(()) => {
                debug!(
                    "event=remote_push module=sync status=ok backend={}",
                    remote.backend_id()
                );
                self.set_status(SyncStatus::connected());
                RemoteWrite::Pushed
            }
            Err(err) => {
                error!(
                    "event=remote_push module=sync status=error backend={} error_code={} error={err}",
                    remote.backend_id(),
                    err.code()
                );
                self.forget_last_echo();
                self.set_status(SyncStatus::error(MESSAGE_SAVE_FAILED));
                RemoteWrite::Failed(err)
            }
        }
    }

    fn expect_echo(&mut self) {
        if self.subscription.is_none() {
            return;
        }
        if self.pending_echoes.len() == MAX_PENDING_ECHOES {
            self.pending_echoes.pop_front();
        }
        self.pending_echoes.push_back(self.state.clone());
    }

    fn forget_last_echo(&mut self) {
        if self.subscription.is_some() && self.pending_echoes.back() == Some(&self.state) {
            self.pending_echoes.pop_back();
        }
    }

    /// Consumes the pending push matching `incoming` along with every older
    /// one; a store may coalesce intermediate writes into a single snapshot.
    fn acknowledge_echo(&mut self, incoming: &RotationState) -> bool {
        let Some(position) = self.pending_echoes.iter().position(|pending| pending == incoming)
        else {
            return false;
        };
        self.pending_echoes.drain(..=position);
        true
    }

    fn set_status(&mut self, status: SyncStatus) {
        if self.status != status {
            debug!(
                "event=sync_status module=sync from={} to={}",
                self.status.state, status.state
            );
            self.status = status;
        }
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    operation: &'static str,
    call: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            operation,
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::with_timeout;
    use crate::store::remote::{RemoteError, RemoteResult};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_calls_to_timeout_error() {
        let never = std::future::pending::<RemoteResult<()>>();
        let err = with_timeout(Some(Duration::from_millis(50)), "get", never)
            .await
            .expect_err("pending call must time out");
        assert_eq!(
            err,
            RemoteError::Timeout {
                operation: "get",
                after_ms: 50
            }
        );
    }

    #[tokio::test]
    async fn with_timeout_passes_through_without_limit() {
        let ready = async { Ok::<_, RemoteError>(7) };
        assert_eq!(with_timeout(None, "get", ready).await, Ok(7));
    }
}
