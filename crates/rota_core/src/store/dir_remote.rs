//! Shared-directory remote document store.
//!
//! # Responsibility
//! - Treat a directory visible to several devices (network share, synced
//!   folder) as the shared document store.
//! - Detect changes by polling the document file.
//!
//! # Invariants
//! - Documents live at `<root>/<collection>/<document_id>.json`.
//! - Writes go through a temp file + rename, so readers never see a torn file.
//! - Collection and document ids are single path segments.

use crate::store::remote::{
    Document, RemoteChange, RemoteError, RemoteIdentity, RemoteResult, RemoteStore, Subscription,
};
use async_trait::async_trait;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use uuid::Uuid;

const IDENTITY_FILE_NAME: &str = ".identity";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Directory-backed remote store with polling subscriptions.
pub struct DirRemoteStore {
    root: PathBuf,
    poll_interval: Duration,
    identity: OnceCell<RemoteIdentity>,
}

impl DirRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            identity: OnceCell::new(),
        }
    }

    /// Overrides how often subscriptions re-read the document.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, collection: &str, document_id: &str) -> RemoteResult<PathBuf> {
        validate_segment("collection", collection)?;
        validate_segment("document_id", document_id)?;
        Ok(self
            .root
            .join(collection)
            .join(format!("{document_id}.json")))
    }

    async fn load_or_create_identity(&self) -> RemoteResult<RemoteIdentity> {
        let path = self.root.join(IDENTITY_FILE_NAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let uid = Uuid::parse_str(raw.trim()).map_err(|err| {
                    RemoteError::Identity(format!(
                        "invalid identity file `{}`: {err}",
                        path.display()
                    ))
                })?;
                return Ok(RemoteIdentity { uid });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(RemoteError::Identity(err.to_string())),
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| RemoteError::Identity(err.to_string()))?;
        let uid = Uuid::new_v4();
        write_atomically(&path, uid.to_string().as_bytes())
            .await
            .map_err(|err| RemoteError::Identity(err.to_string()))?;
        Ok(RemoteIdentity { uid })
    }
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    fn backend_id(&self) -> &str {
        "dir"
    }

    async fn establish_identity(&self) -> RemoteResult<RemoteIdentity> {
        self.identity
            .get_or_try_init(|| self.load_or_create_identity())
            .await
            .copied()
    }

    async fn get(&self, collection: &str, document_id: &str) -> RemoteResult<Option<Document>> {
        let path = self.document_path(collection, document_id)?;
        match read_document(&path).await? {
            Some(raw) => parse_document(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        collection: &str,
        document_id: &str,
        document: Document,
    ) -> RemoteResult<()> {
        let path = self.document_path(collection, document_id)?;
        let payload = serde_json::to_vec_pretty(&document)
            .map_err(|err| RemoteError::Backend(err.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RemoteError::Unavailable(err.to_string()))?;
        }
        write_atomically(&path, &payload)
            .await
            .map_err(|err| RemoteError::Unavailable(err.to_string()))
    }

    async fn subscribe(&self, collection: &str, document_id: &str) -> RemoteResult<Subscription> {
        let path = self.document_path(collection, document_id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(poll_document(path, self.poll_interval, sender));
        Ok(Subscription::with_cancel(receiver, move || task.abort()))
    }
}

async fn poll_document(
    path: PathBuf,
    poll_interval: Duration,
    sender: mpsc::UnboundedSender<RemoteChange>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // `None` until the first read; then the raw content last delivered.
    let mut last_seen: Option<Option<String>> = None;
    let mut last_error: Option<String> = None;

    loop {
        ticker.tick().await;
        if sender.is_closed() {
            break;
        }

        let change = match read_document(&path).await {
            Ok(raw) => {
                last_error = None;
                if last_seen.as_ref() == Some(&raw) {
                    continue;
                }
                let change = match raw.as_deref().map(parse_document).transpose() {
                    Ok(document) => RemoteChange::Snapshot(document),
                    Err(err) => RemoteChange::Failed(err),
                };
                last_seen = Some(raw);
                change
            }
            Err(err) => {
                let message = err.to_string();
                if last_error.as_deref() == Some(message.as_str()) {
                    continue;
                }
                warn!(
                    "event=remote_poll module=store status=error backend=dir error_code={} error={message}",
                    err.code()
                );
                last_error = Some(message);
                RemoteChange::Failed(err)
            }
        };

        if sender.send(change).is_err() {
            break;
        }
    }
    debug!("event=remote_poll module=store status=stopped backend=dir");
}

async fn read_document(path: &Path) -> RemoteResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RemoteError::Unavailable(err.to_string())),
    }
}

fn parse_document(raw: &str) -> RemoteResult<Document> {
    serde_json::from_str(raw)
        .map_err(|err| RemoteError::Backend(format!("invalid document: {err}")))
}

async fn write_atomically(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&temp_path, payload).await?;
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

fn validate_segment(field: &str, value: &str) -> RemoteResult<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Backend(format!(
            "{field} must be a single path segment, got `{value}`"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_segment, DirRemoteStore};
    use crate::store::remote::{RemoteChange, RemoteError, RemoteStore};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_roundtrips_through_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirRemoteStore::new(dir.path());

        assert_eq!(store.get("schedules", "main").await.expect("get"), None);
        store
            .set("schedules", "main", json!({"people": ["Anna"], "currentIndex": 0}))
            .await
            .expect("set");

        assert!(dir.path().join("schedules").join("main.json").exists());
        let loaded = store.get("schedules", "main").await.expect("get");
        assert_eq!(loaded, Some(json!({"people": ["Anna"], "currentIndex": 0})));
    }

    #[tokio::test]
    async fn identity_is_persisted_for_other_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = DirRemoteStore::new(dir.path())
            .establish_identity()
            .await
            .expect("identity");
        let second = DirRemoteStore::new(dir.path())
            .establish_identity()
            .await
            .expect("identity");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn subscription_reports_changes_written_by_another_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = DirRemoteStore::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let writer = DirRemoteStore::new(dir.path());

        let mut feed = watcher.subscribe("schedules", "main").await.expect("subscribe");
        assert_eq!(feed.next().await, Some(RemoteChange::Snapshot(None)));

        writer
            .set("schedules", "main", json!({"people": ["Ben"]}))
            .await
            .expect("set");
        let change = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("change within timeout");
        assert_eq!(
            change,
            Some(RemoteChange::Snapshot(Some(json!({"people": ["Ben"]}))))
        );
    }

    #[test]
    fn rejects_path_traversal_in_ids() {
        assert!(validate_segment("collection", "schedules").is_ok());
        assert!(matches!(
            validate_segment("collection", "../etc"),
            Err(RemoteError::Backend(_))
        ));
        assert!(validate_segment("document_id", "").is_err());
        assert!(validate_segment("document_id", "..").is_err());
    }
}
