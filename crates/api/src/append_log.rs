//! Append-only log related types.
//!
//! An append log is a durable sequence of immutable entries, each fetchable
//! by sequence number. Logs live in a [LogStore], which knows how to
//! replicate them with remote stores.

use crate::*;
use std::sync::Arc;

/// Options for [AppendLog::update].
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOpts {
    /// If no remote peer is connected yet, wait for one before pulling.
    /// Callers should bound this wait with a timeout.
    #[serde(default)]
    pub wait: bool,
}

/// A single append-only log.
pub trait AppendLog: 'static + Send + Sync + std::fmt::Debug {
    /// The key identifying this log.
    fn key(&self) -> LogKey;

    /// True if this handle may append to the log.
    fn writable(&self) -> bool;

    /// Resolves once the log has loaded any local state.
    fn ready(&self) -> BoxFut<'_, HrssResult<()>>;

    /// Number of entries available locally.
    fn len(&self) -> u64;

    /// True if no entries are available locally.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total byte size of the entries available locally.
    fn byte_len(&self) -> u64;

    /// Append entries, returning the sequence number of the first one.
    fn append(&self, entries: Vec<bytes::Bytes>) -> BoxFut<'_, HrssResult<u64>>;

    /// Get the entry at `seq`, or `None` if it is not available locally.
    fn get(&self, seq: u64) -> BoxFut<'_, HrssResult<Option<bytes::Bytes>>>;

    /// Pull new entries from connected remote peers.
    /// Resolves to `true` if the local length grew.
    fn update(&self, opts: UpdateOpts) -> BoxFut<'_, HrssResult<bool>>;

    /// Close this log. Further appends will fail.
    fn close(&self) -> BoxFut<'_, HrssResult<()>>;
}

/// Trait-object [AppendLog].
pub type DynAppendLog = Arc<dyn AppendLog>;

/// A collection of logs that replicates as a unit.
pub trait LogStore: 'static + Send + Sync + std::fmt::Debug {
    /// Process-unique identifier of this store instance.
    fn id(&self) -> u64;

    /// Open a writable log by local name, creating it with a fresh
    /// random key the first time.
    fn open_named(&self, name: &str) -> BoxFut<'_, HrssResult<DynAppendLog>>;

    /// Open a log by key. Unless this store created the log, the
    /// resulting handle is a read-only replica.
    fn open_key(&self, key: LogKey) -> BoxFut<'_, HrssResult<DynAppendLog>>;

    /// Return the locally held entries of `key` starting at `from`.
    /// Called by remote stores pulling from us.
    fn serve(
        &self,
        key: LogKey,
        from: u64,
    ) -> BoxFut<'_, HrssResult<Vec<bytes::Bytes>>>;

    /// Start replicating with a remote store.
    fn replicate(&self, remote: DynLogStore);

    /// Stop replicating with the remote store identified by `remote_id`.
    fn disconnect(&self, remote_id: u64);

    /// Number of connected remote stores.
    fn remote_count(&self) -> usize;

    /// Close the store and every log it opened.
    fn close(&self) -> BoxFut<'_, HrssResult<()>>;
}

/// Trait-object [LogStore].
pub type DynLogStore = Arc<dyn LogStore>;

/// A factory for constructing [LogStore] instances.
pub trait LogStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> HrssResult<()>;

    /// Construct a log store instance rooted at `dir`.
    /// In-memory implementations ignore the directory.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        dir: std::path::PathBuf,
    ) -> BoxFut<'static, HrssResult<DynLogStore>>;
}

/// Trait-object [LogStoreFactory].
pub type DynLogStoreFactory = Arc<dyn LogStoreFactory>;
