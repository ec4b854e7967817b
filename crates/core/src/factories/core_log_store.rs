//! The core log store implementation provided by hrss.
//!
//! Two factories share this implementation:
//!
//! - [MemLogStoreFactory] keeps every log in memory.
//! - [FileLogStoreFactory] additionally persists logs, including entries
//!   pulled from remote peers, to a directory.
//!
//! Replication is pull based. A log's [AppendLog::update] asks every
//! connected remote store to [LogStore::serve] the entries past the local
//! length, and appends whatever comes back.

use hrss_api::{builder::Builder, config::*, *};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

mod file;

/// Log store configuration types.
mod config {
    /// Configuration parameters for
    /// [FileLogStoreFactory](super::FileLogStoreFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileLogStoreConfig {
        /// Call `sync_data` after every append.
        ///
        /// Default: true.
        #[serde(default = "default_sync_data")]
        pub sync_data: bool,
    }

    fn default_sync_data() -> bool {
        true
    }

    impl Default for FileLogStoreConfig {
        fn default() -> Self {
            Self { sync_data: true }
        }
    }

    impl hrss_api::config::ModConfig for FileLogStoreConfig {}
}

pub use config::*;

/// Module name of the [FileLogStoreConfig] within [Config].
pub const FILE_LOG_STORE_MOD_NAME: &str = "fileLogStore";

/// In-memory log store factory. Useful for tests.
#[derive(Debug)]
pub struct MemLogStoreFactory {}

impl MemLogStoreFactory {
    /// Construct a new MemLogStoreFactory.
    pub fn create() -> DynLogStoreFactory {
        let out: DynLogStoreFactory = Arc::new(MemLogStoreFactory {});
        out
    }
}

impl LogStoreFactory for MemLogStoreFactory {
    fn default_config(&self, _config: &mut Config) -> HrssResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<Builder>,
        _dir: std::path::PathBuf,
    ) -> BoxFut<'static, HrssResult<DynLogStore>> {
        Box::pin(async move {
            let out: DynLogStore = Arc::new(CoreLogStore::new(None)?);
            Ok(out)
        })
    }
}

/// File-backed log store factory.
#[derive(Debug)]
pub struct FileLogStoreFactory {}

impl FileLogStoreFactory {
    /// Construct a new FileLogStoreFactory.
    pub fn create() -> DynLogStoreFactory {
        let out: DynLogStoreFactory = Arc::new(FileLogStoreFactory {});
        out
    }
}

impl LogStoreFactory for FileLogStoreFactory {
    fn default_config(&self, config: &mut Config) -> HrssResult<()> {
        config.add_default_module_config::<FileLogStoreConfig>(
            FILE_LOG_STORE_MOD_NAME.into(),
        )
    }

    fn create(
        &self,
        builder: Arc<Builder>,
        dir: std::path::PathBuf,
    ) -> BoxFut<'static, HrssResult<DynLogStore>> {
        Box::pin(async move {
            let config: FileLogStoreConfig = builder
                .config
                .get_module_config(FILE_LOG_STORE_MOD_NAME)?;
            let disk = file::LogDir::open(dir, config.sync_data)?;
            let out: DynLogStore = Arc::new(CoreLogStore::new(Some(disk))?);
            Ok(out)
        })
    }
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// The remote stores a local store replicates with. Shared by the store
/// and every log it opened.
#[derive(Debug)]
struct Remotes {
    list: Mutex<Vec<DynLogStore>>,
    count: tokio::sync::watch::Sender<usize>,
}

impl Remotes {
    fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
            count: tokio::sync::watch::channel(0).0,
        }
    }

    fn snapshot(&self) -> Vec<DynLogStore> {
        self.list.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.list.lock().unwrap().len()
    }

    fn add(&self, remote: DynLogStore) -> bool {
        let mut lock = self.list.lock().unwrap();
        if lock.iter().any(|r| r.id() == remote.id()) {
            return false;
        }
        lock.push(remote);
        self.count.send_replace(lock.len());
        true
    }

    fn remove(&self, remote_id: u64) {
        let mut lock = self.list.lock().unwrap();
        lock.retain(|r| r.id() != remote_id);
        self.count.send_replace(lock.len());
    }

    fn clear(&self) {
        self.list.lock().unwrap().clear();
        self.count.send_replace(0);
    }
}

#[derive(Debug)]
struct CoreLog {
    key: LogKey,
    writable: bool,
    entries: Mutex<Vec<bytes::Bytes>>,
    byte_len: AtomicU64,
    file: Option<file::LogFile>,
    remotes: Arc<Remotes>,
    write_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl CoreLog {
    fn check_open(&self) -> HrssResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HrssError::other(format!("log {} is closed", self.key)));
        }
        Ok(())
    }

    /// Write entries to disk (if file backed) then make them visible.
    /// Callers must hold the write lock.
    fn push(&self, new: Vec<bytes::Bytes>) -> HrssResult<u64> {
        if let Some(file) = &self.file {
            file.write(&new)?;
        }
        let added: u64 = new.iter().map(|e| e.len() as u64).sum();
        let mut lock = self.entries.lock().unwrap();
        let first = lock.len() as u64;
        lock.extend(new);
        self.byte_len.fetch_add(added, Ordering::SeqCst);
        Ok(first)
    }

    async fn pull(&self) -> HrssResult<bool> {
        let _g = self.write_lock.lock().await;
        let mut grew = false;
        for remote in self.remotes.snapshot() {
            let from = self.len();
            match remote.serve(self.key.clone(), from).await {
                Ok(new) if !new.is_empty() => {
                    tracing::trace!(
                        key = %self.key,
                        from,
                        count = new.len(),
                        remote = remote.id(),
                        "pulled entries",
                    );
                    self.push(new)?;
                    grew = true;
                }
                Ok(_) => (),
                Err(err) => {
                    tracing::debug!(
                        ?err,
                        key = %self.key,
                        remote = remote.id(),
                        "replication pull failed",
                    );
                }
            }
        }
        Ok(grew)
    }

    fn slice_from(&self, from: u64) -> Vec<bytes::Bytes> {
        let lock = self.entries.lock().unwrap();
        lock.iter().skip(from as usize).cloned().collect()
    }
}

impl AppendLog for CoreLog {
    fn key(&self) -> LogKey {
        self.key.clone()
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn ready(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move { self.check_open() })
    }

    fn len(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }

    fn byte_len(&self) -> u64 {
        self.byte_len.load(Ordering::SeqCst)
    }

    fn append(
        &self,
        entries: Vec<bytes::Bytes>,
    ) -> BoxFut<'_, HrssResult<u64>> {
        Box::pin(async move {
            self.check_open()?;
            if !self.writable {
                return Err(HrssError::other(format!(
                    "log {} is not writable",
                    self.key
                )));
            }
            let _g = self.write_lock.lock().await;
            self.push(entries)
        })
    }

    fn get(
        &self,
        seq: u64,
    ) -> BoxFut<'_, HrssResult<Option<bytes::Bytes>>> {
        Box::pin(async move {
            Ok(self.entries.lock().unwrap().get(seq as usize).cloned())
        })
    }

    fn update(&self, opts: UpdateOpts) -> BoxFut<'_, HrssResult<bool>> {
        Box::pin(async move {
            self.check_open()?;
            let mut count = self.remotes.count.subscribe();
            loop {
                let grew = self.pull().await?;
                if grew || !opts.wait || self.remotes.len() > 0 {
                    return Ok(grew);
                }
                tracing::debug!(key = %self.key, "waiting for a remote peer");
                count.wait_for(|c| *c > 0).await.map_err(|_| {
                    HrssError::other("log store dropped while waiting")
                })?;
            }
        })
    }

    fn close(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Debug)]
struct CoreLogStore {
    id: u64,
    disk: Option<file::LogDir>,
    names: Mutex<HashMap<String, LogKey>>,
    logs: Mutex<HashMap<LogKey, Arc<CoreLog>>>,
    remotes: Arc<Remotes>,
    closed: AtomicBool,
}

impl CoreLogStore {
    fn new(disk: Option<file::LogDir>) -> HrssResult<Self> {
        let names = match &disk {
            Some(disk) => disk.load_names()?,
            None => HashMap::new(),
        };
        Ok(Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            disk,
            names: Mutex::new(names),
            logs: Mutex::new(HashMap::new()),
            remotes: Arc::new(Remotes::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> HrssResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HrssError::other(format!(
                "log store {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn is_owned(&self, key: &LogKey) -> bool {
        self.names.lock().unwrap().values().any(|k| k == key)
    }

    fn open_log(&self, key: LogKey) -> HrssResult<Arc<CoreLog>> {
        let writable = self.is_owned(&key);
        let mut lock = self.logs.lock().unwrap();
        if let Some(log) = lock.get(&key) {
            return Ok(log.clone());
        }

        let (entries, file) = match &self.disk {
            Some(disk) => (disk.load(&key)?, Some(disk.log_file(&key)?)),
            None => (Vec::new(), None),
        };
        let byte_len = entries.iter().map(|e| e.len() as u64).sum();

        let log = Arc::new(CoreLog {
            key: key.clone(),
            writable,
            entries: Mutex::new(entries),
            byte_len: AtomicU64::new(byte_len),
            file,
            remotes: self.remotes.clone(),
            write_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        lock.insert(key, log.clone());
        Ok(log)
    }

    /// A log we can serve to remotes: already open, or present on disk.
    fn servable_log(&self, key: &LogKey) -> HrssResult<Option<Arc<CoreLog>>> {
        if let Some(log) = self.logs.lock().unwrap().get(key) {
            return Ok(Some(log.clone()));
        }
        match &self.disk {
            Some(disk) if disk.has(key) => self.open_log(key.clone()).map(Some),
            _ => Ok(None),
        }
    }
}

impl LogStore for CoreLogStore {
    fn id(&self) -> u64 {
        self.id
    }

    fn open_named(&self, name: &str) -> BoxFut<'_, HrssResult<DynAppendLog>> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_open()?;
            let key = {
                let mut lock = self.names.lock().unwrap();
                match lock.get(&name) {
                    Some(key) => key.clone(),
                    None => {
                        let key = LogKey::from(bytes::Bytes::copy_from_slice(
                            &rand::random::<[u8; id::KEY_LEN]>(),
                        ));
                        lock.insert(name.clone(), key.clone());
                        if let Some(disk) = &self.disk {
                            disk.save_names(&lock)?;
                        }
                        tracing::debug!(%name, %key, "created log");
                        key
                    }
                }
            };
            let out: DynAppendLog = self.open_log(key)?;
            Ok(out)
        })
    }

    fn open_key(&self, key: LogKey) -> BoxFut<'_, HrssResult<DynAppendLog>> {
        Box::pin(async move {
            self.check_open()?;
            let out: DynAppendLog = self.open_log(key)?;
            Ok(out)
        })
    }

    fn serve(
        &self,
        key: LogKey,
        from: u64,
    ) -> BoxFut<'_, HrssResult<Vec<bytes::Bytes>>> {
        Box::pin(async move {
            self.check_open()?;
            Ok(match self.servable_log(&key)? {
                Some(log) => log.slice_from(from),
                None => Vec::new(),
            })
        })
    }

    fn replicate(&self, remote: DynLogStore) {
        if remote.id() == self.id {
            return;
        }
        let remote_id = remote.id();
        if self.remotes.add(remote) {
            tracing::debug!(local = self.id, remote = remote_id, "replicating");
        }
    }

    fn disconnect(&self, remote_id: u64) {
        self.remotes.remove(remote_id);
    }

    fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    fn close(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            self.remotes.clear();
            let logs: Vec<_> =
                self.logs.lock().unwrap().values().cloned().collect();
            for log in logs {
                log.close().await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test;
