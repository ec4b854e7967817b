//! The aggregator owns a set of [Reader] peers keyed by discovery key.
//!
//! Each reader moves through `initializing -> ready -> closing` and is
//! then forgotten. Concurrent [AggregatorApi::add_reader] calls for the
//! same key share one initialization, and
//! [AggregatorApi::stop_reader] on an initializing reader waits for the
//! initialization to settle first.
//!
//! Every reader replica lives in a subdirectory of the storage root named
//! by its discovery key, so [AggregatorApi::init] can find them again.

use crate::reader::Reader;
use crate::retry::{retry, RetryOpts};
use futures::future::{FutureExt, Shared};
use hrss_api::{builder::Builder, config::*, *};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Aggregator configuration types.
mod config {
    /// Configuration parameters for [Aggregator](super::Aggregator).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AggregatorConfig {
        /// How long a new reader without local data waits for a peer
        /// before giving up.
        ///
        /// Default: 20s.
        #[serde(default = "default_timeout_ms")]
        pub connect_timeout_ms: u32,

        /// Upper bound on a single reader update, including retries.
        ///
        /// Default: 20s.
        #[serde(default = "default_timeout_ms")]
        pub update_timeout_ms: u32,

        /// Maximum attempts of a reader update failing transiently.
        ///
        /// Default: 200.
        #[serde(default = "default_retry_attempts")]
        pub retry_attempts: u32,

        /// Wait between reader update attempts.
        ///
        /// Default: 100ms.
        #[serde(default = "default_retry_interval_ms")]
        pub retry_interval_ms: u32,
    }

    fn default_timeout_ms() -> u32 {
        20_000
    }

    fn default_retry_attempts() -> u32 {
        200
    }

    fn default_retry_interval_ms() -> u32 {
        100
    }

    impl Default for AggregatorConfig {
        fn default() -> Self {
            Self {
                connect_timeout_ms: default_timeout_ms(),
                update_timeout_ms: default_timeout_ms(),
                retry_attempts: default_retry_attempts(),
                retry_interval_ms: default_retry_interval_ms(),
            }
        }
    }

    impl hrss_api::config::ModConfig for AggregatorConfig {}
}

pub use config::*;

/// Module name of the [AggregatorConfig] within [Config].
pub const AGGREGATOR_MOD_NAME: &str = "aggregator";

impl AggregatorConfig {
    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms as u64)
    }

    fn retry_opts(&self) -> RetryOpts {
        RetryOpts {
            attempts: self.retry_attempts as usize,
            timeout: Duration::from_millis(self.update_timeout_ms as u64),
            interval: Duration::from_millis(self.retry_interval_ms as u64),
        }
    }
}

type InitFut = Shared<BoxFut<'static, HrssResult<Arc<Reader>>>>;

enum ReaderSlot {
    Initializing(InitFut),
    Ready(Arc<Reader>),
    Closing,
}

impl ReaderSlot {
    fn state(&self) -> ReaderState {
        match self {
            Self::Initializing(_) => ReaderState::Initializing,
            Self::Ready(_) => ReaderState::Ready,
            Self::Closing => ReaderState::Closing,
        }
    }
}

type ReaderMap = Arc<Mutex<HashMap<DiscoveryKey, ReaderSlot>>>;

/// The plain [AggregatorApi] implementation.
pub struct Aggregator {
    builder: Arc<Builder>,
    root: PathBuf,
    config: AggregatorConfig,
    readers: ReaderMap,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("readers", &self.readers.lock().unwrap().len())
            .finish()
    }
}

impl Aggregator {
    /// Add the aggregator's default module config to `config`.
    pub fn default_config(config: &mut Config) -> HrssResult<()> {
        config.add_default_module_config::<AggregatorConfig>(
            AGGREGATOR_MOD_NAME.into(),
        )
    }

    /// Construct an aggregator storing reader replicas under `root`.
    pub fn create(builder: Arc<Builder>, root: PathBuf) -> HrssResult<Arc<Self>> {
        let config: AggregatorConfig =
            builder.config.get_module_config(AGGREGATOR_MOD_NAME)?;
        tracing::debug!(?config, root = %root.display(), "aggregator config");
        Ok(Arc::new(Self {
            builder,
            root,
            config,
            readers: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    /// The storage root.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// The reader of `key`, if it is ready.
    pub fn reader(&self, key: &DiscoveryKey) -> HrssResult<Arc<Reader>> {
        match self.readers.lock().unwrap().get(key) {
            Some(ReaderSlot::Ready(reader)) => Ok(reader.clone()),
            Some(slot) => Err(HrssError::not_found(format!(
                "reader {key} is {:?}",
                slot.state()
            ))),
            None => Err(HrssError::not_found(format!("reader {key}"))),
        }
    }

    fn spawn_init(&self, key: DiscoveryKey) -> InitFut {
        let builder = self.builder.clone();
        let dir = self.root.join(key.to_string());
        let timeout = self.config.connect_timeout();
        let readers = self.readers.clone();

        let task = tokio::task::spawn(async move {
            let res = Reader::create(builder, dir, key.clone(), timeout)
                .await
                .map(Arc::new);
            let mut lock = readers.lock().unwrap();
            match &res {
                Ok(reader) => {
                    lock.insert(key.clone(), ReaderSlot::Ready(reader.clone()));
                    tracing::info!(discovery_key = %key, "reader added");
                }
                Err(err) => {
                    lock.remove(&key);
                    tracing::warn!(?err, discovery_key = %key, "reader failed");
                }
            }
            res
        });

        let fut: BoxFut<'static, HrssResult<Arc<Reader>>> =
            Box::pin(async move {
                task.await.map_err(|err| {
                    HrssError::other_src("reader init task failed", err)
                })?
            });
        fut.shared()
    }

    fn tracked(&self) -> Vec<DiscoveryKey> {
        self.readers.lock().unwrap().keys().cloned().collect()
    }

    /// Discovery keys of the replicas under the storage root.
    fn scan_root(&self) -> HrssResult<Vec<DiscoveryKey>> {
        std::fs::create_dir_all(&self.root)?;
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(str::parse::<DiscoveryKey>) {
                Some(Ok(key)) => out.push(key),
                _ => {
                    tracing::debug!(?name, "ignoring foreign directory");
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Await every future, returning the first error after all completed.
async fn all_settled<I>(futs: I) -> HrssResult<()>
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = HrssResult<()>>,
{
    futures::future::join_all(futs)
        .await
        .into_iter()
        .find(|r| r.is_err())
        .unwrap_or(Ok(()))
}

enum StopStep {
    Wait(InitFut),
    Close(Arc<Reader>),
}

impl AggregatorApi for Aggregator {
    fn init(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let keys = self.scan_root()?;
            tracing::info!(count = keys.len(), "starting stored readers");
            all_settled(keys.into_iter().map(|key| self.add_reader(key))).await
        })
    }

    fn close(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let keys = self.tracked();
            tracing::info!(count = keys.len(), "closing readers");
            all_settled(keys.into_iter().map(|key| async move {
                match self.stop_reader(key).await {
                    Err(err) if err.is_not_found() => Ok(()),
                    r => r,
                }
            }))
            .await
        })
    }

    fn add_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let init = {
                let mut lock = self.readers.lock().unwrap();
                match lock.get(&key) {
                    Some(ReaderSlot::Ready(_)) => return Ok(()),
                    Some(ReaderSlot::Initializing(init)) => init.clone(),
                    Some(ReaderSlot::Closing) => {
                        return Err(HrssError::other(format!(
                            "reader {key} is closing"
                        )))
                    }
                    None => {
                        tracing::debug!(discovery_key = %key, "adding reader");
                        let init = self.spawn_init(key.clone());
                        lock.insert(key, ReaderSlot::Initializing(init.clone()));
                        init
                    }
                }
            };
            init.await.map(|_| ())
        })
    }

    fn update_reader(
        &self,
        key: DiscoveryKey,
        opts: UpdateReaderOpts,
    ) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let reader = self.reader(&key)?;
            let grew = retry(self.config.retry_opts(), || {
                reader.update(UpdateOpts { wait: opts.wait })
            })
            .await?;
            tracing::debug!(discovery_key = %key, grew, "reader updated");
            Ok(())
        })
    }

    fn stop_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            loop {
                let step = {
                    let mut lock = self.readers.lock().unwrap();
                    match lock.get(&key) {
                        None => {
                            return Err(HrssError::not_found(format!(
                                "reader {key}"
                            )))
                        }
                        Some(ReaderSlot::Closing) => {
                            return Err(HrssError::other(format!(
                                "reader {key} is already closing"
                            )))
                        }
                        Some(ReaderSlot::Initializing(init)) => {
                            StopStep::Wait(init.clone())
                        }
                        Some(ReaderSlot::Ready(reader)) => {
                            let reader = reader.clone();
                            lock.insert(key.clone(), ReaderSlot::Closing);
                            StopStep::Close(reader)
                        }
                    }
                };
                match step {
                    StopStep::Wait(init) => {
                        // settles into Ready or absent
                        let _ = init.await;
                    }
                    StopStep::Close(reader) => {
                        let res = reader.close().await;
                        self.readers.lock().unwrap().remove(&key);
                        tracing::info!(discovery_key = %key, "reader stopped");
                        return res;
                    }
                }
            }
        })
    }

    fn get_reader_feed(
        &self,
        key: DiscoveryKey,
        opts: FeedOpts,
    ) -> BoxFut<'_, HrssResult<Vec<FeedItem>>> {
        Box::pin(async move { self.reader(&key)?.get_feed(opts).await })
    }

    fn get_reader_metadata(
        &self,
        key: DiscoveryKey,
    ) -> BoxFut<'_, HrssResult<FeedMetadata>> {
        Box::pin(async move { self.reader(&key)?.get_metadata().await })
    }

    fn get_reader_blob(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
        Box::pin(async move { self.reader(&key)?.blobs().get(&blob_key).await })
    }

    fn get_reader_blob_id(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<BlobId>> {
        Box::pin(
            async move { self.reader(&key)?.blobs().get_id(&blob_key).await },
        )
    }

    fn get_reader_blob_range(
        &self,
        key: DiscoveryKey,
        blob_id: BlobId,
        range: ByteRange,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
        Box::pin(async move {
            self.reader(&key)?.blobs().get_range(&blob_id, range).await
        })
    }

    fn get_feeds_metadata(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, FeedMetadata)>>> {
        Box::pin(async move {
            let mut ready: Vec<(DiscoveryKey, Arc<Reader>)> = self
                .readers
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(key, slot)| match slot {
                    ReaderSlot::Ready(reader) => {
                        Some((key.clone(), reader.clone()))
                    }
                    _ => None,
                })
                .collect();
            ready.sort_by(|a, b| a.0.cmp(&b.0));
            futures::future::try_join_all(ready.into_iter().map(
                |(key, reader)| async move {
                    Ok((key, reader.get_metadata().await?))
                },
            ))
            .await
        })
    }

    fn list_readers(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, ReaderState)>>> {
        Box::pin(async move {
            let mut out: Vec<_> = self
                .readers
                .lock()
                .unwrap()
                .iter()
                .map(|(key, slot)| (key.clone(), slot.state()))
                .collect();
            out.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(out)
        })
    }
}

#[cfg(test)]
mod test;
