//! The producing side of a feed.

use crate::items;
use crate::peer::*;
use hrss_api::{builder::Builder, *};
use std::sync::Arc;
use tracing::Instrument;

/// Local log name of the keys log.
pub const KEYS_LOG_NAME: &str = "hrss-keys";
/// Local log name of the feed log.
pub const FEED_LOG_NAME: &str = "hrss-feed";
/// Local log name of the blob key index log.
pub const BLOB_KEYS_LOG_NAME: &str = "hrss-blobKeys";
/// Local log name of the blob content log.
pub const BLOBS_LOG_NAME: &str = "hrss-blobs";

/// Mirrors a [FeedSource] into a replicated [Peer].
#[derive(Debug)]
pub struct Writer {
    peer: Peer,
    source: DynFeedSource,
    fetcher: DynBlobFetcher,
    update_lock: tokio::sync::Mutex<()>,
}

impl Writer {
    /// Open (or create) the writer logs under `dir` and announce the feed.
    pub async fn create(
        builder: Arc<Builder>,
        dir: std::path::PathBuf,
        source: DynFeedSource,
        fetcher: DynBlobFetcher,
    ) -> HrssResult<Self> {
        let store = builder.log_store.create(builder.clone(), dir).await?;
        let swarm = builder.swarm.create(builder.clone()).await?;

        let keys = store.open_named(KEYS_LOG_NAME).await?;
        let logs = PeerLogs {
            feed: store.open_named(FEED_LOG_NAME).await?,
            blob_keys: store.open_named(BLOB_KEYS_LOG_NAME).await?,
            blobs: store.open_named(BLOBS_LOG_NAME).await?,
            keys,
        };
        for log in [&logs.keys, &logs.feed, &logs.blob_keys, &logs.blobs] {
            log.ready().await?;
        }

        let record = KeysRecord {
            keys: PeerKeys {
                feed: logs.feed.key(),
                blob_keys: logs.blob_keys.key(),
                blobs: logs.blobs.key(),
            },
        };
        match logs.keys.get(0).await? {
            None => {
                logs.keys.append(vec![record.encode()?]).await?;
            }
            Some(raw) => {
                if KeysRecord::decode(&raw)? != record {
                    return Err(HrssError::other(
                        "keys log does not match the local logs",
                    ));
                }
            }
        }

        let discovery_key = DiscoveryKey::from(logs.keys.key());
        let span = tracing::info_span!(
            "peer",
            kind = %PeerKind::Writer,
            discovery_key = %discovery_key,
        );
        swarm.join(discovery_key, store.clone()).await?;
        swarm.flush().await?;
        tracing::info!(parent: &span, "writer ready");

        Ok(Self {
            peer: Peer::new(PeerKind::Writer, store, swarm, logs, span),
            source,
            fetcher,
            update_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The replicated peer.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The feed identity readers subscribe to.
    pub fn discovery_key(&self) -> &DiscoveryKey {
        self.peer.discovery_key()
    }

    /// Fetch the source and store items not seen before, oldest first,
    /// then refresh the metadata. Resolves to the keys of the added items.
    pub async fn update_feed(&self) -> HrssResult<Vec<String>> {
        let _g = self.update_lock.lock().await;
        let span = self.peer.span().clone();
        async move {
            let parsed = self.source.fetch().await?;
            let feed = self.peer.feed();
            let missing = items::missing_items(feed, &parsed).await?;

            let mut added = Vec::with_capacity(missing.len());
            for item in missing {
                let key = item.guid.clone();
                items::ingest_item(feed, self.peer.blobs(), &self.fetcher, item)
                    .await?;
                added.push(key);
            }

            let written = items::update_metadata(feed, &parsed).await?;
            tracing::info!(
                added = added.len(),
                metadata_written = written,
                "updated feed",
            );
            Ok(added)
        }
        .instrument(span)
        .await
    }

    /// Leave the swarm and close the logs.
    pub async fn close(&self) -> HrssResult<()> {
        self.peer.close().await
    }
}
