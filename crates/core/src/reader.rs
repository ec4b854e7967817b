//! The consuming side of a feed.

use crate::peer::*;
use hrss_api::{builder::Builder, *};
use std::sync::Arc;
use std::time::Duration;

/// A local replica of a feed published by a [Writer](crate::writer::Writer).
#[derive(Debug)]
pub struct Reader {
    peer: Peer,
}

impl std::ops::Deref for Reader {
    type Target = Peer;

    fn deref(&self) -> &Self::Target {
        &self.peer
    }
}

impl Reader {
    /// Open the replica of `discovery_key` under `dir` and connect it to
    /// the swarm.
    ///
    /// If no local data exists, waits up to `connect_timeout` for a peer
    /// to deliver the feed's keys record, then fails with
    /// [HrssError::Connection].
    pub async fn create(
        builder: Arc<Builder>,
        dir: std::path::PathBuf,
        discovery_key: DiscoveryKey,
        connect_timeout: Duration,
    ) -> HrssResult<Self> {
        let span = tracing::info_span!(
            "peer",
            kind = %PeerKind::Reader,
            discovery_key = %discovery_key,
        );

        let store = builder.log_store.create(builder.clone(), dir).await?;
        let swarm = builder.swarm.create(builder.clone()).await?;

        let res = Self::open(
            store.clone(),
            swarm.clone(),
            discovery_key,
            connect_timeout,
            span,
        )
        .await;
        if res.is_err() {
            // not yet owned by a peer
            let _ = swarm.destroy().await;
            let _ = store.close().await;
        }
        res
    }

    async fn open(
        store: DynLogStore,
        swarm: DynSwarm,
        discovery_key: DiscoveryKey,
        connect_timeout: Duration,
        span: tracing::Span,
    ) -> HrssResult<Self> {
        let keys = store.open_key(discovery_key.log_key()).await?;
        keys.ready().await?;

        swarm.join(discovery_key.clone(), store.clone()).await?;
        swarm.flush().await?;

        if keys.is_empty() {
            tracing::debug!(parent: &span, "no local data, waiting for a peer");
            let wait = async {
                while keys.is_empty() {
                    if !keys.update(UpdateOpts { wait: true }).await? {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                }
                HrssResult::Ok(())
            };
            match tokio::time::timeout(connect_timeout, wait).await {
                Ok(r) => r?,
                Err(_) => {
                    return Err(HrssError::connection(format!(
                        "no peer found for {discovery_key} within {connect_timeout:?}"
                    )))
                }
            }
        }

        let raw = keys.get(0).await?.ok_or_else(|| {
            HrssError::other(format!("keys record of {discovery_key} missing"))
        })?;
        let record = KeysRecord::decode(&raw)?;

        let logs = PeerLogs {
            keys,
            feed: store.open_key(record.keys.feed).await?,
            blob_keys: store.open_key(record.keys.blob_keys).await?,
            blobs: store.open_key(record.keys.blobs).await?,
        };
        for log in [&logs.feed, &logs.blob_keys, &logs.blobs] {
            log.ready().await?;
        }

        let peer = Peer::new(PeerKind::Reader, store, swarm, logs, span);
        peer.update(UpdateOpts::default()).await?;
        tracing::info!(
            parent: peer.span(),
            feed_len = peer.logs().feed.len(),
            "reader ready",
        );
        Ok(Self { peer })
    }
}
