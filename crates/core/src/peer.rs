//! State shared by [Writer](crate::writer::Writer) and
//! [Reader](crate::reader::Reader) peers.
//!
//! A peer is four logs:
//!
//! - `keys`: a single [KeysRecord] naming the other three. The key of this
//!   log is the feed's [DiscoveryKey].
//! - `feed`: the [OrderedFeed] tree.
//! - `blobKeys`: the [KeyedBlobs] key index.
//! - `blobs`: the [KeyedBlobs] content.

use crate::feed::{FeedStreamOpts, OrderedFeed};
use crate::keyed_blobs::KeyedBlobs;
use futures::TryStreamExt;
use hrss_api::*;

/// The keys of the data logs of a peer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerKeys {
    /// The feed log.
    pub feed: LogKey,
    /// The blob key index log.
    pub blob_keys: LogKey,
    /// The blob content log.
    pub blobs: LogKey,
}

/// Entry 0 of a peer's `keys` log.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeysRecord {
    /// The data log keys.
    pub keys: PeerKeys,
}

impl KeysRecord {
    /// Encode as json.
    pub fn encode(&self) -> HrssResult<bytes::Bytes> {
        serde_json::to_vec(self)
            .map(bytes::Bytes::from)
            .map_err(|err| HrssError::other_src("encode keys record", err))
    }

    /// Decode from json.
    pub fn decode(raw: &[u8]) -> HrssResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|err| HrssError::other_src("decode keys record", err))
    }
}

/// The role a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Produces a feed.
    Writer,
    /// Consumes a replicated feed.
    Reader,
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Writer => f.write_str("writer"),
            Self::Reader => f.write_str("reader"),
        }
    }
}

/// The four logs of a peer.
#[derive(Debug, Clone)]
pub struct PeerLogs {
    /// The keys log.
    pub keys: DynAppendLog,
    /// The feed log.
    pub feed: DynAppendLog,
    /// The blob key index log.
    pub blob_keys: DynAppendLog,
    /// The blob content log.
    pub blobs: DynAppendLog,
}

impl PeerLogs {
    fn all(&self) -> [&DynAppendLog; 4] {
        [&self.keys, &self.feed, &self.blob_keys, &self.blobs]
    }
}

/// A feed peer: its logs, the indexes over them, and the store and swarm
/// keeping them replicated.
#[derive(Debug)]
pub struct Peer {
    kind: PeerKind,
    discovery_key: DiscoveryKey,
    store: DynLogStore,
    swarm: DynSwarm,
    logs: PeerLogs,
    feed: OrderedFeed,
    blobs: KeyedBlobs,
    span: tracing::Span,
}

impl Peer {
    pub(crate) fn new(
        kind: PeerKind,
        store: DynLogStore,
        swarm: DynSwarm,
        logs: PeerLogs,
        span: tracing::Span,
    ) -> Self {
        Self {
            kind,
            discovery_key: logs.keys.key().into(),
            feed: OrderedFeed::new(logs.feed.clone()),
            blobs: KeyedBlobs::new(logs.blob_keys.clone(), logs.blobs.clone()),
            store,
            swarm,
            logs,
            span,
        }
    }

    /// The feed identity.
    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    /// The role of this peer.
    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// The feed index.
    pub fn feed(&self) -> &OrderedFeed {
        &self.feed
    }

    /// The blob store.
    pub fn blobs(&self) -> &KeyedBlobs {
        &self.blobs
    }

    /// The underlying logs.
    pub fn logs(&self) -> &PeerLogs {
        &self.logs
    }

    /// The tracing span this peer logs under.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Pull new entries into every log concurrently. Resolves to `true`
    /// if any log grew.
    pub async fn update(&self, opts: UpdateOpts) -> HrssResult<bool> {
        let all = self.logs.all().map(|log| log.update(opts));
        let grew = futures::future::try_join_all(all).await?;
        let grew = grew.into_iter().any(|g| g);
        tracing::debug!(parent: &self.span, grew, "updated");
        Ok(grew)
    }

    /// Feed items, newest first.
    pub async fn get_feed(&self, opts: FeedOpts) -> HrssResult<Vec<FeedItem>> {
        self.feed
            .feed_stream(FeedStreamOpts::from(opts))
            .map_ok(|r| r.into_item())
            .try_collect()
            .await
    }

    /// Feed metadata.
    pub async fn get_metadata(&self) -> HrssResult<FeedMetadata> {
        self.feed.get_metadata().await
    }

    /// Leave the swarm and close every log.
    pub async fn close(&self) -> HrssResult<()> {
        let mut res = vec![self.swarm.destroy().await];
        for log in self.logs.all() {
            res.push(log.close().await);
        }
        res.push(self.store.close().await);
        tracing::info!(parent: &self.span, "closed");
        res.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
    }
}
