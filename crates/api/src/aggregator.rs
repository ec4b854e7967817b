//! The aggregator call surface. This is what the rpc gateway exposes,
//! and what caching decorators wrap.

use crate::*;
use std::sync::Arc;

/// Options for [AggregatorApi::update_reader].
#[derive(
    Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReaderOpts {
    /// Block until new data is confirmed or no new data is found.
    #[serde(default)]
    pub wait: bool,
}

/// Lifecycle state of a tracked reader.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ReaderState {
    /// Connecting and loading.
    Initializing,
    /// Serving reads.
    Ready,
    /// Releasing resources.
    Closing,
}

/// Owns a set of reader peers keyed by discovery key.
pub trait AggregatorApi: 'static + Send + Sync + std::fmt::Debug {
    /// Start a reader for every replica found in the storage root.
    fn init(&self) -> BoxFut<'_, HrssResult<()>>;

    /// Stop every reader.
    fn close(&self) -> BoxFut<'_, HrssResult<()>>;

    /// Start a reader for `key`. Resolves once the reader is ready.
    fn add_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>>;

    /// Pull new data for the reader of `key`.
    fn update_reader(
        &self,
        key: DiscoveryKey,
        opts: UpdateReaderOpts,
    ) -> BoxFut<'_, HrssResult<()>>;

    /// Stop the reader of `key` and release its resources.
    fn stop_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>>;

    /// Items of a feed, newest first.
    fn get_reader_feed(
        &self,
        key: DiscoveryKey,
        opts: FeedOpts,
    ) -> BoxFut<'_, HrssResult<Vec<FeedItem>>>;

    /// Metadata of a feed.
    fn get_reader_metadata(
        &self,
        key: DiscoveryKey,
    ) -> BoxFut<'_, HrssResult<FeedMetadata>>;

    /// The full content of a feed blob.
    fn get_reader_blob(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>>;

    /// The location of a feed blob, without fetching content.
    fn get_reader_blob_id(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<BlobId>>;

    /// A byte range of a feed blob.
    fn get_reader_blob_range(
        &self,
        key: DiscoveryKey,
        blob_id: BlobId,
        range: ByteRange,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>>;

    /// Metadata of every ready reader, sorted by key.
    fn get_feeds_metadata(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, FeedMetadata)>>>;

    /// Every tracked reader and its state, sorted by key.
    fn list_readers(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, ReaderState)>>>;
}

/// Trait-object [AggregatorApi].
pub type DynAggregatorApi = Arc<dyn AggregatorApi>;
