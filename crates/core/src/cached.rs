//! An [AggregatorApi] decorator memoizing the read calls.
//!
//! `getReaderFeed`, `getReaderMetadata` and `getReaderBlob` go through an
//! [ApiCache]. Adding or updating a reader invalidates the entries of its
//! discovery key once the call completed. Stopping a reader, `init` and
//! `close` invalidate everything.

use crate::cache::*;
use hrss_api::*;
use std::sync::Arc;

/// Cache method name of [AggregatorApi::get_reader_feed].
pub const GET_READER_FEED: &str = "getReaderFeed";
/// Cache method name of [AggregatorApi::get_reader_metadata].
pub const GET_READER_METADATA: &str = "getReaderMetadata";
/// Cache method name of [AggregatorApi::get_reader_blob].
pub const GET_READER_BLOB: &str = "getReaderBlob";

/// A cached aggregator result.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// Feed items.
    Feed(Vec<FeedItem>),
    /// Feed metadata.
    Metadata(FeedMetadata),
    /// Blob content.
    Blob(bytes::Bytes),
}

fn to_arg<T: serde::Serialize>(t: &T) -> HrssResult<serde_json::Value> {
    serde_json::to_value(t)
        .map_err(|err| HrssError::other_src("encode cache argument", err))
}

fn from_arg<T: serde::de::DeserializeOwned>(
    args: &[serde_json::Value],
    index: usize,
) -> HrssResult<T> {
    let arg = args.get(index).cloned().unwrap_or_default();
    serde_json::from_value(arg).map_err(|err| {
        HrssError::protocol(format!("cache argument {index}: {err}"))
    })
}

fn unexpected(name: &str, value: CacheValue) -> HrssError {
    HrssError::other(format!("{name} cached an unexpected value: {value:?}"))
}

/// Wraps an [AggregatorApi] with an [ApiCache].
#[derive(Debug)]
pub struct CachedAggregator {
    inner: DynAggregatorApi,
    cache: Arc<ApiCache<CacheValue>>,
    feed: CachedMethod<CacheValue>,
    metadata: CachedMethod<CacheValue>,
    blob: CachedMethod<CacheValue>,
    on_reader: InvalidateOn<CacheValue>,
    on_all: InvalidateOn<CacheValue>,
}

impl CachedAggregator {
    /// Wrap `inner`.
    pub fn create(inner: DynAggregatorApi) -> Arc<Self> {
        let cache = ApiCache::new();

        let api = inner.clone();
        let feed = cache_method(
            &cache,
            GET_READER_FEED,
            Arc::new(
                move |args: CacheArgs| -> BoxFut<'static, HrssResult<CacheValue>> {
                    let api = api.clone();
                    Box::pin(async move {
                        let key: DiscoveryKey = from_arg(&args, 0)?;
                        let opts: FeedOpts = from_arg(&args, 1)?;
                        api.get_reader_feed(key, opts).await.map(CacheValue::Feed)
                    })
                },
            ),
            None,
        );

        let api = inner.clone();
        let metadata = cache_method(
            &cache,
            GET_READER_METADATA,
            Arc::new(
                move |args: CacheArgs| -> BoxFut<'static, HrssResult<CacheValue>> {
                    let api = api.clone();
                    Box::pin(async move {
                        let key: DiscoveryKey = from_arg(&args, 0)?;
                        api.get_reader_metadata(key)
                            .await
                            .map(CacheValue::Metadata)
                    })
                },
            ),
            None,
        );

        let api = inner.clone();
        let blob = cache_method(
            &cache,
            GET_READER_BLOB,
            Arc::new(
                move |args: CacheArgs| -> BoxFut<'static, HrssResult<CacheValue>> {
                    let api = api.clone();
                    Box::pin(async move {
                        let key: DiscoveryKey = from_arg(&args, 0)?;
                        let blob_key: String = from_arg(&args, 1)?;
                        api.get_reader_blob(key, blob_key)
                            .await
                            .map(CacheValue::Blob)
                    })
                },
            ),
            None,
        );

        // entries mention the discovery key as a json string
        let on_reader = InvalidateOn::new(
            cache.clone(),
            Arc::new(|args: &[serde_json::Value]| match args.first() {
                Some(key) => KeyPattern::containing(&stable_stringify(key)),
                None => KeyPattern::All,
            }),
        );
        let on_all = InvalidateOn::new(
            cache.clone(),
            Arc::new(|_args: &[serde_json::Value]| KeyPattern::All),
        );

        Arc::new(Self {
            inner,
            cache,
            feed,
            metadata,
            blob,
            on_reader,
            on_all,
        })
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<ApiCache<CacheValue>> {
        &self.cache
    }
}

impl AggregatorApi for CachedAggregator {
    fn init(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(self.on_all.run(&[], self.inner.init()))
    }

    fn close(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(self.on_all.run(&[], self.inner.close()))
    }

    fn add_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let args = [to_arg(&key)?];
            self.on_reader.run(&args, self.inner.add_reader(key)).await
        })
    }

    fn update_reader(
        &self,
        key: DiscoveryKey,
        opts: UpdateReaderOpts,
    ) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            let args = [to_arg(&key)?];
            self.on_reader
                .run(&args, self.inner.update_reader(key, opts))
                .await
        })
    }

    fn stop_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(self.on_all.run(&[], self.inner.stop_reader(key)))
    }

    fn get_reader_feed(
        &self,
        key: DiscoveryKey,
        opts: FeedOpts,
    ) -> BoxFut<'_, HrssResult<Vec<FeedItem>>> {
        Box::pin(async move {
            match self.feed.call(vec![to_arg(&key)?, to_arg(&opts)?]).await? {
                CacheValue::Feed(items) => Ok(items),
                other => Err(unexpected(GET_READER_FEED, other)),
            }
        })
    }

    fn get_reader_metadata(
        &self,
        key: DiscoveryKey,
    ) -> BoxFut<'_, HrssResult<FeedMetadata>> {
        Box::pin(async move {
            match self.metadata.call(vec![to_arg(&key)?]).await? {
                CacheValue::Metadata(meta) => Ok(meta),
                other => Err(unexpected(GET_READER_METADATA, other)),
            }
        })
    }

    fn get_reader_blob(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
        Box::pin(async move {
            let args = vec![to_arg(&key)?, to_arg(&blob_key)?];
            match self.blob.call(args).await? {
                CacheValue::Blob(blob) => Ok(blob),
                other => Err(unexpected(GET_READER_BLOB, other)),
            }
        })
    }

    fn get_reader_blob_id(
        &self,
        key: DiscoveryKey,
        blob_key: String,
    ) -> BoxFut<'_, HrssResult<BlobId>> {
        self.inner.get_reader_blob_id(key, blob_key)
    }

    fn get_reader_blob_range(
        &self,
        key: DiscoveryKey,
        blob_id: BlobId,
        range: ByteRange,
    ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
        self.inner.get_reader_blob_range(key, blob_id, range)
    }

    fn get_feeds_metadata(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, FeedMetadata)>>> {
        self.inner.get_feeds_metadata()
    }

    fn list_readers(
        &self,
    ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, ReaderState)>>> {
        self.inner.list_readers()
    }
}
