//! In-memory feed sources, for tests and demos.

use hrss_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A [FeedSource] serving whatever feed was last set.
#[derive(Debug, Default)]
pub struct MemFeedSource {
    feed: Mutex<ParsedFeed>,
}

impl MemFeedSource {
    /// Construct a new MemFeedSource.
    pub fn create(feed: ParsedFeed) -> Arc<Self> {
        Arc::new(Self {
            feed: Mutex::new(feed),
        })
    }

    /// Replace the served feed.
    pub fn set(&self, feed: ParsedFeed) {
        *self.feed.lock().unwrap() = feed;
    }
}

impl FeedSource for MemFeedSource {
    fn fetch(&self) -> BoxFut<'_, HrssResult<ParsedFeed>> {
        Box::pin(async move { Ok(self.feed.lock().unwrap().clone()) })
    }
}

/// A [BlobFetcher] serving registered urls, counting fetches.
#[derive(Debug, Default)]
pub struct MemBlobFetcher {
    blobs: Mutex<HashMap<String, bytes::Bytes>>,
    fetch_count: std::sync::atomic::AtomicUsize,
}

impl MemBlobFetcher {
    /// Construct a new, empty MemBlobFetcher.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `content` at `url`.
    pub fn insert(&self, url: impl Into<String>, content: bytes::Bytes) {
        self.blobs.lock().unwrap().insert(url.into(), content);
    }

    /// Number of fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl BlobFetcher for MemBlobFetcher {
    fn fetch(&self, url: &str) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
        let url = url.to_string();
        Box::pin(async move {
            self.fetch_count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.blobs
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .ok_or_else(|| HrssError::not_found(format!("url {url}")))
        })
    }
}
