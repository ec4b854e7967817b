//! The ordered feed index.
//!
//! Three namespaces share one [LogTree]:
//!
//! - `key`: item key to item value.
//! - `order`: zero-padded order index to item key, in insertion order.
//! - `metadata`: feed-level fields to json values.
//!
//! [OrderedFeed::put_ordered_item] writes the order pointer before the
//! item itself. A crash between the two leaves an order entry pointing at
//! a missing key. [OrderedFeed::feed_stream] skips such entries, so the
//! item is simply not visible yet.

use crate::tree::*;
use futures::StreamExt;
use hrss_api::*;
use std::sync::Arc;

/// Namespace holding the items.
pub const KEY_NAMESPACE: &str = "key";

/// Namespace holding the insertion order.
pub const ORDER_NAMESPACE: &str = "order";

/// Namespace holding the feed metadata.
pub const METADATA_NAMESPACE: &str = "metadata";

/// Width of the zero-padded order index strings.
pub const ORDER_DIGITS: usize = 12;

/// Format an order index as a fixed-width string, so that string order
/// matches numeric order.
pub fn order_string(index: u64, digits: usize) -> String {
    format!("{index:0digits$}")
}

/// Parse an order index string.
pub fn order_number(s: &str) -> HrssResult<u64> {
    s.parse()
        .map_err(|_| HrssError::other(format!("invalid order index {s:?}")))
}

/// A stored item along with its insertion position.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    /// Sequence number of the log entry that wrote the item.
    pub seq: u64,
    /// Item key.
    pub key: String,
    /// Item value.
    pub value: bytes::Bytes,
    /// Insertion position.
    pub order_index: u64,
}

impl FeedRecord {
    /// Convert into the client facing item. Values that are not json
    /// become a string.
    pub fn into_item(self) -> FeedItem {
        let value = serde_json::from_slice(&self.value).unwrap_or_else(|_| {
            serde_json::Value::String(
                String::from_utf8_lossy(&self.value).into_owned(),
            )
        });
        FeedItem {
            seq: self.seq,
            key: self.key,
            value,
            order_index: self.order_index,
        }
    }
}

/// Options for [OrderedFeed::feed_stream].
#[derive(Debug, Default, Clone)]
pub struct FeedStreamOpts {
    /// Stop after this many yielded items.
    pub limit: Option<usize>,
}

impl From<FeedOpts> for FeedStreamOpts {
    fn from(opts: FeedOpts) -> Self {
        Self { limit: opts.limit }
    }
}

/// Feed items with durable insertion order, plus a metadata side table.
#[derive(Debug, Clone)]
pub struct OrderedFeed {
    tree: Arc<LogTree>,
    keys: SubTree,
    order: SubTree,
    metadata: SubTree,
    digits: usize,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl OrderedFeed {
    /// Construct an index over `log`.
    pub fn new(log: DynAppendLog) -> Self {
        Self::with_digits(log, ORDER_DIGITS)
    }

    /// Construct an index over `log` using `digits` wide order strings.
    pub fn with_digits(log: DynAppendLog, digits: usize) -> Self {
        let tree = LogTree::new(log);
        Self {
            keys: tree.sub(KEY_NAMESPACE),
            order: tree.sub(ORDER_NAMESPACE),
            metadata: tree.sub(METADATA_NAMESPACE),
            tree,
            digits,
            writer: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The underlying tree.
    pub fn tree(&self) -> &Arc<LogTree> {
        &self.tree
    }

    /// True if an item is stored under `key`.
    pub async fn has_key(&self, key: &str) -> HrssResult<bool> {
        Ok(self.keys.get(key).await?.is_some())
    }

    /// Get a stored item value.
    pub async fn get(&self, key: &str) -> HrssResult<Option<bytes::Bytes>> {
        Ok(self.keys.get(key).await?.map(|n| n.value))
    }

    /// One more than the highest allocated order index, or 0 if empty.
    pub async fn next_highest(&self) -> HrssResult<u64> {
        match self.order.peek(true).await? {
            Some(node) => Ok(order_number(&node.key)? + 1),
            None => Ok(0),
        }
    }

    /// Allocate the next order index for `key` and store `value`.
    /// Calls against the same index are serialized. Resolves to the
    /// allocated order index.
    pub async fn put_ordered_item(
        &self,
        key: &str,
        value: bytes::Bytes,
    ) -> HrssResult<u64> {
        let _g = self.writer.lock().await;
        let index = self.next_highest().await?;
        let order_key = order_string(index, self.digits);
        self.order
            .put(&order_key, bytes::Bytes::copy_from_slice(key.as_bytes()))
            .await?;
        self.keys.put(key, value).await?;
        tracing::trace!(%key, index, "put ordered item");
        Ok(index)
    }

    /// Get a metadata value.
    pub async fn get_metadata_value(
        &self,
        field: MetadataField,
    ) -> HrssResult<Option<serde_json::Value>> {
        let Some(node) = self.metadata.get(field.as_str()).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&node.value).map(Some).map_err(|err| {
            HrssError::other_src(format!("decode metadata {field}"), err)
        })
    }

    /// Unconditionally set a metadata value.
    pub async fn put_metadata(
        &self,
        field: MetadataField,
        value: &serde_json::Value,
    ) -> HrssResult<()> {
        self.metadata.put(field.as_str(), encode_json(value)?).await
    }

    /// Set a metadata value only if its serialized form differs from the
    /// stored one. Resolves to whether a write happened.
    pub async fn maybe_update_metadata(
        &self,
        field: MetadataField,
        value: &serde_json::Value,
    ) -> HrssResult<bool> {
        let wrote = self
            .metadata
            .put_cas(field.as_str(), encode_json(value)?, |cur, new| {
                cur.map(|c| &c.value != new).unwrap_or(true)
            })
            .await?;
        if wrote {
            tracing::debug!(%field, %value, "updated feed metadata");
        }
        Ok(wrote)
    }

    /// Every metadata field.
    pub async fn get_metadata(&self) -> HrssResult<FeedMetadata> {
        let mut out = FeedMetadata::default();
        for field in MetadataField::ALL {
            out.set(field, self.get_metadata_value(field).await?);
        }
        Ok(out)
    }

    /// Items newest first. Each call iterates a fresh snapshot of the
    /// order namespace, resolving items lazily. Order entries whose item
    /// is missing are skipped.
    pub fn feed_stream(
        &self,
        opts: FeedStreamOpts,
    ) -> BoxStream<'static, HrssResult<FeedRecord>> {
        let this = self.clone();
        let limit = opts.limit.unwrap_or(usize::MAX);
        futures::stream::once(async move {
            let order = this.order.entries(true, None).await;
            order.map(|order| (this, order))
        })
        .map(|res| match res {
            Ok((this, order)) => futures::stream::iter(order)
                .then(move |node| {
                    let this = this.clone();
                    async move { this.resolve(node).await }
                })
                .filter_map(|r| async move { r.transpose() })
                .boxed(),
            Err(err) => futures::stream::iter([Err(err)]).boxed(),
        })
        .flatten()
        .take(limit)
        .boxed()
    }

    async fn resolve(&self, node: TreeNode) -> HrssResult<Option<FeedRecord>> {
        let order_index = order_number(&node.key)?;
        let key = String::from_utf8_lossy(&node.value).into_owned();
        match self.keys.get(&key).await? {
            Some(item) => Ok(Some(FeedRecord {
                seq: item.seq,
                key,
                value: item.value,
                order_index,
            })),
            None => {
                tracing::debug!(
                    %key,
                    order_index,
                    "skipping item not yet visible",
                );
                Ok(None)
            }
        }
    }

    /// Every item in key order, without order indices.
    pub fn unordered_feed_stream(
        &self,
    ) -> BoxStream<'static, HrssResult<(String, bytes::Bytes)>> {
        let keys = self.keys.clone();
        futures::stream::once(async move { keys.entries(false, None).await })
            .map(|res| match res {
                Ok(nodes) => futures::stream::iter(
                    nodes.into_iter().map(|n| Ok((n.key, n.value))),
                )
                .boxed(),
                Err(err) => futures::stream::iter([Err(err)]).boxed(),
            })
            .flatten()
            .boxed()
    }
}

fn encode_json(value: &serde_json::Value) -> HrssResult<bytes::Bytes> {
    serde_json::to_vec(value)
        .map(bytes::Bytes::from)
        .map_err(|err| HrssError::other_src("encode json", err))
}

#[cfg(test)]
mod test;
