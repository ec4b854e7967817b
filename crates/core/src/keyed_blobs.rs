//! Blobs addressed by caller supplied string keys.
//!
//! A `blobKeys` tree maps each key to the json encoded [BlobId] of its
//! content in a [Blobs] log. With content-hash derived keys,
//! [KeyedBlobs::maybe_put] de-duplicates ingestion.

use crate::blobs::Blobs;
use crate::tree::LogTree;
use hrss_api::*;
use std::sync::Arc;

/// Blobs addressed by string keys.
#[derive(Debug, Clone)]
pub struct KeyedBlobs {
    keys: Arc<LogTree>,
    blobs: Blobs,
    put_lock: Arc<tokio::sync::Mutex<()>>,
}

impl KeyedBlobs {
    /// Construct over a key index log and a blob content log.
    pub fn new(keys_log: DynAppendLog, blobs_log: DynAppendLog) -> Self {
        Self {
            keys: LogTree::new(keys_log),
            blobs: Blobs::new(blobs_log),
            put_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The underlying blob storage.
    pub fn blobs(&self) -> &Blobs {
        &self.blobs
    }

    async fn put_inner(
        &self,
        key: &str,
        blob: bytes::Bytes,
    ) -> HrssResult<BlobId> {
        let id = self.blobs.put(blob).await?;
        let raw = serde_json::to_vec(&id)
            .map_err(|err| HrssError::other_src("encode blob id", err))?;
        self.keys.put(key, raw.into()).await?;
        Ok(id)
    }

    /// Store `blob` under `key`, replacing any previous mapping.
    pub async fn put(
        &self,
        key: &str,
        blob: bytes::Bytes,
    ) -> HrssResult<BlobId> {
        let _g = self.put_lock.lock().await;
        self.put_inner(key, blob).await
    }

    /// Store `blob` under `key` unless `key` already exists, in which
    /// case nothing is written and `None` is returned.
    pub async fn maybe_put(
        &self,
        key: &str,
        blob: bytes::Bytes,
    ) -> HrssResult<Option<BlobId>> {
        let _g = self.put_lock.lock().await;
        if self.keys.get(key).await?.is_some() {
            tracing::trace!(%key, "blob already stored");
            return Ok(None);
        }
        self.put_inner(key, blob).await.map(Some)
    }

    /// Resolve `key` to its blob location.
    pub async fn get_id(&self, key: &str) -> HrssResult<BlobId> {
        let node = self
            .keys
            .get(key)
            .await?
            .ok_or_else(|| HrssError::not_found(format!("blob key {key}")))?;
        serde_json::from_slice(&node.value)
            .map_err(|err| HrssError::other_src("decode blob id", err))
    }

    /// Fetch the whole blob stored under `key`.
    pub async fn get(&self, key: &str) -> HrssResult<bytes::Bytes> {
        let id = self.get_id(key).await?;
        self.blobs.get(&id).await
    }

    /// Fetch `[start, end)` of the blob at `id`, without a key lookup.
    pub async fn get_range(
        &self,
        id: &BlobId,
        range: ByteRange,
    ) -> HrssResult<bytes::Bytes> {
        self.blobs.get_range(id, range).await
    }

    /// Every stored key.
    pub async fn get_keys(&self) -> HrssResult<Vec<String>> {
        Ok(self
            .keys
            .entries("", false, None)
            .await?
            .into_iter()
            .map(|n| n.key)
            .collect())
    }

    /// Every key with its full blob. Loads everything into memory, only
    /// meant for small stores such as test fixtures.
    pub async fn get_keys_and_blobs(
        &self,
    ) -> HrssResult<Vec<(String, bytes::Bytes)>> {
        let mut out = Vec::new();
        for key in self.get_keys().await? {
            let blob = self.get(&key).await?;
            out.push((key, blob));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_log;

    async fn store() -> KeyedBlobs {
        KeyedBlobs::new(test_log().await, test_log().await)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn maybe_put_is_idempotent() {
        let kb = store().await;
        let blob = bytes::Bytes::from_static(b"episode audio");

        let first = kb.maybe_put("abc.mp3", blob.clone()).await.unwrap();
        assert!(first.is_some());
        assert_eq!(blob, kb.get("abc.mp3").await.unwrap());

        let second = kb
            .maybe_put("abc.mp3", bytes::Bytes::from_static(b"other"))
            .await
            .unwrap();
        assert_eq!(None, second);
        assert_eq!(blob, kb.get("abc.mp3").await.unwrap());
        assert_eq!(1, kb.blobs().log().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_maybe_put_stores_once() {
        let kb = store().await;
        let all = (0..6).map(|_| {
            let kb = kb.clone();
            async move {
                kb.maybe_put("same", bytes::Bytes::from_static(b"x")).await
            }
        });
        let res = futures::future::try_join_all(all).await.unwrap();
        assert_eq!(1, res.iter().filter(|r| r.is_some()).count());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_id_and_range() {
        let kb = store().await;
        let id = kb
            .put("img.png", bytes::Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        assert_eq!(id, kb.get_id("img.png").await.unwrap());
        assert_eq!(10, id.byte_length);
        assert_eq!(
            bytes::Bytes::from_static(b"234"),
            kb.get_range(&id, ByteRange { start: 2, end: 5 }).await.unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_key_is_not_found() {
        let kb = store().await;
        assert!(kb.get("nope").await.unwrap_err().is_not_found());
        assert!(kb.get_id("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keys_and_blobs() {
        let kb = store().await;
        kb.put("b", bytes::Bytes::from_static(b"2")).await.unwrap();
        kb.put("a", bytes::Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(vec!["a", "b"], kb.get_keys().await.unwrap());
        assert_eq!(
            vec![
                ("a".to_string(), bytes::Bytes::from_static(b"1")),
                ("b".to_string(), bytes::Bytes::from_static(b"2")),
            ],
            kb.get_keys_and_blobs().await.unwrap()
        );
    }
}
