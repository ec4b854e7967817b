//! A sorted key/value index stored in an append log.
//!
//! Every `put` or `del` appends exactly one json entry to the log. The
//! in-memory index is rebuilt lazily from the log before each read, so
//! entries that arrive through replication become visible on the next
//! call without any extra bookkeeping.

use hrss_api::*;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Separates a namespace from the key within it.
pub const NAMESPACE_SEP: char = '\0';

mod serde_opt_bytes {
    use base64::prelude::*;

    pub fn serialize<S>(
        b: &Option<bytes::Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match b {
            Some(b) => serializer.serialize_str(&BASE64_STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Option<bytes::Bytes>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: Option<String> = serde::Deserialize::deserialize(deserializer)?;
        s.map(|s| {
            BASE64_STANDARD
                .decode(s)
                .map(bytes::Bytes::from)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// One log entry. A missing value is a delete.
#[derive(serde::Serialize, serde::Deserialize)]
struct TreeOp {
    #[serde(rename = "k")]
    key: String,
    #[serde(
        rename = "v",
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_opt_bytes"
    )]
    value: Option<bytes::Bytes>,
}

/// A key/value pair along with the log sequence that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Sequence number of the log entry that wrote this value.
    pub seq: u64,
    /// The key.
    pub key: String,
    /// The value.
    pub value: bytes::Bytes,
}

#[derive(Debug, Default)]
struct Index {
    applied: u64,
    map: BTreeMap<String, (u64, bytes::Bytes)>,
}

impl Index {
    fn node(&self, key: &str) -> Option<TreeNode> {
        self.map.get(key).map(|(seq, value)| TreeNode {
            seq: *seq,
            key: key.to_string(),
            value: value.clone(),
        })
    }

    fn range(
        &self,
        prefix: &str,
    ) -> impl DoubleEndedIterator<Item = TreeNode> + '_ {
        self.map
            .range::<str, _>(prefix_bounds(prefix))
            .map(|(key, (seq, value))| TreeNode {
                seq: *seq,
                key: key.clone(),
                value: value.clone(),
            })
    }
}

fn prefix_bounds(prefix: &str) -> (Bound<&str>, Bound<&str>) {
    (Bound::Included(prefix), Bound::Unbounded)
}

/// The smallest string greater than every string starting with `prefix`.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Sorted key/value index over an [AppendLog].
#[derive(Debug)]
pub struct LogTree {
    log: DynAppendLog,
    index: tokio::sync::Mutex<Index>,
}

impl LogTree {
    /// Construct a tree over `log`.
    pub fn new(log: DynAppendLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            index: tokio::sync::Mutex::new(Index::default()),
        })
    }

    /// The underlying log.
    pub fn log(&self) -> &DynAppendLog {
        &self.log
    }

    /// A namespaced view of this tree.
    pub fn sub(self: &Arc<Self>, namespace: &str) -> SubTree {
        SubTree {
            tree: self.clone(),
            prefix: format!("{namespace}{NAMESPACE_SEP}"),
        }
    }

    async fn refresh(&self, index: &mut Index) -> HrssResult<()> {
        let len = self.log.len();
        while index.applied < len {
            let seq = index.applied;
            let raw = self.log.get(seq).await?.ok_or_else(|| {
                HrssError::not_found(format!(
                    "tree entry {seq} of log {}",
                    self.log.key()
                ))
            })?;
            let op: TreeOp = serde_json::from_slice(&raw).map_err(|err| {
                HrssError::other_src(format!("decode tree entry {seq}"), err)
            })?;
            match op.value {
                Some(value) => {
                    index.map.insert(op.key, (seq, value));
                }
                None => {
                    index.map.remove(&op.key);
                }
            }
            index.applied += 1;
        }
        Ok(())
    }

    async fn write(
        &self,
        index: &mut Index,
        key: &str,
        value: Option<bytes::Bytes>,
    ) -> HrssResult<()> {
        let op = TreeOp {
            key: key.to_string(),
            value,
        };
        let raw = serde_json::to_vec(&op)
            .map_err(|err| HrssError::other_src("encode tree entry", err))?;
        self.log.append(vec![raw.into()]).await?;
        self.refresh(index).await
    }

    /// Get the node at `key`.
    pub async fn get(&self, key: &str) -> HrssResult<Option<TreeNode>> {
        let mut index = self.index.lock().await;
        self.refresh(&mut index).await?;
        Ok(index.node(key))
    }

    /// Set `key` to `value`.
    pub async fn put(&self, key: &str, value: bytes::Bytes) -> HrssResult<()> {
        self.put_cas(key, value, |_, _| true).await.map(|_| ())
    }

    /// Set `key` to `value` only if `cas(current, &value)` returns true.
    /// The check and the write happen under one lock.
    /// Resolves to whether the write happened.
    pub async fn put_cas<F>(
        &self,
        key: &str,
        value: bytes::Bytes,
        cas: F,
    ) -> HrssResult<bool>
    where
        F: FnOnce(Option<&TreeNode>, &bytes::Bytes) -> bool + Send,
    {
        let mut index = self.index.lock().await;
        self.refresh(&mut index).await?;
        if !cas(index.node(key).as_ref(), &value) {
            return Ok(false);
        }
        self.write(&mut index, key, Some(value)).await?;
        Ok(true)
    }

    /// Remove `key`. Resolves to whether it existed.
    pub async fn del(&self, key: &str) -> HrssResult<bool> {
        let mut index = self.index.lock().await;
        self.refresh(&mut index).await?;
        if !index.map.contains_key(key) {
            return Ok(false);
        }
        self.write(&mut index, key, None).await?;
        Ok(true)
    }

    /// The first (or, if `reverse`, the last) node whose key starts
    /// with `prefix`.
    pub async fn peek(
        &self,
        prefix: &str,
        reverse: bool,
    ) -> HrssResult<Option<TreeNode>> {
        let mut index = self.index.lock().await;
        self.refresh(&mut index).await?;
        if !reverse {
            return Ok(index.range(prefix).next().filter(|n| n.key.starts_with(prefix)));
        }
        let upper = prefix_successor(prefix);
        let found = match &upper {
            Some(upper) => index
                .map
                .range::<str, _>((
                    Bound::Included(prefix),
                    Bound::Excluded(upper.as_str()),
                ))
                .next_back(),
            None => index.map.range::<str, _>(prefix_bounds(prefix)).next_back(),
        };
        Ok(found.map(|(key, (seq, value))| TreeNode {
            seq: *seq,
            key: key.clone(),
            value: value.clone(),
        }))
    }

    /// A snapshot of every node whose key starts with `prefix`,
    /// in ascending (or, if `reverse`, descending) key order.
    pub async fn entries(
        &self,
        prefix: &str,
        reverse: bool,
        limit: Option<usize>,
    ) -> HrssResult<Vec<TreeNode>> {
        let mut index = self.index.lock().await;
        self.refresh(&mut index).await?;
        let limit = limit.unwrap_or(usize::MAX);
        let matching = index.range(prefix).take_while(|n| n.key.starts_with(prefix));
        let out = if reverse {
            let mut all: Vec<_> = matching.collect();
            all.reverse();
            all.truncate(limit);
            all
        } else {
            matching.take(limit).collect()
        };
        Ok(out)
    }
}

/// A namespaced view of a [LogTree]. Keys are stored as
/// `"{namespace}\0{key}"` and returned without the prefix.
#[derive(Debug, Clone)]
pub struct SubTree {
    tree: Arc<LogTree>,
    prefix: String,
}

impl SubTree {
    fn full(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn strip(&self, mut node: TreeNode) -> TreeNode {
        node.key = node.key[self.prefix.len()..].to_string();
        node
    }

    /// The tree this view belongs to.
    pub fn tree(&self) -> &Arc<LogTree> {
        &self.tree
    }

    /// Get the node at `key`.
    pub async fn get(&self, key: &str) -> HrssResult<Option<TreeNode>> {
        Ok(self.tree.get(&self.full(key)).await?.map(|n| self.strip(n)))
    }

    /// Set `key` to `value`.
    pub async fn put(&self, key: &str, value: bytes::Bytes) -> HrssResult<()> {
        self.tree.put(&self.full(key), value).await
    }

    /// See [LogTree::put_cas].
    pub async fn put_cas<F>(
        &self,
        key: &str,
        value: bytes::Bytes,
        cas: F,
    ) -> HrssResult<bool>
    where
        F: FnOnce(Option<&TreeNode>, &bytes::Bytes) -> bool + Send,
    {
        self.tree.put_cas(&self.full(key), value, cas).await
    }

    /// Remove `key`.
    pub async fn del(&self, key: &str) -> HrssResult<bool> {
        self.tree.del(&self.full(key)).await
    }

    /// See [LogTree::peek].
    pub async fn peek(&self, reverse: bool) -> HrssResult<Option<TreeNode>> {
        Ok(self
            .tree
            .peek(&self.prefix, reverse)
            .await?
            .map(|n| self.strip(n)))
    }

    /// See [LogTree::entries].
    pub async fn entries(
        &self,
        reverse: bool,
        limit: Option<usize>,
    ) -> HrssResult<Vec<TreeNode>> {
        Ok(self
            .tree
            .entries(&self.prefix, reverse, limit)
            .await?
            .into_iter()
            .map(|n| self.strip(n))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_log;

    fn b(s: &'static str) -> bytes::Bytes {
        bytes::Bytes::from_static(s.as_bytes())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_del() {
        let tree = LogTree::new(test_log().await);
        tree.put("a", b("1")).await.unwrap();
        tree.put("b", b("2")).await.unwrap();
        tree.put("a", b("3")).await.unwrap();

        let a = tree.get("a").await.unwrap().unwrap();
        assert_eq!(b("3"), a.value);
        assert_eq!(2, a.seq);

        assert!(tree.del("a").await.unwrap());
        assert!(!tree.del("a").await.unwrap());
        assert_eq!(None, tree.get("a").await.unwrap());
        assert_eq!(4, tree.log().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cas_skips_writes() {
        let tree = LogTree::new(test_log().await);
        let same = |cur: Option<&TreeNode>, new: &bytes::Bytes| {
            cur.map(|c| &c.value != new).unwrap_or(true)
        };
        assert!(tree.put_cas("k", b("x"), same).await.unwrap());
        assert!(!tree.put_cas("k", b("x"), same).await.unwrap());
        assert!(tree.put_cas("k", b("y"), same).await.unwrap());
        assert_eq!(2, tree.log().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn namespaces_are_disjoint_and_sorted() {
        let tree = LogTree::new(test_log().await);
        let one = tree.sub("one");
        let two = tree.sub("two");

        one.put("b", b("1")).await.unwrap();
        one.put("a", b("2")).await.unwrap();
        two.put("c", b("3")).await.unwrap();

        let keys: Vec<_> = one
            .entries(false, None)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        assert_eq!(vec!["a", "b"], keys);

        assert_eq!("b", one.peek(true).await.unwrap().unwrap().key);
        assert_eq!("a", one.peek(false).await.unwrap().unwrap().key);
        assert_eq!("c", two.peek(true).await.unwrap().unwrap().key);
        assert_eq!(None, tree.sub("three").peek(true).await.unwrap());

        let rev: Vec<_> = one
            .entries(true, Some(1))
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        assert_eq!(vec!["b"], rev);
        assert_eq!(None, two.get("a").await.unwrap());
    }

    #[test]
    fn successor() {
        assert_eq!(Some("one\u{1}".to_string()), prefix_successor("one\0"));
        assert_eq!(Some("b".to_string()), prefix_successor("a"));
        assert_eq!(None, prefix_successor(""));
    }
}
