//! Feed source related types. A writer pulls parsed feeds from a
//! [FeedSource] and enclosure bytes from a [BlobFetcher].

use crate::*;
use std::sync::Arc;

/// A media enclosure attached to a feed item.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Enclosure {
    /// Where to download the enclosure. After ingestion this is
    /// rewritten to the blob key the content was stored under.
    pub url: String,

    /// Mime type, if the feed reported one.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Byte length, if the feed reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// One parsed feed item.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParsedItem {
    /// Stable unique id of the item within its feed.
    pub guid: String,

    /// Optional media enclosure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,

    /// Every other field the parser produced (title, link, content...).
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A parsed feed.
#[derive(
    Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFeed {
    /// Feed title.
    #[serde(default)]
    pub title: Option<serde_json::Value>,
    /// Feed description.
    #[serde(default)]
    pub description: Option<serde_json::Value>,
    /// Publication date.
    #[serde(default)]
    pub pub_date: Option<serde_json::Value>,
    /// Last build date.
    #[serde(default)]
    pub last_build_date: Option<serde_json::Value>,
    /// Items, newest first, as feeds usually list them.
    #[serde(default)]
    pub items: Vec<ParsedItem>,
}

impl ParsedFeed {
    /// The feed-level metadata of this parsed feed.
    pub fn metadata(&self) -> FeedMetadata {
        FeedMetadata {
            title: self.title.clone(),
            description: self.description.clone(),
            pub_date: self.pub_date.clone(),
            last_build_date: self.last_build_date.clone(),
        }
    }
}

/// Fetches and parses a feed.
pub trait FeedSource: 'static + Send + Sync + std::fmt::Debug {
    /// Fetch the current state of the feed.
    fn fetch(&self) -> BoxFut<'_, HrssResult<ParsedFeed>>;
}

/// Trait-object [FeedSource].
pub type DynFeedSource = Arc<dyn FeedSource>;

/// Downloads enclosure content.
pub trait BlobFetcher: 'static + Send + Sync + std::fmt::Debug {
    /// Fetch the bytes behind `url`.
    fn fetch(&self, url: &str) -> BoxFut<'_, HrssResult<bytes::Bytes>>;
}

/// Trait-object [BlobFetcher].
pub type DynBlobFetcher = Arc<dyn BlobFetcher>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn item_keeps_unknown_fields() {
        let item: ParsedItem = serde_json::from_str(
            r#"{
                "guid": "g1",
                "title": "Episode 1",
                "enclosure": { "url": "http://x/1.mp3", "type": "audio/mpeg" }
            }"#,
        )
        .unwrap();
        assert_eq!("g1", item.guid);
        assert_eq!(
            Some(&serde_json::json!("Episode 1")),
            item.fields.get("title")
        );
        let enc = item.enclosure.as_ref().unwrap();
        assert_eq!(Some("audio/mpeg"), enc.mime_type.as_deref());

        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(serde_json::json!("Episode 1"), back["title"]);
        assert_eq!(serde_json::json!("audio/mpeg"), back["enclosure"]["type"]);
    }
}
