//! Feed item and metadata types shared by the index, the aggregator,
//! and the rpc wire format.

use crate::*;

/// The fixed set of feed-level metadata fields.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum MetadataField {
    /// Feed title.
    Title,
    /// Feed description.
    Description,
    /// Publication date, as the feed reported it.
    PubDate,
    /// Last build date, as the feed reported it.
    LastBuildDate,
}

impl MetadataField {
    /// Every metadata field, in display order.
    pub const ALL: [MetadataField; 4] = [
        MetadataField::Title,
        MetadataField::Description,
        MetadataField::PubDate,
        MetadataField::LastBuildDate,
    ];

    /// The name this field is stored and serialized under.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Description => "description",
            MetadataField::PubDate => "pubDate",
            MetadataField::LastBuildDate => "lastBuildDate",
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetadataField {
    type Err = HrssError;

    fn from_str(s: &str) -> HrssResult<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| HrssError::protocol(format!("unknown field {s}")))
    }
}

/// Feed-level metadata. Fields the feed never reported are `null`.
#[derive(
    Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetadata {
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
}

impl FeedMetadata {
    /// Get a field by enum.
    pub fn get(&self, field: MetadataField) -> Option<&serde_json::Value> {
        match field {
            MetadataField::Title => self.title.as_ref(),
            MetadataField::Description => self.description.as_ref(),
            MetadataField::PubDate => self.pub_date.as_ref(),
            MetadataField::LastBuildDate => self.last_build_date.as_ref(),
        }
    }

    /// Set a field by enum.
    pub fn set(
        &mut self,
        field: MetadataField,
        value: Option<serde_json::Value>,
    ) {
        match field {
            MetadataField::Title => self.title = value,
            MetadataField::Description => self.description = value,
            MetadataField::PubDate => self.pub_date = value,
            MetadataField::LastBuildDate => self.last_build_date = value,
        }
    }
}

/// A feed item as returned to aggregator clients.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    /// Log sequence number of the entry holding this item.
    pub seq: u64,

    /// The item key (usually the guid).
    pub key: String,

    /// The item content. Values that are not json are returned as
    /// a lossy utf8 string.
    pub value: serde_json::Value,

    /// Insertion position of this item within its feed.
    pub order_index: u64,
}

/// Options for reading a feed, newest first.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct FeedOpts {
    /// Maximum number of items to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metadata_serializes_with_all_fields() {
        let mut m = FeedMetadata::default();
        m.set(MetadataField::Title, Some(serde_json::json!("My Pod")));
        assert_eq!(
            r#"{"title":"My Pod","description":null,"pubDate":null,"lastBuildDate":null}"#,
            serde_json::to_string(&m).unwrap(),
        );
        assert_eq!(Some(&serde_json::json!("My Pod")), m.get(MetadataField::Title));
    }

    #[test]
    fn field_names_round_trip() {
        for f in MetadataField::ALL {
            assert_eq!(f, f.as_str().parse::<MetadataField>().unwrap());
            assert_eq!(
                serde_json::json!(f.as_str()),
                serde_json::to_value(f).unwrap()
            );
        }
        assert!("author".parse::<MetadataField>().is_err());
    }

    #[test]
    fn feed_item_wire_shape() {
        let item = FeedItem {
            seq: 3,
            key: "guid-1".into(),
            value: serde_json::json!({"title": "ep 1"}),
            order_index: 0,
        };
        assert_eq!(
            r#"{"seq":3,"key":"guid-1","value":{"title":"ep 1"},"orderIndex":0}"#,
            serde_json::to_string(&item).unwrap(),
        );
    }
}
