//! Turning parsed feeds into stored feed items.

use crate::feed::OrderedFeed;
use crate::keyed_blobs::KeyedBlobs;
use hrss_api::*;

/// Items of `parsed` not yet stored in `feed`, oldest first, so they can
/// be inserted in publication order. A guid repeated within `parsed` is
/// only returned for its oldest occurrence.
pub async fn missing_items(
    feed: &OrderedFeed,
    parsed: &ParsedFeed,
) -> HrssResult<Vec<ParsedItem>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in parsed.items.iter().rev() {
        if !seen.insert(item.guid.as_str()) {
            continue;
        }
        if !feed.has_key(&item.guid).await? {
            out.push(item.clone());
        }
    }
    Ok(out)
}

/// The extension of the file a url points at, if any.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            Some(ext)
        }
        _ => None,
    }
}

/// The blob key of downloaded content: its url-safe base64 sha256 digest,
/// followed by the extension of the url it came from.
pub fn content_key(content: &[u8], url: &str) -> String {
    use base64::prelude::*;
    use sha2::Digest;
    let hash = BASE64_URL_SAFE_NO_PAD.encode(sha2::Sha256::digest(content));
    match url_extension(url) {
        Some(ext) => format!("{hash}.{ext}"),
        None => hash,
    }
}

/// Download the enclosure of `item`, if it has one, store it in `blobs`
/// and point the enclosure url at the blob key. Content that is already
/// stored is not written again.
pub async fn ingest_enclosure(
    blobs: &KeyedBlobs,
    fetcher: &DynBlobFetcher,
    mut item: ParsedItem,
) -> HrssResult<ParsedItem> {
    let Some(enclosure) = item.enclosure.as_mut() else {
        return Ok(item);
    };
    let content = fetcher.fetch(&enclosure.url).await?;
    let key = content_key(&content, &enclosure.url);
    if blobs.maybe_put(&key, content).await?.is_none() {
        tracing::debug!(%key, "enclosure already stored");
    }
    enclosure.url = key;
    Ok(item)
}

/// Store a new item, including its enclosure. Resolves to its order index.
pub async fn ingest_item(
    feed: &OrderedFeed,
    blobs: &KeyedBlobs,
    fetcher: &DynBlobFetcher,
    item: ParsedItem,
) -> HrssResult<u64> {
    let item = ingest_enclosure(blobs, fetcher, item).await?;
    let value = serde_json::to_vec(&item)
        .map_err(|err| HrssError::other_src("encode feed item", err))?;
    feed.put_ordered_item(&item.guid, value.into()).await
}

/// Write the metadata fields of `parsed` that changed. Absent fields are
/// left alone. Resolves to the number of fields written.
pub async fn update_metadata(
    feed: &OrderedFeed,
    parsed: &ParsedFeed,
) -> HrssResult<usize> {
    let meta = parsed.metadata();
    let mut written = 0;
    for field in MetadataField::ALL {
        if let Some(value) = meta.get(field) {
            if feed.maybe_update_metadata(field, value).await? {
                written += 1;
            }
        }
    }
    Ok(written)
}
