#![deny(missing_docs)]
//! Test utilities for hrss crates.

use hrss_api::*;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// A parsed feed titled `title` with `n` items, newest first as feeds
/// list them. Item `i` has the guid `guid-{i}` and the title
/// `{title} episode {i}`.
pub fn sample_feed(title: &str, n: usize) -> ParsedFeed {
    ParsedFeed {
        title: Some(serde_json::json!(title)),
        description: Some(serde_json::json!(format!("All about {title}"))),
        pub_date: None,
        last_build_date: None,
        items: (0..n).rev().map(|i| sample_item(title, i)).collect(),
    }
}

/// Item `i` of [sample_feed].
pub fn sample_item(title: &str, i: usize) -> ParsedItem {
    let mut fields = serde_json::Map::new();
    fields.insert(
        "title".into(),
        serde_json::json!(format!("{title} episode {i}")),
    );
    ParsedItem {
        guid: format!("guid-{i}"),
        enclosure: None,
        fields,
    }
}
