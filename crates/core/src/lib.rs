#![deny(missing_docs)]
//! Hrss peer-replicated rss aggregation core.
//!
//! Feeds are written by a [writer::Writer] into append logs, replicated
//! by the swarm, and served by [reader::Reader] peers owned by an
//! [aggregator::Aggregator].

use hrss_api::{builder::Builder, config::Config, *};

/// Construct a production-ready default builder.
///
/// - `log_store` - The default log store is
///   [factories::FileLogStoreFactory].
/// - `swarm` - The default swarm is [factories::MemSwarmFactory].
pub fn default_builder() -> Builder {
    Builder {
        config: Config::default(),
        log_store: factories::FileLogStoreFactory::create(),
        swarm: factories::MemSwarmFactory::create(),
    }
}

/// Construct a default builder for use in tests.
///
/// - `log_store` - The default log store is
///   [factories::MemLogStoreFactory].
/// - `swarm` - The default swarm is [factories::MemSwarmFactory].
pub fn default_test_builder() -> Builder {
    Builder {
        config: Config::default(),
        log_store: factories::MemLogStoreFactory::create(),
        swarm: factories::MemSwarmFactory::create(),
    }
}

#[cfg(test)]
pub(crate) async fn test_log() -> DynAppendLog {
    let builder = std::sync::Arc::new(default_test_builder());
    let store = builder
        .log_store
        .create(builder.clone(), std::path::PathBuf::new())
        .await
        .unwrap();
    store.open_named("test").await.unwrap()
}

pub mod factories;

pub mod tree;

pub mod feed;

pub mod blobs;

pub mod keyed_blobs;

pub mod cache;

pub mod retry;

pub mod peer;

pub mod items;

pub mod writer;

pub mod reader;

pub mod aggregator;

pub mod cached;
