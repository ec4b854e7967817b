#![deny(missing_docs)]
//! Hrss API contains the module traits and the basic types required
//! to define the api of those traits.
//!
//! If you want working implementations, please see the hrss_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Boxed stream type.
pub type BoxStream<'a, T> = futures::stream::BoxStream<'a, T>;

pub(crate) mod serde_bytes_base64 {
    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::prelude::*;
        serializer.serialize_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
    }

    pub fn deserialize<'de, D, T: From<bytes::Bytes>>(
        deserializer: D,
    ) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::prelude::*;
        let s: std::borrow::Cow<'de, str> =
            serde::Deserialize::deserialize(deserializer)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map(|v| bytes::Bytes::copy_from_slice(&v).into())
            .map_err(serde::de::Error::custom)
    }
}

pub mod builder;
pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::{DiscoveryKey, LogKey};

pub mod append_log;
pub use append_log::*;

pub mod swarm;
pub use swarm::*;

pub mod feed;
pub use feed::*;

pub mod blob;
pub use blob::*;

pub mod source;
pub use source::*;

pub mod aggregator;
pub use aggregator::*;

pub mod protocol;
pub use protocol::*;
