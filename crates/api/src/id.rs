//! Types dealing with log and feed identity.

use crate::*;

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

macro_rules! imp_display {
    ($i:ty) => {
        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                display(&self.0 .0, f)
            }
        }

        impl std::fmt::Debug for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                display(&self.0 .0, f)
            }
        }

        impl std::str::FromStr for $i {
            type Err = HrssError;

            fn from_str(s: &str) -> HrssResult<Self> {
                Ok(Self(Id::decode(s)?))
            }
        }
    };
}

/// Number of bytes in a freshly generated log key.
pub const KEY_LEN: usize = 32;

/// Ids encode as url-safe base64 so they can double as
/// directory and url path segments.
fn display(
    b: &bytes::Bytes,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    use base64::prelude::*;
    f.write_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
}

/// Base data identity type meant for newtyping.
/// You probably want [LogKey] or [DiscoveryKey].
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Id(#[serde(with = "crate::serde_bytes_base64")] pub bytes::Bytes);

imp_deref!(Id, bytes::Bytes);
imp_from!(Id, bytes::Bytes, b => Id(b));

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0, f)
    }
}

impl Id {
    /// Decode an id from its url-safe base64 string form.
    pub fn decode(s: &str) -> HrssResult<Self> {
        use base64::prelude::*;
        let raw = BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| HrssError::protocol(format!("invalid id {s}: {e}")))?;
        if raw.is_empty() {
            return Err(HrssError::protocol("invalid id: empty"));
        }
        Ok(Self(bytes::Bytes::from(raw)))
    }
}

/// Identifies a single append-only log.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct LogKey(pub Id);

imp_deref!(LogKey, Id);
imp_from!(LogKey, bytes::Bytes, b => LogKey(Id(b)));
imp_from!(LogKey, Id, b => LogKey(b));
imp_display!(LogKey);

/// Identifies a feed. This is the key of the feed's "keys" log, and is used
/// both as the swarm rendezvous topic and as the on-disk directory name of
/// a reader replica.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct DiscoveryKey(pub Id);

imp_deref!(DiscoveryKey, Id);
imp_from!(DiscoveryKey, bytes::Bytes, b => DiscoveryKey(Id(b)));
imp_from!(DiscoveryKey, Id, b => DiscoveryKey(b));
imp_from!(DiscoveryKey, LogKey, b => DiscoveryKey(b.0));
imp_display!(DiscoveryKey);

impl DiscoveryKey {
    /// The key of the log this discovery key names.
    pub fn log_key(&self) -> LogKey {
        LogKey(self.0.clone())
    }
}
