//! Hrss error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// Rpc error code for generic failures.
pub const RPC_ERROR_CODE_DEFAULT: i64 = 1;

/// Rpc error code for a missing reader, key or blob.
pub const RPC_ERROR_CODE_NOT_FOUND: i64 = 2;

/// Rpc error code for a reader that could not reach any peer.
pub const RPC_ERROR_CODE_CONNECTION: i64 = 3;

/// Rpc error code for a call that did not complete in time.
pub const RPC_ERROR_CODE_TIMEOUT: i64 = 4;

/// Rpc error code for a storage or network hiccup.
pub const RPC_ERROR_CODE_TRANSIENT_IO: i64 = 5;

/// Rpc error code for a programmer / configuration error.
pub const RPC_ERROR_CODE_CONFIGURATION: i64 = 6;

/// Rpc error code for an undecodable frame (json-rpc "parse error").
pub const RPC_ERROR_CODE_PARSE: i64 = -32700;

/// Rpc error code for an unknown method (json-rpc "method not found").
pub const RPC_ERROR_CODE_METHOD_NOT_FOUND: i64 = -32601;

/// Rpc error code for bad method parameters (json-rpc "invalid params").
pub const RPC_ERROR_CODE_INVALID_PARAMS: i64 = -32602;

/// The core hrss error type. This type is used in all external
/// hrss apis as well as internally in most modules.
///
/// This type is required to implement `Clone` to ease the use of
/// shared futures, which require the entire `Result` to be `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HrssError {
    /// Generic hrss internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// A reader, index key, or blob does not exist.
    #[error("not found: {ctx}")]
    NotFound {
        /// What was not found.
        ctx: Arc<str>,
    },

    /// Programmer error, such as calling an unregistered cache function.
    #[error("configuration error: {ctx}")]
    Configuration {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// No peer could be found and no local data exists.
    #[error("connection error: {ctx}")]
    Connection {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// An operation exceeded its deadline.
    #[error("timeout: {ctx}")]
    Timeout {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// A storage or network hiccup. Callers may retry these.
    #[error("transient io error: {ctx} (src: {src})")]
    TransientIo {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// A malformed inbound message or parameter list.
    #[error("protocol error: {ctx}")]
    Protocol {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },
}

fn ctx_str<C: std::fmt::Display>(ctx: C) -> Arc<str> {
    ctx.to_string().into_boxed_str().into()
}

impl HrssError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx_str(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx_str(ctx),
            src: DynInnerError::default(),
        }
    }

    /// Construct a "not found" error.
    pub fn not_found<C: std::fmt::Display>(ctx: C) -> Self {
        Self::NotFound { ctx: ctx_str(ctx) }
    }

    /// Construct a "configuration" error.
    pub fn configuration<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Configuration { ctx: ctx_str(ctx) }
    }

    /// Construct a "connection" error.
    pub fn connection<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Connection { ctx: ctx_str(ctx) }
    }

    /// Construct a "timeout" error.
    pub fn timeout<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Timeout { ctx: ctx_str(ctx) }
    }

    /// Construct a "transient io" error with an inner source error.
    pub fn transient_io<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::TransientIo {
            ctx: ctx_str(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct a "protocol" error.
    pub fn protocol<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Protocol { ctx: ctx_str(ctx) }
    }

    /// True if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::Timeout { .. })
    }

    /// The numeric code reported in rpc error frames.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Other { .. } => RPC_ERROR_CODE_DEFAULT,
            Self::NotFound { .. } => RPC_ERROR_CODE_NOT_FOUND,
            Self::Connection { .. } => RPC_ERROR_CODE_CONNECTION,
            Self::Timeout { .. } => RPC_ERROR_CODE_TIMEOUT,
            Self::TransientIo { .. } => RPC_ERROR_CODE_TRANSIENT_IO,
            Self::Configuration { .. } => RPC_ERROR_CODE_CONFIGURATION,
            Self::Protocol { .. } => RPC_ERROR_CODE_INVALID_PARAMS,
        }
    }
}

impl From<std::io::Error> for HrssError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err),
            _ => Self::transient_io("io", err),
        }
    }
}

/// The core hrss result type.
pub type HrssResult<T> = Result<T, HrssError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "bla (src: None)",
            HrssError::other("bla").to_string().as_str(),
        );
        assert_eq!(
            "foo (src: bar)",
            HrssError::other_src("foo", std::io::Error::other("bar"))
                .to_string()
                .as_str(),
        );
        assert_eq!(
            "not found: reader abc",
            HrssError::not_found("reader abc").to_string().as_str(),
        );
        assert_eq!(
            "configuration error: unregistered function f1",
            HrssError::configuration("unregistered function f1")
                .to_string()
                .as_str(),
        );
    }

    #[test]
    fn error_debug() {
        assert_eq!(
            "Other { ctx: \"bla\", src: None }",
            format!("{:?}", HrssError::other("bla")).as_str(),
        );
        assert_eq!(
            "NotFound { ctx: \"bla\" }",
            format!("{:?}", HrssError::not_found("bla")).as_str(),
        );
    }

    #[test]
    fn rpc_codes() {
        assert_eq!(1, HrssError::other("x").rpc_code());
        assert_eq!(2, HrssError::not_found("x").rpc_code());
        assert_eq!(3, HrssError::connection("x").rpc_code());
        assert_eq!(-32602, HrssError::protocol("x").rpc_code());
    }

    #[test]
    fn io_error_mapping() {
        let e: HrssError =
            std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(e.is_not_found());
        let e: HrssError =
            std::io::Error::from(std::io::ErrorKind::Interrupted).into();
        assert!(e.is_transient());
        assert!(!HrssError::other("x").is_transient());
    }

    #[test]
    fn ensure_error_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync>(_t: T) {}
        ensure(HrssError::other("bla"));
    }
}
