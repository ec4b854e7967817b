//! The http blob proxy: `GET /{feed}/{blob}` with single byte-range support.

use crate::*;
use axum::http::{header, HeaderMap, StatusCode};
use axum::{body, extract, response};
use hrss_api::*;

/// A parsed `Range` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=start-` or `bytes=start-last`, `last` inclusive.
    From {
        /// First byte requested.
        start: u64,
        /// Last byte requested, if bounded.
        last: Option<u64>,
    },

    /// `bytes=-n`, the final `n` bytes.
    Suffix(u64),
}

impl RangeRequest {
    /// Parse a `Range` header value. Only a single `bytes` range is
    /// supported.
    pub fn parse(value: &str) -> HrssResult<Self> {
        let spec = value
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| HrssError::protocol("unsupported range unit"))?;
        if spec.contains(',') {
            return Err(HrssError::protocol("multiple ranges are not supported"));
        }
        let (start, last) = spec
            .split_once('-')
            .ok_or_else(|| HrssError::protocol(format!("invalid range {spec}")))?;
        let num = |s: &str| {
            s.trim().parse::<u64>().map_err(|err| {
                HrssError::protocol(format!("invalid range {spec}: {err}"))
            })
        };

        if start.trim().is_empty() {
            return Ok(Self::Suffix(num(last)?));
        }
        let start = num(start)?;
        let last = if last.trim().is_empty() {
            None
        } else {
            Some(num(last)?)
        };
        if matches!(last, Some(last) if last < start) {
            return Err(HrssError::protocol(format!("invalid range {spec}")));
        }
        Ok(Self::From { start, last })
    }

    /// Resolve against a blob of `len` bytes. The end is clamped to the
    /// blob and capped to `max_chunk` bytes. `None` if unsatisfiable.
    pub fn resolve(self, len: u64, max_chunk: u64) -> Option<ByteRange> {
        let range = match self {
            Self::From { start, last } => {
                if start >= len {
                    return None;
                }
                let end = last.map(|l| l.saturating_add(1)).unwrap_or(len);
                ByteRange { start, end }.clamp(len)
            }
            Self::Suffix(n) => {
                if n == 0 || len == 0 {
                    return None;
                }
                ByteRange {
                    start: len.saturating_sub(n),
                    end: len,
                }
            }
        };
        Some(ByteRange {
            start: range.start,
            end: range.end.min(range.start.saturating_add(max_chunk)),
        })
    }
}

struct BlobResponse {
    status: StatusCode,
    content_range: Option<String>,
    content_type: &'static str,
    body: bytes::Bytes,
}

impl BlobResponse {
    fn error(status: StatusCode, message: impl std::fmt::Display) -> Self {
        Self {
            status,
            content_range: None,
            content_type: "application/json",
            body: serde_json::json!({ "error": message.to_string() })
                .to_string()
                .into(),
        }
    }

    fn from_err(err: HrssError) -> Self {
        let status = match &err {
            HrssError::NotFound { .. } => StatusCode::NOT_FOUND,
            HrssError::Protocol { .. } => StatusCode::BAD_REQUEST,
            HrssError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            HrssError::Connection { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::warn!(?err, "blob request failed");
        }
        Self::error(status, err)
    }

    fn respond(self) -> response::Response {
        let mut builder = response::Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, self.content_type)
            .header(header::ACCEPT_RANGES, "bytes");
        if let Some(content_range) = self.content_range {
            builder = builder.header(header::CONTENT_RANGE, content_range);
        }
        builder.body(body::Body::from(self.body)).unwrap_or_else(|err| {
            tracing::error!(?err, "failed to encode response");
            response::IntoResponse::into_response(
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        })
    }
}

pub(crate) async fn handle_blob_get(
    extract::Path((feed, blob)): extract::Path<(String, String)>,
    extract::State(state): extract::State<AppState>,
    headers: HeaderMap,
) -> response::Response {
    let timeout = state.config.rpc_timeout;
    match tokio::time::timeout(timeout, serve_blob(&state, feed, blob, &headers))
        .await
    {
        Ok(Ok(res)) => res,
        Ok(Err(err)) => BlobResponse::from_err(err),
        Err(_) => BlobResponse::error(StatusCode::GATEWAY_TIMEOUT, "internal timeout"),
    }
    .respond()
}

async fn serve_blob(
    state: &AppState,
    feed: String,
    blob: String,
    headers: &HeaderMap,
) -> HrssResult<BlobResponse> {
    let key: DiscoveryKey = feed.parse()?;

    let Some(range) = headers.get(header::RANGE) else {
        let body = state.api.get_reader_blob(key, blob).await?;
        return Ok(BlobResponse {
            status: StatusCode::OK,
            content_range: None,
            content_type: "application/octet-stream",
            body,
        });
    };

    let range = range
        .to_str()
        .map_err(|err| HrssError::protocol(format!("invalid range: {err}")))?;
    let range = RangeRequest::parse(range)?;

    let id = state.api.get_reader_blob_id(key.clone(), blob).await?;
    let len = id.byte_length;
    let Some(range) = range.resolve(len, state.config.max_blob_chunk) else {
        return Ok(BlobResponse {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            content_range: Some(format!("bytes */{len}")),
            content_type: "application/octet-stream",
            body: bytes::Bytes::new(),
        });
    };

    let body = state.api.get_reader_blob_range(key, id, range).await?;
    let last = range.start + (body.len() as u64).max(1) - 1;
    Ok(BlobResponse {
        status: StatusCode::PARTIAL_CONTENT,
        content_range: Some(format!("bytes {}-{last}/{len}", range.start)),
        content_type: "application/octet-stream",
        body,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_ranges() {
        assert_eq!(
            RangeRequest::From {
                start: 0,
                last: Some(99)
            },
            RangeRequest::parse("bytes=0-99").unwrap()
        );
        assert_eq!(
            RangeRequest::From {
                start: 10,
                last: None
            },
            RangeRequest::parse("bytes=10-").unwrap()
        );
        assert_eq!(
            RangeRequest::Suffix(5),
            RangeRequest::parse("bytes=-5").unwrap()
        );

        for bad in [
            "items=0-5",
            "bytes=0-5,10-15",
            "bytes=5",
            "bytes=x-5",
            "bytes=9-3",
            "bytes=-",
        ] {
            let err = RangeRequest::parse(bad).unwrap_err();
            assert!(matches!(err, HrssError::Protocol { .. }), "{bad}");
        }
    }

    #[test]
    fn resolve_clamps_and_caps() {
        let r = RangeRequest::parse("bytes=0-9999999").unwrap();
        assert_eq!(
            Some(ByteRange {
                start: 0,
                end: 500_000
            }),
            r.resolve(500_000, u64::MAX)
        );
        assert_eq!(
            Some(ByteRange {
                start: 0,
                end: 327_680
            }),
            r.resolve(500_000, 327_680)
        );

        let r = RangeRequest::parse("bytes=100-").unwrap();
        assert_eq!(Some(ByteRange { start: 100, end: 120 }), r.resolve(120, 1000));
        assert_eq!(None, r.resolve(100, 1000));

        let r = RangeRequest::Suffix(30);
        assert_eq!(Some(ByteRange { start: 0, end: 20 }), r.resolve(20, 1000));
        assert_eq!(None, r.resolve(0, 1000));
    }
}
