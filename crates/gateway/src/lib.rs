#![deny(missing_docs)]
//! Hrss gateway: the websocket rpc surface and http blob proxy in front
//! of an [AggregatorApi](hrss_api::AggregatorApi).
//!
//! ## Routes
//!
//! - `GET /` upgrades to the rpc websocket. Every text frame is a json
//!   request `{"id", "method", "params"}` answered with `{"id", "result"}`
//!   or `{"id", "error": {"code", "message", "data"?}}`. See
//!   [RpcMethod] for the registered methods.
//! - `GET /health` answers `{}`.
//! - `GET /{feed}/{blob}` serves a feed blob. A single `Range: bytes=..`
//!   request header is honored with a `206`, capped to
//!   [Config::max_blob_chunk] bytes per response. The `Content-Range`
//!   end is the last byte actually sent, inclusive, so a capped first
//!   chunk of a 500000 byte blob reads `bytes 0-327679/500000`. An
//!   unsatisfiable range gets a `416` with `bytes */{len}`.
//! - The `getReaderBlobRange` rpc method applies the same cap.

mod config;
pub use config::*;

mod rpc;
pub use rpc::*;

mod blob;
pub use blob::RangeRequest;

mod server;
pub(crate) use server::AppState;
pub use server::GatewaySrv;

mod client;
pub use client::*;

mod shutdown;
pub use shutdown::*;
