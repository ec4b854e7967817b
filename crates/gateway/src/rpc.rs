//! The rpc method registry and per-connection dispatch.

use crate::Config;
use axum::extract::ws::{Message, WebSocket};
use hrss_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Every method callable over the rpc websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// `addReader(discoveryKey)`
    AddReader,
    /// `updateReader(discoveryKey, opts?)`
    UpdateReader,
    /// `stopReader(discoveryKey)`
    StopReader,
    /// `getReaderFeed(discoveryKey, opts?)`
    GetReaderFeed,
    /// `getReaderMetadata(discoveryKey)`
    GetReaderMetadata,
    /// `getReaderBlob(discoveryKey, blobKey)`, resolving to base64.
    GetReaderBlob,
    /// `getReaderBlobId(discoveryKey, blobKey)`
    GetReaderBlobId,
    /// `getReaderBlobRange(discoveryKey, blobId, {start, end})`,
    /// resolving to base64.
    GetReaderBlobRange,
    /// `getFeedsMetadata()`
    GetFeedsMetadata,
    /// `listReaders()`
    ListReaders,
}

impl RpcMethod {
    /// The full registry.
    pub const ALL: [RpcMethod; 10] = [
        Self::AddReader,
        Self::UpdateReader,
        Self::StopReader,
        Self::GetReaderFeed,
        Self::GetReaderMetadata,
        Self::GetReaderBlob,
        Self::GetReaderBlobId,
        Self::GetReaderBlobRange,
        Self::GetFeedsMetadata,
        Self::ListReaders,
    ];

    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddReader => "addReader",
            Self::UpdateReader => "updateReader",
            Self::StopReader => "stopReader",
            Self::GetReaderFeed => "getReaderFeed",
            Self::GetReaderMetadata => "getReaderMetadata",
            Self::GetReaderBlob => "getReaderBlob",
            Self::GetReaderBlobId => "getReaderBlobId",
            Self::GetReaderBlobRange => "getReaderBlobRange",
            Self::GetFeedsMetadata => "getFeedsMetadata",
            Self::ListReaders => "listReaders",
        }
    }

    /// Look up a method by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Decode `params` and invoke the method on `api`.
    /// Blob ranges are capped to `config.max_blob_chunk` bytes.
    pub async fn call(
        self,
        api: &DynAggregatorApi,
        config: &Config,
        params: Vec<serde_json::Value>,
    ) -> HrssResult<serde_json::Value> {
        use base64::prelude::*;

        let p = Params(params);
        match self {
            Self::AddReader => {
                api.add_reader(p.req(0)?).await?;
                Ok(serde_json::Value::Null)
            }
            Self::UpdateReader => {
                api.update_reader(p.req(0)?, p.opt(1)?).await?;
                Ok(serde_json::Value::Null)
            }
            Self::StopReader => {
                api.stop_reader(p.req(0)?).await?;
                Ok(serde_json::Value::Null)
            }
            Self::GetReaderFeed => {
                to_result(&api.get_reader_feed(p.req(0)?, p.opt(1)?).await?)
            }
            Self::GetReaderMetadata => {
                to_result(&api.get_reader_metadata(p.req(0)?).await?)
            }
            Self::GetReaderBlob => {
                let blob = api.get_reader_blob(p.req(0)?, p.req(1)?).await?;
                Ok(BASE64_STANDARD.encode(&blob).into())
            }
            Self::GetReaderBlobId => {
                to_result(&api.get_reader_blob_id(p.req(0)?, p.req(1)?).await?)
            }
            Self::GetReaderBlobRange => {
                let mut range: ByteRange = p.req(2)?;
                if range.start > range.end {
                    return Err(HrssError::protocol(format!(
                        "byte range start {} is after end {}",
                        range.start, range.end
                    )));
                }
                range.end = range
                    .end
                    .min(range.start.saturating_add(config.max_blob_chunk));
                let part = api
                    .get_reader_blob_range(p.req(0)?, p.req(1)?, range)
                    .await?;
                Ok(BASE64_STANDARD.encode(&part).into())
            }
            Self::GetFeedsMetadata => {
                to_result(&api.get_feeds_metadata().await?)
            }
            Self::ListReaders => to_result(&api.list_readers().await?),
        }
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn to_result<T: serde::Serialize>(t: &T) -> HrssResult<serde_json::Value> {
    serde_json::to_value(t)
        .map_err(|err| HrssError::other_src("encode rpc result", err))
}

/// Positional parameters.
struct Params(Vec<serde_json::Value>);

impl Params {
    fn req<T: serde::de::DeserializeOwned>(&self, index: usize) -> HrssResult<T> {
        let value = self.0.get(index).ok_or_else(|| {
            HrssError::protocol(format!("missing param {index}"))
        })?;
        serde_json::from_value(value.clone()).map_err(|err| {
            HrssError::protocol(format!("invalid param {index}: {err}"))
        })
    }

    fn opt<T: serde::de::DeserializeOwned + Default>(
        &self,
        index: usize,
    ) -> HrssResult<T> {
        match self.0.get(index) {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(_) => self.req(index),
        }
    }
}

/// Decode and answer one inbound text frame.
/// Resolves to `None` for notifications, which get no response.
pub async fn handle_frame(
    api: &DynAggregatorApi,
    config: &Config,
    text: &str,
) -> Option<RpcResponse> {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(?err, "undecodable rpc frame");
            return Some(RpcResponse::err(None, RpcErrorObject::parse_error(err)));
        }
    };
    let id = raw.get("id").and_then(|id| id.as_str()).map(String::from);

    let req: RpcRequest = match serde_json::from_value(raw.clone()) {
        Ok(req) => req,
        Err(err) => {
            tracing::debug!(?err, "invalid rpc request");
            return Some(RpcResponse::err(
                id,
                RpcErrorObject::parse_error(format!("invalid request: {err}")),
            ));
        }
    };

    let Some(method) = RpcMethod::parse(&req.method) else {
        tracing::warn!(method = %req.method, "unrecognized rpc method");
        return req
            .id
            .map(|id| RpcResponse::err(Some(id), RpcErrorObject::method_not_found(raw)));
    };

    let timeout = config.rpc_timeout;
    let start = std::time::Instant::now();
    let res = match tokio::time::timeout(
        timeout,
        method.call(api, config, req.params),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => Err(HrssError::timeout(format!(
            "{method} did not complete within {timeout:?}"
        ))),
    };
    tracing::debug!(%method, elapsed = ?start.elapsed(), "rpc call");

    let outcome = match res {
        Ok(result) => RpcResponse::ok(req.id.clone(), result),
        Err(err) => {
            tracing::warn!(%method, ?err, "rpc call failed");
            RpcResponse::err(req.id.clone(), RpcErrorObject::from(&err))
        }
    };
    req.id.map(|_| outcome)
}

type FrameSend = tokio::sync::mpsc::UnboundedSender<String>;

#[derive(Debug, Default)]
struct ClientsInner {
    next_id: u64,
    map: HashMap<u64, FrameSend>,
}

/// The set of open rpc connections.
#[derive(Debug, Default, Clone)]
pub struct Clients(Arc<Mutex<ClientsInner>>);

impl Clients {
    fn insert(&self, send: FrameSend) -> u64 {
        let mut lock = self.0.lock().unwrap();
        lock.next_id += 1;
        let id = lock.next_id;
        lock.map.insert(id, send);
        id
    }

    fn remove(&self, id: u64) {
        self.0.lock().unwrap().map.remove(&id);
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().map.len()
    }

    /// True if no connection is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send a notification to every open connection.
    /// Resolves to the number of connections reached.
    pub fn notify_all(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> HrssResult<usize> {
        let frame = serde_json::to_string(&RpcNotification {
            method: method.into(),
            params,
        })
        .map_err(|err| HrssError::other_src("encode notification", err))?;

        let mut lock = self.0.lock().unwrap();
        lock.map.retain(|_, send| send.send(frame.clone()).is_ok());
        Ok(lock.map.len())
    }
}

/// Serve one upgraded websocket until it closes.
pub(crate) async fn serve_socket(socket: WebSocket, state: crate::AppState) {
    use futures::{SinkExt, StreamExt};

    let (mut sink, mut stream) = socket.split();
    let (send, mut recv) = tokio::sync::mpsc::unbounded_channel::<String>();
    let client_id = state.clients.insert(send.clone());
    tracing::debug!(client_id, "rpc connection open");

    tokio::task::spawn(async move {
        while let Some(frame) = recv.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => {
                String::from_utf8_lossy(&data).into_owned()
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(client_id, ?err, "rpc connection error");
                break;
            }
        };

        let api = state.api.clone();
        let send = send.clone();
        let config = state.config.clone();
        tokio::task::spawn(async move {
            let Some(res) = handle_frame(&api, &config, &text).await else {
                return;
            };
            match serde_json::to_string(&res) {
                Ok(frame) => {
                    let _ = send.send(frame);
                }
                Err(err) => tracing::error!(?err, "encode rpc response"),
            }
        });
    }

    state.clients.remove(client_id);
    tracing::debug!(client_id, "rpc connection closed");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::DEFAULT_MAX_BLOB_CHUNK;
    use std::time::Duration;

    #[derive(Debug)]
    struct Slow;

    impl AggregatorApi for Slow {
        fn init(&self) -> BoxFut<'_, HrssResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> BoxFut<'_, HrssResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn add_reader(&self, _key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        }

        fn update_reader(
            &self,
            _key: DiscoveryKey,
            opts: UpdateReaderOpts,
        ) -> BoxFut<'_, HrssResult<()>> {
            Box::pin(async move {
                if opts.wait {
                    Ok(())
                } else {
                    Err(HrssError::transient_io("flaky", std::io::Error::other("x")))
                }
            })
        }

        fn stop_reader(&self, key: DiscoveryKey) -> BoxFut<'_, HrssResult<()>> {
            Box::pin(async move { Err(HrssError::not_found(format!("reader {key}"))) })
        }

        fn get_reader_feed(
            &self,
            _key: DiscoveryKey,
            opts: FeedOpts,
        ) -> BoxFut<'_, HrssResult<Vec<FeedItem>>> {
            Box::pin(async move {
                Ok((0..opts.limit.unwrap_or(2))
                    .map(|i| FeedItem {
                        seq: i as u64,
                        key: format!("k{i}"),
                        value: serde_json::json!({}),
                        order_index: i as u64,
                    })
                    .collect())
            })
        }

        fn get_reader_metadata(
            &self,
            _key: DiscoveryKey,
        ) -> BoxFut<'_, HrssResult<FeedMetadata>> {
            Box::pin(async { Ok(FeedMetadata::default()) })
        }

        fn get_reader_blob(
            &self,
            _key: DiscoveryKey,
            _blob_key: String,
        ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
            Box::pin(async { Ok(bytes::Bytes::from_static(b"hello")) })
        }

        fn get_reader_blob_id(
            &self,
            _key: DiscoveryKey,
            blob_key: String,
        ) -> BoxFut<'_, HrssResult<BlobId>> {
            Box::pin(async move { Err(HrssError::not_found(blob_key)) })
        }

        fn get_reader_blob_range(
            &self,
            _key: DiscoveryKey,
            blob_id: BlobId,
            range: ByteRange,
        ) -> BoxFut<'_, HrssResult<bytes::Bytes>> {
            // echo what reached the api
            Box::pin(async move {
                if blob_id.byte_length > 1 << 40 {
                    return Err(HrssError::not_found(format!("{blob_id:?}")));
                }
                Ok(format!("{}-{}", range.start, range.end).into())
            })
        }

        fn get_feeds_metadata(
            &self,
        ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, FeedMetadata)>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn list_readers(
            &self,
        ) -> BoxFut<'_, HrssResult<Vec<(DiscoveryKey, ReaderState)>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    const KEY: &str = "AQEBAQ";
    const TIMEOUT: Duration = Duration::from_millis(200);

    fn config() -> Config {
        Config {
            rpc_timeout: TIMEOUT,
            ..Config::testing()
        }
    }

    async fn frame(text: &str) -> serde_json::Value {
        let api: DynAggregatorApi = Arc::new(Slow);
        let res = handle_frame(&api, &config(), text).await.unwrap();
        serde_json::to_value(&res).unwrap()
    }

    #[test]
    fn registry_names_round_trip() {
        for method in RpcMethod::ALL {
            assert_eq!(Some(method), RpcMethod::parse(method.as_str()));
        }
        assert_eq!(None, RpcMethod::parse("AddReader"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn positional_params() {
        let v = frame(&format!(
            r#"{{"id":"1","method":"getReaderFeed","params":["{KEY}",{{"limit":1}}]}}"#
        ))
        .await;
        assert_eq!("1", v["id"]);
        assert_eq!(1, v["result"].as_array().unwrap().len());

        // optional params default
        let v = frame(&format!(
            r#"{{"id":"2","method":"getReaderFeed","params":["{KEY}"]}}"#
        ))
        .await;
        assert_eq!(2, v["result"].as_array().unwrap().len());

        let v = frame(&format!(
            r#"{{"id":"3","method":"getReaderBlob","params":["{KEY}","a.mp3"]}}"#
        ))
        .await;
        assert_eq!("aGVsbG8=", v["result"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_params_are_protocol_errors() {
        let v = frame(r#"{"id":"1","method":"addReader","params":[]}"#).await;
        assert_eq!(-32602, v["error"]["code"]);

        let v = frame(r#"{"id":"2","method":"addReader","params":[42]}"#).await;
        assert_eq!(-32602, v["error"]["code"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_become_error_frames() {
        let v = frame(&format!(
            r#"{{"id":"1","method":"stopReader","params":["{KEY}"]}}"#
        ))
        .await;
        assert_eq!("1", v["id"]);
        assert_eq!(2, v["error"]["code"]);
        assert!(v["error"]["message"].as_str().unwrap().contains("not found"));

        let v = frame(&format!(
            r#"{{"id":"2","method":"updateReader","params":["{KEY}"]}}"#
        ))
        .await;
        assert_eq!(5, v["error"]["code"]);

        let v = frame(&format!(
            r#"{{"id":"3","method":"updateReader","params":["{KEY}",{{"wait":true}}]}}"#
        ))
        .await;
        assert_eq!(serde_json::Value::Null, v["result"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blob_ranges_are_checked_and_capped() {
        use base64::prelude::*;

        let id = r#"{"blockOffset":0,"blockLength":1,"byteLength":10}"#;
        let decode = |v: &serde_json::Value| {
            String::from_utf8(
                BASE64_STANDARD.decode(v["result"].as_str().unwrap()).unwrap(),
            )
            .unwrap()
        };

        let v = frame(&format!(
            r#"{{"id":"1","method":"getReaderBlobRange","params":["{KEY}",{id},{{"start":20,"end":10}}]}}"#
        ))
        .await;
        assert_eq!(-32602, v["error"]["code"]);

        let v = frame(&format!(
            r#"{{"id":"2","method":"getReaderBlobRange","params":["{KEY}",{id},{{"start":5,"end":18446744073709551615}}]}}"#
        ))
        .await;
        assert_eq!(format!("5-{}", 5 + DEFAULT_MAX_BLOB_CHUNK), decode(&v));

        let v = frame(&format!(
            r#"{{"id":"3","method":"getReaderBlobRange","params":["{KEY}",{id},{{"start":1,"end":3}}]}}"#
        ))
        .await;
        assert_eq!("1-3", decode(&v));

        // a forged id is answered with an error frame
        let v = frame(&format!(
            r#"{{"id":"4","method":"getReaderBlobRange","params":["{KEY}",{{"blockOffset":0,"blockLength":70368744177665,"byteLength":4611686018427387904}},{{"start":0,"end":4611686018427387904}}]}}"#
        ))
        .await;
        assert_eq!("4", v["id"]);
        assert_eq!(2, v["error"]["code"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_calls_time_out() {
        let v = frame(&format!(
            r#"{{"id":"t","method":"addReader","params":["{KEY}"]}}"#
        ))
        .await;
        assert_eq!("t", v["id"]);
        assert_eq!(4, v["error"]["code"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_frames() {
        let v = frame("{nope").await;
        assert_eq!(serde_json::Value::Null, v["id"]);
        assert_eq!(-32700, v["error"]["code"]);

        let v = frame(r#"{"id":"m","params":[]}"#).await;
        assert_eq!("m", v["id"]);
        assert_eq!(-32700, v["error"]["code"]);

        let v = frame(r#"{"id":"x","method":"doesNotExist","params":[]}"#).await;
        assert_eq!(-32601, v["error"]["code"]);
        assert_eq!("Unrecognized method", v["error"]["message"]);
        assert_eq!("doesNotExist", v["error"]["data"]["request"]["method"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notifications_get_no_response() {
        let api: DynAggregatorApi = Arc::new(Slow);
        assert!(handle_frame(&api, &config(), r#"{"method":"listReaders"}"#)
            .await
            .is_none());
        assert!(handle_frame(&api, &config(), r#"{"method":"doesNotExist"}"#)
            .await
            .is_none());
    }

    #[test]
    fn notify_all_drops_closed_connections() {
        let clients = Clients::default();
        let (a, mut a_recv) = tokio::sync::mpsc::unbounded_channel();
        let (b, b_recv) = tokio::sync::mpsc::unbounded_channel();
        clients.insert(a);
        clients.insert(b);
        drop(b_recv);

        assert_eq!(1, clients.notify_all("feedUpdated", vec![KEY.into()]).unwrap());
        assert_eq!(1, clients.len());
        assert_eq!(
            r#"{"method":"feedUpdated","params":["AQEBAQ"]}"#,
            a_recv.try_recv().unwrap()
        );
    }
}
