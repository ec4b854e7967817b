//! A websocket rpc client for the gateway.

use futures::{SinkExt, StreamExt};
use hrss_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;

/// Requests awaiting a response, `None` once the connection is gone.
type Pending = Arc<
    Mutex<Option<HashMap<String, tokio::sync::oneshot::Sender<RpcResponse>>>>,
>;

/// Connection to a gateway rpc endpoint.
///
/// Responses are correlated to requests by id, so requests may be
/// issued concurrently.
#[derive(Debug)]
pub struct RpcClient {
    send: tokio::sync::mpsc::UnboundedSender<String>,
    pending: Pending,
    notify: tokio::sync::broadcast::Sender<RpcNotification>,
    next_id: std::sync::atomic::AtomicU64,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl RpcClient {
    /// Connect to a `ws://` url.
    pub async fn connect(url: &str) -> HrssResult<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| HrssError::connection(format!("{url}: {err}")))?;
        let (mut sink, mut stream) = ws.split();

        let (send, mut recv) = tokio::sync::mpsc::unbounded_channel::<String>();
        let writer = tokio::task::spawn(async move {
            while let Some(frame) = recv.recv().await {
                if sink.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (notify, _) = tokio::sync::broadcast::channel(64);
        let reader = {
            let pending = pending.clone();
            let notify = notify.clone();
            tokio::task::spawn(async move {
                while let Some(Ok(msg)) = stream.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    match RpcServerFrame::decode(text.as_str()) {
                        Ok(RpcServerFrame::Response(res)) => {
                            let waiter = res
                                .id
                                .as_ref()
                                .and_then(|id| {
                                    pending.lock().unwrap().as_mut()?.remove(id)
                                });
                            match waiter {
                                Some(waiter) => {
                                    let _ = waiter.send(res);
                                }
                                None => tracing::debug!(?res, "uncorrelated response"),
                            }
                        }
                        Ok(RpcServerFrame::Notification(n)) => {
                            let _ = notify.send(n);
                        }
                        Err(err) => tracing::debug!(?err, "bad server frame"),
                    }
                }
                // fail everything still waiting, and every later call
                pending.lock().unwrap().take();
            })
        };

        Ok(Self {
            send,
            pending,
            notify,
            next_id: std::sync::atomic::AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    /// Send a request and wait for its raw response.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> HrssResult<RpcResponse> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            .to_string();
        let frame = serde_json::to_string(&RpcRequest {
            id: Some(id.clone()),
            method: method.into(),
            params,
        })
        .map_err(|err| HrssError::other_src("encode request", err))?;

        let (s, r) = tokio::sync::oneshot::channel();
        match self.pending.lock().unwrap().as_mut() {
            Some(pending) => pending.insert(id.clone(), s),
            None => return Err(HrssError::connection("rpc connection closed")),
        };
        if self.send.send(frame).is_err() {
            if let Some(pending) = self.pending.lock().unwrap().as_mut() {
                pending.remove(&id);
            }
            return Err(HrssError::connection("rpc connection closed"));
        }
        r.await
            .map_err(|_| HrssError::connection("rpc connection closed"))
    }

    /// Send a request and wait for its result.
    pub async fn request(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> HrssResult<serde_json::Value> {
        self.call(method, params).await?.into_result()
    }

    /// Receive server notifications sent after this call.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RpcNotification> {
        self.notify.subscribe()
    }
}
