//! gateway http server types.

use crate::*;
use axum::{extract, response, routing, Router};
use hrss_api::*;
use std::sync::Arc;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// Shared by every route handler.
#[derive(Debug, Clone)]
pub(crate) struct AppState {
    pub api: DynAggregatorApi,
    pub clients: Clients,
    pub config: Arc<Config>,
}

/// A running hrss gateway.
///
/// The server runs on its own tokio runtime thread, so it can be
/// constructed and dropped from synchronous code.
pub struct GatewaySrv {
    t_join: Option<std::thread::JoinHandle<()>>,
    addrs: Vec<std::net::SocketAddr>,
    clients: Clients,
    shutdown: Option<tokio::sync::watch::Sender<bool>>,
}

impl Drop for GatewaySrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("Server Shutdown Complete!");

        tracing::debug!("begin server shutdown...");
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for GatewaySrv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySrv")
            .field("addrs", &self.addrs)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl GatewaySrv {
    /// Bind every configured address and serve `api` on them.
    ///
    /// Must not be called from within an async context.
    pub fn new(config: Config, api: DynAggregatorApi) -> std::io::Result<Self> {
        let config = Arc::new(config);
        let clients = Clients::default();
        let state = AppState {
            api,
            clients: clients.clone(),
            config: config.clone(),
        };

        let (s_shutdown, r_shutdown) = tokio::sync::watch::channel(false);
        let (s_ready, r_ready) = tokio::sync::oneshot::channel();
        let t_join = std::thread::spawn(move || {
            tokio_thread(config, state, r_shutdown, s_ready)
        });

        match r_ready.blocking_recv() {
            Ok(Ok(addrs)) => Ok(Self {
                t_join: Some(t_join),
                addrs,
                clients,
                shutdown: Some(s_shutdown),
            }),
            Ok(Err(err)) => {
                let _ = t_join.join();
                Err(err)
            }
            Err(_) => Err(std::io::Error::other("failed to bind server")),
        }
    }

    /// Stop serving and wait for the server thread to exit.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(t_join) = self.t_join.take() {
            t_join
                .join()
                .map_err(|_| std::io::Error::other("server thread panicked"))?;
        }
        Ok(())
    }

    /// The addresses the server is bound to.
    pub fn listen_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    /// The open rpc connections.
    pub fn clients(&self) -> &Clients {
        &self.clients
    }
}

fn tokio_thread(
    config: Arc<Config>,
    state: AppState,
    shutdown: tokio::sync::watch::Receiver<bool>,
    ready: tokio::sync::oneshot::Sender<std::io::Result<Vec<std::net::SocketAddr>>>,
) {
    tracing::trace!(?config, "Starting tokio thread");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_thread_count.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    rt.block_on(async move {
        let app: Router = Router::new()
            .route("/", routing::get(handle_rpc_upgrade))
            .route("/health", routing::get(handle_health_get))
            .route("/{feed}/{blob}", routing::get(crate::blob::handle_blob_get))
            .with_state(state);

        let mut addrs = Vec::with_capacity(config.listen_address_list.len());
        let mut servers: Vec<BoxFut<'static, std::io::Result<()>>> =
            Vec::with_capacity(config.listen_address_list.len());

        for addr in config.listen_address_list.iter().copied() {
            tracing::info!("Binding to: {}", addr);

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!("Bound with local address: {}", addr);
                    addrs.push(addr)
                }
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            }

            let mut shutdown = shutdown.clone();
            let s = axum::serve(listener, app.clone()).with_graceful_shutdown(
                async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                },
            );
            servers.push(Box::pin(std::future::IntoFuture::into_future(s)));
        }

        tracing::info!("Sending ready signal");

        if ready.send(Ok(addrs)).is_err() {
            return;
        }

        for res in futures::future::join_all(servers).await {
            if let Err(err) = res {
                tracing::warn!(?err, "server exited with error");
            }
        }
    });
}

async fn handle_rpc_upgrade(
    ws: extract::ws::WebSocketUpgrade,
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    ws.on_upgrade(move |socket| crate::rpc::serve_socket(socket, state))
}

async fn handle_health_get() -> response::Response {
    response::IntoResponse::into_response((
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        "{}",
    ))
}
