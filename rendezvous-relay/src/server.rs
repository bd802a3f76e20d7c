//! WebSocket transport adapter and server lifecycle.
//!
//! Each upgraded socket is attached to the registry, told its connection id,
//! and then served by two tasks: a writer draining the connection's outbox
//! into the socket, and a reader decoding frames in arrival order and handing
//! them to the [`RoomRouter`]. When either task ends the other is aborted and
//! the connection is detached, which notifies its former room peers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::codec::{self, CodecError};
use rendezvous_proto::event::{ClientEvent, ServerEvent};
use rendezvous_proto::id::ConnectionId;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::{ConnectionRegistry, OUTBOX_CAPACITY, Outbound};
use crate::router::RoomRouter;

/// How long [`RunningRelay::stop`] waits for the server task to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors raised while starting or running the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The TCP listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound address could not be read back from the listener.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    /// `axum::serve` returned an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The server task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Body of `GET /stats`.
#[derive(Debug, Serialize)]
struct Stats {
    connections: usize,
    rooms: usize,
}

/// A connection registry and room router pair, not yet listening.
pub struct RelayServer {
    router: Arc<RoomRouter>,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    /// Creates a server with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            router: Arc::new(RoomRouter::default()),
        }
    }

    /// The router shared by every connection of this server.
    #[must_use]
    pub const fn router(&self) -> &Arc<RoomRouter> {
        &self.router
    }

    /// Binds `addr` and starts serving in a background task.
    ///
    /// Pass port `0` to let the OS pick a free port; the chosen address is
    /// available from [`RunningRelay::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the TCP listener cannot bind to
    /// `addr`.
    pub async fn start(self, addr: &str) -> Result<RunningRelay, ServerError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let app = app(Arc::clone(&self.router));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(RunningRelay {
            local_addr,
            router: self.router,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }
}

/// A relay server that is accepting connections.
pub struct RunningRelay {
    local_addr: SocketAddr,
    router: Arc<RoomRouter>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningRelay {
    /// The address the server is listening on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The router shared by every connection of this server.
    #[must_use]
    pub const fn router(&self) -> &Arc<RoomRouter> {
        &self.router
    }

    /// The registry holding this server's connections and rooms.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        self.router.registry()
    }

    /// Runs until `signal` completes, then stops the server.
    ///
    /// Returns early if the server task ends on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if serving failed or the task panicked.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<(), ServerError> {
        let signal = std::pin::pin!(signal);
        let finished = tokio::select! {
            result = &mut self.handle => Some(result),
            () = signal => None,
        };
        match finished {
            Some(result) => flatten(result),
            None => self.stop().await,
        }
    }

    /// Stops accepting connections, closes every client socket and waits for
    /// the server task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if serving failed or the task panicked.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.router.registry().close_all();
        if let Ok(result) = tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle).await {
            flatten(result)
        } else {
            tracing::warn!("server did not stop within grace period, aborting");
            self.handle.abort();
            Ok(())
        }
    }
}

fn flatten(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    result?.map_err(ServerError::Serve)
}

/// Builds the axum application: the WebSocket endpoint plus health and stats.
///
/// Cross-origin requests are allowed from any origin for `GET` and `POST`.
pub fn app(router: Arc<RoomRouter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(router): State<Arc<RoomRouter>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, router))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn stats(State(router): State<Arc<RoomRouter>>) -> Json<Stats> {
    let registry = router.registry();
    Json(Stats {
        connections: registry.connection_count(),
        rooms: registry.room_count(),
    })
}

/// Serves one upgraded WebSocket connection until it closes.
pub async fn handle_socket(socket: WebSocket, router: Arc<RoomRouter>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOX_CAPACITY);
    let conn_id = router.attach(tx.clone());

    // Nobody else knows this id yet, so `connected` is always the first frame.
    let _ = tx.try_send(Outbound::Event(ServerEvent::Connected { id: conn_id }));
    drop(tx);

    let mut write_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let event = match outbound {
                Outbound::Event(event) => event,
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };
            let text = match codec::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_router = Arc::clone(&router);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&reader_router, conn_id, codec::decode(text.as_str()));
                }
                Message::Binary(data) => {
                    handle_frame(&reader_router, conn_id, codec::decode_bytes(&data));
                }
                Message::Close(_) => {
                    tracing::debug!(conn_id = %conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the transport.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    router.handle_disconnect(conn_id);
}

fn handle_frame(
    router: &RoomRouter,
    conn_id: ConnectionId,
    decoded: Result<ClientEvent, CodecError>,
) {
    match decoded {
        Ok(event) => {
            tracing::trace!(conn_id = %conn_id, event = event.name(), "inbound event");
            router.dispatch(conn_id, event);
        }
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "dropping malformed frame");
        }
    }
}
