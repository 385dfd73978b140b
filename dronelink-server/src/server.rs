//! WebSocket server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, CoordinatorContext, Reply};
use crate::metrics::Metrics;
use crate::session::ConnectionHandle;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], dronelink_protocol::DEFAULT_PORT)),
            max_connections: 0,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the connection limit (0 = unlimited).
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// WebSocket coordinator server.
pub struct Server {
    config: ServerConfig,
    ctx: Arc<CoordinatorContext>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server around an existing coordinator context.
    pub fn new(config: ServerConfig, ctx: Arc<CoordinatorContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            ctx,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Creates a server from loaded configuration.
    pub fn from_config(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<Self, ServerError> {
        let mut ctx = CoordinatorContext::from_config(config)?;
        let mut server_config = ServerConfig::new(config.network.bind_addr)
            .with_max_connections(config.network.max_connections);
        if let Some(metrics) = metrics {
            ctx = ctx.with_metrics(metrics.clone());
            server_config = server_config.with_metrics(metrics);
        }
        Ok(Self::new(server_config, Arc::new(ctx)))
    }

    /// Returns the shared coordinator context.
    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.ctx
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on ws://{}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.config.max_connections > 0
                                && self.stats.connections_active.load(Ordering::Relaxed)
                                    >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            // Update metrics if enabled
                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let ctx = self.ctx.clone();
                            let stats = self.stats.clone();
                            let metrics = self.config.metrics.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    ctx,
                                    stats.clone(),
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    if e.is_disconnect() || matches!(e, ServerError::ShuttingDown) {
                                        tracing::debug!("Connection {} ended: {}", addr, e);
                                    } else {
                                        tracing::warn!("Connection {} error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        if let Some(ref metrics) = metrics {
                                            metrics.errors_total.with_label_values(&[e.kind()]).inc();
                                        }
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                // Update metrics if enabled
                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single connection from WebSocket upgrade to close.
    ///
    /// The handler is dropped on every return path, which releases the
    /// connection's identity.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: Arc<CoordinatorContext>,
        stats: Arc<ServerStats>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        tracing::info!("Client connected: {}", addr);

        let (mut sink, mut source) = ws.split();
        let connection = ConnectionHandle::new(addr);
        let mut handler = ConnectionHandler::new(ctx, connection);

        loop {
            let expiry = handler.time_to_expiry();

            tokio::select! {
                biased;

                // Handle shutdown signal
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    handler.close();
                    let _ = sink.send(Message::Close(None)).await;
                    return Err(ServerError::ShuttingDown);
                }

                // Credential lapsed
                _ = expiry_timer(expiry) => {
                    let reply = handler.expire();
                    if Self::write_reply(&mut sink, reply).await? {
                        break;
                    }
                }

                // Handle incoming frames from the agent
                message = source.next() => {
                    let reply = match message {
                        None => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            handler.close();
                            return Err(e.into());
                        }
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!("[{}] Received: {}", addr, text.as_str());
                            stats.frames_total.fetch_add(1, Ordering::Relaxed);
                            handler.handle_text(text.as_str())
                        }
                        Some(Ok(Message::Binary(data))) => {
                            tracing::debug!("[{}] Received {} binary bytes", addr, data.len());
                            stats.frames_total.fetch_add(1, Ordering::Relaxed);
                            handler.handle_binary()
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("[{}] Close frame received", addr);
                            break;
                        }
                        // Ping/pong are answered by the transport
                        Some(Ok(_)) => continue,
                    };

                    if Self::write_reply(&mut sink, reply).await? {
                        break;
                    }
                }
            }
        }

        handler.close();
        let _ = sink.close().await;
        Ok(())
    }

    /// Writes reply frames. Returns whether the connection should close.
    async fn write_reply(sink: &mut WsSink, reply: Reply) -> Result<bool, ServerError> {
        for frame in reply.frames {
            sink.send(Message::text(frame.to_string())).await?;
        }
        Ok(reply.close)
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Resolves when the credential lapses; never resolves without one.
async fn expiry_timer(remaining: Option<Duration>) {
    match remaining {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}
