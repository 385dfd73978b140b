//! Prometheus metrics for the dronelink coordinator.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Frame handling duration buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1];

/// Prometheus metrics for the coordinator.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total WebSocket connections accepted.
    pub connections_total: Counter,
    /// Currently open connections.
    pub connections_active: Gauge,
    /// Identities currently holding a session.
    pub sessions_active: Gauge,
    /// Handshakes by result (accepted, already_connected, auth_failed).
    pub handshakes_total: CounterVec,
    /// Executed commands by name. Unknown names count as "unknown".
    pub commands_total: CounterVec,
    /// Errors by kind.
    pub errors_total: CounterVec,
    /// Frame handling duration by frame kind.
    pub frame_duration: HistogramVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "dronelink_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "dronelink_connections_active",
            "Number of currently open connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Sessions
        let sessions_active = Gauge::with_opts(Opts::new(
            "dronelink_sessions_active",
            "Number of identities holding a session",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let handshakes_total = CounterVec::new(
            Opts::new("dronelink_handshakes_total", "Total handshakes by result"),
            &["result"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        // Commands
        let commands_total = CounterVec::new(
            Opts::new("dronelink_commands_total", "Total commands by name"),
            &["command"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        // Errors
        let errors_total = CounterVec::new(
            Opts::new("dronelink_errors_total", "Total errors by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let frame_duration = HistogramVec::new(
            HistogramOpts::new(
                "dronelink_frame_duration_seconds",
                "Frame handling duration in seconds by frame kind",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["frame"],
        )?;
        registry.register(Box::new(frame_duration.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            sessions_active,
            handshakes_total,
            commands_total,
            errors_total,
            frame_duration,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        "/health" | "/healthz" => text_response(StatusCode::OK, "text/plain", "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics.sessions_active.set(2.0);
        metrics
            .handshakes_total
            .with_label_values(&["accepted"])
            .inc();
        metrics.commands_total.with_label_values(&["takeoff"]).inc();
        metrics.errors_total.with_label_values(&["websocket"]).inc();
        metrics
            .frame_duration
            .with_label_values(&["command"])
            .observe(0.0002);

        let encoded = String::from_utf8(metrics.encode()).unwrap();

        assert!(encoded.contains("dronelink_connections_total"));
        assert!(encoded.contains("dronelink_connections_active"));
        assert!(encoded.contains("dronelink_sessions_active 2"));
        assert!(encoded.contains("dronelink_handshakes_total{result=\"accepted\"} 1"));
        assert!(encoded.contains("dronelink_commands_total{command=\"takeoff\"} 1"));
        assert!(encoded.contains("dronelink_errors_total"));
        assert!(encoded.contains("dronelink_frame_duration_seconds"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.connections_total.inc();

        let encoded = String::from_utf8(b.encode()).unwrap();
        assert!(encoded.contains("dronelink_connections_total 0"));
    }

    #[tokio::test]
    async fn test_metrics_server_serves_and_stops() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Reserve a free port, then hand it to the server
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.connections_total.inc();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_metrics_server(addr, metrics, rx));

        let mut stream = None;
        for _ in 0..50 {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        let mut stream = stream.expect("metrics server did not start");
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("dronelink_connections_total 1"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
