//! App Listener (C7, §4.7): a pluggable network shell around the router
//! kernel with a request counter and graceful drain.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::time::Instant;

use crate::deployment::TlsOptions;
use crate::router::KernelService;

#[derive(Debug)]
pub enum ListenError {
    Bind(String),
    Tls(String),
    Serve(String),
    /// The in-flight counter did not reach zero before the shutdown
    /// deadline (spec §4.7: "never both silently swallowed").
    ShutdownTimeout { remaining: usize },
    Unsupported(String),
}

impl fmt::Display for ListenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenError::Bind(msg) => write!(f, "failed to bind listener: {msg}"),
            ListenError::Tls(msg) => write!(f, "TLS configuration error: {msg}"),
            ListenError::Serve(msg) => write!(f, "listener serve error: {msg}"),
            ListenError::ShutdownTimeout { remaining } => {
                write!(f, "shutdown timed out with {remaining} request(s) still in flight")
            }
            ListenError::Unsupported(msg) => write!(f, "listener not supported in this build: {msg}"),
        }
    }
}

impl std::error::Error for ListenError {}

/// Common interface every listener variant presents to the [`Server`]
/// orchestrator (spec §4.7).
///
/// [`Server`]: crate::server::Server
#[async_trait::async_trait]
pub trait AppListener: Send + Sync {
    /// Start accepting connections; resolves once the listener stops
    /// (either from an accept-loop error or after `shutdown` completes).
    async fn serve(&self) -> Result<(), ListenError>;

    /// Stop accepting new connections and wait up to `timeout` for
    /// in-flight requests to finish.
    async fn shutdown(&self, timeout: Duration) -> Result<(), ListenError>;

    /// Current count of requests being served.
    fn active_requests(&self) -> usize;
}

/// Standard HTTP/1.1 + HTTP/2 listener over TCP, backed by `axum-server`'s
/// own connection-counting `Handle` (spec §4.7 "default / nethttp").
pub struct NetHttpListener {
    addr: SocketAddr,
    tls: Option<TlsOptions>,
    service: KernelService,
    handle: Handle,
}

impl NetHttpListener {
    pub fn new(addr: SocketAddr, tls: Option<TlsOptions>, service: KernelService) -> Self {
        Self { addr, tls, service, handle: Handle::new() }
    }
}

#[async_trait::async_trait]
impl AppListener for NetHttpListener {
    async fn serve(&self) -> Result<(), ListenError> {
        let make_service = tower::make::Shared::new(self.service.clone());
        match &self.tls {
            None => axum_server::bind(self.addr)
                .handle(self.handle.clone())
                .serve(make_service)
                .await
                .map_err(|e| ListenError::Serve(e.to_string())),
            Some(tls) => {
                // `ca_file` (mTLS client-cert enforcement) has no convenience
                // constructor in `axum-server`'s `RustlsConfig`; wiring a
                // custom client-auth verifier needs crates outside the
                // current dependency set. Only server-side cert/key are
                // honored for now (see DESIGN.md).
                if tls.ca_file.is_some() {
                    return Err(ListenError::Unsupported(
                        "mTLS client certificate verification is not wired up".to_string(),
                    ));
                }
                let config = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .map_err(|e| ListenError::Tls(e.to_string()))?;
                axum_server::bind_rustls(self.addr, config)
                    .handle(self.handle.clone())
                    .serve(make_service)
                    .await
                    .map_err(|e| ListenError::Serve(e.to_string()))
            }
        }
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), ListenError> {
        self.handle.graceful_shutdown(Some(timeout));
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = self.handle.connection_count();
            if remaining == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ListenError::ShutdownTimeout { remaining });
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn active_requests(&self) -> usize {
        self.handle.connection_count() as usize
    }
}

/// Higher-throughput adapter over the same handler (spec §4.7 "fasthttp").
/// The retrieval pack carries no dedicated fastpath HTTP engine crate, so
/// this reuses [`NetHttpListener`]'s hyper-backed accept loop; the
/// `listener-type: fasthttp` config value selects this variant without
/// changing handler code, per the spec's contract.
pub struct FastHttpListener(NetHttpListener);

impl FastHttpListener {
    pub fn new(addr: SocketAddr, tls: Option<TlsOptions>, service: KernelService) -> Self {
        Self(NetHttpListener::new(addr, tls, service))
    }
}

#[async_trait::async_trait]
impl AppListener for FastHttpListener {
    async fn serve(&self) -> Result<(), ListenError> {
        self.0.serve().await
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), ListenError> {
        self.0.shutdown(timeout).await
    }

    fn active_requests(&self) -> usize {
        self.0.active_requests()
    }
}

/// HTTP/3 (QUIC) listener (spec §4.7). The pack has no `quinn`/`h3` crate,
/// so this variant is feature-gated and fails fast rather than silently
/// falling back to TCP.
#[cfg(feature = "http3")]
pub struct Http3Listener {
    addr: SocketAddr,
}

#[cfg(feature = "http3")]
impl Http3Listener {
    pub fn new(addr: SocketAddr, _tls: TlsOptions, _service: KernelService) -> Self {
        Self { addr }
    }
}

#[cfg(feature = "http3")]
#[async_trait::async_trait]
impl AppListener for Http3Listener {
    async fn serve(&self) -> Result<(), ListenError> {
        Err(ListenError::Unsupported(format!(
            "http3 listener requested for {} but no QUIC transport is vendored in this build",
            self.addr
        )))
    }

    async fn shutdown(&self, _timeout: Duration) -> Result<(), ListenError> {
        Ok(())
    }

    fn active_requests(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::middleware::MiddlewareRegistry;
    use crate::router::route::RouteMeta;
    use crate::router::RouterKernel;
    use axum::http::Method;
    use axum::routing::get;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_service() -> KernelService {
        let mut kernel = RouterKernel::new();
        kernel
            .route(
                RouteMeta::new(Method::GET, "/slow"),
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "done"
                }),
                false,
            )
            .unwrap();
        kernel.build(&MiddlewareRegistry::new())
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_in_flight_request() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = std::sync::Arc::new(NetHttpListener::new(addr, None, test_service()));

        let serve_listener = listener.clone();
        let serve_task = tokio::spawn(async move {
            let _ = serve_listener.serve().await;
        });

        // Give the acceptor a moment to bind before issuing a request.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let bound_addr = listener.handle.listening().await.expect("listener bound");

        let client = listener_request(bound_addr);
        let request_task = tokio::spawn(client);

        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(listener.active_requests(), 0);

        request_task.await.unwrap();
        serve_task.abort();
    }

    async fn listener_request(addr: SocketAddr) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.ok();
    }

    #[tokio::test]
    async fn fasthttp_adapter_delegates_to_nethttp() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = FastHttpListener::new(addr, None, test_service());
        assert_eq!(listener.active_requests(), 0);
    }
}
