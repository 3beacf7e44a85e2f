//! MCP server session: transport selection and graceful shutdown.
//!
//! A session serves one assembled [`DeliverMcp`] service over exactly one
//! transport. Stdio runs until the peer disconnects or the session is
//! cancelled; streamable HTTP additionally drains in-flight requests on
//! cancel, bounded by the configured shutdown timeout.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use rmcp::serve_server;
use rmcp::transport::io::stdio;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig,
    StreamableHttpService,
    session::local::LocalSessionManager,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::DeliverMcp;
use crate::registry::{AttachError, ServiceRegistry};
use crate::trace_io::{TracedReader, TracedWriter};

/// Server name advertised during initialization.
pub const DEFAULT_SERVER_NAME: &str = "docker-deliver";
/// Server version advertised during initialization.
pub const DEFAULT_SERVER_VERSION: &str = "v1.0.0";
/// Upper bound on graceful shutdown after a cancel.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one MCP server session.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Serve over streamable HTTP on this address; stdio when unset.
    pub http_addr: Option<SocketAddr>,
    pub server_name: String,
    pub server_version: String,
    pub shutdown_timeout: Duration,
    /// Mirror stdio protocol frames to the wire trace target.
    pub log_protocol: bool,
}

impl McpServerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log_protocol: false,
        }
    }

    #[must_use]
    pub const fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    #[must_use]
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_log_protocol(mut self, log_protocol: bool) -> Self {
        self.log_protocol = log_protocol;
        self
    }
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("attaching tools for service {service}")]
    Registration {
        service: String,
        #[source]
        source: AttachError,
    },
    #[error("binding {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("serving HTTP")]
    Http(#[source] io::Error),
    #[error("serving stdio")]
    Stdio(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("graceful shutdown did not finish within {}s", .timeout.as_secs())]
    ShutdownTimeout { timeout: Duration },
}

/// One server session over the registry's tools.
pub struct McpServer {
    config: McpServerConfig,
    registry: ServiceRegistry,
}

impl McpServer {
    #[must_use]
    pub const fn new(config: McpServerConfig, registry: ServiceRegistry) -> Self {
        Self { config, registry }
    }

    /// Assembles the MCP service and attaches every registered provider's
    /// tools, in name order.
    ///
    /// # Errors
    /// Fails with the offending service name when a provider cannot attach.
    pub fn setup_service(&self) -> Result<DeliverMcp, ServeError> {
        let mut service = DeliverMcp::new(
            self.config.server_name.clone(),
            self.config.server_version.clone(),
        );
        for name in self.registry.names() {
            let Some(provider) = self.registry.get(&name) else {
                continue;
            };
            provider
                .attach(&mut service)
                .map_err(|source| ServeError::Registration {
                    service: name.clone(),
                    source,
                })?;
            debug!(service = %name, "tools attached");
        }
        Ok(service)
    }

    /// Serves the session until the peer disconnects or `cancel` fires.
    ///
    /// # Errors
    /// Fails when the service cannot be assembled, the transport fails, or
    /// graceful shutdown exceeds the configured timeout.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServeError> {
        let service = self.setup_service()?;
        info!(
            name = %self.config.server_name,
            version = %self.config.server_version,
            tools = service.tool_names().len(),
            "starting MCP server"
        );
        match self.config.http_addr {
            Some(addr) => self.run_http(service, addr, cancel).await,
            None => self.run_stdio(service, cancel).await,
        }
    }

    async fn run_stdio(
        &self,
        service: DeliverMcp,
        cancel: CancellationToken,
    ) -> Result<(), ServeError> {
        // Biased so the token wins even when the transport is already
        // erroring; the initialize handshake is cancellable too.
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("stdio session cancelled");
            }
            result = self.serve_stdio(service) => {
                result?;
                info!("stdio session ended");
            }
        }
        Ok(())
    }

    /// Completes the initialize handshake and serves until the peer quits.
    async fn serve_stdio(&self, service: DeliverMcp) -> Result<(), ServeError> {
        let running = if self.config.log_protocol {
            let transport = (
                TracedReader::new(tokio::io::stdin()),
                TracedWriter::new(tokio::io::stdout()),
            );
            serve_server(service, transport).await
        } else {
            serve_server(service, stdio()).await
        }
        .map_err(|err| ServeError::Stdio(err.into()))?;

        let _ = running
            .waiting()
            .await
            .map_err(|err| ServeError::Stdio(err.into()))?;
        Ok(())
    }

    async fn run_http(
        &self,
        service: DeliverMcp,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<(), ServeError> {
        let http_service: StreamableHttpService<DeliverMcp, LocalSessionManager> =
            StreamableHttpService::new(
                move || Ok(service.clone()),
                Arc::new(LocalSessionManager::default()),
                StreamableHttpServerConfig {
                    stateful_mode: true,
                    sse_keep_alive: Some(Duration::from_secs(15)),
                    ..Default::default()
                },
            );

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .nest_service("/mcp", http_service);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        info!(%addr, "listening");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let mut server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .into_future(),
        );

        tokio::select! {
            result = &mut server => flatten_serve(result),
            () = cancel.cancelled() => {
                info!("shutting down HTTP server");
                let _ = shutdown_tx.send(());
                match tokio::time::timeout(self.config.shutdown_timeout, &mut server).await {
                    Ok(result) => flatten_serve(result),
                    Err(_) => {
                        server.abort();
                        Err(ServeError::ShutdownTimeout {
                            timeout: self.config.shutdown_timeout,
                        })
                    }
                }
            }
        }
    }
}

fn flatten_serve(result: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServeError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ServeError::Http(source)),
        Err(join) => Err(ServeError::Http(io::Error::other(join))),
    }
}
