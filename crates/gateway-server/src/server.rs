//! HTTP listener.

use crate::routes::create_router;
use crate::state::AppState;
use gateway_config::ServerSection;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port; 0 picks a free port
    pub port: u16,
    /// Upper bound on any request
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(360),
        }
    }
}

impl From<&ServerSection> for ServerConfig {
    fn from(section: &ServerSection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            request_timeout: section.request_timeout,
        }
    }
}

/// Bound HTTP server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Bind the listener
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if the address is unavailable
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, config })
    }

    /// Address actually bound
    ///
    /// # Errors
    /// Returns the OS error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the state's shutdown token fires, then stop accepting and
    /// let open connections finish
    ///
    /// # Errors
    /// Returns [`ServerError::Serve`] if the accept loop fails
    pub async fn serve(self, state: AppState) -> Result<(), ServerError> {
        let shutdown = state.shutdown.token();
        let router = create_router(state, self.config.request_timeout);

        info!(
            addr = %self.local_addr()?,
            request_timeout_ms = self.config.request_timeout.as_millis() as u64,
            "HTTP server listening"
        );
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        info!("HTTP server stopped");
        Ok(())
    }
}
