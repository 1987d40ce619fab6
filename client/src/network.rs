use crate::runtime::{ClientRuntime, ServerPeer};
use log::info;
use shared::transport::{spawn_pumps, PumpConfig};
use shared::{DEFAULT_PORT, WS_PATH};
use thiserror::Error;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),
}

/// Where and how to reach the server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server
    pub addr: String,
    pub path: String,
    /// Connect with `wss://`
    pub tls: bool,
    pub pump: PumpConfig,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// WebSocket URL of the server endpoint.
    pub fn url(&self) -> Result<String, ClientError> {
        let addr = self.addr.trim();
        if addr.is_empty() || addr.contains("://") || addr.contains('/') || addr.contains(' ') {
            return Err(ClientError::InvalidAddress(self.addr.clone()));
        }
        let scheme = if self.tls { "wss" } else { "ws" };
        Ok(format!("{}://{}{}", scheme, addr, self.path))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            path: WS_PATH.to_string(),
            tls: false,
            pump: PumpConfig::client(),
        }
    }
}

/// Dials the server and starts the pumps. The runtime only reports
/// connected once the server's connect response has been processed.
pub async fn connect(config: &ClientConfig) -> Result<ClientRuntime, ClientError> {
    let url = config.url()?;
    info!("Connecting to {}", url);

    let (ws, _) = connect_async_with_config(url, Some(config.pump.websocket_config()), true).await?;
    let (runtime, events, queue) = ClientRuntime::channel(&config.pump);
    spawn_pumps(ws, &config.pump, ServerPeer, events, queue);

    Ok(runtime)
}
