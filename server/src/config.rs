use shared::transport::PumpConfig;
use shared::{DEFAULT_PORT, MAX_CLIENTS, WS_PATH};
use std::path::PathBuf;

/// PEM files for serving `wss://`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Listener and hub settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`
    pub addr: String,
    /// Only upgrade requests for this path are accepted
    pub path: String,
    pub max_clients: usize,
    pub tls: Option<TlsConfig>,
    pub pump: PumpConfig,
    /// Capacity of the queue from connection tasks to the hub
    pub hub_queue: usize,
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.min(MAX_CLIENTS);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            path: WS_PATH.to_string(),
            max_clients: MAX_CLIENTS,
            tls: None,
            pump: PumpConfig::server(),
            hub_queue: 1024,
        }
    }
}
