//! Server network layer accepting WebSocket connections and handing them to the hub

use crate::client::ConnectionId;
use crate::config::{ServerConfig, TlsConfig};
use crate::hub::{ConnectionPeer, HubEvent};
use log::{debug, error, info, warn};
use shared::transport::{spawn_pumps, Outbound, PumpConfig};
use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid certificate or key: {0}")]
    Certificate(String),
}

/// Settings every connection task needs
struct ConnectionContext {
    path: String,
    pump: PumpConfig,
    tls: Option<TlsAcceptor>,
    hub: mpsc::Sender<HubEvent>,
}

/// Accepts TCP connections and upgrades them to WebSocket sessions
pub struct Server {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    next_id: ConnectionId,
}

impl Server {
    /// Binds the listener. TLS material is loaded up front so a bad
    /// certificate fails startup instead of every handshake.
    pub async fn bind(config: &ServerConfig, hub: mpsc::Sender<HubEvent>) -> Result<Self, ServerError> {
        let tls = config.tls.as_ref().map(load_tls).transpose()?;
        let listener = TcpListener::bind(&config.addr).await?;
        info!(
            "Server listening on {}://{}{}",
            if tls.is_some() { "wss" } else { "ws" },
            listener.local_addr()?,
            config.path
        );

        Ok(Server {
            listener,
            context: Arc::new(ConnectionContext {
                path: config.path.clone(),
                pump: config.pump.clone(),
                tls,
                hub,
            }),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Returns once the hub has gone away.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if self.context.hub.is_closed() {
                info!("Hub stopped, closing listener");
                return Ok(());
            }

            let id = self.next_id;
            self.next_id += 1;
            debug!("Accepted TCP connection {} from {}", id, addr);

            tokio::spawn(handle_connection(stream, addr, id, Arc::clone(&self.context)));
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    context: Arc<ConnectionContext>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    // Handshakes share the pumps' read deadline
    let deadline = context.pump.read_timeout;
    match &context.tls {
        Some(acceptor) => match timeout(deadline, acceptor.accept(stream)).await {
            Ok(Ok(stream)) => upgrade(stream, addr, id, &context).await,
            Ok(Err(e)) => warn!("TLS handshake with {} failed: {}", addr, e),
            Err(_) => warn!("TLS handshake with {} timed out after {:?}", addr, deadline),
        },
        None => upgrade(stream, addr, id, &context).await,
    }
}

/// Runs the WebSocket handshake, registers with the hub and starts the pumps.
async fn upgrade<S>(stream: S, addr: SocketAddr, id: ConnectionId, context: &ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let path = context.path.clone();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let deadline = context.pump.read_timeout;
    let handshake = accept_hdr_async_with_config(
        stream,
        check_path,
        Some(context.pump.websocket_config()),
    );
    let ws = match timeout(deadline, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out after {:?}", addr, deadline);
            return;
        }
    };

    let (outbound, queue) = Outbound::channel(context.pump.send_queue, context.pump.overflow);

    // Registration is queued before any inbound frame can be
    if context
        .hub
        .send(HubEvent::Register { id, addr, outbound })
        .await
        .is_err()
    {
        debug!("Hub stopped, dropping connection from {}", addr);
        return;
    }

    spawn_pumps(
        ws,
        &context.pump,
        ConnectionPeer { id },
        context.hub.clone(),
        queue,
    );
}

/// Builds a TLS acceptor from a PEM certificate chain and private key.
pub fn load_tls(tls: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let mut cert_reader = BufReader::new(File::open(&tls.cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServerError::Certificate(format!(
            "no certificates found in {}",
            tls.cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(&tls.key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        ServerError::Certificate(format!("no private key found in {}", tls.key_path.display()))
    })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
