//! Per-connection read and write pumps over a WebSocket stream
//!
//! Each connection gets exactly two tasks: a read pump that is the only reader
//! of the socket and a write pump that is the only writer. The rest of the
//! program talks to them through channels:
//! - inbound binary frames are forwarded to the owner's event queue
//! - outbound frames are pushed into a bounded [`Outbound`] queue
//! - a terminal error in either pump emits a single disconnect event
//!
//! Dropping the [`Outbound`] closes the queue; the write pump then sends a
//! close frame and exits.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

/// What happens when a producer outpaces the write pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Report [`SendError::Full`] so the owner can tear the connection down.
    Disconnect,
    /// Discard the frame and keep the connection.
    DropFrame,
}

/// Limits and deadlines applied by the pumps
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Maximum silence from the peer before the connection is considered dead.
    pub read_timeout: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
    /// Largest inbound message accepted.
    pub max_frame_size: usize,
    /// Capacity of the outbound queue.
    pub send_queue: usize,
    pub overflow: OverflowPolicy,
}

impl PumpConfig {
    pub fn server() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(1),
            max_frame_size: 128,
            send_queue: 256,
            overflow: OverflowPolicy::Disconnect,
        }
    }

    pub fn client() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(5),
            max_frame_size: 512,
            send_queue: 256,
            overflow: OverflowPolicy::DropFrame,
        }
    }

    /// Keepalive pings go out at 9/10 of the read deadline.
    pub fn ping_interval(&self) -> Duration {
        self.read_timeout * 9 / 10
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_frame_size);
        config.max_frame_size = Some(self.max_frame_size);
        config
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("inbound frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue is closed")]
    Closed,
    #[error("outbound queue is full")]
    Full,
}

/// Sending half of a connection's outbound queue
#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Vec<u8>>,
    policy: OverflowPolicy,
}

impl Outbound {
    pub fn channel(capacity: usize, policy: OverflowPolicy) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, policy }, rx)
    }

    /// Enqueues a frame for the write pump without blocking.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
            Err(TrySendError::Full(_)) => match self.policy {
                OverflowPolicy::Disconnect => Err(SendError::Full),
                OverflowPolicy::DropFrame => {
                    debug!("Outbound queue full, dropping frame");
                    Ok(())
                }
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Maps pump activity onto the owner's event type
pub trait PeerEvents: Send + Sync + 'static {
    type Event: Send + 'static;

    fn inbound(&self, frame: Vec<u8>) -> Self::Event;

    fn disconnected(&self) -> Self::Event;
}

struct Signal<P: PeerEvents> {
    peer: P,
    events: mpsc::Sender<P::Event>,
    fired: AtomicBool,
}

impl<P: PeerEvents> Signal<P> {
    /// Returns false once the owner stopped listening.
    async fn inbound(&self, frame: Vec<u8>) -> bool {
        self.events.send(self.peer.inbound(frame)).await.is_ok()
    }

    async fn disconnect(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(self.peer.disconnected()).await;
        }
    }
}

/// Join handles of a connection's pumps
#[derive(Debug)]
pub struct PumpHandles {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Splits the stream and starts the read and write pumps for one connection.
pub fn spawn_pumps<S, P>(
    ws: WebSocketStream<S>,
    config: &PumpConfig,
    peer: P,
    events: mpsc::Sender<P::Event>,
    outbound: mpsc::Receiver<Vec<u8>>,
) -> PumpHandles
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    P: PeerEvents,
{
    let (sink, stream) = ws.split();
    let signal = Arc::new(Signal {
        peer,
        events,
        fired: AtomicBool::new(false),
    });

    let reader = tokio::spawn(read_pump(stream, config.clone(), Arc::clone(&signal)));
    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        config.clone(),
        signal,
        reader.abort_handle(),
    ));

    PumpHandles { reader, writer }
}

async fn read_pump<S, P>(
    mut stream: SplitStream<WebSocketStream<S>>,
    config: PumpConfig,
    signal: Arc<Signal<P>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    P: PeerEvents,
{
    let result = loop {
        // Every frame, pongs included, restarts the deadline
        let next = match timeout(config.read_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => break Err(TransportError::ReadTimeout(config.read_timeout)),
        };

        match next {
            Some(Ok(Message::Binary(data))) => {
                if data.len() > config.max_frame_size {
                    break Err(TransportError::FrameTooLarge(data.len()));
                }
                if !signal.inbound(data).await {
                    break Ok(());
                }
            }
            Some(Ok(Message::Text(_))) => debug!("Ignoring text frame"),
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(TransportError::from(e)),
        }
    };

    match result {
        Ok(()) => debug!("Read pump finished"),
        Err(e) => debug!("Read pump error: {}", e),
    }
    signal.disconnect().await;
}

async fn write_pump<S, P>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    config: PumpConfig,
    signal: Arc<Signal<P>>,
    reader: AbortHandle,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    P: PeerEvents,
{
    let ping_interval = config.ping_interval();
    let mut keepalive = time::interval_at(Instant::now() + ping_interval, ping_interval);

    let result = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = send_with_deadline(&mut sink, Message::Binary(frame), config.write_timeout).await {
                        break Err(e);
                    }
                }
                None => {
                    // Owner closed the queue
                    let _ = send_with_deadline(&mut sink, Message::Close(None), config.write_timeout).await;
                    break Ok(());
                }
            },
            _ = keepalive.tick() => {
                debug!("Sending keepalive ping");
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Vec::new()), config.write_timeout).await {
                    break Err(e);
                }
            }
        }
    };

    match result {
        Ok(()) => debug!("Write pump finished"),
        Err(e) => {
            debug!("Write pump error: {}", e);
            signal.disconnect().await;
            reader.abort();
        }
    }
}

async fn send_with_deadline<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    deadline: Duration,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(result) => result.map_err(TransportError::from),
        Err(_) => Err(TransportError::WriteTimeout(deadline)),
    }
}
