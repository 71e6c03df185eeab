//! Pluggable transport adapters.
//!
//! Every transport implements the [`Adapter`] capability set:
//! listen/stop for the inbound side, send/create-client/is-connected for
//! the outbound side. Adapters deframe and validate inbound payloads into
//! request envelopes before handing them to the connection manager's
//! inbound channel; anything malformed is logged and dropped at the edge.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use plexus_core::{EnvelopeError, RequestEnvelope};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::warn;

use crate::circles::Service;

pub mod ipc;
pub mod tcp;
pub mod udp;

pub use ipc::IpcAdapter;
pub use tcp::TcpAdapter;
pub use udp::UdpAdapter;

/// Capacity of each client handle's outbound channel.
pub(crate) const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The listener could not bind its address or path.
    #[error("failed to bind {kind} listener: {source}")]
    Bind {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// An established socket operation failed.
    #[error("{kind} i/o failure: {source}")]
    Io {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// The envelope could not be encoded or decoded.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// The client handle's connection has gone away.
    #[error("connection closed")]
    Closed,
    /// The encoded envelope does not fit the transport's frame limit.
    #[error("frame of {size} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// An inbound envelope tagged with the transport it arrived on.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub kind: &'static str,
    pub envelope: RequestEnvelope,
}

/// Reusable outbound connection handle.
///
/// Wraps the sender end of a bounded channel whose receiver is drained by a
/// per-connection write loop owning the actual socket. Liveness is the
/// channel still having its receiver: once the write loop exits, the handle
/// reports disconnected.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    kind: &'static str,
    peer: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ClientHandle {
    pub(crate) fn new(kind: &'static str, peer: String, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { kind, peer, tx }
    }

    /// Transport kind this handle belongs to.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Peer description (address, path) for logging.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Enqueues one encoded frame for the write loop.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Closed`] once the write loop has exited.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), AdapterError> {
        self.tx.send(frame).await.map_err(|_| AdapterError::Closed)
    }

    /// Whether the write loop is still running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Polymorphic transport capability.
///
/// All operations are asynchronous and complete exactly once; none support
/// mid-flight cancellation.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Transport kind key used in the adapter mapping (e.g. `"tcp"`).
    fn kind(&self) -> &'static str;

    /// Binds the transport and starts accepting inbound traffic.
    ///
    /// Resolves once bound (or failed to bind). Calling it again while
    /// already listening is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Bind`] when the address or path cannot be
    /// bound.
    async fn listen(&self) -> Result<(), AdapterError>;

    /// Releases sockets and background tasks.
    ///
    /// Resolves once fully stopped; safe to call even if `listen` never
    /// ran or failed.
    async fn stop(&self);

    /// Transmits `envelope` to the peer described by `service`.
    ///
    /// Reuses `client` when given; otherwise opens a one-shot connection.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] describing the encode or transmit
    /// failure.
    async fn send(
        &self,
        service: &Service,
        envelope: &RequestEnvelope,
        client: Option<&ClientHandle>,
    ) -> Result<(), AdapterError>;

    /// Establishes a reusable outbound handle for `service`.
    ///
    /// Returns `None` when the handle cannot be constructed.
    async fn create_client(&self, service: &Service) -> Option<ClientHandle>;

    /// Liveness check for a previously created handle.
    fn is_connected(&self, client: &ClientHandle) -> bool {
        client.is_connected()
    }
}

/// Decodes and validates one inbound frame.
pub(crate) fn decode_frame(bytes: &[u8]) -> Result<RequestEnvelope, AdapterError> {
    let envelope = RequestEnvelope::decode(bytes)?;
    envelope.validate()?;
    Ok(envelope)
}

/// Reads length-delimited frames from a stream socket until the peer
/// disconnects or shutdown is signalled, dispatching each well-formed
/// envelope inbound. Malformed frames are logged and dropped; a framing
/// error ends the connection.
pub(crate) async fn read_stream_frames<S>(
    kind: &'static str,
    io: S,
    inbound: mpsc::Sender<InboundRequest>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + Unpin,
{
    // A connection accepted in the same poll as the stop signal may start
    // with shutdown already flagged.
    if *shutdown.borrow() {
        return;
    }

    let mut frames = FramedRead::new(io, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = frames.next() => {
                match frame {
                    None => break,
                    Some(Err(error)) => {
                        warn!(kind, %error, "framing error, closing connection");
                        break;
                    }
                    Some(Ok(bytes)) => match decode_frame(&bytes) {
                        Ok(envelope) => {
                            if inbound.send(InboundRequest { kind, envelope }).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => warn!(kind, %error, "dropping malformed frame"),
                    },
                }
            }
        }
    }
}

/// Spawns a write loop that drains encoded frames from `rx` into a
/// length-delimited sink over the given stream socket.
pub(crate) fn spawn_stream_writer<W>(
    kind: &'static str,
    io: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(io, LengthDelimitedCodec::new());
        while let Some(frame) = rx.recv().await {
            if let Err(error) = sink.send(Bytes::from(frame)).await {
                warn!(kind, %error, "write loop ended");
                break;
            }
        }
    });
}

/// Writes a single frame over a one-shot stream connection.
pub(crate) async fn write_one_frame<W>(
    kind: &'static str,
    io: W,
    frame: Vec<u8>,
) -> Result<(), AdapterError>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(io, LengthDelimitedCodec::new());
    sink.send(Bytes::from(frame))
        .await
        .map_err(|source| AdapterError::Io { kind, source })
}

/// Shared handle bookkeeping for the listener task an adapter spawns.
#[derive(Debug)]
pub(crate) struct ListenerTask {
    pub(crate) handle: tokio::task::JoinHandle<()>,
}

impl ListenerTask {
    pub(crate) fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Waits for the listener task to exit after shutdown was signalled.
    pub(crate) async fn join(self) {
        if let Err(error) = self.handle.await {
            if !error.is_cancelled() {
                warn!(%error, "listener task ended abnormally");
            }
        }
    }
}
