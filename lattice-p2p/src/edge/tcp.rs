//! TCP transport.
//!
//! Frames are length-prefixed on the wire:
//! - 4 bytes: frame magic
//! - 4 bytes: big-endian payload length
//! - N bytes: opaque payload
//!
//! Each edge runs a reader task and a writer task; the listener runs an
//! accept task. All of them report into the consumer's event sink through
//! the edge's gate.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use lattice_core::Address;

use super::{Direction, Edge, EdgeEvent, EdgeId, EdgeListener, EdgeSink, SinkGate};
use crate::config::{DEFAULT_CONNECT_TIMEOUT, FRAME_MAGIC, MAX_FRAME_SIZE};
use crate::error::{NetError, NetResult};

/// The scheme TCP listeners answer to.
pub const TCP_SCHEME: &str = "tcp";

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Codec for length-prefixed opaque frames.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Expected length of the current frame once its header has been read.
    current_length: Option<usize>,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> NetResult<Option<Self::Item>> {
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let magic: [u8; 4] = src[0..4].try_into().expect("slice is 4 bytes");
            if magic != FRAME_MAGIC {
                return Err(NetError::InvalidMagic {
                    expected: FRAME_MAGIC,
                    actual: magic,
                });
            }

            let length = u32::from_be_bytes(src[4..8].try_into().expect("slice is 4 bytes")) as usize;
            if length > MAX_FRAME_SIZE {
                return Err(NetError::FrameTooLarge {
                    size: length,
                    max: MAX_FRAME_SIZE,
                });
            }

            self.current_length = Some(length);
        }

        let length = self.current_length.expect("length was just set");
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let frame = src.split_to(length).freeze();
        self.current_length = None;

        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = NetError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> NetResult<()> {
        let length = frame.len();
        if length > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&FRAME_MAGIC);
        dst.put_u32(length as u32);
        dst.put_slice(&frame);

        Ok(())
    }
}

/// Edge listener for the `tcp` scheme.
pub struct TcpEdgeListener {
    bind_addr: SocketAddr,
    connect_timeout: Duration,
    events: Option<EdgeSink>,
    accept_task: Option<JoinHandle<()>>,
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
    stopped: bool,
}

impl TcpEdgeListener {
    /// Create a listener that will bind `bind_addr` when attached.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            events: None,
            accept_task: None,
            bound_addr_tx: None,
            stopped: false,
        }
    }

    /// Set the outbound connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Receive the actual bound address once listening starts. Useful for
    /// tests binding port 0.
    pub fn bound_addr_receiver(&mut self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.bound_addr_tx = Some(tx);
        rx
    }
}

impl EdgeListener for TcpEdgeListener {
    fn handles(&self, address: &Address) -> bool {
        address.scheme() == TCP_SCHEME
    }

    fn attach(&mut self, events: EdgeSink) {
        self.events = Some(events.clone());
        let bind_addr = self.bind_addr;
        let bound_tx = self.bound_addr_tx.take();

        self.accept_task = Some(tokio::spawn(async move {
            let listener = match TcpListener::bind(bind_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(addr = %bind_addr, error = %e, "failed to bind TCP edge listener");
                    return;
                }
            };
            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!(addr = %addr, "listening for inbound edges");
                    if let Some(tx) = bound_tx {
                        let _ = tx.send(addr);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "could not read bound address"),
            }

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY");
                        }
                        let remote = Address::new(TCP_SCHEME, addr.to_string());
                        let edge = TcpEdge::spawn(stream, Direction::Inbound, remote);
                        tracing::debug!(edge = %edge.id(), addr = %addr, "accepted inbound edge");
                        if events.send(EdgeEvent::New(edge)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                    }
                }
            }
        }));
    }

    fn create_edge_to(&mut self, address: &Address) {
        let Some(events) = self.events.clone() else {
            tracing::warn!(address = %address, "TCP listener dialed before attach");
            return;
        };
        if self.stopped {
            let _ = events.send(EdgeEvent::CreationFailure {
                address: address.clone(),
                reason: "listener stopped".to_string(),
            });
            return;
        }

        let address = address.clone();
        let connect_timeout = self.connect_timeout;
        tokio::spawn(async move {
            let sock: SocketAddr = match address.locator().parse() {
                Ok(sock) => sock,
                Err(e) => {
                    let _ = events.send(EdgeEvent::CreationFailure {
                        address,
                        reason: format!("invalid address: {}", e),
                    });
                    return;
                }
            };

            match timeout(connect_timeout, TcpStream::connect(sock)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!(addr = %sock, error = %e, "failed to set TCP_NODELAY");
                    }
                    let edge = TcpEdge::spawn(stream, Direction::Outbound, address);
                    tracing::debug!(edge = %edge.id(), addr = %sock, "outbound edge established");
                    let _ = events.send(EdgeEvent::New(edge));
                }
                Ok(Err(e)) => {
                    let _ = events.send(EdgeEvent::CreationFailure {
                        address,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    let _ = events.send(EdgeEvent::CreationFailure {
                        address,
                        reason: "connection timed out".to_string(),
                    });
                }
            }
        });
    }

    fn stop(&mut self) {
        self.stopped = true;
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// An edge over one TCP stream.
#[derive(Debug)]
pub struct TcpEdge {
    id: EdgeId,
    direction: Direction,
    remote: Address,
    gate: Mutex<SinkGate>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl TcpEdge {
    /// Wrap a connected stream in an edge, spawning its reader and writer.
    pub fn spawn(stream: TcpStream, direction: Direction, remote: Address) -> Arc<dyn Edge> {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

        let edge = Arc::new(TcpEdge {
            id: EdgeId::next(),
            direction,
            remote,
            gate: Mutex::new(SinkGate::new()),
            outgoing: Mutex::new(Some(out_tx)),
        });

        // Writer: drains queued frames; exits when the edge closes and the
        // queue sender is dropped, which shuts the write half down.
        let writer_id = edge.id;
        tokio::spawn(async move {
            let mut framed = FramedWrite::new(write_half, FrameCodec::new());
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = framed.send(frame).await {
                    tracing::debug!(edge = %writer_id, error = %e, "write failed");
                    break;
                }
            }
        });

        // Reader: feeds received frames through the gate; transport EOF or
        // a read error closes the edge.
        let weak: Weak<TcpEdge> = Arc::downgrade(&edge);
        tokio::spawn(async move {
            let mut framed = FramedRead::new(read_half, FrameCodec::new());
            loop {
                match framed.next().await {
                    Some(Ok(frame)) => {
                        let Some(edge) = weak.upgrade() else { break };
                        edge.deliver(frame);
                    }
                    Some(Err(e)) => {
                        if let Some(edge) = weak.upgrade() {
                            edge.close(&format!("read error: {}", e));
                        }
                        break;
                    }
                    None => {
                        if let Some(edge) = weak.upgrade() {
                            edge.close("disconnected");
                        }
                        break;
                    }
                }
            }
        });

        edge
    }

    fn deliver(&self, frame: Bytes) {
        self.gate
            .lock()
            .expect("edge lock poisoned")
            .deliver(self.id, frame);
    }
}

impl Edge for TcpEdge {
    fn id(&self) -> EdgeId {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn is_closed(&self) -> bool {
        self.gate.lock().expect("edge lock poisoned").is_closed()
    }

    fn remote_address(&self) -> &Address {
        &self.remote
    }

    fn set_sink(&self, sink: EdgeSink) {
        self.gate
            .lock()
            .expect("edge lock poisoned")
            .install(self.id, sink);
    }

    fn send(&self, frame: Bytes) -> NetResult<()> {
        let outgoing = self.outgoing.lock().expect("edge lock poisoned");
        let tx = outgoing.as_ref().ok_or(NetError::EdgeClosed)?;
        tx.send(frame).map_err(|_| NetError::EdgeClosed)
    }

    fn close(&self, reason: &str) -> bool {
        let closed_now = self
            .gate
            .lock()
            .expect("edge lock poisoned")
            .close(self.id, reason);
        if closed_now {
            // Dropping the sender stops the writer, which releases the write
            // half and lets the remote observe EOF.
            self.outgoing.lock().expect("edge lock poisoned").take();
        }
        closed_now
    }
}

impl fmt::Display for TcpEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} to {})", self.id, self.direction, self.remote)
    }
}
