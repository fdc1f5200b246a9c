//! The cast channel: owns the TLS socket, multiplexes virtual
//! connections, correlates requests with replies, runs heartbeats and
//! fans broadcasts out to subscribers.
//!
//! All mutable channel state (virtual connections, pending requests,
//! subscriptions, last-message timestamp) is owned by a single actor
//! task; callers talk to it through a bounded command queue. The
//! channel moves through `Connecting -> Open -> Closing -> Closed`;
//! every operation except [`Channel::close`] and [`Channel::is_closed`]
//! fails with [`ChannelError::Closed`] once closing has begun.

use crate::{
    codec::{CastMessageCodec, ProtocolError},
    message::{CastMessage, EndpointId, Namespace},
    payload::{self, connection, heartbeat, Header, RequestId, RequestIdGen, RequestInner},
    util::named,
};
use futures::{SinkExt, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::codec::Framed;

/// TCP port cast devices usually listen on.
pub const DEFAULT_PORT: u16 = 8009;

/// Deadline for the TCP dial.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between outbound PINGs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Inbound silence longer than this means the device is gone.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace for the actor to wind down on close().
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

const COMMAND_QUEUE_LEN: usize = 32;

pub trait TokioAsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TokioAsyncStream for T
where T: AsyncRead + AsyncWrite + Send + Unpin + 'static
{}

/// Failure to establish the transport under a channel.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("tcp connect: {0}")]
    Io(#[source] std::io::Error),

    #[error("tls handshake: {0}")]
    Tls(#[source] std::io::Error),

    #[error("connect timed out after {CONNECT_TIMEOUT:?}")]
    Timeout,
}

/// Failure of a channel operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("payload encode: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type SubscriptionId = u64;

/// A virtual connection: the ordered `(local, remote)` endpoint pair a
/// message travels on. Multiple vconns multiplex over one channel.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct VirtualConnection {
    local: EndpointId,
    remote: EndpointId,
}

impl VirtualConnection {
    /// The pair for answering `msg`, from its destination back to its
    /// source.
    fn reverse_of(msg: &CastMessage) -> VirtualConnection {
        VirtualConnection {
            local: msg.destination.clone(),
            remote: msg.source.clone(),
        }
    }
}

enum Command {
    Send {
        msg: CastMessage,
        request_id: RequestId,
        reply_slot: Option<oneshot::Sender<CastMessage>>,
    },
    Subscribe {
        id: SubscriptionId,
        slot: mpsc::Sender<CastMessage>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// A connection to one cast device.
pub struct Channel {
    cmd_tx: mpsc::Sender<Command>,
    request_ids: RequestIdGen,
    subscription_ids: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl Channel {
    /// Dials `addr` and starts the channel task.
    ///
    /// Cast devices present self-signed leaf certificates, so the TLS
    /// handshake intentionally skips peer verification.
    pub async fn open(addr: SocketAddr) -> Result<Channel, ConnectError> {
        let stream = tls_connect(addr).await?;
        Ok(Channel::from_stream(stream))
    }

    /// Starts a channel over an already-established transport.
    ///
    /// Useful for transports other than the default TLS socket; the
    /// test suite drives channels over in-memory pipes this way.
    pub fn from_stream<S>(stream: S) -> Channel
    where S: TokioAsyncStream
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_LEN);
        let closed = Arc::new(AtomicBool::new(false));

        let task = Task::new(stream, cmd_rx, Arc::clone(&closed));
        tokio::spawn(task.run());

        Channel {
            cmd_tx,
            request_ids: RequestIdGen::new(),
            subscription_ids: AtomicU64::new(1),
            closed,
        }
    }

    /// Sends a request payload from `source` to `destination`.
    ///
    /// A fresh request id is injected into the payload; if
    /// `reply_slot` is given it will receive the message answering
    /// that id, and is dropped unfulfilled when the channel closes
    /// first. The `(source, destination)` virtual connection is opened
    /// on first use.
    #[named]
    pub async fn request<R>(&self,
                            source: EndpointId,
                            destination: EndpointId,
                            req: &R,
                            reply_slot: Option<oneshot::Sender<CastMessage>>)
    -> Result<RequestId, ChannelError>
    where R: RequestInner
    {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let request_id = self.request_ids.take_next();
        let msg = CastMessage {
            namespace: Namespace::from_const(R::CHANNEL_NAMESPACE),
            source,
            destination,
            payload: payload::to_json(req, Some(request_id))?,
        };

        tracing::debug!(target: method_path!("Channel"),
                        %request_id,
                        %msg,
                        "request");

        self.cmd_tx
            .send(Command::Send { msg, request_id, reply_slot })
            .await
            .map_err(|_| ChannelError::Closed)?;

        Ok(request_id)
    }

    /// Registers `slot` for every broadcast message (destination
    /// `"*"`). Each subscriber gets its own copy. Delivery never
    /// blocks the channel: a subscriber that stops draining its queue
    /// has its subscription terminated.
    pub async fn subscribe(&self, slot: mpsc::Sender<CastMessage>)
    -> Result<SubscriptionId, ChannelError>
    {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.subscription_ids.fetch_add(1, Ordering::SeqCst);
        self.cmd_tx
            .send(Command::Subscribe { id, slot })
            .await
            .map_err(|_| ChannelError::Closed)?;

        Ok(id)
    }

    /// Removes a subscription; the slot sees end-of-stream.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        self.cmd_tx
            .send(Command::Unsubscribe { id })
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Closes the channel: CLOSE on every live virtual connection,
    /// end-of-stream to every pending reply slot and subscription,
    /// then the socket. Idempotent; bounded by a 1 second grace.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { done: done_tx }).await.is_ok() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, done_rx).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cmd_tx.is_closed()
    }
}

#[named]
async fn tls_connect(addr: SocketAddr)
-> Result<impl TokioAsyncStream, ConnectError>
{
    const FUNCTION_PATH: &str = function_path!();

    let mut config = rustls::ClientConfig::builder()
        .dangerous().with_custom_certificate_verifier(Arc::new(
            crate::util::rustls::danger::NoCertificateVerification::new_ring()))
        .with_no_client_auth();
    config.enable_early_data = true;

    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let ip_rustls = rustls::pki_types::IpAddr::from(addr.ip());
    let domain = rustls::pki_types::ServerName::IpAddress(ip_rustls);

    let tcp_stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(ConnectError::Io)?;

    tracing::debug!(target: FUNCTION_PATH, %addr, "TcpStream connected");

    let tls_stream = connector.connect(domain, tcp_stream)
                              .await
                              .map_err(ConnectError::Tls)?;

    tracing::debug!(target: FUNCTION_PATH, %addr, "TlsStream connected");

    Ok(tls_stream)
}

/// The actor owning the framed stream and all channel state.
struct Task<S: TokioAsyncStream> {
    framed: Framed<S, CastMessageCodec>,
    cmd_rx: mpsc::Receiver<Command>,
    closed: Arc<AtomicBool>,

    vconns: HashSet<VirtualConnection>,
    pending: HashMap<RequestId, oneshot::Sender<CastMessage>>,
    subscriptions: HashMap<SubscriptionId, mpsc::Sender<CastMessage>>,
    last_message_at: Instant,
}

impl<S: TokioAsyncStream> Task<S> {
    fn new(stream: S,
           cmd_rx: mpsc::Receiver<Command>,
           closed: Arc<AtomicBool>)
    -> Task<S> {
        Task {
            framed: Framed::new(stream, CastMessageCodec),
            cmd_rx,
            closed,
            vconns: HashSet::new(),
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            last_message_at: Instant::now(),
        }
    }

    #[named]
    async fn run(mut self) {
        const METHOD_PATH: &str = method_path!("Task");

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send { msg, request_id, reply_slot }) => {
                        if let Err(err) = self.handle_send(msg, request_id, reply_slot).await {
                            tracing::warn!(target: METHOD_PATH,
                                           %err, "write error, closing channel");
                            break;
                        }
                    },
                    Some(Command::Subscribe { id, slot }) => {
                        self.subscriptions.insert(id, slot);
                    },
                    Some(Command::Unsubscribe { id }) => {
                        self.subscriptions.remove(&id);
                    },
                    Some(Command::Close { done }) => {
                        self.shutdown(Some(done)).await;
                        return;
                    },
                    // Every handle dropped; nobody is left to serve.
                    None => break,
                },

                read = self.framed.next() => match read {
                    Some(Ok(msg)) => self.handle_message(msg).await,
                    Some(Err(err)) if !err.is_fatal() => {
                        // The frame was well-delimited, the stream is
                        // still aligned; skip it.
                        tracing::warn!(target: METHOD_PATH,
                                       %err, "dropping undecodable frame");
                    },
                    Some(Err(err)) => {
                        tracing::warn!(target: METHOD_PATH,
                                       %err, "read error, closing channel");
                        break;
                    },
                    None => {
                        tracing::info!(target: METHOD_PATH,
                                       "stream ended by peer");
                        break;
                    },
                },

                _ = heartbeat.tick() => {
                    if self.last_message_at.elapsed() > IDLE_TIMEOUT {
                        tracing::warn!(target: METHOD_PATH,
                                       "nothing heard for {IDLE_TIMEOUT:?}, closing channel");
                        break;
                    }
                    self.send_pings().await;
                },
            }
        }

        self.shutdown(None).await;
    }

    /// Builds a header-only control message (CONNECT, CLOSE, PING,
    /// PONG) for a virtual connection.
    fn control_message<R>(vc: &VirtualConnection, req: &R) -> Option<CastMessage>
    where R: RequestInner
    {
        match payload::to_json(req, None) {
            Ok(payload) => Some(CastMessage {
                namespace: Namespace::from_const(R::CHANNEL_NAMESPACE),
                source: vc.local.clone(),
                destination: vc.remote.clone(),
                payload,
            }),
            Err(err) => {
                tracing::error!(%err, "control payload serialization failed");
                None
            },
        }
    }

    async fn handle_send(&mut self,
                         msg: CastMessage,
                         request_id: RequestId,
                         reply_slot: Option<oneshot::Sender<CastMessage>>)
    -> Result<(), ProtocolError>
    {
        self.ensure_vconn(&msg.source, &msg.destination).await?;

        if let Some(slot) = reply_slot {
            self.pending.insert(request_id, slot);
        }

        let res = self.framed.send(msg).await;
        if res.is_err() {
            self.pending.remove(&request_id);
        }

        res
    }

    /// Sends a CONNECT and records the vconn if `(source, destination)`
    /// is a pair we have not used before. Broadcasts need no vconn.
    async fn ensure_vconn(&mut self, source: &EndpointId, destination: &EndpointId)
    -> Result<(), ProtocolError>
    {
        if destination.is_broadcast() {
            return Ok(());
        }

        let vc = VirtualConnection {
            local: source.clone(),
            remote: destination.clone(),
        };
        if self.vconns.contains(&vc) {
            return Ok(());
        }

        let Some(msg) = Self::control_message(&vc, &connection::Connect::default()) else {
            return Ok(());
        };
        self.framed.send(msg).await?;

        tracing::debug!(vconn = ?vc, "virtual connection opened");
        self.vconns.insert(vc);

        Ok(())
    }

    #[named]
    async fn handle_message(&mut self, msg: CastMessage) {
        const METHOD_PATH: &str = method_path!("Task");

        self.last_message_at = Instant::now();

        let header = match serde_json::from_str::<Header>(&msg.payload) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               %err, %msg, "unexpected payload, dropping");
                return;
            },
        };

        let ns = msg.namespace.as_str();

        // Heartbeats are answered here and never forwarded.
        if ns == heartbeat::CHANNEL_NAMESPACE {
            if header.typ == heartbeat::MESSAGE_TYPE_PING {
                self.send_pong(&msg).await;
            }
            return;
        }

        // The peer tearing down a vconn.
        if ns == connection::CHANNEL_NAMESPACE {
            if header.typ == connection::MESSAGE_TYPE_CLOSE {
                let vc = VirtualConnection::reverse_of(&msg);
                if self.vconns.remove(&vc) {
                    tracing::info!(target: METHOD_PATH,
                                   vconn = ?vc, "virtual connection closed by peer");
                }
            }
            return;
        }

        if msg.is_broadcast() {
            self.fan_out(msg);
            return;
        }

        let Some(request_id) = header.request_id.filter(|id| !id.is_broadcast()) else {
            tracing::debug!(target: METHOD_PATH,
                            %msg, "unicast message without request id, dropping");
            return;
        };

        match self.pending.remove(&request_id) {
            Some(slot) => {
                if slot.send(msg).is_err() {
                    tracing::debug!(target: METHOD_PATH,
                                    %request_id, "reply slot abandoned by caller");
                }
            },
            None => {
                tracing::debug!(target: METHOD_PATH,
                                %request_id, %msg, "unmatched reply, dropping");
            },
        }
    }

    /// Delivers a broadcast to every subscriber without blocking. A
    /// full queue means the subscriber lagged; its subscription is
    /// terminated rather than stalling the reader.
    fn fan_out(&mut self, msg: CastMessage) {
        self.subscriptions.retain(|id, slot| {
            match slot.try_send(msg.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(subscription = *id,
                                    "subscriber gone, removing subscription");
                    false
                },
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = *id,
                                   "subscriber lagged, terminating subscription");
                    false
                },
            }
        });
    }

    async fn send_pings(&mut self) {
        let msgs: Vec<CastMessage> = self.vconns
            .iter()
            .filter_map(|vc| Self::control_message(vc, &heartbeat::Ping {}))
            .collect();

        for msg in msgs {
            if let Err(err) = self.framed.send(msg).await {
                tracing::warn!(%err, "ping send failed");
            }
        }
    }

    /// The ping arrived on a vconn the peer considers established, so
    /// the pong goes straight back on the reverse pair.
    async fn send_pong(&mut self, ping: &CastMessage) {
        let vc = VirtualConnection::reverse_of(ping);
        let Some(pong) = Self::control_message(&vc, &heartbeat::Pong {}) else {
            return;
        };

        if let Err(err) = self.framed.send(pong).await {
            tracing::warn!(%err, "pong send failed");
        }
    }

    async fn shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        self.closed.store(true, Ordering::SeqCst);

        let msgs: Vec<CastMessage> = self.vconns
            .drain()
            .filter_map(|vc| Self::control_message(&vc, &connection::Close {}))
            .collect();

        // Closing notifications are best effort and must not hold the
        // shutdown hostage to a wedged socket.
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
            for msg in msgs {
                if self.framed.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = self.framed.close().await;
        }).await;

        // Dropping the slots signals end-of-stream to every pending
        // request and subscription.
        self.pending.clear();
        self.subscriptions.clear();

        if let Some(done) = done {
            let _ = done.send(());
        }

        tracing::info!("channel closed");
    }
}
