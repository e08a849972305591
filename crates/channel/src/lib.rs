//! Channel adapter contract for peerlink sessions.
//!
//! A session talks to the outside world through two seams:
//!
//! - a [`Signaling`] service that registers an id and brokers connections, and
//! - the [`Channel`] those connections produce: an ordered, reliable,
//!   bidirectional pipe of text and binary frames with a send-queue gauge.
//!
//! [`LocalRendezvous`] implements both in-process on top of
//! [`StreamChannel`]; [`TcpSignaling`] does the same over a direct TCP
//! connection between two hosts.

pub mod error;
pub mod local;
pub mod room;
pub mod stream;
pub mod tcp;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

pub use error::{ChannelError, SignalingError, SignalingErrorKind};
pub use local::{LocalHandle, LocalRendezvous};
pub use room::generate_room_id;
pub use stream::StreamChannel;
pub use tcp::{TcpHandle, TcpSignaling};
pub use wire::Frame;

/// Size of the in-process pipe backing a local connection (256 KiB).
pub const DUPLEX_BUFFER_SIZE: usize = 256 * 1024;

/// Boxed future returned by signaling operations.
pub type SignalingFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, SignalingError>> + Send + 'a>>;

/// Boxed future that resolves when a channel's send queue shrinks.
pub type DrainFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Events delivered by an open channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Data(Frame),
    Close,
    Error(String),
}

/// An ordered, reliable, bidirectional frame pipe to one remote peer.
pub trait Channel: Clone + Send + Sync + 'static {
    /// Id of the peer on the other end.
    fn remote_id(&self) -> &str;

    /// Queues a frame for sending. Never blocks.
    fn send(&self, frame: Frame) -> Result<(), ChannelError>;

    /// Bytes queued locally but not yet handed to the transport.
    fn buffered_amount(&self) -> u64;

    fn is_open(&self) -> bool;

    /// Closes the channel. Idempotent.
    fn close(&self);

    /// Resolves the next time the send queue shrinks.
    ///
    /// The default never resolves, leaving callers to poll
    /// [`buffered_amount`](Channel::buffered_amount).
    fn drained(&self) -> DrainFuture<'_> {
        Box::pin(std::future::pending())
    }
}

/// A channel together with the stream of events it produces.
#[derive(Debug)]
pub struct Connection<C> {
    pub channel: C,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Connectivity of the signaling link itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Events delivered by an open signaling handle.
#[derive(Debug)]
pub enum SignalingEvent<C> {
    Status(LinkStatus),
    Incoming(Connection<C>),
    Error(SignalingError),
}

/// A registered presence on the signaling service.
pub trait SignalingHandle: Send + Sync + 'static {
    type Channel: Channel;

    /// The id this handle is reachable at.
    fn local_id(&self) -> &str;

    /// Opens a channel to `remote_id`.
    fn connect(&self, remote_id: &str) -> SignalingFuture<'_, Connection<Self::Channel>>;

    /// Leaves the signaling service. Idempotent.
    fn close(&self);
}

/// An opened signaling handle and its event stream.
pub struct SignalingLink<H: SignalingHandle> {
    pub handle: H,
    pub events: mpsc::UnboundedReceiver<SignalingEvent<H::Channel>>,
}

/// A service that hands out signaling handles.
pub trait Signaling: Send + Sync + 'static {
    type Handle: SignalingHandle;

    /// Registers as a host. With `None` the service picks an id.
    fn open_as_host(&self, local_id: Option<&str>) -> SignalingFuture<'_, SignalingLink<Self::Handle>>;

    /// Registers with a service-assigned id for outbound connections.
    fn open_as_guest(&self) -> SignalingFuture<'_, SignalingLink<Self::Handle>>;
}
