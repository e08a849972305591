//! Direct TCP signaling.
//!
//! The host listens on an address; a guest dials that address and names
//! the room it wants in a hello frame. There is no relay: the hosting
//! process is its own signaling service, so only one room lives behind an
//! address.
//!
//! # Hello exchange
//!
//! ```text
//! guest -> host: TEXT "peerlink/1 <room> <guest-id>"
//! host -> guest: TEXT "ok" | "unavailable" | "incompatible"
//! ```
//!
//! After `ok` the same socket carries the channel frames.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SignalingError;
use crate::room::generate_room_id;
use crate::stream::StreamChannel;
use crate::wire::{Frame, read_frame, write_frame};
use crate::{
    Connection, LinkStatus, Signaling, SignalingEvent, SignalingFuture, SignalingHandle,
    SignalingLink,
};

const HELLO_TAG: &str = "peerlink/1";
const REPLY_OK: &str = "ok";
const REPLY_UNAVAILABLE: &str = "unavailable";
const REPLY_INCOMPATIBLE: &str = "incompatible";

/// Time allowed for the hello exchange on a fresh socket.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Signaling over plain TCP. Hosts bind `addr`; guests dial it.
#[derive(Debug, Clone)]
pub struct TcpSignaling {
    addr: String,
}

impl TcpSignaling {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Signaling for TcpSignaling {
    type Handle = TcpHandle;

    fn open_as_host(&self, local_id: Option<&str>) -> SignalingFuture<'_, SignalingLink<TcpHandle>> {
        let id = local_id.map_or_else(generate_room_id, str::to_string);
        Box::pin(async move {
            let listener = TcpListener::bind(&self.addr)
                .await
                .map_err(|e| SignalingError::ServerUnavailable(format!("{}: {e}", self.addr)))?;
            let listen_addr = listener
                .local_addr()
                .map_err(|e| SignalingError::ServerUnavailable(e.to_string()))?;
            info!(room = %id, addr = %listen_addr, "hosting over TCP");

            let (events_tx, events) = mpsc::unbounded_channel();
            let _ = events_tx.send(SignalingEvent::Status(LinkStatus::Connected));

            let cancel = CancellationToken::new();
            tokio::spawn(accept_loop(
                listener,
                id.clone(),
                events_tx.clone(),
                cancel.clone(),
            ));

            Ok(SignalingLink {
                handle: TcpHandle {
                    local_id: id,
                    addr: self.addr.clone(),
                    listen_addr: Some(listen_addr),
                    cancel,
                    _events_tx: events_tx,
                },
                events,
            })
        })
    }

    fn open_as_guest(&self) -> SignalingFuture<'_, SignalingLink<TcpHandle>> {
        Box::pin(async move {
            let (events_tx, events) = mpsc::unbounded_channel();
            Ok(SignalingLink {
                handle: TcpHandle {
                    local_id: generate_room_id(),
                    addr: self.addr.clone(),
                    listen_addr: None,
                    cancel: CancellationToken::new(),
                    _events_tx: events_tx,
                },
                events,
            })
        })
    }
}

/// A TCP registration. Hosts stop listening when the handle is closed or
/// dropped.
#[derive(Debug)]
pub struct TcpHandle {
    local_id: String,
    addr: String,
    listen_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    _events_tx: mpsc::UnboundedSender<SignalingEvent<StreamChannel>>,
}

impl TcpHandle {
    /// Address the host is listening on; `None` for guests.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }
}

impl SignalingHandle for TcpHandle {
    type Channel = StreamChannel;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn connect(&self, remote_id: &str) -> SignalingFuture<'_, Connection<StreamChannel>> {
        let remote_id = remote_id.to_string();
        Box::pin(async move { dial(&self.addr, &self.local_id, &remote_id).await })
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TcpHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dial(
    addr: &str,
    local_id: &str,
    remote_id: &str,
) -> Result<Connection<StreamChannel>, SignalingError> {
    let mut stream = TcpStream::connect(addr).await.map_err(|e| match e.kind() {
        ErrorKind::ConnectionRefused => SignalingError::PeerUnavailable(remote_id.to_string()),
        _ => SignalingError::Network(format!("{addr}: {e}")),
    })?;
    let _ = stream.set_nodelay(true);

    let hello = Frame::Text(format!("{HELLO_TAG} {remote_id} {local_id}"));
    let reply = tokio::time::timeout(HELLO_TIMEOUT, async {
        write_frame(&mut stream, &hello).await?;
        read_frame(&mut stream).await
    })
    .await
    .map_err(|_| SignalingError::Network("no hello reply".into()))?
    .map_err(|e| SignalingError::Network(e.to_string()))?;

    match reply {
        Some(Frame::Text(reply)) if reply == REPLY_OK => {
            debug!(remote = %remote_id, addr, "TCP channel established");
            Ok(StreamChannel::spawn(stream, remote_id))
        }
        Some(Frame::Text(reply)) if reply == REPLY_UNAVAILABLE => {
            Err(SignalingError::PeerUnavailable(remote_id.to_string()))
        }
        Some(Frame::Text(reply)) if reply == REPLY_INCOMPATIBLE => Err(
            SignalingError::IncompatibleEndpoint(format!("{addr} rejected {HELLO_TAG}")),
        ),
        Some(other) => Err(SignalingError::IncompatibleEndpoint(format!(
            "unexpected hello reply ({} bytes)",
            other.len()
        ))),
        None => Err(SignalingError::Network("connection closed during hello".into())),
    }
}

async fn accept_loop(
    listener: TcpListener,
    room: String,
    events_tx: mpsc::UnboundedSender<SignalingEvent<StreamChannel>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(room = %room, "TCP listener closed");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    let room = room.clone();
                    let events_tx = events_tx.clone();
                    tokio::spawn(async move {
                        match tokio::time::timeout(HELLO_TIMEOUT, greet(stream, &room)).await {
                            Ok(Some(conn)) => {
                                let _ = events_tx.send(SignalingEvent::Incoming(conn));
                            }
                            Ok(None) => {}
                            Err(_) => warn!(%peer_addr, "hello timed out"),
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

/// Answers a guest's hello. Returns the channel when the guest asked for
/// `room`.
async fn greet(mut stream: TcpStream, room: &str) -> Option<Connection<StreamChannel>> {
    let hello = match read_frame(&mut stream).await {
        Ok(Some(Frame::Text(text))) => text,
        Ok(_) => return None,
        Err(e) => {
            debug!(error = %e, "bad hello");
            return None;
        }
    };

    let mut parts = hello.split(' ');
    let (tag, wanted, guest) = (parts.next(), parts.next(), parts.next());
    let reply = match (tag, wanted, guest) {
        (Some(HELLO_TAG), Some(wanted), Some(_)) if wanted == room => REPLY_OK,
        (Some(HELLO_TAG), _, _) => REPLY_UNAVAILABLE,
        _ => REPLY_INCOMPATIBLE,
    };
    if let Err(e) = write_frame(&mut stream, &Frame::Text(reply.into())).await {
        debug!(error = %e, "failed to answer hello");
        return None;
    }
    if reply != REPLY_OK {
        warn!(hello = %hello, reply, "rejected inbound TCP connection");
        return None;
    }

    let guest = guest.unwrap_or_default().to_string();
    let _ = stream.set_nodelay(true);
    info!(guest = %guest, "inbound TCP channel");
    Some(StreamChannel::spawn(stream, guest))
}
