#![allow(dead_code)]

use std::time::Duration;

use peerlink_channel::{
    Channel, ChannelEvent, Frame, LocalHandle, LocalRendezvous, Signaling, SignalingEvent,
    SignalingHandle, StreamChannel,
};
use peerlink_protocol::ControlMessage;
use peerlink_session::{Session, SessionConfig, SessionEvent, SessionState};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(60);

/// Waits for the first event `f` maps to `Some`, discarding the rest.
pub async fn next_matching<T>(
    rx: &mut mpsc::Receiver<SessionEvent>,
    mut f: impl FnMut(SessionEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if let Some(found) = f(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_state(session: &Session, want: SessionState) {
    timeout(WAIT, session.wait_for_state(|s| *s == want))
        .await
        .expect("timed out waiting for state")
        .expect("session driver stopped");
}

/// A hosting session and a guest session, both live.
pub struct Pair {
    pub host: Session,
    pub guest: Session,
    pub host_events: mpsc::Receiver<SessionEvent>,
    pub guest_events: mpsc::Receiver<SessionEvent>,
    pub room: String,
}

pub async fn connected_pair(rendezvous: &LocalRendezvous, config: SessionConfig) -> Pair {
    let host = Session::new(rendezvous.clone(), config.clone());
    let host_events = host.take_events().await.expect("host events");
    let room = host.start_as_host(Some("room-one")).await.expect("host");

    let guest = Session::new(rendezvous.clone(), config);
    let guest_events = guest.take_events().await.expect("guest events");
    guest.join_as_guest(&room).await.expect("join");
    wait_state(&host, SessionState::Live).await;

    Pair {
        host,
        guest,
        host_events,
        guest_events,
        room,
    }
}

/// A peer driven by hand over the raw channel.
pub struct RawPeer {
    pub channel: StreamChannel,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    _handle: Option<LocalHandle>,
}

impl RawPeer {
    /// Registers as a guest and dials `remote`.
    pub async fn dial(rendezvous: &LocalRendezvous, remote: &str) -> Self {
        let link = rendezvous.open_as_guest().await.expect("guest registration");
        let conn = link.handle.connect(remote).await.expect("dial");
        Self {
            channel: conn.channel,
            events: conn.events,
            _handle: Some(link.handle),
        }
    }

    pub fn send(&self, msg: ControlMessage) {
        let text = msg.encode().expect("encode");
        self.channel.send(Frame::Text(text)).expect("send");
    }

    pub fn send_bytes(&self, bytes: Vec<u8>) {
        self.channel.send(Frame::Binary(bytes)).expect("send");
    }

    /// Next frame from the session, skipping `Open`. `None` once closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.events.recv().await? {
                ChannelEvent::Open => continue,
                ChannelEvent::Data(frame) => return Some(frame),
                ChannelEvent::Close | ChannelEvent::Error(_) => return None,
            }
        }
    }

    /// Next control message, answering heartbeat `PING`s along the way.
    pub async fn try_control(&mut self, within: Duration) -> Option<ControlMessage> {
        timeout(within, async {
            loop {
                match self.next_frame().await? {
                    Frame::Text(text) => match ControlMessage::decode(&text).expect("decode") {
                        Some(ControlMessage::Ping) => self.send(ControlMessage::Pong),
                        Some(msg) => return Some(msg),
                        None => {}
                    },
                    Frame::Binary(_) => panic!("unexpected binary frame"),
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn expect_control(&mut self) -> ControlMessage {
        self.try_control(WAIT)
            .await
            .expect("no control message from session")
    }

    /// Answers the session's handshake `PING`.
    pub async fn complete_handshake(&mut self) {
        let first = timeout(WAIT, self.next_frame())
            .await
            .expect("timed out waiting for handshake")
            .expect("channel closed before handshake");
        let Frame::Text(text) = first else {
            panic!("expected handshake ping");
        };
        assert_eq!(
            ControlMessage::decode(&text).expect("decode"),
            Some(ControlMessage::Ping)
        );
        self.send(ControlMessage::Pong);
    }
}

/// A host registration whose inbound channels are handled by hand.
pub struct RawHost {
    pub handle: LocalHandle,
    pub events: mpsc::UnboundedReceiver<SignalingEvent<StreamChannel>>,
}

impl RawHost {
    pub async fn open(rendezvous: &LocalRendezvous, id: &str) -> Self {
        let link = rendezvous
            .open_as_host(Some(id))
            .await
            .expect("host registration");
        Self {
            handle: link.handle,
            events: link.events,
        }
    }

    pub async fn accept(&mut self) -> RawPeer {
        timeout(WAIT, async {
            loop {
                match self.events.recv().await.expect("signaling closed") {
                    SignalingEvent::Incoming(conn) => {
                        return RawPeer {
                            channel: conn.channel,
                            events: conn.events,
                            _handle: None,
                        };
                    }
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for inbound channel")
    }
}
