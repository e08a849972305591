//! In-process rendezvous implementing the signaling contract.
//!
//! Peers register an id with a shared [`LocalRendezvous`]; `connect` looks the
//! remote id up and hands both sides the ends of a `tokio::io::duplex` pipe,
//! each wrapped in a [`StreamChannel`]. The rendezvous can be switched offline
//! and individual signaling links can be dropped, which is how tests exercise
//! signaling failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SignalingError;
use crate::room::generate_room_id;
use crate::stream::StreamChannel;
use crate::{
    Connection, DUPLEX_BUFFER_SIZE, LinkStatus, Signaling, SignalingEvent, SignalingFuture,
    SignalingHandle, SignalingLink,
};

/// Attempts at finding a free id for a guest before giving up.
const GUEST_ID_ATTEMPTS: usize = 8;

type EventSender = mpsc::UnboundedSender<SignalingEvent<StreamChannel>>;

#[derive(Debug)]
struct Peer {
    registration: u64,
    events_tx: EventSender,
    link_up: bool,
}

#[derive(Debug, Default)]
struct Registry {
    peers: HashMap<String, Peer>,
    offline: bool,
    next_registration: u64,
}

/// Shared in-process signaling service. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LocalRendezvous {
    inner: Arc<Mutex<Registry>>,
}

impl LocalRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switches the service on or off. While off, registration and
    /// connection attempts fail with [`SignalingError::ServerUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.lock().offline = !available;
    }

    /// Returns `true` if `id` is currently registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.lock().peers.contains_key(id)
    }

    /// Simulates loss of the signaling link for `id`.
    ///
    /// Channels already handed out stay open. Returns `false` if `id` is
    /// not registered.
    pub fn drop_link(&self, id: &str) -> bool {
        self.set_link(id, false)
    }

    /// Restores a link previously dropped with [`drop_link`](Self::drop_link).
    pub fn restore_link(&self, id: &str) -> bool {
        self.set_link(id, true)
    }

    /// Delivers `error` on the signaling events of `id`.
    pub fn fail_link(&self, id: &str, error: SignalingError) -> bool {
        match self.lock().peers.get(id) {
            Some(peer) => peer.events_tx.send(SignalingEvent::Error(error)).is_ok(),
            None => false,
        }
    }

    fn set_link(&self, id: &str, up: bool) -> bool {
        let mut registry = self.lock();
        let Some(peer) = registry.peers.get_mut(id) else {
            return false;
        };
        if peer.link_up != up {
            peer.link_up = up;
            let status = if up {
                LinkStatus::Connected
            } else {
                LinkStatus::Disconnected
            };
            debug!(id, ?status, "local signaling link changed");
            let _ = peer.events_tx.send(SignalingEvent::Status(status));
        }
        true
    }

    fn register(&self, id: String) -> Result<SignalingLink<LocalHandle>, SignalingError> {
        let mut registry = self.lock();
        if registry.offline {
            return Err(SignalingError::ServerUnavailable(
                "local rendezvous is offline".into(),
            ));
        }
        if registry.peers.contains_key(&id) {
            return Err(SignalingError::IdConflict(id));
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = events_tx.send(SignalingEvent::Status(LinkStatus::Connected));

        registry.next_registration += 1;
        let registration = registry.next_registration;
        registry.peers.insert(
            id.clone(),
            Peer {
                registration,
                events_tx,
                link_up: true,
            },
        );
        info!(id = %id, "registered with local rendezvous");

        Ok(SignalingLink {
            handle: LocalHandle {
                local_id: id,
                registration,
                rendezvous: self.clone(),
                closed: AtomicBool::new(false),
            },
            events,
        })
    }

    fn unregister(&self, id: &str, registration: u64) {
        let mut registry = self.lock();
        if registry
            .peers
            .get(id)
            .is_some_and(|p| p.registration == registration)
        {
            registry.peers.remove(id);
            debug!(id, "left local rendezvous");
        }
    }

    fn dial(
        &self,
        local_id: &str,
        registration: u64,
        remote_id: &str,
    ) -> Result<Connection<StreamChannel>, SignalingError> {
        let registry = self.lock();
        if registry.offline {
            return Err(SignalingError::ServerUnavailable(
                "local rendezvous is offline".into(),
            ));
        }

        let me = registry
            .peers
            .get(local_id)
            .filter(|p| p.registration == registration)
            .ok_or_else(|| SignalingError::Network("signaling handle is closed".into()))?;
        if !me.link_up {
            return Err(SignalingError::Network("signaling link is down".into()));
        }

        let peer = registry
            .peers
            .get(remote_id)
            .filter(|p| p.link_up && remote_id != local_id)
            .ok_or_else(|| SignalingError::PeerUnavailable(remote_id.to_string()))?;

        let (near, far) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
        let inbound = StreamChannel::spawn(far, local_id);
        if peer
            .events_tx
            .send(SignalingEvent::Incoming(inbound))
            .is_err()
        {
            warn!(remote = %remote_id, "peer stopped listening for connections");
            return Err(SignalingError::PeerUnavailable(remote_id.to_string()));
        }

        debug!(local = %local_id, remote = %remote_id, "local connection established");
        Ok(StreamChannel::spawn(near, remote_id))
    }
}

impl Signaling for LocalRendezvous {
    type Handle = LocalHandle;

    fn open_as_host(
        &self,
        local_id: Option<&str>,
    ) -> SignalingFuture<'_, SignalingLink<LocalHandle>> {
        let id = local_id.map_or_else(generate_room_id, str::to_string);
        Box::pin(async move { self.register(id) })
    }

    fn open_as_guest(&self) -> SignalingFuture<'_, SignalingLink<LocalHandle>> {
        Box::pin(async move {
            let mut last_err = None;
            for _ in 0..GUEST_ID_ATTEMPTS {
                match self.register(generate_room_id()) {
                    Err(e @ SignalingError::IdConflict(_)) => last_err = Some(e),
                    other => return other,
                }
            }
            Err(last_err.unwrap_or_else(|| {
                SignalingError::ServerUnavailable("no free guest id".into())
            }))
        })
    }
}

/// A registration on a [`LocalRendezvous`]. Leaves the rendezvous on drop.
#[derive(Debug)]
pub struct LocalHandle {
    local_id: String,
    registration: u64,
    rendezvous: LocalRendezvous,
    closed: AtomicBool,
}

impl SignalingHandle for LocalHandle {
    type Channel = StreamChannel;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn connect(&self, remote_id: &str) -> SignalingFuture<'_, Connection<StreamChannel>> {
        let remote_id = remote_id.to_string();
        Box::pin(async move {
            self.rendezvous
                .dial(&self.local_id, self.registration, &remote_id)
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.rendezvous.unregister(&self.local_id, self.registration);
        }
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        self.close();
    }
}
