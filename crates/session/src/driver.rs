//! The session driver task.
//!
//! One driver runs per [`Session`](crate::Session) and owns every mutable
//! session field. Commands, signaling events, channel events, chunk-loop
//! reports and timers are all turned into an [`Input`] and handled by
//! [`Driver::dispatch`], one at a time, in arrival order.

use std::pin::Pin;
use std::sync::Arc;

use peerlink_channel::{
    Channel, ChannelEvent, Connection, Frame, Signaling, SignalingError, SignalingEvent,
    SignalingHandle, SignalingLink,
};
use peerlink_protocol::{
    ChatRecord, ControlMessage, FileMeta, Party, TransferDirection, TransferProgress,
    TransferStatus,
};
use peerlink_transfer::{
    FileSource, IncomingAssembler, OutgoingReport, OutgoingState, OutgoingTransfer,
    TransferError, spawn_chunk_loop,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::SessionError;
use crate::chat::ChatLog;
use crate::config::{SessionConfig, normalize_peer_id};
use crate::handshake::{Handshake, PongOutcome};
use crate::heartbeat::{HeartbeatCheck, HeartbeatMonitor};
use crate::router::{Inbound, route};
use crate::types::{FailureReason, SessionEvent, SessionState};

type ChannelOf<S> = <<S as Signaling>::Handle as SignalingHandle>::Channel;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from the [`Session`](crate::Session) handle.
pub(crate) enum Command {
    StartHost {
        label: Option<String>,
        reply: Reply<String>,
    },
    Join {
        remote: String,
        reply: Reply<()>,
    },
    SendText {
        text: String,
        reply: Reply<()>,
    },
    SendFile {
        source: FileSource,
        reply: Reply<String>,
    },
    Exit {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Host,
    Guest,
}

/// Result of a spawned `connect` call, tagged with the attempt it belongs to.
struct ConnectOutcome<C> {
    generation: u64,
    result: Result<Connection<C>, SignalingError>,
}

/// The one channel a session may hold.
struct Link<C> {
    channel: C,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    handshake: Handshake,
}

impl<C: Channel> Link<C> {
    fn new(conn: Connection<C>) -> Self {
        Self {
            channel: conn.channel,
            events: conn.events,
            handshake: Handshake::new(),
        }
    }
}

enum Input<C> {
    Command(Command),
    /// `None` when the channel's event stream ended.
    Channel(Option<ChannelEvent>),
    /// `None` when the signaling event stream ended.
    Signaling(Option<SignalingEvent<C>>),
    Connected(ConnectOutcome<C>),
    Outgoing(OutgoingReport),
    HeartbeatTick,
    AttemptTimeout,
    RetryDue,
    AckDue,
    AckTimeout,
}

pub(crate) struct Driver<S: Signaling> {
    signaling: Arc<S>,
    config: SessionConfig,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    local_id_tx: watch::Sender<Option<String>>,
    events_tx: mpsc::Sender<SessionEvent>,
    chat: ChatLog,

    role: Option<Role>,
    handle: Option<Arc<S::Handle>>,
    signaling_events: Option<mpsc::UnboundedReceiver<SignalingEvent<ChannelOf<S>>>>,
    remote_id: Option<String>,
    join_reply: Option<Reply<()>>,

    link: Option<Link<ChannelOf<S>>>,
    attempt: u32,
    generation: u64,
    connect_task: Option<JoinHandle<()>>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome<ChannelOf<S>>>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome<ChannelOf<S>>>,
    attempt_deadline: Option<Pin<Box<Sleep>>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: HeartbeatMonitor,

    outgoing: Option<OutgoingTransfer>,
    outgoing_cancel: Option<CancellationToken>,
    /// Deadline for the peer to acknowledge an announced transfer.
    ack_deadline: Option<Pin<Box<Sleep>>>,
    reports_tx: mpsc::UnboundedSender<OutgoingReport>,
    reports_rx: mpsc::UnboundedReceiver<OutgoingReport>,
    incoming: IncomingAssembler,
    pending_ack: Option<(String, Pin<Box<Sleep>>)>,
}

/// Channels connecting a driver to its session handle.
pub(crate) struct DriverLinks {
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) cancel: CancellationToken,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) local_id_tx: watch::Sender<Option<String>>,
    pub(crate) events_tx: mpsc::Sender<SessionEvent>,
    pub(crate) chat: ChatLog,
}

async fn recv_opt<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(sleep: Option<&mut Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

impl<S: Signaling> Driver<S> {
    pub(crate) fn new(signaling: S, config: SessionConfig, links: DriverLinks) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval, config.liveness_timeout);
        let incoming = IncomingAssembler::new(config.progress_interval);

        Self {
            signaling: Arc::new(signaling),
            config,
            commands: links.commands,
            cancel: links.cancel,
            state_tx: links.state_tx,
            local_id_tx: links.local_id_tx,
            events_tx: links.events_tx,
            chat: links.chat,
            role: None,
            handle: None,
            signaling_events: None,
            remote_id: None,
            join_reply: None,
            link: None,
            attempt: 0,
            generation: 0,
            connect_task: None,
            connect_tx,
            connect_rx,
            attempt_deadline: None,
            retry_timer: None,
            heartbeat,
            outgoing: None,
            outgoing_cancel: None,
            ack_deadline: None,
            reports_tx,
            reports_rx,
            incoming,
            pending_ack: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("session driver started");

        loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Input::Command(cmd),
                    None => break,
                },
                event = recv_opt(self.link.as_mut().map(|l| &mut l.events)) => Input::Channel(event),
                event = recv_opt(self.signaling_events.as_mut()) => Input::Signaling(event),
                Some(outcome) = self.connect_rx.recv() => Input::Connected(outcome),
                Some(report) = self.reports_rx.recv() => Input::Outgoing(report),
                () = self.heartbeat.tick() => Input::HeartbeatTick,
                () = sleep_opt(self.attempt_deadline.as_mut()) => Input::AttemptTimeout,
                () = sleep_opt(self.retry_timer.as_mut()) => Input::RetryDue,
                () = sleep_opt(self.pending_ack.as_mut().map(|(_, s)| s)) => Input::AckDue,
                () = sleep_opt(self.ack_deadline.as_mut()) => Input::AckTimeout,
            };

            self.dispatch(input).await;
        }

        self.release("session closed");
        self.finish_join(Err(SessionError::Exited));
        self.set_state(SessionState::Idle);
        debug!("session driver stopped");
    }

    async fn dispatch(&mut self, input: Input<ChannelOf<S>>) {
        match input {
            Input::Command(cmd) => self.on_command(cmd).await,
            Input::Channel(Some(event)) => self.on_channel_event(event),
            Input::Channel(None) => self.on_channel_lost("channel event stream ended"),
            Input::Signaling(Some(event)) => self.on_signaling_event(event),
            Input::Signaling(None) => {
                debug!("signaling event stream ended");
                self.signaling_events = None;
            }
            Input::Connected(outcome) => self.on_connect_outcome(outcome),
            Input::Outgoing(report) => self.on_outgoing_report(report),
            Input::HeartbeatTick => self.on_heartbeat_tick(),
            Input::AttemptTimeout => {
                self.attempt_deadline = None;
                self.on_attempt_timeout();
            }
            Input::RetryDue => {
                self.retry_timer = None;
                self.begin_attempt(self.attempt + 1);
            }
            Input::AckDue => {
                if let Some((id, _)) = self.pending_ack.take() {
                    self.send_control(&ControlMessage::AckFileStart(Some(id)));
                }
            }
            Input::AckTimeout => {
                self.ack_deadline = None;
                self.on_ack_timeout();
            }
        }
    }

    // -----------------------------------------------------------------------
    // State and events
    // -----------------------------------------------------------------------

    fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = self.state();
        if previous == state {
            return;
        }
        info!(from = %previous, to = %state, "session state changed");
        self.state_tx.send_replace(state.clone());
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "session event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("session event receiver dropped");
            }
        }
    }

    fn finish_join(&mut self, result: Result<(), SessionError>) {
        if let Some(reply) = self.join_reply.take() {
            let _ = reply.send(result);
        }
    }

    /// Sends a control message on the current channel.
    fn send_control(&self, msg: &ControlMessage) -> bool {
        let Some(link) = &self.link else {
            debug!(msg_type = ?msg.msg_type(), "no channel, control message not sent");
            return false;
        };
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode control message");
                return false;
            }
        };
        match link.channel.send(Frame::Text(text)) {
            Ok(()) => {
                trace!(msg_type = ?msg.msg_type(), "control message sent");
                true
            }
            Err(e) => {
                warn!(msg_type = ?msg.msg_type(), error = %e, "failed to send control message");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartHost { label, reply } => {
                let result = self.start_host(label).await;
                let _ = reply.send(result);
            }
            Command::Join { remote, reply } => self.join(remote, reply).await,
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(text));
            }
            Command::SendFile { source, reply } => {
                let _ = reply.send(self.send_file(source));
            }
            Command::Exit { reply } => {
                self.exit();
                let _ = reply.send(());
            }
        }
    }

    fn prepare_start(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if !state.is_restartable() {
            return Err(SessionError::AlreadyStarted(state));
        }
        if state != SessionState::Idle {
            self.release("session restarted");
            self.set_state(SessionState::Idle);
        }
        Ok(())
    }

    async fn start_host(&mut self, label: Option<String>) -> Result<String, SessionError> {
        self.prepare_start()?;
        let label = label.as_deref().map(normalize_peer_id).transpose()?;

        let signaling = Arc::clone(&self.signaling);
        let opened = match signaling.open_as_host(label.as_deref()).await {
            Err(SignalingError::IdConflict(id)) => {
                warn!(id = %id, "room id taken, retrying with a generated id");
                signaling.open_as_host(None).await
            }
            other => other,
        };

        match opened {
            Ok(link) => {
                let id = self.install_signaling(Role::Host, link);
                self.set_state(SessionState::SignalingUp);
                self.set_state(SessionState::AwaitingRemote);
                Ok(id)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    async fn join(&mut self, remote: String, reply: Reply<()>) {
        if let Err(e) = self.prepare_start() {
            let _ = reply.send(Err(e));
            return;
        }
        let remote = match normalize_peer_id(&remote) {
            Ok(remote) => remote,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let signaling = Arc::clone(&self.signaling);
        let link = match signaling.open_as_guest().await {
            Ok(link) => link,
            Err(e) => {
                let err = self.fail(e.into());
                let _ = reply.send(Err(err));
                return;
            }
        };

        if link.handle.local_id() == remote {
            link.handle.close();
            let _ = reply.send(Err(SessionError::SelfConnection));
            return;
        }

        self.install_signaling(Role::Guest, link);
        self.remote_id = Some(remote);
        self.join_reply = Some(reply);
        self.set_state(SessionState::SignalingUp);
        self.begin_attempt(1);
    }

    fn install_signaling(&mut self, role: Role, link: SignalingLink<S::Handle>) -> String {
        let id = link.handle.local_id().to_string();
        info!(id = %id, ?role, "signaling handle opened");
        self.role = Some(role);
        self.handle = Some(Arc::new(link.handle));
        self.signaling_events = Some(link.events);
        self.local_id_tx.send_replace(Some(id.clone()));
        id
    }

    fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        if self.state() != SessionState::Live {
            return Err(SessionError::NotLive);
        }
        if !self.send_control(&ControlMessage::Text(text.clone())) {
            return Err(SessionError::SendFailed);
        }
        let record = ChatRecord::text(Party::Local, text);
        self.chat.push(record.clone());
        self.emit(SessionEvent::Message(record));
        Ok(())
    }

    fn send_file(&mut self, source: FileSource) -> Result<String, SessionError> {
        if self.state() != SessionState::Live {
            return Err(SessionError::NotLive);
        }
        if let Some(active) = self.outgoing.as_ref().filter(|t| t.is_active()) {
            return Err(SessionError::Busy(active.id().to_string()));
        }

        let transfer = OutgoingTransfer::announce(source);
        let meta = transfer.meta().clone();
        if !self.send_control(&ControlMessage::FileStart(meta.clone())) {
            return Err(SessionError::SendFailed);
        }

        info!(
            transfer = %meta.id,
            name = %meta.name,
            size = meta.size,
            "outgoing transfer announced"
        );
        let record = self.chat.push_transfer(&meta, TransferDirection::Outgoing);
        self.emit(SessionEvent::Message(record));
        self.outgoing = Some(transfer);
        self.ack_deadline = Some(Box::pin(tokio::time::sleep(
            self.config.retry.per_attempt_timeout,
        )));
        Ok(meta.id)
    }

    fn exit(&mut self) {
        if self.state() == SessionState::Idle && self.handle.is_none() {
            trace!("exit on idle session");
            return;
        }
        info!("leaving session");
        self.release("session exited");
        self.finish_join(Err(SessionError::Exited));
        self.set_state(SessionState::Idle);
    }

    // -----------------------------------------------------------------------
    // Connection attempts
    // -----------------------------------------------------------------------

    fn begin_attempt(&mut self, attempt: u32) {
        let (Some(handle), Some(remote)) = (self.handle.clone(), self.remote_id.clone()) else {
            return;
        };

        self.attempt = attempt;
        self.generation += 1;
        self.set_state(SessionState::Connecting { attempt });
        info!(remote = %remote, attempt, "connecting to peer");

        self.attempt_deadline = Some(Box::pin(tokio::time::sleep(
            self.config.retry.per_attempt_timeout,
        )));

        let tx = self.connect_tx.clone();
        let generation = self.generation;
        self.connect_task = Some(tokio::spawn(async move {
            let result = handle.connect(&remote).await;
            let _ = tx.send(ConnectOutcome { generation, result });
        }));
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome<ChannelOf<S>>) {
        let current = outcome.generation == self.generation
            && matches!(self.state(), SessionState::Connecting { .. })
            && self.link.is_none();
        if !current {
            if let Ok(conn) = outcome.result {
                debug!(remote = %conn.channel.remote_id(), "closing stale connection");
                conn.channel.close();
            }
            return;
        }

        self.connect_task = None;
        match outcome.result {
            Ok(conn) => {
                debug!(remote = %conn.channel.remote_id(), "channel established");
                self.link = Some(Link::new(conn));
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                let _ = self.fail(e.into());
            }
        }
    }

    fn on_attempt_timeout(&mut self) {
        let state = self.state();
        match self.role {
            Some(Role::Guest)
                if matches!(
                    state,
                    SessionState::Connecting { .. }
                        | SessionState::RawChannelOpen
                        | SessionState::Handshaking
                ) =>
            {
                self.attempt_failed("no response within the attempt timeout");
            }
            Some(Role::Host) if self.link.is_some() && state != SessionState::Live => {
                warn!("inbound channel did not complete the handshake in time");
                self.drop_link();
                self.set_state(SessionState::AwaitingRemote);
            }
            _ => {}
        }
    }

    fn attempt_failed(&mut self, reason: &str) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.generation += 1;
        self.attempt_deadline = None;
        self.drop_link();

        let max_attempts = self.config.retry.max_attempts;
        if self.attempt < max_attempts {
            let delay = self.config.retry.delay_for_attempt(self.attempt);
            warn!(
                attempt = self.attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason,
                "connection attempt failed, retrying"
            );
            self.emit(SessionEvent::Retrying {
                attempt: self.attempt + 1,
                max_attempts,
                delay,
            });
            self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
        } else {
            warn!(attempts = self.attempt, reason, "giving up on connection");
            let _ = self.fail(FailureReason::NoResponse {
                attempts: self.attempt,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    fn on_signaling_event(&mut self, event: SignalingEvent<ChannelOf<S>>) {
        match event {
            SignalingEvent::Status(status) => {
                info!(?status, "signaling link status");
                self.emit(SessionEvent::SignalingStatus(status));
            }
            SignalingEvent::Incoming(conn) => self.on_incoming(conn),
            SignalingEvent::Error(e) => {
                if self.state() == SessionState::Live {
                    warn!(error = %e, "signaling error while live, channel unaffected");
                } else {
                    warn!(error = %e, "signaling error");
                    let _ = self.fail(e.into());
                }
            }
        }
    }

    fn on_incoming(&mut self, conn: Connection<ChannelOf<S>>) {
        let remote = conn.channel.remote_id().to_string();
        let accept = self.role == Some(Role::Host)
            && self.link.is_none()
            && matches!(
                self.state(),
                SessionState::AwaitingRemote | SessionState::Disconnected
            );
        if !accept {
            warn!(remote = %remote, "rejecting inbound channel");
            conn.channel.close();
            return;
        }

        info!(remote = %remote, "inbound channel");
        self.link = Some(Link::new(conn));
        self.attempt_deadline = Some(Box::pin(tokio::time::sleep(
            self.config.retry.per_attempt_timeout,
        )));
    }

    // -----------------------------------------------------------------------
    // Channel
    // -----------------------------------------------------------------------

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_channel_open(),
            ChannelEvent::Data(frame) => match route(frame) {
                Inbound::Chunk(bytes) => self.on_chunk(bytes),
                Inbound::Control(msg) => self.on_control(msg),
                Inbound::Ignored => {}
            },
            ChannelEvent::Close => self.on_channel_lost("channel closed"),
            ChannelEvent::Error(e) => {
                warn!(error = %e, "channel error");
                self.on_channel_lost("channel error");
            }
        }
    }

    fn on_channel_open(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let send_ping = link.handshake.begin();
        debug!(remote = %link.channel.remote_id(), "channel open, starting handshake");

        self.set_state(SessionState::RawChannelOpen);
        if send_ping && self.send_control(&ControlMessage::Ping) {
            self.set_state(SessionState::Handshaking);
        }
    }

    fn on_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Ping => {
                self.send_control(&ControlMessage::Pong);
            }
            ControlMessage::Pong => self.on_pong(),
            ControlMessage::Text(text) => {
                let record = ChatRecord::text(Party::Remote, text);
                self.chat.push(record.clone());
                self.emit(SessionEvent::Message(record));
            }
            ControlMessage::FileStart(meta) => self.on_file_start(meta),
            ControlMessage::AckFileStart(id) => self.on_file_ack(id),
        }
    }

    fn on_pong(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.handshake.on_pong() {
            PongOutcome::Completed => self.go_live(),
            PongOutcome::Heartbeat => {
                trace!("heartbeat pong");
                self.heartbeat.record_pong();
            }
            PongOutcome::Unsolicited => debug!("ignoring pong before handshake"),
        }
    }

    fn go_live(&mut self) {
        self.attempt_deadline = None;
        if !self.heartbeat.is_running() {
            self.heartbeat.start();
        }
        if let Some(link) = &self.link {
            let remote = link.channel.remote_id().to_string();
            info!(remote = %remote, "session live");
            self.remote_id = Some(remote);
        }
        self.set_state(SessionState::Live);
        self.finish_join(Ok(()));
    }

    fn on_heartbeat_tick(&mut self) {
        let live = self.state() == SessionState::Live
            && self.link.as_ref().is_some_and(|l| l.handshake.is_complete());
        if !live {
            self.heartbeat.stop();
            return;
        }

        match self.heartbeat.check() {
            HeartbeatCheck::Alive => {
                self.send_control(&ControlMessage::Ping);
            }
            HeartbeatCheck::Expired { silent_for } => {
                warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    "no pong within liveness timeout"
                );
                self.on_channel_lost("liveness timeout");
            }
        }
    }

    /// Handles loss of the current channel, whatever the cause.
    fn on_channel_lost(&mut self, reason: &str) {
        if self.link.is_none() {
            return;
        }
        self.drop_link();
        self.heartbeat.stop();
        self.fail_transfers(reason);

        match self.state() {
            SessionState::Live => {
                warn!(reason, "session disconnected");
                self.set_state(SessionState::Disconnected);
            }
            SessionState::Connecting { .. }
            | SessionState::RawChannelOpen
            | SessionState::Handshaking => match self.role {
                Some(Role::Guest) => self.attempt_failed(reason),
                Some(Role::Host) => {
                    debug!(reason, "inbound channel lost before handshake");
                    self.attempt_deadline = None;
                    self.set_state(SessionState::AwaitingRemote);
                }
                None => {}
            },
            _ => {
                self.attempt_deadline = None;
            }
        }
    }

    fn drop_link(&mut self) {
        self.pending_ack = None;
        if let Some(link) = self.link.take() {
            link.channel.close();
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    fn on_file_start(&mut self, meta: FileMeta) {
        let id = meta.id.clone();
        match self.incoming.begin(meta.clone()) {
            Ok(done) => {
                let record = self.chat.push_transfer(&meta, TransferDirection::Incoming);
                self.emit(SessionEvent::Message(record));
                self.schedule_ack(id);
                if let Some(file) = done {
                    self.emit_progress(TransferProgress {
                        transfer_id: meta.id.clone(),
                        direction: TransferDirection::Incoming,
                        percent: 100,
                        bytes_transferred: 0,
                        total_bytes: 0,
                        bytes_per_second: 0.0,
                        status: TransferStatus::Completed,
                    });
                    self.emit(SessionEvent::FileReceived(file));
                }
            }
            Err(TransferError::Busy(active)) if active != id => {
                // The sender has moved on, so the incomplete transfer will
                // never finish. Fail it; the new one is still refused.
                warn!(
                    transfer = %id,
                    stale = %active,
                    "FILE_START while another transfer is incomplete"
                );
                if let Some(stale) = self.incoming.fail_active() {
                    self.transfer_failed(
                        stale.id,
                        TransferDirection::Incoming,
                        format!("interrupted by announcement of {id}"),
                    );
                }
            }
            Err(e) => warn!(transfer = %id, error = %e, "rejecting FILE_START"),
        }
    }

    fn schedule_ack(&mut self, id: String) {
        if self.config.ack_delay.is_zero() {
            self.send_control(&ControlMessage::AckFileStart(Some(id)));
        } else {
            let timer = Box::pin(tokio::time::sleep(self.config.ack_delay));
            self.pending_ack = Some((id, timer));
        }
    }

    fn on_chunk(&mut self, bytes: Vec<u8>) {
        let len = bytes.len();
        match self.incoming.push_chunk(bytes) {
            Ok(outcome) => {
                if let Some(progress) = outcome.progress {
                    self.emit_progress(progress);
                }
                if let Some(file) = outcome.completed {
                    info!(
                        transfer = %file.meta().id,
                        size = file.len(),
                        "incoming transfer completed"
                    );
                    self.chat
                        .update_transfer(&file.meta().id, None, TransferStatus::Completed);
                    self.emit(SessionEvent::FileReceived(file));
                }
            }
            Err(TransferError::NoActiveTransfer) => {
                warn!(len, "binary data without an active transfer, dropping");
            }
            Err(err) => match &err {
                TransferError::Overflow { id, .. } => {
                    let id = id.clone();
                    self.transfer_failed(id, TransferDirection::Incoming, err.to_string());
                }
                _ => warn!(error = %err, "failed to store chunk"),
            },
        }
    }

    fn on_file_ack(&mut self, id: Option<String>) {
        let Some(transfer) = self.outgoing.as_mut() else {
            warn!(?id, "ACK_FILE_START without an outgoing transfer");
            return;
        };
        if transfer.state() != OutgoingState::Announced {
            warn!(transfer = %transfer.id(), "unexpected ACK_FILE_START");
            return;
        }
        if let Some(id) = id.as_deref() {
            if id != transfer.id() {
                warn!(expected = %transfer.id(), got = %id, "ACK_FILE_START for unknown transfer");
                return;
            }
        }
        let Some(link) = &self.link else {
            return;
        };

        let source = match transfer.acknowledge() {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "cannot start streaming");
                return;
            }
        };

        debug!(transfer = %transfer.id(), "transfer acknowledged, streaming");
        self.ack_deadline = None;
        let cancel = self.cancel.child_token();
        self.outgoing_cancel = Some(cancel.clone());
        spawn_chunk_loop(
            link.channel.clone(),
            transfer.meta().clone(),
            source,
            self.config.stream_settings(),
            cancel,
            self.reports_tx.clone(),
        );
    }

    fn on_ack_timeout(&mut self) {
        let Some(transfer) = self
            .outgoing
            .as_mut()
            .filter(|t| t.state() == OutgoingState::Announced)
        else {
            return;
        };
        transfer.fail();
        let id = transfer.id().to_string();
        self.transfer_failed(
            id,
            TransferDirection::Outgoing,
            "peer did not acknowledge the file".into(),
        );
    }

    fn on_outgoing_report(&mut self, report: OutgoingReport) {
        let report_id = match &report {
            OutgoingReport::Progress(p) => p.transfer_id.as_str(),
            OutgoingReport::Completed { transfer_id } => transfer_id.as_str(),
            OutgoingReport::Failed { transfer_id, .. } => transfer_id.as_str(),
        };
        let Some(transfer) = self
            .outgoing
            .as_mut()
            .filter(|t| t.is_active() && t.id() == report_id)
        else {
            trace!(transfer = %report_id, "ignoring report for inactive transfer");
            return;
        };

        match report {
            OutgoingReport::Progress(progress) => {
                transfer.advance_to(progress.bytes_transferred);
                self.emit_progress(progress);
            }
            OutgoingReport::Completed { transfer_id } => {
                transfer.complete();
                self.outgoing_cancel = None;
                self.chat
                    .update_transfer(&transfer_id, None, TransferStatus::Completed);
            }
            OutgoingReport::Failed { transfer_id, error } => {
                if error.is_channel_level() {
                    debug!(transfer = %transfer_id, "chunk loop lost the channel");
                }
                transfer.fail();
                self.outgoing_cancel = None;
                self.transfer_failed(transfer_id, TransferDirection::Outgoing, error.to_string());
            }
        }
    }

    fn emit_progress(&mut self, progress: TransferProgress) {
        self.chat.update_transfer(
            &progress.transfer_id,
            Some(progress.percent),
            progress.status,
        );
        self.emit(SessionEvent::Progress(progress));
    }

    fn transfer_failed(&mut self, transfer_id: String, direction: TransferDirection, reason: String) {
        warn!(transfer = %transfer_id, ?direction, reason = %reason, "transfer failed");
        self.chat
            .update_transfer(&transfer_id, None, TransferStatus::Error);
        self.emit(SessionEvent::TransferFailed {
            transfer_id,
            direction,
            reason,
        });
    }

    /// Fails every transfer still in flight.
    fn fail_transfers(&mut self, reason: &str) {
        self.ack_deadline = None;
        if let Some(cancel) = self.outgoing_cancel.take() {
            cancel.cancel();
        }
        if let Some(transfer) = self.outgoing.as_mut().filter(|t| t.is_active()) {
            transfer.fail();
            let id = transfer.id().to_string();
            self.transfer_failed(id, TransferDirection::Outgoing, reason.to_string());
        }
        if let Some(meta) = self.incoming.fail_active() {
            self.transfer_failed(meta.id, TransferDirection::Incoming, reason.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Releases the channel, the signaling handle, timers and transfers.
    fn release(&mut self, reason: &str) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.generation += 1;
        self.attempt_deadline = None;
        self.retry_timer = None;
        self.heartbeat.stop();
        self.fail_transfers(reason);
        self.incoming.reset();
        self.drop_link();

        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.signaling_events = None;
        self.role = None;
        self.remote_id = None;
        self.attempt = 0;
        self.local_id_tx.send_replace(None);
    }

    /// Terminal failure: release everything and report `reason`.
    fn fail(&mut self, reason: FailureReason) -> SessionError {
        warn!(reason = %reason, "session failed");
        self.release("session failed");
        self.set_state(SessionState::Failed(reason.clone()));
        self.finish_join(Err(SessionError::Failed(reason.clone())));
        SessionError::Failed(reason)
    }
}
