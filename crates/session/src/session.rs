//! Public handle over the session driver.

use peerlink_channel::Signaling;
use peerlink_transfer::FileSource;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::SessionError;
use crate::chat::ChatLog;
use crate::config::SessionConfig;
use crate::driver::{Command, Driver, DriverLinks};
use crate::types::{SessionEvent, SessionState};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 1024;

/// A peer session.
///
/// Cheap operations read shared state directly; everything else is a
/// command executed by the driver task in order. Dropping the session stops
/// the driver, which closes the channel and leaves the signaling service.
pub struct Session {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<SessionState>,
    local_id_rx: watch::Receiver<Option<String>>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    chat: ChatLog,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session and spawns its driver. Must be called inside a
    /// tokio runtime.
    pub fn new<S: Signaling>(signaling: S, config: SessionConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (local_id_tx, local_id_rx) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let chat = ChatLog::new();
        let cancel = CancellationToken::new();

        let driver = Driver::new(
            signaling,
            config,
            DriverLinks {
                commands: commands_rx,
                cancel: cancel.clone(),
                state_tx,
                local_id_tx,
                events_tx,
                chat: chat.clone(),
            },
        );
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            state_rx,
            local_id_rx,
            events_rx: Mutex::new(Some(events_rx)),
            chat,
            cancel,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Registers as a host and returns the id guests should join.
    ///
    /// With `label` the id is the normalized label; if it is taken, a
    /// generated id is used instead.
    pub async fn start_as_host(&self, label: Option<&str>) -> Result<String, SessionError> {
        let label = label.map(str::to_string);
        self.request(|reply| Command::StartHost { label, reply })
            .await
    }

    /// Connects to the host at `remote_id`. Resolves once the session is
    /// live, or with the failure that ended the attempts.
    pub async fn join_as_guest(&self, remote_id: &str) -> Result<(), SessionError> {
        let remote = remote_id.to_string();
        self.request(|reply| Command::Join { remote, reply }).await
    }

    /// Sends a chat message to the peer.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await
    }

    /// Announces a file to the peer and returns the transfer id. Bytes are
    /// streamed once the peer acknowledges.
    pub async fn send_file(&self, source: FileSource) -> Result<String, SessionError> {
        self.request(|reply| Command::SendFile { source, reply })
            .await
    }

    /// Tears the session down and returns it to idle. Idempotent.
    pub async fn exit(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Exit { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Waits until the state satisfies `pred` and returns that state.
    pub async fn wait_for_state(
        &self,
        mut pred: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState, SessionError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(state.clone())
    }

    /// Takes the event receiver. Only the first call returns `Some`.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// The id this session is registered under, if any.
    pub fn local_id(&self) -> Option<String> {
        self.local_id_rx.borrow().clone()
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
