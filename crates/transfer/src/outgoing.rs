//! Outgoing transfers: announce, wait for the ack, then stream chunks.

use std::time::Duration;

use peerlink_channel::{Channel, Frame};
use peerlink_protocol::constants::{
    BACKPRESSURE_POLL, BUFFERED_AMOUNT_HIGH, CHUNK_SIZE, PROGRESS_INTERVAL,
};
use peerlink_protocol::{
    FileMeta, TransferDirection, TransferProgress, TransferStatus, percent_of,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::TransferError;
use crate::progress::{ProgressThrottle, SpeedCalculator};
use crate::source::FileSource;

/// Lifecycle of an outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    /// `FILE_START` sent, waiting for `ACK_FILE_START`.
    Announced,
    Streaming,
    Completed,
    Failed,
}

/// The one outgoing transfer a session may have in flight.
#[derive(Debug)]
pub struct OutgoingTransfer {
    meta: FileMeta,
    source: Option<FileSource>,
    state: OutgoingState,
    offset: u64,
}

impl OutgoingTransfer {
    /// Records a freshly announced transfer.
    pub fn announce(source: FileSource) -> Self {
        let meta = FileMeta::new(source.name(), source.size(), source.mime_type());
        Self {
            meta,
            source: Some(source),
            state: OutgoingState::Announced,
            offset: 0,
        }
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn state(&self) -> OutgoingState {
        self.state
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// `true` while announced or streaming.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            OutgoingState::Announced | OutgoingState::Streaming
        )
    }

    /// Accepts the acknowledgement and hands back the source for streaming.
    pub fn acknowledge(&mut self) -> Result<FileSource, TransferError> {
        match (self.state, self.source.take()) {
            (OutgoingState::Announced, Some(source)) => {
                self.state = OutgoingState::Streaming;
                Ok(source)
            }
            (_, source) => {
                self.source = source;
                Err(TransferError::NotAnnounced(self.meta.id.clone()))
            }
        }
    }

    /// Records bytes reported sent by the chunk loop.
    pub fn advance_to(&mut self, offset: u64) {
        self.offset = self.offset.max(offset.min(self.meta.size));
    }

    pub fn complete(&mut self) {
        self.offset = self.meta.size;
        self.state = OutgoingState::Completed;
    }

    pub fn fail(&mut self) {
        if self.is_active() {
            self.state = OutgoingState::Failed;
            self.source = None;
        }
    }
}

/// Tunables for the chunk loop.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub chunk_size: usize,
    pub buffered_amount_high: u64,
    pub backpressure_poll: Duration,
    pub progress_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            buffered_amount_high: BUFFERED_AMOUNT_HIGH,
            backpressure_poll: BACKPRESSURE_POLL,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// What the chunk loop reports back to its owner.
#[derive(Debug)]
pub enum OutgoingReport {
    Progress(TransferProgress),
    Completed { transfer_id: String },
    Failed { transfer_id: String, error: TransferError },
}

/// Waits until the channel's send queue is at or below `high`.
///
/// Wakes on the channel's drain notification and re-checks every `poll`
/// regardless, so adapters without a drain signal still make progress.
pub async fn wait_for_buffer_space<C: Channel>(
    channel: &C,
    high: u64,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let mut paused_at: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !channel.is_open() {
            return Err(TransferError::ChannelClosed);
        }

        let buffered = channel.buffered_amount();
        if buffered <= high {
            if let Some(since) = paused_at {
                trace!(buffered, paused_ms = since.elapsed().as_millis() as u64, "send queue drained");
            }
            return Ok(());
        }

        if paused_at.is_none() {
            debug!(buffered, high, "send queue above high-water mark, pausing");
            paused_at = Some(Instant::now());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = channel.drained() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Spawns the chunk loop for an acknowledged transfer.
///
/// The loop stops on completion, on error, or when `cancel` fires. A
/// cancelled loop reports nothing; its owner already knows why it stopped.
pub fn spawn_chunk_loop<C: Channel>(
    channel: C,
    meta: FileMeta,
    source: FileSource,
    settings: StreamSettings,
    cancel: CancellationToken,
    reports: mpsc::UnboundedSender<OutgoingReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let transfer_id = meta.id.clone();
        match run_chunk_loop(&channel, &meta, source, &settings, &cancel, &reports).await {
            Ok(()) => {
                info!(transfer = %transfer_id, size = meta.size, "outgoing transfer completed");
                let _ = reports.send(OutgoingReport::Completed { transfer_id });
            }
            Err(TransferError::Cancelled) => {
                debug!(transfer = %transfer_id, "chunk loop cancelled");
            }
            Err(error) => {
                warn!(transfer = %transfer_id, error = %error, "outgoing transfer failed");
                let _ = reports.send(OutgoingReport::Failed { transfer_id, error });
            }
        }
    })
}

async fn run_chunk_loop<C: Channel>(
    channel: &C,
    meta: &FileMeta,
    mut source: FileSource,
    settings: &StreamSettings,
    cancel: &CancellationToken,
    reports: &mpsc::UnboundedSender<OutgoingReport>,
) -> Result<(), TransferError> {
    let mut throttle = ProgressThrottle::new(settings.progress_interval);
    let mut speed = SpeedCalculator::default();
    let mut offset = 0u64;

    speed.add_sample(0);
    debug!(transfer = %meta.id, size = meta.size, "streaming started");

    while offset < meta.size {
        wait_for_buffer_space(
            channel,
            settings.buffered_amount_high,
            settings.backpressure_poll,
            cancel,
        )
        .await?;

        let chunk = source.read_chunk(settings.chunk_size).await?;
        let len = chunk.len() as u64;

        // The channel may have closed while the read was in progress.
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        channel.send(Frame::Binary(chunk))?;

        offset += len;
        speed.add_sample(len);
        trace!(transfer = %meta.id, offset, "chunk sent");

        let is_final = offset == meta.size;
        if throttle.should_emit(Instant::now(), is_final) {
            let _ = reports.send(OutgoingReport::Progress(progress(
                meta,
                offset,
                speed.bytes_per_second(),
            )));
        }

        tokio::task::yield_now().await;
    }

    if meta.size == 0 {
        let _ = reports.send(OutgoingReport::Progress(progress(meta, 0, 0.0)));
    }

    Ok(())
}

fn progress(meta: &FileMeta, offset: u64, bytes_per_second: f64) -> TransferProgress {
    let status = if offset >= meta.size {
        TransferStatus::Completed
    } else {
        TransferStatus::Transferring
    };
    TransferProgress {
        transfer_id: meta.id.clone(),
        direction: TransferDirection::Outgoing,
        percent: percent_of(offset, meta.size),
        bytes_transferred: offset,
        total_bytes: meta.size,
        bytes_per_second,
        status,
    }
}
