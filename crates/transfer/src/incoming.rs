//! Incoming transfers: collect chunks against the announced size.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use peerlink_protocol::constants::PROGRESS_INTERVAL;
use peerlink_protocol::{
    FileMeta, TransferDirection, TransferProgress, TransferStatus, percent_of,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::artifact::ReceivedFile;
use crate::progress::{ProgressThrottle, SpeedCalculator};

#[derive(Debug)]
struct IncomingTransfer {
    meta: FileMeta,
    received: u64,
    chunks: Vec<Vec<u8>>,
    throttle: ProgressThrottle,
    speed: SpeedCalculator,
}

impl IncomingTransfer {
    fn progress(&self, status: TransferStatus) -> TransferProgress {
        TransferProgress {
            transfer_id: self.meta.id.clone(),
            direction: TransferDirection::Incoming,
            percent: percent_of(self.received, self.meta.size),
            bytes_transferred: self.received,
            total_bytes: self.meta.size,
            bytes_per_second: self.speed.bytes_per_second(),
            status,
        }
    }

    fn assemble(self) -> ReceivedFile {
        let mut data = Vec::with_capacity(self.received as usize);
        for chunk in self.chunks {
            data.extend_from_slice(&chunk);
        }
        ReceivedFile::new(self.meta, data)
    }
}

/// Result of feeding one chunk to the assembler.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Progress to propagate, if the throttle let it through.
    pub progress: Option<TransferProgress>,
    /// The finished artifact once the last byte arrived.
    pub completed: Option<ReceivedFile>,
}

/// Tracks the single incoming transfer of a session.
///
/// Transfers are keyed by id; the map never holds more than one entry, so a
/// second announcement while one is incomplete is rejected.
#[derive(Debug)]
pub struct IncomingAssembler {
    transfers: HashMap<String, IncomingTransfer>,
    /// Ids announced since the last [`reset`](Self::reset). Grows by one per
    /// transfer until the session is torn down.
    seen: HashSet<String>,
    progress_interval: Duration,
}

impl Default for IncomingAssembler {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

impl IncomingAssembler {
    pub fn new(progress_interval: Duration) -> Self {
        Self {
            transfers: HashMap::new(),
            seen: HashSet::new(),
            progress_interval,
        }
    }

    /// Returns the metadata of the transfer being received, if any.
    pub fn active(&self) -> Option<&FileMeta> {
        self.transfers.values().next().map(|t| &t.meta)
    }

    pub fn is_active(&self) -> bool {
        !self.transfers.is_empty()
    }

    /// Bytes received so far for the active transfer.
    pub fn received(&self) -> u64 {
        self.transfers.values().next().map_or(0, |t| t.received)
    }

    /// Starts tracking an announced transfer.
    ///
    /// An empty file is complete as soon as it is announced, in which case the
    /// artifact is returned directly.
    pub fn begin(&mut self, meta: FileMeta) -> Result<Option<ReceivedFile>, TransferError> {
        if let Some(active) = self.active() {
            return Err(TransferError::Busy(active.id.clone()));
        }
        if !self.seen.insert(meta.id.clone()) {
            return Err(TransferError::DuplicateId(meta.id));
        }

        info!(
            transfer = %meta.id,
            name = %meta.name,
            size = meta.size,
            "incoming transfer announced"
        );

        if meta.size == 0 {
            return Ok(Some(ReceivedFile::new(meta, Vec::new())));
        }

        let mut speed = SpeedCalculator::default();
        speed.add_sample(0);
        self.transfers.insert(
            meta.id.clone(),
            IncomingTransfer {
                meta,
                received: 0,
                chunks: Vec::new(),
                throttle: ProgressThrottle::new(self.progress_interval),
                speed,
            },
        );
        Ok(None)
    }

    /// Appends a binary chunk to the active transfer.
    ///
    /// A chunk that would exceed the announced size fails the transfer.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> Result<ChunkOutcome, TransferError> {
        let Some(id) = self.transfers.keys().next().cloned() else {
            return Err(TransferError::NoActiveTransfer);
        };
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return Err(TransferError::NoActiveTransfer);
        };

        let len = chunk.len() as u64;
        let received = transfer.received + len;
        if received > transfer.meta.size {
            let size = transfer.meta.size;
            self.transfers.remove(&id);
            warn!(transfer = %id, size, received, "incoming transfer overflowed");
            return Err(TransferError::Overflow { id, size, received });
        }

        transfer.received = received;
        transfer.chunks.push(chunk);
        transfer.speed.add_sample(len);

        let is_final = received == transfer.meta.size;
        let progress = if transfer.throttle.should_emit(Instant::now(), is_final) {
            let status = if is_final {
                TransferStatus::Completed
            } else {
                TransferStatus::Transferring
            };
            Some(transfer.progress(status))
        } else {
            None
        };

        let completed = if is_final {
            self.transfers.remove(&id).map(|t| {
                debug!(transfer = %id, size = t.meta.size, "incoming transfer assembled");
                t.assemble()
            })
        } else {
            None
        };

        Ok(ChunkOutcome {
            progress,
            completed,
        })
    }

    /// Drops the active transfer, returning its metadata.
    ///
    /// Used when the channel goes away mid-transfer.
    pub fn fail_active(&mut self) -> Option<FileMeta> {
        let id = self.transfers.keys().next().cloned()?;
        let transfer = self.transfers.remove(&id)?;
        warn!(
            transfer = %id,
            received = transfer.received,
            size = transfer.meta.size,
            "incoming transfer aborted"
        );
        Some(transfer.meta)
    }

    /// Forgets every transfer, including the ids already used.
    ///
    /// Returns the metadata of a transfer that was still incomplete.
    pub fn reset(&mut self) -> Option<FileMeta> {
        let stale = self.fail_active();
        self.seen.clear();
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, size: u64) -> FileMeta {
        FileMeta {
            id: id.into(),
            name: "a.bin".into(),
            size,
            mime_type: "application/octet-stream".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_chunks_report_thirds() {
        let mut assembler = IncomingAssembler::default();
        assert!(assembler.begin(meta("t1", 196_608)).unwrap().is_none());

        let mut percents = Vec::new();
        let mut artifact = None;
        for i in 0..3u8 {
            let outcome = assembler.push_chunk(vec![i; 65_536]).unwrap();
            percents.push(outcome.progress.map(|p| p.percent));
            artifact = outcome.completed;
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        assert_eq!(percents, vec![Some(33), Some(66), Some(100)]);
        let file = artifact.unwrap();
        assert_eq!(file.len(), 196_608);
        assert_eq!(file.data()[65_536], 1);
        assert!(!assembler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_throttled_but_final_passes() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 4)).unwrap();

        assert!(assembler.push_chunk(vec![0]).unwrap().progress.is_some());
        assert!(assembler.push_chunk(vec![0]).unwrap().progress.is_none());
        assert!(assembler.push_chunk(vec![0]).unwrap().progress.is_none());
        let last = assembler.push_chunk(vec![0]).unwrap();
        assert_eq!(last.progress.unwrap().percent, 100);
        assert!(last.completed.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_announcement_is_rejected() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 10)).unwrap();
        assembler.push_chunk(vec![0; 4]).unwrap();

        let err = assembler.begin(meta("t2", 10)).unwrap_err();
        assert!(matches!(err, TransferError::Busy(ref id) if id == "t1"));

        // The in-flight transfer is untouched.
        assert_eq!(assembler.received(), 4);
        let done = assembler.push_chunk(vec![0; 6]).unwrap();
        assert_eq!(done.completed.unwrap().meta().id, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_ids_are_never_reused() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 1)).unwrap();
        assembler.push_chunk(vec![9]).unwrap();

        let err = assembler.begin(meta("t1", 1)).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateId(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_fails_the_transfer() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 5)).unwrap();
        assembler.push_chunk(vec![0; 3]).unwrap();

        let err = assembler.push_chunk(vec![0; 3]).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Overflow {
                size: 5,
                received: 6,
                ..
            }
        ));
        assert!(!assembler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_without_transfer() {
        let mut assembler = IncomingAssembler::default();
        assert!(matches!(
            assembler.push_chunk(vec![1, 2]),
            Err(TransferError::NoActiveTransfer)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_file_completes_on_announce() {
        let mut assembler = IncomingAssembler::default();
        let file = assembler.begin(meta("empty", 0)).unwrap().unwrap();
        assert!(file.is_empty());
        assert!(!assembler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_active_clears_state() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 10)).unwrap();
        assembler.push_chunk(vec![0; 2]).unwrap();

        assert_eq!(assembler.fail_active().unwrap().id, "t1");
        assert!(assembler.fail_active().is_none());
        assert!(assembler.begin(meta("t2", 1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_used_ids() {
        let mut assembler = IncomingAssembler::default();
        assembler.begin(meta("t1", 1)).unwrap();
        assembler.push_chunk(vec![1]).unwrap();
        assembler.begin(meta("t2", 10)).unwrap();

        assert_eq!(assembler.reset().unwrap().id, "t2");
        assert!(!assembler.is_active());
        assert!(assembler.reset().is_none());
        assert!(assembler.begin(meta("t1", 1)).is_ok());
    }
}
