//! The session's chat log: text messages and file-transfer records.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use peerlink_protocol::{ChatRecord, FileMeta, TransferDirection, TransferStatus};

/// Append-only chat log shared between a session and its driver.
///
/// File records are updated in place as their transfer progresses; once a
/// record reaches `completed` or `error` it no longer changes.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    records: Arc<RwLock<Vec<ChatRecord>>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ChatRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChatRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Vec<ChatRecord> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn push(&self, record: ChatRecord) {
        self.write().push(record);
    }

    /// Appends a file record in the `transferring` state and returns it.
    pub(crate) fn push_transfer(&self, meta: &FileMeta, direction: TransferDirection) -> ChatRecord {
        let record = ChatRecord::FileProgress {
            transfer_id: meta.id.clone(),
            name: meta.name.clone(),
            size: meta.size,
            direction,
            percent: 0,
            status: TransferStatus::Transferring,
        };
        self.push(record.clone());
        record
    }

    /// Updates the record of `transfer_id`. `percent` never moves backwards.
    pub(crate) fn update_transfer(
        &self,
        transfer_id: &str,
        new_percent: Option<u8>,
        new_status: TransferStatus,
    ) {
        let mut records = self.write();
        let record = records
            .iter_mut()
            .rev()
            .find(|r| r.transfer_id() == Some(transfer_id));

        if let Some(ChatRecord::FileProgress {
            percent, status, ..
        }) = record
        {
            if *status != TransferStatus::Transferring {
                return;
            }
            if let Some(p) = new_percent {
                *percent = (*percent).max(p);
            }
            if new_status == TransferStatus::Completed {
                *percent = 100;
            }
            *status = new_status;
        }
    }
}

#[cfg(test)]
mod tests {
    use peerlink_protocol::Party;

    use super::*;

    fn meta(id: &str) -> FileMeta {
        FileMeta {
            id: id.into(),
            name: "a.bin".into(),
            size: 10,
            mime_type: "application/octet-stream".into(),
        }
    }

    fn status_of(log: &ChatLog, id: &str) -> (u8, TransferStatus) {
        log.snapshot()
            .into_iter()
            .find_map(|r| match r {
                ChatRecord::FileProgress {
                    transfer_id,
                    percent,
                    status,
                    ..
                } if transfer_id == id => Some((percent, status)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn records_are_ordered() {
        let log = ChatLog::new();
        log.push(ChatRecord::text(Party::Local, "hi"));
        log.push_transfer(&meta("t1"), TransferDirection::Outgoing);
        log.push(ChatRecord::text(Party::Remote, "hey"));

        let records = log.snapshot();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], ChatRecord::Text { .. }));
        assert_eq!(records[1].transfer_id(), Some("t1"));
    }

    #[test]
    fn transfer_record_tracks_status() {
        let log = ChatLog::new();
        log.push_transfer(&meta("t1"), TransferDirection::Incoming);

        log.update_transfer("t1", Some(40), TransferStatus::Transferring);
        assert_eq!(status_of(&log, "t1"), (40, TransferStatus::Transferring));

        log.update_transfer("t1", Some(20), TransferStatus::Transferring);
        assert_eq!(status_of(&log, "t1"), (40, TransferStatus::Transferring));

        log.update_transfer("t1", None, TransferStatus::Completed);
        assert_eq!(status_of(&log, "t1"), (100, TransferStatus::Completed));
    }

    #[test]
    fn terminal_status_is_final() {
        let log = ChatLog::new();
        log.push_transfer(&meta("t1"), TransferDirection::Outgoing);
        log.update_transfer("t1", Some(50), TransferStatus::Error);
        log.update_transfer("t1", Some(100), TransferStatus::Completed);
        assert_eq!(status_of(&log, "t1"), (50, TransferStatus::Error));
    }

    #[test]
    fn unknown_transfer_is_ignored() {
        let log = ChatLog::new();
        log.update_transfer("nope", Some(10), TransferStatus::Completed);
        assert!(log.is_empty());
    }
}
