use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a transfer flows relative to this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Outgoing,
    Incoming,
}

/// Presentation status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Transferring,
    Completed,
    Error,
}

/// Progress snapshot for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub direction: TransferDirection,
    pub percent: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    pub status: TransferStatus,
}

/// Whole-number percentage of `done` out of `total`, rounded down.
///
/// Only reaches 100 when `done == total`. An empty transfer is complete.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u128::from(done.min(total)) * 100) / u128::from(total);
    pct as u8
}

/// Author of a chat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Local,
    Remote,
}

/// One entry of the session's chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChatRecord {
    #[serde(rename_all = "camelCase")]
    Text {
        sender: Party,
        content: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    FileProgress {
        transfer_id: String,
        name: String,
        size: u64,
        direction: TransferDirection,
        percent: u8,
        status: TransferStatus,
    },
}

impl ChatRecord {
    /// Creates a text record stamped with the current time.
    pub fn text(sender: Party, content: impl Into<String>) -> Self {
        Self::Text {
            sender,
            content: content.into(),
            at: Utc::now(),
        }
    }

    /// Returns the transfer id for file records.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::FileProgress { transfer_id, .. } => Some(transfer_id),
            Self::Text { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down() {
        assert_eq!(percent_of(65_536, 196_608), 33);
        assert_eq!(percent_of(131_072, 196_608), 66);
        assert_eq!(percent_of(196_608, 196_608), 100);
    }

    #[test]
    fn percent_hits_100_only_at_total() {
        assert_eq!(percent_of(999, 1000), 99);
        assert_eq!(percent_of(1000, 1000), 100);
        assert_eq!(percent_of(u64::MAX - 1, u64::MAX), 99);
    }

    #[test]
    fn percent_of_empty_transfer() {
        assert_eq!(percent_of(0, 0), 100);
    }

    #[test]
    fn transfer_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TransferStatus::Transferring).unwrap(),
            "\"transferring\""
        );
        assert_eq!(
            serde_json::to_string(&TransferDirection::Incoming).unwrap(),
            "\"incoming\""
        );
    }

    #[test]
    fn chat_record_tagged_by_kind() {
        let record = ChatRecord::FileProgress {
            transfer_id: "t1".into(),
            name: "a.bin".into(),
            size: 3,
            direction: TransferDirection::Outgoing,
            percent: 0,
            status: TransferStatus::Transferring,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "fileProgress");
        assert_eq!(json["transferId"], "t1");
        assert_eq!(record.transfer_id(), Some("t1"));
    }

    #[test]
    fn text_record_has_no_transfer_id() {
        let record = ChatRecord::text(Party::Remote, "hello");
        assert!(record.transfer_id().is_none());
    }
}
