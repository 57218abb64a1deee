//! Notifications raised by the coordinator, one per decision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lock::LockMode;
use crate::txn::{Age, Incarnation, TxnId};

/// Why an incarnation was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AbortReason {
    /// An older transaction needed one of its locks
    Wounded { by: TxnId },
    /// Abort issued by the caller
    Requested,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NotificationKind {
    Began {
        txn: TxnId,
        incarnation: Incarnation,
        age: Age,
    },
    LockGranted {
        txn: TxnId,
        item: String,
        mode: LockMode,
        upgraded: bool,
    },
    WaitEntered {
        txn: TxnId,
        item: String,
        mode: LockMode,
        /// Older holders the requester waits for
        blocked_by: Vec<TxnId>,
    },
    Wounded {
        wounder: TxnId,
        wounded: TxnId,
        item: String,
    },
    Aborted {
        txn: TxnId,
        incarnation: Incarnation,
        #[serde(flatten)]
        reason: AbortReason,
    },
    /// A suspended request was granted by the release path
    Resumed {
        txn: TxnId,
        item: String,
        mode: LockMode,
    },
    Committed {
        txn: TxnId,
        incarnation: Incarnation,
    },
    Restarted {
        txn: TxnId,
        from: Incarnation,
        to: Incarnation,
        age: Age,
    },
}

impl NotificationKind {
    /// Transaction the notification is about
    #[must_use]
    pub const fn txn(&self) -> TxnId {
        match self {
            Self::Began { txn, .. }
            | Self::LockGranted { txn, .. }
            | Self::WaitEntered { txn, .. }
            | Self::Aborted { txn, .. }
            | Self::Resumed { txn, .. }
            | Self::Committed { txn, .. }
            | Self::Restarted { txn, .. } => *txn,
            Self::Wounded { wounded, .. } => *wounded,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).map_err(|_| std::fmt::Error)?;
        let name = s.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
        write!(f, "{name}")
    }
}

/// A decision with its position in the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonic sequence number within one coordinator
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    #[must_use]
    pub fn new(seq: u64, kind: NotificationKind) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_uses_type_tag() {
        let kind = NotificationKind::Committed {
            txn: TxnId::new(1),
            incarnation: Incarnation::FIRST,
        };
        assert_eq!(kind.to_string(), "committed");
    }

    #[test]
    fn test_abort_serializes_reason_inline() -> Result<(), serde_json::Error> {
        let note = Notification::new(
            7,
            NotificationKind::Aborted {
                txn: TxnId::new(2),
                incarnation: Incarnation::FIRST,
                reason: AbortReason::Wounded { by: TxnId::new(1) },
            },
        );
        let value = serde_json::to_value(&note)?;
        assert_eq!(value["type"], "aborted");
        assert_eq!(value["reason"], "wounded");
        assert_eq!(value["by"], 1);
        assert_eq!(value["seq"], 7);

        let back: Notification = serde_json::from_value(value)?;
        assert_eq!(back.kind, note.kind);
        Ok(())
    }

    #[test]
    fn test_wounded_is_about_the_victim() {
        let kind = NotificationKind::Wounded {
            wounder: TxnId::new(1),
            wounded: TxnId::new(2),
            item: "x".to_string(),
        };
        assert_eq!(kind.txn(), TxnId::new(2));
    }
}
