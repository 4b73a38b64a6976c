use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(TransferId);
id_newtype!(OutletId);
id_newtype!(UserId);

/// Product identifier as issued by the point-of-sale backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub Uuid);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a transfer.
///
/// ```text
/// OPEN → PACKED → IN_TRANSIT → RECEIVED
///   \        \
///    `--------`→ DELETED
/// ```
///
/// Transitions only move forward. `DELETED` is reachable from `OPEN` and
/// `PACKED` only, and also marks transfers retired by a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Open,
    Packed,
    InTransit,
    Received,
    Deleted,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Packed => "PACKED",
            Self::InTransit => "IN_TRANSIT",
            Self::Received => "RECEIVED",
            Self::Deleted => "DELETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "PACKED" => Some(Self::Packed),
            "IN_TRANSIT" => Some(Self::InTransit),
            "RECEIVED" => Some(Self::Received),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Received | Self::Deleted)
    }

    /// Sending-side line edits are only valid while still open.
    pub fn allows_line_edits(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn allows_delete(&self) -> bool {
        matches!(self, Self::Open | Self::Packed)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transfer sits in `DELETED`: a manual delete, or retirement by a
/// merge (audit needs the two kept apart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletedReason {
    Manual,
    Merged,
}

impl DeletedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Merged => "merged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

/// A single product entry within a transfer.
///
/// `qty_counted` is only meaningful once the transfer is `PACKED`;
/// `qty_received_counted` once receiving has begun. The stock snapshots are
/// advisory values captured from the inventory collaborator at add/view time,
/// never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub qty_planned: i64,
    pub qty_counted: Option<i64>,
    pub qty_received_counted: Option<i64>,
    pub stock_at_source: Option<i64>,
    pub stock_at_destination: Option<i64>,
    pub manually_added: bool,
}

impl TransferLine {
    /// Lines with no planned quantity and no manual flag are excluded from
    /// the working set (and never persisted).
    pub fn is_active(&self) -> bool {
        self.qty_planned > 0 || self.manually_added
    }
}

/// A shipment of product lines between two outlets. The outlet pair is
/// immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub source_outlet_id: OutletId,
    pub destination_outlet_id: OutletId,
    pub status: TransferStatus,
    pub created_by: UserId,
    pub packed_by: Option<UserId>,
    pub received_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub packed_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub packing_notes: Option<String>,
    pub delivery_notes: Option<String>,
    pub tracking_code: Option<String>,
    pub deleted_reason: Option<DeletedReason>,
    pub merged_into: Option<TransferId>,
    pub lines: Vec<TransferLine>,
}

impl Transfer {
    /// The working set: lines that count toward packing and reconciliation.
    pub fn active_lines(&self) -> impl Iterator<Item = &TransferLine> {
        self.lines.iter().filter(|l| l.is_active())
    }
}

/// Read-only projection of another `OPEN` transfer sharing both outlet
/// endpoints with the subject transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub transfer_id: TransferId,
    pub destination_outlet_name: String,
    pub line_count: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in &[
            TransferStatus::Open,
            TransferStatus::Packed,
            TransferStatus::InTransit,
            TransferStatus::Received,
            TransferStatus::Deleted,
        ] {
            let json = serde_json::to_string(s).expect("serialize");
            let back: TransferStatus = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(*s, back);
            assert_eq!(TransferStatus::from_str(s.as_str()), Some(*s));
        }
    }

    #[test]
    fn status_predicates() {
        assert!(TransferStatus::Open.allows_line_edits());
        assert!(!TransferStatus::Packed.allows_line_edits());
        assert!(TransferStatus::Open.allows_delete());
        assert!(TransferStatus::Packed.allows_delete());
        assert!(!TransferStatus::InTransit.allows_delete());
        assert!(TransferStatus::Received.is_terminal());
        assert!(TransferStatus::Deleted.is_terminal());
        assert!(!TransferStatus::InTransit.is_terminal());
    }

    #[test]
    fn zero_planned_unflagged_line_is_inactive() {
        let line = TransferLine {
            product_id: ProductId(Uuid::nil()),
            product_name: "Test".into(),
            qty_planned: 0,
            qty_counted: None,
            qty_received_counted: None,
            stock_at_source: None,
            stock_at_destination: None,
            manually_added: false,
        };
        assert!(!line.is_active());

        let manually_added = TransferLine {
            manually_added: true,
            ..line
        };
        assert!(manually_added.is_active());
    }
}
