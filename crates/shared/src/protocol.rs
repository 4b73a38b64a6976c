use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MergeCandidate, OutletId, ProductId, Transfer, TransferId};

/// One product count as submitted by staff at pack or receive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineCount {
    pub product_id: ProductId,
    pub qty: i64,
}

/// Parcel description forwarded to the shipping collaborator when a label
/// is booked at pack time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    pub weight_grams: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_mm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_mm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_mm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPackPayload {
    pub counts: Vec<LineCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packing_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    /// When present, a courier label is booked and the resulting tracking
    /// code recorded; booking failures never fail the commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivePayload {
    pub counts: Vec<LineCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteTransferPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePayload {
    pub other_transfer_id: TransferId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProductPayload {
    pub keyword: String,
    pub outlet_id: OutletId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddProductPayload {
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(default)]
    pub qty_planned: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveProductPayload {
    pub product_id: ProductId,
}

/// The single-action envelope posted to the gateway. Exactly one field must
/// be present; the gateway rejects anything else as malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionEnvelope {
    #[serde(rename = "commitPack", default, skip_serializing_if = "Option::is_none")]
    pub commit_pack: Option<CommitPackPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive: Option<ReceivePayload>,
    #[serde(rename = "deleteTransfer", default, skip_serializing_if = "Option::is_none")]
    pub delete_transfer: Option<DeleteTransferPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergePayload>,
    #[serde(rename = "searchProduct", default, skip_serializing_if = "Option::is_none")]
    pub search_product: Option<SearchProductPayload>,
    #[serde(rename = "addProduct", default, skip_serializing_if = "Option::is_none")]
    pub add_product: Option<AddProductPayload>,
    #[serde(rename = "removeProduct", default, skip_serializing_if = "Option::is_none")]
    pub remove_product: Option<RemoveProductPayload>,
}

impl ActionEnvelope {
    /// Number of action keys present. Anything other than exactly one is a
    /// malformed request.
    pub fn present_actions(&self) -> usize {
        [
            self.commit_pack.is_some(),
            self.dispatch.is_some(),
            self.receive.is_some(),
            self.delete_transfer.is_some(),
            self.merge.is_some(),
            self.search_product.is_some(),
            self.add_product.is_some(),
            self.remove_product.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub qty_planned: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub source_outlet_id: OutletId,
    pub destination_outlet_id: OutletId,
    pub lines: Vec<PlannedLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    Pack,
    Receive,
}

/// Per-line reconciliation verdict. All flags are advisory except where the
/// lifecycle controller says otherwise; none of them block on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineAssessment {
    pub product_id: ProductId,
    pub qty_planned: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty_counted: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty_received_counted: Option<i64>,
    /// Receive stage: destination count differs from what was sent.
    pub discrepant: bool,
    /// Receive stage: destination stock lower than the received count.
    pub stock_implausible: bool,
    /// Pack stage: counted beyond the source stock snapshot.
    pub over_snapshot: bool,
    /// Pack stage: count trips the staff-review heuristic.
    pub suspicious: bool,
}

/// Totals and flags recomputed from the authoritative line set on every
/// request; never cached or persisted apart from the lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub stage: ReconcileStage,
    pub planned_total: i64,
    pub counted_total: i64,
    pub diff_total: i64,
    pub lines: Vec<LineAssessment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferView {
    pub transfer: Transfer,
    pub source_outlet_name: String,
    pub destination_outlet_name: String,
    /// True when the source outlet is not the consolidation hub; submission
    /// is disabled for such transfers. Recomputed per request.
    pub restricted: bool,
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductHit {
    pub product_id: ProductId,
    pub product_name: String,
    pub stock_level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPackOutcome {
    pub transfer: Transfer,
    /// Lines submitted with a zero count are dropped from the transfer at
    /// commit; their ids are reported back so the client can reconcile.
    pub removed_products: Vec<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    /// Set when label booking failed; the commit itself still succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub transfer: Transfer,
    pub retired: [TransferId; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidateList {
    pub candidates: Vec<MergeCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_counts_present_actions() {
        let empty = ActionEnvelope::default();
        assert_eq!(empty.present_actions(), 0);

        let one: ActionEnvelope =
            serde_json::from_str(r#"{"deleteTransfer": {}}"#).expect("deserialize");
        assert_eq!(one.present_actions(), 1);

        let two: ActionEnvelope = serde_json::from_str(
            r#"{"deleteTransfer": {}, "dispatch": {}}"#,
        )
        .expect("deserialize");
        assert_eq!(two.present_actions(), 2);
    }

    #[test]
    fn unknown_action_keys_are_ignored() {
        let env: ActionEnvelope =
            serde_json::from_str(r#"{"markReadyForDelivery": {}}"#).expect("deserialize");
        assert_eq!(env.present_actions(), 0);
    }

    #[test]
    fn commit_payload_roundtrip() {
        let json = r#"{
            "counts": [{"product_id": "7c0e6ef2-54a8-4f43-bc3f-68f29ab86c35", "qty": 4}],
            "packing_notes": "two boxes",
            "package": {"weight_grams": 1200}
        }"#;
        let payload: CommitPackPayload = serde_json::from_str(json).expect("deserialize");
        assert_eq!(payload.counts.len(), 1);
        assert_eq!(payload.counts[0].qty, 4);
        assert_eq!(payload.packing_notes.as_deref(), Some("two boxes"));
        assert!(payload.tracking_code.is_none());
        assert_eq!(payload.package.expect("package").weight_grams, 1200);
    }
}
