//! Transfer lifecycle operations: the state machine, the reconciliation
//! engine, and the merge coordinator, called by the action gateway with an
//! already-authenticated user.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use courier_integration::ShippingProvider;
use shared::{
    domain::{OutletId, ProductId, Transfer, TransferId, TransferStatus, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AddProductPayload, CommitPackOutcome, CommitPackPayload, CreateTransferRequest,
        DispatchPayload, MergeOutcome, MergePayload, ProductHit, ReceivePayload, ReconcileStage,
        RemoveProductPayload, SearchProductPayload, TransferView,
    },
};
use storage::{LineEdit, MergeStore, NewLine, PackCommit, ReceiveCommit, Storage};
use vend_integration::InventoryProvider;

pub mod reconcile;

const SEARCH_RESULT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub inventory: Arc<dyn InventoryProvider>,
    pub shipping: Arc<dyn ShippingProvider>,
    /// The consolidation hub. Transfers sourced anywhere else are
    /// pack-only/read-only.
    pub hub_outlet_id: OutletId,
    /// When set, a pack commit lands the transfer directly in `IN_TRANSIT`.
    pub auto_dispatch_on_pack: bool,
}

/// Restricted mode is a pure function of the source outlet, recomputed on
/// every request and never persisted.
pub fn is_pack_restricted(source_outlet_id: OutletId, hub_outlet_id: OutletId) -> bool {
    source_outlet_id != hub_outlet_id
}

pub async fn create_transfer(
    ctx: &ApiContext,
    user_id: UserId,
    req: &CreateTransferRequest,
) -> Result<Transfer, ApiError> {
    if req.source_outlet_id == req.destination_outlet_id {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "cannot transfer to the same outlet",
        ));
    }
    for (outlet_id, label) in [
        (req.source_outlet_id, "source"),
        (req.destination_outlet_id, "destination"),
    ] {
        if ctx
            .storage
            .outlet_name(outlet_id)
            .await
            .map_err(internal)?
            .is_none()
        {
            return Err(ApiError::not_found(format!("{label} outlet not found")));
        }
    }

    let mut lines = Vec::with_capacity(req.lines.len());
    for planned in &req.lines {
        if planned.qty_planned < 0 {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                format!("negative planned quantity for {}", planned.product_id),
            ));
        }
        lines.push(NewLine {
            product_id: planned.product_id,
            product_name: planned.product_name.clone(),
            qty_planned: planned.qty_planned,
            stock_at_source: snapshot(ctx, planned.product_id, req.source_outlet_id).await,
            stock_at_destination: snapshot(ctx, planned.product_id, req.destination_outlet_id)
                .await,
            manually_added: false,
        });
    }

    let transfer_id = ctx
        .storage
        .create_transfer(req.source_outlet_id, req.destination_outlet_id, user_id, &lines)
        .await
        .map_err(internal)?;
    load_transfer(ctx, transfer_id).await
}

pub async fn view_transfer(ctx: &ApiContext, transfer_id: TransferId) -> Result<TransferView, ApiError> {
    let mut transfer = load_transfer(ctx, transfer_id).await?;

    // Receiving staff compare against live destination stock; refresh the
    // advisory snapshots while the shipment is inbound.
    if transfer.status == TransferStatus::InTransit {
        refresh_destination_snapshots(ctx, &mut transfer).await;
    }

    build_view(ctx, transfer).await
}

pub async fn list_merge_candidates(
    ctx: &ApiContext,
    transfer_id: TransferId,
) -> Result<Vec<shared::domain::MergeCandidate>, ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;
    ctx.storage
        .list_merge_candidates(
            transfer.source_outlet_id,
            transfer.destination_outlet_id,
            transfer.id,
        )
        .await
        .map_err(internal)
}

/// The pack commit. Exactly one concurrent submission can succeed; the
/// storage layer's check-and-set is authoritative and a losing call gets
/// the idempotency error without re-applying anything.
pub async fn commit_pack(
    ctx: &ApiContext,
    user_id: UserId,
    transfer_id: TransferId,
    payload: &CommitPackPayload,
) -> Result<CommitPackOutcome, ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;
    ensure_unrestricted(ctx, &transfer)?;
    if transfer.status != TransferStatus::Open {
        return Err(already_committed(&transfer));
    }

    let counts = validate_pack_counts(&transfer, payload)?;

    let final_status = if ctx.auto_dispatch_on_pack {
        TransferStatus::InTransit
    } else {
        TransferStatus::Packed
    };
    let commit = ctx
        .storage
        .commit_pack(
            transfer_id,
            user_id,
            &counts,
            payload.packing_notes.as_deref(),
            payload.tracking_code.as_deref(),
            final_status,
        )
        .await
        .map_err(internal)?;

    let removed_products = match commit {
        PackCommit::Applied { removed_products } => removed_products,
        PackCommit::NotOpen => {
            // Lost the commit race; report the status the winner left behind.
            let fresh = load_transfer(ctx, transfer_id).await?;
            return Err(already_committed(&fresh));
        }
        PackCommit::MissingCounts(missing) => return Err(missing_counts(missing)),
    };

    // Label booking is outcome-neutral: the commit stands whether or not
    // the courier call succeeds.
    let mut label_warning = None;
    let mut transfer = load_transfer(ctx, transfer_id).await?;
    if let Some(package) = &payload.package {
        match ctx.shipping.create_label(&transfer, package).await {
            Ok(label) => {
                ctx.storage
                    .set_tracking_code(transfer_id, &label.tracking_code)
                    .await
                    .map_err(internal)?;
                transfer.tracking_code = Some(label.tracking_code);
            }
            Err(err) => {
                warn!(transfer_id = transfer_id.0, %err, "courier label booking failed");
                label_warning = Some(format!("label booking failed: {err}"));
            }
        }
    }

    let tracking_code = transfer.tracking_code.clone();
    Ok(CommitPackOutcome {
        transfer,
        removed_products,
        tracking_code,
        label_warning,
    })
}

pub async fn dispatch(
    ctx: &ApiContext,
    transfer_id: TransferId,
    payload: &DispatchPayload,
) -> Result<Transfer, ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;
    ensure_unrestricted(ctx, &transfer)?;

    let dispatched = ctx
        .storage
        .dispatch(transfer_id, payload.tracking_code.as_deref())
        .await
        .map_err(internal)?;
    if !dispatched {
        return Err(ApiError::new(
            ErrorCode::InvalidTransition,
            format!("cannot dispatch a transfer in status {}", transfer.status),
        ));
    }

    load_transfer(ctx, transfer_id).await
}

pub async fn receive(
    ctx: &ApiContext,
    user_id: UserId,
    transfer_id: TransferId,
    payload: &ReceivePayload,
) -> Result<TransferView, ApiError> {
    let mut transfer = load_transfer(ctx, transfer_id).await?;
    if transfer.status != TransferStatus::InTransit {
        return Err(ApiError::new(
            ErrorCode::InvalidTransition,
            format!("cannot receive a transfer in status {}", transfer.status),
        ));
    }

    validate_receive_counts(&transfer, payload)?;

    // Capture destination stock before the counts land so the
    // stock-implausible flag compares against what was on hand.
    refresh_destination_snapshots(ctx, &mut transfer).await;

    let counts: Vec<(ProductId, i64)> = payload
        .counts
        .iter()
        .map(|c| (c.product_id, c.qty))
        .collect();
    let committed = ctx
        .storage
        .commit_receive(
            transfer_id,
            user_id,
            &counts,
            payload.delivery_notes.as_deref(),
        )
        .await
        .map_err(internal)?;

    match committed {
        ReceiveCommit::Applied => {}
        ReceiveCommit::NotInTransit => {
            return Err(ApiError::new(
                ErrorCode::InvalidTransition,
                "transfer already received",
            ));
        }
        ReceiveCommit::MissingCounts(missing) => return Err(missing_counts(missing)),
    }

    let transfer = load_transfer(ctx, transfer_id).await?;
    build_view(ctx, transfer).await
}

/// Deletion stays allowed in restricted mode; only submission is guarded.
pub async fn delete_transfer(ctx: &ApiContext, transfer_id: TransferId) -> Result<(), ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;

    let deleted = ctx
        .storage
        .delete_transfer(transfer_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::new(
            ErrorCode::InvalidTransition,
            format!("cannot delete a transfer in status {}", transfer.status),
        ));
    }
    Ok(())
}

pub async fn merge_transfers(
    ctx: &ApiContext,
    user_id: UserId,
    transfer_id: TransferId,
    payload: &MergePayload,
) -> Result<MergeOutcome, ApiError> {
    let subject = load_transfer(ctx, transfer_id).await?;
    let other = load_transfer(ctx, payload.other_transfer_id).await?;

    if subject.id == other.id {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "a transfer cannot be merged with itself",
        ));
    }
    if (subject.source_outlet_id, subject.destination_outlet_id)
        != (other.source_outlet_id, other.destination_outlet_id)
    {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "transfers must share the same outlet pair to merge",
        ));
    }

    // Status is re-validated inside the merge transaction; this is only the
    // friendly early error for obviously stale candidates.
    for t in [&subject, &other] {
        if t.status != TransferStatus::Open {
            return Err(merge_conflict(t.id));
        }
    }

    let merged = ctx
        .storage
        .merge_transfers(subject.id, other.id, user_id)
        .await
        .map_err(internal)?;
    let merged_id = match merged {
        MergeStore::Merged(id) => id,
        MergeStore::NotOpen(id) => return Err(merge_conflict(id)),
        MergeStore::PairMismatch => {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                "transfers must share the same outlet pair to merge",
            ));
        }
    };

    let transfer = load_transfer(ctx, merged_id).await?;
    Ok(MergeOutcome {
        transfer,
        retired: [subject.id, other.id],
    })
}

pub async fn add_line(
    ctx: &ApiContext,
    transfer_id: TransferId,
    payload: &AddProductPayload,
) -> Result<Transfer, ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;
    if !transfer.status.allows_line_edits() {
        return Err(line_edits_closed(&transfer));
    }
    if payload.qty_planned < 0 {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "negative planned quantity",
        ));
    }

    let line = NewLine {
        product_id: payload.product_id,
        product_name: payload.product_name.clone(),
        qty_planned: payload.qty_planned,
        stock_at_source: snapshot(ctx, payload.product_id, transfer.source_outlet_id).await,
        stock_at_destination: snapshot(ctx, payload.product_id, transfer.destination_outlet_id)
            .await,
        manually_added: true,
    };
    match ctx.storage.add_line(transfer_id, &line).await.map_err(internal)? {
        LineEdit::Applied => load_transfer(ctx, transfer_id).await,
        LineEdit::NotOpen => Err(line_edits_closed(&transfer)),
        LineEdit::Duplicate => Err(ApiError::new(
            ErrorCode::ValidationFailed,
            format!("product {} is already on this transfer", payload.product_id),
        )),
        LineEdit::Missing => Err(ApiError::not_found("transfer not found")),
    }
}

pub async fn remove_line(
    ctx: &ApiContext,
    transfer_id: TransferId,
    payload: &RemoveProductPayload,
) -> Result<Transfer, ApiError> {
    let transfer = load_transfer(ctx, transfer_id).await?;
    if !transfer.status.allows_line_edits() {
        return Err(line_edits_closed(&transfer));
    }

    match ctx
        .storage
        .remove_line(transfer_id, payload.product_id)
        .await
        .map_err(internal)?
    {
        LineEdit::Applied => load_transfer(ctx, transfer_id).await,
        LineEdit::NotOpen => Err(line_edits_closed(&transfer)),
        LineEdit::Missing => Err(ApiError::not_found(format!(
            "product {} is not on this transfer",
            payload.product_id
        ))),
        LineEdit::Duplicate => Err(internal(anyhow::anyhow!(
            "unexpected duplicate on line removal"
        ))),
    }
}

/// Product search stays available in restricted mode; it is advisory and
/// touches nothing.
pub async fn search_products(
    ctx: &ApiContext,
    payload: &SearchProductPayload,
) -> Result<Vec<ProductHit>, ApiError> {
    let keyword = payload.keyword.trim();
    if keyword.is_empty() {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "search keyword required",
        ));
    }
    ctx.inventory
        .search_products(keyword, payload.outlet_id, SEARCH_RESULT_LIMIT)
        .await
        .map_err(internal)
}

async fn build_view(ctx: &ApiContext, transfer: Transfer) -> Result<TransferView, ApiError> {
    let source_outlet_name = outlet_name_or_unknown(ctx, transfer.source_outlet_id).await?;
    let destination_outlet_name =
        outlet_name_or_unknown(ctx, transfer.destination_outlet_id).await?;

    let stage = match transfer.status {
        TransferStatus::Open | TransferStatus::Packed | TransferStatus::Deleted => {
            ReconcileStage::Pack
        }
        TransferStatus::InTransit | TransferStatus::Received => ReconcileStage::Receive,
    };
    let report = reconcile::assess(&transfer.lines, stage);
    let restricted = is_pack_restricted(transfer.source_outlet_id, ctx.hub_outlet_id);

    Ok(TransferView {
        transfer,
        source_outlet_name,
        destination_outlet_name,
        restricted,
        report,
    })
}

async fn outlet_name_or_unknown(ctx: &ApiContext, outlet_id: OutletId) -> Result<String, ApiError> {
    Ok(ctx
        .storage
        .outlet_name(outlet_id)
        .await
        .map_err(internal)?
        .unwrap_or_else(|| "Unknown".to_string()))
}

async fn load_transfer(ctx: &ApiContext, transfer_id: TransferId) -> Result<Transfer, ApiError> {
    ctx.storage
        .get_transfer(transfer_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("transfer not found"))
}

fn ensure_unrestricted(ctx: &ApiContext, transfer: &Transfer) -> Result<(), ApiError> {
    if is_pack_restricted(transfer.source_outlet_id, ctx.hub_outlet_id) {
        return Err(ApiError::new(
            ErrorCode::GuardRejected,
            "submission disabled in restricted mode",
        ));
    }
    Ok(())
}

/// Every active line must carry a count, no count may be negative, and no
/// count may name a product that is not on the transfer.
fn validate_pack_counts(
    transfer: &Transfer,
    payload: &CommitPackPayload,
) -> Result<Vec<(ProductId, i64)>, ApiError> {
    let mut by_product: HashMap<ProductId, i64> = HashMap::with_capacity(payload.counts.len());
    for count in &payload.counts {
        if count.qty < 0 {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                format!("negative counted quantity for {}", count.product_id),
            ));
        }
        if transfer
            .lines
            .iter()
            .all(|l| l.product_id != count.product_id)
        {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                format!("product {} is not on this transfer", count.product_id),
            ));
        }
        by_product.insert(count.product_id, count.qty);
    }

    let missing: Vec<ProductId> = transfer
        .active_lines()
        .filter(|l| !by_product.contains_key(&l.product_id))
        .map(|l| l.product_id)
        .collect();
    if !missing.is_empty() {
        return Err(missing_counts(missing));
    }

    Ok(by_product.into_iter().collect())
}

/// Receiving must count every line that was actually sent or manually
/// added; lines dropped at pack time no longer exist and need nothing.
fn validate_receive_counts(transfer: &Transfer, payload: &ReceivePayload) -> Result<(), ApiError> {
    let mut counted: HashMap<ProductId, i64> = HashMap::with_capacity(payload.counts.len());
    for count in &payload.counts {
        if count.qty < 0 {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                format!("negative received quantity for {}", count.product_id),
            ));
        }
        counted.insert(count.product_id, count.qty);
    }

    let missing: Vec<ProductId> = transfer
        .lines
        .iter()
        .filter(|l| l.qty_counted.unwrap_or(0) > 0 || l.manually_added)
        .filter(|l| !counted.contains_key(&l.product_id))
        .map(|l| l.product_id)
        .collect();
    if !missing.is_empty() {
        return Err(missing_counts(missing));
    }
    Ok(())
}

async fn refresh_destination_snapshots(ctx: &ApiContext, transfer: &mut Transfer) {
    for line in &mut transfer.lines {
        match ctx
            .inventory
            .stock_level(line.product_id, transfer.destination_outlet_id)
            .await
        {
            Ok(level) => {
                line.stock_at_destination = Some(level);
                if let Err(err) = ctx
                    .storage
                    .set_line_snapshots(transfer.id, line.product_id, None, Some(level))
                    .await
                {
                    warn!(transfer_id = transfer.id.0, %err, "failed to persist stock snapshot");
                }
            }
            // Advisory only; a transition never waits on inventory.
            Err(err) => {
                warn!(transfer_id = transfer.id.0, product_id = %line.product_id, %err,
                    "destination stock lookup failed");
            }
        }
    }
}

async fn snapshot(ctx: &ApiContext, product_id: ProductId, outlet_id: OutletId) -> Option<i64> {
    match ctx.inventory.stock_level(product_id, outlet_id).await {
        Ok(level) => Some(level),
        Err(err) => {
            warn!(product_id = %product_id, outlet_id = outlet_id.0, %err, "stock lookup failed");
            None
        }
    }
}

fn already_committed(transfer: &Transfer) -> ApiError {
    ApiError::new(
        ErrorCode::InvalidTransition,
        format!(
            "transfer already committed (status {})",
            transfer.status
        ),
    )
}

fn line_edits_closed(transfer: &Transfer) -> ApiError {
    ApiError::new(
        ErrorCode::InvalidTransition,
        format!(
            "line edits are only valid while open (status {})",
            transfer.status
        ),
    )
}

fn merge_conflict(transfer_id: TransferId) -> ApiError {
    ApiError::new(
        ErrorCode::MergeConflict,
        format!("transfer {} is no longer eligible to merge", transfer_id.0),
    )
}

fn missing_counts(missing: Vec<ProductId>) -> ApiError {
    let ids: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
    ApiError::with_details(
        ErrorCode::ValidationFailed,
        format!("missing counted quantities for: {}", ids.join(", ")),
        serde_json::json!({ "product_ids": ids }),
    )
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(%err, "internal storage fault");
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
