//! Quantity reconciliation. Pure functions over the authoritative line set;
//! totals are recomputed on every call and never cached apart from the
//! lines themselves.

use shared::domain::TransferLine;
use shared::protocol::{LineAssessment, ReconcileReport, ReconcileStage};

/// Counts at or above this are always flagged for staff review.
const SUSPICIOUS_ABSOLUTE: i64 = 99;

/// Computes totals and per-line flags for the given stage.
///
/// Pack stage compares counted against planned. Receive stage compares the
/// destination count against what the source actually packed, not against
/// the original plan.
pub fn assess(lines: &[TransferLine], stage: ReconcileStage) -> ReconcileReport {
    let active: Vec<&TransferLine> = lines.iter().filter(|l| l.is_active()).collect();

    let planned_total: i64 = active.iter().map(|l| l.qty_planned).sum();
    let counted_total: i64 = active
        .iter()
        .map(|l| match stage {
            ReconcileStage::Pack => l.qty_counted.unwrap_or(0),
            ReconcileStage::Receive => l.qty_received_counted.unwrap_or(0),
        })
        .sum();

    let diff_total = match stage {
        ReconcileStage::Pack => counted_total - planned_total,
        ReconcileStage::Receive => active
            .iter()
            .map(|l| l.qty_received_counted.unwrap_or(0) - l.qty_counted.unwrap_or(0))
            .sum(),
    };

    ReconcileReport {
        stage,
        planned_total,
        counted_total,
        diff_total,
        lines: active.iter().map(|l| assess_line(l, stage)).collect(),
    }
}

fn assess_line(line: &TransferLine, stage: ReconcileStage) -> LineAssessment {
    let mut assessment = LineAssessment {
        product_id: line.product_id,
        qty_planned: line.qty_planned,
        qty_counted: line.qty_counted,
        qty_received_counted: line.qty_received_counted,
        discrepant: false,
        stock_implausible: false,
        over_snapshot: false,
        suspicious: false,
    };

    match stage {
        ReconcileStage::Pack => {
            if let Some(counted) = line.qty_counted {
                if let Some(snapshot) = line.stock_at_source {
                    assessment.over_snapshot = counted > snapshot;
                }
                assessment.suspicious = is_suspicious_count(
                    counted,
                    line.qty_planned,
                    line.stock_at_source.unwrap_or(0),
                );
            }
        }
        ReconcileStage::Receive => {
            if let Some(received) = line.qty_received_counted {
                assessment.discrepant = received != line.qty_counted.unwrap_or(0);
                if let Some(stock) = line.stock_at_destination {
                    assessment.stock_implausible = stock < received;
                }
            }
        }
    }

    assessment
}

/// Staff-review heuristic for packed counts: an absolute runaway value, a
/// count far beyond the plan, or a count far beyond the stock snapshot.
fn is_suspicious_count(counted: i64, planned: i64, stock: i64) -> bool {
    counted >= SUSPICIOUS_ABSOLUTE
        || (planned > 0 && counted >= planned * 3)
        || (stock > 0 && counted >= stock * 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::ProductId;
    use uuid::Uuid;

    fn line(n: u128, planned: i64) -> TransferLine {
        TransferLine {
            product_id: ProductId(Uuid::from_u128(n)),
            product_name: format!("Product {n}"),
            qty_planned: planned,
            qty_counted: None,
            qty_received_counted: None,
            stock_at_source: None,
            stock_at_destination: None,
            manually_added: false,
        }
    }

    #[test]
    fn pack_totals_follow_the_lines() {
        let mut lines = vec![line(1, 6), line(2, 3)];
        lines[0].qty_counted = Some(5);
        lines[1].qty_counted = Some(3);

        let report = assess(&lines, ReconcileStage::Pack);
        assert_eq!(report.planned_total, 9);
        assert_eq!(report.counted_total, 8);
        assert_eq!(report.diff_total, -1);

        // Totals are recomputed fresh; mutating a line shows up immediately.
        lines[0].qty_counted = Some(9);
        let report = assess(&lines, ReconcileStage::Pack);
        assert_eq!(report.counted_total, 12);
        assert_eq!(report.diff_total, 3);
    }

    #[test]
    fn inactive_lines_are_excluded_from_totals() {
        let mut lines = vec![line(1, 4), line(2, 0)];
        lines[0].qty_counted = Some(4);
        lines[1].qty_counted = Some(7);

        let report = assess(&lines, ReconcileStage::Pack);
        assert_eq!(report.planned_total, 4);
        assert_eq!(report.counted_total, 4);
        assert_eq!(report.lines.len(), 1);

        // A manually added zero-planned line stays in the working set.
        lines[1].manually_added = true;
        let report = assess(&lines, ReconcileStage::Pack);
        assert_eq!(report.counted_total, 11);
        assert_eq!(report.lines.len(), 2);
    }

    #[test]
    fn receive_diff_compares_against_sent_not_planned() {
        let mut lines = vec![line(1, 10)];
        lines[0].qty_counted = Some(7);
        lines[0].qty_received_counted = Some(6);

        let report = assess(&lines, ReconcileStage::Receive);
        assert_eq!(report.planned_total, 10);
        assert_eq!(report.counted_total, 6);
        // received − sent, not received − planned
        assert_eq!(report.diff_total, -1);
    }

    #[test]
    fn discrepancy_flags_received_vs_sent_mismatch() {
        let mut lines = vec![line(1, 10), line(2, 5)];
        lines[0].qty_counted = Some(10);
        lines[0].qty_received_counted = Some(8);
        lines[1].qty_counted = Some(5);
        lines[1].qty_received_counted = Some(5);

        let report = assess(&lines, ReconcileStage::Receive);
        assert!(report.lines[0].discrepant);
        assert!(!report.lines[1].discrepant);
    }

    #[test]
    fn stock_implausible_when_destination_stock_below_received() {
        let mut lines = vec![line(1, 10)];
        lines[0].qty_counted = Some(10);
        lines[0].qty_received_counted = Some(10);
        lines[0].stock_at_destination = Some(4);

        let report = assess(&lines, ReconcileStage::Receive);
        assert!(report.lines[0].stock_implausible);

        lines[0].stock_at_destination = Some(10);
        let report = assess(&lines, ReconcileStage::Receive);
        assert!(!report.lines[0].stock_implausible);
    }

    #[test]
    fn over_snapshot_is_a_pack_stage_warning() {
        let mut lines = vec![line(1, 3)];
        lines[0].qty_counted = Some(12);
        lines[0].stock_at_source = Some(10);

        let report = assess(&lines, ReconcileStage::Pack);
        assert!(report.lines[0].over_snapshot);

        lines[0].qty_counted = Some(10);
        let report = assess(&lines, ReconcileStage::Pack);
        assert!(!report.lines[0].over_snapshot);
    }

    #[test]
    fn suspicious_count_heuristic() {
        assert!(is_suspicious_count(99, 0, 0));
        assert!(is_suspicious_count(9, 3, 0));
        assert!(is_suspicious_count(20, 0, 10));
        assert!(!is_suspicious_count(8, 3, 10));
        assert!(!is_suspicious_count(0, 0, 0));
    }
}
