//! Draft persistence for interrupted counting sessions.
//!
//! A draft is a client-held snapshot of unsaved counted quantities, keyed by
//! `(transfer_id, staff_id)`. It is a cache, never authoritative: on resume
//! it is reconciled against the server's current line set by product id, and
//! stale products are dropped rather than recreated.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use shared::domain::{ProductId, TransferId, TransferLine, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftLine {
    pub product_id: ProductId,
    pub qty_counted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub transfer_id: TransferId,
    pub staff_id: UserId,
    pub lines: Vec<DraftLine>,
    #[serde(default)]
    pub notes: String,
    pub saved_at: DateTime<Utc>,
}

impl DraftSnapshot {
    /// The working set is empty when nothing has been counted and no notes
    /// were taken; such a draft is cleared rather than stored.
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.qty_counted == 0) && self.notes.trim().is_empty()
    }
}

/// What a cached draft restores into the currently viewed transfer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RestorePlan {
    /// Counted quantities to put back, matched by product id.
    pub restored: Vec<(ProductId, i64)>,
    /// Draft products no longer on the transfer; never recreated.
    pub dropped: Vec<ProductId>,
}

/// Resolves a cached snapshot against the authoritative server line set.
/// Returns `None` when the draft belongs to a different transfer.
pub fn reconcile(
    snapshot: &DraftSnapshot,
    transfer_id: TransferId,
    server_lines: &[TransferLine],
) -> Option<RestorePlan> {
    if snapshot.transfer_id != transfer_id {
        return None;
    }

    let mut plan = RestorePlan::default();
    for draft_line in &snapshot.lines {
        if server_lines
            .iter()
            .any(|l| l.product_id == draft_line.product_id)
        {
            plan.restored
                .push((draft_line.product_id, draft_line.qty_counted));
        } else {
            plan.dropped.push(draft_line.product_id);
        }
    }
    Some(plan)
}

/// One JSON file per `(transfer_id, staff_id)` key under a local directory.
pub struct DraftCache {
    dir: PathBuf,
}

impl DraftCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, transfer_id: TransferId, staff_id: UserId) -> PathBuf {
        self.dir
            .join(format!("transfer_{}_staff_{}.json", transfer_id.0, staff_id.0))
    }

    /// Saves the snapshot, or clears it when the working set is empty.
    pub fn save(&self, snapshot: &DraftSnapshot) -> Result<()> {
        if snapshot.is_empty() {
            return self.clear(snapshot.transfer_id, snapshot.staff_id);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create draft dir '{}'", self.dir.display()))?;
        let path = self.path_for(snapshot.transfer_id, snapshot.staff_id);
        let raw = serde_json::to_vec_pretty(snapshot).context("failed to encode draft")?;
        fs::write(&path, raw)
            .with_context(|| format!("failed to write draft '{}'", path.display()))?;
        Ok(())
    }

    pub fn load(
        &self,
        transfer_id: TransferId,
        staff_id: UserId,
    ) -> Result<Option<DraftSnapshot>> {
        let path = self.path_for(transfer_id, staff_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read draft '{}'", path.display()));
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // A corrupt draft is a cache miss, not a fatal error.
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding unreadable draft");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Dropping a draft that never existed is fine; commit-success paths
    /// call this unconditionally.
    pub fn clear(&self, transfer_id: TransferId, staff_id: UserId) -> Result<()> {
        let path = self.path_for(transfer_id, staff_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to clear draft '{}'", path.display()))
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
#[path = "tests/draft_tests.rs"]
mod tests;
