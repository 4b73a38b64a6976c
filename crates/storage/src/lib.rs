use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{
    DeletedReason, MergeCandidate, OutletId, ProductId, Transfer, TransferId, TransferLine,
    TransferStatus, UserId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Line data supplied when a transfer is created or a product is added.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub qty_planned: i64,
    pub stock_at_source: Option<i64>,
    pub stock_at_destination: Option<i64>,
    pub manually_added: bool,
}

/// Outcome of the pack-commit check-and-set.
#[derive(Debug)]
pub enum PackCommit {
    /// The transition applied; zero-counted lines were dropped.
    Applied { removed_products: Vec<ProductId> },
    /// The transfer had already left `OPEN`; nothing was changed.
    NotOpen,
    /// Active lines were left without a counted quantity; rolled back.
    MissingCounts(Vec<ProductId>),
}

#[derive(Debug)]
pub enum ReceiveCommit {
    Applied,
    NotInTransit,
    MissingCounts(Vec<ProductId>),
}

#[derive(Debug)]
pub enum MergeStore {
    Merged(TransferId),
    /// One of the transfers was no longer `OPEN` at execution time.
    NotOpen(TransferId),
    PairMismatch,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineEdit {
    Applied,
    NotOpen,
    Duplicate,
    Missing,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn create_outlet(&self, name: &str) -> Result<OutletId> {
        let rec = sqlx::query("INSERT INTO outlets (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(OutletId(rec.get::<i64, _>(0)))
    }

    pub async fn outlet_name(&self, outlet_id: OutletId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT name FROM outlets WHERE id = ?")
            .bind(outlet_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Creates a transfer together with its initial lines. Lines with no
    /// planned quantity and no manual flag are never persisted.
    pub async fn create_transfer(
        &self,
        source_outlet_id: OutletId,
        destination_outlet_id: OutletId,
        created_by: UserId,
        lines: &[NewLine],
    ) -> Result<TransferId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO transfers (source_outlet_id, destination_outlet_id, created_by)
             VALUES (?, ?, ?)
             RETURNING id",
        )
        .bind(source_outlet_id.0)
        .bind(destination_outlet_id.0)
        .bind(created_by.0)
        .fetch_one(&mut *tx)
        .await?;
        let transfer_id = TransferId(rec.get::<i64, _>(0));

        let mut position = 0i64;
        for line in lines {
            if line.qty_planned <= 0 && !line.manually_added {
                continue;
            }
            sqlx::query(
                "INSERT INTO transfer_lines
                 (transfer_id, product_id, product_name, qty_planned,
                  stock_at_source, stock_at_destination, manually_added, position)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(transfer_id.0)
            .bind(line.product_id.0.to_string())
            .bind(&line.product_name)
            .bind(line.qty_planned.max(0))
            .bind(line.stock_at_source)
            .bind(line.stock_at_destination)
            .bind(line.manually_added)
            .bind(position)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        tx.commit().await?;
        Ok(transfer_id)
    }

    pub async fn get_transfer(&self, transfer_id: TransferId) -> Result<Option<Transfer>> {
        let header = sqlx::query(
            "SELECT id, source_outlet_id, destination_outlet_id, status,
                    created_by, packed_by, received_by,
                    created_at, packed_at, received_at,
                    packing_notes, delivery_notes, tracking_code,
                    deleted_reason, merged_into
             FROM transfers WHERE id = ?",
        )
        .bind(transfer_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT product_id, product_name, qty_planned, qty_counted,
                    qty_received_counted, stock_at_source, stock_at_destination,
                    manually_added
             FROM transfer_lines
             WHERE transfer_id = ?
             ORDER BY position ASC",
        )
        .bind(transfer_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut lines = Vec::with_capacity(line_rows.len());
        for row in line_rows {
            lines.push(line_from_row(&row)?);
        }

        Ok(Some(transfer_from_row(&header, lines)?))
    }

    pub async fn transfer_status(&self, transfer_id: TransferId) -> Result<Option<TransferStatus>> {
        let row = sqlx::query("SELECT status FROM transfers WHERE id = ?")
            .bind(transfer_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| parse_status(&r.get::<String, _>(0)))
            .transpose()
    }

    /// Adds a product line while the transfer is still `OPEN`. A product
    /// already on the transfer is rejected, not summed.
    pub async fn add_line(&self, transfer_id: TransferId, line: &NewLine) -> Result<LineEdit> {
        let mut tx = self.pool.begin().await?;

        let Some(status) = fetch_status(&mut tx, transfer_id).await? else {
            return Ok(LineEdit::Missing);
        };
        if !status.allows_line_edits() {
            return Ok(LineEdit::NotOpen);
        }

        let exists = sqlx::query(
            "SELECT 1 FROM transfer_lines WHERE transfer_id = ? AND product_id = ?",
        )
        .bind(transfer_id.0)
        .bind(line.product_id.0.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_some() {
            return Ok(LineEdit::Duplicate);
        }

        sqlx::query(
            "INSERT INTO transfer_lines
             (transfer_id, product_id, product_name, qty_planned,
              stock_at_source, stock_at_destination, manually_added, position)
             VALUES (?, ?, ?, ?, ?, ?, ?,
                     (SELECT COALESCE(MAX(position) + 1, 0)
                      FROM transfer_lines WHERE transfer_id = ?))",
        )
        .bind(transfer_id.0)
        .bind(line.product_id.0.to_string())
        .bind(&line.product_name)
        .bind(line.qty_planned.max(0))
        .bind(line.stock_at_source)
        .bind(line.stock_at_destination)
        .bind(line.manually_added)
        .bind(transfer_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LineEdit::Applied)
    }

    pub async fn remove_line(
        &self,
        transfer_id: TransferId,
        product_id: ProductId,
    ) -> Result<LineEdit> {
        let mut tx = self.pool.begin().await?;

        let Some(status) = fetch_status(&mut tx, transfer_id).await? else {
            return Ok(LineEdit::Missing);
        };
        if !status.allows_line_edits() {
            return Ok(LineEdit::NotOpen);
        }

        let removed = sqlx::query(
            "DELETE FROM transfer_lines WHERE transfer_id = ? AND product_id = ?",
        )
        .bind(transfer_id.0)
        .bind(product_id.0.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            return Ok(LineEdit::Missing);
        }

        tx.commit().await?;
        Ok(LineEdit::Applied)
    }

    /// Refreshes the advisory stock snapshots on a line.
    pub async fn set_line_snapshots(
        &self,
        transfer_id: TransferId,
        product_id: ProductId,
        stock_at_source: Option<i64>,
        stock_at_destination: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transfer_lines
             SET stock_at_source = COALESCE(?, stock_at_source),
                 stock_at_destination = COALESCE(?, stock_at_destination)
             WHERE transfer_id = ? AND product_id = ?",
        )
        .bind(stock_at_source)
        .bind(stock_at_destination)
        .bind(transfer_id.0)
        .bind(product_id.0.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pack commit: the single authoritative check-and-set for the
    /// `OPEN → PACKED` (or `OPEN → IN_TRANSIT` when dispatch is implicit)
    /// transition. Counted quantities are applied, zero-counted lines
    /// dropped, and the whole thing rolls back if any active line is left
    /// uncounted. A transfer that already left `OPEN` loses the race and
    /// nothing is re-applied.
    pub async fn commit_pack(
        &self,
        transfer_id: TransferId,
        packed_by: UserId,
        counts: &[(ProductId, i64)],
        packing_notes: Option<&str>,
        tracking_code: Option<&str>,
        final_status: TransferStatus,
    ) -> Result<PackCommit> {
        if !matches!(final_status, TransferStatus::Packed | TransferStatus::InTransit) {
            bail!("pack commit cannot target status {final_status}");
        }

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transfers
             SET status = ?,
                 packed_at = CURRENT_TIMESTAMP,
                 packed_by = ?,
                 packing_notes = ?,
                 tracking_code = COALESCE(?, tracking_code)
             WHERE id = ? AND status = 'OPEN'",
        )
        .bind(final_status.as_str())
        .bind(packed_by.0)
        .bind(packing_notes)
        .bind(tracking_code)
        .bind(transfer_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(PackCommit::NotOpen);
        }

        let mut removed_products = Vec::new();
        for (product_id, qty) in counts {
            if *qty <= 0 {
                let removed = sqlx::query(
                    "DELETE FROM transfer_lines WHERE transfer_id = ? AND product_id = ?",
                )
                .bind(transfer_id.0)
                .bind(product_id.0.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if removed > 0 {
                    removed_products.push(*product_id);
                }
            } else {
                sqlx::query(
                    "UPDATE transfer_lines SET qty_counted = ?
                     WHERE transfer_id = ? AND product_id = ?",
                )
                .bind(*qty)
                .bind(transfer_id.0)
                .bind(product_id.0.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        let uncounted = sqlx::query(
            "SELECT product_id FROM transfer_lines
             WHERE transfer_id = ?
               AND (qty_planned > 0 OR manually_added = 1)
               AND qty_counted IS NULL",
        )
        .bind(transfer_id.0)
        .fetch_all(&mut *tx)
        .await?;
        if !uncounted.is_empty() {
            let mut missing = Vec::with_capacity(uncounted.len());
            for row in uncounted {
                missing.push(parse_product_id(&row.get::<String, _>(0))?);
            }
            tx.rollback().await?;
            return Ok(PackCommit::MissingCounts(missing));
        }

        tx.commit().await?;
        Ok(PackCommit::Applied { removed_products })
    }

    /// Records a tracking code supplied by a courier booking or manual
    /// entry. Never touches status.
    pub async fn set_tracking_code(
        &self,
        transfer_id: TransferId,
        tracking_code: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE transfers SET tracking_code = ? WHERE id = ?")
            .bind(tracking_code)
            .bind(transfer_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn dispatch(
        &self,
        transfer_id: TransferId,
        tracking_code: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE transfers
             SET status = 'IN_TRANSIT',
                 tracking_code = COALESCE(?, tracking_code)
             WHERE id = ? AND status = 'PACKED'",
        )
        .bind(tracking_code)
        .bind(transfer_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Receive commit: `IN_TRANSIT → RECEIVED` check-and-set. Every line
    /// that was actually sent (`qty_counted > 0`) or manually added must end
    /// up with a received count, otherwise the commit rolls back.
    pub async fn commit_receive(
        &self,
        transfer_id: TransferId,
        received_by: UserId,
        counts: &[(ProductId, i64)],
        delivery_notes: Option<&str>,
    ) -> Result<ReceiveCommit> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transfers
             SET status = 'RECEIVED',
                 received_at = CURRENT_TIMESTAMP,
                 received_by = ?,
                 delivery_notes = ?
             WHERE id = ? AND status = 'IN_TRANSIT'",
        )
        .bind(received_by.0)
        .bind(delivery_notes)
        .bind(transfer_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(ReceiveCommit::NotInTransit);
        }

        for (product_id, qty) in counts {
            sqlx::query(
                "UPDATE transfer_lines SET qty_received_counted = ?
                 WHERE transfer_id = ? AND product_id = ?",
            )
            .bind((*qty).max(0))
            .bind(transfer_id.0)
            .bind(product_id.0.to_string())
            .execute(&mut *tx)
            .await?;
        }

        let unreceived = sqlx::query(
            "SELECT product_id FROM transfer_lines
             WHERE transfer_id = ?
               AND (qty_counted > 0 OR manually_added = 1)
               AND qty_received_counted IS NULL",
        )
        .bind(transfer_id.0)
        .fetch_all(&mut *tx)
        .await?;
        if !unreceived.is_empty() {
            let mut missing = Vec::with_capacity(unreceived.len());
            for row in unreceived {
                missing.push(parse_product_id(&row.get::<String, _>(0))?);
            }
            tx.rollback().await?;
            return Ok(ReceiveCommit::MissingCounts(missing));
        }

        tx.commit().await?;
        Ok(ReceiveCommit::Applied)
    }

    /// Manual delete. Valid from `OPEN` or `PACKED` only; the record is
    /// retained for audit.
    pub async fn delete_transfer(&self, transfer_id: TransferId) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE transfers
             SET status = 'DELETED', deleted_reason = 'manual'
             WHERE id = ? AND status IN ('OPEN', 'PACKED')",
        )
        .bind(transfer_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Other `OPEN` transfers between the same two outlets, excluding the
    /// subject. Deleted transfers never reappear here.
    pub async fn list_merge_candidates(
        &self,
        source_outlet_id: OutletId,
        destination_outlet_id: OutletId,
        excluding: TransferId,
    ) -> Result<Vec<MergeCandidate>> {
        let rows = sqlx::query(
            "SELECT t.id, o.name, COUNT(l.product_id), t.created_at
             FROM transfers t
             INNER JOIN outlets o ON o.id = t.destination_outlet_id
             LEFT JOIN transfer_lines l ON l.transfer_id = t.id
             WHERE t.source_outlet_id = ?
               AND t.destination_outlet_id = ?
               AND t.status = 'OPEN'
               AND t.id != ?
             GROUP BY t.id, o.name, t.created_at
             ORDER BY t.id ASC",
        )
        .bind(source_outlet_id.0)
        .bind(destination_outlet_id.0)
        .bind(excluding.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MergeCandidate {
                transfer_id: TransferId(r.get::<i64, _>(0)),
                destination_outlet_name: r.get::<String, _>(1),
                line_count: r.get::<i64, _>(2),
                created_at: r.get::<DateTime<Utc>, _>(3),
            })
            .collect())
    }

    /// Merges two `OPEN` transfers sharing an outlet pair into a fresh
    /// `OPEN` transfer, retiring both originals. All-or-nothing: both
    /// originals are re-validated via check-and-set inside the transaction,
    /// and any failure rolls the whole merge back.
    pub async fn merge_transfers(
        &self,
        subject_id: TransferId,
        other_id: TransferId,
        merged_by: UserId,
    ) -> Result<MergeStore> {
        let mut tx = self.pool.begin().await?;

        let subject = sqlx::query(
            "SELECT source_outlet_id, destination_outlet_id FROM transfers WHERE id = ?",
        )
        .bind(subject_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let other = sqlx::query(
            "SELECT source_outlet_id, destination_outlet_id FROM transfers WHERE id = ?",
        )
        .bind(other_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let subject_missing = subject.is_none();
        let (Some(subject), Some(other)) = (subject, other) else {
            return Ok(MergeStore::NotOpen(if subject_missing {
                subject_id
            } else {
                other_id
            }));
        };

        let pair = (
            subject.get::<i64, _>(0),
            subject.get::<i64, _>(1),
        );
        if pair != (other.get::<i64, _>(0), other.get::<i64, _>(1)) {
            return Ok(MergeStore::PairMismatch);
        }

        for id in [subject_id, other_id] {
            let retired = sqlx::query(
                "UPDATE transfers
                 SET status = 'DELETED', deleted_reason = 'merged'
                 WHERE id = ? AND status = 'OPEN'",
            )
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if retired == 0 {
                tx.rollback().await?;
                return Ok(MergeStore::NotOpen(id));
            }
        }

        let rec = sqlx::query(
            "INSERT INTO transfers (source_outlet_id, destination_outlet_id, created_by)
             VALUES (?, ?, ?)
             RETURNING id",
        )
        .bind(pair.0)
        .bind(pair.1)
        .bind(merged_by.0)
        .fetch_one(&mut *tx)
        .await?;
        let merged_id = TransferId(rec.get::<i64, _>(0));

        // Union of both line sets keyed by product. Planned quantities are
        // additive and the manual flag ORs; name and snapshots describe the
        // same product on both sides, so either copy serves.
        let merged_rows = sqlx::query(
            "SELECT product_id,
                    MAX(product_name) AS product_name,
                    SUM(qty_planned) AS qty_planned,
                    MAX(stock_at_source) AS stock_at_source,
                    MAX(stock_at_destination) AS stock_at_destination,
                    MAX(manually_added) AS manually_added,
                    MIN(ord) AS ord
             FROM (
                 SELECT product_id, product_name, qty_planned,
                        stock_at_source, stock_at_destination, manually_added,
                        position AS ord
                 FROM transfer_lines WHERE transfer_id = ?
                 UNION ALL
                 SELECT product_id, product_name, qty_planned,
                        stock_at_source, stock_at_destination, manually_added,
                        position + 100000 AS ord
                 FROM transfer_lines WHERE transfer_id = ?
             )
             GROUP BY product_id
             ORDER BY ord ASC",
        )
        .bind(subject_id.0)
        .bind(other_id.0)
        .fetch_all(&mut *tx)
        .await?;

        let mut position = 0i64;
        for row in merged_rows {
            sqlx::query(
                "INSERT INTO transfer_lines
                 (transfer_id, product_id, product_name, qty_planned,
                  stock_at_source, stock_at_destination, manually_added, position)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(merged_id.0)
            .bind(row.get::<String, _>(0))
            .bind(row.get::<String, _>(1))
            .bind(row.get::<i64, _>(2))
            .bind(row.get::<Option<i64>, _>(3))
            .bind(row.get::<Option<i64>, _>(4))
            .bind(row.get::<i64, _>(5) != 0)
            .bind(position)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        sqlx::query("UPDATE transfers SET merged_into = ? WHERE id IN (?, ?)")
            .bind(merged_id.0)
            .bind(subject_id.0)
            .bind(other_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(MergeStore::Merged(merged_id))
    }
}

async fn fetch_status(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    transfer_id: TransferId,
) -> Result<Option<TransferStatus>> {
    let row = sqlx::query("SELECT status FROM transfers WHERE id = ?")
        .bind(transfer_id.0)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(|r| parse_status(&r.get::<String, _>(0)))
        .transpose()
}

fn parse_status(raw: &str) -> Result<TransferStatus> {
    TransferStatus::from_str(raw).with_context(|| format!("unknown transfer status '{raw}'"))
}

fn parse_product_id(raw: &str) -> Result<ProductId> {
    Ok(ProductId(
        Uuid::parse_str(raw).with_context(|| format!("invalid product id '{raw}'"))?,
    ))
}

fn transfer_from_row(row: &SqliteRow, lines: Vec<TransferLine>) -> Result<Transfer> {
    let deleted_reason = row
        .get::<Option<String>, _>(13)
        .map(|raw| {
            DeletedReason::from_str(&raw)
                .with_context(|| format!("unknown deleted reason '{raw}'"))
        })
        .transpose()?;

    Ok(Transfer {
        id: TransferId(row.get::<i64, _>(0)),
        source_outlet_id: OutletId(row.get::<i64, _>(1)),
        destination_outlet_id: OutletId(row.get::<i64, _>(2)),
        status: parse_status(&row.get::<String, _>(3))?,
        created_by: UserId(row.get::<i64, _>(4)),
        packed_by: row.get::<Option<i64>, _>(5).map(UserId),
        received_by: row.get::<Option<i64>, _>(6).map(UserId),
        created_at: row.get::<DateTime<Utc>, _>(7),
        packed_at: row.get::<Option<DateTime<Utc>>, _>(8),
        received_at: row.get::<Option<DateTime<Utc>>, _>(9),
        packing_notes: row.get::<Option<String>, _>(10),
        delivery_notes: row.get::<Option<String>, _>(11),
        tracking_code: row.get::<Option<String>, _>(12),
        deleted_reason,
        merged_into: row.get::<Option<i64>, _>(14).map(TransferId),
        lines,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<TransferLine> {
    Ok(TransferLine {
        product_id: parse_product_id(&row.get::<String, _>(0))?,
        product_name: row.get::<String, _>(1),
        qty_planned: row.get::<i64, _>(2),
        qty_counted: row.get::<Option<i64>, _>(3),
        qty_received_counted: row.get::<Option<i64>, _>(4),
        stock_at_source: row.get::<Option<i64>, _>(5),
        stock_at_destination: row.get::<Option<i64>, _>(6),
        manually_added: row.get::<bool, _>(7),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
