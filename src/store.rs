//! SQLite persistence for scan history and generated reports.
//!
//! Rows keep the serialized record as JSON next to a sortable timestamp, so
//! the table layout does not change when the record shape grows. Scans are
//! ordered by when they finished, matching the in-memory history.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::warn;

use crate::reporting::ReportDocument;
use crate::scan::ScanRecord;

#[derive(Clone)]
pub struct ScanStore {
    pool: SqlitePool,
}

impl ScanStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to connect to database at {database_url}"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS osint_scans (
                id TEXT PRIMARY KEY,
                finished_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to initialize osint_scans table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS osint_reports (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to initialize osint_reports table")?;

        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub async fn save_scan(&self, record: &ScanRecord) -> Result<()> {
        let payload = serde_json::to_string(record).context("failed to encode scan record")?;
        sqlx::query(
            r#"
            INSERT INTO osint_scans (id, finished_at, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                payload = excluded.payload
            "#,
        )
        .bind(&record.id)
        .bind(record.finish_key())
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store scan {}", record.id))?;
        Ok(())
    }

    /// The `limit` most recently finished scans, oldest first.
    pub async fn load_scans(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, payload FROM osint_scans
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to load scan history")?;

        let mut scans: Vec<ScanRecord> = rows
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(scan_id = %id, ?err, "skipping unreadable stored scan");
                    None
                }
            })
            .collect();
        scans.reverse();
        Ok(scans)
    }

    /// Deletes everything but the `keep` most recently finished scans.
    pub async fn prune_scans(&self, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM osint_scans
            WHERE id NOT IN (
                SELECT id FROM osint_scans
                ORDER BY finished_at DESC, rowid DESC
                LIMIT ?1
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .context("failed to prune scan history")?;
        Ok(result.rows_affected())
    }

    pub async fn save_report(&self, document: &ReportDocument) -> Result<()> {
        let payload = serde_json::to_string(document).context("failed to encode report")?;
        sqlx::query(
            r#"
            INSERT INTO osint_reports (id, created_at, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(&document.report.id)
        .bind(document.report.created_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store report {}", document.report.id))?;
        Ok(())
    }

    /// All reports, oldest first.
    pub async fn load_reports(&self) -> Result<Vec<ReportDocument>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, payload FROM osint_reports ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load reports")?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(document) => Some(document),
                Err(err) => {
                    warn!(report_id = %id, ?err, "skipping unreadable stored report");
                    None
                }
            })
            .collect())
    }

    pub async fn delete_report(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM osint_reports WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete report {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}
