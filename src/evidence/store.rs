//! `SQLite` persistence for communication evidence.
//!
//! One row per request, written with upsert-by-`request_id` semantics: the
//! first write inserts the full record; a second write for the same
//! request updates only `response_summary`, `status`, and `metadata`,
//! leaving the original request side immutable. Timestamps are stored as
//! epoch milliseconds.

use crate::clock::{from_epoch_ms, to_epoch_ms};
use crate::database::DatabaseConnection;
use crate::domain_types::{EvidenceId, RequestId};
use crate::models::{ConnectorKind, EvidenceRecord, RequestStatus, TrustTier};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const UPSERT_EVIDENCE: &str = r"
INSERT INTO evidence
    (id, request_id, connector_kind, operation, request_summary,
     response_summary, status, trust_tier, metadata, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(request_id) DO UPDATE SET
    response_summary = excluded.response_summary,
    status = excluded.status,
    metadata = excluded.metadata;
";

const SELECT_BY_ID: &str = "SELECT * FROM evidence WHERE id = ?";

const SELECT_BY_REQUEST: &str = "SELECT * FROM evidence WHERE request_id = ?";

const SEARCH_EVIDENCE: &str = r"
SELECT * FROM evidence
WHERE (?1 IS NULL OR connector_kind = ?1)
  AND (?2 IS NULL OR operation = ?2)
  AND (?3 IS NULL OR status = ?3)
  AND (?4 IS NULL OR created_at >= ?4)
  AND (?5 IS NULL OR created_at <= ?5)
ORDER BY created_at DESC
LIMIT ?6;
";

const COUNT_ALL: &str = "SELECT COUNT(*) FROM evidence";

const COUNT_BY_STATUS: &str = "SELECT COUNT(*) FROM evidence WHERE status = ?";

const STATS_BY_CONNECTOR: &str = r"
SELECT connector_kind, COUNT(*) AS count FROM evidence GROUP BY connector_kind;
";

const PURGE_OLDER_THAN: &str = "DELETE FROM evidence WHERE created_at < ?";

/// Evidence storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error from `SQLx`.
    #[error("Database error: {message}")]
    Database {
        /// Error message from the database operation.
        message: String,
    },

    /// A stored row failed to parse back into a record.
    #[error("Invalid evidence row: {field} - {reason}")]
    InvalidRow {
        /// Column that failed to parse.
        field: String,
        /// Parser error message.
        reason: String,
    },

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export file I/O failure.
    #[error("Export error: {message}")]
    Export {
        /// I/O error message.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            message: error.to_string(),
        }
    }
}

impl From<crate::database::DatabaseError> for StoreError {
    fn from(error: crate::database::DatabaseError) -> Self {
        Self::Database {
            message: error.to_string(),
        }
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Filters for evidence search. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EvidenceFilter {
    pub connector_kind: Option<ConnectorKind>,
    pub operation: Option<String>,
    pub status: Option<RequestStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// `SQLite`-backed evidence store.
#[derive(Clone)]
pub struct SqliteEvidenceStore {
    connection: DatabaseConnection,
}

impl SqliteEvidenceStore {
    /// Creates a store over an initialized database connection.
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Saves a record, upserting by `request_id`.
    ///
    /// On conflict only the response side (`response_summary`, `status`,
    /// `metadata`) is updated; `connector_kind`, `operation`,
    /// `request_summary`, and `created_at` stay as first written.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    #[instrument(skip(self, record), fields(request_id = %record.request_id))]
    pub async fn save(&self, record: &EvidenceRecord) -> StoreResult<()> {
        let request_summary = serde_json::to_string(&record.request_summary)?;
        let response_summary = record
            .response_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        sqlx::query(UPSERT_EVIDENCE)
            .bind(record.id.to_string())
            .bind(record.request_id.to_string())
            .bind(record.connector_kind.as_str())
            .bind(&record.operation)
            .bind(&request_summary)
            .bind(response_summary)
            .bind(record.status.as_str())
            .bind(record.trust_tier.as_str())
            .bind(&metadata)
            .bind(to_epoch_ms(record.created_at))
            .execute(self.connection.pool())
            .await
            .map_err(|e| {
                warn!(request_id = %record.request_id, "Failed to save evidence: {e}");
                StoreError::from(e)
            })?;

        debug!(id = %record.id, "Saved evidence");
        Ok(())
    }

    /// Fetches a record by evidence id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row parse fails.
    pub async fn get(&self, id: &EvidenceId) -> StoreResult<Option<EvidenceRecord>> {
        let row = sqlx::query(SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(parse_evidence_row).transpose()
    }

    /// Fetches the record for a request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row parse fails.
    pub async fn get_by_request(
        &self,
        request_id: &RequestId,
    ) -> StoreResult<Option<EvidenceRecord>> {
        let row = sqlx::query(SELECT_BY_REQUEST)
            .bind(request_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(parse_evidence_row).transpose()
    }

    /// Searches records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or a row parse fails.
    pub async fn search(
        &self,
        filter: &EvidenceFilter,
        limit: i64,
    ) -> StoreResult<Vec<EvidenceRecord>> {
        let rows = sqlx::query(SEARCH_EVIDENCE)
            .bind(filter.connector_kind.map(ConnectorKind::as_str))
            .bind(filter.operation.as_deref())
            .bind(filter.status.map(RequestStatus::as_str))
            .bind(filter.start.map(to_epoch_ms))
            .bind(filter.end.map(to_epoch_ms))
            .bind(limit)
            .fetch_all(self.connection.pool())
            .await?;

        rows.iter().map(parse_evidence_row).collect()
    }

    /// Total number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> StoreResult<i64> {
        Ok(sqlx::query_scalar(COUNT_ALL)
            .fetch_one(self.connection.pool())
            .await?)
    }

    /// Number of records with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_by_status(&self, status: RequestStatus) -> StoreResult<i64> {
        Ok(sqlx::query_scalar(COUNT_BY_STATUS)
            .bind(status.as_str())
            .fetch_one(self.connection.pool())
            .await?)
    }

    /// Record counts grouped by connector kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats_by_connector(&self) -> StoreResult<HashMap<String, i64>> {
        let rows = sqlx::query(STATS_BY_CONNECTOR)
            .fetch_all(self.connection.pool())
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("connector_kind"), row.get::<i64, _>("count")))
            .collect())
    }

    /// Exports matching records as a JSON array to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the search, serialization, or file write fails.
    pub async fn export(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        path: &Path,
    ) -> StoreResult<PathBuf> {
        let filter = EvidenceFilter {
            start,
            end,
            ..EvidenceFilter::default()
        };
        let records = self.search(&filter, 10_000).await?;
        let body = serde_json::to_vec_pretty(&records)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Export {
                        message: format!("Failed to create {}: {e}", parent.display()),
                    })?;
            }
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|e| StoreError::Export {
                message: format!("Failed to write {}: {e}", path.display()),
            })?;

        info!(count = records.len(), path = %path.display(), "Exported evidence");
        Ok(path.to_path_buf())
    }

    /// Deletes records older than `days` days. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn purge_older_than(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let cutoff = now - chrono::Duration::days(days);
        let result = sqlx::query(PURGE_OLDER_THAN)
            .bind(to_epoch_ms(cutoff))
            .execute(self.connection.pool())
            .await?;

        let deleted = result.rows_affected();
        info!(deleted, days, "Purged old evidence");
        Ok(deleted)
    }
}

fn parse_evidence_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<EvidenceRecord> {
    let connector_kind: String = row.get("connector_kind");
    let status: String = row.get("status");
    let trust_tier: String = row.get("trust_tier");
    let request_summary: String = row.get("request_summary");
    let response_summary: Option<String> = row.get("response_summary");
    let metadata: Option<String> = row.get("metadata");
    let created_at: i64 = row.get("created_at");

    let connector_kind =
        ConnectorKind::from_str(&connector_kind).map_err(|reason| StoreError::InvalidRow {
            field: "connector_kind".to_string(),
            reason,
        })?;
    let status = RequestStatus::from_str(&status).map_err(|reason| StoreError::InvalidRow {
        field: "status".to_string(),
        reason,
    })?;
    let trust_tier = TrustTier::from_str(&trust_tier).map_err(|reason| StoreError::InvalidRow {
        field: "trust_tier".to_string(),
        reason,
    })?;

    Ok(EvidenceRecord {
        id: EvidenceId::new(row.get::<String, _>("id")),
        request_id: RequestId::new(row.get::<String, _>("request_id")),
        connector_kind,
        operation: row.get("operation"),
        request_summary: serde_json::from_str(&request_summary)?,
        response_summary: response_summary
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        status,
        trust_tier,
        metadata: metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(Value::Null),
        created_at: from_epoch_ms(created_at),
    })
}
