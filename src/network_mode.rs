//! Network mode management: the gateway's master switch.
//!
//! The mode is a persisted tri-state (`off` / `readonly` / `on`) with an
//! append-only change history. Current state lives in a single
//! `CHECK (id = 1)` row; transitions write the state row and a history row
//! in one transaction, serialized by a writer lock so history stays
//! totally ordered (equal timestamps disambiguated by the autoincrement
//! id). An in-memory cache keeps `get_mode` off the database.

use crate::clock::{from_epoch_ms, to_epoch_ms, SharedClock};
use crate::database::{DatabaseConnection, DatabaseError, DatabaseResult};
use crate::models::{NetworkMode, ParamMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, instrument};

/// Operations permitted in `readonly` mode.
const READ_OPERATIONS: &[&str] = &["fetch", "search", "get", "read", "query", "list"];

/// Operations blocked in `readonly` mode.
const WRITE_OPERATIONS: &[&str] = &[
    "send", "post", "put", "delete", "create", "update", "write", "publish",
];

const SELECT_STATE: &str = "SELECT mode, updated_at, updated_by, metadata FROM network_mode_state WHERE id = 1";

const INSERT_DEFAULT_STATE: &str = r"
INSERT INTO network_mode_state (id, mode, updated_at, updated_by, metadata)
VALUES (1, ?, ?, 'system', ?)
ON CONFLICT(id) DO NOTHING;
";

const UPDATE_STATE: &str = r"
UPDATE network_mode_state
SET mode = ?, updated_at = ?, updated_by = ?, metadata = ?
WHERE id = 1;
";

const INSERT_HISTORY: &str = r"
INSERT INTO network_mode_history (previous_mode, new_mode, changed_at, changed_by, reason, metadata)
VALUES (?, ?, ?, ?, ?, ?);
";

const SELECT_HISTORY: &str = r"
SELECT id, previous_mode, new_mode, changed_at, changed_by, reason, metadata
FROM network_mode_history
WHERE (?1 IS NULL OR changed_at >= ?1)
  AND (?2 IS NULL OR changed_at <= ?2)
ORDER BY changed_at DESC, id DESC
LIMIT ?3;
";

/// Result of a `set_mode` call.
#[derive(Debug, Clone, Serialize)]
pub struct ModeTransition {
    pub previous_mode: NetworkMode,
    pub new_mode: NetworkMode,
    /// False when the requested mode equaled the current one (no-op).
    pub changed: bool,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
}

/// One row of the mode change history.
#[derive(Debug, Clone, Serialize)]
pub struct ModeHistoryRecord {
    pub id: i64,
    pub previous_mode: Option<NetworkMode>,
    pub new_mode: NetworkMode,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
    pub metadata: ParamMap,
}

/// Current state plus recent history, for operator surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ModeInfo {
    pub mode: NetworkMode,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub recent_history: Vec<ModeHistoryRecord>,
    pub available_modes: Vec<NetworkMode>,
    pub read_operations: Vec<String>,
    pub write_operations: Vec<String>,
}

/// Manager for network mode state and transitions.
pub struct NetworkModeManager {
    connection: DatabaseConnection,
    clock: SharedClock,
    cached_mode: RwLock<NetworkMode>,
    writer: tokio::sync::Mutex<()>,
}

impl NetworkModeManager {
    /// Opens the manager, seeding the default mode (`on`) on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the state row cannot be read or seeded.
    pub async fn initialize(
        connection: DatabaseConnection,
        clock: SharedClock,
    ) -> DatabaseResult<Self> {
        let now_ms = to_epoch_ms(clock.now());
        sqlx::query(INSERT_DEFAULT_STATE)
            .bind(NetworkMode::On.as_str())
            .bind(now_ms)
            .bind(r#"{"initial":true}"#)
            .execute(connection.pool())
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to seed network mode state: {e}"),
            })?;

        let mode = Self::load_mode(&connection).await?;
        info!(mode = %mode, "Loaded network mode");

        Ok(Self {
            connection,
            clock,
            cached_mode: RwLock::new(mode),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    async fn load_mode(connection: &DatabaseConnection) -> DatabaseResult<NetworkMode> {
        let row = sqlx::query(SELECT_STATE)
            .fetch_one(connection.pool())
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to load network mode: {e}"),
            })?;

        let mode_str: String = row.get("mode");
        NetworkMode::from_str(&mode_str).map_err(|e| DatabaseError::Database { message: e })
    }

    /// Current mode, from the in-memory cache.
    #[must_use]
    pub fn get_mode(&self) -> NetworkMode {
        *self
            .cached_mode
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the mode, recording the transition in history.
    ///
    /// A no-op (with `changed: false`) when the mode is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    #[instrument(skip(self, metadata))]
    pub async fn set_mode(
        &self,
        mode: NetworkMode,
        updated_by: Option<&str>,
        reason: Option<&str>,
        metadata: Option<ParamMap>,
    ) -> DatabaseResult<ModeTransition> {
        let _writer = self.writer.lock().await;

        let previous = self.get_mode();
        let now = self.clock.now();

        if previous == mode {
            debug!(mode = %mode, "Network mode unchanged");
            return Ok(ModeTransition {
                previous_mode: previous,
                new_mode: mode,
                changed: false,
                changed_at: now,
                changed_by: updated_by.map(str::to_string),
                reason: reason.map(str::to_string),
            });
        }

        let metadata_json = serde_json::to_string(&metadata.unwrap_or_default())
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to encode mode metadata: {e}"),
            })?;
        let now_ms = to_epoch_ms(now);

        let mut tx = self
            .connection
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to open mode transaction: {e}"),
            })?;

        sqlx::query(UPDATE_STATE)
            .bind(mode.as_str())
            .bind(now_ms)
            .bind(updated_by)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to update mode state: {e}"),
            })?;

        sqlx::query(INSERT_HISTORY)
            .bind(previous.as_str())
            .bind(mode.as_str())
            .bind(now_ms)
            .bind(updated_by)
            .bind(reason)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to append mode history: {e}"),
            })?;

        tx.commit().await.map_err(|e| DatabaseError::Database {
            message: format!("Failed to commit mode transition: {e}"),
        })?;

        *self
            .cached_mode
            .write()
            .unwrap_or_else(PoisonError::into_inner) = mode;

        info!(
            previous = %previous,
            new = %mode,
            by = updated_by.unwrap_or("unknown"),
            reason = reason.unwrap_or("none"),
            "Network mode changed"
        );

        Ok(ModeTransition {
            previous_mode: previous,
            new_mode: mode,
            changed: true,
            changed_at: now,
            changed_by: updated_by.map(str::to_string),
            reason: reason.map(str::to_string),
        })
    }

    /// Checks whether an operation is permitted, against the given mode or
    /// the current one.
    ///
    /// `off` denies everything. `readonly` allows the read-verb set,
    /// denies the write-verb set, and for unknown names applies a
    /// conservative substring screen against the write verbs so a
    /// newly-named write operation cannot slip through.
    #[must_use]
    pub fn is_operation_allowed(
        &self,
        operation: &str,
        mode: Option<NetworkMode>,
    ) -> (bool, Option<String>) {
        let mode = mode.unwrap_or_else(|| self.get_mode());
        let operation_lower = operation.to_ascii_lowercase();

        match mode {
            NetworkMode::Off => (
                false,
                Some("Network mode is off - all operations blocked".to_string()),
            ),
            NetworkMode::ReadOnly => {
                if WRITE_OPERATIONS.contains(&operation_lower.as_str()) {
                    return (
                        false,
                        Some(format!(
                            "Network mode is readonly - write operation '{operation}' blocked"
                        )),
                    );
                }
                if READ_OPERATIONS.contains(&operation_lower.as_str()) {
                    return (true, None);
                }
                if WRITE_OPERATIONS
                    .iter()
                    .any(|verb| operation_lower.contains(verb))
                {
                    return (
                        false,
                        Some(format!(
                            "Network mode is readonly - operation '{operation}' appears to be a write operation"
                        )),
                    );
                }
                (true, None)
            }
            NetworkMode::On => (true, None),
        }
    }

    /// Mode change history, newest first, optionally bounded in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_history(
        &self,
        limit: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DatabaseResult<Vec<ModeHistoryRecord>> {
        let rows = sqlx::query(SELECT_HISTORY)
            .bind(start.map(to_epoch_ms))
            .bind(end.map(to_epoch_ms))
            .bind(limit)
            .fetch_all(self.connection.pool())
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to query mode history: {e}"),
            })?;

        rows.iter().map(parse_history_row).collect()
    }

    /// Current state plus the ten most recent transitions and the verb
    /// taxonomy, for operator surfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or history query fails.
    pub async fn mode_info(&self) -> DatabaseResult<ModeInfo> {
        let row = sqlx::query(SELECT_STATE)
            .fetch_one(self.connection.pool())
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to load mode state: {e}"),
            })?;

        let updated_at: i64 = row.get("updated_at");
        let updated_by: Option<String> = row.get("updated_by");

        Ok(ModeInfo {
            mode: self.get_mode(),
            updated_at: from_epoch_ms(updated_at),
            updated_by,
            recent_history: self.get_history(10, None, None).await?,
            available_modes: vec![NetworkMode::Off, NetworkMode::ReadOnly, NetworkMode::On],
            read_operations: READ_OPERATIONS.iter().map(|s| (*s).to_string()).collect(),
            write_operations: WRITE_OPERATIONS.iter().map(|s| (*s).to_string()).collect(),
        })
    }
}

fn parse_history_row(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<ModeHistoryRecord> {
    let previous_mode: Option<String> = row.get("previous_mode");
    let new_mode: String = row.get("new_mode");
    let changed_at: i64 = row.get("changed_at");
    let metadata_raw: Option<String> = row.get("metadata");

    let previous_mode = previous_mode
        .map(|raw| NetworkMode::from_str(&raw))
        .transpose()
        .map_err(|e| DatabaseError::Database { message: e })?;
    let new_mode =
        NetworkMode::from_str(&new_mode).map_err(|e| DatabaseError::Database { message: e })?;
    let metadata = metadata_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    Ok(ModeHistoryRecord {
        id: row.get("id"),
        previous_mode,
        new_mode,
        changed_at: from_epoch_ms(changed_at),
        changed_by: row.get("changed_by"),
        reason: row.get("reason"),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{manual_clock, Clock, SharedClock};
    use chrono::TimeZone;
    use std::time::Duration;

    async fn manager() -> (NetworkModeManager, std::sync::Arc<crate::clock::ManualClock>) {
        let connection = DatabaseConnection::in_memory().await.unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = manual_clock(start);
        let shared: SharedClock = clock.clone();
        let manager = NetworkModeManager::initialize(connection, shared)
            .await
            .unwrap();
        (manager, clock)
    }

    #[tokio::test]
    async fn test_should_default_to_on_when_first_initialized() {
        let (manager, _clock) = manager().await;
        assert_eq!(manager.get_mode(), NetworkMode::On);
    }

    #[tokio::test]
    async fn test_should_record_history_when_mode_changes() {
        let (manager, clock) = manager().await;

        let transition = manager
            .set_mode(
                NetworkMode::ReadOnly,
                Some("operator"),
                Some("maintenance window"),
                None,
            )
            .await
            .unwrap();
        assert!(transition.changed);
        assert_eq!(transition.previous_mode, NetworkMode::On);
        assert_eq!(transition.new_mode, NetworkMode::ReadOnly);

        clock.advance(Duration::from_secs(5));
        manager
            .set_mode(NetworkMode::Off, Some("operator"), None, None)
            .await
            .unwrap();

        let history = manager.get_history(10, None, None).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].new_mode, NetworkMode::Off);
        assert_eq!(history[1].new_mode, NetworkMode::ReadOnly);
        assert_eq!(history[1].reason.as_deref(), Some("maintenance window"));
        assert!(history[0].changed_at > history[1].changed_at);
    }

    #[tokio::test]
    async fn test_should_skip_history_when_mode_is_unchanged() {
        let (manager, _clock) = manager().await;

        let transition = manager
            .set_mode(NetworkMode::On, Some("noop"), None, None)
            .await
            .unwrap();
        assert!(!transition.changed);

        let history = manager.get_history(10, None, None).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_should_order_equal_timestamps_by_sequence_when_listing_history() {
        let (manager, _clock) = manager().await;
        // Two transitions at the same manual-clock instant.
        manager
            .set_mode(NetworkMode::ReadOnly, None, None, None)
            .await
            .unwrap();
        manager
            .set_mode(NetworkMode::Off, None, None, None)
            .await
            .unwrap();

        let history = manager.get_history(10, None, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].id > history[1].id);
        assert_eq!(history[0].new_mode, NetworkMode::Off);
    }

    #[tokio::test]
    async fn test_should_deny_everything_when_mode_is_off() {
        let (manager, _clock) = manager().await;
        manager
            .set_mode(NetworkMode::Off, None, None, None)
            .await
            .unwrap();

        for operation in ["fetch", "search", "send", "anything"] {
            let (allowed, reason) = manager.is_operation_allowed(operation, None);
            assert!(!allowed, "{operation} should be denied");
            assert!(reason.is_some());
        }
    }

    #[tokio::test]
    async fn test_should_deny_write_verbs_when_readonly() {
        let (manager, _clock) = manager().await;

        for operation in WRITE_OPERATIONS {
            let (allowed, _) =
                manager.is_operation_allowed(operation, Some(NetworkMode::ReadOnly));
            assert!(!allowed, "{operation} should be denied in readonly");
        }
        for operation in READ_OPERATIONS {
            let (allowed, _) =
                manager.is_operation_allowed(operation, Some(NetworkMode::ReadOnly));
            assert!(allowed, "{operation} should be allowed in readonly");
        }
    }

    #[tokio::test]
    async fn test_should_screen_unknown_operations_by_substring_when_readonly() {
        let (manager, _clock) = manager().await;

        let (allowed, reason) =
            manager.is_operation_allowed("bulk_send_all", Some(NetworkMode::ReadOnly));
        assert!(!allowed);
        assert!(reason.unwrap().contains("appears to be a write operation"));

        // Liberal default for names with no write-verb substring.
        let (allowed, _) =
            manager.is_operation_allowed("fetch_feed", Some(NetworkMode::ReadOnly));
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_should_allow_everything_when_mode_is_on() {
        let (manager, _clock) = manager().await;
        for operation in ["fetch", "send", "publish", "unknown_op"] {
            let (allowed, reason) = manager.is_operation_allowed(operation, None);
            assert!(allowed, "{operation} should be allowed");
            assert!(reason.is_none());
        }
    }

    #[tokio::test]
    async fn test_should_filter_history_by_time_bounds_when_querying() {
        let (manager, clock) = manager().await;

        manager
            .set_mode(NetworkMode::ReadOnly, None, None, None)
            .await
            .unwrap();
        let boundary = clock.now();
        clock.advance(Duration::from_secs(60));
        manager
            .set_mode(NetworkMode::Off, None, None, None)
            .await
            .unwrap();

        let newer = manager
            .get_history(10, Some(boundary + chrono::Duration::seconds(1)), None)
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].new_mode, NetworkMode::Off);

        let older = manager.get_history(10, None, Some(boundary)).await.unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].new_mode, NetworkMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_should_survive_restart_when_reloading_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            crate::database::DatabaseConfig::for_testing(dir.path().join("mode.db")).unwrap();
        let connection = DatabaseConnection::initialize(config.clone()).await.unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock: SharedClock = manual_clock(start);

        let manager = NetworkModeManager::initialize(connection, clock.clone())
            .await
            .unwrap();
        manager
            .set_mode(NetworkMode::Off, Some("op"), None, None)
            .await
            .unwrap();
        drop(manager);

        let connection = DatabaseConnection::initialize(config).await.unwrap();
        let reloaded = NetworkModeManager::initialize(connection, clock)
            .await
            .unwrap();
        assert_eq!(reloaded.get_mode(), NetworkMode::Off);
    }

    #[tokio::test]
    async fn test_should_expose_verb_sets_when_reporting_mode_info() {
        let (manager, _clock) = manager().await;
        let info = manager.mode_info().await.unwrap();
        assert_eq!(info.mode, NetworkMode::On);
        assert_eq!(info.available_modes.len(), 3);
        assert!(info.read_operations.contains(&"fetch".to_string()));
        assert!(info.write_operations.contains(&"publish".to_string()));
    }
}
