// crates/detox-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Snapshot Store
// Description: Durable snapshot store and per-cycle cache backed by SQLite.
// Purpose: Persist cycle facts, build snapshot caches once, serve report reads.
// Dependencies: detox-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements [`SnapshotStore`] using `SQLite`. Fact tables
//! (sizes, decisions, quotas, site states) are append-only and keyed by the
//! cycle that produced them. The snapshot cache materializes, once per cycle,
//! the as-of join of the latest size and latest decision at or before the
//! cycle; a build marker row records that the build ran so a cycle with no
//! qualifying replicas is never rebuilt.
//! Invariants:
//! - Cache builds run inside one `BEGIN IMMEDIATE` transaction on the writer
//!   connection; the unique key on `(run_id, site_id, dataset_id)` makes a
//!   concurrent duplicate build a no-op.
//! - Every `ensure_cached` call appends exactly one usage row.
//! - Cache rows are never updated or deleted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use detox_core::CacheOutcome;
use detox_core::CachedReplica;
use detox_core::ConditionId;
use detox_core::Cycle;
use detox_core::CycleCatalog;
use detox_core::CycleId;
use detox_core::CycleOperation;
use detox_core::DatasetName;
use detox_core::Decision;
use detox_core::FactBatch;
use detox_core::NamePattern;
use detox_core::Partition;
use detox_core::PartitionId;
use detox_core::PolicyCondition;
use detox_core::ReportSource;
use detox_core::SiteActivity;
use detox_core::SiteAggregate;
use detox_core::SiteContext;
use detox_core::SiteName;
use detox_core::SiteStatus;
use detox_core::SiteStorageStatus;
use detox_core::SnapshotCache;
use detox_core::SnapshotStore;
use detox_core::StoreError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of read connections.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// As-of join of the latest nonzero size and latest decision per replica.
///
/// `?1` is the cycle, `?2` the partition. Size and decision pick their own
/// maximum `run_id <= ?1` independently; a replica whose latest size is zero
/// is dropped rather than falling back to an older size.
const BUILD_CACHE_SQL: &str = "
    INSERT OR IGNORE INTO snapshot_cache
        (run_id, partition_id, site_id, dataset_id, size_snapshot_id, decision_id)
    SELECT ?1, ?2, s.site_id, s.dataset_id, s.id, d.id
    FROM replica_size_snapshots s
    JOIN (
        SELECT site_id, dataset_id, MAX(run_id) AS run_id
        FROM replica_size_snapshots
        WHERE partition_id = ?2 AND run_id <= ?1
        GROUP BY site_id, dataset_id
    ) latest_size
        ON latest_size.site_id = s.site_id
       AND latest_size.dataset_id = s.dataset_id
       AND latest_size.run_id = s.run_id
    LEFT JOIN (
        SELECT site_id, dataset_id, MAX(run_id) AS run_id
        FROM deletion_decisions
        WHERE partition_id = ?2 AND run_id <= ?1
        GROUP BY site_id, dataset_id
    ) latest_decision
        ON latest_decision.site_id = s.site_id
       AND latest_decision.dataset_id = s.dataset_id
    LEFT JOIN deletion_decisions d
        ON d.partition_id = ?2
       AND d.site_id = latest_decision.site_id
       AND d.dataset_id = latest_decision.dataset_id
       AND d.run_id = latest_decision.run_id
    WHERE s.partition_id = ?2 AND s.size > 0";

/// Column list shared by every cached-replica read.
const CACHED_REPLICA_SQL: &str = "
    SELECT si.name, ds.name, s.size, d.decision, d.condition_id, pc.text, s.group_name
    FROM snapshot_cache c
    JOIN replica_size_snapshots s ON s.id = c.size_snapshot_id
    JOIN sites si ON si.id = c.site_id
    JOIN datasets ds ON ds.id = c.dataset_id
    LEFT JOIN deletion_decisions d ON d.id = c.decision_id
    LEFT JOIN policy_conditions pc ON pc.id = d.condition_id
    WHERE c.run_id = ?1";

/// Cycle column list.
const CYCLE_COLUMNS: &str =
    "id, partition_id, operation, policy_version, comment, time_start, time_end";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` snapshot store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `read_pool_size` must be greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of connections used for report reads.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Builds a configuration with defaults for everything but the path.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read connection pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding fact payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Referenced record is missing.
    #[error("sqlite store record not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::VersionMismatch(message) | SqliteStoreError::Invalid(message) => {
                Self::Invalid(message)
            }
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
        }
    }
}

/// Maps a `rusqlite` error to a store db error.
#[allow(clippy::needless_pass_by_value, reason = "Used directly with map_err.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Import Summary
// ============================================================================

/// Rows newly written by one [`SqliteSnapshotStore::import_facts`] call.
///
/// Rows already present (same key) are skipped and not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Partitions inserted.
    pub partitions: u64,
    /// Policy conditions inserted.
    pub conditions: u64,
    /// Cycles inserted or completed.
    pub cycles: u64,
    /// Size snapshots inserted.
    pub sizes: u64,
    /// Decisions inserted.
    pub decisions: u64,
    /// Quota snapshots inserted.
    pub quotas: u64,
    /// Site status snapshots inserted.
    pub site_statuses: u64,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed snapshot store with WAL support.
///
/// # Invariants
/// - Writes (imports, cache builds, usage rows) go through the single writer
///   connection.
/// - `SQLite` connection access is serialized through a mutex per connection.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    /// Shared writer connection guarded by a mutex.
    write_connection: Arc<Mutex<Connection>>,
    /// Read connection pool used for report queries.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
}

impl SqliteSnapshotStore {
    /// Opens an `SQLite`-backed snapshot store, creating the schema when the
    /// file is new.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        if config.read_pool_size == 0 {
            return Err(SqliteStoreError::Invalid(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        let mut write_connection = open_connection(config)?;
        initialize_schema(&mut write_connection)?;
        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            read_connections.push(Mutex::new(open_connection(config)?));
        }
        Ok(Self {
            write_connection: Arc::new(Mutex::new(write_connection)),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the next read connection using round-robin selection.
    fn read_connection(&self) -> &Mutex<Connection> {
        let len = self.read_connections.len();
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % len;
        &self.read_connections[index]
    }

    /// Runs `read` against a pooled read connection.
    fn with_read<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let guard = self
            .read_connection()
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite read mutex poisoned".to_string()))?;
        read(&guard)
    }

    /// Runs `write` inside an immediate transaction on the writer connection.
    fn with_write<T>(
        &self,
        write: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .write_connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite write mutex poisoned".to_string()))?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let value = write(&tx)?;
        tx.commit().map_err(db_error)?;
        Ok(value)
    }

    /// Verifies both connection kinds can execute a simple statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if a mutex is poisoned or the query fails.
    fn check_connection(&self) -> Result<(), SqliteStoreError> {
        self.with_read(|connection| {
            connection.query_row("SELECT 1", [], |_| Ok(())).map_err(db_error)
        })?;
        let guard = self
            .write_connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite write mutex poisoned".to_string()))?;
        guard.query_row("SELECT 1", [], |_| Ok(())).map_err(db_error)
    }

    /// Imports a fact batch in one transaction.
    ///
    /// Existing rows are left untouched; the only update is completing a
    /// cycle that was stored without an end time.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when a row is invalid or the write fails;
    /// nothing from the batch is kept in that case.
    pub fn import_facts(&self, batch: &FactBatch) -> Result<ImportSummary, SqliteStoreError> {
        self.with_write(|tx| import_batch(tx, batch))
    }

    /// Builds the cache for `cycle` if needed and records one usage row.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::NotFound`] when the cycle is unknown.
    pub fn ensure_cycle_cached(
        &self,
        cycle: CycleId,
        partition: PartitionId,
    ) -> Result<CacheOutcome, SqliteStoreError> {
        let run_id = sql_id(cycle.get())?;
        let partition_id = sql_id(partition.get())?;
        self.with_write(|tx| {
            let known: Option<i64> = tx
                .query_row("SELECT id FROM cycles WHERE id = ?1", params![run_id], |row| row.get(0))
                .optional()
                .map_err(db_error)?;
            if known.is_none() {
                return Err(SqliteStoreError::NotFound(format!("cycle {cycle}")));
            }
            let already_built: bool = tx
                .query_row(
                    "SELECT EXISTS (SELECT 1 FROM snapshot_cache_builds WHERE run_id = ?1)
                         OR EXISTS (SELECT 1 FROM snapshot_cache WHERE run_id = ?1)",
                    params![run_id],
                    |row| row.get(0),
                )
                .map_err(db_error)?;
            let rows_inserted = if already_built {
                0
            } else {
                let inserted =
                    tx.execute(BUILD_CACHE_SQL, params![run_id, partition_id]).map_err(db_error)?;
                let inserted = i64::try_from(inserted)
                    .map_err(|_| SqliteStoreError::Invalid("cache row count overflow".to_string()))?;
                tx.execute(
                    "INSERT OR IGNORE INTO snapshot_cache_builds
                         (run_id, partition_id, built_at, row_count)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![run_id, partition_id, unix_millis(), inserted],
                )
                .map_err(db_error)?;
                inserted.unsigned_abs()
            };
            tx.execute(
                "INSERT INTO snapshot_usage (run_id, accessed_at) VALUES (?1, ?2)",
                params![run_id, unix_millis()],
            )
            .map_err(db_error)?;
            Ok(CacheOutcome {
                cycle,
                built: !already_built,
                rows_inserted,
            })
        })
    }

    /// Returns the number of cache rows stored for `cycle`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn cache_row_count(&self, cycle: CycleId) -> Result<u64, SqliteStoreError> {
        let run_id = sql_id(cycle.get())?;
        self.with_read(|connection| {
            count(connection, "SELECT COUNT(*) FROM snapshot_cache WHERE run_id = ?1", run_id)
        })
    }

    /// Reads cached rows for `cycle`, optionally narrowed by a name filter
    /// on `column`. Exact names compare with `=`, wildcard patterns with `LIKE`.
    fn cached_replicas(
        &self,
        cycle: CycleId,
        filter: Option<(ReplicaFilter, &NamePattern)>,
    ) -> Result<Vec<CachedReplica>, SqliteStoreError> {
        let run_id = sql_id(cycle.get())?;
        self.with_read(|connection| {
            let raw = match filter {
                None => {
                    let mut stmt = connection.prepare_cached(CACHED_REPLICA_SQL).map_err(db_error)?;
                    let rows = stmt.query_map(params![run_id], raw_replica).map_err(db_error)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?
                }
                Some((column, pattern)) => {
                    let operator = if pattern.is_wildcard() { "LIKE" } else { "=" };
                    let sql =
                        format!("{CACHED_REPLICA_SQL} AND {} {operator} ?2", column.column());
                    let mut stmt = connection.prepare_cached(&sql).map_err(db_error)?;
                    let rows = stmt
                        .query_map(params![run_id, pattern.like()], raw_replica)
                        .map_err(db_error)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?
                }
            };
            raw.into_iter().map(RawReplica::into_replica).collect()
        })
    }

    /// Loads one cycle with a caller-supplied `WHERE` tail.
    fn query_cycle(
        &self,
        tail: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Cycle>, SqliteStoreError> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles {tail}");
        self.with_read(|connection| {
            let raw = connection.query_row(&sql, params, raw_cycle).optional().map_err(db_error)?;
            raw.map(RawCycle::into_cycle).transpose()
        })
    }

    /// Loads one partition with a caller-supplied `WHERE` clause.
    fn query_partition(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Partition>, SqliteStoreError> {
        let sql = format!("SELECT id, name FROM partitions WHERE {clause}");
        self.with_read(|connection| {
            let raw: Option<(i64, String)> = connection
                .query_row(&sql, params, |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()
                .map_err(db_error)?;
            raw.map(|(id, name)| {
                Ok(Partition {
                    id: partition_id_from(id)?,
                    name,
                })
            })
            .transpose()
        })
    }
}

// ============================================================================
// SECTION: Trait Implementations
// ============================================================================

impl CycleCatalog for SqliteSnapshotStore {
    fn cycle(&self, id: CycleId) -> Result<Option<Cycle>, StoreError> {
        let run_id = sql_id(id.get())?;
        Ok(self.query_cycle("WHERE id = ?1", params![run_id])?)
    }

    fn partition_by_id(&self, id: PartitionId) -> Result<Option<Partition>, StoreError> {
        let partition_id = sql_id(id.get())?;
        Ok(self.query_partition("id = ?1", params![partition_id])?)
    }

    fn partition_by_name(&self, name: &str) -> Result<Option<Partition>, StoreError> {
        Ok(self.query_partition("name = ?1", params![name])?)
    }

    fn latest_completed_cycle(
        &self,
        partition: PartitionId,
        operation: CycleOperation,
    ) -> Result<Option<Cycle>, StoreError> {
        let partition_id = sql_id(partition.get())?;
        Ok(self.query_cycle(
            "WHERE partition_id = ?1 AND operation = ?2 AND time_end IS NOT NULL
             ORDER BY id DESC LIMIT 1",
            params![partition_id, operation.as_str()],
        )?)
    }

    fn previous_completed_cycle(&self, cycle: &Cycle) -> Result<Option<Cycle>, StoreError> {
        let partition_id = sql_id(cycle.partition_id.get())?;
        let run_id = sql_id(cycle.id.get())?;
        Ok(self.query_cycle(
            "WHERE partition_id = ?1 AND operation = ?2 AND time_end IS NOT NULL AND id < ?3
             ORDER BY id DESC LIMIT 1",
            params![partition_id, cycle.operation.as_str(), run_id],
        )?)
    }

    fn partitions_with_cycles(
        &self,
        operation: CycleOperation,
    ) -> Result<Vec<Partition>, StoreError> {
        let partitions = self.with_read(|connection| {
            let mut stmt = connection
                .prepare_cached(
                    "SELECT p.id, p.name FROM partitions p
                     WHERE EXISTS (
                         SELECT 1 FROM cycles c
                         WHERE c.partition_id = p.id AND c.operation = ?1
                           AND c.time_end IS NOT NULL
                     )
                     ORDER BY p.id",
                )
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![operation.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(db_error)?;
            let raw = rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?;
            raw.into_iter()
                .map(|(id, name)| {
                    Ok(Partition {
                        id: partition_id_from(id)?,
                        name,
                    })
                })
                .collect::<Result<Vec<_>, SqliteStoreError>>()
        })?;
        Ok(partitions)
    }
}

impl SnapshotCache for SqliteSnapshotStore {
    fn ensure_cached(
        &self,
        cycle: CycleId,
        partition: PartitionId,
    ) -> Result<CacheOutcome, StoreError> {
        Ok(self.ensure_cycle_cached(cycle, partition)?)
    }

    fn usage_count(&self, cycle: CycleId) -> Result<u64, StoreError> {
        let run_id = sql_id(cycle.get())?;
        Ok(self.with_read(|connection| {
            count(connection, "SELECT COUNT(*) FROM snapshot_usage WHERE run_id = ?1", run_id)
        })?)
    }
}

impl ReportSource for SqliteSnapshotStore {
    fn site_aggregates(&self, cycle: CycleId) -> Result<Vec<SiteAggregate>, StoreError> {
        let run_id = sql_id(cycle.get())?;
        Ok(self.with_read(|connection| {
            let mut stmt = connection
                .prepare_cached(
                    "SELECT si.name, d.decision, SUM(s.size)
                     FROM snapshot_cache c
                     JOIN replica_size_snapshots s ON s.id = c.size_snapshot_id
                     JOIN sites si ON si.id = c.site_id
                     JOIN deletion_decisions d ON d.id = c.decision_id
                     WHERE c.run_id = ?1
                     GROUP BY si.name, d.decision
                     ORDER BY si.name",
                )
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![run_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(db_error)?;
            let raw = rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?;
            raw.into_iter()
                .map(|(site, decision, size_bytes)| {
                    Ok(SiteAggregate {
                        site: SiteName::new(site),
                        decision: parse_decision(&decision)?,
                        size_bytes,
                    })
                })
                .collect::<Result<Vec<_>, SqliteStoreError>>()
        })?)
    }

    fn site_contexts(
        &self,
        cycle: CycleId,
        partition: PartitionId,
    ) -> Result<Vec<SiteContext>, StoreError> {
        let run_id = sql_id(cycle.get())?;
        let partition_id = sql_id(partition.get())?;
        Ok(self.with_read(|connection| {
            let mut stmt = connection
                .prepare_cached(
                    "SELECT si.name, q.quota_tb, st.status, st.activity
                     FROM quota_snapshots q
                     JOIN (
                         SELECT site_id, MAX(run_id) AS run_id FROM quota_snapshots
                         WHERE partition_id = ?2 AND run_id <= ?1
                         GROUP BY site_id
                     ) latest_quota
                         ON latest_quota.site_id = q.site_id
                        AND latest_quota.run_id = q.run_id
                     JOIN sites si ON si.id = q.site_id
                     LEFT JOIN (
                         SELECT site_id, MAX(run_id) AS run_id FROM site_status_snapshots
                         WHERE run_id <= ?1
                         GROUP BY site_id
                     ) latest_status ON latest_status.site_id = q.site_id
                     LEFT JOIN site_status_snapshots st
                         ON st.site_id = latest_status.site_id
                        AND st.run_id = latest_status.run_id
                     WHERE q.partition_id = ?2
                     ORDER BY si.name",
                )
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![run_id, partition_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(db_error)?;
            let raw = rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?;
            Ok(raw
                .into_iter()
                .map(|(site, quota_tb, status, activity)| SiteContext {
                    site: SiteName::new(site),
                    quota_tb,
                    status: SiteStatus::classify(
                        status.as_deref().map_or(SiteStorageStatus::default(), SiteStorageStatus::parse),
                        activity.as_deref().map_or(SiteActivity::default(), SiteActivity::parse),
                    ),
                })
                .collect())
        })?)
    }

    fn replicas_at_sites(
        &self,
        cycle: CycleId,
        site: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self.cached_replicas(cycle, Some((ReplicaFilter::Site, site)))?)
    }

    fn replicas_of_datasets(
        &self,
        cycle: CycleId,
        dataset: &NamePattern,
    ) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self.cached_replicas(cycle, Some((ReplicaFilter::Dataset, dataset)))?)
    }

    fn all_replicas(&self, cycle: CycleId) -> Result<Vec<CachedReplica>, StoreError> {
        Ok(self.cached_replicas(cycle, None)?)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn readiness(&self) -> Result<(), StoreError> {
        self.check_connection().map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Column a cached-replica read is filtered on.
#[derive(Debug, Clone, Copy)]
enum ReplicaFilter {
    /// Site name.
    Site,
    /// Dataset name.
    Dataset,
}

impl ReplicaFilter {
    /// Returns the qualified SQL column.
    const fn column(self) -> &'static str {
        match self {
            Self::Site => "si.name",
            Self::Dataset => "ds.name",
        }
    }
}

/// Cached replica row before domain validation.
struct RawReplica {
    /// Site name.
    site: String,
    /// Dataset name.
    dataset: String,
    /// Size in bytes.
    size: i64,
    /// Decision label, absent when undecided.
    decision: Option<String>,
    /// Matched condition id.
    condition_id: Option<i64>,
    /// Matched condition text.
    condition_text: Option<String>,
    /// Owning group.
    group: Option<String>,
}

impl RawReplica {
    /// Validates the row into a [`CachedReplica`].
    fn into_replica(self) -> Result<CachedReplica, SqliteStoreError> {
        let decision = self.decision.as_deref().map(parse_decision).transpose()?;
        let condition = match self.condition_id {
            Some(id) => Some(PolicyCondition {
                id: ConditionId::new(u64::try_from(id).map_err(|_| {
                    SqliteStoreError::Invalid(format!("negative condition id {id}"))
                })?),
                text: self.condition_text.unwrap_or_default(),
            }),
            None => None,
        };
        Ok(CachedReplica {
            site: SiteName::new(self.site),
            dataset: DatasetName::new(self.dataset),
            size_bytes: self.size,
            decision,
            condition,
            group: self.group,
        })
    }
}

/// Reads a [`RawReplica`] from a [`CACHED_REPLICA_SQL`] row.
fn raw_replica(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReplica> {
    Ok(RawReplica {
        site: row.get(0)?,
        dataset: row.get(1)?,
        size: row.get(2)?,
        decision: row.get(3)?,
        condition_id: row.get(4)?,
        condition_text: row.get(5)?,
        group: row.get(6)?,
    })
}

/// Cycle row before domain validation.
struct RawCycle {
    /// Cycle id.
    id: i64,
    /// Partition id.
    partition_id: i64,
    /// Operation label.
    operation: String,
    /// Policy version.
    policy_version: String,
    /// Operator comment.
    comment: String,
    /// Start time, unix seconds.
    time_start: i64,
    /// End time, unix seconds.
    time_end: Option<i64>,
}

impl RawCycle {
    /// Validates the row into a [`Cycle`].
    fn into_cycle(self) -> Result<Cycle, SqliteStoreError> {
        let operation = CycleOperation::parse(&self.operation).ok_or_else(|| {
            SqliteStoreError::Invalid(format!("unknown cycle operation: {}", self.operation))
        })?;
        Ok(Cycle {
            id: cycle_id_from(self.id)?,
            partition_id: partition_id_from(self.partition_id)?,
            operation,
            policy_version: self.policy_version,
            comment: self.comment,
            time_start: self.time_start,
            time_end: self.time_end,
        })
    }
}

/// Reads a [`RawCycle`] from a [`CYCLE_COLUMNS`] row.
fn raw_cycle(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCycle> {
    Ok(RawCycle {
        id: row.get(0)?,
        partition_id: row.get(1)?,
        operation: row.get(2)?,
        policy_version: row.get(3)?,
        comment: row.get(4)?,
        time_start: row.get(5)?,
        time_end: row.get(6)?,
    })
}

/// Parses a stored decision label.
fn parse_decision(label: &str) -> Result<Decision, SqliteStoreError> {
    Decision::parse(label)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown decision: {label}")))
}

/// Converts a stored id to a cycle identifier.
fn cycle_id_from(raw: i64) -> Result<CycleId, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(CycleId::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid cycle id {raw}")))
}

/// Converts a stored id to a partition identifier.
fn partition_id_from(raw: i64) -> Result<PartitionId, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(PartitionId::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid partition id {raw}")))
}

/// Converts an identifier to an `SQLite` integer.
fn sql_id(raw: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(raw)
        .map_err(|_| SqliteStoreError::Invalid(format!("identifier {raw} exceeds sqlite range")))
}

/// Runs a single-parameter `COUNT(*)` query.
fn count(connection: &Connection, sql: &str, run_id: i64) -> Result<u64, SqliteStoreError> {
    let value: i64 = connection.query_row(sql, params![run_id], |row| row.get(0)).map_err(db_error)?;
    Ok(value.unsigned_abs())
}

// ============================================================================
// SECTION: Import
// ============================================================================

/// Name lookup tables interned during import.
#[derive(Debug, Clone, Copy)]
enum NameTable {
    /// `sites`.
    Sites,
    /// `datasets`.
    Datasets,
}

impl NameTable {
    /// Returns the insert-if-absent statement.
    const fn insert_sql(self) -> &'static str {
        match self {
            Self::Sites => "INSERT OR IGNORE INTO sites (name) VALUES (?1)",
            Self::Datasets => "INSERT OR IGNORE INTO datasets (name) VALUES (?1)",
        }
    }

    /// Returns the id lookup statement.
    const fn select_sql(self) -> &'static str {
        match self {
            Self::Sites => "SELECT id FROM sites WHERE name = ?1",
            Self::Datasets => "SELECT id FROM datasets WHERE name = ?1",
        }
    }
}

/// Returns the row id for `name`, inserting it when new.
fn intern(tx: &Transaction<'_>, table: NameTable, name: &str) -> Result<i64, SqliteStoreError> {
    if name.is_empty() {
        return Err(SqliteStoreError::Invalid("site and dataset names must not be empty".to_string()));
    }
    tx.prepare_cached(table.insert_sql()).map_err(db_error)?.execute(params![name]).map_err(db_error)?;
    tx.prepare_cached(table.select_sql())
        .map_err(db_error)?
        .query_row(params![name], |row| row.get(0))
        .map_err(db_error)
}

/// Converts an affected-row count.
fn changed(rows: usize) -> u64 {
    u64::try_from(rows).unwrap_or(u64::MAX)
}

/// Writes every row of `batch` inside `tx`.
fn import_batch(tx: &Transaction<'_>, batch: &FactBatch) -> Result<ImportSummary, SqliteStoreError> {
    let mut summary = ImportSummary::default();

    for partition in &batch.partitions {
        summary.partitions += changed(
            tx.execute(
                "INSERT OR IGNORE INTO partitions (id, name) VALUES (?1, ?2)",
                params![sql_id(partition.id.get())?, partition.name],
            )
            .map_err(db_error)?,
        );
    }

    for condition in &batch.conditions {
        summary.conditions += changed(
            tx.execute(
                "INSERT OR IGNORE INTO policy_conditions (id, text) VALUES (?1, ?2)",
                params![sql_id(condition.id.get())?, condition.text],
            )
            .map_err(db_error)?,
        );
    }

    for cycle in &batch.cycles {
        summary.cycles += changed(
            tx.execute(
                "INSERT INTO cycles
                     (id, partition_id, operation, policy_version, comment, time_start, time_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET time_end = excluded.time_end
                 WHERE cycles.time_end IS NULL AND excluded.time_end IS NOT NULL",
                params![
                    sql_id(cycle.id.get())?,
                    sql_id(cycle.partition_id.get())?,
                    cycle.operation.as_str(),
                    cycle.policy_version,
                    cycle.comment,
                    cycle.time_start,
                    cycle.time_end,
                ],
            )
            .map_err(db_error)?,
        );
    }

    for size in &batch.sizes {
        if size.size < 0 {
            return Err(SqliteStoreError::Invalid(format!(
                "negative size for {} at {}",
                size.dataset, size.site
            )));
        }
        let site_id = intern(tx, NameTable::Sites, size.site.as_str())?;
        let dataset_id = intern(tx, NameTable::Datasets, size.dataset.as_str())?;
        summary.sizes += changed(
            tx.prepare_cached(
                "INSERT OR IGNORE INTO replica_size_snapshots
                     (run_id, partition_id, site_id, dataset_id, size, group_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(db_error)?
            .execute(params![
                sql_id(size.run_id.get())?,
                sql_id(size.partition_id.get())?,
                site_id,
                dataset_id,
                size.size,
                size.group,
            ])
            .map_err(db_error)?,
        );
    }

    for decision in &batch.decisions {
        let site_id = intern(tx, NameTable::Sites, decision.site.as_str())?;
        let dataset_id = intern(tx, NameTable::Datasets, decision.dataset.as_str())?;
        let condition_id = decision.condition_id.map(|id| sql_id(id.get())).transpose()?;
        summary.decisions += changed(
            tx.prepare_cached(
                "INSERT OR IGNORE INTO deletion_decisions
                     (run_id, partition_id, site_id, dataset_id, decision, condition_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(db_error)?
            .execute(params![
                sql_id(decision.run_id.get())?,
                sql_id(decision.partition_id.get())?,
                site_id,
                dataset_id,
                decision.decision.as_str(),
                condition_id,
            ])
            .map_err(db_error)?,
        );
    }

    for quota in &batch.quotas {
        let site_id = intern(tx, NameTable::Sites, quota.site.as_str())?;
        summary.quotas += changed(
            tx.execute(
                "INSERT OR IGNORE INTO quota_snapshots (run_id, partition_id, site_id, quota_tb)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sql_id(quota.run_id.get())?,
                    sql_id(quota.partition_id.get())?,
                    site_id,
                    quota.quota_tb,
                ],
            )
            .map_err(db_error)?,
        );
    }

    for state in &batch.site_statuses {
        let site_id = intern(tx, NameTable::Sites, state.site.as_str())?;
        summary.site_statuses += changed(
            tx.execute(
                "INSERT OR IGNORE INTO site_status_snapshots (run_id, site_id, status, activity)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sql_id(state.run_id.get())?,
                    site_id,
                    state.status.as_str(),
                    state.activity.as_str(),
                ],
            )
            .map_err(db_error)?,
        );
    }

    Ok(summary)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS partitions (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS cycles (
                    id INTEGER PRIMARY KEY,
                    partition_id INTEGER NOT NULL REFERENCES partitions(id),
                    operation TEXT NOT NULL,
                    policy_version TEXT NOT NULL,
                    comment TEXT NOT NULL,
                    time_start INTEGER NOT NULL,
                    time_end INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_cycles_partition
                    ON cycles (partition_id, operation, id);
                CREATE TABLE IF NOT EXISTS sites (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS datasets (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS policy_conditions (
                    id INTEGER PRIMARY KEY,
                    text TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS replica_size_snapshots (
                    id INTEGER PRIMARY KEY,
                    run_id INTEGER NOT NULL,
                    partition_id INTEGER NOT NULL,
                    site_id INTEGER NOT NULL REFERENCES sites(id),
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
                    size INTEGER NOT NULL,
                    group_name TEXT,
                    UNIQUE (run_id, partition_id, site_id, dataset_id)
                );
                CREATE INDEX IF NOT EXISTS idx_sizes_as_of
                    ON replica_size_snapshots (partition_id, site_id, dataset_id, run_id);
                CREATE TABLE IF NOT EXISTS deletion_decisions (
                    id INTEGER PRIMARY KEY,
                    run_id INTEGER NOT NULL,
                    partition_id INTEGER NOT NULL,
                    site_id INTEGER NOT NULL REFERENCES sites(id),
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
                    decision TEXT NOT NULL CHECK (decision IN ('protect', 'keep', 'delete')),
                    condition_id INTEGER,
                    UNIQUE (run_id, partition_id, site_id, dataset_id)
                );
                CREATE INDEX IF NOT EXISTS idx_decisions_as_of
                    ON deletion_decisions (partition_id, site_id, dataset_id, run_id);
                CREATE TABLE IF NOT EXISTS quota_snapshots (
                    run_id INTEGER NOT NULL,
                    partition_id INTEGER NOT NULL,
                    site_id INTEGER NOT NULL REFERENCES sites(id),
                    quota_tb REAL,
                    PRIMARY KEY (run_id, partition_id, site_id)
                );
                CREATE TABLE IF NOT EXISTS site_status_snapshots (
                    run_id INTEGER NOT NULL,
                    site_id INTEGER NOT NULL REFERENCES sites(id),
                    status TEXT NOT NULL,
                    activity TEXT NOT NULL,
                    PRIMARY KEY (run_id, site_id)
                );
                CREATE TABLE IF NOT EXISTS snapshot_cache (
                    id INTEGER PRIMARY KEY,
                    run_id INTEGER NOT NULL,
                    partition_id INTEGER NOT NULL,
                    site_id INTEGER NOT NULL,
                    dataset_id INTEGER NOT NULL,
                    size_snapshot_id INTEGER NOT NULL REFERENCES replica_size_snapshots(id),
                    decision_id INTEGER REFERENCES deletion_decisions(id),
                    UNIQUE (run_id, site_id, dataset_id)
                );
                CREATE TABLE IF NOT EXISTS snapshot_cache_builds (
                    run_id INTEGER PRIMARY KEY,
                    partition_id INTEGER NOT NULL,
                    built_at INTEGER NOT NULL,
                    row_count INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS snapshot_usage (
                    id INTEGER PRIMARY KEY,
                    run_id INTEGER NOT NULL,
                    accessed_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_snapshot_usage_run
                    ON snapshot_usage (run_id);",
            )
            .map_err(db_error)?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected schema version {SCHEMA_VERSION}, found {other}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
