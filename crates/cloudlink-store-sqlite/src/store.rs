// crates/cloudlink-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Staging Store
// Description: Durable StagingStore backed by SQLite WAL.
// Purpose: Sequence, deduplicate, batch and prune per-node sync records.
// Dependencies: cloudlink-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`StagingStore`] using `SQLite`. Each node
//! owns three tables per stream, named after the node id:
//! - `sync_<stream>_<node>`: staged records keyed by an `AUTOINCREMENT`
//!   sequence id, unique on `(entity_id, status)`.
//! - `sync_<stream>_payload_<node>`: payload blobs keyed by `unique_id`.
//! - `sync_<stream>_latest_<node>`: latest submitted version per entity.
//!
//! Batch counters live in the shared `sync_streams` table. Every mutation runs
//! in one transaction on the write connection; reads use a round-robin pool.
//! Security posture: database contents are untrusted and are parsed back into
//! typed identifiers, failing closed on corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cloudlink_core::AckReport;
use cloudlink_core::AckTarget;
use cloudlink_core::BatchId;
use cloudlink_core::BatchLimits;
use cloudlink_core::BatchOutcome;
use cloudlink_core::EntityType;
use cloudlink_core::NodeId;
use cloudlink_core::PruneReport;
use cloudlink_core::RecordStatus;
use cloudlink_core::SequenceId;
use cloudlink_core::StageOutcome;
use cloudlink_core::StageRequest;
use cloudlink_core::StagedRecord;
use cloudlink_core::StagingStore;
use cloudlink_core::StoreError;
use cloudlink_core::Stream;
use cloudlink_core::StreamCursor;
use cloudlink_core::StreamStatus;
use cloudlink_core::SubmissionBatch;
use cloudlink_core::UniqueId;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
pub const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of read connections.
const DEFAULT_READ_POOL_SIZE: usize = 2;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Columns selected for a staged record joined with its payload.
const RECORD_COLUMNS: &str = "r.sequence_id, r.entity_id, r.entity_type, r.unique_id, r.status, \
                              r.batch_id, r.date_created, r.date_updated, r.date_submitted, \
                              r.date_acked, r.update_count, p.payload";

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

/// Configuration for the `SQLite` staging store.
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
    /// Number of read-only connections used for status queries.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for everything but the path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
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
/// - Error messages avoid embedding raw payload bytes.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data fails to parse.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid request or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Node tables do not exist.
    #[error("sqlite store has no tables for node {0}")]
    MissingNode(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::MissingNode(node) => Self::MissingNode(node),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed staging store with WAL support.
///
/// # Invariants
/// - Writes are serialized through the write connection mutex, one
///   transaction per operation.
/// - Table names embed only `[0-9a-f_]` characters derived from node ids.
#[derive(Clone)]
pub struct SqliteStagingStore {
    /// Shared writer connection guarded by a mutex.
    write_connection: Arc<Mutex<Connection>>,
    /// Read connection pool.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
}

impl SqliteStagingStore {
    /// Opens an `SQLite`-backed staging store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe or the database
    /// cannot be opened or initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if config.read_pool_size == 0 {
            return Err(SqliteStoreError::Invalid(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        ensure_parent_dir(&config.path)?;
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

    /// Runs `operation` in one write transaction.
    fn write<T>(
        &self,
        operation: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .write_connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite write mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(map_db_error)?;
        let value = operation(&tx)?;
        tx.commit().map_err(map_db_error)?;
        Ok(value)
    }

    /// Runs `operation` on the next pooled read connection.
    fn read<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let len = self.read_connections.len();
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % len;
        let guard = self.read_connections[index]
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite read mutex poisoned".to_string()))?;
        operation(&guard)
    }

    // ------------------------------------------------------------------------
    // Node Tables
    // ------------------------------------------------------------------------

    /// Creates every table of a node.
    fn ensure_node_tables(&self, node: &NodeId) -> Result<(), SqliteStoreError> {
        self.write(|tx| {
            for stream in Stream::ALL {
                let tables = StreamTables::new(node, stream);
                tx.execute_batch(&tables.create_sql()).map_err(map_db_error)?;
                tx.execute(
                    "INSERT OR IGNORE INTO sync_streams (node_id, stream, last_batch_id) VALUES \
                     (?1, ?2, 0)",
                    params![node.to_string(), stream.as_str()],
                )
                .map_err(map_db_error)?;
            }
            Ok(())
        })
    }

    /// Drops every table of a node.
    fn drop_node_tables(&self, node: &NodeId) -> Result<(), SqliteStoreError> {
        self.write(|tx| {
            for stream in Stream::ALL {
                let tables = StreamTables::new(node, stream);
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {records}; DROP TABLE IF EXISTS {payload}; DROP TABLE \
                     IF EXISTS {latest};",
                    records = tables.records,
                    payload = tables.payload,
                    latest = tables.latest,
                ))
                .map_err(map_db_error)?;
            }
            tx.execute("DELETE FROM sync_streams WHERE node_id = ?1", params![node.to_string()])
                .map_err(map_db_error)?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    /// Writes a payload blob and upserts the pending row of the entity.
    fn stage_record(
        &self,
        node: &NodeId,
        entity_type: EntityType,
        request: &StageRequest,
        now: u64,
    ) -> Result<StageOutcome, SqliteStoreError> {
        let tables = StreamTables::new(node, entity_type.stream());
        let now = sql_int(now, "timestamp")?;
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let unique_id = UniqueId::generate().to_string();
            let entity_id = request.entity_id.to_string();
            tx.execute(
                &format!(
                    "INSERT INTO {} (unique_id, entity_id, claim_id, entity_type, date_created, \
                     payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    tables.payload
                ),
                params![
                    unique_id,
                    entity_id,
                    request.claim_id,
                    entity_type.as_str(),
                    now,
                    request.payload
                ],
            )
            .map_err(map_db_error)?;
            let (sequence_id, update_count): (i64, i64) = tx
                .query_row(
                    &format!(
                        "INSERT INTO {records} (entity_id, entity_type, unique_id, status, \
                         date_created, update_count) VALUES (?1, ?2, ?3, 'pending', ?4, 1) ON \
                         CONFLICT (entity_id, status) DO UPDATE SET unique_id = \
                         excluded.unique_id, date_updated = excluded.date_created, update_count \
                         = {records}.update_count + 1 RETURNING sequence_id, update_count",
                        records = tables.records
                    ),
                    params![entity_id, entity_type.as_str(), unique_id, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(map_db_error)?;
            let update_count = from_sql_int(update_count, "update_count")?;
            Ok(StageOutcome {
                sequence_id: SequenceId::new(from_sql_int(sequence_id, "sequence_id")?),
                update_count,
                deduplicated: update_count > 1,
            })
        })
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    /// Opens the next batch from pending and abandoned rows.
    fn start_batch_inner(
        &self,
        node: &NodeId,
        stream: Stream,
        limits: BatchLimits,
        now: u64,
    ) -> Result<BatchOutcome, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        let max_records = i64::try_from(limits.max_records())
            .map_err(|_| SqliteStoreError::Invalid("batch limits too large".to_string()))?;
        if max_records == 0 {
            return Err(SqliteStoreError::Invalid("batch limits must be non-zero".to_string()));
        }
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let state = load_stream_state(tx, node, stream)?;
            if let Some(open_batch) = state.open_batch_id {
                if count_sent_in_batch(tx, &tables, open_batch)? > 0 {
                    return Ok(BatchOutcome::Blocked {
                        open_batch: BatchId::new(open_batch),
                    });
                }
                clear_open_batch(tx, node, stream)?;
            }

            let candidates = select_rows(
                tx,
                &format!(
                    "SELECT sequence_id, entity_id, status FROM {} WHERE status = 'pending' OR \
                     (status = 'sent' AND batch_id IS NULL) ORDER BY sequence_id ASC LIMIT ?1",
                    tables.records
                ),
                params![max_records],
            )?;
            let pending_entities: BTreeSet<&str> = candidates
                .iter()
                .filter(|row| row.status == RecordStatus::Pending.as_str())
                .map(|row| row.entity_id.as_str())
                .collect();
            let selected: Vec<&CandidateRow> = candidates
                .iter()
                .filter(|row| {
                    row.status == RecordStatus::Pending.as_str()
                        || !pending_entities.contains(row.entity_id.as_str())
                })
                .collect();
            if selected.is_empty() {
                return Ok(BatchOutcome::Idle);
            }

            let batch_id = state.last_batch_id.saturating_add(1);
            let sql_batch = sql_int(batch_id, "batch_id")?;
            let sql_now = sql_int(now, "timestamp")?;
            for row in &selected {
                if row.status == RecordStatus::Pending.as_str() {
                    delete_sent_rows_of(tx, &tables, &row.entity_id)?;
                }
                mark_sent(tx, &tables, row.sequence_id, sql_batch, sql_now)?;
            }
            let sequence_ids: Vec<i64> = selected.iter().map(|row| row.sequence_id).collect();
            record_latest(tx, &tables, &sequence_ids, sql_now)?;
            open_batch(tx, node, stream, sql_batch, Some(sql_batch), sql_now)?;
            let records = load_records(tx, &tables, &sequence_ids)?;
            Ok(BatchOutcome::Started(SubmissionBatch {
                stream,
                batch_id: BatchId::new(batch_id),
                records,
            }))
        })
    }

    /// Applies an acknowledgement to `sent` rows.
    fn ack_inner(
        &self,
        node: &NodeId,
        stream: Stream,
        target: AckTarget,
        now: u64,
    ) -> Result<AckReport, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        let now = sql_int(now, "timestamp")?;
        let base = format!(
            "SELECT sequence_id, entity_id, status FROM {} WHERE status = 'sent' AND ",
            tables.records
        );
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let rows = match target {
                AckTarget::Identity {
                    entity_id,
                } => select_rows(
                    tx,
                    &format!("{base}entity_id = ?1 ORDER BY sequence_id"),
                    params![entity_id.to_string()],
                )?,
                AckTarget::UpTo {
                    sequence_id,
                } => select_rows(
                    tx,
                    &format!("{base}sequence_id <= ?1 ORDER BY sequence_id"),
                    params![sql_int(sequence_id.get(), "sequence_id")?],
                )?,
                AckTarget::Range {
                    first,
                    last,
                } => {
                    if first > last {
                        return Err(SqliteStoreError::Invalid(format!(
                            "ack range is inverted: {first} > {last}"
                        )));
                    }
                    select_rows(
                        tx,
                        &format!("{base}sequence_id BETWEEN ?1 AND ?2 ORDER BY sequence_id"),
                        params![
                            sql_int(first.get(), "sequence_id")?,
                            sql_int(last.get(), "sequence_id")?
                        ],
                    )?
                }
                AckTarget::Batch {
                    batch_id,
                } => select_rows(
                    tx,
                    &format!("{base}batch_id = ?1 ORDER BY sequence_id"),
                    params![sql_int(batch_id.get(), "batch_id")?],
                )?,
            };
            for row in &rows {
                tx.execute(
                    &format!(
                        "DELETE FROM {} WHERE entity_id = ?1 AND status = 'ack'",
                        tables.records
                    ),
                    params![row.entity_id],
                )
                .map_err(map_db_error)?;
                tx.execute(
                    &format!(
                        "UPDATE {} SET status = 'ack', date_acked = ?1 WHERE sequence_id = ?2",
                        tables.records
                    ),
                    params![now, row.sequence_id],
                )
                .map_err(map_db_error)?;
            }
            let state = load_stream_state(tx, node, stream)?;
            if let Some(open_batch) = state.open_batch_id
                && count_sent_in_batch(tx, &tables, open_batch)? == 0
            {
                clear_open_batch(tx, node, stream)?;
            }
            Ok(AckReport {
                acked: rows.len(),
            })
        })
    }

    /// Detaches the open batch.
    fn abandon_inner(
        &self,
        node: &NodeId,
        stream: Stream,
    ) -> Result<Option<BatchId>, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            abandon_open_batch(tx, node, stream, &tables)
        })
    }

    /// Re-batches every row at or above `start`.
    fn resume_inner(
        &self,
        node: &NodeId,
        stream: Stream,
        start: SequenceId,
        now: u64,
    ) -> Result<BatchOutcome, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        let start = sql_int(start.get(), "sequence_id")?;
        let sql_now = sql_int(now, "timestamp")?;
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            abandon_open_batch(tx, node, stream, &tables)?;
            let rows = select_rows(
                tx,
                &format!(
                    "SELECT sequence_id, entity_id, status FROM {} WHERE sequence_id >= ?1 ORDER \
                     BY sequence_id ASC",
                    tables.records
                ),
                params![start],
            )?;
            let pending_entities: BTreeSet<&str> = rows
                .iter()
                .filter(|row| row.status == RecordStatus::Pending.as_str())
                .map(|row| row.entity_id.as_str())
                .collect();
            let replayed: Vec<&CandidateRow> = rows
                .iter()
                .filter(|row| {
                    row.status != RecordStatus::Sent.as_str()
                        || !pending_entities.contains(row.entity_id.as_str())
                })
                .collect();
            if replayed.is_empty() {
                return Ok(BatchOutcome::Idle);
            }

            let state = load_stream_state(tx, node, stream)?;
            let batch_id = state.last_batch_id.saturating_add(1);
            let sql_batch = sql_int(batch_id, "batch_id")?;
            let mut submitted = Vec::new();
            for row in &replayed {
                if row.status == RecordStatus::Ack.as_str() {
                    continue;
                }
                if row.status == RecordStatus::Pending.as_str() {
                    delete_sent_rows_of(tx, &tables, &row.entity_id)?;
                }
                mark_sent(tx, &tables, row.sequence_id, sql_batch, sql_now)?;
                submitted.push(row.sequence_id);
            }
            record_latest(tx, &tables, &submitted, sql_now)?;
            let open = if submitted.is_empty() { None } else { Some(sql_batch) };
            open_batch(tx, node, stream, sql_batch, open, sql_now)?;
            let sequence_ids: Vec<i64> = replayed.iter().map(|row| row.sequence_id).collect();
            let records = load_records(tx, &tables, &sequence_ids)?;
            Ok(BatchOutcome::Started(SubmissionBatch {
                stream,
                batch_id: BatchId::new(batch_id),
                records,
            }))
        })
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Deletes expired acks, superseded rows and orphan payloads.
    fn prune_inner(
        &self,
        node: &NodeId,
        stream: Stream,
        ack_cutoff: u64,
    ) -> Result<PruneReport, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        let ack_cutoff = sql_int(ack_cutoff, "timestamp")?;
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let expired_acks = tx
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE status = 'ack' AND date_acked < ?1",
                        tables.records
                    ),
                    params![ack_cutoff],
                )
                .map_err(map_db_error)?;
            let superseded = delete_superseded(tx, &tables)?;
            let orphan_payloads = delete_orphan_payloads(tx, &tables)?;
            Ok(PruneReport {
                expired_acks,
                superseded,
                orphan_payloads,
            })
        })
    }

    /// Deletes superseded rows and their payloads.
    fn dedup_inner(&self, node: &NodeId, stream: Stream) -> Result<usize, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let removed = delete_superseded(tx, &tables)?;
            delete_orphan_payloads(tx, &tables)?;
            Ok(removed)
        })
    }

    /// Keeps the newest `max_rows` acknowledged rows.
    fn enforce_ack_limit_inner(
        &self,
        node: &NodeId,
        stream: Stream,
        max_rows: usize,
    ) -> Result<usize, SqliteStoreError> {
        if max_rows == 0 {
            return Err(SqliteStoreError::Invalid("max_rows must be greater than zero".to_string()));
        }
        let max_rows = i64::try_from(max_rows)
            .map_err(|_| SqliteStoreError::Invalid("max_rows too large".to_string()))?;
        let tables = StreamTables::new(node, stream);
        self.write(|tx| {
            require_tables(tx, node, &tables)?;
            let acked: i64 = tx
                .query_row(
                    &format!("SELECT COUNT(1) FROM {} WHERE status = 'ack'", tables.records),
                    params![],
                    |row| row.get(0),
                )
                .map_err(map_db_error)?;
            if acked <= max_rows {
                return Ok(0);
            }
            let removed = tx
                .execute(
                    &format!(
                        "DELETE FROM {records} WHERE sequence_id IN (SELECT sequence_id FROM \
                         {records} WHERE status = 'ack' ORDER BY sequence_id ASC LIMIT ?1)",
                        records = tables.records
                    ),
                    params![acked - max_rows],
                )
                .map_err(map_db_error)?;
            delete_orphan_payloads(tx, &tables)?;
            Ok(removed)
        })
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Reads the durable counters of a stream.
    fn cursor_inner(&self, node: &NodeId, stream: Stream) -> Result<StreamCursor, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        self.read(|connection| {
            require_tables(connection, node, &tables)?;
            read_cursor(connection, node, stream, &tables)
        })
    }

    /// Reads a stream summary.
    fn status_inner(&self, node: &NodeId, stream: Stream) -> Result<StreamStatus, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        self.read(|connection| {
            require_tables(connection, node, &tables)?;
            let cursor = read_cursor(connection, node, stream, &tables)?;
            let state = load_stream_state(connection, node, stream)?;
            let mut statement = connection
                .prepare(&format!(
                    "SELECT status, COUNT(1) FROM {} GROUP BY status",
                    tables.records
                ))
                .map_err(map_db_error)?;
            let counts = statement
                .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(map_db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_db_error)?;
            let mut status = StreamStatus {
                stream,
                first_sequence_id: None,
                last_sequence_id: cursor.last_sequence_id,
                pending: 0,
                sent: 0,
                acked: 0,
                last_batch_id: cursor.last_batch_id,
                open_batch_id: state.open_batch_id.map(BatchId::new),
                batch_created: state.batch_created,
            };
            for (label, count) in counts {
                let count = from_sql_int(count, "row count")?;
                match RecordStatus::parse(&label) {
                    Some(RecordStatus::Pending) => status.pending = count,
                    Some(RecordStatus::Sent) => status.sent = count,
                    Some(RecordStatus::Ack) => status.acked = count,
                    None => {
                        return Err(SqliteStoreError::Corrupt(format!(
                            "unknown record status: {label}"
                        )));
                    }
                }
            }
            let first: Option<i64> = connection
                .query_row(
                    &format!("SELECT MIN(sequence_id) FROM {}", tables.records),
                    params![],
                    |row| row.get(0),
                )
                .map_err(map_db_error)?;
            status.first_sequence_id = first
                .map(|value| from_sql_int(value, "sequence_id").map(SequenceId::new))
                .transpose()?;
            Ok(status)
        })
    }

    /// Reads every row of a stream.
    fn records_inner(
        &self,
        node: &NodeId,
        stream: Stream,
    ) -> Result<Vec<StagedRecord>, SqliteStoreError> {
        let tables = StreamTables::new(node, stream);
        self.read(|connection| {
            require_tables(connection, node, &tables)?;
            let mut statement = connection
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM {} r LEFT JOIN {} p ON p.unique_id = \
                     r.unique_id ORDER BY r.sequence_id ASC",
                    tables.records, tables.payload
                ))
                .map_err(map_db_error)?;
            let rows = statement
                .query_map(params![], map_record_row)
                .map_err(map_db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_db_error)?;
            rows.into_iter().map(RawRecord::into_record).collect()
        })
    }

    /// Reports whether every table of the node exists.
    fn node_tables_exist(&self, node: &NodeId) -> Result<bool, SqliteStoreError> {
        self.read(|connection| {
            for stream in Stream::ALL {
                if !tables_exist(connection, &StreamTables::new(node, stream))? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

impl StagingStore for SqliteStagingStore {
    fn ensure_node(&self, node: &NodeId) -> Result<(), StoreError> {
        Ok(self.ensure_node_tables(node)?)
    }

    fn node_exists(&self, node: &NodeId) -> Result<bool, StoreError> {
        Ok(self.node_tables_exist(node)?)
    }

    fn drop_node(&self, node: &NodeId) -> Result<(), StoreError> {
        Ok(self.drop_node_tables(node)?)
    }

    fn stage(
        &self,
        node: &NodeId,
        entity_type: EntityType,
        request: &StageRequest,
        now: u64,
    ) -> Result<StageOutcome, StoreError> {
        Ok(self.stage_record(node, entity_type, request, now)?)
    }

    fn start_batch(
        &self,
        node: &NodeId,
        stream: Stream,
        limits: BatchLimits,
        now: u64,
    ) -> Result<BatchOutcome, StoreError> {
        Ok(self.start_batch_inner(node, stream, limits, now)?)
    }

    fn ack(
        &self,
        node: &NodeId,
        stream: Stream,
        target: AckTarget,
        now: u64,
    ) -> Result<AckReport, StoreError> {
        Ok(self.ack_inner(node, stream, target, now)?)
    }

    fn abandon_batch(&self, node: &NodeId, stream: Stream) -> Result<Option<BatchId>, StoreError> {
        Ok(self.abandon_inner(node, stream)?)
    }

    fn prune(
        &self,
        node: &NodeId,
        stream: Stream,
        ack_cutoff: u64,
    ) -> Result<PruneReport, StoreError> {
        Ok(self.prune_inner(node, stream, ack_cutoff)?)
    }

    fn dedup(&self, node: &NodeId, stream: Stream) -> Result<usize, StoreError> {
        Ok(self.dedup_inner(node, stream)?)
    }

    fn enforce_ack_limit(
        &self,
        node: &NodeId,
        stream: Stream,
        max_rows: usize,
    ) -> Result<usize, StoreError> {
        Ok(self.enforce_ack_limit_inner(node, stream, max_rows)?)
    }

    fn resume_from(
        &self,
        node: &NodeId,
        stream: Stream,
        start: SequenceId,
        now: u64,
    ) -> Result<BatchOutcome, StoreError> {
        Ok(self.resume_inner(node, stream, start, now)?)
    }

    fn cursor(&self, node: &NodeId, stream: Stream) -> Result<StreamCursor, StoreError> {
        Ok(self.cursor_inner(node, stream)?)
    }

    fn status(&self, node: &NodeId, stream: Stream) -> Result<StreamStatus, StoreError> {
        Ok(self.status_inner(node, stream)?)
    }

    fn records(&self, node: &NodeId, stream: Stream) -> Result<Vec<StagedRecord>, StoreError> {
        Ok(self.records_inner(node, stream)?)
    }
}

// ============================================================================
// SECTION: Table Names
// ============================================================================

/// Table names of one node stream.
struct StreamTables {
    /// Staged records table.
    records: String,
    /// Payload blob table.
    payload: String,
    /// Latest-submission index table.
    latest: String,
}

impl StreamTables {
    /// Derives the table names of a node stream.
    fn new(node: &NodeId, stream: Stream) -> Self {
        let suffix = node.table_suffix();
        let label = stream.as_str();
        Self {
            records: format!("sync_{label}_{suffix}"),
            payload: format!("sync_{label}_payload_{suffix}"),
            latest: format!("sync_{label}_latest_{suffix}"),
        }
    }

    /// Returns the DDL creating the node stream tables.
    fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {records} (
                sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                unique_id TEXT NOT NULL,
                status TEXT NOT NULL,
                batch_id INTEGER,
                date_created INTEGER NOT NULL,
                date_updated INTEGER,
                date_submitted INTEGER,
                date_acked INTEGER,
                update_count INTEGER NOT NULL DEFAULT 1,
                UNIQUE (entity_id, status)
            );
            CREATE INDEX IF NOT EXISTS idx_{records}_status ON {records} (status, sequence_id);
            CREATE TABLE IF NOT EXISTS {payload} (
                unique_id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                claim_id TEXT,
                entity_type TEXT NOT NULL,
                date_created INTEGER NOT NULL,
                payload BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {latest} (
                entity_id TEXT PRIMARY KEY,
                unique_id TEXT NOT NULL,
                sequence_id INTEGER NOT NULL,
                date_submitted INTEGER NOT NULL
            );",
            records = self.records,
            payload = self.payload,
            latest = self.latest,
        )
    }
}

// ============================================================================
// SECTION: Row Helpers
// ============================================================================

/// Minimal row used when selecting batch candidates.
struct CandidateRow {
    /// Sequence id.
    sequence_id: i64,
    /// Entity id as stored.
    entity_id: String,
    /// Status label as stored.
    status: String,
}

/// Batch counters of one node stream.
struct StreamState {
    /// Highest batch id ever opened.
    last_batch_id: u64,
    /// Batch awaiting acknowledgement.
    open_batch_id: Option<u64>,
    /// Creation time of the open batch.
    batch_created: Option<u64>,
}

/// Staged record as stored, before validation.
struct RawRecord {
    /// Sequence id.
    sequence_id: i64,
    /// Entity id.
    entity_id: String,
    /// Entity type label.
    entity_type: String,
    /// Payload version id.
    unique_id: String,
    /// Status label.
    status: String,
    /// Batch id.
    batch_id: Option<i64>,
    /// Creation time.
    date_created: i64,
    /// Last dedup refresh.
    date_updated: Option<i64>,
    /// Submission time.
    date_submitted: Option<i64>,
    /// Acknowledgement time.
    date_acked: Option<i64>,
    /// Update count.
    update_count: i64,
    /// Payload bytes.
    payload: Option<Vec<u8>>,
}

impl RawRecord {
    /// Validates stored values into a typed record.
    fn into_record(self) -> Result<StagedRecord, SqliteStoreError> {
        Ok(StagedRecord {
            sequence_id: SequenceId::new(from_sql_int(self.sequence_id, "sequence_id")?),
            entity_id: self
                .entity_id
                .parse()
                .map_err(|_| SqliteStoreError::Corrupt("invalid entity_id".to_string()))?,
            entity_type: EntityType::parse(&self.entity_type).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("unknown entity_type: {}", self.entity_type))
            })?,
            unique_id: self
                .unique_id
                .parse()
                .map_err(|_| SqliteStoreError::Corrupt("invalid unique_id".to_string()))?,
            status: RecordStatus::parse(&self.status).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("unknown record status: {}", self.status))
            })?,
            batch_id: optional_int(self.batch_id, "batch_id")?.map(BatchId::new),
            date_created: from_sql_int(self.date_created, "date_created")?,
            date_updated: optional_int(self.date_updated, "date_updated")?,
            date_submitted: optional_int(self.date_submitted, "date_submitted")?,
            date_acked: optional_int(self.date_acked, "date_acked")?,
            update_count: from_sql_int(self.update_count, "update_count")?,
            payload: self.payload,
        })
    }
}

/// Maps a [`RECORD_COLUMNS`] row.
fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        sequence_id: row.get(0)?,
        entity_id: row.get(1)?,
        entity_type: row.get(2)?,
        unique_id: row.get(3)?,
        status: row.get(4)?,
        batch_id: row.get(5)?,
        date_created: row.get(6)?,
        date_updated: row.get(7)?,
        date_submitted: row.get(8)?,
        date_acked: row.get(9)?,
        update_count: row.get(10)?,
        payload: row.get(11)?,
    })
}

/// Loads records by sequence id, preserving the given order.
fn load_records(
    connection: &Connection,
    tables: &StreamTables,
    sequence_ids: &[i64],
) -> Result<Vec<StagedRecord>, SqliteStoreError> {
    let mut statement = connection
        .prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} r LEFT JOIN {} p ON p.unique_id = r.unique_id \
             WHERE r.sequence_id = ?1",
            tables.records, tables.payload
        ))
        .map_err(map_db_error)?;
    let mut records = Vec::with_capacity(sequence_ids.len());
    for sequence_id in sequence_ids {
        let raw =
            statement.query_row(params![sequence_id], map_record_row).map_err(map_db_error)?;
        records.push(raw.into_record()?);
    }
    Ok(records)
}

/// Runs a `(sequence_id, entity_id, status)` selection.
fn select_rows(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CandidateRow>, SqliteStoreError> {
    let mut statement = connection.prepare(sql).map_err(map_db_error)?;
    statement
        .query_map(params, |row| {
            Ok(CandidateRow {
                sequence_id: row.get(0)?,
                entity_id: row.get(1)?,
                status: row.get(2)?,
            })
        })
        .map_err(map_db_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_db_error)
}

/// Moves one row to `sent` under a batch.
fn mark_sent(
    tx: &Transaction<'_>,
    tables: &StreamTables,
    sequence_id: i64,
    batch_id: i64,
    now: i64,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        &format!(
            "UPDATE {} SET status = 'sent', batch_id = ?1, date_submitted = ?2 WHERE sequence_id \
             = ?3",
            tables.records
        ),
        params![batch_id, now, sequence_id],
    )
    .map_err(map_db_error)?;
    Ok(())
}

/// Deletes `sent` rows of an entity superseded by a newer pending row.
fn delete_sent_rows_of(
    tx: &Transaction<'_>,
    tables: &StreamTables,
    entity_id: &str,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        &format!("DELETE FROM {} WHERE entity_id = ?1 AND status = 'sent'", tables.records),
        params![entity_id],
    )
    .map_err(map_db_error)?;
    Ok(())
}

/// Records the latest submitted version of each submitted row.
fn record_latest(
    tx: &Transaction<'_>,
    tables: &StreamTables,
    sequence_ids: &[i64],
    now: i64,
) -> Result<(), SqliteStoreError> {
    for sequence_id in sequence_ids {
        tx.execute(
            &format!(
                "INSERT INTO {latest} (entity_id, unique_id, sequence_id, date_submitted) SELECT \
                 entity_id, unique_id, sequence_id, ?1 FROM {records} WHERE sequence_id = ?2 \
                 ON CONFLICT (entity_id) DO UPDATE SET unique_id = excluded.unique_id, \
                 sequence_id = excluded.sequence_id, date_submitted = excluded.date_submitted \
                 WHERE excluded.sequence_id >= {latest}.sequence_id",
                latest = tables.latest,
                records = tables.records
            ),
            params![now, sequence_id],
        )
        .map_err(map_db_error)?;
    }
    Ok(())
}

/// Deletes pending or sent rows older than the latest submission of their
/// entity.
fn delete_superseded(tx: &Transaction<'_>, tables: &StreamTables) -> Result<usize, SqliteStoreError> {
    tx.execute(
        &format!(
            "DELETE FROM {records} WHERE status IN ('pending', 'sent') AND EXISTS (SELECT 1 FROM \
             {latest} l WHERE l.entity_id = {records}.entity_id AND l.sequence_id > \
             {records}.sequence_id)",
            records = tables.records,
            latest = tables.latest
        ),
        params![],
    )
    .map_err(map_db_error)
}

/// Deletes payload blobs no longer referenced by any row.
fn delete_orphan_payloads(
    tx: &Transaction<'_>,
    tables: &StreamTables,
) -> Result<usize, SqliteStoreError> {
    tx.execute(
        &format!(
            "DELETE FROM {payload} WHERE unique_id NOT IN (SELECT unique_id FROM {records})",
            payload = tables.payload,
            records = tables.records
        ),
        params![],
    )
    .map_err(map_db_error)
}

// ============================================================================
// SECTION: Stream State
// ============================================================================

/// Loads the batch counters of a node stream.
fn load_stream_state(
    connection: &Connection,
    node: &NodeId,
    stream: Stream,
) -> Result<StreamState, SqliteStoreError> {
    let row: Option<(i64, Option<i64>, Option<i64>)> = connection
        .query_row(
            "SELECT last_batch_id, open_batch_id, batch_created FROM sync_streams WHERE node_id \
             = ?1 AND stream = ?2",
            params![node.to_string(), stream.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(map_db_error)?;
    let Some((last_batch_id, open_batch_id, batch_created)) = row else {
        return Err(SqliteStoreError::MissingNode(node.to_string()));
    };
    Ok(StreamState {
        last_batch_id: from_sql_int(last_batch_id, "last_batch_id")?,
        open_batch_id: optional_int(open_batch_id, "open_batch_id")?,
        batch_created: optional_int(batch_created, "batch_created")?,
    })
}

/// Records a newly opened batch.
fn open_batch(
    tx: &Transaction<'_>,
    node: &NodeId,
    stream: Stream,
    last_batch_id: i64,
    open_batch_id: Option<i64>,
    now: i64,
) -> Result<(), SqliteStoreError> {
    let batch_created = open_batch_id.map(|_| now);
    tx.execute(
        "UPDATE sync_streams SET last_batch_id = ?1, open_batch_id = ?2, batch_created = ?3 WHERE \
         node_id = ?4 AND stream = ?5",
        params![last_batch_id, open_batch_id, batch_created, node.to_string(), stream.as_str()],
    )
    .map_err(map_db_error)?;
    Ok(())
}

/// Clears the open batch marker.
fn clear_open_batch(
    tx: &Transaction<'_>,
    node: &NodeId,
    stream: Stream,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "UPDATE sync_streams SET open_batch_id = NULL, batch_created = NULL WHERE node_id = ?1 \
         AND stream = ?2",
        params![node.to_string(), stream.as_str()],
    )
    .map_err(map_db_error)?;
    Ok(())
}

/// Detaches the open batch's `sent` rows and clears the marker.
fn abandon_open_batch(
    tx: &Transaction<'_>,
    node: &NodeId,
    stream: Stream,
    tables: &StreamTables,
) -> Result<Option<BatchId>, SqliteStoreError> {
    let state = load_stream_state(tx, node, stream)?;
    let Some(open_batch) = state.open_batch_id else {
        return Ok(None);
    };
    tx.execute(
        &format!(
            "UPDATE {} SET batch_id = NULL WHERE status = 'sent' AND batch_id = ?1",
            tables.records
        ),
        params![sql_int(open_batch, "batch_id")?],
    )
    .map_err(map_db_error)?;
    clear_open_batch(tx, node, stream)?;
    Ok(Some(BatchId::new(open_batch)))
}

/// Counts `sent` rows still attached to a batch.
fn count_sent_in_batch(
    connection: &Connection,
    tables: &StreamTables,
    batch_id: u64,
) -> Result<i64, SqliteStoreError> {
    connection
        .query_row(
            &format!(
                "SELECT COUNT(1) FROM {} WHERE status = 'sent' AND batch_id = ?1",
                tables.records
            ),
            params![sql_int(batch_id, "batch_id")?],
            |row| row.get(0),
        )
        .map_err(map_db_error)
}

/// Reads the sequence and batch counters of a node stream.
///
/// The sequence counter comes from `sqlite_sequence`, so ids freed by deletes
/// are never handed out again after a restart.
fn read_cursor(
    connection: &Connection,
    node: &NodeId,
    stream: Stream,
    tables: &StreamTables,
) -> Result<StreamCursor, SqliteStoreError> {
    let sequence: Option<i64> = connection
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            params![tables.records],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_db_error)?;
    let sequence = match sequence {
        Some(value) => value,
        None => connection
            .query_row(
                &format!("SELECT COALESCE(MAX(sequence_id), 0) FROM {}", tables.records),
                params![],
                |row| row.get(0),
            )
            .map_err(map_db_error)?,
    };
    let state = load_stream_state(connection, node, stream)?;
    Ok(StreamCursor {
        last_sequence_id: SequenceId::new(from_sql_int(sequence, "sequence_id")?),
        last_batch_id: BatchId::new(state.last_batch_id),
    })
}

/// Reports whether all tables of a node stream exist.
fn tables_exist(connection: &Connection, tables: &StreamTables) -> Result<bool, SqliteStoreError> {
    let count: i64 = connection
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2, ?3)",
            params![tables.records, tables.payload, tables.latest],
            |row| row.get(0),
        )
        .map_err(map_db_error)?;
    Ok(count == 3)
}

/// Fails with [`SqliteStoreError::MissingNode`] when the node stream tables
/// are absent.
fn require_tables(
    connection: &Connection,
    node: &NodeId,
    tables: &StreamTables,
) -> Result<(), SqliteStoreError> {
    if tables_exist(connection, tables)? {
        Ok(())
    } else {
        Err(SqliteStoreError::MissingNode(node.to_string()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps an engine error.
fn map_db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

/// Converts an unsigned value for storage.
fn sql_int(value: u64, label: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("{label} out of range")))
}

/// Converts a stored integer back to unsigned.
fn from_sql_int(value: i64, label: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative {label}")))
}

/// Converts an optional stored integer back to unsigned.
fn optional_int(value: Option<i64>, label: &str) -> Result<Option<u64>, SqliteStoreError> {
    value.map(|value| from_sql_int(value, label)).transpose()
}

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
    let connection = Connection::open_with_flags(&config.path, flags).map_err(map_db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(map_db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(map_db_error)?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(map_db_error)?;
    Ok(())
}

/// Initializes the shared schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(map_db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(map_db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(map_db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(map_db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_streams (
                    node_id TEXT NOT NULL,
                    stream TEXT NOT NULL,
                    last_batch_id INTEGER NOT NULL DEFAULT 0,
                    open_batch_id INTEGER,
                    batch_created INTEGER,
                    PRIMARY KEY (node_id, stream)
                );",
            )
            .map_err(map_db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(map_db_error)?;
    Ok(())
}
