// Connectivity contracts
// Capability traits every driver, transaction and table service implements

use crate::db::schema::{MetadataScope, Schema, TableIdentifier};
use crate::db::value::{QueryRequest, QueryResult, QueryRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported database engines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Postgres,
    Mysql,
    Mssql,
    Sqlite,
}

impl EngineKind {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "PostgreSQL",
            EngineKind::Mysql => "MySQL",
            EngineKind::Mssql => "Microsoft SQL Server",
            EngineKind::Sqlite => "SQLite",
        }
    }

    /// Default port for the engine
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::Mysql => 3306,
            EngineKind::Mssql => 1433,
            EngineKind::Sqlite => 0, // File-based, no port
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Common database error type. Native engine errors are translated into
/// these variants at the driver boundary and never leak to callers.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("no driver available for {kind}: {reason}")]
    DriverUnavailable { kind: EngineKind, reason: String },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("row not found: {0}")]
    RowNotFound(String),

    #[error("delete rejected: {0}")]
    DeleteRejected(String),
}

/// Immutable connection parameters supplied at driver construction time.
///
/// The password itself never appears here; `password_ref` is an opaque
/// identifier resolved through the credential store at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: Option<String>,
    pub password_ref: Option<String>,
    /// TLS preference: "disable", "prefer" (default) or "require".
    pub sslmode: Option<String>,
}

impl ConnectionProfile {
    pub fn new(engine: EngineKind, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            engine,
            host: host.into(),
            port: engine.default_port(),
            username: username.into(),
            database: None,
            password_ref: None,
            sslmode: None,
        }
    }
}

/// Transaction isolation level; omission defers to the engine default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
}

impl TransactionOptions {
    pub fn with_isolation(isolation: IsolationLevel) -> Self {
        Self { isolation: Some(isolation) }
    }
}

/// Executes parameterized statements. Safe to call from multiple callers
/// against the same object; implementations serialize internally.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, DatabaseError>;
}

/// Read-only schema introspection. May issue queries internally but has no
/// domain-level side effects.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn metadata(&self, scope: &MetadataScope) -> Result<Schema, DatabaseError>;
}

/// A logical connection to one engine: lifecycle, execution, introspection
/// and transaction entry.
#[async_trait::async_trait]
pub trait Connection: QueryExecutor + MetadataProvider {
    fn engine_kind(&self) -> EngineKind;

    /// Establish the connection. No-op when already connected.
    async fn connect(&self) -> Result<(), DatabaseError>;

    /// Tear the connection down, waiting until background work has exited.
    /// No operation started before this call is still in flight once it
    /// returns. Idempotent.
    async fn disconnect(&self) -> Result<(), DatabaseError>;

    async fn is_connected(&self) -> bool;

    /// Begin a transaction pinned to one physical connection for its life.
    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, DatabaseError>;
}

/// A transaction bound to exactly one physical connection. Statements
/// execute in submission order. `commit` and `rollback` are idempotent
/// no-ops once the transaction reached a terminal state; execution attempts
/// after that fail.
#[async_trait::async_trait]
pub trait Transaction: QueryExecutor {
    async fn commit(&self) -> Result<(), DatabaseError>;
    async fn rollback(&self) -> Result<(), DatabaseError>;
}

/// One page of rows fetched from a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePage {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    pub has_more: bool,
}

/// A row under edit: a generated identity that stays stable across
/// edit/commit cycles, plus the current value snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub id: Uuid,
    pub values: QueryRow,
}

impl TableRow {
    pub fn new(values: QueryRow) -> Self {
        Self { id: Uuid::new_v4(), values }
    }

    /// Same identity, refreshed values (after a commit round-trip).
    pub fn with_values(&self, values: QueryRow) -> Self {
        Self { id: self.id, values }
    }
}

/// Engine-agnostic CRUD keyed by row snapshots rather than primary keys,
/// so tables without declared keys remain editable.
#[async_trait::async_trait]
pub trait TableDataService: Send + Sync {
    async fn fetch_page(
        &self,
        table: &TableIdentifier,
        page: u32,
        page_size: u32,
    ) -> Result<TablePage, DatabaseError>;

    /// Insert a row; an empty value set requests engine defaults. Returns
    /// the server-authoritative snapshot.
    async fn insert_row(
        &self,
        table: &TableIdentifier,
        values: &QueryRow,
    ) -> Result<TableRow, DatabaseError>;

    /// Apply `changes` to the row identified by its last-known snapshot.
    /// Returns the refreshed row under the same identity.
    async fn update_row(
        &self,
        table: &TableIdentifier,
        row: &TableRow,
        changes: &QueryRow,
    ) -> Result<TableRow, DatabaseError>;

    /// Delete the row identified by its snapshot. Zero affected rows is a
    /// failure, not a silent success.
    async fn delete_row(
        &self,
        table: &TableIdentifier,
        row: &TableRow,
    ) -> Result<(), DatabaseError>;

    /// Delete a batch of rows. Each row's outcome is independent; a failure
    /// never aborts the remaining deletes. Returns the number of rows
    /// deleted, or an aggregated error naming every failing row.
    async fn delete_rows(
        &self,
        table: &TableIdentifier,
        rows: &[TableRow],
    ) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        let mut failures: Vec<String> = Vec::new();

        for row in rows {
            match self.delete_row(table, row).await {
                Ok(()) => deleted += 1,
                Err(err) => failures.push(format!("{}: {}", row.id, err)),
            }
        }

        if failures.is_empty() {
            Ok(deleted)
        } else {
            Err(DatabaseError::DeleteRejected(format!(
                "{} of {} rows failed: [{}]",
                failures.len(),
                rows.len(),
                failures.join("; ")
            )))
        }
    }
}
