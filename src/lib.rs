// Database connectivity core for a desktop SQL client.
// The UI layer consumes the contract surface re-exported here.

pub mod db;
pub mod secrets;

pub use db::{
    register_builtin, Connection, ConnectionFactory, ConnectionProfile, DatabaseError, EngineKind,
    IsolationLevel, MetadataProvider, MetadataScope, PgConnection, QueryExecutor, QueryRequest,
    QueryResult, QueryRow, QueryValue, Schema, SnapshotTableService, TableDataService,
    TableIdentifier, TablePage, TableRow, Transaction, TransactionOptions,
};
pub use secrets::{
    CredentialResolver, MemoryPasswordStore, PasswordStore, SecretStoreError, SqlitePasswordStore,
};
