// Database module
// Connectivity contracts, value/schema models, drivers and table CRUD

pub mod drivers;
pub mod registry;
pub mod schema;
pub mod table_data;
pub mod traits;
pub mod value;

pub use drivers::{register_builtin, PgConnection};
pub use registry::{ConnectionFactory, DriverConstructor, PlaceholderConnection};
pub use schema::{
    Catalog, Column, MetadataScope, Namespace, ParamDirection, Procedure, ProcedureParam, Schema,
    Table, TableIdentifier, View,
};
pub use table_data::{quote_ident, SnapshotTableService};
pub use traits::{
    Connection, ConnectionProfile, DatabaseError, EngineKind, IsolationLevel, MetadataProvider,
    QueryExecutor, TableDataService, TablePage, TableRow, Transaction, TransactionOptions,
};
pub use value::{QueryRequest, QueryResult, QueryRow, QueryValue};
