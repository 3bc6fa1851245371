// PostgreSQL driver
// Reference Connection implementation over tokio-postgres

use crate::db::registry::DriverConstructor;
use crate::db::schema::{
    Catalog, Column, MetadataScope, Namespace, ParamDirection, Procedure, ProcedureParam, Schema,
    Table, View,
};
use crate::db::traits::{
    Connection, ConnectionProfile, DatabaseError, EngineKind, MetadataProvider, QueryExecutor,
    Transaction, TransactionOptions,
};
use crate::db::value::{QueryRequest, QueryResult, QueryRow, QueryValue};
use crate::secrets::CredentialResolver;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::{pin_mut, TryStreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deadline for establishing the underlying client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a single statement round-trip.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// One live session: the client handle plus the background I/O task that
/// owns the socket.
struct PgSession {
    client: Arc<Client>,
    io_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl PgSession {
    /// Close the session and block until the I/O task has exited, so no
    /// orphaned connection survives the call.
    async fn shutdown(self) {
        drop(self.client);
        self.io_task.abort();
        let _ = self.io_task.await;
    }
}

enum PgState {
    Disconnected,
    Connecting,
    Connected(PgSession),
}

/// PostgreSQL connection: disconnected -> connecting -> connected.
///
/// The `ops` mutex queues operations so the physical connection never
/// services two in-flight operations; the `state` mutex only guards state
/// transitions and is held briefly.
pub struct PgConnection {
    profile: ConnectionProfile,
    resolver: Arc<dyn CredentialResolver>,
    state: Mutex<PgState>,
    ops: Mutex<()>,
}

impl PgConnection {
    pub fn new(profile: ConnectionProfile, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            profile,
            resolver,
            state: Mutex::new(PgState::Disconnected),
            ops: Mutex::new(()),
        }
    }

    /// Constructor suitable for `ConnectionFactory::with_driver`.
    pub fn constructor() -> DriverConstructor {
        Arc::new(|profile, resolver| Arc::new(PgConnection::new(profile, resolver)))
    }

    async fn current_session(&self) -> Result<(Arc<Client>, CancellationToken), DatabaseError> {
        let state = self.state.lock().await;
        match &*state {
            PgState::Connected(session) => {
                Ok((Arc::clone(&session.client), session.cancel.clone()))
            }
            _ => Err(DatabaseError::NotConnected),
        }
    }

    /// Open a dedicated physical connection for this profile and confirm
    /// liveness with a trivial round-trip before handing it out.
    async fn establish_session(&self) -> Result<PgSession, DatabaseError> {
        let password = self
            .resolver
            .resolve(self.profile.password_ref.as_deref())
            .await
            .map_err(|err| {
                DatabaseError::ConnectionFailed(format!("credential resolution failed: {}", err))
            })?;

        let config = build_config(&self.profile, password)?;
        let session = open_session(&config).await?;

        let probe = race(&session.cancel, QUERY_TIMEOUT, async {
            session
                .client
                .simple_query("SELECT 1")
                .await
                .map(|_| ())
                .map_err(|err| connection_error(err, "liveness probe"))
        })
        .await;

        match probe {
            Ok(()) => Ok(session),
            Err(err) => {
                session.shutdown().await;
                // Cancellation and deadline keep their own flavor; anything
                // else surfaces as connection-failed with the cause.
                Err(match err {
                    DatabaseError::Cancelled | DatabaseError::Timeout => err,
                    other => DatabaseError::ConnectionFailed(other.to_string()),
                })
            }
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let PgState::Connected(session) =
            std::mem::replace(self.state.get_mut(), PgState::Disconnected)
        {
            session.io_task.abort();
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PgConnection {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, DatabaseError> {
        let _op = self.ops.lock().await;
        let (client, cancel) = self.current_session().await?;
        race(&cancel, QUERY_TIMEOUT, run_query(&client, request)).await
    }
}

#[async_trait::async_trait]
impl MetadataProvider for PgConnection {
    async fn metadata(&self, scope: &MetadataScope) -> Result<Schema, DatabaseError> {
        let _op = self.ops.lock().await;
        let (client, cancel) = self.current_session().await?;
        introspect(&client, &cancel, &self.profile, scope).await
    }
}

#[async_trait::async_trait]
impl Connection for PgConnection {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn connect(&self) -> Result<(), DatabaseError> {
        let _op = self.ops.lock().await;
        {
            let mut state = self.state.lock().await;
            if matches!(&*state, PgState::Connected(_)) {
                return Ok(());
            }
            *state = PgState::Connecting;
        }

        let result = self.establish_session().await;
        let mut state = self.state.lock().await;
        match result {
            Ok(session) => {
                *state = PgState::Connected(session);
                info!(host = %self.profile.host, port = self.profile.port, "connected");
                Ok(())
            }
            Err(err) => {
                // A failed connect leaves the connection disconnected.
                *state = PgState::Disconnected;
                warn!(host = %self.profile.host, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DatabaseError> {
        // Cancel any in-flight operation before queueing behind it, so
        // disconnect returns promptly and nothing stays in flight.
        {
            let state = self.state.lock().await;
            if let PgState::Connected(session) = &*state {
                session.cancel.cancel();
            }
        }

        let _op = self.ops.lock().await;
        let session = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, PgState::Disconnected) {
                PgState::Connected(session) => session,
                _ => return Ok(()),
            }
        };
        session.shutdown().await;
        info!(host = %self.profile.host, "disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        matches!(&*self.state.lock().await, PgState::Connected(_))
    }

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, DatabaseError> {
        let _op = self.ops.lock().await;
        if !matches!(&*self.state.lock().await, PgState::Connected(_)) {
            return Err(DatabaseError::NotConnected);
        }

        // The transaction checks out its own physical connection so every
        // one of its statements runs on the same session.
        let session = self.establish_session().await?;
        let begin = begin_statement(&options);
        let started = race(&session.cancel, QUERY_TIMEOUT, async {
            session
                .client
                .batch_execute(&begin)
                .await
                .map_err(|err| query_error(err, "begin transaction"))
        })
        .await;

        if let Err(err) = started {
            session.shutdown().await;
            return Err(err);
        }

        debug!(statement = %begin, "transaction started");
        Ok(Box::new(PgTransaction {
            state: Mutex::new(TxState::Active(session)),
            ops: Mutex::new(()),
        }))
    }
}

enum TxState {
    Active(PgSession),
    Committed,
    RolledBack,
}

/// A transaction pinned to one dedicated physical connection.
///
/// The connection is released exactly once, on the first commit or
/// rollback; later calls are no-ops and later executions fail with
/// `Closed`.
pub struct PgTransaction {
    state: Mutex<TxState>,
    ops: Mutex<()>,
}

impl PgTransaction {
    async fn finish(&self, statement: &str, success: TxState) -> Result<(), DatabaseError> {
        let _op = self.ops.lock().await;
        let session = {
            let mut state = self.state.lock().await;
            // Mark rolled back up front: if the statement fails, tearing
            // the connection down aborts the transaction server-side.
            match std::mem::replace(&mut *state, TxState::RolledBack) {
                TxState::Active(session) => session,
                terminal => {
                    // Already terminal; keep the original outcome.
                    *state = terminal;
                    return Ok(());
                }
            }
        };

        let result = race(&session.cancel, QUERY_TIMEOUT, async {
            session
                .client
                .batch_execute(statement)
                .await
                .map_err(|err| query_error(err, statement))
        })
        .await;

        session.shutdown().await;
        if result.is_ok() {
            *self.state.lock().await = success;
        }
        result
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let TxState::Active(session) =
            std::mem::replace(self.state.get_mut(), TxState::RolledBack)
        {
            session.io_task.abort();
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PgTransaction {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, DatabaseError> {
        let _op = self.ops.lock().await;
        let (client, cancel) = {
            let state = self.state.lock().await;
            match &*state {
                TxState::Active(session) => {
                    (Arc::clone(&session.client), session.cancel.clone())
                }
                _ => return Err(DatabaseError::Closed),
            }
        };
        race(&cancel, QUERY_TIMEOUT, run_query(&client, request)).await
    }
}

#[async_trait::async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> Result<(), DatabaseError> {
        self.finish("COMMIT", TxState::Committed).await
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.finish("ROLLBACK", TxState::RolledBack).await
    }
}

// ---------------------------------------------------------------------------
// Session plumbing
// ---------------------------------------------------------------------------

fn build_config(
    profile: &ConnectionProfile,
    password: Option<String>,
) -> Result<Config, DatabaseError> {
    if profile.host.is_empty() {
        return Err(DatabaseError::InvalidConfig("host is required".to_string()));
    }
    if profile.username.is_empty() {
        return Err(DatabaseError::InvalidConfig("username is required".to_string()));
    }
    let database = profile.database.as_deref().filter(|db| !db.is_empty()).ok_or_else(|| {
        DatabaseError::InvalidConfig("database name is required for PostgreSQL".to_string())
    })?;

    let mut config = Config::new();
    config
        .host(&profile.host)
        .port(profile.port)
        .user(&profile.username)
        .dbname(database)
        .ssl_mode(parse_ssl_mode(profile.sslmode.as_deref())?);
    if let Some(password) = password {
        config.password(password);
    }

    Ok(config)
}

fn parse_ssl_mode(sslmode: Option<&str>) -> Result<SslMode, DatabaseError> {
    match sslmode {
        None | Some("prefer") => Ok(SslMode::Prefer),
        Some("disable") => Ok(SslMode::Disable),
        Some("require") => Ok(SslMode::Require),
        Some(other) => Err(DatabaseError::InvalidConfig(format!(
            "unsupported sslmode {:?}",
            other
        ))),
    }
}

/// Open the client and spawn its I/O task, racing the attempt against the
/// connect deadline.
async fn open_session(config: &Config) -> Result<PgSession, DatabaseError> {
    let (client, connection) = match tokio::time::timeout(CONNECT_TIMEOUT, config.connect(NoTls))
        .await
    {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => return Err(connection_error(err, "connect")),
        Err(_) => return Err(DatabaseError::Timeout),
    };

    let io_task = tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "connection task exited with error");
        }
    });

    Ok(PgSession { client: Arc::new(client), io_task, cancel: CancellationToken::new() })
}

fn begin_statement(options: &TransactionOptions) -> String {
    match options.isolation {
        Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.as_sql()),
        None => "BEGIN".to_string(),
    }
}

/// Race an operation against caller cancellation and the given deadline;
/// whichever resolves first wins and the loser is dropped. The three
/// outcomes stay distinct: `Cancelled`, `Timeout`, or the operation's own
/// result.
async fn race<T>(
    cancel: &CancellationToken,
    deadline: Duration,
    op: impl Future<Output = Result<T, DatabaseError>>,
) -> Result<T, DatabaseError> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(DatabaseError::Cancelled),

        result = tokio::time::timeout(deadline, op) => match result {
            Ok(inner) => inner,
            Err(_) => Err(DatabaseError::Timeout),
        },
    }
}

fn connection_error(err: tokio_postgres::Error, context: &str) -> DatabaseError {
    match err.as_db_error() {
        Some(db_err) => DatabaseError::ConnectionFailed(db_err.message().to_string()),
        None => DatabaseError::ConnectionFailed(format!("{}: {}", context, err)),
    }
}

fn query_error(err: tokio_postgres::Error, context: &str) -> DatabaseError {
    match err.as_db_error() {
        Some(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
        None => DatabaseError::QueryFailed(format!("{}: {}", context, err)),
    }
}

// ---------------------------------------------------------------------------
// Execution and type mapping
// ---------------------------------------------------------------------------

async fn run_query(client: &Client, request: &QueryRequest) -> Result<QueryResult, DatabaseError> {
    let statement = client
        .prepare(&request.sql)
        .await
        .map_err(|err| query_error(err, "prepare statement"))?;

    let params = request.params.iter().map(|value| value as &(dyn ToSql + Sync));
    let stream = client
        .query_raw(&statement, params)
        .await
        .map_err(|err| query_error(err, "execute statement"))?;
    pin_mut!(stream);

    let mut rows = Vec::new();
    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|err| query_error(err, "fetch row"))?
    {
        rows.push(decode_row(&row));
    }

    // The command tag is only available once the stream has drained.
    let rows_affected = stream.rows_affected();
    let columns = statement.columns().iter().map(|c| c.name().to_string()).collect();

    Ok(QueryResult { columns, rows, rows_affected })
}

impl ToSql for QueryValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            QueryValue::Null => Ok(IsNull::Yes),
            QueryValue::Bool(v) => v.to_sql(ty, out),
            // Adapt to the statement's declared parameter width.
            QueryValue::Int(v) if *ty == Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
            QueryValue::Int(v) if *ty == Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
            QueryValue::Int(v) => v.to_sql(&Type::INT8, out),
            QueryValue::Float(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            QueryValue::Float(v) => v.to_sql(&Type::FLOAT8, out),
            QueryValue::Text(v) => v.to_sql(&Type::TEXT, out),
            QueryValue::Timestamp(v) if *ty == Type::TIMESTAMP => {
                v.naive_utc().to_sql(ty, out)
            }
            QueryValue::Timestamp(v) => v.to_sql(&Type::TIMESTAMPTZ, out),
            QueryValue::Bytes(v) => v.to_sql(&Type::BYTEA, out),
            QueryValue::Uuid(v) => v.to_sql(&Type::UUID, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Nullness probe that accepts every type, so NULLs of unmapped types still
/// decode to `Null` and non-null cells report their byte length for the
/// placeholder fallback.
struct RawCell {
    len: Option<usize>,
}

impl<'a> FromSql<'a> for RawCell {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawCell { len: Some(raw.len()) })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawCell { len: None })
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// NUMERIC decoded from its binary wire format into f64.
struct PgNumeric(f64);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        parse_numeric(raw).map(PgNumeric).ok_or_else(|| "malformed numeric value".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Binary NUMERIC layout: ndigits, weight, sign, dscale, then base-10000
/// digits, most significant first.
fn parse_numeric(raw: &[u8]) -> Option<f64> {
    if raw.len() < 8 {
        return None;
    }
    let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    if raw.len() < 8 + ndigits * 2 {
        return None;
    }

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some(f64::NAN),
        0xD000 => return Some(f64::INFINITY),
        0xF000 => return Some(f64::NEG_INFINITY),
        _ => return None,
    }

    let mut value = 0.0f64;
    for i in 0..ndigits {
        let digit = u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]);
        value += f64::from(digit) * 10000f64.powi(weight - i as i32);
    }
    if sign == 0x4000 {
        value = -value;
    }
    Some(value)
}

fn decode_row(row: &Row) -> QueryRow {
    (0..row.len())
        .map(|idx| (row.columns()[idx].name().to_string(), decode_value(row, idx)))
        .collect()
}

/// Decode one cell, trying native types in priority order; the first
/// successful decode wins. Each candidate only accepts its own wire types,
/// so overlapping representations cannot misclassify. An undecodable
/// non-null value becomes a placeholder string tagged with the native type
/// name and byte length, never an error.
fn decode_value(row: &Row, idx: usize) -> QueryValue {
    let raw: RawCell = match row.try_get(idx) {
        Ok(cell) => cell,
        Err(_) => return QueryValue::Null,
    };
    let Some(byte_len) = raw.len else {
        return QueryValue::Null;
    };

    if let Ok(v) = row.try_get::<_, bool>(idx) {
        return QueryValue::Bool(v);
    }
    if let Ok(v) = row.try_get::<_, i64>(idx) {
        return QueryValue::Int(v);
    }
    if let Ok(v) = row.try_get::<_, i32>(idx) {
        return QueryValue::Int(v.into());
    }
    if let Ok(v) = row.try_get::<_, i16>(idx) {
        return QueryValue::Int(v.into());
    }
    if let Ok(v) = row.try_get::<_, PgNumeric>(idx) {
        return QueryValue::Float(v.0);
    }
    if let Ok(v) = row.try_get::<_, f64>(idx) {
        return QueryValue::Float(v);
    }
    if let Ok(v) = row.try_get::<_, f32>(idx) {
        return QueryValue::Float(v.into());
    }
    if let Ok(v) = row.try_get::<_, String>(idx) {
        return QueryValue::Text(v);
    }
    if let Ok(v) = row.try_get::<_, DateTime<Utc>>(idx) {
        return QueryValue::Timestamp(v);
    }
    if let Ok(v) = row.try_get::<_, NaiveDateTime>(idx) {
        return QueryValue::Timestamp(Utc.from_utc_datetime(&v));
    }
    if let Ok(v) = row.try_get::<_, NaiveDate>(idx) {
        return QueryValue::Timestamp(Utc.from_utc_datetime(&v.and_time(NaiveTime::MIN)));
    }
    if let Ok(v) = row.try_get::<_, NaiveTime>(idx) {
        return QueryValue::Text(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, Vec<u8>>(idx) {
        return QueryValue::Bytes(v);
    }
    if let Ok(v) = row.try_get::<_, Uuid>(idx) {
        return QueryValue::Uuid(v);
    }
    if let Ok(v) = row.try_get::<_, serde_json::Value>(idx) {
        return QueryValue::Text(v.to_string());
    }

    QueryValue::Text(format!(
        "<{} {} bytes>",
        row.columns()[idx].type_().name(),
        byte_len
    ))
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

// information_schema columns are domain-typed; every projection casts to
// text so decoding stays on builtin types.

async fn introspect(
    client: &Client,
    cancel: &CancellationToken,
    profile: &ConnectionProfile,
    scope: &MetadataScope,
) -> Result<Schema, DatabaseError> {
    let namespaces = match &scope.namespaces {
        Some(list) => list.clone(),
        None => race(cancel, QUERY_TIMEOUT, list_namespaces(client)).await?,
    };
    if namespaces.is_empty() {
        // An empty allow-list yields an empty schema, never an error.
        return Ok(Schema::empty());
    }

    let mut by_namespace: BTreeMap<String, Namespace> = namespaces
        .iter()
        .map(|name| (name.clone(), Namespace::named(name.clone())))
        .collect();

    if scope.include_tables || scope.include_views {
        let relations =
            race(cancel, QUERY_TIMEOUT, list_relations(client, &namespaces, scope)).await?;
        for relation in relations {
            let Some(namespace) = by_namespace.get_mut(&relation.namespace) else {
                continue;
            };
            if relation.kind == "VIEW" {
                namespace
                    .views
                    .push(View { name: relation.name, definition: relation.definition });
            } else {
                namespace.tables.push(Table {
                    name: relation.name,
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                });
            }
        }
    }

    if scope.include_tables {
        let columns = race(cancel, QUERY_TIMEOUT, list_columns(client, &namespaces)).await?;
        for column in columns {
            if let Some(table) = find_table(&mut by_namespace, &column.namespace, &column.table) {
                table.columns.push(Column {
                    name: column.name,
                    data_type: column.data_type,
                    is_nullable: column.is_nullable,
                    column_default: column.default,
                });
            }
        }

        let keys = race(cancel, QUERY_TIMEOUT, list_primary_keys(client, &namespaces)).await?;
        for key in keys {
            if let Some(table) = find_table(&mut by_namespace, &key.namespace, &key.table) {
                table.primary_key.push(key.column);
            }
        }
    }

    if scope.include_procedures {
        let routines = race(cancel, QUERY_TIMEOUT, list_routines(client, &namespaces)).await?;
        for ((namespace_name, _specific), procedure) in routines {
            if let Some(namespace) = by_namespace.get_mut(&namespace_name) {
                namespace.procedures.push(procedure);
            }
        }
    }

    let catalog_name = profile.database.clone().unwrap_or_default();
    let mut schema = Schema {
        catalogs: vec![Catalog {
            name: catalog_name,
            namespaces: by_namespace.into_values().collect(),
        }],
    };
    schema.sort_by_name();
    debug!(
        namespaces = schema.catalogs[0].namespaces.len(),
        "introspection complete"
    );
    Ok(schema)
}

fn find_table<'a>(
    by_namespace: &'a mut BTreeMap<String, Namespace>,
    namespace: &str,
    table: &str,
) -> Option<&'a mut Table> {
    by_namespace
        .get_mut(namespace)?
        .tables
        .iter_mut()
        .find(|t| t.name == table)
}

/// All non-system namespaces, used when the scope has no allow-list.
async fn list_namespaces(client: &Client) -> Result<Vec<String>, DatabaseError> {
    let rows = client
        .query(
            "SELECT nspname::text FROM pg_catalog.pg_namespace \
             WHERE nspname NOT LIKE 'pg_%' AND nspname <> 'information_schema' \
             ORDER BY nspname",
            &[],
        )
        .await
        .map_err(|err| query_error(err, "list namespaces"))?;

    rows.iter().map(|row| row.try_get(0).map_err(|err| query_error(err, "list namespaces"))).collect()
}

struct RelationRecord {
    namespace: String,
    name: String,
    kind: String,
    definition: Option<String>,
}

async fn list_relations(
    client: &Client,
    namespaces: &[String],
    scope: &MetadataScope,
) -> Result<Vec<RelationRecord>, DatabaseError> {
    let mut kinds: Vec<String> = Vec::new();
    if scope.include_tables {
        kinds.push("BASE TABLE".to_string());
    }
    if scope.include_views {
        kinds.push("VIEW".to_string());
    }

    let rows = client
        .query(
            "SELECT t.table_schema::text, t.table_name::text, t.table_type::text, \
                    v.view_definition::text \
             FROM information_schema.tables t \
             LEFT JOIN information_schema.views v \
               ON v.table_schema = t.table_schema AND v.table_name = t.table_name \
             WHERE t.table_schema = ANY($1) AND t.table_type = ANY($2) \
             ORDER BY t.table_schema, t.table_name",
            &[&namespaces, &kinds],
        )
        .await
        .map_err(|err| query_error(err, "list relations"))?;

    rows.iter()
        .map(|row| {
            Ok(RelationRecord {
                namespace: row.try_get(0).map_err(|e| query_error(e, "list relations"))?,
                name: row.try_get(1).map_err(|e| query_error(e, "list relations"))?,
                kind: row.try_get(2).map_err(|e| query_error(e, "list relations"))?,
                definition: row.try_get(3).map_err(|e| query_error(e, "list relations"))?,
            })
        })
        .collect()
}

struct ColumnRecord {
    namespace: String,
    table: String,
    name: String,
    data_type: String,
    is_nullable: bool,
    default: Option<String>,
}

async fn list_columns(
    client: &Client,
    namespaces: &[String],
) -> Result<Vec<ColumnRecord>, DatabaseError> {
    let rows = client
        .query(
            "SELECT c.table_schema::text, c.table_name::text, c.column_name::text, \
                    c.data_type::text, c.is_nullable::text, c.column_default::text \
             FROM information_schema.columns c \
             WHERE c.table_schema = ANY($1) \
             ORDER BY c.table_schema, c.table_name, c.ordinal_position",
            &[&namespaces],
        )
        .await
        .map_err(|err| query_error(err, "list columns"))?;

    rows.iter()
        .map(|row| {
            let is_nullable: String =
                row.try_get(4).map_err(|e| query_error(e, "list columns"))?;
            Ok(ColumnRecord {
                namespace: row.try_get(0).map_err(|e| query_error(e, "list columns"))?,
                table: row.try_get(1).map_err(|e| query_error(e, "list columns"))?,
                name: row.try_get(2).map_err(|e| query_error(e, "list columns"))?,
                data_type: row.try_get(3).map_err(|e| query_error(e, "list columns"))?,
                is_nullable: is_nullable == "YES",
                default: row.try_get(5).map_err(|e| query_error(e, "list columns"))?,
            })
        })
        .collect()
}

struct KeyColumnRecord {
    namespace: String,
    table: String,
    column: String,
}

async fn list_primary_keys(
    client: &Client,
    namespaces: &[String],
) -> Result<Vec<KeyColumnRecord>, DatabaseError> {
    let rows = client
        .query(
            "SELECT tc.table_schema::text, tc.table_name::text, kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
              AND kcu.table_name = tc.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = ANY($1) \
             ORDER BY tc.table_schema, tc.table_name, kcu.ordinal_position",
            &[&namespaces],
        )
        .await
        .map_err(|err| query_error(err, "list primary keys"))?;

    rows.iter()
        .map(|row| {
            Ok(KeyColumnRecord {
                namespace: row.try_get(0).map_err(|e| query_error(e, "list primary keys"))?,
                table: row.try_get(1).map_err(|e| query_error(e, "list primary keys"))?,
                column: row.try_get(2).map_err(|e| query_error(e, "list primary keys"))?,
            })
        })
        .collect()
}

/// Routines with their ordered parameters, keyed by specific name so
/// overloads stay separate.
async fn list_routines(
    client: &Client,
    namespaces: &[String],
) -> Result<Vec<((String, String), Procedure)>, DatabaseError> {
    let rows = client
        .query(
            "SELECT r.routine_schema::text, r.routine_name::text, r.specific_name::text, \
                    p.parameter_name::text, p.parameter_mode::text, p.data_type::text \
             FROM information_schema.routines r \
             LEFT JOIN information_schema.parameters p \
               ON p.specific_schema = r.specific_schema AND p.specific_name = r.specific_name \
             WHERE r.routine_schema = ANY($1) \
               AND r.routine_type IN ('PROCEDURE', 'FUNCTION') \
             ORDER BY r.routine_schema, r.routine_name, r.specific_name, p.ordinal_position",
            &[&namespaces],
        )
        .await
        .map_err(|err| query_error(err, "list routines"))?;

    let mut routines: Vec<((String, String), Procedure)> = Vec::new();
    for row in &rows {
        let namespace: String = row.try_get(0).map_err(|e| query_error(e, "list routines"))?;
        let name: String = row.try_get(1).map_err(|e| query_error(e, "list routines"))?;
        let specific: String = row.try_get(2).map_err(|e| query_error(e, "list routines"))?;
        let param_name: Option<String> =
            row.try_get(3).map_err(|e| query_error(e, "list routines"))?;
        let param_mode: Option<String> =
            row.try_get(4).map_err(|e| query_error(e, "list routines"))?;
        let param_type: Option<String> =
            row.try_get(5).map_err(|e| query_error(e, "list routines"))?;

        let key = (namespace, specific);
        if routines.last().map(|(k, _)| k != &key).unwrap_or(true) {
            routines.push((key.clone(), Procedure { name, params: Vec::new() }));
        }
        if let Some(mode) = param_mode {
            if let Some((_, procedure)) = routines.last_mut() {
                procedure.params.push(ProcedureParam {
                    name: param_name.unwrap_or_default(),
                    data_type: param_type.unwrap_or_default(),
                    direction: ParamDirection::from_mode(&mode),
                });
            }
        }
    }

    Ok(routines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::IsolationLevel;
    use crate::secrets::MemoryPasswordStore;

    fn profile() -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(EngineKind::Postgres, "localhost", "app");
        profile.database = Some("appdb".to_string());
        profile
    }

    fn connection() -> PgConnection {
        PgConnection::new(profile(), Arc::new(MemoryPasswordStore::new()))
    }

    #[test]
    fn test_build_config_requires_database_name() {
        let mut profile = profile();
        profile.database = None;

        let err = build_config(&profile, None).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidConfig(_)));

        profile.database = Some(String::new());
        let err = build_config(&profile, None).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_config_sets_connection_fields() {
        let config = build_config(&profile(), Some("hunter2".to_string())).unwrap();

        assert_eq!(config.get_user(), Some("app"));
        assert_eq!(config.get_dbname(), Some("appdb"));
        assert_eq!(config.get_ports(), &[5432]);
    }

    #[test]
    fn test_parse_ssl_mode() {
        assert!(matches!(parse_ssl_mode(None), Ok(SslMode::Prefer)));
        assert!(matches!(parse_ssl_mode(Some("disable")), Ok(SslMode::Disable)));
        assert!(matches!(parse_ssl_mode(Some("require")), Ok(SslMode::Require)));
        assert!(parse_ssl_mode(Some("verify-full")).is_err());
    }

    #[test]
    fn test_begin_statement_with_isolation() {
        assert_eq!(begin_statement(&TransactionOptions::default()), "BEGIN");
        assert_eq!(
            begin_statement(&TransactionOptions::with_isolation(IsolationLevel::Serializable)),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_not_connected() {
        let conn = connection();

        assert!(!conn.is_connected().await);
        assert!(matches!(
            conn.execute(&QueryRequest::new("SELECT 1")).await,
            Err(DatabaseError::NotConnected)
        ));
        assert!(matches!(
            conn.metadata(&MetadataScope::default()).await,
            Err(DatabaseError::NotConnected)
        ));
        assert!(matches!(
            conn.begin_transaction(TransactionOptions::default()).await.map(|_| ()),
            Err(DatabaseError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_a_no_op() {
        let conn = connection();
        assert!(conn.disconnect().await.is_ok());
        assert!(conn.disconnect().await.is_ok());
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_race_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = race(&cancel, Duration::from_secs(1), async { Ok(42) }).await;
        assert!(matches!(result, Err(DatabaseError::Cancelled)));
    }

    #[tokio::test]
    async fn test_race_times_out_and_drops_the_loser() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        tokio::time::pause();
        let result = race(&cancel, Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(DatabaseError::Timeout)));
        // The losing operation was dropped, not left running.
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_parse_numeric_positive_with_fraction() {
        // 123.45: ndigits=2, weight=0, sign=+, dscale=2, digits [123, 4500]
        let raw: &[u8] = &[0, 2, 0, 0, 0, 0, 0, 2, 0, 123, 17, 148];
        let value = parse_numeric(raw).unwrap();
        assert!((value - 123.45).abs() < 1e-9);
    }

    #[test]
    fn test_parse_numeric_negative() {
        // -7: ndigits=1, weight=0, sign=0x4000, dscale=0, digits [7]
        let raw: &[u8] = &[0, 1, 0, 0, 0x40, 0, 0, 0, 0, 7];
        assert_eq!(parse_numeric(raw), Some(-7.0));
    }

    #[test]
    fn test_parse_numeric_zero_and_nan() {
        // 0: ndigits=0, weight=0, sign=+, dscale=0
        let zero: &[u8] = &[0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(parse_numeric(zero), Some(0.0));

        // NaN: sign=0xC000
        let nan: &[u8] = &[0, 0, 0, 0, 0xC0, 0, 0, 0];
        assert!(parse_numeric(nan).unwrap().is_nan());
    }

    #[test]
    fn test_parse_numeric_large_weight() {
        // 20001: ndigits=2, weight=1, digits [2, 1] -> 2*10000 + 1
        let raw: &[u8] = &[0, 2, 0, 1, 0, 0, 0, 0, 0, 2, 0, 1];
        assert_eq!(parse_numeric(raw), Some(20001.0));
    }

    #[test]
    fn test_parse_numeric_rejects_truncated_input() {
        assert_eq!(parse_numeric(&[0, 2, 0, 0]), None);
        // Header claims two digits but only one follows
        assert_eq!(parse_numeric(&[0, 2, 0, 0, 0, 0, 0, 0, 0, 1]), None);
    }

    #[test]
    fn test_query_value_binds_null_as_null() {
        let mut out = BytesMut::new();
        let result = QueryValue::Null.to_sql(&Type::TEXT, &mut out).unwrap();
        assert!(matches!(result, IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn test_query_value_adapts_int_width() {
        let mut out = BytesMut::new();
        QueryValue::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.len(), 4);

        let mut out = BytesMut::new();
        QueryValue::Int(7).to_sql(&Type::INT8, &mut out).unwrap();
        assert_eq!(out.len(), 8);

        // Out-of-range narrowing fails instead of wrapping
        let mut out = BytesMut::new();
        assert!(QueryValue::Int(1i64 << 40).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_query_value_accepts_any_parameter_type() {
        assert!(<QueryValue as ToSql>::accepts(&Type::INT8));
        assert!(<QueryValue as ToSql>::accepts(&Type::NUMERIC));
        assert!(<QueryValue as ToSql>::accepts(&Type::JSONB));
    }
}
