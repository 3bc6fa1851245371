// Generic table data service
// Builds paginated fetch and snapshot-keyed CRUD statements at runtime

use crate::db::schema::TableIdentifier;
use crate::db::traits::{DatabaseError, QueryExecutor, TableDataService, TablePage, TableRow};
use crate::db::value::{QueryRequest, QueryResult, QueryRow, QueryValue};
use std::sync::Arc;
use tracing::debug;

/// Quote an identifier for SQL text, doubling embedded quotes.
///
/// Every identifier that reaches statement text goes through here; column
/// and table names come from untyped snapshots, so this is the injection
/// guard.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Namespace-qualified relation name. The catalog component is not
/// rendered: the reference engine scopes a connection to one catalog.
fn qualified_name(table: &TableIdentifier) -> String {
    format!("{}.{}", quote_ident(&table.namespace), quote_ident(&table.name))
}

/// Build the WHERE clause identifying one row from its last-known
/// snapshot, appending parameters to `params`.
///
/// A null-valued column becomes an `IS NULL` test, never an equality
/// parameter bound to null: equality against null is never true in SQL.
/// An empty snapshot is an error; it would otherwise produce an
/// unconstrained statement.
fn make_predicate(snapshot: &QueryRow, params: &mut Vec<QueryValue>) -> Result<String, DatabaseError> {
    if snapshot.is_empty() {
        return Err(DatabaseError::QueryFailed(
            "cannot build a row predicate from a snapshot with no columns".to_string(),
        ));
    }

    let mut clauses = Vec::with_capacity(snapshot.len());
    for (name, value) in snapshot.iter() {
        if value.is_null() {
            clauses.push(format!("{} IS NULL", quote_ident(name)));
        } else {
            params.push(value.clone());
            clauses.push(format!("{} = ${}", quote_ident(name), params.len()));
        }
    }

    Ok(clauses.join(" AND "))
}

/// CRUD over row snapshots, independent of engine-specific introspection.
///
/// Works against any `QueryExecutor` (a connection or a transaction), so
/// edits can run inside or outside an explicit transaction.
pub struct SnapshotTableService {
    executor: Arc<dyn QueryExecutor>,
}

impl SnapshotTableService {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    fn first_returned_row(result: &QueryResult) -> Option<QueryRow> {
        result.rows.first().cloned()
    }
}

#[async_trait::async_trait]
impl TableDataService for SnapshotTableService {
    async fn fetch_page(
        &self,
        table: &TableIdentifier,
        page: u32,
        page_size: u32,
    ) -> Result<TablePage, DatabaseError> {
        // One extra row decides has_more without a separate count query.
        let limit = i64::from(page_size) + 1;
        let offset = i64::from(page) * i64::from(page_size);

        let sql = format!(
            "SELECT * FROM {} ORDER BY 1 LIMIT $1 OFFSET $2",
            qualified_name(table)
        );
        let request =
            QueryRequest::with_params(sql, vec![QueryValue::Int(limit), QueryValue::Int(offset)]);

        let result = self.executor.execute(&request).await?;
        debug!(table = %table, page, rows = result.rows.len(), "fetched table page");

        let mut rows: Vec<TableRow> = result.rows.into_iter().map(TableRow::new).collect();
        let has_more = rows.len() > page_size as usize;
        rows.truncate(page_size as usize);

        Ok(TablePage { columns: result.columns, rows, has_more })
    }

    async fn insert_row(
        &self,
        table: &TableIdentifier,
        values: &QueryRow,
    ) -> Result<TableRow, DatabaseError> {
        let request = if values.is_empty() {
            QueryRequest::new(format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING *",
                qualified_name(table)
            ))
        } else {
            // Sorted column names keep the statement shape deterministic.
            let mut names: Vec<&str> = values.column_names().collect();
            names.sort_unstable();

            let columns: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
            let placeholders: Vec<String> =
                (1..=names.len()).map(|i| format!("${}", i)).collect();
            let params: Vec<QueryValue> = names
                .iter()
                .map(|n| values.get(n).cloned().unwrap_or(QueryValue::Null))
                .collect();

            QueryRequest::with_params(
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                    qualified_name(table),
                    columns.join(", "),
                    placeholders.join(", ")
                ),
                params,
            )
        };

        let result = self.executor.execute(&request).await?;
        let row = Self::first_returned_row(&result).ok_or_else(|| {
            DatabaseError::QueryFailed(format!("insert into {} returned no row", table))
        })?;

        Ok(TableRow::new(row))
    }

    async fn update_row(
        &self,
        table: &TableIdentifier,
        row: &TableRow,
        changes: &QueryRow,
    ) -> Result<TableRow, DatabaseError> {
        if changes.is_empty() {
            return Ok(row.clone());
        }

        let mut params: Vec<QueryValue> = Vec::new();
        let mut assignments = Vec::with_capacity(changes.len());
        for (name, value) in changes.iter() {
            params.push(value.clone());
            assignments.push(format!("{} = ${}", quote_ident(name), params.len()));
        }

        let predicate = make_predicate(&row.values, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} RETURNING *",
            qualified_name(table),
            assignments.join(", "),
            predicate
        );

        let result = self.executor.execute(&QueryRequest::with_params(sql, params)).await?;
        let refreshed = Self::first_returned_row(&result)
            .ok_or_else(|| DatabaseError::RowNotFound(format!("row {} in {}", row.id, table)))?;

        Ok(row.with_values(refreshed))
    }

    async fn delete_row(
        &self,
        table: &TableIdentifier,
        row: &TableRow,
    ) -> Result<(), DatabaseError> {
        let mut params: Vec<QueryValue> = Vec::new();
        let predicate = make_predicate(&row.values, &mut params)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} RETURNING *",
            qualified_name(table),
            predicate
        );

        let result = self.executor.execute(&QueryRequest::with_params(sql, params)).await?;
        let affected = result.rows_affected.unwrap_or(result.rows.len() as u64);
        if affected == 0 {
            return Err(DatabaseError::RowNotFound(format!("row {} in {}", row.id, table)));
        }

        Ok(())
    }
}
