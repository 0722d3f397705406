//! Raw row access for bulk export and import
//!
//! These helpers move column maps in and out of a table without any
//! per-field validation. Table and column names passed here always come
//! from the static entity table or from `PRAGMA table_info`, never from an
//! archive directly.

use std::collections::HashSet;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::registry::EntitySpec;

/// A row as a map of column name to JSON primitive
pub type Row = Map<String, Value>;

/// Column names of a table as currently defined
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

/// Convert a borrowed SQLite value into a JSON primitive
pub fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

/// Convert a JSON primitive into an owned SQLite value
pub fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

/// Read the current row of a cursor into a column map
pub fn row_to_map(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut map = Map::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        map.insert(name.clone(), json_from_sql(row.get_ref(index)?));
    }
    Ok(map)
}

/// Insert a column map and return the new row id
pub fn insert_row(conn: &Connection, table: &str, fields: &Row) -> rusqlite::Result<i64> {
    let columns: Vec<String> = fields.keys().map(|k| format!("\"{}\"", k)).collect();
    let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    conn.execute(&sql, params_from_iter(fields.values().map(sql_from_json)))?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the given columns of one row
pub fn update_row(conn: &Connection, table: &str, id: i64, fields: &Row) -> rusqlite::Result<usize> {
    if fields.is_empty() {
        return Ok(0);
    }
    let assignments: Vec<String> = fields
        .keys()
        .enumerate()
        .map(|(i, k)| format!("\"{}\" = ?{}", k, i + 1))
        .collect();
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE id = ?{}",
        table,
        assignments.join(", "),
        fields.len() + 1
    );

    let mut values: Vec<SqlValue> = fields.values().map(sql_from_json).collect();
    values.push(SqlValue::Integer(id));
    conn.execute(&sql, params_from_iter(values))
}

/// Row id of the tenant's record carrying `public_id`, if any
pub fn find_tenant_row(
    conn: &Connection,
    spec: &EntitySpec,
    tenant_row_id: i64,
    public_id: &str,
) -> rusqlite::Result<Option<i64>> {
    let sql = format!(
        "SELECT t.id FROM \"{}\" t WHERE {} AND t.public_id = ?2",
        spec.entity_type.table(),
        spec.tenant_scope("t")
    );
    conn.query_row(&sql, rusqlite::params![tenant_row_id, public_id], |row| {
        row.get(0)
    })
    .optional()
}

/// Delete every row of `spec` belonging to the tenant, sparing `keep_id`
pub fn delete_tenant_rows(
    conn: &Connection,
    spec: &EntitySpec,
    tenant_row_id: i64,
    keep_id: Option<i64>,
) -> rusqlite::Result<usize> {
    let table = spec.entity_type.table();
    let scope = spec.tenant_scope("t");
    match keep_id {
        Some(keep) => conn.execute(
            &format!(
                "DELETE FROM \"{table}\" WHERE id IN (SELECT t.id FROM \"{table}\" t WHERE {scope}) AND id != ?2"
            ),
            rusqlite::params![tenant_row_id, keep],
        ),
        None => conn.execute(
            &format!(
                "DELETE FROM \"{table}\" WHERE id IN (SELECT t.id FROM \"{table}\" t WHERE {scope})"
            ),
            rusqlite::params![tenant_row_id],
        ),
    }
}

/// Number of the tenant's rows of one entity type
pub fn count_tenant_rows(
    conn: &Connection,
    spec: &EntitySpec,
    tenant_row_id: i64,
) -> rusqlite::Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\" t WHERE {}",
        spec.entity_type.table(),
        spec.tenant_scope("t")
    );
    conn.query_row(&sql, [tenant_row_id], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
}
