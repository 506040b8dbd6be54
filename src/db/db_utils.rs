use chrono::DateTime;
use duckdb::{Connection, params_from_iter};
use duckdb::types::{TimeUnit, Value};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashSet;

use super::database::QueryRows;

/// Runs `sql` with bound `params` and collects every row as a JSON object.
///
/// Row keys follow the column names; a name that repeats (`SELECT a.id, b.id`)
/// gets a numeric suffix (`id`, `id_2`) so no value is lost.
pub fn query_to_rows(conn: &Connection, sql: &str, params: &[Value]) -> duckdb::Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    // Column metadata is only available once the statement has run.
    let names: Vec<String> = rows
        .as_ref()
        .map(|stmt| {
            stmt.column_names()
                .into_iter()
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default();
    let columns = unique_column_names(names);

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        for (i, name) in columns.iter().enumerate() {
            let value: Value = row.get(i)?;
            record.insert(name.clone(), value_to_json(value));
        }
        records.push(record);
    }

    Ok(QueryRows {
        columns,
        rows: records,
    })
}

fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(v) => json!(v),
        Value::TinyInt(v) => json!(v),
        Value::SmallInt(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::BigInt(v) => json!(v),
        Value::HugeInt(v) => i64::try_from(v)
            .map(JsonValue::from)
            .unwrap_or_else(|_| JsonValue::String(v.to_string())),
        Value::UTinyInt(v) => json!(v),
        Value::USmallInt(v) => json!(v),
        Value::UInt(v) => json!(v),
        Value::UBigInt(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::Decimal(v) => {
            let text = v.to_string();
            text.parse::<f64>()
                .map(|n| json!(n))
                .unwrap_or(JsonValue::String(text))
        }
        Value::Text(v) => JsonValue::String(v),
        Value::Blob(v) => JsonValue::String(format!("<{} bytes>", v.len())),
        Value::Date32(days) => DateTime::from_timestamp(days as i64 * 86_400, 0)
            .map(|dt| JsonValue::String(dt.date_naive().to_string()))
            .unwrap_or(JsonValue::Null),
        Value::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|dt| JsonValue::String(dt.naive_utc().to_string()))
                .unwrap_or(JsonValue::Null)
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}
