use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::{TtlCache, cache_key};
use super::database::{Database, QueryRows};
use super::sanitizer::validate_table_name;
use crate::error::GatewayError;

pub const DEFAULT_SAMPLE_LIMIT: usize = 500;

static NUMERIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)int|decimal|float|double|num|real").expect("numeric type regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_primary: bool,
    pub is_auto_increment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    pub column: String,
    pub is_numeric: bool,
    pub is_auto_increment: bool,
}

/// Reads the DuckDB catalog and keeps a TTL-cached textual description of it
/// for prompt building.
pub struct SchemaManager {
    db: Arc<dyn Database>,
    cache: Arc<TtlCache>,
    ttl: Duration,
}

impl SchemaManager {
    pub fn new(db: Arc<dyn Database>, cache: Arc<TtlCache>, ttl: Duration) -> Self {
        Self { db, cache, ttl }
    }

    /// Cached schema text, rebuilt when missing or expired.
    pub async fn describe_schema(&self) -> Result<String, GatewayError> {
        if let Some(Value::String(schema)) = self.cache.get(&schema_cache_key()).await {
            debug!("Schema served from cache");
            return Ok(schema);
        }
        self.build_schema().await
    }

    /// Always reads the catalog and replaces the cached schema text.
    pub async fn build_schema(&self) -> Result<String, GatewayError> {
        info!("Mapping database schema");
        let tables = self.list_tables().await?;

        let mut schema = String::new();
        for table in &tables {
            schema.push_str(&self.table_schema(table).await?);
        }

        self.cache
            .set(schema_cache_key(), Value::String(schema.clone()), self.ttl)
            .await;
        info!("Schema mapped: {} tables", tables.len());
        Ok(schema)
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, GatewayError> {
        let rows = self
            .db
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .await?;

        Ok(rows
            .column_values("table_name")
            .into_iter()
            .filter_map(|value| value.as_str().map(String::from))
            .collect())
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, GatewayError> {
        let table = validate_table_name(table)?;
        let rows = self
            .db
            .query(&format!("PRAGMA table_info('{}')", table))
            .await?;

        let columns = rows
            .rows
            .iter()
            .map(|row| {
                let text = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or_default();
                ColumnInfo {
                    name: text("name").to_string(),
                    data_type: text("type").to_string(),
                    is_primary: row.get("pk").and_then(Value::as_bool).unwrap_or(false),
                    is_auto_increment: text("dflt_value").contains("nextval("),
                }
            })
            .collect::<Vec<_>>();

        if columns.is_empty() {
            return Err(GatewayError::NotFound(format!("Table '{}' not found", table)));
        }
        Ok(columns)
    }

    /// Description of one table in the same format used for the full schema.
    pub async fn table_schema(&self, table: &str) -> Result<String, GatewayError> {
        let columns = self.table_columns(table).await?;

        let mut text = format!("Table: {}\nColumns:\n", table);
        for column in &columns {
            text.push_str(&format!("- {} ({})", column.name, column.data_type));
            if column.is_primary {
                text.push_str(" [PRI]");
            }
            if column.is_auto_increment {
                text.push_str(" (auto_increment)");
            }
            text.push('\n');
        }

        let indices = self.table_indices(table).await.unwrap_or_else(|e| {
            warn!("Could not read indices for {}: {}", table, e);
            Vec::new()
        });
        if !indices.is_empty() {
            text.push_str("Indices:\n");
            for (name, cols) in indices {
                text.push_str(&format!("- {}: {}\n", name, cols));
            }
        }

        text.push('\n');
        Ok(text)
    }

    async fn table_indices(&self, table: &str) -> Result<Vec<(String, String)>, GatewayError> {
        let rows = self
            .db
            .query(&format!(
                "SELECT index_name, sql FROM duckdb_indexes() WHERE table_name = '{}' ORDER BY index_name",
                table
            ))
            .await?;

        Ok(rows
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("index_name")?.as_str()?.to_string();
                let sql = row.get("sql").and_then(Value::as_str).unwrap_or_default();
                Some((name, index_columns(sql)))
            })
            .collect())
    }

    /// First `limit` rows of `table`, cached per table and limit.
    pub async fn sample_rows(&self, table: &str, limit: usize) -> Result<QueryRows, GatewayError> {
        let table = validate_table_name(table)?;
        let key = cache_key("table", &format!("{}|{}", table, limit));

        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(rows) = serde_json::from_value::<QueryRows>(cached) {
                debug!("Sample rows for {} served from cache", table);
                return Ok(rows);
            }
        }

        let rows = self
            .db
            .query(&format!("SELECT * FROM {} LIMIT {}", table, limit))
            .await?;
        if let Ok(value) = serde_json::to_value(&rows) {
            self.cache.set(key, value, self.ttl).await;
        }
        Ok(rows)
    }

    pub async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKey>, GatewayError> {
        let columns = self.table_columns(table).await?;
        Ok(columns
            .into_iter()
            .find(|column| column.is_primary)
            .map(|column| PrimaryKey {
                is_numeric: NUMERIC_TYPE.is_match(&column.data_type),
                is_auto_increment: column.is_auto_increment,
                column: column.name,
            }))
    }
}

fn schema_cache_key() -> String {
    cache_key("schema", "main")
}

// "CREATE INDEX idx ON t(a, b);" -> "a, b"
fn index_columns(sql: &str) -> String {
    match (sql.find('('), sql.rfind(')')) {
        (Some(start), Some(end)) if start < end => sql[start + 1..end].trim().to_string(),
        _ => String::new(),
    }
}
