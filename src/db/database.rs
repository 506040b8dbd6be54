use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use duckdb::params_from_iter;
use duckdb::types::Value;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::db_pool::DuckPool;
use super::db_utils::query_to_rows;
use crate::error::GatewayError;

/// Result set of a read: column names in select order plus one JSON object
/// per row. Repeated column names are suffixed (`id`, `id_2`) in both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, JsonValue>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in every row, skipping nulls.
    pub fn column_values(&self, column: &str) -> Vec<JsonValue> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|value| !value.is_null())
            .cloned()
            .collect()
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Runs a read with `?` placeholders bound to `params`.
    async fn query_with(&self, sql: &str, params: Vec<Value>) -> Result<QueryRows, GatewayError>;

    /// Runs a single statement with bound `params` and returns the number of
    /// affected rows.
    async fn execute_with(&self, sql: &str, params: Vec<Value>) -> Result<usize, GatewayError>;

    async fn query(&self, sql: &str) -> Result<QueryRows, GatewayError> {
        self.query_with(sql, Vec::new()).await
    }

    async fn execute(&self, sql: &str) -> Result<usize, GatewayError> {
        self.execute_with(sql, Vec::new()).await
    }
}

pub struct DuckDatabase {
    pool: DuckPool,
}

impl DuckDatabase {
    pub fn new(pool: DuckPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for DuckDatabase {
    async fn query_with(&self, sql: &str, params: Vec<Value>) -> Result<QueryRows, GatewayError> {
        debug!("Executing query: {}", sql);
        let pool = self.pool.clone();
        let sql = sql.to_string();

        // DuckDB calls block, keep them off the async workers
        tokio::task::spawn_blocking(move || -> Result<QueryRows, GatewayError> {
            let conn = pool.get()?;
            Ok(query_to_rows(&conn, &sql, &params)?)
        })
        .await?
    }

    async fn execute_with(&self, sql: &str, params: Vec<Value>) -> Result<usize, GatewayError> {
        debug!("Executing statement: {}", sql);
        let pool = self.pool.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || -> Result<usize, GatewayError> {
            let conn = pool.get()?;
            Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
        })
        .await?
    }
}
