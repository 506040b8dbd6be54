use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::cache::{TtlCache, cache_key};
use super::database::{Database, QueryRows};
use super::sanitizer::{is_select, normalize_sql, preview, validate_statement_list, validate_table_name};
use crate::config::CacheConfig;
use crate::error::GatewayError;

/// Runs generated SQL. Reads go through the shared cache, writes never do.
pub struct CommandExecutor {
    db: Arc<dyn Database>,
    cache: Arc<TtlCache>,
    ttl: Duration,
    max_cached_rows: usize,
    clear_on_ddl: bool,
}

impl CommandExecutor {
    pub fn new(db: Arc<dyn Database>, cache: Arc<TtlCache>, config: &CacheConfig) -> Self {
        Self {
            db,
            cache,
            ttl: Duration::from_secs(config.ttl_secs),
            max_cached_rows: config.max_cached_rows,
            clear_on_ddl: config.clear_on_ddl,
        }
    }

    /// Executes a SELECT, answering from the cache while the entry is fresh.
    /// Results larger than `max_cached_rows` are returned but not stored.
    pub async fn run_read_only(&self, sql: &str) -> Result<QueryRows, GatewayError> {
        if !is_select(sql) {
            return Err(GatewayError::UnauthorizedStatement(format!(
                "only SELECT is accepted here: {}",
                preview(sql.trim())
            )));
        }

        let normalized = normalize_sql(sql);
        let key = cache_key("select", &normalized);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<QueryRows>(cached) {
                Ok(rows) => {
                    debug!("Query served from cache: {}", normalized);
                    return Ok(rows);
                }
                Err(_) => {
                    self.cache.remove(&key).await;
                }
            }
        }

        // The normalized text is only the cache key; literals and comments
        // must reach the database untouched.
        let rows = self.db.query(sql).await?;
        if rows.len() <= self.max_cached_rows {
            if let Ok(value) = serde_json::to_value(&rows) {
                self.cache.set(key, value, self.ttl).await;
            }
        } else {
            debug!("Result of {} rows not cached", rows.len());
        }
        Ok(rows)
    }

    /// Validates the whole batch, then runs each statement in order.
    ///
    /// Statements are not wrapped in a transaction: when one fails, the ones
    /// before it stay committed and the rest are skipped.
    pub async fn run_mutating(&self, sql: &str) -> Result<Vec<String>, GatewayError> {
        let statements = validate_statement_list(sql)?;

        for statement in &statements {
            let affected = self.db.execute(statement).await?;
            debug!("Statement affected {} rows: {}", affected, preview(statement));
        }
        info!("Executed {} statement(s)", statements.len());

        self.clear_if_configured().await;
        Ok(statements)
    }

    pub async fn drop_table(&self, table: &str) -> Result<(), GatewayError> {
        let table = validate_table_name(table)?;
        self.db
            .execute(&format!("DROP TABLE IF EXISTS {}", table))
            .await?;
        info!("Dropped table {}", table);

        self.clear_if_configured().await;
        Ok(())
    }

    /// Uncached read for write paths that must see current data.
    pub async fn query_live(&self, sql: &str) -> Result<QueryRows, GatewayError> {
        self.db.query(sql).await
    }

    pub async fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear().await;
        info!("Cache cleared ({} entries)", cleared);
        cleared
    }

    async fn clear_if_configured(&self) {
        if self.clear_on_ddl {
            self.clear_cache().await;
        }
    }
}
