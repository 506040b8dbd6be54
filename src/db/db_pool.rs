use duckdb::Connection;
use r2d2::{ManageConnection, Pool};
use std::sync::Mutex;

use crate::error::GatewayError;

/// Hands out clones of one root connection, so every pooled connection sees
/// the same database instance (including `:memory:` databases).
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: &str) -> Result<Self, duckdb::Error> {
        let root = if connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection_string)?
        };
        Ok(Self {
            root: Mutex::new(root),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub type DuckPool = Pool<DuckDBConnectionManager>;

pub fn build_pool(connection_string: &str, max_size: u32) -> Result<DuckPool, GatewayError> {
    let manager = DuckDBConnectionManager::new(connection_string)?;
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_connections_share_one_database() {
        let pool = build_pool(":memory:", 2).unwrap();
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();

        first
            .execute_batch("CREATE TABLE shared (id INTEGER); INSERT INTO shared VALUES (7);")
            .unwrap();
        let id: i32 = second
            .query_row("SELECT id FROM shared", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, 7);
    }
}
