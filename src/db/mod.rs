pub mod cache;
pub mod context_store;
pub mod database;
pub mod db_pool;
pub mod db_utils;
pub mod executor;
pub mod sanitizer;
pub mod schema_manager;
