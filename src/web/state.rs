use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::cache::TtlCache;
use crate::db::context_store::ContextStore;
use crate::db::database::{Database, DuckDatabase};
use crate::db::db_pool::DuckPool;
use crate::db::executor::CommandExecutor;
use crate::db::schema_manager::SchemaManager;
use crate::llm::LlmManager;
use crate::services::analysis::AnalysisService;
use crate::services::command::CommandService;
use crate::services::scaffold::ScaffoldService;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<dyn Database>,
    pub cache: Arc<TtlCache>,
    pub llm: LlmManager,
    pub schema_manager: SchemaManager,
    pub executor: CommandExecutor,
    pub contexts: ContextStore,
    pub scaffold_dir: PathBuf,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, pool: DuckPool, llm: LlmManager) -> Self {
        Self::with_database(config, Arc::new(DuckDatabase::new(pool)), llm)
    }

    pub fn with_database(config: AppConfig, db: Arc<dyn Database>, llm: LlmManager) -> Self {
        // One cache for schema text, table samples, query results and analyses
        let cache = Arc::new(TtlCache::new());

        let schema_manager = SchemaManager::new(
            db.clone(),
            cache.clone(),
            Duration::from_secs(config.cache.ttl_secs),
        );
        let executor = CommandExecutor::new(db.clone(), cache.clone(), &config.cache);
        let contexts = ContextStore::new(db.clone());

        Self {
            scaffold_dir: PathBuf::from(&config.scaffold.output_dir),
            config,
            db,
            cache,
            llm,
            schema_manager,
            executor,
            contexts,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn commands(&self) -> CommandService<'_> {
        CommandService::new(
            &self.llm,
            &self.schema_manager,
            &self.executor,
            self.config.llm.max_bulk_rows,
        )
    }

    pub fn analysis(&self) -> AnalysisService<'_> {
        AnalysisService::new(
            &self.llm,
            &self.schema_manager,
            &self.executor,
            &self.contexts,
            &self.cache,
            Duration::from_secs(self.config.cache.analyze_ttl_secs),
        )
    }

    pub fn scaffold(&self) -> ScaffoldService<'_> {
        ScaffoldService::new(&self.llm, &self.schema_manager, &self.scaffold_dir)
    }
}

#[cfg(test)]
impl AppState {
    /// State over a private in-memory DuckDB.
    pub fn in_memory(llm: LlmManager) -> Self {
        Self::in_memory_with(AppConfig::default(), llm)
    }

    pub fn in_memory_with(mut config: AppConfig, llm: LlmManager) -> Self {
        config.database.connection_string = ":memory:".to_string();
        let pool = crate::db::db_pool::build_pool(":memory:", 2).unwrap();
        Self::new(config, pool, llm)
    }
}
