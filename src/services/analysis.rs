use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::cache::{TtlCache, cache_key};
use crate::db::context_store::ContextStore;
use crate::db::executor::CommandExecutor;
use crate::db::schema_manager::{DEFAULT_SAMPLE_LIMIT, SchemaManager};
use crate::error::GatewayError;
use crate::llm::LlmManager;
use crate::llm::models::Task;

/// Question answering over the database: data retrieval (cached) and the
/// follow-up insight generation over whatever data the client sends back.
pub struct AnalysisService<'a> {
    llm: &'a LlmManager,
    schema: &'a SchemaManager,
    executor: &'a CommandExecutor,
    contexts: &'a ContextStore,
    cache: &'a TtlCache,
    ttl: Duration,
}

impl<'a> AnalysisService<'a> {
    pub fn new(
        llm: &'a LlmManager,
        schema: &'a SchemaManager,
        executor: &'a CommandExecutor,
        contexts: &'a ContextStore,
        cache: &'a TtlCache,
        ttl: Duration,
    ) -> Self {
        Self {
            llm,
            schema,
            executor,
            contexts,
            cache,
            ttl,
        }
    }

    /// Plain natural-language SELECT: generate, run, return rows.
    pub async fn query(&self, question: &str) -> Result<Value, GatewayError> {
        let schema = self.schema.describe_schema().await?;
        let sql = self.llm.generate(Task::Select { question, schema: &schema }).await?;
        let rows = self.executor.run_read_only(&sql).await?;

        Ok(json!({
            "question": question,
            "sql_generated": sql,
            "results": rows.rows,
        }))
    }

    /// Gathers the data needed to answer `question`.
    ///
    /// With context tables (from the request and/or a saved context) the
    /// tables' sample rows are returned as-is. Without them a SELECT is
    /// generated and run; a failing SQL becomes an `error` entry in the
    /// payload rather than a failed request. Either payload is cached.
    pub async fn analyze(
        &self,
        question: &str,
        context_tables: &[String],
        context_id: Option<i64>,
    ) -> Result<Value, GatewayError> {
        let mut tables: Vec<String> = context_tables.to_vec();
        if let Some(id) = context_id {
            match self.contexts.get(id).await {
                Ok(context) => tables.extend(context.tables()),
                Err(e) => warn!("Ignoring context {}: {}", id, e),
            }
        }
        let tables = normalize_tables(tables);

        let key = cache_key("analyze", &format!("{}|{}", question, tables.join(",")));
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Analysis served from cache");
            return Ok(cached);
        }

        let payload = if tables.is_empty() {
            self.analyze_with_sql(question).await?
        } else {
            self.analyze_with_tables(question, &tables).await
        };

        self.cache.set(key, payload.clone(), self.ttl).await;
        Ok(payload)
    }

    async fn analyze_with_tables(&self, question: &str, tables: &[String]) -> Value {
        let mut snapshots = Vec::new();
        for table in tables {
            match self.schema.sample_rows(table, DEFAULT_SAMPLE_LIMIT).await {
                Ok(data) => snapshots.push(json!({ "table": table, "data": data })),
                // one bad table does not spoil the others
                Err(e) => warn!("Skipping context table {}: {}", table, e),
            }
        }

        json!({
            "question": question,
            "sql_generated": null,
            "data": { "tables": snapshots },
        })
    }

    async fn analyze_with_sql(&self, question: &str) -> Result<Value, GatewayError> {
        let schema = self.schema.describe_schema().await?;
        let sql = self.llm.generate(Task::Select { question, schema: &schema }).await?;

        let data = match self.executor.run_read_only(&sql).await {
            Ok(rows) => json!(rows.rows),
            Err(e) => {
                info!("Generated SQL failed for analysis: {}", e);
                json!({ "error": format!("SQL Execution Failed: {}", e) })
            }
        };

        Ok(json!({
            "question": question,
            "sql_generated": sql,
            "data": data,
        }))
    }

    pub async fn insight(&self, question: &str, data: &Value) -> Result<String, GatewayError> {
        Ok(self.llm.generate(Task::Insight { question, data }).await?)
    }
}

/// Trimmed, non-empty, sorted and deduplicated so equivalent requests share a cache key.
pub fn normalize_tables(tables: Vec<String>) -> Vec<String> {
    let mut tables: Vec<String> = tables
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tables.sort();
    tables.dedup();
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::context_store::NewContext;
    use crate::llm::testing::{ScriptedBackend, recording_manager};
    use crate::web::state::AppState;

    async fn state(answers: &[&str]) -> (AppState, std::sync::Arc<ScriptedBackend>) {
        let (llm, backend) = recording_manager(ScriptedBackend::replying(answers.iter().copied()));
        let state = AppState::in_memory(llm);
        state.contexts.setup().await.unwrap();
        state
            .executor
            .run_mutating(
                "CREATE TABLE instrumentos (id INTEGER PRIMARY KEY, nome VARCHAR, preco DOUBLE);
                 INSERT INTO instrumentos VALUES (1, 'Guitarra', 4500), (2, 'Baixo', 3500);",
            )
            .await
            .unwrap();
        state.schema_manager.build_schema().await.unwrap();
        (state, backend)
    }

    #[test]
    fn table_lists_are_normalized() {
        let tables = vec![" b".to_string(), "a".into(), "".into(), "b".into()];
        assert_eq!(normalize_tables(tables), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn sql_path_is_cached_per_question() {
        let (state, backend) = state(&["SELECT * FROM instrumentos ORDER BY preco DESC"]).await;
        let analysis = state.analysis();

        let first = analysis.analyze("qual o mais caro?", &[], None).await.unwrap();
        assert_eq!(first["data"][0]["nome"], "Guitarra");
        assert_eq!(first["sql_generated"], "SELECT * FROM instrumentos ORDER BY preco DESC");

        // second call would fail if it reached the backend again
        let second = analysis.analyze("qual o mais caro?", &[], None).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(backend.prompt_texts().len(), 1);
    }

    #[tokio::test]
    async fn failing_sql_is_a_graceful_payload() {
        let (state, _) = state(&["SELECT * FROM nao_existe"]).await;
        let payload = state.analysis().analyze("?", &[], None).await.unwrap();
        assert!(
            payload["data"]["error"]
                .as_str()
                .unwrap()
                .starts_with("SQL Execution Failed")
        );
    }

    #[tokio::test]
    async fn context_tables_skip_generation() {
        let (state, backend) = state(&[]).await;
        let saved = state
            .contexts
            .create(NewContext {
                name: "loja".into(),
                description: None,
                content: json!({"tables": ["instrumentos", "sumida"]}),
                is_default: false,
            })
            .await
            .unwrap();

        let payload = state
            .analysis()
            .analyze("resuma", &[" instrumentos ".to_string()], Some(saved.id))
            .await
            .unwrap();

        assert!(payload["sql_generated"].is_null());
        let tables = payload["data"]["tables"].as_array().unwrap();
        assert_eq!(tables.len(), 1, "missing table is skipped, duplicates merged");
        assert_eq!(tables[0]["table"], "instrumentos");
        assert_eq!(tables[0]["data"]["rows"].as_array().unwrap().len(), 2);
        assert!(backend.prompt_texts().is_empty());
    }

    #[tokio::test]
    async fn insight_gets_the_data_and_question() {
        let (state, backend) = state(&["A Guitarra é a mais cara."]).await;
        let data = json!([{"nome": "Guitarra", "preco": 4500}]);

        let insight = state.analysis().insight("qual o mais caro?", &data).await.unwrap();
        assert_eq!(insight, "A Guitarra é a mais cara.");
        assert!(backend.prompt_texts()[0].contains("\"Guitarra\""));
    }
}
