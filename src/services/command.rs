//! Natural-language data commands ("insira 5 pedidos para o cliente 3").
//!
//! Before the model is asked for SQL, the command is enriched with facts read
//! live from the database: valid foreign key ids, the next free primary key
//! and the exact column list of the target table. The table detection below is
//! a best-effort regex heuristic and is not a security boundary.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::db::executor::CommandExecutor;
use crate::db::sanitizer::validate_table_name;
use crate::db::schema_manager::SchemaManager;
use crate::error::GatewayError;
use crate::llm::LlmManager;
use crate::llm::models::Task;

const MAX_CONTEXT_IDS: usize = 50;
const CONTEXT_SAMPLE_ROWS: usize = 3;

static CREATE_TABLE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:crie|criar|create|nova|new)\s+(?:uma\s+|a\s+)?(?:tabela|table)\b")
        .expect("create table regex")
});
static BULK_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:create|generate|insert|criar|gerar|inserir)\s+(\d+)\s+")
        .expect("bulk amount regex")
});
static CONTEXT_TABLES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:considerando\s+as\s+tabelas|considering(?:\s+the)?\s+tables)\s*\[(.*?)\]")
        .expect("context tables regex")
});
static EXPLICIT_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:into|table|tabela)\s+(?:de\s+|da\s+|do\s+|na\s+|no\s+)?['"`]?([a-zA-Z0-9_]+)['"`]?"#,
    )
    .expect("explicit table regex")
});

#[derive(Debug, Serialize)]
pub struct CommandOutcome {
    pub message: String,
    pub command: String,
    pub sql_executed: String,
    pub warning: Option<String>,
}

pub fn is_create_table_request(command: &str) -> bool {
    CREATE_TABLE_REQUEST.is_match(command)
}

/// Lowers a requested row count above `max` to `max`. Returns the rewritten
/// command and a warning when the cap was applied.
pub fn cap_bulk_amount(command: &str, max: u64) -> (String, Option<String>) {
    let Some(digits) = BULK_AMOUNT.captures(command).and_then(|c| c.get(1)) else {
        return (command.to_string(), None);
    };

    let requested = digits.as_str().parse::<u64>().unwrap_or(u64::MAX);
    if requested <= max {
        return (command.to_string(), None);
    }

    let mut capped = command.to_string();
    capped.replace_range(digits.range(), &max.to_string());
    let warning = format!(
        "Limit of {} items applied to keep generation fast (requested: {}).",
        max,
        digits.as_str()
    );
    (capped, Some(warning))
}

/// Tables listed as `Considerando as tabelas [a, b]` / `Considering tables [a, b]`.
pub fn context_tables(command: &str) -> Vec<String> {
    CONTEXT_TABLES
        .captures(command)
        .and_then(|c| c.get(1))
        .map(|list| {
            list.as_str()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Picks the table the command writes to: the first context table, replaced by
/// an explicit `into <table>` when that table exists, otherwise the first known
/// table mentioned as a whole word.
pub fn detect_target_table(command: &str, context: &[String], known: &[String]) -> Option<String> {
    let mut target = context.first().cloned();

    if let Some(candidate) = EXPLICIT_TABLE.captures(command).and_then(|c| c.get(1)) {
        // Only real tables count, so "tabela com ..." does not pick "com".
        if known.iter().any(|t| t == candidate.as_str()) {
            target = Some(candidate.as_str().to_string());
        }
    }

    if target.is_none() {
        target = known
            .iter()
            .find(|table| {
                Regex::new(&format!(r"\b{}\b", regex::escape(table)))
                    .map(|re| re.is_match(command))
                    .unwrap_or(false)
            })
            .cloned();
    }

    target
}

pub struct CommandService<'a> {
    llm: &'a LlmManager,
    schema: &'a SchemaManager,
    executor: &'a CommandExecutor,
    max_bulk_rows: u64,
}

impl<'a> CommandService<'a> {
    pub fn new(
        llm: &'a LlmManager,
        schema: &'a SchemaManager,
        executor: &'a CommandExecutor,
        max_bulk_rows: u64,
    ) -> Self {
        Self {
            llm,
            schema,
            executor,
            max_bulk_rows,
        }
    }

    /// Generates DDL from a description and runs it.
    pub async fn create_table(&self, description: &str) -> Result<String, GatewayError> {
        let sql = self
            .llm
            .generate(Task::CreateTable { description })
            .await?;
        self.executor.run_mutating(&sql).await?;
        self.refresh_schema().await;
        Ok(sql)
    }

    /// Generates ALTER statements for one table and runs them.
    pub async fn migrate(&self, table: &str, command: &str) -> Result<String, GatewayError> {
        let table_schema = self.schema.table_schema(table).await?;
        let sql = self
            .llm
            .generate(Task::Migration {
                command,
                table_schema: &table_schema,
            })
            .await?;
        self.executor.run_mutating(&sql).await?;
        self.refresh_schema().await;
        Ok(sql)
    }

    pub async fn drop_table(&self, table: &str) -> Result<(), GatewayError> {
        self.executor.drop_table(table).await?;
        self.refresh_schema().await;
        Ok(())
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutcome, GatewayError> {
        if is_create_table_request(command) {
            info!("Command routed to table creation");
            let sql = self.create_table(command).await?;
            return Ok(CommandOutcome {
                message: "Table created successfully (detected from command)".to_string(),
                command: command.to_string(),
                sql_executed: sql,
                warning: Some(
                    "Notice: this was sent as a command, but it asked for a new table and was handled as table creation."
                        .to_string(),
                ),
            });
        }

        let (base, warning) = cap_bulk_amount(command, self.max_bulk_rows);
        if let Some(warning) = &warning {
            warn!("{}", warning);
        }

        let schema = self.schema.describe_schema().await?;
        let known = self.schema.list_tables().await?;
        let ctx_tables = context_tables(&base);

        let mut enriched = base.clone();
        enriched.push_str(&self.context_constraints(&ctx_tables).await);
        if let Some(target) = detect_target_table(&base, &ctx_tables, &known) {
            debug!("Target table: {}", target);
            enriched.push_str(&self.target_rules(&target).await);
        }

        let sql = self
            .llm
            .generate(Task::Manipulation {
                command: &enriched,
                schema: &schema,
            })
            .await?;
        self.executor.run_mutating(&sql).await?;

        Ok(CommandOutcome {
            message: "Command executed successfully".to_string(),
            command: enriched,
            sql_executed: sql,
            warning,
        })
    }

    async fn context_constraints(&self, tables: &[String]) -> String {
        let mut facts = String::new();
        for table in tables {
            if validate_table_name(table).is_err() {
                continue;
            }
            match self.valid_ids(table).await {
                Some(line) => facts.push_str(&line),
                None => {
                    if let Ok(sample) = self.schema.sample_rows(table, CONTEXT_SAMPLE_ROWS).await {
                        if sample.is_empty() {
                            continue;
                        }
                        let rows = serde_json::to_string(&sample.rows).unwrap_or_default();
                        facts.push_str(&format!("Sample for '{}': {}\n", table, rows));
                    }
                }
            }
        }

        if facts.is_empty() {
            return facts;
        }

        format!(
            "\n\n[STRICT DATA CONSTRAINTS]:\n{}IMPORTANT RULES:\n\
             1. CONTEXT TABLES ARE READ-ONLY: DO NOT INSERT INTO [ {} ]. Only insert into the target table requested by the user.\n\
             2. FOR FOREIGN KEYS: use ONLY the IDs listed above in [VALID IDs]. DO NOT invent new IDs.\n\
             3. REUSE IDS: it is fine to repeat the same id several times.\n",
            facts,
            tables.join(", ")
        )
    }

    async fn valid_ids(&self, table: &str) -> Option<String> {
        let pk = self.schema.primary_key(table).await.ok().flatten()?;
        let rows = self
            .executor
            .query_live(&format!(
                "SELECT {} FROM {} LIMIT {}",
                pk.column, table, MAX_CONTEXT_IDS
            ))
            .await
            .ok()?;

        let ids: Vec<String> = rows
            .column_values(&pk.column)
            .iter()
            .map(Value::to_string)
            .collect();
        Some(format!(
            "VALID IDs for table '{}' (PK Column: '{}'): [{}]\n",
            table,
            pk.column,
            ids.join(", ")
        ))
    }

    async fn target_rules(&self, table: &str) -> String {
        let mut rules = String::new();

        match self.schema.primary_key(table).await {
            Ok(Some(pk)) if pk.is_numeric => match self.current_max_id(table, &pk.column).await {
                Ok(max_id) => {
                    let next = max_id + 1;
                    rules.push_str(&format!(
                        "\n\n[SYSTEM CONTEXT]: The table '{}' has a numeric primary key '{}'. \
                         The current maximum ID is {}. You MUST generate explicit IDs starting from {} \
                         for the new records (e.g. {}, {}...). Do NOT start from 1.",
                        table,
                        pk.column,
                        max_id,
                        next,
                        next,
                        next + 1
                    ));
                }
                Err(e) => warn!("Could not read max id of {}: {}", table, e),
            },
            Ok(_) => {}
            Err(e) => warn!("Could not read primary key of {}: {}", table, e),
        }

        if let Ok(columns) = self.schema.table_columns(table).await {
            let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            rules.push_str(&format!(
                "\n\n[CRITICAL SCHEMA RULE]: The target table '{}' has exactly these columns: [{}].\n\
                 You MUST use these exact column names in your INSERT statement. Do NOT invent columns that are not in the list.\n\
                 For foreign keys, use the integer IDs listed above (not names).",
                table,
                names.join(", ")
            ));
        }

        rules
    }

    // Always read live: a cached value could hand out duplicate keys.
    async fn current_max_id(&self, table: &str, column: &str) -> Result<i64, GatewayError> {
        let rows = self
            .executor
            .query_live(&format!("SELECT MAX({}) AS max_id FROM {}", column, table))
            .await?;
        Ok(rows
            .column_values("max_id")
            .first()
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0))
    }

    async fn refresh_schema(&self) {
        if let Err(e) = self.schema.build_schema().await {
            warn!("Schema refresh after DDL failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedBackend, recording_manager};
    use crate::web::state::AppState;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn create_table_phrasing_is_detected() {
        for cmd in [
            "crie uma tabela de produtos",
            "Create a table for invoices",
            "nova tabela clientes",
            "  criar tabela x",
        ] {
            assert!(is_create_table_request(cmd), "{}", cmd);
        }
        for cmd in ["insira 3 clientes na tabela clientes", "create 5 products", "tabela nova"] {
            assert!(!is_create_table_request(cmd), "{}", cmd);
        }
    }

    #[test]
    fn bulk_requests_are_capped() {
        let (cmd, warning) = cap_bulk_amount("Inserir 50 produtos com preço 50", 10);
        assert_eq!(cmd, "Inserir 10 produtos com preço 50");
        assert!(warning.unwrap().contains("requested: 50"));

        let (cmd, warning) = cap_bulk_amount("gerar 10 clientes", 10);
        assert_eq!(cmd, "gerar 10 clientes");
        assert!(warning.is_none());

        let (_, warning) = cap_bulk_amount("insert 99999999999999999999999 rows", 10);
        assert!(warning.is_some());
    }

    #[test]
    fn context_table_lists() {
        assert_eq!(
            context_tables("Considerando as tabelas [clientes, instrumentos ,] insira 2 pedidos"),
            tables(&["clientes", "instrumentos"])
        );
        assert_eq!(
            context_tables("considering the tables [a] add rows"),
            tables(&["a"])
        );
        assert!(context_tables("insira 2 pedidos").is_empty());
    }

    #[test]
    fn target_table_heuristic() {
        let known = tables(&["clientes", "pedidos", "produtos"]);

        // explicit and existing wins over context
        assert_eq!(
            detect_target_table("insert into pedidos", &tables(&["clientes"]), &known).as_deref(),
            Some("pedidos")
        );
        // a preposition after "tabela" is not a table
        assert_eq!(
            detect_target_table("tabela com produtos baratos", &[], &known).as_deref(),
            Some("produtos")
        );
        assert_eq!(
            detect_target_table("apague tudo de clientes_antigos", &[], &known),
            None
        );
        assert_eq!(
            detect_target_table("qualquer coisa", &tables(&["clientes"]), &known).as_deref(),
            Some("clientes")
        );
    }

    async fn seeded_state(answers: &[&str]) -> (AppState, std::sync::Arc<ScriptedBackend>) {
        let (llm, backend) = recording_manager(ScriptedBackend::replying(answers.iter().copied()));
        let state = AppState::in_memory(llm);
        state
            .executor
            .run_mutating(
                "CREATE TABLE clientes (id INTEGER PRIMARY KEY, nome VARCHAR);
                 INSERT INTO clientes VALUES (1, 'Ana'), (7, 'Bruno');
                 CREATE TABLE pedidos (id INTEGER PRIMARY KEY, cliente_id INTEGER, total DOUBLE);",
            )
            .await
            .unwrap();
        state.schema_manager.build_schema().await.unwrap();
        (state, backend)
    }

    #[tokio::test]
    async fn command_is_enriched_with_live_facts() {
        let (state, backend) = seeded_state(&[
            "```sql\nINSERT INTO pedidos (id, cliente_id, total) VALUES (1, 7, 10.5), (2, 1, 99.0),\n```",
        ])
        .await;

        let outcome = state
            .commands()
            .run("Considerando as tabelas [clientes] inserir 30 registros into pedidos")
            .await
            .unwrap();

        assert_eq!(outcome.sql_executed, "INSERT INTO pedidos (id, cliente_id, total) VALUES (1, 7, 10.5), (2, 1, 99.0)");
        assert!(outcome.warning.unwrap().contains("requested: 30"));
        assert!(outcome.command.contains("inserir 10 registros"));
        assert!(outcome.command.contains("VALID IDs for table 'clientes' (PK Column: 'id'): [1, 7]"));
        assert!(outcome.command.contains("The current maximum ID is 0"));
        assert!(outcome.command.contains("has exactly these columns: [id, cliente_id, total]"));

        let prompt = &backend.prompt_texts()[0];
        assert!(prompt.contains("Table: pedidos"));
        assert!(prompt.contains("[STRICT DATA CONSTRAINTS]"));

        let rows = state
            .executor
            .query_live("SELECT COUNT(*) AS n FROM pedidos")
            .await
            .unwrap();
        assert_eq!(rows.column_values("n")[0], 2);
    }

    #[tokio::test]
    async fn max_id_is_read_live_not_from_cache() {
        let (state, backend) = seeded_state(&[
            "INSERT INTO clientes (id, nome) VALUES (8, 'Caio')",
            "INSERT INTO clientes (id, nome) VALUES (10, 'Duda')",
        ])
        .await;

        // warm the read cache with the old maximum
        state
            .executor
            .run_read_only("SELECT MAX(id) AS max_id FROM clientes")
            .await
            .unwrap();
        state
            .executor
            .run_mutating("INSERT INTO clientes VALUES (9, 'Eva')")
            .await
            .unwrap();

        state.commands().run("adicione um cliente na tabela clientes").await.unwrap();
        let prompt = &backend.prompt_texts()[0];
        assert!(prompt.contains("The current maximum ID is 9"));
    }

    #[tokio::test]
    async fn create_table_requests_are_rerouted() {
        let (state, _) = seeded_state(&[
            "CREATE TABLE produtos (id INTEGER PRIMARY KEY, nome VARCHAR);",
        ])
        .await;

        let outcome = state.commands().run("crie uma tabela de produtos").await.unwrap();
        assert!(outcome.warning.unwrap().starts_with("Notice"));
        assert!(
            state
                .schema_manager
                .describe_schema()
                .await
                .unwrap()
                .contains("Table: produtos")
        );
    }

    #[tokio::test]
    async fn disallowed_generated_sql_is_not_executed() {
        let (state, _) = seeded_state(&["DELETE FROM clientes; SELECT * FROM clientes"]).await;

        let err = state.commands().run("remova os clientes").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnauthorizedStatement(_)));
        let rows = state.executor.query_live("SELECT * FROM clientes").await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
