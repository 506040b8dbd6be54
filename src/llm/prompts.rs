//! Prompt templates for every generation task.
//!
//! Each task has a system part (rules) and a user part (the request). Chat
//! backends get them as two messages; instruction backends get one string.

use minijinja::{Environment, context};
use serde_json::Value;

use super::LlmError;
use super::models::{Prompt, Task};
use crate::config::LlmConfig;

pub const TRUNCATION_NOTICE: &str =
    "[Note: the data below was truncated before analysis; only part of it is shown.]";
const TRUNCATED_MARKER: &str = "... [TRUNCATED]";

const SQL_TEMPERATURE: f32 = 0.1;
const CODE_TEMPERATURE: f32 = 0.2;
const INSIGHT_TEMPERATURE: f32 = 0.1;
const CHAT_TEMPERATURE: f32 = 0.7;

const TEMPLATES: [(&str, &str); 16] = [
    (
        "create_table.system",
        r#"You are a SQL expert. Output ONLY the DuckDB CREATE TABLE statement(s).
STRICT RULES:
1. No markdown allowed.
2. No preamble or explanation.
3. Return raw SQL only, statements separated by semicolons.
4. For auto-increment ids, first CREATE SEQUENCE <table>_id_seq and use DEFAULT nextval('<table>_id_seq').
5. Always create indices (CREATE INDEX) for foreign keys and for columns likely to be used in WHERE clauses or joins."#,
    ),
    ("create_table.user", "Description: {{ description }}"),
    (
        "select.system",
        r#"You are a DuckDB SQL expert. Output ONLY the SQL SELECT statement.
STRICT RULES:
1. No markdown allowed.
2. No preamble or explanation.
3. Return raw SQL only.
4. Always SELECT * to keep the full context of the answer, unless specific columns are explicitly requested.
5. Use only tables and columns present in the schema."#,
    ),
    ("select.user", "Schema:\n{{ schema }}\nQuestion: {{ question }}"),
    (
        "manipulation.system",
        r#"You are a DuckDB SQL expert. Output ONLY the INSERT, UPDATE or DELETE statement(s).
IMPORTANT RULES:
1. Output ONLY the SQL code. Do not use markdown.
2. Do NOT use loops, subqueries or stored procedures for INSERT.
3. Use standard 'INSERT INTO table (columns) VALUES (...), (...)' syntax for multiple rows.
4. When generating dummy data, use explicit hardcoded values in a single INSERT with multiple rows.
5. Do NOT provide values for columns marked as (auto_increment) in the schema.
6. CRITICAL: every row in the VALUES list must have EXACTLY the same number of values as the column list.
7. The LAST row of the VALUES list must NOT be followed by a trailing comma."#,
    ),
    ("manipulation.user", "Schema:\n{{ schema }}\nCommand: {{ command }}"),
    (
        "migration.system",
        r#"You are a DuckDB SQL expert. Output ONLY the ALTER TABLE statement(s) that apply the requested change.
RULES:
1. No markdown, no explanation.
2. One change per statement, separated by semicolons.
3. Keep existing data: never drop or recreate the table unless explicitly asked."#,
    ),
    ("migration.user", "Current table:\n{{ table_schema }}\nChange: {{ command }}"),
    ("code.system", "You are a coding assistant. Return only the code requested."),
    ("code.user", "{{ prompt }}"),
    (
        "insight.system",
        r#"You are a data analyst. Answer the user's question based on the provided JSON data.
RULES:
1. Answer in {{ language }}.
2. Be direct and concise.
3. DO NOT write code.
4. Just give the final answer or insight.
5. Be mathematically precise: compare values meticulously and never invent numbers that are not in the data.
{%- if truncated %}
6. The data was truncated: say so if the answer may depend on rows you cannot see.
{%- endif %}"#,
    ),
    (
        "insight.user",
        "Data: {{ data }}\n{% if truncated %}{{ notice }}\n{% endif %}Question: {{ question }}",
    ),
    (
        "chat.system",
        "You are a senior data analyst. Answer in {{ language }}, directly and concisely, in at most 2 sentences. Answer only what was asked, without extra explanations.",
    ),
    ("chat.user", "{{ message }}"),
    (
        "scaffold.model",
        r#"Generate a Rust module for the database table `{{ table }}`.

Table definition:
{{ schema }}
Requirements:
- A public struct named {{ struct_name }} with one public field per column, using i64, f64, bool, String or Option<...> for nullable columns.
- Derive Debug, Clone, serde::Serialize and serde::Deserialize.
- A `pub const TABLE: &str = "{{ table }}";` constant and a `pub const COLUMNS: &[&str]` listing the columns in order.
Return only the Rust code."#,
    ),
    (
        "scaffold.handlers",
        r#"Generate an axum 0.8 handler module for the database table `{{ table }}`, using the model `{{ struct_name }}` from `crate::models::{{ table }}`.

Table definition:
{{ schema }}
Requirements:
- Async handlers list, show, store, update and delete.
- Extract the id with axum::extract::Path and bodies with axum::Json.
- Return Json responses and (StatusCode, String) errors.
- A `pub fn router() -> axum::Router` wiring GET /{{ table }}, GET /{{ table }}/{id}, POST /{{ table }}, PUT /{{ table }}/{id} and DELETE /{{ table }}/{id}.
Return only the Rust code."#,
    ),
];

/// Whether the backend takes a message list or a single instruction string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    Instruction,
    Chat,
}

#[derive(Debug, Clone)]
pub struct InsightLimits {
    pub max_rows: usize,
    pub table_rows: usize,
    pub max_chars: usize,
}

pub struct PromptBuilder {
    env: Environment<'static>,
    style: PromptStyle,
    language: String,
    limits: InsightLimits,
}

impl PromptBuilder {
    pub fn new(style: PromptStyle, config: &LlmConfig) -> Result<Self, LlmError> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .map_err(|e| LlmError::Prompt(format!("template {}: {}", name, e)))?;
        }

        Ok(Self {
            env,
            style,
            language: config.answer_language.clone(),
            limits: InsightLimits {
                max_rows: config.insight_max_rows,
                table_rows: config.insight_table_rows,
                max_chars: config.insight_max_chars,
            },
        })
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    pub fn build(&self, task: &Task<'_>) -> Result<Prompt, LlmError> {
        let name = task.name();
        let (ctx, temperature) = match *task {
            Task::CreateTable { description } => (context! { description }, SQL_TEMPERATURE),
            Task::Select { question, schema } => (context! { question, schema }, SQL_TEMPERATURE),
            Task::Manipulation { command, schema } => {
                (context! { command, schema }, SQL_TEMPERATURE)
            }
            Task::Migration {
                command,
                table_schema,
            } => (context! { command, table_schema }, SQL_TEMPERATURE),
            Task::Code { prompt } => (context! { prompt }, CODE_TEMPERATURE),
            Task::Insight { question, data } => {
                let (data, truncated) = truncate_insight_data(data, &self.limits);
                (
                    context! {
                        question,
                        data,
                        truncated,
                        notice => TRUNCATION_NOTICE,
                        language => &self.language,
                    },
                    INSIGHT_TEMPERATURE,
                )
            }
            Task::Chat { message } => (
                context! { message, language => &self.language },
                CHAT_TEMPERATURE,
            ),
        };

        let system = self.render(&format!("{}.system", name), &ctx)?;
        let user = self.render(&format!("{}.user", name), &ctx)?;
        Ok(self.assemble(system, user, temperature))
    }

    /// Code-generation request text for the model struct of `table`.
    pub fn scaffold_model(&self, table: &str, schema: &str) -> Result<String, LlmError> {
        let struct_name = struct_name(table);
        self.render("scaffold.model", &context! { table, schema, struct_name })
    }

    pub fn scaffold_handlers(&self, table: &str, schema: &str) -> Result<String, LlmError> {
        let struct_name = struct_name(table);
        self.render("scaffold.handlers", &context! { table, schema, struct_name })
    }

    fn render(&self, name: &str, ctx: &minijinja::Value) -> Result<String, LlmError> {
        self.env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(ctx))
            .map_err(|e| LlmError::Prompt(format!("template {}: {}", name, e)))
    }

    fn assemble(&self, system: String, user: String, temperature: f32) -> Prompt {
        match self.style {
            PromptStyle::Chat => Prompt::chat(system, user, temperature),
            PromptStyle::Instruction => {
                Prompt::instruction(format!("{}\n\n{}", system, user), temperature)
            }
        }
    }
}

/// Cuts insight input down to the configured limits. Returns the JSON text
/// sent to the model and whether anything was dropped.
pub fn truncate_insight_data(data: &Value, limits: &InsightLimits) -> (String, bool) {
    let mut data = data.clone();
    let mut truncated = false;

    match &mut data {
        Value::Array(rows) => truncated |= cut(rows, limits.max_rows),
        Value::Object(map) => {
            if let Some(Value::Array(rows)) = map.get_mut("rows") {
                truncated |= cut(rows, limits.max_rows);
            }
            if let Some(Value::Array(tables)) = map.get_mut("tables") {
                for table in tables.iter_mut() {
                    if let Some(Value::Array(rows)) = table.pointer_mut("/data/rows") {
                        truncated |= cut(rows, limits.table_rows);
                    }
                }
            }
        }
        _ => {}
    }

    let mut json = data.to_string();
    if json.chars().count() > limits.max_chars {
        json = json.chars().take(limits.max_chars).collect();
        json.push_str(TRUNCATED_MARKER);
        truncated = true;
    }

    (json, truncated)
}

fn cut(rows: &mut Vec<Value>, max: usize) -> bool {
    if rows.len() > max {
        rows.truncate(max);
        true
    } else {
        false
    }
}

/// `order_items` -> `OrderItems`
pub fn struct_name(table: &str) -> String {
    table
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
