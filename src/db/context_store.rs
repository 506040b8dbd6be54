use chrono::Utc;
use duckdb::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::database::Database;
use crate::error::GatewayError;

/// A named grounding snippet: free text (`content.text`) and/or a table list
/// (`content.tables`) merged into later prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedContext {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub content: Value,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl SavedContext {
    pub fn text(&self) -> Option<&str> {
        self.content
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn tables(&self) -> Vec<String> {
        self.content
            .get("tables")
            .and_then(Value::as_array)
            .map(|tables| {
                tables
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContext {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_default: bool,
}

/// Partial update: only the fields present are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub is_default: Option<bool>,
}

pub struct ContextStore {
    db: Arc<dyn Database>,
}

impl ContextStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Creates the sequence and table if they are missing.
    pub async fn setup(&self) -> Result<(), GatewayError> {
        self.db
            .execute("CREATE SEQUENCE IF NOT EXISTS contexts_id_seq START 1")
            .await?;
        self.db
            .execute(
                "CREATE TABLE IF NOT EXISTS contexts (
                    id BIGINT PRIMARY KEY DEFAULT nextval('contexts_id_seq'),
                    name VARCHAR NOT NULL,
                    description VARCHAR,
                    content VARCHAR,
                    is_default BOOLEAN NOT NULL DEFAULT false,
                    created_at VARCHAR NOT NULL,
                    updated_at VARCHAR NOT NULL
                )",
            )
            .await?;
        info!("Contexts table ready");
        Ok(())
    }

    /// All contexts, newest first.
    pub async fn list(&self) -> Result<Vec<SavedContext>, GatewayError> {
        let rows = self
            .db
            .query("SELECT * FROM contexts ORDER BY created_at DESC, id DESC")
            .await?;
        Ok(rows.rows.iter().map(context_from_row).collect())
    }

    pub async fn get(&self, id: i64) -> Result<SavedContext, GatewayError> {
        let rows = self
            .db
            .query_with("SELECT * FROM contexts WHERE id = ?", vec![SqlValue::BigInt(id)])
            .await?;
        rows.rows
            .first()
            .map(context_from_row)
            .ok_or_else(|| GatewayError::NotFound(format!("Context {} not found", id)))
    }

    pub async fn create(&self, new: NewContext) -> Result<SavedContext, GatewayError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(GatewayError::Validation("name is required".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let params = vec![
            text(name),
            new.description.as_deref().map(text).unwrap_or(SqlValue::Null),
            text(&new.content.to_string()),
            SqlValue::Boolean(new.is_default),
            text(&now),
            text(&now),
        ];

        let rows = self
            .db
            .query_with(
                "INSERT INTO contexts (name, description, content, is_default, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
                params,
            )
            .await?;
        let id = rows
            .column_values("id")
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| GatewayError::Internal("insert returned no id".to_string()))?;
        info!("Created context {} ({})", id, name);
        self.get(id).await
    }

    pub async fn update(&self, id: i64, patch: ContextPatch) -> Result<SavedContext, GatewayError> {
        // 404 before touching anything
        self.get(id).await?;

        let mut sets = Vec::new();
        let mut params = Vec::new();
        if let Some(name) = patch.name.as_deref().map(str::trim) {
            if name.is_empty() {
                return Err(GatewayError::Validation("name cannot be empty".to_string()));
            }
            sets.push("name = ?");
            params.push(text(name));
        }
        if let Some(description) = &patch.description {
            sets.push("description = ?");
            params.push(text(description));
        }
        if let Some(content) = &patch.content {
            sets.push("content = ?");
            params.push(text(&content.to_string()));
        }
        if let Some(is_default) = patch.is_default {
            sets.push("is_default = ?");
            params.push(SqlValue::Boolean(is_default));
        }
        sets.push("updated_at = ?");
        params.push(text(&Utc::now().to_rfc3339()));
        params.push(SqlValue::BigInt(id));

        self.db
            .execute_with(
                &format!("UPDATE contexts SET {} WHERE id = ?", sets.join(", ")),
                params,
            )
            .await?;
        self.get(id).await
    }

    /// Deleting a missing id is not an error.
    pub async fn delete(&self, id: i64) -> Result<(), GatewayError> {
        self.db
            .execute_with("DELETE FROM contexts WHERE id = ?", vec![SqlValue::BigInt(id)])
            .await?;
        Ok(())
    }
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn context_from_row(row: &Map<String, Value>) -> SavedContext {
    let text = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    // content is stored as JSON text; anything unparsable is kept as a plain string
    let content = match row.get("content") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        _ => Value::Null,
    };

    SavedContext {
        id: row.get("id").and_then(Value::as_i64).unwrap_or_default(),
        name: text("name"),
        description: row
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        content,
        is_default: row.get("is_default").and_then(Value::as_bool).unwrap_or(false),
        created_at: text("created_at"),
        updated_at: text("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::DuckDatabase;
    use crate::db::db_pool::build_pool;
    use serde_json::json;

    async fn store() -> ContextStore {
        let db = Arc::new(DuckDatabase::new(build_pool(":memory:", 2).unwrap()));
        let store = ContextStore::new(db);
        store.setup().await.unwrap();
        store
    }

    fn new_context(name: &str, content: Value) -> NewContext {
        NewContext {
            name: name.to_string(),
            description: None,
            content,
            is_default: false,
        }
    }

    #[tokio::test]
    async fn setup_is_repeatable() {
        let store = store().await;
        store.setup().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let store = store().await;
        let created = store
            .create(NewContext {
                name: "vendas".into(),
                description: Some("it's the sales team".into()),
                content: json!({"tables": ["pedidos", " clientes ", ""], "text": "Valores em BRL"}),
                is_default: true,
            })
            .await
            .unwrap();

        assert_eq!(created.name, "vendas");
        assert_eq!(created.description.as_deref(), Some("it's the sales team"));
        assert!(created.is_default);
        assert_eq!(created.tables(), vec!["pedidos", "clientes"]);
        assert_eq!(created.text(), Some("Valores em BRL"));
        assert_eq!(store.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = store().await;
        let first = store.create(new_context("a", json!({}))).await.unwrap();
        let second = store.create(new_context("b", json!({}))).await.unwrap();

        let ids: Vec<i64> = store.list().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn update_only_touches_given_fields() {
        let store = store().await;
        let created = store
            .create(new_context("suporte", json!({"text": "antes"})))
            .await
            .unwrap();

        let updated = store
            .update(
                created.id,
                ContextPatch {
                    content: Some(json!({"text": "depois"})),
                    ..ContextPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "suporte");
        assert_eq!(updated.text(), Some("depois"));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn missing_contexts() {
        let store = store().await;
        assert!(matches!(store.get(42).await, Err(GatewayError::NotFound(_))));
        assert!(matches!(
            store.update(42, ContextPatch::default()).await,
            Err(GatewayError::NotFound(_))
        ));
        store.delete(42).await.unwrap();
        assert!(matches!(
            store.create(new_context("  ", json!({}))).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store().await;
        let created = store.create(new_context("tmp", json!({}))).await.unwrap();
        store.delete(created.id).await.unwrap();
        store.delete(created.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quotes_backslashes_and_semicolons_round_trip() {
        let store = store().await;
        let name = "O'Brien \\ vendas; DROP TABLE contexts; --";
        let content = json!({"text": "it's \\n not; a 'quote'", "tables": ["pedidos'; --"]});

        let created = store
            .create(NewContext {
                name: name.into(),
                description: Some("a'b\\c;".into()),
                content: content.clone(),
                is_default: false,
            })
            .await
            .unwrap();
        let read = store.get(created.id).await.unwrap();
        assert_eq!(read.name, name);
        assert_eq!(read.description.as_deref(), Some("a'b\\c;"));
        assert_eq!(read.content, content);

        let updated = store
            .update(
                created.id,
                ContextPatch {
                    name: Some("x'; DELETE FROM contexts; --".into()),
                    ..ContextPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "x'; DELETE FROM contexts; --");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
