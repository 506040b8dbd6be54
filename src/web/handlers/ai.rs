use axum::{
    Json,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

use super::{parse, required};
use crate::db::schema_manager::DEFAULT_SAMPLE_LIMIT;
use crate::error::GatewayError;
use crate::llm::models::Task;
use crate::streaming::fragment_channel;
use crate::web::state::AppState;

type ApiResult = Result<Json<Value>, GatewayError>;

#[derive(Debug, Deserialize)]
pub struct CreateTableRequest {
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TableRequest {
    pub table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQueryRequest {
    pub question: Option<String>,
    #[serde(default)]
    pub context_tables: Vec<String>,
    pub context_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InsightRequest {
    pub question: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub command: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub context_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TableDataParams {
    pub table: Option<String>,
}

pub async fn create_table(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTableRequest>, JsonRejection>,
) -> ApiResult {
    let description = required(parse(payload)?.description, "Description is required")?;
    info!("Create table request: {}", description);

    let sql = state.commands().create_table(&description).await?;
    Ok(Json(json!({
        "message": "Table created successfully",
        "sql_executed": sql,
    })))
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult {
    let question = required(parse(payload)?.question, "Question is required")?;
    info!("Natural language query: {}", question);

    Ok(Json(state.analysis().query(&question).await?))
}

pub async fn command(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult {
    let command = required(parse(payload)?.command, "Command is required")?;
    info!("Natural language command: {}", command);

    let outcome = state.commands().run(&command).await?;
    Ok(Json(json!(outcome)))
}

pub async fn generate_crud(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TableRequest>, JsonRejection>,
) -> ApiResult {
    let table = required(parse(payload)?.table, "Table name is required")?;

    let files = state.scaffold().generate(&table).await?;
    Ok(Json(json!({
        "message": "CRUD scaffold generated successfully. Add the modules to your crate to use them.",
        "files": files,
    })))
}

pub async fn analyze_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeQueryRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse(payload)?;
    let question = required(request.question, "Question is required")?;

    let payload = state
        .analysis()
        .analyze(&question, &request.context_tables, request.context_id)
        .await?;
    Ok(Json(payload))
}

pub async fn analyze_insight(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InsightRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse(payload)?;
    let question = required(request.question, "Question and data are required")?;
    let data = request
        .data
        .filter(|data| !is_blank(data))
        .ok_or_else(|| GatewayError::Validation("Question and data are required".to_string()))?;

    let insight = state.analysis().insight(&question, &data).await?;
    Ok(Json(json!({ "insight": insight })))
}

pub async fn migrate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MigrateRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse(payload)?;
    let command = required(request.command, "Command and table are required")?;
    let table = required(request.table, "Command and table are required")?;

    let sql = state.commands().migrate(&table, &command).await?;
    Ok(Json(json!({
        "message": "Migration executed successfully",
        "command": command,
        "sql_executed": sql,
    })))
}

pub async fn drop_table(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TableRequest>, JsonRejection>,
) -> ApiResult {
    let table = required(parse(payload)?.table, "Table name is required")?;

    state.commands().drop_table(&table).await?;
    Ok(Json(json!({
        "message": format!("Table '{}' deleted successfully.", table),
    })))
}

pub async fn chat_free(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse(payload)?;
    let message = required(request.message, "Message is required")?;
    let message = with_context(&state, message, request.context_id).await;

    let reply = state.llm.generate(Task::Chat { message: &message }).await?;
    Ok(Json(json!({ "reply": reply })))
}

/// Streams the chat answer as it is generated. Fragments are passed through
/// untouched; an upstream failure after the headers went out is appended to
/// the body as `\nError: <message>`.
pub async fn chat_free_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let request = parse(payload)?;
    let message = required(request.message, "Message is required")?;
    let message = with_context(&state, message, request.context_id).await;

    let (sink, stream) = fragment_channel();
    tokio::spawn(async move {
        if let Err(e) = state.llm.chat_stream(&message, &sink).await {
            error!("Chat stream failed: {}", e);
            sink.send(format!("\nError: {}", e));
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

pub async fn refresh_schema(State(state): State<Arc<AppState>>) -> ApiResult {
    let schema = state.schema_manager.build_schema().await?;
    Ok(Json(json!({
        "message": "Schema mapped successfully",
        "schema": schema,
    })))
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> ApiResult {
    let cleared = state.executor.clear_cache().await;
    Ok(Json(json!({
        "message": "Cache cleared",
        "cleared": cleared,
    })))
}

pub async fn list_tables(State(state): State<Arc<AppState>>) -> ApiResult {
    let tables = state.schema_manager.list_tables().await?;
    Ok(Json(json!({ "tables": tables })))
}

pub async fn table_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TableDataParams>,
) -> ApiResult {
    let table = required(params.table, "Table name is required")?;
    let data = state
        .schema_manager
        .sample_rows(&table, DEFAULT_SAMPLE_LIMIT)
        .await?;
    Ok(Json(json!({ "data": data })))
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> ApiResult {
    let schema = state.schema_manager.describe_schema().await?;
    Ok(Json(json!({ "schema": schema })))
}

// Prefixes the saved context's text, when the referenced context has any.
async fn with_context(state: &AppState, message: String, context_id: Option<i64>) -> String {
    let Some(id) = context_id else {
        return message;
    };

    match state.contexts.get(id).await {
        Ok(context) => match context.text() {
            Some(text) => format!("[CONTEXT]: {}\n\n[USER]: {}", text, message),
            None => message,
        },
        Err(e) => {
            info!("Context {} not applied: {}", id, e);
            message
        }
    }
}

fn is_blank(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
