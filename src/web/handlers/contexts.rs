use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{parse, required};
use crate::db::context_store::{ContextPatch, NewContext, SavedContext};
use crate::error::GatewayError;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateContextRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub is_default: Option<bool>,
}

pub async fn list_contexts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SavedContext>>, GatewayError> {
    Ok(Json(state.contexts.list().await?))
}

pub async fn create_context(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateContextRequest>, JsonRejection>,
) -> Result<Json<SavedContext>, GatewayError> {
    let request = parse(payload)?;
    let name = required(request.name, "Name is required")?;

    let context = state
        .contexts
        .create(NewContext {
            name,
            description: request.description,
            content: request.content.unwrap_or_else(|| json!({})),
            is_default: request.is_default.unwrap_or(false),
        })
        .await?;
    Ok(Json(context))
}

pub async fn get_context(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<SavedContext>, GatewayError> {
    let id = context_id(id)?;
    Ok(Json(state.contexts.get(id).await.map_err(not_found)?))
}

pub async fn update_context(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ContextPatch>, JsonRejection>,
) -> Result<Json<SavedContext>, GatewayError> {
    let id = context_id(id)?;
    let patch = parse(payload)?;
    Ok(Json(state.contexts.update(id, patch).await.map_err(not_found)?))
}

pub async fn delete_context(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, GatewayError> {
    let id = context_id(id)?;
    state.contexts.delete(id).await?;
    Ok(Json(json!({ "message": "Context deleted" })))
}

pub async fn setup_contexts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, GatewayError> {
    state.contexts.setup().await?;
    Ok(Json(json!({ "message": "Contexts table created successfully" })))
}

fn context_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, GatewayError> {
    id.map(|Path(id)| id)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}

fn not_found(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::NotFound(_) => GatewayError::NotFound("Context not found".to_string()),
        other => other,
    }
}
