pub mod ai;
pub mod contexts;
pub mod health;

use axum::Json;
use axum::extract::rejection::JsonRejection;

use crate::error::GatewayError;

// Malformed bodies are caller errors, reported in the same `{"error"}` shape.
fn parse<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}

fn required(value: Option<String>, message: &str) -> Result<String, GatewayError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Validation(message.to_string()))
}
