use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// Generation, analysis and schema endpoints
pub fn ai_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/ai",
        Router::new()
            // Generation
            .route("/create-table", post(handlers::ai::create_table))
            .route("/query", post(handlers::ai::query))
            .route("/command", post(handlers::ai::command))
            .route("/generate-crud", post(handlers::ai::generate_crud))
            .route("/migrate", post(handlers::ai::migrate))
            .route("/drop-table", post(handlers::ai::drop_table))
            // Analysis
            .route("/analyze-query", post(handlers::ai::analyze_query))
            .route("/analyze-insight", post(handlers::ai::analyze_insight))
            // Chat
            .route("/chat-free", post(handlers::ai::chat_free))
            .route("/chat-free-stream", post(handlers::ai::chat_free_stream))
            // Schema and cache
            .route("/tables", get(handlers::ai::list_tables))
            .route("/table-data", get(handlers::ai::table_data))
            .route("/schema", get(handlers::ai::get_schema))
            .route("/schema/refresh", post(handlers::ai::refresh_schema))
            .route("/cache/clear", post(handlers::ai::clear_cache)),
    )
}

// Saved grounding contexts
pub fn context_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/contexts",
            get(handlers::contexts::list_contexts).post(handlers::contexts::create_context),
        )
        .route("/contexts/setup", post(handlers::contexts::setup_contexts))
        .route(
            "/contexts/{id}",
            get(handlers::contexts::get_context)
                .put(handlers::contexts::update_context)
                .delete(handlers::contexts::delete_context),
        )
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(handlers::health::health))
}
