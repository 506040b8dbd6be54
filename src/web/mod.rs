pub mod handlers;
pub mod routes;
pub mod state;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::WebConfig;
use state::AppState;

/// Full HTTP surface over a shared state.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::ai_routes())
        .merge(routes::context_routes())
        .merge(routes::health_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedBackend, manager, recording_manager};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_app(backend: ScriptedBackend) -> Router {
        app(Arc::new(AppState::in_memory(manager(backend))))
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send(router, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_dependencies() {
        let router = test_app(ScriptedBackend::default());
        let (status, body) = send_json(&router, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["db"], "ok");
        assert_eq!(body["cache"], "ok");
        assert!(body.get("db_error").is_none());
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let router = test_app(ScriptedBackend::default());

        let cases = [
            ("/ai/create-table", "Description is required"),
            ("/ai/query", "Question is required"),
            ("/ai/command", "Command is required"),
            ("/ai/chat-free", "Message is required"),
            ("/ai/drop-table", "Table name is required"),
        ];
        for (uri, message) in cases {
            let (status, body) = send_json(&router, Method::POST, uri, Some(json!({}))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"], message, "{}", uri);
        }

        let (status, body) =
            send_json(&router, Method::GET, "/ai/table-data", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Table name is required");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let router = test_app(ScriptedBackend::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ai/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_table_then_query_it() {
        let router = test_app(ScriptedBackend::replying([
            "CREATE TABLE clientes (id INTEGER PRIMARY KEY, nome VARCHAR)",
            "```sql\nSELECT COUNT(*) AS total FROM clientes\n```",
        ]));

        let (status, body) = send_json(
            &router,
            Method::POST,
            "/ai/create-table",
            Some(json!({ "description": "clientes com nome" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Table created successfully");

        let (_, body) = send_json(&router, Method::GET, "/ai/tables", None).await;
        assert_eq!(body["tables"], json!(["clientes"]));

        let (status, body) = send_json(
            &router,
            Method::POST,
            "/ai/query",
            Some(json!({ "question": "quantos clientes?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sql_generated"], "SELECT COUNT(*) AS total FROM clientes");
        assert_eq!(body["results"], json!([{ "total": 0 }]));
    }

    #[tokio::test]
    async fn non_select_query_is_refused() {
        let router = test_app(ScriptedBackend::replying(["DELETE FROM clientes"]));
        let (status, body) = send_json(
            &router,
            Method::POST,
            "/ai/query",
            Some(json!({ "question": "apague tudo" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("only SELECT"));
    }

    #[tokio::test]
    async fn generation_failure_is_a_server_error() {
        let router = test_app(ScriptedBackend::failing("connection refused"));
        let (status, body) = send_json(
            &router,
            Method::POST,
            "/ai/chat-free",
            Some(json!({ "message": "oi" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn chat_stream_passes_fragments_through() {
        let router = test_app(ScriptedBackend::replying(["Olá, tudo bem?"]));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ai/chat-free-stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "message": "oi" }).to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), "Olá, tudo bem?");
    }

    #[tokio::test]
    async fn chat_stream_failure_is_appended_to_the_body() {
        let router = test_app(ScriptedBackend::failing("upstream down"));
        let (status, bytes) = send(
            &router,
            Method::POST,
            "/ai/chat-free-stream",
            Some(json!({ "message": "oi" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body = String::from_utf8(bytes).unwrap();
        assert!(body.starts_with("\nError: "));
        assert!(body.contains("upstream down"));
    }

    #[tokio::test]
    async fn chat_uses_saved_context_text() {
        let (llm, backend) = recording_manager(ScriptedBackend::replying(["resposta"]));
        let state = Arc::new(AppState::in_memory(llm));
        state.contexts.setup().await.unwrap();
        let router = app(state);

        let (_, created) = send_json(
            &router,
            Method::POST,
            "/contexts",
            Some(json!({ "name": "loja", "content": { "text": "Somos uma loja de sapatos." } })),
        )
        .await;

        let (status, body) = send_json(
            &router,
            Method::POST,
            "/ai/chat-free",
            Some(json!({ "message": "o que vendemos?", "context_id": created["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "resposta");
        let prompt = &backend.prompt_texts()[0];
        assert!(prompt.contains("[CONTEXT]: Somos uma loja de sapatos.\n\n[USER]: o que vendemos?"));
    }

    #[tokio::test]
    async fn contexts_crud() {
        let router = test_app(ScriptedBackend::default());

        let (status, body) = send_json(&router, Method::POST, "/contexts/setup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Contexts table created successfully");

        let (status, body) =
            send_json(&router, Method::POST, "/contexts", Some(json!({ "description": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Name is required");

        let (status, created) = send_json(
            &router,
            Method::POST,
            "/contexts",
            Some(json!({ "name": "vendas", "content": { "tables": ["pedidos"] } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["is_default"], false);

        let (status, updated) = send_json(
            &router,
            Method::PUT,
            &format!("/contexts/{}", id),
            Some(json!({ "description": "pedidos do mês" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "vendas");
        assert_eq!(updated["description"], "pedidos do mês");

        let (_, listed) = send_json(&router, Method::GET, "/contexts", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, body) =
            send_json(&router, Method::DELETE, &format!("/contexts/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Context deleted");

        let (status, body) =
            send_json(&router, Method::GET, &format!("/contexts/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Context not found");

        let (status, _) = send_json(&router, Method::DELETE, "/contexts/999", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
