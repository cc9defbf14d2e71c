//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        // Threads
        .route("/threads", get(handlers::threads::list_threads))
        .route(
            "/threads/{id}",
            get(handlers::threads::get_thread).delete(handlers::threads::retire_thread),
        )
        // Turns (SSE)
        .route("/threads/{id}/messages", post(handlers::threads::send_message))
        .route("/threads/{id}/resume", post(handlers::threads::resume_turn))
        .route("/threads/{id}/cancel", post(handlers::threads::cancel_turn));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handlers::threads::TURN_ID_HEADER;
    use crate::state::tests::{scripted_state, sqlite_state};
    use bistro_core::llm::scripted::ScriptedReply;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    /// Serve the router on an ephemeral port and return the API base URL.
    async fn spawn_server(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state);
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}/api/v1")
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_server(scripted_state(Vec::new())).await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_message_streams_events_then_thread_is_stored() {
        let base = spawn_server(scripted_state(vec![ScriptedReply::text("We open at five.")])).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/threads/guest-1/messages"))
            .json(&json!({"message": "When do you open?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("event: token_fragment"));
        assert!(body.contains("event: turn_complete"));
        assert!(body.contains("We open at five."));
        assert!(!body.contains("event: error"));

        let thread: Value = client
            .get(format!("{base}/threads/guest-1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(thread["data"]["node"], "end");
        assert_eq!(thread["data"]["turns"].as_array().unwrap().len(), 2);
        assert_eq!(thread["data"]["busy"], false);

        let list: Value = client
            .get(format!("{base}/threads"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["data"][0]["thread_id"], "guest-1");
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let base = spawn_server(scripted_state(Vec::new())).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/threads/guest-1/messages"))
            .json(&json!({"message": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_thread_is_not_found() {
        let base = spawn_server(scripted_state(Vec::new())).await;
        let client = reqwest::Client::new();

        let get = client.get(format!("{base}/threads/nobody")).send().await.unwrap();
        assert_eq!(get.status(), 404);

        let delete = client.delete(format!("{base}/threads/nobody")).send().await.unwrap();
        assert_eq!(delete.status(), 404);

        let resume = client
            .post(format!("{base}/threads/nobody/resume"))
            .send()
            .await
            .unwrap();
        assert_eq!(resume.status(), 404);
    }

    #[tokio::test]
    async fn test_retire_and_resume_after_end() {
        let state = scripted_state(vec![ScriptedReply::text("Booked.")]);
        state.engine.submit("t1", "book it").collect().await.1.unwrap();
        let base = spawn_server(state).await;
        let client = reqwest::Client::new();

        let resume = client.post(format!("{base}/threads/t1/resume")).send().await.unwrap();
        assert_eq!(resume.status(), 409);

        let cancel: Value = client
            .post(format!("{base}/threads/t1/cancel"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cancel["data"]["cancelled"], false);

        let retired = client.delete(format!("{base}/threads/t1")).send().await.unwrap();
        assert_eq!(retired.status(), 200);
        let again = client.get(format!("{base}/threads/t1")).send().await.unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn test_cancel_queued_turn_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = sqlite_state(vec![ScriptedReply::Stall], dir.path()).await;
        let base = spawn_server(state).await;
        let client = reqwest::Client::new();

        let post = |text: &'static str| {
            client
                .post(format!("{base}/threads/t1/messages"))
                .json(&json!({ "message": text }))
                .send()
        };
        let first = post("table for two tonight").await.unwrap();
        let second = post("make it three").await.unwrap();
        let turn_id = |r: &reqwest::Response| {
            r.headers()[TURN_ID_HEADER].to_str().unwrap().to_string()
        };
        let (first_id, second_id) = (turn_id(&first), turn_id(&second));
        assert_ne!(first_id, second_id);

        let cancel: Value = client
            .post(format!("{base}/threads/t1/cancel?turn={second_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cancel["data"]["cancelled"], true);
        assert_eq!(cancel["data"]["turn_id"], second_id.as_str());
        assert!(!second.text().await.unwrap().contains("turn_complete"));

        // the first turn is still running; a plain cancel stops it
        let cancel: Value = client
            .post(format!("{base}/threads/t1/cancel"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cancel["data"]["cancelled"], true);
        assert!(!first.text().await.unwrap().contains("turn_complete"));

        let thread: Value = client
            .get(format!("{base}/threads/t1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let turns = thread["data"]["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 1);
        assert!(dir.path().join("bistro.db").exists());
    }

    #[tokio::test]
    async fn test_invalid_thread_id_rejected() {
        let base = spawn_server(scripted_state(Vec::new())).await;
        let response = reqwest::get(format!("{base}/threads/has%20space")).await.unwrap();
        assert_eq!(response.status(), 400);
    }
}
