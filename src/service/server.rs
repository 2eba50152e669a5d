use std::future::Future;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::db::TaskDb;
use super::ws;
use crate::config::ServerSection;

/// Build the full application router: REST API, realtime socket, request
/// tracing, and permissive CORS when `dev_mode` is set.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the store, bind, and serve until Ctrl+C.
pub async fn start_server(settings: &ServerSection) -> Result<()> {
    if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = TaskDb::new(&settings.db_path).context("Failed to initialize task database")?;
    let state = AppState::new(db, settings.broadcast_capacity);

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, db_path = %settings.db_path.display(), "taskboard server listening");
    println!("Taskboard running at http://{}", local_addr);

    serve(listener, state, settings.dev_mode, shutdown_signal()).await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: SharedState, dev_mode: bool, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state, dev_mode);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C; shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_state() -> SharedState {
        AppState::new(TaskDb::new_in_memory().unwrap(), 16)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = build_router(test_state(), false);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let app = build_router(test_state(), false);
        let req = Request::builder().uri("/api/tasks").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ws_requires_credential_before_upgrade() {
        let app = build_router(test_state(), false);
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_ws_rejects_unknown_query_token() {
        let app = build_router(test_state(), false);
        let req = Request::builder()
            .uri("/ws?token=bogus")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ws_valid_token_without_upgrade_is_client_error() {
        let state = test_state();
        let token = state
            .db
            .call(|db| {
                let user = db.create_user("Ada", "ada@example.com", "salt$hash")?;
                db.create_session(user.id)
            })
            .await
            .unwrap();
        let app = build_router(state, false);
        let req = Request::builder()
            .uri(format!("/ws?token={}", token))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let app = build_router(test_state(), true);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_lagging_socket_is_closed() {
        let state = AppState::new(TaskDb::new_in_memory().unwrap(), 1);
        let (owner, token) = state
            .db
            .call(|db| {
                let user = db.create_user("Ada", "ada@example.com", "salt$hash")?;
                let token = db.create_session(user.id)?;
                Ok((user.id, token))
            })
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, state.clone(), false, std::future::pending::<()>()));

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, token))
            .await
            .unwrap();

        // Single-threaded runtime: the socket task cannot drain between sends.
        for _ in 0..4 {
            ws::broadcast_message(&state.ws_tx, owner, &ws::RealtimeMessage::TaskDeleted(Uuid::new_v4()));
        }

        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap();
        assert!(
            matches!(frame, Some(Ok(tungstenite::Message::Close(_))) | None),
            "expected close, got {:?}",
            frame
        );
        server.abort();
    }
}
