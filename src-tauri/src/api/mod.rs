//! REST front end.

mod bill;
mod chatbot;
mod error;
mod knowledge;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

pub use error::ApiError;

use crate::context::AppContext;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub fn router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/upload", post(bill::upload))
        .route("/compare", post(bill::compare))
        .route("/api/chatbot", post(chatbot::message))
        .route("/api/chatbot/upload", post(chatbot::upload))
        .route("/api/chatbot/reset", post(chatbot::reset))
        .route("/api/assistant", post(chatbot::assistant))
        .route("/api/knowledge/search", post(knowledge::search))
        .route("/api/knowledge/ask", post(knowledge::ask))
        .route("/api/knowledge/offers", get(knowledge::offers))
        .route("/api/knowledge/products", get(knowledge::products))
        .route("/api/knowledge/products/:id", get(knowledge::product))
        .route("/api/knowledge/catalog", get(knowledge::catalog_search))
        .route("/api/settings", get(knowledge::settings))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Serve until ctrl-c, purging idle sessions in the background.
#[instrument(skip(ctx))]
pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let addr = ctx.config.bind_addr;
    let purger = tokio::spawn(purge_sessions(ctx.clone()));

    let listener = TcpListener::bind(addr).await?;
    info!("EnergyWise API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purger.abort();
    info!("server stopped");
    Ok(())
}

async fn purge_sessions(ctx: Arc<AppContext>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        match ctx.with_sessions(|store| store.purge_expired()).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "expired conversations purged"),
            Err(e) => error!(error = %e, "session purge failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::offline_context;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(dir: &TempDir) -> (Router, Arc<AppContext>) {
        let ctx = Arc::new(offline_context(dir.path()).await);
        (router(ctx.clone()), ctx)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "energywise-test-boundary";
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match file_name {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, f
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_compare_without_previous_bill() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = post_json("/compare", json!({ "current_bill": { "summary": "Marzo 84 €" } }));
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Nessuna bolletta precedente disponibile per il confronto");
        assert!(body["comparison"].is_null());
    }

    #[tokio::test]
    async fn test_compare_requires_current_bill() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = send(app.clone(), post_json("/compare", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Dati della bolletta corrente mancanti");

        let req = Request::post("/compare").body(Body::from("not json")).unwrap();
        let (status, _) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_compare_accepts_null_current_bill() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let body = json!({
            "current_bill": null,
            "previous_bill": {"summary": "Febbraio 79,10 €"},
        });
        let (status, body) = send(app, post_json("/compare", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "upstream_transport");
        assert_ne!(body["error"], "Dati della bolletta corrente mancanti");
    }

    #[tokio::test]
    async fn test_upload_rejects_disallowed_extension() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = multipart("/upload", &[("file", Some("bolletta.exe"), b"MZ")]);
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Tipo di file non consentito");
    }

    #[tokio::test]
    async fn test_upload_without_file() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = send(app.clone(), multipart("/upload", &[("note", None, b"x")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Nessun file nella richiesta");

        let (status, body) = send(app, multipart("/upload", &[("file", Some(""), b"")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Nessun file selezionato");
    }

    #[tokio::test]
    async fn test_upload_unreadable_image_reports_extracted_text() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = multipart("/upload", &[("file", Some("bolletta.png"), b"not a png")]);
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["extracted_text"], "");
        assert!(body["error"].as_str().unwrap().starts_with("Impossibile estrarre testo"));
    }

    #[tokio::test]
    async fn test_chatbot_conversation_and_reset() {
        let dir = TempDir::new().unwrap();
        let (app, ctx) = app(&dir).await;

        let req = post_json("/api/chatbot", json!({ "user_id": "u1", "message": "Ciao" }));
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["response"].as_str().unwrap().starts_with("Ciao! Sono EnergyBot"));
        assert_eq!(body["has_bill_analysis"], false);

        let req = post_json("/api/chatbot/reset", json!({ "user_id": "u1" }));
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(ctx.sessions.get("u1").unwrap().is_none());

        let (status, _) = send(app, post_json("/api/chatbot", json!({ "message": "Ciao" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chatbot_upload_failure_is_a_reply() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = multipart(
            "/api/chatbot/upload",
            &[("user_id", None, b"u1"), ("file", Some("foto.jpg"), b"garbage")],
        );
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], crate::chatbot::UPLOAD_FAILED_REPLY);
        assert_eq!(body["has_bill_analysis"], false);
    }

    #[tokio::test]
    async fn test_knowledge_endpoints() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;

        let (status, body) = send(
            app.clone(),
            post_json("/api/knowledge/search", json!({ "query": "pannelli solari" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["id"], "solar-home");
        assert_eq!(body["results"][0]["type"], "products");

        let req = Request::get("/api/knowledge/products/eco-plus").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "EnergyWise Eco Plus");

        let req = Request::get("/api/knowledge/products/nope").body(Body::empty()).unwrap();
        let (status, _) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::get("/api/knowledge/products?type=solar").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        let products = body["products"].as_array().unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0]["id"], "solar-home");

        let req = Request::get("/api/knowledge/catalog?q=alexa").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["products"][0]["id"], "smart-home");

        let req = Request::get("/api/knowledge/offers").body(Body::empty()).unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["offers"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|o| o["id"].as_str())
            .collect();
        assert!(ids.contains(&"friends-referral"));
        assert!(ids.contains(&"digital-billing"));
    }

    #[tokio::test]
    async fn test_knowledge_ask_apologizes_when_model_unreachable() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = post_json("/api/knowledge/ask", json!({ "question": "Quanto costa Eco Plus?" }));
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], crate::rag::KNOWLEDGE_APOLOGY);
    }

    #[tokio::test]
    async fn test_settings_masks_keys() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir).await;
        let req = Request::get("/api/settings").body(Body::empty()).unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(body["llm_api_key"], "test");
        assert_eq!(body["llm_model"], "claude-test");
    }
}
