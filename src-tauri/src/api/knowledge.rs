use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// `POST /api/knowledge/search`
pub async fn search(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = match payload {
        Ok(Json(req)) if !req.query.trim().is_empty() => req,
        _ => return Err(ApiError::bad_request("Query mancante")),
    };
    let results = ctx.retriever.retrieve(&req.query, req.top_k).await;
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `POST /api/knowledge/ask`
pub async fn ask(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = match payload {
        Ok(Json(req)) if !req.question.trim().is_empty() => req,
        _ => return Err(ApiError::bad_request("Domanda mancante")),
    };
    let response = ctx.ask_knowledge(&req.question, req.user_id.as_deref()).await?;
    Ok(Json(json!({ "response": response })))
}

/// `GET /api/knowledge/offers`
pub async fn offers(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let today = Local::now().date_naive();
    Json(json!({ "offers": ctx.knowledge.active_offers(today) }))
}

#[derive(Debug, Deserialize)]
pub struct ProductFilter {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /api/knowledge/products[?type=electricity]`
pub async fn products(
    State(ctx): State<Arc<AppContext>>,
    Query(filter): Query<ProductFilter>,
) -> Json<Value> {
    let products = match filter.kind.as_deref() {
        Some(kind) => ctx.knowledge.products_by_type(kind),
        None => ctx.knowledge.products.iter().collect(),
    };
    Json(json!({ "products": products }))
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /api/knowledge/catalog?q=...`: plain substring search, no embeddings.
pub async fn catalog_search(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.q.trim().is_empty() {
        return Err(ApiError::bad_request("Query mancante"));
    }
    Ok(Json(json!(ctx.knowledge.search(query.q.trim()))))
}

/// `GET /api/knowledge/products/:id`
pub async fn product(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.knowledge
        .product(&id)
        .map(|p| Json(json!(p)))
        .ok_or_else(|| ApiError::NotFound(format!("Prodotto con ID {} non trovato.", id)))
}

/// `GET /api/settings`
pub async fn settings(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!(ctx.config.redacted()))
}
