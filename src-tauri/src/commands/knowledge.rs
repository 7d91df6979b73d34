use chrono::Local;
use serde_json::Value;
use tauri::State;

use crate::context::AppContext;
use crate::knowledge::{Offer, Product};
use crate::rag::RetrievedDocument;

#[tauri::command]
pub async fn search_knowledge(
    ctx: State<'_, AppContext>,
    query: String,
    top_k: Option<usize>,
) -> Result<Vec<RetrievedDocument>, String> {
    Ok(ctx.retriever.retrieve(&query, top_k).await)
}

#[tauri::command]
pub async fn ask_knowledge(
    ctx: State<'_, AppContext>,
    question: String,
    user_id: Option<String>,
) -> Result<String, String> {
    ctx.ask_knowledge(&question, user_id.as_deref())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn active_offers(ctx: State<'_, AppContext>) -> Vec<Offer> {
    ctx.knowledge
        .active_offers(Local::now().date_naive())
        .into_iter()
        .cloned()
        .collect()
}

#[tauri::command]
pub fn get_product(ctx: State<'_, AppContext>, product_id: String) -> Result<Product, String> {
    ctx.knowledge
        .product(&product_id)
        .cloned()
        .ok_or_else(|| format!("Prodotto con ID {} non trovato.", product_id))
}

#[tauri::command]
pub fn list_products(ctx: State<'_, AppContext>, kind: Option<String>) -> Vec<Product> {
    match kind.as_deref() {
        Some(kind) => ctx.knowledge.products_by_type(kind).into_iter().cloned().collect(),
        None => ctx.knowledge.products.clone(),
    }
}

/// Substring search over the catalog, grouped by section.
#[tauri::command]
pub fn search_catalog(ctx: State<'_, AppContext>, query: String) -> Result<Value, String> {
    serde_json::to_value(ctx.knowledge.search(&query)).map_err(|e| e.to_string())
}
