use std::sync::Arc;

use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use super::bill::UploadForm;
use super::error::ApiError;
use crate::analysis::BillAnalysis;
use crate::chatbot::ChatReply;
use crate::context::{AppContext, UploadError};

const MISSING_FIELDS_MESSAGE: &str = "Dati mancanti: user_id e message sono obbligatori";
const MISSING_USER_MESSAGE: &str = "Dati mancanti: user_id è obbligatorio";

#[derive(Debug, Deserialize)]
pub struct ChatbotRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
}

/// `POST /api/chatbot`
pub async fn message(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ChatbotRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let req = match payload {
        Ok(Json(req)) if !req.user_id.trim().is_empty() && !req.message.trim().is_empty() => req,
        _ => return Err(ApiError::bad_request(MISSING_FIELDS_MESSAGE)),
    };
    let reply = ctx
        .with_chatbot(move |bot| bot.process_message(&req.user_id, &req.message))
        .await?;
    Ok(Json(reply))
}

/// `POST /api/chatbot/upload`: analyse a bill and keep it on the conversation.
pub async fn upload(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> Result<Json<ChatReply>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let user_id = form
        .fields
        .get("user_id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request(MISSING_USER_MESSAGE))?;
    let file = form.require_file()?;

    let stored = ctx.store_upload(&file.name, &file.bytes).await?;
    let name = file.name.clone();
    let reply = match ctx.analyze_document(&stored.path).await {
        Ok(analysis) => {
            ctx.with_chatbot(move |bot| bot.attach_analysis(&user_id, &name, analysis))
                .await?
        }
        Err(e @ (UploadError::InsufficientText { .. } | UploadError::Analysis(_))) => {
            warn!(user_id = %user_id, error = %e, "chatbot upload could not be analysed");
            ctx.with_chatbot(move |bot| bot.upload_failed(&user_id, &name))
                .await?
        }
        Err(e) => {
            error!(user_id = %user_id, error = %e, "chatbot upload failed");
            return Err(e.into());
        }
    };
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub user_id: String,
}

/// `POST /api/chatbot/reset`
pub async fn reset(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let user_id = match payload {
        Ok(Json(req)) if !req.user_id.trim().is_empty() => req.user_id,
        _ => return Err(ApiError::bad_request(MISSING_USER_MESSAGE)),
    };
    ctx.with_chatbot(move |bot| bot.reset(&user_id)).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct AssistantRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub bill_analysis: Option<BillAnalysis>,
}

/// `POST /api/assistant`: free-form answer from the model.
pub async fn assistant(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<AssistantRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let req = match payload {
        Ok(Json(req)) if !req.message.trim().is_empty() => req,
        _ => return Err(ApiError::bad_request("Messaggio mancante")),
    };
    let reply = ctx
        .assistant_reply(&req.message, req.user_id.as_deref(), req.bill_analysis)
        .await?;
    Ok(Json(reply))
}
