use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::ApiError;
use crate::analysis::NO_PREVIOUS_BILL_MESSAGE;
use crate::context::AppContext;

pub const NO_FILE_MESSAGE: &str = "Nessun file nella richiesta";
pub const EMPTY_FILENAME_MESSAGE: &str = "Nessun file selezionato";
pub const MISSING_CURRENT_BILL_MESSAGE: &str = "Dati della bolletta corrente mancanti";

pub(super) struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Multipart body split into the `file` part and plain text fields.
pub(super) struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm {
            file: None,
            fields: HashMap::new(),
        };
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.file = Some(UploadedFile {
                    name: file_name,
                    bytes: bytes.to_vec(),
                });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// The `file` part, rejecting a missing part or an empty file name.
    pub fn require_file(&mut self) -> Result<UploadedFile, ApiError> {
        let file = self.file.take().ok_or_else(|| {
            warn!("{}", NO_FILE_MESSAGE);
            ApiError::bad_request(NO_FILE_MESSAGE)
        })?;
        if file.name.is_empty() {
            warn!("{}", EMPTY_FILENAME_MESSAGE);
            return Err(ApiError::bad_request(EMPTY_FILENAME_MESSAGE));
        }
        Ok(file)
    }
}

/// `POST /upload`
pub async fn upload(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let file = UploadForm::read(multipart).await?.require_file()?;
    let stored = ctx.store_upload(&file.name, &file.bytes).await?;

    let analysis = ctx
        .analyze_document(&stored.path)
        .await
        .map_err(|e| ApiError::from_upload(e, Some(stored.stored_name.clone())))?;

    info!(filename = %stored.stored_name, "analysis completed");
    Ok(Json(json!({
        "success": true,
        "filename": stored.stored_name,
        "analysis": analysis,
    })))
}

/// `current_bill` only has to be present; an explicit `null` is accepted.
#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    #[serde(default, deserialize_with = "present")]
    pub current_bill: Option<Value>,
    #[serde(default)]
    pub previous_bill: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// `POST /compare`
pub async fn compare(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let (current, previous) = match payload {
        Ok(Json(CompareRequest {
            current_bill: Some(current),
            previous_bill,
        })) => (current, previous_bill),
        _ => {
            warn!("{}", MISSING_CURRENT_BILL_MESSAGE);
            return Err(ApiError::bad_request(MISSING_CURRENT_BILL_MESSAGE));
        }
    };

    match ctx.analyst.compare(&current, previous.as_ref()).await? {
        Some(comparison) => {
            info!("comparison completed");
            Ok(Json(json!({ "success": true, "comparison": comparison })))
        }
        None => Ok(Json(json!({
            "message": NO_PREVIOUS_BILL_MESSAGE,
            "comparison": null,
        }))),
    }
}
