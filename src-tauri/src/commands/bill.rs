use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tauri::State;

use crate::analysis::{BillAnalysis, ComparisonResult, NO_PREVIOUS_BILL_MESSAGE};
use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct ComparisonOutcome {
    pub comparison: Option<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Analyse a bill picked from the local file system.
#[tauri::command]
pub async fn analyze_bill(
    ctx: State<'_, AppContext>,
    file_path: String,
) -> Result<BillAnalysis, String> {
    let path = Path::new(&file_path);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !crate::doc_processor::is_allowed_file(name) {
        return Err(crate::context::UploadError::UnsupportedType.to_string());
    }
    ctx.analyze_document(path).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn compare_bills(
    ctx: State<'_, AppContext>,
    current_bill: Value,
    previous_bill: Option<Value>,
) -> Result<ComparisonOutcome, String> {
    let comparison = ctx
        .analyst
        .compare(&current_bill, previous_bill.as_ref())
        .await
        .map_err(|e| e.to_string())?;
    let message = comparison
        .is_none()
        .then(|| NO_PREVIOUS_BILL_MESSAGE.to_string());
    Ok(ComparisonOutcome {
        comparison,
        message,
    })
}
