use std::collections::BTreeMap;

use tauri::State;

use crate::context::AppContext;

/// Effective configuration with API keys masked.
#[tauri::command]
pub fn get_settings(ctx: State<'_, AppContext>) -> BTreeMap<String, String> {
    ctx.config.redacted()
}
