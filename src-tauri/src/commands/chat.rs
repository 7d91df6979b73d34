use std::path::Path;

use serde::Serialize;
use tauri::{AppHandle, Emitter, State};
use tracing::warn;

use crate::chatbot::ChatReply;
use crate::context::AppContext;
use crate::llm::StreamChunk;
use crate::session::ConversationState;

#[derive(Clone, Serialize)]
struct AssistantStreamEvent {
    delta: String,
    done: bool,
}

#[tauri::command]
pub async fn chatbot_message(
    ctx: State<'_, AppContext>,
    user_id: String,
    message: String,
) -> Result<ChatReply, String> {
    ctx.with_chatbot(move |bot| bot.process_message(&user_id, &message))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn chatbot_reset(ctx: State<'_, AppContext>, user_id: String) -> Result<(), String> {
    ctx.with_chatbot(move |bot| bot.reset(&user_id))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn chatbot_history(
    ctx: State<'_, AppContext>,
    user_id: String,
) -> Result<Option<ConversationState>, String> {
    ctx.with_chatbot(move |bot| bot.conversation(&user_id))
        .await
        .map_err(|e| e.to_string())
}

/// Analyse a bill and attach it to the chatbot conversation.
#[tauri::command]
pub async fn chatbot_upload(
    ctx: State<'_, AppContext>,
    user_id: String,
    file_path: String,
) -> Result<ChatReply, String> {
    let path = Path::new(&file_path);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("bolletta")
        .to_string();

    let reply = match ctx.analyze_document(path).await {
        Ok(analysis) => {
            ctx.with_chatbot(move |bot| bot.attach_analysis(&user_id, &name, analysis))
                .await
        }
        Err(e) => {
            warn!(error = %e, "chatbot upload could not be analysed");
            ctx.with_chatbot(move |bot| bot.upload_failed(&user_id, &name))
                .await
        }
    };
    reply.map_err(|e| e.to_string())
}

/// Free-form assistant answer, streamed as `assistant-stream` events.
#[tauri::command]
pub async fn assistant_chat(
    app: AppHandle,
    ctx: State<'_, AppContext>,
    message: String,
    user_id: Option<String>,
) -> Result<ChatReply, String> {
    let analysis = ctx
        .stored_analysis(user_id.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    let response = ctx
        .analyst
        .chat_stream(&message, analysis.as_ref(), move |chunk: StreamChunk| {
            let _ = app.emit(
                "assistant-stream",
                AssistantStreamEvent {
                    delta: chunk.delta,
                    done: chunk.done,
                },
            );
        })
        .await;

    Ok(ChatReply {
        response,
        has_bill_analysis: analysis.is_some(),
    })
}
