pub mod analysis;
pub mod api;
pub mod chatbot;
pub mod config;
pub mod context;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod session;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(feature = "desktop")]
use tauri::Manager;

/// Desktop dashboard: the same context as the HTTP service, exposed as
/// Tauri commands and backed by a session database in the app data dir.
#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    dotenvy::dotenv().ok();
    logging::init_tracing("info");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_dir = app.path().app_data_dir()?;
            let mut config = config::AppConfig::from_env()?;
            config.sessions.db_path = Some(app_dir.join("sessions.db"));
            config.data_dir = app_dir.join("data");
            config.upload_dir = app_dir.join("uploads");

            let ctx = tauri::async_runtime::block_on(context::AppContext::initialize(config))?;
            app.manage(ctx);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::bill::analyze_bill,
            commands::bill::compare_bills,
            commands::chat::chatbot_message,
            commands::chat::chatbot_reset,
            commands::chat::chatbot_history,
            commands::chat::chatbot_upload,
            commands::chat::assistant_chat,
            commands::knowledge::search_knowledge,
            commands::knowledge::ask_knowledge,
            commands::knowledge::active_offers,
            commands::knowledge::get_product,
            commands::knowledge::list_products,
            commands::knowledge::search_catalog,
            commands::settings::get_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
