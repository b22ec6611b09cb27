// Prevents additional console window on Windows in release
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod backend;
mod config;
mod logging;
mod summarize;

use tauri::{Emitter, Manager, RunEvent};
use tracing::warn;

use backend::supervisor::Supervisor;
use config::{ConfigStatus, ConfigStore};

fn main() {
    logging::init_tracing();

    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_fs::init())
        .setup(|app| {
            let store = ConfigStore::open(Some(config::default_config_path(app.handle())));
            // Tell the webview whether enough configuration exists to start.
            let status = ConfigStatus::of(&store.server());
            if let Err(err) = app.handle().emit("config:status", &status) {
                warn!(error = %err, "Failed to emit config status");
            }
            app.manage(store);
            app.manage(Supervisor::new());
            backend::supervisor::start_on_launch(app.handle());
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Config commands
            config::config_get,
            config::config_set,
            // Backend commands
            backend::supervisor::backend_get_state,
            backend::supervisor::backend_start,
            backend::supervisor::backend_stop,
            backend::runner::op_get_data_key,
            backend::runner::op_decrypt,
            // Log commands
            logging::logs_read,
            logging::logs_clear,
            // Summarize commands
            summarize::summarize_day,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let RunEvent::ExitRequested { .. } = event {
                // Application quit: force-stop with the short grace period.
                let supervisor = app.state::<Supervisor>();
                tauri::async_runtime::block_on(supervisor.stop(true));
            }
        });
}
