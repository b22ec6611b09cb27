// Chatlog Desktop Library
// Exports the supervisor and relay modules for use by the Tauri app and tests

pub mod backend;
pub mod config;
pub mod logging;
pub mod summarize;

// Re-export commonly used types
pub use backend::locator::{candidate_list, resolve_bin, resolve_bundled_bin};
pub use backend::runner::{run_tool, RunnerError, ToolOutput};
pub use backend::supervisor::{
    build_server_args, BackendError, BackendStateInfo, Supervisor, ADDR_ENV, DEFAULT_ADDR,
};
pub use config::{AppConfig, ConfigStatus, ConfigStore, ServerConfig};
pub use summarize::{
    collect_talkers, render_transcript, run_relay, Message, RelayError, RelayEvent,
    SummarizeRequest, SUMMARY_WEBHOOK_URL,
};
