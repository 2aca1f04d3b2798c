//! Root of the `shellpilot-core` library.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the appropriate abstraction (e.g.,
// the REPL callbacks or the tracing stack).
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod agent;
pub use agent::AgentCallbacks;
pub use agent::TurnConfig;
pub use agent::TurnController;
mod client;
pub use client::ModelBackend;
pub use client::ModelClient;
mod client_common;
pub use client_common::Prompt;
pub use client_common::ResponseEvent;
pub use client_common::ResponseStream;
pub mod confirmation_queue;
pub mod config;
mod conversation_history;
pub mod error;
pub mod exec;
mod flags;
pub mod is_safe_command;
#[cfg(target_os = "linux")]
mod landlock;
mod model_provider_info;
pub use model_provider_info::ModelProviderInfo;
pub use model_provider_info::built_in_model_providers;
pub mod models;
mod openai_tools;
pub mod output_collector;
pub mod protocol;
pub mod safety;
pub use safety::get_platform_sandbox;
pub mod seatbelt;
pub mod shell;
mod thinking_timer;
pub use thinking_timer::ThinkingTimer;
pub mod util;
