//! Watcher module for prompts directory monitoring
//!
//! The PromptWatcher listens for template file changes in the prompts
//! directory and asks the registry to reconcile, so edits go live without
//! a restart.

mod config;
mod prompt_watcher;

pub use config::WatcherConfig;
pub use prompt_watcher::{PromptWatcher, is_template_event, reload};
