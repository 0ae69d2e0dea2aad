//! prompt-engine - live-reloaded prompt templates over MCP
//!
//! A directory of handlebars `.tmpl` files becomes a set of named prompts.
//! Each prompt's arguments are discovered by walking its template and the
//! partials it includes; arguments with a matching upper-cased environment
//! variable are filled in from the environment, the rest are requested from
//! the client. Edits to the directory are picked up without a restart.

pub mod args;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod templates;
pub mod watcher;

pub use config::Config;
pub use error::{CycleError, RegistryError, RenderError, ResolveError, TemplateError};
pub use registry::{PromptDefinition, PromptRegistry, RegistrySnapshot};
pub use server::PromptServer;
