//! Error types for template loading, dependency resolution, registry builds and rendering

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading a prompts directory
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Prompts directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template {name}: {message}")]
    Parse { name: String, message: String },
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Name of the template that failed to parse, if this is a parse error
    pub fn template_name(&self) -> Option<&str> {
        match self {
            Self::Parse { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A partial reference chain that revisits one of its own members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Template names in visiting order; the last entry repeats an earlier one
    pub chain: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cyclic partial reference detected: {}", self.chain.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Errors raised by the dependency resolver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),
}

/// Errors that abort a registry build
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Failed to resolve arguments of prompt {prompt}: {source}")]
    Resolve {
        prompt: String,
        #[source]
        source: ResolveError,
    },
}

/// Errors surfaced to a caller asking for a rendered prompt
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Failed to render template {template}: {message}")]
    Engine { template: String, message: String },
}
