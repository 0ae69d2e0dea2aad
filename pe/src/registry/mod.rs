//! Prompt Registry
//!
//! Holds the active set of prompts as an immutable snapshot and rebuilds it
//! when the prompts directory changes.

mod coordinator;
mod snapshot;
mod validate;

pub use coordinator::PromptRegistry;
pub use snapshot::{PromptDefinition, RegistrySnapshot, SnapshotDiff};
pub use validate::{ValidationOutcome, ValidationStatus, validate_dir};
