//! Template Store
//!
//! Loads `.tmpl` files from a prompts directory into a handlebars registry.
//! Files whose name starts with `_` are partials: other templates include
//! them with `{{> _name}}`, but they are never served as prompts.

mod description;
mod helpers;
mod store;

pub use description::extract_description;
pub use store::{TemplateRole, TemplateSource, TemplateStore};

/// Extension of files considered templates
pub const TEMPLATE_EXT: &str = "tmpl";

/// Name prefix marking a template as a partial
pub const PARTIAL_PREFIX: char = '_';
