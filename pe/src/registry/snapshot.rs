use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::args::{self, EnvLookup};
use crate::error::{RegistryError, RenderError};
use crate::resolver;
use crate::templates::TemplateStore;

/// A servable prompt with its argument split precomputed
#[derive(Debug, Clone)]
pub struct PromptDefinition {
    pub name: String,
    pub description: String,
    /// Every variable the template reads, sorted
    pub variables: Vec<String>,
    /// Variables without an environment default; callers must supply these
    pub arguments: Vec<String>,
    /// Environment defaults captured when the snapshot was built
    pub env_values: BTreeMap<String, String>,
    /// Partials referenced but not present in the directory
    pub unresolved_partials: Vec<String>,
    template: String,
    templates: Arc<TemplateStore>,
}

impl PromptDefinition {
    /// Render with the given caller arguments
    pub fn render(&self, supplied: &HashMap<String, String>, json_args: bool) -> Result<String, RenderError> {
        debug!(name = %self.name, supplied = supplied.len(), "PromptDefinition::render: called");
        let data = args::resolve_values(&self.env_values, supplied, json_args, Local::now());
        self.templates.render(&self.template, &data)
    }

    /// Required arguments absent from `supplied`, matching names case-insensitively
    pub fn missing_arguments(&self, supplied: &HashMap<String, String>) -> Vec<String> {
        let supplied: HashSet<String> = supplied.keys().map(|key| key.to_lowercase()).collect();
        self.arguments
            .iter()
            .filter(|name| !supplied.contains(*name))
            .cloned()
            .collect()
    }

    /// Raw template text, description line included
    pub fn content(&self) -> &str {
        self.templates
            .get(&self.template)
            .map(|source| source.content.as_str())
            .unwrap_or_default()
    }

    fn same_as(&self, other: &Self) -> bool {
        self.description == other.description
            && self.variables == other.variables
            && self.arguments == other.arguments
            && self.env_values == other.env_values
            && self.content() == other.content()
    }
}

/// Immutable view of every prompt in the directory at one point in time
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    prompts: BTreeMap<String, Arc<PromptDefinition>>,
}

impl RegistrySnapshot {
    /// Load, compile and resolve every prompt in `dir`
    ///
    /// Any unreadable or unparsable template, and any cyclic partial chain,
    /// fails the whole build.
    pub fn build(dir: &Path, env: &EnvLookup, generation: u64) -> Result<Self, RegistryError> {
        debug!(?dir, %generation, "RegistrySnapshot::build: called");
        let store = Arc::new(TemplateStore::load(dir)?);

        let mut prompts = BTreeMap::new();
        for source in store.prompts() {
            let resolution =
                resolver::resolve_variables(store.as_ref(), &source.name).map_err(|e| RegistryError::Resolve {
                    prompt: source.name.clone(),
                    source: e,
                })?;

            let mut arguments = Vec::new();
            let mut env_values = BTreeMap::new();
            for variable in &resolution.variables {
                match env(&args::env_var_name(variable)) {
                    Some(value) => {
                        env_values.insert(variable.clone(), value);
                    }
                    None => arguments.push(variable.clone()),
                }
            }

            let unresolved_partials: Vec<String> = resolution.unresolved_partials.into_iter().collect();
            if !unresolved_partials.is_empty() {
                warn!(prompt = %source.name, partials = ?unresolved_partials, "Prompt references unknown partials");
            }

            info!(
                name = %source.name,
                description = %source.description,
                prompt_args = ?arguments,
                env_args = ?env_values.keys().collect::<Vec<_>>(),
                "Prompt will be registered"
            );

            let definition = PromptDefinition {
                name: source.name.clone(),
                description: source.description.clone(),
                variables: resolution.variables.into_iter().collect(),
                arguments,
                env_values,
                unresolved_partials,
                template: source.name.clone(),
                templates: Arc::clone(&store),
            };
            prompts.insert(source.name.clone(), Arc::new(definition));
        }

        Ok(Self { generation, prompts })
    }

    /// Monotonic build counter; 0 for an empty placeholder
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<Arc<PromptDefinition>> {
        self.prompts.get(name).cloned()
    }

    /// Prompts sorted by name
    pub fn prompts(&self) -> impl Iterator<Item = &Arc<PromptDefinition>> {
        self.prompts.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.prompts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Prompt-level changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn between(old: &RegistrySnapshot, new: &RegistrySnapshot) -> Self {
        let mut diff = Self::default();
        for (name, prompt) in &new.prompts {
            match old.prompts.get(name) {
                None => diff.added.push(name.clone()),
                Some(previous) if !previous.same_as(prompt) => diff.changed.push(name.clone()),
                Some(_) => {}
            }
        }
        diff.removed = old
            .prompts
            .keys()
            .filter(|name| !new.prompts.contains_key(*name))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
