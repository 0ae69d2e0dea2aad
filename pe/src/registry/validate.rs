use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::TemplateError;
use crate::resolver;
use crate::templates::{TemplateRole, TemplateStore};

/// Result of checking one template file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid {
        variables: Vec<String>,
        unresolved_partials: Vec<String>,
    },
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub name: String,
    pub role: TemplateRole,
    pub status: ValidationStatus,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self.status, ValidationStatus::Valid { .. })
    }
}

/// Check every template in `dir` without stopping at the first failure
///
/// Parse errors, cycles and references to partials that failed to parse are
/// reported per template. A missing directory is still an error.
pub fn validate_dir(dir: &Path) -> Result<Vec<ValidationOutcome>, TemplateError> {
    debug!(?dir, "validate_dir: called");
    let (store, failures) = TemplateStore::load_lenient(dir)?;

    let mut outcomes: BTreeMap<String, ValidationOutcome> = BTreeMap::new();
    for failure in &failures {
        let Some(name) = failure.template_name() else {
            continue;
        };
        outcomes.insert(
            name.to_string(),
            ValidationOutcome {
                name: name.to_string(),
                role: TemplateRole::from_name(name),
                status: ValidationStatus::Invalid(failure.to_string()),
            },
        );
    }

    for source in store.sources() {
        let status = match resolver::resolve_variables(&store, &source.name) {
            Err(e) => ValidationStatus::Invalid(e.to_string()),
            Ok(resolution) => {
                let broken: Vec<&String> = resolution
                    .unresolved_partials
                    .iter()
                    .filter(|partial| outcomes.contains_key(partial.as_str()))
                    .collect();
                if let Some(partial) = broken.first() {
                    ValidationStatus::Invalid(format!("includes partial {partial} which failed to parse"))
                } else {
                    ValidationStatus::Valid {
                        variables: resolution.variables.into_iter().collect(),
                        unresolved_partials: resolution.unresolved_partials.into_iter().collect(),
                    }
                }
            }
        };
        outcomes.insert(
            source.name.clone(),
            ValidationOutcome {
                name: source.name.clone(),
                role: source.role,
                status,
            },
        );
    }

    // Io failures carry no template name; surface them as the first outcome
    let mut result: Vec<ValidationOutcome> = outcomes.into_values().collect();
    for failure in failures.iter().filter(|f| f.template_name().is_none()) {
        result.insert(
            0,
            ValidationOutcome {
                name: String::from("<unreadable>"),
                role: TemplateRole::Prompt,
                status: ValidationStatus::Invalid(failure.to_string()),
            },
        );
    }
    Ok(result)
}
