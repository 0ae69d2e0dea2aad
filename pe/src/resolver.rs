//! Dependency Resolver
//!
//! Walks a compiled template and every partial it transitively includes,
//! collecting the root names of the data fields it reads. The result is the
//! set of arguments a prompt needs.
//!
//! - Bare expressions (`{{name}}`, `{{user.email}}`) contribute their first
//!   path segment, lower-cased.
//! - Helper calls and block helpers contribute their parameters and hash
//!   values, never the helper name. Both branches of a block count.
//! - Names bound by block parameters (`as |item|`), `this`, `@`-data and
//!   literals contribute nothing.
//! - Partials are followed by name. A partial referenced again along the same
//!   chain is a cycle; a partial reached twice through different chains is
//!   visited once.

use std::collections::{BTreeSet, HashSet};

use handlebars::Template;
use handlebars::template::{BlockParam, DecoratorTemplate, HelperTemplate, Parameter, TemplateElement};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CycleError, ResolveError};

/// Names supplied by the engine itself, never requested from callers
pub const BUILTIN_VARIABLES: &[&str] = &["date"];

/// Source of compiled templates for partial resolution
pub trait TemplateLookup {
    /// Find a template by reference, returning its canonical name with it
    fn lookup(&self, name: &str) -> Option<(&str, &Template)>;
}

/// Outcome of resolving one template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Lower-cased root names of every field the template reads
    pub variables: BTreeSet<String>,
    /// Partial names that no template in the lookup answers to
    pub unresolved_partials: BTreeSet<String>,
}

/// Resolve the variables used by template `name` and its partials
pub fn resolve_variables<L>(lookup: &L, name: &str) -> Result<Resolution, ResolveError>
where
    L: TemplateLookup + ?Sized,
{
    debug!(%name, "resolve_variables: called");
    let (root, template) = lookup
        .lookup(name)
        .ok_or_else(|| ResolveError::TemplateNotFound(name.to_string()))?;

    let mut walker = Walker {
        lookup,
        visited: HashSet::from([(root.to_string(), Vec::new())]),
        inline_partials: HashSet::new(),
        resolution: Resolution::default(),
    };
    walker.walk_template(template, &[root.to_string()], &[])?;

    debug!(
        %name,
        variables = ?walker.resolution.variables,
        unresolved = ?walker.resolution.unresolved_partials,
        "resolve_variables: done"
    );
    Ok(walker.resolution)
}

struct Walker<'a, L: ?Sized> {
    lookup: &'a L,
    /// Partials already walked from any chain, with the block parameters in scope at the time
    visited: HashSet<(String, Vec<String>)>,
    /// Partials defined inline with `{{#*inline "name"}}`
    inline_partials: HashSet<String>,
    resolution: Resolution,
}

impl<'a, L: TemplateLookup + ?Sized> Walker<'a, L> {
    /// `path` is the partial chain leading here; `bound` holds block parameter names in scope
    fn walk_template(&mut self, template: &Template, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        for element in &template.elements {
            self.walk_element(element, path, bound)?;
        }
        Ok(())
    }

    fn walk_element(&mut self, element: &TemplateElement, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        match element {
            TemplateElement::RawString(_) | TemplateElement::Comment(_) => Ok(()),
            TemplateElement::Expression(helper) | TemplateElement::HtmlExpression(helper) => {
                self.walk_expression(helper, path, bound)
            }
            TemplateElement::HelperBlock(helper) => self.walk_block(helper, path, bound),
            TemplateElement::PartialExpression(partial) | TemplateElement::PartialBlock(partial) => {
                self.walk_partial(partial, path, bound)
            }
            TemplateElement::DecoratorExpression(decorator) | TemplateElement::DecoratorBlock(decorator) => {
                self.walk_decorator(decorator, path, bound)
            }
            _ => Ok(()),
        }
    }

    fn walk_expression(&mut self, helper: &HelperTemplate, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        if helper.params.is_empty() && helper.hash.is_empty() {
            self.walk_parameter(&helper.name, path, bound)
        } else {
            self.walk_arguments(&helper.params, helper.hash.values(), path, bound)
        }
    }

    fn walk_block(&mut self, helper: &HelperTemplate, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        // `{{#items}}...{{/items}}` iterates a field directly
        self.walk_expression(helper, path, bound)?;

        if let Some(body) = &helper.template {
            let inner = with_block_params(bound, helper.block_param.as_ref());
            self.walk_template(body, path, &inner)?;
        }
        if let Some(inverse) = &helper.inverse {
            self.walk_template(inverse, path, bound)?;
        }
        Ok(())
    }

    fn walk_decorator(
        &mut self,
        decorator: &DecoratorTemplate,
        path: &[String],
        bound: &[String],
    ) -> Result<(), ResolveError> {
        if decorator.name.as_name() == Some("inline")
            && let Some(Parameter::Literal(Value::String(name))) = decorator.params.first()
        {
            debug!(%name, "Walker::walk_decorator: inline partial defined");
            self.inline_partials.insert(name.clone());
        } else {
            self.walk_arguments(&decorator.params, decorator.hash.values(), path, bound)?;
        }

        if let Some(body) = &decorator.template {
            self.walk_template(body, path, bound)?;
        }
        Ok(())
    }

    fn walk_partial(&mut self, partial: &DecoratorTemplate, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        // context and hash arguments are evaluated in the including template
        self.walk_arguments(&partial.params, partial.hash.values(), path, bound)?;
        if let Some(failover) = &partial.template {
            self.walk_template(failover, path, bound)?;
        }

        let reference = match &partial.name {
            Parameter::Literal(Value::String(name)) => name.as_str(),
            Parameter::Subexpression(_) => {
                // dynamic partial names cannot be followed statically
                return self.walk_parameter(&partial.name, path, bound);
            }
            other => match other.as_name() {
                Some(name) => name,
                None => return Ok(()),
            },
        };

        if self.inline_partials.contains(reference) {
            return Ok(());
        }

        let lookup = self.lookup;
        let Some((canonical, template)) = lookup.lookup(reference) else {
            warn!(partial = %reference, from = ?path.last(), "Partial reference does not resolve to a template");
            self.resolution.unresolved_partials.insert(reference.to_string());
            return Ok(());
        };

        if path.iter().any(|seen| seen == canonical) {
            let mut chain = path.to_vec();
            chain.push(canonical.to_string());
            return Err(CycleError { chain }.into());
        }
        // block params of the including scope stay bound inside the partial
        if !self.visited.insert((canonical.to_string(), bound.to_vec())) {
            debug!(%canonical, ?bound, "Walker::walk_partial: already visited");
            return Ok(());
        }

        let mut chain = path.to_vec();
        chain.push(canonical.to_string());
        self.walk_template(template, &chain, bound)
    }

    fn walk_arguments<'p>(
        &mut self,
        params: &'p [Parameter],
        hash_values: impl Iterator<Item = &'p Parameter>,
        path: &[String],
        bound: &[String],
    ) -> Result<(), ResolveError> {
        for param in params.iter().chain(hash_values) {
            self.walk_parameter(param, path, bound)?;
        }
        Ok(())
    }

    fn walk_parameter(&mut self, param: &Parameter, path: &[String], bound: &[String]) -> Result<(), ResolveError> {
        match param {
            Parameter::Literal(_) => Ok(()),
            Parameter::Subexpression(sub) => self.walk_element(&sub.element, path, bound),
            other => {
                if let Some(raw) = other.as_name() {
                    self.record(raw, bound);
                }
                Ok(())
            }
        }
    }

    fn record(&mut self, raw: &str, bound: &[String]) {
        let Some(root) = reference_root(raw) else {
            return;
        };
        if bound.iter().any(|name| name == root) {
            return;
        }
        let variable = root.to_lowercase();
        if BUILTIN_VARIABLES.contains(&variable.as_str()) {
            return;
        }
        self.resolution.variables.insert(variable);
    }
}

/// Block parameter names are visible only inside the block body
fn with_block_params(bound: &[String], block_param: Option<&BlockParam>) -> Vec<String> {
    let mut inner = bound.to_vec();
    match block_param {
        Some(BlockParam::Single(p)) => inner.extend(p.as_name().map(str::to_string)),
        Some(BlockParam::Pair((a, b))) => {
            inner.extend(a.as_name().map(str::to_string));
            inner.extend(b.as_name().map(str::to_string));
        }
        _ => {}
    }
    inner
}

/// First segment of a field path, or None for references that are not caller data
fn reference_root(raw: &str) -> Option<&str> {
    let mut path = raw.trim();
    while let Some(rest) = path.strip_prefix("../") {
        path = rest;
    }

    if let Some(rest) = path.strip_prefix("@root.").or_else(|| path.strip_prefix("@root/")) {
        path = rest;
    } else if path.starts_with('@') {
        return None;
    }

    if let Some(rest) = path
        .strip_prefix("this.")
        .or_else(|| path.strip_prefix("this/"))
        .or_else(|| path.strip_prefix("./"))
    {
        path = rest;
    }

    let first = path.split(['.', '/']).next()?;
    let first = first.trim_start_matches('[').trim_end_matches(']');
    if first.is_empty() || first == "this" {
        None
    } else {
        Some(first)
    }
}
