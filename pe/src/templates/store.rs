use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use handlebars::{Handlebars, Template};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{PARTIAL_PREFIX, TEMPLATE_EXT, description, helpers};
use crate::error::{RenderError, TemplateError};
use crate::resolver::TemplateLookup;

/// Whether a template is served directly or only included by others
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateRole {
    Prompt,
    Partial,
}

impl TemplateRole {
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(PARTIAL_PREFIX) {
            Self::Partial
        } else {
            Self::Prompt
        }
    }
}

impl fmt::Display for TemplateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// One `.tmpl` file as read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// File name without the extension
    pub name: String,
    pub path: PathBuf,
    pub role: TemplateRole,
    /// First-line comment, empty when absent
    pub description: String,
    pub content: String,
}

/// Every template of a prompts directory, compiled into one handlebars registry
pub struct TemplateStore {
    dir: PathBuf,
    hbs: Handlebars<'static>,
    sources: BTreeMap<String, TemplateSource>,
}

impl fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateStore")
            .field("dir", &self.dir)
            .field("templates", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemplateStore {
    /// Load and compile every template in `dir`
    ///
    /// Fails on the first template that cannot be read or parsed.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        debug!(?dir, "TemplateStore::load: called");
        let (store, mut failures) = Self::load_inner(dir, true)?;
        if let Some(err) = failures.pop() {
            return Err(err);
        }
        info!(dir = %dir.display(), count = store.len(), "Loaded prompt templates");
        Ok(store)
    }

    /// Load every template that compiles, collecting the failures instead of stopping
    ///
    /// A missing or unreadable directory is still an error.
    pub fn load_lenient(dir: impl AsRef<Path>) -> Result<(Self, Vec<TemplateError>), TemplateError> {
        let dir = dir.as_ref();
        debug!(?dir, "TemplateStore::load_lenient: called");
        let (store, failures) = Self::load_inner(dir, false)?;
        if !failures.is_empty() {
            warn!(dir = %dir.display(), failed = failures.len(), "Some templates failed to load");
        }
        Ok((store, failures))
    }

    fn load_inner(dir: &Path, stop_on_error: bool) -> Result<(Self, Vec<TemplateError>), TemplateError> {
        let mut store = Self::empty(dir);
        let mut failures = Vec::new();

        for (name, path) in scan_dir(dir)? {
            match store.add_file(&name, &path) {
                Ok(()) => debug!(%name, "TemplateStore::load_inner: template registered"),
                Err(e) => {
                    warn!(%name, error = %e, "Template failed to load");
                    failures.push(e);
                    if stop_on_error {
                        break;
                    }
                }
            }
        }

        Ok((store, failures))
    }

    fn empty(dir: &Path) -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.register_helper("dict", Box::new(helpers::dict));
        Self {
            dir: dir.to_path_buf(),
            hbs,
            sources: BTreeMap::new(),
        }
    }

    fn add_file(&mut self, name: &str, path: &Path) -> Result<(), TemplateError> {
        debug!(%name, ?path, "TemplateStore::add_file: called");
        let content = fs::read_to_string(path).map_err(|e| TemplateError::io(path, e))?;
        self.hbs
            .register_template_string(name, &content)
            .map_err(|e| TemplateError::Parse {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let source = TemplateSource {
            name: name.to_string(),
            path: path.to_path_buf(),
            role: TemplateRole::from_name(name),
            description: description::extract_description(&content),
            content,
        };
        self.sources.insert(name.to_string(), source);
        Ok(())
    }

    /// Directory the templates were loaded from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TemplateSource> {
        self.sources.get(name)
    }

    /// All templates, sorted by name
    pub fn sources(&self) -> impl Iterator<Item = &TemplateSource> {
        self.sources.values()
    }

    /// Templates served as prompts, sorted by name
    pub fn prompts(&self) -> impl Iterator<Item = &TemplateSource> {
        self.sources.values().filter(|s| s.role == TemplateRole::Prompt)
    }

    /// Templates only usable as partials, sorted by name
    pub fn partials(&self) -> impl Iterator<Item = &TemplateSource> {
        self.sources.values().filter(|s| s.role == TemplateRole::Partial)
    }

    /// Render a template against `data`, trimming surrounding whitespace
    ///
    /// Missing fields render as empty strings.
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, RenderError> {
        debug!(%name, "TemplateStore::render: called");
        self.hbs
            .render(name, data)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|e| RenderError::Engine {
                template: name.to_string(),
                message: e.to_string(),
            })
    }
}

impl TemplateLookup for TemplateStore {
    /// Partial references may be written with or without the `.tmpl` extension
    fn lookup(&self, name: &str) -> Option<(&str, &Template)> {
        let stripped = name
            .strip_suffix(TEMPLATE_EXT)
            .and_then(|stem| stem.strip_suffix('.'));
        [Some(name), stripped].into_iter().flatten().find_map(|candidate| {
            let (key, _) = self.sources.get_key_value(candidate)?;
            let template = self.hbs.get_template(key)?;
            Some((key.as_str(), template))
        })
    }
}

/// List the regular `.tmpl` files directly inside `dir`, sorted by name
fn scan_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>, TemplateError> {
    debug!(?dir, "scan_dir: called");
    if !dir.is_dir() {
        return Err(TemplateError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TemplateError::io(dir, e))? {
        let entry = entry.map_err(|e| TemplateError::io(dir, e))?;
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || path.extension().is_none_or(|ext| ext != TEMPLATE_EXT) {
            debug!(?path, "scan_dir: skipping non-template entry");
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.push((stem.to_string(), path.clone()));
        } else {
            warn!(?path, "Skipping template with non UTF-8 file name");
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_load_classifies_prompts_and_partials() {
        let dir = TempDir::new().unwrap();
        write(&dir, "greeting.tmpl", "{{!-- Say hello --}}\nHello {{name}}!");
        write(&dir, "_footer.tmpl", "Bye");
        write(&dir, "notes.txt", "ignored {{");

        let store = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 2);

        let prompts: Vec<_> = store.prompts().map(|s| s.name.as_str()).collect();
        assert_eq!(prompts, vec!["greeting"]);
        let partials: Vec<_> = store.partials().map(|s| s.name.as_str()).collect();
        assert_eq!(partials, vec!["_footer"]);

        assert_eq!(store.get("greeting").unwrap().description, "Say hello");
        assert_eq!(store.get("_footer").unwrap().role, TemplateRole::Partial);
    }

    #[test]
    fn test_load_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested.tmpl")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("inner.tmpl"), "x").unwrap();
        write(&dir, "top.tmpl", "top");

        let store = TemplateStore::load(dir.path()).unwrap();
        let names: Vec<_> = store.sources().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["top"]);
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let err = TemplateStore::load(&missing).unwrap_err();
        assert!(matches!(err, TemplateError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_load_parse_error_names_template() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ok.tmpl", "fine");
        write(&dir, "broken.tmpl", "{{#if x}}never closed");

        let err = TemplateStore::load(dir.path()).unwrap_err();
        assert_eq!(err.template_name(), Some("broken"));
    }

    #[test]
    fn test_load_lenient_keeps_good_templates() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ok.tmpl", "fine");
        write(&dir, "broken.tmpl", "{{name");

        let (store, failures) = TemplateStore::load_lenient(dir.path()).unwrap();
        assert!(store.get("ok").is_some());
        assert!(store.get("broken").is_none());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].template_name(), Some("broken"));
    }

    #[test]
    fn test_render_trims_and_does_not_escape() {
        let dir = TempDir::new().unwrap();
        write(&dir, "code.tmpl", "\n  Compare {{a}} & {{b}}  \n\n");
        let store = TemplateStore::load(dir.path()).unwrap();

        let rendered = store.render("code", &json!({"a": "<x>", "b": "\"y\""})).unwrap();
        assert_eq!(rendered, "Compare <x> & \"y\"");
    }

    #[test]
    fn test_render_missing_field_is_empty() {
        let dir = TempDir::new().unwrap();
        write(&dir, "greet.tmpl", "Hello {{name}}!");
        let store = TemplateStore::load(dir.path()).unwrap();

        assert_eq!(store.render("greet", &json!({})).unwrap(), "Hello !");
    }

    #[test]
    fn test_render_partial_with_dict_context() {
        let dir = TempDir::new().unwrap();
        write(&dir, "_badge.tmpl", "[{{label}}:{{value}}]");
        write(
            &dir,
            "report.tmpl",
            "{{> _badge (dict \"label\" \"user\" \"value\" user)}}",
        );
        let store = TemplateStore::load(dir.path()).unwrap();

        assert_eq!(store.render("report", &json!({"user": "ann"})).unwrap(), "[user:ann]");
    }

    #[test]
    fn test_render_unknown_template() {
        let dir = TempDir::new().unwrap();
        let store = TemplateStore::load(dir.path()).unwrap();
        let err = store.render("nope", &json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Engine { .. }));
    }

    #[test]
    fn test_lookup_accepts_extension() {
        let dir = TempDir::new().unwrap();
        write(&dir, "_part.tmpl", "p");
        let store = TemplateStore::load(dir.path()).unwrap();

        assert_eq!(store.lookup("_part").map(|(name, _)| name), Some("_part"));
        assert_eq!(store.lookup("_part.tmpl").map(|(name, _)| name), Some("_part"));
        assert!(store.lookup("_other").is_none());
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(TemplateRole::from_name("_x"), TemplateRole::Partial);
        assert_eq!(TemplateRole::from_name("x_"), TemplateRole::Prompt);
        assert_eq!(TemplateRole::Partial.to_string(), "partial");
    }
}
