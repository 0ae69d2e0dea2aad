use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::snapshot::{PromptDefinition, RegistrySnapshot, SnapshotDiff};
use crate::args::{self, EnvLookup};
use crate::error::RegistryError;

/// The live set of prompts, rebuilt from disk on demand
///
/// Readers take the current snapshot with [`PromptRegistry::snapshot`] and
/// keep using it for the whole request. A reconcile builds a complete new
/// snapshot and swaps it in atomically; a failed build leaves the previous
/// snapshot active.
pub struct PromptRegistry {
    prompts_dir: PathBuf,
    env: EnvLookup,
    current: RwLock<Arc<RegistrySnapshot>>,
    reconcile_lock: Mutex<()>,
    generation_tx: watch::Sender<u64>,
}

impl std::fmt::Debug for PromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRegistry")
            .field("prompts_dir", &self.prompts_dir)
            .field("generation", &self.current.read().generation())
            .finish()
    }
}

impl PromptRegistry {
    /// Build the registry from the process environment
    ///
    /// Fails if the initial build fails.
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        Self::with_env(prompts_dir, args::process_env())
    }

    /// Build the registry with an explicit environment lookup
    pub fn with_env(prompts_dir: impl Into<PathBuf>, env: EnvLookup) -> Result<Self, RegistryError> {
        let prompts_dir = prompts_dir.into();
        debug!(?prompts_dir, "PromptRegistry::with_env: called");

        let initial = RegistrySnapshot::build(&prompts_dir, &env, 1)?;
        info!(
            dir = %prompts_dir.display(),
            prompts = initial.len(),
            "Prompt registry initialized"
        );
        let (generation_tx, _) = watch::channel(initial.generation());

        Ok(Self {
            prompts_dir,
            env,
            current: RwLock::new(Arc::new(initial)),
            reconcile_lock: Mutex::new(()),
            generation_tx,
        })
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// The active snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// Look up a prompt in the active snapshot
    pub fn get(&self, name: &str) -> Option<Arc<PromptDefinition>> {
        self.current.read().get(name)
    }

    /// Receive the generation number of every snapshot swapped in from now on
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Rebuild from disk and swap the result in
    ///
    /// Concurrent calls are serialized. On error the active snapshot is untouched.
    pub fn reconcile(&self) -> Result<SnapshotDiff, RegistryError> {
        debug!(dir = ?self.prompts_dir, "PromptRegistry::reconcile: called");
        let _guard = self.reconcile_lock.lock();

        let generation = self.current.read().generation() + 1;
        let next = match RegistrySnapshot::build(&self.prompts_dir, &self.env, generation) {
            Ok(next) => Arc::new(next),
            Err(e) => {
                error!(error = %e, "Failed to rebuild prompts; keeping previous set");
                return Err(e);
            }
        };

        let previous = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));
        let diff = SnapshotDiff::between(&previous, &next);
        info!(
            %generation,
            prompts = next.len(),
            added = ?diff.added,
            removed = ?diff.removed,
            changed = ?diff.changed,
            "Prompts reloaded"
        );

        self.generation_tx.send_replace(generation);
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::static_env;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> PromptRegistry {
        PromptRegistry::with_env(dir.path(), static_env(Vec::<(String, String)>::new())).unwrap()
    }

    #[test]
    fn test_new_fails_on_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = PromptRegistry::new(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, RegistryError::Template(_)));
    }

    #[test]
    fn test_new_fails_on_broken_template() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.tmpl"), "{{oops").unwrap();
        assert!(PromptRegistry::new(dir.path()).is_err());
    }

    #[test]
    fn test_reconcile_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.tmpl"), "1").unwrap();
        let registry = registry(&dir);
        assert_eq!(registry.snapshot().names(), vec!["one"]);

        fs::write(dir.path().join("two.tmpl"), "{{x}}").unwrap();
        fs::remove_file(dir.path().join("one.tmpl")).unwrap();
        let diff = registry.reconcile().unwrap();

        assert_eq!(diff.added, vec!["two"]);
        assert_eq!(diff.removed, vec!["one"]);
        assert_eq!(registry.snapshot().names(), vec!["two"]);
        assert_eq!(registry.snapshot().generation(), 2);
    }

    #[test]
    fn test_failed_reconcile_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.tmpl"), "Hello {{name}}").unwrap();
        let registry = registry(&dir);
        let before = registry.snapshot();

        fs::write(dir.path().join("good.tmpl"), "Hello {{#if}}").unwrap();
        assert!(registry.reconcile().is_err());

        let after = registry.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.get("good").unwrap().arguments, vec!["name"]);
    }

    #[test]
    fn test_held_snapshot_survives_swap() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.tmpl"), "old {{a}}").unwrap();
        let registry = registry(&dir);
        let held = registry.get("t").unwrap();

        fs::write(dir.path().join("t.tmpl"), "new {{a}}").unwrap();
        registry.reconcile().unwrap();

        let supplied = std::collections::HashMap::from([("a".to_string(), "x".to_string())]);
        assert_eq!(held.render(&supplied, false).unwrap(), "old x");
        assert_eq!(registry.get("t").unwrap().render(&supplied, false).unwrap(), "new x");
    }

    #[test]
    fn test_subscribe_sees_new_generation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.tmpl"), "t").unwrap();
        let registry = registry(&dir);
        let mut rx = registry.subscribe();
        assert!(!rx.has_changed().unwrap());

        registry.reconcile().unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn test_concurrent_reconciles_are_serialized() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.tmpl"), "{{a}}").unwrap();
        let registry = Arc::new(registry(&dir));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.reconcile().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().generation(), 5);
    }
}
