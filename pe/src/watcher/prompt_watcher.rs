//! Prompts directory watcher implementation

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::WatcherConfig;
use crate::registry::PromptRegistry;
use crate::templates::TEMPLATE_EXT;

/// The PromptWatcher reloads the registry whenever a template file changes
pub struct PromptWatcher {
    config: WatcherConfig,
    registry: Arc<PromptRegistry>,
    // dropping the notify handle stops event delivery
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl PromptWatcher {
    /// Start watching the registry's prompts directory
    ///
    /// Events are buffered until [`PromptWatcher::run`] is called.
    pub fn new(registry: Arc<PromptRegistry>, config: WatcherConfig) -> Result<Self> {
        let dir = registry.prompts_dir().to_path_buf();
        debug!(?dir, ?config, "PromptWatcher::new: called");

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            if tx.send(res).is_err() {
                debug!("PromptWatcher: event receiver dropped");
            }
        })
        .wrap_err("Failed to create file watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            config,
            registry,
            _watcher: watcher,
            events,
        })
    }

    /// Reload on template changes until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            config,
            registry,
            _watcher,
            mut events,
        } = self;
        info!(dir = %registry.prompts_dir().display(), "Started watching prompts directory for changes");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopping prompts watcher due to cancellation");
                    break;
                }
                received = events.recv() => received,
            };

            match received {
                Some(Ok(event)) => {
                    if !is_template_event(&event) {
                        debug!(kind = ?event.kind, paths = ?event.paths, "PromptWatcher: ignoring event");
                        continue;
                    }
                    info!(kind = ?event.kind, paths = ?event.paths, "Prompt template file changed");

                    if let Some(window) = config.debounce() {
                        let Some(folded) = drain_burst(&mut events, window, &cancel).await else {
                            info!("Stopping prompts watcher due to cancellation");
                            break;
                        };
                        debug!(%folded, "PromptWatcher: folded burst of events");
                    }
                    reload(Arc::clone(&registry)).await;
                }
                Some(Err(e)) => error!(error = %e, "File watcher error"),
                None => {
                    warn!("File watcher channel closed");
                    break;
                }
            }
        }
    }
}

/// True for create, modify, remove and rename events touching a `.tmpl` file
pub fn is_template_event(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == TEMPLATE_EXT))
}

/// Swallow events until the directory has been quiet for `window`
///
/// Returns None if `cancel` fires first.
async fn drain_burst(
    events: &mut mpsc::UnboundedReceiver<notify::Result<Event>>,
    window: Duration,
    cancel: &CancellationToken,
) -> Option<usize> {
    let mut folded = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            received = tokio::time::timeout(window, events.recv()) => match received {
                Ok(Some(_)) => folded += 1,
                _ => return Some(folded),
            },
        }
    }
}

/// Reconcile on the blocking pool and log the outcome
///
/// A reconcile reads the whole directory and waits on the reconcile lock;
/// neither may run on an async worker.
pub async fn reload(registry: Arc<PromptRegistry>) {
    debug!("reload: called");
    let outcome = match tokio::task::spawn_blocking(move || registry.reconcile()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Reload task failed");
            return;
        }
    };
    match outcome {
        Ok(diff) if diff.is_empty() => debug!("PromptWatcher: reload produced no prompt changes"),
        Ok(diff) => info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "Prompt set updated"
        ),
        Err(e) => error!(error = %e, "Failed to reload prompts"),
    }
}
