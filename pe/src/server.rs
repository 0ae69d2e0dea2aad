//! Serve orchestration
//!
//! Runs the MCP loop and the directory watcher side by side. Both share one
//! cancellation token: an external cancel stops both, and the MCP loop
//! ending (client hung up) cancels the watcher.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::args::{self, EnvLookup};
use crate::mcp::{McpServer, ServerOptions};
use crate::registry::PromptRegistry;
use crate::watcher::{PromptWatcher, WatcherConfig};

/// A fully initialized prompt server, ready to serve one client
pub struct PromptServer {
    registry: Arc<PromptRegistry>,
    watcher: PromptWatcher,
    options: ServerOptions,
}

impl PromptServer {
    /// Load the prompts directory and start watching it
    ///
    /// Fails if the initial load fails or the directory cannot be watched.
    pub fn new(prompts_dir: impl Into<PathBuf>, options: ServerOptions, watch: WatcherConfig) -> Result<Self> {
        Self::with_env(prompts_dir, options, watch, args::process_env())
    }

    pub fn with_env(
        prompts_dir: impl Into<PathBuf>,
        options: ServerOptions,
        watch: WatcherConfig,
        env: EnvLookup,
    ) -> Result<Self> {
        let prompts_dir = prompts_dir.into();
        debug!(?prompts_dir, ?options, "PromptServer::with_env: called");

        let registry = Arc::new(
            PromptRegistry::with_env(&prompts_dir, env)
                .wrap_err_with(|| format!("Failed to load prompts from {}", prompts_dir.display()))?,
        );
        let watcher = PromptWatcher::new(Arc::clone(&registry), watch)?;

        Ok(Self {
            registry,
            watcher,
            options,
        })
    }

    pub fn registry(&self) -> Arc<PromptRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serve until the client disconnects or `cancel` fires, then stop the watcher
    pub async fn serve<R, W>(self, reader: R, writer: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            registry,
            watcher,
            options,
        } = self;
        info!(
            dir = %registry.prompts_dir().display(),
            prompts = registry.snapshot().len(),
            "Serving prompts"
        );

        let mcp = McpServer::new(registry, options);
        let serve_loop = async {
            let result = mcp.run(reader, writer, cancel.clone()).await;
            cancel.cancel();
            result
        };
        let (result, ()) = tokio::join!(serve_loop, watcher.run(cancel.clone()));

        info!("Prompt server stopped");
        result
    }
}
