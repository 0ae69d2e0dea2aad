//! prompt-engine - live-reloaded prompt templates over MCP
//!
//! CLI entry point for serving, rendering, listing and validating prompts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prompt_engine::args;
use prompt_engine::cli::{Cli, Command};
use prompt_engine::config::Config;
use prompt_engine::registry::{PromptRegistry, RegistrySnapshot, ValidationStatus, validate_dir};
use prompt_engine::server::PromptServer;
use prompt_engine::templates::TemplateRole;
use prompt_engine::watcher;

fn setup_logging(
    cli_log_level: Option<&str>,
    config_log_level: Option<&str>,
    default_level: tracing::Level,
    log_file: Option<&PathBuf>,
) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    // Determine log level with priority: CLI --log-level > config file > command default
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to {}", s, default_level);
                default_level
            }
        },
        None => default_level,
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries the protocol, so logs never go there
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open log file")?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.color.apply();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Serving is long-lived and wants INFO; one-shot commands keep stderr quiet
    let default_level = match cli.command {
        Command::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    let log_file = cli.log_file.as_ref().or(config.log_file.as_ref());
    setup_logging(
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
        default_level,
        log_file,
    )
    .context("Failed to setup logging")?;

    let prompts_dir = cli.prompts.clone().unwrap_or_else(|| config.prompts_dir.clone());
    info!(prompts_dir = %prompts_dir.display(), "prompt-engine starting");

    // Dispatch command
    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { disable_json_args } => {
            debug!(disable_json_args, "main: matched Serve command");
            cmd_serve(&config, prompts_dir, disable_json_args)
        }
        Command::Render {
            name,
            args,
            disable_json_args,
        } => {
            debug!(%name, ?args, disable_json_args, "main: matched Render command");
            cmd_render(&config, &prompts_dir, &name, args, disable_json_args)
        }
        Command::List { verbose } => {
            debug!(verbose, "main: matched List command");
            cmd_list(&prompts_dir, verbose)
        }
        Command::Validate { name } => {
            debug!(?name, "main: matched Validate command");
            cmd_validate(&prompts_dir, name.as_deref())
        }
    }
}

fn cmd_serve(config: &Config, prompts_dir: PathBuf, disable_json_args: bool) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run_server(config, prompts_dir, disable_json_args));

    // a blocking stdin read cannot be interrupted; don't wait for it
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run_server(config: &Config, prompts_dir: PathBuf, disable_json_args: bool) -> Result<()> {
    let server = PromptServer::new(
        &prompts_dir,
        config.server_options(disable_json_args),
        config.watch.clone(),
    )?;
    let cancel = CancellationToken::new();

    let signal_task = tokio::spawn(handle_signals(server.registry(), cancel.clone()));
    let result = server
        .serve(tokio::io::stdin(), tokio::io::stdout(), cancel.clone())
        .await;

    signal_task.abort();
    result
}

/// SIGHUP reloads the prompts directory; SIGINT and SIGTERM stop the server
async fn handle_signals(registry: Arc<PromptRegistry>, cancel: CancellationToken) {
    debug!("handle_signals: setting up signal handlers");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let handlers = (
            signal(SignalKind::hangup()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        );
        let (mut sighup, mut sigint, mut sigterm) = match handlers {
            (Ok(hup), Ok(int), Ok(term)) => (hup, int, term),
            _ => {
                warn!("Failed to install signal handlers");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading prompts");
                    watcher::reload(Arc::clone(&registry)).await;
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    cancel.cancel();
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = registry;
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received");
                cancel.cancel();
            }
        }
    }
}

fn load_snapshot(prompts_dir: &Path) -> Result<RegistrySnapshot> {
    RegistrySnapshot::build(prompts_dir, &args::process_env(), 1)
        .wrap_err_with(|| format!("Failed to load prompts from {}", prompts_dir.display()))
}

fn cmd_render(
    config: &Config,
    prompts_dir: &Path,
    name: &str,
    supplied: Vec<(String, String)>,
    disable_json_args: bool,
) -> Result<()> {
    let snapshot = load_snapshot(prompts_dir)?;
    let prompt = snapshot.get(name).ok_or_else(|| {
        let available = snapshot.names().join(", ");
        eyre!("Prompt not found: {} (available: {})", name, available)
    })?;

    let supplied: HashMap<String, String> = supplied.into_iter().collect();
    let missing = prompt.missing_arguments(&supplied);
    if !missing.is_empty() {
        eprintln!(
            "{} Missing arguments: {}",
            "⚠".yellow(),
            missing.join(", ").yellow()
        );
    }

    let json_args = config.json_args && !disable_json_args;
    let rendered = prompt.render(&supplied, json_args)?;
    println!("{}", rendered);
    Ok(())
}

fn cmd_list(prompts_dir: &Path, verbose: bool) -> Result<()> {
    let snapshot = load_snapshot(prompts_dir)?;

    if snapshot.is_empty() {
        println!("No prompts found in {}", prompts_dir.display());
        return Ok(());
    }

    for prompt in snapshot.prompts() {
        if !verbose {
            println!("{}", prompt.name);
            continue;
        }

        if prompt.description.is_empty() {
            println!("{}", prompt.name.bold());
        } else {
            println!("{} - {}", prompt.name.bold(), prompt.description);
        }
        for variable in &prompt.variables {
            match prompt.env_values.get(variable) {
                Some(value) => println!(
                    "    {} {}",
                    variable.cyan(),
                    format!("(env {}={})", args::env_var_name(variable), value).dimmed()
                ),
                None => println!("    {}", variable.green()),
            }
        }
        for partial in &prompt.unresolved_partials {
            println!("    {} unknown partial {}", "⚠".yellow(), partial.yellow());
        }
    }

    if verbose {
        println!();
        println!("{} prompt(s) in {}", snapshot.len(), prompts_dir.display());
    }
    Ok(())
}

fn cmd_validate(prompts_dir: &Path, only: Option<&str>) -> Result<()> {
    let outcomes = validate_dir(prompts_dir)
        .wrap_err_with(|| format!("Failed to read prompts from {}", prompts_dir.display()))?;

    let selected: Vec<_> = outcomes
        .iter()
        .filter(|outcome| only.is_none_or(|name| outcome.name == name))
        .collect();
    if let Some(name) = only
        && selected.is_empty()
    {
        return Err(eyre!("Template not found: {}", name));
    }

    let mut failed = 0;
    for outcome in &selected {
        let label = match outcome.role {
            TemplateRole::Prompt => outcome.name.normal(),
            TemplateRole::Partial => format!("{} (partial)", outcome.name).dimmed(),
        };
        match &outcome.status {
            ValidationStatus::Valid {
                variables,
                unresolved_partials,
            } => {
                if variables.is_empty() {
                    println!("{} {}", "✓".green(), label);
                } else {
                    println!("{} {} [{}]", "✓".green(), label, variables.join(", ").cyan());
                }
                for partial in unresolved_partials {
                    println!("    {} unknown partial {}", "⚠".yellow(), partial.yellow());
                }
            }
            ValidationStatus::Invalid(message) => {
                failed += 1;
                println!("{} {}: {}", "✗".red(), label, message.red());
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{} of {} template(s) failed validation", failed, selected.len()));
    }
    println!();
    println!("{} {} template(s) valid", "✓".green(), selected.len());
    Ok(())
}
