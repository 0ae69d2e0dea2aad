//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::args::parse_key_value;

/// prompt-engine - live-reloaded prompt templates over MCP
#[derive(Debug, Parser)]
#[command(
    name = "pe",
    about = "Serve a directory of handlebars prompt templates to MCP clients",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Directory holding the `.tmpl` files
    #[arg(short, long, global = true, env = "PROMPTS_DIR", help = "Prompts directory")]
    pub prompts: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Write logs to a file instead of stderr
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// When to color terminal output
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve prompts over MCP on stdin/stdout, reloading on file changes
    Serve {
        /// Pass request arguments to templates as plain strings
        #[arg(long)]
        disable_json_args: bool,
    },

    /// Render one prompt to stdout
    Render {
        /// Prompt name (file name without .tmpl)
        name: String,

        /// Template argument, repeatable
        #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        args: Vec<(String, String)>,

        /// Pass arguments to the template as plain strings
        #[arg(long)]
        disable_json_args: bool,
    },

    /// List available prompts and their arguments
    List {
        /// Also show environment-provided values and partials
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check templates for parse errors and cyclic partials
    Validate {
        /// Only report on this template
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Apply to the global `colored` switch
    pub fn apply(self) {
        match self {
            Self::Auto => colored::control::unset_override(),
            Self::Always => colored::control::set_override(true),
            Self::Never => colored::control::set_override(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_render_with_args() {
        let cli = Cli::try_parse_from(["pe", "-p", "/tmp/p", "render", "greeting", "-a", "name=Ann", "--arg", "n=2"])
            .unwrap();
        assert_eq!(cli.prompts, Some(PathBuf::from("/tmp/p")));
        match cli.command {
            Command::Render {
                name,
                args,
                disable_json_args,
            } => {
                assert_eq!(name, "greeting");
                assert_eq!(
                    args,
                    vec![("name".to_string(), "Ann".to_string()), ("n".to_string(), "2".to_string())]
                );
                assert!(!disable_json_args);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_arg() {
        assert!(Cli::try_parse_from(["pe", "render", "greeting", "-a", "oops"]).is_err());
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::try_parse_from(["pe", "serve", "--disable-json-args", "--color", "never"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { disable_json_args: true }));
        assert_eq!(cli.color, ColorMode::Never);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["pe"]).is_err());
    }
}
