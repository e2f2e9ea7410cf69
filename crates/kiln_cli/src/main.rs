//! Kiln CLI: inspect and maintain a kiln build cache directory.
//!
//! Provides `kiln status` to show the stamp and tier sizes, `kiln verify` to
//! run the stamp gate, file scan and invalidation pass without writing
//! anything, and `kiln clean` to delete the cache directory.

#![warn(missing_docs)]

mod clean;
mod project;
mod status;
mod verify;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Kiln: a persistent cache for incremental builds.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln build cache tool")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `kiln.toml` file or the directory containing it.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the cache stamp and tier sizes.
    Status(StatusArgs),
    /// Report which cached modules the next build would rebuild.
    Verify(VerifyArgs),
    /// Delete the cache directory.
    Clean,
}

/// Arguments for the `kiln status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `kiln verify` subcommand.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Exit with status 2 when any cached module is stale.
    #[arg(long)]
    pub strict: bool,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

impl GlobalArgs {
    fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else if self.quiet {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Warn
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    env_logger::Builder::from_default_env()
        .filter_level(global.log_level())
        .init();

    let result = match cli.command {
        Command::Status(ref args) => status::run(args, &global),
        Command::Verify(ref args) => verify::run(args, &global),
        Command::Clean => clean::run(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_default() {
        let cli = Cli::parse_from(["kiln", "status"]);
        match cli.command {
            Command::Status(ref args) => assert_eq!(args.format, ReportFormat::Text),
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn parse_verify_with_args() {
        let cli = Cli::parse_from(["kiln", "verify", "--format", "json", "--strict"]);
        match cli.command {
            Command::Verify(ref args) => {
                assert_eq!(args.format, ReportFormat::Json);
                assert!(args.strict);
            }
            _ => panic!("expected Verify command"),
        }
    }

    #[test]
    fn parse_clean() {
        let cli = Cli::parse_from(["kiln", "clean"]);
        assert!(matches!(cli.command, Command::Clean));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["kiln", "--quiet", "--config", "app/kiln.toml", "status"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("app/kiln.toml"));
    }

    #[test]
    fn verbose_wins_over_quiet() {
        let global = GlobalArgs {
            quiet: true,
            verbose: true,
            config: None,
        };
        assert_eq!(global.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["kiln"]).is_err());
    }
}
