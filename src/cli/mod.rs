//! CLI module for Stackform
//!
//! This module provides the command-line interface for Stackform,
//! including argument parsing, output formatting, and subcommand handling.

pub mod commands;
pub mod completions;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stackform - infrastructure stacks as typed Rust
///
/// Synthesizes the Daily Content Emailer stack into a cloud assembly and
/// deploys it against a local simulated account.
#[derive(Parser, Debug, Clone)]
#[command(name = "stackform")]
#[command(author = "Stackform Contributors")]
#[command(version)]
#[command(about = "Synthesize, diff and deploy the Daily Content Emailer stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Target region (overrides configuration)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Target account (overrides configuration)
    #[arg(long, global = true)]
    pub account: Option<String>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
    /// YAML output
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Synthesize the stack into a cloud assembly
    Synth(commands::synth::SynthArgs),

    /// Compare the synthesized stack with the deployed one
    Diff(commands::diff::DiffArgs),

    /// Deploy the stack to the local target
    Deploy(commands::deploy::DeployArgs),

    /// Tear down a deployed stack
    Destroy(commands::destroy::DestroyArgs),

    /// Show the resource graph
    Graph(commands::graph::GraphArgs),

    /// Lint the synthesized template
    Check(commands::check::CheckArgs),

    /// List resources or routes
    List(commands::list::ListArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["stackform", "synth"]).unwrap();
        assert!(matches!(cli.command, Commands::Synth(_)));
        assert_eq!(cli.output, OutputFormat::Human);
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["stackform", "-vvvv", "check"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackform",
            "deploy",
            "--region",
            "eu-west-1",
            "--output",
            "json",
            "--no-color",
        ])
        .unwrap();
        assert_eq!(cli.region.as_deref(), Some("eu-west-1"));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.no_color);
    }

    #[test]
    fn test_unknown_output_format_is_rejected() {
        assert!(Cli::try_parse_from(["stackform", "--output", "xml", "synth"]).is_err());
    }
}
