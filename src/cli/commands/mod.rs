//! Subcommands module for Stackform CLI
//!
//! This module contains all the subcommand implementations.

pub mod check;
pub mod deploy;
pub mod destroy;
pub mod diff;
pub mod graph;
pub mod list;
pub mod synth;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::output::OutputFormatter;
use crate::config::Config;
use stackform::deploy::{Deployer, JsonPersistence, DEFAULT_ACCOUNT, DEFAULT_REGION};
use stackform::stack::SynthesizedStack;
use stackform::stacks::emailer;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration, with command-line overrides applied
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, mut config: Config) -> Self {
        if let Some(region) = &cli.region {
            config.stack.region = Some(region.clone());
        }
        if let Some(account) = &cli.account {
            config.stack.account = Some(account.clone());
        }

        let use_color = !cli.no_color && config.output.color;
        let output = OutputFormatter::new(use_color, cli.output, cli.verbosity());

        Self {
            config,
            output,
        }
    }

    /// Name of the configured stack
    pub fn stack_name(&self) -> &str {
        &self.config.stack.name
    }

    /// Declare and synthesize the configured stack
    pub fn synthesize(&self) -> Result<SynthesizedStack> {
        let app = self.config.app();
        let props = self.config.emailer_props()?;
        debug!(stack = %self.stack_name(), base_dir = %app.base_dir().display(), "synthesizing");
        emailer::synthesize(&app, self.stack_name(), props)
            .with_context(|| format!("Failed to synthesize stack '{}'", self.stack_name()))
    }

    /// Deployer backed by the configured state directory
    pub fn deployer(&self) -> Result<Deployer<JsonPersistence>> {
        let dir = &self.config.state.dir;
        let persistence = JsonPersistence::new(dir)
            .with_context(|| format!("Failed to open state directory: {}", dir.display()))?;

        Ok(Deployer::new(persistence)
            .with_account(
                self.config
                    .stack
                    .account
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
            )
            .with_region(
                self.config
                    .stack
                    .region
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            ))
    }
}
