//! Diff command - compare the synthesized stack with the deployed one
//!
//! This module implements the `diff` subcommand. Without a deployed stack
//! every resource shows as an addition.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;

use stackform::diff::unified_template_diff;

/// Arguments for the diff command
#[derive(Parser, Debug, Clone)]
pub struct DiffArgs {
    /// Show a unified diff of the raw templates
    #[arg(long)]
    pub template: bool,

    /// Lines of context for the unified diff
    #[arg(long, default_value = "3")]
    pub context: usize,

    /// Exit with status 1 when there are differences
    #[arg(long)]
    pub fail: bool,
}

impl DiffArgs {
    /// Execute the diff command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let synth = ctx.synthesize()?;
        let deployer = ctx.deployer()?;
        let diff = deployer.plan(&synth)?;

        if ctx.output.is_structured() {
            ctx.output.emit(&diff)?;
        } else if self.template {
            let deployed = deployer
                .stack(&synth.stack_name)?
                .map(|state| state.template)
                .unwrap_or_default();
            print!("{}", unified_template_diff(&deployed, &synth.template, self.context));
        } else {
            ctx.output.section(&format!("Stack {}", synth.stack_name));
            print!("{}", diff.render(ctx.output.use_color()));
            ctx.output.plain(&format!("\n{}", diff.summary()));
            for change in diff.destructive_changes() {
                ctx.output.warning(&format!(
                    "{} ({}) will lose its data",
                    change.logical_id, change.resource_type
                ));
            }
        }

        Ok(i32::from(self.fail && !diff.is_empty()))
    }
}
