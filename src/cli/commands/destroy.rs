//! Destroy command - tear a deployed stack down
//!
//! This module implements the `destroy` subcommand.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;

/// Arguments for the destroy command
#[derive(Parser, Debug, Clone)]
pub struct DestroyArgs {
    /// Stack to destroy (defaults to the configured stack)
    pub stack: Option<String>,
}

impl DestroyArgs {
    /// Execute the destroy command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let stack_name = self
            .stack
            .clone()
            .unwrap_or_else(|| ctx.stack_name().to_string());
        let deployer = ctx.deployer()?;

        if deployer.stack(&stack_name)?.is_none() {
            ctx.output
                .error(&format!("Stack '{stack_name}' is not deployed"));
            return Ok(1);
        }

        ctx.output.banner(&format!("DESTROY {stack_name}"));
        let report = deployer
            .destroy(&stack_name)
            .with_context(|| format!("Failed to destroy stack '{stack_name}'"))?;

        if ctx.output.is_structured() {
            ctx.output.emit(&report)?;
            return Ok(i32::from(!report.is_complete()));
        }

        ctx.output.list("Deleted", &report.deleted);
        for retained in &report.retained {
            ctx.output.hint(&format!(
                "{} ({}) retained: {}",
                retained.logical_id, retained.physical_id, retained.reason
            ));
        }
        for snapshot in &report.snapshots {
            ctx.output.hint(&format!(
                "snapshot {} taken of {}",
                snapshot.id, snapshot.logical_id
            ));
        }
        for failure in &report.failed {
            ctx.output.error(&format!(
                "could not delete {} ({}): {}",
                failure.logical_id, failure.physical_id, failure.reason
            ));
        }

        if report.is_complete() {
            ctx.output.success(&format!("{stack_name} destroyed"));
            Ok(0)
        } else {
            ctx.output
                .warning(&format!("{stack_name} is in DeleteFailed state"));
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_args_stack_is_optional() {
        let args = DestroyArgs::try_parse_from(["destroy"]).unwrap();
        assert!(args.stack.is_none());
        let args = DestroyArgs::try_parse_from(["destroy", "Other"]).unwrap();
        assert_eq!(args.stack.as_deref(), Some("Other"));
    }
}
