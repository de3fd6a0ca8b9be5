//! Deploy command - apply the stack to the local target
//!
//! This module implements the `deploy` subcommand.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;

use stackform::deploy::DeployReport;
use stackform::template::ResourceType;

/// Arguments for the deploy command
#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    /// Upload an object key into the website bucket after deploying
    #[arg(long = "upload", value_name = "KEY", action = clap::ArgAction::Append)]
    pub uploads: Vec<String>,
}

impl DeployArgs {
    /// Execute the deploy command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let synth = ctx.synthesize()?;
        let deployer = ctx.deployer()?;

        ctx.output.banner(&format!("DEPLOY {}", synth.stack_name));
        let report = deployer
            .deploy(&synth)
            .with_context(|| format!("Failed to deploy stack '{}'", synth.stack_name))?;

        if !self.uploads.is_empty() {
            let bucket = synth
                .template
                .resources_of_type(&ResourceType::Bucket)
                .map(|(id, _)| id.clone())
                .next()
                .context("Stack has no bucket to upload into")?;
            for key in &self.uploads {
                deployer.put_object(&synth.stack_name, &bucket, key)?;
                ctx.output.info(&format!("Uploaded {key} to {bucket}"));
            }
        }

        if ctx.output.is_structured() {
            ctx.output.emit(&report)?;
        } else {
            print_report(ctx, &report);
        }

        Ok(i32::from(!report.failed.is_empty()))
    }
}

fn print_report(ctx: &CommandContext, report: &DeployReport) {
    let mut rows = Vec::new();
    for (action, ids) in [
        ("create", &report.created),
        ("update", &report.updated),
        ("replace", &report.replaced),
        ("delete", &report.deleted),
    ] {
        rows.extend(ids.iter().map(|id| vec![id.clone(), action.to_string()]));
    }

    if rows.is_empty() {
        ctx.output.success(&format!("{} (no changes)", report.stack_name));
    } else {
        ctx.output.table(&["Resource", "Action"], &rows);
        ctx.output.success(&format!(
            "{}: {} created, {} updated, {} replaced, {} deleted",
            report.stack_name,
            report.created.len(),
            report.updated.len(),
            report.replaced.len(),
            report.deleted.len()
        ));
    }

    for retained in &report.retained {
        ctx.output.hint(&format!(
            "{} ({}) retained: {}",
            retained.logical_id, retained.physical_id, retained.reason
        ));
    }
    for failure in &report.failed {
        ctx.output.error(&format!(
            "could not delete {} ({}): {}",
            failure.logical_id, failure.physical_id, failure.reason
        ));
    }

    if !report.outputs.is_empty() {
        let items: Vec<String> = report
            .outputs
            .iter()
            .map(|(name, value)| match value.as_str() {
                Some(s) => format!("{name} = {s}"),
                None => format!("{name} = {value}"),
            })
            .collect();
        ctx.output.list("Outputs", &items);
    }
    ctx.output.elapsed("Deployed");
}
