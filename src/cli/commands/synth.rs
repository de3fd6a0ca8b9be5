//! Synth command - write the cloud assembly
//!
//! This module implements the `synth` subcommand.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use stackform::assembly;

/// Arguments for the synth command
#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
    /// Assembly directory (overrides configuration)
    #[arg(short = 'o', long)]
    pub outdir: Option<PathBuf>,

    /// Print the template to stdout
    #[arg(long)]
    pub print: bool,
}

#[derive(Serialize)]
struct SynthSummary<'a> {
    stack: &'a str,
    outdir: String,
    template: String,
    resources: usize,
    assets: usize,
}

impl SynthArgs {
    /// Execute the synth command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let synth = ctx.synthesize()?;
        let outdir = self
            .outdir
            .clone()
            .unwrap_or_else(|| ctx.config.output.outdir.clone());

        let written = assembly::write(&synth, &outdir)
            .with_context(|| format!("Failed to write assembly to {}", outdir.display()))?;

        if self.print && !ctx.output.is_structured() {
            print!("{}", synth.template.to_yaml()?);
            return Ok(0);
        }

        ctx.output.emit(&SynthSummary {
            stack: &synth.stack_name,
            outdir: written.outdir.display().to_string(),
            template: written.template.display().to_string(),
            resources: synth.template.resources.len(),
            assets: written.assets.len(),
        })?;

        ctx.output.success(&format!(
            "Synthesized {} to {}",
            synth.stack_name,
            written.template.display()
        ));
        let rows: Vec<Vec<String>> = synth
            .template
            .type_counts()
            .into_iter()
            .map(|(ty, count)| vec![ty, count.to_string()])
            .collect();
        ctx.output.section("Resources");
        ctx.output.table(&["Type", "Count"], &rows);
        ctx.output.info(&format!("Staged {} asset(s)", written.assets.len()));
        ctx.output.debug(&format!(
            "Deployment order: {}",
            synth.deployment_order.join(", ")
        ));

        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synth_args_parsing() {
        let args = SynthArgs::try_parse_from(["synth", "-o", "out", "--print"]).unwrap();
        assert_eq!(args.outdir, Some(PathBuf::from("out")));
        assert!(args.print);
    }
}
