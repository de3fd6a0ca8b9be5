//! Check command - lint the synthesized template
//!
//! This module implements the `check` subcommand. Exits with status 1 when
//! any finding is an error.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use stackform::lint::{Finding, LintConfig, Linter, Severity};
use stackform::template::Template;

/// Arguments for the check command
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Lint this template file instead of synthesizing the stack
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Linter configuration file (YAML)
    #[arg(long)]
    pub lint_config: Option<PathBuf>,

    /// Rules to skip
    #[arg(long = "skip", value_name = "RULE", action = clap::ArgAction::Append)]
    pub skip_rules: Vec<String>,

    /// Only run these rules
    #[arg(long = "only", value_name = "RULE", action = clap::ArgAction::Append)]
    pub only_rules: Vec<String>,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl CheckArgs {
    fn lint_config(&self) -> Result<LintConfig> {
        let mut config = match &self.lint_config {
            Some(path) => LintConfig::from_file(path)
                .with_context(|| format!("Failed to load lint config: {}", path.display()))?,
            None => LintConfig::default(),
        };
        config.skip_rules.extend(self.skip_rules.iter().cloned());
        config.only_rules.extend(self.only_rules.iter().cloned());
        config.warnings_as_errors |= self.strict;
        Ok(config)
    }

    fn load_template(&self, ctx: &CommandContext) -> Result<Template> {
        match &self.template {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read template: {}", path.display()))?;
                let template = if matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yml" | "yaml")
                ) {
                    Template::from_yaml_str(&content)?
                } else {
                    Template::from_json_str(&content)?
                };
                Ok(template)
            }
            None => Ok(ctx.synthesize()?.template),
        }
    }

    /// Execute the check command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let template = self.load_template(ctx)?;
        let linter = Linter::new(self.lint_config()?);
        let result = linter.check(&template);

        if ctx.output.is_structured() {
            ctx.output.emit(&result)?;
            return Ok(result.exit_code());
        }

        for finding in &result.findings {
            print_finding(ctx, finding);
        }
        ctx.output.plain(&format!("\n{}", result.summary()));

        Ok(result.exit_code())
    }
}

fn print_finding(ctx: &CommandContext, finding: &Finding) {
    let message = format!(
        "[{}] {}: {}",
        finding.rule_id, finding.location, finding.message
    );
    match finding.severity {
        Severity::Error => ctx.output.error(&message),
        Severity::Warning => ctx.output.warning(&message),
        Severity::Hint => ctx.output.hint(&message),
    }
    if let Some(suggestion) = &finding.suggestion {
        ctx.output.plain(&format!("    {suggestion}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_args_parsing() {
        let args = CheckArgs::try_parse_from(["check", "--skip", "SF001", "--strict"]).unwrap();
        assert_eq!(args.skip_rules, vec!["SF001"]);
        assert!(args.strict);
    }

    #[test]
    fn test_lint_config_merges_flags() {
        let args = CheckArgs::try_parse_from(["check", "--only", "SF003", "--strict"]).unwrap();
        let config = args.lint_config().unwrap();
        assert_eq!(config.only_rules, vec!["SF003"]);
        assert!(config.warnings_as_errors);
    }
}
