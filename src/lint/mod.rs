//! Template linting.
//!
//! Rules run over a synthesized [`Template`] and report configuration that
//! is legal but probably wrong: a website bucket that blocks public reads,
//! stateful resources destroyed with the stack, handlers that read the
//! database without a connect grant, end-of-life runtimes.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackform::lint::{LintConfig, Linter};
//!
//! let linter = Linter::new(LintConfig::default());
//! let result = linter.check(&synthesized.template);
//!
//! for finding in &result.findings {
//!     println!("{finding}");
//! }
//! ```

mod rules;
mod types;

use tracing::debug;

use crate::template::Template;

pub use rules::{builtin_rules, Rule};
pub use types::{Finding, LintConfig, LintResult, Location, RuleCategory, Severity};

/// Runs lint rules over templates.
pub struct Linter {
    config: LintConfig,
    rules: Vec<Box<dyn Rule>>,
}

impl Default for Linter {
    fn default() -> Self {
        Self::new(LintConfig::default())
    }
}

impl Linter {
    /// Linter with every built-in rule.
    pub fn new(config: LintConfig) -> Self {
        Self {
            config,
            rules: builtin_rules(),
        }
    }

    /// Add a custom rule.
    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Ids of the rules this linter would run.
    pub fn active_rules(&self) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| self.config.should_run_rule(r.id(), r.category(), r.severity()))
            .map(|r| r.id())
            .collect()
    }

    /// Lint a template.
    pub fn check(&self, template: &Template) -> LintResult {
        let mut result = LintResult::new();
        result.resources_analyzed = template.resources.len();

        if let Err(err) = template.validate_references() {
            result.add_finding(err.into());
        }

        for rule in &self.rules {
            if !self
                .config
                .should_run_rule(rule.id(), rule.category(), rule.severity())
            {
                continue;
            }
            let findings = rule.check(template);
            debug!(rule = rule.id(), findings = findings.len(), "ran lint rule");
            result.rules_run.push(rule.id().to_string());
            for mut finding in findings {
                if self.config.warnings_as_errors && finding.severity == Severity::Warning {
                    finding.severity = Severity::Error;
                }
                result.add_finding(finding);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Expr, ResourceType, TemplateResource};

    fn template() -> Template {
        let mut template = Template::new();
        template.resources.insert(
            "Fn".into(),
            TemplateResource::new(ResourceType::Function)
                .with_property("Runtime", "nodejs14.x")
                .with_property("Handler", "index.handler"),
        );
        template
    }

    #[test]
    fn test_default_linter_runs_all_rules() {
        let linter = Linter::default();
        assert_eq!(linter.active_rules().len(), 7);
        let result = linter.check(&template());
        assert_eq!(result.rules_run.len(), 7);
        assert_eq!(result.by_rule("SF006").len(), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_warnings_as_errors() {
        let linter = Linter::new(LintConfig::strict());
        let result = linter.check(&template());
        assert!(result.has_errors());
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_skipped_rule_does_not_run() {
        let linter = Linter::new(LintConfig {
            skip_rules: vec!["SF006".into()],
            ..Default::default()
        });
        let result = linter.check(&template());
        assert!(result.by_rule("SF006").is_empty());
        assert!(!result.rules_run.contains(&"SF006".to_string()));
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let mut template = template();
        template.resources["Fn"]
            .properties
            .insert("Role".into(), Expr::get_att("Missing", "Arn"));
        let result = Linter::default().check(&template);
        assert_eq!(result.by_rule("SF000").len(), 1);
        assert!(result.has_errors());
    }
}
