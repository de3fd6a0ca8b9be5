//! Linter types.
//!
//! Severity levels, rule categories, findings and the linter configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Severity level for lint findings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational hint, not a problem.
    Hint,
    /// Potential issue that should be reviewed.
    #[default]
    Warning,
    /// Definite problem; the stack will not behave as declared.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Hint => write!(f, "hint"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Category of lint rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Settings that contradict each other.
    Consistency,
    /// Data loss on teardown or replacement.
    DataSafety,
    /// Permissions and exposure.
    Security,
    /// End-of-life platforms.
    Deprecation,
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleCategory::Consistency => write!(f, "consistency"),
            RuleCategory::DataSafety => write!(f, "data-safety"),
            RuleCategory::Security => write!(f, "security"),
            RuleCategory::Deprecation => write!(f, "deprecation"),
        }
    }
}

/// Where a finding was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Logical id of the resource.
    pub logical_id: String,
    /// Construct path, when recorded.
    pub construct_path: Option<String>,
}

impl Location {
    /// Location of a resource.
    pub fn resource(logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            construct_path: None,
        }
    }

    /// Add the construct path.
    pub fn with_path(mut self, path: Option<&str>) -> Self {
        self.construct_path = path.map(str::to_string);
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.construct_path {
            Some(path) => write!(f, "{} ({})", self.logical_id, path),
            None => write!(f, "{}", self.logical_id),
        }
    }
}

/// A single finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Rule identifier (e.g. "SF001").
    pub rule_id: String,
    /// Human-readable rule name.
    pub rule_name: String,
    /// Severity level.
    pub severity: Severity,
    /// Category of the rule.
    pub category: RuleCategory,
    /// Description of the finding.
    pub message: String,
    /// Resource the finding is about.
    pub location: Location,
    /// Suggested fix.
    pub suggestion: Option<String>,
}

impl Finding {
    /// Create a new finding.
    pub fn new(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        severity: Severity,
        category: RuleCategory,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            severity,
            category,
            message: message.into(),
            location,
            suggestion: None,
        }
    }

    /// Add a suggestion for fixing the finding.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Check if this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: [{}] {} - {}",
            self.location, self.rule_id, self.severity, self.message
        )?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Result of linting a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintResult {
    /// Findings, in rule order.
    pub findings: Vec<Finding>,
    /// Number of resources analyzed.
    pub resources_analyzed: usize,
    /// Rules that ran.
    pub rules_run: Vec<String>,
}

impl LintResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding.
    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Findings of one rule.
    pub fn by_rule(&self, rule_id: &str) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.rule_id == rule_id).collect()
    }

    /// Findings about one resource.
    pub fn by_resource(&self, logical_id: &str) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.location.logical_id == logical_id)
            .collect()
    }

    /// Findings of one severity.
    pub fn by_severity(&self, severity: Severity) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.severity == severity).collect()
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(Finding::is_error)
    }

    /// Count of findings by severity.
    pub fn count_by_severity(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Process exit code: 1 when any error was found.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_errors())
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let counts = self.count_by_severity();
        let count = |s| counts.get(&s).copied().unwrap_or(0);
        format!(
            "Analyzed {} resource(s) with {} rule(s): {} error(s), {} warning(s), {} hint(s)",
            self.resources_analyzed,
            self.rules_run.len(),
            count(Severity::Error),
            count(Severity::Warning),
            count(Severity::Hint)
        )
    }
}

/// Configuration for the linter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Rules to skip (by rule id).
    pub skip_rules: Vec<String>,
    /// Only run these rules. Empty means run all.
    pub only_rules: Vec<String>,
    /// Categories to skip.
    pub skip_categories: Vec<RuleCategory>,
    /// Minimum severity to report.
    pub min_severity: Option<Severity>,
    /// Report warnings as errors.
    pub warnings_as_errors: bool,
}

impl LintConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a rule should be run.
    pub fn should_run_rule(&self, rule_id: &str, category: RuleCategory, severity: Severity) -> bool {
        if self.skip_rules.iter().any(|r| r == rule_id) {
            return false;
        }
        if !self.only_rules.is_empty() && !self.only_rules.iter().any(|r| r == rule_id) {
            return false;
        }
        if self.skip_categories.contains(&category) {
            return false;
        }
        severity >= self.min_severity.unwrap_or(Severity::Hint)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Treat every warning as an error.
    pub fn strict() -> Self {
        Self {
            warnings_as_errors: true,
            ..Default::default()
        }
    }
}

impl From<Error> for Finding {
    fn from(err: Error) -> Self {
        Finding::new(
            "SF000",
            "invalid-template",
            Severity::Error,
            RuleCategory::Consistency,
            err.to_string(),
            Location::resource("<template>"),
        )
    }
}
