//! Template diffs.
//!
//! [`TemplateDiff::between`] compares two templates resource by resource and
//! reports which resources are added, removed or modified, which property
//! changes force a replacement, and how outputs change. The text rendering
//! uses `similar` for a unified diff of changed property values.

use std::fmt;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::template::{RemovalPolicy, ResourceType, Template, TemplateResource};

/// Kind of change to a resource or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present only in the new template
    Added,
    /// Present only in the old template
    Removed,
    /// Present in both with different content
    Modified,
}

impl ChangeKind {
    fn symbol(self) -> &'static str {
        match self {
            ChangeKind::Added => "[+]",
            ChangeKind::Removed => "[-]",
            ChangeKind::Modified => "[~]",
        }
    }
}

/// A change to one top-level property (or policy) of a resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    /// Property name, or `DeletionPolicy` / `DependsOn` / `Type`
    pub name: String,
    /// Old rendered value
    pub old: Option<Value>,
    /// New rendered value
    pub new: Option<Value>,
    /// Whether the change replaces the physical resource
    pub requires_replacement: bool,
}

/// A change to one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceChange {
    /// Logical id
    pub logical_id: String,
    /// Type in the new template (old template when removed)
    pub resource_type: ResourceType,
    /// What happened
    pub kind: ChangeKind,
    /// Property-level changes, empty unless modified
    pub property_changes: Vec<PropertyChange>,
    /// Deletion policy the resource leaves with when removed or replaced
    pub deletion_policy: RemovalPolicy,
}

impl ResourceChange {
    /// Whether the physical resource is replaced.
    pub fn requires_replacement(&self) -> bool {
        self.property_changes.iter().any(|p| p.requires_replacement)
    }

    /// Whether data may be lost: a stateful resource that is removed or
    /// replaced under a `Delete` policy.
    pub fn is_destructive(&self) -> bool {
        let leaves = self.kind == ChangeKind::Removed || self.requires_replacement();
        leaves && self.resource_type.is_stateful() && self.deletion_policy.is_destructive()
    }
}

/// A change to one output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputChange {
    /// Output name
    pub name: String,
    /// What happened
    pub kind: ChangeKind,
    /// Old rendered value
    pub old: Option<Value>,
    /// New rendered value
    pub new: Option<Value>,
}

/// Summary counts of a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    /// Resources added
    pub added: usize,
    /// Resources removed
    pub removed: usize,
    /// Resources modified in place or replaced
    pub modified: usize,
    /// Resources replaced
    pub replaced: usize,
    /// Outputs changed
    pub outputs: usize,
}

impl DiffSummary {
    /// Whether anything changed.
    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.modified + self.outputs > 0
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change ({} replaced), {} to remove, {} output change(s)",
            self.added, self.modified, self.replaced, self.removed, self.outputs
        )
    }
}

/// Differences between two templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateDiff {
    /// Resource changes: new-template order first, then removals
    pub resources: Vec<ResourceChange>,
    /// Output changes
    pub outputs: Vec<OutputChange>,
}

impl TemplateDiff {
    /// Compare `old` against `new`.
    pub fn between(old: &Template, new: &Template) -> Self {
        let mut resources = Vec::new();

        for (logical_id, resource) in &new.resources {
            match old.resources.get(logical_id) {
                None => resources.push(ResourceChange {
                    logical_id: logical_id.clone(),
                    resource_type: resource.resource_type.clone(),
                    kind: ChangeKind::Added,
                    property_changes: Vec::new(),
                    deletion_policy: resource.effective_deletion_policy(),
                }),
                Some(previous) => {
                    let property_changes = compare_resources(previous, resource);
                    if !property_changes.is_empty() {
                        resources.push(ResourceChange {
                            logical_id: logical_id.clone(),
                            resource_type: resource.resource_type.clone(),
                            kind: ChangeKind::Modified,
                            property_changes,
                            deletion_policy: previous
                                .update_replace_policy
                                .unwrap_or(RemovalPolicy::Delete),
                        });
                    }
                }
            }
        }
        for (logical_id, resource) in &old.resources {
            if !new.resources.contains_key(logical_id) {
                resources.push(ResourceChange {
                    logical_id: logical_id.clone(),
                    resource_type: resource.resource_type.clone(),
                    kind: ChangeKind::Removed,
                    property_changes: Vec::new(),
                    deletion_policy: resource.effective_deletion_policy(),
                });
            }
        }

        let mut outputs = Vec::new();
        for (name, output) in &new.outputs {
            let new_value = output.value.to_json();
            match old.outputs.get(name) {
                None => outputs.push(OutputChange {
                    name: name.clone(),
                    kind: ChangeKind::Added,
                    old: None,
                    new: Some(new_value),
                }),
                Some(previous) => {
                    let old_value = previous.value.to_json();
                    if old_value != new_value {
                        outputs.push(OutputChange {
                            name: name.clone(),
                            kind: ChangeKind::Modified,
                            old: Some(old_value),
                            new: Some(new_value),
                        });
                    }
                }
            }
        }
        for (name, output) in &old.outputs {
            if !new.outputs.contains_key(name) {
                outputs.push(OutputChange {
                    name: name.clone(),
                    kind: ChangeKind::Removed,
                    old: Some(output.value.to_json()),
                    new: None,
                });
            }
        }

        Self { resources, outputs }
    }

    /// Whether the templates differ in resources or outputs.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.outputs.is_empty()
    }

    /// Change for one logical id.
    pub fn change(&self, logical_id: &str) -> Option<&ResourceChange> {
        self.resources.iter().find(|c| c.logical_id == logical_id)
    }

    /// Changes of one kind.
    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ResourceChange> {
        self.resources.iter().filter(move |c| c.kind == kind)
    }

    /// Modified resources whose physical resource is replaced.
    pub fn replacements(&self) -> impl Iterator<Item = &ResourceChange> {
        self.of_kind(ChangeKind::Modified)
            .filter(|c| c.requires_replacement())
    }

    /// Changes that may lose data.
    pub fn destructive_changes(&self) -> impl Iterator<Item = &ResourceChange> {
        self.resources.iter().filter(|c| c.is_destructive())
    }

    /// Summary counts.
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.of_kind(ChangeKind::Added).count(),
            removed: self.of_kind(ChangeKind::Removed).count(),
            modified: self.of_kind(ChangeKind::Modified).count(),
            replaced: self.replacements().count(),
            outputs: self.outputs.len(),
        }
    }

    /// Human rendering, colored when `use_color` is set.
    pub fn render(&self, use_color: bool) -> String {
        if self.is_empty() {
            return if use_color {
                "There were no differences".bright_black().to_string()
            } else {
                "There were no differences".to_string()
            };
        }

        let mut out = String::new();
        if !self.resources.is_empty() {
            out.push_str(&heading("Resources", use_color));
            for change in &self.resources {
                out.push_str(&render_resource(change, use_color));
            }
        }
        if !self.outputs.is_empty() {
            out.push_str(&heading("Outputs", use_color));
            for change in &self.outputs {
                let line = format!("{} {}\n", change.kind.symbol(), change.name);
                out.push_str(&paint(&line, change.kind, use_color));
            }
        }
        out.push('\n');
        out.push_str(&self.summary().to_string());
        out.push('\n');
        out
    }
}

fn compare_resources(old: &TemplateResource, new: &TemplateResource) -> Vec<PropertyChange> {
    let mut changes = Vec::new();

    if old.resource_type != new.resource_type {
        changes.push(PropertyChange {
            name: "Type".to_string(),
            old: Some(Value::String(old.resource_type.as_str().to_string())),
            new: Some(Value::String(new.resource_type.as_str().to_string())),
            requires_replacement: true,
        });
    }

    let replacing = new.resource_type.replacement_properties();
    for (name, value) in &new.properties {
        let new_value = value.to_json();
        let old_value = old.properties.get(name).map(|v| v.to_json());
        if old_value.as_ref() != Some(&new_value) {
            changes.push(PropertyChange {
                name: name.clone(),
                old: old_value,
                new: Some(new_value),
                requires_replacement: replacing.contains(&name.as_str()),
            });
        }
    }
    for (name, value) in &old.properties {
        if !new.properties.contains_key(name) {
            changes.push(PropertyChange {
                name: name.clone(),
                old: Some(value.to_json()),
                new: None,
                requires_replacement: replacing.contains(&name.as_str()),
            });
        }
    }

    if old.deletion_policy != new.deletion_policy {
        changes.push(PropertyChange {
            name: "DeletionPolicy".to_string(),
            old: old.deletion_policy.map(|p| Value::String(p.to_string())),
            new: new.deletion_policy.map(|p| Value::String(p.to_string())),
            requires_replacement: false,
        });
    }
    if old.depends_on != new.depends_on {
        changes.push(PropertyChange {
            name: "DependsOn".to_string(),
            old: Some(Value::from(old.depends_on.clone())),
            new: Some(Value::from(new.depends_on.clone())),
            requires_replacement: false,
        });
    }
    changes
}

fn heading(title: &str, use_color: bool) -> String {
    if use_color {
        format!("{}\n", title.bold().underline())
    } else {
        format!("{title}\n")
    }
}

fn paint(text: &str, kind: ChangeKind, use_color: bool) -> String {
    if !use_color {
        return text.to_string();
    }
    match kind {
        ChangeKind::Added => text.green().to_string(),
        ChangeKind::Removed => text.red().to_string(),
        ChangeKind::Modified => text.yellow().to_string(),
    }
}

fn render_resource(change: &ResourceChange, use_color: bool) -> String {
    let mut out = paint(
        &format!(
            "{} {} {}\n",
            change.kind.symbol(),
            change.resource_type,
            change.logical_id
        ),
        change.kind,
        use_color,
    );
    if change.is_destructive() {
        let warning = format!(
            "    ! data in {} is lost ({} policy)\n",
            change.logical_id, change.deletion_policy
        );
        out.push_str(&if use_color {
            warning.red().bold().to_string()
        } else {
            warning
        });
    }
    for property in &change.property_changes {
        let marker = if property.requires_replacement {
            " (requires replacement)"
        } else {
            ""
        };
        let line = format!("    └─ [~] {}{}\n", property.name, marker);
        out.push_str(&if use_color && property.requires_replacement {
            line.red().to_string()
        } else {
            line
        });
        out.push_str(&value_diff(
            property.old.as_ref(),
            property.new.as_ref(),
            use_color,
        ));
    }
    out
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(v) => {
            let mut text = serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string());
            text.push('\n');
            text
        }
    }
}

/// Line diff of two rendered JSON values, indented under a property.
fn value_diff(old: Option<&Value>, new: Option<&Value>, use_color: bool) -> String {
    let before = render_value(old);
    let after = render_value(new);
    let diff = TextDiff::from_lines(&before, &after);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let (sign, kind) = match change.tag() {
            ChangeTag::Delete => ("-", Some(ChangeKind::Removed)),
            ChangeTag::Insert => ("+", Some(ChangeKind::Added)),
            ChangeTag::Equal => (" ", None),
        };
        let line = format!("        {sign} {}", change.value());
        let line = if line.ends_with('\n') { line } else { line + "\n" };
        match kind {
            Some(kind) => out.push_str(&paint(&line, kind, use_color)),
            None => out.push_str(&line),
        }
    }
    out
}

/// Unified diff of two templates' pretty JSON.
pub fn unified_template_diff(old: &Template, new: &Template, context_lines: usize) -> String {
    let before = serde_json::to_string_pretty(old).unwrap_or_default();
    let after = serde_json::to_string_pretty(new).unwrap_or_default();
    let diff = TextDiff::from_lines(&before, &after);
    let text = diff
        .unified_diff()
        .context_radius(context_lines)
        .header("deployed", "synthesized")
        .to_string();
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Expr, Output};

    fn base() -> Template {
        let mut template = Template::new();
        template.resources.insert(
            "Db".into(),
            TemplateResource::new(ResourceType::DbInstance)
                .with_property("Engine", "mysql")
                .with_property("DBInstanceClass", "db.m5.large")
                .with_removal_policy(RemovalPolicy::Delete),
        );
        template.resources.insert(
            "Fn".into(),
            TemplateResource::new(ResourceType::Function)
                .with_property("Handler", "index.handler")
                .with_property("Endpoint", Expr::get_att("Db", "Endpoint.Address")),
        );
        template.outputs.insert(
            "Url".into(),
            Output {
                value: Expr::str("https://example"),
                description: None,
            },
        );
        template
    }

    #[test]
    fn test_identical_templates() {
        let diff = TemplateDiff::between(&base(), &base());
        assert!(diff.is_empty());
        assert!(!diff.summary().has_changes());
        assert_eq!(diff.render(false), "There were no differences");
    }

    #[test]
    fn test_added_and_removed() {
        let old = base();
        let mut new = base();
        new.resources.shift_remove("Fn");
        new.resources.insert(
            "Bucket".into(),
            TemplateResource::new(ResourceType::Bucket),
        );

        let diff = TemplateDiff::between(&old, &new);
        assert_eq!(diff.change("Bucket").unwrap().kind, ChangeKind::Added);
        assert_eq!(diff.change("Fn").unwrap().kind, ChangeKind::Removed);
        let summary = diff.summary();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.modified, 0);
    }

    #[test]
    fn test_in_place_update() {
        let old = base();
        let mut new = base();
        new.resources["Db"]
            .properties
            .insert("DBInstanceClass".into(), Expr::str("db.t3.micro"));

        let diff = TemplateDiff::between(&old, &new);
        let change = diff.change("Db").unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
        assert!(!change.requires_replacement());
        assert!(!change.is_destructive());
        assert_eq!(change.property_changes[0].name, "DBInstanceClass");
    }

    #[test]
    fn test_replacement_is_destructive_for_stateful_delete() {
        let old = base();
        let mut new = base();
        new.resources["Db"]
            .properties
            .insert("Engine".into(), Expr::str("postgres"));

        let diff = TemplateDiff::between(&old, &new);
        let change = diff.change("Db").unwrap();
        assert!(change.requires_replacement());
        assert!(change.is_destructive());
        assert_eq!(diff.replacements().count(), 1);
        assert_eq!(diff.destructive_changes().count(), 1);

        let text = diff.render(false);
        assert!(text.contains("Engine (requires replacement)"));
        assert!(text.contains("- \"mysql\""));
        assert!(text.contains("+ \"postgres\""));
    }

    #[test]
    fn test_retained_replacement_is_not_destructive() {
        let mut old = base();
        old.resources["Db"].apply_removal_policy(RemovalPolicy::Retain);
        let mut new = old.clone();
        new.resources["Db"]
            .properties
            .insert("Engine".into(), Expr::str("postgres"));

        let diff = TemplateDiff::between(&old, &new);
        assert!(diff.change("Db").unwrap().requires_replacement());
        assert!(!diff.change("Db").unwrap().is_destructive());
    }

    #[test]
    fn test_policy_and_output_changes() {
        let old = base();
        let mut new = base();
        new.resources["Db"].deletion_policy = Some(RemovalPolicy::Snapshot);
        new.outputs.shift_remove("Url");

        let diff = TemplateDiff::between(&old, &new);
        let change = diff.change("Db").unwrap();
        assert_eq!(change.property_changes[0].name, "DeletionPolicy");
        assert_eq!(diff.outputs[0].kind, ChangeKind::Removed);
    }

    #[test]
    fn test_unified_template_diff() {
        let old = base();
        let mut new = base();
        new.resources["Fn"]
            .properties
            .insert("Handler".into(), Expr::str("main.handler"));
        let text = unified_template_diff(&old, &new, 1);
        assert!(text.contains("--- deployed"));
        assert!(text.contains("+++ synthesized"));
        assert!(text
            .lines()
            .any(|line| line.starts_with('+') && line.contains("\"Handler\": \"main.handler\"")));
    }
}
