//! Built-in lint rules.
//!
//! | Rule    | Name                  | Severity |
//! |---------|-----------------------|----------|
//! | `SF001` | website-not-public    | warning  |
//! | `SF002` | destructive-removal   | warning  |
//! | `SF003` | missing-connect-grant | error    |
//! | `SF004` | literal-db-name       | warning  |
//! | `SF005` | bucket-not-emptied    | warning  |
//! | `SF006` | deprecated-runtime    | warning  |
//! | `SF007` | open-route            | hint     |

use crate::resources::iam::statement_actions;
use crate::resources::lambda::{environment_of, is_deprecated_runtime};
use crate::resources::s3::{auto_deletes_objects, blocks_public_access};
use crate::template::{Expr, RemovalPolicy, ResourceType, Template, TemplateResource};

use super::types::{Finding, Location, RuleCategory, Severity};

const CONNECT_ACTION: &str = "rds-db:connect";

/// A check over a whole template.
pub trait Rule: Send + Sync {
    /// Rule identifier.
    fn id(&self) -> &'static str;

    /// Short kebab-case name.
    fn name(&self) -> &'static str;

    /// Severity of the findings this rule raises.
    fn severity(&self) -> Severity;

    /// Rule category.
    fn category(&self) -> RuleCategory;

    /// Run the rule.
    fn check(&self, template: &Template) -> Vec<Finding>;

    /// Build a finding about one resource.
    fn finding(&self, logical_id: &str, resource: &TemplateResource, message: String) -> Finding {
        Finding::new(
            self.id(),
            self.name(),
            self.severity(),
            self.category(),
            message,
            Location::resource(logical_id).with_path(resource.construct_path()),
        )
    }
}

/// All built-in rules, in id order.
pub fn builtin_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(WebsiteNotPublic),
        Box::new(DestructiveRemoval),
        Box::new(MissingConnectGrant),
        Box::new(LiteralDbName),
        Box::new(BucketNotEmptied),
        Box::new(DeprecatedRuntime),
        Box::new(OpenRoute),
    ]
}

/// SF001: a bucket configured as a website whose public access is blocked
/// cannot serve its pages.
pub struct WebsiteNotPublic;

impl Rule for WebsiteNotPublic {
    fn id(&self) -> &'static str {
        "SF001"
    }
    fn name(&self) -> &'static str {
        "website-not-public"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Consistency
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources_of_type(&ResourceType::Bucket)
            .filter(|(_, r)| r.property("WebsiteConfiguration").is_some() && blocks_public_access(r))
            .map(|(id, r)| {
                let index = r
                    .property("WebsiteConfiguration.IndexDocument")
                    .and_then(Expr::as_str)
                    .unwrap_or("index document");
                self.finding(
                    id,
                    r,
                    format!("bucket serves '{index}' as a website but blocks all public access"),
                )
                .with_suggestion("enable public read access or front the bucket with a CDN")
            })
            .collect()
    }
}

/// SF002: stateful resources deleted with the stack.
pub struct DestructiveRemoval;

impl Rule for DestructiveRemoval {
    fn id(&self) -> &'static str {
        "SF002"
    }
    fn name(&self) -> &'static str {
        "destructive-removal"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::DataSafety
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources
            .iter()
            .filter(|(_, r)| {
                r.resource_type.is_stateful()
                    && r.effective_deletion_policy() == RemovalPolicy::Delete
            })
            .map(|(id, r)| {
                self.finding(
                    id,
                    r,
                    format!(
                        "{} is deleted irrecoverably when the stack is destroyed",
                        r.resource_type
                    ),
                )
                .with_suggestion("use removal policy Retain or Snapshot for production data")
            })
            .collect()
    }
}

/// SF003: a function reads database settings from its environment but its
/// role holds no `rds-db:connect` statement on that database.
pub struct MissingConnectGrant;

impl MissingConnectGrant {
    /// Logical id of the role a function runs as.
    fn role_of(function: &TemplateResource) -> Option<String> {
        function.property("Role")?.references().into_iter().next()
    }

    /// Whether some policy attached to `role` grants connect on `db`.
    fn has_grant(template: &Template, role: &str, db: &str) -> bool {
        template
            .resources_of_type(&ResourceType::Policy)
            .filter(|(_, policy)| {
                policy
                    .property("Roles")
                    .map(|roles| roles.references().iter().any(|r| r == role))
                    .unwrap_or(false)
            })
            .any(|(_, policy)| {
                statement_actions(policy).iter().any(|a| a == CONNECT_ACTION)
                    && policy
                        .property("PolicyDocument.Statement")
                        .map(Expr::items)
                        .unwrap_or_default()
                        .iter()
                        .any(|statement| {
                            let grants_connect = match statement.get("Action") {
                                Some(Expr::Array(actions)) => {
                                    actions.iter().any(|a| a.as_str() == Some(CONNECT_ACTION))
                                }
                                Some(action) => action.as_str() == Some(CONNECT_ACTION),
                                None => false,
                            };
                            grants_connect
                                && statement
                                    .get("Resource")
                                    .is_some_and(|r| r.references().iter().any(|id| id == db))
                        })
            })
    }
}

impl Rule for MissingConnectGrant {
    fn id(&self) -> &'static str {
        "SF003"
    }
    fn name(&self) -> &'static str {
        "missing-connect-grant"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (id, function) in template.resources_of_type(&ResourceType::Function) {
            let mut databases: Vec<String> = Vec::new();
            for value in environment_of(function).values() {
                for target in value.references() {
                    let is_db = template
                        .resource(&target)
                        .is_some_and(|r| r.resource_type == ResourceType::DbInstance);
                    if is_db && !databases.contains(&target) {
                        databases.push(target);
                    }
                }
            }
            if databases.is_empty() {
                continue;
            }
            let role = Self::role_of(function);
            for db in databases {
                let granted = role
                    .as_deref()
                    .is_some_and(|role| Self::has_grant(template, role, &db));
                if !granted {
                    findings.push(
                        self.finding(
                            id,
                            function,
                            format!(
                                "environment references database '{db}' but the execution role has no {CONNECT_ACTION} grant on it"
                            ),
                        )
                        .with_suggestion("call grant_connect for this function"),
                    );
                }
            }
        }
        findings
    }
}

/// SF004: `DB_NAME` duplicated as a string literal instead of referencing
/// the database.
pub struct LiteralDbName;

impl Rule for LiteralDbName {
    fn id(&self) -> &'static str {
        "SF004"
    }
    fn name(&self) -> &'static str {
        "literal-db-name"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Consistency
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources_of_type(&ResourceType::Function)
            .filter_map(|(id, function)| {
                let env = environment_of(function);
                let literal = env.get("DB_NAME")?.as_str()?.to_string();
                Some(
                    self.finding(
                        id,
                        function,
                        format!("DB_NAME is the literal '{literal}' and can drift from the database"),
                    )
                    .with_suggestion("reference the database instance instead"),
                )
            })
            .collect()
    }
}

/// SF005: a bucket deleted with the stack but not emptied first; deleting a
/// non-empty bucket fails.
pub struct BucketNotEmptied;

impl Rule for BucketNotEmptied {
    fn id(&self) -> &'static str {
        "SF005"
    }
    fn name(&self) -> &'static str {
        "bucket-not-emptied"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::DataSafety
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources_of_type(&ResourceType::Bucket)
            .filter(|(_, r)| {
                r.effective_deletion_policy() == RemovalPolicy::Delete && !auto_deletes_objects(r)
            })
            .map(|(id, r)| {
                self.finding(
                    id,
                    r,
                    "bucket has removal policy Delete but objects are not purged; teardown fails while it holds objects"
                        .to_string(),
                )
                .with_suggestion("enable auto_delete_objects")
            })
            .collect()
    }
}

/// SF006: end-of-life function runtime.
pub struct DeprecatedRuntime;

impl Rule for DeprecatedRuntime {
    fn id(&self) -> &'static str {
        "SF006"
    }
    fn name(&self) -> &'static str {
        "deprecated-runtime"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Deprecation
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources_of_type(&ResourceType::Function)
            .filter_map(|(id, function)| {
                let runtime = function.property("Runtime")?.as_str()?;
                is_deprecated_runtime(runtime).then(|| {
                    self.finding(id, function, format!("runtime {runtime} is end-of-life"))
                        .with_suggestion("set the runtime to a supported version such as nodejs20.x")
                })
            })
            .collect()
    }
}

/// SF007: API methods reachable without authorization.
pub struct OpenRoute;

impl Rule for OpenRoute {
    fn id(&self) -> &'static str {
        "SF007"
    }
    fn name(&self) -> &'static str {
        "open-route"
    }
    fn severity(&self) -> Severity {
        Severity::Hint
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }

    fn check(&self, template: &Template) -> Vec<Finding> {
        template
            .resources_of_type(&ResourceType::Method)
            .filter(|(_, method)| {
                method.property("AuthorizationType").and_then(Expr::as_str) == Some("NONE")
                    && method.property("HttpMethod").and_then(Expr::as_str) != Some("OPTIONS")
            })
            .map(|(id, method)| {
                let verb = method
                    .property("HttpMethod")
                    .and_then(Expr::as_str)
                    .unwrap_or("ANY");
                self.finding(id, method, format!("{verb} method requires no authorization"))
            })
            .collect()
    }
}
