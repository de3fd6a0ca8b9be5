//! IAM roles and policy statements.

use serde_json::Value;
use tracing::debug;

use crate::construct::{ConstructPath, HIDDEN_FROM_HUMAN_ID};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::template::{Expr, ResourceType, TemplateResource};

use super::Grantable;

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Allow
    Allow,
    /// Deny
    Deny,
}

impl Effect {
    fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// A single policy statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    /// Allow or deny
    pub effect: Effect,
    /// Actions, e.g. `rds-db:connect`
    pub actions: Vec<String>,
    /// Resource ARNs
    pub resources: Vec<Expr>,
}

impl PolicyStatement {
    /// Allow `actions` on `resources`.
    pub fn allow<S: Into<String>>(
        actions: impl IntoIterator<Item = S>,
        resources: impl IntoIterator<Item = Expr>,
    ) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().collect(),
        }
    }

    /// Render in policy-document form. Singletons collapse to scalars.
    pub fn to_expr(&self) -> Expr {
        let action = match self.actions.as_slice() {
            [single] => Expr::str(single),
            many => Expr::array(many.iter().map(Expr::str)),
        };
        let resource = match self.resources.as_slice() {
            [single] => single.clone(),
            many => Expr::array(many.iter().cloned()),
        };
        Expr::object([
            ("Action", action),
            ("Effect", Expr::str(self.effect.as_str())),
            ("Resource", resource),
        ])
    }
}

/// ARN of an AWS managed policy.
pub fn managed_policy_arn(name: &str) -> Expr {
    Expr::concat(vec![
        Expr::str("arn:"),
        Expr::partition(),
        Expr::str(format!(":iam::aws:policy/{name}")),
    ])
}

/// Properties of a [`Role`].
#[derive(Debug, Clone)]
pub struct RoleProps {
    /// Service principal allowed to assume the role
    pub assumed_by: String,
    /// Managed policy names, e.g. `service-role/AWSLambdaBasicExecutionRole`
    pub managed_policies: Vec<String>,
}

/// An IAM role with a lazily created default policy.
#[derive(Debug, Clone)]
pub struct Role {
    path: ConstructPath,
    logical_id: String,
    default_policy: Option<String>,
}

impl Role {
    /// Declare a role under `scope`.
    pub fn new(stack: &mut Stack, scope: &ConstructPath, id: &str, props: RoleProps) -> Result<Self> {
        let path = stack.add_construct(scope, id, "aws-iam.Role")?;

        let assume = Expr::object([
            (
                "Statement",
                Expr::array([Expr::object([
                    ("Action", Expr::str("sts:AssumeRole")),
                    ("Effect", Expr::str("Allow")),
                    (
                        "Principal",
                        Expr::object([("Service", Expr::str(props.assumed_by.as_str()))]),
                    ),
                ])]),
            ),
            ("Version", Expr::str(POLICY_VERSION)),
        ]);

        let mut resource =
            TemplateResource::new(ResourceType::Role).with_property("AssumeRolePolicyDocument", assume);
        if !props.managed_policies.is_empty() {
            resource = resource.with_property(
                "ManagedPolicyArns",
                Expr::array(props.managed_policies.iter().map(|p| managed_policy_arn(p))),
            );
        }

        let logical_id = stack.add_resource(&path, HIDDEN_FROM_HUMAN_ID, resource)?;
        Ok(Self {
            path,
            logical_id,
            default_policy: None,
        })
    }

    /// Logical id of the role resource.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// `Fn::GetAtt` of the role ARN.
    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }

    /// Logical id of the default policy, once a statement has been added.
    pub fn default_policy(&self) -> Option<&str> {
        self.default_policy.as_deref()
    }

    /// Append a statement to the role's default policy, creating it on
    /// first use. Returns the policy's logical id.
    pub fn add_to_policy(&mut self, stack: &mut Stack, statement: PolicyStatement) -> Result<String> {
        let policy_id = match &self.default_policy {
            Some(id) => id.clone(),
            None => {
                let scope = stack.add_construct(&self.path, "DefaultPolicy", "aws-iam.Policy")?;
                let policy_id = stack.add_resource(
                    &scope,
                    HIDDEN_FROM_HUMAN_ID,
                    TemplateResource::new(ResourceType::Policy),
                )?;
                let resource = stack
                    .resource_mut(&policy_id)
                    .ok_or_else(|| Error::ConstructNotFound(scope.to_string()))?;
                resource.properties.insert(
                    "PolicyDocument".to_string(),
                    Expr::object([
                        ("Statement", Expr::array([])),
                        ("Version", Expr::str(POLICY_VERSION)),
                    ]),
                );
                resource
                    .properties
                    .insert("PolicyName".to_string(), Expr::str(policy_id.as_str()));
                resource.properties.insert(
                    "Roles".to_string(),
                    Expr::array([Expr::reference(self.logical_id.as_str())]),
                );
                self.default_policy = Some(policy_id.clone());
                policy_id
            }
        };

        let rendered = statement.to_expr();
        if let Some(Expr::Array(statements)) = stack
            .resource_mut(&policy_id)
            .and_then(|r| r.properties.get_mut("PolicyDocument"))
            .and_then(|doc| doc.get_mut("Statement"))
        {
            if !statements.contains(&rendered) {
                statements.push(rendered);
            }
        }

        debug!(role = %self.logical_id, policy = %policy_id, actions = ?statement.actions, "added policy statement");
        Ok(policy_id)
    }
}

impl Grantable for Role {
    fn grantee_id(&self) -> &str {
        &self.logical_id
    }

    fn add_to_principal_policy(&mut self, stack: &mut Stack, statement: PolicyStatement) -> Result<()> {
        self.add_to_policy(stack, statement).map(|_| ())
    }
}

/// Actions granted by statements of a policy resource.
pub fn statement_actions(policy: &TemplateResource) -> Vec<String> {
    policy
        .property("PolicyDocument.Statement")
        .map(Expr::items)
        .unwrap_or_default()
        .iter()
        .flat_map(|statement| match statement.get("Action") {
            Some(Expr::Literal(Value::String(action))) => vec![action.clone()],
            Some(Expr::Array(actions)) => actions
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{App, StackProps};

    fn role(stack: &mut Stack) -> Role {
        let root = stack.path().clone();
        Role::new(
            stack,
            &root,
            "ServiceRole",
            RoleProps {
                assumed_by: "lambda.amazonaws.com".into(),
                managed_policies: vec!["service-role/AWSLambdaBasicExecutionRole".into()],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_role_shape() {
        let mut stack = Stack::new(&App::new(), "Test", StackProps::default()).unwrap();
        let role = role(&mut stack);
        let resource = stack.resource(role.logical_id()).unwrap();
        assert_eq!(resource.resource_type, ResourceType::Role);
        assert_eq!(
            resource
                .property("AssumeRolePolicyDocument.Version")
                .and_then(Expr::as_str),
            Some(POLICY_VERSION)
        );
        assert_eq!(resource.property("ManagedPolicyArns").unwrap().items().len(), 1);
        assert!(role.default_policy().is_none());
    }

    #[test]
    fn test_default_policy_created_once() {
        let mut stack = Stack::new(&App::new(), "Test", StackProps::default()).unwrap();
        let mut role = role(&mut stack);
        let statement = PolicyStatement::allow(["rds-db:connect"], [Expr::str("arn:db")]);
        let first = role.add_to_policy(&mut stack, statement.clone()).unwrap();
        let second = role.add_to_policy(&mut stack, statement).unwrap();
        assert_eq!(first, second);

        let policy = stack.resource(&first).unwrap();
        assert_eq!(policy.resource_type, ResourceType::Policy);
        assert_eq!(statement_actions(policy), vec!["rds-db:connect".to_string()]);
        assert_eq!(
            policy.property("Roles").unwrap().items(),
            &[Expr::reference(role.logical_id())]
        );
    }

    #[test]
    fn test_statement_rendering() {
        let single = PolicyStatement::allow(["s3:GetObject"], [Expr::str("arn:bucket/*")]).to_expr();
        assert_eq!(single.get("Action"), Some(&Expr::str("s3:GetObject")));
        let many = PolicyStatement::allow(["a", "b"], [Expr::str("x"), Expr::str("y")]).to_expr();
        assert_eq!(many.get("Action").unwrap().items().len(), 2);
        assert_eq!(many.get("Resource").unwrap().items().len(), 2);
    }
}
