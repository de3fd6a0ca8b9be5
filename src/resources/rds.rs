//! Managed relational database instances.

use tracing::debug;

use crate::construct::{ConstructPath, HIDDEN_FROM_HUMAN_ID, HIDDEN_ID};
use crate::error::{Error, Result};
use crate::graph::{EdgeKind, Relation};
use crate::stack::Stack;
use crate::template::{Expr, RemovalPolicy, ResourceType, TemplateResource};

use super::ec2::{SecurityGroup, Vpc};
use super::iam::PolicyStatement;
use super::{Connectable, Grantable};

/// Characters excluded from generated passwords.
pub const EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

const PASSWORD_LENGTH: u32 = 30;

/// Database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    /// MySQL
    MySql,
    /// MariaDB
    MariaDb,
    /// PostgreSQL
    Postgres,
}

impl DatabaseEngine {
    /// Engine name in the template.
    pub fn name(self) -> &'static str {
        match self {
            DatabaseEngine::MySql => "mysql",
            DatabaseEngine::MariaDb => "mariadb",
            DatabaseEngine::Postgres => "postgres",
        }
    }

    /// Port the engine listens on.
    pub fn default_port(self) -> u16 {
        match self {
            DatabaseEngine::MySql | DatabaseEngine::MariaDb => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }
}

/// Properties of a [`DatabaseInstance`].
#[derive(Debug, Clone)]
pub struct DatabaseInstanceProps {
    /// Engine
    pub engine: DatabaseEngine,
    /// Master user name; the password is generated into a secret
    pub username: String,
    /// Instance class
    pub instance_class: String,
    /// Storage in GiB
    pub allocated_storage: u32,
    /// Applied as both deletion and update-replace policy
    pub removal_policy: RemovalPolicy,
    /// Block deletes at the provider level
    pub deletion_protection: bool,
    /// Optional initial database name
    pub database_name: Option<String>,
}

impl Default for DatabaseInstanceProps {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::MySql,
            username: "admin".to_string(),
            instance_class: "db.m5.large".to_string(),
            allocated_storage: 100,
            removal_policy: RemovalPolicy::Snapshot,
            deletion_protection: false,
            database_name: None,
        }
    }
}

/// A database instance inside a VPC with a generated credential secret.
#[derive(Debug, Clone)]
pub struct DatabaseInstance {
    path: ConstructPath,
    logical_id: String,
    secret_id: String,
    security_group: SecurityGroup,
    engine: DatabaseEngine,
    username: String,
}

impl DatabaseInstance {
    /// Declare a database in the private subnets of `vpc`.
    pub fn new(stack: &mut Stack, id: &str, vpc: &Vpc, props: DatabaseInstanceProps) -> Result<Self> {
        if props.username.is_empty() || !props.username.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::invalid_property(
                id,
                "username",
                "must be a non-empty alphanumeric string",
            ));
        }
        if props.allocated_storage < 20 {
            return Err(Error::invalid_property(
                id,
                "allocated_storage",
                "must be at least 20 GiB",
            ));
        }

        let scope = stack.path().clone();
        let path = stack.add_construct(&scope, id, "aws-rds.DatabaseInstance")?;

        let subnet_group_scope = stack.add_construct(&path, "SubnetGroup", "aws-rds.SubnetGroup")?;
        let subnet_group = stack.add_resource(
            &subnet_group_scope,
            HIDDEN_ID,
            TemplateResource::new(ResourceType::DbSubnetGroup)
                .with_property(
                    "DBSubnetGroupDescription",
                    format!("Subnet group for {id} database"),
                )
                .with_property("SubnetIds", Expr::array(vpc.private_subnet_ids())),
        )?;

        let security_group = SecurityGroup::new(
            stack,
            &path,
            "SecurityGroup",
            vpc,
            &format!("Security group for {id} database"),
        )?;

        let secret_description = format!("Generated by stackform for stack: {}", stack.name());
        let secret_scope = stack.add_construct(&path, "Secret", "aws-rds.DatabaseSecret")?;
        let secret_id = stack.add_resource(
            &secret_scope,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::Secret)
                .with_property("Description", secret_description)
                .with_property(
                    "GenerateSecretString",
                    Expr::object([
                        ("ExcludeCharacters", Expr::str(EXCLUDE_CHARACTERS)),
                        ("GenerateStringKey", Expr::str("password")),
                        ("PasswordLength", Expr::from(PASSWORD_LENGTH)),
                        (
                            "SecretStringTemplate",
                            Expr::str(format!("{{\"username\":\"{}\"}}", props.username)),
                        ),
                    ]),
                )
                .with_removal_policy(RemovalPolicy::Delete),
        )?;

        let mut instance = TemplateResource::new(ResourceType::DbInstance)
            .with_property("AllocatedStorage", props.allocated_storage.to_string())
            .with_property("CopyTagsToSnapshot", true)
            .with_property("DBInstanceClass", props.instance_class.as_str())
            .with_property("DBSubnetGroupName", Expr::reference(&subnet_group))
            .with_property("DeletionProtection", props.deletion_protection)
            .with_property("Engine", props.engine.name())
            .with_property("MasterUsername", resolve_secret(&secret_id, "username"))
            .with_property("MasterUserPassword", resolve_secret(&secret_id, "password"))
            .with_property("PubliclyAccessible", false)
            .with_property("StorageType", "gp2")
            .with_property("VPCSecurityGroups", Expr::array([security_group.group_id()]))
            .with_removal_policy(props.removal_policy);
        if let Some(name) = &props.database_name {
            instance = instance.with_property("DBName", name.as_str());
        }
        let logical_id = stack.add_resource(&path, HIDDEN_FROM_HUMAN_ID, instance)?;

        let attachment_scope = stack.add_construct(
            &secret_scope,
            "Attachment",
            "aws-secretsmanager.SecretTargetAttachment",
        )?;
        stack.add_resource(
            &attachment_scope,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::SecretTargetAttachment)
                .with_property("SecretId", Expr::reference(&secret_id))
                .with_property("TargetId", Expr::reference(&logical_id))
                .with_property("TargetType", "AWS::RDS::DBInstance"),
        )?;

        stack.add_relation(
            Relation::new(vpc.logical_id(), &logical_id, EdgeKind::NetworkPlacement)
                .with_description("private subnets"),
        );

        debug!(
            instance = %logical_id,
            engine = props.engine.name(),
            removal_policy = %props.removal_policy,
            "declared database instance"
        );

        Ok(Self {
            path,
            logical_id,
            secret_id,
            security_group,
            engine: props.engine,
            username: props.username,
        })
    }

    /// Logical id of the instance.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Construct path.
    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    /// Logical id of the credential secret.
    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    /// Engine.
    pub fn engine(&self) -> DatabaseEngine {
        self.engine
    }

    /// Port the instance listens on.
    pub fn port(&self) -> u16 {
        self.engine.default_port()
    }

    /// Hostname of the instance endpoint.
    pub fn endpoint_address(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Endpoint.Address")
    }

    /// Port of the instance endpoint.
    pub fn endpoint_port(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Endpoint.Port")
    }

    /// Instance identifier (`Ref`).
    pub fn instance_identifier(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Immutable resource id used in IAM database ARNs.
    pub fn resource_id(&self) -> Expr {
        Expr::get_att(&self.logical_id, "DbiResourceId")
    }

    /// ARN of the master database user for IAM authentication.
    pub fn db_user_arn(&self) -> Expr {
        Expr::concat(vec![
            Expr::str("arn:"),
            Expr::partition(),
            Expr::str(":rds-db:"),
            Expr::region(),
            Expr::str(":"),
            Expr::account_id(),
            Expr::str(":dbuser:"),
            self.resource_id(),
            Expr::str(format!("/{}", self.username)),
        ])
    }

    /// Grant `grantee` permission to open IAM-authenticated connections.
    pub fn grant_connect(&self, stack: &mut Stack, grantee: &mut impl Grantable) -> Result<()> {
        let statement = PolicyStatement::allow(["rds-db:connect"], [self.db_user_arn()]);
        grantee.add_to_principal_policy(stack, statement)?;
        stack.add_relation(
            Relation::new(&self.logical_id, grantee.grantee_id(), EdgeKind::ConnectGrant)
                .with_description("rds-db:connect"),
        );
        debug!(instance = %self.logical_id, grantee = grantee.grantee_id(), "granted connect");
        Ok(())
    }

    /// Open the engine port to members of `other`'s security group.
    pub fn allow_default_port_from(&self, stack: &mut Stack, other: &impl Connectable) -> Result<()> {
        let source = other.security_group().ok_or_else(|| {
            Error::invalid_property(
                other.connectable_id(),
                "vpc",
                "resource is not placed in a network and has no security group",
            )
        })?;
        let port = self.port();
        self.security_group.add_ingress_from(
            stack,
            source,
            port,
            &format!("from {}:{port}", source.logical_id()),
        )?;
        stack.add_relation(
            Relation::new(&self.logical_id, other.connectable_id(), EdgeKind::NetworkAccess)
                .with_description(format!("tcp/{port}")),
        );
        Ok(())
    }
}

impl Connectable for DatabaseInstance {
    fn connectable_id(&self) -> &str {
        &self.logical_id
    }

    fn security_group(&self) -> Option<&SecurityGroup> {
        Some(&self.security_group)
    }
}

fn resolve_secret(secret_id: &str, key: &str) -> Expr {
    Expr::concat(vec![
        Expr::str("{{resolve:secretsmanager:"),
        Expr::reference(secret_id),
        Expr::str(format!(":SecretString:{key}::}}}}")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ec2::VpcProps;
    use crate::resources::iam::{Role, RoleProps};
    use crate::stack::{App, StackProps};

    fn setup() -> (Stack, Vpc) {
        let mut stack = Stack::new(&App::new(), "DbStack", StackProps::default()).unwrap();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 2, ..Default::default() }).unwrap();
        (stack, vpc)
    }

    #[test]
    fn test_instance_shape() {
        let (mut stack, vpc) = setup();
        let db = DatabaseInstance::new(
            &mut stack,
            "Instance",
            &vpc,
            DatabaseInstanceProps {
                removal_policy: RemovalPolicy::Delete,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(db.logical_id(), "InstanceC1063A87");

        let resource = stack.resource(db.logical_id()).unwrap();
        assert_eq!(resource.property("Engine").and_then(Expr::as_str), Some("mysql"));
        assert_eq!(resource.property("DBInstanceClass").and_then(Expr::as_str), Some("db.m5.large"));
        assert_eq!(resource.deletion_policy, Some(RemovalPolicy::Delete));
        assert_eq!(resource.update_replace_policy, Some(RemovalPolicy::Delete));
        assert!(resource.property("MasterUserPassword").is_some_and(|p| !p.is_literal()));

        let secret = stack.resource(db.secret_id()).unwrap();
        assert_eq!(
            secret
                .property("GenerateSecretString.SecretStringTemplate")
                .and_then(Expr::as_str),
            Some("{\"username\":\"admin\"}")
        );

        let template = stack.template();
        assert_eq!(template.count_of(&ResourceType::DbSubnetGroup), 1);
        assert_eq!(template.count_of(&ResourceType::SecretTargetAttachment), 1);
        assert!(template.validate_references().is_ok());
    }

    #[test]
    fn test_default_removal_policy_is_snapshot() {
        let (mut stack, vpc) = setup();
        let db = DatabaseInstance::new(&mut stack, "Instance", &vpc, DatabaseInstanceProps::default()).unwrap();
        assert_eq!(
            stack.resource(db.logical_id()).unwrap().deletion_policy,
            Some(RemovalPolicy::Snapshot)
        );
    }

    #[test]
    fn test_grant_connect_to_role() {
        let (mut stack, vpc) = setup();
        let db = DatabaseInstance::new(&mut stack, "Instance", &vpc, DatabaseInstanceProps::default()).unwrap();
        let root = stack.path().clone();
        let mut role = Role::new(
            &mut stack,
            &root,
            "Reader",
            RoleProps {
                assumed_by: "lambda.amazonaws.com".into(),
                managed_policies: Vec::new(),
            },
        )
        .unwrap();
        db.grant_connect(&mut stack, &mut role).unwrap();

        let policy = stack.resource(role.default_policy().unwrap()).unwrap();
        let statement = &policy.property("PolicyDocument.Statement").unwrap().items()[0];
        assert_eq!(statement.get("Action"), Some(&Expr::str("rds-db:connect")));
        assert!(statement
            .get("Resource")
            .unwrap()
            .references()
            .contains(&db.logical_id().to_string()));
        assert!(stack
            .relations()
            .iter()
            .any(|r| r.kind == EdgeKind::ConnectGrant && r.to == role.logical_id()));
    }

    #[test]
    fn test_invalid_props() {
        let (mut stack, vpc) = setup();
        let props = DatabaseInstanceProps {
            username: "ad-min".into(),
            ..Default::default()
        };
        assert!(matches!(
            DatabaseInstance::new(&mut stack, "Instance", &vpc, props),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_resolve_secret_shape() {
        let expr = resolve_secret("Secret", "password");
        assert_eq!(expr.references(), vec!["Secret".to_string()]);
        let json = expr.to_json();
        assert_eq!(json["Fn::Join"][1][2], ":SecretString:password::}}");
    }
}
