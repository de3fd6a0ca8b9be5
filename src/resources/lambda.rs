//! Serverless functions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::assets::Asset;
use crate::construct::{ConstructPath, HIDDEN_FROM_HUMAN_ID};
use crate::error::{Error, Result};
use crate::graph::{EdgeKind, Relation};
use crate::stack::Stack;
use crate::template::{Expr, ResourceType, TemplateResource};

use super::ec2::{SecurityGroup, Vpc};
use super::iam::{PolicyStatement, Role, RoleProps};
use super::{Connectable, Grantable};

/// Bucket the bootstrap process creates for file assets.
pub const ASSET_BUCKET: &str = "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}";

/// Metadata key recording where an asset is staged.
pub const ASSET_PATH_METADATA_KEY: &str = "aws:asset:path";

/// Metadata key recording which property the asset feeds.
pub const ASSET_PROPERTY_METADATA_KEY: &str = "aws:asset:property";

static ENV_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("static regex"));

/// Variables the platform sets itself.
const RESERVED_ENV_KEYS: &[&str] = &[
    "_HANDLER",
    "AWS_REGION",
    "AWS_EXECUTION_ENV",
    "AWS_LAMBDA_FUNCTION_NAME",
    "AWS_LAMBDA_FUNCTION_MEMORY_SIZE",
    "AWS_LAMBDA_FUNCTION_VERSION",
    "AWS_LAMBDA_LOG_GROUP_NAME",
    "AWS_LAMBDA_LOG_STREAM_NAME",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "LAMBDA_TASK_ROOT",
    "LAMBDA_RUNTIME_DIR",
];

/// Runtimes past end of support.
const DEPRECATED_RUNTIMES: &[&str] = &[
    "nodejs",
    "nodejs4.3",
    "nodejs6.10",
    "nodejs8.10",
    "nodejs10.x",
    "nodejs12.x",
    "nodejs14.x",
    "nodejs16.x",
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "dotnetcore1.0",
    "dotnetcore2.0",
    "dotnetcore2.1",
    "dotnetcore3.1",
    "ruby2.5",
    "ruby2.7",
    "go1.x",
    "java8",
];

const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";
const VPC_ACCESS_POLICY: &str = "service-role/AWSLambdaVPCAccessExecutionRole";

/// A function runtime identifier such as `nodejs14.x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Runtime(String);

impl Runtime {
    /// Node.js 14.
    pub fn nodejs_14_x() -> Self {
        Self("nodejs14.x".to_string())
    }

    /// Node.js 20.
    pub fn nodejs_20_x() -> Self {
        Self("nodejs20.x".to_string())
    }

    /// Python 3.12.
    pub fn python_3_12() -> Self {
        Self("python3.12".to_string())
    }

    /// Runtime name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Language family, e.g. `nodejs` or `python`.
    pub fn family(&self) -> &str {
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Whether the runtime is past end of support.
    pub fn is_deprecated(&self) -> bool {
        is_deprecated_runtime(&self.0)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::nodejs_14_x()
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::invalid_property("Function", "runtime", format!("'{s}' is not a runtime name")))
        }
    }
}

/// Whether a runtime name is past end of support.
pub fn is_deprecated_runtime(name: &str) -> bool {
    DEPRECATED_RUNTIMES.contains(&name)
}

/// Where a function's code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    /// A local directory or file, resolved against the app's base directory
    Asset(PathBuf),
    /// Source inlined into the template
    Inline(String),
}

impl Code {
    /// Code from a local path.
    pub fn from_asset(path: impl Into<PathBuf>) -> Self {
        Code::Asset(path.into())
    }

    /// Inline source code.
    pub fn from_inline(source: impl Into<String>) -> Self {
        Code::Inline(source.into())
    }
}

/// Properties of a [`Function`].
#[derive(Debug, Clone)]
pub struct FunctionProps<'a> {
    /// Runtime
    pub runtime: Runtime,
    /// Code source
    pub code: Code,
    /// Entry point, e.g. `index.handler`
    pub handler: String,
    /// Environment variables
    pub environment: IndexMap<String, Expr>,
    /// Network placement; private subnets of this VPC
    pub vpc: Option<&'a Vpc>,
    /// Memory in MiB
    pub memory_size: Option<u32>,
    /// Timeout in seconds
    pub timeout_secs: Option<u32>,
}

impl<'a> FunctionProps<'a> {
    /// Props with the default runtime and `index.handler`.
    pub fn new(code: Code) -> Self {
        Self {
            runtime: Runtime::default(),
            code,
            handler: "index.handler".to_string(),
            environment: IndexMap::new(),
            vpc: None,
            memory_size: None,
            timeout_secs: None,
        }
    }
}

/// A function with its execution role.
#[derive(Debug, Clone)]
pub struct Function {
    path: ConstructPath,
    logical_id: String,
    role: Role,
    security_group: Option<SecurityGroup>,
    asset: Option<Asset>,
}

impl Function {
    /// Declare a function.
    pub fn new(stack: &mut Stack, id: &str, props: FunctionProps<'_>) -> Result<Self> {
        for key in props.environment.keys() {
            validate_env_key(id, key)?;
        }
        if let Some(memory) = props.memory_size {
            if !(128..=10_240).contains(&memory) {
                return Err(Error::invalid_property(id, "memory_size", "must be between 128 and 10240 MiB"));
            }
        }
        if let Some(timeout) = props.timeout_secs {
            if !(1..=900).contains(&timeout) {
                return Err(Error::invalid_property(id, "timeout", "must be between 1 and 900 seconds"));
            }
        }

        let asset = match &props.code {
            Code::Asset(path) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    stack.base_dir().join(path)
                };
                Some(Asset::from_path(resolved)?)
            }
            Code::Inline(_) => None,
        };

        let scope = stack.path().clone();
        let path = stack.add_construct(&scope, id, "aws-lambda.Function")?;

        let mut managed_policies = vec![BASIC_EXECUTION_POLICY.to_string()];
        if props.vpc.is_some() {
            managed_policies.push(VPC_ACCESS_POLICY.to_string());
        }
        let role = Role::new(
            stack,
            &path,
            "ServiceRole",
            RoleProps {
                assumed_by: "lambda.amazonaws.com".to_string(),
                managed_policies,
            },
        )?;

        let security_group = match props.vpc {
            Some(vpc) => {
                let description = format!("Automatic security group for Lambda Function {}{id}", stack.name());
                Some(SecurityGroup::new(stack, &path, "SecurityGroup", vpc, &description)?)
            }
            None => None,
        };

        let code = match (&props.code, &asset) {
            (Code::Inline(source), _) => Expr::object([("ZipFile", Expr::str(source.as_str()))]),
            (Code::Asset(_), Some(asset)) => Expr::object([
                ("S3Bucket", Expr::Sub(ASSET_BUCKET.to_string())),
                ("S3Key", Expr::str(asset.object_key())),
            ]),
            (Code::Asset(path), None) => return Err(Error::AssetNotFound(path.clone())),
        };

        let mut resource = TemplateResource::new(ResourceType::Function)
            .with_property("Code", code)
            .with_property("Role", role.arn());
        if !props.environment.is_empty() {
            resource = resource.with_property(
                "Environment",
                Expr::object([("Variables", Expr::Object(props.environment.clone()))]),
            );
        }
        resource = resource
            .with_property("Handler", props.handler.as_str())
            .with_property("Runtime", props.runtime.name());
        if let Some(memory) = props.memory_size {
            resource = resource.with_property("MemorySize", memory);
        }
        if let Some(timeout) = props.timeout_secs {
            resource = resource.with_property("Timeout", timeout);
        }
        if let (Some(vpc), Some(sg)) = (props.vpc, &security_group) {
            resource = resource.with_property(
                "VpcConfig",
                Expr::object([
                    ("SecurityGroupIds", Expr::array([sg.group_id()])),
                    ("SubnetIds", Expr::array(vpc.private_subnet_ids())),
                ]),
            );
        }
        resource.add_depends_on(role.logical_id());
        if let Some(asset) = &asset {
            resource.metadata.insert(
                ASSET_PATH_METADATA_KEY.to_string(),
                Value::String(asset.staging_name()),
            );
            resource.metadata.insert(
                ASSET_PROPERTY_METADATA_KEY.to_string(),
                Value::String("Code".to_string()),
            );
        }

        let logical_id = stack.add_resource(&path, HIDDEN_FROM_HUMAN_ID, resource)?;

        if let Some(vpc) = props.vpc {
            stack.add_relation(
                Relation::new(vpc.logical_id(), &logical_id, EdgeKind::NetworkPlacement)
                    .with_description("private subnets"),
            );
        }
        if let Some(asset) = &asset {
            stack.add_asset(asset.clone());
        }

        debug!(
            function = %logical_id,
            runtime = %props.runtime,
            in_vpc = props.vpc.is_some(),
            "declared function"
        );

        Ok(Self {
            path,
            logical_id,
            role,
            security_group,
            asset,
        })
    }

    /// Logical id of the function.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Construct path.
    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    /// Execution role.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Code asset, if the code comes from disk.
    pub fn asset(&self) -> Option<&Asset> {
        self.asset.as_ref()
    }

    /// Function ARN.
    pub fn function_arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }

    /// Function name (`Ref`).
    pub fn function_name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Set an environment variable after construction.
    pub fn add_environment(&self, stack: &mut Stack, key: &str, value: Expr) -> Result<()> {
        validate_env_key(&self.logical_id, key)?;
        let resource = stack
            .resource_mut(&self.logical_id)
            .ok_or_else(|| Error::ConstructNotFound(self.path.to_string()))?;
        let environment = resource
            .properties
            .entry("Environment".to_string())
            .or_insert_with(|| Expr::object([("Variables", Expr::Object(IndexMap::new()))]));
        match environment.get_mut("Variables") {
            Some(Expr::Object(vars)) => {
                vars.insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(Error::invalid_property(
                &self.logical_id,
                "Environment",
                "Variables is not an object",
            )),
        }
    }
}

impl Grantable for Function {
    fn grantee_id(&self) -> &str {
        &self.logical_id
    }

    fn add_to_principal_policy(&mut self, stack: &mut Stack, statement: PolicyStatement) -> Result<()> {
        let policy = self.role.add_to_policy(stack, statement)?;
        if let Some(resource) = stack.resource_mut(&self.logical_id) {
            resource.depends_on.retain(|d| d != &policy);
            resource.depends_on.insert(0, policy);
        }
        Ok(())
    }
}

impl Connectable for Function {
    fn connectable_id(&self) -> &str {
        &self.logical_id
    }

    fn security_group(&self) -> Option<&SecurityGroup> {
        self.security_group.as_ref()
    }
}

fn validate_env_key(resource: &str, key: &str) -> Result<()> {
    if !ENV_KEY.is_match(key) {
        return Err(Error::invalid_property(
            resource,
            "environment",
            format!("'{key}' is not a valid variable name"),
        ));
    }
    if RESERVED_ENV_KEYS.contains(&key) {
        return Err(Error::invalid_property(
            resource,
            "environment",
            format!("'{key}' is reserved by the runtime"),
        ));
    }
    Ok(())
}

/// Environment variables of a function resource.
pub fn environment_of(resource: &TemplateResource) -> IndexMap<String, Expr> {
    match resource.property("Environment.Variables") {
        Some(Expr::Object(vars)) => vars.clone(),
        _ => IndexMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ec2::VpcProps;
    use crate::stack::{App, StackProps};
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Stack) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lambdas/hello")).unwrap();
        fs::write(
            dir.path().join("lambdas/hello/index.js"),
            "exports.handler = async () => ({ statusCode: 200 });",
        )
        .unwrap();
        let app = App::new().with_base_dir(dir.path());
        let stack = Stack::new(&app, "FnStack", StackProps::default()).unwrap();
        (dir, stack)
    }

    #[test]
    fn test_runtime() {
        let runtime = Runtime::default();
        assert_eq!(runtime.name(), "nodejs14.x");
        assert_eq!(runtime.family(), "nodejs");
        assert!(runtime.is_deprecated());
        assert!(!Runtime::nodejs_20_x().is_deprecated());
        assert_eq!("python3.12".parse::<Runtime>().unwrap(), Runtime::python_3_12());
        assert!("no runtime".parse::<Runtime>().is_err());
    }

    #[test]
    fn test_asset_function() {
        let (_dir, mut stack) = fixture();
        let mut props = FunctionProps::new(Code::from_asset("lambdas/hello"));
        props.environment.insert("GREETING".into(), Expr::str("hi"));
        let function = Function::new(&mut stack, "Hello", props).unwrap();

        let resource = stack.resource(function.logical_id()).unwrap();
        let key = resource.property("Code.S3Key").and_then(Expr::as_str).unwrap();
        assert_eq!(key, function.asset().unwrap().object_key());
        assert_eq!(resource.property("Handler").and_then(Expr::as_str), Some("index.handler"));
        assert_eq!(environment_of(resource)["GREETING"], Expr::str("hi"));
        assert!(resource.depends_on.contains(&function.role().logical_id().to_string()));
        assert!(resource.property("VpcConfig").is_none());
    }

    #[test]
    fn test_missing_asset() {
        let (_dir, mut stack) = fixture();
        let err = Function::new(&mut stack, "Ghost", FunctionProps::new(Code::from_asset("lambdas/ghost")))
            .unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));
    }

    #[test]
    fn test_vpc_function() {
        let (_dir, mut stack) = fixture();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 2, ..Default::default() }).unwrap();
        let mut props = FunctionProps::new(Code::from_inline("exports.handler = () => {}"));
        props.vpc = Some(&vpc);
        let function = Function::new(&mut stack, "InVpc", props).unwrap();

        let resource = stack.resource(function.logical_id()).unwrap();
        assert_eq!(resource.property("VpcConfig.SubnetIds").unwrap().items().len(), 2);
        assert!(function.security_group().is_some());
        let role = stack.resource(function.role().logical_id()).unwrap();
        assert_eq!(role.property("ManagedPolicyArns").unwrap().items().len(), 2);
        assert!(stack
            .relations()
            .iter()
            .any(|r| r.kind == EdgeKind::NetworkPlacement && r.to == function.logical_id()));
    }

    #[test]
    fn test_environment_validation() {
        let (_dir, mut stack) = fixture();
        let mut props = FunctionProps::new(Code::from_inline("x"));
        props.environment.insert("AWS_REGION".into(), Expr::str("x"));
        assert!(Function::new(&mut stack, "Bad", props).is_err());

        let function = Function::new(&mut stack, "Good", FunctionProps::new(Code::from_inline("x"))).unwrap();
        function.add_environment(&mut stack, "DB_NAME", Expr::str("db")).unwrap();
        assert!(function.add_environment(&mut stack, "1BAD", Expr::str("x")).is_err());
        let vars = environment_of(stack.resource(function.logical_id()).unwrap());
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_grant_adds_policy_dependency() {
        let (_dir, mut stack) = fixture();
        let mut function =
            Function::new(&mut stack, "Granted", FunctionProps::new(Code::from_inline("x"))).unwrap();
        function
            .add_to_principal_policy(
                &mut stack,
                PolicyStatement::allow(["s3:GetObject"], [Expr::str("arn:aws:s3:::b/*")]),
            )
            .unwrap();
        let policy = function.role().default_policy().unwrap().to_string();
        let resource = stack.resource(function.logical_id()).unwrap();
        assert_eq!(resource.depends_on[0], policy);
        assert_eq!(resource.depends_on.len(), 2);
    }
}
