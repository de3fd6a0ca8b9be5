//! The Daily Content Emailer stack.
//!
//! A VPC with a MySQL instance, a private website bucket, three handlers
//! that read the database, and a REST API routing to them:
//!
//! | Method | Path           | Handler                      |
//! |--------|----------------|------------------------------|
//! | POST   | `/`            | `UserRegistrationFunction`   |
//! | POST   | `/email`       | `EmailDeliveryFunction`      |
//! | GET    | `/get-content` | `getContentFromDBFunction`   |

use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::info;

use crate::error::{Error, Result};
use crate::resources::apigateway::{RestApi, RestApiProps};
use crate::resources::ec2::{Vpc, VpcProps};
use crate::resources::lambda::{Code, Function, FunctionProps, Runtime};
use crate::resources::rds::{DatabaseInstance, DatabaseInstanceProps};
use crate::resources::s3::{Bucket, BucketProps};
use crate::stack::{App, Stack, StackProps, SynthesizedStack};
use crate::template::{Expr, RemovalPolicy};

/// Default stack name.
pub const DEFAULT_STACK_NAME: &str = "DailyContentEmailerCdkStack";

/// Most availability zones the emailer network may span.
pub const MAX_NETWORK_AZS: usize = 2;

/// Environment variable carrying the database endpoint address.
pub const DB_ENDPOINT_VAR: &str = "DB_ENDPOINT";

/// Environment variable carrying the database identifier.
pub const DB_NAME_VAR: &str = "DB_NAME";

/// One handler and the route that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Construct id of the function
    pub id: String,
    /// Code directory below the lambdas directory
    pub asset_dir: String,
    /// HTTP method
    pub method: String,
    /// Route path
    pub path: String,
}

impl HandlerSpec {
    /// Create a handler spec.
    pub fn new(id: &str, asset_dir: &str, method: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            asset_dir: asset_dir.to_string(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

/// The three handlers of the emailer.
pub fn default_handlers() -> Vec<HandlerSpec> {
    vec![
        HandlerSpec::new("UserRegistrationFunction", "userRegistration", "POST", "/"),
        HandlerSpec::new("EmailDeliveryFunction", "emailDelivery", "POST", "/email"),
        HandlerSpec::new("getContentFromDBFunction", "getContentFromDB", "GET", "/get-content"),
    ]
}

/// Tunables of the emailer stack.
#[derive(Debug, Clone)]
pub struct EmailerStackProps {
    /// Account/region and description
    pub stack: StackProps,
    /// Availability zones spanned by the VPC
    pub max_azs: usize,
    /// Database instance class
    pub instance_class: String,
    /// Database removal policy
    pub database_removal_policy: RemovalPolicy,
    /// Index document of the website bucket
    pub website_index_document: String,
    /// Whether the bucket grants anonymous reads
    pub public_read_access: bool,
    /// Bucket removal policy
    pub bucket_removal_policy: RemovalPolicy,
    /// Purge objects before deleting the bucket
    pub auto_delete_objects: bool,
    /// Handler runtime
    pub runtime: Runtime,
    /// Directory holding one code directory per handler
    pub lambdas_dir: PathBuf,
    /// Handlers and their routes
    pub handlers: Vec<HandlerSpec>,
    /// API description
    pub api_description: String,
    /// Open the database port to each handler's security group
    pub allow_database_port: bool,
}

impl Default for EmailerStackProps {
    fn default() -> Self {
        Self {
            stack: StackProps::default(),
            max_azs: 2,
            instance_class: "db.m5.large".to_string(),
            database_removal_policy: RemovalPolicy::Delete,
            website_index_document: "index.html".to_string(),
            public_read_access: false,
            bucket_removal_policy: RemovalPolicy::Delete,
            auto_delete_objects: false,
            runtime: Runtime::default(),
            lambdas_dir: PathBuf::from("lambdas"),
            handlers: default_handlers(),
            api_description: "Endpoint for the Daily Content Emailer App".to_string(),
            allow_database_port: true,
        }
    }
}

/// The declared stack with handles to its constructs.
#[derive(Debug)]
pub struct EmailerStack {
    /// The stack
    pub stack: Stack,
    /// Network
    pub vpc: Vpc,
    /// Database
    pub database: DatabaseInstance,
    /// Website bucket
    pub bucket: Bucket,
    /// Handlers, in declaration order
    pub handlers: Vec<Function>,
    /// REST API
    pub api: RestApi,
}

impl EmailerStack {
    /// Declare every construct of the emailer.
    pub fn define(app: &App, id: &str, props: EmailerStackProps) -> Result<Self> {
        if props.max_azs > MAX_NETWORK_AZS {
            return Err(Error::InvalidAzCount {
                requested: props.max_azs,
                message: format!(
                    "the emailer network spans at most {MAX_NETWORK_AZS} availability zones"
                ),
            });
        }

        let mut stack = Stack::new(app, id, props.stack.clone())?;

        let vpc = Vpc::new(
            &mut stack,
            "MyVpc",
            VpcProps {
                max_azs: props.max_azs,
                ..Default::default()
            },
        )?;

        let database = DatabaseInstance::new(
            &mut stack,
            "Instance",
            &vpc,
            DatabaseInstanceProps {
                instance_class: props.instance_class.clone(),
                removal_policy: props.database_removal_policy,
                ..Default::default()
            },
        )?;

        let bucket = Bucket::new(
            &mut stack,
            "WebsiteBucket",
            BucketProps {
                website_index_document: Some(props.website_index_document.clone()),
                public_read_access: props.public_read_access,
                removal_policy: props.bucket_removal_policy,
                auto_delete_objects: props.auto_delete_objects,
                ..Default::default()
            },
        )?;

        let mut handlers = Vec::with_capacity(props.handlers.len());
        for spec in &props.handlers {
            let mut environment = IndexMap::new();
            environment.insert(DB_ENDPOINT_VAR.to_string(), database.endpoint_address());
            environment.insert(DB_NAME_VAR.to_string(), database.instance_identifier());

            let function = Function::new(
                &mut stack,
                &spec.id,
                FunctionProps {
                    runtime: props.runtime.clone(),
                    code: Code::from_asset(props.lambdas_dir.join(&spec.asset_dir)),
                    handler: "index.handler".to_string(),
                    environment,
                    vpc: Some(&vpc),
                    memory_size: None,
                    timeout_secs: None,
                },
            )?;
            handlers.push(function);
        }

        for function in &mut handlers {
            database.grant_connect(&mut stack, function)?;
            if props.allow_database_port {
                database.allow_default_port_from(&mut stack, &*function)?;
            }
        }

        let mut api = RestApi::new(
            &mut stack,
            "DailyContentEmailerAPI",
            RestApiProps {
                description: Some(props.api_description.clone()),
                ..Default::default()
            },
        )?;
        for (spec, function) in props.handlers.iter().zip(&handlers) {
            api.add_method(&mut stack, &spec.method, &spec.path, function)?;
        }
        api.finalize(&mut stack)?;

        info!(
            stack = %stack.name(),
            handlers = handlers.len(),
            routes = api.routes().len(),
            "declared emailer stack"
        );

        Ok(Self {
            stack,
            vpc,
            database,
            bucket,
            handlers,
            api,
        })
    }

    /// Handler by construct id.
    pub fn handler(&self, id: &str) -> Option<&Function> {
        self.handlers.iter().find(|f| f.path().id() == Some(id))
    }

    /// Expected `DB_NAME` value of every handler.
    pub fn db_name(&self) -> Expr {
        self.database.instance_identifier()
    }
}

/// Declare and synthesize the emailer stack.
pub fn synthesize(app: &App, id: &str, props: EmailerStackProps) -> Result<SynthesizedStack> {
    EmailerStack::define(app, id, props)?.stack.synthesize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeKind;
    use crate::resources::lambda::environment_of;
    use crate::stack::Environment;
    use crate::template::ResourceType;
    use std::fs;
    use tempfile::TempDir;

    fn app() -> (TempDir, App) {
        let dir = TempDir::new().unwrap();
        for handler in default_handlers() {
            let code = dir.path().join("lambdas").join(&handler.asset_dir);
            fs::create_dir_all(&code).unwrap();
            fs::write(
                code.join("index.js"),
                format!("exports.handler = async () => ({{ body: '{}' }});", handler.id),
            )
            .unwrap();
        }
        let app = App::new().with_base_dir(dir.path());
        (dir, app)
    }

    #[test]
    fn test_default_resource_counts() {
        let (_dir, app) = app();
        let synth = synthesize(&app, DEFAULT_STACK_NAME, EmailerStackProps::default()).unwrap();
        let template = &synth.template;
        assert_eq!(template.count_of(&ResourceType::Vpc), 1);
        assert_eq!(template.count_of(&ResourceType::DbInstance), 1);
        assert_eq!(template.count_of(&ResourceType::Bucket), 1);
        assert_eq!(template.count_of(&ResourceType::Function), 3);
        assert_eq!(template.count_of(&ResourceType::RestApi), 1);
        assert_eq!(template.count_of(&ResourceType::Method), 3);
        assert_eq!(synth.assets.len(), 3);
    }

    #[test]
    fn test_network_is_capped_at_two_zones() {
        let (_dir, app) = app();
        let pinned = || StackProps {
            env: Environment::new("123456789012", "eu-west-1"),
            description: None,
        };

        let err = synthesize(
            &app,
            DEFAULT_STACK_NAME,
            EmailerStackProps {
                max_azs: 3,
                stack: pinned(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidAzCount { requested: 3, .. }));

        let synth = synthesize(
            &app,
            DEFAULT_STACK_NAME,
            EmailerStackProps {
                stack: pinned(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(synth.template.count_of(&ResourceType::Subnet), 4);
    }

    #[test]
    fn test_handlers_get_db_environment() {
        let (_dir, app) = app();
        let emailer = EmailerStack::define(&app, DEFAULT_STACK_NAME, EmailerStackProps::default()).unwrap();
        for function in &emailer.handlers {
            let resource = emailer.stack.resource(function.logical_id()).unwrap();
            let env = environment_of(resource);
            assert_eq!(env[DB_ENDPOINT_VAR], emailer.database.endpoint_address());
            assert_eq!(env[DB_NAME_VAR], emailer.db_name());
        }
    }

    #[test]
    fn test_every_handler_has_connect_grant() {
        let (_dir, app) = app();
        let emailer = EmailerStack::define(&app, DEFAULT_STACK_NAME, EmailerStackProps::default()).unwrap();
        let db = emailer.database.logical_id().to_string();
        let ids: Vec<String> = emailer.handlers.iter().map(|f| f.logical_id().to_string()).collect();

        let graph = emailer.stack.synthesize().unwrap().graph().unwrap();
        for id in &ids {
            assert!(graph.has_edge(&db, id, EdgeKind::ConnectGrant), "{id}");
            assert!(graph.has_edge(&db, id, EdgeKind::NetworkAccess), "{id}");
        }
    }

    #[test]
    fn test_missing_lambda_directory() {
        let dir = TempDir::new().unwrap();
        let app = App::new().with_base_dir(dir.path());
        let err = synthesize(&app, DEFAULT_STACK_NAME, EmailerStackProps::default()).unwrap_err();
        assert!(matches!(err, crate::Error::AssetNotFound(_)));
    }

    #[test]
    fn test_handler_lookup() {
        let (_dir, app) = app();
        let emailer = EmailerStack::define(&app, DEFAULT_STACK_NAME, EmailerStackProps::default()).unwrap();
        assert!(emailer.handler("EmailDeliveryFunction").is_some());
        assert!(emailer.handler("Nope").is_none());
    }
}
