//! REST APIs fronting functions.
//!
//! Routes are declared with [`RestApi::add_method`]; the deployment and
//! stage are created by [`RestApi::finalize`] once every route is known,
//! because the deployment's logical id embeds a fingerprint of the routes
//! and must change whenever they do.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::construct::{make_logical_id, ConstructPath, HIDDEN_FROM_HUMAN_ID, HIDDEN_ID};
use crate::error::{Error, Result};
use crate::graph::{EdgeKind, Relation};
use crate::stack::Stack;
use crate::template::intrinsic::AWS_URL_SUFFIX;
use crate::template::{Expr, ResourceType, Template, TemplateResource};

use super::lambda::Function;

/// HTTP methods a route may use.
pub const HTTP_METHODS: &[&str] = &["ANY", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// Stage the console's "test" button invokes through.
const TEST_INVOKE_STAGE: &str = "test-invoke-stage";

static PATH_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9._-]+|\{[a-zA-Z0-9._-]+\+?\})$").expect("static regex")
});

/// Properties of a [`RestApi`].
#[derive(Debug, Clone)]
pub struct RestApiProps {
    /// API name; the construct id when `None`
    pub rest_api_name: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Name of the stage created by [`RestApi::finalize`]
    pub stage_name: String,
}

impl Default for RestApiProps {
    fn default() -> Self {
        Self {
            rest_api_name: None,
            description: None,
            stage_name: "prod".to_string(),
        }
    }
}

/// A declared route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// HTTP method
    pub method: String,
    /// Resource path, `/` for the root
    pub path: String,
    /// Logical id of the handler function
    pub handler: String,
    /// Logical id of the method resource
    pub method_id: String,
}

#[derive(Debug, Clone)]
struct ApiNode {
    construct: ConstructPath,
    logical_id: Option<String>,
}

/// A REST API with Lambda proxy integrations.
#[derive(Debug, Clone)]
pub struct RestApi {
    id: String,
    path: ConstructPath,
    logical_id: String,
    stage_name: String,
    nodes: IndexMap<String, ApiNode>,
    routes: Vec<Route>,
    deployment: Option<String>,
    stage: Option<String>,
}

impl RestApi {
    /// Declare an API with only the root resource.
    pub fn new(stack: &mut Stack, id: &str, props: RestApiProps) -> Result<Self> {
        if !PATH_PART.is_match(&props.stage_name) {
            return Err(Error::invalid_property(
                id,
                "stage_name",
                format!("'{}' is not a valid stage name", props.stage_name),
            ));
        }

        let scope = stack.path().clone();
        let path = stack.add_construct(&scope, id, "aws-apigateway.RestApi")?;

        let mut resource = TemplateResource::new(ResourceType::RestApi);
        if let Some(description) = &props.description {
            resource = resource.with_property("Description", description.as_str());
        }
        resource = resource.with_property(
            "Name",
            props.rest_api_name.clone().unwrap_or_else(|| id.to_string()),
        );
        let logical_id = stack.add_resource(&path, HIDDEN_FROM_HUMAN_ID, resource)?;

        let root = stack.add_construct(&path, HIDDEN_ID, "aws-apigateway.RootResource")?;
        let mut nodes = IndexMap::new();
        nodes.insert(
            "/".to_string(),
            ApiNode {
                construct: root,
                logical_id: None,
            },
        );

        Ok(Self {
            id: id.to_string(),
            path,
            logical_id,
            stage_name: props.stage_name,
            nodes,
            routes: Vec::new(),
            deployment: None,
            stage: None,
        })
    }

    /// Logical id of the API.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// `Ref` of the API id.
    pub fn rest_api_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Id of the root resource.
    pub fn root_resource_id(&self) -> Expr {
        Expr::get_att(&self.logical_id, "RootResourceId")
    }

    /// Stage name.
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Routes declared so far.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Logical id of the deployment, once finalized.
    pub fn deployment(&self) -> Option<&str> {
        self.deployment.as_deref()
    }

    /// Invoke URL of the stage, once finalized.
    pub fn url(&self) -> Option<Expr> {
        self.stage.as_ref().map(|stage| {
            Expr::concat(vec![
                Expr::str("https://"),
                self.rest_api_id(),
                Expr::str(".execute-api."),
                Expr::region(),
                Expr::str("."),
                Expr::reference(AWS_URL_SUFFIX),
                Expr::str("/"),
                Expr::reference(stage),
                Expr::str("/"),
            ])
        })
    }

    /// Ensure resources exist for every segment of `path`.
    pub fn add_resource(&mut self, stack: &mut Stack, path: &str) -> Result<()> {
        self.resource_for_path(stack, path).map(|_| ())
    }

    fn resource_for_path(&mut self, stack: &mut Stack, path: &str) -> Result<ApiNode> {
        let normalized = normalize_path(path)?;
        if let Some(node) = self.nodes.get(&normalized) {
            return Ok(node.clone());
        }

        let mut current = "/".to_string();
        for part in normalized.trim_start_matches('/').split('/') {
            let next = if current == "/" {
                format!("/{part}")
            } else {
                format!("{current}/{part}")
            };
            if !self.nodes.contains_key(&next) {
                let parent = self
                    .nodes
                    .get(&current)
                    .cloned()
                    .ok_or_else(|| Error::ConstructNotFound(current.clone()))?;
                let parent_id = match &parent.logical_id {
                    Some(id) => Expr::reference(id),
                    None => self.root_resource_id(),
                };
                let construct = stack.add_construct(&parent.construct, part, "aws-apigateway.Resource")?;
                let logical_id = stack.add_resource(
                    &construct,
                    HIDDEN_FROM_HUMAN_ID,
                    TemplateResource::new(ResourceType::ApiResource)
                        .with_property("ParentId", parent_id)
                        .with_property("PathPart", part)
                        .with_property("RestApiId", self.rest_api_id()),
                )?;
                debug!(api = %self.logical_id, path = %next, resource = %logical_id, "added api resource");
                self.nodes.insert(
                    next.clone(),
                    ApiNode {
                        construct,
                        logical_id: Some(logical_id),
                    },
                );
            }
            current = next;
        }

        self.nodes
            .get(&normalized)
            .cloned()
            .ok_or(Error::ConstructNotFound(normalized))
    }

    /// Route `method path` to `handler` through a Lambda proxy integration.
    ///
    /// Returns the logical id of the method resource.
    pub fn add_method(
        &mut self,
        stack: &mut Stack,
        method: &str,
        path: &str,
        handler: &Function,
    ) -> Result<String> {
        if self.deployment.is_some() {
            return Err(Error::invalid_property(
                &self.id,
                "methods",
                "routes cannot be added after the API is finalized",
            ));
        }
        let method = method.to_ascii_uppercase();
        if !HTTP_METHODS.contains(&method.as_str()) {
            return Err(Error::invalid_property(
                &self.id,
                "method",
                format!("'{method}' is not an HTTP method"),
            ));
        }
        let path = normalize_path(path)?;
        if self.routes.iter().any(|r| r.method == method && r.path == path) {
            return Err(Error::DuplicateRoute { method, path });
        }

        let node = self.resource_for_path(stack, &path)?;
        let resource_id = match &node.logical_id {
            Some(id) => Expr::reference(id),
            None => self.root_resource_id(),
        };
        let scope = stack.add_construct(&node.construct, &method, "aws-apigateway.Method")?;

        let method_id = stack.add_resource(
            &scope,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::Method)
                .with_property("AuthorizationType", "NONE")
                .with_property("HttpMethod", method.as_str())
                .with_property(
                    "Integration",
                    Expr::object([
                        ("IntegrationHttpMethod", Expr::str("POST")),
                        ("Type", Expr::str("AWS_PROXY")),
                        ("Uri", invocation_uri(handler)),
                    ]),
                )
                .with_property("ResourceId", resource_id)
                .with_property("RestApiId", self.rest_api_id()),
        )?;

        for (id, stage) in [
            ("ApiPermission", self.stage_name.as_str()),
            ("ApiPermission.Test", TEST_INVOKE_STAGE),
        ] {
            stack.add_resource(
                &scope,
                id,
                TemplateResource::new(ResourceType::Permission)
                    .with_property("Action", "lambda:InvokeFunction")
                    .with_property("FunctionName", handler.function_arn())
                    .with_property("Principal", "apigateway.amazonaws.com")
                    .with_property("SourceArn", self.execute_api_arn(stage, &method, &path)),
            )?;
        }

        stack.add_relation(
            Relation::new(handler.logical_id(), &method_id, EdgeKind::Integration)
                .with_description(format!("{method} {path}")),
        );
        debug!(api = %self.logical_id, method = %method, path = %path, handler = handler.logical_id(), "added route");

        self.routes.push(Route {
            method,
            path,
            handler: handler.logical_id().to_string(),
            method_id: method_id.clone(),
        });
        Ok(method_id)
    }

    fn execute_api_arn(&self, stage: &str, method: &str, path: &str) -> Expr {
        Expr::concat(vec![
            Expr::str("arn:"),
            Expr::partition(),
            Expr::str(":execute-api:"),
            Expr::region(),
            Expr::str(":"),
            Expr::account_id(),
            Expr::str(":"),
            self.rest_api_id(),
            Expr::str(format!("/{stage}/{method}{path}")),
        ])
    }

    /// Create the deployment, the stage and the endpoint output.
    ///
    /// Returns the invoke URL.
    pub fn finalize(&mut self, stack: &mut Stack) -> Result<Expr> {
        if self.deployment.is_some() {
            return Err(Error::invalid_property(&self.id, "deployment", "API is already finalized"));
        }
        if self.routes.is_empty() {
            return Err(Error::invalid_property(
                &self.id,
                "methods",
                "the REST API does not contain any methods",
            ));
        }

        let mut members: Vec<String> = self
            .nodes
            .values()
            .filter_map(|n| n.logical_id.clone())
            .collect();
        members.extend(self.routes.iter().map(|r| r.method_id.clone()));

        let mut fingerprint = md5::Context::new();
        for id in &members {
            if let Some(resource) = stack.resource(id) {
                fingerprint.consume(id.as_bytes());
                fingerprint.consume(serde_json::to_vec(&resource.properties)?);
            }
        }
        let fingerprint = format!("{:x}", fingerprint.compute());

        let relative = self
            .path
            .relative_to(stack.path())
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec![self.id.clone()]);
        let mut components = relative.clone();
        components.extend(["Deployment".to_string(), HIDDEN_FROM_HUMAN_ID.to_string()]);
        let deployment_id = format!("{}{fingerprint}", make_logical_id(&components)?);

        let deployment_scope = stack.add_construct(&self.path, "Deployment", "aws-apigateway.Deployment")?;
        let mut deployment = TemplateResource::new(ResourceType::Deployment)
            .with_property("Description", "Automatically created by the RestApi construct")
            .with_property("RestApiId", self.rest_api_id());
        for id in &members {
            deployment.add_depends_on(id);
        }
        let deployment_id = stack.add_resource_with_logical_id(
            &deployment_scope,
            HIDDEN_FROM_HUMAN_ID,
            deployment_id,
            deployment,
        )?;

        let stage_scope = stack.add_construct(
            &self.path,
            &format!("DeploymentStage.{}", self.stage_name),
            "aws-apigateway.Stage",
        )?;
        let stage_id = stack.add_resource(
            &stage_scope,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::Stage)
                .with_property("DeploymentId", Expr::reference(&deployment_id))
                .with_property("RestApiId", self.rest_api_id())
                .with_property("StageName", self.stage_name.as_str()),
        )?;

        self.deployment = Some(deployment_id);
        self.stage = Some(stage_id);
        let url = self
            .url()
            .ok_or_else(|| Error::ConstructNotFound(stage_scope.to_string()))?;

        let mut output_components = relative;
        output_components.push("Endpoint".to_string());
        stack.add_output(&make_logical_id(&output_components)?, url.clone(), None)?;

        info!(api = %self.logical_id, routes = self.routes.len(), "finalized rest api");
        Ok(url)
    }
}

fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::invalid_property(
            "RestApi",
            "path",
            format!("'{path}' must start with '/'"),
        ));
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    for part in trimmed.trim_start_matches('/').split('/') {
        if !PATH_PART.is_match(part) {
            return Err(Error::invalid_property(
                "RestApi",
                "path",
                format!("'{part}' is not a valid path part"),
            ));
        }
    }
    Ok(trimmed.to_string())
}

fn invocation_uri(handler: &Function) -> Expr {
    Expr::concat(vec![
        Expr::str("arn:"),
        Expr::partition(),
        Expr::str(":apigateway:"),
        Expr::region(),
        Expr::str(":lambda:path/2015-03-31/functions/"),
        handler.function_arn(),
        Expr::str("/invocations"),
    ])
}

/// A route recovered from a synthesized template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    /// HTTP method
    pub method: String,
    /// Resource path
    pub path: String,
    /// Logical id of the integrated function, if any
    pub handler: Option<String>,
    /// Logical id of the method resource
    pub method_id: String,
}

/// Recover the routes of every API in a template.
pub fn routes_from_template(template: &Template) -> Vec<RouteInfo> {
    template
        .resources_of_type(&ResourceType::Method)
        .filter_map(|(logical_id, method)| {
            let http_method = method.property("HttpMethod")?.as_str()?.to_string();
            let path = resolve_path(template, method.property("ResourceId")?, 0)?;
            let handler = method
                .property("Integration.Uri")
                .and_then(|uri| integrated_function(template, uri));
            Some(RouteInfo {
                method: http_method,
                path,
                handler,
                method_id: logical_id.clone(),
            })
        })
        .collect()
}

const MAX_PATH_DEPTH: usize = 32;

fn resolve_path(template: &Template, resource_id: &Expr, depth: usize) -> Option<String> {
    if depth > MAX_PATH_DEPTH {
        return None;
    }
    match resource_id {
        Expr::GetAtt(_, attr) if attr == "RootResourceId" => Some("/".to_string()),
        Expr::Ref(id) => {
            let resource = template.resource(id)?;
            let part = resource.property("PathPart")?.as_str()?;
            let parent = resolve_path(template, resource.property("ParentId")?, depth + 1)?;
            Some(if parent == "/" {
                format!("/{part}")
            } else {
                format!("{parent}/{part}")
            })
        }
        _ => None,
    }
}

fn integrated_function(template: &Template, uri: &Expr) -> Option<String> {
    match uri {
        Expr::GetAtt(id, attr) if attr == "Arn" => template
            .resource(id)
            .filter(|r| r.resource_type == ResourceType::Function)
            .map(|_| id.clone()),
        Expr::Join(_, parts) | Expr::Array(parts) => {
            parts.iter().find_map(|p| integrated_function(template, p))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::lambda::{Code, FunctionProps};
    use crate::stack::{App, StackProps};

    fn setup() -> (Stack, Function, Function) {
        let mut stack = Stack::new(&App::new(), "ApiStack", StackProps::default()).unwrap();
        let a = Function::new(&mut stack, "A", FunctionProps::new(Code::from_inline("a"))).unwrap();
        let b = Function::new(&mut stack, "B", FunctionProps::new(Code::from_inline("b"))).unwrap();
        (stack, a, b)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("/email/").unwrap(), "/email");
        assert_eq!(normalize_path("/users/{id}").unwrap(), "/users/{id}");
        assert!(normalize_path("email").is_err());
        assert!(normalize_path("/bad path").is_err());
    }

    #[test]
    fn test_routes_and_resources() {
        let (mut stack, a, b) = setup();
        let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
        api.add_method(&mut stack, "post", "/", &a).unwrap();
        api.add_method(&mut stack, "GET", "/v1/items", &b).unwrap();
        api.finalize(&mut stack).unwrap();

        let template = stack.template();
        assert_eq!(template.count_of(&ResourceType::Method), 2);
        assert_eq!(template.count_of(&ResourceType::ApiResource), 2);
        assert_eq!(template.count_of(&ResourceType::Permission), 4);
        assert_eq!(template.count_of(&ResourceType::Deployment), 1);
        assert_eq!(template.count_of(&ResourceType::Stage), 1);
        assert_eq!(template.outputs.len(), 1);

        let routes = routes_from_template(&template);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].method, "POST");
        assert_eq!(routes[0].path, "/");
        assert_eq!(routes[0].handler.as_deref(), Some(a.logical_id()));
        assert_eq!(routes[1].path, "/v1/items");
        assert_eq!(routes[1].handler.as_deref(), Some(b.logical_id()));
        assert!(template.validate_references().is_ok());
    }

    #[test]
    fn test_duplicate_route() {
        let (mut stack, a, b) = setup();
        let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
        api.add_method(&mut stack, "POST", "/email", &a).unwrap();
        let err = api.add_method(&mut stack, "POST", "/email/", &b).unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { .. }));
        assert!(api.add_method(&mut stack, "GET", "/email", &b).is_ok());
    }

    #[test]
    fn test_invalid_method() {
        let (mut stack, a, _) = setup();
        let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
        assert!(api.add_method(&mut stack, "FETCH", "/", &a).is_err());
    }

    #[test]
    fn test_finalize_rules() {
        let (mut stack, a, _) = setup();
        let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
        assert!(api.finalize(&mut stack).is_err());
        api.add_method(&mut stack, "GET", "/", &a).unwrap();
        api.finalize(&mut stack).unwrap();
        assert!(api.finalize(&mut stack).is_err());
        assert!(api.add_method(&mut stack, "POST", "/", &a).is_err());
        assert!(api.deployment().unwrap().starts_with("ApiDeployment"));
    }

    #[test]
    fn test_deployment_id_tracks_routes() {
        let deployment_for = |path: &str| {
            let (mut stack, a, _) = setup();
            let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
            api.add_method(&mut stack, "GET", path, &a).unwrap();
            api.finalize(&mut stack).unwrap();
            api.deployment().unwrap().to_string()
        };
        assert_eq!(deployment_for("/one"), deployment_for("/one"));
        assert_ne!(deployment_for("/one"), deployment_for("/two"));
    }

    #[test]
    fn test_permission_source_arns() {
        let (mut stack, a, _) = setup();
        let mut api = RestApi::new(&mut stack, "Api", RestApiProps::default()).unwrap();
        api.add_method(&mut stack, "POST", "/email", &a).unwrap();
        let template = stack.template();
        let arns: Vec<String> = template
            .resources_of_type(&ResourceType::Permission)
            .filter_map(|(_, p)| {
                let arn = p.property("SourceArn")?.to_json();
                arn["Fn::Join"][1].as_array()?.last()?.as_str().map(str::to_string)
            })
            .collect();
        assert_eq!(arns, vec!["/prod/POST/email", "/test-invoke-stage/POST/email"]);
    }
}
