//! Apps, stacks and synthesis.
//!
//! An [`App`] is the parent scope of every stack: it fixes where code
//! assets are read from and where the cloud assembly is written. A
//! [`Stack`] owns its construct tree outright; resource builders add nodes
//! to it and record typed relations. [`Stack::synthesize`] freezes the tree
//! into an immutable [`SynthesizedStack`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assets::Asset;
use crate::construct::{make_logical_id, validate_construct_id, ConstructNode, ConstructPath, NodeKind};
use crate::error::{Error, Result};
use crate::graph::{Relation, ResourceGraph};
use crate::template::{Expr, Output, Template, TemplateResource, PATH_METADATA_KEY};

/// Stack names accepted by CloudFormation.
static STACK_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("static regex"));

const MAX_STACK_NAME_LEN: usize = 128;

/// AZs assumed when the stack does not pin a region.
const ENV_AGNOSTIC_AZ_COUNT: usize = 2;

/// Target account and region of a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Account id, `None` for env-agnostic
    pub account: Option<String>,
    /// Region, `None` for env-agnostic
    pub region: Option<String>,
}

impl Environment {
    /// Environment pinned to an account and region.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// Whether neither account nor region is set.
    pub fn is_agnostic(&self) -> bool {
        self.account.is_none() && self.region.is_none()
    }

    /// `aws://account/region` form used in the assembly manifest.
    pub fn uri(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

/// Optional deployment properties of a stack.
#[derive(Debug, Clone, Default)]
pub struct StackProps {
    /// Target account/region
    pub env: Environment,
    /// Template description
    pub description: Option<String>,
}

/// Parent scope of all stacks.
#[derive(Debug, Clone)]
pub struct App {
    base_dir: PathBuf,
    outdir: PathBuf,
    context: IndexMap<String, Value>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// App rooted at the current directory writing to `cdk.out`.
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            outdir: PathBuf::from("cdk.out"),
            context: IndexMap::new(),
        }
    }

    /// Directory code-asset paths are resolved against.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Cloud assembly output directory.
    pub fn with_outdir(mut self, outdir: impl Into<PathBuf>) -> Self {
        self.outdir = outdir.into();
        self
    }

    /// Set a context value.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Base directory for assets.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Output directory.
    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Context value by key.
    pub fn context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}

/// Validate a stack name.
pub fn validate_stack_name(name: &str) -> Result<()> {
    if name.len() > MAX_STACK_NAME_LEN {
        return Err(Error::InvalidStackName {
            name: name.to_string(),
            message: format!("must be at most {MAX_STACK_NAME_LEN} characters"),
        });
    }
    if !STACK_NAME.is_match(name) {
        return Err(Error::InvalidStackName {
            name: name.to_string(),
            message: "must match ^[A-Za-z][A-Za-z0-9-]*$".to_string(),
        });
    }
    Ok(())
}

/// A stack under construction.
#[derive(Debug)]
pub struct Stack {
    name: String,
    props: StackProps,
    base_dir: PathBuf,
    context: IndexMap<String, Value>,
    tree: ConstructNode,
    logical_ids: HashMap<String, ConstructPath>,
    relations: Vec<Relation>,
    outputs: IndexMap<String, Output>,
    assets: Vec<Asset>,
}

impl Stack {
    /// Create a stack under an app.
    pub fn new(app: &App, id: &str, props: StackProps) -> Result<Self> {
        validate_stack_name(id)?;
        let path = ConstructPath::new([id]);
        debug!(stack = id, env = %props.env.uri(), "creating stack");
        Ok(Self {
            name: id.to_string(),
            props,
            base_dir: app.base_dir().to_path_buf(),
            context: app.context.clone(),
            tree: ConstructNode::new(id, path, NodeKind::Stack),
            logical_ids: HashMap::new(),
            relations: Vec::new(),
            outputs: IndexMap::new(),
            assets: Vec::new(),
        })
    }

    /// Stack name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deployment environment.
    pub fn env(&self) -> &Environment {
        &self.props.env
    }

    /// Path of the stack node; the scope for top-level constructs.
    pub fn path(&self) -> &ConstructPath {
        &self.tree.path
    }

    /// Directory asset paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The construct tree.
    pub fn node(&self) -> &ConstructNode {
        &self.tree
    }

    /// Add a grouping construct under `parent`.
    pub fn add_construct(
        &mut self,
        parent: &ConstructPath,
        id: &str,
        construct_type: &str,
    ) -> Result<ConstructPath> {
        validate_construct_id(id)?;
        let path = parent.child(id);
        let node = ConstructNode::new(
            id,
            path.clone(),
            NodeKind::Construct {
                construct_type: construct_type.to_string(),
            },
        );
        self.parent_node(parent)?.add_child(node)?;
        Ok(path)
    }

    /// Add a resource under `parent` and return its logical id.
    pub fn add_resource(
        &mut self,
        parent: &ConstructPath,
        id: &str,
        resource: TemplateResource,
    ) -> Result<String> {
        validate_construct_id(id)?;
        let path = parent.child(id);
        let relative = path
            .relative_to(self.path())
            .ok_or_else(|| Error::ConstructNotFound(path.to_string()))?
            .to_vec();
        let logical_id = make_logical_id(&relative)?;
        self.insert_resource(parent, id, logical_id, resource)
    }

    /// Add a resource with an explicit logical id.
    pub fn add_resource_with_logical_id(
        &mut self,
        parent: &ConstructPath,
        id: &str,
        logical_id: String,
        resource: TemplateResource,
    ) -> Result<String> {
        validate_construct_id(id)?;
        self.insert_resource(parent, id, logical_id, resource)
    }

    fn insert_resource(
        &mut self,
        parent: &ConstructPath,
        id: &str,
        logical_id: String,
        mut resource: TemplateResource,
    ) -> Result<String> {
        let path = parent.child(id);
        if self.logical_ids.contains_key(&logical_id) {
            return Err(Error::DuplicateLogicalId {
                logical_id,
                path: path.to_string(),
            });
        }

        resource
            .metadata
            .insert(PATH_METADATA_KEY.to_string(), Value::String(path.to_string()));
        debug!(
            logical_id = %logical_id,
            resource_type = %resource.resource_type,
            path = %path,
            "adding resource"
        );

        let node = ConstructNode::new(
            id,
            path.clone(),
            NodeKind::Resource {
                logical_id: logical_id.clone(),
                resource: Box::new(resource),
            },
        );
        self.parent_node(parent)?.add_child(node)?;
        self.logical_ids.insert(logical_id.clone(), path);
        Ok(logical_id)
    }

    fn parent_node(&mut self, parent: &ConstructPath) -> Result<&mut ConstructNode> {
        self.tree
            .find_mut(parent)
            .ok_or_else(|| Error::ConstructNotFound(parent.to_string()))
    }

    /// Whether a construct exists at `path`.
    pub fn contains(&self, path: &ConstructPath) -> bool {
        self.tree.find(path).is_some()
    }

    /// Logical id of the resource at `path`, if it is a resource.
    pub fn logical_id_at(&self, path: &ConstructPath) -> Option<&str> {
        match &self.tree.find(path)?.kind {
            NodeKind::Resource { logical_id, .. } => Some(logical_id),
            _ => None,
        }
    }

    /// Resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&TemplateResource> {
        let path = self.logical_ids.get(logical_id)?;
        match &self.tree.find(path)?.kind {
            NodeKind::Resource { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Mutable resource by logical id.
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut TemplateResource> {
        let path = self.logical_ids.get(logical_id)?.clone();
        self.tree.find_mut(&path)?.resource_mut()
    }

    /// Record a typed relation between two resources.
    pub fn add_relation(&mut self, relation: Relation) {
        if !self.relations.contains(&relation) {
            self.relations.push(relation);
        }
    }

    /// Relations recorded so far.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Add a template output.
    pub fn add_output(
        &mut self,
        name: &str,
        value: Expr,
        description: Option<String>,
    ) -> Result<()> {
        validate_construct_id(name)?;
        if self.outputs.contains_key(name) {
            return Err(Error::DuplicateConstructId {
                parent: self.path().to_string(),
                id: name.to_string(),
            });
        }
        self.outputs
            .insert(name.to_string(), Output { value, description });
        Ok(())
    }

    /// Register a code asset; duplicates by fingerprint are ignored.
    pub fn add_asset(&mut self, asset: Asset) {
        if !self.assets.iter().any(|a| a.fingerprint == asset.fingerprint) {
            self.assets.push(asset);
        }
    }

    /// Availability zones for a network spanning at most `max_azs` zones.
    ///
    /// Region-pinned stacks use the `availability-zones:<region>` context
    /// value or `<region>a..c`; env-agnostic stacks select from `Fn::GetAZs`
    /// and are limited to two zones.
    pub fn availability_zones(&self, max_azs: usize) -> Result<Vec<Expr>> {
        if max_azs == 0 {
            return Err(Error::InvalidAzCount {
                requested: max_azs,
                message: "a network needs at least one availability zone".to_string(),
            });
        }

        let available: Vec<Expr> = match &self.props.env.region {
            Some(region) => {
                let key = format!("availability-zones:{region}");
                match self.context.get(&key).and_then(Value::as_array) {
                    Some(zones) => zones
                        .iter()
                        .filter_map(Value::as_str)
                        .map(Expr::str)
                        .collect(),
                    None => ["a", "b", "c"]
                        .iter()
                        .map(|suffix| Expr::str(format!("{region}{suffix}")))
                        .collect(),
                }
            }
            None => (0..ENV_AGNOSTIC_AZ_COUNT)
                .map(|i| Expr::Select(i, Box::new(Expr::GetAzs(String::new()))))
                .collect(),
        };

        if available.is_empty() {
            return Err(Error::InvalidAzCount {
                requested: max_azs,
                message: format!("no availability zones known for {}", self.props.env.uri()),
            });
        }

        if max_azs > available.len() {
            warn!(
                requested = max_azs,
                available = available.len(),
                "fewer availability zones available than requested"
            );
        }

        Ok(available.into_iter().take(max_azs).collect())
    }

    /// Assemble the template without validating it.
    pub fn template(&self) -> Template {
        let mut template = Template::new();
        template.description = self.props.description.clone();
        for (logical_id, resource) in self.tree.resources() {
            template
                .resources
                .insert(logical_id.to_string(), resource.clone());
        }
        template.outputs = self.outputs.clone();
        template.metadata.relations = self.relations.clone();
        template
    }

    /// Freeze the stack into a validated template.
    ///
    /// Fails on unresolved references or dependency cycles.
    pub fn synthesize(self) -> Result<SynthesizedStack> {
        let template = self.template();
        let graph = ResourceGraph::from_template(&template)?;
        if graph.has_cycles() {
            let cycles = graph
                .get_cycles()
                .into_iter()
                .map(|c| c.join(" -> "))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::DependencyCycle(cycles));
        }
        let deployment_order = graph.deployment_order()?;

        info!(
            stack = %self.name,
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            assets = self.assets.len(),
            "synthesized stack"
        );

        Ok(SynthesizedStack {
            stack_name: self.name,
            environment: self.props.env,
            template,
            tree: self.tree,
            assets: self.assets,
            deployment_order,
        })
    }
}

/// The frozen result of synthesizing a stack.
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    /// Stack name
    pub stack_name: String,
    /// Target environment
    pub environment: Environment,
    /// The template
    pub template: Template,
    /// The construct tree
    pub tree: ConstructNode,
    /// Code assets referenced by the template
    pub assets: Vec<Asset>,
    /// Topological creation order
    pub deployment_order: Vec<String>,
}

impl SynthesizedStack {
    /// Resource graph of the template.
    pub fn graph(&self) -> Result<ResourceGraph> {
        ResourceGraph::from_template(&self.template)
    }

    /// File name of the template inside a cloud assembly.
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.stack_name)
    }
}
