//! Local deployment target.
//!
//! [`Deployer`] applies a synthesized stack to a simulated account whose
//! state lives behind a [`StatePersistence`] backend. A deploy creates and
//! updates resources in dependency order, resolving intrinsic functions
//! against what already exists, then deletes resources that left the
//! template in reverse dependency order. [`Deployer::destroy`] tears a whole
//! stack down, honouring each resource's removal policy:
//!
//! | Policy     | Effect on teardown                                  |
//! |------------|-----------------------------------------------------|
//! | `Delete`   | removed from the account                            |
//! | `Retain`   | kept, recorded as a retained account resource       |
//! | `Snapshot` | a snapshot is recorded for stateful types, then the resource is removed |
//!
//! ## Example
//!
//! ```rust,ignore
//! use stackform::deploy::{Deployer, MemoryPersistence};
//!
//! let deployer = Deployer::new(MemoryPersistence::new());
//! let report = deployer.deploy(&synthesized)?;
//! println!("{} created", report.created.len());
//! deployer.destroy(&synthesized.stack_name)?;
//! ```

pub mod persistence;
pub mod resolve;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::diff::{DiffSummary, TemplateDiff};
use crate::graph::ResourceGraph;
use crate::resources::s3::auto_deletes_objects;
use crate::stack::SynthesizedStack;
use crate::template::{Expr, RemovalPolicy, ResourceType, Template, TemplateResource};

pub use persistence::{JsonPersistence, MemoryPersistence, StatePersistence};
use resolve::ResolveContext;

/// Account used when neither the stack nor the deployer names one.
pub const DEFAULT_ACCOUNT: &str = "123456789012";

/// Region used when neither the stack nor the deployer names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors raised by the deployment target
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State persistence error: {0}")]
    Persistence(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Resource not found: {stack}/{logical_id}")]
    ResourceNotFound { stack: String, logical_id: String },

    #[error("Cannot resolve {expression} for '{logical_id}': {message}")]
    Resolution {
        logical_id: String,
        expression: String,
        message: String,
    },

    #[error("Invalid operation on '{logical_id}': {message}")]
    InvalidOperation { logical_id: String, message: String },

    #[error("Template error: {0}")]
    Template(#[from] crate::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for deployment operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Lifecycle status of a deployed stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    /// First deploy finished
    CreateComplete,
    /// A later deploy finished
    UpdateComplete,
    /// Teardown left resources behind
    DeleteFailed,
}

/// A resource living in the simulated account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedResource {
    /// Logical id within its stack
    pub logical_id: String,
    /// CloudFormation type
    pub resource_type: ResourceType,
    /// Physical id (what `Ref` resolves to)
    pub physical_id: String,
    /// Properties with every intrinsic resolved
    pub properties: Value,
    /// Attributes available to `Fn::GetAtt`
    pub attributes: IndexMap<String, String>,
    /// Policy applied when the resource is deleted
    pub deletion_policy: RemovalPolicy,
    /// Policy applied to the old resource when it is replaced
    pub update_replace_policy: RemovalPolicy,
    /// Object keys, for buckets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// The deployed state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    pub stack_name: String,
    pub account: String,
    pub region: String,
    pub status: StackStatus,
    /// Id of the deploy that produced this state
    pub deployment_id: String,
    /// Incremented on every deploy
    pub version: u64,
    /// Template last applied
    pub template: Template,
    /// Resources by logical id, in creation order
    pub resources: IndexMap<String, DeployedResource>,
    /// Resolved outputs
    pub outputs: IndexMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl StackState {
    /// Resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&DeployedResource> {
        self.resources.get(logical_id)
    }
}

/// A resource that outlived its stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedResource {
    pub stack_name: String,
    pub logical_id: String,
    pub resource_type: ResourceType,
    pub physical_id: String,
    /// Why it was kept
    pub reason: String,
    pub retained_at: DateTime<Utc>,
}

/// A final snapshot taken before a resource was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub stack_name: String,
    pub logical_id: String,
    pub resource_type: ResourceType,
    /// Physical id of the resource the snapshot was taken from
    pub source_physical_id: String,
    pub created_at: DateTime<Utc>,
}

/// A resource that could not be deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteFailure {
    pub logical_id: String,
    pub physical_id: String,
    pub reason: String,
}

/// Outcome of [`Deployer::deploy`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub stack_name: String,
    pub deployment_id: String,
    /// Template-level summary of the change set
    pub summary: DiffSummary,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub replaced: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub retained: Vec<RetainedResource>,
    pub snapshots: Vec<SnapshotRecord>,
    pub failed: Vec<DeleteFailure>,
    pub outputs: IndexMap<String, Value>,
}

impl DeployReport {
    /// Whether the deploy changed the account.
    pub fn has_changes(&self) -> bool {
        !(self.created.is_empty()
            && self.updated.is_empty()
            && self.replaced.is_empty()
            && self.deleted.is_empty())
    }
}

/// Outcome of [`Deployer::destroy`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DestroyReport {
    pub stack_name: String,
    pub deleted: Vec<String>,
    pub retained: Vec<RetainedResource>,
    pub snapshots: Vec<SnapshotRecord>,
    pub failed: Vec<DeleteFailure>,
}

impl DestroyReport {
    /// Whether every resource left the stack.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What happened to a resource leaving the account.
enum Disposal {
    Deleted,
    Retained(RetainedResource),
    Snapshotted(SnapshotRecord),
    Failed(DeleteFailure),
}

/// Applies synthesized stacks to a simulated account.
pub struct Deployer<P: StatePersistence> {
    persistence: P,
    account: String,
    region: String,
    rng: Mutex<StdRng>,
}

impl<P: StatePersistence> Deployer<P> {
    /// Deployer for the default account and region.
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            account: DEFAULT_ACCOUNT.to_string(),
            region: DEFAULT_REGION.to_string(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Account for env-agnostic stacks.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Region for env-agnostic stacks.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Seed the generator behind physical ids and attributes.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// The persistence backend.
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Deployed state of a stack.
    pub fn stack(&self, stack_name: &str) -> StateResult<Option<StackState>> {
        self.persistence.load_stack(stack_name)
    }

    /// Change set between the deployed and the synthesized template.
    pub fn plan(&self, synth: &SynthesizedStack) -> StateResult<TemplateDiff> {
        let deployed = self
            .persistence
            .load_stack(&synth.stack_name)?
            .map(|s| s.template)
            .unwrap_or_default();
        Ok(TemplateDiff::between(&deployed, &synth.template))
    }

    fn target(&self, synth: &SynthesizedStack) -> (String, String) {
        let env = &synth.environment;
        (
            env.account.clone().unwrap_or_else(|| self.account.clone()),
            env.region.clone().unwrap_or_else(|| self.region.clone()),
        )
    }

    /// Create, update and delete resources until the account matches the
    /// synthesized template.
    pub fn deploy(&self, synth: &SynthesizedStack) -> StateResult<DeployReport> {
        let stack_name = synth.stack_name.as_str();
        let previous = self.persistence.load_stack(stack_name)?;
        let old_template = previous
            .as_ref()
            .map(|s| s.template.clone())
            .unwrap_or_default();
        let diff = TemplateDiff::between(&old_template, &synth.template);
        let (account, region) = match &previous {
            Some(state) => (state.account.clone(), state.region.clone()),
            None => self.target(synth),
        };
        let deployment_id = Uuid::new_v4().to_string();

        info!(
            stack = %stack_name,
            deployment = %deployment_id,
            changes = %diff.summary(),
            "deploying stack"
        );

        let mut report = DeployReport {
            stack_name: stack_name.to_string(),
            deployment_id: deployment_id.clone(),
            summary: diff.summary(),
            ..Default::default()
        };
        let mut resources = previous
            .as_ref()
            .map(|s| s.resources.clone())
            .unwrap_or_default();

        for logical_id in &synth.deployment_order {
            let resource = synth.template.resource(logical_id).ok_or_else(|| {
                StateError::ResourceNotFound {
                    stack: stack_name.to_string(),
                    logical_id: logical_id.clone(),
                }
            })?;
            let outcome = self.apply_resource(
                stack_name,
                &account,
                &region,
                logical_id,
                resource,
                &mut resources,
            )?;
            match outcome {
                Applied::Created => report.created.push(logical_id.clone()),
                Applied::Updated => report.updated.push(logical_id.clone()),
                Applied::Unchanged => report.unchanged.push(logical_id.clone()),
                Applied::Replaced(old) => {
                    report.replaced.push(logical_id.clone());
                    let declaration = previous.as_ref().and_then(|s| s.template.resource(logical_id));
                    let disposal =
                        self.dispose(stack_name, &old, old.update_replace_policy, declaration)?;
                    record(&mut report.retained, &mut report.snapshots, &mut report.failed, disposal);
                }
            }
        }

        let removed: Vec<String> = old_template
            .resources
            .keys()
            .filter(|id| !synth.template.resources.contains_key(*id))
            .cloned()
            .collect();
        if !removed.is_empty() {
            let order = ResourceGraph::from_template(&old_template)?.teardown_order()?;
            for logical_id in order.iter().filter(|id| removed.contains(id)) {
                let Some(resource) = resources.get(logical_id).cloned() else {
                    continue;
                };
                let disposal = self.dispose(
                    stack_name,
                    &resource,
                    resource.deletion_policy,
                    old_template.resource(logical_id),
                )?;
                if matches!(disposal, Disposal::Failed(_)) {
                    record(&mut report.retained, &mut report.snapshots, &mut report.failed, disposal);
                    continue;
                }
                resources.shift_remove(logical_id);
                report.deleted.push(logical_id.clone());
                record(&mut report.retained, &mut report.snapshots, &mut report.failed, disposal);
            }
        }

        let ctx = ResolveContext {
            stack_name,
            account: &account,
            region: &region,
            resources: &resources,
        };
        for (name, output) in &synth.template.outputs {
            let value = ctx.resolve(&format!("Outputs.{name}"), &output.value)?;
            report.outputs.insert(name.clone(), value);
        }

        let mut template = synth.template.clone();
        for failure in &report.failed {
            if let Some(resource) = old_template.resource(&failure.logical_id) {
                template
                    .resources
                    .insert(failure.logical_id.clone(), resource.clone());
            }
        }

        let state = StackState {
            stack_name: stack_name.to_string(),
            account,
            region,
            status: if previous.is_some() {
                StackStatus::UpdateComplete
            } else {
                StackStatus::CreateComplete
            },
            deployment_id,
            version: previous.as_ref().map_or(1, |s| s.version + 1),
            template,
            resources,
            outputs: report.outputs.clone(),
            updated_at: Utc::now(),
        };
        self.persistence.save_stack(&state)?;

        info!(
            stack = %stack_name,
            created = report.created.len(),
            updated = report.updated.len(),
            replaced = report.replaced.len(),
            deleted = report.deleted.len(),
            "stack deployed"
        );
        Ok(report)
    }

    fn apply_resource(
        &self,
        stack_name: &str,
        account: &str,
        region: &str,
        logical_id: &str,
        resource: &TemplateResource,
        resources: &mut IndexMap<String, DeployedResource>,
    ) -> StateResult<Applied> {
        let ctx = ResolveContext {
            stack_name,
            account,
            region,
            resources,
        };
        let properties = ctx.resolve(logical_id, &Expr::Object(resource.properties.clone()))?;
        let deletion_policy = resource.effective_deletion_policy();
        let update_replace_policy = resource.update_replace_policy.unwrap_or(RemovalPolicy::Delete);
        let now = Utc::now();

        let existing = resources.get(logical_id);
        let outcome = match existing {
            Some(current)
                if current.resource_type == resource.resource_type
                    && !forces_replacement(&resource.resource_type, &current.properties, &properties) =>
            {
                if current.properties == properties
                    && current.deletion_policy == deletion_policy
                    && current.update_replace_policy == update_replace_policy
                {
                    return Ok(Applied::Unchanged);
                }
                let mut updated = current.clone();
                updated.properties = properties;
                updated.deletion_policy = deletion_policy;
                updated.update_replace_policy = update_replace_policy;
                updated.updated_at = now;
                debug!(resource = %logical_id, physical = %updated.physical_id, "updated in place");
                resources.insert(logical_id.to_string(), updated);
                return Ok(Applied::Updated);
            }
            Some(current) => Applied::Replaced(current.clone()),
            None => Applied::Created,
        };

        let mut rng = self.rng.lock();
        let physical_id = resolve::physical_id(
            &mut *rng,
            &ctx,
            logical_id,
            &resource.resource_type,
            &properties,
        );
        let attributes = resolve::attributes(
            &mut *rng,
            &ctx,
            &resource.resource_type,
            &physical_id,
            &properties,
        );
        drop(rng);

        debug!(
            resource = %logical_id,
            resource_type = %resource.resource_type,
            physical = %physical_id,
            "created"
        );
        resources.insert(
            logical_id.to_string(),
            DeployedResource {
                logical_id: logical_id.to_string(),
                resource_type: resource.resource_type.clone(),
                physical_id,
                properties,
                attributes,
                deletion_policy,
                update_replace_policy,
                objects: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(outcome)
    }

    /// Take a resource out of the account under `policy`.
    fn dispose(
        &self,
        stack_name: &str,
        resource: &DeployedResource,
        policy: RemovalPolicy,
        declaration: Option<&TemplateResource>,
    ) -> StateResult<Disposal> {
        let now = Utc::now();
        match policy {
            RemovalPolicy::Retain => {
                let retained = RetainedResource {
                    stack_name: stack_name.to_string(),
                    logical_id: resource.logical_id.clone(),
                    resource_type: resource.resource_type.clone(),
                    physical_id: resource.physical_id.clone(),
                    reason: format!("{policy} policy"),
                    retained_at: now,
                };
                self.persistence.record_retained(&retained)?;
                info!(resource = %resource.logical_id, physical = %resource.physical_id, "retained");
                Ok(Disposal::Retained(retained))
            }
            RemovalPolicy::Snapshot if resource.resource_type.is_stateful()
                && resource.resource_type != ResourceType::Bucket =>
            {
                let snapshot = SnapshotRecord {
                    id: format!("{}-snapshot-{}", resource.physical_id, Uuid::new_v4().simple()),
                    stack_name: stack_name.to_string(),
                    logical_id: resource.logical_id.clone(),
                    resource_type: resource.resource_type.clone(),
                    source_physical_id: resource.physical_id.clone(),
                    created_at: now,
                };
                self.persistence.record_snapshot(&snapshot)?;
                info!(resource = %resource.logical_id, snapshot = %snapshot.id, "snapshot taken, deleted");
                Ok(Disposal::Snapshotted(snapshot))
            }
            _ => {
                let purges = declaration.is_some_and(auto_deletes_objects);
                if resource.resource_type == ResourceType::Bucket
                    && !resource.objects.is_empty()
                    && !purges
                {
                    warn!(
                        resource = %resource.logical_id,
                        objects = resource.objects.len(),
                        "bucket is not empty, delete failed"
                    );
                    return Ok(Disposal::Failed(DeleteFailure {
                        logical_id: resource.logical_id.clone(),
                        physical_id: resource.physical_id.clone(),
                        reason: format!(
                            "bucket {} is not empty ({} object(s))",
                            resource.physical_id,
                            resource.objects.len()
                        ),
                    }));
                }
                debug!(resource = %resource.logical_id, physical = %resource.physical_id, "deleted");
                Ok(Disposal::Deleted)
            }
        }
    }

    /// Tear a stack down in reverse dependency order.
    ///
    /// Resources that cannot be deleted stay in the stack, which is then
    /// marked [`StackStatus::DeleteFailed`].
    pub fn destroy(&self, stack_name: &str) -> StateResult<DestroyReport> {
        let mut state = self
            .persistence
            .load_stack(stack_name)?
            .ok_or_else(|| StateError::StackNotFound(stack_name.to_string()))?;
        let order = ResourceGraph::from_template(&state.template)?.teardown_order()?;

        info!(stack = %stack_name, resources = state.resources.len(), "destroying stack");

        let mut report = DestroyReport {
            stack_name: stack_name.to_string(),
            ..Default::default()
        };
        for logical_id in &order {
            let Some(resource) = state.resources.get(logical_id).cloned() else {
                continue;
            };
            let disposal = self.dispose(
                stack_name,
                &resource,
                resource.deletion_policy,
                state.template.resource(logical_id),
            )?;
            if !matches!(disposal, Disposal::Failed(_)) {
                state.resources.shift_remove(logical_id);
                report.deleted.push(logical_id.clone());
            }
            record(&mut report.retained, &mut report.snapshots, &mut report.failed, disposal);
        }

        if report.is_complete() {
            self.persistence.delete_stack(stack_name)?;
            info!(stack = %stack_name, deleted = report.deleted.len(), "stack destroyed");
        } else {
            state.status = StackStatus::DeleteFailed;
            state.updated_at = Utc::now();
            self.persistence.save_stack(&state)?;
            warn!(stack = %stack_name, failed = report.failed.len(), "stack destroy incomplete");
        }
        Ok(report)
    }

    /// Put an object into a deployed bucket.
    pub fn put_object(&self, stack_name: &str, logical_id: &str, key: &str) -> StateResult<()> {
        let mut state = self
            .persistence
            .load_stack(stack_name)?
            .ok_or_else(|| StateError::StackNotFound(stack_name.to_string()))?;
        let resource = state.resources.get_mut(logical_id).ok_or_else(|| {
            StateError::ResourceNotFound {
                stack: stack_name.to_string(),
                logical_id: logical_id.to_string(),
            }
        })?;
        if resource.resource_type != ResourceType::Bucket {
            return Err(StateError::InvalidOperation {
                logical_id: logical_id.to_string(),
                message: format!("{} is not a bucket", resource.resource_type),
            });
        }
        if !resource.objects.iter().any(|k| k == key) {
            resource.objects.push(key.to_string());
        }
        self.persistence.save_stack(&state)
    }

    /// Physical ids of everything still in the account: resources of
    /// deployed stacks and retained leftovers.
    pub fn account_resources(&self) -> StateResult<Vec<(ResourceType, String)>> {
        let mut out = Vec::new();
        for name in self.persistence.list_stacks()? {
            if let Some(state) = self.persistence.load_stack(&name)? {
                out.extend(
                    state
                        .resources
                        .values()
                        .map(|r| (r.resource_type.clone(), r.physical_id.clone())),
                );
            }
        }
        out.extend(
            self.persistence
                .retained_resources()?
                .into_iter()
                .map(|r| (r.resource_type, r.physical_id)),
        );
        Ok(out)
    }
}

enum Applied {
    Created,
    Updated,
    Unchanged,
    Replaced(DeployedResource),
}

fn record(
    retained: &mut Vec<RetainedResource>,
    snapshots: &mut Vec<SnapshotRecord>,
    failed: &mut Vec<DeleteFailure>,
    disposal: Disposal,
) {
    match disposal {
        Disposal::Deleted => {}
        Disposal::Retained(r) => retained.push(r),
        Disposal::Snapshotted(s) => snapshots.push(s),
        Disposal::Failed(f) => failed.push(f),
    }
}

/// Whether moving from `old` to `new` resolved properties replaces the
/// physical resource.
fn forces_replacement(resource_type: &ResourceType, old: &Value, new: &Value) -> bool {
    resource_type
        .replacement_properties()
        .iter()
        .any(|key| old.get(key) != new.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{App, Stack, StackProps};

    fn synth(policy: RemovalPolicy, engine: &str) -> SynthesizedStack {
        let mut stack = Stack::new(&App::new(), "DeployStack", StackProps::default()).unwrap();
        let root = stack.path().clone();
        let db = stack
            .add_resource(
                &root,
                "Db",
                TemplateResource::new(ResourceType::DbInstance)
                    .with_property("Engine", engine)
                    .with_removal_policy(policy),
            )
            .unwrap();
        let bucket = stack
            .add_resource(
                &root,
                "Bucket",
                TemplateResource::new(ResourceType::Bucket).with_removal_policy(RemovalPolicy::Delete),
            )
            .unwrap();
        stack
            .add_resource(
                &root,
                "Fn",
                TemplateResource::new(ResourceType::Function)
                    .with_property(
                        "Environment",
                        Expr::object([(
                            "Variables",
                            Expr::object([
                                ("DB_ENDPOINT", Expr::get_att(&db, "Endpoint.Address")),
                                ("BUCKET", Expr::reference(&bucket)),
                            ]),
                        )]),
                    ),
            )
            .unwrap();
        stack
            .add_output("Endpoint", Expr::get_att(&db, "Endpoint.Address"), None)
            .unwrap();
        stack.synthesize().unwrap()
    }

    fn deployer() -> Deployer<MemoryPersistence> {
        Deployer::new(MemoryPersistence::new()).with_seed(42)
    }

    #[test]
    fn test_first_deploy_creates_in_order() {
        let deployer = deployer();
        let synth = synth(RemovalPolicy::Delete, "mysql");
        let report = deployer.deploy(&synth).unwrap();
        assert_eq!(report.created, synth.deployment_order);
        assert!(report.has_changes());

        let state = deployer.stack("DeployStack").unwrap().unwrap();
        assert_eq!(state.status, StackStatus::CreateComplete);
        let db = state.resource("Db").unwrap();
        let function = state.resource("Fn").unwrap();
        assert_eq!(
            function.properties["Environment"]["Variables"]["DB_ENDPOINT"],
            Value::String(db.attributes["Endpoint.Address"].clone())
        );
        assert_eq!(
            report.outputs["Endpoint"],
            Value::String(db.attributes["Endpoint.Address"].clone())
        );
        assert!(db.physical_id.starts_with("deploystack-db-"));
    }

    #[test]
    fn test_redeploy_is_noop() {
        let deployer = deployer();
        let synth = synth(RemovalPolicy::Delete, "mysql");
        deployer.deploy(&synth).unwrap();
        let report = deployer.deploy(&synth).unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.unchanged.len(), 3);
        let state = deployer.stack("DeployStack").unwrap().unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.status, StackStatus::UpdateComplete);
    }

    #[test]
    fn test_replacement_cascades_to_referrers() {
        let deployer = deployer();
        deployer.deploy(&synth(RemovalPolicy::Delete, "mysql")).unwrap();
        let before = deployer.stack("DeployStack").unwrap().unwrap();

        let report = deployer.deploy(&synth(RemovalPolicy::Delete, "postgres")).unwrap();
        assert_eq!(report.replaced, vec!["Db".to_string()]);
        assert_eq!(report.updated, vec!["Fn".to_string()]);

        let after = deployer.stack("DeployStack").unwrap().unwrap();
        assert_ne!(before.resource("Db").unwrap().physical_id, after.resource("Db").unwrap().physical_id);
        assert_eq!(
            before.resource("Fn").unwrap().physical_id,
            after.resource("Fn").unwrap().physical_id
        );
        assert_eq!(after.resource("Db").unwrap().attributes["Endpoint.Port"], "5432");
    }

    #[test]
    fn test_destroy_honours_policies() {
        let deployer = deployer();
        deployer.deploy(&synth(RemovalPolicy::Snapshot, "mysql")).unwrap();
        let report = deployer.destroy("DeployStack").unwrap();
        assert!(report.is_complete());
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(report.snapshots[0].logical_id, "Db");
        assert!(deployer.stack("DeployStack").unwrap().is_none());
        assert!(deployer.account_resources().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_retains() {
        let deployer = deployer();
        deployer.deploy(&synth(RemovalPolicy::Retain, "mysql")).unwrap();
        let report = deployer.destroy("DeployStack").unwrap();
        assert_eq!(report.retained.len(), 1);
        let left = deployer.account_resources().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].0, ResourceType::DbInstance);
    }

    #[test]
    fn test_non_empty_bucket_blocks_destroy() {
        let deployer = deployer();
        deployer.deploy(&synth(RemovalPolicy::Delete, "mysql")).unwrap();
        deployer.put_object("DeployStack", "Bucket", "index.html").unwrap();

        let report = deployer.destroy("DeployStack").unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failed[0].logical_id, "Bucket");
        let state = deployer.stack("DeployStack").unwrap().unwrap();
        assert_eq!(state.status, StackStatus::DeleteFailed);
        assert_eq!(state.resources.len(), 1);
    }

    #[test]
    fn test_put_object_rejects_non_bucket() {
        let deployer = deployer();
        deployer.deploy(&synth(RemovalPolicy::Delete, "mysql")).unwrap();
        assert!(matches!(
            deployer.put_object("DeployStack", "Db", "x"),
            Err(StateError::InvalidOperation { .. })
        ));
        assert!(matches!(
            deployer.destroy("Missing"),
            Err(StateError::StackNotFound(_))
        ));
    }
}
