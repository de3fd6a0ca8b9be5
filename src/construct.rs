//! Construct tree and logical ids.
//!
//! A stack is an explicit tree of construct nodes with single-owner
//! parent/child links. Leaves hold resource descriptors; inner nodes group
//! the resources a higher-level construct (a VPC, a database, an API)
//! expands into. Every resource gets a logical id derived from its path
//! below the stack, using the same scheme as the AWS CDK so ids stay
//! stable across tools.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::template::TemplateResource;

/// Separator between path components.
pub const PATH_SEP: &str = "/";

/// Construct id that is dropped from logical ids entirely.
pub const HIDDEN_ID: &str = "Default";

/// Construct id that is dropped from the human part of logical ids.
pub const HIDDEN_FROM_HUMAN_ID: &str = "Resource";

const MAX_HUMAN_LEN: usize = 240;
const MAX_ID_LEN: usize = 255;
const HASH_LEN: usize = 8;

/// Path of a construct from the app root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstructPath(Vec<String>);

impl ConstructPath {
    /// The empty (app-level) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from components.
    pub fn new<S: Into<String>>(components: impl IntoIterator<Item = S>) -> Self {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// Path of a child construct.
    pub fn child(&self, id: &str) -> Self {
        let mut components = self.0.clone();
        components.push(id.to_string());
        Self(components)
    }

    /// Parent path, `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last component.
    pub fn id(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// All components.
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &ConstructPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Components below `ancestor`, or `None` if it is not an ancestor.
    pub fn relative_to(&self, ancestor: &ConstructPath) -> Option<&[String]> {
        if self.starts_with(ancestor) {
            Some(&self.0[ancestor.0.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(PATH_SEP))
    }
}

/// Validate a construct id.
pub fn validate_construct_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(PATH_SEP) {
        return Err(Error::InvalidConstructId(id.to_string()));
    }
    Ok(())
}

/// Derive a logical id from path components below the stack.
///
/// A single visible component is used verbatim (alphanumerics only). Longer
/// paths become `<human><HASH>` where the hash is the upper-case prefix of
/// the md5 of the joined components.
pub fn make_logical_id(components: &[String]) -> Result<String> {
    let components: Vec<&str> = components
        .iter()
        .map(String::as_str)
        .filter(|c| *c != HIDDEN_ID)
        .collect();

    if components.is_empty() {
        return Err(Error::InvalidConstructId(
            "unable to calculate a logical id for an empty set of components".to_string(),
        ));
    }

    if components.len() == 1 {
        let top_level = remove_non_alphanumeric(components[0]);
        if top_level.len() <= MAX_ID_LEN {
            return Ok(top_level);
        }
    }

    let hash = path_hash(&components);
    let human: String = remove_dupes(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(remove_non_alphanumeric)
        .collect::<String>()
        .chars()
        .take(MAX_HUMAN_LEN)
        .collect();

    Ok(format!("{human}{hash}"))
}

fn path_hash(components: &[&str]) -> String {
    let digest = md5::compute(components.join(PATH_SEP).as_bytes());
    format!("{digest:x}")[..HASH_LEN].to_uppercase()
}

fn remove_dupes<'a>(components: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(components.len());
    for &component in components {
        if out.last().map_or(true, |last| !last.ends_with(component)) {
            out.push(component);
        }
    }
    out
}

fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// What a construct node represents.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The application root
    App,
    /// A deployable stack
    Stack,
    /// A higher-level construct grouping resources
    Construct {
        /// Construct type label, e.g. `aws-ec2.Vpc`
        construct_type: String,
    },
    /// A single template resource
    Resource {
        /// Logical id within the stack
        logical_id: String,
        /// The descriptor
        resource: Box<TemplateResource>,
    },
}

/// A node in the construct tree.
#[derive(Debug, Clone)]
pub struct ConstructNode {
    /// Construct id, unique among siblings
    pub id: String,
    /// Full path from the app root
    pub path: ConstructPath,
    /// Node kind
    pub kind: NodeKind,
    /// Children in declaration order
    pub children: Vec<ConstructNode>,
}

impl ConstructNode {
    /// Create a node without children.
    pub fn new(id: impl Into<String>, path: ConstructPath, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            path,
            kind,
            children: Vec::new(),
        }
    }

    /// Attach a child, rejecting duplicate ids.
    pub fn add_child(&mut self, child: ConstructNode) -> Result<()> {
        if self.children.iter().any(|c| c.id == child.id) {
            return Err(Error::DuplicateConstructId {
                parent: self.path.to_string(),
                id: child.id,
            });
        }
        self.children.push(child);
        Ok(())
    }

    /// Find a descendant (or self) by path.
    pub fn find(&self, path: &ConstructPath) -> Option<&ConstructNode> {
        let rest = path.relative_to(&self.path)?;
        rest.iter().try_fold(self, |node, id| {
            node.children.iter().find(|c| &c.id == id)
        })
    }

    /// Mutable variant of [`ConstructNode::find`].
    pub fn find_mut(&mut self, path: &ConstructPath) -> Option<&mut ConstructNode> {
        let rest = path.relative_to(&self.path)?.to_vec();
        let mut node = self;
        for id in &rest {
            node = node.children.iter_mut().find(|c| &c.id == id)?;
        }
        Some(node)
    }

    /// Pre-order traversal of this subtree.
    pub fn walk(&self) -> Vec<&ConstructNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// Resources in this subtree, in declaration order.
    pub fn resources(&self) -> Vec<(&str, &TemplateResource)> {
        self.walk()
            .into_iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Resource {
                    logical_id,
                    resource,
                } => Some((logical_id.as_str(), resource.as_ref())),
                _ => None,
            })
            .collect()
    }

    /// Mutable access to the resource held by this node.
    pub fn resource_mut(&mut self) -> Option<&mut TemplateResource> {
        match &mut self.kind {
            NodeKind::Resource { resource, .. } => Some(resource.as_mut()),
            _ => None,
        }
    }

    /// Render as the `tree.json` shape of a cloud assembly.
    pub fn to_tree_json(&self) -> Value {
        let mut node = json!({
            "id": self.id,
            "path": self.path.to_string(),
        });
        match &self.kind {
            NodeKind::App => node["kind"] = json!("app"),
            NodeKind::Stack => node["kind"] = json!("stack"),
            NodeKind::Construct { construct_type } => {
                node["kind"] = json!("construct");
                node["constructType"] = json!(construct_type);
            }
            NodeKind::Resource {
                logical_id,
                resource,
            } => {
                node["kind"] = json!("resource");
                node["logicalId"] = json!(logical_id);
                node["type"] = json!(resource.resource_type.as_str());
            }
        }
        if !self.children.is_empty() {
            node["children"] = Value::Array(self.children.iter().map(Self::to_tree_json).collect());
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_single_component_is_verbatim() {
        assert_eq!(make_logical_id(&ids(&["MyVpc"])).unwrap(), "MyVpc");
        assert_eq!(
            make_logical_id(&ids(&["get-content"])).unwrap(),
            "getcontent"
        );
    }

    #[test]
    fn test_logical_id_hash_matches_cdk() {
        assert_eq!(
            make_logical_id(&ids(&["Instance", "Resource"])).unwrap(),
            "InstanceC1063A87"
        );
        assert_eq!(
            make_logical_id(&ids(&["MyVpc", "Resource"])).unwrap(),
            "MyVpcF9F0CA6F"
        );
        assert_eq!(
            make_logical_id(&ids(&["WebsiteBucket", "Resource"])).unwrap(),
            "WebsiteBucket75C24D94"
        );
    }

    #[test]
    fn test_default_is_hidden() {
        assert_eq!(
            make_logical_id(&ids(&["Api", "Default", "Resource"])).unwrap(),
            make_logical_id(&ids(&["Api", "Resource"])).unwrap()
        );
        assert!(make_logical_id(&ids(&["Default"])).is_err());
    }

    #[test]
    fn test_dupes_removed_from_human_part() {
        let id = make_logical_id(&ids(&["Bucket", "Bucket", "Policy"])).unwrap();
        assert!(id.starts_with("BucketPolicy"));
        assert_eq!(id.len(), "BucketPolicy".len() + HASH_LEN);
    }

    #[test]
    fn test_path_helpers() {
        let path = ConstructPath::new(["Stack", "MyVpc", "Resource"]);
        assert_eq!(path.to_string(), "Stack/MyVpc/Resource");
        assert_eq!(path.id(), Some("Resource"));
        assert_eq!(path.parent().unwrap().to_string(), "Stack/MyVpc");
        let stack = ConstructPath::new(["Stack"]);
        assert_eq!(
            path.relative_to(&stack).unwrap(),
            &["MyVpc".to_string(), "Resource".to_string()]
        );
        assert!(ConstructPath::root().parent().is_none());
    }

    #[test]
    fn test_tree_duplicate_child_rejected() {
        let root_path = ConstructPath::new(["Stack"]);
        let mut root = ConstructNode::new("Stack", root_path.clone(), NodeKind::Stack);
        let child = ConstructNode::new(
            "MyVpc",
            root_path.child("MyVpc"),
            NodeKind::Construct {
                construct_type: "aws-ec2.Vpc".into(),
            },
        );
        root.add_child(child.clone()).unwrap();
        assert!(matches!(
            root.add_child(child),
            Err(Error::DuplicateConstructId { .. })
        ));
        assert!(root.find(&root_path.child("MyVpc")).is_some());
        assert!(root.find(&root_path.child("Missing")).is_none());
    }

    #[test]
    fn test_invalid_construct_ids() {
        assert!(validate_construct_id("").is_err());
        assert!(validate_construct_id("a/b").is_err());
        assert!(validate_construct_id("email").is_ok());
    }
}
