//! Resource Dependency Graph
//!
//! This module models a synthesized stack as a directed acyclic graph of
//! resources. An edge `from -> to` means `to` cannot be created before
//! `from` exists. This enables:
//!
//! - Deployment ordering (topological sort) and teardown ordering (reverse)
//! - Cycle detection
//! - Impact analysis (what is affected if a resource is replaced or removed)
//! - Dependency visualization (DOT)
//!
//! Edges come from two places: references found in resource properties and
//! `DependsOn` lists, and typed relations declared by constructs (network
//! placement, connect grants, integrations) which the template carries in
//! its metadata.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::template::{ResourceType, Template};

/// A node in the resource graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical id
    pub logical_id: String,
    /// Resource type
    pub resource_type: ResourceType,
    /// Construct path, if recorded
    pub path: Option<String>,
}

impl ResourceNode {
    /// Create a new resource node
    pub fn new(logical_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type,
            path: None,
        }
    }

    /// Attach a construct path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Kind of dependency between resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A property references the other resource
    Reference,
    /// Explicit `DependsOn`
    DependsOn,
    /// The resource is placed inside a network
    NetworkPlacement,
    /// An IAM grant to connect to a database
    ConnectGrant,
    /// A security-group rule opening a port
    NetworkAccess,
    /// An HTTP route delegating to a handler
    Integration,
}

impl EdgeKind {
    /// Whether the edge was declared by a construct rather than inferred.
    pub fn is_semantic(self) -> bool {
        !matches!(self, EdgeKind::Reference | EdgeKind::DependsOn)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeKind::Reference => "reference",
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::NetworkPlacement => "network_placement",
            EdgeKind::ConnectGrant => "connect_grant",
            EdgeKind::NetworkAccess => "network_access",
            EdgeKind::Integration => "integration",
        };
        write!(f, "{name}")
    }
}

/// A typed edge between two resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Resource that must exist first
    pub from: String,
    /// Resource that depends on `from`
    pub to: String,
    /// Kind of dependency
    pub kind: EdgeKind,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Relation {
    /// Create a new relation
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            description: None,
        }
    }

    /// Add a description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// The dependency graph of a stack's resources
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<ResourceNode, Relation>,
    node_indices: HashMap<String, NodeIndex>,
}

impl ResourceGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of a template.
    ///
    /// Fails if any reference or relation names a missing resource.
    pub fn from_template(template: &Template) -> Result<Self> {
        template.validate_references()?;

        let mut graph = Self::new();
        for (logical_id, resource) in &template.resources {
            let mut node = ResourceNode::new(logical_id, resource.resource_type.clone());
            if let Some(path) = resource.construct_path() {
                node = node.with_path(path);
            }
            graph.add_node(node);
        }

        for (logical_id, resource) in &template.resources {
            for target in resource.properties.values().flat_map(|v| v.references()) {
                graph.add_edge(Relation::new(target, logical_id, EdgeKind::Reference))?;
            }
            for target in &resource.depends_on {
                graph.add_edge(Relation::new(target, logical_id, EdgeKind::DependsOn))?;
            }
        }

        for relation in &template.metadata.relations {
            graph.add_edge(relation.clone())?;
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built resource graph"
        );
        Ok(graph)
    }

    /// Add a node; an existing node with the same id is replaced
    pub fn add_node(&mut self, node: ResourceNode) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(&node.logical_id) {
            if let Some(existing) = self.graph.node_weight_mut(idx) {
                *existing = node;
            }
            return idx;
        }
        let id = node.logical_id.clone();
        let idx = self.graph.add_node(node);
        self.node_indices.insert(id, idx);
        idx
    }

    /// Add an edge. Duplicate edges of the same kind are collapsed.
    pub fn add_edge(&mut self, relation: Relation) -> Result<()> {
        let from_idx = *self
            .node_indices
            .get(&relation.from)
            .ok_or_else(|| Error::UnresolvedReference {
                from: relation.to.clone(),
                target: relation.from.clone(),
            })?;
        let to_idx = *self
            .node_indices
            .get(&relation.to)
            .ok_or_else(|| Error::UnresolvedReference {
                from: relation.from.clone(),
                target: relation.to.clone(),
            })?;

        let exists = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .any(|e| e.weight().kind == relation.kind);
        if !exists {
            self.graph.add_edge(from_idx, to_idx, relation);
        }
        Ok(())
    }

    /// Check for dependency cycles
    pub fn has_cycles(&self) -> bool {
        let sccs = tarjan_scc(&self.graph);
        sccs.iter().any(|scc| scc.len() > 1)
            || self
                .graph
                .node_indices()
                .any(|idx| self.graph.contains_edge(idx, idx))
    }

    /// Get all cycles in the graph
    pub fn get_cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                scc.into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.logical_id.clone()))
                    .collect()
            })
            .collect()
    }

    /// Topological order of resources (creation order respecting dependencies)
    pub fn deployment_order(&self) -> Result<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.logical_id.clone()))
                .collect()),
            Err(cycle) => {
                let at = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map_or("?", |n| n.logical_id.as_str());
                Err(Error::DependencyCycle(format!(
                    "cannot determine deployment order: cycle through '{at}'"
                )))
            }
        }
    }

    /// Reverse of the deployment order: dependents are deleted first
    pub fn teardown_order(&self) -> Result<Vec<String>> {
        let mut order = self.deployment_order()?;
        order.reverse();
        Ok(order)
    }

    /// All resources that depend on the given one (direct and transitive)
    pub fn get_dependents(&self, logical_id: &str) -> Vec<String> {
        self.traverse(logical_id, Direction::Outgoing)
    }

    /// All resources the given one depends on (direct and transitive)
    pub fn get_dependencies(&self, logical_id: &str) -> Vec<String> {
        self.traverse(logical_id, Direction::Incoming)
    }

    fn traverse(&self, logical_id: &str, direction: Direction) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::new();

        if let Some(&start_idx) = self.node_indices.get(logical_id) {
            queue.push_back(start_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if let Some(node) = self.graph.node_weight(neighbor) {
                        if seen.insert(node.logical_id.clone()) {
                            out.push(node.logical_id.clone());
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        out
    }

    /// Direct incoming edges of a resource
    pub fn direct_dependencies(&self, logical_id: &str) -> Vec<&Relation> {
        self.direct_edges(logical_id, Direction::Incoming)
    }

    /// Direct outgoing edges of a resource
    pub fn direct_dependents(&self, logical_id: &str) -> Vec<&Relation> {
        self.direct_edges(logical_id, Direction::Outgoing)
    }

    fn direct_edges(&self, logical_id: &str, direction: Direction) -> Vec<&Relation> {
        match self.node_indices.get(logical_id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, direction)
                .map(|e| e.weight())
                .collect(),
            None => Vec::new(),
        }
    }

    /// All edges of one kind
    pub fn edges_of_kind(&self, kind: EdgeKind) -> Vec<&Relation> {
        self.graph
            .edge_references()
            .map(|e| e.weight())
            .filter(|r| r.kind == kind)
            .collect()
    }

    /// Whether a direct edge of `kind` runs from `from` to `to`
    pub fn has_edge(&self, from: &str, to: &str, kind: EdgeKind) -> bool {
        match (self.node_indices.get(from), self.node_indices.get(to)) {
            (Some(&a), Some(&b)) => self
                .graph
                .edges_connecting(a, b)
                .any(|e| e.weight().kind == kind),
            _ => false,
        }
    }

    /// What would be affected if a resource were replaced or removed
    pub fn impact_analysis(&self, logical_id: &str) -> ImpactAnalysis {
        let node = self
            .node_indices
            .get(logical_id)
            .and_then(|idx| self.graph.node_weight(*idx));

        ImpactAnalysis {
            logical_id: logical_id.to_string(),
            resource_type: node.map(|n| n.resource_type.clone()),
            affected: self.get_dependents(logical_id),
            depth: self.dependent_depth(logical_id),
        }
    }

    /// Longest chain of dependents below a resource
    fn dependent_depth(&self, logical_id: &str) -> usize {
        let Ok(order) = toposort(&self.graph, None) else {
            return 0;
        };
        let Some(&start) = self.node_indices.get(logical_id) else {
            return 0;
        };

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        depth.insert(start, 0);
        let mut max_depth = 0;
        for idx in order {
            let Some(&d) = depth.get(&idx) else {
                continue;
            };
            max_depth = max_depth.max(d);
            for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let entry = depth.entry(neighbor).or_insert(0);
                *entry = (*entry).max(d + 1);
            }
        }
        max_depth
    }

    /// Get a node by logical id
    pub fn get_node(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.node_indices
            .get(logical_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Logical ids grouped by resource type
    pub fn resources_by_type(&self) -> IndexMap<String, Vec<String>> {
        let mut by_type: IndexMap<String, Vec<String>> = IndexMap::new();
        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                by_type
                    .entry(node.resource_type.as_str().to_string())
                    .or_default()
                    .push(node.logical_id.clone());
            }
        }
        by_type
    }

    /// Generate a DOT format representation for visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph resources {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                let label = format!("{}\\n{}", node.logical_id, node.resource_type);
                output.push_str(&format!("  \"{}\" [label=\"{}\"];\n", node.logical_id, label));
            }
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            let relation = edge.weight();
            let (style, color) = match relation.kind {
                EdgeKind::Reference => ("dotted", "gray"),
                EdgeKind::DependsOn => ("solid", "gray"),
                EdgeKind::NetworkPlacement => ("dashed", "blue"),
                EdgeKind::ConnectGrant => ("bold", "red"),
                EdgeKind::NetworkAccess => ("dashed", "orange"),
                EdgeKind::Integration => ("bold", "darkgreen"),
            };

            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}, color={}];\n",
                relation.from, relation.to, style, color
            ));
        }

        output.push_str("}\n");
        output
    }
}

/// Result of an impact analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    /// Resource that was analyzed
    pub logical_id: String,
    /// Its type, if the resource exists
    pub resource_type: Option<ResourceType>,
    /// Resources that depend on it, directly or transitively
    pub affected: Vec<String>,
    /// Longest chain of dependents
    pub depth: usize,
}

impl ImpactAnalysis {
    /// Get the number of affected resources
    pub fn affected_count(&self) -> usize {
        self.affected.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Expr, TemplateResource};

    fn linear_template() -> Template {
        let mut template = Template::new();
        template
            .resources
            .insert("Vpc".into(), TemplateResource::new(ResourceType::Vpc));
        template.resources.insert(
            "Db".into(),
            TemplateResource::new(ResourceType::DbInstance)
                .with_property("VpcId", Expr::reference("Vpc")),
        );
        template.resources.insert(
            "Fn".into(),
            TemplateResource::new(ResourceType::Function).with_property(
                "Environment",
                Expr::object([("DB", Expr::get_att("Db", "Endpoint.Address"))]),
            ),
        );
        template
    }

    #[test]
    fn test_graph_from_template() {
        let graph = ResourceGraph::from_template(&linear_template()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge("Db", "Fn", EdgeKind::Reference));
    }

    #[test]
    fn test_deployment_and_teardown_order() {
        let graph = ResourceGraph::from_template(&linear_template()).unwrap();
        let order = graph.deployment_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("Vpc") < pos("Db"));
        assert!(pos("Db") < pos("Fn"));

        let teardown = graph.teardown_order().unwrap();
        assert_eq!(teardown.first().map(String::as_str), Some("Fn"));
    }

    #[test]
    fn test_semantic_relations_are_added() {
        let mut template = linear_template();
        template
            .metadata
            .relations
            .push(Relation::new("Db", "Fn", EdgeKind::ConnectGrant));
        let graph = ResourceGraph::from_template(&template).unwrap();
        assert!(graph.has_edge("Db", "Fn", EdgeKind::ConnectGrant));
        assert_eq!(graph.edges_of_kind(EdgeKind::ConnectGrant).len(), 1);
        assert_eq!(graph.direct_dependencies("Fn").len(), 2);
    }

    #[test]
    fn test_cycle_detection() {
        let mut template = linear_template();
        template
            .resources
            .get_mut("Vpc")
            .unwrap()
            .add_depends_on("Fn");
        let graph = ResourceGraph::from_template(&template).unwrap();
        assert!(graph.has_cycles());
        assert_eq!(graph.get_cycles().len(), 1);
        assert!(matches!(
            graph.deployment_order(),
            Err(Error::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unknown_relation_target() {
        let mut template = linear_template();
        template
            .metadata
            .relations
            .push(Relation::new("Db", "Ghost", EdgeKind::ConnectGrant));
        assert!(ResourceGraph::from_template(&template).is_err());
    }

    #[test]
    fn test_dependents_and_impact() {
        let graph = ResourceGraph::from_template(&linear_template()).unwrap();
        let dependents = graph.get_dependents("Vpc");
        assert!(dependents.contains(&"Db".to_string()));
        assert!(dependents.contains(&"Fn".to_string()));
        assert_eq!(graph.get_dependencies("Fn").len(), 2);

        let impact = graph.impact_analysis("Vpc");
        assert_eq!(impact.affected_count(), 2);
        assert_eq!(impact.depth, 2);
        assert_eq!(impact.resource_type, Some(ResourceType::Vpc));
    }

    #[test]
    fn test_to_dot() {
        let graph = ResourceGraph::from_template(&linear_template()).unwrap();
        let dot = graph.to_dot();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("\"Vpc\" -> \"Db\""));
    }

    #[test]
    fn test_resources_by_type() {
        let graph = ResourceGraph::from_template(&linear_template()).unwrap();
        let by_type = graph.resources_by_type();
        assert_eq!(by_type["AWS::EC2::VPC"], vec!["Vpc".to_string()]);
    }
}
