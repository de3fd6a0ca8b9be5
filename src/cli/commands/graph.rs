//! Graph command - show the resource graph
//!
//! This module implements the `graph` subcommand: deployment order and the
//! construct-declared relations, DOT output, or the impact of replacing one
//! resource.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use stackform::graph::{EdgeKind, Relation};

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Print the graph in Graphviz DOT format
    #[arg(long)]
    pub dot: bool,

    /// Show what depends on this resource
    #[arg(long, value_name = "LOGICAL_ID")]
    pub impact: Option<String>,

    /// Include inferred reference and DependsOn edges
    #[arg(long)]
    pub all_edges: bool,
}

#[derive(Serialize)]
struct GraphView<'a> {
    deployment_order: &'a [String],
    relations: Vec<&'a Relation>,
}

const SEMANTIC_KINDS: [EdgeKind; 4] = [
    EdgeKind::NetworkPlacement,
    EdgeKind::ConnectGrant,
    EdgeKind::NetworkAccess,
    EdgeKind::Integration,
];

const INFERRED_KINDS: [EdgeKind; 2] = [EdgeKind::Reference, EdgeKind::DependsOn];

impl GraphArgs {
    /// Execute the graph command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let synth = ctx.synthesize()?;
        let graph = synth.graph()?;

        if self.dot {
            print!("{}", graph.to_dot());
            return Ok(0);
        }

        if let Some(logical_id) = &self.impact {
            let impact = graph.impact_analysis(logical_id);
            if impact.resource_type.is_none() {
                ctx.output
                    .error(&format!("No resource '{logical_id}' in {}", synth.stack_name));
                return Ok(1);
            }
            ctx.output.emit(&impact)?;
            ctx.output.list(
                &format!(
                    "{} resource(s) affected by {logical_id} (depth {})",
                    impact.affected_count(),
                    impact.depth
                ),
                &impact.affected,
            );
            return Ok(0);
        }

        let mut kinds = SEMANTIC_KINDS.to_vec();
        if self.all_edges {
            kinds.extend(INFERRED_KINDS);
        }
        let relations: Vec<&Relation> = kinds
            .iter()
            .flat_map(|kind| graph.edges_of_kind(*kind))
            .collect();

        ctx.output.emit(&GraphView {
            deployment_order: &synth.deployment_order,
            relations: relations.clone(),
        })?;

        let order: Vec<String> = synth
            .deployment_order
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{:>2}. {id}", i + 1))
            .collect();
        ctx.output.list("Deployment order", &order);

        ctx.output.section("Relations");
        let rows: Vec<Vec<String>> = relations
            .iter()
            .map(|r| vec![r.from.clone(), r.kind.to_string(), r.to.clone()])
            .collect();
        ctx.output.table(&["From", "Kind", "To"], &rows);

        Ok(0)
    }
}
