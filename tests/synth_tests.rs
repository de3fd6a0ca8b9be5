//! Synthesis tests for the Daily Content Emailer stack.
//!
//! These cover the shape of the default template: resource counts, routes,
//! database wiring of the handlers and the cloud assembly on disk.

mod common;

use common::*;
use pretty_assertions::assert_eq;

use stackform::assembly;
use stackform::graph::EdgeKind;
use stackform::resources::apigateway::routes_from_template;
use stackform::resources::iam::statement_actions;
use stackform::resources::lambda::environment_of;
use stackform::stacks::emailer::{
    default_handlers, EmailerStackProps, DB_ENDPOINT_VAR, DB_NAME_VAR, DEFAULT_STACK_NAME,
};
use stackform::template::{Expr, RemovalPolicy, ResourceType};

#[test]
fn test_default_resource_counts() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;

    assert_eq!(template.count_of(&ResourceType::Vpc), 1);
    assert_eq!(template.count_of(&ResourceType::DbInstance), 1);
    assert_eq!(template.count_of(&ResourceType::Bucket), 1);
    assert_eq!(template.count_of(&ResourceType::Function), 3);
    assert_eq!(template.count_of(&ResourceType::RestApi), 1);
    assert_eq!(template.count_of(&ResourceType::Method), 3);
}

#[test]
fn test_stable_logical_ids() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;

    assert_eq!(only_of_type(&template, &ResourceType::Vpc), "MyVpcF9F0CA6F");
    assert_eq!(only_of_type(&template, &ResourceType::DbInstance), "InstanceC1063A87");
    assert_eq!(only_of_type(&template, &ResourceType::Bucket), "WebsiteBucket75C24D94");
}

#[test]
fn test_vpc_spans_at_most_two_azs() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;

    let azs: std::collections::BTreeSet<String> = template
        .resources_of_type(&ResourceType::Subnet)
        .filter_map(|(_, subnet)| subnet.property("AvailabilityZone"))
        .map(|az| az.to_json().to_string())
        .collect();
    assert!(!azs.is_empty());
    assert!(azs.len() <= 2, "subnets span {} AZs", azs.len());
}

#[test]
fn test_routes_bound_to_handlers() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;

    let mut routes: Vec<(String, String, Option<String>)> = routes_from_template(&template)
        .into_iter()
        .map(|r| (r.method, r.path, r.handler))
        .collect();
    routes.sort();

    let mut expected: Vec<(String, String, Option<String>)> = default_handlers()
        .into_iter()
        .map(|h| {
            let handler = function_id(&template, &h.id);
            (h.method, h.path, Some(handler))
        })
        .collect();
    expected.sort();

    assert_eq!(routes, expected);
}

#[test]
fn test_handlers_read_database_settings() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;
    let db = only_of_type(&template, &ResourceType::DbInstance);

    for (id, function) in template.resources_of_type(&ResourceType::Function) {
        let env = environment_of(function);
        assert_eq!(
            env.get(DB_ENDPOINT_VAR),
            Some(&Expr::get_att(&db, "Endpoint.Address")),
            "{id}"
        );
        assert_eq!(env.get(DB_NAME_VAR), Some(&Expr::reference(&db)), "{id}");
    }
}

#[test]
fn test_every_handler_can_connect_to_database() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;
    let db = only_of_type(&template, &ResourceType::DbInstance);

    for (id, function) in template.resources_of_type(&ResourceType::Function) {
        let role = function
            .property("Role")
            .and_then(|r| r.references().into_iter().next())
            .unwrap_or_else(|| panic!("{id} has no role"));

        let granted = template
            .resources_of_type(&ResourceType::Policy)
            .filter(|(_, policy)| {
                policy
                    .property("Roles")
                    .is_some_and(|roles| roles.references().contains(&role))
            })
            .any(|(_, policy)| {
                statement_actions(policy).iter().any(|a| a == "rds-db:connect")
                    && policy.references().contains(&db)
            });
        assert!(granted, "{id} lacks rds-db:connect on {db}");
    }
}

#[test]
fn test_graph_has_semantic_edges() {
    let dir = lambdas_fixture();
    let synth = synth_default(&dir);
    let graph = synth.graph().unwrap();
    let template = &synth.template;
    let db = only_of_type(template, &ResourceType::DbInstance);

    assert_eq!(graph.edges_of_kind(EdgeKind::ConnectGrant).len(), 3);
    assert_eq!(graph.edges_of_kind(EdgeKind::Integration).len(), 3);
    for handler in default_handlers() {
        let function = function_id(template, &handler.id);
        assert!(graph.has_edge(&db, &function, EdgeKind::ConnectGrant));
    }

    let position = |id: &str| synth.deployment_order.iter().position(|x| x == id).unwrap();
    let vpc = only_of_type(template, &ResourceType::Vpc);
    assert!(position(&vpc) < position(&db));
}

#[test]
fn test_removal_policies() {
    let dir = lambdas_fixture();
    let template = synth_default(&dir).template;

    let db = only_of_type(&template, &ResourceType::DbInstance);
    assert_eq!(
        template.resource(&db).unwrap().effective_deletion_policy(),
        RemovalPolicy::Delete
    );

    let template = synth_with(
        &dir,
        EmailerStackProps {
            database_removal_policy: RemovalPolicy::Snapshot,
            ..Default::default()
        },
    )
    .template;
    assert_eq!(
        template.resource(&db).unwrap().deletion_policy,
        Some(RemovalPolicy::Snapshot)
    );
}

#[test]
fn test_synthesis_is_deterministic() {
    let dir = lambdas_fixture();
    let first = synth_default(&dir).template;
    let second = synth_default(&dir).template;
    assert_eq!(first.to_json_pretty().unwrap(), second.to_json_pretty().unwrap());
}

#[test]
fn test_assembly_round_trip() {
    let dir = lambdas_fixture();
    let synth = synth_default(&dir);
    let outdir = dir.path().join("cdk.out");

    let written = assembly::write(&synth, &outdir).unwrap();
    assert_eq!(written.assets.len(), 3);

    let manifest = assembly::read_manifest(&outdir).unwrap();
    assert_eq!(manifest.stacks(), vec![DEFAULT_STACK_NAME]);

    let template = assembly::read_template(&outdir, DEFAULT_STACK_NAME).unwrap();
    assert_eq!(template, synth.template);
}

#[test]
fn test_missing_handler_code_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = stackform::stacks::emailer::synthesize(
        &app_in(&dir),
        DEFAULT_STACK_NAME,
        EmailerStackProps::default(),
    );
    assert!(result.is_err());
}
