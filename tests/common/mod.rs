//! Shared test utilities and fixtures for the Stackform test suite.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use stackform::stack::{App, SynthesizedStack};
use stackform::stacks::emailer::{self, default_handlers, EmailerStackProps, DEFAULT_STACK_NAME};
use stackform::template::{ResourceType, Template};

/// Write one handler directory per default handler below `root/lambdas`.
pub fn write_lambdas(root: &Path) {
    for handler in default_handlers() {
        let code = root.join("lambdas").join(&handler.asset_dir);
        fs::create_dir_all(&code).unwrap();
        fs::write(
            code.join("index.js"),
            format!(
                "exports.handler = async (event) => ({{ statusCode: 200, body: '{}' }});\n",
                handler.id
            ),
        )
        .unwrap();
    }
}

/// A temporary project directory with handler code in place.
pub fn lambdas_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_lambdas(dir.path());
    dir
}

/// App rooted at a fixture directory.
pub fn app_in(dir: &TempDir) -> App {
    App::new()
        .with_base_dir(dir.path())
        .with_outdir(dir.path().join("cdk.out"))
}

/// Synthesize the emailer stack with the given props.
pub fn synth_with(dir: &TempDir, props: EmailerStackProps) -> SynthesizedStack {
    emailer::synthesize(&app_in(dir), DEFAULT_STACK_NAME, props).unwrap()
}

/// Synthesize the emailer stack with default props.
pub fn synth_default(dir: &TempDir) -> SynthesizedStack {
    synth_with(dir, EmailerStackProps::default())
}

/// Logical id of the single resource of a type.
pub fn only_of_type(template: &Template, resource_type: &ResourceType) -> String {
    let ids: Vec<&String> = template
        .resources_of_type(resource_type)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids.len(), 1, "expected exactly one {resource_type}");
    ids[0].clone()
}

/// Logical id of the function declared with construct id `construct_id`.
pub fn function_id(template: &Template, construct_id: &str) -> String {
    let needle = format!("/{construct_id}/");
    template
        .resources_of_type(&ResourceType::Function)
        .find(|(_, r)| r.construct_path().is_some_and(|p| p.contains(&needle)))
        .map(|(id, _)| id.clone())
        .unwrap_or_else(|| panic!("no function for {construct_id}"))
}
