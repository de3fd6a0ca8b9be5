//! # Stackform - infrastructure stacks as typed Rust
//!
//! Stackform declares cloud infrastructure as a tree of constructs and
//! synthesizes it into a CloudFormation template. The bundled stack is the
//! *Daily Content Emailer*: a VPC, a MySQL instance with generated
//! credentials, a website bucket, three database-backed handlers and a REST
//! API in front of them.
//!
//! ## Core Concepts
//!
//! - **Constructs**: nodes of an explicit tree; a resource's path in the tree
//!   determines its logical id
//! - **Resources**: typed builders (`Vpc`, `DatabaseInstance`, `Bucket`,
//!   `Function`, `RestApi`) that emit template resources and typed relations
//! - **Synthesis**: freezing a stack into a validated [`template::Template`]
//!   with a topological deployment order
//! - **Graph**: the resource DAG with typed edges (reference, placement,
//!   grant, integration)
//! - **Deploy**: a local target that simulates an account, so deploys and
//!   teardowns can be exercised without a cloud
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                CLI (synth, diff, deploy, ...)               │
//! └────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │        stacks::emailer  →  resources::*  →  Stack           │
//! └────────────────────────────────────────────────────────────┘
//!                              │ synthesize
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────────┐
//! │    assembly     │ │   lint / diff   │ │  graph  →  deploy   │
//! └─────────────────┘ └─────────────────┘ └─────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use stackform::prelude::*;
//!
//! let app = App::new().with_base_dir(".");
//! let synth = stacks::emailer::synthesize(&app, "DailyContentEmailerCdkStack", Default::default())?;
//! assembly::write(&synth, app.outdir())?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::assembly;
    pub use crate::construct::{make_logical_id, ConstructPath};
    pub use crate::deploy::{Deployer, JsonPersistence, MemoryPersistence, StatePersistence};
    pub use crate::diff::TemplateDiff;
    pub use crate::error::{Error, Result};
    pub use crate::graph::{EdgeKind, ResourceGraph};
    pub use crate::lint::{LintConfig, Linter};
    pub use crate::resources::{
        Bucket, BucketProps, Code, DatabaseInstance, DatabaseInstanceProps, Function,
        FunctionProps, RestApi, RestApiProps, Runtime, Vpc, VpcProps,
    };
    pub use crate::stack::{App, Environment, Stack, StackProps, SynthesizedStack};
    pub use crate::stacks;
    pub use crate::template::{Expr, RemovalPolicy, ResourceType, Template};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Construct tree, construct paths and logical ids.
pub mod construct;

/// CloudFormation template model and intrinsic functions.
pub mod template;

/// Apps, stacks and synthesis.
pub mod stack;

/// Code asset fingerprinting and staging.
pub mod assets;

// ============================================================================
// Resources and Stacks
// ============================================================================

/// Typed resource builders.
pub mod resources;

/// Stack definitions.
pub mod stacks;

// ============================================================================
// Analysis and Output
// ============================================================================

/// Resource dependency graph.
pub mod graph;

/// Cloud assembly output.
pub mod assembly;

/// Template linting.
pub mod lint;

/// Template diffs.
pub mod diff;

/// Local deployment target.
pub mod deploy;

pub use error::{Error, Result};

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
