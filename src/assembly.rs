//! Cloud assembly output.
//!
//! A synthesized stack is written as a directory:
//!
//! ```text
//! cdk.out/
//! ├── manifest.json
//! ├── tree.json
//! ├── <Stack>.template.json
//! └── asset.<sha256>/...
//! ```

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::assets::Asset;
use crate::error::Result;
use crate::stack::SynthesizedStack;
use crate::template::Template;

/// Version of the manifest schema written.
pub const MANIFEST_VERSION: &str = "36.0.0";

/// Manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Construct tree file name.
pub const TREE_FILE: &str = "tree.json";

/// One artifact in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact type
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Target environment for stacks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Type-specific properties
    #[serde(default)]
    pub properties: Value,
}

/// The `manifest.json` of an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version
    pub version: String,
    /// Artifacts by id
    pub artifacts: IndexMap<String, Artifact>,
}

impl Manifest {
    /// Template file of a stack artifact.
    pub fn template_file(&self, stack_name: &str) -> Option<&str> {
        self.artifacts
            .get(stack_name)?
            .properties
            .get("templateFile")?
            .as_str()
    }

    /// Names of the stack artifacts.
    pub fn stacks(&self) -> Vec<&str> {
        self.artifacts
            .iter()
            .filter(|(_, a)| a.artifact_type == "aws:cloudformation:stack")
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Paths written for one stack.
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    /// Assembly directory
    pub outdir: PathBuf,
    /// Template file
    pub template: PathBuf,
    /// Manifest file
    pub manifest: PathBuf,
    /// Tree file
    pub tree: PathBuf,
    /// Staged asset directories
    pub assets: Vec<PathBuf>,
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn asset_manifest(assets: &[Asset]) -> Value {
    let files: serde_json::Map<String, Value> = assets
        .iter()
        .map(|asset| {
            (
                asset.fingerprint.clone(),
                json!({
                    "source": {
                        "path": asset.staging_name(),
                        "packaging": asset.packaging,
                    },
                    "objectKey": asset.object_key(),
                }),
            )
        })
        .collect();
    Value::Object(files)
}

/// Write a synthesized stack into `outdir`.
pub fn write(synth: &SynthesizedStack, outdir: &Path) -> Result<AssemblyOutput> {
    fs::create_dir_all(outdir)?;

    let template_path = outdir.join(synth.template_file());
    write_json(&template_path, &synth.template)?;

    let tree_path = outdir.join(TREE_FILE);
    write_json(
        &tree_path,
        &json!({
            "version": "tree-0.1",
            "tree": synth.tree.to_tree_json(),
        }),
    )?;

    let mut staged = Vec::with_capacity(synth.assets.len());
    for asset in &synth.assets {
        staged.push(asset.stage(outdir)?);
    }

    let mut artifacts = IndexMap::new();
    artifacts.insert(
        synth.stack_name.clone(),
        Artifact {
            artifact_type: "aws:cloudformation:stack".to_string(),
            environment: Some(synth.environment.uri()),
            properties: json!({
                "templateFile": synth.template_file(),
                "assets": asset_manifest(&synth.assets),
            }),
        },
    );
    artifacts.insert(
        "Tree".to_string(),
        Artifact {
            artifact_type: "cdk:tree".to_string(),
            environment: None,
            properties: json!({ "file": TREE_FILE }),
        },
    );
    let manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        artifacts,
    };
    let manifest_path = outdir.join(MANIFEST_FILE);
    write_json(&manifest_path, &manifest)?;

    info!(
        outdir = %outdir.display(),
        stack = %synth.stack_name,
        assets = staged.len(),
        "wrote cloud assembly"
    );

    Ok(AssemblyOutput {
        outdir: outdir.to_path_buf(),
        template: template_path,
        manifest: manifest_path,
        tree: tree_path,
        assets: staged,
    })
}

/// Read the manifest of an assembly.
pub fn read_manifest(outdir: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(outdir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a stack's template back from an assembly.
pub fn read_template(outdir: &Path, stack_name: &str) -> Result<Template> {
    let manifest = read_manifest(outdir)?;
    let file = manifest
        .template_file(stack_name)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{stack_name}.template.json"));
    Template::from_json_str(&fs::read_to_string(outdir.join(file))?)
}
