//! List command - list resources or routes
//!
//! This module implements the `list` subcommand.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use stackform::resources::apigateway::routes_from_template;

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// List API routes and their handlers instead of resources
    #[arg(long)]
    pub routes: bool,

    /// Only list resources of this type (e.g. AWS::Lambda::Function)
    #[arg(long = "type", value_name = "TYPE")]
    pub resource_type: Option<String>,
}

#[derive(Serialize)]
struct ResourceRow<'a> {
    logical_id: &'a str,
    resource_type: &'a str,
    path: Option<&'a str>,
    deletion_policy: String,
}

impl ListArgs {
    /// Execute the list command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let synth = ctx.synthesize()?;
        let template = &synth.template;

        if self.routes {
            let routes = routes_from_template(template);
            ctx.output.emit(&routes)?;
            let rows: Vec<Vec<String>> = routes
                .iter()
                .map(|r| {
                    vec![
                        r.method.clone(),
                        r.path.clone(),
                        r.handler.clone().unwrap_or_else(|| "-".to_string()),
                    ]
                })
                .collect();
            ctx.output.table(&["Method", "Path", "Handler"], &rows);
            return Ok(0);
        }

        let resources: Vec<ResourceRow<'_>> = template
            .resources
            .iter()
            .filter(|(_, r)| {
                self.resource_type
                    .as_deref()
                    .map_or(true, |ty| r.resource_type.as_str() == ty)
            })
            .map(|(id, r)| ResourceRow {
                logical_id: id,
                resource_type: r.resource_type.as_str(),
                path: r.construct_path(),
                deletion_policy: r.effective_deletion_policy().to_string(),
            })
            .collect();

        ctx.output.emit(&resources)?;
        let rows: Vec<Vec<String>> = resources
            .iter()
            .map(|r| {
                vec![
                    r.logical_id.to_string(),
                    r.resource_type.to_string(),
                    r.deletion_policy.clone(),
                ]
            })
            .collect();
        ctx.output.table(&["Logical id", "Type", "On delete"], &rows);

        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_args_parsing() {
        let args = ListArgs::try_parse_from(["list", "--routes"]).unwrap();
        assert!(args.routes);
        let args = ListArgs::try_parse_from(["list", "--type", "AWS::S3::Bucket"]).unwrap();
        assert_eq!(args.resource_type.as_deref(), Some("AWS::S3::Bucket"));
    }
}
