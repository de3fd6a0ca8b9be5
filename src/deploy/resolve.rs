//! Intrinsic resolution and simulated physical resources.
//!
//! The local target stands in for the provisioning engine: it hands out
//! physical ids, invents the attributes a real service would report, and
//! resolves `Ref`, `Fn::GetAtt`, `Fn::Join`, `Fn::Select`, `Fn::GetAZs` and
//! `Fn::Sub` against the resources created so far.

use indexmap::IndexMap;
use rand::Rng;
use serde_json::{Map, Value};

use crate::template::intrinsic::{
    AWS_ACCOUNT_ID, AWS_PARTITION, AWS_REGION, AWS_STACK_NAME, AWS_URL_SUFFIX,
};
use crate::template::{Expr, ResourceType};

use super::{DeployedResource, StateError, StateResult};

/// Partition of the simulated account.
pub const PARTITION: &str = "aws";

/// URL suffix of the simulated account.
pub const URL_SUFFIX: &str = "amazonaws.com";

const LOWER_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const HEX: &[u8] = b"0123456789abcdef";

/// Random suffix length of generated names.
pub const NAME_SUFFIX_LEN: usize = 13;

/// Where and for whom expressions are resolved.
pub(crate) struct ResolveContext<'a> {
    pub stack_name: &'a str,
    pub account: &'a str,
    pub region: &'a str,
    pub resources: &'a IndexMap<String, DeployedResource>,
}

impl ResolveContext<'_> {
    /// Availability zones of the region.
    pub fn availability_zones(&self, region: &str) -> Vec<Value> {
        let region = if region.is_empty() { self.region } else { region };
        ["a", "b", "c"]
            .iter()
            .map(|zone| Value::String(format!("{region}{zone}")))
            .collect()
    }

    fn pseudo(&self, name: &str) -> Option<String> {
        match name {
            AWS_REGION => Some(self.region.to_string()),
            AWS_ACCOUNT_ID => Some(self.account.to_string()),
            AWS_PARTITION => Some(PARTITION.to_string()),
            AWS_URL_SUFFIX => Some(URL_SUFFIX.to_string()),
            AWS_STACK_NAME => Some(self.stack_name.to_string()),
            _ => None,
        }
    }

    fn error(owner: &str, expr: &Expr, message: impl Into<String>) -> StateError {
        StateError::Resolution {
            logical_id: owner.to_string(),
            expression: expr.to_json().to_string(),
            message: message.into(),
        }
    }

    fn reference(&self, owner: &str, expr: &Expr, id: &str) -> StateResult<String> {
        if let Some(value) = self.pseudo(id) {
            return Ok(value);
        }
        self.resources
            .get(id)
            .map(|r| r.physical_id.clone())
            .ok_or_else(|| Self::error(owner, expr, format!("'{id}' has not been created")))
    }

    fn attribute(&self, owner: &str, expr: &Expr, id: &str, attr: &str) -> StateResult<String> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| Self::error(owner, expr, format!("'{id}' has not been created")))?;
        resource.attributes.get(attr).cloned().ok_or_else(|| {
            Self::error(
                owner,
                expr,
                format!("{} has no attribute '{attr}'", resource.resource_type),
            )
        })
    }

    /// Resolve an expression to plain JSON on behalf of `owner`.
    pub fn resolve(&self, owner: &str, expr: &Expr) -> StateResult<Value> {
        Ok(match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve(owner, item))
                    .collect::<StateResult<_>>()?,
            ),
            Expr::Object(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(owner, value)?);
                }
                Value::Object(out)
            }
            Expr::Ref(id) => Value::String(self.reference(owner, expr, id)?),
            Expr::GetAtt(id, attr) => Value::String(self.attribute(owner, expr, id, attr)?),
            Expr::Join(delimiter, parts) => {
                let mut pieces = Vec::with_capacity(parts.len());
                for part in parts {
                    match self.resolve(owner, part)? {
                        Value::String(s) => pieces.push(s),
                        Value::Number(n) => pieces.push(n.to_string()),
                        other => {
                            return Err(Self::error(
                                owner,
                                expr,
                                format!("cannot join non-scalar {other}"),
                            ))
                        }
                    }
                }
                Value::String(pieces.join(delimiter))
            }
            Expr::Select(index, list) => match self.resolve(owner, list)? {
                Value::Array(items) => items.get(*index).cloned().ok_or_else(|| {
                    Self::error(
                        owner,
                        expr,
                        format!("index {index} out of range for {} item(s)", items.len()),
                    )
                })?,
                other => {
                    return Err(Self::error(owner, expr, format!("cannot select from {other}")))
                }
            },
            Expr::GetAzs(region) => Value::Array(self.availability_zones(region)),
            Expr::Sub(template) => Value::String(self.substitute(owner, expr, template)?),
        })
    }

    fn substitute(&self, owner: &str, expr: &Expr, template: &str) -> StateResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| Self::error(owner, expr, "unterminated variable"))?;
            let variable = &after[..end];
            if let Some(literal) = variable.strip_prefix('!') {
                out.push_str("${");
                out.push_str(literal);
                out.push('}');
            } else if let Some(value) = self.pseudo(variable) {
                out.push_str(&value);
            } else if let Some((id, attr)) = variable.split_once('.') {
                out.push_str(&self.attribute(owner, expr, id, attr)?);
            } else {
                out.push_str(&self.reference(owner, expr, variable)?);
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn random_string(rng: &mut impl Rng, len: usize, charset: &[u8]) -> String {
    (0..len)
        .map(|_| char::from(charset[rng.gen_range(0..charset.len())]))
        .collect()
}

fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

fn explicit_name(properties: &Value, key: &str) -> Option<String> {
    properties.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `<stack>-<logical id>-<random>` with the stack/logical part cut so the
/// whole fits `max` characters.
pub fn generated_name(rng: &mut impl Rng, stack: &str, logical_id: &str, max: usize) -> String {
    let suffix = random_string(rng, NAME_SUFFIX_LEN, LOWER);
    let prefix = truncate(
        &format!("{stack}-{logical_id}"),
        max.saturating_sub(NAME_SUFFIX_LEN + 1),
    );
    format!("{prefix}-{suffix}")
}

/// Physical id a new resource receives.
pub(crate) fn physical_id(
    rng: &mut impl Rng,
    ctx: &ResolveContext<'_>,
    logical_id: &str,
    resource_type: &ResourceType,
    properties: &Value,
) -> String {
    let stack = ctx.stack_name;
    match resource_type {
        ResourceType::Bucket => explicit_name(properties, "BucketName")
            .unwrap_or_else(|| generated_name(rng, stack, logical_id, 63).to_lowercase()),
        ResourceType::DbInstance => explicit_name(properties, "DBInstanceIdentifier")
            .unwrap_or_else(|| generated_name(rng, stack, logical_id, 63).to_lowercase()),
        ResourceType::Function => explicit_name(properties, "FunctionName")
            .unwrap_or_else(|| generated_name(rng, stack, logical_id, 64)),
        ResourceType::Role => generated_name(rng, stack, logical_id, 64),
        ResourceType::Secret => format!(
            "arn:{PARTITION}:secretsmanager:{}:{}:secret:{}-{}",
            ctx.region,
            ctx.account,
            logical_id,
            random_string(rng, 6, LOWER_ALNUM)
        ),
        ResourceType::Vpc => format!("vpc-{}", random_string(rng, 17, HEX)),
        ResourceType::Subnet => format!("subnet-{}", random_string(rng, 17, HEX)),
        ResourceType::RouteTable => format!("rtb-{}", random_string(rng, 17, HEX)),
        ResourceType::InternetGateway => format!("igw-{}", random_string(rng, 17, HEX)),
        ResourceType::NatGateway => format!("nat-{}", random_string(rng, 17, HEX)),
        ResourceType::SecurityGroup => format!("sg-{}", random_string(rng, 17, HEX)),
        ResourceType::SecurityGroupIngress => format!("sgr-{}", random_string(rng, 17, HEX)),
        ResourceType::SubnetRouteTableAssociation => {
            format!("rtbassoc-{}", random_string(rng, 17, HEX))
        }
        ResourceType::Eip => format!(
            "52.{}.{}.{}",
            rng.gen_range(0..=255u8),
            rng.gen_range(0..=255u8),
            rng.gen_range(1..=254u8)
        ),
        ResourceType::RestApi => random_string(rng, 10, LOWER_ALNUM),
        ResourceType::ApiResource | ResourceType::Deployment => random_string(rng, 6, LOWER_ALNUM),
        ResourceType::Stage => {
            explicit_name(properties, "StageName").unwrap_or_else(|| "prod".to_string())
        }
        _ => generated_name(rng, stack, logical_id, 128),
    }
}

fn engine_port(properties: &Value) -> String {
    if let Some(port) = properties.get("Port") {
        return match port {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    match properties.get("Engine").and_then(Value::as_str) {
        Some("postgres") => "5432".to_string(),
        _ => "3306".to_string(),
    }
}

/// Attributes a new resource reports for `Fn::GetAtt`.
pub(crate) fn attributes(
    rng: &mut impl Rng,
    ctx: &ResolveContext<'_>,
    resource_type: &ResourceType,
    physical_id: &str,
    properties: &Value,
) -> IndexMap<String, String> {
    let (account, region) = (ctx.account, ctx.region);
    let mut attrs = IndexMap::new();
    let mut set = |key: &str, value: String| {
        attrs.insert(key.to_string(), value);
    };
    match resource_type {
        ResourceType::Vpc => {
            if let Some(cidr) = explicit_name(properties, "CidrBlock") {
                set("CidrBlock", cidr);
            }
            set("DefaultSecurityGroup", format!("sg-{}", random_string(rng, 17, HEX)));
        }
        ResourceType::Subnet => {
            if let Some(zone) = explicit_name(properties, "AvailabilityZone") {
                set("AvailabilityZone", zone);
            }
            set("SubnetId", physical_id.to_string());
        }
        ResourceType::SecurityGroup => {
            set("GroupId", physical_id.to_string());
            if let Some(vpc) = explicit_name(properties, "VpcId") {
                set("VpcId", vpc);
            }
        }
        ResourceType::Eip => {
            set("AllocationId", format!("eipalloc-{}", random_string(rng, 17, HEX)));
            set("PublicIp", physical_id.to_string());
        }
        ResourceType::DbInstance => {
            set(
                "Endpoint.Address",
                format!(
                    "{physical_id}.{}.{region}.rds.{URL_SUFFIX}",
                    random_string(rng, 12, LOWER_ALNUM)
                ),
            );
            set("Endpoint.Port", engine_port(properties));
            set("DbiResourceId", format!("db-{}", random_string(rng, 26, UPPER_ALNUM)));
        }
        ResourceType::Bucket => {
            set("Arn", format!("arn:{PARTITION}:s3:::{physical_id}"));
            set("DomainName", format!("{physical_id}.s3.{URL_SUFFIX}"));
            set(
                "RegionalDomainName",
                format!("{physical_id}.s3.{region}.{URL_SUFFIX}"),
            );
            set(
                "WebsiteURL",
                format!("http://{physical_id}.s3-website-{region}.{URL_SUFFIX}"),
            );
        }
        ResourceType::Role => {
            set("Arn", format!("arn:{PARTITION}:iam::{account}:role/{physical_id}"));
            set("RoleId", format!("AROA{}", random_string(rng, 17, UPPER_ALNUM)));
        }
        ResourceType::Function => {
            set(
                "Arn",
                format!("arn:{PARTITION}:lambda:{region}:{account}:function:{physical_id}"),
            );
        }
        ResourceType::RestApi => {
            set("RootResourceId", random_string(rng, 10, LOWER_ALNUM));
        }
        ResourceType::ApiResource => {
            set("ResourceId", physical_id.to_string());
        }
        _ => {}
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    use crate::template::RemovalPolicy;

    fn deployed(id: &str, resource_type: ResourceType, physical: &str) -> DeployedResource {
        let now = Utc::now();
        DeployedResource {
            logical_id: id.to_string(),
            resource_type,
            physical_id: physical.to_string(),
            properties: json!({}),
            attributes: IndexMap::new(),
            deletion_policy: RemovalPolicy::Delete,
            update_replace_policy: RemovalPolicy::Delete,
            objects: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn resources() -> IndexMap<String, DeployedResource> {
        let mut db = deployed("Db", ResourceType::DbInstance, "stack-db-abc");
        db.attributes
            .insert("Endpoint.Address".into(), "stack-db-abc.x.eu-west-1.rds.amazonaws.com".into());
        let mut map = IndexMap::new();
        map.insert("Db".to_string(), db);
        map
    }

    fn ctx(resources: &IndexMap<String, DeployedResource>) -> ResolveContext<'_> {
        ResolveContext {
            stack_name: "Stack",
            account: "111122223333",
            region: "eu-west-1",
            resources,
        }
    }

    #[test]
    fn test_resolve_ref_and_getatt() {
        let resources = resources();
        let ctx = ctx(&resources);
        assert_eq!(ctx.resolve("Fn", &Expr::reference("Db")).unwrap(), json!("stack-db-abc"));
        assert_eq!(
            ctx.resolve("Fn", &Expr::get_att("Db", "Endpoint.Address")).unwrap(),
            json!("stack-db-abc.x.eu-west-1.rds.amazonaws.com")
        );
        assert!(matches!(
            ctx.resolve("Fn", &Expr::get_att("Db", "Arn")),
            Err(StateError::Resolution { .. })
        ));
        assert!(ctx.resolve("Fn", &Expr::reference("Missing")).is_err());
    }

    #[test]
    fn test_resolve_join_and_pseudo() {
        let resources = resources();
        let ctx = ctx(&resources);
        let expr = Expr::concat(vec![
            Expr::str("arn:"),
            Expr::partition(),
            Expr::str(":rds-db:"),
            Expr::region(),
            Expr::str(":"),
            Expr::account_id(),
        ]);
        assert_eq!(
            ctx.resolve("Fn", &expr).unwrap(),
            json!("arn:aws:rds-db:eu-west-1:111122223333")
        );
    }

    #[test]
    fn test_resolve_select_getazs() {
        let resources = resources();
        let ctx = ctx(&resources);
        let expr = Expr::Select(1, Box::new(Expr::GetAzs(String::new())));
        assert_eq!(ctx.resolve("Subnet", &expr).unwrap(), json!("eu-west-1b"));
        let out_of_range = Expr::Select(5, Box::new(Expr::GetAzs(String::new())));
        assert!(ctx.resolve("Subnet", &out_of_range).is_err());
    }

    #[test]
    fn test_resolve_sub() {
        let resources = resources();
        let ctx = ctx(&resources);
        let expr = Expr::Sub("assets-${AWS::AccountId}-${AWS::Region}/${Db}/${!Literal}".into());
        assert_eq!(
            ctx.resolve("Fn", &expr).unwrap(),
            json!("assets-111122223333-eu-west-1/stack-db-abc/${Literal}")
        );
    }

    #[test]
    fn test_generated_names() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = generated_name(&mut rng, "Stack", "WebsiteBucket75C24D94", 63);
        assert!(name.starts_with("Stack-WebsiteBucket75C24D94-"));
        assert_eq!(name.len(), "Stack-WebsiteBucket75C24D94-".len() + NAME_SUFFIX_LEN);

        let long = generated_name(&mut rng, &"S".repeat(80), "Id", 63);
        assert_eq!(long.len(), 63);
    }

    #[test]
    fn test_bucket_physical_id_is_lowercase() {
        let resources = IndexMap::new();
        let ctx = ctx(&resources);
        let mut rng = StdRng::seed_from_u64(1);
        let id = physical_id(&mut rng, &ctx, "WebsiteBucket75C24D94", &ResourceType::Bucket, &json!({}));
        assert_eq!(id, id.to_lowercase());
        let named = physical_id(
            &mut rng,
            &ctx,
            "Site",
            &ResourceType::Bucket,
            &json!({"BucketName": "my-site"}),
        );
        assert_eq!(named, "my-site");
    }

    #[test]
    fn test_db_attributes() {
        let resources = IndexMap::new();
        let ctx = ctx(&resources);
        let mut rng = StdRng::seed_from_u64(3);
        let attrs = attributes(
            &mut rng,
            &ctx,
            &ResourceType::DbInstance,
            "stack-instance-abc",
            &json!({"Engine": "mysql"}),
        );
        assert!(attrs["Endpoint.Address"].starts_with("stack-instance-abc."));
        assert!(attrs["Endpoint.Address"].ends_with(".eu-west-1.rds.amazonaws.com"));
        assert_eq!(attrs["Endpoint.Port"], "3306");
        assert!(attrs["DbiResourceId"].starts_with("db-"));
    }
}
