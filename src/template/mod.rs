//! CloudFormation template model.
//!
//! A [`Template`] is the output of synthesis: an ordered map of resources,
//! their properties as [`Expr`] trees, deletion policies, and outputs.
//! Typed relations recorded by constructs travel with the template in its
//! `Metadata` section so a template loaded from disk rebuilds the same
//! resource graph.

pub mod intrinsic;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::graph::Relation;

pub use intrinsic::Expr;

/// Template format version emitted in every template.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Resource metadata key holding the construct path.
pub const PATH_METADATA_KEY: &str = "aws:cdk:path";

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalPolicy {
    /// Physically delete the resource
    Delete,
    /// Keep the resource, orphaned from the stack
    Retain,
    /// Take a final snapshot, then delete
    Snapshot,
}

impl RemovalPolicy {
    /// Whether the underlying data is lost irrecoverably.
    pub fn is_destructive(self) -> bool {
        matches!(self, RemovalPolicy::Delete)
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalPolicy::Delete => write!(f, "Delete"),
            RemovalPolicy::Retain => write!(f, "Retain"),
            RemovalPolicy::Snapshot => write!(f, "Snapshot"),
        }
    }
}

macro_rules! resource_types {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Known CloudFormation resource types.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum ResourceType {
            $(
                #[doc = $name]
                $variant,
            )*
            /// Any other type, kept verbatim
            Other(String),
        }

        impl ResourceType {
            /// The CloudFormation type name.
            pub fn as_str(&self) -> &str {
                match self {
                    $(ResourceType::$variant => $name,)*
                    ResourceType::Other(name) => name,
                }
            }
        }

        impl FromStr for ResourceType {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(match s {
                    $($name => ResourceType::$variant,)*
                    other => ResourceType::Other(other.to_string()),
                })
            }
        }
    };
}

resource_types! {
    Vpc => "AWS::EC2::VPC",
    Subnet => "AWS::EC2::Subnet",
    RouteTable => "AWS::EC2::RouteTable",
    SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
    Route => "AWS::EC2::Route",
    Eip => "AWS::EC2::EIP",
    NatGateway => "AWS::EC2::NatGateway",
    InternetGateway => "AWS::EC2::InternetGateway",
    VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
    SecurityGroup => "AWS::EC2::SecurityGroup",
    SecurityGroupIngress => "AWS::EC2::SecurityGroupIngress",
    DbSubnetGroup => "AWS::RDS::DBSubnetGroup",
    DbInstance => "AWS::RDS::DBInstance",
    Secret => "AWS::SecretsManager::Secret",
    SecretTargetAttachment => "AWS::SecretsManager::SecretTargetAttachment",
    Bucket => "AWS::S3::Bucket",
    Role => "AWS::IAM::Role",
    Policy => "AWS::IAM::Policy",
    Function => "AWS::Lambda::Function",
    Permission => "AWS::Lambda::Permission",
    RestApi => "AWS::ApiGateway::RestApi",
    ApiResource => "AWS::ApiGateway::Resource",
    Method => "AWS::ApiGateway::Method",
    Deployment => "AWS::ApiGateway::Deployment",
    Stage => "AWS::ApiGateway::Stage",
}

impl ResourceType {
    /// Whether the resource holds data that a delete destroys.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ResourceType::DbInstance | ResourceType::Bucket | ResourceType::Secret
        )
    }

    /// Properties whose change forces the resource to be replaced.
    pub fn replacement_properties(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Vpc => &["CidrBlock"],
            ResourceType::Subnet => &["AvailabilityZone", "CidrBlock", "VpcId"],
            ResourceType::SecurityGroup => &["GroupDescription", "VpcId"],
            ResourceType::DbInstance => &["Engine", "DBSubnetGroupName", "DBName"],
            ResourceType::Bucket => &["BucketName"],
            ResourceType::Function => &["FunctionName"],
            ResourceType::ApiResource => &["ParentId", "PathPart", "RestApiId"],
            ResourceType::Method => &["HttpMethod", "ResourceId", "RestApiId"],
            ResourceType::Deployment => &["RestApiId"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or(ResourceType::Other(name)))
    }
}

/// A resource entry in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    /// CloudFormation type
    #[serde(rename = "Type")]
    pub resource_type: ResourceType,
    /// Resource properties
    #[serde(rename = "Properties", default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Expr>,
    /// Explicit dependencies
    #[serde(
        rename = "DependsOn",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub depends_on: Vec<String>,
    /// Policy applied when the resource is deleted
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    /// Policy applied when an update replaces the resource
    #[serde(
        rename = "UpdateReplacePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_replace_policy: Option<RemovalPolicy>,
    /// Free-form metadata (construct path)
    #[serde(rename = "Metadata", default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

impl TemplateResource {
    /// New resource of the given type with no properties.
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            properties: IndexMap::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
            metadata: IndexMap::new(),
        }
    }

    /// Set a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set both deletion and update-replace policies.
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.apply_removal_policy(policy);
        self
    }

    /// Set both deletion and update-replace policies in place.
    pub fn apply_removal_policy(&mut self, policy: RemovalPolicy) {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
    }

    /// Add an explicit dependency, ignoring duplicates.
    pub fn add_depends_on(&mut self, logical_id: &str) {
        if !self.depends_on.iter().any(|d| d == logical_id) {
            self.depends_on.push(logical_id.to_string());
        }
    }

    /// Effective deletion policy (`Delete` when unset).
    pub fn effective_deletion_policy(&self) -> RemovalPolicy {
        self.deletion_policy.unwrap_or(RemovalPolicy::Delete)
    }

    /// Construct path recorded in metadata.
    pub fn construct_path(&self) -> Option<&str> {
        self.metadata.get(PATH_METADATA_KEY).and_then(Value::as_str)
    }

    /// Follow a dotted path through the properties.
    pub fn property(&self, path: &str) -> Option<&Expr> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.properties.get(head)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }

    /// Logical ids this resource references through properties or `DependsOn`.
    pub fn references(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for value in self.properties.values() {
            for id in value.references() {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        for id in &self.depends_on {
            if !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

/// A template output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Output value
    #[serde(rename = "Value")]
    pub value: Expr,
    /// Description
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Template-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Typed relations between resources
    #[serde(
        rename = "stackform:relations",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub relations: Vec<Relation>,
}

impl TemplateMetadata {
    fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// A synthesized CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Format version
    #[serde(rename = "AWSTemplateFormatVersion", default = "default_format_version")]
    pub format_version: String,
    /// Stack description
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template metadata
    #[serde(rename = "Metadata", default, skip_serializing_if = "TemplateMetadata::is_empty")]
    pub metadata: TemplateMetadata,
    /// Resources by logical id
    #[serde(rename = "Resources", default)]
    pub resources: IndexMap<String, TemplateResource>,
    /// Outputs by name
    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    /// Empty template.
    pub fn new() -> Self {
        Self {
            format_version: default_format_version(),
            description: None,
            metadata: TemplateMetadata::default(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Parse a template from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let template: Template = serde_json::from_str(content)?;
        Ok(template)
    }

    /// Parse a template from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let template: Template = serde_yaml::from_str(content)?;
        Ok(template)
    }

    /// Pretty JSON rendering.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// YAML rendering.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&TemplateResource> {
        self.resources.get(logical_id)
    }

    /// Resources of one type, in template order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a ResourceType,
    ) -> impl Iterator<Item = (&'a String, &'a TemplateResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| &r.resource_type == resource_type)
    }

    /// Number of resources of one type.
    pub fn count_of(&self, resource_type: &ResourceType) -> usize {
        self.resources_of_type(resource_type).count()
    }

    /// Resource counts per type, in first-seen order.
    pub fn type_counts(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::new();
        for resource in self.resources.values() {
            *counts
                .entry(resource.resource_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    /// Check that every reference points at a resource in this template.
    pub fn validate_references(&self) -> Result<()> {
        for (logical_id, resource) in &self.resources {
            for target in resource.references() {
                if !self.resources.contains_key(&target) {
                    return Err(Error::UnresolvedReference {
                        from: logical_id.clone(),
                        target,
                    });
                }
            }
        }
        for (name, output) in &self.outputs {
            for target in output.value.references() {
                if !self.resources.contains_key(&target) {
                    return Err(Error::UnresolvedReference {
                        from: format!("Outputs.{name}"),
                        target,
                    });
                }
            }
        }
        for relation in &self.metadata.relations {
            for target in [&relation.from, &relation.to] {
                if !self.resources.contains_key(target) {
                    return Err(Error::UnresolvedReference {
                        from: format!("relation {}", relation.kind),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON rendering.
    pub fn fingerprint(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeKind;
    use serde_json::json;

    fn sample() -> Template {
        let mut template = Template::new();
        template.resources.insert(
            "MyVpcF9F0CA6F".into(),
            TemplateResource::new(ResourceType::Vpc).with_property("CidrBlock", "10.0.0.0/16"),
        );
        template.resources.insert(
            "Sg".into(),
            TemplateResource::new(ResourceType::SecurityGroup)
                .with_property("VpcId", Expr::reference("MyVpcF9F0CA6F")),
        );
        template
    }

    #[test]
    fn test_resource_type_round_trip() {
        let parsed: ResourceType = "AWS::RDS::DBInstance".parse().unwrap();
        assert_eq!(parsed, ResourceType::DbInstance);
        let other: ResourceType = "AWS::SNS::Topic".parse().unwrap();
        assert_eq!(other.as_str(), "AWS::SNS::Topic");
        assert!(ResourceType::Bucket.is_stateful());
        assert!(!ResourceType::Function.is_stateful());
    }

    #[test]
    fn test_serialized_shape() {
        let mut template = sample();
        template
            .resources
            .get_mut("Sg")
            .unwrap()
            .apply_removal_policy(RemovalPolicy::Retain);
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], json!("2010-09-09"));
        assert_eq!(value["Resources"]["MyVpcF9F0CA6F"]["Type"], json!("AWS::EC2::VPC"));
        assert_eq!(
            value["Resources"]["Sg"]["Properties"]["VpcId"],
            json!({"Ref": "MyVpcF9F0CA6F"})
        );
        assert_eq!(value["Resources"]["Sg"]["DeletionPolicy"], json!("Retain"));
        assert!(value.get("Outputs").is_none());
    }

    #[test]
    fn test_parse_depends_on_string() {
        let template = Template::from_json_str(
            r#"{"Resources": {"A": {"Type": "AWS::S3::Bucket"},
                "B": {"Type": "AWS::S3::Bucket", "DependsOn": "A"}}}"#,
        )
        .unwrap();
        assert_eq!(template.resource("B").unwrap().depends_on, vec!["A"]);
        assert_eq!(template.format_version, FORMAT_VERSION);
    }

    #[test]
    fn test_validate_references() {
        let mut template = sample();
        assert!(template.validate_references().is_ok());

        template.resources.insert(
            "Broken".into(),
            TemplateResource::new(ResourceType::Subnet)
                .with_property("VpcId", Expr::reference("Missing")),
        );
        let err = template.validate_references().unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { ref target, .. } if target == "Missing"));
    }

    #[test]
    fn test_relations_travel_in_metadata() {
        let mut template = sample();
        template.metadata.relations.push(Relation::new(
            "MyVpcF9F0CA6F",
            "Sg",
            EdgeKind::NetworkPlacement,
        ));
        let text = template.to_json_pretty().unwrap();
        let parsed = Template::from_json_str(&text).unwrap();
        assert_eq!(parsed.metadata.relations.len(), 1);
        assert_eq!(parsed, template);
    }

    #[test]
    fn test_counts() {
        let template = sample();
        assert_eq!(template.count_of(&ResourceType::Vpc), 1);
        assert_eq!(template.type_counts()["AWS::EC2::SecurityGroup"], 1);
    }
}
