//! Object storage buckets.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::construct::{ConstructPath, HIDDEN_FROM_HUMAN_ID};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::template::{Expr, RemovalPolicy, ResourceType, TemplateResource};

use super::iam::POLICY_VERSION;

/// Tag marking a bucket whose objects are purged before it is deleted.
pub const AUTO_DELETE_TAG: &str = "aws-cdk:auto-delete-objects";

static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("static regex"));

const PUBLIC_ACCESS_BLOCK: [&str; 4] = [
    "BlockPublicAcls",
    "BlockPublicPolicy",
    "IgnorePublicAcls",
    "RestrictPublicBuckets",
];

/// Properties of a [`Bucket`].
#[derive(Debug, Clone)]
pub struct BucketProps {
    /// Physical name; generated when `None`
    pub bucket_name: Option<String>,
    /// Index document for static website hosting
    pub website_index_document: Option<String>,
    /// Error document for static website hosting
    pub website_error_document: Option<String>,
    /// Grant anonymous `s3:GetObject`
    pub public_read_access: bool,
    /// Keep object versions
    pub versioned: bool,
    /// Applied as both deletion and update-replace policy
    pub removal_policy: RemovalPolicy,
    /// Empty the bucket before deleting it
    pub auto_delete_objects: bool,
}

impl Default for BucketProps {
    fn default() -> Self {
        Self {
            bucket_name: None,
            website_index_document: None,
            website_error_document: None,
            public_read_access: false,
            versioned: false,
            removal_policy: RemovalPolicy::Retain,
            auto_delete_objects: false,
        }
    }
}

/// An S3 bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    path: ConstructPath,
    logical_id: String,
    policy_id: Option<String>,
    website: bool,
    public_read: bool,
}

impl Bucket {
    /// Declare a bucket.
    pub fn new(stack: &mut Stack, id: &str, props: BucketProps) -> Result<Self> {
        if let Some(name) = &props.bucket_name {
            if !BUCKET_NAME.is_match(name) || name.contains("..") {
                return Err(Error::invalid_property(
                    id,
                    "bucket_name",
                    format!("'{name}' is not a valid bucket name"),
                ));
            }
        }
        if props.website_index_document.is_none() && props.website_error_document.is_some() {
            return Err(Error::invalid_property(
                id,
                "website_error_document",
                "an error document requires an index document",
            ));
        }
        if props.auto_delete_objects && props.removal_policy != RemovalPolicy::Delete {
            return Err(Error::invalid_property(
                id,
                "auto_delete_objects",
                "requires removal policy Delete",
            ));
        }

        let scope = stack.path().clone();
        let path = stack.add_construct(&scope, id, "aws-s3.Bucket")?;

        let mut resource = TemplateResource::new(ResourceType::Bucket);
        if let Some(name) = &props.bucket_name {
            resource = resource.with_property("BucketName", name.as_str());
        }
        if !props.public_read_access {
            resource = resource.with_property(
                "PublicAccessBlockConfiguration",
                Expr::object(PUBLIC_ACCESS_BLOCK.map(|key| (key, Expr::from(true)))),
            );
        }
        if props.auto_delete_objects {
            resource = resource.with_property(
                "Tags",
                Expr::array([Expr::object([
                    ("Key", Expr::str(AUTO_DELETE_TAG)),
                    ("Value", Expr::str("true")),
                ])]),
            );
        }
        if props.versioned {
            resource = resource.with_property(
                "VersioningConfiguration",
                Expr::object([("Status", Expr::str("Enabled"))]),
            );
        }
        if let Some(index) = &props.website_index_document {
            let mut website = vec![("IndexDocument", Expr::str(index.as_str()))];
            if let Some(error) = &props.website_error_document {
                website.push(("ErrorDocument", Expr::str(error.as_str())));
            }
            resource = resource.with_property("WebsiteConfiguration", Expr::object(website));
        }
        resource.apply_removal_policy(props.removal_policy);

        let logical_id = stack.add_resource(&path, HIDDEN_FROM_HUMAN_ID, resource)?;

        let mut bucket = Self {
            path,
            logical_id,
            policy_id: None,
            website: props.website_index_document.is_some(),
            public_read: props.public_read_access,
        };
        if props.public_read_access {
            bucket.grant_public_read(stack)?;
        }

        debug!(
            bucket = %bucket.logical_id,
            website = bucket.website,
            public_read = bucket.public_read,
            "declared bucket"
        );
        Ok(bucket)
    }

    fn grant_public_read(&mut self, stack: &mut Stack) -> Result<()> {
        let scope = stack.add_construct(&self.path, "Policy", "aws-s3.BucketPolicy")?;
        let statement = Expr::object([
            ("Action", Expr::str("s3:GetObject")),
            ("Effect", Expr::str("Allow")),
            ("Principal", Expr::object([("AWS", Expr::str("*"))])),
            (
                "Resource",
                Expr::concat(vec![self.arn(), Expr::str("/*")]),
            ),
        ]);
        let policy = stack.add_resource(
            &scope,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::Other("AWS::S3::BucketPolicy".into()))
                .with_property("Bucket", self.bucket_name())
                .with_property(
                    "PolicyDocument",
                    Expr::object([
                        ("Statement", Expr::array([statement])),
                        ("Version", Expr::str(POLICY_VERSION)),
                    ]),
                ),
        )?;
        self.policy_id = Some(policy);
        Ok(())
    }

    /// Logical id of the bucket.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Bucket name (`Ref`).
    pub fn bucket_name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Bucket ARN.
    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }

    /// Website endpoint URL.
    pub fn website_url(&self) -> Expr {
        Expr::get_att(&self.logical_id, "WebsiteURL")
    }

    /// Whether website hosting is configured.
    pub fn is_website(&self) -> bool {
        self.website
    }

    /// Whether anonymous reads are granted.
    pub fn is_public_read(&self) -> bool {
        self.public_read
    }

    /// Logical id of the public-read bucket policy.
    pub fn policy_id(&self) -> Option<&str> {
        self.policy_id.as_deref()
    }
}

/// Whether a bucket resource blocks all public access.
pub fn blocks_public_access(resource: &TemplateResource) -> bool {
    PUBLIC_ACCESS_BLOCK.iter().all(|key| {
        resource
            .property(&format!("PublicAccessBlockConfiguration.{key}"))
            .and_then(Expr::as_bool)
            .unwrap_or(false)
    })
}

/// Whether a bucket resource is tagged for auto-deletion of its objects.
pub fn auto_deletes_objects(resource: &TemplateResource) -> bool {
    resource
        .property("Tags")
        .map(Expr::items)
        .unwrap_or_default()
        .iter()
        .any(|tag| {
            tag.get("Key").and_then(Expr::as_str) == Some(AUTO_DELETE_TAG)
                && tag.get("Value").and_then(Expr::as_str) == Some("true")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{App, StackProps};

    fn stack() -> Stack {
        Stack::new(&App::new(), "BucketStack", StackProps::default()).unwrap()
    }

    #[test]
    fn test_private_website_bucket() {
        let mut stack = stack();
        let bucket = Bucket::new(
            &mut stack,
            "WebsiteBucket",
            BucketProps {
                website_index_document: Some("index.html".into()),
                removal_policy: RemovalPolicy::Delete,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(bucket.logical_id(), "WebsiteBucket75C24D94");
        assert!(bucket.is_website());
        assert!(!bucket.is_public_read());

        let resource = stack.resource(bucket.logical_id()).unwrap();
        assert_eq!(
            resource
                .property("WebsiteConfiguration.IndexDocument")
                .and_then(Expr::as_str),
            Some("index.html")
        );
        assert!(blocks_public_access(resource));
        assert!(!auto_deletes_objects(resource));
        assert_eq!(resource.deletion_policy, Some(RemovalPolicy::Delete));
    }

    #[test]
    fn test_public_bucket_gets_policy() {
        let mut stack = stack();
        let bucket = Bucket::new(
            &mut stack,
            "Site",
            BucketProps {
                website_index_document: Some("index.html".into()),
                public_read_access: true,
                ..Default::default()
            },
        )
        .unwrap();
        let resource = stack.resource(bucket.logical_id()).unwrap();
        assert!(!blocks_public_access(resource));
        assert_eq!(resource.deletion_policy, Some(RemovalPolicy::Retain));
        let policy = stack.resource(bucket.policy_id().unwrap()).unwrap();
        assert_eq!(policy.resource_type.as_str(), "AWS::S3::BucketPolicy");
    }

    #[test]
    fn test_auto_delete_requires_delete_policy() {
        let mut stack = stack();
        let err = Bucket::new(
            &mut stack,
            "Bucket",
            BucketProps {
                auto_delete_objects: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));

        let bucket = Bucket::new(
            &mut stack,
            "Bucket",
            BucketProps {
                auto_delete_objects: true,
                removal_policy: RemovalPolicy::Delete,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(auto_deletes_objects(stack.resource(bucket.logical_id()).unwrap()));
    }

    #[test]
    fn test_bucket_name_validation() {
        let mut stack = stack();
        for bad in ["UPPER", "a", "bad..name", "-leading"] {
            let props = BucketProps {
                bucket_name: Some(bad.into()),
                ..Default::default()
            };
            assert!(Bucket::new(&mut stack, "B", props).is_err(), "{bad}");
        }
    }
}
