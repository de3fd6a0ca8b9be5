//! Typed resource constructs.
//!
//! Each construct expands into one or more template resources under its
//! own subtree of the stack and exposes the attributes other constructs
//! consume (ARNs, endpoint addresses, security groups). Cross-resource
//! wiring goes through two small traits:
//!
//! - [`Grantable`]: something with an IAM identity that can receive
//!   policy statements (roles, functions)
//! - [`Connectable`]: something with a security group that network rules
//!   can name as a source
//!
//! # Example
//!
//! ```rust,ignore
//! use stackform::prelude::*;
//!
//! let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 2, ..Default::default() })?;
//! let db = DatabaseInstance::new(&mut stack, "Instance", &vpc, DatabaseInstanceProps::default())?;
//! db.grant_connect(&mut stack, &mut handler)?;
//! ```

pub mod apigateway;
pub mod ec2;
pub mod iam;
pub mod lambda;
pub mod rds;
pub mod s3;

pub use apigateway::{routes_from_template, RestApi, RestApiProps, RouteInfo};
pub use ec2::{SecurityGroup, Subnet, SubnetType, Vpc, VpcProps};
pub use iam::{PolicyStatement, Role, RoleProps};
pub use lambda::{Code, Function, FunctionProps, Runtime};
pub use rds::{DatabaseEngine, DatabaseInstance, DatabaseInstanceProps};
pub use s3::{Bucket, BucketProps};

use crate::error::Result;
use crate::stack::Stack;

/// A principal that can receive IAM grants.
pub trait Grantable {
    /// Logical id of the resource that receives the grant.
    fn grantee_id(&self) -> &str;

    /// Attach a statement to the principal's identity policy.
    fn add_to_principal_policy(&mut self, stack: &mut Stack, statement: PolicyStatement) -> Result<()>;
}

/// A resource that sits behind a security group.
pub trait Connectable {
    /// Logical id of the resource itself.
    fn connectable_id(&self) -> &str;

    /// The security group, if the resource is placed in a network.
    fn security_group(&self) -> Option<&SecurityGroup>;
}
