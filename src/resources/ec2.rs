//! Networking: VPC, subnets, gateways and security groups.

use std::net::Ipv4Addr;

use serde_json::Value;
use tracing::debug;

use crate::construct::{ConstructPath, HIDDEN_FROM_HUMAN_ID};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::template::{Expr, ResourceType, TemplateResource};

/// Default VPC address range.
pub const DEFAULT_CIDR: &str = "10.0.0.0/16";

/// Narrowest subnet the provider accepts.
const MAX_SUBNET_PREFIX: u8 = 28;

/// Default number of availability zones.
const DEFAULT_MAX_AZS: usize = 3;

/// Subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    /// Routes to an internet gateway
    Public,
    /// Routes outbound through a NAT gateway
    Private,
}

impl SubnetType {
    /// Display name used in ids and tags.
    pub fn name(self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::Private => "Private",
        }
    }
}

/// Properties of a [`Vpc`].
#[derive(Debug, Clone)]
pub struct VpcProps {
    /// Address range
    pub cidr: String,
    /// Upper bound on availability zones
    pub max_azs: usize,
    /// NAT gateways; one per AZ when `None`
    pub nat_gateways: Option<usize>,
}

impl Default for VpcProps {
    fn default() -> Self {
        Self {
            cidr: DEFAULT_CIDR.to_string(),
            max_azs: DEFAULT_MAX_AZS,
            nat_gateways: None,
        }
    }
}

/// A subnet created by a [`Vpc`].
#[derive(Debug, Clone)]
pub struct Subnet {
    /// Logical id of the subnet
    pub logical_id: String,
    /// Logical id of its route table
    pub route_table_id: String,
    /// Tier
    pub subnet_type: SubnetType,
    /// Availability zone expression
    pub availability_zone: Expr,
    /// Address range
    pub cidr: String,
    path: ConstructPath,
}

impl Subnet {
    /// `Ref` of the subnet id.
    pub fn subnet_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }
}

/// An isolated network with one public and one private subnet per AZ.
#[derive(Debug, Clone)]
pub struct Vpc {
    path: ConstructPath,
    logical_id: String,
    internet_gateway_id: String,
    public_subnets: Vec<Subnet>,
    private_subnets: Vec<Subnet>,
    nat_gateways: Vec<String>,
}

impl Vpc {
    /// Declare a VPC.
    pub fn new(stack: &mut Stack, id: &str, props: VpcProps) -> Result<Self> {
        let zones = stack.availability_zones(props.max_azs)?;
        let (base, prefix) = parse_cidr(&props.cidr)?;

        let tiers = [SubnetType::Public, SubnetType::Private];
        let blocks = split_cidr(base, prefix, zones.len() * tiers.len()).ok_or_else(|| {
            Error::invalid_property(
                id,
                "cidr",
                format!(
                    "{} is too small for {} subnets",
                    props.cidr,
                    zones.len() * tiers.len()
                ),
            )
        })?;

        let scope = stack.path().clone();
        let path = stack.add_construct(&scope, id, "aws-ec2.Vpc")?;
        let logical_id = stack.add_resource(
            &path,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::Vpc)
                .with_property("CidrBlock", props.cidr.as_str())
                .with_property("EnableDnsHostnames", true)
                .with_property("EnableDnsSupport", true)
                .with_property("InstanceTenancy", "default")
                .with_property("Tags", name_tag(&path.to_string())),
        )?;

        let igw = stack.add_resource(
            &path,
            "IGW",
            TemplateResource::new(ResourceType::InternetGateway)
                .with_property("Tags", name_tag(&path.to_string())),
        )?;
        let attachment = stack.add_resource(
            &path,
            "VPCGW",
            TemplateResource::new(ResourceType::VpcGatewayAttachment)
                .with_property("InternetGatewayId", Expr::reference(&igw))
                .with_property("VpcId", Expr::reference(&logical_id)),
        )?;

        let mut vpc = Self {
            path,
            logical_id,
            internet_gateway_id: igw,
            public_subnets: Vec::new(),
            private_subnets: Vec::new(),
            nat_gateways: Vec::new(),
        };

        let nat_count = props.nat_gateways.unwrap_or(zones.len()).min(zones.len());
        let mut blocks = blocks.into_iter();
        for (index, zone) in zones.iter().enumerate() {
            let cidr = blocks.next().unwrap_or_default();
            let subnet = vpc.add_subnet(stack, SubnetType::Public, index, zone, cidr)?;
            let route = Self::add_default_route(
                stack,
                &subnet,
                ("GatewayId", Expr::reference(&vpc.internet_gateway_id)),
            )?;
            if let Some(resource) = stack.resource_mut(&route) {
                resource.add_depends_on(&attachment);
            }
            if index < nat_count {
                vpc.add_nat_gateway(stack, &subnet, index)?;
            }
            vpc.public_subnets.push(subnet);
        }

        for (index, zone) in zones.iter().enumerate() {
            let cidr = blocks.next().unwrap_or_default();
            let subnet = vpc.add_subnet(stack, SubnetType::Private, index, zone, cidr)?;
            if !vpc.nat_gateways.is_empty() {
                let nat = vpc.nat_gateways[index % vpc.nat_gateways.len()].clone();
                Self::add_default_route(stack, &subnet, ("NatGatewayId", Expr::reference(nat)))?;
            }
            vpc.private_subnets.push(subnet);
        }

        debug!(
            vpc = %vpc.logical_id,
            azs = zones.len(),
            nat_gateways = vpc.nat_gateways.len(),
            "declared vpc"
        );
        Ok(vpc)
    }

    fn add_subnet(
        &self,
        stack: &mut Stack,
        subnet_type: SubnetType,
        index: usize,
        zone: &Expr,
        cidr: String,
    ) -> Result<Subnet> {
        let name = format!("{}Subnet{}", subnet_type.name(), index + 1);
        let scope = stack.add_construct(&self.path, &name, "aws-ec2.Subnet")?;
        let public = subnet_type == SubnetType::Public;

        let logical_id = stack.add_resource(
            &scope,
            "Subnet",
            TemplateResource::new(ResourceType::Subnet)
                .with_property("AvailabilityZone", zone.clone())
                .with_property("CidrBlock", cidr.as_str())
                .with_property("MapPublicIpOnLaunch", public)
                .with_property("VpcId", self.vpc_id())
                .with_property(
                    "Tags",
                    Expr::array([
                        tag("Name", &scope.to_string()),
                        tag("aws-cdk:subnet-name", subnet_type.name()),
                        tag("aws-cdk:subnet-type", subnet_type.name()),
                    ]),
                ),
        )?;
        let route_table_id = stack.add_resource(
            &scope,
            "RouteTable",
            TemplateResource::new(ResourceType::RouteTable)
                .with_property("VpcId", self.vpc_id())
                .with_property("Tags", name_tag(&scope.to_string())),
        )?;
        stack.add_resource(
            &scope,
            "RouteTableAssociation",
            TemplateResource::new(ResourceType::SubnetRouteTableAssociation)
                .with_property("RouteTableId", Expr::reference(&route_table_id))
                .with_property("SubnetId", Expr::reference(&logical_id)),
        )?;

        Ok(Subnet {
            logical_id,
            route_table_id,
            subnet_type,
            availability_zone: zone.clone(),
            cidr,
            path: scope,
        })
    }

    fn add_default_route(
        stack: &mut Stack,
        subnet: &Subnet,
        target: (&str, Expr),
    ) -> Result<String> {
        stack.add_resource(
            &subnet.path,
            "DefaultRoute",
            TemplateResource::new(ResourceType::Route)
                .with_property("DestinationCidrBlock", "0.0.0.0/0")
                .with_property(target.0, target.1)
                .with_property("RouteTableId", Expr::reference(&subnet.route_table_id)),
        )
    }

    fn add_nat_gateway(&mut self, stack: &mut Stack, subnet: &Subnet, index: usize) -> Result<()> {
        let scope = &subnet.path;
        let eip = stack.add_resource(
            scope,
            "EIP",
            TemplateResource::new(ResourceType::Eip)
                .with_property("Domain", "vpc")
                .with_property("Tags", name_tag(&scope.to_string())),
        )?;
        let nat = stack.add_resource(
            scope,
            "NATGateway",
            TemplateResource::new(ResourceType::NatGateway)
                .with_property("AllocationId", Expr::get_att(&eip, "AllocationId"))
                .with_property("SubnetId", subnet.subnet_id())
                .with_property("Tags", name_tag(&scope.to_string())),
        )?;

        let association = stack
            .logical_id_at(&scope.child("RouteTableAssociation"))
            .map(str::to_string);
        let route = stack.logical_id_at(&scope.child("DefaultRoute")).map(str::to_string);
        if let Some(resource) = stack.resource_mut(&nat) {
            for dep in [route, association].into_iter().flatten() {
                resource.add_depends_on(&dep);
            }
        }

        debug!(nat = %nat, az = index + 1, "added nat gateway");
        self.nat_gateways.push(nat);
        Ok(())
    }

    /// Logical id of the VPC resource.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// `Ref` of the VPC id.
    pub fn vpc_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Construct path.
    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    /// Public subnets, one per AZ.
    pub fn public_subnets(&self) -> &[Subnet] {
        &self.public_subnets
    }

    /// Private subnets, one per AZ.
    pub fn private_subnets(&self) -> &[Subnet] {
        &self.private_subnets
    }

    /// `Ref`s of the private subnet ids, where databases and handlers go.
    pub fn private_subnet_ids(&self) -> Vec<Expr> {
        self.private_subnets.iter().map(Subnet::subnet_id).collect()
    }

    /// Number of availability zones spanned.
    pub fn az_count(&self) -> usize {
        self.public_subnets.len()
    }

    /// Logical ids of the NAT gateways.
    pub fn nat_gateways(&self) -> &[String] {
        &self.nat_gateways
    }
}

/// A security group inside a VPC.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    path: ConstructPath,
    logical_id: String,
}

impl SecurityGroup {
    /// Declare a security group allowing all outbound traffic.
    pub fn new(
        stack: &mut Stack,
        scope: &ConstructPath,
        id: &str,
        vpc: &Vpc,
        description: &str,
    ) -> Result<Self> {
        let path = stack.add_construct(scope, id, "aws-ec2.SecurityGroup")?;
        let logical_id = stack.add_resource(
            &path,
            HIDDEN_FROM_HUMAN_ID,
            TemplateResource::new(ResourceType::SecurityGroup)
                .with_property("GroupDescription", description)
                .with_property(
                    "SecurityGroupEgress",
                    Expr::array([Expr::object([
                        ("CidrIp", Expr::str("0.0.0.0/0")),
                        ("Description", Expr::str("Allow all outbound traffic by default")),
                        ("IpProtocol", Expr::str("-1")),
                    ])]),
                )
                .with_property("VpcId", vpc.vpc_id()),
        )?;
        Ok(Self { path, logical_id })
    }

    /// Logical id of the group.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// `Fn::GetAtt` of the group id.
    pub fn group_id(&self) -> Expr {
        Expr::get_att(&self.logical_id, "GroupId")
    }

    /// Allow TCP `port` from members of `source`. Returns the rule's logical id.
    pub fn add_ingress_from(
        &self,
        stack: &mut Stack,
        source: &SecurityGroup,
        port: u16,
        description: &str,
    ) -> Result<String> {
        let id = format!("from {}:{port}", source.logical_id);
        stack.add_resource(
            &self.path,
            &id,
            TemplateResource::new(ResourceType::SecurityGroupIngress)
                .with_property("Description", description)
                .with_property("FromPort", port)
                .with_property("GroupId", self.group_id())
                .with_property("IpProtocol", "tcp")
                .with_property("SourceSecurityGroupId", source.group_id())
                .with_property("ToPort", port),
        )
    }
}

fn tag(key: &str, value: &str) -> Expr {
    Expr::object([("Key", Expr::str(key)), ("Value", Expr::str(value))])
}

fn name_tag(value: &str) -> Expr {
    Expr::array([tag("Name", value)])
}

/// Parse `a.b.c.d/n`.
pub fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let invalid = |message: &str| Error::invalid_property("Vpc", "cidr", format!("{cidr}: {message}"));

    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid("expected <address>/<prefix>"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("invalid IPv4 address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("invalid prefix length"))?;
    if !(16..=MAX_SUBNET_PREFIX).contains(&prefix) {
        return Err(invalid("prefix must be between /16 and /28"));
    }
    Ok((u32::from(addr), prefix))
}

/// Split a block into `count` equal power-of-two sub-blocks.
fn split_cidr(base: u32, prefix: u8, count: usize) -> Option<Vec<String>> {
    if count == 0 {
        return Some(Vec::new());
    }
    let bits = u8::try_from(count.next_power_of_two().trailing_zeros()).ok()?;
    let sub_prefix = prefix.checked_add(bits)?;
    if sub_prefix > MAX_SUBNET_PREFIX {
        return None;
    }
    let size = 1u32 << (32 - sub_prefix);
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = base & mask;

    Some(
        (0..count)
            .map(|i| {
                let start = network + size * u32::try_from(i).unwrap_or(0);
                format!("{}/{sub_prefix}", Ipv4Addr::from(start))
            })
            .collect(),
    )
}

/// Whether a resource's tags mark it as a public subnet.
pub fn is_public_subnet(resource: &TemplateResource) -> bool {
    resource.resource_type == ResourceType::Subnet
        && resource
            .property("MapPublicIpOnLaunch")
            .and_then(Expr::as_bool)
            .unwrap_or(false)
}

/// Name tag of a resource, if any.
pub fn name_of(resource: &TemplateResource) -> Option<String> {
    resource.property("Tags")?.items().iter().find_map(|t| {
        match (t.get("Key"), t.get("Value")) {
            (Some(Expr::Literal(Value::String(k))), Some(v)) if k == "Name" => {
                v.as_str().map(str::to_string)
            }
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{App, Environment, StackProps};

    fn stack() -> Stack {
        Stack::new(&App::new(), "NetStack", StackProps::default()).unwrap()
    }

    #[test]
    fn test_split_cidr() {
        let (base, prefix) = parse_cidr("10.0.0.0/16").unwrap();
        assert_eq!(
            split_cidr(base, prefix, 4).unwrap(),
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
        assert_eq!(split_cidr(base, prefix, 6).unwrap()[5], "10.0.160.0/19");
        let (base, prefix) = parse_cidr("10.0.0.0/27").unwrap();
        assert!(split_cidr(base, prefix, 4).is_none());
    }

    #[test]
    fn test_parse_cidr_rejects_garbage() {
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("10.0.0.300/16").is_err());
        assert!(parse_cidr("10.0.0.0/8").is_err());
    }

    #[test]
    fn test_two_az_vpc_shape() {
        let mut stack = stack();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 2, ..Default::default() }).unwrap();
        assert_eq!(vpc.logical_id(), "MyVpcF9F0CA6F");
        assert_eq!(vpc.az_count(), 2);
        assert_eq!(vpc.private_subnet_ids().len(), 2);
        assert_eq!(vpc.nat_gateways().len(), 2);

        let template = stack.template();
        assert_eq!(template.count_of(&ResourceType::Vpc), 1);
        assert_eq!(template.count_of(&ResourceType::Subnet), 4);
        assert_eq!(template.count_of(&ResourceType::RouteTable), 4);
        assert_eq!(template.count_of(&ResourceType::Route), 4);
        assert_eq!(template.count_of(&ResourceType::NatGateway), 2);
        assert_eq!(template.count_of(&ResourceType::InternetGateway), 1);

        let public = template
            .resources
            .values()
            .filter(|r| is_public_subnet(r))
            .count();
        assert_eq!(public, 2);
        assert!(template.validate_references().is_ok());
    }

    #[test]
    fn test_env_agnostic_zones_use_get_azs() {
        let mut stack = stack();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 2, ..Default::default() }).unwrap();
        let zone = &vpc.public_subnets()[1].availability_zone;
        assert_eq!(zone, &Expr::Select(1, Box::new(Expr::GetAzs(String::new()))));
    }

    #[test]
    fn test_pinned_region_zones() {
        let props = StackProps {
            env: Environment::new("123456789012", "us-east-1"),
            description: None,
        };
        let mut stack = Stack::new(&App::new(), "NetStack", props).unwrap();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 3, ..Default::default() }).unwrap();
        assert_eq!(vpc.az_count(), 3);
        assert_eq!(vpc.private_subnets()[2].availability_zone, Expr::str("us-east-1c"));
        assert_eq!(vpc.private_subnets()[2].cidr, "10.0.160.0/19");
    }

    #[test]
    fn test_zero_azs_rejected() {
        let mut stack = stack();
        let err = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 0, ..Default::default() }).unwrap_err();
        assert!(matches!(err, Error::InvalidAzCount { .. }));
    }

    #[test]
    fn test_single_nat_gateway() {
        let mut stack = stack();
        let vpc = Vpc::new(
            &mut stack,
            "MyVpc",
            VpcProps {
                max_azs: 2,
                nat_gateways: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(vpc.nat_gateways().len(), 1);
        let template = stack.template();
        let nat_refs = template
            .resources_of_type(&ResourceType::Route)
            .filter(|(_, r)| r.properties.contains_key("NatGatewayId"))
            .count();
        assert_eq!(nat_refs, 2);
    }

    #[test]
    fn test_security_group_ingress() {
        let mut stack = stack();
        let vpc = Vpc::new(&mut stack, "MyVpc", VpcProps { max_azs: 1, ..Default::default() }).unwrap();
        let root = stack.path().clone();
        let a = SecurityGroup::new(&mut stack, &root, "A", &vpc, "a").unwrap();
        let b = SecurityGroup::new(&mut stack, &root, "B", &vpc, "b").unwrap();
        let rule = a.add_ingress_from(&mut stack, &b, 3306, "from b").unwrap();
        let resource = stack.resource(&rule).unwrap();
        assert_eq!(resource.resource_type, ResourceType::SecurityGroupIngress);
        assert_eq!(resource.property("SourceSecurityGroupId"), Some(&b.group_id()));
        assert_eq!(
            name_of(stack.resource(vpc.logical_id()).unwrap()).as_deref(),
            Some("NetStack/MyVpc")
        );
    }
}
