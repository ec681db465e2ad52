//! Provider resource records and the closed resource union.
//!
//! Records deserialize from the provider's native JSON (as printed by
//! `aws ... --output json`). Only the identifiers discovery needs are named;
//! every other provider field is kept in a flattened `attributes` map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Provider fields not named by a record.
pub type Attributes = Map<String, Value>;

/// Treat an explicit JSON `null` list the same as a missing one.
pub fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Resource kinds ────────────────────────────────────────────────

/// Tag identifying a resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    DbInstance,
    SecurityGroup,
    DbSecurityGroup,
    AutoScalingGroup,
    LoadBalancer,
    RouteTable,
    Subnet,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        Self::Instance,
        Self::DbInstance,
        Self::SecurityGroup,
        Self::DbSecurityGroup,
        Self::AutoScalingGroup,
        Self::LoadBalancer,
        Self::RouteTable,
        Self::Subnet,
    ];

    /// Stable display name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "Instance",
            Self::DbInstance => "DBInstance",
            Self::SecurityGroup => "SecurityGroup",
            Self::DbSecurityGroup => "DBSecurityGroup",
            Self::AutoScalingGroup => "AutoScalingGroup",
            Self::LoadBalancer => "LoadBalancer",
            Self::RouteTable => "RouteTable",
            Self::Subnet => "Subnet",
        }
    }

    fn snake_name(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::DbInstance => "db_instance",
            Self::SecurityGroup => "security_group",
            Self::DbSecurityGroup => "db_security_group",
            Self::AutoScalingGroup => "auto_scaling_group",
            Self::LoadBalancer => "load_balancer",
            Self::RouteTable => "route_table",
            Self::Subnet => "subnet",
        }
    }

    /// Whether this kind can be listed as its own top-level branch.
    ///
    /// Instances are only reachable through security-group expansion.
    pub fn is_top_level(&self) -> bool {
        !matches!(self, Self::Instance)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Accepts the display name or the snake_case name, in any case.
    /// Hyphens are read as underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.snake_name() == wanted || k.as_str().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown resource kind: {s}"))
    }
}

// ── EC2 ───────────────────────────────────────────────────────────

/// Reference from an instance to one of its security groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupIdentifier {
    pub group_id: Option<String>,
    pub group_name: Option<String>,
}

/// An EC2 instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub instance_id: Option<String>,
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub security_groups: Vec<Option<GroupIdentifier>>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Instance {
    /// Whether the instance is a member of the given security group.
    pub fn in_security_group(&self, group_id: &str) -> bool {
        self.security_groups
            .iter()
            .flatten()
            .any(|g| g.group_id.as_deref() == Some(group_id))
    }
}

/// The provider's grouping of instances launched together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    pub reservation_id: Option<String>,
    pub owner_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub instances: Vec<Option<Instance>>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// An EC2 security group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub vpc_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub route_table_id: Option<String>,
    pub vpc_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
    pub cidr_block: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

// ── ELB / RDS / Auto Scaling ──────────────────────────────────────

/// A classic load balancer description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(rename = "LoadBalancerName")]
    pub name: Option<String>,
    #[serde(rename = "DNSName")]
    pub dns_name: Option<String>,
    #[serde(rename = "VPCId")]
    pub vpc_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbSubnetGroup {
    #[serde(rename = "DBSubnetGroupName")]
    pub name: Option<String>,
    #[serde(rename = "VpcId")]
    pub vpc_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// A managed database instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    pub identifier: Option<String>,
    #[serde(rename = "Engine")]
    pub engine: Option<String>,
    #[serde(rename = "DBSubnetGroup")]
    pub subnet_group: Option<DbSubnetGroup>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl DbInstance {
    pub fn vpc_id(&self) -> Option<&str> {
        self.subnet_group.as_ref()?.vpc_id.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbSecurityGroup {
    #[serde(rename = "DBSecurityGroupName")]
    pub name: Option<String>,
    #[serde(rename = "EC2VpcId")]
    pub vpc_id: Option<String>,
    #[serde(rename = "OwnerId")]
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    #[serde(rename = "AutoScalingGroupName")]
    pub name: Option<String>,
    #[serde(rename = "AutoScalingGroupARN")]
    pub arn: Option<String>,
    #[serde(rename = "VPCZoneIdentifier")]
    pub vpc_zone_identifier: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

// ── Resource union ────────────────────────────────────────────────

/// A discovered resource, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record")]
pub enum Resource {
    Instance(Instance),
    #[serde(rename = "DBInstance")]
    DbInstance(DbInstance),
    SecurityGroup(SecurityGroup),
    #[serde(rename = "DBSecurityGroup")]
    DbSecurityGroup(DbSecurityGroup),
    AutoScalingGroup(AutoScalingGroup),
    LoadBalancer(LoadBalancer),
    RouteTable(RouteTable),
    Subnet(Subnet),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Instance(_) => ResourceKind::Instance,
            Self::DbInstance(_) => ResourceKind::DbInstance,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::DbSecurityGroup(_) => ResourceKind::DbSecurityGroup,
            Self::AutoScalingGroup(_) => ResourceKind::AutoScalingGroup,
            Self::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Self::RouteTable(_) => ResourceKind::RouteTable,
            Self::Subnet(_) => ResourceKind::Subnet,
        }
    }
}

macro_rules! impl_from_record {
    ($($record:ident),* $(,)?) => {
        $(
            impl From<$record> for Resource {
                fn from(record: $record) -> Self {
                    Resource::$record(record)
                }
            }
        )*
    };
}

impl_from_record!(
    Instance,
    DbInstance,
    SecurityGroup,
    DbSecurityGroup,
    AutoScalingGroup,
    LoadBalancer,
    RouteTable,
    Subnet,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_roundtrip_through_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.snake_name().parse::<ResourceKind>(), Ok(kind));
        }
        assert_eq!(
            "load-balancer".parse::<ResourceKind>(),
            Ok(ResourceKind::LoadBalancer)
        );
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn only_instances_are_nested_only() {
        let nested: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| !k.is_top_level())
            .collect();
        assert_eq!(nested, vec![ResourceKind::Instance]);
    }

    #[test]
    fn reservation_keeps_null_instances_as_none() {
        let json = r#"{
            "ReservationId": "r-1",
            "Instances": [
                {"InstanceId": "i-1", "SecurityGroups": [{"GroupId": "sg-1"}]},
                null,
                {"InstanceId": "i-2", "State": {"Name": "running"}}
            ]
        }"#;
        let reservation: Reservation = serde_json::from_str(json).unwrap();

        assert_eq!(reservation.instances.len(), 3);
        assert!(reservation.instances[1].is_none());
        let first = reservation.instances[0].as_ref().unwrap();
        assert!(first.in_security_group("sg-1"));
        assert!(!first.in_security_group("sg-2"));
        let second = reservation.instances[2].as_ref().unwrap();
        assert_eq!(second.attributes["State"]["Name"], "running");
    }

    #[test]
    fn null_lists_deserialize_empty() {
        let json = r#"{"ReservationId": "r-1", "Instances": null}"#;
        let reservation: Reservation = serde_json::from_str(json).unwrap();
        assert!(reservation.instances.is_empty());
    }

    #[test]
    fn provider_field_names_map_to_records() {
        let lb: LoadBalancer = serde_json::from_str(
            r#"{"LoadBalancerName": "web", "DNSName": "web.elb", "VPCId": "vpc-1"}"#,
        )
        .unwrap();
        assert_eq!(lb.name.as_deref(), Some("web"));
        assert_eq!(lb.vpc_id.as_deref(), Some("vpc-1"));

        let db: DbInstance = serde_json::from_str(
            r#"{"DBInstanceIdentifier": "db-1", "DBSubnetGroup": {"VpcId": "vpc-2"}}"#,
        )
        .unwrap();
        assert_eq!(db.vpc_id(), Some("vpc-2"));
        assert!(DbInstance::default().vpc_id().is_none());
    }

    #[test]
    fn resource_serializes_with_kind_tag() {
        let resource = Resource::from(DbSecurityGroup {
            name: Some("default".to_string()),
            ..Default::default()
        });
        assert_eq!(resource.kind(), ResourceKind::DbSecurityGroup);

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["kind"], "DBSecurityGroup");
        assert_eq!(json["record"]["DBSecurityGroupName"], "default");
    }
}
