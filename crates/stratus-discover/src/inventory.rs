//! Offline scanner backed by a JSON inventory document.
//!
//! The document's top-level keys mirror the provider's describe responses,
//! so an inventory can be assembled from saved `aws ... --output json`
//! output. Every key is optional.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stratus_core::error::{Result, ScanError};
use stratus_core::types::{
    null_as_empty, AutoScalingGroup, DbInstance, DbSecurityGroup, Instance, LoadBalancer,
    Reservation, RouteTable, SecurityGroup, Subnet,
};

use crate::scanner::{single_reservation, Scanner};

/// A captured snapshot of an account's resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Inventory {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub security_groups: Vec<Option<SecurityGroup>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reservations: Vec<Option<Reservation>>,
    #[serde(
        default,
        rename = "LoadBalancerDescriptions",
        deserialize_with = "null_as_empty"
    )]
    pub load_balancers: Vec<Option<LoadBalancer>>,
    #[serde(default, rename = "DBInstances", deserialize_with = "null_as_empty")]
    pub db_instances: Vec<Option<DbInstance>>,
    #[serde(default, rename = "DBSecurityGroups", deserialize_with = "null_as_empty")]
    pub db_security_groups: Vec<Option<DbSecurityGroup>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub auto_scaling_groups: Vec<Option<AutoScalingGroup>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub route_tables: Vec<Option<RouteTable>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subnets: Vec<Option<Subnet>>,
}

/// Scanner that answers from an in-memory [`Inventory`].
pub struct InventoryScanner {
    inventory: Inventory,
}

impl InventoryScanner {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    /// Load an inventory document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Inventory(format!("{}: {e}", path.display())))?;
        let inventory: Inventory = serde_json::from_str(&raw)
            .map_err(|e| ScanError::Inventory(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            security_groups = inventory.security_groups.len(),
            reservations = inventory.reservations.len(),
            "Loaded inventory"
        );

        Ok(Self::new(inventory))
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }
}

#[async_trait]
impl Scanner for InventoryScanner {
    async fn list_security_groups(&self) -> Result<Vec<Option<SecurityGroup>>> {
        Ok(self.inventory.security_groups.clone())
    }

    /// Reservations with at least one member instance, trimmed to members.
    async fn list_instances_in_security_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<Option<Reservation>>> {
        Ok(self
            .inventory
            .reservations
            .iter()
            .flatten()
            .filter_map(|reservation| {
                let members: Vec<Option<Instance>> = reservation
                    .instances
                    .iter()
                    .flatten()
                    .filter(|i| i.in_security_group(group_id))
                    .cloned()
                    .map(Some)
                    .collect();
                if members.is_empty() {
                    return None;
                }
                Some(Some(Reservation {
                    instances: members,
                    reservation_id: reservation.reservation_id.clone(),
                    owner_id: reservation.owner_id.clone(),
                    attributes: reservation.attributes.clone(),
                }))
            })
            .collect())
    }

    async fn list_load_balancers(&self) -> Result<Vec<Option<LoadBalancer>>> {
        Ok(self.inventory.load_balancers.clone())
    }

    async fn list_database_instances(&self) -> Result<Vec<Option<DbInstance>>> {
        Ok(self.inventory.db_instances.clone())
    }

    async fn list_database_security_groups(&self) -> Result<Vec<Option<DbSecurityGroup>>> {
        Ok(self.inventory.db_security_groups.clone())
    }

    async fn list_auto_scaling_groups(&self) -> Result<Vec<Option<AutoScalingGroup>>> {
        Ok(self.inventory.auto_scaling_groups.clone())
    }

    async fn list_route_tables(&self) -> Result<Vec<Option<RouteTable>>> {
        Ok(self.inventory.route_tables.clone())
    }

    async fn list_subnets(&self) -> Result<Vec<Option<Subnet>>> {
        Ok(self.inventory.subnets.clone())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<Reservation>> {
        let matching = self
            .inventory
            .reservations
            .iter()
            .flatten()
            .filter(|r| {
                r.instances
                    .iter()
                    .flatten()
                    .any(|i| i.instance_id.as_deref() == Some(instance_id))
            })
            .cloned()
            .map(Some)
            .collect();
        single_reservation(instance_id, matching)
    }

    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        Ok(self
            .inventory
            .load_balancers
            .iter()
            .flatten()
            .find(|lb| lb.name.as_deref() == Some(name))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const INVENTORY: &str = r#"{
        "SecurityGroups": [{"GroupId": "sg-web"}, null, {"GroupId": "sg-db"}],
        "Reservations": [
            {
                "ReservationId": "r-1",
                "Instances": [
                    {"InstanceId": "i-1", "SecurityGroups": [{"GroupId": "sg-web"}]},
                    {"InstanceId": "i-2", "SecurityGroups": [{"GroupId": "sg-db"}]},
                    null
                ]
            },
            null,
            {
                "ReservationId": "r-2",
                "Instances": [
                    {"InstanceId": "i-3", "SecurityGroups": [{"GroupId": "sg-web"}, {"GroupId": "sg-db"}]}
                ]
            }
        ],
        "LoadBalancerDescriptions": [{"LoadBalancerName": "web"}],
        "Subnets": null
    }"#;

    fn scanner() -> InventoryScanner {
        InventoryScanner::new(serde_json::from_str(INVENTORY).unwrap())
    }

    fn instance_ids(reservations: &[Option<Reservation>]) -> Vec<String> {
        reservations
            .iter()
            .flatten()
            .flat_map(|r| r.instances.iter().flatten())
            .filter_map(|i| i.instance_id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_instances_filtered_by_group_membership() {
        let scanner = scanner();

        let web = scanner.list_instances_in_security_group("sg-web").await.unwrap();
        assert_eq!(web.len(), 2);
        assert_eq!(instance_ids(&web), vec!["i-1", "i-3"]);

        let db = scanner.list_instances_in_security_group("sg-db").await.unwrap();
        assert_eq!(instance_ids(&db), vec!["i-2", "i-3"]);

        let none = scanner.list_instances_in_security_group("sg-x").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_null_keys_are_empty() {
        let scanner = scanner();
        assert!(scanner.list_subnets().await.unwrap().is_empty());
        assert!(scanner.list_route_tables().await.unwrap().is_empty());
        assert!(scanner.list_database_instances().await.unwrap().is_empty());
        assert_eq!(scanner.list_security_groups().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_lookups() {
        let scanner = scanner();

        let reservation = scanner.get_instance("i-3").await.unwrap().unwrap();
        assert_eq!(reservation.reservation_id.as_deref(), Some("r-2"));
        assert!(scanner.get_instance("i-404").await.unwrap().is_none());

        assert!(scanner.get_load_balancer("web").await.unwrap().is_some());
        assert!(scanner.get_load_balancer("api").await.unwrap().is_none());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INVENTORY.as_bytes()).unwrap();

        let scanner = InventoryScanner::from_path(file.path()).unwrap();
        assert_eq!(scanner.inventory().load_balancers.len(), 1);
    }

    #[test]
    fn test_from_path_errors() {
        let result = InventoryScanner::from_path("/nonexistent/inventory.json");
        assert!(matches!(result, Err(ScanError::Inventory(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        let result = InventoryScanner::from_path(file.path());
        assert!(matches!(result, Err(ScanError::Inventory(_))));
    }
}
