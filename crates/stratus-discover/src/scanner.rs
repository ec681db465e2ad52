//! The scanner capability consumed by the discovery orchestrator.
//!
//! A scanner exposes one listing operation per resource family. Each
//! operation returns the provider's records in provider order, or fails
//! atomically. Collections may contain `None` entries; the orchestrator
//! skips them.
//!
//! Dropping an operation's future cancels it. Implementations that spawn
//! child processes must kill them on drop.

use async_trait::async_trait;

use stratus_core::error::{Result, ScanError};
use stratus_core::types::{
    AutoScalingGroup, DbInstance, DbSecurityGroup, LoadBalancer, Reservation, ResourceKind,
    RouteTable, SecurityGroup, Subnet,
};

/// Provider listing operations, one per resource family.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn list_security_groups(&self) -> Result<Vec<Option<SecurityGroup>>>;

    /// Reservations holding the instances that belong to one security group.
    async fn list_instances_in_security_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<Option<Reservation>>>;

    async fn list_load_balancers(&self) -> Result<Vec<Option<LoadBalancer>>>;

    async fn list_database_instances(&self) -> Result<Vec<Option<DbInstance>>>;

    async fn list_database_security_groups(&self) -> Result<Vec<Option<DbSecurityGroup>>>;

    async fn list_auto_scaling_groups(&self) -> Result<Vec<Option<AutoScalingGroup>>> {
        Err(ScanError::Unsupported(ResourceKind::AutoScalingGroup))
    }

    async fn list_route_tables(&self) -> Result<Vec<Option<RouteTable>>> {
        Err(ScanError::Unsupported(ResourceKind::RouteTable))
    }

    async fn list_subnets(&self) -> Result<Vec<Option<Subnet>>> {
        Err(ScanError::Unsupported(ResourceKind::Subnet))
    }

    /// Look up the reservation holding one instance.
    ///
    /// `Ok(None)` when no reservation matches, including an unknown id or
    /// an instance outside the scanned VPC.
    async fn get_instance(&self, _instance_id: &str) -> Result<Option<Reservation>> {
        Err(ScanError::Unsupported(ResourceKind::Instance))
    }

    /// Look up one load balancer by name; `Ok(None)` when it does not exist.
    async fn get_load_balancer(&self, _name: &str) -> Result<Option<LoadBalancer>> {
        Err(ScanError::Unsupported(ResourceKind::LoadBalancer))
    }
}

/// Reduce a lookup response to at most one reservation.
///
/// Instance ids map to exactly one reservation; more than one is reported
/// as ambiguous rather than picking one.
pub fn single_reservation(
    instance_id: &str,
    reservations: Vec<Option<Reservation>>,
) -> Result<Option<Reservation>> {
    let mut found: Vec<Reservation> = reservations.into_iter().flatten().collect();
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        n => Err(ScanError::Ambiguous(format!(
            "{n} reservations returned for instance id {instance_id}"
        ))),
    }
}
