//! aws CLI process wrapper.
//!
//! Executes `aws <service> <operation> --output json` as a child process via
//! `tokio::process::Command` and parses the top-level list field of each
//! describe response. The CLI owns credential resolution, pagination and
//! retry.

use std::io::ErrorKind;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Command;

use stratus_core::error::{Result, ScanError};
use stratus_core::types::{
    AutoScalingGroup, DbInstance, DbSecurityGroup, LoadBalancer, Reservation, RouteTable,
    SecurityGroup, Subnet,
};

use crate::config::DiscoverConfig;
use crate::scanner::{single_reservation, Scanner};

/// One describe call against the aws CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Describe {
    service: &'static str,
    operation: &'static str,
    /// Top-level response field holding the records.
    field: &'static str,
    args: Vec<String>,
}

impl Describe {
    fn new(service: &'static str, operation: &'static str, field: &'static str) -> Self {
        Self {
            service,
            operation,
            field,
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `--filters` with one `Name=..,Values=..` term per filter.
    fn filters(mut self, filters: &[(&str, &str)]) -> Self {
        if !filters.is_empty() {
            self.args.push("--filters".to_string());
            for (name, value) in filters {
                self.args.push(format!("Name={name},Values={value}"));
            }
        }
        self
    }

    fn name(&self) -> String {
        format!("{} {}", self.service, self.operation)
    }
}

/// Scanner backed by the `aws` command line interface.
pub struct AwsCliScanner {
    aws_path: String,
    region: Option<String>,
    profile: Option<String>,
    credentials: Option<(String, String)>,
    vpc_id: Option<String>,
}

impl AwsCliScanner {
    pub fn new(aws_path: &str) -> Self {
        Self {
            aws_path: aws_path.to_string(),
            region: None,
            profile: None,
            credentials: None,
            vpc_id: None,
        }
    }

    pub fn from_config(config: &DiscoverConfig) -> Self {
        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => None,
        };
        Self {
            aws_path: config.aws_path.clone(),
            region: config.region.clone(),
            profile: config.profile.clone(),
            credentials,
            vpc_id: config.vpc_id.clone(),
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_vpc(mut self, vpc_id: &str) -> Self {
        self.vpc_id = Some(vpc_id.to_string());
        self
    }

    /// Verify the aws CLI is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.aws_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| ScanError::CliNotFound {
                path: self.aws_path.clone(),
            })?;

        // aws CLI v1 prints its version to stderr.
        let version = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&version).trim().to_string())
    }

    fn command_args(&self, call: &Describe) -> Vec<String> {
        let mut args = vec![call.service.to_string(), call.operation.to_string()];
        args.extend(call.args.iter().cloned());
        args.extend(["--output".to_string(), "json".to_string()]);
        if let Some(region) = &self.region {
            args.extend(["--region".to_string(), region.clone()]);
        }
        if let Some(profile) = &self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        args
    }

    fn vpc_filter(&self) -> Vec<(&str, &str)> {
        self.vpc_id
            .as_deref()
            .map(|vpc| vec![("vpc-id", vpc)])
            .unwrap_or_default()
    }

    async fn describe<T: DeserializeOwned>(&self, call: Describe) -> Result<Vec<Option<T>>> {
        let start = Instant::now();
        let args = self.command_args(&call);

        tracing::debug!(operation = %call.name(), "Invoking aws CLI");

        let mut command = Command::new(&self.aws_path);
        command.args(&args).kill_on_drop(true);
        if let Some((key, secret)) = &self.credentials {
            command
                .env("AWS_ACCESS_KEY_ID", key)
                .env("AWS_SECRET_ACCESS_KEY", secret);
        }

        let output = command.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ScanError::CliNotFound {
                path: self.aws_path.clone(),
            },
            _ => ScanError::Io(e),
        })?;

        if !output.status.success() {
            return Err(ScanError::CliFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let items = parse_listing(&output.stdout, call.field, &call.name())?;

        tracing::debug!(
            operation = %call.name(),
            count = items.len(),
            duration_ms = start.elapsed().as_millis(),
            "aws CLI call complete"
        );

        Ok(items)
    }
}

/// Extract the list stored under `field` in a describe response.
///
/// A missing or null field (or empty output) is an empty collection.
fn parse_listing<T: DeserializeOwned>(
    stdout: &[u8],
    field: &str,
    operation: &str,
) -> Result<Vec<Option<T>>> {
    let parse_error = |source| ScanError::Parse {
        operation: operation.to_string(),
        source,
    };

    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut document: Value = serde_json::from_slice(stdout).map_err(parse_error)?;
    match document.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items).map_err(parse_error),
    }
}

/// Error codes the CLI reports when a looked-up record does not exist.
const NOT_FOUND_CODES: &[&str] = &["InvalidInstanceID.NotFound", "LoadBalancerNotFound"];

/// A lookup of a record that does not exist answers with no records.
fn absent_as_empty<T>(result: Result<Vec<Option<T>>>) -> Result<Vec<Option<T>>> {
    match result {
        Err(ScanError::CliFailed { stderr, .. })
            if NOT_FOUND_CODES.iter().any(|code| stderr.contains(code)) =>
        {
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Keep records whose VPC matches; `None` entries pass through untouched.
fn retain_in_vpc<T>(
    items: &mut Vec<Option<T>>,
    vpc_id: Option<&str>,
    record_vpc: impl Fn(&T) -> Option<&str>,
) {
    if let Some(vpc) = vpc_id {
        items.retain(|item| item.as_ref().map_or(true, |r| record_vpc(r) == Some(vpc)));
    }
}

#[async_trait]
impl Scanner for AwsCliScanner {
    async fn list_security_groups(&self) -> Result<Vec<Option<SecurityGroup>>> {
        let call = Describe::new("ec2", "describe-security-groups", "SecurityGroups")
            .filters(&self.vpc_filter());
        self.describe(call).await
    }

    async fn list_instances_in_security_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<Option<Reservation>>> {
        let mut filters = vec![("instance.group-id", group_id)];
        filters.extend(self.vpc_filter());
        let call = Describe::new("ec2", "describe-instances", "Reservations").filters(&filters);
        self.describe(call).await
    }

    async fn list_load_balancers(&self) -> Result<Vec<Option<LoadBalancer>>> {
        let call = Describe::new("elb", "describe-load-balancers", "LoadBalancerDescriptions");
        let mut items = self.describe(call).await?;
        retain_in_vpc(&mut items, self.vpc_id.as_deref(), |lb: &LoadBalancer| {
            lb.vpc_id.as_deref()
        });
        Ok(items)
    }

    async fn list_database_instances(&self) -> Result<Vec<Option<DbInstance>>> {
        let call = Describe::new("rds", "describe-db-instances", "DBInstances");
        let mut items = self.describe(call).await?;
        retain_in_vpc(&mut items, self.vpc_id.as_deref(), DbInstance::vpc_id);
        Ok(items)
    }

    async fn list_database_security_groups(&self) -> Result<Vec<Option<DbSecurityGroup>>> {
        let call = Describe::new("rds", "describe-db-security-groups", "DBSecurityGroups");
        let mut items = self.describe(call).await?;
        retain_in_vpc(&mut items, self.vpc_id.as_deref(), |sg: &DbSecurityGroup| {
            sg.vpc_id.as_deref()
        });
        Ok(items)
    }

    async fn list_auto_scaling_groups(&self) -> Result<Vec<Option<AutoScalingGroup>>> {
        let call = Describe::new(
            "autoscaling",
            "describe-auto-scaling-groups",
            "AutoScalingGroups",
        );
        self.describe(call).await
    }

    async fn list_route_tables(&self) -> Result<Vec<Option<RouteTable>>> {
        let call =
            Describe::new("ec2", "describe-route-tables", "RouteTables").filters(&self.vpc_filter());
        self.describe(call).await
    }

    async fn list_subnets(&self) -> Result<Vec<Option<Subnet>>> {
        let call = Describe::new("ec2", "describe-subnets", "Subnets").filters(&self.vpc_filter());
        self.describe(call).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<Reservation>> {
        let call = Describe::new("ec2", "describe-instances", "Reservations")
            .arg("--instance-ids")
            .arg(instance_id)
            .filters(&self.vpc_filter());
        let reservations = absent_as_empty(self.describe(call).await)?;
        single_reservation(instance_id, reservations)
    }

    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let call = Describe::new("elb", "describe-load-balancers", "LoadBalancerDescriptions")
            .arg("--load-balancer-names")
            .arg(name);
        let mut items = absent_as_empty(self.describe(call).await)?;
        retain_in_vpc(&mut items, self.vpc_id.as_deref(), |lb: &LoadBalancer| {
            lb.vpc_id.as_deref()
        });
        Ok(items.into_iter().flatten().next())
    }
}
