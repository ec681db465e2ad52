//! Configuration for stratus discovery runs.

use std::fmt;

use serde::Deserialize;

use stratus_core::types::ResourceKind;

use crate::error::{DiscoverError, Result};

/// Top-level discover configuration.
///
/// Loaded from `stratus.toml` `[discover]` section or
/// `STRATUS_DISCOVER__` environment variables.
#[derive(Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Path to the aws CLI binary (default: "aws").
    #[serde(default = "default_aws_path")]
    pub aws_path: String,

    /// Region passed to every aws CLI call.
    #[serde(default)]
    pub region: Option<String>,

    /// Named aws CLI profile.
    #[serde(default)]
    pub profile: Option<String>,

    /// Static access key, used only together with `secret_access_key`.
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Restrict discovery to one VPC.
    #[serde(default)]
    pub vpc_id: Option<String>,

    /// Scan a JSON inventory file instead of the live account.
    #[serde(default)]
    pub inventory_path: Option<String>,

    /// Resource families scanned as top-level branches.
    #[serde(default = "default_families")]
    pub families: Vec<ResourceKind>,

    /// Capacity of the event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Expand each security group's instances in its own task.
    #[serde(default)]
    pub expand_concurrently: bool,

    /// Instance lookups allowed in flight at once during concurrent
    /// expansion. Each lookup is one aws CLI process.
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,

    /// Cancel the run after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl DiscoverConfig {
    /// Load the `[discover]` section from `<file_prefix>.{toml,yaml,json}`
    /// and `STRATUS_DISCOVER__*` environment variables.
    ///
    /// A missing file or section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = ::config::Config::builder()
            .add_source(::config::File::with_name(file_prefix).required(false))
            .add_source(
                ::config::Environment::with_prefix("STRATUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("discover.families"),
            )
            .build()?;

        match cfg.get::<DiscoverConfig>("discover") {
            Ok(c) => Ok(c),
            Err(::config::ConfigError::NotFound(_)) => Ok(DiscoverConfig::default()),
            Err(e) => Err(DiscoverError::ConfigLoad(e)),
        }
    }

    /// Check and normalize the configuration.
    ///
    /// Duplicate families are dropped, keeping first occurrence order.
    pub fn validate(&mut self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(DiscoverError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        if self.max_concurrent_lookups == 0 {
            return Err(DiscoverError::Config(
                "max_concurrent_lookups must be greater than zero".to_string(),
            ));
        }

        if let Some(kind) = self.families.iter().find(|k| !k.is_top_level()) {
            return Err(DiscoverError::Config(format!(
                "{kind} cannot be scanned as a top-level family; \
                 instances are discovered through security groups"
            )));
        }

        let mut seen = Vec::with_capacity(self.families.len());
        self.families.retain(|kind| {
            if seen.contains(kind) {
                false
            } else {
                seen.push(*kind);
                true
            }
        });

        Ok(())
    }
}

impl fmt::Debug for DiscoverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverConfig")
            .field("aws_path", &self.aws_path)
            .field("region", &self.region)
            .field("profile", &self.profile)
            .field("static_credentials", &self.access_key_id.is_some())
            .field("vpc_id", &self.vpc_id)
            .field("inventory_path", &self.inventory_path)
            .field("families", &self.families)
            .field("channel_capacity", &self.channel_capacity)
            .field("expand_concurrently", &self.expand_concurrently)
            .field("max_concurrent_lookups", &self.max_concurrent_lookups)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_aws_path() -> String {
    "aws".to_string()
}

pub fn default_families() -> Vec<ResourceKind> {
    vec![
        ResourceKind::SecurityGroup,
        ResourceKind::LoadBalancer,
        ResourceKind::DbInstance,
        ResourceKind::DbSecurityGroup,
    ]
}

fn default_channel_capacity() -> usize {
    128
}

fn default_max_concurrent_lookups() -> usize {
    crate::orchestrator::DEFAULT_MAX_CONCURRENT_LOOKUPS
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            aws_path: default_aws_path(),
            region: None,
            profile: None,
            access_key_id: None,
            secret_access_key: None,
            vpc_id: None,
            inventory_path: None,
            families: default_families(),
            channel_capacity: default_channel_capacity(),
            expand_concurrently: false,
            max_concurrent_lookups: default_max_concurrent_lookups(),
            timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoverConfig::default();
        assert_eq!(config.aws_path, "aws");
        assert_eq!(config.channel_capacity, 128);
        assert_eq!(config.families.len(), 4);
        assert!(!config.expand_concurrently);
        assert_eq!(config.max_concurrent_lookups, 8);
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: DiscoverConfig = serde_json::from_str(
            r#"{"region": "us-west-2", "families": ["security_group", "subnet"]}"#,
        )
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(
            config.families,
            vec![ResourceKind::SecurityGroup, ResourceKind::Subnet]
        );
        assert_eq!(config.channel_capacity, 128);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = DiscoverConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DiscoverError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_lookup_limit() {
        let mut config = DiscoverConfig {
            max_concurrent_lookups: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DiscoverError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_instance_family() {
        let mut config = DiscoverConfig {
            families: vec![ResourceKind::LoadBalancer, ResourceKind::Instance],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DiscoverError::Config(_))));
    }

    #[test]
    fn test_validate_dedupes_families_in_order() {
        let mut config = DiscoverConfig {
            families: vec![
                ResourceKind::Subnet,
                ResourceKind::LoadBalancer,
                ResourceKind::Subnet,
            ],
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(
            config.families,
            vec![ResourceKind::Subnet, ResourceKind::LoadBalancer]
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("stratus.toml"),
            "[discover]\n\
             region = \"eu-central-1\"\n\
             families = [\"load_balancer\", \"subnet\"]\n\
             expand_concurrently = true\n\
             max_concurrent_lookups = 3\n",
        )
        .unwrap();

        let prefix = dir.path().join("stratus");
        let config = DiscoverConfig::load(&prefix.to_string_lossy()).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-central-1"));
        assert_eq!(
            config.families,
            vec![ResourceKind::LoadBalancer, ResourceKind::Subnet]
        );
        assert!(config.expand_concurrently);
        assert_eq!(config.max_concurrent_lookups, 3);
        assert_eq!(config.channel_capacity, 128);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = DiscoverConfig::load(&prefix.to_string_lossy()).unwrap();
        assert_eq!(config.families, default_families());
        assert_eq!(config.channel_capacity, 128);
    }

    #[test]
    fn test_load_reports_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("stratus.toml"),
            "[discover]\nchannel_capacity = \"lots\"\n",
        )
        .unwrap();

        let prefix = dir.path().join("stratus");
        assert!(matches!(
            DiscoverConfig::load(&prefix.to_string_lossy()),
            Err(DiscoverError::ConfigLoad(_))
        ));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = DiscoverConfig {
            access_key_id: Some("AKIAEXAMPLE".to_string()),
            secret_access_key: Some("topsecret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("static_credentials: true"));
    }
}
