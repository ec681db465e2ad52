//! Events carried on the discovery stream.
//!
//! Every unit on the stream is either a discovered resource or a failure
//! tagged with the resource family that produced it. Events carry no
//! sequence number; ordering only holds within one branch.

use std::fmt;

use crate::error::ScanError;
use crate::types::{Resource, ResourceKind};

/// A scanner failure tagged with the branch that produced it.
#[derive(Debug)]
pub struct DiscoveryError {
    kind: ResourceKind,
    source: ScanError,
}

impl DiscoveryError {
    pub fn new(kind: ResourceKind, source: ScanError) -> Self {
        Self { kind, source }
    }

    /// The resource family whose scan failed.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn scan_error(&self) -> &ScanError {
        &self.source
    }

    pub fn into_scan_error(self) -> ScanError {
        self.source
    }
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} discovery failed: {}", self.kind, self.source)
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// One item on the discovery stream.
#[derive(Debug)]
pub enum Event {
    Resource(Resource),
    Error(DiscoveryError),
}

impl Event {
    pub fn resource(record: impl Into<Resource>) -> Self {
        Self::Resource(record.into())
    }

    pub fn error(kind: ResourceKind, source: ScanError) -> Self {
        Self::Error(DiscoveryError::new(kind, source))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Kind of the resource, or of the branch that failed.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Resource(r) => r.kind(),
            Self::Error(e) => e.kind(),
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(r),
            Self::Error(_) => None,
        }
    }
}

impl From<Resource> for Event {
    fn from(resource: Resource) -> Self {
        Self::Resource(resource)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::types::{LoadBalancer, SecurityGroup};

    #[test]
    fn error_event_keeps_branch_tag() {
        let event = Event::error(
            ResourceKind::LoadBalancer,
            ScanError::CliFailed {
                code: 254,
                stderr: "AccessDenied".to_string(),
            },
        );

        assert!(event.is_error());
        assert_eq!(event.kind(), ResourceKind::LoadBalancer);
        assert!(event.as_resource().is_none());

        let Event::Error(err) = event else {
            panic!("expected error event");
        };
        assert_eq!(
            err.to_string(),
            "LoadBalancer discovery failed: aws CLI exited with code 254: AccessDenied"
        );
        assert!(err.source().is_some());
        assert!(matches!(err.into_scan_error(), ScanError::CliFailed { code: 254, .. }));
    }

    #[test]
    fn resource_event_from_record() {
        let event = Event::resource(SecurityGroup {
            group_id: Some("sg-1".to_string()),
            ..Default::default()
        });
        assert!(!event.is_error());
        assert_eq!(event.kind(), ResourceKind::SecurityGroup);

        let event = Event::from(Resource::from(LoadBalancer::default()));
        assert_eq!(event.kind(), ResourceKind::LoadBalancer);
    }
}
