//! Run summaries and line-oriented event output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use stratus_core::events::Event;
use stratus_core::types::ResourceKind;

/// A failed branch as reported in a summary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BranchFailure {
    pub kind: ResourceKind,
    pub message: String,
}

/// Tally of one discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub resources: BTreeMap<ResourceKind, u64>,
    pub failures: Vec<BranchFailure>,
}

impl DiscoverySummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            resources: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, event: &Event) {
        match event {
            Event::Resource(resource) => {
                *self.resources.entry(resource.kind()).or_default() += 1;
            }
            Event::Error(err) => self.failures.push(BranchFailure {
                kind: err.kind(),
                message: err.scan_error().to_string(),
            }),
        }
    }

    pub fn total_resources(&self) -> u64 {
        self.resources.values().sum()
    }

    pub fn count(&self, kind: ResourceKind) -> u64 {
        self.resources.get(&kind).copied().unwrap_or(0)
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }
}

/// Render one event as a JSON object for line-oriented output.
pub fn event_to_json(event: &Event) -> serde_json::Result<Value> {
    match event {
        Event::Resource(resource) => {
            let mut value = serde_json::to_value(resource)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".to_string(), json!("resource"));
            }
            Ok(value)
        }
        Event::Error(err) => Ok(json!({
            "type": "error",
            "kind": err.kind().as_str(),
            "error": err.scan_error().to_string(),
        })),
    }
}
