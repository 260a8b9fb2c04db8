use crate::types::{InstanceId, ProviderCode, RecordId, ZoneId};
use crate::volume::VolumeRecord;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Creation was requested but the instance never reported running.
    Pending,
    /// The instance runs but its DNS binding is missing.
    Partial,
    Running,
    Stopped,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Partial => write!(f, "partial"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The compute instance of a lab, as last reported by its provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceState {
    pub id: InstanceId,
    pub name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    /// Externally reachable host, `<record>.<dns_id>`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    pub boot_image: String,
    pub container: String,
    pub instance_type: String,
    pub network: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub volume: Option<String>,
    pub created_at: String,
}

/// Lab State Descriptor: the durable record of one lab.
///
/// `project`, the provider codes, `location`, and `dns_id` are fixed at init.
/// `version` is owned by the state store and only moves forward on push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabState {
    pub project: String,
    pub compute_provider: ProviderCode,
    pub dns_provider: ProviderCode,
    #[serde(default)]
    pub location: Option<String>,
    pub dns_id: ZoneId,
    #[serde(default)]
    pub instance: Option<InstanceState>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeRecord>,
    #[serde(default)]
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl LabState {
    pub fn new(
        project: &str,
        compute_provider: &str,
        dns_provider: &str,
        location: Option<&str>,
        dns_id: &str,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            project: project.to_owned(),
            compute_provider: ProviderCode::new(compute_provider),
            dns_provider: ProviderCode::new(dns_provider),
            location: location.map(str::to_owned),
            dns_id: ZoneId::new(dns_id),
            instance: None,
            volumes: BTreeMap::new(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// Compact JSON with struct field order, the input of the document checksum.
    pub fn canonical_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn volume(&self, name: &str) -> Option<&VolumeRecord> {
        self.volumes.get(name)
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeStatus;

    fn sample() -> LabState {
        let mut state = LabState::new("demo", "gce", "gce", None, "zone-1");
        state.volumes.insert(
            "data".to_owned(),
            VolumeRecord {
                name: "data".to_owned(),
                id: None,
                size: 10,
                location: "us-east1-b".to_owned(),
                storage_type: "pd-standard".to_owned(),
                status: VolumeStatus::Available,
                attached_to: None,
            },
        );
        state
    }

    #[test]
    fn new_state_is_empty() {
        let state = LabState::new("demo", "gce", "mock", Some("us-east1-b"), "zone-1");
        assert_eq!(state.version, 0);
        assert!(state.instance.is_none());
        assert!(state.volumes.is_empty());
        assert_eq!(state.dns_provider, "mock");
        assert_eq!(state.location.as_deref(), Some("us-east1-b"));
    }

    #[test]
    fn json_roundtrip() {
        let state = sample();
        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: LabState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn canonical_json_is_stable() {
        let state = sample();
        assert_eq!(
            state.canonical_json().unwrap(),
            state.clone().canonical_json().unwrap()
        );
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "project": "demo",
            "compute_provider": "gce",
            "dns_provider": "gce",
            "dns_id": "zone-1",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let state: LabState = serde_json::from_str(json).unwrap();
        assert_eq!(state.version, 0);
        assert!(state.location.is_none());
        assert!(state.volumes.is_empty());
    }

    #[test]
    fn instance_status_display() {
        assert_eq!(InstanceStatus::Pending.to_string(), "pending");
        assert_eq!(InstanceStatus::Partial.to_string(), "partial");
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
