use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Creating,
    Available,
    Attached,
    Detached,
    Deleting,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeStatus::Creating => write!(f, "creating"),
            VolumeStatus::Available => write!(f, "available"),
            VolumeStatus::Attached => write!(f, "attached"),
            VolumeStatus::Detached => write!(f, "detached"),
            VolumeStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// A block storage unit tracked by one lab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    /// Provider-assigned identifier, when the provider exposes one distinct from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Size in GB.
    pub size: u64,
    pub location: String,
    pub storage_type: String,
    pub status: VolumeStatus,
    #[serde(default)]
    pub attached_to: Option<String>,
}

impl VolumeRecord {
    /// Key used when talking to the provider: the id if known, the name otherwise.
    pub fn provider_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn is_live(&self) -> bool {
        self.status != VolumeStatus::Deleting
    }
}
