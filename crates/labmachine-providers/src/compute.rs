use crate::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSize {
    pub name: String,
    pub ram_mb: u64,
    pub cpus: u32,
}

impl MachineSize {
    pub fn ram_gb(&self) -> u64 {
        (self.ram_mb + 512) / 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootImage {
    pub name: String,
    #[serde(default)]
    pub family: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderInstanceState {
    Provisioning,
    Running,
    Stopped,
}

impl fmt::Display for ProviderInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderInstanceState::Provisioning => write!(f, "provisioning"),
            ProviderInstanceState::Running => write!(f, "running"),
            ProviderInstanceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// An instance as reported by a compute provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderInstance {
    pub id: String,
    pub name: String,
    pub state: ProviderInstanceState,
    #[serde(default)]
    pub address: Option<String>,
}

/// A block storage volume as reported by a compute provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderVolume {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub location: String,
    pub storage_type: String,
    /// Names of the instances the volume is attached to.
    #[serde(default)]
    pub users: Vec<String>,
}

/// Everything a compute driver needs to start a lab instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub location: Option<String>,
    pub instance_type: String,
    pub boot_image: String,
    pub container: String,
    pub network: String,
    pub tags: Vec<String>,
    /// Access token handed to the notebook container.
    pub token: String,
    /// Provider id of the volume to attach, if any.
    pub volume: Option<String>,
    pub debug: bool,
}

/// Compute capability contract.
///
/// `get_instance`, `find_instance` and `find_volume` return `Ok(None)` for absent resources;
/// deleting an absent resource fails with `ProviderError::NotFound`.
pub trait ComputeDriver: Send + Sync {
    fn name(&self) -> &str;

    fn list_locations(&self) -> Result<Vec<Location>, ProviderError>;

    fn list_sizes(&self, location: Option<&str>) -> Result<Vec<MachineSize>, ProviderError>;

    fn list_images(&self) -> Result<Vec<BootImage>, ProviderError>;

    fn list_volumes(&self) -> Result<Vec<ProviderVolume>, ProviderError>;

    /// Request a new instance. The returned instance may still be provisioning.
    fn create_instance(
        &self,
        spec: &InstanceSpec,
        timeout: Duration,
    ) -> Result<ProviderInstance, ProviderError>;

    fn get_instance(&self, id: &str) -> Result<Option<ProviderInstance>, ProviderError>;

    /// Look an instance up by the name it was created with, for when its id is unknown.
    fn find_instance(&self, name: &str) -> Result<Option<ProviderInstance>, ProviderError>;

    fn delete_instance(&self, id: &str) -> Result<(), ProviderError>;

    fn create_volume(
        &self,
        name: &str,
        size: u64,
        storage_type: &str,
        location: Option<&str>,
    ) -> Result<ProviderVolume, ProviderError>;

    /// `Ok(false)` when the provider refuses the new size.
    fn resize_volume(&self, id: &str, size: u64) -> Result<bool, ProviderError>;

    /// `Ok(false)` when the provider refuses to delete the volume.
    fn delete_volume(&self, id: &str) -> Result<bool, ProviderError>;

    fn find_volume(&self, name: &str) -> Result<Option<ProviderVolume>, ProviderError>;
}
