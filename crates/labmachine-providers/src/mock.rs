//! In-process simulated cloud backing the `mock` compute and DNS drivers.
//!
//! The inventory lives behind an `Arc<Mutex<_>>` so drivers built from the
//! same `MockCloud` observe each other. A persistent cloud additionally
//! reloads and saves `mock-cloud.json` around every call, which lets separate
//! processes share one simulated cloud. `MockFaults` switches inject the
//! failure modes the controller must survive.

use crate::compute::{
    BootImage, ComputeDriver, InstanceSpec, Location, MachineSize, ProviderInstance,
    ProviderInstanceState, ProviderVolume,
};
use crate::dns::{DnsDriver, DnsRecord, DnsZone};
use crate::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub const MOCK_CLOUD_FILE: &str = "mock-cloud.json";
pub const MOCK_LOCATION: &str = "mock-zone";

/// Only the most recent calls are kept in the log.
const MAX_LOGGED_CALLS: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockFaults {
    pub fail_create_instance: bool,
    /// `create_instance` times out and the instance never comes into existence.
    pub phantom_create: bool,
    /// `create_instance` times out after the instance was created.
    pub slow_create: bool,
    /// Instances stay `provisioning` forever.
    pub never_boots: bool,
    /// Number of `get_instance` calls an instance stays `provisioning`.
    pub boot_polls: u32,
    pub fail_create_record: bool,
    pub fail_delete_record: bool,
    pub fail_delete_instance: bool,
    pub reject_resize: bool,
    pub reject_delete_volume: bool,
    /// `delete_volume` times out and leaves the volume in place.
    pub slow_delete_volume: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockInstance {
    instance: ProviderInstance,
    polls_left: u32,
    #[serde(default)]
    volume: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct MockInventory {
    instances: BTreeMap<String, MockInstance>,
    volumes: BTreeMap<String, ProviderVolume>,
    zones: Vec<DnsZone>,
    records: BTreeMap<String, DnsRecord>,
    next_address: u32,
    next_volume: u32,
    faults: MockFaults,
    calls: Vec<String>,
}

impl Default for MockInventory {
    fn default() -> Self {
        Self {
            instances: BTreeMap::new(),
            volumes: BTreeMap::new(),
            zones: vec![DnsZone {
                id: MOCK_LOCATION.to_owned(),
                domain: "lab.example.test".to_owned(),
                zone_type: "public".to_owned(),
            }],
            records: BTreeMap::new(),
            next_address: 0,
            next_volume: 0,
            faults: MockFaults::default(),
            calls: Vec::new(),
        }
    }
}

fn record_key(zone_id: &str, record_id: &str) -> String {
    format!("{zone_id}/{record_id}")
}

impl MockInventory {
    fn log(&mut self, call: String) {
        debug!("mock cloud: {call}");
        if self.calls.len() >= MAX_LOGGED_CALLS {
            let excess = self.calls.len() + 1 - MAX_LOGGED_CALLS;
            self.calls.drain(..excess);
        }
        self.calls.push(call);
    }

    fn volume_by_name(&self, name: &str) -> Option<&ProviderVolume> {
        self.volumes.values().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockCloud {
    inner: Arc<Mutex<MockInventory>>,
    path: Option<PathBuf>,
}

fn load_inventory(path: &Path) -> Result<MockInventory, ProviderError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn save_inventory(path: &Path, inventory: &MockInventory) -> Result<(), ProviderError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let data = serde_json::to_vec_pretty(inventory)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&data)?;
    tmp.persist(path).map_err(|e| ProviderError::Io(e.error))?;
    Ok(())
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cloud persisted under `dir`, shared by every handle opened on it.
    pub fn persistent(dir: &Path) -> Result<Self, ProviderError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MOCK_CLOUD_FILE);
        let inventory = if path.exists() {
            load_inventory(&path)?
        } else {
            let inventory = MockInventory::default();
            save_inventory(&path, &inventory)?;
            inventory
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inventory)),
            path: Some(path),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockInventory) -> R) -> Result<R, ProviderError> {
        let mut inventory = self.inner.lock().map_err(|e| {
            ProviderError::Io(std::io::Error::other(format!("mock cloud poisoned: {e}")))
        })?;
        if let Some(path) = &self.path {
            if path.exists() {
                *inventory = load_inventory(path)?;
            }
        }
        let out = f(&mut inventory);
        if let Some(path) = &self.path {
            save_inventory(path, &inventory)?;
        }
        Ok(out)
    }

    pub fn set_faults(&self, faults: MockFaults) -> Result<(), ProviderError> {
        self.with(|inv| inv.faults = faults)
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut MockFaults)) -> Result<(), ProviderError> {
        self.with(|inv| f(&mut inv.faults))
    }

    /// Provider calls made so far, oldest first, e.g. `delete_record mock-zone/lab`.
    pub fn calls(&self) -> Result<Vec<String>, ProviderError> {
        self.with(|inv| inv.calls.clone())
    }

    pub fn instance(&self, id: &str) -> Result<Option<ProviderInstance>, ProviderError> {
        self.with(|inv| inv.instances.get(id).map(|m| m.instance.clone()))
    }

    pub fn instance_count(&self) -> Result<usize, ProviderError> {
        self.with(|inv| inv.instances.len())
    }

    pub fn record(&self, zone_id: &str, record_id: &str) -> Result<Option<DnsRecord>, ProviderError> {
        self.with(|inv| inv.records.get(&record_key(zone_id, record_id)).cloned())
    }

    /// Delete an instance behind the controller's back.
    pub fn remove_instance(&self, id: &str) -> Result<bool, ProviderError> {
        self.with(|inv| inv.instances.remove(id).is_some())
    }

    /// Delete a DNS record behind the controller's back.
    pub fn remove_record(&self, zone_id: &str, record_id: &str) -> Result<bool, ProviderError> {
        self.with(|inv| inv.records.remove(&record_key(zone_id, record_id)).is_some())
    }

    /// Delete a volume by name behind the controller's back.
    pub fn remove_volume(&self, name: &str) -> Result<bool, ProviderError> {
        self.with(|inv| {
            let id = inv.volume_by_name(name).map(|v| v.id.clone());
            id.is_some_and(|id| inv.volumes.remove(&id).is_some())
        })
    }

    /// Create a volume directly in the provider, as if made outside labmachine.
    pub fn seed_volume(
        &self,
        name: &str,
        size: u64,
        users: &[&str],
    ) -> Result<ProviderVolume, ProviderError> {
        self.with(|inv| {
            inv.next_volume += 1;
            let volume = ProviderVolume {
                id: format!("mock-vol-{}", inv.next_volume),
                name: name.to_owned(),
                size,
                location: MOCK_LOCATION.to_owned(),
                storage_type: "pd-standard".to_owned(),
                users: users.iter().map(|u| (*u).to_owned()).collect(),
            };
            inv.volumes.insert(volume.id.clone(), volume.clone());
            volume
        })
    }

    pub fn volume(&self, name: &str) -> Result<Option<ProviderVolume>, ProviderError> {
        self.with(|inv| inv.volume_by_name(name).cloned())
    }
}

fn simulated(status: u16, what: &str) -> ProviderError {
    ProviderError::Api {
        status,
        message: format!("simulated {what} failure"),
    }
}

pub struct MockCompute {
    cloud: MockCloud,
}

impl MockCompute {
    pub fn new(cloud: MockCloud) -> Self {
        Self { cloud }
    }
}

impl ComputeDriver for MockCompute {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_locations(&self) -> Result<Vec<Location>, ProviderError> {
        Ok(vec![
            Location {
                name: MOCK_LOCATION.to_owned(),
                country: "ZZ".to_owned(),
            },
            Location {
                name: "mock-zone-b".to_owned(),
                country: "ZZ".to_owned(),
            },
        ])
    }

    fn list_sizes(&self, _location: Option<&str>) -> Result<Vec<MachineSize>, ProviderError> {
        Ok([("mock-small", 2048, 1), ("mock-medium", 4096, 2), ("mock-large", 16384, 4)]
            .into_iter()
            .map(|(name, ram_mb, cpus)| MachineSize {
                name: name.to_owned(),
                ram_mb,
                cpus,
            })
            .collect())
    }

    fn list_images(&self) -> Result<Vec<BootImage>, ProviderError> {
        Ok(vec![
            BootImage {
                name: "mock-cos-stable".to_owned(),
                family: Some("cos-stable".to_owned()),
            },
            BootImage {
                name: "debian-11-bullseye-v20220822".to_owned(),
                family: Some("debian-11".to_owned()),
            },
        ])
    }

    fn list_volumes(&self) -> Result<Vec<ProviderVolume>, ProviderError> {
        self.cloud.with(|inv| inv.volumes.values().cloned().collect())
    }

    fn create_instance(
        &self,
        spec: &InstanceSpec,
        _timeout: Duration,
    ) -> Result<ProviderInstance, ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("create_instance {}", spec.name));
            if inv.faults.fail_create_instance {
                return Err(simulated(500, "instance creation"));
            }
            if inv.faults.phantom_create {
                return Err(ProviderError::Timeout(format!(
                    "creation of instance {} did not complete",
                    spec.name
                )));
            }
            if inv.instances.contains_key(&spec.name) {
                return Err(ProviderError::Rejected(format!(
                    "instance {} already exists",
                    spec.name
                )));
            }
            if let Some(volume_id) = &spec.volume {
                let volume = inv
                    .volumes
                    .get_mut(volume_id)
                    .ok_or_else(|| ProviderError::NotFound(format!("volume {volume_id}")))?;
                volume.users.push(spec.name.clone());
            }
            inv.next_address = inv.next_address % 254 + 1;
            let instance = ProviderInstance {
                id: spec.name.clone(),
                name: spec.name.clone(),
                state: ProviderInstanceState::Provisioning,
                address: Some(format!("203.0.113.{}", inv.next_address)),
            };
            let polls_left = inv.faults.boot_polls;
            inv.instances.insert(
                spec.name.clone(),
                MockInstance {
                    instance: instance.clone(),
                    polls_left,
                    volume: spec.volume.clone(),
                },
            );
            if inv.faults.slow_create {
                return Err(ProviderError::Timeout(format!(
                    "creation of instance {} still in progress",
                    spec.name
                )));
            }
            Ok(instance)
        })?
    }

    fn get_instance(&self, id: &str) -> Result<Option<ProviderInstance>, ProviderError> {
        self.cloud.with(|inv| {
            let never_boots = inv.faults.never_boots;
            let entry = inv.instances.get_mut(id)?;
            if entry.instance.state == ProviderInstanceState::Provisioning && !never_boots {
                if entry.polls_left == 0 {
                    entry.instance.state = ProviderInstanceState::Running;
                } else {
                    entry.polls_left -= 1;
                }
            }
            Some(entry.instance.clone())
        })
    }

    fn find_instance(&self, name: &str) -> Result<Option<ProviderInstance>, ProviderError> {
        self.cloud.with(|inv| {
            inv.instances
                .values()
                .find(|m| m.instance.name == name)
                .map(|m| m.instance.clone())
        })
    }

    fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("delete_instance {id}"));
            if inv.faults.fail_delete_instance {
                return Err(simulated(500, "instance deletion"));
            }
            let removed = inv
                .instances
                .remove(id)
                .ok_or_else(|| ProviderError::NotFound(format!("instance {id}")))?;
            if let Some(volume_id) = removed.volume {
                if let Some(volume) = inv.volumes.get_mut(&volume_id) {
                    volume.users.retain(|user| user != id);
                }
            }
            Ok(())
        })?
    }

    fn create_volume(
        &self,
        name: &str,
        size: u64,
        storage_type: &str,
        location: Option<&str>,
    ) -> Result<ProviderVolume, ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("create_volume {name}"));
            if inv.volume_by_name(name).is_some() {
                return Err(ProviderError::Rejected(format!("volume {name} already exists")));
            }
            if size == 0 {
                return Err(ProviderError::Rejected("volume size must be positive".to_owned()));
            }
            inv.next_volume += 1;
            let volume = ProviderVolume {
                id: format!("mock-vol-{}", inv.next_volume),
                name: name.to_owned(),
                size,
                location: location.unwrap_or(MOCK_LOCATION).to_owned(),
                storage_type: storage_type.to_owned(),
                users: Vec::new(),
            };
            inv.volumes.insert(volume.id.clone(), volume.clone());
            Ok(volume)
        })?
    }

    fn resize_volume(&self, id: &str, size: u64) -> Result<bool, ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("resize_volume {id} {size}"));
            let reject = inv.faults.reject_resize;
            let volume = inv
                .volumes
                .get_mut(id)
                .ok_or_else(|| ProviderError::NotFound(format!("volume {id}")))?;
            if reject || size < volume.size {
                return Ok(false);
            }
            volume.size = size;
            Ok(true)
        })?
    }

    fn delete_volume(&self, id: &str) -> Result<bool, ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("delete_volume {id}"));
            let volume = inv
                .volumes
                .get(id)
                .ok_or_else(|| ProviderError::NotFound(format!("volume {id}")))?;
            if inv.faults.reject_delete_volume || !volume.users.is_empty() {
                return Ok(false);
            }
            if inv.faults.slow_delete_volume {
                return Err(ProviderError::Timeout(format!(
                    "deletion of volume {id} still in progress"
                )));
            }
            inv.volumes.remove(id);
            Ok(true)
        })?
    }

    fn find_volume(&self, name: &str) -> Result<Option<ProviderVolume>, ProviderError> {
        self.cloud.with(|inv| inv.volume_by_name(name).cloned())
    }
}

pub struct MockDns {
    cloud: MockCloud,
}

impl MockDns {
    pub fn new(cloud: MockCloud) -> Self {
        Self { cloud }
    }
}

impl DnsDriver for MockDns {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_zones(&self) -> Result<Vec<DnsZone>, ProviderError> {
        self.cloud.with(|inv| inv.zones.clone())
    }

    fn create_record(
        &self,
        zone_id: &str,
        hostname: &str,
        address: &str,
    ) -> Result<DnsRecord, ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("create_record {zone_id}/{hostname}"));
            if inv.faults.fail_create_record {
                return Err(simulated(503, "record creation"));
            }
            let key = record_key(zone_id, hostname);
            if inv.records.contains_key(&key) {
                return Err(ProviderError::Rejected(format!("record {key} already exists")));
            }
            // unknown zones are accepted and named by their id
            let domain = inv
                .zones
                .iter()
                .find(|z| z.id == zone_id || z.domain == zone_id)
                .map_or(zone_id, |z| z.domain.as_str());
            let record = DnsRecord {
                id: hostname.to_owned(),
                zone_id: zone_id.to_owned(),
                name: hostname.to_owned(),
                fqdn: format!("{hostname}.{domain}"),
                record_type: "A".to_owned(),
                data: address.to_owned(),
            };
            inv.records.insert(key, record.clone());
            Ok(record)
        })?
    }

    fn get_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<DnsRecord>, ProviderError> {
        self.cloud
            .with(|inv| inv.records.get(&record_key(zone_id, record_id)).cloned())
    }

    fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        self.cloud.with(|inv| {
            inv.log(format!("delete_record {zone_id}/{record_id}"));
            if inv.faults.fail_delete_record {
                return Err(simulated(503, "record deletion"));
            }
            inv.records
                .remove(&record_key(zone_id, record_id))
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotFound(format!("record {zone_id}/{record_id}")))
        })?
    }
}
