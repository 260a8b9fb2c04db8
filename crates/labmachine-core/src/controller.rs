use crate::concurrency::shutdown_requested;
use crate::lifecycle::validate_volume_transition;
use crate::reconcile::{reconcile, FetchReport};
use crate::{LabError, Operation, ResourceKind};
use labmachine_providers::{
    BootImage, ComputeDriver, DnsDriver, DnsZone, InstanceSpec, Location, MachineSize,
    ProviderError, ProviderInstance, ProviderInstanceState, ProviderRegistry, ProviderSettings,
    ProviderVolume,
};
use labmachine_schema::{
    validate_name, InstanceId, InstanceState, InstanceStatus, LabState, NameKind, VolumeRecord,
    VolumeStatus,
};
use labmachine_store::{StateStore, StoreError};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_INSTANCE_NAME: usize = 63;
const INSTANCE_INFIX: &str = "-lab-";
const SUFFIX_LEN: usize = 8;

/// Lab used in error messages for calls that are not tied to a lab.
const NO_LAB: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Delay between `get_instance` polls while waiting for an instance to run.
    pub poll_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParams {
    pub project: String,
    pub compute_provider: String,
    pub dns_provider: String,
    pub location: Option<String>,
    pub dns_id: String,
}

/// Result of `LabController::init`. An existing descriptor is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created(LabState),
    AlreadyExists { locator: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabOptions {
    pub container: String,
    pub boot_image: String,
    pub instance_type: String,
    pub volume: Option<String>,
    pub network: String,
    pub tags: Vec<String>,
    pub timeout_minutes: u64,
    pub debug: bool,
}

impl Default for LabOptions {
    fn default() -> Self {
        Self {
            container: "jupyter/minimal-notebook:python-3.10.6".to_owned(),
            boot_image: "debian-11-bullseye-v20220822".to_owned(),
            instance_type: String::new(),
            volume: None,
            network: "default".to_owned(),
            tags: vec!["http-server".to_owned(), "https-server".to_owned()],
            timeout_minutes: 20,
            debug: false,
        }
    }
}

/// How to reach a freshly created lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabHandle {
    pub instance: String,
    pub address: String,
    pub url: String,
    pub token: String,
}

enum Wait {
    Ready(ProviderInstance),
    TimedOut(Option<ProviderInstance>),
}

/// Drives one lab's instance, DNS binding, and volumes against its providers.
///
/// The controller owns the in-memory descriptor for the duration of an
/// operation. Operations mutate it only after the provider confirms the
/// change; nothing is persisted until `push`.
pub struct LabController {
    state: LabState,
    store: StateStore,
    compute: Box<dyn ComputeDriver>,
    dns: Box<dyn DnsDriver>,
    options: ControllerOptions,
}

impl LabController {
    /// Write a fresh descriptor at version 0, unless one already exists.
    pub fn init(
        registry: &ProviderRegistry,
        params: &InitParams,
        store: &StateStore,
    ) -> Result<InitOutcome, LabError> {
        if store.exists()? {
            info!("lab state already exists at {}", store.locator());
            return Ok(InitOutcome::AlreadyExists {
                locator: store.locator(),
            });
        }
        validate_name(NameKind::Project, &params.project)?;
        registry
            .resolve_compute(&params.compute_provider)
            .map_err(|e| {
                LabError::provider(&params.project, Operation::Configure, ResourceKind::Driver, e)
            })?;
        registry.resolve_dns(&params.dns_provider).map_err(|e| {
            LabError::provider(&params.project, Operation::Configure, ResourceKind::Driver, e)
        })?;

        let state = LabState::new(
            &params.project,
            &params.compute_provider,
            &params.dns_provider,
            params.location.as_deref(),
            &params.dns_id,
        );
        match store.create(&state) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(locator)) => {
                info!("lab state created concurrently at {locator}");
                return Ok(InitOutcome::AlreadyExists { locator });
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            "initialized lab '{}' (compute: {}, dns: {}, zone: {})",
            state.project, state.compute_provider, state.dns_provider, state.dns_id
        );
        Ok(InitOutcome::Created(state))
    }

    /// Load the descriptor from `store` and bind the drivers it names.
    pub fn from_state(
        registry: &ProviderRegistry,
        settings: &ProviderSettings,
        store: StateStore,
    ) -> Result<Self, LabError> {
        let state = store.pull()?;
        let settings = settings.clone().with_location(state.location.as_deref());
        let bind = |e| {
            LabError::provider(&state.project, Operation::Configure, ResourceKind::Driver, e)
        };
        let compute = registry
            .compute_driver(&state.compute_provider, &settings)
            .map_err(bind)?;
        let dns = registry
            .dns_driver(&state.dns_provider, &settings)
            .map_err(bind)?;
        debug!(
            "bound lab '{}' to compute driver {} and dns driver {}",
            state.project,
            compute.name(),
            dns.name()
        );
        Ok(Self {
            state,
            store,
            compute,
            dns,
            options: ControllerOptions::default(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> &LabState {
        &self.state
    }

    pub fn locator(&self) -> String {
        self.store.locator()
    }

    fn lab(&self) -> &str {
        &self.state.project
    }

    fn provider_err(
        &self,
        operation: Operation,
        resource: ResourceKind,
    ) -> impl FnOnce(ProviderError) -> LabError + '_ {
        move |e| LabError::provider(self.lab(), operation, resource, e)
    }

    fn volume_not_found(&self, name: &str) -> LabError {
        LabError::NotFound {
            lab: self.lab().to_owned(),
            resource: ResourceKind::Volume,
            name: name.to_owned(),
        }
    }

    /// Provision the lab's instance and DNS binding.
    ///
    /// Steps run in a fixed order: volume check, instance creation and
    /// readiness wait, DNS record, then the descriptor update. A failure
    /// after the instance exists leaves it recorded as `pending` or
    /// `partial` so a later `fetch` or `destroy_lab` can find it.
    pub fn create_lab(&mut self, opts: &LabOptions) -> Result<LabHandle, LabError> {
        if let Some(instance) = &self.state.instance {
            return Err(LabError::AlreadyProvisioned {
                lab: self.lab().to_owned(),
                instance: instance.name.clone(),
            });
        }

        let volume = match &opts.volume {
            Some(name) => {
                let record = self
                    .state
                    .volume(name)
                    .filter(|v| v.is_live())
                    .ok_or_else(|| self.volume_not_found(name))?;
                validate_volume_transition(record.status, VolumeStatus::Attached)?;
                Some(record.clone())
            }
            None => None,
        };

        let spec = InstanceSpec {
            name: instance_name(self.lab()),
            location: self.state.location.clone(),
            instance_type: opts.instance_type.clone(),
            boot_image: opts.boot_image.clone(),
            container: opts.container.clone(),
            network: opts.network.clone(),
            tags: opts.tags.clone(),
            token: generate_token(),
            volume: volume.as_ref().map(|v| v.provider_key().to_owned()),
            debug: opts.debug,
        };
        let timeout = Duration::from_secs(opts.timeout_minutes.saturating_mul(60));
        // `None` when the timeout is too large to represent: wait indefinitely.
        let deadline = Instant::now().checked_add(timeout);

        info!("creating instance {} for lab '{}'", spec.name, self.lab());
        let created = match self.compute.create_instance(&spec, timeout) {
            Ok(instance) => instance,
            Err(ProviderError::Timeout(msg)) => {
                warn!("instance creation timed out: {msg}");
                return Err(self.provision_timed_out(&spec, opts, None));
            }
            Err(e) => return Err(LabError::provider(
                self.lab(),
                Operation::Create,
                ResourceKind::Instance,
                e,
            )),
        };

        let running = match self.wait_running(created, deadline) {
            Ok(Wait::Ready(instance)) => instance,
            Ok(Wait::TimedOut(last)) => return Err(self.provision_timed_out(&spec, opts, last)),
            Err((last, e)) => {
                self.record_instance(&last, &spec, opts, InstanceStatus::Pending);
                return Err(e);
            }
        };

        let Some(address) = running.address.clone() else {
            self.record_instance(&running, &spec, opts, InstanceStatus::Partial);
            return Err(LabError::provider(
                self.lab(),
                Operation::Get,
                ResourceKind::Instance,
                ProviderError::Rejected(format!("instance {} has no public address", running.name)),
            ));
        };

        info!("registering {} -> {address} in zone {}", spec.name, self.state.dns_id);
        let record = match self
            .dns
            .create_record(&self.state.dns_id, &spec.name, &address)
        {
            Ok(record) => record,
            Err(e) => {
                self.record_instance(&running, &spec, opts, InstanceStatus::Partial);
                return Err(LabError::provider(
                    self.lab(),
                    Operation::Create,
                    ResourceKind::DnsRecord,
                    e,
                ));
            }
        };

        let url = record.fqdn.clone();
        self.record_instance(&running, &spec, opts, InstanceStatus::Running);
        if let Some(instance) = self.state.instance.as_mut() {
            instance.record_id = Some(record.id.into());
            instance.url = Some(url.clone());
        }
        if let Some(volume) = volume {
            if let Some(record) = self.state.volumes.get_mut(&volume.name) {
                record.status = VolumeStatus::Attached;
                record.attached_to = Some(spec.name.clone());
            }
        }
        info!("lab '{}' is up at {url}", self.lab());

        Ok(LabHandle {
            instance: spec.name,
            address,
            url,
            token: spec.token,
        })
    }

    /// Poll until the instance runs, the deadline passes, or Ctrl-C is pressed.
    fn wait_running(
        &self,
        created: ProviderInstance,
        deadline: Option<Instant>,
    ) -> Result<Wait, (ProviderInstance, LabError)> {
        let mut current = created;
        loop {
            if current.state == ProviderInstanceState::Running {
                return Ok(Wait::Ready(current));
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Ok(Wait::TimedOut(Some(current)));
            }
            if shutdown_requested() {
                warn!("cancelled while waiting for instance {}", current.name);
                return Ok(Wait::TimedOut(Some(current)));
            }
            let pause = match deadline {
                Some(d) => self.options.poll_interval.min(d - now),
                None => self.options.poll_interval,
            };
            std::thread::sleep(pause);
            debug!("polling instance {} ({})", current.id, current.state);
            match self.compute.get_instance(&current.id) {
                Ok(Some(instance)) => current = instance,
                Ok(None) => debug!("instance {} not visible yet", current.id),
                Err(e) => {
                    let err =
                        LabError::provider(self.lab(), Operation::Get, ResourceKind::Instance, e);
                    return Err((current, err));
                }
            }
        }
    }

    /// Record whatever the provider has for `spec` as a pending instance.
    fn provision_timed_out(
        &mut self,
        spec: &InstanceSpec,
        opts: &LabOptions,
        last: Option<ProviderInstance>,
    ) -> LabError {
        let found = match self.compute.find_instance(&spec.name) {
            Ok(found) => found,
            Err(e) => {
                warn!("could not look up instance {} after timeout: {e}", spec.name);
                last
            }
        };
        match found {
            Some(instance) => {
                warn!("instance {} still provisioning, recorded as pending", instance.name);
                self.record_instance(&instance, spec, opts, InstanceStatus::Pending);
            }
            None => info!("provider has no instance {}, lab state unchanged", spec.name),
        }
        LabError::ProvisionTimeout {
            lab: self.lab().to_owned(),
            instance: spec.name.clone(),
            minutes: opts.timeout_minutes,
        }
    }

    fn record_instance(
        &mut self,
        instance: &ProviderInstance,
        spec: &InstanceSpec,
        opts: &LabOptions,
        status: InstanceStatus,
    ) {
        self.state.instance = Some(InstanceState {
            id: InstanceId::new(instance.id.clone()),
            name: instance.name.clone(),
            status,
            address: instance.address.clone(),
            record_id: None,
            url: None,
            token: Some(spec.token.clone()),
            boot_image: spec.boot_image.clone(),
            container: spec.container.clone(),
            instance_type: spec.instance_type.clone(),
            network: spec.network.clone(),
            tags: spec.tags.clone(),
            volume: opts.volume.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.state.touch();
    }

    /// True iff the lab tracks a volume `name` that is not being deleted.
    pub fn check_volume(&self, name: &str) -> bool {
        self.state.volume(name).is_some_and(VolumeRecord::is_live)
    }

    /// Overwrite the descriptor from what the providers report.
    pub fn fetch(&mut self) -> Result<FetchReport, LabError> {
        info!("fetching lab '{}' from providers", self.lab());
        let entries = reconcile(&mut self.state, self.compute.as_ref(), self.dns.as_ref())?;
        if !entries.is_empty() {
            self.state.touch();
        }
        Ok(FetchReport::new(&self.state, entries))
    }

    /// Delete the DNS record, then the instance, then forget both.
    pub fn destroy_lab(&mut self) -> Result<(), LabError> {
        let lab = self.lab().to_owned();
        let zone = self.state.dns_id.to_string();
        let Some(instance) = self.state.instance.as_mut() else {
            debug!("lab '{lab}' has no instance, nothing to destroy");
            return Ok(());
        };

        if let Some(record_id) = instance.record_id.clone() {
            info!("deleting DNS record {record_id} in zone {zone}");
            match self.dns.delete_record(&zone, &record_id) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("DNS record {record_id} already gone");
                }
                Err(e) => {
                    return Err(LabError::PartialDestroy {
                        lab,
                        record: record_id.to_string(),
                        source: e,
                    });
                }
            }
            instance.record_id = None;
            instance.url = None;
            if instance.status == InstanceStatus::Running {
                instance.status = InstanceStatus::Partial;
            }
            self.state.touch();
        }

        let Some(instance) = self.state.instance.as_ref() else {
            return Ok(());
        };
        info!("deleting instance {}", instance.name);
        match self.compute.delete_instance(&instance.id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("instance {} already gone", instance.id),
            Err(e) => {
                return Err(LabError::provider(
                    &lab,
                    Operation::Delete,
                    ResourceKind::Instance,
                    e,
                ))
            }
        }

        let name = instance.name.clone();
        self.state.instance = None;
        for volume in self.state.volumes.values_mut() {
            if volume.attached_to.as_deref() == Some(name.as_str()) {
                volume.status = VolumeStatus::Detached;
                volume.attached_to = None;
            }
        }
        self.state.touch();
        info!("destroyed lab '{lab}' instance {name}");
        Ok(())
    }

    /// Persist the descriptor; returns the new version.
    pub fn push(&mut self) -> Result<u64, LabError> {
        Ok(self.store.push(&mut self.state)?)
    }

    pub fn create_volume(
        &mut self,
        name: &str,
        size: u64,
        storage_type: &str,
    ) -> Result<VolumeRecord, LabError> {
        validate_name(NameKind::Volume, name)?;
        if self.state.volumes.contains_key(name) {
            return Err(LabError::AlreadyExists {
                lab: self.lab().to_owned(),
                resource: ResourceKind::Volume,
                name: name.to_owned(),
            });
        }
        info!("creating volume {name} ({size} GB, {storage_type})");
        let created = self
            .compute
            .create_volume(name, size, storage_type, self.state.location.as_deref())
            .map_err(self.provider_err(Operation::Create, ResourceKind::Volume))?;

        let mut record = volume_record(&created);
        record.status = VolumeStatus::Available;
        record.attached_to = None;
        self.state.volumes.insert(name.to_owned(), record.clone());
        self.state.touch();
        Ok(record)
    }

    /// Start tracking a volume that already exists at the provider.
    pub fn import_volume(&mut self, name: &str) -> Result<VolumeRecord, LabError> {
        if self.state.volumes.contains_key(name) {
            return Err(LabError::AlreadyExists {
                lab: self.lab().to_owned(),
                resource: ResourceKind::Volume,
                name: name.to_owned(),
            });
        }
        let found = self
            .compute
            .find_volume(name)
            .map_err(self.provider_err(Operation::Find, ResourceKind::ProviderVolume))?
            .ok_or_else(|| LabError::NotFound {
                lab: self.lab().to_owned(),
                resource: ResourceKind::ProviderVolume,
                name: name.to_owned(),
            })?;
        let record = volume_record(&found);
        info!("imported volume {name} ({}, {})", record.size, record.status);
        self.state.volumes.insert(name.to_owned(), record.clone());
        self.state.touch();
        Ok(record)
    }

    /// Grow a volume. Returns `false` when the provider refuses, including
    /// any attempt to shrink.
    pub fn resize_volume(&mut self, name: &str, new_size: u64) -> Result<bool, LabError> {
        let record = self
            .state
            .volume(name)
            .ok_or_else(|| self.volume_not_found(name))?;
        if new_size < record.size {
            warn!(
                "refusing to shrink volume {name} from {} to {new_size} GB",
                record.size
            );
            return Ok(false);
        }
        let key = record.provider_key().to_owned();
        let resized = match self.compute.resize_volume(&key, new_size) {
            Ok(resized) => resized,
            Err(ProviderError::Rejected(reason)) => {
                warn!("resize of volume {name} rejected: {reason}");
                false
            }
            Err(e) => {
                return Err(LabError::provider(
                    self.lab(),
                    Operation::Resize,
                    ResourceKind::Volume,
                    e,
                ))
            }
        };
        if !resized {
            warn!("provider did not resize volume {name} to {new_size} GB");
            return Ok(false);
        }
        if let Some(record) = self.state.volumes.get_mut(name) {
            record.size = new_size;
        }
        self.state.touch();
        info!("resized volume {name} to {new_size} GB");
        Ok(true)
    }

    /// Delete a volume at the provider and stop tracking it.
    ///
    /// Returns `false` if the volume is attached to this lab's instance or
    /// the provider refuses.
    pub fn destroy_volume(&mut self, name: &str) -> Result<bool, LabError> {
        let record = self
            .state
            .volume(name)
            .ok_or_else(|| self.volume_not_found(name))?;
        let attached_here = match (&self.state.instance, &record.attached_to) {
            (Some(instance), Some(user)) => instance.name == *user,
            (Some(instance), None) => instance.volume.as_deref() == Some(name),
            (None, _) => false,
        };
        if attached_here {
            warn!("volume {name} is attached to this lab's instance, destroy the lab first");
            return Ok(false);
        }
        validate_volume_transition(record.status, VolumeStatus::Deleting)?;

        let key = record.provider_key().to_owned();
        info!("deleting volume {name}");
        let deleted = match self.compute.delete_volume(&key) {
            Ok(deleted) => deleted,
            Err(e) if e.is_not_found() => {
                debug!("volume {name} already gone at the provider");
                true
            }
            Err(ProviderError::Rejected(reason)) => {
                warn!("deletion of volume {name} rejected: {reason}");
                false
            }
            Err(ProviderError::Timeout(msg)) => {
                // fetch drops the record once the provider no longer reports it
                warn!("deletion of volume {name} still in progress: {msg}");
                if let Some(record) = self.state.volumes.get_mut(name) {
                    record.status = VolumeStatus::Deleting;
                }
                self.state.touch();
                return Ok(false);
            }
            Err(e) => {
                return Err(LabError::provider(
                    self.lab(),
                    Operation::Delete,
                    ResourceKind::Volume,
                    e,
                ))
            }
        };
        if !deleted {
            warn!("provider did not delete volume {name}");
            return Ok(false);
        }
        self.state.volumes.remove(name);
        self.state.touch();
        Ok(true)
    }

    /// Volumes tracked by the lab, or every volume the provider has.
    pub fn list_volumes(&self, include_remote: bool) -> Result<Vec<VolumeRecord>, LabError> {
        if !include_remote {
            return Ok(self.state.volumes.values().cloned().collect());
        }
        let volumes = self
            .compute
            .list_volumes()
            .map_err(self.provider_err(Operation::List, ResourceKind::Volume))?;
        Ok(volumes.iter().map(volume_record).collect())
    }
}

fn volume_record(volume: &ProviderVolume) -> VolumeRecord {
    let attached_to = volume.users.first().cloned();
    VolumeRecord {
        name: volume.name.clone(),
        id: Some(volume.id.clone()),
        size: volume.size,
        location: volume.location.clone(),
        storage_type: volume.storage_type.clone(),
        status: if attached_to.is_some() {
            VolumeStatus::Attached
        } else {
            VolumeStatus::Available
        },
        attached_to,
    }
}

/// `<project>-lab-<suffix>`, truncated to fit the 63 character limit.
pub(crate) fn instance_name(project: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let budget = MAX_INSTANCE_NAME - INSTANCE_INFIX.len() - SUFFIX_LEN;
    let prefix: String = project.chars().take(budget).collect();
    format!(
        "{}{INSTANCE_INFIX}{}",
        prefix.trim_end_matches('-'),
        &suffix[..SUFFIX_LEN]
    )
}

pub(crate) fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn driver_err(
    code: &str,
    operation: Operation,
    resource: ResourceKind,
) -> impl FnOnce(ProviderError) -> LabError + '_ {
    move |e| LabError::provider(&format!("{NO_LAB} ({code})"), operation, resource, e)
}

pub fn list_locations(
    registry: &ProviderRegistry,
    settings: &ProviderSettings,
    code: &str,
) -> Result<Vec<Location>, LabError> {
    let driver = registry
        .compute_driver(code, settings)
        .map_err(driver_err(code, Operation::Configure, ResourceKind::Driver))?;
    driver
        .list_locations()
        .map_err(driver_err(code, Operation::List, ResourceKind::Locations))
}

pub fn list_sizes(
    registry: &ProviderRegistry,
    settings: &ProviderSettings,
    code: &str,
    location: Option<&str>,
) -> Result<Vec<MachineSize>, LabError> {
    let driver = registry
        .compute_driver(code, settings)
        .map_err(driver_err(code, Operation::Configure, ResourceKind::Driver))?;
    driver
        .list_sizes(location)
        .map_err(driver_err(code, Operation::List, ResourceKind::Sizes))
}

pub fn list_images(
    registry: &ProviderRegistry,
    settings: &ProviderSettings,
    code: &str,
) -> Result<Vec<BootImage>, LabError> {
    let driver = registry
        .compute_driver(code, settings)
        .map_err(driver_err(code, Operation::Configure, ResourceKind::Driver))?;
    driver
        .list_images()
        .map_err(driver_err(code, Operation::List, ResourceKind::Images))
}

pub fn list_zones(
    registry: &ProviderRegistry,
    settings: &ProviderSettings,
    code: &str,
) -> Result<Vec<DnsZone>, LabError> {
    let driver = registry
        .dns_driver(code, settings)
        .map_err(driver_err(code, Operation::Configure, ResourceKind::Driver))?;
    driver
        .list_zones()
        .map_err(driver_err(code, Operation::List, ResourceKind::Zones))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_is_valid_and_unique() {
        let a = instance_name("demo");
        let b = instance_name("demo");
        assert!(a.starts_with("demo-lab-"));
        assert_eq!(a.len(), "demo-lab-".len() + SUFFIX_LEN);
        assert_ne!(a, b);
        assert!(validate_name(NameKind::Lab, &a).is_ok());
    }

    #[test]
    fn instance_name_fits_long_projects() {
        let project = format!("{}-xyz", "p".repeat(49));
        let name = instance_name(&project);
        assert!(name.len() <= MAX_INSTANCE_NAME);
        assert!(!name.contains("--"), "{name}");
        assert!(validate_name(NameKind::Lab, &name).is_ok());
    }

    #[test]
    fn tokens_are_random_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn default_options_match_cli_defaults() {
        let opts = LabOptions::default();
        assert_eq!(opts.timeout_minutes, 20);
        assert_eq!(opts.network, "default");
        assert_eq!(opts.tags, vec!["http-server", "https-server"]);
        assert_eq!(ControllerOptions::default().poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn provider_volume_with_users_is_attached() {
        let volume = ProviderVolume {
            id: "disk-1".to_owned(),
            name: "data".to_owned(),
            size: 10,
            location: "zone-a".to_owned(),
            storage_type: "pd-standard".to_owned(),
            users: vec!["demo-lab-1".to_owned()],
        };
        let record = volume_record(&volume);
        assert_eq!(record.status, VolumeStatus::Attached);
        assert_eq!(record.attached_to.as_deref(), Some("demo-lab-1"));
        assert_eq!(record.provider_key(), "disk-1");
    }
}
