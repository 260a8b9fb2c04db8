//! Google Compute Engine and Cloud DNS drivers.
//!
//! Both talk to the public REST APIs with a bearer token:
//! - Compute: `{compute_api}/projects/{project}/zones/{zone}/...`
//! - DNS:     `{dns_api}/projects/{project}/managedZones/...`
//!
//! Instances and disks are addressed by name within the lab's zone, so the
//! provider ids handed back to the controller are those names. Mutating
//! Compute calls return an operation that is waited on until `DONE`.

use crate::compute::{
    BootImage, ComputeDriver, InstanceSpec, Location, MachineSize, ProviderInstance,
    ProviderInstanceState, ProviderVolume,
};
use crate::dns::{DnsDriver, DnsRecord, DnsZone};
use crate::registry::ProviderSettings;
use crate::ProviderError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

pub const COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";
pub const DNS_API: &str = "https://dns.googleapis.com/dns/v1";
pub const DEFAULT_ZONE: &str = "us-central1-a";
pub const CONTAINER_DECLARATION_KEY: &str = "gce-container-declaration";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const RECORD_TTL: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GceConfig {
    pub project: String,
    pub token: String,
    pub zone: String,
    pub compute_api: String,
    pub dns_api: String,
}

impl GceConfig {
    pub fn new(project: &str, token: &str) -> Self {
        Self {
            project: project.to_owned(),
            token: token.to_owned(),
            zone: DEFAULT_ZONE.to_owned(),
            compute_api: COMPUTE_API.to_owned(),
            dns_api: DNS_API.to_owned(),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let project = settings.gce_project.as_deref().ok_or_else(|| {
            ProviderError::Config(
                "no GCE project; set LABMACHINE_GCE_PROJECT or GOOGLE_CLOUD_PROJECT".to_owned(),
            )
        })?;
        let token = settings.gce_token.as_deref().ok_or_else(|| {
            ProviderError::Config(
                "no GCE access token; set LABMACHINE_GCE_TOKEN or GOOGLE_OAUTH_ACCESS_TOKEN"
                    .to_owned(),
            )
        })?;
        let config = Self::new(project, token);
        Ok(match settings.location.as_deref() {
            Some(zone) => config.with_zone(zone),
            None => config,
        })
    }

    #[must_use]
    pub fn with_zone(mut self, zone: &str) -> Self {
        self.zone = zone.to_owned();
        self
    }

    /// Point both APIs at another base URL.
    #[must_use]
    pub fn with_endpoints(mut self, compute_api: &str, dns_api: &str) -> Self {
        self.compute_api = compute_api.trim_end_matches('/').to_owned();
        self.dns_api = dns_api.trim_end_matches('/').to_owned();
        self
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ZoneItem {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineTypeItem {
    name: String,
    guest_cpus: u32,
    memory_mb: u64,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    name: String,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    deprecated: Option<Deprecation>,
}

#[derive(Debug, Deserialize)]
struct Deprecation {
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskItem {
    name: String,
    size_gb: String,
    #[serde(rename = "type")]
    disk_type: String,
    zone: String,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceItem {
    name: String,
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP", default)]
    nat_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    status: String,
    #[serde(default)]
    error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedZone {
    name: String,
    dns_name: String,
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedZoneList {
    #[serde(default)]
    managed_zones: Vec<ManagedZone>,
}

#[derive(Debug, Deserialize)]
struct ResourceRecordSet {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    rrdatas: Vec<String>,
}

// --- conversions ---

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Country or continent code of a zone, derived from its region prefix.
fn zone_country(zone: &str) -> String {
    let prefix = zone.split('-').next().unwrap_or(zone);
    match prefix {
        "us" => "US",
        "northamerica" => "CA",
        "southamerica" => "BR",
        "europe" => "EU",
        "asia" => "AS",
        "australia" => "AU",
        "me" => "ME",
        "africa" => "ZA",
        other => return other.to_uppercase(),
    }
    .to_owned()
}

fn instance_state(status: &str) -> ProviderInstanceState {
    match status {
        "PROVISIONING" | "STAGING" | "REPAIRING" => ProviderInstanceState::Provisioning,
        "RUNNING" => ProviderInstanceState::Running,
        _ => ProviderInstanceState::Stopped,
    }
}

impl From<InstanceItem> for ProviderInstance {
    fn from(item: InstanceItem) -> Self {
        let address = item
            .network_interfaces
            .iter()
            .flat_map(|ni| ni.access_configs.iter())
            .find_map(|ac| ac.nat_ip.clone());
        ProviderInstance {
            id: item.name.clone(),
            state: instance_state(&item.status),
            name: item.name,
            address,
        }
    }
}

impl TryFrom<DiskItem> for ProviderVolume {
    type Error = ProviderError;

    fn try_from(item: DiskItem) -> Result<Self, ProviderError> {
        let size = item.size_gb.parse().map_err(|_| ProviderError::Api {
            status: 200,
            message: format!("disk {} reports invalid size '{}'", item.name, item.size_gb),
        })?;
        Ok(ProviderVolume {
            id: item.name.clone(),
            name: item.name,
            size,
            location: last_segment(&item.zone).to_owned(),
            storage_type: last_segment(&item.disk_type).to_owned(),
            users: item
                .users
                .iter()
                .map(|u| last_segment(u).to_owned())
                .collect(),
        })
    }
}

fn image_path(image: &str) -> String {
    if image.contains('/') {
        image.to_owned()
    } else if image.starts_with("cos-") {
        format!("projects/cos-cloud/global/images/{image}")
    } else if image.starts_with("debian-") {
        format!("projects/debian-cloud/global/images/{image}")
    } else {
        format!("global/images/{image}")
    }
}

/// YAML value of the `gce-container-declaration` metadata entry.
pub fn container_declaration(spec: &InstanceSpec) -> String {
    let mut yaml = String::from("spec:\n  containers:\n  - name: lab\n");
    yaml.push_str(&format!("    image: '{}'\n", spec.container));
    yaml.push_str("    env:\n    - name: JUPYTER_TOKEN\n");
    yaml.push_str(&format!("      value: '{}'\n", spec.token));
    if let Some(volume) = &spec.volume {
        yaml.push_str("    volumeMounts:\n    - name: data\n");
        yaml.push_str("      mountPath: /home/jovyan/work\n      readOnly: false\n");
        yaml.push_str("    stdin: false\n    tty: false\n  restartPolicy: Always\n");
        yaml.push_str("  volumes:\n  - name: data\n    gcePersistentDisk:\n");
        yaml.push_str(&format!(
            "      pdName: {volume}\n      fsType: ext4\n      partition: 0\n      readOnly: false\n"
        ));
    } else {
        yaml.push_str("    stdin: false\n    tty: false\n  restartPolicy: Always\n");
    }
    yaml
}

fn instance_body(spec: &InstanceSpec, zone: &str) -> Value {
    let mut disks = vec![json!({
        "boot": true,
        "autoDelete": true,
        "initializeParams": { "sourceImage": image_path(&spec.boot_image) },
    })];
    if let Some(volume) = &spec.volume {
        disks.push(json!({
            "boot": false,
            "autoDelete": false,
            "deviceName": volume,
            "source": format!("zones/{zone}/disks/{volume}"),
        }));
    }
    let mut metadata = vec![json!({
        "key": CONTAINER_DECLARATION_KEY,
        "value": container_declaration(spec),
    })];
    if spec.debug {
        metadata.push(json!({ "key": "serial-port-enable", "value": "TRUE" }));
    }
    json!({
        "name": spec.name,
        "machineType": format!("zones/{zone}/machineTypes/{}", spec.instance_type),
        "tags": { "items": spec.tags },
        "labels": { "labmachine": "lab" },
        "metadata": { "items": metadata },
        "disks": disks,
        "networkInterfaces": [{
            "network": format!("global/networks/{}", spec.network),
            "accessConfigs": [{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }],
        }],
    })
}

fn operation_error(op: &Operation) -> Option<ProviderError> {
    let errors = op.error.as_ref()?;
    let message = errors
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ");
    Some(ProviderError::Rejected(format!(
        "operation {} failed: {message}",
        op.name
    )))
}

fn map_ureq_error(url: &str, err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::StatusCode(404) => ProviderError::NotFound(url.to_owned()),
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            ProviderError::Auth(format!("HTTP {code} for {url}"))
        }
        ureq::Error::StatusCode(code) => ProviderError::Api {
            status: code,
            message: format!("request to {url} failed"),
        },
        ureq::Error::Timeout(_) => ProviderError::Timeout(format!("request to {url}")),
        other => ProviderError::Http(other.to_string()),
    }
}

/// Turn a `NotFound` into `Ok(None)`.
fn optional<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProviderError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

// --- transport ---

struct GceClient {
    config: GceConfig,
    agent: ureq::Agent,
}

impl GceClient {
    fn new(config: GceConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            config,
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }

    fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{path}",
            self.config.compute_api, self.config.project
        )
    }

    fn zone_url(&self, path: &str) -> String {
        self.compute_url(&format!("zones/{}/{path}", self.config.zone))
    }

    fn dns_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{path}",
            self.config.dns_api, self.config.project
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.token)
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        debug!("GET {url}");
        let resp = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer())
            .call()
            .map_err(|e| map_ureq_error(url, e))?;
        Ok(serde_json::from_reader(resp.into_body().into_reader())?)
    }

    fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, ProviderError> {
        let data = serde_json::to_vec(body)?;
        debug!("POST {url} ({} bytes)", data.len());
        let resp = self
            .agent
            .post(url)
            .header("Authorization", &self.bearer())
            .header("Content-Type", "application/json")
            .send(&data[..])
            .map_err(|e| map_ureq_error(url, e))?;
        Ok(serde_json::from_reader(resp.into_body().into_reader())?)
    }

    fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        debug!("DELETE {url}");
        let resp = self
            .agent
            .delete(url)
            .header("Authorization", &self.bearer())
            .call()
            .map_err(|e| map_ureq_error(url, e))?;
        Ok(serde_json::from_reader(resp.into_body().into_reader())?)
    }

    /// Block until a zonal operation is `DONE` or `deadline` passes.
    fn wait_operation(&self, mut op: Operation, deadline: Instant) -> Result<(), ProviderError> {
        loop {
            if op.status == "DONE" {
                return match operation_error(&op) {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "operation {} still {}",
                    op.name, op.status
                )));
            }
            let url = self.zone_url(&format!("operations/{}/wait", op.name));
            op = self.post(&url, &json!({}))?;
        }
    }
}

pub struct GceCompute {
    client: GceClient,
}

impl GceCompute {
    pub fn new(config: GceConfig) -> Self {
        Self {
            client: GceClient::new(config),
        }
    }

    fn default_deadline() -> Instant {
        Instant::now() + Duration::from_secs(300)
    }
}

impl ComputeDriver for GceCompute {
    fn name(&self) -> &'static str {
        "gce"
    }

    fn list_locations(&self) -> Result<Vec<Location>, ProviderError> {
        let list: ListResponse<ZoneItem> = self.client.get(&self.client.compute_url("zones"))?;
        Ok(list
            .items
            .into_iter()
            .map(|z| Location {
                country: zone_country(&z.name),
                name: z.name,
            })
            .collect())
    }

    fn list_sizes(&self, location: Option<&str>) -> Result<Vec<MachineSize>, ProviderError> {
        let zone = location.unwrap_or(&self.client.config.zone);
        let url = self
            .client
            .compute_url(&format!("zones/{zone}/machineTypes"));
        let list: ListResponse<MachineTypeItem> = self.client.get(&url)?;
        Ok(list
            .items
            .into_iter()
            .map(|m| MachineSize {
                name: m.name,
                ram_mb: m.memory_mb,
                cpus: m.guest_cpus,
            })
            .collect())
    }

    fn list_images(&self) -> Result<Vec<BootImage>, ProviderError> {
        let own: ListResponse<ImageItem> =
            self.client.get(&self.client.compute_url("global/images"))?;
        let cos_url = format!(
            "{}/projects/cos-cloud/global/images",
            self.client.config.compute_api
        );
        let cos: ListResponse<ImageItem> = self.client.get(&cos_url)?;
        Ok(own
            .items
            .into_iter()
            .chain(cos.items)
            .filter(|img| {
                img.deprecated
                    .as_ref()
                    .and_then(|d| d.state.as_deref())
                    .map_or(true, |state| state == "ACTIVE")
            })
            .map(|img| BootImage {
                name: img.name,
                family: img.family,
            })
            .collect())
    }

    fn list_volumes(&self) -> Result<Vec<ProviderVolume>, ProviderError> {
        let list: ListResponse<DiskItem> = self.client.get(&self.client.zone_url("disks"))?;
        list.items.into_iter().map(ProviderVolume::try_from).collect()
    }

    fn create_instance(
        &self,
        spec: &InstanceSpec,
        timeout: Duration,
    ) -> Result<ProviderInstance, ProviderError> {
        let zone = self.client.config.zone.clone();
        let deadline = Instant::now() + timeout;
        let body = instance_body(spec, &zone);
        let op: Operation = self.client.post(&self.client.zone_url("instances"), &body)?;
        self.client.wait_operation(op, deadline)?;
        self.get_instance(&spec.name)?
            .ok_or_else(|| ProviderError::NotFound(format!("instance {}", spec.name)))
    }

    fn get_instance(&self, id: &str) -> Result<Option<ProviderInstance>, ProviderError> {
        let url = self.client.zone_url(&format!("instances/{id}"));
        let item: Option<InstanceItem> = optional(self.client.get(&url))?;
        Ok(item.map(ProviderInstance::from))
    }

    fn find_instance(&self, name: &str) -> Result<Option<ProviderInstance>, ProviderError> {
        // Compute Engine addresses instances by name.
        self.get_instance(name)
    }

    fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        let url = self.client.zone_url(&format!("instances/{id}"));
        let op: Operation = self.client.delete(&url)?;
        self.client.wait_operation(op, Self::default_deadline())
    }

    fn create_volume(
        &self,
        name: &str,
        size: u64,
        storage_type: &str,
        location: Option<&str>,
    ) -> Result<ProviderVolume, ProviderError> {
        let zone = location.unwrap_or(&self.client.config.zone);
        let body = json!({
            "name": name,
            "sizeGb": size.to_string(),
            "type": format!("zones/{zone}/diskTypes/{storage_type}"),
        });
        let url = self.client.compute_url(&format!("zones/{zone}/disks"));
        let op: Operation = self.client.post(&url, &body)?;
        self.client.wait_operation(op, Self::default_deadline())?;
        let disk: DiskItem = self
            .client
            .get(&self.client.compute_url(&format!("zones/{zone}/disks/{name}")))?;
        ProviderVolume::try_from(disk)
    }

    fn resize_volume(&self, id: &str, size: u64) -> Result<bool, ProviderError> {
        let url = self.client.zone_url(&format!("disks/{id}/resize"));
        let op: Operation = match self
            .client
            .post(&url, &json!({ "sizeGb": size.to_string() }))
        {
            Ok(op) => op,
            Err(ProviderError::Api { status: 400, .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.client.wait_operation(op, Self::default_deadline()) {
            Ok(()) => Ok(true),
            Err(ProviderError::Rejected(reason)) => {
                debug!("resize of {id} rejected: {reason}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn delete_volume(&self, id: &str) -> Result<bool, ProviderError> {
        let url = self.client.zone_url(&format!("disks/{id}"));
        let op: Operation = match self.client.delete(&url) {
            Ok(op) => op,
            Err(ProviderError::Api { status: 400, .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.client.wait_operation(op, Self::default_deadline()) {
            Ok(()) => Ok(true),
            Err(ProviderError::Rejected(reason)) => {
                debug!("deletion of {id} rejected: {reason}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn find_volume(&self, name: &str) -> Result<Option<ProviderVolume>, ProviderError> {
        let url = self.client.zone_url(&format!("disks/{name}"));
        optional(self.client.get::<DiskItem>(&url))?
            .map(ProviderVolume::try_from)
            .transpose()
    }
}

pub struct GceDns {
    client: GceClient,
}

impl GceDns {
    pub fn new(config: GceConfig) -> Self {
        Self {
            client: GceClient::new(config),
        }
    }

    /// Find a managed zone by its name or by its domain.
    fn resolve_zone(&self, zone_id: &str) -> Result<Option<ManagedZone>, ProviderError> {
        let url = self.client.dns_url(&format!("managedZones/{zone_id}"));
        if let Some(zone) = optional(self.client.get::<ManagedZone>(&url))? {
            return Ok(Some(zone));
        }
        let list: ManagedZoneList = self.client.get(&self.client.dns_url("managedZones"))?;
        Ok(list
            .managed_zones
            .into_iter()
            .find(|z| z.dns_name.trim_end_matches('.') == zone_id.trim_end_matches('.')))
    }

    fn zone_or_not_found(&self, zone_id: &str) -> Result<ManagedZone, ProviderError> {
        self.resolve_zone(zone_id)?
            .ok_or_else(|| ProviderError::NotFound(format!("managed zone {zone_id}")))
    }

    fn rrset_url(&self, zone: &ManagedZone, hostname: &str) -> String {
        self.client.dns_url(&format!(
            "managedZones/{}/rrsets/{}/A",
            zone.name,
            fqdn(hostname, &zone.dns_name)
        ))
    }
}

fn fqdn(hostname: &str, dns_name: &str) -> String {
    let domain = dns_name.trim_end_matches('.');
    format!("{hostname}.{domain}.")
}

impl DnsDriver for GceDns {
    fn name(&self) -> &'static str {
        "gce"
    }

    fn list_zones(&self) -> Result<Vec<DnsZone>, ProviderError> {
        let list: ManagedZoneList = self.client.get(&self.client.dns_url("managedZones"))?;
        Ok(list
            .managed_zones
            .into_iter()
            .map(|z| DnsZone {
                id: z.name,
                domain: z.dns_name.trim_end_matches('.').to_owned(),
                zone_type: z.visibility.unwrap_or_else(|| "public".to_owned()),
            })
            .collect())
    }

    fn create_record(
        &self,
        zone_id: &str,
        hostname: &str,
        address: &str,
    ) -> Result<DnsRecord, ProviderError> {
        let zone = self.zone_or_not_found(zone_id)?;
        let body = json!({
            "additions": [{
                "name": fqdn(hostname, &zone.dns_name),
                "type": "A",
                "ttl": RECORD_TTL,
                "rrdatas": [address],
            }],
        });
        let url = self
            .client
            .dns_url(&format!("managedZones/{}/changes", zone.name));
        let _change: Value = self.client.post(&url, &body)?;
        Ok(DnsRecord {
            id: hostname.to_owned(),
            zone_id: zone_id.to_owned(),
            name: hostname.to_owned(),
            fqdn: fqdn(hostname, &zone.dns_name).trim_end_matches('.').to_owned(),
            record_type: "A".to_owned(),
            data: address.to_owned(),
        })
    }

    fn get_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<DnsRecord>, ProviderError> {
        let Some(zone) = self.resolve_zone(zone_id)? else {
            return Ok(None);
        };
        let url = self.rrset_url(&zone, record_id);
        let rrset: Option<ResourceRecordSet> = optional(self.client.get(&url))?;
        Ok(rrset.map(|r| DnsRecord {
            id: record_id.to_owned(),
            zone_id: zone_id.to_owned(),
            name: r
                .name
                .split('.')
                .next()
                .unwrap_or(record_id)
                .to_owned(),
            fqdn: r.name.trim_end_matches('.').to_owned(),
            record_type: r.record_type,
            data: r.rrdatas.into_iter().next().unwrap_or_default(),
        }))
    }

    fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        let zone = self.zone_or_not_found(zone_id)?;
        let url = self.rrset_url(&zone, record_id);
        let _deleted: Value = self.client.delete(&url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            name: "demo-lab-1a2b".to_owned(),
            location: Some("us-east1-b".to_owned()),
            instance_type: "e2-medium".to_owned(),
            boot_image: "cos-stable-101-17162-40-5".to_owned(),
            container: "jupyter/minimal-notebook:python-3.10.6".to_owned(),
            network: "default".to_owned(),
            tags: vec!["http-server".to_owned(), "https-server".to_owned()],
            token: "s3cret".to_owned(),
            volume: Some("data".to_owned()),
            debug: true,
        }
    }

    #[test]
    fn instance_body_references_zone_and_volume() {
        let body = instance_body(&spec(), "us-east1-b");
        assert_eq!(body["machineType"], "zones/us-east1-b/machineTypes/e2-medium");
        assert_eq!(
            body["disks"][0]["initializeParams"]["sourceImage"],
            "projects/cos-cloud/global/images/cos-stable-101-17162-40-5"
        );
        assert_eq!(body["disks"][1]["source"], "zones/us-east1-b/disks/data");
        assert_eq!(body["tags"]["items"][1], "https-server");
        assert_eq!(body["metadata"]["items"][0]["key"], CONTAINER_DECLARATION_KEY);
        assert_eq!(body["metadata"]["items"][1]["key"], "serial-port-enable");
    }

    #[test]
    fn container_declaration_carries_token_and_disk() {
        let yaml = container_declaration(&spec());
        assert!(yaml.contains("image: 'jupyter/minimal-notebook:python-3.10.6'"));
        assert!(yaml.contains("value: 's3cret'"));
        assert!(yaml.contains("pdName: data"));

        let mut no_volume = spec();
        no_volume.volume = None;
        assert!(!container_declaration(&no_volume).contains("gcePersistentDisk"));
    }

    #[test]
    fn image_paths() {
        assert_eq!(
            image_path("debian-11-bullseye-v20220822"),
            "projects/debian-cloud/global/images/debian-11-bullseye-v20220822"
        );
        assert_eq!(image_path("my-image"), "global/images/my-image");
        assert_eq!(
            image_path("projects/x/global/images/y"),
            "projects/x/global/images/y"
        );
    }

    #[test]
    fn parse_instance_fixture() {
        let fixture = r#"{
            "id": "4567",
            "name": "demo-lab-1a2b",
            "status": "STAGING",
            "networkInterfaces": [
                { "networkIP": "10.0.0.2", "accessConfigs": [ { "natIP": "34.1.2.3" } ] }
            ]
        }"#;
        let item: InstanceItem = serde_json::from_str(fixture).unwrap();
        let inst = ProviderInstance::from(item);
        assert_eq!(inst.id, "demo-lab-1a2b");
        assert_eq!(inst.state, ProviderInstanceState::Provisioning);
        assert_eq!(inst.address.as_deref(), Some("34.1.2.3"));
        assert_eq!(instance_state("TERMINATED"), ProviderInstanceState::Stopped);
    }

    #[test]
    fn parse_disk_fixture() {
        let fixture = r#"{
            "id": "991",
            "name": "data",
            "sizeGb": "10",
            "type": "https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b/diskTypes/pd-ssd",
            "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b",
            "users": ["https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b/instances/demo-lab"]
        }"#;
        let item: DiskItem = serde_json::from_str(fixture).unwrap();
        let vol = ProviderVolume::try_from(item).unwrap();
        assert_eq!(vol.id, "data");
        assert_eq!(vol.size, 10);
        assert_eq!(vol.location, "us-east1-b");
        assert_eq!(vol.storage_type, "pd-ssd");
        assert_eq!(vol.users, vec!["demo-lab"]);
    }

    #[test]
    fn operation_errors_become_rejections() {
        let fixture = r#"{
            "name": "op-1",
            "status": "DONE",
            "error": { "errors": [ { "code": "QUOTA_EXCEEDED", "message": "CPUS" } ] }
        }"#;
        let op: Operation = serde_json::from_str(fixture).unwrap();
        let err = operation_error(&op).unwrap();
        assert!(err.to_string().contains("QUOTA_EXCEEDED: CPUS"));
    }

    #[test]
    fn zone_countries() {
        assert_eq!(zone_country("us-east1-b"), "US");
        assert_eq!(zone_country("europe-west1-d"), "EU");
        assert_eq!(zone_country("mars-north1-a"), "MARS");
    }

    #[test]
    fn fqdn_appends_domain() {
        assert_eq!(fqdn("lab", "example.com."), "lab.example.com.");
        assert_eq!(fqdn("lab", "example.com"), "lab.example.com.");
    }

    #[test]
    fn config_requires_project_and_token() {
        let mut settings = ProviderSettings::default();
        assert!(matches!(
            GceConfig::from_settings(&settings),
            Err(ProviderError::Config(_))
        ));
        settings.gce_project = Some("p".to_owned());
        settings.gce_token = Some("t".to_owned());
        settings.location = Some("europe-west1-b".to_owned());
        let config = GceConfig::from_settings(&settings).unwrap();
        assert_eq!(config.zone, "europe-west1-b");
        assert_eq!(config.compute_api, COMPUTE_API);
    }

    /// Serves canned JSON bodies by request path and records what it saw.
    struct FakeApi {
        url: String,
        seen: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
        _handle: JoinHandle<()>,
    }

    impl FakeApi {
        fn start(routes: Vec<(&'static str, &'static str, u16, &'static str)>) -> Self {
            let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
            let port = server.server_addr().to_ip().unwrap().port();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen_clone = Arc::clone(&seen);
            let handle = std::thread::spawn(move || {
                for req in server.incoming_requests() {
                    let method = req.method().to_string();
                    let path = req.url().to_owned();
                    let auth = req
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Authorization"))
                        .map(|h| h.value.as_str().to_owned());
                    seen_clone
                        .lock()
                        .unwrap()
                        .push((method.clone(), path.clone(), auth));
                    let (code, body) = routes
                        .iter()
                        .find(|(m, p, _, _)| *m == method && *p == path)
                        .map_or((404, "{}"), |(_, _, code, body)| (*code, *body));
                    let _ = req.respond(
                        tiny_http::Response::from_string(body)
                            .with_status_code(tiny_http::StatusCode(code)),
                    );
                }
            });
            Self {
                url: format!("http://127.0.0.1:{port}"),
                seen,
                _handle: handle,
            }
        }

        fn config(&self) -> GceConfig {
            GceConfig::new("proj", "tok")
                .with_zone("us-east1-b")
                .with_endpoints(&self.url, &self.url)
        }
    }

    #[test]
    fn get_instance_maps_404_to_none() {
        let api = FakeApi::start(vec![(
            "GET",
            "/projects/proj/zones/us-east1-b/instances/lab-1",
            200,
            r#"{"name":"lab-1","status":"RUNNING","networkInterfaces":[{"accessConfigs":[{"natIP":"34.0.0.9"}]}]}"#,
        )]);
        let compute = GceCompute::new(api.config());
        let inst = compute.get_instance("lab-1").unwrap().unwrap();
        assert_eq!(inst.state, ProviderInstanceState::Running);
        assert_eq!(inst.address.as_deref(), Some("34.0.0.9"));
        assert!(compute.get_instance("lab-2").unwrap().is_none());
        assert_eq!(compute.find_instance("lab-1").unwrap().unwrap().name, "lab-1");

        let seen = api.seen.lock().unwrap();
        assert_eq!(seen[0].2.as_deref(), Some("Bearer tok"));
    }

    #[test]
    fn delete_instance_waits_for_operation() {
        let api = FakeApi::start(vec![
            (
                "DELETE",
                "/projects/proj/zones/us-east1-b/instances/lab-1",
                200,
                r#"{"name":"op-7","status":"RUNNING"}"#,
            ),
            (
                "POST",
                "/projects/proj/zones/us-east1-b/operations/op-7/wait",
                200,
                r#"{"name":"op-7","status":"DONE"}"#,
            ),
        ]);
        let compute = GceCompute::new(api.config());
        compute.delete_instance("lab-1").unwrap();
        assert!(compute.delete_instance("lab-2").unwrap_err().is_not_found());
        let seen = api.seen.lock().unwrap();
        assert_eq!(seen[1].0, "POST");
    }

    #[test]
    fn dns_record_resolves_zone_by_domain() {
        let api = FakeApi::start(vec![
            (
                "GET",
                "/projects/proj/managedZones",
                200,
                r#"{"managedZones":[{"name":"labs","dnsName":"labs.example.com.","visibility":"public"}]}"#,
            ),
            (
                "POST",
                "/projects/proj/managedZones/labs/changes",
                200,
                r#"{"id":"1","status":"pending"}"#,
            ),
            (
                "GET",
                "/projects/proj/managedZones/labs/rrsets/lab-1.labs.example.com./A",
                200,
                r#"{"name":"lab-1.labs.example.com.","type":"A","rrdatas":["34.0.0.9"]}"#,
            ),
        ]);
        let dns = GceDns::new(api.config());
        let record = dns
            .create_record("labs.example.com", "lab-1", "34.0.0.9")
            .unwrap();
        assert_eq!(record.id, "lab-1");
        assert_eq!(record.fqdn, "lab-1.labs.example.com");
        let fetched = dns.get_record("labs.example.com", "lab-1").unwrap().unwrap();
        assert_eq!(fetched.data, "34.0.0.9");
        assert_eq!(fetched.name, "lab-1");
        assert_eq!(fetched.fqdn, "lab-1.labs.example.com");
        assert!(dns.get_record("labs.example.com", "lab-2").unwrap().is_none());
        assert!(dns.get_record("unknown.zone", "lab-1").unwrap().is_none());
    }

    #[test]
    fn record_under_named_zone_uses_zone_domain() {
        let api = FakeApi::start(vec![
            (
                "GET",
                "/projects/proj/managedZones/labs",
                200,
                r#"{"name":"labs","dnsName":"labs.example.com.","visibility":"public"}"#,
            ),
            (
                "POST",
                "/projects/proj/managedZones/labs/changes",
                200,
                r#"{"id":"2","status":"pending"}"#,
            ),
        ]);
        let dns = GceDns::new(api.config());
        let record = dns.create_record("labs", "lab-1", "34.0.0.9").unwrap();
        assert_eq!(record.zone_id, "labs");
        assert_eq!(record.fqdn, "lab-1.labs.example.com");
    }

    #[test]
    fn auth_failures_are_reported() {
        let api = FakeApi::start(vec![(
            "GET",
            "/projects/proj/managedZones",
            403,
            r#"{"error":{"message":"forbidden"}}"#,
        )]);
        let dns = GceDns::new(api.config());
        assert!(matches!(dns.list_zones(), Err(ProviderError::Auth(_))));
    }
}
