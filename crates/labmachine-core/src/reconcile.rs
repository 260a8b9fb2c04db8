use crate::{LabError, Operation, ResourceKind};
use labmachine_providers::{ComputeDriver, DnsDriver, ProviderInstanceState, ProviderVolume};
use labmachine_schema::{InstanceState, InstanceStatus, LabState, VolumeRecord, VolumeStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One descriptor field overwritten from what a provider reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    pub resource: ResourceKind,
    pub name: String,
    pub change: String,
}

/// Outcome of a `fetch`: the reconciled lab and the drift that was applied.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub lab: String,
    pub instance: Option<InstanceState>,
    pub volumes: Vec<VolumeRecord>,
    pub drift: Vec<DriftEntry>,
    pub has_drift: bool,
}

impl FetchReport {
    pub(crate) fn new(state: &LabState, drift: Vec<DriftEntry>) -> Self {
        Self {
            lab: state.project.clone(),
            instance: state.instance.clone(),
            volumes: state.volumes.values().cloned().collect(),
            has_drift: !drift.is_empty(),
            drift,
        }
    }
}

fn drift(resource: ResourceKind, name: &str, change: String) -> DriftEntry {
    warn!("drift on {resource} '{name}': {change}");
    DriftEntry {
        resource,
        name: name.to_owned(),
        change,
    }
}

/// Overwrite the descriptor's instance and volume fields from the providers.
///
/// Never creates or deletes provider resources.
pub(crate) fn reconcile(
    state: &mut LabState,
    compute: &dyn ComputeDriver,
    dns: &dyn DnsDriver,
) -> Result<Vec<DriftEntry>, LabError> {
    let mut entries = Vec::new();
    reconcile_instance(state, compute, dns, &mut entries)?;
    reconcile_volumes(state, compute, &mut entries)?;
    Ok(entries)
}

fn reconcile_instance(
    state: &mut LabState,
    compute: &dyn ComputeDriver,
    dns: &dyn DnsDriver,
    entries: &mut Vec<DriftEntry>,
) -> Result<(), LabError> {
    let lab = state.project.clone();
    let zone = state.dns_id.to_string();
    let Some(instance) = state.instance.as_mut() else {
        return Ok(());
    };

    debug!("fetching instance {} from {}", instance.id, compute.name());
    let reported = compute
        .get_instance(&instance.id)
        .map_err(|e| LabError::provider(&lab, Operation::Get, ResourceKind::Instance, e))?;

    let Some(reported) = reported else {
        entries.push(drift(
            ResourceKind::Instance,
            &instance.name,
            "instance no longer exists, cleared".to_owned(),
        ));
        let gone = instance.name.clone();
        state.instance = None;
        for volume in state.volumes.values_mut() {
            if volume.attached_to.as_deref() == Some(gone.as_str()) {
                volume.attached_to = None;
                volume.status = VolumeStatus::Detached;
            }
        }
        return Ok(());
    };

    if reported.address != instance.address {
        entries.push(drift(
            ResourceKind::Instance,
            &instance.name,
            format!(
                "address {} -> {}",
                instance.address.as_deref().unwrap_or("none"),
                reported.address.as_deref().unwrap_or("none")
            ),
        ));
        instance.address.clone_from(&reported.address);
    }

    if let Some(record_id) = instance.record_id.clone() {
        let record = dns
            .get_record(&zone, &record_id)
            .map_err(|e| LabError::provider(&lab, Operation::Get, ResourceKind::DnsRecord, e))?;
        match record {
            None => {
                entries.push(drift(
                    ResourceKind::DnsRecord,
                    &record_id,
                    "record no longer exists, URL cleared".to_owned(),
                ));
                instance.record_id = None;
                instance.url = None;
            }
            Some(record) => {
                if instance.address.as_deref() != Some(record.data.as_str()) {
                    entries.push(drift(
                        ResourceKind::DnsRecord,
                        &record_id,
                        format!("record points at {}", record.data),
                    ));
                }
            }
        }
    }

    let status = match reported.state {
        ProviderInstanceState::Provisioning => InstanceStatus::Pending,
        ProviderInstanceState::Stopped => InstanceStatus::Stopped,
        ProviderInstanceState::Running if instance.record_id.is_some() => InstanceStatus::Running,
        ProviderInstanceState::Running => InstanceStatus::Partial,
    };
    if status != instance.status {
        entries.push(drift(
            ResourceKind::Instance,
            &instance.name,
            format!("status {} -> {status}", instance.status),
        ));
        instance.status = status;
    }
    Ok(())
}

fn reconcile_volumes(
    state: &mut LabState,
    compute: &dyn ComputeDriver,
    entries: &mut Vec<DriftEntry>,
) -> Result<(), LabError> {
    if state.volumes.is_empty() {
        return Ok(());
    }
    let reported: BTreeMap<String, ProviderVolume> = compute
        .list_volumes()
        .map_err(|e| {
            LabError::provider(&state.project, Operation::List, ResourceKind::Volume, e)
        })?
        .into_iter()
        .map(|v| (v.name.clone(), v))
        .collect();

    let mut gone = Vec::new();
    for (name, volume) in &mut state.volumes {
        let Some(actual) = reported.get(name) else {
            entries.push(drift(
                ResourceKind::Volume,
                name,
                "volume no longer exists, removed".to_owned(),
            ));
            gone.push(name.clone());
            continue;
        };
        if volume.id.as_deref() != Some(actual.id.as_str()) {
            entries.push(drift(
                ResourceKind::Volume,
                name,
                format!("provider id is {}", actual.id),
            ));
            volume.id = Some(actual.id.clone());
        }
        if volume.size != actual.size {
            entries.push(drift(
                ResourceKind::Volume,
                name,
                format!("size {} -> {} GB", volume.size, actual.size),
            ));
            volume.size = actual.size;
        }
        if volume.location != actual.location {
            volume.location.clone_from(&actual.location);
        }

        let (status, attached_to) = match (volume.status, actual.users.first()) {
            (VolumeStatus::Deleting, _) => (VolumeStatus::Deleting, volume.attached_to.clone()),
            (_, Some(user)) => (VolumeStatus::Attached, Some(user.clone())),
            (VolumeStatus::Attached, None) => (VolumeStatus::Detached, None),
            (VolumeStatus::Creating, None) => (VolumeStatus::Available, None),
            (other, None) => (other, None),
        };
        if status != volume.status || attached_to != volume.attached_to {
            entries.push(drift(
                ResourceKind::Volume,
                name,
                format!("status {} -> {status}", volume.status),
            ));
            volume.status = status;
            volume.attached_to = attached_to;
        }
    }
    for name in gone {
        state.volumes.remove(&name);
    }
    Ok(())
}
