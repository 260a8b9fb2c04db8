use crate::compute::ComputeDriver;
use crate::dns::DnsDriver;
use crate::gce::{GceCompute, GceConfig, GceDns};
use crate::mock::{MockCloud, MockCompute, MockDns};
use crate::ProviderError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Compute,
    Dns,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Compute => write!(f, "compute"),
            ProviderKind::Dns => write!(f, "dns"),
        }
    }
}

/// Configuration handed to driver factories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub gce_project: Option<String>,
    pub gce_token: Option<String>,
    /// Directory holding the persisted mock cloud inventory.
    pub mock_dir: Option<PathBuf>,
    /// Location hint of the lab the drivers are built for.
    pub location: Option<String>,
}

fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self {
            gce_project: env_first(&["LABMACHINE_GCE_PROJECT", "GOOGLE_CLOUD_PROJECT"]),
            gce_token: env_first(&["LABMACHINE_GCE_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"]),
            mock_dir: env_first(&["LABMACHINE_MOCK_CLOUD"]).map(PathBuf::from),
            location: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<&str>) -> Self {
        self.location = location.map(str::to_owned);
        self
    }
}

pub type ComputeFactory =
    Arc<dyn Fn(&ProviderSettings) -> Result<Box<dyn ComputeDriver>, ProviderError> + Send + Sync>;
pub type DnsFactory =
    Arc<dyn Fn(&ProviderSettings) -> Result<Box<dyn DnsDriver>, ProviderError> + Send + Sync>;

/// Maps provider codes to driver factories, one table per provider kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    compute: BTreeMap<String, ComputeFactory>,
    dns: BTreeMap<String, DnsFactory>,
}

fn mock_cloud(settings: &ProviderSettings) -> Result<MockCloud, ProviderError> {
    match &settings.mock_dir {
        Some(dir) => MockCloud::persistent(dir),
        None => Ok(MockCloud::new()),
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the `gce` and `mock` drivers for both kinds.
    pub fn builtin() -> Self {
        Self::empty()
            .with_compute("gce", |settings| {
                let config = GceConfig::from_settings(settings)?;
                Ok(Box::new(GceCompute::new(config)) as Box<dyn ComputeDriver>)
            })
            .with_compute("mock", |settings| {
                let cloud = mock_cloud(settings)?;
                Ok(Box::new(MockCompute::new(cloud)) as Box<dyn ComputeDriver>)
            })
            .with_dns("gce", |settings| {
                let config = GceConfig::from_settings(settings)?;
                Ok(Box::new(GceDns::new(config)) as Box<dyn DnsDriver>)
            })
            .with_dns("mock", |settings| {
                let cloud = mock_cloud(settings)?;
                Ok(Box::new(MockDns::new(cloud)) as Box<dyn DnsDriver>)
            })
    }

    #[must_use]
    pub fn with_compute<F>(mut self, code: &str, factory: F) -> Self
    where
        F: Fn(&ProviderSettings) -> Result<Box<dyn ComputeDriver>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.compute.insert(code.to_owned(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with_dns<F>(mut self, code: &str, factory: F) -> Self
    where
        F: Fn(&ProviderSettings) -> Result<Box<dyn DnsDriver>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.dns.insert(code.to_owned(), Arc::new(factory));
        self
    }

    pub fn resolve_compute(&self, code: &str) -> Result<ComputeFactory, ProviderError> {
        self.compute
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider {
                kind: ProviderKind::Compute,
                code: code.to_owned(),
            })
    }

    pub fn resolve_dns(&self, code: &str) -> Result<DnsFactory, ProviderError> {
        self.dns
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider {
                kind: ProviderKind::Dns,
                code: code.to_owned(),
            })
    }

    pub fn compute_codes(&self) -> Vec<&str> {
        self.compute.keys().map(String::as_str).collect()
    }

    pub fn dns_codes(&self) -> Vec<&str> {
        self.dns.keys().map(String::as_str).collect()
    }

    /// Resolve and construct a compute driver in one step.
    pub fn compute_driver(
        &self,
        code: &str,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn ComputeDriver>, ProviderError> {
        let factory = self.resolve_compute(code)?;
        factory(settings)
    }

    pub fn dns_driver(
        &self,
        code: &str,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn DnsDriver>, ProviderError> {
        let factory = self.resolve_dns(code)?;
        factory(settings)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("compute", &self.compute_codes())
            .field("dns", &self.dns_codes())
            .finish()
    }
}
