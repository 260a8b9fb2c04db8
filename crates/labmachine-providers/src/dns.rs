use crate::ProviderError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsZone {
    pub id: String,
    pub domain: String,
    pub zone_type: String,
}

/// An address record bound to a lab instance.
///
/// `id` is the provider handle used for later lookups and deletion; `name`
/// is the host label relative to the zone and `fqdn` the full host name under
/// the zone's domain, without the trailing dot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecord {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub fqdn: String,
    pub record_type: String,
    pub data: String,
}

/// DNS capability contract.
pub trait DnsDriver: Send + Sync {
    fn name(&self) -> &str;

    fn list_zones(&self) -> Result<Vec<DnsZone>, ProviderError>;

    fn create_record(
        &self,
        zone_id: &str,
        hostname: &str,
        address: &str,
    ) -> Result<DnsRecord, ProviderError>;

    fn get_record(&self, zone_id: &str, record_id: &str)
        -> Result<Option<DnsRecord>, ProviderError>;

    /// Fails with `ProviderError::NotFound` if the record does not exist.
    fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError>;
}
