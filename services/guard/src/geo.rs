//! IP geolocation over an external HTTP provider
//!
//! Lookups never fail: private and loopback addresses resolve locally to a
//! fixed "Local" location, and any provider trouble (timeout, bad status,
//! malformed body) resolves to "Unknown".

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::throttle::{LookupThrottle, ThrottleConfig};

/// Resolved location of an IP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
    pub region: String,
    pub isp: String,
}

impl GeoLocation {
    pub fn local() -> Self {
        Self {
            country: "Local".to_string(),
            city: "Local".to_string(),
            region: "Local".to_string(),
            isp: "Local Network".to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            region: "Unknown".to_string(),
            isp: "Unknown".to_string(),
        }
    }
}

/// Geolocation provider configuration
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Provider base URL, queried as `{base_url}/json/{ip}`
    pub base_url: String,
    /// Upper bound on a single provider call
    pub timeout: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ip-api.com".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Provider response body (ip-api.com shape)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
}

fn or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        "Unknown".to_string()
    } else {
        value
    }
}

impl From<ProviderResponse> for GeoLocation {
    fn from(response: ProviderResponse) -> Self {
        let isp = if response.isp.trim().is_empty() {
            response.org
        } else {
            response.isp
        };

        Self {
            country: or_unknown(response.country),
            city: or_unknown(response.city),
            region: or_unknown(response.region_name),
            isp: or_unknown(isp),
        }
    }
}

/// Whether `addr` is loopback, private, link-local or unspecified
pub fn is_local_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(&v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(addr: &Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_private() || addr.is_link_local() || addr.is_unspecified()
}

fn is_local_v6(addr: &Ipv6Addr) -> bool {
    // fc00::/7 unique local, fe80::/10 link local
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

/// HTTP geolocation client
#[derive(Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    config: GeoConfig,
}

impl GeoLocator {
    pub fn new(config: GeoConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Locate `ip`; never fails
    pub async fn locate(&self, ip: &str) -> GeoLocation {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!("Skipping geolocation for unparsable address {:?}", ip);
                return GeoLocation::unknown();
            }
        };

        if is_local_address(&addr) {
            return GeoLocation::local();
        }

        match self.fetch(addr).await {
            Ok(location) => location,
            Err(e) => {
                warn!("Geolocation lookup for {} failed: {}", addr, e);
                GeoLocation::unknown()
            }
        }
    }

    async fn fetch(&self, addr: IpAddr) -> Result<GeoLocation> {
        let url = format!("{}/json/{}", self.config.base_url.trim_end_matches('/'), addr);
        let response: ProviderResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "success" {
            anyhow::bail!("provider answered status {:?}", response.status);
        }

        Ok(response.into())
    }
}

/// Geolocation bounded to one lookup per user per tracking interval
#[derive(Clone)]
pub struct GeoTracker {
    locator: GeoLocator,
    throttle: LookupThrottle,
}

impl GeoTracker {
    pub fn new(locator: GeoLocator, interval: Duration) -> Self {
        Self {
            locator,
            throttle: LookupThrottle::new(ThrottleConfig {
                interval,
                ..ThrottleConfig::default()
            }),
        }
    }

    /// Location for this login, or `None` when the user was located recently
    pub async fn lookup_for(&self, user_id: Uuid, ip: &str) -> Option<GeoLocation> {
        if !self.throttle.try_acquire(&user_id.to_string()).await {
            return None;
        }
        Some(self.locator.locate(ip).await)
    }
}
