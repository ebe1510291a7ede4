//! Best-effort "City, CC" lookup for peer addresses.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

/// Shown wherever a location could not be resolved
pub const LOCATION_UNKNOWN: &str = "---";

const DEFAULT_ENDPOINT: &str = "http://ip-api.com/json";
const CACHE_CAPACITY: usize = 1024;

#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// `None` when the address cannot be located; never an error
    async fn locate(&self, ip: IpAddr) -> Option<String>;
}

/// Used when lookups are switched off in the configuration
pub struct DisabledGeoLocator;

#[async_trait]
impl GeoLocator for DisabledGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country_code: String,
}

impl IpApiResponse {
    fn into_location(self) -> Option<String> {
        if self.status != "success" {
            return None;
        }
        match (self.city.is_empty(), self.country_code.is_empty()) {
            (false, false) => Some(format!("{}, {}", self.city, self.country_code)),
            (true, false) => Some(self.country_code),
            (false, true) => Some(self.city),
            (true, true) => None,
        }
    }
}

pub struct HttpGeoLocator {
    client: reqwest::Client,
    endpoint: String,
    cache: Mutex<LruCache<IpAddr, String>>,
}

impl HttpGeoLocator {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    async fn query(&self, ip: IpAddr) -> Result<Option<String>, reqwest::Error> {
        let url = format!("{}/{}?fields=status,city,countryCode", self.endpoint, ip);
        let response: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.into_location())
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Option<String> {
        if !is_public(ip) {
            return None;
        }
        if let Some(hit) = self.cache.lock().get(&ip) {
            return Some(hit.clone());
        }

        match self.query(ip).await {
            Ok(Some(location)) => {
                self.cache.lock().put(ip, location.clone());
                Some(location)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(%ip, error = %e, "GeoIP lookup failed");
                None
            }
        }
    }
}

/// Addresses a public lookup service can say anything about
pub fn is_public(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_public() {
        for private in ["10.1.2.3", "192.168.0.1", "127.0.0.1", "169.254.1.1", "::1", "fd00::1", "fe80::1"] {
            assert!(!is_public(private.parse().unwrap()), "{}", private);
        }
        for public in ["1.1.1.1", "8.8.8.8", "2606:4700::1111", "::ffff:1.1.1.1"] {
            assert!(is_public(public.parse().unwrap()), "{}", public);
        }
    }

    #[test]
    fn test_response_to_location() {
        let ok: IpApiResponse =
            serde_json::from_str(r#"{"status":"success","city":"Frankfurt","countryCode":"DE"}"#)
                .unwrap();
        assert_eq!(ok.into_location().as_deref(), Some("Frankfurt, DE"));

        let failed: IpApiResponse = serde_json::from_str(r#"{"status":"fail"}"#).unwrap();
        assert_eq!(failed.into_location(), None);

        let country_only: IpApiResponse =
            serde_json::from_str(r#"{"status":"success","countryCode":"JP"}"#).unwrap();
        assert_eq!(country_only.into_location().as_deref(), Some("JP"));
    }

    #[tokio::test]
    async fn test_private_addresses_are_not_looked_up() {
        // unroutable endpoint: any request would fail, private ips never send one
        let locator = HttpGeoLocator::with_endpoint("http://127.0.0.1:1").unwrap();
        assert_eq!(locator.locate("10.0.0.5".parse().unwrap()).await, None);
        assert_eq!(DisabledGeoLocator.locate("1.1.1.1".parse().unwrap()).await, None);
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_none() {
        let locator = HttpGeoLocator::with_endpoint("http://127.0.0.1:1").unwrap();
        assert_eq!(locator.locate("1.1.1.1".parse().unwrap()).await, None);
    }
}
