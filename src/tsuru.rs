//! Tsuru directory API client
//!
//! The directory knows where apps and service instances actually live: router
//! addresses, pools, per-instance custom metadata. Lookups go through the
//! `TsuruApi` trait so reconciler tests can run against canned answers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::net_util::url_to_host;
use crate::{Error, Result, LOOKUP_TIMEOUT_SECS};

/// App record as returned by `GET /apps/{name}`
///
/// Only the fields the operator consumes; the directory returns much more.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AppInfo {
    /// The application name
    #[serde(default)]
    pub name: String,

    /// The pool the app is scheduled on
    #[serde(default)]
    pub pool: String,

    /// Routers fronting the app
    #[serde(default)]
    pub routers: Vec<AppRouter>,
}

/// One router entry of an app
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AppRouter {
    /// Primary router address (URL or bare host)
    #[serde(default)]
    pub address: String,

    /// All router addresses; when non-empty, supersedes `address`
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl AppInfo {
    /// Bare hostnames of every router address, ready for DNS resolution
    pub fn router_hosts(&self) -> Vec<String> {
        let mut hosts = Vec::new();
        for router in &self.routers {
            if router.addresses.is_empty() {
                hosts.push(url_to_host(&router.address));
            } else {
                for addr in &router.addresses {
                    hosts.push(url_to_host(addr));
                }
            }
        }
        hosts
    }
}

/// Service instance record as returned by
/// `GET /services/{service}/instances/{instance}`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ServiceInstanceInfo {
    /// The pool the instance is scheduled on
    #[serde(rename = "Pool", default)]
    pub pool: String,

    /// Free-form metadata; the `Address` key carries the instance address
    #[serde(rename = "CustomInfo", default)]
    pub custom_info: HashMap<String, serde_json::Value>,
}

impl ServiceInstanceInfo {
    /// The instance address from `CustomInfo`, when present and a string
    pub fn address(&self) -> Option<&str> {
        self.custom_info.get("Address").and_then(|v| v.as_str())
    }
}

/// Directory lookups the reconcilers depend on
#[async_trait]
pub trait TsuruApi: Send + Sync {
    /// Fetch an app record; `Ok(None)` when the app does not exist
    async fn app_info(&self, app: &str) -> Result<Option<AppInfo>>;

    /// Fetch a service instance record; `Ok(None)` when it does not exist
    async fn service_instance_info(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<Option<ServiceInstanceInfo>>;
}

/// HTTP client for the Tsuru directory API
pub struct TsuruClient {
    host: String,
    token: String,
    http: reqwest::Client,
}

impl TsuruClient {
    /// Build a client for the given API host, authenticating with a bearer
    /// token. Requests are bounded at ten seconds.
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::directory(format!("could not build http client: {e}")))?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{path}", self.host);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::directory(format!("request to {url} failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::directory(format!(
                "request to {url} returned status {}",
                resp.status()
            )));
        }

        let value = resp
            .json::<T>()
            .await
            .map_err(|e| Error::serialization(format!("invalid response from {url}: {e}")))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl TsuruApi for TsuruClient {
    async fn app_info(&self, app: &str) -> Result<Option<AppInfo>> {
        let info: Option<AppInfo> = self.get_json(&format!("/apps/{app}")).await?;

        // A 200 with no name or pool means the directory is misbehaving;
        // treat it like an outage rather than an empty app.
        match info {
            Some(info) if info.name.is_empty() || info.pool.is_empty() => Err(Error::directory(
                format!("empty data for app {app:?}"),
            )),
            other => Ok(other),
        }
    }

    async fn service_instance_info(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<Option<ServiceInstanceInfo>> {
        self.get_json(&format!("/services/{service}/instances/{instance}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_hosts_prefer_the_address_list() {
        let info = AppInfo {
            name: "myapp".to_string(),
            pool: "pool-a".to_string(),
            routers: vec![
                AppRouter {
                    address: "https://old.myapp.io".to_string(),
                    addresses: vec![
                        "https://myapp.io".to_string(),
                        "http.myapp.io".to_string(),
                    ],
                },
                AppRouter {
                    address: "legacy.myapp.io:8080".to_string(),
                    addresses: vec![],
                },
            ],
        };

        assert_eq!(
            info.router_hosts(),
            vec!["myapp.io", "http.myapp.io", "legacy.myapp.io"]
        );
    }

    #[test]
    fn instance_address_comes_from_custom_info() {
        let info: ServiceInstanceInfo = serde_json::from_value(serde_json::json!({
            "Pool": "pool-b",
            "CustomInfo": { "Address": "10.1.2.3/32", "Plan": "small" }
        }))
        .unwrap();

        assert_eq!(info.pool, "pool-b");
        assert_eq!(info.address(), Some("10.1.2.3/32"));
    }

    #[test]
    fn missing_custom_info_yields_no_address() {
        let info: ServiceInstanceInfo =
            serde_json::from_value(serde_json::json!({ "Pool": "pool-b" })).unwrap();
        assert_eq!(info.address(), None);
    }
}
