use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::{DnsConfig, Secret};

/// Manages the address record that makes a tenant site reachable. `create` is
/// idempotent: it checks for an existing record first and no-ops on a hit, so
/// the pipeline can safely re-run after a crash between record creation and
/// its step commit.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn exists(&self, hostname: &str) -> Result<bool, DnsError>;
    async fn create(&self, hostname: &str, address: IpAddr) -> Result<(), DnsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("dns provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("dns provider rejected the request: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct RecordListResponse {
    success: bool,
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

impl RecordListResponse {
    /// A record exists only when the call succeeded and the matching set is
    /// non-empty; a successful empty listing means "absent".
    fn record_present(&self) -> bool {
        self.success && !self.result.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Cloudflare-backed provider managing A records inside one zone.
pub struct CloudflareDns {
    http: reqwest::Client,
    zone_id: String,
    api_token: Secret,
    record_ttl: u32,
}

impl CloudflareDns {
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            zone_id: config.zone_id.clone(),
            api_token: config.api_token.clone(),
            record_ttl: config.record_ttl,
        })
    }

    fn records_url(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/zones/{}/dns_records",
            self.zone_id
        )
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn exists(&self, hostname: &str) -> Result<bool, DnsError> {
        let response = self
            .http
            .get(self.records_url())
            .bearer_auth(self.api_token.expose())
            .query(&[("type", "A"), ("name", hostname)])
            .send()
            .await?;
        let body: RecordListResponse = response.json().await?;
        Ok(body.record_present())
    }

    async fn create(&self, hostname: &str, address: IpAddr) -> Result<(), DnsError> {
        if self.exists(hostname).await? {
            debug!(target: "provisioning", %hostname, "dns record already present");
            return Ok(());
        }

        let payload = serde_json::json!({
            "type": "A",
            "name": hostname,
            "content": address.to_string(),
            "ttl": self.record_ttl,
            "proxied": false,
        });

        let response = self
            .http
            .post(self.records_url())
            .bearer_auth(self.api_token.expose())
            .json(&payload)
            .send()
            .await?;
        let body: WriteResponse = response.json().await?;
        if !body.success {
            let detail = body
                .errors
                .iter()
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DnsError::Api(detail));
        }
        Ok(())
    }
}

/// Name resolution used by the certificate task to poll for propagation.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr>;
}

/// Resolver backed by the operating system's lookup path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        let mut addresses = tokio::net::lookup_host((hostname, 443)).await.ok()?;
        addresses.next().map(|socket_addr| socket_addr.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_requires_success_and_nonempty_result() {
        let populated: RecordListResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "result": [{"id": "abc123", "name": "acme.tenant.cloud"}],
        }))
        .expect("response parses");
        assert!(populated.record_present());

        let empty: RecordListResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "result": [],
        }))
        .expect("response parses");
        assert!(!empty.record_present());

        let failed: RecordListResponse = serde_json::from_value(serde_json::json!({
            "success": false,
            "result": [{"id": "abc123"}],
        }))
        .expect("response parses");
        assert!(!failed.record_present());
    }

    #[test]
    fn missing_result_field_defaults_to_absent() {
        let body: RecordListResponse =
            serde_json::from_value(serde_json::json!({"success": true})).expect("response parses");
        assert!(!body.record_present());
    }
}
