//! Consul 注册中心实现（agent HTTP API）

use super::{RegistryClient, join_address, split_address};
use crate::config::{HealthCheckConfig, RegistryConfig};
use crate::error::{AllocatorError, Result};
use crate::retry::{ExponentialBackoffPolicy, retry_with};
use crate::types::RegistryInstance;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Consul 注册中心
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
    check: Option<HealthCheckConfig>,
    retry: ExponentialBackoffPolicy,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulRegistration {
    ID: String,
    Name: String,
    Address: String,
    Port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    Check: Option<ConsulCheck>,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulCheck {
    HTTP: String,
    Interval: String,
    Timeout: String,
    DeregisterCriticalServiceAfter: String,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulAgentService {
    ID: String,
    Service: String,
    #[serde(default)]
    Address: String,
    Port: u16,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulHealthEntry {
    Node: ConsulNode,
    Service: ConsulAgentService,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulNode {
    #[serde(default)]
    Address: String,
}

impl ConsulRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AllocatorError::configuration(format!("consul client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            check: None,
            retry: ExponentialBackoffPolicy::new(
                3,
                Duration::from_millis(200),
                Duration::from_secs(2),
            ),
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let base_url = config
            .endpoints
            .first()
            .ok_or_else(|| AllocatorError::configuration("No Consul endpoint provided"))?;
        let mut registry = Self::new(base_url.clone(), Duration::from_secs(config.timeout_secs))?;
        registry.check = config.check.clone();
        Ok(registry)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 查询 agent 上的实例，404 返回 `None`
    async fn agent_service(&self, id: &str) -> Result<Option<ConsulAgentService>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/agent/service/{}", id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, "get agent service").await?;
        Ok(Some(response.json().await?))
    }

    async fn put_registration(&self, registration: &ConsulRegistration) -> Result<()> {
        let response = self
            .client
            .put(self.url("/v1/agent/service/register"))
            .json(registration)
            .send()
            .await?;
        check_status(response, "register").await?;
        Ok(())
    }

    async fn put_deregistration(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/v1/agent/service/deregister/{}", id)))
            .send()
            .await?;
        check_status(response, "deregister").await?;
        Ok(())
    }
}

/// 5xx 视为注册中心不可用，其余非 2xx 视为请求错误
async fn check_status(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(AllocatorError::registry_unavailable(format!(
            "consul {} failed with {}: {}",
            operation, status, body
        )))
    } else {
        Err(AllocatorError::invalid_parameter(format!(
            "consul {} rejected with {}: {}",
            operation, status, body
        )))
    }
}

#[async_trait]
impl RegistryClient for ConsulRegistry {
    async fn register(&self, name: &str, id: &str, address: &str) -> Result<()> {
        let (host, port) = split_address(address)?;

        if let Some(existing) = self.agent_service(id).await? {
            let existing_address = join_address(&existing.Address, existing.Port);
            if existing.Service != name || existing_address != join_address(&host, port) {
                return Err(AllocatorError::already_registered(id).with_details(format!(
                    "registered as {} at {}",
                    existing.Service, existing_address
                )));
            }
            debug!(service = %name, id = %id, "Instance already registered with same address");
        }

        let registration = ConsulRegistration {
            ID: id.to_string(),
            Name: name.to_string(),
            Address: host.clone(),
            Port: port,
            Check: self.check.as_ref().map(|check| ConsulCheck {
                HTTP: format!("http://{}{}", join_address(&host, port), check.path),
                Interval: format!("{}s", check.interval_secs),
                Timeout: format!("{}s", check.timeout_secs),
                DeregisterCriticalServiceAfter: format!("{}s", check.deregister_after_secs),
            }),
        };

        retry_with(&self.retry, "consul register", || {
            self.put_registration(&registration)
        })
        .await?;

        info!(
            service = %name,
            id = %id,
            address = %address,
            with_check = self.check.is_some(),
            "Service registered with Consul"
        );
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        if self.agent_service(id).await?.is_none() {
            return Err(AllocatorError::not_registered(id));
        }

        retry_with(&self.retry, "consul deregister", || self.put_deregistration(id)).await?;

        info!(id = %id, "Service deregistered from Consul");
        Ok(())
    }

    async fn healthy_instances(&self, name: &str) -> Result<Vec<RegistryInstance>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/health/service/{}", name)))
            .query(&[("passing", "true")])
            .send()
            .await?;
        let entries: Vec<ConsulHealthEntry> = check_status(response, "health query")
            .await?
            .json()
            .await?;

        let instances = entries
            .into_iter()
            .map(|entry| {
                // 服务未声明地址时 Consul 约定使用节点地址
                let host = if entry.Service.Address.is_empty() {
                    entry.Node.Address
                } else {
                    entry.Service.Address
                };
                RegistryInstance::new(entry.Service.ID, join_address(&host, entry.Service.Port))
            })
            .collect();
        Ok(instances)
    }
}
