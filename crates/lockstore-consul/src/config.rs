use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsulError, ConsulResult};

/// Environment variable naming the Consul HTTP address.
pub const HTTP_ADDR_ENV: &str = "CONSUL_HTTP_ADDR";
/// Environment variable holding the ACL token.
pub const HTTP_TOKEN_ENV: &str = "CONSUL_HTTP_TOKEN";
/// Environment variable switching the default scheme to `https`.
pub const HTTP_SSL_ENV: &str = "CONSUL_HTTP_SSL";

const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8500";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Base URL of the Consul agent, e.g. `http://127.0.0.1:8500`.
    pub address: String,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// Datacenter to query. The agent's own datacenter when unset.
    pub datacenter: Option<String>,
    /// Timeout for a single non-blocking request. Blocking waits get their
    /// wait time added on top.
    pub request_timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            datacenter: None,
            request_timeout_secs: 10,
        }
    }
}

impl ConsulConfig {
    /// Build a configuration from the standard Consul environment variables.
    pub fn from_env() -> ConsulResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConsulResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup(HTTP_ADDR_ENV).filter(|a| !a.is_empty()) {
            let ssl = lookup(HTTP_SSL_ENV)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
                .unwrap_or(false);
            config.address = if addr.contains("://") {
                addr
            } else if ssl {
                format!("https://{addr}")
            } else {
                format!("http://{addr}")
            };
        }
        config.token = lookup(HTTP_TOKEN_ENV).filter(|t| !t.is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConsulResult<()> {
        let invalid = |reason: &str| ConsulError::InvalidAddress {
            address: self.address.clone(),
            reason: reason.to_string(),
        };
        let url = reqwest::Url::parse(&self.address).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConsulError::InvalidConfig(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Address without a trailing slash.
    pub(crate) fn base_url(&self) -> &str {
        self.address.trim_end_matches('/')
    }
}
