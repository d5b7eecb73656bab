use std::time::Duration;

use async_trait::async_trait;
use lockstore_backend::{
    BackendError, BackendResult, KvBackend, KvEntry, SessionSpec, WaitOutcome,
};
use lockstore_types::SessionId;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::config::ConsulConfig;
use crate::error::ConsulResult;
use crate::model::{KvPair, SessionCreateRequest, SessionCreateResponse};

const TOKEN_HEADER: &str = "X-Consul-Token";
const INDEX_HEADER: &str = "X-Consul-Index";

/// [`KvBackend`] over the Consul HTTP API.
///
/// KV operations map onto `/v1/kv`, sessions onto `/v1/session`. Blocking
/// waits use Consul blocking queries (`?index=&wait=`).
#[derive(Clone, Debug)]
pub struct ConsulBackend {
    http: reqwest::Client,
    config: ConsulConfig,
}

impl ConsulBackend {
    pub fn new(config: ConsulConfig) -> ConsulResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    /// Connect using `CONSUL_HTTP_ADDR` / `CONSUL_HTTP_TOKEN`.
    pub fn from_env() -> ConsulResult<Self> {
        Self::new(ConsulConfig::from_env()?)
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{key}", self.config.base_url())
    }

    fn session_url(&self, op: &str) -> String {
        format!("{}/v1/session/{op}", self.config.base_url())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, url)
            .timeout(self.config.request_timeout());
        if let Some(token) = &self.config.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.config.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        builder
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

fn status_error(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("{status}: {}", body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::Unavailable(detail)
    } else {
        BackendError::Protocol(detail)
    }
}

async fn send(builder: RequestBuilder) -> BackendResult<Response> {
    builder.send().await.map_err(transport)
}

async fn ensure_success(resp: Response) -> BackendResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

async fn read_bool(resp: Response) -> BackendResult<bool> {
    let body = resp.text().await.map_err(transport)?;
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(BackendError::Protocol(format!("expected boolean, got {other:?}"))),
    }
}

fn index_header(resp: &Response) -> BackendResult<u64> {
    resp.headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| BackendError::Protocol(format!("missing or invalid {INDEX_HEADER} header")))
}

/// Render a duration the way Consul's Go parser accepts it.
fn go_duration(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

fn is_invalid_session(body: &str) -> bool {
    body.to_ascii_lowercase().contains("invalid session")
}

#[async_trait]
impl KvBackend for ConsulBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<KvEntry>> {
        let resp = send(self.request(Method::GET, self.kv_url(key))).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        let pairs: Vec<KvPair> = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        pairs
            .into_iter()
            .find(|p| p.key == key)
            .map(KvPair::into_entry)
            .transpose()
    }

    async fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let resp = send(self.request(Method::PUT, self.kv_url(key)).body(value.to_vec())).await?;
        let resp = ensure_success(resp).await?;
        if !read_bool(resp).await? {
            return Err(BackendError::Protocol(format!("put of {key} was rejected")));
        }
        debug!(key, bytes = value.len(), "consul put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let resp = send(self.request(Method::DELETE, self.kv_url(key))).await?;
        ensure_success(resp).await?;
        debug!(key, "consul delete");
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let resp = send(
            self.request(Method::GET, self.kv_url(prefix))
                .query(&[("keys", "")]),
        )
        .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = ensure_success(resp).await?;
        let mut keys: Vec<String> = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        keys.sort();
        Ok(keys)
    }

    async fn create_session(&self, spec: &SessionSpec) -> BackendResult<SessionId> {
        let body = SessionCreateRequest {
            name: spec.name.clone(),
            ttl: go_duration(spec.ttl),
            lock_delay: go_duration(spec.lock_delay),
            behavior: "release".into(),
        };
        let resp = send(self.request(Method::PUT, self.session_url("create")).json(&body)).await?;
        let resp = ensure_success(resp).await?;
        let created: SessionCreateResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        debug!(session = %created.id, ttl = %body.ttl, "consul session created");
        Ok(SessionId::new(created.id))
    }

    async fn renew_session(&self, session: &SessionId) -> BackendResult<()> {
        let url = self.session_url(&format!("renew/{session}"));
        let resp = send(self.request(Method::PUT, url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::SessionNotFound(session.clone()));
        }
        ensure_success(resp).await?;
        Ok(())
    }

    async fn destroy_session(&self, session: &SessionId) -> BackendResult<()> {
        let url = self.session_url(&format!("destroy/{session}"));
        let resp = send(self.request(Method::PUT, url)).await?;
        ensure_success(resp).await?;
        debug!(session = %session, "consul session destroyed");
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &SessionId) -> BackendResult<bool> {
        let resp = send(
            self.request(Method::PUT, self.kv_url(key))
                .query(&[("acquire", session.as_str())])
                .body(value.to_vec()),
        )
        .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if is_invalid_session(&body) {
                return Err(BackendError::SessionNotFound(session.clone()));
            }
            return Err(status_error(status, &body));
        }
        read_bool(resp).await
    }

    async fn release(&self, key: &str, session: &SessionId) -> BackendResult<bool> {
        let resp = send(
            self.request(Method::PUT, self.kv_url(key))
                .query(&[("release", session.as_str())]),
        )
        .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if is_invalid_session(&body) {
                return Ok(false);
            }
            return Err(status_error(status, &body));
        }
        read_bool(resp).await
    }

    async fn wait(&self, key: &str, index: u64, max_wait: Duration) -> BackendResult<WaitOutcome> {
        let mut builder = self.request(Method::GET, self.kv_url(key));
        if index > 0 {
            // Consul adds up to wait/16 of jitter to blocking queries.
            builder = builder
                .query(&[("index", index.to_string()), ("wait", go_duration(max_wait))])
                .timeout(self.config.request_timeout() + max_wait + max_wait / 16);
        }
        let resp = send(builder).await?;
        if resp.status() != StatusCode::NOT_FOUND {
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_error(status, &body));
            }
        }
        let current = index_header(&resp)?;
        Ok(WaitOutcome {
            index: current,
            changed: current > index,
        })
    }
}
