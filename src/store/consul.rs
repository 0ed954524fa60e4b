// Consul HTTP API v1 backend
//
// Sessions map 1:1 onto leases; lock records are KV entries taken with
// `?acquire=<session>`.

use super::{CoordinationStore, KvPair, SessionEntry};
use crate::{lease::LeaseId, Error, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8500";

/// Consul rejects session TTLs outside this range
pub const MIN_TTL: Duration = Duration::from_secs(10);
pub const MAX_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_delay: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
    session: Option<String>,
}

/// Go-style duration string, as the Consul agent expects. Whole seconds stay
/// in seconds; anything finer is sent in milliseconds so it is not truncated.
fn go_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// A response body Consul should not have sent counts as the store failing
fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body.trim())
        .map_err(|e| Error::StoreUnavailable(format!("malformed consul response: {}", e)))
}

/// Non-success status and body as a store error
fn unexpected_status(status: StatusCode, body: &str) -> Error {
    Error::StoreUnavailable(format!("consul returned {}: {}", status, body.trim()))
}

/// `PUT /session/renew/<id>`: a 404 or an empty session list means the
/// session is gone
fn renew_response(status: StatusCode, body: &str, id: &LeaseId) -> Result<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(Error::LeaseAlreadyInvalid { lease_id: id.clone() });
    }
    if !status.is_success() {
        return Err(unexpected_status(status, body));
    }
    let sessions: Vec<serde_json::Value> = decode(body)?;
    if sessions.is_empty() {
        return Err(Error::LeaseAlreadyInvalid { lease_id: id.clone() });
    }
    Ok(())
}

/// `PUT /kv/<key>?acquire=<id>`: `true`/`false` on success
fn acquire_response(status: StatusCode, body: &str, session: &LeaseId) -> Result<bool> {
    if !status.is_success() {
        if body.contains("invalid session") {
            return Err(Error::LeaseAlreadyInvalid { lease_id: session.clone() });
        }
        return Err(unexpected_status(status, body));
    }
    decode(body)
}

#[derive(Debug, Clone)]
pub struct ConsulStore {
    client: Client,
    address: String,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulStore {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            address: address.into().trim_end_matches('/').to_string(),
            token: None,
            datacenter: None,
        })
    }

    /// ACL token sent as `X-Consul-Token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    /// KV endpoint for `key`, each `/`-separated segment percent-encoded so
    /// `?`, `#` and friends stay part of the key
    fn kv_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("kv"))
            .map_err(|e| Error::Config(format!("invalid consul address {}: {}", self.address, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("invalid consul address {}", self.address)))?
            .extend(key.split('/'));
        Ok(url)
    }

    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        Ok(self.decorate(request).send().await?)
    }
}

/// Status and body of a response, for the pure mapping functions above
async fn read(response: Response) -> Result<(StatusCode, String)> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

#[async_trait]
impl CoordinationStore for ConsulStore {
    async fn session_create(&self, entry: &SessionEntry) -> Result<LeaseId> {
        let body = SessionCreateRequest {
            name: entry.name.clone(),
            ttl: go_duration(entry.ttl),
            behavior: entry.behavior.as_str(),
            lock_delay: entry.lock_delay.map(go_duration),
        };
        let response = self
            .send(self.client.put(self.url("session/create")).json(&body))
            .await?;
        let (status, body) = read(response).await?;
        if !status.is_success() {
            return Err(unexpected_status(status, &body));
        }

        let created: SessionCreateResponse = decode(&body)?;
        debug!("consul session {} created", created.id);
        Ok(LeaseId(created.id))
    }

    async fn session_renew(&self, id: &LeaseId, _ttl: Duration) -> Result<()> {
        // Consul renews to the TTL the session was created with
        let response = self
            .send(self.client.put(self.url(&format!("session/renew/{}", id))))
            .await?;
        let (status, body) = read(response).await?;
        renew_response(status, &body, id)
    }

    async fn session_destroy(&self, id: &LeaseId) -> Result<()> {
        let response = self
            .send(self.client.put(self.url(&format!("session/destroy/{}", id))))
            .await?;
        let (status, body) = read(response).await?;
        if !status.is_success() {
            return Err(unexpected_status(status, &body));
        }
        Ok(())
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool> {
        let session = pair.session.as_ref().ok_or(Error::NoLease)?;
        let request = self
            .client
            .put(self.kv_url(&pair.key)?)
            .query(&[("acquire", session.as_str())])
            .body(pair.value.clone());
        let response = self.send(request).await?;
        let (status, body) = read(response).await?;
        acquire_response(status, &body, session)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>> {
        let response = self.send(self.client.get(self.kv_url(key)?)).await?;
        let (status, body) = read(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(unexpected_status(status, &body));
        }

        let entries: Vec<KvEntry> = decode(&body)?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };
        let value = match entry.value {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::StoreUnavailable(format!("malformed KV value: {}", e)))?,
            None => Vec::new(),
        };
        Ok(Some(KvPair {
            key: entry.key,
            value,
            session: entry.session.map(LeaseId),
        }))
    }
}
