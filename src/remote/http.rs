//! HTTP implementation of the remote record service.
//!
//! Endpoint shape: `{base_url}/{table}` for collections and
//! `{base_url}/{table}/{id}` for records. Responses carry an `ok` envelope
//! flag; failures add `status` and `message`, rate limits add `retryAfter`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::error::{OutpostError, RemoteFailure, Result};
use crate::model::Payload;
use crate::remote::{ListQuery, Page, RemoteRecord, RemoteStore};

/// Failure envelope: `{ "ok": false, "status": 409, "message": "...", "retryAfter": 30 }`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBody {
    items: Vec<RemoteRecord>,
    pagination: PageMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    page: u32,
    per_page: u32,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    has_more: bool,
}

/// Remote store over HTTP with bearer auth and per-request ids.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
    client_info: String,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("client_info", &self.client_info)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client from config. `request_timeout` caps each HTTP call;
    /// the retry layer wraps its own deadline around it as well.
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| OutpostError::Config("remote.base_url is not set".to_string()))?;
        let client = Client::builder().timeout(request_timeout).build()?;
        let client_name = config.client_identity();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client_info: format!("outpost/{} ({client_name})", crate::VERSION),
        })
    }

    fn collection_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(table))
    }

    fn record_url(&self, table: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(table),
            urlencoding::encode(id)
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .header("X-Client", &self.client_info);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        if (200..300).contains(&status) {
            return Ok(body);
        }
        Err(failure_from(status, &body))
    }

    async fn send_record(&self, builder: RequestBuilder) -> Result<RemoteRecord> {
        let body = self.send(builder).await?;
        parse_record(&body)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn create(
        &self,
        table: &str,
        payload: &Payload,
        idempotency_key: &str,
    ) -> Result<RemoteRecord> {
        debug!(table, idempotency_key, "POST create");
        let builder = self
            .request(Method::POST, self.collection_url(table))
            .header("X-Idempotency-Key", idempotency_key)
            .json(payload);
        self.send_record(builder).await
    }

    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord> {
        let builder = self.request(Method::GET, self.record_url(table, id));
        self.send_record(builder).await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<RemoteRecord> {
        debug!(table, id, ?base_version, "PATCH update");
        let mut builder = self
            .request(Method::PATCH, self.record_url(table, id))
            .json(payload);
        if let Some(version) = base_version {
            builder = builder.header("X-Base-Version", version);
        }
        self.send_record(builder).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        debug!(table, id, "DELETE");
        let builder = self.request(Method::DELETE, self.record_url(table, id));
        self.send(builder).await?;
        Ok(())
    }

    async fn list(&self, table: &str, query: &ListQuery) -> Result<Page<RemoteRecord>> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(page) = query.page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = query.per_page {
            params.push(("perPage".to_string(), per_page.to_string()));
        }
        for (key, value) in &query.filters {
            params.push((key.clone(), query_value(value)));
        }

        let builder = self
            .request(Method::GET, self.collection_url(table))
            .query(&params);
        let body = self.send(builder).await?;
        let parsed: ListBody = serde_json::from_str(&body)?;
        Ok(Page {
            items: parsed.items,
            page: parsed.pagination.page,
            per_page: parsed.pagination.per_page,
            total: parsed.pagination.total,
            has_more: parsed.pagination.has_more,
        })
    }
}

fn transport_error(err: reqwest::Error) -> OutpostError {
    if err.is_timeout() {
        OutpostError::Timeout(format!("remote request: {err}"))
    } else {
        OutpostError::Http(err)
    }
}

/// Map a non-2xx response to a classified failure. The body's own `status`
/// wins over the HTTP line so proxies cannot mask the service's verdict.
fn failure_from(status: u16, body: &str) -> OutpostError {
    let failure = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => RemoteFailure {
            status: parsed.status.unwrap_or(status),
            message: parsed
                .message
                .unwrap_or_else(|| format!("HTTP {status}")),
            retry_after: parsed.retry_after,
        },
        Err(_) => RemoteFailure::new(status, truncated(body, status)),
    };
    OutpostError::Remote(failure)
}

fn truncated(body: &str, status: u16) -> String {
    if body.trim().is_empty() {
        return format!("HTTP {status}");
    }
    let mut message: String = body.chars().take(200).collect();
    if message.len() < body.len() {
        message.push('…');
    }
    message
}

/// Success bodies are the record itself plus the envelope flag.
fn parse_record(body: &str) -> Result<RemoteRecord> {
    let mut value: Value = serde_json::from_str(body)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("ok");
    }
    Ok(serde_json::from_value(value)?)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
