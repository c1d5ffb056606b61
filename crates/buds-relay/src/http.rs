//! HTTPS relay client.
//!
//! JSON over reqwest. The caller's identity token is sent as a bearer
//! credential on relay API requests only; external payload locators are
//! chosen by senders and are fetched without credentials.

use std::time::Duration;

use async_trait::async_trait;
use buds_core::{AuthorId, DeviceId};
use buds_e2ee::{EncryptedEnvelope, MessageId, RecipientDevice};
use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::error::{classify_status, RelayError, Result};
use crate::messages::{
    limits, parse_each, DeviceDto, IdentityLookupRequest, IdentityLookupResponse, InboxResponse,
    ListDevicesRequest, ListDevicesResponse, MessageDto, RegisterDeviceRequest,
};
use crate::relay::{check_author_count, Relay};

/// Connection settings for [`HttpRelay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay origin, e.g. `https://relay.example.com`.
    pub base_url: String,
    /// Identity token sent as `Authorization: Bearer`.
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    base_url: String,
    auth: Option<HeaderValue>,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(RelayError::Config("base_url is empty".into()));
        }

        let auth = match &config.auth_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| RelayError::Config("invalid auth token".into()))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// A request to the relay API, carrying the identity token.
    fn api(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, self.api_url(path));
        match &self.auth {
            Some(value) => request.header(AUTHORIZATION, value.clone()),
            None => request,
        }
    }

    /// Turn a non-success response into an error, keeping the body as context.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            body
        };
        Err(classify_status(status.as_u16(), message))
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self.api(Method::POST, path).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

/// Only plain web locators are fetched.
fn blob_url(locator: &str) -> Result<Url> {
    let url = Url::parse(locator).map_err(|e| RelayError::Malformed(format!("locator: {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        other => Err(RelayError::Malformed(format!("locator scheme {other}"))),
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn register_device(
        &self,
        device: &RecipientDevice,
        contact_token: Option<&str>,
    ) -> Result<()> {
        let body = RegisterDeviceRequest::new(device, contact_token);
        let resp = self
            .api(Method::POST, "/devices/register")
            .json(&body)
            .send()
            .await?;
        Self::check(resp).await?;
        tracing::debug!(device_id = %device.device_id, "device registered");
        Ok(())
    }

    async fn lookup_identity(&self, contact_token: &str) -> Result<AuthorId> {
        let body = IdentityLookupRequest {
            phone_hash: contact_token.to_string(),
        };
        let resp: IdentityLookupResponse = self.post_json("/identity/lookup", &body).await?;
        AuthorId::parse(&resp.did).map_err(|e| RelayError::Malformed(format!("did: {e}")))
    }

    async fn list_devices(&self, authors: &[AuthorId]) -> Result<Vec<RecipientDevice>> {
        check_author_count(authors)?;
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let body = ListDevicesRequest {
            dids: authors.iter().map(ToString::to_string).collect(),
        };
        let resp: ListDevicesResponse = self.post_json("/devices/list", &body).await?;
        Ok(parse_each(resp.devices, "directory entry", DeviceDto::into_device))
    }

    async fn send_message(
        &self,
        envelope: &EncryptedEnvelope,
        recipients: &[AuthorId],
    ) -> Result<()> {
        let body = MessageDto::from_envelope(envelope, recipients);
        let resp = self
            .api(Method::POST, "/messages/send")
            .json(&body)
            .send()
            .await?;
        Self::check(resp).await?;
        tracing::debug!(
            message_id = %envelope.message_id,
            devices = envelope.wrapped_keys.len(),
            "message sent"
        );
        Ok(())
    }

    async fn fetch_inbox(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<EncryptedEnvelope>> {
        let limit = limit.clamp(1, limits::MAX_INBOX_LIMIT);
        let resp = self
            .api(Method::GET, "/messages/inbox")
            .query(&[
                ("did", author.to_string()),
                ("device_id", device.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let inbox: InboxResponse = Self::check(resp).await?.json().await?;
        Ok(parse_each(inbox.messages, "inbox message", MessageDto::into_envelope))
    }

    async fn delete_message(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        message_id: &MessageId,
    ) -> Result<()> {
        let resp = self
            .api(Method::DELETE, &format!("/messages/{message_id}"))
            .query(&[("did", author.to_string()), ("device_id", device.to_string())])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_payload(&self, locator: &str) -> Result<Bytes> {
        let resp = self.http.get(blob_url(locator)?).send().await?;
        Ok(Self::check(resp).await?.bytes().await?)
    }
}
