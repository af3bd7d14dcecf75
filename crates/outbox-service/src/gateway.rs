//! Ledger gateways for the signing orchestrator
//!
//! [`LocalGateway`] calls the registration service in-process.
//! [`OutboxClient`] talks to a running server over HTTP.
//!
//! Both report retryable failures as `Transport`, so the orchestrator
//! resends the same payload; everything else is a `Rejected` that ends the
//! session.

use crate::error::{ErrorBody, ServiceError};
use crate::http::ApiResponse;
use crate::registration::{artifact_url, PrepareRequest, Registration, RegistrationService};
use async_trait::async_trait;
use outbox_artifact::{ArtifactError, ArtifactId};
use outbox_ledger::{CommitRequest, JournalEntry, JournalFilter, JournalPage};
use outbox_signing::{ArtifactSource, GatewayError, LedgerGateway};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

fn gateway_error(kind: outbox_ledger::ErrorKind, reason: String) -> GatewayError {
    if kind.is_retryable() {
        GatewayError::Transport(reason)
    } else {
        GatewayError::Rejected { kind, reason }
    }
}

impl From<ServiceError> for GatewayError {
    fn from(value: ServiceError) -> Self {
        gateway_error(value.kind(), value.to_string())
    }
}

/// In-process gateway
#[derive(Clone)]
pub struct LocalGateway {
    service: Arc<RegistrationService>,
}

impl LocalGateway {
    pub fn new(service: Arc<RegistrationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LedgerGateway for LocalGateway {
    async fn submit(&self, request: &CommitRequest) -> Result<JournalEntry, GatewayError> {
        Ok(self.service.submit_signature(request.clone()).await?)
    }
}

#[async_trait]
impl ArtifactSource for LocalGateway {
    async fn fetch(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        self.service
            .artifact_bytes(artifact_id)
            .await
            .map_err(|e| ArtifactError::SourceUnavailable(e.to_string()))
    }
}

/// HTTP client for the outbox API
#[derive(Clone)]
pub struct OutboxClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl OutboxClient {
    /// # Errors
    /// `Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(body) => Err(gateway_error(body.error.kind, body.error.message)),
            Err(_) => Err(GatewayError::Transport(format!("unexpected response {status}"))),
        }
    }

    async fn data<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, GatewayError> {
        let response = Self::send(request).await?;
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(envelope.data)
    }

    /// # Errors
    /// Rejections carry the server's error kind.
    pub async fn prepare_registration(&self, request: &PrepareRequest) -> Result<Registration, GatewayError> {
        Self::data(
            self.request(reqwest::Method::POST, "/api/outbox/prepare-registration")
                .json(request),
        )
        .await
    }

    /// # Errors
    /// Rejections carry the server's error kind.
    pub async fn journal(
        &self,
        filter: &JournalFilter,
        skip: usize,
        limit: usize,
        as_of: Option<u64>,
    ) -> Result<JournalPage, GatewayError> {
        let mut query: Vec<(&str, String)> = vec![("skip", skip.to_string()), ("limit", limit.to_string())];
        if let Some(year) = filter.year {
            query.push(("year", year.to_string()));
        }
        if let Some(month) = filter.month {
            query.push(("month", month.to_string()));
        }
        if let Some(as_of) = as_of {
            query.push(("as_of", as_of.to_string()));
        }
        Self::data(
            self.request(reqwest::Method::GET, "/api/journal/entries")
                .query(&query),
        )
        .await
    }
}

#[async_trait]
impl LedgerGateway for OutboxClient {
    async fn submit(&self, request: &CommitRequest) -> Result<JournalEntry, GatewayError> {
        Self::data(
            self.request(reqwest::Method::POST, "/api/outbox/submit-signature")
                .json(request),
        )
        .await
    }
}

#[async_trait]
impl ArtifactSource for OutboxClient {
    async fn fetch(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        let response = Self::send(self.request(reqwest::Method::GET, &artifact_url(artifact_id)))
            .await
            .map_err(|e| ArtifactError::SourceUnavailable(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArtifactError::SourceUnavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
