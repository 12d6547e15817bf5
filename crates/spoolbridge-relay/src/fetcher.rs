// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job content retrieval from the backend.
//
// A print message only carries a reference; the printable bytes (receipt
// markup already encoded for the printer) live behind an authenticated GET.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_core::{AgentConfig, JobReference, Topic};

/// Header carrying the agent's credential.
pub const ACCESS_TOKEN_HEADER: &str = "access-token";

/// Stateless request/response retrieval of job payloads.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the payload `reference` points at, using `config`'s backend
    /// address and credential.
    async fn fetch(
        &self,
        config: &AgentConfig,
        topic: Topic,
        reference: &JobReference,
    ) -> Result<Vec<u8>>;
}

/// Full URL for `reference` on `topic`.
pub fn content_url(config: &AgentConfig, topic: Topic, reference: &JobReference) -> String {
    format!("{}{}", config.backend_base(), reference.request_path(topic))
}

/// `ContentFetcher` over HTTP(S) with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Fetch(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip(self, config), fields(topic = %topic, reference = %reference))]
    async fn fetch(
        &self,
        config: &AgentConfig,
        topic: Topic,
        reference: &JobReference,
    ) -> Result<Vec<u8>> {
        let url = content_url(config, topic, reference);

        let response = self
            .client
            .get(&url)
            .header(ACCESS_TOKEN_HEADER, &config.access_token)
            .send()
            .await
            .map_err(|e| AgentError::Fetch(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::FetchStatus {
                status: status.as_u16(),
                body,
            });
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| AgentError::Fetch(format!("reading body of {url}: {e}")))?;

        debug!(bytes = content.len(), "content fetched");
        Ok(content.to_vec())
    }
}
