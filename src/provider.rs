//! Provider gateway: the remote storage control plane.
//!
//! The orchestrator only depends on the [`ProviderGateway`] trait. The
//! production implementation is [`HttpProvider`], reached through a
//! [`ProviderHandle`] that builds the client lazily on first use and shares it
//! across every workflow of the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::error::AgentError;
use crate::types::{ProviderRequest, ProviderResponse};

/// Provider operations consumed by the workflows. In-band errors are returned
/// inside [`ProviderResponse::err`]; `Err` is reserved for transport failures.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Fetch current volume state including sessions and in-use flag.
    async fn get(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    async fn create(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    /// Mutate the volume's status/options map.
    async fn update(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    /// Register this host's attachment intent.
    async fn mount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    /// Deregister this host's attachment intent. A `"donotunmount"` message
    /// means other containers still hold the volume.
    async fn unmount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    async fn remove(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;

    /// Remove this host's ACL entry from the volume.
    async fn detach(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// JSON-over-HTTP provider client.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(AgentError::transport)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn call(
        &self,
        op: &str,
        req: &ProviderRequest,
    ) -> Result<ProviderResponse, AgentError> {
        let url = format!("{}/{op}", self.endpoint);
        debug!(%url, volume = %req.name, "provider request");
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("{op}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Transport(format!("{op}: HTTP {status}: {body}")));
        }
        resp.json::<ProviderResponse>()
            .await
            .map_err(|e| AgentError::Transport(format!("{op}: decode reply: {e}")))
    }
}

#[async_trait]
impl ProviderGateway for HttpProvider {
    async fn get(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Get", req).await
    }

    async fn create(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Create", req).await
    }

    async fn update(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Update", req).await
    }

    async fn mount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Mount", req).await
    }

    async fn unmount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Unmount", req).await
    }

    async fn remove(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("VolumeDriver.Remove", req).await
    }

    async fn detach(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.call("Nimble.Detach", req).await
    }
}

// ---------------------------------------------------------------------------
// Lazily connected handle
// ---------------------------------------------------------------------------

type Connector =
    Box<dyn Fn() -> Result<Arc<dyn ProviderGateway>, AgentError> + Send + Sync + 'static>;

/// Process-wide provider connection, built on first use.
///
/// A failed connection attempt is not cached; the next call retries.
pub struct ProviderHandle {
    connector: Connector,
    inner: Mutex<Option<Arc<dyn ProviderGateway>>>,
}

impl ProviderHandle {
    /// Handle that connects an [`HttpProvider`] with the given settings.
    pub fn http(config: ProviderConfig) -> Self {
        Self::with_connector(move || {
            let provider = HttpProvider::new(&config)?;
            info!(endpoint = %config.endpoint, "provider client connected");
            Ok(Arc::new(provider) as Arc<dyn ProviderGateway>)
        })
    }

    pub fn with_connector<F>(connector: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderGateway>, AgentError> + Send + Sync + 'static,
    {
        Self {
            connector: Box::new(connector),
            inner: Mutex::new(None),
        }
    }

    /// Return the shared client, connecting if this is the first use.
    pub async fn client(&self) -> Result<Arc<dyn ProviderGateway>, AgentError> {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.as_ref() {
            return Ok(client.clone());
        }
        let client = (self.connector)()?;
        *inner = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ProviderGateway for ProviderHandle {
    async fn get(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.get(req).await
    }

    async fn create(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.create(req).await
    }

    async fn update(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.update(req).await
    }

    async fn mount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.mount(req).await
    }

    async fn unmount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.unmount(req).await
    }

    async fn remove(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.remove(req).await
    }

    async fn detach(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.client().await?.detach(req).await
    }
}
