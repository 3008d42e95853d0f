//! # Volume lifecycle orchestration
//!
//! [`VolumeOrchestrator`] runs the multi-step workflows that attach, mount,
//! unmount and remove volumes, brokering between the remote provider and the
//! local host device manager.
//!
//! ## Workflow shape
//!
//! ```text
//!   request ──► build (host, options)
//!                 │
//!                 ├─► stale mount repair        (mount only)
//!                 ├─► conflict delay            (mount: before gate, remove: inside)
//!                 ▼
//!           RequestGate::acquire(name, class)
//!                 │
//!                 ├─► provider step
//!                 ├─► host device step
//!                 └─► best-effort teardown / rollback on failure
//!                 ▼
//!            gate released on drop ──► typed response, error in-band
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use volagent::prelude::*;
//!
//! # async fn run(devices: Arc<dyn HostDeviceManager>, host: Host) {
//! let config = AgentConfig::load("/etc/volagent/volagent.toml").unwrap();
//! let provider = Arc::new(ProviderHandle::http(config.provider.clone()));
//! let orchestrator = VolumeOrchestrator::new(config, provider, devices, Arc::new(host));
//!
//! let resp = orchestrator
//!     .mount(MountRequest { name: "db-data".into(), ..Default::default() })
//!     .await;
//! assert!(resp.err.is_empty());
//! # }
//! ```

mod create;
mod mount;
mod query;
mod remove;
mod teardown;
mod unmount;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::conflict::{ConflictKind, ConflictPoller};
use crate::error::AgentError;
use crate::gate::RequestGate;
use crate::host::{HostContext, HostDeviceManager};
use crate::options::VolumeOptions;
use crate::poll::{Clock, TokioClock};
use crate::provider::ProviderGateway;
use crate::stale::StaleMountReconciler;
use crate::types::{Host, ProviderRequest};

/// Service object owning every collaborator a workflow needs.
pub struct VolumeOrchestrator {
    config: Arc<AgentConfig>,
    provider: Arc<dyn ProviderGateway>,
    devices: Arc<dyn HostDeviceManager>,
    hosts: Arc<dyn HostContext>,
    gate: RequestGate,
    conflicts: ConflictPoller,
    stale: StaleMountReconciler,
}

/// One operation's inputs, built once and threaded through the workflow.
#[derive(Debug, Clone)]
pub(crate) struct WorkflowRequest {
    pub name: String,
    pub options: VolumeOptions,
    pub host: Host,
    pub request_id: Uuid,
}

impl VolumeOrchestrator {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ProviderGateway>,
        devices: Arc<dyn HostDeviceManager>,
        hosts: Arc<dyn HostContext>,
    ) -> Self {
        Self::with_clock(config, provider, devices, hosts, Arc::new(TokioClock))
    }

    /// Like [`Self::new`] with an explicit clock for the conflict poller.
    pub fn with_clock(
        config: AgentConfig,
        provider: Arc<dyn ProviderGateway>,
        devices: Arc<dyn HostDeviceManager>,
        hosts: Arc<dyn HostContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = RequestGate::new(&config.admission);
        let conflicts = ConflictPoller::new(provider.clone(), clock, config.conflict.tick());
        let stale = StaleMountReconciler::new(provider.clone(), devices.clone());
        Self {
            config: Arc::new(config),
            provider,
            devices,
            hosts,
            gate,
            conflicts,
            stale,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub(crate) async fn build_request(
        &self,
        name: &str,
        opts: HashMap<String, Value>,
    ) -> Result<WorkflowRequest, AgentError> {
        if name.trim().is_empty() {
            return Err(AgentError::InvalidArgument("volume name is required".into()));
        }
        let options = VolumeOptions::from_map(opts)?;
        let host = self.hosts.host().await?;
        let request_id = Uuid::new_v4();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        Ok(WorkflowRequest {
            name: name.to_string(),
            options,
            host,
            request_id,
        })
    }

    /// Provider view of a workflow request, without agent-private options.
    pub(crate) fn provider_request(&self, req: &WorkflowRequest) -> ProviderRequest {
        let mut options = req.options.clone();
        options.strip_private();
        ProviderRequest {
            name: req.name.clone(),
            opts: options.into_map(),
            host: Some(req.host.clone()),
            user: self.config.provider.user.clone(),
            scope: self.config.scope.clone(),
        }
    }

    /// Conflict delay for a workflow: request option, else configured default.
    pub(crate) fn conflict_timeout(&self, kind: ConflictKind, options: &VolumeOptions) -> Duration {
        let secs = match kind {
            ConflictKind::Mount => options
                .mount_conflict_delay
                .unwrap_or(self.config.conflict.mount_delay_secs),
            ConflictKind::Delete => options
                .delete_conflict_delay
                .unwrap_or(self.config.conflict.delete_delay_secs),
        };
        Duration::from_secs(secs)
    }
}

/// Keep only the network interfaces named (or addressed) in `initiators`.
pub(crate) fn restrict_to_initiators(
    mut host: Host,
    initiators: Option<&[String]>,
) -> Result<Host, AgentError> {
    let wanted = initiators.filter(|i| !i.is_empty()).ok_or_else(|| {
        AgentError::InvalidArgument(
            "no initiators configured, the initiators option is required in cloud mode".into(),
        )
    })?;
    host.network_interfaces
        .retain(|iface| wanted.iter().any(|w| *w == iface.name || *w == iface.address_v4));
    if host.network_interfaces.is_empty() {
        return Err(AgentError::InvalidArgument(format!(
            "none of the initiators {} match a network interface on this host",
            wanted.join(",")
        )));
    }
    Ok(host)
}
