//! Read-only runtime queries: get, path and capabilities.

use std::collections::HashMap;

use tracing::{debug, instrument};

use super::VolumeOrchestrator;
use crate::error::AgentError;
use crate::types::{
    CapabilitiesResponse, Capability, MountResponse, NameRequest, OpClass, VolumeInfo,
    VolumeResponse,
};

impl VolumeOrchestrator {
    /// Provider view of a volume plus its local mountpoint, if mounted here.
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn get(&self, req: NameRequest) -> VolumeResponse {
        match self.describe(&req.name).await {
            Ok(info) => VolumeResponse {
                volume: Some(info),
                err: String::new(),
            },
            Err(e) => {
                debug!(error = %e, "get failed");
                VolumeResponse {
                    volume: None,
                    err: e.to_string(),
                }
            }
        }
    }

    /// Local mountpoint of a volume; empty when it is not mounted here.
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn path(&self, req: NameRequest) -> MountResponse {
        match self.describe(&req.name).await {
            Ok(info) => MountResponse {
                mountpoint: info.mountpoint,
                err: String::new(),
            },
            Err(e) => MountResponse::failed(&e),
        }
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            capabilities: Capability {
                scope: self.config.scope.clone(),
            },
        }
    }

    async fn describe(&self, name: &str) -> Result<VolumeInfo, AgentError> {
        let wreq = self.build_request(name, HashMap::new()).await?;
        let _gate = self.gate.acquire(&wreq.name, OpClass::Get).await;
        let volume = self
            .provider
            .get(&self.provider_request(&wreq))
            .await?
            .into_volume(&wreq.name)?;

        let expected = self.config.mountpoint_for(&volume.name);
        let mountpoint = self
            .devices
            .get_mounts(&volume.serial_number)
            .await?
            .into_iter()
            .find(|m| m.mountpoint == expected)
            .map(|m| m.mountpoint.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(VolumeInfo {
            name: volume.name,
            mountpoint,
            status: volume.status,
        })
    }
}
