//! Best-effort host and provider release steps shared by the workflows.

use tracing::{debug, warn};

use super::VolumeOrchestrator;
use crate::error::{AgentError, SoftOutcome, TeardownReport};
use crate::types::{Device, ProviderRequest, Volume};

impl VolumeOrchestrator {
    /// Local device of a volume; lookup failures are logged and read as "none".
    pub(super) async fn resolve_device(&self, volume: &Volume) -> Option<Device> {
        match self.devices.get_device_from_volume(volume).await {
            Ok(Some(device)) => Some(device),
            Ok(None) => {
                debug!(volume = %volume.name, "no local device");
                None
            }
            Err(e) => {
                warn!(volume = %volume.name, error = %e, "device lookup failed");
                None
            }
        }
    }

    pub(super) async fn offline(&self, device: &Device) -> SoftOutcome {
        SoftOutcome::best_effort("offline device", self.devices.offline_device(device).await)
    }

    /// Remove this host's ACL entry on the provider.
    pub(super) async fn detach(&self, req: &ProviderRequest) -> SoftOutcome {
        let result = match self.provider.detach(req).await {
            Ok(resp) => resp.check().map(|_| ()),
            Err(e) => Err(e),
        };
        SoftOutcome::best_effort("detach", result)
    }

    pub(super) async fn delete(&self, device: &Device) -> SoftOutcome {
        SoftOutcome::best_effort("delete device", self.devices.delete_device(device).await)
    }

    /// Offline, detach and delete, each attempted regardless of the others.
    pub(super) async fn release_host_side(
        &self,
        volume: &Volume,
        req: &ProviderRequest,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();
        let device = self.resolve_device(volume).await;
        match &device {
            Some(device) => report.push(self.offline(device).await),
            None => report.push(SoftOutcome::skipped("offline device")),
        }
        report.push(self.detach(req).await);
        match &device {
            Some(device) => report.push(self.delete(device).await),
            None => report.push(SoftOutcome::skipped("delete device")),
        }
        report
    }
}

/// Unmount errors that mean the volume is already clean.
pub(super) fn already_clean(err: &AgentError) -> bool {
    let msg = err.to_string();
    err.is_not_found() || msg.contains("not mounted") || msg.contains("no such file")
}
