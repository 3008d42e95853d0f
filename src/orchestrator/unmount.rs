//! Unmount workflow.

use tracing::{error, info, instrument};

use super::{VolumeOrchestrator, WorkflowRequest};
use crate::error::{AgentError, SoftOutcome};
use crate::types::{DriverResponse, MountRequest, OpClass};

impl VolumeOrchestrator {
    /// Unmount a volume and release it from this host, unless other containers
    /// still hold it.
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn unmount(&self, req: MountRequest) -> DriverResponse {
        let result: Result<(), AgentError> = async {
            let wreq = self.build_request(&req.name, req.opts.clone()).await?;
            let _gate = self.gate.acquire(&wreq.name, OpClass::Unmount).await;
            self.unmount_locked(&wreq).await
        }
        .await;
        if let Err(e) = &result {
            error!(error = %e, "unmount failed");
        }
        DriverResponse::from_result(result)
    }

    async fn unmount_locked(&self, wreq: &WorkflowRequest) -> Result<(), AgentError> {
        let preq = self.provider_request(wreq);
        let resp = self.provider.unmount(&preq).await?.check()?;
        if resp.is_do_not_unmount() {
            info!("volume still held by other containers, leaving host state alone");
            return Ok(());
        }
        let volume = resp.into_volume(&wreq.name)?;

        self.devices.unmount_device(&volume).await?;

        let device = self.resolve_device(&volume).await;
        if let Some(device) = &device {
            // A failed offline of a shared group target can collide with other hosts.
            match self.devices.offline_device(device).await {
                Err(e) if volume.is_group_scoped() => return Err(e),
                result => {
                    let _ = SoftOutcome::best_effort("offline device", result);
                }
            }
        }

        let _ = self.detach(&preq).await;

        if let Some(device) = &device {
            if let Err(e) = self.devices.delete_device(device).await {
                if !e.is_not_found() {
                    return Err(e);
                }
            }
        }
        info!(serial = %volume.serial_number, "volume unmounted and released");

        if volume.destroy_on_detach {
            info!("destroy on detach set, removing volume");
            let _ = SoftOutcome::best_effort("destroy on detach", self.remove_locked(wreq).await);
        }
        Ok(())
    }
}
