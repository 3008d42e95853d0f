//! Remove workflow.

use std::collections::HashMap;

use tracing::{error, info, instrument};

use super::teardown::already_clean;
use super::{VolumeOrchestrator, WorkflowRequest};
use crate::conflict::ConflictKind;
use crate::error::AgentError;
use crate::types::{DriverResponse, NameRequest, OpClass};

impl VolumeOrchestrator {
    /// Tear down any local state of a volume and delete it on the provider.
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn remove(&self, req: NameRequest) -> DriverResponse {
        let result: Result<(), AgentError> = async {
            let wreq = self.build_request(&req.name, HashMap::new()).await?;
            let _gate = self.gate.acquire(&wreq.name, OpClass::Remove).await;
            self.remove_locked(&wreq).await
        }
        .await;
        if let Err(e) = &result {
            error!(error = %e, "remove failed");
        }
        DriverResponse::from_result(result)
    }

    /// Body of the remove workflow; the caller holds the gate for the name.
    pub(super) async fn remove_locked(&self, wreq: &WorkflowRequest) -> Result<(), AgentError> {
        let preq = self.provider_request(wreq);
        let volume = self.provider.get(&preq).await?.into_volume(&wreq.name)?;

        if volume.status_in_use() {
            let timeout = self.conflict_timeout(ConflictKind::Delete, &wreq.options);
            self.conflicts
                .wait_while_conflicted(&wreq.name, &wreq.host, ConflictKind::Delete, timeout)
                .await;
        }

        if let Err(e) = self.devices.unmount_device(&volume).await {
            if !already_clean(&e) {
                return Err(e);
            }
        }

        let report = self.release_host_side(&volume, &preq).await;
        if !report.is_clean() {
            info!(
                failures = report.failures().count(),
                "host release incomplete, removing anyway"
            );
        }

        self.provider.remove(&preq).await?.check()?;
        info!(serial = %volume.serial_number, "volume removed");
        Ok(())
    }
}
