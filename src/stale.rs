//! Repair of mount entries left behind by an earlier, incomplete workflow.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AgentError, SoftOutcome};
use crate::host::HostDeviceManager;
use crate::provider::ProviderGateway;
use crate::session::is_host_attached;
use crate::types::{Host, ProviderRequest};

/// What [`StaleMountReconciler::reconcile`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleCleanup {
    /// No mount entries for the volume's serial number.
    NothingToRepair,
    /// Mount entries exist but this host legitimately uses the volume.
    InUseHere,
    /// Stale entries were unmounted.
    Repaired {
        unmounted: usize,
        /// Whether the shared (FC or group-scoped) device was also deleted.
        device_deleted: bool,
    },
}

pub struct StaleMountReconciler {
    provider: Arc<dyn ProviderGateway>,
    devices: Arc<dyn HostDeviceManager>,
}

impl StaleMountReconciler {
    pub fn new(provider: Arc<dyn ProviderGateway>, devices: Arc<dyn HostDeviceManager>) -> Self {
        Self { provider, devices }
    }

    /// Detect and best-effort repair stale mounts of `name` on this host.
    ///
    /// Fails hard when the volume cannot be resolved, or when mount entries
    /// exist without a local device behind them.
    pub async fn reconcile(&self, name: &str, host: &Host) -> Result<StaleCleanup, AgentError> {
        let volume = self
            .provider
            .get(&ProviderRequest::named(name))
            .await?
            .into_volume(name)?;

        let mounts = self.devices.get_mounts(&volume.serial_number).await?;
        if mounts.is_empty() {
            return Ok(StaleCleanup::NothingToRepair);
        }

        let device = self
            .devices
            .get_device_from_volume(&volume)
            .await?
            .ok_or_else(|| AgentError::InconsistentState {
                volume: name.to_string(),
                reason: format!(
                    "{} mount(s) found but no device for serial {}, remove the volume explicitly",
                    mounts.len(),
                    volume.serial_number
                ),
            })?;

        // Never unmount a volume this host is legitimately using.
        if volume.in_use && is_host_attached(&volume, host) {
            return Ok(StaleCleanup::InUseHere);
        }

        let mut unmounted = 0;
        for mount in &mounts {
            info!(
                volume = name,
                mountpoint = %mount.mountpoint.display(),
                state = ?mount.device.state,
                "removing stale mount"
            );
            if let Err(e) = self.devices.unmount_file_system(&mount.mountpoint).await {
                let msg = e.to_string();
                // Both substrings must be present for the error to be ignored.
                if !msg.contains("not mounted") || !msg.contains("no such file") {
                    return Err(e);
                }
                warn!(volume = name, error = %e, "stale mount already gone");
            }
            unmounted += 1;
        }

        // Every stale entry points at the same device.
        let device_deleted = if volume.is_shared_target() {
            SoftOutcome::best_effort(
                "delete stale device",
                self.devices.delete_device(&device).await,
            )
            .is_ok()
        } else {
            false
        };

        Ok(StaleCleanup::Repaired {
            unmounted,
            device_deleted,
        })
    }
}
