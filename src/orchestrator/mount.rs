//! Mount workflow.
//!
//! `Init → StaleCleanup → ConflictWait → Locked → ProviderMount → HostMount
//! [→ DelayedCreate] → [Rollback] → Done`

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::{restrict_to_initiators, VolumeOrchestrator};
use crate::conflict::ConflictKind;
use crate::error::{AgentError, SoftOutcome, TeardownReport};
use crate::types::{
    MountRequest, MountResponse, OpClass, ProviderRequest, Volume, CONNECTION_MODE_MANUAL,
    STATUS_DELAYED_CREATE, STATUS_FILESYSTEM,
};

/// How the host side of a mount was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostMount {
    /// A healthy mount already targeted the mountpoint.
    Reused,
    Mounted,
    /// The filesystem was created on this first mount.
    DelayedCreate,
}

impl VolumeOrchestrator {
    /// Mount a volume at `<mount_dir>/<name>`.
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn mount(&self, req: MountRequest) -> MountResponse {
        let start = Instant::now();
        match self.mount_volume(&req).await {
            Ok(mountpoint) => {
                info!(
                    "volume mounted at {} elapsed={:.2}s",
                    mountpoint.display(),
                    start.elapsed().as_secs_f64()
                );
                MountResponse::mounted(mountpoint)
            }
            Err(e) => {
                error!(error = %e, "mount failed");
                MountResponse::failed(&e)
            }
        }
    }

    async fn mount_volume(&self, req: &MountRequest) -> Result<PathBuf, AgentError> {
        let mut wreq = self.build_request(&req.name, req.opts.clone()).await?;
        if self.config.cloud_mode {
            wreq.host = restrict_to_initiators(wreq.host, wreq.options.initiators.as_deref())?;
        }

        let cleanup = self.stale.reconcile(&wreq.name, &wreq.host).await?;
        debug!(?cleanup, "stale mount check done");

        let timeout = self.conflict_timeout(ConflictKind::Mount, &wreq.options);
        self.conflicts
            .wait_while_conflicted(&wreq.name, &wreq.host, ConflictKind::Mount, timeout)
            .await;

        let _gate = self.gate.acquire(&wreq.name, OpClass::Mount).await;

        let preq = self.provider_request(&wreq);
        let mut volume = self
            .provider
            .mount(&preq)
            .await
            .and_then(|resp| resp.into_volume(&wreq.name))
            .map_err(|e| e.clarify_busy(&wreq.name))?;

        let mountpoint = self.config.mountpoint_for(&volume.name);
        // runtime-driven mounts are never auto-managed by the host
        volume.connection_mode = Some(CONNECTION_MODE_MANUAL.to_string());

        let how = match self.mount_on_host(&volume, &mountpoint).await {
            Ok(how) => how,
            Err(e) => {
                error!(error = %e, request_id = %wreq.request_id, "host mount failed, rolling back");
                return Err(match self.rollback_mount(&preq, &volume, &mountpoint).await {
                    Ok(report) => {
                        debug!(failures = report.failures().count(), "mount rollback finished");
                        e
                    }
                    Err(cause) => AgentError::Rollback {
                        original: Box::new(e),
                        cause,
                    },
                });
            }
        };
        debug!(?how, "host mount done");

        if volume.has_delayed_create() {
            let _ = self.clear_delayed_create(&volume.name).await;
        }
        Ok(mountpoint)
    }

    async fn mount_on_host(&self, volume: &Volume, mountpoint: &Path) -> Result<HostMount, AgentError> {
        let mounts = self.devices.get_mounts(&volume.serial_number).await?;
        if let Some(existing) = mounts
            .iter()
            .find(|m| m.mountpoint == mountpoint && m.device.state.is_healthy())
        {
            info!(device = %existing.device.path, "reusing existing mount");
            return Ok(HostMount::Reused);
        }

        let err = match self.devices.attach_and_mount_device(volume, mountpoint).await {
            Ok(_) => return Ok(HostMount::Mounted),
            Err(e) => e,
        };

        let Some(fs_type) = volume.delayed_create_filesystem() else {
            return Err(err);
        };
        warn!(error = %err, fs_type, "attach and mount failed, creating filesystem on first mount");
        self.create_filesystem_on_first_mount(volume, mountpoint, fs_type)
            .await?;
        Ok(HostMount::DelayedCreate)
    }

    async fn create_filesystem_on_first_mount(
        &self,
        volume: &Volume,
        mountpoint: &Path,
        fs_type: &str,
    ) -> Result<(), AgentError> {
        let device = self
            .devices
            .attach_device(std::slice::from_ref(volume))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::NotFound(format!("device for volume {}", volume.name)))?;
        self.devices
            .setup_filesystem_and_permissions(&device, volume, fs_type)
            .await?;
        self.devices.mount_device(&device, mountpoint).await?;
        info!(device = %device.path, fs_type, "filesystem created on first mount");
        Ok(())
    }

    /// Undo a failed host mount. Only a failure to remove the mountpoint
    /// directory is reported back; every other step is best effort.
    async fn rollback_mount(
        &self,
        req: &ProviderRequest,
        volume: &Volume,
        mountpoint: &Path,
    ) -> Result<TeardownReport, String> {
        match tokio::fs::remove_dir(mountpoint).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("remove {}: {e}", mountpoint.display())),
        }

        let mut report = TeardownReport::default();
        match self.provider.unmount(req).await {
            Ok(resp) if resp.is_do_not_unmount() => {
                info!("volume still held by other containers, skipping host teardown");
                report.push(SoftOutcome::skipped("provider unmount"));
                return Ok(report);
            }
            Ok(resp) => report.push(SoftOutcome::best_effort("provider unmount", resp.check())),
            Err(e) => report.push(SoftOutcome::best_effort::<()>("provider unmount", Err(e))),
        }

        let host_side = self.release_host_side(volume, req).await;
        report.outcomes.extend(host_side.outcomes);
        Ok(report)
    }

    /// Drop the delayed-create markers. A later operation retries on failure.
    async fn clear_delayed_create(&self, name: &str) -> SoftOutcome {
        let req = ProviderRequest::named(name)
            .with_opt(STATUS_DELAYED_CREATE, Value::Null)
            .with_opt(STATUS_FILESYSTEM, Value::Null);
        let result = match self.provider.update(&req).await {
            Ok(resp) => resp.check().map(|_| ()),
            Err(e) => Err(e),
        };
        SoftOutcome::best_effort("clear delayed create", result)
    }
}
