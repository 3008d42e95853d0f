//! Create workflow.
//!
//! Fresh volumes are marked for delayed create and formatted on first mount.
//! Clones and imports already carry data: they are attached once so the
//! device manager can apply ownership and mode, then released again. Any
//! failure after the provider created the volume removes it again.

use tracing::{error, info, instrument, warn};

use super::{VolumeOrchestrator, WorkflowRequest};
use crate::error::{AgentError, SoftOutcome};
use crate::options::{VolumeOptions, DEFAULT_FILESYSTEM, HELP_TEXT};
use crate::types::{CreateRequest, CreateResponse, OpClass, ProviderRequest, Volume, VolumeInfo};

/// Provider option forcing removal of a volume that may still have ACLs.
const OPT_FORCE: &str = "force";

enum Created {
    Volume(Volume),
    Help,
}

impl VolumeOrchestrator {
    #[instrument(skip(self, req), fields(volume = %req.name, request_id = tracing::field::Empty))]
    pub async fn create(&self, req: CreateRequest) -> CreateResponse {
        match self.create_volume(req).await {
            Ok(Created::Volume(volume)) => CreateResponse {
                volumes: vec![VolumeInfo {
                    name: volume.name,
                    mountpoint: String::new(),
                    status: volume.status,
                }],
                ..Default::default()
            },
            Ok(Created::Help) => CreateResponse {
                help: HELP_TEXT.to_string(),
                ..Default::default()
            },
            Err(e) => {
                error!(error = %e, "create failed");
                CreateResponse {
                    err: e.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn create_volume(&self, req: CreateRequest) -> Result<Created, AgentError> {
        if req.name.trim().is_empty() {
            return Err(AgentError::InvalidArgument("volume name is required".into()));
        }
        let mut options = VolumeOptions::layered(
            &self.config.defaults,
            self.config.driver_defaults(),
            req.opts,
        )?;
        if options.help {
            return Ok(Created::Help);
        }
        options.validate()?;

        let delayed = !options.is_clone_or_import();
        if delayed {
            options.delayed_create = Some(true);
            options
                .filesystem
                .get_or_insert_with(|| DEFAULT_FILESYSTEM.to_string());
        }

        let wreq = WorkflowRequest {
            name: req.name,
            options,
            host: self.hosts.host().await?,
            request_id: uuid::Uuid::new_v4(),
        };
        tracing::Span::current().record("request_id", tracing::field::display(wreq.request_id));

        let _gate = self.gate.acquire(&wreq.name, OpClass::Create).await;
        let preq = self.provider_request(&wreq);
        let volume = self.provider.create(&preq).await?.into_volume(&wreq.name)?;
        info!(serial = %volume.serial_number, delayed, "volume created on provider");

        if delayed {
            return Ok(Created::Volume(volume));
        }

        let fs_type = wreq
            .options
            .filesystem
            .as_deref()
            .unwrap_or(DEFAULT_FILESYSTEM);
        if let Err(e) = self.prepare_and_release(&volume, &preq, fs_type).await {
            warn!(error = %e, "preparing new volume failed, removing it");
            self.discard_created(&volume, &preq).await;
            return Err(e);
        }
        Ok(Created::Volume(volume))
    }

    /// Attach, set up the filesystem, then leave the volume unattached.
    async fn prepare_and_release(
        &self,
        volume: &Volume,
        req: &ProviderRequest,
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
        self.devices.unmount_device(volume).await?;
        self.devices.offline_device(&device).await?;
        self.provider.detach(req).await?.check()?;
        self.devices.delete_device(&device).await?;
        Ok(())
    }

    /// Best-effort removal of a half-provisioned volume on both sides.
    async fn discard_created(&self, volume: &Volume, req: &ProviderRequest) {
        let report = self.release_host_side(volume, req).await;
        let force = req.clone().with_opt(OPT_FORCE, true);
        let removed = match self.provider.remove(&force).await {
            Ok(resp) => resp.check().map(|_| ()),
            Err(e) => Err(e),
        };
        let removed = SoftOutcome::best_effort("force remove", removed);
        info!(
            host_failures = report.failures().count(),
            removed = removed.is_ok(),
            "discarded half-provisioned volume"
        );
    }
}
