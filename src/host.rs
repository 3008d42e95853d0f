//! Local host collaborators: the device manager that attaches, mounts and
//! formats block devices, and the host context builder that describes this
//! node.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AgentError;
use crate::types::{Device, Host, Mount, Volume};

/// Operations of the host device manager.
#[async_trait]
pub trait HostDeviceManager: Send + Sync {
    /// Mount-table entries for devices with the given serial number.
    async fn get_mounts(&self, serial_number: &str) -> Result<Vec<Mount>, AgentError>;

    /// Attach (log in / rescan) the given volumes and return their devices.
    async fn attach_device(&self, volumes: &[Volume]) -> Result<Vec<Device>, AgentError>;

    /// Attach the volume and mount its existing filesystem at `mountpoint`.
    async fn attach_and_mount_device(
        &self,
        volume: &Volume,
        mountpoint: &Path,
    ) -> Result<Mount, AgentError>;

    /// Mount an already attached and formatted device.
    async fn mount_device(&self, device: &Device, mountpoint: &Path) -> Result<Mount, AgentError>;

    /// Create `fs_type` on the device and apply the volume's fsMode/fsOwner.
    async fn setup_filesystem_and_permissions(
        &self,
        device: &Device,
        volume: &Volume,
        fs_type: &str,
    ) -> Result<(), AgentError>;

    /// Unmount every mount of the volume's device.
    async fn unmount_device(&self, volume: &Volume) -> Result<(), AgentError>;

    /// Unmount a single mount-table entry.
    async fn unmount_file_system(&self, mountpoint: &Path) -> Result<(), AgentError>;

    async fn offline_device(&self, device: &Device) -> Result<(), AgentError>;

    async fn delete_device(&self, device: &Device) -> Result<(), AgentError>;

    /// Resolve the local device of a volume, if attached.
    async fn get_device_from_volume(&self, volume: &Volume) -> Result<Option<Device>, AgentError>;
}

/// Builds the [`Host`] description of this node.
#[async_trait]
pub trait HostContext: Send + Sync {
    async fn host(&self) -> Result<Host, AgentError>;
}

/// A fixed host description.
#[async_trait]
impl HostContext for Host {
    async fn host(&self) -> Result<Host, AgentError> {
        Ok(self.clone())
    }
}

/// Reuses a built [`Host`] until `ttl` has elapsed.
pub struct HostCache {
    builder: Arc<dyn HostContext>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Host)>>,
}

impl HostCache {
    pub fn new(builder: Arc<dyn HostContext>, ttl: Duration) -> Self {
        Self {
            builder,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached host so the next call rebuilds it.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[async_trait]
impl HostContext for HostCache {
    async fn host(&self) -> Result<Host, AgentError> {
        let mut cached = self.cached.lock().await;
        if let Some((built_at, host)) = cached.as_ref() {
            if built_at.elapsed() < self.ttl {
                return Ok(host.clone());
            }
            debug!(uuid = %host.uuid, "host context expired, rebuilding");
        }
        let host = self.builder.host().await?;
        *cached = Some((Instant::now(), host.clone()));
        Ok(host)
    }
}
