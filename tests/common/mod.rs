//! In-memory collaborators shared by the integration tests.
//!
//! `FakeProvider` and `FakeDevices` record every call they receive and can be
//! told to fail a given operation, so tests assert on the exact sequence of
//! side effects a workflow produced.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use volagent::config::AgentConfig;
use volagent::error::AgentError;
use volagent::host::HostDeviceManager;
use volagent::orchestrator::VolumeOrchestrator;
use volagent::poll::ManualClock;
use volagent::provider::ProviderGateway;
use volagent::types::{
    Device, DeviceState, Host, Initiator, IscsiSession, Mount, NetworkInterface, ProviderRequest,
    ProviderResponse, Volume,
};

pub const HOST_IQN: &str = "iqn.2024-01.io.volagent:host-1";
pub const OTHER_IQN: &str = "iqn.2024-01.io.volagent:host-2";

pub fn host() -> Host {
    Host {
        uuid: "host-1".into(),
        node_id: "node-1".into(),
        name: "host-1".into(),
        initiators: vec![Initiator {
            access_protocol: "iscsi".into(),
            init: vec![HOST_IQN.into()],
        }],
        network_interfaces: vec![
            NetworkInterface {
                name: "eth0".into(),
                address_v4: "10.0.0.5".into(),
                mask_v4: "255.255.255.0".into(),
            },
            NetworkInterface {
                name: "eth1".into(),
                address_v4: "192.168.10.5".into(),
                mask_v4: "255.255.255.0".into(),
            },
        ],
    }
}

pub fn volume(name: &str, serial: &str) -> Volume {
    Volume {
        id: format!("id-{name}"),
        name: name.into(),
        serial_number: serial.into(),
        ..Default::default()
    }
}

/// A volume held by another host's iSCSI session.
pub fn held_elsewhere(mut vol: Volume) -> Volume {
    vol.in_use = true;
    vol.iscsi_sessions = vec![IscsiSession {
        initiator_name: OTHER_IQN.into(),
        initiator_ip: "10.0.0.99".into(),
    }];
    vol
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProviderState {
    volumes: HashMap<String, Volume>,
    /// Scripted replies for `get`, consumed front to back before falling back
    /// to the stored volume.
    get_script: VecDeque<Volume>,
    calls: Vec<(&'static str, ProviderRequest)>,
    failures: HashMap<&'static str, AgentError>,
    unmount_message: String,
}

#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, vol: Volume) {
        self.lock().volumes.insert(vol.name.clone(), vol);
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.lock().volumes.get(name).cloned()
    }

    pub fn script_gets(&self, states: impl IntoIterator<Item = Volume>) {
        self.lock().get_script.extend(states);
    }

    pub fn fail(&self, op: &'static str, err: AgentError) {
        self.lock().failures.insert(op, err);
    }

    pub fn set_unmount_message(&self, msg: &str) {
        self.lock().unmount_message = msg.to_string();
    }

    /// Operation names in call order.
    pub fn ops(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(|(op, _)| *op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn requests(&self, op: &str) -> Vec<ProviderRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap()
    }

    fn enter(&self, op: &'static str, req: &ProviderRequest) -> Result<(), AgentError> {
        let mut state = self.lock();
        state.calls.push((op, req.clone()));
        match state.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn stored(&self, name: &str) -> ProviderResponse {
        match self.lock().volumes.get(name) {
            Some(vol) => ProviderResponse::ok(vol.clone()),
            None => ProviderResponse::error(format!("volume {name} not found")),
        }
    }
}

#[async_trait]
impl ProviderGateway for FakeProvider {
    async fn get(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("get", req)?;
        if let Some(vol) = self.lock().get_script.pop_front() {
            return Ok(ProviderResponse::ok(vol));
        }
        Ok(self.stored(&req.name))
    }

    async fn create(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("create", req)?;
        let mut vol = volume(&req.name, &format!("serial-{}", req.name));
        vol.status = req.opts.clone();
        self.insert(vol.clone());
        Ok(ProviderResponse::ok(vol))
    }

    async fn update(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("update", req)?;
        let mut state = self.lock();
        let Some(vol) = state.volumes.get_mut(&req.name) else {
            return Ok(ProviderResponse::error(format!("volume {} not found", req.name)));
        };
        for (key, value) in &req.opts {
            if value.is_null() {
                vol.status.remove(key);
            } else {
                vol.status.insert(key.clone(), value.clone());
            }
        }
        Ok(ProviderResponse::ok(vol.clone()))
    }

    /// Exports the volume to the requesting host's first iSCSI initiator.
    async fn mount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("mount", req)?;
        let mut state = self.lock();
        let Some(vol) = state.volumes.get_mut(&req.name) else {
            return Ok(ProviderResponse::error(format!("volume {} not found", req.name)));
        };
        let initiator = req
            .host
            .as_ref()
            .and_then(|h| h.initiators_for("iscsi").next().map(str::to_string));
        if let Some(initiator_name) = initiator {
            if !vol.iscsi_sessions.iter().any(|s| s.initiator_name == initiator_name) {
                vol.iscsi_sessions.push(IscsiSession {
                    initiator_name,
                    initiator_ip: String::new(),
                });
            }
        }
        vol.in_use = true;
        Ok(ProviderResponse::ok(vol.clone()))
    }

    async fn unmount(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("unmount", req)?;
        let mut state = self.lock();
        let message = state.unmount_message.clone();
        let Some(vol) = state.volumes.get_mut(&req.name) else {
            return Ok(ProviderResponse::error(format!("volume {} not found", req.name)));
        };
        if message.is_empty() {
            vol.iscsi_sessions.retain(|s| s.initiator_name != HOST_IQN);
            vol.in_use = !vol.iscsi_sessions.is_empty();
        }
        Ok(ProviderResponse {
            volume: Some(vol.clone()),
            err: String::new(),
            message,
        })
    }

    async fn remove(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("remove", req)?;
        self.lock().volumes.remove(&req.name);
        Ok(ProviderResponse::default())
    }

    async fn detach(&self, req: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.enter("detach", req)?;
        Ok(ProviderResponse::default())
    }
}

// ---------------------------------------------------------------------------
// Host device manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DeviceTable {
    mounts: Vec<Mount>,
    devices: HashMap<String, Device>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, AgentError>,
}

#[derive(Default)]
pub struct FakeDevices {
    state: Mutex<DeviceTable>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: &'static str, err: AgentError) {
        self.lock().failures.insert(op, err);
    }

    pub fn add_device(&self, serial: &str, state: DeviceState) -> Device {
        let device = device(serial, state);
        self.lock().devices.insert(serial.to_string(), device.clone());
        device
    }

    pub fn add_mount(&self, device: Device, mountpoint: impl Into<PathBuf>) {
        self.lock().mounts.push(Mount {
            mountpoint: mountpoint.into(),
            device,
        });
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.lock().mounts.clone()
    }

    pub fn has_device(&self, serial: &str) -> bool {
        self.lock().devices.contains_key(serial)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceTable> {
        self.state.lock().unwrap()
    }

    fn enter(&self, op: &'static str) -> Result<(), AgentError> {
        let mut state = self.lock();
        state.calls.push(op);
        match state.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn device(serial: &str, state: DeviceState) -> Device {
    Device {
        serial_number: serial.into(),
        mpath_name: format!("dm-{serial}"),
        path: format!("/dev/mapper/mpath-{serial}"),
        state,
    }
}

#[async_trait]
impl HostDeviceManager for FakeDevices {
    async fn get_mounts(&self, serial_number: &str) -> Result<Vec<Mount>, AgentError> {
        self.enter("get_mounts")?;
        Ok(self
            .lock()
            .mounts
            .iter()
            .filter(|m| m.device.serial_number == serial_number)
            .cloned()
            .collect())
    }

    async fn attach_device(&self, volumes: &[Volume]) -> Result<Vec<Device>, AgentError> {
        self.enter("attach_device")?;
        Ok(volumes
            .iter()
            .map(|v| self.add_device(&v.serial_number, DeviceState::Attached))
            .collect())
    }

    async fn attach_and_mount_device(
        &self,
        volume: &Volume,
        mountpoint: &Path,
    ) -> Result<Mount, AgentError> {
        self.enter("attach_and_mount_device")?;
        let device = self.add_device(&volume.serial_number, DeviceState::Mounted);
        self.add_mount(device.clone(), mountpoint);
        Ok(Mount {
            mountpoint: mountpoint.to_path_buf(),
            device,
        })
    }

    async fn mount_device(&self, device: &Device, mountpoint: &Path) -> Result<Mount, AgentError> {
        self.enter("mount_device")?;
        let mut device = device.clone();
        device.state = DeviceState::Mounted;
        self.add_mount(device.clone(), mountpoint);
        Ok(Mount {
            mountpoint: mountpoint.to_path_buf(),
            device,
        })
    }

    async fn setup_filesystem_and_permissions(
        &self,
        _device: &Device,
        _volume: &Volume,
        _fs_type: &str,
    ) -> Result<(), AgentError> {
        self.enter("setup_filesystem_and_permissions")
    }

    async fn unmount_device(&self, volume: &Volume) -> Result<(), AgentError> {
        self.enter("unmount_device")?;
        self.lock()
            .mounts
            .retain(|m| m.device.serial_number != volume.serial_number);
        Ok(())
    }

    async fn unmount_file_system(&self, mountpoint: &Path) -> Result<(), AgentError> {
        self.enter("unmount_file_system")?;
        self.lock().mounts.retain(|m| m.mountpoint != mountpoint);
        Ok(())
    }

    async fn offline_device(&self, _device: &Device) -> Result<(), AgentError> {
        self.enter("offline_device")
    }

    async fn delete_device(&self, device: &Device) -> Result<(), AgentError> {
        self.enter("delete_device")?;
        self.lock().devices.remove(&device.serial_number);
        Ok(())
    }

    async fn get_device_from_volume(&self, volume: &Volume) -> Result<Option<Device>, AgentError> {
        self.enter("get_device_from_volume")?;
        Ok(self.lock().devices.get(&volume.serial_number).cloned())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: VolumeOrchestrator,
    pub provider: Arc<FakeProvider>,
    pub devices: Arc<FakeDevices>,
    pub clock: Arc<ManualClock>,
    pub mount_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut AgentConfig)) -> Self {
        let mount_dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig {
            mount_dir: mount_dir.path().to_path_buf(),
            ..Default::default()
        };
        tweak(&mut config);

        let provider = FakeProvider::new();
        let devices = FakeDevices::new();
        let clock = Arc::new(ManualClock::new());
        let orchestrator = VolumeOrchestrator::with_clock(
            config,
            provider.clone(),
            devices.clone(),
            Arc::new(host()),
            clock.clone(),
        );
        Self {
            orchestrator,
            provider,
            devices,
            clock,
            mount_dir,
        }
    }

    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.mount_dir.path().join(name)
    }
}

pub fn opts(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
