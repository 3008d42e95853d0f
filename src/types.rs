//! Core data model: volumes, devices, mounts, host identity, and the typed
//! request/response records exchanged with the container runtime.
//!
//! Volumes are owned by the provider and devices/mounts by the host device
//! manager; the agent only holds transient copies during a workflow.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

// ---------------------------------------------------------------------------
// Status markers
// ---------------------------------------------------------------------------

/// Status-map key marking a volume whose filesystem is created on first mount.
pub const STATUS_DELAYED_CREATE: &str = "delayedCreate";
/// Status-map key carrying the filesystem type for a delayed create.
pub const STATUS_FILESYSTEM: &str = "filesystem";
/// Status-map key mirroring the provider's in-use flag.
pub const STATUS_IN_USE: &str = "inUse";

/// Provider message meaning other containers still hold the volume.
pub const MSG_DO_NOT_UNMOUNT: &str = "donotunmount";

/// Connection mode forced on volumes mounted through the runtime.
pub const CONNECTION_MODE_MANUAL: &str = "manual";

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// Block access protocol of a volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessProtocol {
    #[default]
    Iscsi,
    Fc,
}

/// Whether the target behind a volume is exclusive or shared.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    /// One target per volume (iSCSI VST).
    #[default]
    Volume,
    /// Group-scoped target shared by many volumes.
    Group,
}

/// An active iSCSI connection to the volume's target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IscsiSession {
    pub initiator_name: String,
    #[serde(default)]
    pub initiator_ip: String,
}

/// An active Fibre Channel connection to the volume's target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FcSession {
    /// Initiator WWPN, possibly `:`-separated.
    pub initiator_wwpn: String,
}

/// Provider view of a block volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub in_use: bool,
    #[serde(default)]
    pub access_protocol: AccessProtocol,
    #[serde(default)]
    pub iscsi_sessions: Vec<IscsiSession>,
    #[serde(default)]
    pub fc_sessions: Vec<FcSession>,
    #[serde(default)]
    pub target_scope: TargetScope,
    /// Free-form, eventually consistent workflow markers.
    #[serde(default)]
    pub status: HashMap<String, Value>,
    /// Set to `"manual"` before handing the volume to the device manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_mode: Option<String>,
    /// Remove the volume once the last host detaches.
    #[serde(default)]
    pub destroy_on_detach: bool,
}

impl Volume {
    /// Whether the device must be explicitly released by every host (FC or group scope).
    pub fn is_shared_target(&self) -> bool {
        self.access_protocol == AccessProtocol::Fc || self.target_scope == TargetScope::Group
    }

    pub fn is_group_scoped(&self) -> bool {
        self.target_scope == TargetScope::Group
    }

    /// Filesystem type to create on first mount, if the volume carries a
    /// `delayedCreate` marker together with a filesystem.
    pub fn delayed_create_filesystem(&self) -> Option<&str> {
        if !self.has_delayed_create() {
            return None;
        }
        self.status
            .get(STATUS_FILESYSTEM)
            .and_then(Value::as_str)
            .filter(|fs| !fs.is_empty())
    }

    /// Whether any `delayedCreate` marker is present, regardless of its value type.
    pub fn has_delayed_create(&self) -> bool {
        match self.status.get(STATUS_DELAYED_CREATE) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty() && s != "false",
            Some(_) => true,
        }
    }

    /// In-use as recorded in the status map, falling back to the flag.
    pub fn status_in_use(&self) -> bool {
        match self.status.get(STATUS_IN_USE) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => self.in_use,
        }
    }
}

// ---------------------------------------------------------------------------
// Device & mount
// ---------------------------------------------------------------------------

/// Lifecycle state of a local device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Attached,
    Mounted,
    Offline,
    Failed,
    LunIdConflict,
    Deleted,
}

impl DeviceState {
    /// Whether an existing mount on a device in this state can be reused.
    pub fn is_healthy(self) -> bool {
        !matches!(self, Self::Failed | Self::LunIdConflict)
    }
}

/// Local handle to an attached volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial_number: String,
    /// Multipath name, e.g. `dm-3`.
    #[serde(default)]
    pub mpath_name: String,
    /// Full device path, e.g. `/dev/mapper/mpathb`.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub state: DeviceState,
}

/// Host mount-table entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub mountpoint: PathBuf,
    pub device: Device,
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Initiators of one protocol (`"iscsi"` or `"fc"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    pub access_protocol: String,
    pub init: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    /// IPv4 address without mask.
    #[serde(default)]
    pub address_v4: String,
    #[serde(default)]
    pub mask_v4: String,
}

/// This node's identity, supplied by the host context builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub uuid: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub initiators: Vec<Initiator>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Host {
    /// Trimmed initiator identifiers for the given protocol.
    pub fn initiators_for<'a>(&'a self, protocol: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.initiators
            .iter()
            .filter(move |i| i.access_protocol.eq_ignore_ascii_case(protocol))
            .flat_map(|i| i.init.iter().map(|s| s.trim()))
    }

    pub fn has_initiators(&self) -> bool {
        self.initiators.iter().any(|i| !i.init.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Provider requests / responses
// ---------------------------------------------------------------------------

/// Request forwarded to the provider gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub name: String,
    #[serde(default)]
    pub opts: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub scope: String,
}

impl ProviderRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_opt(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.opts.insert(key.to_string(), value.into());
        self
    }
}

/// Reply from the provider gateway. Errors travel in-band in `err`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    #[serde(default)]
    pub volume: Option<Volume>,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub message: String,
}

impl ProviderResponse {
    pub fn ok(volume: Volume) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn error(err: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            ..Default::default()
        }
    }

    /// Whether other containers still hold the volume.
    pub fn is_do_not_unmount(&self) -> bool {
        self.message == MSG_DO_NOT_UNMOUNT
    }

    /// Turn the in-band error into an [`AgentError::Provider`].
    pub fn check(self) -> Result<Self, AgentError> {
        if self.err.is_empty() {
            Ok(self)
        } else {
            Err(AgentError::Provider(self.err))
        }
    }

    /// Like [`Self::check`], additionally requiring a volume in the reply.
    pub fn into_volume(self, name: &str) -> Result<Volume, AgentError> {
        self.check()?
            .volume
            .ok_or_else(|| AgentError::NotFound(format!("volume {name}")))
    }
}

// ---------------------------------------------------------------------------
// Runtime requests
// ---------------------------------------------------------------------------

/// Mount or unmount request decoded by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    #[serde(default, rename = "ID")]
    pub id: String,
    /// Extra options such as `initiators` for cloud mode.
    #[serde(default)]
    pub opts: HashMap<String, Value>,
}

/// Create request decoded by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub opts: HashMap<String, Value>,
}

/// Request carrying only a volume name (remove, get, path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Runtime responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    pub mountpoint: String,
    pub err: String,
}

impl MountResponse {
    pub fn mounted(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into().to_string_lossy().into_owned(),
            err: String::new(),
        }
    }

    pub fn failed(err: &AgentError) -> Self {
        Self {
            mountpoint: String::new(),
            err: err.to_string(),
        }
    }
}

/// Volume as reported back to the runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub status: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeResponse {
    pub volume: Option<VolumeInfo>,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResponse {
    pub err: String,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DriverResponse {
    pub err: String,
}

impl DriverResponse {
    pub fn from_result<T>(result: Result<T, AgentError>) -> Self {
        Self {
            err: result.err().map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Capability,
}

// ---------------------------------------------------------------------------
// Operation classes
// ---------------------------------------------------------------------------

/// Workflow kind, used for admission control and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    Mount,
    Unmount,
    Remove,
    Create,
    Get,
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Remove => "remove",
            Self::Create => "create",
            Self::Get => "get",
        };
        f.write_str(s)
    }
}
