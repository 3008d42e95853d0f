//! Typed volume options.
//!
//! The runtime hands us an untyped key/value bag. Known keys are lifted into
//! named fields; everything else is kept in [`VolumeOptions::extra`] and passed
//! through to the provider untouched.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

use crate::error::AgentError;

pub const OPT_FILESYSTEM: &str = "filesystem";
pub const OPT_FS_MODE: &str = "fsMode";
pub const OPT_FS_OWNER: &str = "fsOwner";
pub const OPT_INITIATORS: &str = "initiators";
pub const OPT_DELAYED_CREATE: &str = "delayedCreate";
pub const OPT_MOUNT_CONFLICT_DELAY: &str = "mountConflictDelay";
pub const OPT_DELETE_CONFLICT_DELAY: &str = "deleteConflictDelay";
pub const OPT_CLONE_OF: &str = "cloneOf";
pub const OPT_IMPORT_VOL: &str = "importVol";
pub const OPT_HELP: &str = "help";

/// Filesystem used when nothing else is configured.
pub const DEFAULT_FILESYSTEM: &str = "xfs";

/// Upper bound for `mountConflictDelay` / `deleteConflictDelay`, in seconds.
pub const MAX_CONFLICT_DELAY_SECS: u64 = 86_400;

const SUPPORTED_FILESYSTEMS: &[&str] = &["xfs", "ext2", "ext3", "ext4", "btrfs"];

static FS_MODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-7]{1,4}$").expect("fsMode pattern compiles"));
static FS_OWNER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+:[0-9]+$").expect("fsOwner pattern compiles"));

/// Help text returned for a create request carrying the `help` option.
pub const HELP_TEXT: &str = "\
Volume options:
  -o filesystem=<xfs|ext2|ext3|ext4|btrfs>  filesystem created on the volume (default xfs)
  -o fsMode=<octal>                         permissions of the filesystem root, e.g. 0755
  -o fsOwner=<uid>:<gid>                    owner of the filesystem root
  -o cloneOf=<volume>                       create the volume as a clone of another volume
  -o importVol=<volume>                     import an existing provider volume
  -o mountConflictDelay=<seconds>           wait for other hosts to release before mounting
  -o deleteConflictDelay=<seconds>          wait for other hosts to release before removing
  -o initiators=<iface,...>                 network interfaces used in cloud mode";

/// Options of a volume request with the known keys typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeOptions {
    pub filesystem: Option<String>,
    pub fs_mode: Option<String>,
    pub fs_owner: Option<String>,
    pub initiators: Option<Vec<String>>,
    pub delayed_create: Option<bool>,
    pub mount_conflict_delay: Option<u64>,
    pub delete_conflict_delay: Option<u64>,
    pub clone_of: Option<String>,
    pub import_vol: Option<String>,
    pub help: bool,
    /// Unrecognised keys, forwarded verbatim.
    pub extra: HashMap<String, Value>,
}

impl VolumeOptions {
    /// Lift known keys out of an untyped option map.
    pub fn from_map(map: HashMap<String, Value>) -> Result<Self, AgentError> {
        let mut opts = Self::default();
        for (key, value) in map {
            match key.as_str() {
                OPT_FILESYSTEM => opts.filesystem = as_string(&key, &value)?,
                OPT_FS_MODE => opts.fs_mode = as_string(&key, &value)?,
                OPT_FS_OWNER => opts.fs_owner = as_string(&key, &value)?,
                OPT_INITIATORS => opts.initiators = as_list(&key, &value)?,
                OPT_DELAYED_CREATE => opts.delayed_create = as_bool(&key, &value)?,
                OPT_MOUNT_CONFLICT_DELAY => opts.mount_conflict_delay = as_delay(&key, &value)?,
                OPT_DELETE_CONFLICT_DELAY => opts.delete_conflict_delay = as_delay(&key, &value)?,
                OPT_CLONE_OF => opts.clone_of = as_string(&key, &value)?,
                OPT_IMPORT_VOL => opts.import_vol = as_string(&key, &value)?,
                // `-o help` arrives with an empty value
                OPT_HELP => opts.help = !matches!(value, Value::Bool(false)),
                _ => {
                    opts.extra.insert(key, value);
                }
            }
        }
        Ok(opts)
    }

    /// Merge option layers, later layers overriding earlier ones.
    pub fn layered(
        global: &HashMap<String, Value>,
        driver: &HashMap<String, Value>,
        request: HashMap<String, Value>,
    ) -> Result<Self, AgentError> {
        let mut merged = global.clone();
        merged.extend(driver.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(request);
        Self::from_map(merged)
    }

    /// Check option syntax before any side effect happens.
    pub fn validate(&self) -> Result<(), AgentError> {
        if let Some(fs) = &self.filesystem {
            if !SUPPORTED_FILESYSTEMS.contains(&fs.as_str()) {
                return Err(AgentError::InvalidArgument(format!(
                    "invalid filesystem {fs}, supported filesystems are {}",
                    SUPPORTED_FILESYSTEMS.join(", ")
                )));
            }
        }
        if let Some(mode) = &self.fs_mode {
            if !FS_MODE_RE.is_match(mode) {
                return Err(AgentError::InvalidArgument(format!(
                    "invalid fsMode {mode}, expected an octal mode such as 0755"
                )));
            }
        }
        if let Some(owner) = &self.fs_owner {
            if !FS_OWNER_RE.is_match(owner) {
                return Err(AgentError::InvalidArgument(format!(
                    "invalid fsOwner {owner}, expected <uid>:<gid>"
                )));
            }
        }
        Ok(())
    }

    pub fn is_clone_or_import(&self) -> bool {
        self.clone_of.is_some() || self.import_vol.is_some()
    }

    /// Drop keys that only steer the agent and must not reach the provider.
    pub fn strip_private(&mut self) {
        self.help = false;
        self.initiators = None;
    }

    /// Flatten back into the untyped map the provider expects.
    pub fn into_map(self) -> HashMap<String, Value> {
        let mut map = self.extra;
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v);
            }
        };
        put(OPT_FILESYSTEM, self.filesystem.map(Value::from));
        put(OPT_FS_MODE, self.fs_mode.map(Value::from));
        put(OPT_FS_OWNER, self.fs_owner.map(Value::from));
        put(OPT_INITIATORS, self.initiators.map(Value::from));
        put(OPT_DELAYED_CREATE, self.delayed_create.map(Value::from));
        put(OPT_MOUNT_CONFLICT_DELAY, self.mount_conflict_delay.map(Value::from));
        put(OPT_DELETE_CONFLICT_DELAY, self.delete_conflict_delay.map(Value::from));
        put(OPT_CLONE_OF, self.clone_of.map(Value::from));
        put(OPT_IMPORT_VOL, self.import_vol.map(Value::from));
        if self.help {
            put(OPT_HELP, Some(Value::Bool(true)));
        }
        map
    }
}

fn invalid(key: &str, value: &Value, expected: &str) -> AgentError {
    AgentError::InvalidArgument(format!("invalid value {value} for option {key}, expected {expected}"))
}

fn as_string(key: &str, value: &Value) -> Result<Option<String>, AgentError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(invalid(key, other, "a string")),
    }
}

fn as_u64(key: &str, value: &Value) -> Result<Option<u64>, AgentError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(key, value, "a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, value, "a non-negative integer")),
        other => Err(invalid(key, other, "a non-negative integer")),
    }
}

fn as_delay(key: &str, value: &Value) -> Result<Option<u64>, AgentError> {
    match as_u64(key, value)? {
        Some(secs) if secs > MAX_CONFLICT_DELAY_SECS => Err(invalid(
            key,
            value,
            &format!("at most {MAX_CONFLICT_DELAY_SECS} seconds"),
        )),
        secs => Ok(secs),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<Option<bool>, AgentError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) => match s.trim() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(invalid(key, value, "true or false")),
        },
        other => Err(invalid(key, other, "true or false")),
    }
}

fn as_list(key: &str, value: &Value) -> Result<Option<Vec<String>>, AgentError> {
    let items: Vec<String> = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| invalid(key, value, "a list of strings"))
            })
            .collect::<Result<_, _>>()?,
        other => return Err(invalid(key, other, "a list of strings")),
    };
    let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
    Ok((!items.is_empty()).then_some(items))
}
