//! # Volagent
//!
//! Host-side volume agent. Volagent sits between a container runtime and a
//! remote block-storage provider: it asks the provider to create, export and
//! delete volumes, and drives the local host device manager to attach, format,
//! mount and release the matching block devices.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use volagent::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::load("/etc/volagent/volagent.toml")?;
//!     volagent::logging::init(&config.log_level);
//!
//!     // Provider connection is established on first use
//!     let provider = Arc::new(ProviderHandle::http(config.provider.clone()));
//!
//!     // Host identity is cached for `host.cache_ttl_secs`
//!     let ttl = std::time::Duration::from_secs(config.host.cache_ttl_secs);
//!     let hosts = Arc::new(HostCache::new(Arc::new(my_host_builder()), ttl));
//!
//!     let orchestrator = VolumeOrchestrator::new(config, provider, my_device_manager(), hosts);
//!
//!     let created = orchestrator
//!         .create(CreateRequest { name: "db-data".into(), ..Default::default() })
//!         .await;
//!     assert!(created.err.is_empty());
//!
//!     let mounted = orchestrator
//!         .mount(MountRequest { name: "db-data".into(), ..Default::default() })
//!         .await;
//!     println!("mounted at {}", mounted.mountpoint);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Core Components
//!
//! - [`orchestrator`]: mount, unmount, remove, create and query workflows
//! - [`conflict`]: waits for other hosts to release a volume
//! - [`stale`]: repairs leftover mounts before a new mount
//! - [`gate`]: per-volume serialization and admission control
//! - [`provider`]: remote provider gateway and its HTTP client
//! - [`host`]: host device manager and host context seams
//! - [`config`]: TOML configuration

#[macro_use]
extern crate log;

pub mod config;
pub mod conflict;
pub mod error;
pub mod gate;
pub mod host;
pub mod logging;
pub mod options;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod session;
pub mod stale;
pub mod types;

/// Commonly used types and traits for embedding the agent.
///
/// # Usage
///
/// ```rust,ignore
/// use volagent::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::AgentConfig;
    pub use crate::error::{AgentError, SoftOutcome, TeardownReport};
    pub use crate::host::{HostCache, HostContext, HostDeviceManager};
    pub use crate::orchestrator::VolumeOrchestrator;
    pub use crate::provider::{HttpProvider, ProviderGateway, ProviderHandle};

    pub use crate::types::{
        CapabilitiesResponse, CreateRequest, CreateResponse, Device, DriverResponse, Host, Mount,
        MountRequest, MountResponse, NameRequest, ProviderRequest, ProviderResponse, Volume,
        VolumeResponse,
    };
}

// Re-export key types at crate root for convenience
pub use config::AgentConfig;
pub use error::AgentError;
pub use orchestrator::VolumeOrchestrator;
