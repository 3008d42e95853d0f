//! Agent error types.
//!
//! Hard failures are represented by [`AgentError`]. Best-effort steps that must
//! never override the primary outcome of a workflow return a [`SoftOutcome`]
//! instead, and rollbacks gather those into a [`TeardownReport`].

use thiserror::Error;
use tracing::warn;

/// Provider text that marks a concurrent filesystem creation on the same volume.
const BUSY_MOUNT: &str = "busy mount";

/// Unified error type for agent operations.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// Malformed request options, rejected before any side effect.
    #[error("{0}")]
    InvalidArgument(String),

    /// The provider answered with an in-band error; the text is passed through verbatim.
    #[error("{0}")]
    Provider(String),

    /// Another mount request is still creating the filesystem on this volume.
    #[error("another mount request creating filesystem on volume {0} is in progress, please retry later")]
    ProviderBusy(String),

    /// The host device manager failed.
    #[error("{0}")]
    Host(String),

    /// A volume, device or mount could not be resolved.
    #[error("{0} not found")]
    NotFound(String),

    /// Local state contradicts itself and needs an explicit remove.
    #[error("inconsistent state for volume {volume}: {reason}")]
    InconsistentState {
        /// Volume name.
        volume: String,
        /// What was found to be inconsistent.
        reason: String,
    },

    /// Configuration could not be loaded or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The provider could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Rollback itself failed after the primary action had already failed.
    #[error("{original}; rollback failed: {cause}")]
    Rollback {
        /// Error that triggered the rollback.
        original: Box<AgentError>,
        /// Why the rollback step failed.
        cause: String,
    },

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create a [`AgentError::Provider`] from anything that implements [`std::fmt::Display`].
    pub fn provider<E: std::fmt::Display>(e: E) -> Self {
        Self::Provider(e.to_string())
    }

    /// Create a [`AgentError::Host`] from anything that implements [`std::fmt::Display`].
    pub fn host<E: std::fmt::Display>(e: E) -> Self {
        Self::Host(e.to_string())
    }

    /// Create a [`AgentError::Transport`] from anything that implements [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`AgentError::Internal`] from anything that implements [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Whether the provider reported a concurrent filesystem creation.
    pub fn is_busy_mount(&self) -> bool {
        matches!(self, Self::Provider(msg) if msg.contains(BUSY_MOUNT))
    }

    /// Whether the error means the object is already gone.
    pub fn is_not_found(&self) -> bool {
        // Covers the device manager's "object was not found" reply as well.
        matches!(self, Self::NotFound(_)) || self.to_string().contains("not found")
    }

    /// Translate a provider busy-mount reply into the caller-facing message.
    pub(crate) fn clarify_busy(self, volume: &str) -> Self {
        if self.is_busy_mount() {
            Self::ProviderBusy(volume.to_string())
        } else {
            self
        }
    }
}

/// Result of a best-effort step. Failures are logged and kept for inspection but
/// are never escalated to the caller.
#[must_use]
#[derive(Debug, Clone)]
pub struct SoftOutcome {
    /// Name of the step, e.g. `"offline device"`.
    pub step: &'static str,
    /// The swallowed error, if the step failed.
    pub error: Option<AgentError>,
}

impl SoftOutcome {
    /// Wrap the result of a best-effort step, logging a failure at `warn`.
    pub fn best_effort<T>(step: &'static str, result: Result<T, AgentError>) -> Self {
        match result {
            Ok(_) => Self { step, error: None },
            Err(e) => {
                warn!(step, error = %e, "best-effort step failed, continuing");
                Self {
                    step,
                    error: Some(e),
                }
            }
        }
    }

    /// A step that did not need to run.
    pub fn skipped(step: &'static str) -> Self {
        Self { step, error: None }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered record of the soft outcomes of a teardown or rollback.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub outcomes: Vec<SoftOutcome>,
}

impl TeardownReport {
    pub fn push(&mut self, outcome: SoftOutcome) {
        self.outcomes.push(outcome);
    }

    /// Steps that failed and were swallowed.
    pub fn failures(&self) -> impl Iterator<Item = &SoftOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
