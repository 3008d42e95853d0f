//! Conflict delay: wait, for a bounded time, while another host holds a volume.
//!
//! The wait is advisory. Whatever the outcome, the caller proceeds afterwards;
//! the poller only buys time for the other host to let go.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AgentError, SoftOutcome};
use crate::options::{OPT_DELETE_CONFLICT_DELAY, OPT_MOUNT_CONFLICT_DELAY};
use crate::poll::{poll_until, Clock, PollOutcome, Probe};
use crate::provider::ProviderGateway;
use crate::session::is_host_attached;
use crate::types::{Host, ProviderRequest};

/// Which workflow is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Mount,
    Delete,
}

impl ConflictKind {
    /// Provider option holding the per-volume delay for this kind.
    pub fn option_key(self) -> &'static str {
        match self {
            Self::Mount => OPT_MOUNT_CONFLICT_DELAY,
            Self::Delete => OPT_DELETE_CONFLICT_DELAY,
        }
    }
}

/// Why the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWait {
    /// Nobody holds the volume.
    Free,
    /// This host is already one of the volume's sessions.
    AttachedHere,
    /// The provider could not be asked; proceeding without waiting.
    Unreachable,
    /// The delay elapsed with the conflict still present.
    TimedOut,
}

pub struct ConflictPoller {
    provider: Arc<dyn ProviderGateway>,
    clock: Arc<dyn Clock>,
    tick: Duration,
}

impl ConflictPoller {
    pub fn new(provider: Arc<dyn ProviderGateway>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            provider,
            clock,
            tick,
        }
    }

    /// Block until the volume is free, attached to `host`, or `timeout` has
    /// elapsed. On timeout the remote delay marker is reset to 0 once, best
    /// effort.
    pub async fn wait_while_conflicted(
        &self,
        name: &str,
        host: &Host,
        kind: ConflictKind,
        timeout: Duration,
    ) -> ConflictWait {
        let settled = Mutex::new(ConflictWait::TimedOut);
        let settled = &settled;

        let outcome = poll_until(
            self.clock.as_ref(),
            self.tick,
            timeout,
            move || async move {
                match self.probe(name, host).await {
                    Ok(Some(reason)) => {
                        *settled.lock().unwrap_or_else(|e| e.into_inner()) = reason;
                        Probe::Ready
                    }
                    Ok(None) => Probe::Pending,
                    Err(e) => {
                        warn!(volume = name, error = %e, "conflict check failed, proceeding");
                        Probe::Abort
                    }
                }
            },
            move || async move {
                let _ = self.reset_marker(name, kind).await;
            },
        )
        .await;

        let result = match outcome {
            PollOutcome::Ready => *settled.lock().unwrap_or_else(|e| e.into_inner()),
            PollOutcome::Aborted => ConflictWait::Unreachable,
            PollOutcome::TimedOut => ConflictWait::TimedOut,
        };
        info!(volume = name, ?kind, ?result, "conflict wait finished");
        result
    }

    /// `Some(reason)` once it is safe to proceed, `None` while still conflicted.
    async fn probe(&self, name: &str, host: &Host) -> Result<Option<ConflictWait>, AgentError> {
        let volume = self
            .provider
            .get(&ProviderRequest::named(name))
            .await?
            .into_volume(name)?;

        if !volume.in_use {
            return Ok(Some(ConflictWait::Free));
        }
        if is_host_attached(&volume, host) {
            return Ok(Some(ConflictWait::AttachedHere));
        }
        debug!(volume = name, "volume in use by another host, waiting");
        Ok(None)
    }

    async fn reset_marker(&self, name: &str, kind: ConflictKind) -> SoftOutcome {
        let req = ProviderRequest::named(name).with_opt(kind.option_key(), 0);
        let result = match self.provider.update(&req).await {
            Ok(resp) => resp.check().map(|_| ()),
            Err(e) => Err(e),
        };
        SoftOutcome::best_effort("reset conflict delay", result)
    }
}
