//! Tracing subscriber bootstrap.

use std::str::FromStr;

use tracing::Level;

/// Install a fmt subscriber at the given level (`"trace"` .. `"error"`).
///
/// Unknown levels fall back to `info`. Calling this after a subscriber is
/// already installed is a no-op.
pub fn init(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(%level, "tracing subscriber installed");
    }
}
