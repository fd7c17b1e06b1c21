//! regraft library crate — re-exports for the CLI and integration tests.
//!
//! The primary interface is the `regraft` binary; this lib.rs exposes the
//! modules so integration tests can exercise the engines directly.

use anyhow::Result;

pub mod advisor;
pub mod config;
pub mod error;
pub mod git;
pub mod hook;
pub mod layout;
pub mod lifecycle;
pub mod pins;
pub mod push;
pub mod record;
pub mod replay;
pub mod resolution;
pub mod resolve;
pub mod save;
pub mod stage;
pub mod status;
pub mod telemetry;

/// Discover the outer repo from the working directory and load its config.
pub fn open_repo() -> Result<(layout::Layout, config::Config)> {
    let layout = layout::Layout::discover_cwd()?;
    let config = config::Config::load(&layout.config_path())?;
    Ok((layout, config))
}
