pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{SyncError, SyncResult};
pub use crate::core::state::{SyncSettings, SyncState};
pub use crate::core::version::Version;

/// Initialize structured logging. `RUST_LOG` overrides the filter picked
/// from `verbose`: 0 = info for this crate and warnings elsewhere, 1 = debug
/// for this crate and info elsewhere, 2+ = debug everywhere.
pub fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn,asset_sync=info",
        1 => "info,asset_sync=debug",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}
