use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

/// Install color-eyre for binaries. Later calls are ignored.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Filter used when `RUST_LOG` is unset.
///
/// Database drivers stay quiet; the processor and domain crates log at the
/// environment's base level.
pub fn default_filter(environment: &Environment) -> &'static str {
    if environment.is_production() {
        "info,sea_orm=warn,sqlx=warn,redis=warn"
    } else {
        "debug,sea_orm=info,sqlx=warn,redis=info,hyper=info"
    }
}

/// Initialize the global subscriber.
///
/// Production writes flattened JSON lines; everything else writes pretty output.
/// `tracing_error::ErrorLayer` is installed in both so eyre reports carry span traces.
/// Returns `false` when a subscriber was already set (tests call this repeatedly).
pub fn init_tracing(environment: &Environment) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));

    let output = if environment.is_production() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .pretty()
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(output)
        .with(tracing_error::ErrorLayer::default())
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        info!(environment = ?environment, "Tracing initialized");
    } else {
        debug!("Tracing already initialized");
    }
    installed
}
