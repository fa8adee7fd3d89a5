use tracing_subscriber::{fmt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset: quiet dependencies, verbose
/// pipeline.
const DEFAULT_DIRECTIVES: &str = "info,tabletalk=debug";

/// Initializes tracing/logging based on environment variables.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}
