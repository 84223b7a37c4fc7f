use tracing_subscriber::EnvFilter;

/// Set up tracing output for the CLI.
///
/// `RUST_LOG` wins when set; otherwise the `--log-level` flag applies
/// across the workspace. Step copies run on threads named
/// `<step>.<copy>`, so thread names are emitted to keep interleaved
/// pipeline logs attributable.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .init();
}
