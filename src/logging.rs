use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise the `-v` count picks the level
/// (none: info, one: debug, more: trace).
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
