use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Setup logging of events reported by the warm-up.
///
/// Use the RUST_LOG environment variable to override the defaults, which
/// only show warnings and errors.
///
/// E.g. To see the counters at the end of a run:
///   RUST_LOG=dns_warm=DEBUG
///
/// Or to follow every single query:
///   RUST_LOG=dns_warm::udp=TRACE
///
/// Everything is written to stderr so that the summary on stdout stays
/// clean.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .try_init()
        .ok();
}
