use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging to stderr, filtered by RUST_LOG (default `ans_etl=info`).
/// stdout stays free for rankings and summaries.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "ans_etl=debug" } else { "ans_etl=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer().compact().with_writer(std::io::stderr);

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
