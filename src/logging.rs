use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn level_for_verbosity(verbosity_level: u8) -> LevelFilter {
    match verbosity_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Logs go to stderr so stdout stays free for the blind status output.
///
/// This method panics if a global subscriber was already set
pub fn setup_tracing(verbosity_level: u8, json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_for_verbosity(verbosity_level).into())
        .from_env_lossy();

    let stderr_layer = (!json).then(|| {
        fmt::Layer::default()
            .with_thread_names(true)
            .with_writer(std::io::stderr)
    });

    let json_layer = json.then(|| {
        fmt::Layer::default()
            .json()
            .with_thread_names(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(json_layer);

    tracing::subscriber::set_global_default(subscriber).expect("unable to set global subscriber");
}
