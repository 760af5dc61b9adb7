use shared::config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const NOISY_DEPENDENCIES: &str = "tokio_postgres=warn,hyper=warn,reqwest=warn,solana_client=warn,tungstenite=warn";

/// Install the global subscriber for the configured output format.
pub fn init(format: LogFormat) {
    match format {
        LogFormat::Json => init_logging(),
        LogFormat::Pretty => init_logging_pretty(),
    }
}

/// Initialize logging with structured output
pub fn init_logging() {
    // RUST_LOG wins over the default
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{}", NOISY_DEPENDENCIES)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Logging initialized");
}

/// Initialize logging with pretty output for development
pub fn init_logging_pretty() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("debug,{}", NOISY_DEPENDENCIES)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Logging initialized (pretty mode)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_init() {
        // Only checks that installing the subscriber does not panic
        init(LogFormat::Pretty);
    }
}
