use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber, reading the level from `LOGLEVEL`.
///
/// Falls back to `INFO` when the variable is unset or unparseable. Calling it more
/// than once is harmless.
pub fn setup_logger() {
    let log_level = env::var("LOGLEVEL").unwrap_or_else(|_| "INFO".to_string());
    setup_logger_with_level(&log_level);
}

/// Installs a global `tracing` subscriber with an explicit level name.
pub fn setup_logger_with_level(level: &str) {
    let level = parse_level(level);
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("Global tracing subscriber already installed");
        }
    });
}

fn parse_level(level: &str) -> Level {
    match level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("Trace"), Level::TRACE);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_setup_logger_is_idempotent() {
        setup_logger_with_level("DEBUG");
        setup_logger();
    }
}
