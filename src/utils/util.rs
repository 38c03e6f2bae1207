use signal_hook::low_level::signal_name;
use signal_hook::{consts::SIGINT, consts::SIGTERM, iterator::Signals};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Splits an authentication options string (`Key=Value;Key=Value`) into pairs.
///
/// Separators inside curly braces are not treated as delimiters, so values such as
/// `Scope={a;b}` survive intact. Leading and trailing whitespace is trimmed and empty
/// segments are skipped. A segment without `=` yields an empty value.
pub fn parse_options(input: &str) -> Vec<(&str, &str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut depth = 0i32;

    for (i, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ';' if depth <= 0 => {
                let slice = input[start..i].trim();
                if !slice.is_empty() {
                    segments.push(slice);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    if start < input.len() {
        let slice = input[start..].trim();
        if !slice.is_empty() {
            segments.push(slice);
        }
    }

    segments
        .into_iter()
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (segment, ""),
        })
        .collect()
}

/// Looks up a single key in an authentication options string.
pub fn option_value<'a>(input: &'a str, key: &str) -> Option<&'a str> {
    parse_options(input)
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Runs application code, turning a panic into an error carrying its message.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

/// Sets up a signal hook for SIGINT and SIGTERM.
///
/// A background task waits for the first signal, logs its name and notifies
/// `shutdown_signal` so the owner can stop its session in order.
///
/// # Errors
///
/// Returns the I/O error raised when the signal iterator cannot be registered.
pub async fn setup_signal_hook(shutdown_signal: Arc<Notify>) -> std::io::Result<()> {
    let signals = &[SIGINT, SIGTERM];
    let mut signals_iterator = Signals::new(signals)?;

    tokio::task::spawn_blocking(move || {
        if let Some(signal) = signals_iterator.forever().next() {
            info!(
                "Received signal: {}",
                signal_name(signal).unwrap_or("UNKNOWN")
            );
            shutdown_signal.notify_one();
        }
    });
    Ok(())
}
