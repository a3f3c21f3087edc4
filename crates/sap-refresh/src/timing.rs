//! Scoped runtime measurement of long automation steps.

use std::time::{Duration, Instant};

/// Run `f` and log how long it took.
pub fn timed<T>(what: &str, f: impl FnOnce() -> T) -> T {
    tracing::debug!("Running {what}");
    let start = Instant::now();
    let value = f();
    tracing::info!("Finished {what} in {}", format_elapsed(start.elapsed()));
    value
}

/// Seconds below a minute, minutes below an hour, hours above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.2} seconds")
    } else if secs < 3600.0 {
        format!("{:.1} minutes", secs / 60.0)
    } else {
        format!("{:.1} hours", secs / 3600.0)
    }
}
