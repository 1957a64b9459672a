//! Panic hook routing panics into the crash path

use std::panic;
use std::thread;

use crate::lifecycle::TelemetryEngine;
use paytrace_span::CrashDetails;

/// Report every panic through `engine` before running the previous hook.
///
/// The report blocks the panicking thread for at most the configured crash
/// budget. `report_crash` does not panic, so the hook cannot turn a panic
/// into an abort.
pub fn install_panic_hook(engine: TelemetryEngine) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };

        let mut details = CrashDetails::new(message);
        if let Some(location) = info.location() {
            details = details.with_symbol(
                "location",
                format!("{}:{}:{}", location.file(), location.line(), location.column()),
            );
        }
        if let Some(name) = thread::current().name() {
            details = details.with_symbol("thread", name);
        }

        let outcome = engine.report_crash(details);
        tracing::debug!(outcome = %outcome, "Panic reported");

        previous(info);
    }));
}
