use chrono::Local;
use std::{
    backtrace::Backtrace,
    panic::{PanicHookInfo, take_hook},
    thread,
};

/// Installs a global panic hook that logs panics via `tracing` with a forced
/// backtrace, then defers to the previous hook.
///
/// Job attempts are wrapped in `catch_unwind`, so a panicking task unit does
/// not take down its worker; this hook makes sure the details still reach the
/// log file.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = format_panic_record(panic_info);
            tracing::error!(target: "vodvault::panic", "{panic_record}");
        }));

        previous_hook(panic_info);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_payload_to_string(panic_info.payload())
        .unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::force_capture();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

/// Extract the message from a panic payload (`&str` or `String`).
///
/// Also used by the job runtime to describe a panic caught from an attempt.
pub fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    payload.downcast_ref::<String>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_to_string() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(
            panic_payload_to_string(static_payload.as_ref()).as_deref(),
            Some("boom")
        );

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(
            panic_payload_to_string(owned.as_ref()).as_deref(),
            Some("owned boom")
        );

        let other: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert!(panic_payload_to_string(other.as_ref()).is_none());
    }
}
