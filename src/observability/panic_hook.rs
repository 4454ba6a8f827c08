//! Panic reporting with scan context.
//!
//! The worker pool contains parser panics with `catch_unwind`, but the hook
//! still runs first. Installing this hook routes the report through `tracing`
//! together with the phase and file recorded by [`super::context`], then
//! hands off to whatever hook was installed before.

use super::context::current_context;
use std::panic::PanicHookInfo;

/// Install the context-aware panic hook, chaining the previous one.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        report(info);
        previous(info);
    }));
}

fn report(info: &PanicHookInfo<'_>) {
    let context = current_context();
    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    tracing::error!(
        message = %panic_message(info),
        %location,
        context = %context,
        "panic during scan"
    );
}

/// Extract the payload text of a panic.
pub fn panic_message(info: &PanicHookInfo<'_>) -> String {
    payload_message(info.payload())
}

pub(crate) fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
