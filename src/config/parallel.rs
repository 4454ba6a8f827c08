//! Scan concurrency limits.
//!
//! Framework parsers mostly read cached semantic data, so a scan does not
//! need every core. The automatic limit is a quarter of the hardware
//! concurrency, never less than one thread.

/// Returns the number of available CPU cores.
pub fn hardware_concurrency() -> usize {
    num_cpus::get().max(1)
}

/// Resolve a configured thread limit (0 = automatic).
pub fn effective_thread_limit(configured: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        automatic_limit(hardware_concurrency())
    }
}

fn automatic_limit(cores: usize) -> usize {
    (cores / 4).max(1)
}
