//! Concurrency resolution
//!
//! Turns the configured `max_concurrency` into the number of transcoder processes a run may
//! keep alive at once.

use crate::config::Config;

/// Upper bound on the derived value
const MAX_DERIVED: usize = 8;

/// Resolve the scheduler's concurrency limit.
///
/// - An explicit non-zero `max_concurrency` is used unchanged
/// - 0 derives a value from the logical core count via num_cpus
pub fn resolve_max_concurrency(cfg: &Config) -> usize {
    resolve_with_cores(cfg.scheduler.max_concurrency as usize, num_cpus::get())
}

fn resolve_with_cores(configured: usize, cores: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        derive_from_cores(cores)
    }
}

/// x264 already spreads one encode over several threads, so a quarter of the cores is
/// enough processes to keep the machine busy.
fn derive_from_cores(cores: usize) -> usize {
    (cores / 4).clamp(1, MAX_DERIVED)
}
