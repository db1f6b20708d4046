//! Process-wide placeholder names.
//!
//! Every predicate draws its parameter names from one monotonically
//! increasing counter, so two predicates rendered in the same request can
//! never shadow each other's values even when selector and operator match.

use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix for generated parameter names.
pub const PARAM_PREFIX: &str = "qp";

static PARAM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Next unique parameter name (without the leading colon).
pub fn next_param_name() -> String {
    let n = PARAM_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{PARAM_PREFIX}{n}")
}
