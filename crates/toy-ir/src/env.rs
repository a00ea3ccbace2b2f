use std::env;
use std::sync::OnceLock;

static TOYIR_MAX_ITERATIONS: OnceLock<Option<usize>> = OnceLock::new();
static TOYIR_FATAL_NON_CONVERGENCE: OnceLock<bool> = OnceLock::new();
static TOYIR_FIXED_POINT_ITERS: OnceLock<Option<usize>> = OnceLock::new();
static TOYIR_PASS_STATS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    }
}

fn parse_positive(name: &str, value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Some(parsed),
        _ => {
            tracing::warn!(var = name, value = %value, "ignoring invalid positive integer");
            None
        }
    }
}

fn read_usize(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    parse_positive(name, &value)
}

/// Worklist cap override for the greedy driver.
pub(crate) fn max_iterations() -> Option<usize> {
    *TOYIR_MAX_ITERATIONS.get_or_init(|| read_usize("TOYIR_MAX_ITERATIONS"))
}

pub(crate) fn fatal_non_convergence() -> bool {
    *TOYIR_FATAL_NON_CONVERGENCE.get_or_init(|| read_bool("TOYIR_FATAL_NON_CONVERGENCE"))
}

/// Round cap override for `FixedPoint` pipeline steps.
pub(crate) fn fixed_point_iters() -> Option<usize> {
    *TOYIR_FIXED_POINT_ITERS.get_or_init(|| read_usize("TOYIR_FIXED_POINT_ITERS"))
}

pub(crate) fn pass_stats_enabled() -> bool {
    *TOYIR_PASS_STATS.get_or_init(|| read_bool("TOYIR_PASS_STATS"))
}
