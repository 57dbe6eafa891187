//! Tracing subscriber initialisation.
//!
//! JSON lines on stdout, filtered by `RUST_LOG` (falls back to `info`).

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Like [`init`], but with a caller-chosen filter for when `RUST_LOG` is
/// unset or unparsable.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init_with_default("debug");
        tracing::info!("still logging");
    }
}
