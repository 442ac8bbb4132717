//! Tracing bootstrap for hosts that do not install their own subscriber.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,social_client=debug,social_core=info";

/// Install a global fmt subscriber. A subscriber that is already installed
/// is left in place.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `SOCIAL_CLIENT_LOG`
/// 3) `configured` (usually `ClientConfig::log_filter`)
/// 4) internal default filter
pub fn init(configured: Option<&str>) {
    let env_filter = resolve_filter(
        env::var("RUST_LOG").ok(),
        env::var("SOCIAL_CLIENT_LOG").ok(),
        configured,
    );
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn resolve_filter(
    rust_log: Option<String>,
    client_log: Option<String>,
    configured: Option<&str>,
) -> EnvFilter {
    let candidates = [rust_log, client_log, configured.map(str::to_owned)];
    for value in candidates.into_iter().flatten() {
        if !value.trim().is_empty()
            && let Ok(filter) = EnvFilter::try_new(&value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
