//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Crates whose events show up in test output at every level.
const TRACED_CRATES: &[&str] = &["blockflood", "blockflood_store"];

/// Routes logs of the blockflood crates into the captured output of the running test.
///
/// Events from other crates are dropped unless they are errors. `RUST_LOG`, when set, replaces
/// this filter entirely. Safe to call from every test; only the first call installs a subscriber.
///
/// ```
/// blockflood_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        TRACED_CRATES
            .iter()
            .filter_map(|name| format!("{name}=trace").parse().ok())
            .fold(EnvFilter::new("error"), EnvFilter::add_directive)
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
