//! Log setup.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::Config;

/// Installs the global subscriber, logging to stderr so stdout stays free for the summary.
pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config.logging.level);
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Resolves the effective level and filter from `RUST_LOG`, falling back to `default`.
pub fn parse_rust_log(default: LevelFilter) -> (LevelFilter, EnvFilter) {
    log_filter(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), default)
}

/// A bare level in `rust_log` replaces `default` and keeps the per-crate directives below.
/// Anything else is taken as a complete filter and lets every event through to it.
fn log_filter(rust_log: Option<&str>, default: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match rust_log {
        None => default,
        Some(value) => match value.parse::<Level>() {
            Ok(level) => LevelFilter::from(level),
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
    };

    // Our own crates may log at any level, the HTTP stack only when something goes wrong.
    let env_filter = EnvFilter::new(
        "INFO,\
        hyper_util=WARN,\
        reqwest=WARN,\
        blockflood=TRACE,\
        blockflood_store=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_without_rust_log() {
        let (level, _) = log_filter(None, LevelFilter::WARN);
        assert_eq!(level, LevelFilter::WARN);
    }

    #[test]
    fn plain_level_overrides_default() {
        let (level, filter) = log_filter(Some("debug"), LevelFilter::INFO);
        assert_eq!(level, LevelFilter::DEBUG);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn directives_are_used_verbatim() {
        let (level, filter) = log_filter(Some("blockflood::upload=debug"), LevelFilter::INFO);
        assert_eq!(level, LevelFilter::TRACE);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
