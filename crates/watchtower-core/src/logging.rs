//! Logger bootstrap for the watchtower binaries.

use env_logger::Env;

/// Initialise `env_logger` once with `default_level` unless `RUST_LOG` is set.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init();
}
