// canonguard/src/logger.rs
//! Logger setup for the CLI.

use env_logger::{Builder, Env};
use log::LevelFilter;

/// Initialises `env_logger`.
///
/// `RUST_LOG` is honoured when no explicit level is given; otherwise `level`
/// applies to every module. Safe to call more than once.
pub fn init_logger(level: Option<LevelFilter>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

/// Maps the global CLI flags onto a level override.
pub fn level_from_flags(debug: bool, quiet: bool) -> Option<LevelFilter> {
    if quiet {
        Some(LevelFilter::Error)
    } else if debug {
        Some(LevelFilter::Debug)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_wins_over_debug() {
        assert_eq!(level_from_flags(true, true), Some(LevelFilter::Error));
        assert_eq!(level_from_flags(true, false), Some(LevelFilter::Debug));
        assert_eq!(level_from_flags(false, false), None);
    }
}
