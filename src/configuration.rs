//! Config for the arena behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Unset or unparsable values fall back to the default.
//!
//! - `ARENA_ROOT` — Root directory of the store (default: `game_data`)
//! - `ARENA_INTERVAL_MS` — Pause between two tournament passes, in milliseconds (default: `1000`)
//! - `ARENA_ROLLING_N` — Games a rolling score is averaged over, and passes between two prunings (default: `100`)
//! - `ARENA_BATCH_SIZE` — Rooms played per school in each pass (default: `4`)
//! - `ARENA_TOURNAMENT_COMP` — Competition collecting the tournament games (default: `P00000000`)
//! - `ARENA_RUN_FACTOR` — Rooms per combination of bots in a competition run (default: `10`)
//! - `ARENA_SEED` — Seed for room sampling, for reproducible runs (default: random)
//! - `ARENA_LOG` — Set to `"true"` to enable logging to a file (default: `false`)
//! - `ARENA_FULL_RERANK` — Set to `"true"` to re-rank every bot from scratch on each pass instead of keeping rolling scores (default: `false`)

use std::{path::PathBuf, str::FromStr, time::Duration};

/// Token of the competition the continuous tournament links its games into.
pub const DEFAULT_TOURNAMENT_COMP: &str = "P00000000";

/// Configuration for arena behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) root: PathBuf,
    pub(crate) interval: Duration,
    pub(crate) rolling_n: u64,
    pub(crate) batch_size: usize,
    pub(crate) tournament_comp: String,
    pub(crate) run_factor: u64,
    pub(crate) seed: Option<u64>,
    pub(crate) log: bool,
    pub(crate) full_rerank: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The store lives in `game_data` in the current directory.
    /// - The tournament pauses one second between passes.
    /// - Rolling scores cover the last 100 games, and old games are pruned every 100 passes.
    /// - Each school plays 4 rooms per pass.
    /// - Tournament games are collected in competition `P00000000`.
    /// - Competition runs play 10 rooms per combination of bots.
    /// - Room sampling is seeded from entropy.
    /// - Logging to file is disabled.
    /// - Passes keep rolling scores.
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("game_data"),
            interval: Duration::from_secs(1),
            rolling_n: 100,
            batch_size: 4,
            tournament_comp: DEFAULT_TOURNAMENT_COMP.to_owned(),
            run_factor: 10,
            seed: None,
            log: false,
            full_rerank: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any unset or
    /// unparsable variable keeps the default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_parsed<T: FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let default = Self::new();
        Self {
            root: std::env::var_os("ARENA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.root),
            interval: get_env_parsed("ARENA_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.interval),
            rolling_n: get_env_parsed("ARENA_ROLLING_N").unwrap_or(default.rolling_n),
            batch_size: get_env_parsed("ARENA_BATCH_SIZE").unwrap_or(default.batch_size),
            tournament_comp: std::env::var("ARENA_TOURNAMENT_COMP")
                .unwrap_or(default.tournament_comp),
            run_factor: get_env_parsed("ARENA_RUN_FACTOR").unwrap_or(default.run_factor),
            seed: get_env_parsed("ARENA_SEED"),
            log: get_env_flag("ARENA_LOG", false),
            full_rerank: get_env_flag("ARENA_FULL_RERANK", false),
        }
    }

    /// Set the root directory of the store.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the pause between two tournament passes. Zero starts the next pass right away.
    pub fn with_interval(mut self, value: Duration) -> Self {
        self.interval = value;
        self
    }

    /// Set how many games rolling scores cover. This is also the number of passes between two
    /// prunings of old games. `0` disables both the rolling window and the pruning.
    pub fn with_rolling_n(mut self, value: u64) -> Self {
        self.rolling_n = value;
        self
    }

    /// Set how many rooms each school plays per pass.
    pub fn with_batch_size(mut self, value: usize) -> Self {
        self.batch_size = value;
        self
    }

    /// Set the competition collecting tournament games.
    pub fn with_tournament_comp(mut self, token: impl Into<String>) -> Self {
        self.tournament_comp = token.into();
        self
    }

    /// Set how many rooms a competition run plays per combination of bots.
    pub fn with_run_factor(mut self, value: u64) -> Self {
        self.run_factor = value;
        self
    }

    /// Seed room sampling, for reproducible runs.
    pub fn with_seed(mut self, value: Option<u64>) -> Self {
        self.seed = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Re-rank every bot from scratch on each pass.
    ///
    /// Each school then plays `run_factor * C(max(n, 4), 4)` rooms per pass, every bot's average
    /// score is computed over that pass only, and the tournament competition's games are replaced
    /// by the games of the pass.
    pub fn with_full_rerank(mut self, value: bool) -> Self {
        self.full_rerank = value;
        self
    }

    /// Root directory of the store.
    pub fn get_root(&self) -> &std::path::Path {
        &self.root
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_chain() {
        let config = Configuration::new()
            .with_root("/tmp/arena")
            .with_interval(Duration::ZERO)
            .with_rolling_n(2)
            .with_batch_size(3)
            .with_seed(Some(9));
        assert_eq!(config.root, PathBuf::from("/tmp/arena"));
        assert_eq!(config.interval, Duration::ZERO);
        assert_eq!(config.rolling_n, 2);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.tournament_comp, DEFAULT_TOURNAMENT_COMP);
        assert!(!config.log);
        assert!(!config.full_rerank);
        assert!(Configuration::new().with_full_rerank(true).full_rerank);
    }
}
