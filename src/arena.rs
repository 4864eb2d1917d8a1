//! Entry point tying the store, the game and the configuration together.

use std::sync::Arc;

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, instrument, trace};

use crate::competition::{self, CompetitionReport};
use crate::configuration::Configuration;
use crate::game_interface::{Compiler, GameEngine};
use crate::logger::init_logger;
use crate::runner::TournamentRunner;
use crate::store::GameStore;
use crate::tournament_scheduler::{TournamentScheduler, TOURNAMENT_COMP_NAME};

/// Store, game and configuration of one arena.
///
/// # Example
///
/// ```no_run
/// # use bot_arena::prelude::*;
/// # fn demo(compiler: std::sync::Arc<dyn Compiler>, engine: std::sync::Arc<dyn GameEngine>) -> anyhow::Result<()> {
/// let arena = Arena::open(Configuration::from_env(), compiler, engine)?;
/// let school = arena.store().add_school("Lycée Pasteur")?;
/// let user = arena.store().add_user(&school)?;
/// arena.store().save_code(&user, "move left", &Options::new(), true)?;
///
/// let tournament = arena.start_tournament()?;
/// // ... serve requests ...
/// tournament.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct Arena {
    config: Configuration,
    store: Arc<GameStore>,
    compiler: Arc<dyn Compiler>,
    engine: Arc<dyn GameEngine>,
}

impl Arena {
    /// Open the store described by `config`, installing the file logger if enabled.
    #[instrument(skip_all)]
    pub fn open(
        config: Configuration,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn GameEngine>,
    ) -> anyhow::Result<Arena> {
        if config.log {
            let file = init_logger(&config.root.join("logs"))?;
            info!(?file, "logging to file");
        }
        trace!(?config);

        let store = GameStore::open(&config.root)
            .with_context(|| format!("opening store at {:?}", config.root))?;
        store.ensure_competition(&config.tournament_comp, TOURNAMENT_COMP_NAME)?;
        Ok(Arena {
            config,
            store: Arc::new(store),
            compiler,
            engine,
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<GameStore> {
        &self.store
    }

    /// Configuration the arena was opened with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// A scheduler for the continuous tournament, to drive pass by pass.
    pub fn scheduler(&self) -> anyhow::Result<TournamentScheduler> {
        TournamentScheduler::new(
            self.store.clone(),
            self.compiler.clone(),
            self.engine.clone(),
            &self.config,
        )
    }

    /// Start the continuous tournament in the background.
    pub fn start_tournament(&self) -> anyhow::Result<TournamentRunner> {
        TournamentRunner::spawn(self.scheduler()?, self.config.interval)
    }

    /// Run competition `comp` once. See [`competition::run_competition`].
    pub fn run_competition(&self, comp: &str, save_games: bool) -> anyhow::Result<CompetitionReport> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        competition::run_competition(
            &self.store,
            &*self.compiler,
            &*self.engine,
            comp,
            self.config.run_factor,
            save_games,
            &mut rng,
        )
    }
}
