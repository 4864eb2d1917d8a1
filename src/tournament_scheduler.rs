//! The continuous tournament.
//!
//! Each call to [`TournamentScheduler::run_pass`] walks every school: newly submitted code is
//! compiled, a batch of sampled rooms is played, scores are folded into the school's
//! [`SchoolLadder`] and every game is saved and linked into the shared tournament competition.
//! Every `rolling_n` passes (starting with the first one) the games that no longer count for any
//! rolling score are deleted.
//!
//! In full re-rank mode a pass instead scores every bot from scratch and swaps the tournament
//! competition's games for the games of the pass.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::{ensure, Context};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info, instrument, trace, warn};

use crate::bot::Bot;
use crate::competition::total_runs;
use crate::configuration::Configuration;
use crate::error::StoreError;
use crate::game_interface::{Compiler, GameEngine};
use crate::ladder::SchoolLadder;
use crate::online_mean::OnlineMean;
use crate::room::Room;
use crate::store::GameStore;

/// Name given to the tournament competition when it is created.
pub const TOURNAMENT_COMP_NAME: &str = "Tournament";

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Index of the pass, starting at 0.
    pub pass: u64,
    /// Games recorded, in play order.
    pub games: Vec<String>,
    /// Bots whose code could not be loaded, compiled or tracked.
    pub compile_failures: usize,
    /// Rooms dropped because the engine or the store failed.
    pub failed_rooms: usize,
    /// Games deleted by pruning, `None` if this pass did not prune. Re-rank passes never prune.
    pub pruned: Option<usize>,
}

/// True when `error` carries a store error that must stop the tournament.
pub(crate) fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_fatal)
}

/// Runs the tournament one pass at a time. See [`TournamentRunner`](crate::runner::TournamentRunner)
/// to run it in the background.
pub struct TournamentScheduler {
    store: Arc<GameStore>,
    compiler: Arc<dyn Compiler>,
    engine: Arc<dyn GameEngine>,
    rolling_n: u64,
    batch_size: usize,
    run_factor: u64,
    full_rerank: bool,
    tournament_comp: String,
    ladders: BTreeMap<String, SchoolLadder>,
    passes_run: u64,
    rng: StdRng,
}

impl TournamentScheduler {
    /// Create a scheduler, creating the tournament competition if needed.
    pub fn new(
        store: Arc<GameStore>,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn GameEngine>,
        config: &Configuration,
    ) -> anyhow::Result<Self> {
        store
            .ensure_competition(&config.tournament_comp, TOURNAMENT_COMP_NAME)
            .context("creating the tournament competition")?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            store,
            compiler,
            engine,
            rolling_n: config.rolling_n,
            batch_size: config.batch_size,
            run_factor: config.run_factor,
            full_rerank: config.full_rerank,
            tournament_comp: config.tournament_comp.clone(),
            ladders: BTreeMap::new(),
            passes_run: 0,
            rng,
        })
    }

    /// Number of passes completed.
    pub fn get_passes_run(&self) -> u64 {
        self.passes_run
    }

    /// Ranking of a school, once the school was seen by a pass.
    pub fn get_ladder(&self, school: &str) -> Option<&SchoolLadder> {
        self.ladders.get(school)
    }

    /// Run one pass over every school.
    ///
    /// In full re-rank mode (see [`Configuration::with_full_rerank`]) the pass is a
    /// [`run_rerank_pass`](Self::run_rerank_pass) instead.
    ///
    /// # Errors
    /// Failures of a single bot or room are logged and skipped. An error is returned only when
    /// the store cannot be walked at all, or for a [`StoreError::StorageInconsistency`].
    #[instrument(skip(self), fields(pass = self.passes_run))]
    pub fn run_pass(&mut self) -> anyhow::Result<PassReport> {
        if self.full_rerank {
            return self.run_rerank_pass();
        }
        let mut report = PassReport {
            pass: self.passes_run,
            ..PassReport::default()
        };
        let room_size = self.engine.players_per_room();
        for school in self.store.get_school_tokens().context("listing schools")? {
            self.ladders
                .entry(school.clone())
                .or_insert_with(|| SchoolLadder::new(school, room_size, self.rolling_n));
        }

        let Self {
            store,
            compiler,
            engine,
            tournament_comp,
            ladders,
            rng,
            batch_size,
            ..
        } = self;
        for ladder in ladders.values_mut() {
            report.compile_failures += refresh_roster(store, &**compiler, ladder)?;
            if ladder.is_empty() {
                debug!(school = ladder.get_school(), "no valid bots");
                continue;
            }
            for _ in 0..*batch_size {
                let played = (|| -> anyhow::Result<String> {
                    let room = ladder.next_room(|| Bot::filler(engine.filler_program()), &mut *rng);
                    trace!(%room, "playing");
                    let (game, scores) = play_room(store, &**engine, &room)?;
                    if let Err(e) = store.add_game_to_comp(tournament_comp, &game) {
                        // unlinked games are never pruned
                        if let Err(cleanup) = store.delete_game(&game) {
                            warn!(%game, "could not delete unlinked game: {cleanup}");
                        }
                        return Err(e.into());
                    }
                    let updated = ladder.record(&room, &scores);
                    ladder.save_scores(store, &updated)?;
                    Ok(game)
                })();
                match played {
                    Ok(game) => report.games.push(game),
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        warn!(school = ladder.get_school(), "room dropped: {e:#}");
                        report.failed_rooms += 1;
                    }
                }
            }
        }

        if self.rolling_n > 0 && self.passes_run % self.rolling_n == 0 {
            report.pruned = Some(self.prune_old_games()?);
        }
        self.passes_run += 1;
        info!(
            games = report.games.len(),
            failed_rooms = report.failed_rooms,
            compile_failures = report.compile_failures,
            "pass done"
        );
        Ok(report)
    }

    /// Rank every bot from scratch.
    ///
    /// Every school compiles all its members and plays `run_factor * C(max(n, 4), 4)` sampled
    /// rooms. Each bot that played gets the floored mean of this pass as average score, and the
    /// games of the pass replace the tournament competition's games, the previous ones being
    /// deleted. Rolling scores are left untouched.
    ///
    /// # Errors
    /// Same as [`run_pass`](Self::run_pass). Games recorded by a pass that fails are deleted.
    #[instrument(skip(self), fields(pass = self.passes_run))]
    pub fn run_rerank_pass(&mut self) -> anyhow::Result<PassReport> {
        let mut report = PassReport {
            pass: self.passes_run,
            ..PassReport::default()
        };
        if let Err(e) = self.rerank_schools(&mut report) {
            for game in &report.games {
                if let Err(cleanup) = self.store.delete_game(game) {
                    warn!(%game, "could not delete game of a failed pass: {cleanup}");
                }
            }
            return Err(e);
        }
        self.store
            .replace_games_in_comp(&self.tournament_comp, &report.games, true)
            .context("replacing tournament games")?;
        self.passes_run += 1;
        info!(
            games = report.games.len(),
            failed_rooms = report.failed_rooms,
            compile_failures = report.compile_failures,
            "re-rank pass done"
        );
        Ok(report)
    }

    fn rerank_schools(&mut self, report: &mut PassReport) -> anyhow::Result<()> {
        let room_size = self.engine.players_per_room();
        for school in self.store.get_school_tokens().context("listing schools")? {
            let mut pool = vec![];
            for user in self
                .store
                .get_tokens_for_school(&school)
                .with_context(|| format!("listing members of {school}"))?
            {
                match Bot::compile_active(&self.store, &*self.compiler, &user) {
                    Ok(Some(bot)) => pool.push(Arc::new(bot)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%user, %school, "couldn't compile code: {e:#}");
                        report.compile_failures += 1;
                    }
                }
            }
            if pool.is_empty() {
                debug!(%school, "no valid bots");
                continue;
            }

            let mut means: BTreeMap<String, OnlineMean> = pool
                .iter()
                .filter_map(|bot| bot.token.clone())
                .map(|token| (token, OnlineMean::new()))
                .collect();
            let runs = total_runs(pool.len(), self.run_factor);
            debug!(%school, runs, bots = pool.len(), "re-ranking school");
            for _ in 0..runs {
                let engine = &self.engine;
                let room = Room::sample(
                    &pool,
                    room_size,
                    || Bot::filler(engine.filler_program()),
                    &mut self.rng,
                );
                match play_room(&self.store, &*self.engine, &room) {
                    Ok((game, scores)) => {
                        for (seat, _, token) in room.players() {
                            if let Some(mean) = means.get_mut(token) {
                                mean.add(scores[seat]);
                            }
                        }
                        report.games.push(game);
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        warn!(%school, "room dropped: {e:#}");
                        report.failed_rooms += 1;
                    }
                }
            }

            for (user, mean) in &means {
                if mean.count() > 0 {
                    self.store
                        .save_avg_score(user, mean.floored_mean() as f64)
                        .with_context(|| format!("saving the score of {user}"))?;
                }
            }
        }
        Ok(())
    }

    /// Delete tournament games that no longer count: a game is kept while it is among the
    /// `rolling_n` newest tournament games of at least one of its players.
    ///
    /// Returns the number of deleted games.
    #[instrument(skip(self))]
    pub fn prune_old_games(&self) -> anyhow::Result<usize> {
        let store = &self.store;
        let shared: HashSet<String> = store
            .get_games_for_token(&self.tournament_comp)
            .context("listing tournament games")?
            .into_iter()
            .collect();
        let mut stale = shared.clone();
        let keep = usize::try_from(self.rolling_n).unwrap_or(usize::MAX);

        for school in store.get_school_tokens()? {
            for user in store.get_tokens_for_school(&school)? {
                if !store.is_user_token(&user) {
                    continue;
                }
                let mut games = store
                    .get_games_for_token(&user)?
                    .into_iter()
                    .filter(|g| shared.contains(g))
                    .collect::<Vec<_>>();
                if games.len() > keep {
                    // newest first, unreadable creation times count as oldest
                    let mut dated = games
                        .into_iter()
                        .map(|g| (store.get_game_ctime(&g).ok(), g))
                        .collect::<Vec<_>>();
                    dated.sort_by(|a, b| b.cmp(a));
                    games = dated.into_iter().take(keep).map(|(_, g)| g).collect();
                }
                for game in &games {
                    stale.remove(game);
                }
            }
        }

        let mut deleted = 0;
        for game in &stale {
            match store.delete_game(game) {
                Ok(()) => deleted += 1,
                Err(StoreError::UnknownGame(_)) => {}
                Err(e) => return Err(e).with_context(|| format!("deleting game {game}")),
            }
        }
        info!(deleted, kept = shared.len() - deleted, "old games pruned");
        Ok(deleted)
    }
}

/// Play `room` and record its game. Nothing is recorded when the engine fails or returns scores
/// that do not fit the room.
fn play_room(store: &GameStore, engine: &dyn GameEngine, room: &Room) -> anyhow::Result<(String, Vec<f64>)> {
    let simulation = engine
        .simulate(room)
        .with_context(|| format!("simulating {room}"))?;
    ensure!(
        simulation.scores.len() == room.bots.len(),
        "engine returned {} scores for {} seats",
        simulation.scores.len(),
        room.bots.len()
    );
    ensure!(
        simulation.scores.iter().all(|score| score.is_finite()),
        "engine returned non-finite scores {:?}",
        simulation.scores
    );
    let game = room.save(store, &simulation)?;
    Ok((game, simulation.scores))
}

/// Compile the bots of `ladder`'s school whose active code changed since the last pass.
///
/// Returns the number of bots that failed; they keep their previous program, if any, and are
/// retried on the next pass.
fn refresh_roster(
    store: &GameStore,
    compiler: &dyn Compiler,
    ladder: &mut SchoolLadder,
) -> anyhow::Result<usize> {
    let mut failures = 0;
    let members = store
        .get_tokens_for_school(ladder.get_school())
        .with_context(|| format!("listing members of {}", ladder.get_school()))?;
    for user in members {
        let active = match store.get_active_version(&user) {
            Ok(Some(active)) => active,
            Ok(None) => continue,
            Err(e) => {
                warn!(%user, "cannot read active version: {e}");
                failures += 1;
                continue;
            }
        };
        if ladder.get_code_version(&user) == Some(active.as_str()) {
            continue;
        }
        match Bot::compile_active(store, compiler, &user) {
            Ok(Some(bot)) => {
                if let Err(e) = ladder.add_bot(store, bot) {
                    if e.is_fatal() {
                        return Err(e.into());
                    }
                    warn!(%user, school = ladder.get_school(), "couldn't track bot: {e}");
                    failures += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%user, school = ladder.get_school(), "couldn't compile code: {e:#}");
                failures += 1;
            }
        }
    }
    Ok(failures)
}
