//! One-shot competition between schools.
//!
//! Each enrolled school is represented by its best ranked bot that still compiles. The bots play
//! `run_factor * C(max(n, 4), 4)` sampled rooms and each school is credited with the mean score of
//! its bot.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Context;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::bot::Bot;
use crate::game_interface::{Compiler, GameEngine};
use crate::online_mean::OnlineMean;
use crate::room::Room;
use crate::store::GameStore;

/// Outcome of a competition run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompetitionReport {
    /// Score credited to each school that had a valid bot, rounded to two decimals.
    pub scores: BTreeMap<String, f64>,
    /// Rooms played, including failed ones.
    pub rooms: u64,
    /// Rooms dropped because the engine or the store failed.
    pub failed_rooms: u64,
    /// Games recorded, empty unless games were saved.
    pub games: Vec<String>,
}

/// Binomial coefficient `C(n, k)`, saturating at `u64::MAX`.
pub fn choose(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    // every prefix product of n(n-1)... is divisible by i!, so the division is exact
    (0..k)
        .try_fold(1u128, |acc, i| {
            acc.checked_mul(u128::from(n - i))
                .map(|product| product / u128::from(i + 1))
        })
        .and_then(|c| u64::try_from(c).ok())
        .unwrap_or(u64::MAX)
}

/// Rooms a competition between `bots` bots plays.
pub fn total_runs(bots: usize, run_factor: u64) -> u64 {
    run_factor.saturating_mul(choose(bots.max(4) as u64, 4))
}

/// Best bot of `school`: the highest averaged score among its members whose code compiles.
fn best_bot(store: &GameStore, compiler: &dyn Compiler, school: &str) -> anyhow::Result<Option<Bot>> {
    let mut best: Option<(f64, Bot)> = None;
    for user in store.get_tokens_for_school(school)? {
        let score = store.get_avg_score(&user)?.unwrap_or(f64::NEG_INFINITY);
        if best.as_ref().is_some_and(|(best_score, _)| score <= *best_score) {
            continue;
        }
        match Bot::compile_active(store, compiler, &user) {
            Ok(Some(bot)) => best = Some((score, bot)),
            Ok(None) => {}
            Err(e) => warn!(%user, school, "couldn't compile code: {e:#}"),
        }
    }
    Ok(best.map(|(_, bot)| bot))
}

/// Run a competition and record each school's score and winning code.
///
/// With `save_games`, every game played is recorded and the competition's game set is replaced
/// by the new games, the previous ones being deleted.
///
/// # Errors
/// Returned when the store cannot be read or written. Rooms the engine fails to play are
/// skipped.
#[instrument(skip(store, compiler, engine, rng))]
pub fn run_competition<R: Rng + ?Sized>(
    store: &GameStore,
    compiler: &dyn Compiler,
    engine: &dyn GameEngine,
    comp: &str,
    run_factor: u64,
    save_games: bool,
    rng: &mut R,
) -> anyhow::Result<CompetitionReport> {
    let mut report = CompetitionReport::default();
    let mut contestants = BTreeMap::new();
    for school in store.get_schools_in_comp(comp)? {
        match best_bot(store, compiler, &school)? {
            Some(bot) => {
                debug!(%school, %bot, "school representative");
                contestants.insert(school, bot);
            }
            None => debug!(%school, "no valid bot"),
        }
    }
    if contestants.is_empty() {
        info!("no school has a valid bot");
        return Ok(report);
    }

    // user token -> (school, mean)
    let mut means: BTreeMap<String, (String, OnlineMean)> = BTreeMap::new();
    let mut pool = vec![];
    for (school, bot) in contestants {
        if let Some(token) = bot.token.clone() {
            means.insert(token, (school, OnlineMean::new()));
        }
        pool.push(Arc::new(bot));
    }

    let runs = total_runs(pool.len(), run_factor);
    info!(runs, bots = pool.len(), "running competition");
    for _ in 0..runs {
        report.rooms += 1;
        let room = Room::sample(
            &pool,
            engine.players_per_room(),
            || Bot::filler(engine.filler_program()),
            &mut *rng,
        );
        let simulation = match engine.simulate(&room) {
            Ok(simulation)
                if simulation.scores.len() == room.bots.len()
                    && simulation.scores.iter().all(|s| s.is_finite()) =>
            {
                simulation
            }
            Ok(simulation) => {
                warn!(%room, scores = ?simulation.scores, "engine returned invalid scores");
                report.failed_rooms += 1;
                continue;
            }
            Err(e) => {
                warn!(%room, "room dropped: {e:#}");
                report.failed_rooms += 1;
                continue;
            }
        };
        for (seat, _, token) in room.players() {
            if let Some((_, mean)) = means.get_mut(token) {
                mean.add(simulation.scores[seat]);
            }
        }
        if save_games {
            match room.save(store, &simulation) {
                Ok(game) => report.games.push(game),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(%room, "game not recorded: {e}");
                }
            }
        }
    }

    if save_games {
        store
            .replace_games_in_comp(comp, &report.games, true)
            .with_context(|| format!("replacing games of {comp}"))?;
    }

    for bot in &pool {
        let Some(token) = bot.token.as_deref() else {
            continue;
        };
        let Some((school, mean)) = means.get(token) else {
            continue;
        };
        let score = mean.rounded_mean(2);
        store.set_comp_avg_score(comp, school, score)?;
        if let Some(version) = bot.code_version.as_deref() {
            if let Some(code) = store.get_code_version(token, version)? {
                store.set_comp_school_code(comp, school, &code.code)?;
            }
        }
        info!(%school, score, "school scored");
        report.scores.insert(school.clone(), score);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binomial_coefficients() {
        assert_eq!(choose(4, 4), 1);
        assert_eq!(choose(5, 4), 5);
        assert_eq!(choose(10, 4), 210);
        assert_eq!(choose(3, 4), 0);
        assert_eq!(choose(6, 0), 1);
    }

    #[test]
    fn large_pools_saturate_instead_of_overflowing() {
        assert_eq!(choose(100_000, 4), 4_166_416_671_249_975_000);
        assert_eq!(choose(1_000_000, 4), u64::MAX);
        assert_eq!(choose(u64::MAX, 4), u64::MAX);
        assert_eq!(total_runs(100_000, 10), u64::MAX);
    }

    #[test]
    fn small_competitions_play_at_least_one_combination() {
        assert_eq!(total_runs(1, 10), 10);
        assert_eq!(total_runs(4, 10), 10);
        assert_eq!(total_runs(5, 10), 50);
    }
}
