//! Rooms: the ordered set of bots playing one game.

use std::{collections::BTreeMap, fmt, sync::Arc};

use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Value};

use crate::bot::Bot;
use crate::error::StoreResult;
use crate::game_interface::Simulation;
use crate::store::GameStore;

/// Bots seated for one game, in seat order, and the seed the engine plays it with.
#[derive(Debug, Clone)]
pub struct Room {
    /// Seated bots, seat 0 first.
    pub bots: Vec<Arc<Bot>>,
    /// Seed for the engine's randomness.
    pub seed: u64,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.bots.iter().map(|b| b.to_string()).collect::<Vec<_>>();
        write!(f, "[{}]", names.join(" vs "))
    }
}

impl Room {
    /// Draw `room_size` bots of `pool` at random, padded with `make_filler` bots if the pool is
    /// too small.
    pub fn sample<R, F>(pool: &[Arc<Bot>], room_size: usize, mut make_filler: F, rng: &mut R) -> Room
    where
        R: Rng + ?Sized,
        F: FnMut() -> Bot,
    {
        let mut bots = pool.to_vec();
        bots.shuffle(rng);
        bots.truncate(room_size);
        while bots.len() < room_size {
            bots.push(Arc::new(make_filler()));
        }
        Room {
            bots,
            seed: rng.gen(),
        }
    }

    /// Seats taken by user bots, with their owner.
    pub fn players(&self) -> impl Iterator<Item = (usize, &Bot, &str)> {
        self.bots
            .iter()
            .enumerate()
            .filter_map(|(seat, bot)| bot.token.as_deref().map(|token| (seat, bot.as_ref(), token)))
    }

    /// Record the outcome of this room as a game; fillers are not saved.
    pub fn save(&self, store: &GameStore, simulation: &Simulation) -> StoreResult<String> {
        let per_player_data: BTreeMap<String, Value> = self
            .players()
            .map(|(seat, bot, token)| {
                let debug = simulation
                    .per_player_debug
                    .get(seat)
                    .cloned()
                    .unwrap_or(Value::Null);
                let data = json!({ "code_version": bot.code_version, "debug": debug });
                (token.to_owned(), data)
            })
            .collect();
        store.add_game(&simulation.frames, &per_player_data)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, RngCore, SeedableRng};

    use super::*;
    use crate::game_interface::{Program, RuntimeError};
    use crate::store::Options;

    struct Idle;

    impl Program for Idle {
        fn run(&self, state: Value, _max_ops: u64, _rng: &mut dyn RngCore) -> Result<Value, RuntimeError> {
            Ok(state)
        }
    }

    fn pool(n: usize) -> Vec<Arc<Bot>> {
        (0..n)
            .map(|i| {
                Arc::new(Bot::new(
                    format!("0000000{i}"),
                    format!("bot {i}"),
                    Box::new(Idle),
                    Options::new(),
                    "v1".to_owned(),
                ))
            })
            .collect()
    }

    #[test]
    fn small_pool_is_padded_with_fillers() {
        let mut rng = StdRng::seed_from_u64(0);
        let room = Room::sample(&pool(2), 4, || Bot::filler(Box::new(Idle)), &mut rng);
        assert_eq!(room.bots.len(), 4);
        assert_eq!(room.bots.iter().filter(|b| b.is_filler()).count(), 2);
        assert_eq!(room.players().count(), 2);
    }

    #[test]
    fn large_pool_fills_room_without_repeats() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let room = Room::sample(&pool(10), 4, || unreachable!(), &mut rng);
            let tokens: HashSet<_> = room.players().map(|(_, _, t)| t.to_owned()).collect();
            assert_eq!(tokens.len(), 4);
        }
    }

    #[test]
    fn every_bot_gets_picked_eventually() {
        let mut rng = StdRng::seed_from_u64(2);
        let bots = pool(6);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let room = Room::sample(&bots, 2, || unreachable!(), &mut rng);
            seen.extend(room.players().map(|(_, _, t)| t.to_owned()));
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn display_lists_seats() {
        let mut rng = StdRng::seed_from_u64(3);
        let room = Room::sample(&[], 2, || Bot::filler(Box::new(Idle)), &mut rng);
        assert_eq!(room.to_string(), "[Computer vs Computer]");
    }
}
