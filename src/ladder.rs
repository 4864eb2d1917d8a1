//! Rolling ranking of the bots of one school.
//!
//! Each bot carries an [`OnlineMean`] of the scores it got in the rooms it played. The mean and
//! its count are kept in the owner's key/value sidecar, so a restarted scheduler resumes where it
//! stopped instead of ranking everybody from scratch.

use std::{collections::BTreeMap, sync::Arc};

use rand::Rng;
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::bot::Bot;
use crate::error::{StoreError, StoreResult};
use crate::online_mean::OnlineMean;
use crate::room::Room;
use crate::store::GameStore;

/// Sidecar key of the rolling mean.
pub const ROLLING_SCORE_KEY: &str = "rolling_score";
/// Sidecar key of the number of values the rolling mean accounts for.
pub const ROLLING_N_KEY: &str = "rolling_n";

struct Entry {
    bot: Arc<Bot>,
    mean: OnlineMean,
}

/// Bots of a school and their rolling scores.
pub struct SchoolLadder {
    school: String,
    room_size: usize,
    rolling_n: u64,
    entries: BTreeMap<String, Entry>,
}

impl SchoolLadder {
    /// An empty ladder for `school`, sampling rooms of `room_size` seats.
    pub fn new(school: impl Into<String>, room_size: usize, rolling_n: u64) -> Self {
        Self {
            school: school.into(),
            room_size,
            rolling_n,
            entries: BTreeMap::new(),
        }
    }

    /// School the ladder ranks.
    pub fn get_school(&self) -> &str {
        &self.school
    }

    /// Number of tracked bots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True while no bot of the school compiled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Code version the tracked bot of `token` runs, `None` if `token` is not tracked.
    pub fn get_code_version(&self, token: &str) -> Option<&str> {
        self.entries.get(token)?.bot.code_version.as_deref()
    }

    /// Current score of the bot of `token`.
    pub fn get_mean(&self, token: &str) -> Option<OnlineMean> {
        self.entries.get(token).map(|e| e.mean)
    }

    /// Track `bot`, resuming its rolling score from the store.
    ///
    /// A bot replacing one already tracked for the same user keeps the running score. A saved
    /// score that cannot be decoded, or that is not a finite number, is dropped and the bot starts
    /// over.
    pub fn add_bot(&mut self, store: &GameStore, bot: Bot) -> StoreResult<()> {
        let Some(token) = bot.token.clone() else {
            return Ok(());
        };
        let bot = Arc::new(bot);
        if let Some(entry) = self.entries.get_mut(&token) {
            debug!(%token, version = ?bot.code_version, "bot replaced");
            entry.bot = bot;
            return Ok(());
        }
        let mean = match load_mean(store, &token) {
            Ok(Some(mean)) => mean,
            Ok(None) => {
                warn!(%token, "saved rolling score is not a number, starting over");
                OnlineMean::new()
            }
            Err(e @ StoreError::Codec { .. }) => {
                warn!(%token, "unreadable rolling score, starting over: {e}");
                OnlineMean::new()
            }
            Err(e) => return Err(e),
        };
        trace!(%token, mean = mean.mean(), count = mean.count(), "bot added");
        let mean = mean.with_roll_after(self.rolling_n);
        self.entries.insert(token, Entry { bot, mean });
        Ok(())
    }

    /// Sample the next room to play.
    pub fn next_room<R, F>(&self, make_filler: F, rng: &mut R) -> Room
    where
        R: Rng + ?Sized,
        F: FnMut() -> Bot,
    {
        let pool = self.entries.values().map(|e| e.bot.clone()).collect::<Vec<_>>();
        Room::sample(&pool, self.room_size, make_filler, rng)
    }

    /// Fold the per-seat `scores` of `room` into the rankings. Returns the users whose score
    /// changed.
    pub fn record(&mut self, room: &Room, scores: &[f64]) -> Vec<String> {
        let mut updated = vec![];
        for (seat, _, token) in room.players() {
            let (Some(entry), Some(&score)) = (self.entries.get_mut(token), scores.get(seat)) else {
                continue;
            };
            entry.mean.add(score);
            updated.push(token.to_owned());
        }
        updated
    }

    /// Persist the rolling score and the displayed average score of `tokens`.
    pub fn save_scores(&self, store: &GameStore, tokens: &[String]) -> StoreResult<()> {
        for token in tokens {
            let Some(entry) = self.entries.get(token) else {
                continue;
            };
            store.save_values(
                token,
                [
                    (ROLLING_SCORE_KEY, json!(entry.mean.mean())),
                    (ROLLING_N_KEY, json!(entry.mean.count())),
                ],
            )?;
            store.save_avg_score(token, entry.mean.floored_mean() as f64)?;
        }
        Ok(())
    }
}

/// Saved rolling score of `token`, `None` if it is not finite.
fn load_mean(store: &GameStore, token: &str) -> StoreResult<Option<OnlineMean>> {
    let mean: f64 = store.get_value(token, ROLLING_SCORE_KEY, 0.0)?;
    let count: u64 = store.get_value(token, ROLLING_N_KEY, 0)?;
    Ok(mean.is_finite().then(|| OnlineMean::with_state(count, mean)))
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, RngCore, SeedableRng};
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::game_interface::{Program, RuntimeError};
    use crate::store::Options;

    struct Idle;

    impl Program for Idle {
        fn run(&self, state: Value, _max_ops: u64, _rng: &mut dyn RngCore) -> Result<Value, RuntimeError> {
            Ok(state)
        }
    }

    fn bot(token: &str, version: &str) -> Bot {
        Bot::new(token.to_owned(), token.to_owned(), Box::new(Idle), Options::new(), version.to_owned())
    }

    fn setup() -> (GameStore, String, Vec<String>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = GameStore::open(tmp.path()).unwrap();
        let school = store.add_school("School").unwrap();
        let users = (0..2).map(|_| store.add_user(&school).unwrap()).collect();
        (store, school, users, tmp)
    }

    #[test]
    fn scores_are_saved_and_resumed() {
        let (store, school, users, _tmp) = setup();
        let mut rng = StdRng::seed_from_u64(0);

        let mut ladder = SchoolLadder::new(&school, 4, 100);
        for user in &users {
            ladder.add_bot(&store, bot(user, "v1")).unwrap();
        }
        let room = ladder.next_room(|| Bot::filler(Box::new(Idle)), &mut rng);
        let scores = room
            .bots
            .iter()
            .map(|b| if b.token.as_deref() == Some(users[0].as_str()) { 40.5 } else { 10.0 })
            .collect::<Vec<_>>();
        let updated = ladder.record(&room, &scores);
        assert_eq!(updated.len(), 2);
        ladder.save_scores(&store, &updated).unwrap();

        assert_eq!(store.get_avg_score(&users[0]).unwrap(), Some(40.0));
        assert_eq!(store.get_avg_score(&users[1]).unwrap(), Some(10.0));

        let mut resumed = SchoolLadder::new(&school, 4, 100);
        resumed.add_bot(&store, bot(&users[0], "v1")).unwrap();
        let mean = resumed.get_mean(&users[0]).unwrap();
        assert_eq!(mean.count(), 1);
        assert_eq!(mean.mean(), 40.5);
    }

    #[test]
    fn replacing_a_bot_keeps_its_score() {
        let (store, school, users, _tmp) = setup();
        let mut ladder = SchoolLadder::new(&school, 2, 100);
        ladder.add_bot(&store, bot(&users[0], "v1")).unwrap();
        let room = Room {
            bots: vec![ladder.entries[&users[0]].bot.clone()],
            seed: 0,
        };
        ladder.record(&room, &[12.0]);

        ladder.add_bot(&store, bot(&users[0], "v2")).unwrap();
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder.get_code_version(&users[0]), Some("v2"));
        assert_eq!(ladder.get_mean(&users[0]).unwrap().mean(), 12.0);
    }

    #[test]
    fn unreadable_saved_score_starts_over() {
        let (store, school, users, _tmp) = setup();
        store
            .save_values(
                &users[0],
                [(ROLLING_SCORE_KEY, Value::Null), (ROLLING_N_KEY, json!(3))],
            )
            .unwrap();
        store.save_value(&users[1], ROLLING_N_KEY, "many").unwrap();

        let mut ladder = SchoolLadder::new(&school, 4, 100);
        for user in &users {
            ladder.add_bot(&store, bot(user, "v1")).unwrap();
            let mean = ladder.get_mean(user).unwrap();
            assert_eq!(mean.count(), 0);
            assert_eq!(mean.mean(), 0.0);
        }
        assert_eq!(ladder.len(), 2);
    }

    #[test]
    fn fillers_are_never_tracked() {
        let (store, school, _users, _tmp) = setup();
        let mut ladder = SchoolLadder::new(&school, 2, 100);
        ladder.add_bot(&store, Bot::filler(Box::new(Idle))).unwrap();
        assert!(ladder.is_empty());
    }
}
