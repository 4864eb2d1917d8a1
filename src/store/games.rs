//! Game records and the game sets of users and competitions.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::{atomic, GameStore};
use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::token::TokenKind;

/// Set of games, in user and competition directories.
pub(crate) const GAMES_DIR: &str = "games";

const CTIME_FILE: &str = "ctime";
const FRAMES_FILE: &str = "frames.json";
const PLAYERS_DIR: &str = "players";
const PLAYER_DATA_FILE: &str = "data.json";

impl GameStore {
    /// Record a finished game and link it into the game set of every participant.
    ///
    /// `per_player_data` maps each participating user to its auxiliary data (debug trace, code
    /// version...). The record becomes visible in one rename; back-links are added afterwards.
    ///
    /// # Errors
    /// [`StoreError::UnknownUser`] if a participant is not a registered user; nothing is written.
    #[instrument(skip_all, fields(players = per_player_data.len()))]
    pub fn add_game(
        &self,
        frames: &[Value],
        per_player_data: &BTreeMap<String, Value>,
    ) -> StoreResult<String> {
        let user_dirs = per_player_data
            .keys()
            .map(|user| self.expect_dir(TokenKind::User, user))
            .collect::<StoreResult<Vec<_>>>()?;

        let token = self.fresh_token(TokenKind::Game)?;
        let game_dir = self.dir_of(TokenKind::Game, &token);
        let staging = game_dir.with_file_name(format!("{token}.tmp"));
        fs::create_dir(&staging).at(&staging)?;
        let built = (|| {
            atomic::write_json_atomic(&staging.join(FRAMES_FILE), frames)?;
            for (user, data) in per_player_data {
                let player_dir = staging.join(PLAYERS_DIR).join(user);
                fs::create_dir_all(&player_dir).at(&player_dir)?;
                atomic::write_json_atomic(&player_dir.join(PLAYER_DATA_FILE), data)?;
            }
            let ctime = OffsetDateTime::now_utc().unix_timestamp_nanos();
            atomic::write_atomic(&staging.join(CTIME_FILE), ctime.to_string().as_bytes())
        })();
        if let Err(e) = built {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        fs::rename(&staging, &game_dir).at(&game_dir)?;

        for user_dir in user_dirs {
            let games = user_dir.join(GAMES_DIR);
            fs::create_dir_all(&games).at(&games)?;
            atomic::touch(&games.join(&token))?;
        }
        debug!(%token, "game recorded");
        Ok(token)
    }

    /// Creation time of a game.
    pub fn get_game_ctime(&self, game: &str) -> StoreResult<OffsetDateTime> {
        let path = self.expect_dir(TokenKind::Game, game)?.join(CTIME_FILE);
        let text = atomic::read_text(&path)?
            .ok_or_else(|| StoreError::corrupt(&path, "missing creation time"))?;
        let nanos: i128 = text
            .trim()
            .parse()
            .map_err(|e| StoreError::corrupt(&path, format!("bad creation time: {e}")))?;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }

    /// Replay frames of a game, `None` if none were recorded.
    pub fn get_game_frames(&self, game: &str) -> StoreResult<Option<Vec<Value>>> {
        let dir = self.expect_dir(TokenKind::Game, game)?;
        atomic::read_json(&dir.join(FRAMES_FILE))
    }

    /// Auxiliary data recorded for `user` in `game`.
    pub fn get_player_game_data(&self, game: &str, user: &str) -> StoreResult<Option<Value>> {
        let dir = self.expect_dir(TokenKind::Game, game)?;
        if !TokenKind::User.is_well_formed(user) {
            return Ok(None);
        }
        atomic::read_json(&dir.join(PLAYERS_DIR).join(user).join(PLAYER_DATA_FILE))
    }

    /// Users that took part in `game`.
    pub fn get_players_for_game(&self, game: &str) -> StoreResult<Vec<String>> {
        let dir = self.expect_dir(TokenKind::Game, game)?;
        let mut players = atomic::list_dir(&dir.join(PLAYERS_DIR))?;
        players.retain(|p| TokenKind::User.is_well_formed(p));
        Ok(players)
    }

    /// Game set of a user or a competition.
    ///
    /// # Errors
    /// [`StoreError::InvalidToken`] for any other kind of token.
    pub fn get_games_for_token(&self, token: &str) -> StoreResult<Vec<String>> {
        let kind = self.classify(token)?;
        if !matches!(kind, TokenKind::User | TokenKind::Competition) {
            return Err(StoreError::InvalidToken {
                token: token.to_owned(),
                expected: TokenKind::User,
            });
        }
        let mut games = atomic::list_dir(&self.dir_of(kind, token).join(GAMES_DIR))?;
        games.retain(|g| TokenKind::Game.is_well_formed(g));
        Ok(games)
    }

    /// Add a game to the game set of a competition.
    pub fn add_game_to_comp(&self, comp: &str, game: &str) -> StoreResult<()> {
        let comp_dir = self.expect_dir(TokenKind::Competition, comp)?;
        self.expect_dir(TokenKind::Game, game)?;
        let games = comp_dir.join(GAMES_DIR);
        fs::create_dir_all(&games).at(&games)?;
        atomic::touch(&games.join(game))
    }

    /// Remove a game from the game set of a competition. The game itself is kept.
    pub fn remove_game_from_comp(&self, comp: &str, game: &str) -> StoreResult<()> {
        let comp_dir = self.expect_dir(TokenKind::Competition, comp)?;
        if !TokenKind::Game.is_well_formed(game) {
            return Err(StoreError::UnknownGame(game.to_owned()));
        }
        atomic::remove_marker(&comp_dir.join(GAMES_DIR).join(game))
    }

    /// Delete a game: unlink it from its players and from every competition, then remove it.
    ///
    /// # Errors
    /// [`StoreError::UnknownGame`] if `game` is not registered.
    #[instrument(skip(self))]
    pub fn delete_game(&self, game: &str) -> StoreResult<()> {
        let game_dir = self.expect_dir(TokenKind::Game, game)?;
        for player in self.get_players_for_game(game)? {
            if self.is_user_token(&player) {
                let link = self.dir_of(TokenKind::User, &player).join(GAMES_DIR).join(game);
                atomic::remove_marker(&link)?;
            } else {
                warn!(game, %player, "game references an unknown player");
            }
        }
        for comp in self.get_comp_tokens()? {
            let link = self.dir_of(TokenKind::Competition, &comp).join(GAMES_DIR).join(game);
            atomic::remove_marker(&link)?;
        }
        fs::remove_dir_all(&game_dir).at(&game_dir)?;
        debug!("game deleted");
        Ok(())
    }

    /// Atomically replace the game set of a competition with `new_games`.
    ///
    /// Readers see either the whole previous set or the whole new one. With `cleanup`, games of
    /// the previous set missing from the new one are deleted entirely.
    ///
    /// Two concurrent replacements of the same competition are not safe.
    ///
    /// # Errors
    /// [`StoreError::StorageInconsistency`] if the swap failed and the previous set could not be
    /// restored.
    #[instrument(skip(self, new_games), fields(new = new_games.len()))]
    pub fn replace_games_in_comp(
        &self,
        comp: &str,
        new_games: &[String],
        cleanup: bool,
    ) -> StoreResult<()> {
        let comp_dir = self.expect_dir(TokenKind::Competition, comp)?;
        for game in new_games {
            self.expect_dir(TokenKind::Game, game)?;
        }
        let games_dir = comp_dir.join(GAMES_DIR);
        let previous = atomic::list_dir(&games_dir)?;

        atomic::replace_dir(&games_dir, |tmp| {
            new_games.iter().try_for_each(|game| atomic::touch(&tmp.join(game)))
        })?;

        if cleanup {
            let kept: HashSet<&str> = new_games.iter().map(String::as_str).collect();
            let stale = previous
                .iter()
                .filter(|g| !kept.contains(g.as_str()) && self.is_game_token(g))
                .collect::<Vec<_>>();
            info!(comp, stale = stale.len(), "cleaning up replaced games");
            for game in stale {
                self.delete_game(game)?;
            }
        }
        Ok(())
    }
}
