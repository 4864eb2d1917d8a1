//! File backed entity store.
//!
//! Every entity lives in a directory named after its token, under one top-level directory per
//! namespace:
//!
//! ```text
//! <root>/data/<user>/{name, avg_score, db.json, code/<ts>_<hash>/{code, options.json}, games/<game>}
//! <root>/schools/<school>/{name, tokens/<user>}
//! <root>/competitions/<comp>/{name, schools/<school>/{code, avg_score}, games/<game>}
//! <root>/games/<game>/{ctime, frames.json, players/<user>/data.json}
//! <root>/exceptions/<etoken>/report.json
//! <root>/www/
//! ```
//!
//! Sets (members of a school, games of a user...) are directories of empty marker files.
//! Records that must never be observed half written go through [`atomic::write_atomic`], whole
//! sets that are swapped at once through [`atomic::replace_dir`].
//!
//! The store holds no lock and no cache: several processes may open the same root. See the
//! individual operations for what is and is not safe under concurrent writers.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, instrument, warn};

use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::token::{self, TokenKind};

mod atomic;
mod code;
mod exceptions;
mod games;
mod kv;
mod www;

pub use code::{CodeVersion, Options};
pub use exceptions::ExceptionReport;
pub use www::WwwCache;

const NAME_FILE: &str = "name";
const AVG_SCORE_FILE: &str = "avg_score";
const SCHOOL_MEMBERS_DIR: &str = "tokens";
const COMP_SCHOOLS_DIR: &str = "schools";
const COMP_CODE_FILE: &str = "code";
const WWW_DIR: &str = "www";

/// Handle on a store rooted at one directory.
#[derive(Debug, Clone)]
pub struct GameStore {
    root: PathBuf,
}

impl GameStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// Opening also finishes any subtree swap interrupted by a crash and upgrades code saved in
    /// the legacy flat layout, so that later reads have no side effects.
    #[instrument(skip_all, fields(root = ?root.as_ref()))]
    pub fn open(root: impl AsRef<Path>) -> StoreResult<GameStore> {
        let root = root.as_ref();
        fs::create_dir_all(root).at(root)?;
        let root = root.canonicalize().at(root)?;
        let store = GameStore { root };

        for kind in TokenKind::ALL {
            let dir = store.namespace_dir(kind);
            fs::create_dir_all(&dir).at(&dir)?;
        }

        atomic::recover_dir(&store.root.join(WWW_DIR))?;
        for comp in store.get_comp_tokens()? {
            atomic::recover_dir(&store.dir_of(TokenKind::Competition, &comp).join(games::GAMES_DIR))?;
        }

        let mut migrated = 0;
        for user in store.get_user_tokens()? {
            if store.migrate_legacy_code(&user)? {
                migrated += 1;
            }
        }
        if migrated > 0 {
            info!(migrated, "upgraded legacy code layout");
        }

        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Static asset cache kept under `<root>/www`.
    pub fn www_cache(&self) -> WwwCache {
        WwwCache::new(self.root.join(WWW_DIR))
    }

    fn namespace_dir(&self, kind: TokenKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Directory of a token. Only call with a token whose shape was checked.
    fn dir_of(&self, kind: TokenKind, token: &str) -> PathBuf {
        self.namespace_dir(kind).join(token)
    }

    fn is_registered(&self, kind: TokenKind, token: &str) -> bool {
        kind.is_well_formed(token) && self.dir_of(kind, token).is_dir()
    }

    /// Directory of `token` if it is registered as `kind`, the matching lookup error otherwise.
    fn expect_dir(&self, kind: TokenKind, token: &str) -> StoreResult<PathBuf> {
        if self.is_registered(kind, token) {
            return Ok(self.dir_of(kind, token));
        }
        let token = token.to_owned();
        Err(match kind {
            TokenKind::User => StoreError::UnknownUser(token),
            TokenKind::School => StoreError::UnknownSchool(token),
            TokenKind::Competition => StoreError::UnknownCompetition(token),
            TokenKind::Game => StoreError::UnknownGame(token),
            TokenKind::Exception => StoreError::InvalidToken {
                token,
                expected: kind,
            },
        })
    }

    fn fresh_token(&self, kind: TokenKind) -> StoreResult<String> {
        token::new_token(
            kind,
            |candidate| self.dir_of(kind, candidate).exists(),
            &mut rand::thread_rng(),
        )
    }

    /// Create the directory of a brand new entity, failing if it already exists.
    fn create_entity_dir(&self, kind: TokenKind, token: &str) -> StoreResult<PathBuf> {
        let dir = self.dir_of(kind, token);
        fs::create_dir(&dir).at(&dir)?;
        Ok(dir)
    }

    fn tokens(&self, kind: TokenKind) -> StoreResult<Vec<String>> {
        let mut tokens = atomic::list_dir(&self.namespace_dir(kind))?;
        tokens.retain(|t| kind.is_well_formed(t));
        Ok(tokens)
    }

    /// Kind of a registered token.
    ///
    /// The sigil selects the namespace, then the token must exist there: a string shaped like a
    /// school token is not a school unless it was registered.
    ///
    /// # Errors
    /// [`StoreError::InvalidToken`] if the token is malformed or not registered.
    pub fn classify(&self, token: &str) -> StoreResult<TokenKind> {
        match TokenKind::from_shape(token) {
            Some(kind) if self.is_registered(kind, token) => Ok(kind),
            shape => Err(StoreError::InvalidToken {
                token: token.to_owned(),
                expected: shape.unwrap_or(TokenKind::User),
            }),
        }
    }

    /// True if `token` is a registered user.
    pub fn is_user_token(&self, token: &str) -> bool {
        self.is_registered(TokenKind::User, token)
    }

    /// True if `token` is a registered school.
    pub fn is_school_token(&self, token: &str) -> bool {
        self.is_registered(TokenKind::School, token)
    }

    /// True if `token` is a registered competition.
    pub fn is_comp_token(&self, token: &str) -> bool {
        self.is_registered(TokenKind::Competition, token)
    }

    /// True if `token` is a registered game.
    pub fn is_game_token(&self, token: &str) -> bool {
        self.is_registered(TokenKind::Game, token)
    }

    /// True if `token` is a registered exception report.
    pub fn is_exception_token(&self, token: &str) -> bool {
        self.is_registered(TokenKind::Exception, token)
    }

    /// All user tokens.
    pub fn get_user_tokens(&self) -> StoreResult<Vec<String>> {
        self.tokens(TokenKind::User)
    }

    /// All school tokens.
    pub fn get_school_tokens(&self) -> StoreResult<Vec<String>> {
        self.tokens(TokenKind::School)
    }

    /// All competition tokens.
    pub fn get_comp_tokens(&self) -> StoreResult<Vec<String>> {
        self.tokens(TokenKind::Competition)
    }

    /// All game tokens, linked or not.
    pub fn get_all_game_tokens(&self) -> StoreResult<Vec<String>> {
        self.tokens(TokenKind::Game)
    }

    /// Register a new school.
    #[instrument(skip(self))]
    pub fn add_school(&self, name: &str) -> StoreResult<String> {
        let token = self.fresh_token(TokenKind::School)?;
        let dir = self.create_entity_dir(TokenKind::School, &token)?;
        let members = dir.join(SCHOOL_MEMBERS_DIR);
        fs::create_dir(&members).at(&members)?;
        atomic::write_atomic(&dir.join(NAME_FILE), name.as_bytes())?;
        info!(%token, "new school");
        Ok(token)
    }

    /// Register a new user as a member of `school`.
    #[instrument(skip(self))]
    pub fn add_user(&self, school: &str) -> StoreResult<String> {
        let school_dir = self.expect_dir(TokenKind::School, school)?;
        let token = self.fresh_token(TokenKind::User)?;
        let dir = self.create_entity_dir(TokenKind::User, &token)?;
        let games = dir.join(games::GAMES_DIR);
        fs::create_dir(&games).at(&games)?;
        // membership last: a listed member always has its directory
        let members = school_dir.join(SCHOOL_MEMBERS_DIR);
        fs::create_dir_all(&members).at(&members)?;
        atomic::touch(&members.join(&token))?;
        info!(%token, "new user");
        Ok(token)
    }

    /// Register a new competition.
    #[instrument(skip(self))]
    pub fn add_competition(&self, name: &str) -> StoreResult<String> {
        let token = self.fresh_token(TokenKind::Competition)?;
        self.init_competition(&token, name)?;
        Ok(token)
    }

    /// Make sure the competition `token` exists, creating it with `name` otherwise.
    ///
    /// Used for competitions with a well-known token. Returns true if it was created.
    pub fn ensure_competition(&self, token: &str, name: &str) -> StoreResult<bool> {
        if !TokenKind::Competition.is_well_formed(token) {
            return Err(StoreError::InvalidToken {
                token: token.to_owned(),
                expected: TokenKind::Competition,
            });
        }
        if self.is_comp_token(token) {
            return Ok(false);
        }
        match self.init_competition(token, name) {
            Ok(()) => Ok(true),
            // created concurrently by another process
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn init_competition(&self, token: &str, name: &str) -> StoreResult<()> {
        let dir = self.create_entity_dir(TokenKind::Competition, token)?;
        for sub in [COMP_SCHOOLS_DIR, games::GAMES_DIR] {
            let sub = dir.join(sub);
            fs::create_dir(&sub).at(&sub)?;
        }
        atomic::write_atomic(&dir.join(NAME_FILE), name.as_bytes())?;
        info!(token, "new competition");
        Ok(())
    }

    fn named_dir(&self, token: &str) -> StoreResult<PathBuf> {
        match self.classify(token)? {
            kind @ (TokenKind::User | TokenKind::School | TokenKind::Competition) => {
                Ok(self.dir_of(kind, token))
            }
            kind => Err(StoreError::InvalidToken {
                token: token.to_owned(),
                expected: kind,
            }),
        }
    }

    /// Set the display name of a user, school or competition.
    pub fn save_name(&self, token: &str, name: &str) -> StoreResult<()> {
        let dir = self.named_dir(token)?;
        atomic::write_atomic(&dir.join(NAME_FILE), name.as_bytes())
    }

    /// Display name of a user, school or competition, if one was set.
    pub fn get_name(&self, token: &str) -> StoreResult<Option<String>> {
        let dir = self.named_dir(token)?;
        atomic::read_text(&dir.join(NAME_FILE))
    }

    /// Overwrite the averaged score of a user.
    pub fn save_avg_score(&self, user: &str, score: f64) -> StoreResult<()> {
        let dir = self.expect_dir(TokenKind::User, user)?;
        atomic::write_atomic(&dir.join(AVG_SCORE_FILE), score.to_string().as_bytes())
    }

    /// Averaged score of a user. `None` when never scored or unreadable.
    pub fn get_avg_score(&self, user: &str) -> StoreResult<Option<f64>> {
        let dir = self.expect_dir(TokenKind::User, user)?;
        read_score(&dir.join(AVG_SCORE_FILE))
    }

    /// Members of a school.
    pub fn get_tokens_for_school(&self, school: &str) -> StoreResult<Vec<String>> {
        let dir = self.expect_dir(TokenKind::School, school)?;
        let mut users = atomic::list_dir(&dir.join(SCHOOL_MEMBERS_DIR))?;
        users.retain(|u| TokenKind::User.is_well_formed(u));
        Ok(users)
    }

    /// School owning a user, if any.
    pub fn get_school_for_token(&self, user: &str) -> StoreResult<Option<String>> {
        if !TokenKind::User.is_well_formed(user) {
            return Ok(None);
        }
        for school in self.get_school_tokens()? {
            let marker = self
                .dir_of(TokenKind::School, &school)
                .join(SCHOOL_MEMBERS_DIR)
                .join(user);
            if marker.exists() {
                return Ok(Some(school));
            }
        }
        Ok(None)
    }

    /// Enroll a school in a competition.
    pub fn add_school_to_comp(&self, comp: &str, school: &str) -> StoreResult<()> {
        let comp_dir = self.expect_dir(TokenKind::Competition, comp)?;
        self.expect_dir(TokenKind::School, school)?;
        let dir = comp_dir.join(COMP_SCHOOLS_DIR).join(school);
        fs::create_dir_all(&dir).at(&dir)
    }

    /// Schools enrolled in a competition.
    pub fn get_schools_in_comp(&self, comp: &str) -> StoreResult<Vec<String>> {
        let dir = self.expect_dir(TokenKind::Competition, comp)?;
        let mut schools = atomic::list_dir(&dir.join(COMP_SCHOOLS_DIR))?;
        schools.retain(|s| TokenKind::School.is_well_formed(s));
        Ok(schools)
    }

    /// Competitions the school of `user` is enrolled in.
    pub fn get_comps_for_token(&self, user: &str) -> StoreResult<Vec<String>> {
        let Some(school) = self.get_school_for_token(user)? else {
            return Ok(vec![]);
        };
        let mut comps = vec![];
        for comp in self.get_comp_tokens()? {
            if self.get_schools_in_comp(&comp)?.contains(&school) {
                comps.push(comp);
            }
        }
        Ok(comps)
    }

    fn comp_school_dir(&self, comp: &str, school: &str) -> StoreResult<PathBuf> {
        let comp_dir = self.expect_dir(TokenKind::Competition, comp)?;
        self.expect_dir(TokenKind::School, school)?;
        let dir = comp_dir.join(COMP_SCHOOLS_DIR).join(school);
        fs::create_dir_all(&dir).at(&dir)?;
        Ok(dir)
    }

    /// Record the winning code of a school in a competition.
    pub fn set_comp_school_code(&self, comp: &str, school: &str, code: &str) -> StoreResult<()> {
        let dir = self.comp_school_dir(comp, school)?;
        atomic::write_atomic(&dir.join(COMP_CODE_FILE), code.as_bytes())
    }

    /// Winning code of a school in a competition.
    pub fn get_comp_code(&self, comp: &str, school: &str) -> StoreResult<Option<String>> {
        let dir = self.expect_dir(TokenKind::Competition, comp)?;
        self.expect_dir(TokenKind::School, school)?;
        atomic::read_text(&dir.join(COMP_SCHOOLS_DIR).join(school).join(COMP_CODE_FILE))
    }

    /// Record the best score of a school in a competition.
    pub fn set_comp_avg_score(&self, comp: &str, school: &str, score: f64) -> StoreResult<()> {
        let dir = self.comp_school_dir(comp, school)?;
        atomic::write_atomic(&dir.join(AVG_SCORE_FILE), score.to_string().as_bytes())
    }

    /// Best score of a school in a competition.
    pub fn get_comp_avg_score(&self, comp: &str, school: &str) -> StoreResult<Option<f64>> {
        let dir = self.expect_dir(TokenKind::Competition, comp)?;
        self.expect_dir(TokenKind::School, school)?;
        read_score(&dir.join(COMP_SCHOOLS_DIR).join(school).join(AVG_SCORE_FILE))
    }
}

fn read_score(path: &Path) -> StoreResult<Option<f64>> {
    let Some(text) = atomic::read_text(path)? else {
        return Ok(None);
    };
    match text.trim().parse() {
        Ok(score) => Ok(Some(score)),
        Err(e) => {
            warn!(?path, %e, "unreadable score");
            Ok(None)
        }
    }
}
