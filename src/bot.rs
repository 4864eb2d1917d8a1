//! Bots seated in rooms.

use std::fmt;

use anyhow::Context;
use tracing::{instrument, trace};

use crate::game_interface::{Compiler, Program};
use crate::store::{GameStore, Options};

/// A compiled program seated in rooms, either a user's bot or a filler.
pub struct Bot {
    /// Owning user, `None` for fillers.
    pub token: Option<String>,
    /// Display name.
    pub name: String,
    /// What the engine runs for this seat.
    pub program: Box<dyn Program>,
    /// Options submitted along with the code.
    pub options: Options,
    /// Code version the program was compiled from.
    pub code_version: Option<String>,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("code_version", &self.code_version)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(f, "{}({token})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl Bot {
    /// A user's bot compiled from `code_version`.
    pub fn new(
        token: String,
        name: String,
        program: Box<dyn Program>,
        options: Options,
        code_version: String,
    ) -> Bot {
        Bot {
            token: Some(token),
            name,
            program,
            options,
            code_version: Some(code_version),
        }
    }

    /// Compile the active code of `user`.
    ///
    /// Returns `None` if the user never submitted code.
    ///
    /// # Errors
    /// Returned when the code could not be loaded or compiled.
    #[instrument(skip(store, compiler))]
    pub fn compile_active(
        store: &GameStore,
        compiler: &dyn Compiler,
        user: &str,
    ) -> anyhow::Result<Option<Bot>> {
        let Some(version) = store.get_active_code(user)? else {
            return Ok(None);
        };
        let name = store.get_name(user)?.unwrap_or_else(|| user.to_owned());
        trace!(version = %version.id, "compiling");
        let program = compiler
            .compile(&version.code)
            .with_context(|| format!("compiling version {} of {user}", version.id))?;
        Ok(Some(Bot::new(
            user.to_owned(),
            name,
            program,
            version.options,
            version.id,
        )))
    }

    /// The engine's computer player.
    pub fn filler(program: Box<dyn Program>) -> Bot {
        Bot {
            token: None,
            name: "Computer".to_owned(),
            program,
            options: Options::new(),
            code_version: None,
        }
    }

    /// True for bots seated by the engine rather than submitted by a user.
    pub fn is_filler(&self) -> bool {
        self.token.is_none()
    }
}
