//! # Bot Arena
//!
//! Storage and continuous ranking of submitted bot programs playing a multiplayer game.
//!
//! It provides:
//! - A file backed, token addressed store of users, schools, competitions, code versions and
//!   game records ([`GameStore`](crate::store::GameStore))
//! - A continuously running tournament ranking the bots of each school with a rolling mean
//!   ([`TournamentScheduler`](crate::tournament_scheduler::TournamentScheduler),
//!   [`TournamentRunner`](crate::runner::TournamentRunner))
//! - One-shot competitions between the best bots of several schools
//!   ([`run_competition`](crate::competition::run_competition))
//!
//! The store relies on nothing but rename atomicity: single records are written to a temporary
//! sibling then renamed over, whole sets are swapped with a tmp/old directory dance. Several
//! readers and one writer process may share a root safely.
//!
//! # Documentation Overview
//!
//! - For the on-disk layout and the consistency guarantees, see the [`store`] module.
//! - For configuring the arena, see [`Configuration`](crate::configuration::Configuration).
//! - For plugging a game in, check out the [`Compiler`](crate::game_interface::Compiler) and
//!   [`GameEngine`](crate::game_interface::GameEngine) traits.
//! - For how bots are ranked, see [`OnlineMean`](crate::online_mean::OnlineMean) and the
//!   [`tournament_scheduler`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use serde_json::Value;
//! # use rand::RngCore;
//! use bot_arena::prelude::*;
//!
//! struct Constant(f64);
//!
//! impl Program for Constant {
//!     fn run(&self, _state: Value, _max_ops: u64, _rng: &mut dyn RngCore) -> Result<Value, RuntimeError> {
//!         Ok(Value::from(self.0))
//!     }
//! }
//!
//! struct ConstantCompiler;
//!
//! impl Compiler for ConstantCompiler {
//!     fn compile(&self, source: &str) -> Result<Box<dyn Program>, CompileError> {
//!         let score = source.trim().parse().map_err(|_| CompileError(source.to_owned()))?;
//!         Ok(Box::new(Constant(score)))
//!     }
//! }
//!
//! struct HighestWins;
//!
//! impl GameEngine for HighestWins {
//!     fn players_per_room(&self) -> usize {
//!         4
//!     }
//!
//!     fn filler_program(&self) -> Box<dyn Program> {
//!         Box::new(Constant(0.0))
//!     }
//!
//!     fn simulate(&self, room: &Room) -> anyhow::Result<Simulation> {
//!         let mut rng = rand::rngs::mock::StepRng::new(room.seed, 1);
//!         let mut scores = vec![];
//!         for bot in &room.bots {
//!             let out = bot.program.run(Value::Null, 1000, &mut rng)?;
//!             scores.push(out.as_f64().unwrap_or_default());
//!         }
//!         Ok(Simulation {
//!             per_player_debug: vec![Value::Null; scores.len()],
//!             scores,
//!             frames: vec![],
//!         })
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_root("game_data").with_rolling_n(50);
//!     let arena = Arena::open(config, Arc::new(ConstantCompiler), Arc::new(HighestWins))?;
//!
//!     let school = arena.store().add_school("Demo school")?;
//!     for score in ["10", "20", "30"] {
//!         let user = arena.store().add_user(&school)?;
//!         arena.store().save_code(&user, score, &Options::new(), true)?;
//!     }
//!
//!     let mut scheduler = arena.scheduler()?;
//!     for _ in 0..3 {
//!         let report = scheduler.run_pass()?;
//!         println!("pass {}: {} games", report.pass, report.games.len());
//!     }
//!     for user in arena.store().get_tokens_for_school(&school)? {
//!         println!("{user}: {:?}", arena.store().get_avg_score(&user)?);
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod arena;
pub mod bot;
pub mod competition;
pub mod configuration;
pub mod error;
pub mod game_interface;
pub mod ladder;
mod logger;
pub mod online_mean;
pub mod room;
pub mod runner;
pub mod store;
pub mod token;
pub mod tournament_scheduler;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use bot_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena) and [`Configuration`](crate::configuration::Configuration)
/// - [`GameStore`](crate::store::GameStore) and its error type
/// - the game traits of [`game_interface`](crate::game_interface)
pub mod prelude {
    pub use crate::arena::Arena;
    pub use crate::bot::Bot;
    pub use crate::configuration::Configuration;
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::game_interface::{
        CompileError, Compiler, GameEngine, Program, RuntimeError, Simulation,
    };
    pub use crate::online_mean::OnlineMean;
    pub use crate::room::Room;
    pub use crate::runner::TournamentRunner;
    pub use crate::store::{GameStore, Options};
    pub use crate::token::TokenKind;
    pub use crate::tournament_scheduler::{PassReport, TournamentScheduler};
}
