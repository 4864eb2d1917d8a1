//! Traits the arena needs from the game side: a compiler turning submitted source into runnable
//! programs, and an engine playing a room of programs to the end.

use rand::RngCore;
use serde_json::Value;
use thiserror::Error;

use crate::room::Room;

/// Submitted source was rejected by the [`Compiler`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("compile error: {0}")]
pub struct CompileError(pub String);

/// A [`Program`] failed while computing its next state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("runtime error: {0}")]
pub struct RuntimeError(pub String);

/// A compiled bot.
///
/// Programs are stateless between calls: everything a program remembers lives in the state it is
/// given and returns.
pub trait Program: Send + Sync {
    /// Compute the next state from `state`.
    ///
    /// `max_ops` bounds the work the program may do; exceeding it is a [`RuntimeError`].
    fn run(&self, state: Value, max_ops: u64, rng: &mut dyn RngCore) -> Result<Value, RuntimeError>;
}

/// Turns submitted source into a [`Program`].
pub trait Compiler: Send + Sync {
    /// Compile `source`.
    fn compile(&self, source: &str) -> Result<Box<dyn Program>, CompileError>;
}

/// Outcome of one simulated room. Every vector is indexed by seat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Simulation {
    /// Final score of each seat.
    pub scores: Vec<f64>,
    /// Replay frames, possibly empty.
    pub frames: Vec<Value>,
    /// Debug output of each seat, saved with the game record.
    pub per_player_debug: Vec<Value>,
}

/// What the game should implement.
pub trait GameEngine: Send + Sync {
    /// Number of seats in a room.
    fn players_per_room(&self) -> usize;

    /// The built-in "computer" bot seated when a room lacks players.
    fn filler_program(&self) -> Box<dyn Program>;

    /// Play `room` to the end.
    ///
    /// # Error
    /// Returned when the game could not be played. The room is then dropped without any score.
    fn simulate(&self, room: &Room) -> anyhow::Result<Simulation>;
}
