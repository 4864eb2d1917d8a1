//! Scripted game used by the integration tests.
//!
//! Source code is a tiny script:
//! - `score:N` compiles to a bot scoring `N` in every game (`N` may be `NaN` or `inf`)
//! - `crash` compiles to a bot failing at run time, making the whole room fail
//! - anything else does not compile
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bot_arena::prelude::*;
use rand::RngCore;
use serde_json::{json, Value};
use tracing::Level;

pub struct FixedScore(pub f64);

impl Program for FixedScore {
    fn run(&self, _state: Value, _max_ops: u64, _rng: &mut dyn RngCore) -> Result<Value, RuntimeError> {
        Ok(json!(self.0))
    }
}

pub struct Crash;

impl Program for Crash {
    fn run(&self, _state: Value, max_ops: u64, _rng: &mut dyn RngCore) -> Result<Value, RuntimeError> {
        Err(RuntimeError(format!("exceeded {max_ops} operations")))
    }
}

pub struct ScriptCompiler;

impl Compiler for ScriptCompiler {
    fn compile(&self, source: &str) -> Result<Box<dyn Program>, CompileError> {
        if source == "crash" {
            return Ok(Box::new(Crash));
        }
        source
            .strip_prefix("score:")
            .and_then(|n| n.parse().ok())
            .map(|n| Box::new(FixedScore(n)) as Box<dyn Program>)
            .ok_or_else(|| CompileError(format!("syntax error in '{source}'")))
    }
}

/// Every seat scores what its program returns; fillers score 0.
pub struct ScriptEngine {
    pub room_size: usize,
    pub simulations: Arc<AtomicUsize>,
}

impl ScriptEngine {
    pub fn new(room_size: usize) -> Self {
        Self {
            room_size,
            simulations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl GameEngine for ScriptEngine {
    fn players_per_room(&self) -> usize {
        self.room_size
    }

    fn filler_program(&self) -> Box<dyn Program> {
        Box::new(FixedScore(0.0))
    }

    fn simulate(&self, room: &Room) -> anyhow::Result<Simulation> {
        self.simulations.fetch_add(1, Ordering::SeqCst);
        let mut rng = rand::rngs::mock::StepRng::new(room.seed, 1);
        let mut simulation = Simulation::default();
        for (seat, bot) in room.bots.iter().enumerate() {
            let out = bot.program.run(json!({ "seat": seat }), 1000, &mut rng)?;
            // non-finite numbers come back as null
            simulation.scores.push(out.as_f64().unwrap_or(f64::NAN));
            simulation.per_player_debug.push(json!(format!("seat {seat}")));
        }
        simulation.frames.push(json!({ "seed": room.seed }));
        Ok(simulation)
    }
}

pub fn config(root: &std::path::Path) -> Configuration {
    Configuration::new()
        .with_root(root)
        .with_seed(Some(42))
        .with_interval(std::time::Duration::ZERO)
}

pub fn arena(config: Configuration, room_size: usize) -> Arena {
    Arena::open(config, Arc::new(ScriptCompiler), Arc::new(ScriptEngine::new(room_size))).unwrap()
}

/// Enroll a new school whose members submit `sources`, in order.
pub fn school_with(store: &GameStore, sources: &[&str]) -> (String, Vec<String>) {
    let school = store.add_school("School").unwrap();
    let users = sources
        .iter()
        .map(|source| {
            let user = store.add_user(&school).unwrap();
            store.save_code(&user, source, &Options::new(), true).unwrap();
            user
        })
        .collect();
    (school, users)
}

pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init();
}
