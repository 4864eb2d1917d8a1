//! Background execution of the tournament.
//!
//! The [`TournamentRunner`] owns a worker thread alternating tournament passes and pauses. The
//! pause waits on a channel, so [`TournamentRunner::stop`] is observed right away instead of at
//! the end of the interval. A pass already in progress is never interrupted.

use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context};
use tracing::{error, info, instrument, trace};

use crate::tournament_scheduler::{is_fatal, TournamentScheduler};

/// Handle on a tournament running in the background.
pub struct TournamentRunner {
    stop: Sender<()>,
    worker: JoinHandle<anyhow::Result<()>>,
}

impl TournamentRunner {
    /// Start running `scheduler`, pausing `interval` after each pass.
    pub fn spawn(scheduler: TournamentScheduler, interval: Duration) -> anyhow::Result<Self> {
        let (stop, stop_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("tournament".to_owned())
            .spawn(move || run(scheduler, interval, stop_rx))
            .context("spawning the tournament thread")?;
        info!(?interval, "tournament started");
        Ok(Self { stop, worker })
    }

    /// True once the worker exited, which only happens after a stop request or a fatal error.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Ask the worker to stop and wait for it.
    ///
    /// # Errors
    /// Returns the error that halted the worker, if it halted on its own.
    pub fn stop(self) -> anyhow::Result<()> {
        // the worker may already be gone after a fatal error
        let _ = self.stop.send(());
        let result = self
            .worker
            .join()
            .map_err(|_| anyhow!("the tournament thread panicked"))?;
        info!("tournament stopped");
        result
    }
}

#[instrument(skip_all)]
fn run(
    mut scheduler: TournamentScheduler,
    interval: Duration,
    stop: mpsc::Receiver<()>,
) -> anyhow::Result<()> {
    loop {
        match scheduler.run_pass() {
            Ok(report) => trace!(?report),
            Err(e) if is_fatal(&e) => {
                error!("tournament halted: {e:#}");
                return Err(e);
            }
            Err(e) => error!("pass failed: {e:#}"),
        }
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}
