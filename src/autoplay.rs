use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::advisor::Advisor;
use crate::controller::Controller;
use crate::engine::game::GameStatus;
use crate::error::{Error, Result};
use crate::extract::ExtractionService;

/// How long to wait after a failed cycle before trying again.
pub(crate) const DEFAULT_ERROR_COOLDOWN: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_MAX_FAILURES: u32 = 5;

// Sleeps are cut into slices this long so a stop request is noticed promptly.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AutoPlayConfig {
    pub(crate) move_delay: Duration,
    pub(crate) error_cooldown: Duration,
    pub(crate) max_moves: Option<u32>,
    /// Give up after this many failed cycles in a row, or this many in a row that did not change
    /// the board.
    pub(crate) max_consecutive_failures: u32,
}

impl Default for AutoPlayConfig {
    fn default() -> Self {
        Self {
            move_delay: Duration::ZERO,
            error_cooldown: DEFAULT_ERROR_COOLDOWN,
            max_moves: None,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// StopHandle asks a running auto-player to stop. The request takes effect before the next cycle
/// starts; a cycle already in flight runs to completion.
#[derive(Clone, Debug, Default)]
pub(crate) struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub(crate) fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise this handle on Ctrl-C. A second Ctrl-C while the current cycle finishes exits at
    /// once. Only one handler can be installed per process.
    pub(crate) fn stop_on_interrupt(&self) -> Result<()> {
        let stop = self.clone();
        ctrlc::set_handler(move || {
            if stop.is_stopped() {
                log::warn!("interrupted again, exiting");
                std::process::exit(130);
            }
            log::info!("interrupted, stopping after the current cycle");
            stop.stop();
        })
        .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum StopReason {
    #[default]
    GameOver,
    Stopped,
    MoveLimit,
    Stalled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameOver => write!(f, "game over"),
            Self::Stopped => write!(f, "stopped"),
            Self::MoveLimit => write!(f, "move limit reached"),
            Self::Stalled => write!(f, "too many cycles in a row without a move"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct AutoPlaySummary {
    pub(crate) cycles: u32,
    pub(crate) moves: u32,
    pub(crate) no_ops: u32,
    pub(crate) failures: u32,
    pub(crate) reason: StopReason,
}

/// AutoPlayer runs move cycles back to back until the game ends or it is told to stop.
pub(crate) struct AutoPlayer {
    config: AutoPlayConfig,
}

impl AutoPlayer {
    pub(crate) fn new(mut config: AutoPlayConfig) -> Self {
        if config.max_consecutive_failures == 0 {
            log::warn!("a failure limit of 0 would stop before the first cycle, using 1");
            config.max_consecutive_failures = 1;
        }
        Self { config }
    }

    pub(crate) fn run<A, S>(
        &self,
        controller: &mut Controller<A, S>,
        stop: &StopHandle,
    ) -> Result<AutoPlaySummary>
    where
        A: Advisor,
        S: ExtractionService,
    {
        let mut summary = AutoPlaySummary::default();
        let (mut failed_in_a_row, mut idle_in_a_row) = (0, 0);
        summary.reason = loop {
            if stop.is_stopped() {
                break StopReason::Stopped;
            }
            match controller.session().status() {
                GameStatus::NotStarted => return Err(Error::NotStarted),
                GameStatus::GameOver => break StopReason::GameOver,
                GameStatus::Playing => (),
            }
            if matches!(self.config.max_moves, Some(max) if summary.moves >= max) {
                break StopReason::MoveLimit;
            }
            if idle_in_a_row >= self.config.max_consecutive_failures {
                break StopReason::Stalled;
            }

            summary.cycles += 1;
            let delay = match controller.run_cycle() {
                Ok(outcome) if outcome.applied.is_some() => {
                    summary.moves += 1;
                    (failed_in_a_row, idle_in_a_row) = (0, 0);
                    self.config.move_delay
                }
                Ok(outcome) => {
                    log::warn!("{} did not change the board", outcome.direction);
                    summary.no_ops += 1;
                    failed_in_a_row = 0;
                    idle_in_a_row += 1;
                    self.config.move_delay
                }
                Err(e) if e.is_recoverable() => {
                    summary.failures += 1;
                    failed_in_a_row += 1;
                    if failed_in_a_row >= self.config.max_consecutive_failures {
                        log::error!("giving up after {failed_in_a_row} failed cycles in a row");
                        return Err(e);
                    }
                    self.config.error_cooldown
                }
                Err(Error::GameOver) => break StopReason::GameOver,
                Err(e) => return Err(e),
            };
            pause(delay, stop);
        };
        log::info!(
            "auto-play finished ({}): {} moves over {} cycles, {} failures",
            summary.reason,
            summary.moves,
            summary.cycles,
            summary.failures
        );
        Ok(summary)
    }
}

fn pause(delay: Duration, stop: &StopHandle) {
    let mut left = delay;
    while !left.is_zero() && !stop.is_stopped() {
        let slice = left.min(PAUSE_SLICE);
        thread::sleep(slice);
        left -= slice;
    }
}
