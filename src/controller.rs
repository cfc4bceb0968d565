use std::time::Duration;

use crate::advisor::{Advisor, MoveRequest};
use crate::engine::direction::Direction;
use crate::engine::game::Applied;
use crate::engine::legal::{legal_moves, AllowedMoves};
use crate::error::{Error, Result};
use crate::extract::{ExtractionService, MoveExtractor};
use crate::session::{Activity, HistoryEntry, Session, SessionEvent};
use crate::stream::parser::{parse_stream, StreamFailure, Transcript};

/// The result of a completed move cycle.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CycleOutcome {
    pub(crate) allowed: AllowedMoves,
    pub(crate) direction: Direction,
    /// None when the recommended direction did not change the board.
    pub(crate) applied: Option<Applied>,
}

/// Controller runs move cycles: ask the advisor about the current board, follow its streamed
/// reply, extract a direction from the answer and apply it.
pub(crate) struct Controller<A: Advisor, S: ExtractionService> {
    session: Session,
    advisor: A,
    extractor: MoveExtractor<S>,
    retry_after: Option<Duration>,
}

impl<A: Advisor, S: ExtractionService> Controller<A, S> {
    pub(crate) fn new(session: Session, advisor: A, extractor: MoveExtractor<S>) -> Self {
        Self {
            session,
            advisor,
            extractor,
            retry_after: None,
        }
    }

    /// Mention the retry delay in the history entries recorded for failed cycles.
    pub(crate) fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    #[cfg(test)]
    pub(crate) fn advisor(&self) -> &A {
        &self.advisor
    }

    #[cfg(test)]
    pub(crate) fn extractor(&self) -> &MoveExtractor<S> {
        &self.extractor
    }

    pub(crate) fn into_session(self) -> Session {
        self.session
    }

    /// Run one move cycle against the current game.
    ///
    /// Stream and extraction failures are recorded in the history and returned; the board is left
    /// as it was and the cycle can simply be run again.
    pub(crate) fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let board = {
            let game = self.session.game().ok_or(Error::NotStarted)?;
            if game.is_game_over() {
                return Err(Error::GameOver);
            }
            game.board()
        };
        let _busy = self.session.busy().try_acquire().ok_or(Error::Busy)?;

        let allowed = legal_moves(&board);
        log::info!("asking for a move, legal moves: {allowed}");
        self.session.emit(SessionEvent::CycleStarted { allowed });
        let request = MoveRequest::new(&board, allowed);
        let entry = self.session.push_entry(HistoryEntry::default());

        let result = self.consult(entry, &request);
        self.session.set_activity(Activity::default());
        let direction = match result {
            Ok(direction) => direction,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        if let Some(entry) = self.session.entry_mut(entry) {
            entry.resolve(direction);
        }
        if !allowed.get(direction) {
            log::warn!("advisor recommended {direction}, which is not legal here");
        }
        let applied = self.session.apply_direction(direction)?;
        Ok(CycleOutcome {
            allowed,
            direction,
            applied,
        })
    }

    fn consult(&mut self, entry: usize, request: &MoveRequest) -> Result<Direction> {
        self.session.set_activity(Activity {
            loading: true,
            ..Default::default()
        });
        let tokens = self
            .advisor
            .recommend(request)
            .map_err(|error| StreamFailure::Transport {
                error,
                partial: Transcript::default(),
            })?;

        let session = &mut self.session;
        let streamed = parse_stream(tokens, |state, append| {
            log::debug!("{:?}: +{} bytes", state.phase(), append.fragment.len());
            if let Some(entry) = session.entry_mut(entry) {
                entry.append(append.phase, &append.fragment);
            }
            session.set_activity(Activity {
                loading: false,
                thinking: state.in_reasoning(),
                answering: state.in_answer(),
                extracting: false,
            });
            session.emit(SessionEvent::Appended {
                phase: append.phase,
                fragment: append.fragment.clone(),
            });
        });

        // usage is accounted for even when the stream failed
        let usage = match &streamed {
            Ok(transcript) => &transcript.usage,
            Err(failure) => &failure.partial().usage,
        };
        for usage in usage {
            log::debug!(
                "{}: {} input / {} output tokens",
                usage.model,
                usage.input_tokens,
                usage.output_tokens
            );
            if let Err(e) = self.session.store().record_usage(usage.clone()) {
                log::error!("failed to queue token usage: {e}");
            }
        }
        let transcript = streamed?;

        self.session.set_activity(Activity {
            extracting: true,
            ..Default::default()
        });
        self.session.emit(SessionEvent::Extracting);
        Ok(self.extractor.extract(&transcript.answer)?)
    }

    fn record_failure(&mut self, error: &Error) {
        let message = match self.retry_after {
            Some(delay) => format!("{error}. Trying again in {} seconds.", delay.as_secs()),
            None => error.to_string(),
        };
        log::warn!("move cycle failed: {message}");
        self.session.push_entry(HistoryEntry::failure(message.clone()));
        self.session.emit(SessionEvent::CycleFailed { message });
    }
}
