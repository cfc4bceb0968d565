//! Demultiplexes a token stream into reasoning and answer text.
//!
//! The parser is a pure fold: `ParserState::step` consumes one token and returns the next state
//! together with the text appends that token produced, so every partial buffer can be observed
//! as it grows. `parse_stream` drives the fold over a live or canned stream.

use super::token::{Token, TokenUsage, TransportError};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Phase {
    Reasoning,
    Answer,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reasoning => write!(f, "reasoning"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// ParserPhase projects the parser latches onto the linear session states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParserPhase {
    Idle,
    ReasoningOpen,
    AwaitingAnswer,
    AnswerOpen,
    Done,
}

/// A fragment of text appended to one of the buffers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Append {
    pub(crate) phase: Phase,
    pub(crate) fragment: String,
}

/// The text collected from one stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Transcript {
    pub(crate) reasoning: String,
    pub(crate) answer: String,
    pub(crate) usage: Vec<TokenUsage>,
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub(crate) enum StreamFailure {
    #[error("{error}")]
    Transport {
        error: TransportError,
        partial: Transcript,
    },

    #[error("stream ended without producing an answer")]
    NoAnswer { partial: Transcript },
}

impl StreamFailure {
    pub(crate) fn partial(&self) -> &Transcript {
        match self {
            Self::Transport { partial, .. } | Self::NoAnswer { partial } => partial,
        }
    }
}

/// How a stream terminated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum StreamEnd {
    Closed,
    Transport(TransportError),
}

/// One fold step: the state after a token and the appends it caused, in buffer order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Step {
    pub(crate) state: ParserState,
    pub(crate) appends: Vec<Append>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ParserState {
    reasoning: String,
    answer: String,
    in_reasoning: bool,
    in_answer: bool,
    reasoning_closed: bool,
    answer_closed: bool,
    usage: Vec<TokenUsage>,
}

impl ParserState {
    #[cfg(test)]
    pub(crate) fn reasoning(&self) -> &str {
        &self.reasoning
    }

    #[cfg(test)]
    pub(crate) fn answer(&self) -> &str {
        &self.answer
    }

    pub(crate) fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    pub(crate) fn in_answer(&self) -> bool {
        self.in_answer
    }

    pub(crate) fn phase(&self) -> ParserPhase {
        if self.in_answer {
            ParserPhase::AnswerOpen
        } else if self.in_reasoning {
            ParserPhase::ReasoningOpen
        } else if self.answer_closed {
            ParserPhase::Done
        } else if self.reasoning_closed {
            ParserPhase::AwaitingAnswer
        } else {
            ParserPhase::Idle
        }
    }

    pub(crate) fn step(mut self, token: &Token) -> Step {
        let mut appends = Vec::new();
        match token {
            Token::ReasoningOpen => self.in_reasoning = true,
            Token::ReasoningClose => {
                self.reasoning_closed |= self.in_reasoning;
                self.in_reasoning = false;
            }
            Token::AnswerOpen => self.in_answer = true,
            Token::AnswerClose => {
                self.answer_closed |= self.in_answer;
                self.in_answer = false;
            }
            Token::Usage(usage) => self.usage.push(usage.clone()),
            Token::Text(fragment) if fragment.is_empty() => (),
            Token::Text(fragment) => {
                if self.in_reasoning {
                    self.reasoning.push_str(fragment);
                    appends.push(Append {
                        phase: Phase::Reasoning,
                        fragment: fragment.clone(),
                    });
                }
                if self.in_answer {
                    self.answer.push_str(fragment);
                    appends.push(Append {
                        phase: Phase::Answer,
                        fragment: fragment.clone(),
                    });
                }
                if appends.is_empty() {
                    log::trace!("dropping {} bytes outside any phase", fragment.len());
                }
            }
        }
        Step {
            state: self,
            appends,
        }
    }

    /// Close any open phase and settle the stream outcome.
    pub(crate) fn finish(mut self, end: StreamEnd) -> Result<Transcript, StreamFailure> {
        self = self.step(&Token::ReasoningClose).state;
        self = self.step(&Token::AnswerClose).state;
        let partial = Transcript {
            reasoning: self.reasoning,
            answer: self.answer,
            usage: self.usage,
        };
        match end {
            StreamEnd::Transport(error) => Err(StreamFailure::Transport { error, partial }),
            StreamEnd::Closed if partial.answer.is_empty() => {
                Err(StreamFailure::NoAnswer { partial })
            }
            StreamEnd::Closed => Ok(partial),
        }
    }
}

/// Fold every token of `tokens` in arrival order, invoking `on_append` with the updated state
/// after each append.
pub(crate) fn parse_stream<I, F>(tokens: I, mut on_append: F) -> Result<Transcript, StreamFailure>
where
    I: IntoIterator<Item = Result<Token, TransportError>>,
    F: FnMut(&ParserState, &Append),
{
    let mut state = ParserState::default();
    for token in tokens {
        match token {
            Ok(token) => {
                let step = state.step(&token);
                state = step.state;
                for append in &step.appends {
                    on_append(&state, append);
                }
            }
            Err(error) => {
                log::warn!("token stream broke: {error}");
                return state.finish(StreamEnd::Transport(error));
            }
        }
    }
    state.finish(StreamEnd::Closed)
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    fn ok(tokens: Vec<Token>) -> Vec<Result<Token, TransportError>> {
        tokens.into_iter().map(Ok).collect()
    }

    fn canonical() -> Vec<Token> {
        vec![
            Token::ReasoningOpen,
            Token::text("a"),
            Token::text("b"),
            Token::ReasoningClose,
            Token::AnswerOpen,
            Token::text("x"),
            Token::AnswerClose,
        ]
    }

    #[test]
    fn canonical_stream() {
        let mut observed = Vec::new();
        let transcript = parse_stream(ok(canonical()), |state, append| {
            observed.push((
                state.reasoning().to_string(),
                state.answer().to_string(),
                append.clone(),
            ));
        })
        .expect("answer was produced");

        assert_eq!(transcript.reasoning, "ab");
        assert_eq!(transcript.answer, "x");
        assert_eq!(
            observed,
            vec![
                (
                    "a".to_string(),
                    "".to_string(),
                    Append { phase: Phase::Reasoning, fragment: "a".to_string() }
                ),
                (
                    "ab".to_string(),
                    "".to_string(),
                    Append { phase: Phase::Reasoning, fragment: "b".to_string() }
                ),
                (
                    "ab".to_string(),
                    "x".to_string(),
                    Append { phase: Phase::Answer, fragment: "x".to_string() }
                ),
            ]
        );
    }

    #[test]
    fn fold_phases() {
        let phases = canonical()
            .iter()
            .scan(ParserState::default(), |state, token| {
                let step = state.clone().step(token);
                *state = step.state;
                Some(state.phase())
            })
            .collect::<Vec<_>>();
        assert_eq!(
            phases,
            vec![
                ParserPhase::ReasoningOpen,
                ParserPhase::ReasoningOpen,
                ParserPhase::ReasoningOpen,
                ParserPhase::AwaitingAnswer,
                ParserPhase::AnswerOpen,
                ParserPhase::AnswerOpen,
                ParserPhase::Done,
            ]
        );
    }

    #[test]
    fn step_leaves_previous_state_untouched() {
        let before = ParserState::default().step(&Token::AnswerOpen).state;
        let after = before.clone().step(&Token::text("left")).state;
        assert_eq!(before.answer(), "");
        assert_eq!(after.answer(), "left");
    }

    #[rstest]
    #[case::answer_only(vec![Token::AnswerOpen, Token::text("up"), Token::AnswerClose], "", "up")]
    #[case::answer_before_reasoning(
        vec![
            Token::AnswerOpen, Token::text("down"), Token::AnswerClose,
            Token::ReasoningOpen, Token::text("hmm"), Token::ReasoningClose,
        ],
        "hmm",
        "down",
    )]
    #[case::text_outside_phases_dropped(
        vec![Token::text("noise"), Token::AnswerOpen, Token::text("left"), Token::AnswerClose, Token::text("tail")],
        "",
        "left",
    )]
    #[case::both_open_feeds_both(
        vec![Token::ReasoningOpen, Token::AnswerOpen, Token::text("z"), Token::AnswerClose, Token::ReasoningClose],
        "z",
        "z",
    )]
    #[case::unclosed_answer(vec![Token::AnswerOpen, Token::text("ri"), Token::text("ght")], "", "right")]
    #[case::reopened_answer(
        vec![Token::AnswerOpen, Token::text("a"), Token::AnswerClose, Token::AnswerOpen, Token::text("b")],
        "",
        "ab",
    )]
    fn transcripts(#[case] tokens: Vec<Token>, #[case] reasoning: &str, #[case] answer: &str) {
        let transcript = parse_stream(ok(tokens), |_, _| ()).expect("answer was produced");
        assert_eq!(transcript.reasoning, reasoning);
        assert_eq!(transcript.answer, answer);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::reasoning_only(vec![Token::ReasoningOpen, Token::text("thinking"), Token::ReasoningClose])]
    #[case::empty_answer(vec![Token::AnswerOpen, Token::text(""), Token::AnswerClose])]
    fn no_answer(#[case] tokens: Vec<Token>) {
        let reasoning = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect::<String>();
        let err = parse_stream(ok(tokens), |_, _| ()).unwrap_err();
        assert!(matches!(err, StreamFailure::NoAnswer { .. }));
        assert_eq!(err.partial().reasoning, reasoning);
    }

    #[test]
    fn transport_error_preserves_partial_text() {
        let tokens = vec![
            Ok(Token::ReasoningOpen),
            Ok(Token::text("half a thought")),
            Ok(Token::ReasoningClose),
            Ok(Token::AnswerOpen),
            Ok(Token::text("lef")),
            Err(TransportError("connection reset".to_string())),
            Ok(Token::text("never seen")),
        ];
        let mut appends = 0;
        let err = parse_stream(tokens, |_, _| appends += 1).unwrap_err();
        match err {
            StreamFailure::Transport { error, partial } => {
                assert_eq!(error, TransportError("connection reset".to_string()));
                assert_eq!(partial.reasoning, "half a thought");
                assert_eq!(partial.answer, "lef");
            }
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert_eq!(appends, 2);
    }

    #[test]
    fn transport_error_closes_open_phases() {
        let state = ParserState::default()
            .step(&Token::ReasoningOpen)
            .state
            .step(&Token::text("x"))
            .state;
        assert_eq!(state.phase(), ParserPhase::ReasoningOpen);
        let err = state
            .finish(StreamEnd::Transport(TransportError("eof".to_string())))
            .unwrap_err();
        assert!(matches!(err, StreamFailure::Transport { .. }));
        assert_eq!(err.partial().reasoning, "x");
        assert_eq!(err.partial().answer, "");
    }

    #[test]
    fn usage_is_collected() {
        let usage = TokenUsage {
            model: "reasoner".to_string(),
            input_tokens: 10,
            output_tokens: 3,
            ..Default::default()
        };
        let mut tokens = canonical();
        tokens.push(Token::Usage(usage.clone()));
        let transcript = parse_stream(ok(tokens), |_, _| ()).unwrap();
        assert_eq!(transcript.usage, vec![usage]);
    }
}
