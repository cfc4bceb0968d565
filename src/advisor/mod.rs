use std::io::{BufRead, BufReader, Lines, Write};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Serialize;

use crate::engine::board::{Board, Tile};
use crate::engine::legal::AllowedMoves;
use crate::stream::token::{Token, TokenStream, TransportError};

pub(crate) mod prompt;

/// MoveRequest is everything the text generation service is told about the position.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MoveRequest {
    pub(crate) board: Vec<Tile>,
    pub(crate) legal_moves: AllowedMoves,
    pub(crate) prompt: String,
}

impl MoveRequest {
    pub(crate) fn new(board: &Board, legal_moves: AllowedMoves) -> Self {
        Self {
            board: board.to_flat(),
            legal_moves,
            prompt: prompt::render(board, &legal_moves),
        }
    }
}

/// Advisor is the text generation service asked for a move recommendation.
pub(crate) trait Advisor {
    fn recommend(&mut self, request: &MoveRequest) -> Result<TokenStream, TransportError>;
}

/// CommandAdvisor runs a shell command per request. The request is written to its stdin as a
/// single JSON line; every line it prints is one chunk of the reply.
pub(crate) struct CommandAdvisor {
    command: String,
}

impl CommandAdvisor {
    pub(crate) fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Advisor for CommandAdvisor {
    fn recommend(&mut self, request: &MoveRequest) -> Result<TokenStream, TransportError> {
        let line = serde_json::to_string(request)
            .map_err(|e| TransportError(format!("encoding request: {e}")))?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| TransportError(format!("spawning {:?}: {e}", self.command)))?;
        log::debug!("spawned advisor {:?} as pid {}", self.command, child.id());

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_and_reap(&mut child);
            return Err(TransportError("advisor pipes unavailable".to_string()));
        };
        // from here on dropping `tokens` kills and reaps the child
        let tokens = ChildTokens {
            lines: BufReader::new(stdout).lines(),
            child: Some(child),
        };
        let written = writeln!(stdin, "{line}");
        // closing stdin marks the end of the request
        drop(stdin);
        written.map_err(|e| TransportError(format!("writing request: {e}")))?;
        Ok(Box::new(tokens))
    }
}

// ChildTokens turns the stdout of an advisor process into tokens. The process exit status is
// checked once its output is exhausted.
struct ChildTokens {
    lines: Lines<BufReader<ChildStdout>>,
    child: Option<Child>,
}

impl ChildTokens {
    fn reap(&mut self) -> Result<(), TransportError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| TransportError(format!("waiting for advisor: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(TransportError(format!("advisor exited with {status}")))
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&mut child);
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("killing pid {}: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        log::warn!("reaping pid {}: {e}", child.id());
    }
}

impl Iterator for ChildTokens {
    type Item = Result<Token, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;
        loop {
            match self.lines.next() {
                Some(Ok(line)) => match Token::from_chunk(&line) {
                    Some(Token::Text(text)) => return Some(Ok(Token::text(text + "\n"))),
                    Some(token) => return Some(Ok(token)),
                    None => continue,
                },
                Some(Err(e)) => {
                    self.kill();
                    return Some(Err(TransportError(format!("reading advisor output: {e}"))));
                }
                None => return self.reap().err().map(Err),
            }
        }
    }
}

impl Drop for ChildTokens {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;

    use super::*;

    pub(crate) enum Script {
        Tokens(Vec<Result<Token, TransportError>>),
        Refuse(String),
    }

    impl Script {
        /// A well formed reply: some reasoning, then `answer`.
        pub(crate) fn answer(answer: &str) -> Self {
            Self::Tokens(
                vec![
                    Token::ReasoningOpen,
                    Token::text("looking at the board"),
                    Token::ReasoningClose,
                    Token::AnswerOpen,
                    Token::text(answer),
                    Token::AnswerClose,
                ]
                .into_iter()
                .map(Ok)
                .collect(),
            )
        }
    }

    /// Waits for `path` to hold a pid written by a child shell.
    pub(crate) fn read_pid(path: &std::path::Path) -> u32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("no pid in {}", path.display());
    }

    /// ScriptedAdvisor replays canned replies in order and remembers every request.
    #[derive(Default)]
    pub(crate) struct ScriptedAdvisor {
        scripts: VecDeque<Script>,
        pub(crate) requests: Vec<MoveRequest>,
    }

    impl ScriptedAdvisor {
        pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
            Self {
                scripts: scripts.into_iter().collect(),
                requests: Vec::new(),
            }
        }
    }

    impl Advisor for ScriptedAdvisor {
        fn recommend(&mut self, request: &MoveRequest) -> Result<TokenStream, TransportError> {
            self.requests.push(request.clone());
            match self.scripts.pop_front() {
                Some(Script::Tokens(tokens)) => Ok(Box::new(tokens.into_iter())),
                Some(Script::Refuse(reason)) => Err(TransportError(reason)),
                None => Err(TransportError("script exhausted".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::legal::legal_moves;
    use crate::stream::parser::parse_stream;

    fn request() -> MoveRequest {
        let board = Board::from_rows([[2, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 2]]);
        MoveRequest::new(&board, legal_moves(&board))
    }

    #[test]
    fn request_json_shape() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(value["board"].as_array().unwrap().len(), 16);
        assert_eq!(value["board"][15], 2);
        assert_eq!(value["legalMoves"]["left"], true);
        assert!(value["prompt"].as_str().unwrap().contains("<BOARD>"));
    }

    #[test]
    fn command_advisor_streams_lines() {
        let script = "cat > /dev/null; printf '<CONTENT_START>\\n<THINKING>\\nslide it\\n</THINKING>\\n<ANSWER>\\nleft\\n</ANSWER>\\n<CONTENT_END>\\n'";
        let mut advisor = CommandAdvisor::new(script);
        let tokens = advisor.recommend(&request()).expect("spawned");
        let transcript = parse_stream(tokens, |_, _| ()).expect("answer");
        assert_eq!(transcript.reasoning, "slide it\n");
        assert_eq!(transcript.answer, "left\n");
    }

    #[test]
    fn command_advisor_failure_is_transport_error() {
        let mut advisor = CommandAdvisor::new("cat > /dev/null; echo '<ANSWER>'; echo up; exit 3");
        let tokens = advisor.recommend(&request()).expect("spawned");
        let results = tokens.collect::<Vec<_>>();
        assert_eq!(results[0], Ok(Token::AnswerOpen));
        assert_eq!(results[1], Ok(Token::text("up\n")));
        assert!(matches!(results.last(), Some(Err(TransportError(_)))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn child_is_reaped_when_the_request_cannot_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut advisor = CommandAdvisor::new(format!(
            "echo $$ > {}; exec 0<&-; sleep 30",
            pid_file.display()
        ));
        // larger than a pipe buffer, so the write is still blocked when stdin closes
        let mut request = request();
        request.prompt = "x".repeat(1 << 20);

        let started = std::time::Instant::now();
        assert!(advisor.recommend(&request).is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        let pid = scripted::read_pid(&pid_file);
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }
}
