use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::engine::direction::Direction;

#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ExtractionError {
    #[error("extraction service failed: {0}")]
    Service(String),

    #[error("extraction service returned no move")]
    Absent,

    #[error("malformed extraction response: {0}")]
    Malformed(String),

    #[error("extraction response named an unknown direction {0:?}")]
    UnknownDirection(String),
}

/// The request handed to the extraction service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractRequest {
    pub(crate) answer_text: String,
}

/// ExtractionService is the external collaborator that reads a free form answer and returns its
/// raw reply, if any.
pub(crate) trait ExtractionService {
    fn submit(&mut self, request: &ExtractRequest) -> Result<Option<String>, ExtractionError>;
}

// The accepted reply shapes: the tool call input `{"move": "left"}` or a bare `"left"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Tool {
        #[serde(rename = "move")]
        direction: String,
    },
    Bare(String),
}

/// MoveExtractor packages an answer for the extraction service and validates its reply. There is
/// no local fallback: a reply that is not exactly one of the four directions is an error.
pub(crate) struct MoveExtractor<S: ExtractionService> {
    service: S,
}

impl<S: ExtractionService> MoveExtractor<S> {
    pub(crate) fn new(service: S) -> Self {
        Self { service }
    }

    #[cfg(test)]
    pub(crate) fn service(&self) -> &S {
        &self.service
    }

    pub(crate) fn extract(&mut self, answer_text: &str) -> Result<Direction, ExtractionError> {
        let request = ExtractRequest {
            answer_text: answer_text.to_string(),
        };
        let reply = self.service.submit(&request)?;
        let direction = decode_reply(reply.as_deref())?;
        log::debug!("extracted {direction} from {} bytes of answer", answer_text.len());
        Ok(direction)
    }
}

pub(crate) fn decode_reply(reply: Option<&str>) -> Result<Direction, ExtractionError> {
    let reply = match reply.map(str::trim) {
        None | Some("") => return Err(ExtractionError::Absent),
        Some(reply) => reply,
    };
    let value = match serde_json::from_str::<Reply>(reply) {
        Ok(Reply::Tool { direction }) | Ok(Reply::Bare(direction)) => direction,
        Err(e) => return Err(ExtractionError::Malformed(format!("{reply:?}: {e}"))),
    };
    value
        .parse::<Direction>()
        .map_err(|e| ExtractionError::UnknownDirection(e.0))
}

/// CommandExtractor runs a shell command per request, writing the request as JSON to its stdin
/// and treating its stdout as the reply.
pub(crate) struct CommandExtractor {
    command: String,
}

impl CommandExtractor {
    pub(crate) fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ExtractionService for CommandExtractor {
    fn submit(&mut self, request: &ExtractRequest) -> Result<Option<String>, ExtractionError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| ExtractionError::Service(format!("encoding request: {e}")))?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExtractionError::Service(format!("spawning {:?}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&body) {
                drop(stdin);
                if let Err(kill) = child.kill() {
                    log::debug!("killing extractor pid {}: {kill}", child.id());
                }
                if let Err(wait) = child.wait() {
                    log::warn!("reaping extractor pid {}: {wait}", child.id());
                }
                return Err(ExtractionError::Service(format!("writing request: {e}")));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExtractionError::Service(format!("waiting for extractor: {e}")))?;
        if !output.status.success() {
            return Err(ExtractionError::Service(format!(
                "extractor exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(if stdout.trim().is_empty() {
            None
        } else {
            Some(stdout)
        })
    }
}

#[cfg(test)]
pub(crate) mod canned {
    use std::collections::VecDeque;

    use super::*;

    /// CannedExtractor answers requests from a queue of prepared replies.
    #[derive(Default)]
    pub(crate) struct CannedExtractor {
        replies: VecDeque<Result<Option<String>, ExtractionError>>,
        pub(crate) requests: Vec<ExtractRequest>,
    }

    impl CannedExtractor {
        pub(crate) fn new(
            replies: impl IntoIterator<Item = Result<Option<String>, ExtractionError>>,
        ) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                requests: Vec::new(),
            }
        }

        pub(crate) fn moves(directions: impl IntoIterator<Item = Direction>) -> Self {
            Self::new(
                directions
                    .into_iter()
                    .map(|d| Ok(Some(format!(r#"{{"move":"{d}"}}"#)))),
            )
        }
    }

    impl ExtractionService for CannedExtractor {
        fn submit(&mut self, request: &ExtractRequest) -> Result<Option<String>, ExtractionError> {
            self.requests.push(request.clone());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::Service("no reply queued".to_string())))
        }
    }
}
