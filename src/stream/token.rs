use serde::{Deserialize, Serialize};

const REASONING_OPEN: &str = "<THINKING>";
const REASONING_CLOSE: &str = "</THINKING>";
const ANSWER_OPEN: &str = "<ANSWER>";
const ANSWER_CLOSE: &str = "</ANSWER>";
const CONTENT_START: &str = "<CONTENT_START>";
const CONTENT_END: &str = "<CONTENT_END>";
const USAGE_PREFIX: &str = "<USAGE>";

/// Token usage reported by the text generation service for one request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct TokenUsage {
    #[serde(default)]
    pub(crate) model: String,
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
    #[serde(default)]
    pub(crate) cache_creation_input_tokens: u64,
    #[serde(default)]
    pub(crate) cache_read_input_tokens: u64,
}

/// Token is the unit delivered by the text generation service: either a phase boundary or a
/// fragment of text belonging to whichever phase is open.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Token {
    ReasoningOpen,
    ReasoningClose,
    AnswerOpen,
    AnswerClose,
    Text(String),
    Usage(TokenUsage),
}

impl Token {
    pub(crate) fn text(fragment: impl Into<String>) -> Self {
        Self::Text(fragment.into())
    }

    /// Classify one raw chunk of the service's output. Framing markers carry no content and
    /// yield None.
    pub(crate) fn from_chunk(chunk: &str) -> Option<Self> {
        match chunk.trim() {
            REASONING_OPEN => Some(Self::ReasoningOpen),
            REASONING_CLOSE => Some(Self::ReasoningClose),
            ANSWER_OPEN => Some(Self::AnswerOpen),
            ANSWER_CLOSE => Some(Self::AnswerClose),
            CONTENT_START | CONTENT_END => None,
            trimmed if trimmed.starts_with(USAGE_PREFIX) => {
                match serde_json::from_str::<TokenUsage>(&trimmed[USAGE_PREFIX.len()..]) {
                    Ok(usage) => Some(Self::Usage(usage)),
                    Err(e) => {
                        log::warn!("ignoring malformed usage report {trimmed:?}: {e}");
                        None
                    }
                }
            }
            _ => Some(Self::Text(chunk.to_string())),
        }
    }
}

/// TransportError signals that the token stream broke before the service closed it.
#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq)]
#[error("transport failed: {0}")]
pub(crate) struct TransportError(pub(crate) String);

/// The ordered token stream of one move recommendation.
pub(crate) type TokenStream = Box<dyn Iterator<Item = Result<Token, TransportError>> + Send>;

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::reasoning_open("\n<THINKING>\n", Some(Token::ReasoningOpen))]
    #[case::reasoning_close("</THINKING>", Some(Token::ReasoningClose))]
    #[case::answer_open("  <ANSWER>", Some(Token::AnswerOpen))]
    #[case::answer_close("\n</ANSWER>\n", Some(Token::AnswerClose))]
    #[case::content_start("<CONTENT_START>", None)]
    #[case::content_end("<CONTENT_END>", None)]
    #[case::text("move left\n", Some(Token::text("move left\n")))]
    #[case::whitespace("\n", Some(Token::text("\n")))]
    #[case::marker_inside_text("use <ANSWER> tags", Some(Token::text("use <ANSWER> tags")))]
    fn classify(#[case] chunk: &str, #[case] expected: Option<Token>) {
        assert_eq!(Token::from_chunk(chunk), expected);
    }

    #[test]
    fn usage_report() {
        let token = Token::from_chunk(r#"<USAGE>{"model":"reasoner","input_tokens":120,"output_tokens":45}"#);
        assert_eq!(
            token,
            Some(Token::Usage(TokenUsage {
                model: "reasoner".to_string(),
                input_tokens: 120,
                output_tokens: 45,
                ..Default::default()
            }))
        );
        assert_eq!(Token::from_chunk("<USAGE>not json"), None);
    }
}
