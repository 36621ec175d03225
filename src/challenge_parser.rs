use regex::Regex;
use once_cell::sync::Lazy;

use crate::arith::{self, EvalError};

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"offset = ([^;]*);").expect("Failed to compile offset regex")
});
static CIPHER_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"this, '([^']*)'").expect("Failed to compile cipher input regex")
});

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    OffsetNotFound,
    CipherInputNotFound,
    InvalidOffset { expression: String, source: EvalError },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::OffsetNotFound => write!(f, "'offset = ...;' not found in challenge"),
            ParseError::CipherInputNotFound => write!(f, "\"this, '...'\" not found in challenge"),
            ParseError::InvalidOffset { expression, source } => {
                write!(f, "offset expression '{}' is not plain arithmetic: {}", expression, source)
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::InvalidOffset { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Offset and cipher input pulled out of a server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
    pub offset: i64,
    pub cipher_input: String,
}

/// Removes tab characters and every non-ASCII character.
pub fn clean_challenge_text(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii() && *c != '\t').collect()
}

/// Extracts the `offset` expression and the quoted cipher input from the
/// challenge text, evaluating the former.
pub fn parse_challenge(raw: &str) -> Result<ChallengeDescriptor, ParseError> {
    let text = clean_challenge_text(raw);

    let expression = OFFSET_RE
        .captures(&text)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::OffsetNotFound)?
        .as_str();
    let offset = arith::eval_integer(expression).map_err(|source| ParseError::InvalidOffset {
        expression: expression.to_string(),
        source,
    })?;

    let cipher_input = CIPHER_INPUT_RE
        .captures(&text)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::CipherInputNotFound)?
        .as_str()
        .to_string();

    Ok(ChallengeDescriptor { offset, cipher_input })
}
