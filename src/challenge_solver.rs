use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;

use crate::challenge_parser::{self, ChallengeDescriptor, ParseError};

#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeError {
    /// The reservation carried no challenge text at all.
    MissingChallenge,
    Parse(ParseError),
    TokenDecode(String),
    EmptyKey,
    InvalidCodePoint(u32),
}

impl std::fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeError::MissingChallenge => write!(f, "reservation response has no challenge"),
            ChallengeError::Parse(e) => write!(f, "challenge parse error: {}", e),
            ChallengeError::TokenDecode(e) => write!(f, "session token decode error: {}", e),
            ChallengeError::EmptyKey => write!(f, "solved key is empty"),
            ChallengeError::InvalidCodePoint(cp) => write!(f, "xor produced invalid code point {:#x}", cp),
        }
    }
}

impl std::error::Error for ChallengeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChallengeError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for ChallengeError {
    fn from(err: ParseError) -> Self {
        ChallengeError::Parse(err)
    }
}

/// Derives the XOR key: every character becomes `((code * position + offset) mod 77) + 48`.
pub fn derive_key(descriptor: &ChallengeDescriptor) -> String {
    descriptor
        .cipher_input
        .chars()
        .enumerate()
        .map(|(position, c)| {
            let value = (c as i128 * position as i128 + descriptor.offset as i128).rem_euclid(77) + 48;
            // value is always within 48..=124
            char::from(value as u8)
        })
        .collect()
}

/// XORs every character of `text` with `key`, repeating the key cyclically.
pub fn xor_with_key(text: &str, key: &str) -> Result<String, ChallengeError> {
    let key: Vec<u32> = key.chars().map(u32::from).collect();
    if key.is_empty() {
        return Err(ChallengeError::EmptyKey);
    }
    text.chars()
        .enumerate()
        .map(|(i, c)| {
            let code = u32::from(c) ^ key[i % key.len()];
            char::from_u32(code).ok_or(ChallengeError::InvalidCodePoint(code))
        })
        .collect()
}

/// Decodes the base64 session token as UTF-8 and XORs it with `key`.
pub fn connection_identifier(session_token: &str, key: &str) -> Result<String, ChallengeError> {
    let bytes = STANDARD
        .decode(session_token.trim())
        .map_err(|e| ChallengeError::TokenDecode(e.to_string()))?;
    let decoded = String::from_utf8(bytes).map_err(|e| ChallengeError::TokenDecode(e.to_string()))?;
    xor_with_key(&decoded, key)
}

/// Solves the challenge text and turns `session_token` into the connection
/// identifier used in the WebSocket path.
pub fn solve_challenge(session_token: &str, challenge_text: &str) -> Result<String, ChallengeError> {
    let descriptor = challenge_parser::parse_challenge(challenge_text)?;
    debug!("[Challenge] offset {}, cipher input {} chars", descriptor.offset, descriptor.cipher_input.len());
    let key = derive_key(&descriptor);
    connection_identifier(session_token, &key)
}
