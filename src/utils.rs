use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;

pub const DEFAULT_PREFIX: &str = "Triple";

const WORDS: [&str; 5] = ["Yo", "Yes", "Awesome", "GG", "YAY"];

/// `{prefix}_{word}_{word}` with two distinct words. Collisions between
/// sessions are possible and harmless.
pub fn make_nickname<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let words: Vec<&str> = WORDS.choose_multiple(rng, 2).copied().collect();
    format!("{}_{}", prefix, words.join("_"))
}

/// Milliseconds since the Unix epoch, used as a cache buster.
pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
