//! # Routing Key Matching
//!
//! Decides whether a published message's routing key reaches a queue bound
//! with a given binding key, according to the exchange type:
//!
//! - **Direct**: exact string equality
//! - **Fanout**: always matches
//! - **Topic**: both keys are split on `.`; `*` in the binding key matches
//!   exactly one routing segment and `#` matches zero or more consecutive
//!   segments. Every other binding segment must equal the aligned routing
//!   segment.
//!
//! Topic matching is an alignment of binding segments against routing
//! segments, solved with a boolean table where `dp[i][j]` holds when the first
//! `i` binding segments match the first `j` routing segments. A literal or
//! `*` cell extends its diagonal predecessor only, so an earlier mismatch can
//! never be skipped over: `aaa.bbb` does not match `xxx.bbb`.
//!
//! An empty key has zero segments, so an empty routing key matches only a
//! binding key made entirely of `#` segments (or the empty binding key).

use crate::protocol::ExchangeType;
use crate::{Result, TidemqError};

const SEPARATOR: char = '.';
const ONE_SEGMENT: &str = "*";
const ANY_SEGMENTS: &str = "#";

/// Longest routing key a message log record can hold
pub const MAX_ROUTING_KEY_LEN: usize = u16::MAX as usize;

fn segments(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split(SEPARATOR).collect()
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == SEPARATOR
}

/// A routing key may only contain ASCII letters, digits, `_` and `.`, and
/// is at most [`MAX_ROUTING_KEY_LEN`] bytes long
pub fn is_legal_routing_key(routing_key: &str) -> bool {
    routing_key.len() <= MAX_ROUTING_KEY_LEN && routing_key.chars().all(is_word_char)
}

/// A binding key may also contain `*` and `#`, each occupying a whole
/// segment, and never as one of the adjacent pairs `*.#`, `#.#` or `#.*`.
pub fn is_legal_binding_key(binding_key: &str) -> bool {
    if !binding_key
        .chars()
        .all(|ch| is_word_char(ch) || ch == '*' || ch == '#')
    {
        return false;
    }

    let parts = segments(binding_key);
    let mixed_wildcard = parts
        .iter()
        .any(|s| s.len() > 1 && (s.contains('*') || s.contains('#')));
    if mixed_wildcard {
        return false;
    }

    !parts.windows(2).any(|pair| {
        matches!(
            (pair[0], pair[1]),
            (ONE_SEGMENT, ANY_SEGMENTS) | (ANY_SEGMENTS, ANY_SEGMENTS) | (ANY_SEGMENTS, ONE_SEGMENT)
        )
    })
}

pub fn validate_routing_key(routing_key: &str) -> Result<()> {
    if routing_key.len() > MAX_ROUTING_KEY_LEN {
        return Err(TidemqError::InvalidKey(format!(
            "routing key of {} bytes exceeds {} bytes",
            routing_key.len(),
            MAX_ROUTING_KEY_LEN
        )));
    }
    if is_legal_routing_key(routing_key) {
        Ok(())
    } else {
        Err(TidemqError::InvalidKey(format!(
            "illegal routing key '{}'",
            routing_key
        )))
    }
}

pub fn validate_binding_key(binding_key: &str) -> Result<()> {
    if is_legal_binding_key(binding_key) {
        Ok(())
    } else {
        Err(TidemqError::InvalidKey(format!(
            "illegal binding key '{}'",
            binding_key
        )))
    }
}

/// Whether a message with `routing_key` is routed through a binding with
/// `binding_key` on an exchange of `exchange_type`.
pub fn route(exchange_type: ExchangeType, routing_key: &str, binding_key: &str) -> bool {
    match exchange_type {
        ExchangeType::Direct => routing_key == binding_key,
        ExchangeType::Fanout => true,
        ExchangeType::Topic => topic_match(routing_key, binding_key),
    }
}

fn topic_match(routing_key: &str, binding_key: &str) -> bool {
    let bkeys = segments(binding_key);
    let rkeys = segments(routing_key);
    let (n, m) = (bkeys.len(), rkeys.len());

    let mut dp = vec![vec![false; m + 1]; n + 1];
    dp[0][0] = true;

    // Leading `#` segments may swallow an empty prefix
    for i in 1..=n {
        if bkeys[i - 1] != ANY_SEGMENTS {
            break;
        }
        dp[i][0] = true;
    }

    for i in 1..=n {
        let bkey = bkeys[i - 1];
        for j in 1..=m {
            dp[i][j] = if bkey == ANY_SEGMENTS {
                // zero segments, or one more segment for the same `#`
                dp[i - 1][j] || dp[i][j - 1]
            } else if bkey == ONE_SEGMENT || bkey == rkeys[j - 1] {
                dp[i - 1][j - 1]
            } else {
                false
            };
        }
    }

    dp[n][m]
}
