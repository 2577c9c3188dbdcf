//! Routing-key matching for the three exchange kinds.
//!
//! Routing keys are dot-delimited segments (`army_moves.alice`). Topic
//! binding keys may use two wildcards:
//!
//! - `*` matches exactly one segment (`army_moves.*`).
//! - `#` matches zero or more segments (`game_logs.#`, or `#` alone).

use crate::ExchangeKind;

/// Returns `true` if a message published with `routing_key` should reach a
/// queue bound with `binding_key` on an exchange of the given kind.
pub fn binding_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(binding_key, routing_key),
    }
}

/// Matches a topic pattern against a routing key, segment by segment.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    match_segments(&segments(pattern), &segments(routing_key))
}

/// The empty string has no segments.
fn segments(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` swallows 0..=key.len() segments.
            (0..=key.len()).any(|n| match_segments(rest, &key[n..]))
        }
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => match_segments(rest, key_rest),
            None => false,
        },
        Some((word, rest)) => match key.split_first() {
            Some((segment, key_rest)) => segment == word && match_segments(rest, key_rest),
            None => false,
        },
    }
}
