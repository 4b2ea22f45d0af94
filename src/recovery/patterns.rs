//! Error-signature classification for the two recovery tracks.
//!
//! Instant patterns are a small fixed set of known signatures with a known
//! best response; the transient classifier is the broader gate for the
//! backoff-based gradual track. Pure functions, regex-backed, for
//! testability.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Immediate, non-backoff recovery action for a matched signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantFix {
    /// Give the subtree another render pass after `delay`.
    Rerender { delay: Duration },
    /// Full navigation reload after `delay`.
    Reload { delay: Duration },
}

fn render_contract_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)objects are not valid as a react child|minified react error")
            .expect("static regex")
    })
}

fn chunk_load_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)loading chunk \S+ failed|chunkloaderror|failed to fetch dynamically imported module")
            .expect("static regex")
    })
}

fn network_cors_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Deliberately narrow: the broad "network" keyword belongs to the
    // transient classifier, not the instant track.
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bnetworkerror\b|\bcors\b|access-control-allow-origin")
            .expect("static regex")
    })
}

fn transient_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)network|timed?\s?out|timeout|fetch|abort|loading chunk|chunkload")
            .expect("static regex")
    })
}

/// Test message and stack against the fixed instant-signature set.
///
/// - Rendering contract violation: a re-render usually clears it — short delay.
/// - Chunk-load failure: stale bundle references require a full reload.
/// - Narrow network/CORS signature: re-render after a longer settle delay.
pub fn match_instant_fix(message: &str, stack: Option<&str>) -> Option<InstantFix> {
    let haystack = match stack {
        Some(stack) => format!("{message}\n{stack}"),
        None => message.to_string(),
    };

    if render_contract_re().is_match(&haystack) {
        return Some(InstantFix::Rerender {
            delay: Duration::from_millis(500),
        });
    }
    if chunk_load_re().is_match(&haystack) {
        return Some(InstantFix::Reload {
            delay: Duration::from_millis(1000),
        });
    }
    if network_cors_re().is_match(&haystack) {
        return Some(InstantFix::Rerender {
            delay: Duration::from_millis(2000),
        });
    }
    None
}

/// Broader "likely transient" gate for the gradual self-healing track.
pub fn is_likely_transient(message: &str) -> bool {
    transient_re().is_match(message)
}
