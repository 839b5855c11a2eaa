//! Intent router: map one user utterance to (target assistant, residual
//! task) via an ordered multilingual pattern catalogue.
//!
//! Patterns are data, not code; the whole catalogue lives in
//! [`catalogue`] so reordering or adding languages never touches the
//! matching logic.

mod catalogue;

pub use catalogue::{IntentFamily, RoutePattern, catalogue, render};

use serde::Serialize;
use tracing::debug;

use cao_core::AssistantName;

/// Result of routing one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Routing {
    /// Target assistant, or `None` when no pattern matched (the caller
    /// falls back to its default routing policy).
    pub target: Option<AssistantName>,
    /// The remaining task text (the whole trimmed input when unrouted).
    pub residual: String,
    /// Name of the matching catalogue pattern.
    pub pattern: Option<&'static str>,
}

/// Apply the ordered catalogue; the first matching pattern wins.
///
/// A capture whose assistant name is outside the known set counts as no
/// match and the scan continues. Empty residual tasks are accepted only
/// for the direct-addressing family.
pub fn route(input: &str) -> Routing {
    let input = input.trim();

    for pattern in catalogue() {
        let Some(caps) = pattern.regex.captures(input) else {
            continue;
        };
        let Some(target) = caps
            .name("assistant")
            .and_then(|m| AssistantName::parse(m.as_str()))
        else {
            continue;
        };
        let residual = caps
            .name("task")
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if residual.is_empty() && pattern.family != IntentFamily::DirectAddress {
            continue;
        }

        debug!(pattern = pattern.name, target = %target, "routed");
        return Routing {
            target: Some(target),
            residual: residual.to_string(),
            pattern: Some(pattern.name),
        };
    }

    Routing {
        target: None,
        residual: input.to_string(),
        pattern: None,
    }
}
