//! Span helpers for reconciliation ticks and claim transitions.

use tracing::Span;

use crate::event::ReactionAdded;
use crate::model::TrackedPair;

/// Span covering one reconciliation of one tracked pair.
///
/// `sync.posted`, `sync.retired` and `sync.marked` are declared empty and
/// filled in when the pass completes.
pub fn start_tick_span(pair: &TrackedPair) -> Span {
    tracing::info_span!(
        "sync.tick",
        "sync.guild" = %pair.guild,
        "sync.channel" = %pair.channel,
        "sync.resource" = %pair.resource,
        "sync.posted" = tracing::field::Empty,
        "sync.retired" = tracing::field::Empty,
        "sync.marked" = tracing::field::Empty,
    )
}

/// Span covering the handling of one reaction event.
pub fn start_claim_span(event: &ReactionAdded) -> Span {
    tracing::info_span!(
        "sync.claim",
        "sync.guild" = %event.guild,
        "sync.channel" = %event.channel,
        "sync.message" = %event.message,
        "sync.user" = %event.user,
        "sync.emoji" = %event.emoji,
    )
}

/// Record a claim state transition on the given span.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "claim_transition");
    });
}
