//! Stable error taxonomy (spec §7), grounded on the teacher's
//! `AdapterError` (`services/adapters/src/error.rs`): one `thiserror` enum
//! with structured variants and `#[from]` conversions for the usual I/O
//! boundary errors, instead of a grab-bag `anyhow::Error` at every layer.

use thiserror::Error;

use crate::ids::VenueId;

pub type ArbResult<T> = std::result::Result<T, ArbError>;

/// The seven stable error kinds surfaced to callers, logs, and
/// `api.errors` (spec §7). Every variant carries enough context to log
/// without a second lookup.
#[derive(Debug, Error)]
pub enum ArbError {
    /// Deadline exceeded on I/O or a state transition.
    #[error("timeout: {operation} on {venue} after {elapsed_ms}ms")]
    Timeout {
        venue: VenueId,
        operation: String,
        elapsed_ms: u64,
    },

    /// Venue/source unreachable after retries exhausted. Not fatal; the
    /// caller degrades (aggregator drops the source, connector stays
    /// disconnected) rather than propagating further.
    #[error("venue unavailable: {venue} ({reason})")]
    Unavailable { venue: VenueId, reason: String },

    /// Venue explicitly refused the request (bad price/size, insufficient
    /// funds). Terminal for that attempt.
    #[error("rejected by {venue}: {reason}")]
    Rejected { venue: VenueId, reason: String },

    /// Risk Manager denied the opportunity or position. Terminal for that
    /// opportunity.
    #[error("risk blocked: {reason}")]
    RiskBlocked { reason: String },

    /// Malformed request: invalid symbol, missing required field. Terminal.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// One leg of a paired execution filled, the other did not. Triggers
    /// rollback of the filled leg.
    #[error("partial fill: {filled_venue} filled, {other_venue} did not")]
    PartialFill {
        filled_venue: VenueId,
        other_venue: VenueId,
    },

    /// Bug or invariant violation. Logged and surfaced; the execution that
    /// triggered it is aborted rather than left in an ambiguous state.
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization failure at a bus or HTTP boundary.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArbError {
    /// Stable kind string as it appears in `api.errors` payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ArbError::Timeout { .. } => "TIMEOUT",
            ArbError::Unavailable { .. } => "UNAVAILABLE",
            ArbError::Rejected { .. } => "REJECTED",
            ArbError::RiskBlocked { .. } => "RISK_BLOCKED",
            ArbError::Invalid(_) => "INVALID",
            ArbError::PartialFill { .. } => "PARTIAL_FILL",
            ArbError::Internal(_) => "INTERNAL",
            ArbError::Json(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_spec_taxonomy() {
        let e = ArbError::RiskBlocked {
            reason: "daily loss limit".into(),
        };
        assert_eq!(e.kind(), "RISK_BLOCKED");
    }
}
