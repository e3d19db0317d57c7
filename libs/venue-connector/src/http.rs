//! Shared HTTP error classification for REST-polling connectors, grounded
//! on `services/adapters/src/common.rs`'s venue-tagged error mapping.

use arb_types::{ArbError, VenueId};

/// Classify a `reqwest` failure into the platform's stable error taxonomy.
/// Connection/timeout failures map to `Timeout` so the retry combinator's
/// backoff applies; anything else (body decode, status code) surfaces as
/// `Unavailable` so the caller degrades rather than panics.
pub fn map_reqwest_err(venue: &VenueId, operation: &str, err: reqwest::Error) -> ArbError {
    if err.is_timeout() || err.is_connect() {
        ArbError::Timeout {
            venue: venue.clone(),
            operation: operation.to_string(),
            elapsed_ms: 0,
        }
    } else {
        ArbError::Unavailable {
            venue: venue.clone(),
            reason: err.to_string(),
        }
    }
}

/// Map a non-2xx HTTP status into `Unavailable` (server-side) or
/// `Rejected` (client-side, e.g. bad symbol or insufficient funds).
pub fn map_status_err(venue: &VenueId, status: reqwest::StatusCode, body: &str) -> ArbError {
    if status.is_client_error() {
        ArbError::Rejected {
            venue: venue.clone(),
            reason: format!("{status}: {body}"),
        }
    } else {
        ArbError::Unavailable {
            venue: venue.clone(),
            reason: format!("{status}: {body}"),
        }
    }
}
