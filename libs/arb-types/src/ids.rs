//! Identifier newtypes.
//!
//! Grounded on the teacher's `InstrumentId`/`VenueId` newtype discipline
//! (`libs/types/src/protocol/identifiers`), but simplified from a bijective
//! packed-`u64` encoding to plain `String`/`Uuid` wrappers: this platform's
//! wire format is JSON (spec §6), so there is no payoff for bit-packing and
//! every id needs to read naturally in a bus message or a log line.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical `BASE/QUOTE` symbol, e.g. `BTC/USDT`.
///
/// Connectors are responsible for translating to and from venue-native
/// encodings (`BTCUSDT`, `XBT/USD`, ...); the rest of the system only ever
/// sees this canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self(format!(
            "{}/{}",
            base.as_ref().to_ascii_uppercase(),
            quote.as_ref().to_ascii_uppercase()
        ))
    }

    /// Parse a canonical `BASE/QUOTE` string.
    pub fn parse(s: impl Into<String>) -> Result<Self, String> {
        let s = s.into();
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self(format!(
                "{}/{}",
                base.to_ascii_uppercase(),
                quote.to_ascii_uppercase()
            ))),
            _ => Err(format!("invalid canonical symbol: '{s}'")),
        }
    }

    pub fn base(&self) -> &str {
        self.0.split_once('/').map(|(b, _)| b).unwrap_or(&self.0)
    }

    pub fn quote(&self) -> &str {
        self.0.split_once('/').map(|(_, q)| q).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::parse(s).unwrap_or_else(|_| Symbol(s.to_ascii_uppercase()))
    }
}

/// Identifies a venue (exchange or DEX) by its canonical lowercase name,
/// e.g. `binance`, `coinbase`, `uniswap_v3`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        VenueId::new(s)
    }
}

/// Client-assigned order id. Unique per leg; derived deterministically from
/// the opportunity id so both legs of an execution are traceable without a
/// separate join table (spec §3 invariant: no two executions share a client
/// id on either leg).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    pub fn for_leg(opportunity: &OpportunityId, leg: &str) -> Self {
        Self(format!("{}-{}", opportunity.as_str(), leg))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-assigned order id, populated once the venue acknowledges a
/// placement. Absent until then.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueOrderId(String);

impl VenueOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies an `Opportunity` for the lifetime of one detection cycle.
/// Opportunities are consumed then discarded (spec §3); the id only needs
/// to stay unique long enough to derive client order ids from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpportunityId(String);

impl OpportunityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OpportunityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpportunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies an `Execution` (a paired buy/sell attempt) across its state
/// machine lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_canonicalizes_case() {
        let s = Symbol::parse("btc/usdt").unwrap();
        assert_eq!(s.as_str(), "BTC/USDT");
        assert_eq!(s.base(), "BTC");
        assert_eq!(s.quote(), "USDT");
    }

    #[test]
    fn symbol_rejects_malformed() {
        assert!(Symbol::parse("BTCUSDT").is_err());
        assert!(Symbol::parse("/USDT").is_err());
    }

    #[test]
    fn client_order_id_derives_deterministically_per_leg() {
        let opp = OpportunityId::new();
        let buy = ClientOrderId::for_leg(&opp, "buy");
        let sell = ClientOrderId::for_leg(&opp, "sell");
        assert_ne!(buy, sell);
        assert!(buy.as_str().starts_with(opp.as_str()));
    }
}
