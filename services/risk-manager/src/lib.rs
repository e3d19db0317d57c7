//! # Risk Manager
//!
//! Process-wide gatekeeper for opportunities and candidate positions
//! (spec §4.6). Holds `RiskState` under a `parking_lot::Mutex` (the
//! teacher's lock of choice throughout); each gate is a named, independent
//! check so a rejection always carries a specific reason.
//!
//! The teacher carries no risk crate of its own — its DEX strategies lean
//! on on-chain transaction simulation instead of a standing risk gate —
//! so this module is grounded on `examples/brbtavares-tucano/risk/src/
//! check/mod.rs`'s named-check-returning-pass/fail shape, adapted into
//! the teacher's `thiserror`/`tracing` idiom.

use arb_types::{Opportunity, RiskState, Symbol};
use chrono::{DateTime, Utc};
use config::RiskLimits;
use rust_decimal::Decimal;

/// A risk check's rejection reason. Carries the check's name so a denial
/// logged or published to `api.errors` can be traced to one gate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("risk check '{check}' failed: {reason}")]
pub struct RiskViolation {
    pub check: &'static str,
    pub reason: String,
}

/// Everything an opportunity-level check needs, assembled once per
/// `is_opportunity_safe` call so individual checks stay pure.
pub struct OpportunityContext {
    pub notional: Decimal,
    pub symbol: Symbol,
    pub open_symbols: Vec<Symbol>,
    pub open_position_count: u32,
}

/// A single named gate (spec §4.6 "Checks"). Mirrors the teacher's
/// `RiskCheck` trait shape, specialized to this platform's two input
/// contexts instead of a generic `T`.
pub trait RiskCheck: Send + Sync {
    type Input;

    fn name(&self) -> &'static str;
    fn check(&self, input: &Self::Input, limits: &RiskLimits, state: &RiskState) -> Result<(), RiskViolation>;
}

struct MaxPositionSize;
impl RiskCheck for MaxPositionSize {
    type Input = OpportunityContext;

    fn name(&self) -> &'static str {
        "max_position_size"
    }

    fn check(&self, input: &Self::Input, limits: &RiskLimits, _state: &RiskState) -> Result<(), RiskViolation> {
        if input.notional > limits.max_position_size {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!(
                    "notional {} exceeds max_position_size {}",
                    input.notional, limits.max_position_size
                ),
            });
        }
        Ok(())
    }
}

struct MaxDailyLoss;
impl RiskCheck for MaxDailyLoss {
    type Input = OpportunityContext;

    fn name(&self) -> &'static str {
        "max_daily_loss"
    }

    fn check(&self, _input: &Self::Input, limits: &RiskLimits, state: &RiskState) -> Result<(), RiskViolation> {
        if state.daily_pnl <= -limits.max_daily_loss {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!(
                    "daily pnl {} has reached max_daily_loss {}",
                    state.daily_pnl, limits.max_daily_loss
                ),
            });
        }
        Ok(())
    }
}

struct MaxDailyTrades;
impl RiskCheck for MaxDailyTrades {
    type Input = OpportunityContext;

    fn name(&self) -> &'static str {
        "max_daily_trades"
    }

    fn check(&self, _input: &Self::Input, limits: &RiskLimits, state: &RiskState) -> Result<(), RiskViolation> {
        if state.daily_trades >= limits.max_daily_trades {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!(
                    "daily trades {} has reached max_daily_trades {}",
                    state.daily_trades, limits.max_daily_trades
                ),
            });
        }
        Ok(())
    }
}

struct MaxOpenPositions;
impl RiskCheck for MaxOpenPositions {
    type Input = OpportunityContext;

    fn name(&self) -> &'static str {
        "max_open_positions"
    }

    fn check(&self, input: &Self::Input, limits: &RiskLimits, _state: &RiskState) -> Result<(), RiskViolation> {
        if input.open_position_count >= limits.max_open_positions {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!(
                    "open positions {} has reached max_open_positions {}",
                    input.open_position_count, limits.max_open_positions
                ),
            });
        }
        Ok(())
    }
}

/// Correlation approximation (spec §4.6): a second opportunity on a
/// symbol with an already-open position is disallowed outright rather
/// than risk-weighted.
struct SameSymbolCorrelation;
impl RiskCheck for SameSymbolCorrelation {
    type Input = OpportunityContext;

    fn name(&self) -> &'static str {
        "same_symbol_correlation"
    }

    fn check(&self, input: &Self::Input, _limits: &RiskLimits, _state: &RiskState) -> Result<(), RiskViolation> {
        if input.open_symbols.contains(&input.symbol) {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!("{} already has an open position", input.symbol),
            });
        }
        Ok(())
    }
}

struct MaxPositionRisk;
impl RiskCheck for MaxPositionRisk {
    type Input = Decimal;

    fn name(&self) -> &'static str {
        "max_position_risk"
    }

    fn check(&self, stop_distance_pct: &Self::Input, limits: &RiskLimits, _state: &RiskState) -> Result<(), RiskViolation> {
        if *stop_distance_pct > limits.max_position_risk {
            return Err(RiskViolation {
                check: self.name(),
                reason: format!(
                    "stop distance {} exceeds max_position_risk {}",
                    stop_distance_pct, limits.max_position_risk
                ),
            });
        }
        Ok(())
    }
}

struct Accounting {
    state: RiskState,
    wins: u32,
    losses: u32,
    peak_pnl: Decimal,
}

impl Default for Accounting {
    fn default() -> Self {
        Self {
            state: RiskState::default(),
            wins: 0,
            losses: 0,
            peak_pnl: Decimal::ZERO,
        }
    }
}

/// Process-wide gatekeeper (spec §4.6). Cheap to clone-share: wrap in an
/// `Arc` at construction, same as `ConnectorRegistry`/`EventBus`.
pub struct RiskManager {
    limits: RiskLimits,
    accounting: parking_lot::Mutex<Accounting>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            accounting: parking_lot::Mutex::new(Accounting::default()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn snapshot(&self) -> RiskState {
        self.accounting.lock().state.clone()
    }

    /// `isOpportunitySafe` (spec §4.6): runs every opportunity-level check,
    /// returning the first violation, if any.
    pub fn is_opportunity_safe(
        &self,
        opp: &Opportunity,
        open_symbols: &[Symbol],
        open_position_count: u32,
    ) -> Result<(), RiskViolation> {
        let state = self.accounting.lock().state.clone();
        let notional = opp.tradable_size * opp.buy_price;

        let ctx = OpportunityContext {
            notional,
            symbol: opp.symbol.clone(),
            open_symbols: open_symbols.to_vec(),
            open_position_count,
        };

        MaxPositionSize.check(&ctx, &self.limits, &state)?;
        MaxDailyLoss.check(&ctx, &self.limits, &state)?;
        MaxDailyTrades.check(&ctx, &self.limits, &state)?;
        MaxOpenPositions.check(&ctx, &self.limits, &state)?;
        SameSymbolCorrelation.check(&ctx, &self.limits, &state)?;
        Ok(())
    }

    /// Position-level check (spec §4.6 `maxPositionRisk`): `stop_distance_pct`
    /// is the stop-loss distance as a fraction of entry price.
    pub fn is_position_safe(&self, stop_distance_pct: Decimal) -> Result<(), RiskViolation> {
        let state = self.accounting.lock().state.clone();
        MaxPositionRisk.check(&stop_distance_pct, &self.limits, &state)
    }

    /// `recordTrade(netPnl)` (spec §4.6 accounting): updates daily counters
    /// atomically, resetting them first if `now` has crossed a UTC day
    /// boundary since the last recorded trade.
    pub fn record_trade(&self, net_pnl: Decimal, now: DateTime<Utc>) {
        let mut acc = self.accounting.lock();
        maybe_reset(&mut acc, now);

        acc.state.daily_pnl += net_pnl;
        acc.state.daily_trades += 1;
        if net_pnl >= Decimal::ZERO {
            acc.wins += 1;
        } else {
            acc.losses += 1;
        }
        let total = acc.wins + acc.losses;
        acc.state.win_rate = if total > 0 {
            acc.wins as f64 / total as f64
        } else {
            0.0
        };

        acc.peak_pnl = acc.peak_pnl.max(acc.state.daily_pnl);
        let drawdown = acc.peak_pnl - acc.state.daily_pnl;
        acc.state.max_drawdown = acc.state.max_drawdown.max(drawdown);
    }

    /// Updates the `openPositionsValue` gauge (spec §3 `RiskState`),
    /// called by the Position Manager whenever a position opens, closes,
    /// or is marked to a new price.
    pub fn set_open_positions_value(&self, value: Decimal) {
        self.accounting.lock().state.open_positions_value = value;
    }
}

fn maybe_reset(acc: &mut Accounting, now: DateTime<Utc>) {
    let is_new_day = match acc.state.last_reset {
        Some(last) => last.date_naive() != now.date_naive(),
        None => true,
    };
    if is_new_day {
        acc.state.daily_pnl = Decimal::ZERO;
        acc.state.daily_trades = 0;
        acc.state.max_drawdown = Decimal::ZERO;
        acc.wins = 0;
        acc.losses = 0;
        acc.peak_pnl = Decimal::ZERO;
    }
    acc.state.last_reset = Some(now);
}

/// Weights for the Arbitrage Engine's `riskScore` formula (spec §4.5 step
/// 5): `riskScore = w1·volatility + w2·(1 − liquidityCoverage) +
/// w3·venueRiskPenalty`. The distilled spec left the weights unspecified;
/// this platform defaults to equal thirds (see `DESIGN.md`).
#[derive(Debug, Clone, Copy)]
pub struct RiskScoreWeights {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
}

impl Default for RiskScoreWeights {
    fn default() -> Self {
        Self {
            w1: 1.0 / 3.0,
            w2: 1.0 / 3.0,
            w3: 1.0 / 3.0,
        }
    }
}

/// Composes an `Opportunity.risk_score` in `[0, 1]` (spec §4.5 step 5).
/// `volatility`, `liquidity_coverage`, and `venue_risk_penalty` are all
/// expected in `[0, 1]`; out-of-range inputs are clamped rather than
/// propagated as an error, since this is a scoring heuristic, not a
/// validated boundary.
pub fn risk_score(volatility: f64, liquidity_coverage: f64, venue_risk_penalty: f64, weights: RiskScoreWeights) -> f64 {
    let clamp = |x: f64| x.max(0.0).min(1.0);
    let score = weights.w1 * clamp(volatility)
        + weights.w2 * (1.0 - clamp(liquidity_coverage))
        + weights.w3 * clamp(venue_risk_penalty);
    score.max(0.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_types::{OpportunityId, VenueId};
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size: dec!(10000),
            max_daily_loss: dec!(500),
            max_daily_trades: 20,
            max_position_risk: dec!(0.02),
            max_open_positions: 5,
        }
    }

    fn opportunity(symbol: Symbol, tradable_size: Decimal, buy_price: Decimal) -> Opportunity {
        Opportunity {
            id: OpportunityId::new(),
            symbol,
            buy_venue: VenueId::new("binance"),
            sell_venue: VenueId::new("coinbase"),
            buy_price,
            sell_price: buy_price + dec!(1),
            spread: dec!(1),
            spread_pct: dec!(0.001),
            tradable_size,
            gross_profit: dec!(1),
            fees: dec!(0),
            net_profit: dec!(1),
            risk_score: 0.1,
            confidence: 0.9,
            est_exec_seconds: 2.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn rejects_opportunity_exceeding_max_position_size() {
        let manager = RiskManager::new(limits());
        let opp = opportunity(Symbol::new("BTC", "USDT"), dec!(1), dec!(20000));
        let result = manager.is_opportunity_safe(&opp, &[], 0);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().check, "max_position_size");
    }

    #[test]
    fn rejects_same_symbol_already_open() {
        let manager = RiskManager::new(limits());
        let symbol = Symbol::new("BTC", "USDT");
        let opp = opportunity(symbol.clone(), dec!(0.1), dec!(100));
        let result = manager.is_opportunity_safe(&opp, &[symbol], 0);
        assert_eq!(result.unwrap_err().check, "same_symbol_correlation");
    }

    #[test]
    fn blocks_new_trades_after_daily_loss_limit_hit() {
        let manager = RiskManager::new(limits());
        manager.record_trade(dec!(-500), Utc::now());
        let opp = opportunity(Symbol::new("BTC", "USDT"), dec!(0.1), dec!(100));
        let result = manager.is_opportunity_safe(&opp, &[], 0);
        assert_eq!(result.unwrap_err().check, "max_daily_loss");
    }

    #[test]
    fn daily_counters_reset_on_utc_rollover() {
        let manager = RiskManager::new(limits());
        let yesterday = Utc::now() - chrono::Duration::days(1);
        manager.record_trade(dec!(-500), yesterday);
        assert_eq!(manager.snapshot().daily_trades, 1);

        manager.record_trade(dec!(10), Utc::now());
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.daily_trades, 1);
        assert_eq!(snapshot.daily_pnl, dec!(10));
    }

    #[test]
    fn win_rate_tracks_wins_over_total_trades() {
        let manager = RiskManager::new(limits());
        let now = Utc::now();
        manager.record_trade(dec!(10), now);
        manager.record_trade(dec!(-5), now);
        manager.record_trade(dec!(20), now);
        assert!((manager.snapshot().win_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn position_risk_check_rejects_wide_stop() {
        let manager = RiskManager::new(limits());
        assert!(manager.is_position_safe(dec!(0.05)).is_err());
        assert!(manager.is_position_safe(dec!(0.01)).is_ok());
    }

    #[test]
    fn risk_score_with_equal_weights_averages_three_terms() {
        let score = risk_score(0.9, 0.0, 0.9, RiskScoreWeights::default());
        // (0.9 + 1.0 + 0.9) / 3
        assert!((score - (2.8 / 3.0)).abs() < 1e-9);
    }
}
