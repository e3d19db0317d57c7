//! Property 8 (spec §8): for a configured `maxDailyTrades = N`, the
//! (N+1)-th attempt within the same UTC day is rejected by the
//! `max_daily_trades` check.

use arb_types::{Opportunity, OpportunityId, Symbol, VenueId};
use chrono::Utc;
use config::RiskLimits;
use risk_manager::RiskManager;
use rust_decimal_macros::dec;

fn limits(max_daily_trades: u32) -> RiskLimits {
    RiskLimits {
        max_position_size: dec!(1_000_000),
        max_daily_loss: dec!(1_000_000),
        max_daily_trades,
        max_position_risk: dec!(0.5),
        max_open_positions: 100,
    }
}

fn opportunity() -> Opportunity {
    Opportunity {
        id: OpportunityId::new(),
        symbol: Symbol::new("BTC", "USDT"),
        buy_venue: VenueId::new("venue_a"),
        sell_venue: VenueId::new("venue_b"),
        buy_price: dec!(100),
        sell_price: dec!(101),
        spread: dec!(1),
        spread_pct: dec!(0.01),
        tradable_size: dec!(1),
        gross_profit: dec!(1),
        fees: dec!(0),
        net_profit: dec!(1),
        risk_score: 0.1,
        confidence: 0.9,
        est_exec_seconds: 1.0,
        timestamp: Utc::now(),
    }
}

#[test]
fn nplus1_th_trade_today_is_rejected_by_max_daily_trades() {
    const N: u32 = 3;
    let manager = RiskManager::new(limits(N));
    let now = Utc::now();

    for i in 0..N {
        let result = manager.is_opportunity_safe(&opportunity(), &[], 0);
        assert!(result.is_ok(), "trade {i} of {N} should still be allowed");
        manager.record_trade(dec!(1), now);
    }

    let result = manager.is_opportunity_safe(&opportunity(), &[], 0);
    assert_eq!(result.unwrap_err().check, "max_daily_trades");
}
