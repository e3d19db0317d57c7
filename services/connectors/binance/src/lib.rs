//! Binance spot REST connector (spec §4.1).
//!
//! Grounded on `services/adapters/src/input/collectors/binance.rs`'s venue
//! constants and symbol handling, generalized from a WebSocket-to-TLV
//! pipeline into a polling `VenueConnector` that the Data Aggregator fans
//! out to directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arb_types::{
    ArbError, ArbResult, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus, OrderType,
    Position, Symbol, Ticker, Trade, VenueId, VenueOrderId,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use venue_connector::{Candle, Credentials, CredentialsProvider, NewOrder, RateLimiter, RetryPolicy, Timeframe, VenueConnector};

const BASE_URL: &str = "https://api.binance.com";
const VENUE: &str = "binance";

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

fn to_native_symbol(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base(), symbol.quote())
}

fn sign(secret: &str, query: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `VenueConnector` implementation backed by Binance's public/private REST
/// API. Market-data calls need no credentials; `place_order`/`get_balances`
/// require them and return `ArbError::Invalid` if none are configured.
pub struct BinanceConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    connected: AtomicBool,
}

impl BinanceConnector {
    pub fn new(credentials_provider: &dyn CredentialsProvider) -> Self {
        let mut rate_limiter = RateLimiter::new();
        rate_limiter.configure_venue(venue_id(), 1200);

        Self {
            http: reqwest::Client::new(),
            rate_limiter,
            retry_policy: RetryPolicy::default(),
            credentials: credentials_provider.get(&venue_id()),
            connected: AtomicBool::new(false),
        }
    }

    fn require_credentials(&self) -> ArbResult<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| ArbError::Invalid(
            "binance: no credentials configured for order/account endpoints".into(),
        ))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &str) -> ArbResult<T> {
        self.rate_limiter.wait(&venue_id()).await;
        let url = format!("{BASE_URL}{path}?{query}");
        let venue = venue_id();

        venue_connector::retry(&self.retry_policy, &venue, "get", || {
            let http = self.http.clone();
            let url = url.clone();
            let venue = venue.clone();
            async move {
                let resp = http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "get", e))?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(venue_connector::map_status_err(&venue, status, &body));
                }
                resp.json::<T>()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "get", e))
            }
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RawTicker24h {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: Decimal,
    #[serde(rename = "bidPrice")]
    bid_price: Decimal,
    #[serde(rename = "askPrice")]
    ask_price: Decimal,
    volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    price: Decimal,
    qty: Decimal,
    #[serde(rename = "isBuyerMaker")]
    is_buyer_maker: bool,
    time: i64,
}

#[async_trait]
impl VenueConnector for BinanceConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        let _: serde_json::Value = self.get_json("/api/v3/ping", "").await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ArbResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> ArbResult<HashMap<Symbol, Ticker>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_ticker(symbol).await {
                Ok(ticker) => {
                    out.insert(symbol.clone(), ticker);
                }
                Err(e) => {
                    tracing::warn!(venue = VENUE, %symbol, error = %e, "skipping symbol for this poll");
                }
            }
        }
        Ok(out)
    }

    async fn get_ticker(&self, symbol: &Symbol) -> ArbResult<Ticker> {
        let native = to_native_symbol(symbol);
        let started = Instant::now();
        let raw: RawTicker24h = self
            .get_json("/api/v3/ticker/24hr", &format!("symbol={native}"))
            .await?;

        Ok(Ticker {
            symbol: symbol.clone(),
            last: raw.last_price,
            bid: raw.bid_price,
            ask: raw.ask_price,
            volume: raw.volume,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let native = to_native_symbol(symbol);
        let capped_limit = limit.clamp(5, 1000);
        let raw: RawDepth = self
            .get_json("/api/v3/depth", &format!("symbol={native}&limit={capped_limit}"))
            .await?;

        let parse_level = |level: &[String; 2]| -> ArbResult<OrderBookLevel> {
            Ok(OrderBookLevel {
                price: level[0].parse().map_err(|_| ArbError::Invalid("bad price level".into()))?,
                quantity: level[1].parse().map_err(|_| ArbError::Invalid("bad qty level".into()))?,
            })
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: raw.bids.iter().map(parse_level).collect::<ArbResult<_>>()?,
            asks: raw.asks.iter().map(parse_level).collect::<ArbResult<_>>()?,
            timestamp: Utc::now(),
            source: venue_id(),
        })
    }

    async fn get_trades(&self, symbol: &Symbol, limit: usize) -> ArbResult<Vec<Trade>> {
        let native = to_native_symbol(symbol);
        let capped_limit = limit.clamp(1, 1000);
        let raw: Vec<RawTrade> = self
            .get_json("/api/v3/trades", &format!("symbol={native}&limit={capped_limit}"))
            .await?;

        Ok(raw
            .into_iter()
            .map(|t| Trade {
                symbol: symbol.clone(),
                price: t.price,
                quantity: t.qty,
                side: if t.is_buyer_maker { OrderSide::Sell } else { OrderSide::Buy },
                timestamp: Utc.timestamp_millis_opt(t.time).single().unwrap_or_else(Utc::now),
                source: venue_id(),
            })
            .collect())
    }

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order> {
        let creds = self.require_credentials()?;
        let native = to_native_symbol(&order.symbol);
        let side = match order.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let order_type = match order.order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP_LOSS",
            OrderType::StopLimit => "STOP_LOSS_LIMIT",
        };

        let timestamp = Utc::now().timestamp_millis();
        let mut query = format!(
            "symbol={native}&side={side}&type={order_type}&quantity={}&newClientOrderId={}&timestamp={timestamp}",
            order.qty, order.client_id
        );
        if let Some(price) = order.price {
            query.push_str(&format!("&price={price}&timeInForce=GTC"));
        }
        let signature = sign(&creds.secret, &query);
        query.push_str(&format!("&signature={signature}"));

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}/api/v3/order?{query}"))
            .header("X-MBX-APIKEY", &creds.key)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "place_order", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &body));
        }

        let now = Utc::now();
        Ok(Order {
            id: order.client_id,
            venue_id: None,
            symbol: order.symbol,
            side: order.side,
            order_type: order.order_type,
            qty: order.qty,
            price: order.price,
            stop_price: order.stop_price,
            filled_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            status: OrderStatus::Open,
            venue: venue_id(),
            created_at: now,
            updated_at: now,
            client_id_seed: order.client_id_seed,
        })
    }

    async fn cancel_order(&self, venue_order_id: &VenueOrderId) -> ArbResult<()> {
        let creds = self.require_credentials()?;
        let timestamp = Utc::now().timestamp_millis();
        let mut query = format!("orderId={}&timestamp={timestamp}", venue_order_id.as_str());
        let signature = sign(&creds.secret, &query);
        query.push_str(&format!("&signature={signature}"));

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .delete(format!("{BASE_URL}/api/v3/order?{query}"))
            .header("X-MBX-APIKEY", &creds.key)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "cancel_order", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &body));
        }
        Ok(())
    }

    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order> {
        Err(ArbError::Internal(format!(
            "binance get_order_status not wired for {venue_order_id}: needs the originating symbol, which the venue's GET /api/v3/order requires"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        // Spot trading has no leveraged positions; always empty.
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        let creds = self.require_credentials()?;
        let timestamp = Utc::now().timestamp_millis();
        let query = format!("timestamp={timestamp}");
        let signature = sign(&creds.secret, &query);
        let full_query = format!("{query}&signature={signature}");

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .get(format!("{BASE_URL}/api/v3/account?{full_query}"))
            .header("X-MBX-APIKEY", &creds.key)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &body));
        }

        #[derive(Deserialize)]
        struct RawBalance {
            asset: String,
            free: Decimal,
        }
        #[derive(Deserialize)]
        struct RawAccount {
            balances: Vec<RawBalance>,
        }

        let account: RawAccount = resp
            .json()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        Ok(account.balances.into_iter().map(|b| (b.asset, b.free)).collect())
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        let native = to_native_symbol(symbol);
        let interval = match timeframe {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::OneHour => "1h",
            Timeframe::OneDay => "1d",
        };
        let query = format!(
            "symbol={native}&interval={interval}&startTime={}&endTime={}",
            from.timestamp_millis(),
            to.timestamp_millis()
        );
        let raw: Vec<serde_json::Value> = self.get_json("/api/v3/klines", &query).await?;

        raw.into_iter()
            .map(|row| {
                let row = row.as_array().ok_or_else(|| ArbError::Invalid("malformed kline row".into()))?;
                let dec = |i: usize| -> ArbResult<Decimal> {
                    row.get(i)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ArbError::Invalid("malformed kline field".into()))
                };
                let open_time = row
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| ArbError::Invalid("malformed kline open_time".into()))?;
                Ok(Candle {
                    open: dec(1)?,
                    high: dec(2)?,
                    low: dec(3)?,
                    close: dec(4)?,
                    volume: dec(5)?,
                    open_time: Utc.timestamp_millis_opt(open_time).single().unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}

/// Arc-wrapping constructor used by `connector-registry` to register this
/// connector behind `dyn VenueConnector`.
pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(BinanceConnector::new(credentials_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_symbol_has_no_separator() {
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(to_native_symbol(&symbol), "BTCUSDT");
    }

    #[test]
    fn order_without_credentials_is_rejected() {
        let connector = BinanceConnector::new(&venue_connector::NoCredentials);
        assert!(connector.require_credentials().is_err());
    }
}
