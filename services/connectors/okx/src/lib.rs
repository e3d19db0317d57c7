//! OKX REST connector (spec §4.1).
//!
//! The teacher repo has no OKX collector; this follows the REST-polling
//! `VenueConnector` shape established by the sibling `connectors-binance`
//! and `connectors-coinbase` crates, adapted to OKX's `inst_id` symbol
//! convention (`BTC-USDT`) and its three-header signing scheme.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arb_types::{
    ArbError, ArbResult, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus, OrderType,
    Position, Symbol, Ticker, Trade, VenueId, VenueOrderId,
};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use venue_connector::{Candle, Credentials, CredentialsProvider, NewOrder, RateLimiter, RetryPolicy, Timeframe, VenueConnector};

const BASE_URL: &str = "https://www.okx.com";
const VENUE: &str = "okx";

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

fn to_native_symbol(symbol: &Symbol) -> String {
    format!("{}-{}", symbol.base(), symbol.quote())
}

pub struct OkxConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    connected: AtomicBool,
}

impl OkxConnector {
    pub fn new(credentials_provider: &dyn CredentialsProvider) -> Self {
        let mut rate_limiter = RateLimiter::new();
        rate_limiter.configure_venue(venue_id(), 600);

        Self {
            http: reqwest::Client::new(),
            rate_limiter,
            retry_policy: RetryPolicy::default(),
            credentials: credentials_provider.get(&venue_id()),
            connected: AtomicBool::new(false),
        }
    }

    fn require_credentials(&self) -> ArbResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ArbError::Invalid("okx: no credentials configured for private endpoints".into()))
    }

    fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> ArbResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| ArbError::Internal(format!("okx: bad hmac key: {e}")))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ArbResult<T> {
        self.rate_limiter.wait(&venue_id()).await;
        let url = format!("{BASE_URL}{path}");
        let venue = venue_id();

        let envelope: OkxEnvelope<T> = venue_connector::retry(&self.retry_policy, &venue, "get", || {
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
                resp.json::<OkxEnvelope<T>>()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "get", e))
            }
        })
        .await?;

        if envelope.code != "0" {
            return Err(ArbError::Rejected { venue: venue_id(), reason: envelope.msg });
        }
        Ok(envelope.data)
    }
}

#[derive(Debug, Deserialize)]
struct OkxEnvelope<T> {
    code: String,
    msg: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    last: String,
    #[serde(rename = "bidPx")]
    bid_px: String,
    #[serde(rename = "askPx")]
    ask_px: String,
    #[serde(rename = "vol24h")]
    vol_24h: String,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Vec<[String; 4]>,
    asks: Vec<[String; 4]>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    px: String,
    sz: String,
    side: String,
    ts: String,
}

#[async_trait]
impl VenueConnector for OkxConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        let _: Vec<serde_json::Value> = self.get_json("/api/v5/public/time").await?;
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
                Err(e) => tracing::warn!(venue = VENUE, %symbol, error = %e, "skipping symbol for this poll"),
            }
        }
        Ok(out)
    }

    async fn get_ticker(&self, symbol: &Symbol) -> ArbResult<Ticker> {
        let native = to_native_symbol(symbol);
        let started = Instant::now();
        let mut rows: Vec<RawTicker> = self
            .get_json(&format!("/api/v5/market/ticker?instId={native}"))
            .await?;
        let row = rows.pop().ok_or_else(|| ArbError::Unavailable { venue: venue_id(), reason: "no ticker data".into() })?;

        let parse = |s: &str| s.parse().map_err(|_| ArbError::Invalid("bad okx decimal field".into()));

        Ok(Ticker {
            symbol: symbol.clone(),
            last: parse(&row.last)?,
            bid: parse(&row.bid_px)?,
            ask: parse(&row.ask_px)?,
            volume: parse(&row.vol_24h)?,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let native = to_native_symbol(symbol);
        let capped = limit.clamp(1, 400);
        let mut rows: Vec<RawBook> = self
            .get_json(&format!("/api/v5/market/books?instId={native}&sz={capped}"))
            .await?;
        let row = rows.pop().ok_or_else(|| ArbError::Unavailable { venue: venue_id(), reason: "no depth data".into() })?;

        let parse_level = |level: &[String; 4]| -> ArbResult<OrderBookLevel> {
            Ok(OrderBookLevel {
                price: level[0].parse().map_err(|_| ArbError::Invalid("bad price level".into()))?,
                quantity: level[1].parse().map_err(|_| ArbError::Invalid("bad qty level".into()))?,
            })
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: row.bids.iter().map(parse_level).collect::<ArbResult<_>>()?,
            asks: row.asks.iter().map(parse_level).collect::<ArbResult<_>>()?,
            timestamp: Utc::now(),
            source: venue_id(),
        })
    }

    async fn get_trades(&self, symbol: &Symbol, limit: usize) -> ArbResult<Vec<Trade>> {
        let native = to_native_symbol(symbol);
        let capped = limit.clamp(1, 500);
        let rows: Vec<RawTrade> = self
            .get_json(&format!("/api/v5/market/trades?instId={native}&limit={capped}"))
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    symbol: symbol.clone(),
                    price: t.px.parse().ok()?,
                    quantity: t.sz.parse().ok()?,
                    side: if t.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
                    timestamp: t
                        .ts
                        .parse::<i64>()
                        .ok()
                        .and_then(|ms| DateTime::from_timestamp_millis(ms))
                        .unwrap_or_else(Utc::now),
                    source: venue_id(),
                })
            })
            .collect())
    }

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order> {
        let creds = self.require_credentials()?;
        let native = to_native_symbol(&order.symbol);
        let side = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let order_type = match order.order_type {
            OrderType::Market => "market",
            _ => "limit",
        };

        let body = serde_json::json!({
            "instId": native,
            "tdMode": "cash",
            "clOrdId": order.client_id.as_str(),
            "side": side,
            "ordType": order_type,
            "sz": order.qty.to_string(),
            "px": order.price.map(|p| p.to_string()),
        })
        .to_string();

        let path = "/api/v5/trade/order";
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let signature = Self::sign(&creds.secret, &timestamp, "POST", path, &body)?;
        let passphrase = creds.passphrase.clone().unwrap_or_default();

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("OK-ACCESS-KEY", &creds.key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", passphrase)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "place_order", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
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
        let path = "/api/v5/trade/cancel-order";
        let body = serde_json::json!({ "ordId": venue_order_id.as_str() }).to_string();
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let signature = Self::sign(&creds.secret, &timestamp, "POST", path, &body)?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("OK-ACCESS-KEY", &creds.key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", creds.passphrase.clone().unwrap_or_default())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "cancel_order", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }
        Ok(())
    }

    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order> {
        Err(ArbError::Internal(format!(
            "okx get_order_status not wired for {venue_order_id}: requires GET /api/v5/trade/order response mapping"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        let creds = self.require_credentials()?;
        let path = "/api/v5/account/balance";
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let signature = Self::sign(&creds.secret, &timestamp, "GET", path, "")?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .get(format!("{BASE_URL}{path}"))
            .header("OK-ACCESS-KEY", &creds.key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", creds.passphrase.clone().unwrap_or_default())
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }

        #[derive(Deserialize)]
        struct RawDetail {
            ccy: String,
            #[serde(rename = "availBal")]
            avail_bal: String,
        }
        #[derive(Deserialize)]
        struct RawBalance {
            details: Vec<RawDetail>,
        }

        let envelope: OkxEnvelope<Vec<RawBalance>> = resp
            .json()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;
        if envelope.code != "0" {
            return Err(ArbError::Rejected { venue: venue_id(), reason: envelope.msg });
        }

        Ok(envelope
            .data
            .into_iter()
            .flat_map(|b| b.details)
            .filter_map(|d| d.avail_bal.parse().ok().map(|dec| (d.ccy, dec)))
            .collect())
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        let native = to_native_symbol(symbol);
        let bar = match timeframe {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::OneHour => "1H",
            Timeframe::OneDay => "1D",
        };
        let rows: Vec<[String; 7]> = self
            .get_json(&format!(
                "/api/v5/market/history-candles?instId={native}&bar={bar}&before={}&after={}",
                from.timestamp_millis(),
                to.timestamp_millis()
            ))
            .await?;

        rows.into_iter()
            .map(|row| {
                let field = |i: usize| -> ArbResult<Decimal> {
                    row[i].parse().map_err(|_| ArbError::Invalid("bad okx candle field".into()))
                };
                let open_time = row[0]
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or_else(Utc::now);
                Ok(Candle {
                    open: field(1)?,
                    high: field(2)?,
                    low: field(3)?,
                    close: field(4)?,
                    volume: field(5)?,
                    open_time,
                })
            })
            .collect()
    }
}

pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(OkxConnector::new(credentials_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_symbol_uses_dash_separator() {
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(to_native_symbol(&symbol), "BTC-USDT");
    }

    #[test]
    fn order_without_credentials_is_rejected() {
        let connector = OkxConnector::new(&venue_connector::NoCredentials);
        assert!(connector.require_credentials().is_err());
    }
}
