//! Coinbase Exchange REST connector (spec §4.1).
//!
//! Grounded on `services/adapters/src/input/collectors/coinbase.rs`'s
//! product-id handling and `"BTC-USD"`-style symbol convention, generalized
//! from its WebSocket match-event pipeline into a polling `VenueConnector`.

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

const BASE_URL: &str = "https://api.exchange.coinbase.com";
const VENUE: &str = "coinbase";

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

fn to_native_symbol(symbol: &Symbol) -> String {
    format!("{}-{}", symbol.base(), symbol.quote())
}

pub struct CoinbaseConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    connected: AtomicBool,
}

impl CoinbaseConnector {
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
        self.credentials.as_ref().ok_or_else(|| {
            ArbError::Invalid("coinbase: no credentials configured for order/account endpoints".into())
        })
    }

    /// CB-ACCESS-SIGN: base64(hmac_sha256(base64_decode(secret), timestamp + method + path + body)).
    fn sign(secret_b64: &str, timestamp: &str, method: &str, path: &str, body: &str) -> ArbResult<String> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| ArbError::Internal(format!("coinbase: malformed secret: {e}")))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| ArbError::Internal(format!("coinbase: bad hmac key: {e}")))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ArbResult<T> {
        self.rate_limiter.wait(&venue_id()).await;
        let url = format!("{BASE_URL}{path}");
        let venue = venue_id();

        venue_connector::retry(&self.retry_policy, &venue, "get", || {
            let http = self.http.clone();
            let url = url.clone();
            let venue = venue.clone();
            async move {
                let resp = http
                    .get(&url)
                    .header("User-Agent", "arb-platform/0.1")
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
struct RawTicker {
    price: Decimal,
    bid: Decimal,
    ask: Decimal,
    volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Vec<[String; 3]>,
    asks: Vec<[String; 3]>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    price: Decimal,
    size: Decimal,
    side: String,
    time: DateTime<Utc>,
}

#[async_trait]
impl VenueConnector for CoinbaseConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        let _: serde_json::Value = self.get_json("/time").await?;
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
        let raw: RawTicker = self.get_json(&format!("/products/{native}/ticker")).await?;

        Ok(Ticker {
            symbol: symbol.clone(),
            last: raw.price,
            bid: raw.bid,
            ask: raw.ask,
            volume: raw.volume,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let native = to_native_symbol(symbol);
        let level = if limit > 50 { 3 } else { 2 };
        let raw: RawBook = self
            .get_json(&format!("/products/{native}/book?level={level}"))
            .await?;

        let parse_level = |level: &[String; 3]| -> ArbResult<OrderBookLevel> {
            Ok(OrderBookLevel {
                price: level[0].parse().map_err(|_| ArbError::Invalid("bad price level".into()))?,
                quantity: level[1].parse().map_err(|_| ArbError::Invalid("bad qty level".into()))?,
            })
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: raw.bids.iter().take(limit).map(parse_level).collect::<ArbResult<_>>()?,
            asks: raw.asks.iter().take(limit).map(parse_level).collect::<ArbResult<_>>()?,
            timestamp: Utc::now(),
            source: venue_id(),
        })
    }

    async fn get_trades(&self, symbol: &Symbol, limit: usize) -> ArbResult<Vec<Trade>> {
        let native = to_native_symbol(symbol);
        let raw: Vec<RawTrade> = self.get_json(&format!("/products/{native}/trades")).await?;

        Ok(raw
            .into_iter()
            .take(limit)
            .map(|t| Trade {
                symbol: symbol.clone(),
                price: t.price,
                quantity: t.size,
                side: if t.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
                timestamp: t.time,
                source: venue_id(),
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
            "client_oid": order.client_id.as_str(),
            "product_id": native,
            "side": side,
            "type": order_type,
            "size": order.qty.to_string(),
            "price": order.price.map(|p| p.to_string()),
        })
        .to_string();

        let timestamp = format!("{}", Utc::now().timestamp());
        let signature = Self::sign(&creds.secret, &timestamp, "POST", "/orders", &body)?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}/orders"))
            .header("CB-ACCESS-KEY", &creds.key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header(
                "CB-ACCESS-PASSPHRASE",
                creds.passphrase.clone().unwrap_or_default(),
            )
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
        let path = format!("/orders/{}", venue_order_id.as_str());
        let timestamp = format!("{}", Utc::now().timestamp());
        let signature = Self::sign(&creds.secret, &timestamp, "DELETE", &path, "")?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .delete(format!("{BASE_URL}{path}"))
            .header("CB-ACCESS-KEY", &creds.key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-ACCESS-PASSPHRASE", creds.passphrase.clone().unwrap_or_default())
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
            "coinbase get_order_status not wired for {venue_order_id}: requires GET /orders/{{id}} response mapping"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        let creds = self.require_credentials()?;
        let timestamp = format!("{}", Utc::now().timestamp());
        let signature = Self::sign(&creds.secret, &timestamp, "GET", "/accounts", "")?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .get(format!("{BASE_URL}/accounts"))
            .header("CB-ACCESS-KEY", &creds.key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-ACCESS-PASSPHRASE", creds.passphrase.clone().unwrap_or_default())
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }

        #[derive(Deserialize)]
        struct RawAccount {
            currency: String,
            available: Decimal,
        }

        let accounts: Vec<RawAccount> = resp
            .json()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        Ok(accounts.into_iter().map(|a| (a.currency, a.available)).collect())
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        let native = to_native_symbol(symbol);
        let granularity = match timeframe {
            Timeframe::OneMinute => 60,
            Timeframe::FiveMinutes => 300,
            Timeframe::OneHour => 3600,
            Timeframe::OneDay => 86400,
        };
        let path = format!(
            "/products/{native}/candles?start={}&end={}&granularity={granularity}",
            from.to_rfc3339(),
            to.to_rfc3339()
        );
        let raw: Vec<[f64; 6]> = self.get_json(&path).await?;

        raw.into_iter()
            .map(|row| {
                let [time, low, high, open, close, volume] = row;
                Ok(Candle {
                    open: Decimal::try_from(open).map_err(|_| ArbError::Invalid("bad candle open".into()))?,
                    high: Decimal::try_from(high).map_err(|_| ArbError::Invalid("bad candle high".into()))?,
                    low: Decimal::try_from(low).map_err(|_| ArbError::Invalid("bad candle low".into()))?,
                    close: Decimal::try_from(close).map_err(|_| ArbError::Invalid("bad candle close".into()))?,
                    volume: Decimal::try_from(volume).map_err(|_| ArbError::Invalid("bad candle volume".into()))?,
                    open_time: DateTime::from_timestamp(time as i64, 0).unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}

pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(CoinbaseConnector::new(credentials_provider))
}
