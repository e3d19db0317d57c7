//! Gemini REST connector (spec §4.1).
//!
//! Grounded on `services/adapters/src/input/collectors/gemini.rs`'s venue
//! constants and symbol convention, generalized from its WebSocket feed
//! into a polling `VenueConnector`. Gemini's private API is unusual in
//! that the signed payload travels in a header (`X-GEMINI-PAYLOAD`)
//! rather than the request body.

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
use sha2::Sha384;
use venue_connector::{Candle, Credentials, CredentialsProvider, NewOrder, RateLimiter, RetryPolicy, Timeframe, VenueConnector};

const BASE_URL: &str = "https://api.gemini.com";
const VENUE: &str = "gemini";

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

fn to_native_symbol(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base(), symbol.quote()).to_lowercase()
}

pub struct GeminiConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    connected: AtomicBool,
}

impl GeminiConnector {
    pub fn new(credentials_provider: &dyn CredentialsProvider) -> Self {
        let mut rate_limiter = RateLimiter::new();
        rate_limiter.configure_venue(venue_id(), 120);

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
            .ok_or_else(|| ArbError::Invalid("gemini: no credentials configured for private endpoints".into()))
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

    /// Signs a private request by base64-encoding `payload` and HMAC-SHA384
    /// signing that encoded string, per Gemini's private API convention.
    fn sign_payload(secret: &str, payload_json: &str) -> ArbResult<(String, String)> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload_json.as_bytes());
        let mut mac = Hmac::<Sha384>::new_from_slice(secret.as_bytes())
            .map_err(|e| ArbError::Internal(format!("gemini: bad hmac key: {e}")))?;
        mac.update(encoded.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok((encoded, signature))
    }

    async fn post_private<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        mut payload: serde_json::Value,
    ) -> ArbResult<T> {
        let creds = self.require_credentials()?;
        let nonce = Utc::now().timestamp_millis().to_string();
        payload["request"] = serde_json::Value::String(path.to_string());
        payload["nonce"] = serde_json::Value::String(nonce);

        let (encoded_payload, signature) = Self::sign_payload(&creds.secret, &payload.to_string())?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("X-GEMINI-APIKEY", &creds.key)
            .header("X-GEMINI-PAYLOAD", encoded_payload)
            .header("X-GEMINI-SIGNATURE", signature)
            .header("Content-Length", "0")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "post", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }

        resp.json::<T>()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "post", e))
    }
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    last: String,
    bid: String,
    ask: String,
    volume: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawBookLevel {
    price: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Vec<RawBookLevel>,
    asks: Vec<RawBookLevel>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    price: String,
    amount: String,
    #[serde(rename = "type")]
    side: String,
    timestampms: i64,
}

#[async_trait]
impl VenueConnector for GeminiConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        let _: serde_json::Value = self.get_json("/v1/pubticker/btcusd").await?;
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
        let raw: RawTicker = self.get_json(&format!("/v1/pubticker/{native}")).await?;

        let parse = |s: &str| s.parse().map_err(|_| ArbError::Invalid("bad gemini decimal field".into()));
        let volume = raw
            .volume
            .get(symbol.base())
            .or_else(|| raw.volume.get("USD"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(Decimal::ZERO);

        Ok(Ticker {
            symbol: symbol.clone(),
            last: parse(&raw.last)?,
            bid: parse(&raw.bid)?,
            ask: parse(&raw.ask)?,
            volume,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let native = to_native_symbol(symbol);
        let capped = limit.clamp(1, 500);
        let raw: RawBook = self
            .get_json(&format!("/v1/book/{native}?limit_bids={capped}&limit_asks={capped}"))
            .await?;

        let parse_level = |level: &RawBookLevel| -> ArbResult<OrderBookLevel> {
            Ok(OrderBookLevel {
                price: level.price.parse().map_err(|_| ArbError::Invalid("bad price level".into()))?,
                quantity: level.amount.parse().map_err(|_| ArbError::Invalid("bad qty level".into()))?,
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
        let raw: Vec<RawTrade> = self
            .get_json(&format!("/v1/trades/{native}?limit_trades={limit}"))
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    symbol: symbol.clone(),
                    price: t.price.parse().ok()?,
                    quantity: t.amount.parse().ok()?,
                    side: if t.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
                    timestamp: DateTime::from_timestamp_millis(t.timestampms).unwrap_or_else(Utc::now),
                    source: venue_id(),
                })
            })
            .collect())
    }

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order> {
        let native = to_native_symbol(&order.symbol);
        let side = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        if !matches!(order.order_type, OrderType::Limit) {
            return Err(ArbError::Invalid(
                "gemini: only limit orders are supported by /v1/order/new".into(),
            ));
        }

        let payload = serde_json::json!({
            "client_order_id": order.client_id.as_str(),
            "symbol": native,
            "amount": order.qty.to_string(),
            "price": order.price.map(|p| p.to_string()).unwrap_or_default(),
            "side": side,
            "type": "exchange limit",
        });

        #[derive(Deserialize)]
        struct RawOrderResponse {
            order_id: String,
        }

        let response: RawOrderResponse = self.post_private("/v1/order/new", payload).await?;

        let now = Utc::now();
        Ok(Order {
            id: order.client_id,
            venue_id: Some(VenueOrderId::new(response.order_id)),
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
        let payload = serde_json::json!({ "order_id": venue_order_id.as_str() });
        let _: serde_json::Value = self.post_private("/v1/order/cancel", payload).await?;
        Ok(())
    }

    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order> {
        Err(ArbError::Internal(format!(
            "gemini get_order_status not wired for {venue_order_id}: requires POST /v1/order/status response mapping"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        #[derive(Deserialize)]
        struct RawBalance {
            currency: String,
            available: String,
        }

        let balances: Vec<RawBalance> = self.post_private("/v1/balances", serde_json::json!({})).await?;
        Ok(balances
            .into_iter()
            .filter_map(|b| b.available.parse().ok().map(|dec| (b.currency, dec)))
            .collect())
    }

    async fn get_historical_data(
        &self,
        _symbol: &Symbol,
        _timeframe: Timeframe,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        Err(ArbError::Invalid(
            "gemini: historical candles are only available pre-aggregated per-day, not by arbitrary range".into(),
        ))
    }
}

pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(GeminiConnector::new(credentials_provider))
}
