//! Kraken REST connector (spec §4.1).
//!
//! Grounded on `services/adapters/src/input/collectors/kraken.rs`'s venue
//! constants, generalized from its array-based WebSocket pipeline into a
//! polling `VenueConnector`. Kraken's pair codes still use the legacy `XBT`
//! ticker for bitcoin; `to_native_pair` carries that one quirk forward.

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
use sha2::{Digest, Sha256, Sha512};
use venue_connector::{Candle, Credentials, CredentialsProvider, NewOrder, RateLimiter, RetryPolicy, Timeframe, VenueConnector};

const BASE_URL: &str = "https://api.kraken.com";
const VENUE: &str = "kraken";

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

fn to_native_pair(symbol: &Symbol) -> String {
    let translate = |asset: &str| if asset == "BTC" { "XBT" } else { asset };
    format!("{}{}", translate(symbol.base()), translate(symbol.quote()))
}

pub struct KrakenConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    connected: AtomicBool,
}

impl KrakenConnector {
    pub fn new(credentials_provider: &dyn CredentialsProvider) -> Self {
        let mut rate_limiter = RateLimiter::new();
        rate_limiter.configure_venue(venue_id(), 60);

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
            .ok_or_else(|| ArbError::Invalid("kraken: no credentials configured for private endpoints".into()))
    }

    /// Kraken's private-endpoint signature: HMAC-SHA512(base64_decode(secret),
    /// path_bytes + sha256(nonce + postdata)), base64-encoded.
    fn sign(secret_b64: &str, path: &str, nonce: &str, postdata: &str) -> ArbResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(postdata.as_bytes());
        let sha_digest = hasher.finalize();

        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| ArbError::Internal(format!("kraken: malformed secret: {e}")))?;
        let mut mac = Hmac::<Sha512>::new_from_slice(&key)
            .map_err(|e| ArbError::Internal(format!("kraken: bad hmac key: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(&sha_digest);
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn get_public<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &str) -> ArbResult<T> {
        self.rate_limiter.wait(&venue_id()).await;
        let url = format!("{BASE_URL}{path}?{query}");
        let venue = venue_id();

        let raw: KrakenEnvelope<T> = venue_connector::retry(&self.retry_policy, &venue, "get", || {
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
                resp.json::<KrakenEnvelope<T>>()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "get", e))
            }
        })
        .await?;

        if !raw.error.is_empty() {
            return Err(ArbError::Rejected {
                venue: venue_id(),
                reason: raw.error.join("; "),
            });
        }
        raw.result.ok_or_else(|| ArbError::Internal("kraken: empty result with no error".into()))
    }
}

#[derive(Debug, Deserialize)]
struct KrakenEnvelope<T> {
    error: Vec<String>,
    result: Option<T>,
}

#[async_trait]
impl VenueConnector for KrakenConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        let _: serde_json::Value = self.get_public("/0/public/Time", "").await?;
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
        let native = to_native_pair(symbol);
        let started = Instant::now();

        #[derive(Deserialize)]
        struct RawTickerInfo {
            c: [String; 2],
            b: [String; 2],
            a: [String; 2],
            v: [String; 2],
        }

        let result: HashMap<String, RawTickerInfo> =
            self.get_public("/0/public/Ticker", &format!("pair={native}")).await?;
        let info = result
            .into_values()
            .next()
            .ok_or_else(|| ArbError::Unavailable { venue: venue_id(), reason: "no ticker data for pair".into() })?;

        let parse = |s: &str| s.parse().map_err(|_| ArbError::Invalid("bad kraken decimal field".into()));

        Ok(Ticker {
            symbol: symbol.clone(),
            last: parse(&info.c[0])?,
            bid: parse(&info.b[0])?,
            ask: parse(&info.a[0])?,
            volume: parse(&info.v[1])?,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let native = to_native_pair(symbol);
        let capped = limit.clamp(1, 500);

        #[derive(Deserialize)]
        struct RawBookInfo {
            bids: Vec<[serde_json::Value; 3]>,
            asks: Vec<[serde_json::Value; 3]>,
        }

        let result: HashMap<String, RawBookInfo> = self
            .get_public("/0/public/Depth", &format!("pair={native}&count={capped}"))
            .await?;
        let info = result
            .into_values()
            .next()
            .ok_or_else(|| ArbError::Unavailable { venue: venue_id(), reason: "no depth data for pair".into() })?;

        let parse_level = |level: &[serde_json::Value; 3]| -> ArbResult<OrderBookLevel> {
            let price = level[0].as_str().and_then(|s| s.parse().ok()).ok_or_else(|| ArbError::Invalid("bad price level".into()))?;
            let quantity = level[1].as_str().and_then(|s| s.parse().ok()).ok_or_else(|| ArbError::Invalid("bad qty level".into()))?;
            Ok(OrderBookLevel { price, quantity })
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: info.bids.iter().map(parse_level).collect::<ArbResult<_>>()?,
            asks: info.asks.iter().map(parse_level).collect::<ArbResult<_>>()?,
            timestamp: Utc::now(),
            source: venue_id(),
        })
    }

    async fn get_trades(&self, symbol: &Symbol, limit: usize) -> ArbResult<Vec<Trade>> {
        let native = to_native_pair(symbol);

        let result: HashMap<String, Vec<[serde_json::Value; 6]>> =
            self.get_public("/0/public/Trades", &format!("pair={native}")).await?;
        let rows = result
            .into_iter()
            .find(|(k, _)| k != "last")
            .map(|(_, v)| v)
            .unwrap_or_default();

        Ok(rows
            .into_iter()
            .take(limit)
            .filter_map(|row| {
                let price: Decimal = row[0].as_str()?.parse().ok()?;
                let volume: Decimal = row[1].as_str()?.parse().ok()?;
                let time = row[2].as_f64()?;
                let side = row[3].as_str()?;
                Some(Trade {
                    symbol: symbol.clone(),
                    price,
                    quantity: volume,
                    side: if side == "b" { OrderSide::Buy } else { OrderSide::Sell },
                    timestamp: DateTime::from_timestamp(time as i64, 0).unwrap_or_else(Utc::now),
                    source: venue_id(),
                })
            })
            .collect())
    }

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order> {
        let creds = self.require_credentials()?;
        let native = to_native_pair(&order.symbol);
        let side = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let order_type = match order.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop-loss",
            OrderType::StopLimit => "stop-loss-limit",
        };

        let nonce = Utc::now().timestamp_millis().to_string();
        let mut params = vec![
            ("nonce".to_string(), nonce.clone()),
            ("pair".to_string(), native),
            ("type".to_string(), side.to_string()),
            ("ordertype".to_string(), order_type.to_string()),
            ("volume".to_string(), order.qty.to_string()),
            ("userref".to_string(), order.client_id.as_str().to_string()),
        ];
        if let Some(price) = order.price {
            params.push(("price".to_string(), price.to_string()));
        }
        let postdata = params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        let signature = Self::sign(&creds.secret, "/0/private/AddOrder", &nonce, &postdata)?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}/0/private/AddOrder"))
            .header("API-Key", &creds.key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "place_order", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }

        let envelope: KrakenEnvelope<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "place_order", e))?;
        if !envelope.error.is_empty() {
            return Err(ArbError::Rejected { venue: venue_id(), reason: envelope.error.join("; ") });
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
        let nonce = Utc::now().timestamp_millis().to_string();
        let postdata = format!("nonce={nonce}&txid={}", venue_order_id.as_str());
        let signature = Self::sign(&creds.secret, "/0/private/CancelOrder", &nonce, &postdata)?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}/0/private/CancelOrder"))
            .header("API-Key", &creds.key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
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
            "kraken get_order_status not wired for {venue_order_id}: requires POST /0/private/QueryOrders response mapping"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        let creds = self.require_credentials()?;
        let nonce = Utc::now().timestamp_millis().to_string();
        let postdata = format!("nonce={nonce}");
        let signature = Self::sign(&creds.secret, "/0/private/Balance", &nonce, &postdata)?;

        self.rate_limiter.wait(&venue_id()).await;
        let resp = self
            .http
            .post(format!("{BASE_URL}/0/private/Balance"))
            .header("API-Key", &creds.key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(venue_connector::map_status_err(&venue_id(), status, &text));
        }

        let envelope: KrakenEnvelope<HashMap<String, String>> = resp
            .json()
            .await
            .map_err(|e| venue_connector::map_reqwest_err(&venue_id(), "get_balances", e))?;
        if !envelope.error.is_empty() {
            return Err(ArbError::Rejected { venue: venue_id(), reason: envelope.error.join("; ") });
        }

        let result = envelope.result.unwrap_or_default();
        Ok(result
            .into_iter()
            .filter_map(|(asset, amount)| amount.parse().ok().map(|dec| (asset, dec)))
            .collect())
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        let native = to_native_pair(symbol);
        let interval = match timeframe {
            Timeframe::OneMinute => 1,
            Timeframe::FiveMinutes => 5,
            Timeframe::OneHour => 60,
            Timeframe::OneDay => 1440,
        };
        let result: HashMap<String, serde_json::Value> = self
            .get_public(
                "/0/public/OHLC",
                &format!("pair={native}&interval={interval}&since={}", from.timestamp()),
            )
            .await?;

        let rows = result
            .into_iter()
            .find(|(k, _)| k != "last")
            .and_then(|(_, v)| v.as_array().cloned())
            .unwrap_or_default();

        rows.into_iter()
            .map(|row| {
                let row = row.as_array().ok_or_else(|| ArbError::Invalid("malformed kraken ohlc row".into()))?;
                let field = |i: usize| -> ArbResult<Decimal> {
                    row.get(i)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ArbError::Invalid("malformed kraken ohlc field".into()))
                };
                let open_time = row.first().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(Candle {
                    open: field(1)?,
                    high: field(2)?,
                    low: field(3)?,
                    close: field(4)?,
                    volume: field(6)?,
                    open_time: DateTime::from_timestamp(open_time, 0).unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}

pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(KrakenConnector::new(credentials_provider))
}
