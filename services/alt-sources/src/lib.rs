//! # Alternative Source
//!
//! Read-only adapters over public REST endpoints of data platforms that
//! are not tradable venues (spec §4.3): they only ever answer
//! `get_market_data`, never place orders. A source failure never blocks
//! the Data Aggregator; it yields an empty map for that cycle and logs at
//! `debug!`.
//!
//! Grounded on the `VenueConnector` capability subset
//! (`libs/venue-connector/src/lib.rs`) and on
//! `services/adapters/src/common.rs`'s adapter-trait discipline, narrowed
//! to the one read-only method these sources actually support. The five
//! sources here (CoinGecko, CoinCap, CoinMarketCap, CryptoCompare,
//! Messari) mirror `original_source/src/data_sources/alternative_sources.py`'s
//! `AlternativeDataSources` catalog, minus its on-chain-only platforms
//! (Glassnode, DeFiLlama, Dune, TheGraph, Moralis, Alchemy), which have no
//! `get_market_data`-shaped price feed to offer this platform's aggregator.

use std::collections::HashMap;
use std::time::Instant;

use arb_types::{Symbol, Ticker, VenueId};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// Read-only market-data source (spec §4.3). Implementations must never
/// propagate a network error to the caller; on any failure they log at
/// `debug!` and return an empty map, matching `VenueConnector`'s "an
/// adapter that fails stays excluded, not fatal" semantics.
#[async_trait]
pub trait AltSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker>;
}

/// Maps a canonical base asset (`BTC`, `ETH`, ...) to the id a given
/// platform expects. Both reference sources key assets by a platform id
/// rather than a ticker, so the mapping lives once here and is shared.
fn coingecko_id(base: &str) -> Option<&'static str> {
    match base {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "USDT" => Some("tether"),
        "USDC" => Some("usd-coin"),
        "BNB" => Some("binancecoin"),
        "XRP" => Some("ripple"),
        "ADA" => Some("cardano"),
        "DOGE" => Some("dogecoin"),
        "AVAX" => Some("avalanche-2"),
        "MATIC" => Some("matic-network"),
        "DOT" => Some("polkadot"),
        _ => None,
    }
}

fn coincap_id(base: &str) -> Option<&'static str> {
    match base {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "USDT" => Some("tether"),
        "USDC" => Some("usd-coin"),
        "BNB" => Some("binance-coin"),
        "XRP" => Some("xrp"),
        "ADA" => Some("cardano"),
        "DOGE" => Some("dogecoin"),
        "AVAX" => Some("avalanche"),
        "MATIC" => Some("polygon"),
        "DOT" => Some("polkadot"),
        _ => None,
    }
}

/// Builds a `Ticker` from a bare spot price. Platform aggregators like
/// CoinGecko/CoinCap expose no order book, so bid/ask are synthesized as
/// ±0.1% around the reported price, mirroring how the Data Aggregator
/// already treats a missing bid/ask from any source (spec §4.4 step 4).
fn synthesize_ticker(symbol: Symbol, price: Decimal, volume: Decimal, source: VenueId, latency_ms: u64) -> Ticker {
    Ticker {
        symbol,
        last: price,
        bid: price * Decimal::new(999, 3),
        ask: price * Decimal::new(1001, 3),
        volume,
        timestamp: Utc::now(),
        source,
        source_latency_ms: latency_ms,
    }
}

/// CoinGecko's free `/simple/price` endpoint.
pub struct CoinGeckoSource {
    http: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.coingecko.com/api/v3".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AltSource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker> {
        let mut id_to_symbol: HashMap<&str, &Symbol> = HashMap::new();
        for symbol in symbols {
            if let Some(id) = coingecko_id(symbol.base()) {
                id_to_symbol.insert(id, symbol);
            }
        }
        if id_to_symbol.is_empty() {
            return HashMap::new();
        }

        let ids = id_to_symbol.keys().copied().collect::<Vec<_>>().join(",");
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_vol=true",
            self.base_url, ids
        );

        let started = Instant::now();
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "request failed");
                return HashMap::new();
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "invalid response body");
                return HashMap::new();
            }
        };

        let mut out = HashMap::new();
        let Some(obj) = body.as_object() else {
            return out;
        };
        for (id, entry) in obj {
            let Some(symbol) = id_to_symbol.get(id.as_str()) else {
                continue;
            };
            let Some(price) = entry.get("usd").and_then(|v| v.as_f64()) else {
                continue;
            };
            let volume = entry
                .get("usd_24h_vol")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let Some(price) = Decimal::from_f64(price) else {
                continue;
            };
            let volume = Decimal::from_f64(volume).unwrap_or(Decimal::ZERO);
            out.insert(
                (*symbol).clone(),
                synthesize_ticker(
                    (*symbol).clone(),
                    price,
                    volume,
                    VenueId::new(self.name()),
                    latency_ms,
                ),
            );
        }
        out
    }
}

/// CoinCap's free `/v2/assets` endpoint.
pub struct CoinCapSource {
    http: reqwest::Client,
    base_url: String,
}

impl CoinCapSource {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.coincap.io/v2".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for CoinCapSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AltSource for CoinCapSource {
    fn name(&self) -> &str {
        "coincap"
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker> {
        let mut id_to_symbol: HashMap<&str, &Symbol> = HashMap::new();
        for symbol in symbols {
            if let Some(id) = coincap_id(symbol.base()) {
                id_to_symbol.insert(id, symbol);
            }
        }
        if id_to_symbol.is_empty() {
            return HashMap::new();
        }

        let ids = id_to_symbol.keys().copied().collect::<Vec<_>>().join(",");
        let url = format!("{}/assets?ids={}", self.base_url, ids);

        let started = Instant::now();
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "request failed");
                return HashMap::new();
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "invalid response body");
                return HashMap::new();
            }
        };

        let mut out = HashMap::new();
        let Some(data) = body.get("data").and_then(|v| v.as_array()) else {
            return out;
        };
        for asset in data {
            let Some(id) = asset.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(symbol) = id_to_symbol.get(id) else {
                continue;
            };
            let Some(price) = asset
                .get("priceUsd")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
            else {
                continue;
            };
            let volume = asset
                .get("volumeUsd24Hr")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO);
            out.insert(
                (*symbol).clone(),
                synthesize_ticker(
                    (*symbol).clone(),
                    price,
                    volume,
                    VenueId::new(self.name()),
                    latency_ms,
                ),
            );
        }
        out
    }
}

/// CoinMarketCap's `/cryptocurrency/quotes/latest` endpoint. Unlike
/// CoinGecko/CoinCap it addresses assets by ticker symbol directly, so
/// no platform-id lookup table is needed; authenticated via the
/// `X-CMC_PRO_API_KEY` header, matching `original_source`'s
/// `CoinMarketCapSource`.
pub struct CoinMarketCapSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CoinMarketCapSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://pro-api.coinmarketcap.com/v1".to_string(),
            api_key: api_key.into(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AltSource for CoinMarketCapSource {
    fn name(&self) -> &str {
        "coinmarketcap"
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        let tickers: HashMap<String, &Symbol> =
            symbols.iter().map(|s| (s.base().to_uppercase(), s)).collect();
        let url = format!(
            "{}/cryptocurrency/quotes/latest?symbol={}&convert=USD",
            self.base_url,
            tickers.keys().cloned().collect::<Vec<_>>().join(",")
        );

        let started = Instant::now();
        let response = match self.http.get(&url).header("X-CMC_PRO_API_KEY", &self.api_key).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "request failed");
                return HashMap::new();
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "invalid response body");
                return HashMap::new();
            }
        };

        let mut out = HashMap::new();
        let Some(data) = body.get("data").and_then(|v| v.as_object()) else {
            return out;
        };
        for (ticker_symbol, entry) in data {
            let Some(symbol) = tickers.get(ticker_symbol) else {
                continue;
            };
            let Some(quote) = entry.get("quote").and_then(|q| q.get("USD")) else {
                continue;
            };
            let Some(price) = quote.get("price").and_then(|v| v.as_f64()).and_then(Decimal::from_f64) else {
                continue;
            };
            let volume = quote
                .get("volume_24h")
                .and_then(|v| v.as_f64())
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO);
            out.insert(
                (*symbol).clone(),
                synthesize_ticker((*symbol).clone(), price, volume, VenueId::new(self.name()), latency_ms),
            );
        }
        out
    }
}

/// CryptoCompare's `/pricemultifull` endpoint. Unlike the other sources
/// here it reports real bid/ask rather than a synthesized spread, so
/// `synthesize_ticker` isn't used for this one (grounded on
/// `original_source`'s `CryptoCompareSource`, whose `RAW.<SYM>.USD`
/// object carries `BID`/`ASK` fields directly).
pub struct CryptoCompareSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CryptoCompareSource {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://min-api.cryptocompare.com/data".to_string(),
            api_key,
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }
}

#[async_trait]
impl AltSource for CryptoCompareSource {
    fn name(&self) -> &str {
        "cryptocompare"
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        let tickers: HashMap<String, &Symbol> =
            symbols.iter().map(|s| (s.base().to_uppercase(), s)).collect();
        let url = format!(
            "{}/pricemultifull?fsyms={}&tsyms=USD",
            self.base_url,
            tickers.keys().cloned().collect::<Vec<_>>().join(",")
        );

        let started = Instant::now();
        let mut request = self.http.get(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header("authorization", format!("Apikey {api_key}"));
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "request failed");
                return HashMap::new();
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "invalid response body");
                return HashMap::new();
            }
        };

        let mut out = HashMap::new();
        let Some(raw) = body.get("RAW").and_then(|v| v.as_object()) else {
            return out;
        };
        for (ticker_symbol, entry) in raw {
            let Some(symbol) = tickers.get(ticker_symbol) else {
                continue;
            };
            let Some(usd) = entry.get("USD") else {
                continue;
            };
            let (Some(price), Some(bid), Some(ask)) = (
                usd.get("PRICE").and_then(|v| v.as_f64()).and_then(Decimal::from_f64),
                usd.get("BID").and_then(|v| v.as_f64()).and_then(Decimal::from_f64),
                usd.get("ASK").and_then(|v| v.as_f64()).and_then(Decimal::from_f64),
            ) else {
                continue;
            };
            let volume = usd
                .get("VOLUME24HOUR")
                .and_then(|v| v.as_f64())
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO);
            out.insert(
                (*symbol).clone(),
                Ticker {
                    symbol: (*symbol).clone(),
                    last: price,
                    bid,
                    ask,
                    volume,
                    timestamp: Utc::now(),
                    source: VenueId::new(self.name()),
                    source_latency_ms: latency_ms,
                },
            );
        }
        out
    }
}

/// Messari's `/assets` endpoint, filtered client-side to the requested
/// symbols since it has no per-symbol query parameter (grounded on
/// `original_source`'s `MessariSource`, which does the same filtering in
/// its own response loop). Authenticated via `x-messari-api-key`.
pub struct MessariSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MessariSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://data.messari.io/api/v1".to_string(),
            api_key: api_key.into(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AltSource for MessariSource {
    fn name(&self) -> &str {
        "messari"
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> HashMap<Symbol, Ticker> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        let wanted: HashMap<String, &Symbol> =
            symbols.iter().map(|s| (s.base().to_uppercase(), s)).collect();
        let url = format!(
            "{}/assets?fields=id,symbol,metrics/market_data/price_usd,metrics/market_data/volume_last_24_hours",
            self.base_url
        );

        let started = Instant::now();
        let response = match self.http.get(&url).header("x-messari-api-key", &self.api_key).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "request failed");
                return HashMap::new();
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(source = self.name(), error = %err, "invalid response body");
                return HashMap::new();
            }
        };

        let mut out = HashMap::new();
        let Some(assets) = body.get("data").and_then(|v| v.as_array()) else {
            return out;
        };
        for asset in assets {
            let Some(ticker_symbol) = asset.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let ticker_symbol = ticker_symbol.to_uppercase();
            let Some(symbol) = wanted.get(&ticker_symbol) else {
                continue;
            };
            let Some(metrics) = asset.get("metrics").and_then(|m| m.get("market_data")) else {
                continue;
            };
            let Some(price) = metrics
                .get("price_usd")
                .and_then(|v| v.as_f64())
                .and_then(Decimal::from_f64)
            else {
                continue;
            };
            let volume = metrics
                .get("volume_last_24_hours")
                .and_then(|v| v.as_f64())
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO);
            out.insert(
                (*symbol).clone(),
                synthesize_ticker((*symbol).clone(), price, volume, VenueId::new(self.name()), latency_ms),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_symbol_has_no_platform_id() {
        assert!(coingecko_id("NOTAREALCOIN").is_none());
        assert!(coincap_id("NOTAREALCOIN").is_none());
    }

    #[test]
    fn synthesized_ask_is_above_synthesized_bid() {
        let ticker = synthesize_ticker(
            Symbol::new("BTC", "USD"),
            Decimal::new(50000, 0),
            Decimal::ZERO,
            VenueId::new("coingecko"),
            10,
        );
        assert!(ticker.ask > ticker.bid);
    }

    #[tokio::test]
    async fn empty_symbol_list_yields_empty_map_without_a_request() {
        let source = CoinGeckoSource::with_base_url("http://127.0.0.1:0");
        let out = source.get_market_data(&[]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn unmapped_symbols_are_skipped_without_a_request() {
        let source = CoinCapSource::with_base_url("http://127.0.0.1:0");
        let out = source
            .get_market_data(&[Symbol::new("NOTAREAL", "USD")])
            .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn coinmarketcap_empty_symbol_list_yields_empty_map_without_a_request() {
        let source = CoinMarketCapSource::with_base_url("http://127.0.0.1:0", "test-key");
        let out = source.get_market_data(&[]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn cryptocompare_empty_symbol_list_yields_empty_map_without_a_request() {
        let source = CryptoCompareSource::with_base_url("http://127.0.0.1:0");
        let out = source.get_market_data(&[]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn messari_empty_symbol_list_yields_empty_map_without_a_request() {
        let source = MessariSource::with_base_url("http://127.0.0.1:0", "test-key");
        let out = source.get_market_data(&[]).await;
        assert!(out.is_empty());
    }
}
