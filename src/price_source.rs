// =============================================================================
// Spot Price Feed — public Coinbase price endpoints with a short cache
// =============================================================================
//
// Three unauthenticated endpoints are queried together:
//
//   GET /v2/prices/{SYMBOL}/spot   — reference price
//   GET /v2/prices/{SYMBOL}/buy    — what a taker pays (ask)
//   GET /v2/prices/{SYMBOL}/sell   — what a taker receives (bid)
//
// The tick's price is the bid: the conservative mark for a long-only book.
// Results are cached for CACHE_TTL so a fast tick loop does not hammer the
// API; on a fetch failure the last cached tick (any age) is served and the
// caller decides whether to skip.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a fetched tick stays authoritative.
pub const CACHE_TTL: Duration = Duration::from_secs(2);
/// Hard bound on any single price request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One observed price sample. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    /// The bid. Conservative mark for a long-only strategy.
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Deserialize)]
struct PriceEnvelope {
    data: PriceData,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    amount: String,
}

pub struct SpotFeed {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
    cache: Mutex<Option<(Instant, Tick)>>,
    ttl: Duration,
}

impl SpotFeed {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_base_url(symbol, "https://api.coinbase.com")
    }

    pub fn with_base_url(symbol: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            symbol: symbol.into(),
            cache: Mutex::new(None),
            ttl: CACHE_TTL,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The current tick: cached within the TTL, refreshed otherwise.
    /// A failed refresh falls back to the last cached tick if one exists.
    pub async fn current(&self) -> Result<Tick> {
        if let Some((at, tick)) = *self.cache.lock() {
            if at.elapsed() < self.ttl {
                return Ok(tick);
            }
        }

        match self.fetch().await {
            Ok(tick) => {
                *self.cache.lock() = Some((Instant::now(), tick));
                Ok(tick)
            }
            Err(e) => {
                if let Some((_, stale)) = *self.cache.lock() {
                    warn!(symbol = %self.symbol, error = %e, "price fetch failed, serving stale tick");
                    Ok(stale)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Tick> {
        let (spot, buy, sell) = tokio::join!(
            self.fetch_amount("spot"),
            self.fetch_amount("buy"),
            self.fetch_amount("sell"),
        );
        let tick = tick_from_amounts(spot?, buy?, sell?, Utc::now())?;
        debug!(symbol = %self.symbol, bid = tick.bid, ask = tick.ask, "tick fetched");
        Ok(tick)
    }

    async fn fetch_amount(&self, side: &str) -> Result<f64> {
        let url = format!("{}/v2/prices/{}/{side}", self.base_url, self.symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET /v2/prices/{}/{side} request failed", self.symbol))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("price endpoint {side} returned {status}");
        }

        let envelope: PriceEnvelope = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {side} price response"))?;

        envelope
            .data
            .amount
            .parse::<f64>()
            .with_context(|| format!("failed to parse {side} amount '{}'", envelope.data.amount))
    }
}

impl std::fmt::Debug for SpotFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotFeed")
            .field("symbol", &self.symbol)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Build a tick from the three raw amounts. The buy side is the ask, the
/// sell side the bid; a missing or inverted book falls back to the spot
/// price for both sides.
pub fn tick_from_amounts(spot: f64, buy: f64, sell: f64, now: DateTime<Utc>) -> Result<Tick> {
    let (bid, ask) = if sell > 0.0 && buy > 0.0 && sell <= buy {
        (sell, buy)
    } else if spot > 0.0 {
        (spot, spot)
    } else {
        anyhow::bail!("no usable price: spot={spot} buy={buy} sell={sell}");
    };

    if bid <= 0.0 {
        anyhow::bail!("non-positive bid {bid}");
    }

    Ok(Tick {
        timestamp: now,
        price: bid,
        bid,
        ask,
    })
}
