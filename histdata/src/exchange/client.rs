//! Binance REST klines client

use crate::data::Interval;
use crate::error::{HistoryError, Result};
use crate::exchange::source::{CandleSource, RawKline, SourceError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which Binance market the klines come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinanceMarket {
    Spot,
    /// USDⓈ-M perpetual futures
    Futures,
}

impl BinanceMarket {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Spot => "https://api.binance.com",
            Self::Futures => "https://fapi.binance.com",
        }
    }

    pub fn klines_path(&self) -> &'static str {
        match self {
            Self::Spot => "/api/v3/klines",
            Self::Futures => "/fapi/v1/klines",
        }
    }
}

impl FromStr for BinanceMarket {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "spot" | "binance" | "binance_spot" => Ok(Self::Spot),
            "futures" | "usdm" | "binance_futures" | "binance_usdm" => Ok(Self::Futures),
            other => Err(HistoryError::InvalidConfig(format!(
                "unknown Binance market: {}",
                other
            ))),
        }
    }
}

/// [`CandleSource`] over Binance's public klines endpoint
#[derive(Debug, Clone)]
pub struct BinanceKlineSource {
    client: Client,
    market: BinanceMarket,
    base_url: String,
}

impl BinanceKlineSource {
    pub fn new(market: BinanceMarket, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HistoryError::InvalidConfig(format!("HTTP client: {}", e)))?;
        let base_url = base_url
            .unwrap_or_else(|| market.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            market,
            base_url,
        })
    }

    pub fn market(&self) -> BinanceMarket {
        self.market
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.market.klines_path())
    }
}

/// Binance wants `BTCUSDT`, callers may say `BTC/USDT`
fn exchange_symbol(symbol: &str) -> String {
    symbol.chars().filter(|c| !matches!(c, '/' | '-' | '_')).collect()
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> SourceError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    // 418 is Binance's escalation after ignoring 429s
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        SourceError::RateLimited { retry_after }
    } else if status.is_server_error() {
        SourceError::Transport(detail)
    } else if status == StatusCode::REQUEST_TIMEOUT {
        SourceError::Timeout
    } else {
        SourceError::Rejected(detail)
    }
}

fn classify_transport(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
impl CandleSource for BinanceKlineSource {
    async fn fetch_page(
        &self,
        symbol: &str,
        interval: Interval,
        start_time: i64,
        limit: usize,
    ) -> std::result::Result<Vec<RawKline>, SourceError> {
        let pair = exchange_symbol(symbol);
        debug!(
            "GET {} symbol={} interval={} startTime={} limit={}",
            self.endpoint(),
            pair,
            interval,
            start_time,
            limit
        );

        let response = self
            .client
            .get(self.endpoint())
            .query(&[
                ("symbol", pair),
                ("interval", interval.as_str().to_string()),
                ("startTime", start_time.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        response
            .json::<Vec<RawKline>>()
            .await
            .map_err(classify_transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_endpoints() {
        let futures = BinanceKlineSource::new(BinanceMarket::Futures, None).unwrap();
        assert_eq!(futures.endpoint(), "https://fapi.binance.com/fapi/v1/klines");

        let spot = BinanceKlineSource::new(
            BinanceMarket::Spot,
            Some("http://localhost:8080/".to_string()),
        )
        .unwrap();
        assert_eq!(spot.endpoint(), "http://localhost:8080/api/v3/klines");
    }

    #[test]
    fn test_market_from_str() {
        assert_eq!("SPOT".parse::<BinanceMarket>().unwrap(), BinanceMarket::Spot);
        assert_eq!("usdm".parse::<BinanceMarket>().unwrap(), BinanceMarket::Futures);
        assert!("margin".parse::<BinanceMarket>().is_err());
    }

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn test_classify_status() {
        let wait = Some(Duration::from_secs(5));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, wait, ""),
            SourceError::RateLimited { retry_after: wait }
        );
        assert!(matches!(
            classify_status(StatusCode::from_u16(418).unwrap(), None, ""),
            SourceError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "upstream"),
            SourceError::Transport(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, r#"{"code":-1121,"msg":"Invalid symbol."}"#),
            SourceError::Rejected(_)
        ));
    }
}
