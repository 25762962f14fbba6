//! Core types used throughout PurePrice
//!
//! Closed enumerations for exchanges, fiat-rate providers and quote
//! currencies, plus the data model shared by ingestion and resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchanges whose spot prices are ingested into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Kucoin,
}

impl Default for Exchange {
    fn default() -> Self {
        Exchange::Binance
    }
}

impl Exchange {
    /// Key prefix used for this exchange's cache entries
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Kucoin => "kucoin",
        }
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "kucoin" => Ok(Exchange::Kucoin),
            other => Err(format!("unsupported source '{}'", other)),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Binance => write!(f, "Binance"),
            Exchange::Kucoin => write!(f, "KuCoin"),
        }
    }
}

/// Local exchanges whose USDT trades back the fiat conversion rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiatRateSource {
    Wallex,
    Nobitex,
    Bitpin,
    Ramzinex,
}

impl Default for FiatRateSource {
    fn default() -> Self {
        FiatRateSource::Nobitex
    }
}

impl FiatRateSource {
    /// Aggregation order of the fiat-rate task
    pub const ALL: [FiatRateSource; 4] = [
        FiatRateSource::Wallex,
        FiatRateSource::Nobitex,
        FiatRateSource::Bitpin,
        FiatRateSource::Ramzinex,
    ];

    /// Name used in the trade store and in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            FiatRateSource::Wallex => "wallex",
            FiatRateSource::Nobitex => "nobitex",
            FiatRateSource::Bitpin => "bitpin",
            FiatRateSource::Ramzinex => "ramzinex",
        }
    }

    /// Market the source's USDT trades are recorded under
    pub fn market_name(&self) -> &'static str {
        match self {
            FiatRateSource::Ramzinex => "USDTIRR",
            _ => "USDTIRT",
        }
    }

    /// Whether the trade window start is shifted by the extra 210 minutes.
    ///
    /// Only wallex and ramzinex trades carry this shift upstream. Keep it as
    /// is: changing it silently changes the published rate.
    pub fn has_timezone_offset(&self) -> bool {
        matches!(self, FiatRateSource::Wallex | FiatRateSource::Ramzinex)
    }
}

impl FromStr for FiatRateSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wallex" => Ok(FiatRateSource::Wallex),
            "nobitex" => Ok(FiatRateSource::Nobitex),
            "bitpin" => Ok(FiatRateSource::Bitpin),
            "ramzinex" => Ok(FiatRateSource::Ramzinex),
            other => Err(format!("unsupported fiat rate source '{}'", other)),
        }
    }
}

impl fmt::Display for FiatRateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Currencies a price can be quoted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteCurrency {
    Usdt,
    Irr,
    Irt,
}

impl Default for QuoteCurrency {
    fn default() -> Self {
        QuoteCurrency::Usdt
    }
}

impl QuoteCurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteCurrency::Usdt => "USDT",
            QuoteCurrency::Irr => "IRR",
            QuoteCurrency::Irt => "IRT",
        }
    }

    /// Whether resolving this quote needs the fiat conversion rate
    pub fn is_fiat(&self) -> bool {
        !matches!(self, QuoteCurrency::Usdt)
    }
}

impl FromStr for QuoteCurrency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USDT" => Ok(QuoteCurrency::Usdt),
            "IRR" => Ok(QuoteCurrency::Irr),
            "IRT" => Ok(QuoteCurrency::Irt),
            other => Err(format!("unsupported quote '{}'", other)),
        }
    }
}

impl fmt::Display for QuoteCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One spot price reported by an exchange during a fetch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeTicker {
    pub symbol: String,
    pub price: f64,
}

/// A single trade read from the upstream trade log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub price: f64,
    pub amount: f64,
}

/// Fiat conversion rate derived from one source's large trades.
///
/// Serialized with PascalCase names; other readers of the `usdtirr:*` keys
/// depend on that layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketSourceResult {
    pub market_name: String,
    pub source: String,
    pub median: f64,
    pub weighted_mean: f64,
    pub std_dev: f64,
    pub sum_amounts: f64,
}

/// 1-minute OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u64,
}

/// Resolved price returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub source: String,
    pub price: f64,
    pub quote: QuoteCurrency,
    /// Seconds since the backing price was written
    pub elapsed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("BINANCE".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!("KuCoin".parse::<Exchange>().unwrap(), Exchange::Kucoin);
        assert_eq!("irt".parse::<QuoteCurrency>().unwrap(), QuoteCurrency::Irt);
        assert_eq!(
            "Nobitex".parse::<FiatRateSource>().unwrap(),
            FiatRateSource::Nobitex
        );
        assert!("bybit".parse::<Exchange>().is_err());
        assert!("EUR".parse::<QuoteCurrency>().is_err());
    }

    #[test]
    fn timezone_offset_only_for_wallex_and_ramzinex() {
        let shifted: Vec<_> = FiatRateSource::ALL
            .iter()
            .filter(|s| s.has_timezone_offset())
            .map(|s| s.as_str())
            .collect();
        assert_eq!(shifted, vec!["wallex", "ramzinex"]);
        assert_eq!(FiatRateSource::Ramzinex.market_name(), "USDTIRR");
        assert_eq!(FiatRateSource::Bitpin.market_name(), "USDTIRT");
    }

    #[test]
    fn market_source_result_uses_pascal_case_fields() {
        let result = MarketSourceResult {
            market_name: "USDTIRT".to_string(),
            source: "nobitex".to_string(),
            median: 1.0,
            weighted_mean: 2.0,
            std_dev: 0.5,
            sum_amounts: 300.0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["MarketName"], "USDTIRT");
        assert_eq!(json["WeightedMean"], 2.0);
        assert_eq!(json["StdDev"], 0.5);
    }
}
