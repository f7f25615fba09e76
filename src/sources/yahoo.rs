//! Yahoo Finance chart API client for daily history.
//!
//! Serves stocks, ETFs and crypto pairs (`BTC-USD`) from one endpoint. Daily
//! bars are stamped at the exchange's local midnight, so timestamps are
//! converted with the exchange `gmtoffset` before taking the calendar date.

use super::MarketDataSource;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::types::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, SecondsFormat};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// Yahoo Finance chart response.
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: YahooMeta,
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
    #[serde(default)]
    events: Option<YahooEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    symbol: String,
    #[serde(default)]
    gmtoffset: i32,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

/// Corporate actions, keyed by event timestamp.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooEvents {
    #[serde(default)]
    dividends: HashMap<String, YahooAmountEvent>,
    #[serde(default)]
    splits: HashMap<String, YahooSplitEvent>,
    #[serde(default)]
    capital_gains: HashMap<String, YahooAmountEvent>,
}

#[derive(Debug, Deserialize)]
struct YahooAmountEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct YahooSplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

/// Normalize symbol for Yahoo Finance API.
/// Yahoo uses hyphens instead of dots for share classes (e.g., BRK-B not BRK.B)
fn normalize_yahoo_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace('.', "-")
}

/// Yahoo Finance API client.
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
}

impl YahooFinanceClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.yahoo_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        // period2 is exclusive on Yahoo's side.
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp());
        let period2 = (end + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp());

        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=div%2Csplits%2CcapitalGains&includePrePost=false",
            self.base_url,
            normalize_yahoo_symbol(symbol),
            period1.unwrap_or_default(),
            period2.unwrap_or_default(),
        )
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let url = self.chart_url(symbol, start, end);
        debug!("Fetching Yahoo Finance data: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        // Unknown symbols come back as 404 with a chart error body.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::Api(format!("HTTP {}", status)));
        }

        let data: YahooChartResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        records_from_chart(data.chart)
    }
}

/// Flatten a chart response into one record per trading day.
///
/// An unknown symbol or a window without trading days yields no records.
/// Days where Yahoo reports no close are dropped.
fn records_from_chart(chart: YahooChart) -> Result<Vec<RawRecord>, SourceError> {
    if let Some(error) = chart.error {
        if error.code == "Not Found" {
            debug!("Yahoo has no data: {}", error.description);
            return Ok(Vec::new());
        }
        return Err(SourceError::Api(format!(
            "{} - {}",
            error.code, error.description
        )));
    }

    let result = match chart.result.and_then(|r| r.into_iter().next()) {
        Some(result) => result,
        None => return Ok(Vec::new()),
    };

    let timestamps = match result.timestamp {
        Some(ts) if !ts.is_empty() => ts,
        _ => return Ok(Vec::new()),
    };

    let offset = FixedOffset::east_opt(result.meta.gmtoffset)
        .ok_or_else(|| SourceError::Parse(format!("bad gmtoffset {}", result.meta.gmtoffset)))?;

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Parse("no quote data in response".to_string()))?;

    let opens = quote.open.unwrap_or_default();
    let highs = quote.high.unwrap_or_default();
    let lows = quote.low.unwrap_or_default();
    let closes = quote.close.unwrap_or_default();
    let volumes = quote.volume.unwrap_or_default();

    let events = result.events.unwrap_or_default();
    let dividends = amounts_by_date(&events.dividends, offset);
    let capital_gains = amounts_by_date(&events.capital_gains, offset);
    let splits: HashMap<NaiveDate, f64> = events
        .splits
        .values()
        .filter(|s| s.denominator != 0.0)
        .filter_map(|s| Some((local_date(s.date, offset)?, s.numerator / s.denominator)))
        .collect();

    let mut records = Vec::with_capacity(timestamps.len());
    for (i, &timestamp) in timestamps.iter().enumerate() {
        let close = match closes.get(i).copied().flatten() {
            Some(close) => close,
            None => continue,
        };
        let stamped = match DateTime::from_timestamp(timestamp, 0) {
            Some(dt) => dt.with_timezone(&offset),
            None => {
                return Err(SourceError::Parse(format!(
                    "{}: bad timestamp {}",
                    result.meta.symbol, timestamp
                )))
            }
        };
        let date = stamped.date_naive();

        let mut record = RawRecord::new()
            .with("Date", stamped.to_rfc3339_opts(SecondsFormat::Secs, false))
            .with("Open", json!(opens.get(i).copied().flatten()))
            .with("High", json!(highs.get(i).copied().flatten()))
            .with("Low", json!(lows.get(i).copied().flatten()))
            .with("Close", close)
            .with("Volume", json!(volumes.get(i).copied().flatten()))
            .with("Dividends", dividends.get(&date).copied().unwrap_or(0.0))
            .with("Stock Splits", splits.get(&date).copied().unwrap_or(0.0));

        if let Some(gain) = capital_gains.get(&date) {
            record.insert("Capital Gains", *gain);
        }

        records.push(record);
    }

    Ok(records)
}

fn local_date(timestamp: i64, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.with_timezone(&offset).date_naive())
}

fn amounts_by_date(
    events: &HashMap<String, YahooAmountEvent>,
    offset: FixedOffset,
) -> HashMap<NaiveDate, f64> {
    events
        .values()
        .filter_map(|e| Some((local_date(e.date, offset)?, e.amount)))
        .collect()
}
