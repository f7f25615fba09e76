use super::InstrumentRef;
use crate::error::InvalidWindow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One trading-day observation.
///
/// `low <= open, close <= high` is what providers usually report, but it is
/// not guaranteed and nothing here enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub dividends: f64,
    pub stock_splits: f64,
    /// Present only on ETF bars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capital_gains: Option<f64>,
}

impl Bar {
    /// A bar with all prices at `close` and no corporate actions.
    pub fn flat(date: NaiveDate, close: f64, volume: i64) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume,
            dividends: 0.0,
            stock_splits: 0.0,
            capital_gains: None,
        }
    }

    /// First violated sanity rule, if any.
    pub fn anomaly(&self) -> Option<String> {
        if self.low > self.open.min(self.close) {
            return Some(format!("low {} above open/close", self.low));
        }
        if self.high < self.open.max(self.close) {
            return Some(format!("high {} below open/close", self.high));
        }
        if self.volume < 0 {
            return Some(format!("negative volume {}", self.volume));
        }
        if self.dividends < 0.0 || self.stock_splits < 0.0 {
            return Some("negative dividend or split".to_string());
        }
        if self.capital_gains.is_some_and(|g| g < 0.0) {
            return Some("negative capital gains".to_string());
        }
        None
    }
}

/// All bars fetched for one instrument, ascending by date with unique dates.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    instrument: InstrumentRef,
    bars: Vec<Bar>,
}

impl NormalizedBatch {
    pub fn empty(instrument: InstrumentRef) -> Self {
        Self {
            instrument,
            bars: Vec::new(),
        }
    }

    /// Build a batch from bars in any order. When a date repeats, the last
    /// occurrence wins.
    pub fn from_bars(instrument: InstrumentRef, bars: impl IntoIterator<Item = Bar>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Bar> = BTreeMap::new();
        for bar in bars {
            by_date.insert(bar.date, bar);
        }

        Self {
            instrument,
            bars: by_date.into_values().collect(),
        }
    }

    pub fn instrument(&self) -> &InstrumentRef {
        &self.instrument
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn into_parts(self) -> (InstrumentRef, Vec<Bar>) {
        (self.instrument, self.bars)
    }
}

/// Inclusive calendar-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidWindow> {
        if start > end {
            return Err(InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// A provider record before normalization: provider field names mapped to
/// loosely typed JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Non-null value stored under `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // =========================================================================
    // NormalizedBatch Tests
    // =========================================================================

    #[test]
    fn test_batch_sorts_ascending() {
        let batch = NormalizedBatch::from_bars(
            InstrumentRef::stock("AAPL"),
            vec![
                Bar::flat(date("2020-01-03"), 3.0, 10),
                Bar::flat(date("2020-01-01"), 1.0, 10),
                Bar::flat(date("2020-01-02"), 2.0, 10),
            ],
        );

        let dates: Vec<_> = batch.bars().iter().map(|b| b.date).collect();
        assert_eq!(
            dates,
            vec![date("2020-01-01"), date("2020-01-02"), date("2020-01-03")]
        );
    }

    #[test]
    fn test_batch_duplicate_date_last_wins() {
        let batch = NormalizedBatch::from_bars(
            InstrumentRef::stock("AAPL"),
            vec![
                Bar::flat(date("2020-01-02"), 1.0, 10),
                Bar::flat(date("2020-01-01"), 5.0, 10),
                Bar::flat(date("2020-01-02"), 2.0, 20),
            ],
        );

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.bars()[1].close, 2.0);
        assert_eq!(batch.bars()[1].volume, 20);
    }

    #[test]
    fn test_empty_batch() {
        let batch = NormalizedBatch::empty(InstrumentRef::crypto("XYZ123"));
        assert!(batch.is_empty());
        assert_eq!(batch.instrument().symbol, "XYZ123");
    }

    // =========================================================================
    // Bar Tests
    // =========================================================================

    #[test]
    fn test_bar_anomalies() {
        let mut bar = Bar::flat(date("2020-01-02"), 10.0, 100);
        assert!(bar.anomaly().is_none());

        bar.low = 11.0;
        assert!(bar.anomaly().unwrap().contains("low"));

        bar.low = 9.0;
        bar.high = 9.5;
        assert!(bar.anomaly().unwrap().contains("high"));

        bar.high = 12.0;
        bar.volume = -1;
        assert!(bar.anomaly().unwrap().contains("volume"));

        bar.volume = 0;
        bar.capital_gains = Some(-0.1);
        assert!(bar.anomaly().is_some());
    }

    // =========================================================================
    // DateRange / RawRecord Tests
    // =========================================================================

    #[test]
    fn test_date_range_rejects_inverted_window() {
        assert!(DateRange::new(date("2020-01-10"), date("2020-01-01")).is_err());

        let single = DateRange::new(date("2020-01-01"), date("2020-01-01")).unwrap();
        assert_eq!(single.start(), single.end());
    }

    #[test]
    fn test_raw_record_treats_null_as_missing() {
        let record = RawRecord::new()
            .with("Close", json!(1.5))
            .with("Open", Value::Null);

        assert!(record.get("Close").is_some());
        assert!(record.get("Open").is_none());
        assert!(record.get("High").is_none());
    }
}
