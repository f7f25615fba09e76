//! Maps provider record shapes onto the canonical `Bar`.
//!
//! Providers name the same field differently ("Stock Splits", "stock_splits",
//! "splits") and send numbers either as JSON numbers or as strings. Every
//! canonical field has an alias list; the first alias present wins.

use crate::error::SchemaError;
use crate::types::{AssetClass, Bar, InstrumentRef, NormalizedBatch, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const DATE_FIELDS: &[&str] = &["Date", "date", "Datetime", "datetime", "timestamp"];
const OPEN_FIELDS: &[&str] = &["Open", "open", "1. open"];
const HIGH_FIELDS: &[&str] = &["High", "high", "2. high"];
const LOW_FIELDS: &[&str] = &["Low", "low", "3. low"];
const CLOSE_FIELDS: &[&str] = &["Close", "close", "4. close"];
const VOLUME_FIELDS: &[&str] = &["Volume", "volume", "5. volume"];
const DIVIDEND_FIELDS: &[&str] = &["Dividends", "dividends", "dividend"];
const SPLIT_FIELDS: &[&str] = &["Stock Splits", "stock_splits", "splits"];
const CAPITAL_GAIN_FIELDS: &[&str] = &["Capital Gains", "capital_gains", "capitalGains"];

/// Stateless record normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one provider record. `index` is only used in error messages.
    ///
    /// `date` and `close` are required. Missing `open`/`high`/`low` fall back
    /// to `close`; missing volume and corporate actions default to zero. The
    /// ETF-only `capital_gains` is injected as zero for ETFs and dropped for
    /// every other class.
    pub fn normalize(
        &self,
        record: &RawRecord,
        asset_class: AssetClass,
        index: usize,
    ) -> Result<Bar, SchemaError> {
        let date = parse_date(record, index)?;
        let close = require_price(record, CLOSE_FIELDS, "close", index)?;

        let open = optional_number(record, OPEN_FIELDS, "open", index)?.unwrap_or(close);
        let high = optional_number(record, HIGH_FIELDS, "high", index)?.unwrap_or(close);
        let low = optional_number(record, LOW_FIELDS, "low", index)?.unwrap_or(close);

        let volume = match lookup(record, VOLUME_FIELDS) {
            Some(value) => parse_volume(value).ok_or_else(|| invalid(index, "volume", value))?,
            None => 0,
        };

        let dividends = optional_number(record, DIVIDEND_FIELDS, "dividends", index)?.unwrap_or(0.0);
        let stock_splits = optional_number(record, SPLIT_FIELDS, "stock_splits", index)?.unwrap_or(0.0);

        let capital_gains = if asset_class.has_capital_gains() {
            Some(
                optional_number(record, CAPITAL_GAIN_FIELDS, "capital_gains", index)?
                    .unwrap_or(0.0),
            )
        } else {
            None
        };

        Ok(Bar {
            date,
            open,
            high,
            low,
            close,
            volume,
            dividends,
            stock_splits,
            capital_gains,
        })
    }

    /// Normalize every record of one fetch. The first bad record aborts the
    /// whole batch; no partial batch is ever produced.
    pub fn normalize_batch(
        &self,
        instrument: &InstrumentRef,
        records: &[RawRecord],
    ) -> Result<NormalizedBatch, SchemaError> {
        let bars = records
            .iter()
            .enumerate()
            .map(|(i, record)| self.normalize(record, instrument.asset_class, i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NormalizedBatch::from_bars(instrument.clone(), bars))
    }
}

fn lookup<'a>(record: &'a RawRecord, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|field| record.get(field))
}

fn invalid(index: usize, field: &'static str, value: &Value) -> SchemaError {
    SchemaError::InvalidField {
        index,
        field,
        value: value.to_string(),
    }
}

fn parse_date(record: &RawRecord, index: usize) -> Result<NaiveDate, SchemaError> {
    let value = lookup(record, DATE_FIELDS).ok_or(SchemaError::MissingField {
        index,
        field: "date",
    })?;

    let parsed = match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.date_naive()),
        _ => None,
    };

    parsed.ok_or_else(|| invalid(index, "date", value))
}

/// Accepts `YYYY-MM-DD`, naive `YYYY-MM-DD HH:MM:SS` and RFC 3339. Offset
/// timestamps keep their local calendar date.
fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn optional_number(
    record: &RawRecord,
    aliases: &[&str],
    field: &'static str,
    index: usize,
) -> Result<Option<f64>, SchemaError> {
    match lookup(record, aliases) {
        Some(value) => as_f64(value).map(Some).ok_or_else(|| invalid(index, field, value)),
        None => Ok(None),
    }
}

fn require_price(
    record: &RawRecord,
    aliases: &[&str],
    field: &'static str,
    index: usize,
) -> Result<f64, SchemaError> {
    optional_number(record, aliases, field, index)?
        .ok_or(SchemaError::MissingField { index, field })
}

/// Integer volume. Whole-valued floats ("1234.0") are accepted.
fn parse_volume(value: &Value) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    let v = as_f64(value)?;
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn yahoo_record(day: &str, close: f64) -> RawRecord {
        RawRecord::new()
            .with("Date", json!(format!("{}T00:00:00-05:00", day)))
            .with("Open", json!(close - 1.0))
            .with("High", json!(close + 2.0))
            .with("Low", json!(close - 2.0))
            .with("Close", json!(close))
            .with("Volume", json!(1_000_000))
            .with("Dividends", json!(0.0))
            .with("Stock Splits", json!(0.0))
    }

    // =========================================================================
    // Field Mapping Tests
    // =========================================================================

    #[test]
    fn test_normalize_provider_field_names() {
        let bar = SchemaNormalizer::new()
            .normalize(&yahoo_record("2020-01-02", 75.0), AssetClass::Stock, 0)
            .unwrap();

        assert_eq!(bar.date, date("2020-01-02"));
        assert_eq!(bar.open, 74.0);
        assert_eq!(bar.high, 77.0);
        assert_eq!(bar.low, 73.0);
        assert_eq!(bar.close, 75.0);
        assert_eq!(bar.volume, 1_000_000);
        assert_eq!(bar.capital_gains, None);
    }

    #[test]
    fn test_normalize_canonical_and_string_values() {
        let record = RawRecord::new()
            .with("date", json!("2021-03-04"))
            .with("open", json!("10.5"))
            .with("high", json!("11"))
            .with("low", json!("10"))
            .with("close", json!("10.75"))
            .with("volume", json!("2500.0"))
            .with("stock_splits", json!(2));

        let bar = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Crypto, 0)
            .unwrap();

        assert_eq!(bar.open, 10.5);
        assert_eq!(bar.close, 10.75);
        assert_eq!(bar.volume, 2500);
        assert_eq!(bar.stock_splits, 2.0);
        assert_eq!(bar.dividends, 0.0);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let record = RawRecord::new()
            .with("Date", json!("2020-01-02"))
            .with("Close", json!(5.0));

        let bar = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Stock, 0)
            .unwrap();

        assert_eq!(bar.open, 5.0);
        assert_eq!(bar.high, 5.0);
        assert_eq!(bar.low, 5.0);
        assert_eq!(bar.volume, 0);
    }

    // =========================================================================
    // Asset Class Shape Tests
    // =========================================================================

    #[test]
    fn test_etf_injects_capital_gains() {
        let bar = SchemaNormalizer::new()
            .normalize(&yahoo_record("2020-01-02", 320.0), AssetClass::Etf, 0)
            .unwrap();
        assert_eq!(bar.capital_gains, Some(0.0));

        let record = yahoo_record("2020-01-03", 321.0).with("Capital Gains", json!(0.42));
        let bar = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Etf, 0)
            .unwrap();
        assert_eq!(bar.capital_gains, Some(0.42));
    }

    #[test]
    fn test_non_etf_drops_capital_gains() {
        let record = yahoo_record("2020-01-03", 321.0).with("Capital Gains", json!(0.42));

        for class in [AssetClass::Stock, AssetClass::Crypto] {
            let bar = SchemaNormalizer::new().normalize(&record, class, 0).unwrap();
            assert_eq!(bar.capital_gains, None);
        }
    }

    // =========================================================================
    // Date Parsing Tests
    // =========================================================================

    #[test]
    fn test_date_formats() {
        assert_eq!(parse_date_str("2020-01-02"), Some(date("2020-01-02")));
        assert_eq!(
            parse_date_str("2020-01-02T00:00:00-05:00"),
            Some(date("2020-01-02"))
        );
        assert_eq!(
            parse_date_str("2020-01-02 00:00:00-05:00"),
            Some(date("2020-01-02"))
        );
        assert_eq!(
            parse_date_str("2020-01-02 09:30:00"),
            Some(date("2020-01-02"))
        );
        assert_eq!(parse_date_str("02/01/2020"), None);
    }

    #[test]
    fn test_epoch_date() {
        let record = RawRecord::new()
            .with("timestamp", json!(1577923200))
            .with("Close", json!(1.0));

        let bar = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Crypto, 0)
            .unwrap();
        assert_eq!(bar.date, date("2020-01-02"));
    }

    // =========================================================================
    // Schema Error Tests
    // =========================================================================

    #[test]
    fn test_missing_close_is_schema_error() {
        let record = RawRecord::new().with("Date", json!("2020-01-02"));
        let err = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Stock, 3)
            .unwrap_err();

        assert_eq!(
            err,
            SchemaError::MissingField {
                index: 3,
                field: "close"
            }
        );
    }

    #[test]
    fn test_null_close_is_missing() {
        let record = RawRecord::new()
            .with("Date", json!("2020-01-02"))
            .with("Close", Value::Null);

        let err = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Stock, 0)
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field: "close", .. }));
    }

    #[test]
    fn test_missing_and_bad_date() {
        let normalizer = SchemaNormalizer::new();

        let record = RawRecord::new().with("Close", json!(1.0));
        assert!(matches!(
            normalizer.normalize(&record, AssetClass::Stock, 0),
            Err(SchemaError::MissingField { field: "date", .. })
        ));

        let record = RawRecord::new()
            .with("Date", json!("yesterday"))
            .with("Close", json!(1.0));
        assert!(matches!(
            normalizer.normalize(&record, AssetClass::Stock, 0),
            Err(SchemaError::InvalidField { field: "date", .. })
        ));
    }

    #[test]
    fn test_unparsable_numbers() {
        let normalizer = SchemaNormalizer::new();

        let record = yahoo_record("2020-01-02", 1.0).with("Close", json!("n/a"));
        assert!(matches!(
            normalizer.normalize(&record, AssetClass::Stock, 0),
            Err(SchemaError::InvalidField { field: "close", .. })
        ));

        let record = yahoo_record("2020-01-02", 1.0).with("Close", json!("NaN"));
        assert!(normalizer.normalize(&record, AssetClass::Stock, 0).is_err());

        let record = yahoo_record("2020-01-02", 1.0).with("Volume", json!(12.5));
        assert!(matches!(
            normalizer.normalize(&record, AssetClass::Stock, 0),
            Err(SchemaError::InvalidField { field: "volume", .. })
        ));
    }

    // =========================================================================
    // Batch Tests
    // =========================================================================

    #[test]
    fn test_batch_sorted_and_deduplicated() {
        let records = vec![
            yahoo_record("2020-01-03", 3.0),
            yahoo_record("2020-01-02", 2.0),
            yahoo_record("2020-01-03", 30.0),
        ];

        let batch = SchemaNormalizer::new()
            .normalize_batch(&InstrumentRef::stock("AAPL"), &records)
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.bars()[0].date, date("2020-01-02"));
        assert_eq!(batch.bars()[1].close, 30.0);
    }

    #[test]
    fn test_batch_aborts_on_first_bad_record() {
        let records = vec![
            yahoo_record("2020-01-02", 2.0),
            RawRecord::new().with("Date", json!("2020-01-03")),
            yahoo_record("2020-01-06", 4.0),
        ];

        let err = SchemaNormalizer::new()
            .normalize_batch(&InstrumentRef::stock("AAPL"), &records)
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { index: 1, .. }));
    }

    #[test]
    fn test_negative_volume_passes_through() {
        let record = yahoo_record("2020-01-02", 2.0).with("Volume", json!(-5));
        let bar = SchemaNormalizer::new()
            .normalize(&record, AssetClass::Stock, 0)
            .unwrap();
        assert_eq!(bar.volume, -5);
    }
}
