//! Universe list loading.
//!
//! The universe is a CSV file with (at least) `ticker` and `type` columns:
//!
//! ```text
//! ticker,type
//! AAPL,stock
//! SPY,etf
//! BTC-USD,crypto
//! ```

use crate::error::UniverseError;
use crate::types::{AssetClass, InstrumentRef};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Load the universe from a CSV file, preserving file order.
pub fn load_universe(path: impl AsRef<Path>) -> Result<Vec<InstrumentRef>, UniverseError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let universe = read_universe(file)?;
    info!("Loaded {} instruments from {}", universe.len(), path.display());
    Ok(universe)
}

/// Parse a universe from any reader. Rows with an unknown type are skipped
/// with a warning; blank rows are ignored.
pub fn read_universe<R: Read>(reader: R) -> Result<Vec<InstrumentRef>, UniverseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or(UniverseError::MissingColumn(name))
    };
    let ticker_col = column("ticker")?;
    let type_col = column("type")?;

    let mut universe = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let symbol = record.get(ticker_col).unwrap_or_default();
        let kind = record.get(type_col).unwrap_or_default();

        if symbol.is_empty() {
            continue;
        }

        match AssetClass::parse(kind) {
            Some(asset_class) => universe.push(InstrumentRef::new(symbol, asset_class)),
            None => warn!(
                "Skipping universe row {} ({}): unknown type {:?}",
                line + 2,
                symbol,
                kind
            ),
        }
    }

    Ok(universe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_universe() {
        let csv = "ticker,type\nAAPL,stock\nSPY,ETF\nBTC-USD,crypto\n";
        let universe = read_universe(csv.as_bytes()).unwrap();

        assert_eq!(
            universe,
            vec![
                InstrumentRef::stock("AAPL"),
                InstrumentRef::etf("SPY"),
                InstrumentRef::crypto("BTC-USD"),
            ]
        );
    }

    #[test]
    fn test_headers_case_insensitive_and_extra_columns() {
        let csv = "Name,Type,Ticker\nApple Inc,stock, AAPL \n";
        let universe = read_universe(csv.as_bytes()).unwrap();
        assert_eq!(universe, vec![InstrumentRef::stock("AAPL")]);
    }

    #[test]
    fn test_unknown_type_and_blank_rows_skipped() {
        let csv = "ticker,type\nAAPL,stock\nEURUSD,forex\n,\n\nMSFT,stock\n";
        let universe = read_universe(csv.as_bytes()).unwrap();

        assert_eq!(
            universe,
            vec![InstrumentRef::stock("AAPL"), InstrumentRef::stock("MSFT")]
        );
    }

    #[test]
    fn test_missing_column() {
        let err = read_universe("symbol,type\nAAPL,stock\n".as_bytes()).unwrap_err();
        assert!(matches!(err, UniverseError::MissingColumn("ticker")));

        let err = read_universe("ticker\nAAPL\n".as_bytes()).unwrap_err();
        assert!(matches!(err, UniverseError::MissingColumn("type")));
    }

    #[test]
    fn test_load_universe_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ticker,type").unwrap();
        writeln!(file, "ABC,stock").unwrap();
        writeln!(file, "ABC,crypto").unwrap();

        let universe = load_universe(file.path()).unwrap();
        assert_eq!(universe.len(), 2);
        assert_ne!(universe[0], universe[1]);
    }

    #[test]
    fn test_load_universe_missing_file() {
        let err = load_universe("/nonexistent/universe.csv").unwrap_err();
        assert!(matches!(err, UniverseError::Io(_)));
    }
}
