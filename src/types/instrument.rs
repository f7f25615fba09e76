use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset class of an instrument.
///
/// The class decides which table a batch lands in and whether bars carry the
/// ETF-only `capital_gains` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Etf,
    Crypto,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::Stock, AssetClass::Etf, AssetClass::Crypto];

    /// Parse an asset class from a universe-file value ("stock", "ETF", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stock" | "stocks" => Some(AssetClass::Stock),
            "etf" | "etfs" => Some(AssetClass::Etf),
            "crypto" | "cryptocurrency" => Some(AssetClass::Crypto),
            _ => None,
        }
    }

    /// Target table for this class.
    pub fn table(&self) -> TableId {
        match self {
            AssetClass::Stock => TableId::StockData,
            AssetClass::Etf => TableId::EtfData,
            AssetClass::Crypto => TableId::CryptoData,
        }
    }

    pub fn has_capital_gains(&self) -> bool {
        matches!(self, AssetClass::Etf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Stock => "stock",
            AssetClass::Etf => "etf",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three per-class bar tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableId {
    StockData,
    EtfData,
    CryptoData,
}

const BASE_COLUMNS: [&str; 9] = [
    "ticker",
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "dividends",
    "stock_splits",
];

const ETF_COLUMNS: [&str; 10] = [
    "ticker",
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "dividends",
    "stock_splits",
    "capital_gains",
];

impl TableId {
    pub const ALL: [TableId; 3] = [TableId::StockData, TableId::EtfData, TableId::CryptoData];

    /// SQL table name.
    pub fn name(&self) -> &'static str {
        match self {
            TableId::StockData => "stock_data",
            TableId::EtfData => "etf_data",
            TableId::CryptoData => "crypto_data",
        }
    }

    /// Column list in insertion order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableId::EtfData => &ETF_COLUMNS,
            TableId::StockData | TableId::CryptoData => &BASE_COLUMNS,
        }
    }

    pub fn has_capital_gains(&self) -> bool {
        matches!(self, TableId::EtfData)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a logical instrument: the same symbol in two asset classes is
/// two different instruments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    pub symbol: String,
    pub asset_class: AssetClass,
}

impl InstrumentRef {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
        }
    }

    pub fn stock(symbol: impl Into<String>) -> Self {
        Self::new(symbol, AssetClass::Stock)
    }

    pub fn etf(symbol: impl Into<String>) -> Self {
        Self::new(symbol, AssetClass::Etf)
    }

    pub fn crypto(symbol: impl Into<String>) -> Self {
        Self::new(symbol, AssetClass::Crypto)
    }

    pub fn table(&self) -> TableId {
        self.asset_class.table()
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.asset_class)
    }
}
