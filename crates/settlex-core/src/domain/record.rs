use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use super::trading_date::iso_date;
use super::{Symbol, TradingDate, UtcDateTime};
use crate::ValidationError;

/// Decimal places retained for strikes and settlement prices.
pub const PRICE_SCALE: u32 = 6;

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallPut {
    Call,
    Put,
}

impl CallPut {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "Call",
            Self::Put => "Put",
        }
    }
}

impl Display for CallPut {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallPut {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CALL" | "C" => Ok(Self::Call),
            "PUT" | "P" => Ok(Self::Put),
            _ => Err(ValidationError::InvalidCallPut {
                value: value.to_owned(),
            }),
        }
    }
}

/// Round to the stored scale and drop trailing zeros.
pub fn normalize_decimal(value: Decimal) -> Decimal {
    value.round_dp(PRICE_SCALE).normalize()
}

/// Parser output: typed columns, not yet checked against business rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCandidate {
    /// 1-based line number in the source file.
    pub line_number: usize,
    pub series: String,
    pub expiry: Date,
    pub strike: Decimal,
    pub call_put: String,
    pub settlement_price: Decimal,
    pub volume: i64,
    pub open_interest: i64,
    pub trading_date: TradingDate,
}

/// Unique identity of a settlement record.
///
/// Field order defines the canonical ordering of query results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub trading_date: TradingDate,
    pub series: String,
    pub expiry: Date,
    pub strike: Decimal,
    pub call_put: CallPut,
}

/// One option contract's settlement for one trading date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub series: String,
    #[serde(with = "iso_date")]
    pub expiry: Date,
    pub strike: Decimal,
    pub call_put: CallPut,
    pub settlement_price: Decimal,
    pub volume: u64,
    pub open_interest: u64,
    pub trading_date: TradingDate,
}

impl SettlementRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            trading_date: self.trading_date,
            series: self.series.clone(),
            expiry: self.expiry,
            strike: normalize_decimal(self.strike),
            call_put: self.call_put,
        }
    }

    /// Symbol derived from the series prefix.
    pub fn symbol(&self) -> Option<Symbol> {
        Symbol::from_series(&self.series)
    }

    /// Copy with decimals normalized to their stored representation.
    pub fn normalized(mut self) -> Self {
        self.strike = normalize_decimal(self.strike);
        self.settlement_price = normalize_decimal(self.settlement_price);
        self
    }
}

/// Whether the ingestion behind a summary reached both durable stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    Partial,
}

impl SummaryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

/// One entry per ingested trading date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDateSummary {
    pub trading_date: TradingDate,
    pub record_count: u64,
    pub symbols: BTreeSet<Symbol>,
    pub ingested_at: UtcDateTime,
    pub status: SummaryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use time::macros::date;

    fn record(strike: &str) -> SettlementRecord {
        SettlementRecord {
            series: "HTI2308".to_string(),
            expiry: date!(2023 - 08 - 30),
            strike: Decimal::from_str(strike).expect("decimal"),
            call_put: CallPut::Call,
            settlement_price: Decimal::from_str("0.1234").expect("decimal"),
            volume: 100,
            open_interest: 50,
            trading_date: TradingDate::from_date(date!(2023 - 08 - 22)),
        }
    }

    #[test]
    fn call_put_accepts_short_and_long_forms() {
        assert_eq!("Call".parse::<CallPut>().expect("call"), CallPut::Call);
        assert_eq!("c".parse::<CallPut>().expect("call"), CallPut::Call);
        assert_eq!("PUT".parse::<CallPut>().expect("put"), CallPut::Put);
        assert!("Straddle".parse::<CallPut>().is_err());
    }

    #[test]
    fn key_ignores_trailing_zeros_in_strike() {
        assert_eq!(record("18000").key(), record("18000.000").key());
    }

    #[test]
    fn record_json_uses_plain_dates_and_decimal_strings() {
        let json = serde_json::to_value(record("18000.50").normalized()).expect("serialize");
        assert_eq!(json["expiry"], "2023-08-30");
        assert_eq!(json["trading_date"], "2023-08-22");
        assert_eq!(json["strike"], "18000.5");
        assert_eq!(json["call_put"], "Call");
    }
}
