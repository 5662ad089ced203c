//! Business-rule checks that turn parser candidates into records.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{CallPut, SettlementCandidate, SettlementRecord, PRICE_SCALE};

const MIN_SERIES_LEN: usize = 2;
const MAX_SERIES_LEN: usize = 16;

/// Integer digits left in a `DECIMAL(18, 6)` column.
const MAX_INTEGER_DIGITS: u32 = 12;

/// Why a candidate was rejected. Rules are checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NonPositiveStrike,
    /// More decimal places or integer digits than a stored price can hold.
    StrikeOutOfRange,
    NegativeSettlementPrice,
    SettlementPriceOutOfRange,
    NegativeVolume,
    NegativeOpenInterest,
    InvalidSeries,
    InvalidCallPut,
    ExpiredContract,
}

impl RejectionReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonPositiveStrike => "non_positive_strike",
            Self::StrikeOutOfRange => "strike_out_of_range",
            Self::NegativeSettlementPrice => "negative_settlement_price",
            Self::SettlementPriceOutOfRange => "settlement_price_out_of_range",
            Self::NegativeVolume => "negative_volume",
            Self::NegativeOpenInterest => "negative_open_interest",
            Self::InvalidSeries => "invalid_series",
            Self::InvalidCallPut => "invalid_call_put",
            Self::ExpiredContract => "expired_contract",
        }
    }
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition of a candidate batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validated {
    pub accepted: Vec<SettlementRecord>,
    pub rejected: Vec<(SettlementCandidate, RejectionReason)>,
}

impl Validated {
    /// Rejection counts keyed by reason category.
    pub fn rejected_reasons(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, reason) in &self.rejected {
            *counts.entry(reason.as_str().to_owned()).or_insert(0) += 1;
        }
        counts
    }
}

/// Check every candidate; each one ends up either accepted or rejected.
pub fn validate(candidates: Vec<SettlementCandidate>) -> Validated {
    let mut validated = Validated::default();
    for candidate in candidates {
        match check(&candidate) {
            Ok(record) => validated.accepted.push(record),
            Err(reason) => validated.rejected.push((candidate, reason)),
        }
    }
    validated
}

fn check(candidate: &SettlementCandidate) -> Result<SettlementRecord, RejectionReason> {
    if candidate.strike <= Decimal::ZERO {
        return Err(RejectionReason::NonPositiveStrike);
    }
    if !fits_price_column(candidate.strike) {
        return Err(RejectionReason::StrikeOutOfRange);
    }
    if candidate.settlement_price < Decimal::ZERO {
        return Err(RejectionReason::NegativeSettlementPrice);
    }
    if !fits_price_column(candidate.settlement_price) {
        return Err(RejectionReason::SettlementPriceOutOfRange);
    }
    let volume =
        u64::try_from(candidate.volume).map_err(|_| RejectionReason::NegativeVolume)?;
    let open_interest = u64::try_from(candidate.open_interest)
        .map_err(|_| RejectionReason::NegativeOpenInterest)?;
    if !is_valid_series(&candidate.series) {
        return Err(RejectionReason::InvalidSeries);
    }
    let call_put = candidate
        .call_put
        .parse::<CallPut>()
        .map_err(|_| RejectionReason::InvalidCallPut)?;
    if candidate.expiry < candidate.trading_date.as_date() {
        return Err(RejectionReason::ExpiredContract);
    }

    Ok(SettlementRecord {
        series: candidate.series.clone(),
        expiry: candidate.expiry,
        strike: candidate.strike,
        call_put,
        settlement_price: candidate.settlement_price,
        volume,
        open_interest,
        trading_date: candidate.trading_date,
    }
    .normalized())
}

/// Whether `value` is stored exactly, with no rounding and no overflow.
fn fits_price_column(value: Decimal) -> bool {
    let limit = Decimal::from(10_i64.pow(MAX_INTEGER_DIGITS));
    value.normalize().scale() <= PRICE_SCALE && value.abs() < limit
}

/// Upper-case alphanumeric product code that starts with a letter.
pub fn is_valid_series(series: &str) -> bool {
    let len = series.len();
    (MIN_SERIES_LEN..=MAX_SERIES_LEN).contains(&len)
        && series.starts_with(|ch: char| ch.is_ascii_uppercase())
        && series
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
}
