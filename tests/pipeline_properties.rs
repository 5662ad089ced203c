//! Property tests for parser and validator invariants.
//!
//! Uses proptest to verify:
//! 1. Parser robustness: n good lines and k broken lines give n candidates and k warnings
//! 2. Parser order: candidates keep file order
//! 3. Validator totality: every candidate is either accepted or rejected

use proptest::prelude::*;
use rust_decimal::Decimal;
use settlex_core::parser;
use settlex_core::validator;
use settlex_core::{SettlementCandidate, TradingDate, PRICE_SCALE};
use time::macros::date;

const HEADER: &str = "Series,Expiry,Strike,CallPut,Settlement,Volume,OpenInterest";

#[derive(Debug, Clone)]
enum Line {
    Good { strike: u32, call: bool, volume: u32 },
    Broken(&'static str),
}

impl Line {
    fn render(&self) -> String {
        match self {
            Self::Good {
                strike,
                call,
                volume,
            } => format!(
                "HTI2308,2023-08-30,{strike},{},1.25,{volume},7",
                if *call { "C" } else { "P" }
            ),
            Self::Broken(text) => (*text).to_string(),
        }
    }
}

fn trading_date() -> TradingDate {
    TradingDate::from_date(date!(2023 - 08 - 22))
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_line() -> impl Strategy<Value = Line> {
    prop_oneof![
        3 => (1u32..50_000, any::<bool>(), 0u32..10_000)
            .prop_map(|(strike, call, volume)| Line::Good { strike, call, volume }),
        1 => prop::sample::select(vec![
            "not a settlement line",
            "HTI2308,2023-08-30,38x0,C,1,1,1",
            "HTI2308,30-08-2023,3800,C,1,1,1",
            "HTI2308,2023-08-30,3800,C,1,many,1",
            "HTI2308,2023-08-30,3800,C",
            ",2023-08-30,3800,C,1,1,1",
        ])
        .prop_map(Line::Broken),
    ]
}

fn arb_candidate() -> impl Strategy<Value = SettlementCandidate> {
    (
        prop::sample::select(vec!["HTI2308", "HSI2309", "h", "2308HTI", "MHI2308"]),
        -5i64..20_000,
        0u32..9,
        prop::sample::select(vec!["C", "P", "Call", "put", "X", ""]),
        -3i64..500,
        -3i64..1_000,
        -3i64..1_000,
        -40i64..400,
    )
        .prop_map(
            |(series, strike, scale, call_put, price, volume, open_interest, expiry_offset)| {
                SettlementCandidate {
                    line_number: 1,
                    series: series.to_string(),
                    expiry: date!(2023 - 08 - 22) + time::Duration::days(expiry_offset),
                    strike: Decimal::new(strike, scale),
                    call_put: call_put.to_string(),
                    settlement_price: Decimal::new(price, 2),
                    volume,
                    open_interest,
                    trading_date: trading_date(),
                }
            },
        )
}

// ── 1/2. Parser robustness and order ─────────────────────────────────

proptest! {
    /// Every broken line is one warning; every good line is one candidate, in order.
    #[test]
    fn parser_counts_and_orders_lines(lines in prop::collection::vec(arb_line(), 0..60)) {
        let mut body = String::from(HEADER);
        body.push('\n');
        for line in &lines {
            body.push_str(&line.render());
            body.push('\n');
        }

        let output = parser::parse(body.as_bytes(), trading_date());

        let good: Vec<u32> = lines
            .iter()
            .filter_map(|line| match line {
                Line::Good { strike, .. } => Some(*strike),
                Line::Broken(_) => None,
            })
            .collect();
        let broken = lines.len() - good.len();

        prop_assert_eq!(output.candidates.len(), good.len());
        prop_assert_eq!(output.warnings.len(), broken);
        let parsed: Vec<Decimal> = output.candidates.iter().map(|c| c.strike).collect();
        let expected: Vec<Decimal> = good.iter().map(|s| Decimal::from(*s)).collect();
        prop_assert_eq!(parsed, expected);
        prop_assert!(output.warnings.iter().all(|w| w.line_number >= 2));
    }

    /// Arbitrary bytes never panic the parser, and a structural failure stands alone.
    #[test]
    fn parser_never_panics(raw in prop::collection::vec(any::<u8>(), 0..512)) {
        let output = parser::parse(&raw, trading_date());
        if output.warnings.iter().any(|w| w.is_structural()) {
            prop_assert!(output.candidates.is_empty());
            prop_assert_eq!(output.warnings.len(), 1);
        }
    }
}

#[test]
fn empty_input_is_one_structural_warning() {
    let output = parser::parse(b"", trading_date());
    assert!(output.candidates.is_empty());
    assert_eq!(output.warnings.len(), 1);
    assert!(output.warnings[0].is_structural());
}

// ── 3. Validator totality ────────────────────────────────────────────

proptest! {
    /// accepted + rejected == candidates, and accepted records satisfy the rules.
    #[test]
    fn validator_partitions_every_candidate(
        candidates in prop::collection::vec(arb_candidate(), 0..80)
    ) {
        let total = candidates.len();
        let validated = validator::validate(candidates);

        prop_assert_eq!(validated.accepted.len() + validated.rejected.len(), total);
        prop_assert_eq!(
            validated.rejected_reasons().values().sum::<usize>(),
            validated.rejected.len()
        );
        for record in &validated.accepted {
            prop_assert!(record.strike > Decimal::ZERO);
            prop_assert!(record.strike.scale() <= PRICE_SCALE);
            prop_assert!(record.settlement_price >= Decimal::ZERO);
            prop_assert!(record.expiry >= record.trading_date.as_date());
            prop_assert!(validator::is_valid_series(&record.series));
        }
    }
}
