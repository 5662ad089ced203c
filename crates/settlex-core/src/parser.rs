//! Settlement file parser.
//!
//! The exchange file is line oriented: optional preamble, a header line that
//! starts with `Series`, one contract per line, and optional footer lines.
//! Columns are either comma separated or aligned with runs of whitespace; the
//! header decides which.
//!
//! Parsing never fails. Bad data lines become [`ParseWarning`]s and the rest
//! of the file is still read. Input that does not look like a settlement file
//! at all yields no candidates and a single warning with `line_number == 0`.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::domain::{SettlementCandidate, TradingDate};

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line number, or 0 for whole-file problems.
    pub line_number: usize,
    pub raw_content: String,
    pub reason: String,
}

impl ParseWarning {
    pub fn structural(reason: impl Into<String>) -> Self {
        Self {
            line_number: 0,
            raw_content: String::new(),
            reason: reason.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        self.line_number == 0
    }
}

/// Candidates in file order plus every warning raised on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub candidates: Vec<SettlementCandidate>,
    pub warnings: Vec<ParseWarning>,
}

impl ParseOutput {
    pub fn structural(reason: impl Into<String>) -> Self {
        Self {
            candidates: Vec::new(),
            warnings: vec![ParseWarning::structural(reason)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Comma,
    Whitespace,
}

impl Delimiter {
    fn split(self, line: &str) -> Vec<&str> {
        match self {
            Self::Comma => line.split(',').map(str::trim).collect(),
            Self::Whitespace => line.split_whitespace().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Series,
    Expiry,
    Strike,
    CallPut,
    Settlement,
    Volume,
    OpenInterest,
}

impl Column {
    const REQUIRED: [Self; 7] = [
        Self::Series,
        Self::Expiry,
        Self::Strike,
        Self::CallPut,
        Self::Settlement,
        Self::Volume,
        Self::OpenInterest,
    ];

    fn from_header(name: &str) -> Option<Self> {
        match name {
            "series" => Some(Self::Series),
            "expiry" | "expirydate" => Some(Self::Expiry),
            "strike" | "strikeprice" => Some(Self::Strike),
            "callput" | "cp" | "type" => Some(Self::CallPut),
            "settlement" | "settle" | "settlementprice" => Some(Self::Settlement),
            "volume" | "vol" => Some(Self::Volume),
            "openinterest" | "oi" => Some(Self::OpenInterest),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Expiry => "expiry",
            Self::Strike => "strike",
            Self::CallPut => "call_put",
            Self::Settlement => "settlement",
            Self::Volume => "volume",
            Self::OpenInterest => "open_interest",
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Series => 0,
            Self::Expiry => 1,
            Self::Strike => 2,
            Self::CallPut => 3,
            Self::Settlement => 4,
            Self::Volume => 5,
            Self::OpenInterest => 6,
        }
    }
}

/// Column positions resolved from the header line.
#[derive(Debug, Clone)]
struct Layout {
    delimiter: Delimiter,
    width: usize,
    positions: [usize; 7],
}

impl Layout {
    fn from_header(line: &str) -> Result<Self, String> {
        let delimiter = if line.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Whitespace
        };

        let names = join_split_headers(
            delimiter
                .split(line)
                .into_iter()
                .map(normalize_header)
                .collect(),
        );

        let mut positions = [usize::MAX; 7];
        for (index, name) in names.iter().enumerate() {
            if let Some(column) = Column::from_header(name) {
                let slot = &mut positions[column.slot()];
                if *slot == usize::MAX {
                    *slot = index;
                }
            }
        }

        let missing: Vec<&str> = Column::REQUIRED
            .iter()
            .filter(|column| positions[column.slot()] == usize::MAX)
            .map(|column| column.name())
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "header missing required column(s): {}",
                missing.join(", ")
            ));
        }

        Ok(Self {
            delimiter,
            width: names.len(),
            positions,
        })
    }

    fn field<'a>(&self, tokens: &[&'a str], column: Column) -> &'a str {
        tokens[self.positions[column.slot()]]
    }

    fn parse_line(
        &self,
        line_number: usize,
        line: &str,
        trading_date: TradingDate,
    ) -> Result<SettlementCandidate, String> {
        let tokens = self.delimiter.split(line.trim());
        if tokens.len() != self.width {
            return Err(format!(
                "expected {} fields, found {}",
                self.width,
                tokens.len()
            ));
        }

        let series = self.field(&tokens, Column::Series);
        if series.is_empty() {
            return Err(String::from("series is empty"));
        }

        let expiry_raw = self.field(&tokens, Column::Expiry);
        let expiry =
            parse_expiry(expiry_raw).ok_or_else(|| format!("invalid expiry '{expiry_raw}'"))?;

        Ok(SettlementCandidate {
            line_number,
            series: series.to_owned(),
            expiry,
            strike: parse_decimal(self.field(&tokens, Column::Strike), "strike")?,
            call_put: self.field(&tokens, Column::CallPut).to_owned(),
            settlement_price: parse_decimal(
                self.field(&tokens, Column::Settlement),
                "settlement price",
            )?,
            volume: parse_integer(self.field(&tokens, Column::Volume), "volume")?,
            open_interest: parse_integer(
                self.field(&tokens, Column::OpenInterest),
                "open interest",
            )?,
            trading_date,
        })
    }
}

/// Parse a raw settlement file published for `trading_date`.
pub fn parse(raw: &[u8], trading_date: TradingDate) -> ParseOutput {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return ParseOutput::structural("empty input");
    }
    if raw.contains(&0) {
        return ParseOutput::structural("binary content: NUL byte in input");
    }
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text.trim_start_matches('\u{feff}'),
        Err(error) => {
            return ParseOutput::structural(format!("binary content: invalid UTF-8 ({error})"));
        }
    };

    let mut lines = text.lines().enumerate().map(|(index, line)| (index + 1, line));
    let Some((_, header)) = lines.find(|(_, line)| is_header(line)) else {
        return ParseOutput::structural("missing header line starting with 'Series'");
    };
    let layout = match Layout::from_header(header.trim()) {
        Ok(layout) => layout,
        Err(reason) => return ParseOutput::structural(reason),
    };

    let mut output = ParseOutput::default();
    for (line_number, line) in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_footer(trimmed) {
            continue;
        }

        match layout.parse_line(line_number, trimmed, trading_date) {
            Ok(candidate) => output.candidates.push(candidate),
            Err(reason) => output.warnings.push(ParseWarning {
                line_number,
                raw_content: line.to_owned(),
                reason,
            }),
        }
    }

    output
}

fn is_header(line: &str) -> bool {
    line.trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("series"))
}

fn is_footer(line: &str) -> bool {
    if line.starts_with('*') || line.starts_with('#') {
        return true;
    }
    let first = line
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .next()
        .unwrap_or_default()
        .trim_end_matches(':');
    first.eq_ignore_ascii_case("total") || first.eq_ignore_ascii_case("end")
}

fn normalize_header(token: &str) -> String {
    token
        .chars()
        .filter(|ch| !matches!(ch, '/' | '_' | '-' | ' ' | '.'))
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Re-join headers that whitespace splitting tore apart, e.g. `Open Interest`.
fn join_split_headers(names: Vec<String>) -> Vec<String> {
    let mut joined = Vec::with_capacity(names.len());
    let mut iter = names.into_iter().peekable();
    while let Some(name) = iter.next() {
        let pair = match (name.as_str(), iter.peek().map(String::as_str)) {
            ("open", Some("interest")) => Some("openinterest"),
            ("settlement", Some("price")) => Some("settlementprice"),
            ("strike", Some("price")) => Some("strikeprice"),
            _ => None,
        };
        match pair {
            Some(pair) => {
                iter.next();
                joined.push(pair.to_owned());
            }
            None => joined.push(name),
        }
    }
    joined
}

fn parse_expiry(raw: &str) -> Option<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| Date::parse(raw, format_description!("[day]/[month]/[year]")))
        .or_else(|_| Date::parse(raw, format_description!("[year][month][day]")))
        .ok()
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid {field} '{raw}'"))
}

fn parse_integer(raw: &str, field: &str) -> Result<i64, String> {
    raw.replace(',', "")
        .parse::<i64>()
        .map_err(|_| format!("invalid {field} '{raw}'"))
}
