//! Year/quarter period types and raw-period parsing
//!
//! Source datasets reference time in several shapes: bare years ("2021"),
//! quarter codes ("2021Q3", "2021-T3" in Catalan statistical exports), and
//! calendar dates ("2021-07-15"). Everything is normalized onto the
//! `Period` type: a year plus an optional quarter, where a missing quarter
//! means annual granularity.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accepted year range for incoming observations.
///
/// Anything outside is treated as a malformed period rather than data.
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// One calendar quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    /// All quarters in calendar order
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    /// Quarter number (1-4)
    pub fn number(self) -> u8 {
        match self {
            Quarter::Q1 => 1,
            Quarter::Q2 => 2,
            Quarter::Q3 => 3,
            Quarter::Q4 => 4,
        }
    }

    /// Quarter from its number (1-4)
    pub fn from_number(n: u8) -> Result<Quarter> {
        match n {
            1 => Ok(Quarter::Q1),
            2 => Ok(Quarter::Q2),
            3 => Ok(Quarter::Q3),
            4 => Ok(Quarter::Q4),
            other => Err(Error::InvalidInput(format!("quarter out of range: {}", other))),
        }
    }

    /// Quarter containing a calendar month (1-12)
    pub fn from_month(month: u8) -> Result<Quarter> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!("month out of range: {}", month)));
        }
        Quarter::from_number((month - 1) / 3 + 1)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

/// A reporting period: a year with optional quarter.
///
/// `quarter: None` means the value covers the whole year (annual
/// granularity); `Some(q)` means native quarterly granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub quarter: Option<Quarter>,
}

impl Period {
    /// Annual period for a year
    pub fn annual(year: i32) -> Self {
        Self { year, quarter: None }
    }

    /// Quarterly period
    pub fn quarterly(year: i32, quarter: Quarter) -> Self {
        Self { year, quarter: Some(quarter) }
    }

    pub fn is_annual(&self) -> bool {
        self.quarter.is_none()
    }

    /// The four quarterly periods of this period's year
    pub fn quarters_of_year(&self) -> [Period; 4] {
        Quarter::ALL.map(|q| Period::quarterly(self.year, q))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quarter {
            Some(q) => write!(f, "{}{}", self.year, q),
            None => write!(f, "{}", self.year),
        }
    }
}

/// Parse a raw period string from an upstream dataset.
///
/// Accepted shapes (separator between year and the rest may be any of
/// `-`, `_`, `.`, `/` or a space, and is optional):
/// - `"2021"`: annual
/// - `"2021Q3"`, `"2021-Q3"`: quarterly
/// - `"2021T3"`, `"2021-T3"`: quarterly ("trimestre" exports)
/// - `"2021-07"`, `"2021-07-15"`, `"202107"`: quarterly, via the month
///
/// Anything else is `Error::InvalidInput` carrying the original string so
/// callers can count and report malformed periods.
pub fn parse_period(raw: &str) -> Result<Period> {
    let s = raw.trim();
    if s.len() < 4 || !s.is_char_boundary(4) {
        return Err(malformed(raw));
    }

    let (year_part, rest) = s.split_at(4);
    let year: i32 = year_part.parse().map_err(|_| malformed(raw))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(malformed(raw));
    }

    let rest = rest.trim_start_matches([' ', '-', '_', '.', '/']);
    if rest.is_empty() {
        return Ok(Period::annual(year));
    }

    // Quarter marker: Q3 / q3 / T3 / t3
    if let Some(digits) = rest
        .strip_prefix(['Q', 'q', 'T', 't'])
        .filter(|d| d.chars().all(|c| c.is_ascii_digit()))
    {
        let n: u8 = digits.parse().map_err(|_| malformed(raw))?;
        let quarter = Quarter::from_number(n).map_err(|_| malformed(raw))?;
        return Ok(Period::quarterly(year, quarter));
    }

    // Calendar forms: MM or MM<sep>DD
    let month_digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if month_digits.is_empty() || month_digits.len() > 2 {
        return Err(malformed(raw));
    }
    let day_part = rest[month_digits.len()..].trim_start_matches([' ', '-', '_', '.', '/']);
    if !day_part.is_empty() {
        let day: u8 = day_part.parse().map_err(|_| malformed(raw))?;
        if !(1..=31).contains(&day) {
            return Err(malformed(raw));
        }
    }
    let month: u8 = month_digits.parse().map_err(|_| malformed(raw))?;
    let quarter = Quarter::from_month(month).map_err(|_| malformed(raw))?;
    Ok(Period::quarterly(year, quarter))
}

fn malformed(raw: &str) -> Error {
    Error::InvalidInput(format!("unparseable period: '{}'", raw))
}
