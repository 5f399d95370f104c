//! Column type inference: every column is folded through a `ColumnAccumulator`
//! that only ever moves toward `Text`, so the result does not depend on row order.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::table::RawTable;
use super::types::{Column, ColumnClass, SqlType};

/// PostgreSQL refuses `numeric` precision above this.
pub const MAX_NUMERIC_PRECISION: u32 = 1000;

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(0|[1-9][0-9]*)(?:\.([0-9]+))?$").expect("decimal pattern"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("date pattern"));
static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}[ T][0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]{1,6})?$")
        .expect("timestamp pattern")
});

#[derive(Debug, Clone, Copy)]
pub struct InferenceOptions {
    /// Added to the longest observed value of a text column.
    pub text_margin: usize,
    /// Text columns wider than this become unbounded `text`.
    pub max_varchar: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions {
            text_margin: 8,
            max_varchar: 1024,
        }
    }
}

/// A value that pushed its column to text. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeConflict {
    pub column: String,
    pub line: usize,
    pub value: String,
    pub previous: ColumnClass,
    pub reason: String,
}

/// What a single non-empty cell looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Boolean,
    Integer {
        digits: u32,
        fits_i32: bool,
        fits_i64: bool,
    },
    Decimal {
        int_digits: u32,
        scale: u32,
    },
    Date,
    Timestamp,
    Text,
    /// Looks numeric or temporal, but no literal of that type reproduces it exactly.
    Unrepresentable(&'static str),
}

impl Observed {
    fn class(&self) -> ColumnClass {
        match self {
            Observed::Boolean => ColumnClass::Boolean,
            Observed::Integer { .. } => ColumnClass::Integer,
            Observed::Decimal { .. } => ColumnClass::Decimal,
            Observed::Date => ColumnClass::Date,
            Observed::Timestamp => ColumnClass::Timestamp,
            Observed::Text | Observed::Unrepresentable(_) => ColumnClass::Text,
        }
    }
}

fn looks_numeric(v: &str) -> bool {
    v.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        && v.parse::<f64>().is_ok()
}

fn classify(v: &str) -> Observed {
    if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false") {
        return Observed::Boolean;
    }

    if let Some(caps) = DECIMAL_RE.captures(v) {
        let int_part = &caps[1];
        let frac = caps.get(2).map(|m| m.as_str());
        let all_zero = int_part == "0" && frac.map_or(true, |f| f.bytes().all(|b| b == b'0'));
        if v.starts_with('-') && all_zero {
            return Observed::Unrepresentable("negative zero");
        }
        let int_digits = if int_part == "0" { 0 } else { int_part.len() as u32 };
        return match frac {
            None => Observed::Integer {
                digits: int_part.len() as u32,
                fits_i32: v.parse::<i32>().is_ok(),
                fits_i64: v.parse::<i64>().is_ok(),
            },
            Some(f) if int_digits + f.len() as u32 > MAX_NUMERIC_PRECISION => {
                Observed::Unrepresentable("precision exceeds numeric limit")
            }
            Some(f) => Observed::Decimal {
                int_digits,
                scale: f.len() as u32,
            },
        };
    }
    if looks_numeric(v) {
        return Observed::Unrepresentable("numeric-looking value is not an exact decimal literal");
    }

    // PostgreSQL has no year 0 and folds a leap second into the next minute.
    if DATE_RE.is_match(v) {
        if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
            if d.year() < 1 {
                return Observed::Unrepresentable("year 0 is out of range for date");
            }
            return Observed::Date;
        }
    }
    if TIMESTAMP_RE.is_match(v) {
        let normalized = v.replacen('T', " ", 1);
        if let Ok(ts) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f") {
            if ts.year() < 1 {
                return Observed::Unrepresentable("year 0 is out of range for timestamp");
            }
            if ts.nanosecond() >= 1_000_000_000 {
                return Observed::Unrepresentable("leap second would not be stored verbatim");
            }
            return Observed::Timestamp;
        }
    }

    Observed::Text
}

/// Least upper bound of two classifications.
pub fn join(a: ColumnClass, b: ColumnClass) -> ColumnClass {
    use ColumnClass::*;
    match (a, b) {
        (Empty, x) | (x, Empty) => x,
        (x, y) if x == y => x,
        (Integer, Decimal) | (Decimal, Integer) => Decimal,
        (Date, Timestamp) | (Timestamp, Date) => Timestamp,
        _ => Text,
    }
}

/// Running state for one column.
#[derive(Debug, Clone)]
pub struct ColumnAccumulator {
    pub name: String,
    class: ColumnClass,
    max_chars: usize,
    int_digits: u32,
    scale: u32,
    fits_i32: bool,
    fits_i64: bool,
    nulls: usize,
    values: usize,
    conflict: Option<TypeConflict>,
}

impl ColumnAccumulator {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnAccumulator {
            name: name.into(),
            class: ColumnClass::Empty,
            max_chars: 0,
            int_digits: 0,
            scale: 0,
            fits_i32: true,
            fits_i64: true,
            nulls: 0,
            values: 0,
            conflict: None,
        }
    }

    pub fn class(&self) -> ColumnClass {
        self.class
    }

    pub fn conflict(&self) -> Option<&TypeConflict> {
        self.conflict.as_ref()
    }

    pub fn observe(&mut self, value: Option<&str>, line: usize) {
        let v = match value {
            Some(v) => v,
            None => {
                self.nulls += 1;
                return;
            }
        };
        self.values += 1;
        self.max_chars = self.max_chars.max(v.chars().count());

        let observed = classify(v);
        match &observed {
            Observed::Integer {
                digits,
                fits_i32,
                fits_i64,
            } => {
                self.int_digits = self.int_digits.max(*digits);
                self.fits_i32 &= *fits_i32;
                self.fits_i64 &= *fits_i64;
            }
            Observed::Decimal { int_digits, scale } => {
                self.int_digits = self.int_digits.max(*int_digits);
                self.scale = self.scale.max(*scale);
            }
            _ => {}
        }

        let next = join(self.class, observed.class());
        if next == ColumnClass::Text && self.class != ColumnClass::Text {
            let reason = match observed {
                Observed::Unrepresentable(why) => {
                    warn!(column = %self.name, line, value = v, why, "downgrading column to text");
                    Some(why.to_string())
                }
                _ if self.class != ColumnClass::Empty => {
                    debug!(column = %self.name, line, value = v, previous = ?self.class, "column falls back to text");
                    Some(format!("value does not fit {:?}", self.class))
                }
                _ => None,
            };
            if let Some(reason) = reason {
                self.record_conflict(TypeConflict {
                    column: self.name.clone(),
                    line,
                    value: v.to_string(),
                    previous: self.class,
                    reason,
                });
            }
        }
        self.class = next;
    }

    fn record_conflict(&mut self, conflict: TypeConflict) {
        if self.conflict.is_none() {
            self.conflict = Some(conflict);
        }
    }

    /// Combine two accumulators for the same column, e.g. from separate files.
    pub fn merge(&mut self, other: &ColumnAccumulator) {
        self.class = join(self.class, other.class);
        self.max_chars = self.max_chars.max(other.max_chars);
        self.int_digits = self.int_digits.max(other.int_digits);
        self.scale = self.scale.max(other.scale);
        self.fits_i32 &= other.fits_i32;
        self.fits_i64 &= other.fits_i64;
        self.nulls += other.nulls;
        self.values += other.values;
        if let Some(c) = &other.conflict {
            self.record_conflict(c.clone());
        }
    }

    pub fn finish(&self, opts: &InferenceOptions) -> Column {
        let text = || {
            let width = self.max_chars.max(1) + opts.text_margin;
            if width > opts.max_varchar {
                SqlType::Text
            } else {
                SqlType::Varchar(width)
            }
        };

        let (class, ty) = match self.class {
            ColumnClass::Empty => (ColumnClass::Empty, SqlType::Text),
            ColumnClass::Boolean => (ColumnClass::Boolean, SqlType::Boolean),
            ColumnClass::Integer if self.fits_i32 => (ColumnClass::Integer, SqlType::Integer),
            ColumnClass::Integer if self.fits_i64 => (ColumnClass::Integer, SqlType::BigInt),
            ColumnClass::Integer | ColumnClass::Decimal => {
                let precision = (self.int_digits + self.scale).max(1);
                if precision > MAX_NUMERIC_PRECISION {
                    warn!(column = %self.name, precision, "numeric precision too large, using text");
                    (ColumnClass::Text, text())
                } else {
                    (
                        self.class,
                        SqlType::Numeric {
                            precision,
                            scale: self.scale,
                        },
                    )
                }
            }
            ColumnClass::Date => (ColumnClass::Date, SqlType::Date),
            ColumnClass::Timestamp => (ColumnClass::Timestamp, SqlType::Timestamp),
            ColumnClass::Text => (ColumnClass::Text, text()),
        };

        Column {
            name: self.name.clone(),
            class,
            ty,
            nullable: self.nulls > 0 || self.values == 0,
        }
    }
}

/// Fold every row of `table` into one accumulator per column.
pub fn accumulate(names: &[String], table: &RawTable) -> Vec<ColumnAccumulator> {
    let mut acc: Vec<ColumnAccumulator> = names.iter().map(ColumnAccumulator::new).collect();
    for (row, line) in table.rows.iter().zip(&table.lines) {
        for (i, cell) in row.iter().enumerate() {
            acc[i].observe(cell.as_deref(), *line);
        }
    }
    acc
}

/// Infer the column list for `table`.
pub fn derive_types(table: &RawTable, opts: &InferenceOptions) -> Vec<Column> {
    accumulate(&table.column_names(), table)
        .iter()
        .map(|a| a.finish(opts))
        .collect()
}
