// Parsing and statistics helpers.
//
// All the "dirty" spreadsheet handling (formatted numbers, date-ish headers)
// lives here so the engine can work with typed values only.
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

use crate::types::YearMonth;

/// ASCII and full-width commas, both common in exported figures.
pub const THOUSANDS_SEPARATORS: &[char] = &[',', '，'];

/// Parse text that is already a plain number (no separators).
///
/// Exponent forms such as `1.2E+03` are numbers; `inf` and `NaN` parse but
/// are not finite, so they never turn into values.
pub fn parse_plain_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a number after stripping the given thousands separators.
///
/// Returns `None` for blanks and anything that still does not parse.
pub fn parse_lenient_number(s: &str, separators: &[char]) -> Option<f64> {
    let stripped: String = s.trim().chars().filter(|c| !separators.contains(c)).collect();
    parse_plain_number(&stripped)
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%Y年%m月%d日",
    "%m/%d/%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

// Month-only forms get a synthetic day appended before parsing.
const MONTH_FORMATS: &[&str] = &["%Y-%m", "%Y/%m", "%Y.%m", "%Y年%m月", "%b %Y", "%B %Y", "%b-%Y"];

// Short numeric headers like `1.5` would otherwise read as year 1.
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2999;

/// Interpret a header as a calendar month.
pub fn parse_header_period(s: &str) -> Option<YearMonth> {
    parse_header_date(s)
        .filter(|d| PLAUSIBLE_YEARS.contains(&d.year()))
        .map(YearMonth::from_date)
}

pub fn parse_header_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    let with_day = format!("{} 1", s);
    for fmt in MONTH_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&with_day, &format!("{} %d", fmt)) {
            return Some(d);
        }
    }
    None
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    Some(v.iter().sum::<f64>() / v.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); needs two values.
pub fn sample_std_dev(v: &[f64]) -> Option<f64> {
    if v.len() < 2 {
        return None;
    }
    let m = mean(v)?;
    let ss: f64 = v.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (v.len() - 1) as f64).sqrt())
}

/// Least-squares slope of `y` against `0, 1, 2, ...`.
pub fn linear_slope(y: &[f64]) -> Option<f64> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(y)?;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, yi) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (yi - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

pub fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

/// `12.3%`, or `---` when the rate is missing.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) if r.is_finite() => format!("{:.1}%", r),
        _ => "---".to_string(),
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}
