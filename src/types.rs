use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;
use tabled::Tabled;

use crate::util::{format_rate, parse_lenient_number, parse_plain_number, THOUSANDS_SEPARATORS};

/// A calendar month, the canonical key of a period column.
///
/// Ordering is by `(year, month)`, so sorting periods is plain `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Months since year 0; differences of two indices are month distances.
    pub fn index(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn minus_months(self, months: u32) -> Self {
        Self::from_index(self.index() - months as i64)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single cell of a loaded table.
///
/// CSV cells that read as a plain number become `Number`; anything else
/// non-blank (including `1,234`) stays `Text`, exactly as written, and is
/// coerced on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn from_text(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Cell::Empty;
        }
        match parse_plain_number(raw) {
            Some(n) => Cell::Number(n),
            None => Cell::Text(raw.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// The cell as a join key. Integral numbers print without a fraction so
    /// a numeric department code matches its text form in the other file.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
        }
    }

    /// Numeric value with thousands separators stripped from text cells.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_lenient_number(s, THOUSANDS_SEPARATORS),
        }
    }
}

/// Semantic role of a column header, decided once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnHeader {
    Label(String),
    Period(YearMonth),
}

impl ColumnHeader {
    pub fn period(&self) -> Option<YearMonth> {
        match self {
            ColumnHeader::Period(p) => Some(*p),
            ColumnHeader::Label(_) => None,
        }
    }
}

impl fmt::Display for ColumnHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnHeader::Label(s) => f.write_str(s),
            ColumnHeader::Period(p) => write!(f, "{}", p),
        }
    }
}

/// A loaded spreadsheet: classified headers plus rectangular rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    headers: Vec<ColumnHeader>,
    rows: Vec<Vec<Cell>>,
}

impl RawTable {
    /// Rows are padded with empty cells (or truncated) to the header width.
    pub fn new(headers: Vec<ColumnHeader>, rows: Vec<Vec<Cell>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[ColumnHeader] {
        &self.headers
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub department: String,
    pub target_value: Option<f64>,
}

/// One department x month where both a target and an actual exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementRecord {
    pub department: String,
    pub period: YearMonth,
    pub actual_value: f64,
    pub target_value: f64,
    pub achievement_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Improving,
    Declining,
    Flat,
}

impl TrendLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendLabel::Improving => "improving",
            TrendLabel::Declining => "declining",
            TrendLabel::Flat => "flat",
        }
    }

    /// Export score: improving 3, declining 1, flat or unknown 2.
    pub fn score(label: Option<Self>) -> usize {
        match label {
            Some(TrendLabel::Improving) => 3,
            Some(TrendLabel::Declining) => 1,
            Some(TrendLabel::Flat) | None => 2,
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentSummary {
    pub department: String,
    pub latest_rate: Option<f64>,
    pub fiscal_ytd_avg_rate: Option<f64>,
    pub trailing_6mo_avg_rate: Option<f64>,
    pub trend_label: Option<TrendLabel>,
    pub profit_share_pct: f64,
    pub yoy_ratio_pct: Option<f64>,
}

/// Aggregate statistics over the latest-month rates of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RunStats {
    pub departments: usize,
    pub achieved: usize,
    pub mean_rate: Option<f64>,
    pub max_rate: Option<f64>,
    pub min_rate: Option<f64>,
}

#[derive(Debug, Tabled, Clone)]
pub struct SummaryRow {
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[tabled(rename = "Department")]
    pub department: String,
    #[tabled(rename = "Latest")]
    pub latest_rate: String,
    #[tabled(rename = "FY avg")]
    pub fiscal_ytd_avg_rate: String,
    #[tabled(rename = "6M avg")]
    pub trailing_6mo_avg_rate: String,
    #[tabled(rename = "Share")]
    pub profit_share_pct: String,
    #[tabled(rename = "YoY")]
    pub yoy_ratio_pct: String,
    #[tabled(rename = "Trend")]
    pub trend: String,
}

impl SummaryRow {
    pub fn from_summary(rank: usize, s: &DepartmentSummary) -> Self {
        Self {
            rank,
            department: s.department.clone(),
            latest_rate: format_rate(s.latest_rate),
            fiscal_ytd_avg_rate: format_rate(s.fiscal_ytd_avg_rate),
            trailing_6mo_avg_rate: format_rate(s.trailing_6mo_avg_rate),
            profit_share_pct: format_rate(Some(s.profit_share_pct)),
            yoy_ratio_pct: format_rate(s.yoy_ratio_pct),
            trend: s.trend_label.map(|t| t.to_string()).unwrap_or_default(),
        }
    }
}

/// Metric value cell: counts print as integers, everything else as decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(usize),
    Decimal(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{}", n),
            MetricValue::Decimal(v) => write!(f, "{}", v),
        }
    }
}

/// One row of the flat metrics export.
#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct MetricRecord {
    #[tabled(rename = "Entity")]
    pub entity_name: String,
    #[tabled(rename = "Metric")]
    pub metric_name: String,
    #[tabled(rename = "Value")]
    pub value: MetricValue,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Period")]
    pub period_label: String,
    #[tabled(skip)]
    pub period_type: String,
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(skip)]
    pub data_kind: String,
    #[tabled(skip)]
    pub computed_at: String,
    #[tabled(skip)]
    pub source_app: String,
    #[tabled(rename = "Note", display_with = "display_note")]
    pub note: Option<String>,
}

fn display_note(note: &Option<String>) -> String {
    note.clone().unwrap_or_default()
}
