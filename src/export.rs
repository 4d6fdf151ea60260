// Flat metrics export for portal integration.
//
// Reshapes a run's summaries and achievement records into uniform
// (entity, metric, value, unit, period, category) rows.
use crate::error::ExportError;
use crate::types::{
    AchievementRecord, DepartmentSummary, MetricRecord, MetricValue, TrendLabel, YearMonth,
};
use crate::util::{linear_slope, mean, round_to, sample_std_dev};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_SOURCE_APP: &str = "gross_profit";
pub const DEFAULT_PERIOD_TYPE: &str = "monthly";
pub const OVERALL_ENTITY: &str = "All";

const STABILITY_WINDOW: usize = 3;
const MIN_TREND_POINTS: usize = 3;

struct MetricDef {
    name: &'static str,
    unit: &'static str,
    category: &'static str,
    kind: &'static str,
    decimals: i32,
}

const DEPARTMENT_COUNT: MetricDef = MetricDef {
    name: "Department count",
    unit: "departments",
    category: "Overall",
    kind: "actual",
    decimals: 0,
};
const ACHIEVED_COUNT: MetricDef = MetricDef {
    name: "Departments at target",
    unit: "departments",
    category: "Overall",
    kind: "actual",
    decimals: 0,
};
const AVERAGE_RATE: MetricDef = MetricDef {
    name: "Average achievement rate",
    unit: "%",
    category: "Overall",
    kind: "actual",
    decimals: 1,
};
const BAND_HIGH: MetricDef = MetricDef {
    name: "Departments >=110%",
    unit: "departments",
    category: "Rate distribution",
    kind: "actual",
    decimals: 0,
};
const BAND_ON_TARGET: MetricDef = MetricDef {
    name: "Departments 100-110%",
    unit: "departments",
    category: "Rate distribution",
    kind: "actual",
    decimals: 0,
};
const BAND_UNDER: MetricDef = MetricDef {
    name: "Departments <100%",
    unit: "departments",
    category: "Rate distribution",
    kind: "actual",
    decimals: 0,
};
const LATEST_RATE: MetricDef = MetricDef {
    name: "Latest month achievement rate",
    unit: "%",
    category: "Department performance",
    kind: "actual",
    decimals: 1,
};
const FISCAL_YTD_RATE: MetricDef = MetricDef {
    name: "FY-to-date average achievement rate",
    unit: "%",
    category: "Department performance",
    kind: "actual",
    decimals: 1,
};
const TRAILING_RATE: MetricDef = MetricDef {
    name: "Trailing 6-month average achievement rate",
    unit: "%",
    category: "Department performance",
    kind: "actual",
    decimals: 1,
};
const PROFIT_SHARE: MetricDef = MetricDef {
    name: "Profit share",
    unit: "%",
    category: "Department performance",
    kind: "actual",
    decimals: 1,
};
const YOY_RATIO: MetricDef = MetricDef {
    name: "Year-over-year ratio",
    unit: "%",
    category: "Department comparison",
    kind: "actual",
    decimals: 1,
};
const TREND_SCORE: MetricDef = MetricDef {
    name: "Trend score",
    unit: "points",
    category: "Department evaluation",
    kind: "evaluation",
    decimals: 0,
};
const RECENT_CV: MetricDef = MetricDef {
    name: "3-month coefficient of variation",
    unit: "%",
    category: "Stability",
    kind: "actual",
    decimals: 2,
};
const TREND_SLOPE: MetricDef = MetricDef {
    name: "Monthly trend slope",
    unit: "%/month",
    category: "Department trend",
    kind: "analysis",
    decimals: 2,
};
const LATEST_DEVIATION: MetricDef = MetricDef {
    name: "Latest vs mean deviation",
    unit: "%",
    category: "Department trend",
    kind: "analysis",
    decimals: 1,
};

/// Who is exporting, for what date, and how the period is labelled.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportContext {
    pub as_of: NaiveDate,
    pub period_type: String,
    pub source_app: String,
    pub computed_at: NaiveDateTime,
}

impl ExportContext {
    /// `{YYYYMMDD}_{source_app}_metrics_{period_type}.csv`
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_metrics_{}.csv",
            self.as_of.format("%Y%m%d"),
            self.source_app,
            self.period_type
        )
    }
}

#[derive(Debug, Clone)]
struct Period {
    label: String,
    kind: String,
}

struct MetricSink<'a> {
    ctx: &'a ExportContext,
    computed_at: String,
    records: Vec<MetricRecord>,
}

impl<'a> MetricSink<'a> {
    fn new(ctx: &'a ExportContext) -> Self {
        Self {
            ctx,
            computed_at: ctx.computed_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            records: Vec::new(),
        }
    }

    fn push(
        &mut self,
        entity: &str,
        def: &MetricDef,
        value: MetricValue,
        period: &Period,
        note: Option<String>,
    ) -> Result<(), ExportError> {
        if let MetricValue::Decimal(v) = value {
            if !v.is_finite() {
                return Err(ExportError::NonFiniteValue {
                    metric: def.name.to_string(),
                });
            }
        }
        self.records.push(MetricRecord {
            entity_name: entity.to_string(),
            metric_name: def.name.to_string(),
            value,
            unit: def.unit.to_string(),
            period_label: period.label.clone(),
            period_type: period.kind.clone(),
            category: def.category.to_string(),
            data_kind: def.kind.to_string(),
            computed_at: self.computed_at.clone(),
            source_app: self.ctx.source_app.clone(),
            note,
        });
        Ok(())
    }

    fn count(&mut self, entity: &str, def: &MetricDef, n: usize, period: &Period) -> Result<(), ExportError> {
        self.push(entity, def, MetricValue::Count(n), period, None)
    }

    fn decimal(&mut self, entity: &str, def: &MetricDef, v: f64, period: &Period) -> Result<(), ExportError> {
        self.push(entity, def, MetricValue::Decimal(round_to(v, def.decimals)), period, None)
    }
}

/// Derive the flat metric stream. Inputs are read only; empty inputs give
/// an empty stream.
pub fn export_metrics(
    summaries: &[DepartmentSummary],
    achievements: &[AchievementRecord],
    ctx: &ExportContext,
) -> Result<Vec<MetricRecord>, ExportError> {
    let period = period_of(achievements, ctx);
    let mut sink = MetricSink::new(ctx);

    overall_metrics(&mut sink, summaries, &period)?;
    department_metrics(&mut sink, summaries, &period)?;
    trend_metrics(&mut sink, achievements, &period)?;

    debug!(count = sink.records.len(), "metrics derived");
    Ok(sink.records)
}

fn period_of(achievements: &[AchievementRecord], ctx: &ExportContext) -> Period {
    let first = achievements.iter().map(|r| r.period).min();
    let last = achievements.iter().map(|r| r.period).max();
    let label = match (first, last) {
        (Some(first), Some(last)) => format!("{}~{}", first, last),
        _ => YearMonth::from_date(ctx.as_of).to_string(),
    };
    Period {
        label,
        kind: ctx.period_type.clone(),
    }
}

fn overall_metrics(
    sink: &mut MetricSink<'_>,
    summaries: &[DepartmentSummary],
    period: &Period,
) -> Result<(), ExportError> {
    if summaries.is_empty() {
        return Ok(());
    }
    let rates: Vec<f64> = summaries.iter().filter_map(|s| s.latest_rate).collect();

    sink.count(OVERALL_ENTITY, &DEPARTMENT_COUNT, summaries.len(), period)?;
    sink.count(
        OVERALL_ENTITY,
        &ACHIEVED_COUNT,
        rates.iter().filter(|r| **r >= 100.0).count(),
        period,
    )?;
    if let Some(avg) = mean(&rates) {
        sink.decimal(OVERALL_ENTITY, &AVERAGE_RATE, avg, period)?;
    }
    sink.count(OVERALL_ENTITY, &BAND_HIGH, rates.iter().filter(|r| **r >= 110.0).count(), period)?;
    sink.count(
        OVERALL_ENTITY,
        &BAND_ON_TARGET,
        rates.iter().filter(|r| (100.0..110.0).contains(*r)).count(),
        period,
    )?;
    sink.count(OVERALL_ENTITY, &BAND_UNDER, rates.iter().filter(|r| **r < 100.0).count(), period)?;
    Ok(())
}

fn department_metrics(
    sink: &mut MetricSink<'_>,
    summaries: &[DepartmentSummary],
    period: &Period,
) -> Result<(), ExportError> {
    for s in summaries {
        let dept = s.department.as_str();
        if let Some(v) = s.latest_rate {
            sink.decimal(dept, &LATEST_RATE, v, period)?;
        }
        if let Some(v) = s.fiscal_ytd_avg_rate {
            sink.decimal(dept, &FISCAL_YTD_RATE, v, period)?;
        }
        if let Some(v) = s.trailing_6mo_avg_rate {
            sink.decimal(dept, &TRAILING_RATE, v, period)?;
        }
        sink.decimal(dept, &PROFIT_SHARE, s.profit_share_pct, period)?;
        if let Some(v) = s.yoy_ratio_pct {
            sink.decimal(dept, &YOY_RATIO, v, period)?;
        }
        sink.push(
            dept,
            &TREND_SCORE,
            MetricValue::Count(TrendLabel::score(s.trend_label)),
            period,
            s.trend_label.map(|t| t.to_string()),
        )?;
    }
    Ok(())
}

fn trend_metrics(
    sink: &mut MetricSink<'_>,
    achievements: &[AchievementRecord],
    period: &Period,
) -> Result<(), ExportError> {
    if achievements.is_empty() {
        return Ok(());
    }

    // Stability across every department over the most recent months.
    let mut periods: Vec<YearMonth> = achievements.iter().map(|r| r.period).collect();
    periods.sort_unstable_by(|a, b| b.cmp(a));
    periods.dedup();
    if let Some(&cutoff) = periods.iter().take(STABILITY_WINDOW).last() {
        let recent: Vec<f64> = achievements
            .iter()
            .filter(|r| r.period >= cutoff)
            .map(|r| r.achievement_rate)
            .collect();
        if let (Some(sd), Some(m)) = (sample_std_dev(&recent), mean(&recent)) {
            if m != 0.0 {
                let window = Period {
                    label: format!("{} onward", cutoff),
                    kind: "3 months".to_string(),
                };
                sink.decimal(OVERALL_ENTITY, &RECENT_CV, sd / m * 100.0, &window)?;
            }
        }
    }

    let mut groups: BTreeMap<&str, Vec<&AchievementRecord>> = BTreeMap::new();
    for r in achievements {
        groups.entry(r.department.as_str()).or_default().push(r);
    }
    for (dept, mut group) in groups {
        if group.len() < MIN_TREND_POINTS {
            continue;
        }
        group.sort_by_key(|r| r.period);
        let rates: Vec<f64> = group.iter().map(|r| r.achievement_rate).collect();
        if let Some(slope) = linear_slope(&rates) {
            sink.decimal(dept, &TREND_SLOPE, slope, period)?;
        }
        if let (Some(&latest), Some(avg)) = (rates.last(), mean(&rates)) {
            sink.decimal(dept, &LATEST_DEVIATION, latest - avg, period)?;
        }
    }
    Ok(())
}

/// Metric count per category, in first-seen order.
pub fn category_counts(records: &[MetricRecord]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for r in records {
        match counts.iter_mut().find(|(c, _)| *c == r.category) {
            Some((_, n)) => *n += 1,
            None => counts.push((r.category.clone(), 1)),
        }
    }
    counts
}
