// Achievement-rate engine.
//
// Joins target and actual tables by department, derives one achievement
// record per department and month, then folds each department's records
// into a summary anchored on the single latest month of the whole run.
use crate::error::{PipelineError, SkipReason};
use crate::resolver::{
    first_row_for, resolve_actual_columns, resolve_target_columns, target_records, ActualColumns,
    TargetColumns,
};
use crate::types::{
    AchievementRecord, Cell, DepartmentSummary, RawTable, RunStats, TrendLabel, YearMonth,
};
use crate::util::{format_int, format_rate, mean, parse_lenient_number, THOUSANDS_SEPARATORS};
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const FISCAL_YEAR_START_MONTH: u32 = 4;
pub const TRAILING_WINDOW_MONTHS: u32 = 6;
/// Points of difference between latest and trailing average that count as a trend.
pub const TREND_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SkipEvent {
    pub department: Option<String>,
    pub period: Option<YearMonth>,
    pub reason: SkipReason,
}

/// Everything a run produces, handed explicitly to the renderer and exporter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineOutput {
    /// Descending by latest rate, departments without one last.
    pub summaries: Vec<DepartmentSummary>,
    pub achievements: Vec<AchievementRecord>,
    pub latest_period: Option<YearMonth>,
    pub total_recent_profit: f64,
    pub processed_departments: usize,
    pub skipped: Vec<SkipEvent>,
}

impl PipelineOutput {
    pub fn stats(&self) -> RunStats {
        run_stats(&self.summaries)
    }
}

/// Month boundaries used to aggregate one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub latest: YearMonth,
    pub fiscal_start: YearMonth,
    pub trailing_start: YearMonth,
    pub prior_fiscal_start: YearMonth,
    /// Same month one year before `latest`; closes the prior-year window.
    pub prior_end: YearMonth,
}

impl Windows {
    pub fn new(latest: YearMonth, today: NaiveDate) -> Self {
        let fiscal_start = fiscal_year_start(today);
        Self {
            latest,
            fiscal_start,
            trailing_start: latest.minus_months(TRAILING_WINDOW_MONTHS - 1),
            prior_fiscal_start: fiscal_start.minus_months(12),
            prior_end: latest.minus_months(12),
        }
    }
}

/// April of the current fiscal year as seen from `today`.
pub fn fiscal_year_start(today: NaiveDate) -> YearMonth {
    let year = if today.month() >= FISCAL_YEAR_START_MONTH {
        today.year()
    } else {
        today.year() - 1
    };
    YearMonth::from_date(NaiveDate::from_ymd_opt(year, FISCAL_YEAR_START_MONTH, 1).unwrap_or(today))
}

pub fn trend_label(latest_rate: Option<f64>, trailing_avg: Option<f64>) -> Option<TrendLabel> {
    let diff = latest_rate? - trailing_avg?;
    Some(if diff > TREND_THRESHOLD {
        TrendLabel::Improving
    } else if diff < -TREND_THRESHOLD {
        TrendLabel::Declining
    } else {
        TrendLabel::Flat
    })
}

/// Run the whole engine over a target table and an actual table.
pub fn process(
    target: &RawTable,
    actual: &RawTable,
    today: NaiveDate,
) -> Result<PipelineOutput, PipelineError> {
    debug!(columns = ?target.headers(), rows = target.row_count(), "target table");
    debug!(columns = ?actual.headers(), rows = actual.row_count(), "actual table");

    let target_cols = resolve_target_columns(target)?;
    let actual_cols = resolve_actual_columns(actual)?;

    let mut skipped: Vec<SkipEvent> = actual_cols
        .duplicates
        .iter()
        .map(|(_, reason)| SkipEvent {
            department: None,
            period: None,
            reason: reason.clone(),
        })
        .collect();
    let (achievements, processed_departments) =
        join_achievements(target, target_cols, actual, &actual_cols, &mut skipped);
    info!(departments = processed_departments, records = achievements.len(), "joined targets to actuals");

    let latest = achievements
        .iter()
        .map(|r| r.period)
        .max()
        .ok_or(PipelineError::NoAchievementData)?;
    let total_recent_profit: f64 = achievements
        .iter()
        .filter(|r| r.period == latest)
        .map(|r| r.actual_value)
        .sum();
    info!(
        latest = %latest,
        total = %format_int(total_recent_profit.round() as i64),
        "latest month profit"
    );

    let windows = Windows::new(latest, today);
    let summaries = summarize(&achievements, windows, total_recent_profit);

    let stats = run_stats(&summaries);
    info!(
        departments = stats.departments,
        achieved = stats.achieved,
        mean = %format_rate(stats.mean_rate),
        max = %format_rate(stats.max_rate),
        min = %format_rate(stats.min_rate),
        "summary complete"
    );

    Ok(PipelineOutput {
        summaries,
        achievements,
        latest_period: Some(latest),
        total_recent_profit,
        processed_departments,
        skipped,
    })
}

fn actual_value(cell: &Cell) -> Result<f64, SkipReason> {
    match cell {
        Cell::Empty => Err(SkipReason::MissingActual),
        Cell::Number(n) => Ok(*n),
        Cell::Text(s) => parse_lenient_number(s, THOUSANDS_SEPARATORS)
            .ok_or_else(|| SkipReason::NonNumericActual(s.clone())),
    }
}

fn join_achievements(
    target: &RawTable,
    target_cols: TargetColumns,
    actual: &RawTable,
    actual_cols: &ActualColumns,
    skipped: &mut Vec<SkipEvent>,
) -> (Vec<AchievementRecord>, usize) {
    let mut records = Vec::new();
    let mut processed = 0usize;

    for result in target_records(target, target_cols) {
        let rec = match result {
            Ok(r) => r,
            Err(reason) => {
                skipped.push(SkipEvent { department: None, period: None, reason });
                continue;
            }
        };
        let skip = |reason| SkipEvent {
            department: Some(rec.department.clone()),
            period: None,
            reason,
        };

        let Some(row) = first_row_for(actual, actual_cols.department, &rec.department) else {
            warn!(department = %rec.department, "no actual data for department");
            skipped.push(skip(SkipReason::NoActualRows));
            continue;
        };
        let target_value = match rec.target_value {
            Some(t) if t > 0.0 => t,
            Some(t) => {
                skipped.push(skip(SkipReason::NonPositiveTarget(t)));
                continue;
            }
            None => {
                skipped.push(skip(SkipReason::MissingTarget));
                continue;
            }
        };
        processed += 1;

        for col in &actual_cols.periods {
            match actual_value(actual.cell(row, col.index)) {
                Ok(actual_value) => records.push(AchievementRecord {
                    department: rec.department.clone(),
                    period: col.period,
                    actual_value,
                    target_value,
                    achievement_rate: actual_value / target_value * 100.0,
                }),
                Err(reason) => skipped.push(SkipEvent {
                    department: Some(rec.department.clone()),
                    period: Some(col.period),
                    reason,
                }),
            }
        }
    }
    (records, processed)
}

fn summarize(
    achievements: &[AchievementRecord],
    windows: Windows,
    total_recent_profit: f64,
) -> Vec<DepartmentSummary> {
    let mut groups: BTreeMap<&str, Vec<&AchievementRecord>> = BTreeMap::new();
    for r in achievements {
        groups.entry(r.department.as_str()).or_default().push(r);
    }

    let mut summaries: Vec<DepartmentSummary> = groups
        .into_iter()
        .map(|(department, mut group)| {
            group.sort_by_key(|r| r.period);
            let summary = summarize_department(department, &group, windows, total_recent_profit);
            debug!(
                department,
                latest = %format_rate(summary.latest_rate),
                share = %format_rate(Some(summary.profit_share_pct)),
                "department summary"
            );
            summary
        })
        .collect();

    summaries.sort_by(|a, b| match (a.latest_rate, b.latest_rate) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    summaries
}

/// Fold one department's records (ascending by period) into a summary.
pub fn summarize_department(
    department: &str,
    group: &[&AchievementRecord],
    windows: Windows,
    total_recent_profit: f64,
) -> DepartmentSummary {
    let at_latest = group.iter().find(|r| r.period == windows.latest);
    let latest_rate = at_latest.map(|r| r.achievement_rate);
    let latest_actual = at_latest.map_or(0.0, |r| r.actual_value);
    let profit_share_pct = if total_recent_profit > 0.0 {
        latest_actual / total_recent_profit * 100.0
    } else {
        0.0
    };

    let in_fiscal_year: Vec<&&AchievementRecord> = group
        .iter()
        .filter(|r| r.period >= windows.fiscal_start)
        .collect();
    let fy_rates: Vec<f64> = in_fiscal_year.iter().map(|r| r.achievement_rate).collect();

    let trailing_rates: Vec<f64> = group
        .iter()
        .filter(|r| r.period >= windows.trailing_start && r.period <= windows.latest)
        .map(|r| r.achievement_rate)
        .collect();
    let trailing_6mo_avg_rate = mean(&trailing_rates);

    let current_fy_actual: f64 = in_fiscal_year.iter().map(|r| r.actual_value).sum();
    let prior_fy_actual: f64 = group
        .iter()
        .filter(|r| r.period >= windows.prior_fiscal_start && r.period <= windows.prior_end)
        .map(|r| r.actual_value)
        .sum();
    let yoy_ratio_pct =
        (prior_fy_actual > 0.0).then(|| current_fy_actual / prior_fy_actual * 100.0);

    DepartmentSummary {
        department: department.to_string(),
        latest_rate,
        fiscal_ytd_avg_rate: mean(&fy_rates),
        trailing_6mo_avg_rate,
        trend_label: trend_label(latest_rate, trailing_6mo_avg_rate),
        profit_share_pct,
        yoy_ratio_pct,
    }
}

pub fn run_stats(summaries: &[DepartmentSummary]) -> RunStats {
    let rates: Vec<f64> = summaries.iter().filter_map(|s| s.latest_rate).collect();
    RunStats {
        departments: summaries.len(),
        achieved: rates.iter().filter(|r| **r >= 100.0).count(),
        mean_rate: mean(&rates),
        max_rate: rates.iter().copied().reduce(f64::max),
        min_rate: rates.iter().copied().reduce(f64::min),
    }
}

/// One-line run description for the console.
pub fn describe(output: &PipelineOutput) -> String {
    let stats = output.stats();
    format!(
        "{} departments ({} at target), {} records, latest month {}, mean rate {}",
        format_int(stats.departments),
        format_int(stats.achieved),
        format_int(output.achievements.len()),
        output
            .latest_period
            .map(|p| p.to_string())
            .unwrap_or_else(|| "---".to_string()),
        format_rate(stats.mean_rate),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::classify_header;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|h| classify_header(h)).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| Cell::from_text(c)).collect())
                .collect(),
        )
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scenario() -> (RawTable, RawTable) {
        let target = table(&["診療科名", "目標粗利"], &[&["A", "100"], &["B", "200"]]);
        let actual = table(
            &["診療科名", "2024-01-01", "2024-02-01"],
            &[&["A", "50", "120"], &["B", "200", "180"]],
        );
        (target, actual)
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn two_department_scenario() {
        let (target, actual) = scenario();
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        let rates: Vec<(&str, YearMonth, f64)> = out
            .achievements
            .iter()
            .map(|r| (r.department.as_str(), r.period, r.achievement_rate))
            .collect();
        assert_eq!(
            rates,
            vec![
                ("A", ym(2024, 1), 50.0),
                ("A", ym(2024, 2), 120.0),
                ("B", ym(2024, 1), 100.0),
                ("B", ym(2024, 2), 90.0),
            ]
        );

        assert_eq!(out.latest_period, Some(ym(2024, 2)));
        let names: Vec<&str> = out.summaries.iter().map(|s| s.department.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        let a = &out.summaries[0];
        let b = &out.summaries[1];
        assert_eq!(a.latest_rate, Some(120.0));
        assert_eq!(b.latest_rate, Some(90.0));
        assert!(close(a.fiscal_ytd_avg_rate, 85.0));
        assert!(close(a.trailing_6mo_avg_rate, 85.0));
        assert_eq!(a.trend_label, Some(TrendLabel::Improving));
        assert_eq!(b.trend_label, Some(TrendLabel::Flat));
        assert!((a.profit_share_pct - 40.0).abs() < 1e-9);
        assert!((b.profit_share_pct - 60.0).abs() < 1e-9);
        assert_eq!(a.yoy_ratio_pct, None);
        assert_eq!(out.processed_departments, 2);
    }

    #[test]
    fn profit_shares_sum_to_one_hundred() {
        let (target, actual) = scenario();
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();
        let total: f64 = out.summaries.iter().map(|s| s.profit_share_pct).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_actual_table_signals_no_data() {
        let (target, _) = scenario();
        let actual = table(&["dept", "2024-01", "2024-02"], &[]);
        assert_eq!(
            process(&target, &actual, date(2024, 3, 1)),
            Err(PipelineError::NoAchievementData)
        );
    }

    #[test]
    fn actual_table_without_periods_is_rejected() {
        let (target, _) = scenario();
        let actual = table(&["dept", "total"], &[&["A", "10"]]);
        assert_eq!(
            process(&target, &actual, date(2024, 3, 1)),
            Err(PipelineError::MissingPeriodColumns)
        );
    }

    #[test]
    fn zero_or_missing_target_excludes_department() {
        let target = table(&["dept", "target"], &[&["A", "0"], &["B", ""], &["C", "100"]]);
        let actual = table(
            &["dept", "2024-01"],
            &[&["A", "10"], &["B", "10"], &["C", "10"]],
        );
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        assert!(out.achievements.iter().all(|r| r.department == "C"));
        assert_eq!(out.summaries.len(), 1);
        let reasons: Vec<&SkipReason> = out.skipped.iter().map(|e| &e.reason).collect();
        assert!(reasons.contains(&&SkipReason::NonPositiveTarget(0.0)));
        assert!(reasons.contains(&&SkipReason::MissingTarget));
    }

    #[test]
    fn non_numeric_actual_skips_only_that_month() {
        let target = table(&["dept", "target"], &[&["A", "1,000"]]);
        let actual = table(
            &["dept", "2024-01", "2024-02", "2024-03"],
            &[&["A", "500", "N/A", "1,500"]],
        );
        let out = process(&target, &actual, date(2024, 4, 1)).unwrap();

        let periods: Vec<YearMonth> = out.achievements.iter().map(|r| r.period).collect();
        assert_eq!(periods, vec![ym(2024, 1), ym(2024, 3)]);
        assert_eq!(out.achievements[1].achievement_rate, 150.0);
        assert!(out.skipped.contains(&SkipEvent {
            department: Some("A".into()),
            period: Some(ym(2024, 2)),
            reason: SkipReason::NonNumericActual("N/A".into()),
        }));
    }

    #[test]
    fn exponent_notation_actual_is_kept() {
        let target = table(&["dept", "target"], &[&["A", "1000"]]);
        let actual = table(&["dept", "2024-01", "2024-02"], &[&["A", "1.2E+03", "900"]]);
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        let rates: Vec<(YearMonth, f64)> = out
            .achievements
            .iter()
            .map(|r| (r.period, r.achievement_rate))
            .collect();
        assert_eq!(rates, vec![(ym(2024, 1), 120.0), (ym(2024, 2), 90.0)]);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn departments_join_on_the_name_as_written() {
        let target = table(&["dept", "target"], &[&[" Surgery", "100"], &["ENT", "100"]]);
        let actual = table(
            &["dept", "2024-01"],
            &[&["Surgery", "90"], &[" Surgery", "110"], &["ENT ", "80"]],
        );
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        assert_eq!(out.summaries.len(), 1);
        assert_eq!(out.summaries[0].department, " Surgery");
        assert_eq!(out.summaries[0].latest_rate, Some(110.0));
        assert!(out.skipped.iter().any(|e| {
            e.department.as_deref() == Some("ENT") && e.reason == SkipReason::NoActualRows
        }));
    }

    #[test]
    fn unmatched_department_is_skipped_not_fatal() {
        let target = table(&["dept", "target"], &[&["A", "100"], &["Z", "100"]]);
        let actual = table(&["dept", "2024-01"], &[&["A", "100"]]);
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        assert_eq!(out.summaries.len(), 1);
        assert!(out.skipped.iter().any(|e| {
            e.department.as_deref() == Some("Z") && e.reason == SkipReason::NoActualRows
        }));
    }

    #[test]
    fn first_actual_row_wins() {
        let target = table(&["dept", "target"], &[&["A", "100"]]);
        let actual = table(&["dept", "2024-01"], &[&["A", "70"], &["A", "90"]]);
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();
        assert_eq!(out.achievements.len(), 1);
        assert_eq!(out.achievements[0].actual_value, 70.0);
    }

    #[test]
    fn missing_latest_rate_sorts_last() {
        let target = table(&["dept", "target"], &[&["Early", "100"], &["Low", "100"], &["High", "100"]]);
        let actual = table(
            &["dept", "2024-01", "2024-02"],
            &[&["Early", "300", ""], &["Low", "50", "60"], &["High", "80", "110"]],
        );
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();

        let names: Vec<&str> = out.summaries.iter().map(|s| s.department.as_str()).collect();
        assert_eq!(names, vec!["High", "Low", "Early"]);
        let early = &out.summaries[2];
        assert_eq!(early.latest_rate, None);
        assert_eq!(early.profit_share_pct, 0.0);
        assert_eq!(early.trend_label, None);
        assert!(close(early.trailing_6mo_avg_rate, 300.0));
    }

    #[test]
    fn year_over_year_uses_matching_prior_window() {
        let mut headers = vec!["dept".to_string()];
        let mut values = vec!["A".to_string()];
        for m in 4..=12 {
            headers.push(format!("2023-{:02}", m));
            values.push("100".into());
        }
        for m in 1..=5 {
            headers.push(format!("2024-{:02}", m));
            values.push(if m >= 4 { "120".into() } else { "100".into() });
        }
        let h: Vec<&str> = headers.iter().map(String::as_str).collect();
        let v: Vec<&str> = values.iter().map(String::as_str).collect();
        let target = table(&["dept", "target"], &[&["A", "100"]]);
        let actual = table(&h, &[&v]);

        let out = process(&target, &actual, date(2024, 6, 15)).unwrap();
        let a = &out.summaries[0];
        // current FY: Apr+May 2024 = 240; prior window: Apr+May 2023 = 200
        assert!(close(a.yoy_ratio_pct, 120.0));
        assert!(close(a.fiscal_ytd_avg_rate, 120.0));
        // trailing six months: Dec 2023 .. May 2024
        assert!(close(a.trailing_6mo_avg_rate, (100.0 * 4.0 + 120.0 * 2.0) / 6.0));
    }

    #[test]
    fn fiscal_year_boundaries() {
        assert_eq!(fiscal_year_start(date(2024, 3, 31)), ym(2023, 4));
        assert_eq!(fiscal_year_start(date(2024, 4, 1)), ym(2024, 4));
        assert_eq!(fiscal_year_start(date(2024, 1, 1)), ym(2023, 4));

        let w = Windows::new(ym(2024, 2), date(2024, 3, 1));
        assert_eq!(w.trailing_start, ym(2023, 9));
        assert_eq!(w.prior_fiscal_start, ym(2022, 4));
        assert_eq!(w.prior_end, ym(2023, 2));
    }

    #[test]
    fn trend_labels() {
        assert_eq!(trend_label(Some(101.0), Some(95.0)), Some(TrendLabel::Improving));
        assert_eq!(trend_label(Some(90.0), Some(95.0)), Some(TrendLabel::Flat));
        assert_eq!(trend_label(Some(89.0), Some(95.0)), Some(TrendLabel::Declining));
        assert_eq!(trend_label(None, Some(95.0)), None);
        assert_eq!(trend_label(Some(95.0), None), None);
    }

    #[test]
    fn processing_is_deterministic() {
        let (target, actual) = scenario();
        let first = process(&target, &actual, date(2024, 3, 1)).unwrap();
        let second = process(&target, &actual, date(2024, 3, 1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn run_statistics() {
        let (target, actual) = scenario();
        let out = process(&target, &actual, date(2024, 3, 1)).unwrap();
        let stats = out.stats();
        assert_eq!(stats.departments, 2);
        assert_eq!(stats.achieved, 1);
        assert_eq!(stats.mean_rate, Some(105.0));
        assert_eq!(stats.max_rate, Some(120.0));
        assert_eq!(stats.min_rate, Some(90.0));
        assert!(describe(&out).contains("latest month 2024-02"));
    }
}
