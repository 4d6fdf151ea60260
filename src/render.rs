//! HTML report generation
//!
//! Renders ranked department cards and an offline chart view into a single
//! self-contained page. The per-department achievement series is embedded as
//! JSON and drawn client-side as inline SVG.

use crate::metrics::run_stats;
use crate::types::{AchievementRecord, DepartmentSummary, TrendLabel};
use crate::util::format_rate;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Analytics measurement id, embedded as given (surrounding whitespace
    /// trimmed). The tracking snippet is omitted when unset, blank, or when
    /// the id holds anything other than ASCII letters, digits and `-`.
    pub ga_id: Option<String>,
    pub generated_at: NaiveDateTime,
}

#[derive(Serialize)]
struct ChartSeries<'a> {
    department: &'a str,
    points: Vec<ChartPoint>,
}

#[derive(Serialize)]
struct ChartPoint {
    period: String,
    rate: f64,
}

/// Render the full report page.
pub fn render_html(
    summaries: &[DepartmentSummary],
    achievements: &[AchievementRecord],
    options: &ReportOptions,
) -> Result<String, serde_json::Error> {
    let data = chart_data_json(summaries, achievements)?;

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="ja">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Gross Profit Achievement Report</title>
    {analytics}
    <style>{css}</style>
</head>
<body>
    <div class="container">
        {header}
        {stats}
        {explanation}
        {tabs}
        <section id="ranking-view" class="view active">
            {cards}
        </section>
        <section id="chart-view" class="view">
            {chart}
        </section>
        {footer}
    </div>
    <script type="application/json" id="chart-data">{data}</script>
    <script>{js}</script>
</body>
</html>"#,
        analytics = analytics_snippet(options.ga_id.as_deref()),
        css = inline_css(),
        js = inline_javascript(),
        header = render_header(options.generated_at),
        stats = render_stats(summaries),
        explanation = render_explanation(),
        tabs = render_tabs(),
        cards = render_cards(summaries),
        chart = render_chart_panel(summaries),
        footer = render_footer(),
        data = data,
    ))
}

fn chart_data_json(
    summaries: &[DepartmentSummary],
    achievements: &[AchievementRecord],
) -> Result<String, serde_json::Error> {
    let series: Vec<ChartSeries<'_>> = summaries
        .iter()
        .map(|s| {
            let mut records: Vec<&AchievementRecord> = achievements
                .iter()
                .filter(|r| r.department == s.department)
                .collect();
            records.sort_by_key(|r| r.period);
            ChartSeries {
                department: &s.department,
                points: records
                    .iter()
                    .map(|r| ChartPoint {
                        period: r.period.to_string(),
                        rate: r.achievement_rate,
                    })
                    .collect(),
            }
        })
        .collect();
    // A department name containing "</script>" must not end the data block.
    Ok(serde_json::to_string(&series)?.replace("</", "<\\/"))
}

fn analytics_snippet(ga_id: Option<&str>) -> String {
    let Some(id) = ga_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return String::new();
    };
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        warn!(ga_id = id, "ignoring malformed analytics id");
        return String::new();
    }
    format!(
        r#"<script async src="https://www.googletagmanager.com/gtag/js?id={id}"></script>
    <script>
        window.dataLayer = window.dataLayer || [];
        function gtag(){{dataLayer.push(arguments);}}
        gtag('js', new Date());
        gtag('config', '{id}');
    </script>"#,
        id = id,
    )
}

fn render_header(generated_at: NaiveDateTime) -> String {
    format!(
        r#"<header>
    <h1>Gross Profit Achievement Report</h1>
    <div class="meta">Generated: {timestamp}</div>
</header>"#,
        timestamp = generated_at.format("%Y-%m-%d %H:%M"),
    )
}

fn render_stats(summaries: &[DepartmentSummary]) -> String {
    let stats = run_stats(summaries);
    format!(
        r#"<section class="stats">
    <div class="stat-card"><div class="stat-value">{departments}</div><div class="stat-label">Departments</div></div>
    <div class="stat-card"><div class="stat-value">{achieved}</div><div class="stat-label">At target (latest month)</div></div>
    <div class="stat-card"><div class="stat-value">{mean}</div><div class="stat-label">Mean latest rate</div></div>
</section>"#,
        departments = stats.departments,
        achieved = stats.achieved,
        mean = format_rate(stats.mean_rate),
    )
}

fn render_explanation() -> &'static str {
    r#"<details class="explanation">
    <summary>How the figures are calculated</summary>
    <dl>
        <dt>Achievement rate</dt><dd>Actual gross profit / target x 100 for one month.</dd>
        <dt>Latest</dt><dd>Rate in the most recent month present in the data.</dd>
        <dt>FY avg</dt><dd>Mean rate since April of the current fiscal year.</dd>
        <dt>6M avg</dt><dd>Mean rate over the six months ending at the latest month.</dd>
        <dt>Share</dt><dd>Department's share of total gross profit in the latest month.</dd>
        <dt>YoY</dt><dd>Fiscal-year-to-date profit against the same span of the previous fiscal year.</dd>
        <dt>Trend</dt><dd>Latest rate more than 5 points above (or below) the 6M avg.</dd>
    </dl>
</details>"#
}

fn render_tabs() -> &'static str {
    r#"<nav class="tabs">
    <button class="tab active" data-view="ranking-view">Ranking</button>
    <button class="tab" data-view="chart-view">Charts</button>
</nav>"#
}

fn render_cards(summaries: &[DepartmentSummary]) -> String {
    if summaries.is_empty() {
        return r#"<p class="empty">No departments to show.</p>"#.to_string();
    }
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| render_card(i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_card(rank: usize, s: &DepartmentSummary) -> String {
    let badge = match rank_badge(rank) {
        Some(class) => format!(r#"<span class="rank-badge {}">{}</span>"#, class, rank),
        None => format!(r#"<span class="rank">{}</span>"#, rank),
    };
    format!(
        r#"<div class="dept-card {class}">
    <div class="card-head">{badge}<h3>{name}</h3><span class="trend">{arrow}</span></div>
    <div class="latest">{latest}</div>
    <div class="progress"><div class="progress-bar" style="width: {width:.1}%"></div></div>
    <table class="figures">
        <tr><th>FY avg</th><td>{fy}</td><th>6M avg</th><td>{six}</td></tr>
        <tr><th>Share</th><td>{share}</td><th>YoY</th><td>{yoy}</td></tr>
    </table>
</div>"#,
        class = performance_class(s.latest_rate),
        badge = badge,
        name = html_escape(&s.department),
        arrow = trend_arrow(s.trend_label),
        latest = format_rate(s.latest_rate),
        width = progress_width(s.latest_rate),
        fy = format_rate(s.fiscal_ytd_avg_rate),
        six = format_rate(s.trailing_6mo_avg_rate),
        share = format_rate(Some(s.profit_share_pct)),
        yoy = format_rate(s.yoy_ratio_pct),
    )
}

fn render_chart_panel(summaries: &[DepartmentSummary]) -> String {
    let options: String = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!(r#"<option value="{}">{}</option>"#, i, html_escape(&s.department)))
        .collect();
    format!(
        r#"<div class="chart-controls">
    <label for="dept-select">Department</label>
    <select id="dept-select">{options}</select>
</div>
<div id="chart" class="chart"></div>"#,
        options = options,
    )
}

fn render_footer() -> &'static str {
    r#"<footer>
    <p>Rates at or above 100% meet the monthly target.</p>
</footer>"#
}

/// success >= 100, warning >= 90, danger below, info when unknown.
pub fn performance_class(rate: Option<f64>) -> &'static str {
    match rate {
        Some(r) if r >= 100.0 => "success",
        Some(r) if r >= 90.0 => "warning",
        Some(_) => "danger",
        None => "info",
    }
}

fn rank_badge(rank: usize) -> Option<&'static str> {
    match rank {
        1 => Some("gold"),
        2 => Some("silver"),
        3 => Some("bronze"),
        _ => None,
    }
}

fn progress_width(rate: Option<f64>) -> f64 {
    rate.unwrap_or(0.0).clamp(0.0, 100.0)
}

fn trend_arrow(label: Option<TrendLabel>) -> &'static str {
    match label {
        Some(TrendLabel::Improving) => "&#8599;",
        Some(TrendLabel::Declining) => "&#8600;",
        Some(TrendLabel::Flat) => "&#8594;",
        None => "",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn inline_css() -> &'static str {
    r#"
* { box-sizing: border-box; margin: 0; padding: 0; }

body {
    font-family: system-ui, -apple-system, 'Segoe UI', 'Hiragino Sans', sans-serif;
    line-height: 1.6;
    color: #111827;
    background: #f9fafb;
}

.container { max-width: 1200px; margin: 0 auto; padding: 2rem; }

header { margin-bottom: 1.5rem; padding-bottom: 1rem; border-bottom: 2px solid #e5e7eb; }
header h1 { font-size: 1.75rem; font-weight: 700; }
header .meta { color: #6b7280; font-size: 0.875rem; }

.stats { display: grid; grid-template-columns: repeat(3, 1fr); gap: 1rem; margin-bottom: 1.5rem; }
.stat-card { background: #fff; border: 1px solid #e5e7eb; border-radius: 8px; padding: 1rem; text-align: center; }
.stat-value { font-size: 1.75rem; font-weight: 700; }
.stat-label { color: #6b7280; font-size: 0.875rem; }

.explanation { background: #fff; border: 1px solid #e5e7eb; border-radius: 8px; padding: 0.75rem 1rem; margin-bottom: 1.5rem; }
.explanation summary { cursor: pointer; font-weight: 600; }
.explanation dl { display: grid; grid-template-columns: 8rem 1fr; gap: 0.25rem 1rem; margin-top: 0.75rem; font-size: 0.875rem; }
.explanation dt { font-weight: 600; }

.tabs { display: flex; gap: 0.5rem; margin-bottom: 1rem; }
.tab { border: 1px solid #d1d5db; background: #fff; padding: 0.4rem 1rem; border-radius: 6px; cursor: pointer; }
.tab.active { background: #1f2937; color: #fff; border-color: #1f2937; }

.view { display: none; }
.view.active { display: block; }

#ranking-view.active { display: grid; grid-template-columns: repeat(auto-fill, minmax(320px, 1fr)); gap: 1rem; }

.dept-card { background: #fff; border: 1px solid #e5e7eb; border-left: 6px solid #9ca3af; border-radius: 8px; padding: 1rem; }
.dept-card.success { border-left-color: #16a34a; }
.dept-card.warning { border-left-color: #d97706; }
.dept-card.danger { border-left-color: #dc2626; }
.dept-card.info { border-left-color: #2563eb; }

.card-head { display: flex; align-items: center; gap: 0.5rem; }
.card-head h3 { flex: 1; font-size: 1.1rem; }
.rank, .rank-badge { display: inline-block; min-width: 2rem; text-align: center; border-radius: 999px; padding: 0.1rem 0.5rem; font-weight: 700; background: #e5e7eb; }
.rank-badge.gold { background: #fbbf24; }
.rank-badge.silver { background: #d1d5db; }
.rank-badge.bronze { background: #d97706; color: #fff; }
.trend { font-size: 1.4rem; }

.latest { font-size: 2rem; font-weight: 700; margin: 0.25rem 0; }
.progress { height: 8px; background: #e5e7eb; border-radius: 4px; overflow: hidden; margin-bottom: 0.75rem; }
.progress-bar { height: 100%; background: #2563eb; }
.success .progress-bar { background: #16a34a; }
.warning .progress-bar { background: #d97706; }
.danger .progress-bar { background: #dc2626; }

.figures { width: 100%; font-size: 0.875rem; border-collapse: collapse; }
.figures th { text-align: left; color: #6b7280; font-weight: 500; }
.figures td { text-align: right; padding-right: 0.75rem; }

.chart-controls { margin-bottom: 1rem; display: flex; gap: 0.5rem; align-items: center; }
.chart { background: #fff; border: 1px solid #e5e7eb; border-radius: 8px; padding: 1rem; }
.chart svg { width: 100%; height: auto; }
.chart .rate-line { fill: none; stroke: #2563eb; stroke-width: 2; }
.chart .rate-point { fill: #2563eb; }
.chart .regression { fill: none; stroke: #f97316; stroke-width: 2; }
.chart .reference { stroke: #dc2626; stroke-width: 1; stroke-dasharray: 6 4; }
.chart .axis { stroke: #9ca3af; }
.chart text { font-size: 11px; fill: #4b5563; }

.empty { color: #6b7280; }

footer { margin-top: 2rem; color: #6b7280; font-size: 0.8rem; text-align: center; }
"#
}

fn inline_javascript() -> &'static str {
    r#"
(function () {
    const series = JSON.parse(document.getElementById('chart-data').textContent);
    const SVG = 'http://www.w3.org/2000/svg';

    document.querySelectorAll('.tab').forEach(function (tab) {
        tab.addEventListener('click', function () {
            document.querySelectorAll('.tab').forEach(function (t) { t.classList.remove('active'); });
            document.querySelectorAll('.view').forEach(function (v) { v.classList.remove('active'); });
            tab.classList.add('active');
            document.getElementById(tab.dataset.view).classList.add('active');
            if (tab.dataset.view === 'chart-view') { draw(); }
        });
    });

    const select = document.getElementById('dept-select');
    if (select) { select.addEventListener('change', draw); }

    function el(name, attrs, text) {
        const node = document.createElementNS(SVG, name);
        Object.keys(attrs).forEach(function (k) { node.setAttribute(k, attrs[k]); });
        if (text !== undefined) { node.textContent = text; }
        return node;
    }

    function regression(values) {
        const n = values.length;
        if (n < 2) { return null; }
        const xMean = (n - 1) / 2;
        const yMean = values.reduce(function (a, b) { return a + b; }, 0) / n;
        let num = 0, den = 0;
        values.forEach(function (y, i) {
            num += (i - xMean) * (y - yMean);
            den += (i - xMean) * (i - xMean);
        });
        if (den === 0) { return null; }
        const slope = num / den;
        return { slope: slope, intercept: yMean - slope * xMean };
    }

    function draw() {
        const chart = document.getElementById('chart');
        chart.textContent = '';
        if (!select || series.length === 0) { return; }
        const data = series[Number(select.value)] || series[0];
        const points = data.points;
        if (points.length === 0) {
            chart.textContent = 'No monthly data.';
            return;
        }

        const width = 800, height = 360, pad = { l: 50, r: 20, t: 20, b: 50 };
        const rates = points.map(function (p) { return p.rate; });
        const maxY = Math.max(110, Math.max.apply(null, rates) * 1.1);
        const minY = Math.min(0, Math.min.apply(null, rates));
        const step = points.length > 1 ? (width - pad.l - pad.r) / (points.length - 1) : 0;
        const x = function (i) { return pad.l + i * step; };
        const y = function (v) { return pad.t + (maxY - v) / (maxY - minY) * (height - pad.t - pad.b); };

        const svg = el('svg', { viewBox: '0 0 ' + width + ' ' + height, role: 'img' });
        svg.appendChild(el('line', { class: 'axis', x1: pad.l, y1: height - pad.b, x2: width - pad.r, y2: height - pad.b }));
        svg.appendChild(el('line', { class: 'axis', x1: pad.l, y1: pad.t, x2: pad.l, y2: height - pad.b }));

        svg.appendChild(el('line', { class: 'reference', x1: pad.l, y1: y(100), x2: width - pad.r, y2: y(100) }));
        svg.appendChild(el('text', { x: width - pad.r - 30, y: y(100) - 4 }, '100%'));

        const path = points.map(function (p, i) { return (i === 0 ? 'M' : 'L') + x(i) + ' ' + y(p.rate); }).join(' ');
        svg.appendChild(el('path', { class: 'rate-line', d: path }));
        points.forEach(function (p, i) {
            const dot = el('circle', { class: 'rate-point', cx: x(i), cy: y(p.rate), r: 4 });
            dot.appendChild(el('title', {}, p.period + ': ' + p.rate.toFixed(1) + '%'));
            svg.appendChild(dot);
            svg.appendChild(el('text', { x: x(i), y: height - pad.b + 18, 'text-anchor': 'middle' }, p.period));
        });

        const fit = regression(rates);
        if (fit) {
            const last = points.length - 1;
            svg.appendChild(el('line', {
                class: 'regression',
                x1: x(0), y1: y(fit.intercept),
                x2: x(last), y2: y(fit.intercept + fit.slope * last)
            }));
        }

        chart.appendChild(svg);
    }
})();
"#
}
