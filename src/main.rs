// Entry point and high-level CLI flow.
//
// Every subcommand runs the same pipeline once:
// - load the target and actual tables,
// - compute achievement records and department summaries,
// - print the summary preview.
// `report` then writes the HTML page and `export` the metrics CSV.
mod config;
mod error;
mod export;
mod loader;
mod logging;
mod metrics;
mod output;
mod render;
mod resolver;
mod types;
mod util;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use config::{Cli, Commands, InputArgs};
use export::ExportContext;
use metrics::PipelineOutput;
use render::ReportOptions;
use std::path::Path;
use tracing::{debug, warn};
use types::{RawTable, SummaryRow};

const PREVIEW_ROWS: usize = 20;
const METRIC_PREVIEW_ROWS: usize = 10;

/// Load one input file and print a short description of what was read.
///
/// A file that exists but cannot be parsed is reported as an error here so
/// the run stops before the engine sees an empty table.
fn handle_load(label: &str, path: &Path) -> Result<RawTable> {
    let loaded = loader::load_table(path)
        .with_context(|| format!("failed to read {} file {}", label, path.display()))?;
    let Some((table, report)) = loaded else {
        bail!(
            "could not read {} file {}; expected a CSV or Excel file with a header row",
            label,
            path.display()
        );
    };
    println!(
        "Loaded {} file {} ({} rows, {} label / {} period columns)",
        label,
        path.display(),
        util::format_int(report.total_rows),
        util::format_int(report.label_columns),
        util::format_int(report.period_columns)
    );
    if report.blank_rows > 0 {
        println!("Note: {} blank rows skipped.", util::format_int(report.blank_rows));
    }
    if !report.dropped_columns.is_empty() {
        println!(
            "Note: {} unusable header(s) dropped.",
            util::format_int(report.dropped_columns.len())
        );
    }
    Ok(table)
}

/// Load both files and run the metrics engine.
fn handle_process(input: &InputArgs, today: NaiveDate) -> Result<PipelineOutput> {
    let target = handle_load("target", &input.target)?;
    let actual = handle_load("actual", &input.actual)?;

    let output = match metrics::process(&target, &actual, today) {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "pipeline stopped");
            bail!("processing failed: {}. Check the layout of both files.", e);
        }
    };
    println!(
        "Processed {} departments with targets and actuals.",
        util::format_int(output.processed_departments)
    );
    if !output.skipped.is_empty() {
        println!(
            "Note: {} rows or cells skipped (rerun with -v for details).",
            util::format_int(output.skipped.len())
        );
        for event in &output.skipped {
            debug!(
                department = event.department.as_deref().unwrap_or("-"),
                period = %event.period.map(|p| p.to_string()).unwrap_or_default(),
                reason = %event.reason,
                "skipped"
            );
        }
    }
    Ok(output)
}

fn print_summary(output: &PipelineOutput) {
    let rows: Vec<SummaryRow> = output
        .summaries
        .iter()
        .enumerate()
        .map(|(i, s)| SummaryRow::from_summary(i + 1, s))
        .collect();
    let note = output
        .latest_period
        .map(|p| format!("Latest month {}", p));
    output::preview_table("Department achievement summary", note.as_deref(), &rows, PREVIEW_ROWS);
    println!("{}\n", metrics::describe(output));
}

fn handle_summary_json(output: &PipelineOutput, path: &Path) -> Result<()> {
    let summary = serde_json::json!({
        "latest_period": output.latest_period,
        "total_recent_profit": output.total_recent_profit,
        "stats": output.stats(),
        "summaries": output.summaries,
    });
    output::write_json(path, &summary)?;
    println!("Summary written to {}", path.display());
    Ok(())
}

fn handle_report(output: &PipelineOutput, path: &Path, ga_id: Option<String>) -> Result<()> {
    let options = ReportOptions {
        ga_id,
        generated_at: Local::now().naive_local(),
    };
    let html = render::render_html(&output.summaries, &output.achievements, &options)?;
    output::write_html(path, &html)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn handle_export(output: &PipelineOutput, out_dir: &Path, ctx: &ExportContext) -> Result<()> {
    let records = export::export_metrics(&output.summaries, &output.achievements, ctx)?;
    if records.is_empty() {
        println!("No metrics to export.");
        return Ok(());
    }

    let path = out_dir.join(ctx.filename());
    output::write_csv(&path, &records)
        .with_context(|| format!("failed to write {}", path.display()))?;

    output::preview_table(
        "Exported metrics",
        Some(&format!("{} metrics", util::format_int(records.len()))),
        &records,
        METRIC_PREVIEW_ROWS,
    );
    println!("Metrics by category:");
    for (category, count) in export::category_counts(&records) {
        println!("  {}: {}", category, count);
    }
    println!("\n(Full table exported to {})", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let now = Local::now().naive_local();
    let today = cli.command.input().today.unwrap_or(now.date());
    let output = handle_process(cli.command.input(), today)?;
    print_summary(&output);

    match cli.command {
        Commands::Summary { json, .. } => {
            if let Some(path) = json {
                handle_summary_json(&output, &path)?;
            }
        }
        Commands::Report { output: path, ga_id, .. } => {
            handle_report(&output, &path, ga_id)?;
        }
        Commands::Export {
            out_dir,
            period_type,
            source_app,
            as_of,
            ..
        } => {
            let ctx = ExportContext {
                as_of: as_of.unwrap_or(now.date()),
                period_type,
                source_app,
                computed_at: now,
            };
            handle_export(&output, &out_dir, &ctx)?;
        }
    }
    Ok(())
}
