// Command-line and environment configuration.
use crate::export::{DEFAULT_PERIOD_TYPE, DEFAULT_SOURCE_APP};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "profit_report")]
#[command(author, version, about = "Gross profit achievement-rate reports", long_about = None)]
pub struct Cli {
    /// Verbose output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute department summaries and print them
    Summary {
        #[command(flatten)]
        input: InputArgs,

        /// Also write summaries and run statistics as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Write the interactive HTML report
    Report {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path
        #[arg(short, long, default_value = "index.html")]
        output: PathBuf,

        /// Analytics measurement id embedded in the page
        #[arg(long, env = "PROFIT_REPORT_GA_ID")]
        ga_id: Option<String>,
    },

    /// Write the flat metrics CSV for portal import
    Export {
        #[command(flatten)]
        input: InputArgs,

        /// Directory the CSV is written into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Period type recorded on each metric
        #[arg(long, default_value = DEFAULT_PERIOD_TYPE)]
        period_type: String,

        /// Source application recorded on each metric
        #[arg(long, default_value = DEFAULT_SOURCE_APP, env = "PROFIT_REPORT_SOURCE_APP")]
        source_app: String,

        /// Export date used in the file name (YYYY-MM-DD, default today)
        #[arg(long, value_parser = parse_date)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Target file (CSV or Excel): department, target value
    #[arg(short, long, value_name = "FILE")]
    pub target: PathBuf,

    /// Actual file (CSV or Excel): department, one column per month
    #[arg(short, long, value_name = "FILE")]
    pub actual: PathBuf,

    /// Date the fiscal year is anchored on (YYYY-MM-DD, default today)
    #[arg(long, value_parser = parse_date)]
    pub today: Option<NaiveDate>,
}

impl Commands {
    pub fn input(&self) -> &InputArgs {
        match self {
            Commands::Summary { input, .. }
            | Commands::Report { input, .. }
            | Commands::Export { input, .. } => input,
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_defaults() {
        let cli = Cli::try_parse_from([
            "profit_report", "export", "-t", "target.csv", "-a", "actual.xlsx", "--today", "2024-03-01",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.command.input().today, NaiveDate::from_ymd_opt(2024, 3, 1));
        match cli.command {
            Commands::Export { out_dir, period_type, as_of, .. } => {
                assert_eq!(out_dir, PathBuf::from("."));
                assert_eq!(period_type, "monthly");
                assert_eq!(as_of, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn report_with_verbosity() {
        let cli = Cli::try_parse_from([
            "profit_report", "report", "-vv", "--target", "t.csv", "--actual", "a.csv", "-o", "out.html",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Report { output, .. } => assert_eq!(output, PathBuf::from("out.html")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn bad_date_is_rejected() {
        let result = Cli::try_parse_from([
            "profit_report", "summary", "-t", "t.csv", "-a", "a.csv", "--today", "03/01/2024",
        ]);
        assert!(result.is_err());
    }
}
