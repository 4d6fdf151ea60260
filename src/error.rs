use thiserror::Error;

use crate::types::YearMonth;

/// Failures while reading an input file.
///
/// Only `FileNotFound` and `Io` reach callers of `loader::load_table`; the
/// rest degrade to "no table".
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {0:?} (expected .csv, .xlsx or .xls)")]
    UnsupportedFormat(String),

    #[error("CSV parse failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet parse failed: {0}")]
    Excel(String),

    #[error("workbook has no worksheets")]
    EmptyWorkbook,

    #[error("table has no usable columns")]
    NoColumns,
}

impl From<calamine::Error> for LoadError {
    fn from(err: calamine::Error) -> Self {
        LoadError::Excel(err.to_string())
    }
}

/// Structural failures that abort a pipeline run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("target table needs a department column and a target column, found {columns} column(s)")]
    MissingTargetColumn { columns: usize },

    #[error("actual table has no period columns")]
    MissingPeriodColumns,

    #[error("no achievement data could be computed")]
    NoAchievementData,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("metric {metric:?} produced a non-finite value")]
    NonFiniteValue { metric: String },
}

/// Why a row, cell or column was left out of a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("department name is blank")]
    BlankDepartment,

    #[error("no actual rows for department")]
    NoActualRows,

    #[error("target value is missing")]
    MissingTarget,

    #[error("target value {0} is not positive")]
    NonPositiveTarget(f64),

    #[error("actual value is missing")]
    MissingActual,

    #[error("actual value {0:?} is not numeric")]
    NonNumericActual(String),

    #[error("period {0} already has a column")]
    DuplicatePeriod(YearMonth),

    #[error("header cell holds a spreadsheet error")]
    ErrorHeader,
}
