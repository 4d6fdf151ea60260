// Column role resolution for the target and actual tables.
//
// Positional conventions: the department is always column 0. The target
// column is found by keyword, falling back to column 1. Period columns are
// whatever the loader classified as calendar months.
use crate::error::{PipelineError, SkipReason};
use crate::types::{ColumnHeader, RawTable, TargetRecord, YearMonth};
use tracing::{info, warn};

pub const TARGET_KEYWORDS: &[&str] = &["目標", "target", "goal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetColumns {
    pub department: usize,
    pub target_value: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodColumn {
    pub index: usize,
    pub period: YearMonth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActualColumns {
    pub department: usize,
    /// Ascending by period, one column per month.
    pub periods: Vec<PeriodColumn>,
    pub duplicates: Vec<(usize, SkipReason)>,
}

pub fn resolve_target_columns(table: &RawTable) -> Result<TargetColumns, PipelineError> {
    let headers = table.headers();
    if headers.len() < 2 {
        return Err(PipelineError::MissingTargetColumn {
            columns: headers.len(),
        });
    }
    let by_keyword = headers.iter().enumerate().skip(1).find(|(_, h)| match h {
        ColumnHeader::Label(text) => {
            let lowered = text.to_lowercase();
            TARGET_KEYWORDS.iter().any(|k| lowered.contains(k))
        }
        ColumnHeader::Period(_) => false,
    });
    let target_value = match by_keyword {
        Some((idx, header)) => {
            info!(column = %header, "found target column");
            idx
        }
        None => {
            info!(column = %headers[1], "no target keyword, using second column");
            1
        }
    };
    Ok(TargetColumns {
        department: 0,
        target_value,
    })
}

/// One target record per row, or the reason the row cannot be one.
pub fn target_records(
    table: &RawTable,
    columns: TargetColumns,
) -> Vec<Result<TargetRecord, SkipReason>> {
    (0..table.row_count())
        .map(|row| {
            let department = table
                .cell(row, columns.department)
                .as_key()
                .filter(|d| !d.trim().is_empty())
                .ok_or(SkipReason::BlankDepartment)?;
            let target_value = table.cell(row, columns.target_value).to_number();
            Ok(TargetRecord {
                department,
                target_value,
            })
        })
        .collect()
}

pub fn resolve_actual_columns(table: &RawTable) -> Result<ActualColumns, PipelineError> {
    let mut periods: Vec<PeriodColumn> = table
        .headers()
        .iter()
        .enumerate()
        .filter_map(|(index, h)| h.period().map(|period| PeriodColumn { index, period }))
        .collect();
    if periods.is_empty() {
        return Err(PipelineError::MissingPeriodColumns);
    }
    // Stable: for a repeated month the leftmost column comes first and wins.
    periods.sort_by_key(|p| p.period);

    let mut duplicates = Vec::new();
    let mut unique: Vec<PeriodColumn> = Vec::with_capacity(periods.len());
    for col in periods {
        if unique.last().map(|p| p.period) == Some(col.period) {
            warn!(column = col.index, period = %col.period, "duplicate period column ignored");
            duplicates.push((col.index, SkipReason::DuplicatePeriod(col.period)));
        } else {
            unique.push(col);
        }
    }

    if let (Some(first), Some(last)) = (unique.first(), unique.last()) {
        info!(count = unique.len(), from = %first.period, to = %last.period, "period columns");
    }
    Ok(ActualColumns {
        department: 0,
        periods: unique,
        duplicates,
    })
}

/// First row whose department cell matches `department` exactly.
pub fn first_row_for(table: &RawTable, department_col: usize, department: &str) -> Option<usize> {
    (0..table.row_count())
        .find(|&row| table.cell(row, department_col).as_key().as_deref() == Some(department))
}
