use crate::error::{LoadError, SkipReason};
use crate::types::{Cell, ColumnHeader, RawTable};
use crate::util::parse_header_period;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Headers containing any of these (case-insensitive) are never read as
/// dates, even when the text would parse as one.
pub const PRESERVE_KEYWORDS: &[&str] = &[
    "診療科",
    "名称",
    "目標",
    "粗利",
    "金額",
    "値",
    "department",
    "name",
    "target",
    "goal",
    "amount",
    "value",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub blank_rows: usize,
    pub label_columns: usize,
    pub period_columns: usize,
    pub dropped_columns: Vec<(usize, SkipReason)>,
}

/// A header cell as it came out of the file, before classification.
#[derive(Debug, Clone, PartialEq)]
enum HeaderCell {
    Text(String),
    Date(NaiveDate),
    Error,
}

/// Classify header text as a label or a calendar month.
///
/// Keyword matches win; text that does not parse as a date stays a label.
pub fn classify_header(text: &str) -> ColumnHeader {
    let lowered = text.to_lowercase();
    if PRESERVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return ColumnHeader::Label(text.to_string());
    }
    match parse_header_period(text) {
        Some(period) => ColumnHeader::Period(period),
        None => ColumnHeader::Label(text.to_string()),
    }
}

fn resolve_header(index: usize, cell: HeaderCell) -> Result<ColumnHeader, SkipReason> {
    match cell {
        HeaderCell::Error => Err(SkipReason::ErrorHeader),
        HeaderCell::Date(d) => Ok(classify_header(&d.format("%Y-%m-%d").to_string())),
        HeaderCell::Text(s) => {
            let s = s.trim().trim_start_matches('\u{feff}');
            if s.is_empty() {
                // Same placeholder spreadsheet tools give a blank header.
                Ok(ColumnHeader::Label(format!("Unnamed: {}", index)))
            } else {
                Ok(classify_header(s))
            }
        }
    }
}

/// Load a CSV or spreadsheet into a classified table.
///
/// A missing or unreadable file is an error. Anything else that goes wrong
/// (unknown extension, malformed content, no usable columns) is logged and
/// reported as `Ok(None)`, which callers treat as "no data".
pub fn load_table(path: &Path) -> Result<Option<(RawTable, LoadReport)>, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.display().to_string()));
    }
    match read_table(path) {
        Ok((table, report)) => {
            info!(
                file = %path.display(),
                rows = table.row_count(),
                columns = table.column_count(),
                periods = report.period_columns,
                "loaded table"
            );
            debug!(headers = ?table.headers(), "resolved headers");
            Ok(Some((table, report)))
        }
        Err(e @ LoadError::Io(_)) => Err(e),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "could not load table");
            Ok(None)
        }
    }
}

pub fn read_table(path: &Path) -> Result<(RawTable, LoadReport), LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "csv" => read_csv(File::open(path)?),
        "xlsx" | "xls" => read_workbook(path),
        _ => Err(LoadError::UnsupportedFormat(ext)),
    }
}

pub fn read_csv<R: Read>(reader: R) -> Result<(RawTable, LoadReport), LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<HeaderCell> = rdr
        .headers()?
        .iter()
        .map(|h| HeaderCell::Text(h.to_string()))
        .collect();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(Cell::from_text).collect());
    }
    build_table(headers, rows)
}

fn read_workbook(path: &Path) -> Result<(RawTable, LoadReport), LoadError> {
    let mut workbook = open_workbook_auto(path)?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(LoadError::EmptyWorkbook)?;
    let range = workbook.worksheet_range(&first)?;

    let mut iter = range.rows();
    let headers: Vec<HeaderCell> = match iter.next() {
        Some(row) => row.iter().map(header_from_data).collect(),
        None => Vec::new(),
    };
    let rows = iter
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();
    build_table(headers, rows)
}

fn header_from_data(cell: &Data) -> HeaderCell {
    match cell {
        Data::Error(_) => HeaderCell::Error,
        Data::Empty => HeaderCell::Text(String::new()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_date() {
            Some(d) => HeaderCell::Date(d),
            None => HeaderCell::Text(cell.to_string()),
        },
        other => HeaderCell::Text(other.to_string()),
    }
}

fn cell_from_data(cell: &Data) -> Cell {
    match cell {
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::from_text(s),
        Data::Empty | Data::Error(_) => Cell::Empty,
        other => Cell::from_text(&other.to_string()),
    }
}

fn build_table(
    headers: Vec<HeaderCell>,
    rows: Vec<Vec<Cell>>,
) -> Result<(RawTable, LoadReport), LoadError> {
    let mut report = LoadReport::default();
    let mut kept_cols = Vec::new();
    let mut kept_headers = Vec::new();

    for (idx, cell) in headers.into_iter().enumerate() {
        match resolve_header(idx, cell) {
            Ok(header) => {
                match header {
                    ColumnHeader::Period(_) => report.period_columns += 1,
                    ColumnHeader::Label(_) => report.label_columns += 1,
                }
                kept_cols.push(idx);
                kept_headers.push(header);
            }
            Err(reason) => {
                debug!(column = idx, %reason, "dropping column");
                report.dropped_columns.push((idx, reason));
            }
        }
    }
    if kept_headers.is_empty() {
        return Err(LoadError::NoColumns);
    }

    let mut kept_rows = Vec::new();
    for row in rows {
        report.total_rows += 1;
        let projected: Vec<Cell> = kept_cols
            .iter()
            .map(|&c| row.get(c).cloned().unwrap_or(Cell::Empty))
            .collect();
        if projected.iter().all(Cell::is_empty) {
            report.blank_rows += 1;
            continue;
        }
        kept_rows.push(projected);
    }

    Ok((RawTable::new(kept_headers, kept_rows), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::YearMonth;
    use calamine::{CellErrorType, ExcelDateTime, ExcelDateTimeType};
    use std::io::Write;
    use tempfile::Builder;

    fn period(y: i32, m: u32) -> ColumnHeader {
        ColumnHeader::Period(YearMonth::new(y, m).unwrap())
    }

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_classify_header_keywords_stay_labels() {
        assert_eq!(classify_header("診療科名"), ColumnHeader::Label("診療科名".into()));
        assert_eq!(classify_header("Target"), ColumnHeader::Label("Target".into()));
        assert_eq!(classify_header("GOAL 2024"), ColumnHeader::Label("GOAL 2024".into()));
        assert_eq!(classify_header("2024-01-01"), period(2024, 1));
        assert_eq!(classify_header("備考"), ColumnHeader::Label("備考".into()));
    }

    #[test]
    fn test_csv_headers_classified() {
        let file = csv_file("診療科名,2024-01-01,2024/02/01,備考\n外科,100,\"1,200\",memo\n");
        let (table, report) = load_table(file.path()).unwrap().unwrap();

        assert_eq!(
            table.headers(),
            &[
                ColumnHeader::Label("診療科名".into()),
                period(2024, 1),
                period(2024, 2),
                ColumnHeader::Label("備考".into()),
            ]
        );
        assert_eq!(report.period_columns, 2);
        assert_eq!(report.label_columns, 2);
        assert_eq!(table.cell(0, 0), &Cell::Text("外科".into()));
        assert_eq!(table.cell(0, 1), &Cell::Number(100.0));
        assert_eq!(table.cell(0, 2), &Cell::Text("1,200".into()));
    }

    #[test]
    fn test_csv_blank_rows_and_headers() {
        let file = csv_file(",2024-01\nA,10\n,\nB,20\n");
        let (table, report) = load_table(file.path()).unwrap().unwrap();

        assert_eq!(table.headers()[0], ColumnHeader::Label("Unnamed: 0".into()));
        assert_eq!(table.row_count(), 2);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.blank_rows, 1);
    }

    #[test]
    fn test_csv_bom_is_stripped() {
        let file = csv_file("\u{feff}department,2024-03\nA,1\n");
        let (table, _) = load_table(file.path()).unwrap().unwrap();
        assert_eq!(table.headers()[0], ColumnHeader::Label("department".into()));
    }

    #[test]
    fn test_header_only_csv_is_a_valid_empty_table() {
        let file = csv_file("dept,2024-01,2024-02\n");
        let (table, _) = load_table(file.path()).unwrap().unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.column_count(), 3);
    }

    #[test]
    fn test_unsupported_extension_is_no_data() {
        let mut file = Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "a,b").unwrap();
        assert!(load_table(file.path()).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_table(Path::new("definitely_missing_input.csv"));
        assert!(matches!(result, Err(LoadError::FileNotFound(_))));
    }

    #[test]
    fn test_error_headers_are_dropped() {
        let headers = vec![
            HeaderCell::Text("dept".into()),
            HeaderCell::Error,
            HeaderCell::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
        ];
        let rows = vec![vec![
            Cell::Text("A".into()),
            Cell::Number(1.0),
            Cell::Number(2.0),
        ]];
        let (table, report) = build_table(headers, rows).unwrap();

        assert_eq!(table.headers(), &[ColumnHeader::Label("dept".into()), period(2024, 5)]);
        assert_eq!(table.cell(0, 1), &Cell::Number(2.0));
        assert_eq!(report.dropped_columns, vec![(1, SkipReason::ErrorHeader)]);
    }

    #[test]
    fn test_no_usable_columns() {
        let result = build_table(vec![HeaderCell::Error], vec![]);
        assert!(matches!(result, Err(LoadError::NoColumns)));
    }

    #[test]
    fn test_spreadsheet_cells() {
        assert_eq!(cell_from_data(&Data::Int(7)), Cell::Number(7.0));
        assert_eq!(cell_from_data(&Data::Float(2.5)), Cell::Number(2.5));
        assert_eq!(cell_from_data(&Data::String("1,000".into())), Cell::Text("1,000".into()));
        assert_eq!(cell_from_data(&Data::Empty), Cell::Empty);
        assert_eq!(header_from_data(&Data::String("外科".into())), HeaderCell::Text("外科".into()));
        assert_eq!(header_from_data(&Data::Empty), HeaderCell::Text(String::new()));
    }

    #[test]
    fn test_spreadsheet_date_and_error_headers() {
        let jan = Data::DateTime(ExcelDateTime::new(45292.0, ExcelDateTimeType::DateTime, false));
        assert_eq!(
            header_from_data(&jan),
            HeaderCell::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(header_from_data(&Data::Error(CellErrorType::Ref)), HeaderCell::Error);
    }

    #[test]
    fn test_spreadsheet_header_row_builds_table() {
        let header_row = [
            Data::String("診療科名".into()),
            Data::DateTime(ExcelDateTime::new(45292.0, ExcelDateTimeType::DateTime, false)),
            Data::Error(CellErrorType::Ref),
            Data::DateTime(ExcelDateTime::new(45323.0, ExcelDateTimeType::DateTime, false)),
        ];
        let data_row = [
            Data::String("外科".into()),
            Data::Float(120.0),
            Data::Empty,
            Data::Int(90),
        ];
        let headers = header_row.iter().map(header_from_data).collect();
        let rows = vec![data_row.iter().map(cell_from_data).collect()];
        let (table, report) = build_table(headers, rows).unwrap();

        assert_eq!(
            table.headers(),
            &[
                ColumnHeader::Label("診療科名".into()),
                period(2024, 1),
                period(2024, 2),
            ]
        );
        assert_eq!(table.cell(0, 2), &Cell::Number(90.0));
        assert_eq!(report.dropped_columns, vec![(2, SkipReason::ErrorHeader)]);
    }
}
