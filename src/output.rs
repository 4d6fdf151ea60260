use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::error::ExportError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Serialize rows to CSV bytes prefixed with a UTF-8 byte-order mark, so
/// spreadsheet tools pick the right encoding for non-ASCII names.
pub fn encode_csv_with_bom<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, ExportError> {
    let mut wtr = csv::Writer::from_writer(UTF8_BOM.to_vec());
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    wtr.into_inner()
        .map_err(|e| ExportError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

/// Write a CSV file in one go; the file is only created once encoding succeeded.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ExportError> {
    let bytes = encode_csv_with_bom(rows)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), anyhow::Error> {
    let s = serde_json::to_string_pretty(value)?;
    fs::write(path, s)?;
    Ok(())
}

pub fn write_html(path: &Path, html: &str) -> io::Result<()> {
    fs::write(path, html)
}

pub fn preview_table<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("\n{}", title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    preview_table_rows(rows, max_rows);
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
    if rows.len() > max_rows {
        println!("... {} more row(s)\n", rows.len() - max_rows);
    }
}
