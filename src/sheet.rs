//! Spreadsheet import and export.
//!
//! Import reads the first worksheet of a workbook (or a CSV file), treats the
//! first row as the header and turns every following non-blank row into a
//! record aligned with the headers. Export writes an [`ExportTable`] as a
//! single-sheet `.xlsx` or as `.csv`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Write};

use calamine::{Data, Reader, open_workbook_auto};
use camino::Utf8Path;
use quick_xml::escape::escape;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::{CellValue, SheetData};
use crate::error::AgentError;
use crate::fs_util::write_bytes_atomic;
use crate::pipeline::ExportTable;

pub const EXPORT_SHEET_NAME: &str = "Enriched Companies";
pub const EMPTY_HEADER: &str = "__EMPTY";

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

pub fn load_records(path: &Utf8Path) -> Result<SheetData, AgentError> {
    let extension = extension_of(path);
    let rows = match extension.as_str() {
        "csv" => read_csv_rows(path)?,
        ext if WORKBOOK_EXTENSIONS.iter().any(|known| *known == ext) => read_workbook_rows(path)?,
        _ => return Err(AgentError::UnsupportedFormat(path.to_string())),
    };
    let sheet = rows_to_sheet(rows);
    debug!(
        path = %path,
        columns = sheet.headers.len(),
        rows = sheet.records.len(),
        "spreadsheet loaded"
    );
    Ok(sheet)
}

pub fn write_export(path: &Utf8Path, table: &ExportTable) -> Result<(), AgentError> {
    let bytes = match extension_of(path).as_str() {
        "xlsx" => xlsx_bytes(table)?,
        "csv" => csv_bytes(table)?,
        _ => return Err(AgentError::UnsupportedFormat(path.to_string())),
    };
    write_bytes_atomic(path, &bytes)
}

fn extension_of(path: &Utf8Path) -> String {
    path.extension()
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn read_workbook_rows(path: &Utf8Path) -> Result<Vec<Vec<CellValue>>, AgentError> {
    let mut workbook = open_workbook_auto(path.as_std_path())
        .map_err(|err| AgentError::Spreadsheet(format!("{path}: {err}")))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|err| AgentError::Spreadsheet(format!("{path}: {err}")))?,
        None => return Ok(Vec::new()),
    };
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect())
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Float(value) => CellValue::Number(*value),
        Data::String(value) => CellValue::from(value.as_str()),
        Data::Bool(value) => CellValue::Text(value.to_string()),
        Data::DateTime(value) => CellValue::Number(value.as_f64()),
        Data::DateTimeIso(value) | Data::DurationIso(value) => CellValue::from(value.as_str()),
        Data::Error(_) | Data::Empty => CellValue::Empty,
    }
}

/// CSV cells are kept as text; identifiers such as CNPJs keep their leading
/// zeros this way.
fn read_csv_rows(path: &Utf8Path) -> Result<Vec<Vec<CellValue>>, AgentError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| AgentError::Spreadsheet(format!("{path}: {err}")))?;
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes[..]);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|err| AgentError::Spreadsheet(format!("{path}: {err}")))?;
        rows.push(
            record
                .iter()
                .map(|field| CellValue::from(&*String::from_utf8_lossy(field)))
                .collect(),
        );
    }
    Ok(rows)
}

/// Semicolon-separated exports are common for Brazilian locales; pick `;`
/// when the header line has more of them than commas.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|byte| *byte == b'\n').next().unwrap_or_default();
    let semicolons = first_line.iter().filter(|byte| **byte == b';').count();
    let commas = first_line.iter().filter(|byte| **byte == b',').count();
    if semicolons > commas { b';' } else { b',' }
}

fn rows_to_sheet(rows: Vec<Vec<CellValue>>) -> SheetData {
    let mut rows = rows.into_iter();
    let Some(mut header_row) = rows.next() else {
        return SheetData::default();
    };
    let mut records: Vec<Vec<CellValue>> = rows
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect();
    // Rows longer than the header add `__EMPTY` columns.
    let width = records
        .iter()
        .map(Vec::len)
        .fold(header_row.len(), usize::max);
    header_row.resize(width, CellValue::Empty);
    for row in &mut records {
        row.resize(width, CellValue::Empty);
    }
    SheetData::new(unique_headers(&header_row), records)
}

fn unique_headers(cells: &[CellValue]) -> Vec<String> {
    let mut seen = HashSet::new();
    cells
        .iter()
        .map(|cell| {
            let base = match cell.to_string().trim() {
                "" => EMPTY_HEADER.to_string(),
                text => text.to_string(),
            };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while seen.contains(&candidate) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

fn csv_bytes(table: &ExportTable) -> Result<Vec<u8>, AgentError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.headers)
        .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(|cell| cell.to_string()))
            .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| AgentError::Filesystem(err.to_string()))
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
    r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#,
    r#"</Types>"#
);

const ROOT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
    r#"</Relationships>"#
);

const WORKBOOK_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#,
    r#"</Relationships>"#
);

const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

fn workbook_xml() -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<workbook xmlns="{ns}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
            r#"<sheets><sheet name="{name}" sheetId="1" r:id="rId1"/></sheets>"#,
            r#"</workbook>"#
        ),
        ns = SPREADSHEET_NS,
        name = escape(EXPORT_SHEET_NAME),
    )
}

/// Deduplicated string table; cells refer to entries by index.
#[derive(Default)]
struct SharedStrings {
    entries: Vec<String>,
    index: HashMap<String, usize>,
    references: usize,
}

impl SharedStrings {
    fn intern(&mut self, value: &str) -> usize {
        self.references += 1;
        if let Some(position) = self.index.get(value) {
            return *position;
        }
        let position = self.entries.len();
        self.entries.push(value.to_string());
        self.index.insert(value.to_string(), position);
        position
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="{SPREADSHEET_NS}" count="{}" uniqueCount="{}">"#,
            self.references,
            self.entries.len()
        );
        for entry in &self.entries {
            xml.push_str(r#"<si><t xml:space="preserve">"#);
            xml.push_str(&escape(entry.as_str()));
            xml.push_str("</t></si>");
        }
        xml.push_str("</sst>");
        xml
    }
}

fn sheet_xml(table: &ExportTable, strings: &mut SharedStrings) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{SPREADSHEET_NS}"><sheetData>"#
    );
    let header_cells: Vec<CellValue> = table
        .headers
        .iter()
        .map(|header| CellValue::Text(header.clone()))
        .collect();
    let rows = std::iter::once(&header_cells).chain(table.rows.iter());
    for (row_index, row) in rows.enumerate() {
        let row_number = row_index + 1;
        xml.push_str(&format!(r#"<row r="{row_number}">"#));
        for (column_index, cell) in row.iter().enumerate() {
            let reference = format!("{}{row_number}", column_name(column_index));
            match cell {
                CellValue::Empty => {}
                CellValue::Number(value) if value.is_finite() => {
                    xml.push_str(&format!(r#"<c r="{reference}"><v>{value}</v></c>"#));
                }
                other => {
                    let position = strings.intern(&other.to_string());
                    xml.push_str(&format!(r#"<c r="{reference}" t="s"><v>{position}</v></c>"#));
                }
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn xlsx_bytes(table: &ExportTable) -> Result<Vec<u8>, AgentError> {
    let mut strings = SharedStrings::default();
    let sheet = sheet_xml(table, &mut strings);
    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
        ("xl/worksheets/sheet1.xml", sheet),
        ("xl/sharedStrings.xml", strings.to_xml()),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(name, options)
            .map_err(|err| AgentError::Filesystem(err.to_string()))?;
        zip.write_all(content.as_bytes())
            .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    }
    let cursor = zip
        .finish()
        .map_err(|err| AgentError::Filesystem(err.to_string()))?;
    Ok(cursor.into_inner())
}

/// Zero-based column index to its spreadsheet letters (0 → A, 26 → AA).
pub fn column_name(index: usize) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        let offset = (remaining - 1) % 26;
        letters.push(b'A' + offset as u8);
        remaining = (remaining - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|value| CellValue::from(*value)).collect()
    }

    #[test]
    fn column_names_roll_over() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn headers_are_made_unique() {
        let headers = unique_headers(&text_row(&["Nome", "", "Nome", "", "Nome"]));
        assert_eq!(headers, vec!["Nome", "__EMPTY", "Nome_1", "__EMPTY_1", "Nome_2"]);
    }

    #[test]
    fn blank_rows_are_skipped_and_short_rows_padded() {
        let sheet = rows_to_sheet(vec![
            text_row(&["Empresa", "CNPJ"]),
            text_row(&["", ""]),
            text_row(&["Acme"]),
        ]);
        assert_eq!(sheet.records, vec![vec![CellValue::from("Acme"), CellValue::Empty]]);
    }

    #[test]
    fn semicolon_header_picks_semicolon() {
        assert_eq!(sniff_delimiter(b"Empresa;CNPJ\nAcme, Ltda;1\n"), b';');
        assert_eq!(sniff_delimiter(b"Empresa,CNPJ\n"), b',');
    }

    #[test]
    fn shared_strings_are_escaped_and_deduplicated() {
        let mut strings = SharedStrings::default();
        assert_eq!(strings.intern("A & B"), 0);
        assert_eq!(strings.intern("A & B"), 0);
        assert_eq!(strings.intern("<c>"), 1);
        let xml = strings.to_xml();
        assert!(xml.contains(r#"count="3" uniqueCount="2""#));
        assert!(xml.contains("A &amp; B"));
        assert!(xml.contains("&lt;c&gt;"));
    }
}
