//! Load functions - read one export (CSV or XLSX) into raw rows

use crate::error::LoadError;
use crate::ingestion::types::RawRow;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    Xlsx,
}

impl SourceFormat {
    /// Spreadsheet extensions load as workbooks, anything else as delimited text
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            SourceFormat::Xlsx
        } else {
            SourceFormat::Csv
        }
    }
}

/// Raw bytes of one export plus the name it arrived under
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

impl Source {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            format: SourceFormat::from_name(&name),
            name,
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            source_name: name.clone(),
            source,
        })?;

        Ok(Self::from_bytes(name, bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

fn decode_utf16(body: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let pairs = body.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        debug!("Ignoring trailing odd byte of a UTF-16 export");
    }
    let units: Vec<u16> = pairs.map(|pair| to_unit([pair[0], pair[1]])).collect();
    String::from_utf16_lossy(&units)
}

/// Decode export bytes: UTF-16 when a BOM says so, UTF-8 otherwise, Latin-1
/// when the bytes are not valid UTF-8
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return (decode_utf16(rest, u16::from_le_bytes), TextEncoding::Utf16Le);
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return (decode_utf16(rest, u16::from_be_bytes), TextEncoding::Utf16Be);
    }

    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => (
            body.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Latin1,
        ),
    }
}

/// A row skipped because it does not fit the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub line: u64,
    pub reason: String,
}

enum RowsInner {
    Csv(csv::StringRecordsIntoIter<Cursor<Vec<u8>>>),
    Sheet(std::vec::IntoIter<(u64, Vec<String>)>),
}

/// Lazy row sequence; restart by loading the source again
pub struct RawRows {
    headers: Arc<[String]>,
    inner: RowsInner,
}

impl RawRows {
    fn check_width(&self, line: u64, values: Vec<String>) -> Result<RawRow, MalformedRow> {
        if values.len() != self.headers.len() {
            return Err(MalformedRow {
                line,
                reason: format!(
                    "expected {} columns, found {}",
                    self.headers.len(),
                    values.len()
                ),
            });
        }
        Ok(RawRow::new(line, self.headers.clone(), values))
    }
}

impl Iterator for RawRows {
    type Item = Result<RawRow, MalformedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            RowsInner::Csv(records) => {
                let item = records.next()?;
                Some(match item {
                    Ok(record) => {
                        let line = record.position().map(|p| p.line()).unwrap_or(0);
                        let values = record.iter().map(str::to_string).collect();
                        self.check_width(line, values)
                    }
                    Err(e) => Err(MalformedRow {
                        line: e.position().map(|p| p.line()).unwrap_or(0),
                        reason: e.to_string(),
                    }),
                })
            }
            RowsInner::Sheet(rows) => {
                let (line, values) = rows.next()?;
                Some(self.check_width(line, values))
            }
        }
    }
}

/// A source whose header has been read
pub struct LoadedSource {
    pub name: Arc<str>,
    pub format: SourceFormat,
    pub encoding: Option<TextEncoding>,
    pub headers: Arc<[String]>,
    pub rows: RawRows,
}

/// Read the header of a source and prepare its rows
pub fn load_source(source: Source) -> Result<LoadedSource, LoadError> {
    info!("Loading {} ({} bytes)", source.name, source.bytes.len());

    if source.bytes.is_empty() {
        return Err(LoadError::Empty {
            source_name: source.name,
        });
    }

    match source.format {
        SourceFormat::Csv => load_csv(source),
        SourceFormat::Xlsx => load_xlsx(source),
    }
}

fn load_csv(source: Source) -> Result<LoadedSource, LoadError> {
    let (text, encoding) = decode_text(&source.bytes);
    debug!("Decoded {} as {:?}", source.name, encoding);

    if text.trim().is_empty() {
        return Err(LoadError::Empty {
            source_name: source.name,
        });
    }

    // Width is checked per row so one ragged line does not abort the file
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(text.into_bytes()));

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LoadError::Csv {
            source_name: source.name.clone(),
            source: e,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(LoadError::MissingHeader {
            source_name: source.name,
        });
    }

    let headers: Arc<[String]> = headers.into();
    Ok(LoadedSource {
        name: source.name.into(),
        format: SourceFormat::Csv,
        encoding: Some(encoding),
        rows: RawRows {
            headers: headers.clone(),
            inner: RowsInner::Csv(reader.into_records()),
        },
        headers,
    })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

fn load_xlsx(source: Source) -> Result<LoadedSource, LoadError> {
    let workbook_error = |reason: String| LoadError::Workbook {
        source_name: source.name.clone(),
        reason,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(source.bytes))
        .map_err(|e| workbook_error(e.to_string()))?;

    // Exports carry their data on the first sheet
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| workbook_error("no sheets found".to_string()))?;
    debug!("Reading sheet {} of {}", sheet_name, source.name);

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| workbook_error(e.to_string()))?;

    let mut rows = range.rows().enumerate().filter(|(_, cells)| {
        cells.iter().any(|c| !matches!(c, Data::Empty))
    });

    let headers: Vec<String> = match rows.next() {
        Some((_, cells)) => cells.iter().map(|c| cell_text(c).trim().to_string()).collect(),
        None => {
            return Err(LoadError::Empty {
                source_name: source.name,
            })
        }
    };

    let body: Vec<(u64, Vec<String>)> = rows
        .map(|(idx, cells)| (idx as u64 + 1, cells.iter().map(cell_text).collect()))
        .collect();

    let headers: Arc<[String]> = headers.into();
    Ok(LoadedSource {
        name: source.name.into(),
        format: SourceFormat::Xlsx,
        encoding: None,
        rows: RawRows {
            headers: headers.clone(),
            inner: RowsInner::Sheet(body.into_iter()),
        },
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_source(name: &str, text: &str) -> Source {
        Source::from_bytes(name, text.as_bytes().to_vec())
    }

    #[test]
    fn test_source_format_from_name() {
        assert_eq!(SourceFormat::from_name("tiktok.CSV"), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_name("google.xlsx"), SourceFormat::Xlsx);
        assert_eq!(SourceFormat::from_name("export"), SourceFormat::Csv);
    }

    #[test]
    fn test_decode_utf8_with_bom() {
        let (text, encoding) = decode_text(b"\xEF\xBB\xBFDate,Cost");
        assert_eq!(text, "Date,Cost");
        assert_eq!(encoding, TextEncoding::Utf8);
    }

    #[test]
    fn test_decode_latin1_fallback() {
        // "Café" in Latin-1 is not valid UTF-8
        let (text, encoding) = decode_text(b"Caf\xE9");
        assert_eq!(text, "Café");
        assert_eq!(encoding, TextEncoding::Latin1);
    }

    #[test]
    fn test_decode_utf16le() {
        let (text, encoding) = decode_text(b"\xFF\xFEA\x00,\x00B\x00");
        assert_eq!(text, "A,B");
        assert_eq!(encoding, TextEncoding::Utf16Le);
    }

    #[test]
    fn test_decode_utf16be_and_odd_length() {
        let (text, encoding) = decode_text(b"\xFE\xFF\x00A\x00,\x00B");
        assert_eq!(text, "A,B");
        assert_eq!(encoding, TextEncoding::Utf16Be);

        // A truncated final unit is dropped
        let (text, _) = decode_text(b"\xFF\xFEA\x00B\x00\x43");
        assert_eq!(text, "AB");
    }

    #[test]
    fn test_load_csv_rows() {
        let loaded = load_source(csv_source(
            "tiktok.csv",
            "Date, Campaign Name ,Cost\n2024-01-01,Spring,$10\n2024-01-02,Spring,$12\n",
        ))
        .unwrap();

        assert_eq!(&*loaded.headers, &["Date", "Campaign Name", "Cost"]);
        let rows: Vec<_> = loaded.rows.collect();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.line, 2);
        assert_eq!(first.get("Cost"), Some("$10"));
    }

    #[test]
    fn test_load_csv_skips_ragged_row() {
        let loaded = load_source(csv_source(
            "meta.csv",
            "a,b,c\n1,2,3\n1,2\n4,5,6\n",
        ))
        .unwrap();

        let rows: Vec<_> = loaded.rows.collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        let malformed = rows[1].as_ref().unwrap_err();
        assert_eq!(malformed.line, 3);
        assert!(malformed.reason.contains("expected 3 columns"));
        assert!(rows[2].is_ok());
    }

    #[test]
    fn test_load_empty_source() {
        let err = load_source(csv_source("empty.csv", "")).err().unwrap();
        assert!(matches!(err, LoadError::Empty { .. }));

        let err = load_source(csv_source("blank.csv", "  \n\n")).err().unwrap();
        assert!(matches!(err, LoadError::Empty { .. }));
    }

    #[test]
    fn test_load_xlsx_rows() {
        let bytes = include_bytes!("../../tests/fixtures/google_ads.xlsx").to_vec();
        let loaded = load_source(Source::from_bytes("google_ads.xlsx", bytes)).unwrap();

        assert_eq!(loaded.format, SourceFormat::Xlsx);
        assert_eq!(loaded.encoding, None);
        assert_eq!(
            &*loaded.headers,
            &["Day", "Campaign", "Cost", "Impr.", "Clicks", "Conv.", "Conv. value"]
        );

        let rows: Vec<RawRow> = loaded.rows.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        // Date cells render as ISO dates, line numbers follow the sheet rows
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].get("Day"), Some("2024-01-01"));
        assert_eq!(rows[0].get("Cost"), Some("150.5"));
        assert_eq!(rows[0].get("Impr."), Some("2000"));
        assert_eq!(rows[1].line, 4);
        assert_eq!(rows[1].get("Day"), Some("2024-01-02"));
    }

    #[test]
    fn test_load_corrupt_workbook() {
        let source = Source::from_bytes("google.xlsx", b"not a zip archive".to_vec());
        let err = load_source(source).err().unwrap();
        assert!(matches!(err, LoadError::Workbook { .. }));
    }

    #[test]
    fn test_source_from_missing_path() {
        let err = Source::from_path(Path::new("/nonexistent/ads.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
