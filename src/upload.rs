use std::io::{Cursor, Read};
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{AttendanceError, Result};

const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SHARED_STRINGS_ENTRY: &str = "xl/sharedStrings.xml";
const WORKSHEET_PREFIX: &str = "xl/worksheets/sheet";
/// Column XFD, the widest sheet Excel writes.
const MAX_SHEET_COLUMNS: usize = 16_384;
const MAX_SHEET_ROWS: usize = 1_048_576;
/// Ceiling on padded cells across the whole sheet.
const MAX_SHEET_CELLS: usize = 2_000_000;

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Xlsx,
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_upload_bytes: u64,
    pub max_rows: usize,
}

/// Header row plus data rows, cells as raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn data_row_count(&self) -> usize {
        self.rows.iter().filter(|r| !is_blank_row(r)).count()
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Where the upload bytes come from on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    Path(PathBuf),
    Base64(String),
}

/// Loads the raw bytes, refusing anything over `max_bytes` before it is
/// read into memory.
pub fn read_upload_source(source: &UploadSource, max_bytes: u64) -> Result<Vec<u8>> {
    match source {
        UploadSource::Path(path) => {
            let meta = std::fs::metadata(path).map_err(|e| {
                AttendanceError::invalid(format!("cannot read {}: {}", path.display(), e))
            })?;
            if !meta.is_file() {
                return Err(AttendanceError::invalid(format!(
                    "{} is not a file",
                    path.display()
                )));
            }
            if meta.len() > max_bytes {
                return Err(AttendanceError::SizeLimitExceeded {
                    size: meta.len(),
                    limit: max_bytes,
                });
            }
            std::fs::read(path).map_err(|e| {
                AttendanceError::invalid(format!("cannot read {}: {}", path.display(), e))
            })
        }
        UploadSource::Base64(encoded) => {
            // Base64 inflates by 4/3, so the encoded length bounds the payload.
            let approx = (encoded.len() as u64 / 4) * 3;
            if approx > max_bytes.saturating_add(3) {
                return Err(AttendanceError::SizeLimitExceeded {
                    size: approx,
                    limit: max_bytes,
                });
            }
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| AttendanceError::invalid(format!("contentBase64 is not valid base64: {}", e)))
        }
    }
}

/// Size ceiling, then format detection, then decoding. Nothing downstream
/// runs unless all three pass.
pub fn decode_upload(file: &UploadFile, limits: &DecodeLimits) -> Result<RawTable> {
    let size = file.bytes.len() as u64;
    if size > limits.max_upload_bytes {
        return Err(AttendanceError::SizeLimitExceeded {
            size,
            limit: limits.max_upload_bytes,
        });
    }
    if file.bytes.is_empty() {
        return Err(AttendanceError::FileFormat("file is empty".to_string()));
    }

    let format = detect_format(file.file_name.as_deref(), file.mime_type.as_deref())?;
    let mut rows = match format {
        FileFormat::Csv => decode_delimited(&file.bytes, b',')?,
        FileFormat::Tsv => decode_delimited(&file.bytes, b'\t')?,
        FileFormat::Xlsx => decode_xlsx(&file.bytes, limits)?,
    };

    while rows.last().map(|r| is_blank_row(r)).unwrap_or(false) {
        rows.pop();
    }
    // The header is the first non-blank row; data rows are numbered from it.
    let Some(header_at) = rows.iter().position(|r| !is_blank_row(r)) else {
        return Err(AttendanceError::FileFormat("file has no header row".to_string()));
    };
    let mut rows = rows.split_off(header_at);
    let headers: Vec<String> = rows.remove(0).into_iter().map(|h| h.trim().to_string()).collect();
    let table = RawTable { headers, rows };
    let data_rows = table.data_row_count();
    if data_rows == 0 {
        return Err(AttendanceError::FileFormat("file has no data rows".to_string()));
    }
    if data_rows > limits.max_rows {
        return Err(AttendanceError::FileFormat(format!(
            "file has {} data rows, at most {} are accepted",
            data_rows, limits.max_rows
        )));
    }
    Ok(table)
}

pub fn detect_format(file_name: Option<&str>, mime_type: Option<&str>) -> Result<FileFormat> {
    let from_mime = match mime_type.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => format_for_mime(m)?,
        None => None,
    };

    let ext = file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.trim().to_ascii_lowercase());
    match ext.as_deref() {
        Some("csv") => Ok(FileFormat::Csv),
        Some("tsv") | Some("tab") => Ok(FileFormat::Tsv),
        Some("xlsx") => Ok(FileFormat::Xlsx),
        Some("xls") => Err(AttendanceError::FileFormat(
            "legacy .xls workbooks are not supported, save the sheet as .xlsx or .csv".to_string(),
        )),
        Some(other) => Err(AttendanceError::FileFormat(format!(
            "unsupported file extension .{}",
            other
        ))),
        None => from_mime.ok_or_else(|| {
            AttendanceError::FileFormat("cannot tell the file type from its name".to_string())
        }),
    }
}

fn format_for_mime(mime: &str) -> Result<Option<FileFormat>> {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/csv" | "application/csv" | "text/x-csv" | "application/x-csv" => {
            Ok(Some(FileFormat::Csv))
        }
        "text/tab-separated-values" => Ok(Some(FileFormat::Tsv)),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Ok(Some(FileFormat::Xlsx))
        }
        // Browsers report CSV files under any of these.
        "application/vnd.ms-excel" | "text/plain" | "application/octet-stream" => Ok(None),
        _ => Err(AttendanceError::FileFormat(format!(
            "unsupported content type {}",
            essence
        ))),
    }
}

fn decode_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Vec<String>>> {
    if bytes.starts_with(&ZIP_SIGNATURE) || bytes.contains(&0) {
        return Err(AttendanceError::FileFormat(
            "file content is binary, not delimited text".to_string(),
        ));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| AttendanceError::FileFormat("file is not UTF-8 text".to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AttendanceError::FileFormat(e.to_string()))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(rows)
}

fn decode_xlsx(bytes: &[u8], limits: &DecodeLimits) -> Result<Vec<Vec<String>>> {
    if !bytes.starts_with(&ZIP_SIGNATURE) {
        return Err(AttendanceError::FileFormat(
            "file is not an .xlsx workbook".to_string(),
        ));
    }
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AttendanceError::FileFormat(format!("invalid workbook: {}", e)))?;

    let shared = match read_entry(&mut archive, SHARED_STRINGS_ENTRY)? {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };

    let sheet_name = first_worksheet(&archive).ok_or_else(|| {
        AttendanceError::FileFormat("workbook has no worksheets".to_string())
    })?;
    let sheet_xml = read_entry(&mut archive, &sheet_name)?.ok_or_else(|| {
        AttendanceError::FileFormat("workbook has no worksheets".to_string())
    })?;
    parse_sheet(&sheet_xml, &shared, limits)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(AttendanceError::FileFormat(format!(
                "cannot read {}: {}",
                name, e
            )))
        }
    };
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| AttendanceError::FileFormat(format!("cannot read {}: {}", name, e)))?;
    Ok(Some(text))
}

/// Lowest-numbered `xl/worksheets/sheetN.xml`.
fn first_worksheet(archive: &ZipArchive<Cursor<&[u8]>>) -> Option<String> {
    archive
        .file_names()
        .filter_map(|name| {
            let n = name
                .strip_prefix(WORKSHEET_PREFIX)?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((n, name.to_string()))
        })
        .min_by_key(|(n, _)| *n)
        .map(|(_, name)| name)
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    elements(xml, "si")
        .into_iter()
        .map(|(_, inner)| text_runs(inner))
        .collect()
}

fn text_runs(xml: &str) -> String {
    elements(xml, "t")
        .into_iter()
        .map(|(_, inner)| unescape(inner))
        .collect()
}

/// Cell and row references are bounded before any padding happens, so a
/// tiny sheet cannot claim millions of rows or columns.
fn parse_sheet(xml: &str, shared: &[String], limits: &DecodeLimits) -> Result<Vec<Vec<String>>> {
    let max_row = MAX_SHEET_ROWS.min(limits.max_rows.saturating_add(1));
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut padded_cells = 0usize;
    for (row_attrs, row_inner) in elements(xml, "row") {
        let row_idx = match attr(row_attrs, "r") {
            Some(r) => {
                let n = r.trim().parse::<usize>().map_err(|_| {
                    AttendanceError::FileFormat(format!("bad row reference {:?}", r))
                })?;
                if n == 0 || n > max_row {
                    return Err(AttendanceError::FileFormat(format!(
                        "row reference {} is outside 1..={}",
                        n, max_row
                    )));
                }
                n - 1
            }
            None => rows.len(),
        };
        if row_idx >= max_row {
            return Err(AttendanceError::FileFormat(format!(
                "sheet has more than {} rows",
                max_row
            )));
        }
        while rows.len() < row_idx {
            rows.push(Vec::new());
        }

        let mut cells: Vec<String> = Vec::new();
        for (cell_attrs, cell_inner) in elements(row_inner, "c") {
            let col = match attr(cell_attrs, "r") {
                Some(r) => column_index(r).ok_or_else(|| {
                    AttendanceError::FileFormat(format!("bad cell reference {:?}", r))
                })?,
                None => cells.len(),
            };
            if col >= MAX_SHEET_COLUMNS {
                return Err(AttendanceError::FileFormat(format!(
                    "cell column {} is beyond the last sheet column",
                    col + 1
                )));
            }
            let value = match attr(cell_attrs, "t") {
                Some("s") => {
                    let idx = first_inner(cell_inner, "v")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .ok_or_else(|| {
                            AttendanceError::FileFormat("bad shared string reference".to_string())
                        })?;
                    shared.get(idx).cloned().ok_or_else(|| {
                        AttendanceError::FileFormat("bad shared string reference".to_string())
                    })?
                }
                Some("inlineStr") => text_runs(cell_inner),
                _ => first_inner(cell_inner, "v").map(unescape).unwrap_or_default(),
            };
            if value.is_empty() {
                continue;
            }
            if cells.len() <= col {
                padded_cells += col + 1 - cells.len();
                if padded_cells > MAX_SHEET_CELLS {
                    return Err(AttendanceError::FileFormat(
                        "sheet has too many cells".to_string(),
                    ));
                }
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }

        if row_idx < rows.len() {
            rows[row_idx] = cells;
        } else {
            rows.push(cells);
        }
    }
    Ok(rows)
}

/// `B12` -> 1. Letters only; the row digits are ignored. `None` when the
/// letters overflow or are missing.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut idx = 0usize;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
            idx = idx.checked_mul(26)?.checked_add(digit)?;
            seen = true;
        } else {
            break;
        }
    }
    if seen {
        Some(idx - 1)
    } else {
        None
    }
}

fn first_inner<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    elements(xml, tag).into_iter().next().map(|(_, inner)| inner)
}

/// Non-nesting element scan: `(attributes, inner text)` for every `<tag ...>`.
/// Worksheet, row, cell and text elements never nest in themselves.
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<(&'a str, &'a str)> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(&open) {
        let after = &rest[pos + open.len()..];
        match after.chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {}
            _ => {
                rest = after;
                continue;
            }
        }
        let Some(gt) = after.find('>') else { break };
        let head = &after[..gt];
        if head.ends_with('/') {
            out.push((&head[..head.len() - 1], ""));
            rest = &after[gt + 1..];
            continue;
        }
        let body = &after[gt + 1..];
        let Some(end) = body.find(&close) else { break };
        out.push((head, &body[..end]));
        rest = &body[end + close.len()..];
    }
    out
}

fn attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let mut offset = 0;
    while let Some(found) = attrs[offset..].find(&needle) {
        let start = offset + found;
        let boundary = attrs[..start]
            .chars()
            .last()
            .map(|c| c.is_whitespace())
            .unwrap_or(true);
        let value_start = start + needle.len();
        if boundary {
            let len = attrs[value_start..].find('"')?;
            return Some(&attrs[value_start..value_start + len]);
        }
        offset = value_start;
    }
    None
}

fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}
