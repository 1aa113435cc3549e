//! SpreadsheetML cell codec: worksheet parts to and from [`Sheet`] rows.
//!
//! The archive around the worksheets lives in [`super::package`]. The free functions here read or
//! write whole value-level [`Workbook`]s; the capture job goes through [`Package`] instead so
//! that sheets it does not replace are never reparsed.

use crate::domain::forecast::Cell;
use crate::workbook::package::Package;
use crate::workbook::{Sheet, Workbook};
use anyhow::{bail, ensure, Context, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Read, Seek, Write};
use std::path::Path;

pub(super) const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub(super) const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Sheet bounds, `A1:XFD1048576`.
pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLUMNS: usize = 16_384;

pub fn load(path: &Path) -> Result<Workbook> {
    Package::open(path)?
        .to_workbook()
        .with_context(|| format!("read workbook failed: {}", path.display()))
}

pub fn save(workbook: &Workbook, path: &Path) -> Result<()> {
    Package::from_workbook(workbook)?.save(path)
}

pub fn read_from<R: Read + Seek>(reader: R) -> Result<Workbook> {
    Package::read_from(reader)?.to_workbook()
}

pub fn write_to<W: Write + Seek>(workbook: &Workbook, writer: W) -> Result<W> {
    Package::from_workbook(workbook)?.write_to(writer)
}

pub(super) fn worksheet_xml(sheet: &Sheet) -> String {
    let mut out = format!(r#"{XML_DECL}<worksheet xmlns="{NS_MAIN}"><sheetData>"#);
    for (r, row) in sheet.rows.iter().enumerate() {
        let row_num = r + 1;
        out.push_str(&format!(r#"<row r="{row_num}">"#));
        for (c, cell) in row.iter().enumerate() {
            let cell_ref = format!("{}{row_num}", column_letters(c));
            match cell {
                Cell::Null => {}
                Cell::Number(n) if n.is_finite() => {
                    out.push_str(&format!(r#"<c r="{cell_ref}"><v>{n}</v></c>"#));
                }
                Cell::Number(_) => {}
                Cell::Bool(b) => {
                    out.push_str(&format!(r#"<c r="{cell_ref}" t="b"><v>{}</v></c>"#, u8::from(*b)));
                }
                Cell::Text(s) => {
                    out.push_str(&format!(
                        r#"<c r="{cell_ref}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                        escape(&strip_invalid_xml_chars(s))
                    ));
                }
            }
        }
        out.push_str("</row>");
    }
    out.push_str("</sheetData></worksheet>");
    out
}

/// Drops code points XML 1.0 cannot carry: C0 controls other than tab/LF/CR, and the
/// noncharacters U+FFFE and U+FFFF.
fn strip_invalid_xml_chars(s: &str) -> String {
    s.chars()
        .filter(|&c| match c {
            '\t' | '\n' | '\r' => true,
            '\u{FFFE}' | '\u{FFFF}' => false,
            c => c >= '\u{20}',
        })
        .collect()
}

/// Zero-based column index to spreadsheet letters (0 -> A, 26 -> AA).
pub fn column_letters(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// `"AB12"` to zero-based `(row, column)`. References outside `A1:XFD1048576` are errors.
pub fn parse_cell_ref(cell_ref: &str) -> Result<(usize, usize)> {
    let Some(split) = cell_ref.find(|c: char| c.is_ascii_digit()) else {
        bail!("bad cell reference: {cell_ref}");
    };
    let (letters, digits) = cell_ref.split_at(split);
    ensure!(
        !letters.is_empty() && letters.bytes().all(|b| b.is_ascii_alphabetic()),
        "bad cell reference: {cell_ref}"
    );

    let mut col: usize = 0;
    for b in letters.bytes() {
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add((b.to_ascii_uppercase() - b'A') as usize + 1))
            .filter(|&c| c <= MAX_COLUMNS)
            .with_context(|| format!("cell reference beyond column XFD: {cell_ref}"))?;
    }
    let row: usize = digits
        .parse()
        .with_context(|| format!("bad cell reference: {cell_ref}"))?;
    ensure!(
        (1..=MAX_ROWS).contains(&row),
        "cell reference row outside 1..={MAX_ROWS}: {cell_ref}"
    );
    Ok((row - 1, col - 1))
}

/// Attribute value looked up by local name, so `r:id` and `id` both match `b"id"`.
pub(super) fn attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == local {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

pub(super) fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" if phonetic_depth == 0 => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => out.push(current.take().unwrap_or_default()),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Default)]
struct PendingCell {
    row: usize,
    col: usize,
    kind: Option<String>,
    value: String,
}

pub(super) fn parse_worksheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<Cell>>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<Cell>> = Vec::new();

    let mut row_idx: Option<usize> = None;
    let mut next_col = 0usize;
    let mut pending: Option<PendingCell> = None;
    let mut capture = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = Some(row_start(&e, row_idx)?);
                    next_col = 0;
                }
                b"c" => {
                    let (row, col) = cell_position(&e, row_idx, next_col)?;
                    next_col = col + 1;
                    pending = Some(PendingCell {
                        row,
                        col,
                        kind: attr(&e, b"t")?,
                        value: String::new(),
                    });
                }
                b"rPh" => phonetic_depth += 1,
                b"v" => capture = true,
                b"t" if phonetic_depth == 0 => capture = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = Some(row_start(&e, row_idx)?);
                    next_col = 0;
                }
                b"c" => {
                    let (_, col) = cell_position(&e, row_idx, next_col)?;
                    next_col = col + 1;
                }
                _ => {}
            },
            Event::Text(t) if capture => {
                if let Some(p) = pending.as_mut() {
                    p.value.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"c" => {
                    if let Some(p) = pending.take() {
                        let cell = decode_cell(p.kind.as_deref(), &p.value, shared)?;
                        place(&mut rows, p.row, p.col, cell);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rows)
}

fn row_start(e: &BytesStart<'_>, previous: Option<usize>) -> Result<usize> {
    let n = match attr(e, b"r")? {
        Some(r) => r.parse().with_context(|| format!("bad row number: {r}"))?,
        None => previous.map_or(1, |p| p + 2),
    };
    ensure!((1..=MAX_ROWS).contains(&n), "row number outside 1..={MAX_ROWS}: {n}");
    Ok(n - 1)
}

fn cell_position(e: &BytesStart<'_>, row_idx: Option<usize>, next_col: usize) -> Result<(usize, usize)> {
    match attr(e, b"r")? {
        Some(r) => parse_cell_ref(&r),
        None => {
            ensure!(next_col < MAX_COLUMNS, "cell beyond column XFD without a reference");
            Ok((row_idx.unwrap_or(0), next_col))
        }
    }
}

fn decode_cell(kind: Option<&str>, value: &str, shared: &[String]) -> Result<Cell> {
    let cell = match kind {
        Some("s") => {
            let idx: usize = value
                .trim()
                .parse()
                .with_context(|| format!("bad shared string index: {value}"))?;
            let Some(s) = shared.get(idx) else {
                bail!("shared string index out of range: {idx}");
            };
            Cell::Text(s.clone())
        }
        Some("inlineStr") | Some("str") | Some("e") | Some("d") => Cell::Text(value.to_string()),
        Some("b") => Cell::Bool(value.trim() == "1"),
        _ if value.is_empty() => Cell::Null,
        _ => match value.trim().parse::<f64>() {
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Text(value.to_string()),
        },
    };
    Ok(cell)
}

/// `row` and `col` are already within the sheet bounds.
fn place(rows: &mut Vec<Vec<Cell>>, row: usize, col: usize, cell: Cell) {
    if rows.len() <= row {
        rows.resize_with(row + 1, Vec::new);
    }
    let r = &mut rows[row];
    if r.len() <= col {
        r.resize(col + 1, Cell::Null);
    }
    r[col] = cell;
}
