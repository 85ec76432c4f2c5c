//! Line-oriented CSV/TSV parsing for table previews.
//!
//! Input is split on line boundaries before parsing, so quoted fields cannot span lines.

use serde::{Deserialize, Serialize};

pub const MAX_PREVIEW_ROWS: usize = 10;
pub const MAX_PREVIEW_COLUMNS: usize = 8;

/// First rows and columns of a table artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Tab if the header line contains one, else comma.
pub fn sniff_delimiter(header: &str) -> u8 {
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Split one line into trimmed cells. Double-quoted fields may contain the delimiter,
/// and `""` inside quotes decodes to a single `"`.
pub fn parse_line(line: &str, delimiter: u8) -> Result<Vec<String>, csv::Error> {
    let line = strip_field_padding(line, delimiter);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(str::to_string).collect())
}

/// Drop whitespace around each field, outside quotes. `csv` only opens a quoted field on
/// the field's first byte, so `a, "b,c"` must reach it as `a,"b,c"`.
fn strip_field_padding(line: &str, delimiter: u8) -> String {
    let delimiter = char::from(delimiter);
    let is_pad = move |c: char| c != delimiter && c.is_whitespace();
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if in_quotes {
            out.push(c);
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    out.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
        } else if c == delimiter {
            let kept = out.trim_end_matches(is_pad).len();
            out.truncate(kept);
            out.push(c);
            at_field_start = true;
        } else if at_field_start && is_pad(c) {
            continue;
        } else {
            in_quotes = at_field_start && c == '"';
            at_field_start = false;
            out.push(c);
        }
    }
    if !in_quotes {
        let kept = out.trim_end_matches(is_pad).len();
        out.truncate(kept);
    }
    out
}

/// Headers from the first non-blank line, then up to [`MAX_PREVIEW_ROWS`] rows, every line
/// cut to [`MAX_PREVIEW_COLUMNS`] cells.
pub fn build_preview(text: &str) -> Result<TablePreview, csv::Error> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some((header, body)) = lines.split_first() else {
        return Ok(TablePreview::default());
    };
    let delimiter = sniff_delimiter(header);

    let mut headers = parse_line(header, delimiter)?;
    headers.truncate(MAX_PREVIEW_COLUMNS);

    let rows = body
        .iter()
        .take(MAX_PREVIEW_ROWS)
        .map(|line| {
            parse_line(line, delimiter).map(|mut row| {
                row.truncate(MAX_PREVIEW_COLUMNS);
                row
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TablePreview { headers, rows })
}
