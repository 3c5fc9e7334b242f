//! Annotation parsers, one per on-disk ground-truth grammar.
//!
//! Every parser has the [`ParseFn`] signature so the dataset index can store
//! it next to the annotation path and defer parsing to the consumer. A
//! parser never skips a bad line: the first malformed line aborts the whole
//! file with [`DatasetError::MalformedAnnotation`].

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use geo::Coord;
use serde_json::value::RawValue;
use tracing::instrument;

use crate::{
    record::{Orientation, PolygonRecord, MIN_POINTS},
    DatasetError, Result,
};

pub type ParseFn = fn(&Path) -> Result<Vec<PolygonRecord>>;

const BOM: char = '\u{feff}';

/// CTW1500: a count line followed by `x1,y1,...,xk,yk,"text"` lines.
#[instrument(level = "debug")]
pub fn parse_ctw1500(path: &Path) -> Result<Vec<PolygonRecord>> {
    parse_ctw1500_str(&read(path)?, path)
}

/// ICDAR 2013: `left top right bottom text` lines.
#[instrument(level = "debug")]
pub fn parse_ic13(path: &Path) -> Result<Vec<PolygonRecord>> {
    parse_ic13_str(&read(path)?, path)
}

/// ICDAR 2015: `x1,y1,x2,y2,x3,y3,x4,y4,text` lines.
#[instrument(level = "debug")]
pub fn parse_ic15(path: &Path) -> Result<Vec<PolygonRecord>> {
    parse_ic15_str(&read(path)?, path)
}

/// Records stored ready-made as a JSON array, returned as they are.
///
/// The file is decoded through the fixed [`PolygonRecord`] schema only, so
/// no object graph beyond points, tag and transcription can come out of it.
/// Files are still trusted to be of reasonable size.
#[instrument(level = "debug")]
pub fn parse_serialized(path: &Path) -> Result<Vec<PolygonRecord>> {
    parse_serialized_str(&read(path)?, path)
}

/// Writes `records` in the format [`parse_serialized`] reads.
pub fn write_serialized(path: &Path, records: &[PolygonRecord]) -> Result<()> {
    let file = File::create(path).map_err(|err| DatasetError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|err| DatasetError::io(path, err.into()))?;
    writer.flush().map_err(|err| DatasetError::io(path, err))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| DatasetError::io(path, err))
}

fn malformed(path: &Path, line: usize, content: &str, reason: impl Into<String>) -> DatasetError {
    let reason = reason.into();
    log::error!(
        "Malformed annotation {}:{line} ({reason}): {content:?}",
        path.display()
    );
    DatasetError::MalformedAnnotation {
        path: path.to_path_buf(),
        line,
        content: content.to_owned(),
        reason,
    }
}

/// Non-blank lines with their 1-based line numbers.
fn numbered_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

fn parse_int(field: &str) -> std::result::Result<i32, String> {
    let field = field.trim();
    field
        .parse()
        .map_err(|_| format!("coordinate {field:?} is not an integer"))
}

fn parse_points<'a>(
    fields: impl IntoIterator<Item = &'a str>,
) -> std::result::Result<Vec<Coord<i32>>, String> {
    let values = fields
        .into_iter()
        .map(parse_int)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if values.len() % 2 != 0 {
        return Err(format!("odd number of coordinates ({})", values.len()));
    }
    let points = values
        .chunks_exact(2)
        .map(|pair| Coord {
            x: pair[0],
            y: pair[1],
        })
        .collect::<Vec<_>>();
    if points.len() < MIN_POINTS {
        return Err(format!(
            "expected at least {MIN_POINTS} points, got {}",
            points.len()
        ));
    }
    Ok(points)
}

/// Removes one quote from each end, leaving quotes inside the text alone.
fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}

pub(crate) fn parse_ctw1500_str(content: &str, path: &Path) -> Result<Vec<PolygonRecord>> {
    let mut lines = numbered_lines(content);
    let (header_line, header) = lines
        .next()
        .ok_or_else(|| malformed(path, 0, "", "missing instance count"))?;
    let declared: usize = header.trim().parse().map_err(|_| {
        malformed(path, header_line, header, "instance count is not an integer")
    })?;

    let records = lines
        .map(|(number, line)| {
            let trimmed = line.trim();
            let (coords, text) = match trimmed.split_once(",\"") {
                Some((coords, text)) => (coords, strip_quotes(text)),
                None => (trimmed, ""),
            };
            let points = parse_points(coords.split(','))
                .map_err(|reason| malformed(path, number, line, reason))?;
            Ok(PolygonRecord::new(points, Orientation::Curved, text))
        })
        .collect::<Result<Vec<_>>>()?;

    if records.len() != declared {
        return Err(malformed(
            path,
            header_line,
            header,
            format!("declared {declared} instances, found {}", records.len()),
        ));
    }
    Ok(records)
}

pub(crate) fn parse_ic13_str(content: &str, path: &Path) -> Result<Vec<PolygonRecord>> {
    numbered_lines(content)
        .map(|(number, line)| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() != 5 {
                return Err(malformed(
                    path,
                    number,
                    line,
                    format!("expected 5 fields, got {}", fields.len()),
                ));
            }
            let bounds = fields[..4]
                .iter()
                .map(|field| parse_int(field))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|reason| malformed(path, number, line, reason))?;
            let (left, top, right, bottom) = (bounds[0], bounds[1], bounds[2], bounds[3]);
            let points = vec![
                Coord { x: left, y: top },
                Coord { x: right, y: top },
                Coord {
                    x: right,
                    y: bottom,
                },
                Coord { x: left, y: bottom },
            ];
            Ok(PolygonRecord::new(points, Orientation::Horizontal, fields[4]))
        })
        .collect()
}

pub(crate) fn parse_ic15_str(content: &str, path: &Path) -> Result<Vec<PolygonRecord>> {
    numbered_lines(content)
        .filter(|(_, line)| line.trim_matches(|c: char| c == BOM || c.is_whitespace()) != "")
        .map(|(number, line)| {
            let cleaned = line.replace(BOM, "");
            let fields = cleaned.trim().split(',').collect::<Vec<_>>();
            if fields.len() < 8 {
                return Err(malformed(
                    path,
                    number,
                    line,
                    format!("expected 8 coordinates, got {} fields", fields.len()),
                ));
            }
            let points = parse_points(fields[..8].iter().copied())
                .map_err(|reason| malformed(path, number, line, reason))?;
            let text = fields[8..].join(",");
            Ok(PolygonRecord::new(points, Orientation::Horizontal, text))
        })
        .collect()
}

/// 1-based line of `slice`, which must point into `content`.
fn line_of(content: &str, slice: &str) -> usize {
    let offset = (slice.as_ptr() as usize).saturating_sub(content.as_ptr() as usize);
    content[..offset.min(content.len())].matches('\n').count() + 1
}

pub(crate) fn parse_serialized_str(content: &str, path: &Path) -> Result<Vec<PolygonRecord>> {
    // Syntax first, then each element through the schema so a bad record
    // is reported where it starts.
    let elements: Vec<&RawValue> = serde_json::from_str(content).map_err(|err| {
        let line = err.line();
        let content = line
            .checked_sub(1)
            .and_then(|index| content.lines().nth(index))
            .unwrap_or_default();
        malformed(path, line, content, err.to_string())
    })?;

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            serde_json::from_str(element.get()).map_err(|err| {
                malformed(
                    path,
                    line_of(content, element.get()),
                    element.get(),
                    format!("record {index}: {err}"),
                )
            })
        })
        .collect()
}
