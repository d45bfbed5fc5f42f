//! Event extraction: line-delimited JSON listens → (user_id, recording_msid) CSV.
//!
//! Lines are parsed in parallel batches and written back in input order, so
//! the output is identical to a sequential pass. Malformed lines are logged
//! with their line number and skipped.

use crate::decompress::Decompressor;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ExtractStats, ListenEvent};
use crate::progress::{Progress, LOG_INTERVAL_BYTES};
use crate::table;
use rayon::prelude::*;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

/// Lines parsed per parallel batch.
pub const PARSE_BATCH_LINES: usize = 64 * 1024;

/// Result of parsing one raw line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Event(ListenEvent),
    /// Valid JSON, but user_id or recording_msid is absent, null or empty.
    MissingFields,
    Blank,
    Malformed(String),
}

/// Render a JSON field as an id, if it carries one.
/// Strings must be non-empty; numbers are rendered in decimal.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_listen_line(line: &[u8]) -> LineOutcome {
    let line = line.trim_ascii();
    if line.is_empty() {
        return LineOutcome::Blank;
    }
    let record: Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => return LineOutcome::Malformed(e.to_string()),
    };
    let Value::Object(fields) = record else {
        return LineOutcome::MissingFields;
    };
    match (
        id_field(fields.get("user_id")),
        id_field(fields.get("recording_msid")),
    ) {
        (Some(user_id), Some(recording_msid)) => LineOutcome::Event(ListenEvent {
            user_id,
            recording_msid,
        }),
        _ => LineOutcome::MissingFields,
    }
}

/// Read up to `max_lines` raw lines. Returns the bytes consumed.
fn read_batch<R: BufRead>(
    reader: &mut R,
    batch: &mut Vec<Vec<u8>>,
    max_lines: usize,
    source: &Path,
) -> PipelineResult<u64> {
    batch.clear();
    let mut consumed = 0u64;
    while batch.len() < max_lines {
        let mut line = Vec::new();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| PipelineError::io(source, e))?;
        if n == 0 {
            break;
        }
        consumed += n as u64;
        batch.push(line);
    }
    Ok(consumed)
}

/// Core extraction loop over any line source and CSV sink.
///
/// `on_bytes` is called after every batch with the number of bytes consumed.
pub fn extract_events<R: BufRead, W: Write>(
    mut reader: R,
    writer: &mut csv::Writer<W>,
    source: &Path,
    output: &Path,
    mut on_bytes: impl FnMut(u64),
) -> PipelineResult<ExtractStats> {
    let mut stats = ExtractStats::default();
    let mut batch = Vec::with_capacity(PARSE_BATCH_LINES);

    loop {
        let consumed = read_batch(&mut reader, &mut batch, PARSE_BATCH_LINES, source)?;
        if batch.is_empty() {
            break;
        }
        let outcomes: Vec<LineOutcome> = batch.par_iter().map(|l| parse_listen_line(l)).collect();

        for outcome in outcomes {
            stats.total_lines += 1;
            match outcome {
                LineOutcome::Event(event) => {
                    writer
                        .serialize(&event)
                        .map_err(|e| PipelineError::csv(output, e))?;
                    stats.extracted_events += 1;
                }
                LineOutcome::MissingFields => stats.missing_fields += 1,
                LineOutcome::Blank => {}
                LineOutcome::Malformed(err) => {
                    warn!("Error parsing line {}: {}", stats.total_lines, err);
                    stats.malformed_lines += 1;
                }
            }
        }
        stats.bytes_read += consumed;
        on_bytes(consumed);
    }

    writer.flush().map_err(|e| PipelineError::io(output, e))?;
    Ok(stats)
}

/// Extract listen events from `input` (decompressing it first if needed)
/// into a `user_id,recording_msid` CSV at `output`.
pub fn extract_listens(
    input: &Path,
    output: &Path,
    decompressor: &Decompressor,
    progress: Progress,
) -> PipelineResult<ExtractStats> {
    let source = decompressor.prepare(input)?;
    table::validate_output_path(output, &[input, source.as_path()])?;

    let file = File::open(&source).map_err(|e| PipelineError::io(&source, e))?;
    let total_size = file
        .metadata()
        .map_err(|e| PipelineError::io(&source, e))?
        .len();

    let mut writer = table::create_writer(output, &["user_id", "recording_msid"])?;

    let pb = progress.bytes_bar(total_size, "Extracting listens");
    let mut position = 0u64;
    let stats = extract_events(BufReader::new(file), &mut writer, &source, output, |n| {
        let previous = position;
        position += n;
        pb.inc(n);
        progress.log_progress("extract", previous, position, total_size, LOG_INTERVAL_BYTES);
    })?;
    pb.finish_with_message(format!("Extracted {} listens", stats.extracted_events));

    info!(
        "Finished processing {} lines; extracted {} valid records to {} ({} malformed, {} missing fields)",
        stats.total_lines,
        stats.extracted_events,
        output.display(),
        stats.malformed_lines,
        stats.missing_fields
    );
    Ok(stats)
}

/// One record shown by [`inspect`].
#[derive(Debug)]
pub struct InspectedLine {
    pub line_number: u64,
    pub record: Result<Value, String>,
}

/// Parse the first `num_lines` lines of an event log for a quick look at
/// its structure. Stops early at end of file or at the first blank line.
pub fn inspect(
    input: &Path,
    num_lines: usize,
    decompressor: &Decompressor,
) -> PipelineResult<Vec<InspectedLine>> {
    let source = decompressor.prepare(input)?;
    let file = File::open(&source).map_err(|e| PipelineError::io(&source, e))?;
    let mut reader = BufReader::new(file);

    let mut lines = Vec::new();
    read_batch(&mut reader, &mut lines, num_lines, &source)?;

    Ok(lines
        .iter()
        .map(|l| l.trim_ascii())
        .take_while(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| InspectedLine {
            line_number: i as u64 + 1,
            record: serde_json::from_slice(l).map_err(|e| e.to_string()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn event(user_id: &str, msid: &str) -> LineOutcome {
        LineOutcome::Event(ListenEvent {
            user_id: user_id.to_string(),
            recording_msid: msid.to_string(),
        })
    }

    fn run(input: &str) -> (String, ExtractStats) {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        let stats = extract_events(
            input.as_bytes(),
            &mut writer,
            Path::new("listens.jsonl"),
            Path::new("out.csv"),
            |_| {},
        )
        .unwrap();
        let bytes = writer.into_inner().unwrap();
        (String::from_utf8(bytes).unwrap(), stats)
    }

    #[test]
    fn test_parse_valid_line() {
        let line = br#"{"user_id": "u1", "recording_msid": "m1", "listened_at": 1}"#;
        assert_eq!(parse_listen_line(line), event("u1", "m1"));
    }

    #[test]
    fn test_parse_numeric_user_id() {
        let line = br#"{"user_id": 42, "recording_msid": "m1"}"#;
        assert_eq!(parse_listen_line(line), event("42", "m1"));
    }

    #[test]
    fn test_parse_missing_or_empty_fields() {
        assert_eq!(
            parse_listen_line(br#"{"user_id": "u1"}"#),
            LineOutcome::MissingFields
        );
        assert_eq!(
            parse_listen_line(br#"{"user_id": "", "recording_msid": "m1"}"#),
            LineOutcome::MissingFields
        );
        assert_eq!(
            parse_listen_line(br#"{"user_id": "u1", "recording_msid": null}"#),
            LineOutcome::MissingFields
        );
        assert_eq!(parse_listen_line(b"[1, 2]"), LineOutcome::MissingFields);
    }

    #[test]
    fn test_parse_blank_and_malformed() {
        assert_eq!(parse_listen_line(b"   \n"), LineOutcome::Blank);
        assert!(matches!(
            parse_listen_line(b"{\"user_id\": "),
            LineOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_listen_line(b"{\"user_id\": \"\xff\"}"),
            LineOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_extract_preserves_order_and_duplicates() {
        let input = concat!(
            "{\"user_id\": \"u2\", \"recording_msid\": \"m9\"}\n",
            "not json\n",
            "{\"user_id\": \"u1\", \"recording_msid\": \"m1\"}\n",
            "{\"user_id\": \"u1\"}\n",
            "\n",
            "{\"user_id\": \"u2\", \"recording_msid\": \"m9\"}",
        );
        let (csv, stats) = run(input);
        assert_eq!(csv, "u2,m9\nu1,m1\nu2,m9\n");
        assert_eq!(stats.total_lines, 6);
        assert_eq!(stats.extracted_events, 3);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.missing_fields, 1);
        assert_eq!(stats.bytes_read, input.len() as u64);
    }

    #[test]
    fn test_extract_across_batches() {
        let lines = PARSE_BATCH_LINES + 10;
        let input: String = (0..lines)
            .map(|i| format!("{{\"user_id\": \"u{}\", \"recording_msid\": \"m{}\"}}\n", i, i))
            .collect();
        let (csv, stats) = run(&input);
        assert_eq!(stats.extracted_events, lines as u64);
        let last = csv.lines().last().unwrap();
        assert_eq!(last, format!("u{},m{}", lines - 1, lines - 1));
    }

    #[test]
    fn test_extract_listens_compressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("1.listens.zst");
        let raw = "{\"user_id\": \"u1\", \"recording_msid\": \"m1\"}\n{bad\n";
        fs::write(&input, zstd::encode_all(raw.as_bytes(), 3).unwrap()).unwrap();
        let output = dir.path().join("working/userid-msid.csv");

        let stats =
            extract_listens(&input, &output, &Decompressor::default(), Progress::hidden()).unwrap();
        assert_eq!(stats.extracted_events, 1);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "user_id,recording_msid\nu1,m1\n"
        );
        assert!(dir.path().join("1.listens").exists());
    }

    #[test]
    fn test_extract_listens_empty_input_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("listens.jsonl");
        fs::write(&input, "").unwrap();
        let output = dir.path().join("userid-msid.csv");

        extract_listens(&input, &output, &Decompressor::default(), Progress::hidden()).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "user_id,recording_msid\n");
    }

    #[test]
    fn test_inspect_reports_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("listens.jsonl");
        fs::write(&input, "{\"user_id\": \"u1\"}\n{oops\n{\"a\": 1}\n{\"b\": 2}\n").unwrap();

        let lines = inspect(&input, 3, &Decompressor::default()).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].record.is_ok());
        assert_eq!(lines[1].line_number, 2);
        assert!(lines[1].record.is_err());
    }
}
