//! Mapping filter: cut the full msid→mbid candidate table down to the rows
//! the resolver can use.
//!
//! A candidate row is kept iff its `recording_msid` occurs in the extracted
//! events AND its `match_type` is accepted by the [`MatchPolicy`]. The
//! candidate table is streamed row by row and kept rows are written with
//! their field values unchanged, header included. Quoting is re-emitted by
//! the CSV writer, so a needlessly quoted field comes out bare.

use crate::decompress::Decompressor;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{FilterStats, ListenEvent};
use crate::progress::Progress;
use crate::table;
use rustc_hash::FxHashSet;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

pub const MSID_COLUMN: &str = "recording_msid";
pub const MATCH_TYPE_COLUMN: &str = "match_type";

/// Match qualities accepted when none are configured.
pub const DEFAULT_ACCEPTED_MATCH_TYPES: [&str; 2] = ["exact_match", "high_quality"];

/// Which candidate match qualities are trusted enough to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPolicy {
    accepted: FxHashSet<String>,
}

impl MatchPolicy {
    pub fn new<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, match_type: &[u8]) -> bool {
        std::str::from_utf8(match_type)
            .map(|m| self.accepted.contains(m))
            .unwrap_or(false)
    }

    /// Accepted match types, sorted for display.
    pub fn accepted(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.accepted.iter().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTED_MATCH_TYPES)
    }
}

/// Distinct recording_msid values of an extracted events CSV.
pub fn load_unique_msids(events_csv: &Path) -> PipelineResult<FxHashSet<String>> {
    let mut reader = table::open_reader(events_csv, false)?;
    let mut msids = FxHashSet::default();
    for row in reader.deserialize::<ListenEvent>() {
        let event = row.map_err(|e| PipelineError::csv(events_csv, e))?;
        msids.insert(event.recording_msid);
    }
    info!(
        "Loaded {} unique MSIDs from {}",
        msids.len(),
        events_csv.display()
    );
    Ok(msids)
}

/// Core filter over any candidate source and sink.
///
/// The header and kept rows keep their field values; only CSV quoting may
/// change. Rows are compared as bytes; a field that is not valid UTF-8 can
/// never match.
pub fn filter_candidates<R: Read, W: Write>(
    reader: &mut csv::Reader<R>,
    writer: &mut csv::Writer<W>,
    msids: &FxHashSet<String>,
    policy: &MatchPolicy,
    source: &Path,
    output: &Path,
    mut on_row: impl FnMut(u64),
) -> PipelineResult<FilterStats> {
    let headers = reader
        .byte_headers()
        .map_err(|e| PipelineError::csv(source, e))?
        .clone();
    let msid_idx = table::column_index(&headers, MSID_COLUMN, source)?;
    let match_idx = table::column_index(&headers, MATCH_TYPE_COLUMN, source)?;
    writer
        .write_byte_record(&headers)
        .map_err(|e| PipelineError::csv(output, e))?;

    let mut stats = FilterStats {
        unique_msids: msids.len() as u64,
        ..Default::default()
    };
    let mut row = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut row)
        .map_err(|e| PipelineError::csv(source, e))?
    {
        stats.total_rows += 1;
        on_row(stats.total_rows);

        let (Some(msid), Some(match_type)) = (row.get(msid_idx), row.get(match_idx)) else {
            stats.short_rows += 1;
            continue;
        };
        let observed = std::str::from_utf8(msid)
            .map(|m| msids.contains(m))
            .unwrap_or(false);
        if !observed {
            continue;
        }
        if !policy.accepts(match_type) {
            stats.rejected_quality += 1;
            continue;
        }
        writer
            .write_byte_record(&row)
            .map_err(|e| PipelineError::csv(output, e))?;
        stats.kept_rows += 1;
    }

    writer.flush().map_err(|e| PipelineError::io(output, e))?;
    Ok(stats)
}

/// Filter the candidate `mapping_file` (decompressing it if needed) down to
/// the msids of `events_csv` and the accepted match qualities.
pub fn filter_mapping(
    events_csv: &Path,
    mapping_file: &Path,
    output: &Path,
    policy: &MatchPolicy,
    decompressor: &Decompressor,
    progress: Progress,
) -> PipelineResult<FilterStats> {
    let source = decompressor.prepare(mapping_file)?;
    table::validate_output_path(output, &[events_csv, mapping_file, source.as_path()])?;

    let msids = load_unique_msids(events_csv)?;
    let mut reader = table::open_reader(&source, true)?;

    table::ensure_parent_dir(output)?;
    let file = std::fs::File::create(output).map_err(|e| PipelineError::io(output, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(std::io::BufWriter::new(file));

    let pb = progress.spinner("Filtering mapping file");
    let stats = filter_candidates(
        &mut reader,
        &mut writer,
        &msids,
        policy,
        &source,
        output,
        |n| {
            if n % 10_000 == 0 {
                pb.set_position(n);
            }
            progress.log_count("filter", n);
        },
    )?;
    pb.finish_with_message(format!(
        "Kept {} of {} mapping rows",
        stats.kept_rows, stats.total_rows
    ));

    info!(
        "Processed {} rows from {}; kept {} in {} (accepted match types: {:?})",
        stats.total_rows,
        source.display(),
        stats.kept_rows,
        output.display(),
        policy.accepted()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CANDIDATES: &str = "\
recording_msid,recording_mbid,match_type,extra
m1,b1,exact_match,x
m2,b2,high_quality,y
m1,b9,low_quality,z
m7,b7,exact_match,w
";

    fn msids(values: &[&str]) -> FxHashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn run(candidates: &str, observed: &[&str], policy: &MatchPolicy) -> (String, FilterStats) {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(candidates.as_bytes());
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(Vec::new());
        let stats = filter_candidates(
            &mut reader,
            &mut writer,
            &msids(observed),
            policy,
            Path::new("mapping.csv"),
            Path::new("out.csv"),
            |_| {},
        )
        .unwrap();
        (String::from_utf8(writer.into_inner().unwrap()).unwrap(), stats)
    }

    #[test]
    fn test_default_policy() {
        let policy = MatchPolicy::default();
        assert!(policy.accepts(b"exact_match"));
        assert!(policy.accepts(b"high_quality"));
        assert!(!policy.accepts(b"med_quality"));
        assert_eq!(policy.accepted(), vec!["exact_match", "high_quality"]);
    }

    #[test]
    fn test_double_predicate() {
        let (out, stats) = run(CANDIDATES, &["m1", "m2"], &MatchPolicy::default());
        assert_eq!(
            out,
            "recording_msid,recording_mbid,match_type,extra\nm1,b1,exact_match,x\nm2,b2,high_quality,y\n"
        );
        assert_eq!(stats.total_rows, 4);
        assert_eq!(stats.kept_rows, 2);
        assert_eq!(stats.rejected_quality, 1);
        assert_eq!(stats.unique_msids, 2);
    }

    #[test]
    fn test_restricted_policy_excludes_high_quality() {
        let policy = MatchPolicy::new(["exact_match"]);
        let (out, stats) = run(CANDIDATES, &["m1", "m2"], &policy);
        assert!(!out.contains("high_quality"));
        assert!(out.contains("m1,b1,exact_match,x"));
        assert_eq!(stats.kept_rows, 1);
    }

    #[test]
    fn test_emitted_rows_satisfy_both_predicates() {
        let policy = MatchPolicy::default();
        let observed = ["m1", "m7"];
        let (out, _) = run(CANDIDATES, &observed, &policy);
        for line in out.lines().skip(1) {
            let fields: Vec<&str> = line.split(',').collect();
            assert!(observed.contains(&fields[0]));
            assert!(policy.accepts(fields[2].as_bytes()));
        }
    }

    #[test]
    fn test_field_values_preserved_with_quoting() {
        let candidates = "recording_msid,match_type,title\nm1,exact_match,\"Hello, World\"\n";
        let (out, _) = run(candidates, &["m1"], &MatchPolicy::default());
        assert_eq!(out, "recording_msid,match_type,title\nm1,exact_match,\"Hello, World\"\n");
    }

    #[test]
    fn test_redundant_quotes_are_dropped() {
        let candidates = "recording_msid,recording_mbid,match_type\n\"m1\",\"b1\",exact_match\n";
        let (out, stats) = run(candidates, &["m1"], &MatchPolicy::default());
        assert_eq!(stats.kept_rows, 1);
        assert_eq!(out, "recording_msid,recording_mbid,match_type\nm1,b1,exact_match\n");
    }

    #[test]
    fn test_short_rows_counted() {
        let candidates = "recording_msid,recording_mbid,match_type\nm1,b1\nm1,b1,exact_match\n";
        let (_, stats) = run(candidates, &["m1"], &MatchPolicy::default());
        assert_eq!(stats.short_rows, 1);
        assert_eq!(stats.kept_rows, 1);
    }

    #[test]
    fn test_missing_match_type_column_is_fatal() {
        let mut reader = csv::Reader::from_reader("recording_msid,recording_mbid\nm1,b1\n".as_bytes());
        let mut writer = csv::Writer::from_writer(Vec::new());
        let result = filter_candidates(
            &mut reader,
            &mut writer,
            &msids(&["m1"]),
            &MatchPolicy::default(),
            Path::new("mapping.csv"),
            Path::new("out.csv"),
            |_| {},
        );
        assert!(matches!(result, Err(PipelineError::MissingColumn { .. })));
    }

    #[test]
    fn test_filter_mapping_files() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("userid-msid.csv");
        fs::write(&events, "user_id,recording_msid\nu1,m1\nu2,m1\nu2,m2\n").unwrap();
        let mapping = dir.path().join("msid_mapping.csv.zst");
        fs::write(&mapping, zstd::encode_all(CANDIDATES.as_bytes(), 3).unwrap()).unwrap();
        let output = dir.path().join("working/small_msid_mapping.csv");

        let stats = filter_mapping(
            &events,
            &mapping,
            &output,
            &MatchPolicy::default(),
            &Decompressor::default(),
            Progress::hidden(),
        )
        .unwrap();

        assert_eq!(stats.unique_msids, 2);
        assert_eq!(stats.kept_rows, 2);
        let written = fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("recording_msid,recording_mbid,match_type,extra\n"));
        assert!(!written.contains("m7"));
    }
}
