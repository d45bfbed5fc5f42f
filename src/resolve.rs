//! Canonical resolution: listen events → (user_id, artist_id) pairs.
//!
//! Each event goes through three lookups:
//!
//! ```text
//! recording_msid --[MsidMbidMapping]--> recording_mbid      miss: skipped, no mapping
//! recording_mbid --[RedirectMap]------> canonical_mbid      miss: mbid is canonical
//! canonical_mbid --[ArtistMetadata]---> artist_id           miss: skipped, no artist
//! ```
//!
//! Misses are silent per record and counted in [`ResolveStats`]. Resolution
//! depends only on the three tables and the event itself.

use crate::decompress::Decompressor;
use crate::error::{PipelineError, PipelineResult};
use crate::lookup::{ArtistMetadata, DuplicatePolicy, LookupTable, MsidMbidMapping, RedirectMap};
use crate::models::{ListenEvent, ResolveStats, UserArtistPair};
use crate::progress::Progress;
use crate::table;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of resolving one listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        pair: UserArtistPair,
        redirected: bool,
    },
    NoMapping,
    NoArtist,
}

/// The three resolution tables, loaded for one run.
#[derive(Debug, Default)]
pub struct Resolver {
    pub mapping: MsidMbidMapping,
    pub redirects: RedirectMap,
    pub metadata: ArtistMetadata,
}

impl Resolver {
    pub fn new(mapping: MsidMbidMapping, redirects: RedirectMap, metadata: ArtistMetadata) -> Self {
        Self {
            mapping,
            redirects,
            metadata,
        }
    }

    pub fn resolve(&self, event: &ListenEvent) -> Resolution {
        let Some(mbid) = self.mapping.mbid(&event.recording_msid) else {
            return Resolution::NoMapping;
        };
        let canonical = self.redirects.canonical(mbid);
        match self.metadata.artist(canonical) {
            Some(artist) => Resolution::Resolved {
                pair: UserArtistPair {
                    user_id: event.user_id.clone(),
                    artist_id: artist.to_string(),
                },
                redirected: canonical != mbid,
            },
            None => Resolution::NoArtist,
        }
    }

    /// Resolve one event and account for it in `stats`.
    fn record(&self, event: &ListenEvent, stats: &mut ResolveStats) -> Option<UserArtistPair> {
        stats.total_events += 1;
        match self.resolve(event) {
            Resolution::Resolved { pair, redirected } => {
                stats.resolved_events += 1;
                if redirected {
                    stats.redirected_events += 1;
                }
                Some(pair)
            }
            Resolution::NoMapping => {
                stats.unresolved_no_mapping += 1;
                None
            }
            Resolution::NoArtist => {
                stats.unresolved_no_artist += 1;
                None
            }
        }
    }

    /// Stats with the table sizes filled in and no events counted yet.
    fn table_stats(&self) -> ResolveStats {
        ResolveStats {
            mapping_entries: self.mapping.0.len() as u64,
            redirect_entries: self.redirects.0.len() as u64,
            metadata_entries: self.metadata.0.len() as u64,
            conflicting_duplicates: self.mapping.0.conflicts()
                + self.redirects.0.conflicts()
                + self.metadata.0.conflicts(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Table Loading
// ============================================================================

/// Read two named columns of a headed CSV, calling `row` for each record.
fn load_pairs(
    path: &Path,
    key_column: &str,
    value_column: &str,
    mut row: impl FnMut(&str, &str),
) -> PipelineResult<()> {
    let mut reader = table::open_reader(path, true)?;
    let headers = reader
        .byte_headers()
        .map_err(|e| PipelineError::csv(path, e))?
        .clone();
    let key_idx = table::column_index(&headers, key_column, path)?;
    let value_idx = table::column_index(&headers, value_column, path)?;

    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| PipelineError::csv(path, e))?
    {
        // Invalid UTF-8 is replaced rather than failing the whole table.
        let key = record.get(key_idx).map(String::from_utf8_lossy);
        let value = record.get(value_idx).map(String::from_utf8_lossy);
        if let (Some(key), Some(value)) = (key, value) {
            row(&*key, &*value);
        }
    }
    Ok(())
}

fn report_conflicts(table: &LookupTable, name: &str, policy: DuplicatePolicy) {
    if table.conflicts() > 0 {
        warn!(
            "{} has {} duplicate keys with differing values (resolved by {:?})",
            name,
            table.conflicts(),
            policy
        );
    }
}

/// Load the filtered msid → mbid mapping.
pub fn load_msid_mapping(path: &Path, policy: DuplicatePolicy) -> PipelineResult<MsidMbidMapping> {
    let mut table = LookupTable::new(policy);
    load_pairs(path, "recording_msid", "recording_mbid", |k, v| {
        table.insert(k, v);
    })?;
    info!(
        "Loaded {} MSID-to-MBID mappings from {}",
        table.len(),
        path.display()
    );
    report_conflicts(&table, "MSID mapping", policy);
    Ok(MsidMbidMapping(table))
}

/// Load the canonical redirect table (`recording_mbid` → `canonical_recording_mbid`).
pub fn load_canonical_redirect(path: &Path, policy: DuplicatePolicy) -> PipelineResult<RedirectMap> {
    let mut table = LookupTable::new(policy);
    load_pairs(path, "recording_mbid", "canonical_recording_mbid", |k, v| {
        table.insert(k, v);
    })?;
    info!(
        "Loaded {} canonical redirects from {}",
        table.len(),
        path.display()
    );
    report_conflicts(&table, "Canonical redirect", policy);
    Ok(RedirectMap(table))
}

/// Load canonical metadata, keeping the first credited artist per recording.
pub fn load_canonical_metadata(
    path: &Path,
    policy: DuplicatePolicy,
) -> PipelineResult<ArtistMetadata> {
    let mut metadata = ArtistMetadata(LookupTable::new(policy));
    load_pairs(path, "recording_mbid", "artist_mbids", |k, v| {
        metadata.insert_credit(k, v);
    })?;
    info!(
        "Loaded artist metadata for {} recordings from {}",
        metadata.0.len(),
        path.display()
    );
    report_conflicts(&metadata.0, "Canonical metadata", policy);
    Ok(metadata)
}

// ============================================================================
// Stage Entry Point
// ============================================================================

/// Stream events from `reader` through `resolver` into `writer`.
pub fn resolve_events<R: std::io::Read, W: Write>(
    resolver: &Resolver,
    reader: &mut csv::Reader<R>,
    writer: &mut csv::Writer<W>,
    source: &Path,
    output: &Path,
    mut on_event: impl FnMut(u64),
) -> PipelineResult<ResolveStats> {
    let mut stats = resolver.table_stats();
    for row in reader.deserialize::<ListenEvent>() {
        let event = row.map_err(|e| PipelineError::csv(source, e))?;
        if let Some(pair) = resolver.record(&event, &mut stats) {
            writer
                .serialize(&pair)
                .map_err(|e| PipelineError::csv(output, e))?;
        }
        on_event(stats.total_events);
    }
    writer.flush().map_err(|e| PipelineError::io(output, e))?;
    Ok(stats)
}

/// Input files of the canonicalize stage.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInputs<'a> {
    pub events_csv: &'a Path,
    pub filtered_mapping_csv: &'a Path,
    pub redirect_file: &'a Path,
    pub metadata_file: &'a Path,
}

/// Join events with the filtered mapping, redirects and metadata and write
/// `user_id,artist_id` rows to `output`.
pub fn canonicalize(
    inputs: ResolveInputs<'_>,
    output: &Path,
    policy: DuplicatePolicy,
    decompressor: &Decompressor,
    progress: Progress,
) -> PipelineResult<ResolveStats> {
    let redirect_file = decompressor.prepare(inputs.redirect_file)?;
    let metadata_file = decompressor.prepare(inputs.metadata_file)?;
    table::validate_output_path(
        output,
        &[
            inputs.events_csv,
            inputs.filtered_mapping_csv,
            inputs.redirect_file,
            inputs.metadata_file,
            redirect_file.as_path(),
            metadata_file.as_path(),
        ],
    )?;

    let resolver = Resolver::new(
        load_msid_mapping(inputs.filtered_mapping_csv, policy)?,
        load_canonical_redirect(&redirect_file, policy)?,
        load_canonical_metadata(&metadata_file, policy)?,
    );

    let mut reader = table::open_reader(inputs.events_csv, false)?;
    let mut writer = table::create_writer(output, &["user_id", "artist_id"])?;

    let pb = progress.spinner("Processing user events");
    let stats = resolve_events(
        &resolver,
        &mut reader,
        &mut writer,
        inputs.events_csv,
        output,
        |n| {
            if n % 10_000 == 0 {
                pb.set_position(n);
            }
            progress.log_count("canonicalize", n);
        },
    )?;
    pb.finish_with_message(format!(
        "Converted {} of {} events",
        stats.resolved_events, stats.total_events
    ));

    info!(
        "Processed {} user events; converted {} events to user-artist pairs ({:.1}%); {} unresolved ({} without mapping, {} without artist)",
        stats.total_events,
        stats.resolved_events,
        stats.resolve_rate(),
        stats.unresolved_events(),
        stats.unresolved_no_mapping,
        stats.unresolved_no_artist
    );
    Ok(stats)
}
