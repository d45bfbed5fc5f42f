//! Core data models for the listen-matrix pipeline.
//!
//! Row types map one-to-one onto the CSV files exchanged between stages;
//! their field names are the CSV header names. Stats types are what each
//! stage reports when it finishes.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Row Models
// ============================================================================

/// One raw listen. Duplicates are meaningful and preserved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEvent {
    pub user_id: String,
    pub recording_msid: String,
}

/// A listen resolved to an artist; one per successfully resolved event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserArtistPair {
    pub user_id: String,
    pub artist_id: String,
}

/// Final matrix row, unique per (user_id, artist_id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserArtistCount {
    pub user_id: String,
    pub artist_id: String,
    pub listen_count: u64,
}

// ============================================================================
// Statistics
// ============================================================================

/// Shared reporting for stage stats: pretty JSON to the log or to a file.
pub trait StageStats: Serialize {
    /// Log stats as pretty JSON under a `[STATS:phase]` marker.
    fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    fn write_to_file(&self, path: &Path) -> PipelineResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|e| PipelineError::io(path, e))
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Lines read, including blank and malformed ones.
    pub total_lines: u64,
    pub extracted_events: u64,
    pub malformed_lines: u64,
    /// Well-formed records lacking user_id or recording_msid.
    pub missing_fields: u64,
    pub bytes_read: u64,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub unique_msids: u64,
    pub total_rows: u64,
    pub kept_rows: u64,
    /// Rows whose msid was observed but whose match_type was not accepted.
    pub rejected_quality: u64,
    /// Rows too short to carry recording_msid or match_type.
    pub short_rows: u64,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub total_events: u64,
    pub resolved_events: u64,
    /// Events whose msid had no accepted mbid.
    pub unresolved_no_mapping: u64,
    /// Events whose canonical mbid had no artist credit.
    pub unresolved_no_artist: u64,
    /// Resolved events that went through a canonical redirect.
    pub redirected_events: u64,
    pub mapping_entries: u64,
    pub redirect_entries: u64,
    pub metadata_entries: u64,
    /// Duplicate keys with differing values, summed over the three tables.
    pub conflicting_duplicates: u64,
}

impl ResolveStats {
    pub fn unresolved_events(&self) -> u64 {
        self.total_events - self.resolved_events
    }

    /// Resolution rate as a percentage
    pub fn resolve_rate(&self) -> f64 {
        if self.total_events == 0 {
            0.0
        } else {
            100.0 * self.resolved_events as f64 / self.total_events as f64
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub input_pairs: u64,
    pub unique_pairs: u64,
    pub unique_users: u64,
    pub unique_artists: u64,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub extract: ExtractStats,
    pub filter: FilterStats,
    pub resolve: ResolveStats,
    pub aggregate: AggregateStats,
    pub elapsed_seconds: f64,
}

impl StageStats for ExtractStats {}
impl StageStats for FilterStats {}
impl StageStats for ResolveStats {}
impl StageStats for AggregateStats {}
impl StageStats for PipelineStats {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rate() {
        let stats = ResolveStats {
            total_events: 4,
            resolved_events: 3,
            ..Default::default()
        };
        assert_eq!(stats.unresolved_events(), 1);
        assert!((stats.resolve_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(ResolveStats::default().resolve_rate(), 0.0);
    }

    #[test]
    fn test_write_stats_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = AggregateStats {
            input_pairs: 3,
            unique_pairs: 2,
            unique_users: 2,
            unique_artists: 1,
        };
        stats.write_to_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["unique_pairs"], 2);
        assert_eq!(value["input_pairs"], 3);
    }
}
