//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once at startup and passed by reference into
//! each stage. Values come from, in order of priority:
//!
//! 1. Command-line overrides
//! 2. TOML configuration file
//! 3. Built-in defaults

use crate::error::{PipelineError, PipelineResult};
use crate::filter::{MatchPolicy, DEFAULT_ACCEPTED_MATCH_TYPES};
use crate::lookup::DuplicatePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const EVENTS_CSV: &str = "userid-msid.csv";
pub const FILTERED_MAPPING_CSV: &str = "small_msid_mapping.csv";
pub const USER_ARTIST_CSV: &str = "userid-artist.csv";
pub const USER_ARTIST_COUNTS_CSV: &str = "userid-artist-counts.csv";

/// Number of records shown by `inspect` when not configured.
pub const DEFAULT_INSPECT_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding the raw dumps.
    pub raw_dir: PathBuf,
    /// Directory for intermediate and final CSVs.
    pub working_dir: PathBuf,
    /// Raw input file names, relative to `raw_dir` unless absolute.
    pub listens_file: PathBuf,
    pub mapping_file: PathBuf,
    pub redirect_file: PathBuf,
    pub metadata_file: PathBuf,
    pub accepted_match_types: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
    pub inspect_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("."),
            working_dir: PathBuf::from("working"),
            listens_file: PathBuf::from("listens.jsonl.zst"),
            mapping_file: PathBuf::from("listenbrainz_msid_mapping.csv.zst"),
            redirect_file: PathBuf::from("canonical_recording_redirect.csv.zst"),
            metadata_file: PathBuf::from("canonical_musicbrainz_data.csv.zst"),
            accepted_match_types: DEFAULT_ACCEPTED_MATCH_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            duplicate_policy: DuplicatePolicy::default(),
            inspect_lines: DEFAULT_INSPECT_LINES,
        }
    }
}

/// Command-line values that take priority over the TOML file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub raw_dir: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub accepted_match_types: Option<Vec<String>>,
    pub duplicate_policy: Option<DuplicatePolicy>,
}

impl PipelineConfig {
    pub fn from_toml_str(toml_str: &str, path: &Path) -> PipelineResult<Self> {
        let config: PipelineConfig = toml::from_str(toml_str).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Load from a TOML file, or use defaults when `path` is `None`, then
    /// apply `overrides`.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> PipelineResult<Self> {
        let mut config = match path {
            Some(path) => {
                let toml_str =
                    std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
                let config = Self::from_toml_str(&toml_str, path)?;
                tracing::info!("Loaded configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate(path.unwrap_or(Path::new("<command line>")))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(raw_dir) = overrides.raw_dir {
            self.raw_dir = raw_dir;
        }
        if let Some(working_dir) = overrides.working_dir {
            self.working_dir = working_dir;
        }
        if let Some(accepted) = overrides.accepted_match_types {
            self.accepted_match_types = accepted;
        }
        if let Some(policy) = overrides.duplicate_policy {
            self.duplicate_policy = policy;
        }
    }

    fn validate(&self, path: &Path) -> PipelineResult<()> {
        if self.accepted_match_types.iter().all(|m| m.trim().is_empty()) {
            return Err(PipelineError::Config {
                path: path.to_path_buf(),
                reason: "accepted_match_types must name at least one match type".to_string(),
            });
        }
        Ok(())
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy::new(
            self.accepted_match_types
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty()),
        )
    }

    fn raw(&self, file: &Path) -> PathBuf {
        self.raw_dir.join(file)
    }

    fn working(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    pub fn listens_path(&self) -> PathBuf {
        self.raw(&self.listens_file)
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.raw(&self.mapping_file)
    }

    pub fn redirect_path(&self) -> PathBuf {
        self.raw(&self.redirect_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.raw(&self.metadata_file)
    }

    pub fn events_csv(&self) -> PathBuf {
        self.working(EVENTS_CSV)
    }

    pub fn filtered_mapping_csv(&self) -> PathBuf {
        self.working(FILTERED_MAPPING_CSV)
    }

    pub fn user_artist_csv(&self) -> PathBuf {
        self.working(USER_ARTIST_CSV)
    }

    pub fn user_artist_counts_csv(&self) -> PathBuf {
        self.working(USER_ARTIST_COUNTS_CSV)
    }
}
