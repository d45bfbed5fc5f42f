//! Runs the four stages back to back: extract → filter → canonicalize → aggregate.
//!
//! Each stage finishes writing its output before the next one starts; the
//! only thing passed between stages is the file path.

use crate::aggregate::aggregate_listens;
use crate::config::PipelineConfig;
use crate::decompress::Decompressor;
use crate::error::PipelineResult;
use crate::extract::extract_listens;
use crate::filter::filter_mapping;
use crate::models::{PipelineStats, StageStats};
use crate::progress::Progress;
use crate::resolve::{canonicalize, ResolveInputs};
use std::time::Instant;
use tracing::info;

pub fn run_pipeline(
    config: &PipelineConfig,
    decompressor: &Decompressor,
    progress: Progress,
) -> PipelineResult<PipelineStats> {
    let start = Instant::now();
    let events_csv = config.events_csv();
    let filtered_csv = config.filtered_mapping_csv();
    let user_artist_csv = config.user_artist_csv();
    let counts_csv = config.user_artist_counts_csv();

    info!("Stage 1/4: extracting listens from {}", config.listens_path().display());
    let extract = extract_listens(&config.listens_path(), &events_csv, decompressor, progress)?;
    extract.log_phase("extract");

    info!("Stage 2/4: filtering {}", config.mapping_path().display());
    let filter = filter_mapping(
        &events_csv,
        &config.mapping_path(),
        &filtered_csv,
        &config.match_policy(),
        decompressor,
        progress,
    )?;
    filter.log_phase("filter");

    info!("Stage 3/4: canonicalizing to user-artist pairs");
    let redirect_path = config.redirect_path();
    let metadata_path = config.metadata_path();
    let resolve = canonicalize(
        ResolveInputs {
            events_csv: &events_csv,
            filtered_mapping_csv: &filtered_csv,
            redirect_file: &redirect_path,
            metadata_file: &metadata_path,
        },
        &user_artist_csv,
        config.duplicate_policy,
        decompressor,
        progress,
    )?;
    resolve.log_phase("canonicalize");

    info!("Stage 4/4: aggregating counts");
    let aggregate = aggregate_listens(&user_artist_csv, &counts_csv, progress)?;
    aggregate.log_phase("aggregate");

    Ok(PipelineStats {
        extract,
        filter,
        resolve,
        aggregate,
        elapsed_seconds: start.elapsed().as_secs_f64(),
    })
}
