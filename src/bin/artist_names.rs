//! Build an artist MBID → name JSON mapping from a MusicBrainz artist dump
//!
//! Usage: artist-names <musicbrainz_artist.csv[.zst]> <artist_mapping.json>

use anyhow::{Context, Result};
use listen_matrix::artists::export_artist_names;
use listen_matrix::decompress::Decompressor;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: artist-names <musicbrainz_artist.csv> <artist_mapping.json>");
        eprintln!();
        eprintln!("Reads the artist_mbid and name columns and writes a JSON object");
        eprintln!("mapping each artist MBID to its name.");
        std::process::exit(1);
    }

    let artist_csv = Path::new(&args[1]);
    let output = Path::new(&args[2]);
    let start = Instant::now();

    let count = export_artist_names(artist_csv, output, &Decompressor::default())
        .with_context(|| format!("Failed to build artist mapping from {}", artist_csv.display()))?;

    println!(
        "Mapped {} artists to {} in {:.2}s",
        count,
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
