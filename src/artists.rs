//! Artist MBID → display name mapping, for labelling the final matrix.

use crate::decompress::Decompressor;
use crate::error::{PipelineError, PipelineResult};
use crate::table;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Build artist_mbid → name from an artist CSV with `artist_mbid` and `name`
/// columns. Rows missing either value are skipped; a repeated mbid keeps the
/// last name seen.
pub fn build_artist_mapping(artist_csv: &Path) -> PipelineResult<BTreeMap<String, String>> {
    let mut reader = table::open_reader(artist_csv, true)?;
    let headers = reader
        .byte_headers()
        .map_err(|e| PipelineError::csv(artist_csv, e))?
        .clone();
    let mbid_idx = table::column_index(&headers, "artist_mbid", artist_csv)?;
    let name_idx = table::column_index(&headers, "name", artist_csv)?;

    let mut mapping = BTreeMap::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| PipelineError::csv(artist_csv, e))?
    {
        let (Some(mbid), Some(name)) = (record.get(mbid_idx), record.get(name_idx)) else {
            continue;
        };
        if mbid.is_empty() || name.is_empty() {
            continue;
        }
        mapping.insert(
            String::from_utf8_lossy(mbid).into_owned(),
            String::from_utf8_lossy(name).into_owned(),
        );
    }
    Ok(mapping)
}

/// Write the mapping as pretty-printed JSON, creating the parent directory.
pub fn write_artist_mapping(mapping: &BTreeMap<String, String>, output: &Path) -> PipelineResult<()> {
    table::ensure_parent_dir(output)?;
    let json = serde_json::to_string_pretty(mapping).map_err(|source| PipelineError::Json {
        path: output.to_path_buf(),
        source,
    })?;
    std::fs::write(output, json).map_err(|e| PipelineError::io(output, e))
}

/// Decompress if needed, build the mapping and write it to `output`.
/// Returns the number of artists mapped.
pub fn export_artist_names(
    artist_file: &Path,
    output: &Path,
    decompressor: &Decompressor,
) -> PipelineResult<usize> {
    let source = decompressor.prepare(artist_file)?;
    table::validate_output_path(output, &[artist_file, source.as_path()])?;

    let mapping = build_artist_mapping(&source)?;
    info!("Built mapping for {} artists", mapping.len());
    write_artist_mapping(&mapping, output)?;
    info!("Mapping saved to {}", output.display());
    Ok(mapping.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_build_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let artists = dir.path().join("musicbrainz_artist.csv");
        fs::write(
            &artists,
            "artist_mbid,name,sort_name\n\
             a1,Björk,Björk\n\
             a2,,Nobody\n\
             ,Orphan,Orphan\n\
             a3,\"Crosby, Stills & Nash\",CSN\n\
             a1,Bjork,Bjork\n",
        )
        .unwrap();
        let output = dir.path().join("working/artist_mapping.json");

        let count = export_artist_names(&artists, &output, &Decompressor::default()).unwrap();
        assert_eq!(count, 2);

        let mapping: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(mapping["a1"], "Bjork");
        assert_eq!(mapping["a3"], "Crosby, Stills & Nash");
        assert!(!mapping.contains_key("a2"));
    }

    #[test]
    fn test_missing_name_column() {
        let dir = tempfile::tempdir().unwrap();
        let artists = dir.path().join("artists.csv");
        fs::write(&artists, "artist_mbid,title\na1,x\n").unwrap();
        let err = build_artist_mapping(&artists).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }
}
