//! CSV file helpers shared by all stages.

use crate::error::{PipelineError, PipelineResult};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Open a headed CSV file for reading.
///
/// `flexible` allows ragged rows, which large external dumps occasionally
/// contain; pipeline-produced files are read strictly.
pub fn open_reader(path: &Path, flexible: bool) -> PipelineResult<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(flexible)
        .from_reader(file))
}

/// Create (or truncate) a CSV output file, creating its parent directory,
/// and write `header` as its first row.
///
/// Headers are always written explicitly so that an output with no rows is
/// still a valid headed file.
pub fn create_writer<H: AsRef<[u8]>>(
    path: &Path,
    header: &[H],
) -> PipelineResult<csv::Writer<BufWriter<File>>> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    writer
        .write_record(header)
        .map_err(|e| PipelineError::csv(path, e))?;
    Ok(writer)
}

pub fn ensure_parent_dir(path: &Path) -> PipelineResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Position of `column` in a header row, or a fatal missing-column error.
pub fn column_index(
    headers: &csv::ByteRecord,
    column: &str,
    path: &Path,
) -> PipelineResult<usize> {
    headers
        .iter()
        .position(|h| h == column.as_bytes())
        .ok_or_else(|| PipelineError::missing_column(path, column))
}

/// Refuse to write an output over any of the stage's inputs.
///
/// Paths are compared after canonicalization when both exist, so
/// `./work/a.csv` and `work/a.csv` are recognised as the same file.
pub fn validate_output_path(output: &Path, inputs: &[&Path]) -> PipelineResult<()> {
    let resolved = resolve(output);
    for input in inputs {
        if resolved == resolve(input) {
            return Err(PipelineError::OutputIsInput {
                output: output.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writer_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working/nested/out.csv");
        let mut writer = create_writer(&path, &["user_id", "artist_id"]).unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "user_id,artist_id\n");
    }

    #[test]
    fn test_missing_input_names_path() {
        let err = open_reader(Path::new("/nonexistent/userid-msid.csv"), false).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/userid-msid.csv"));
    }

    #[test]
    fn test_column_index() {
        let headers = csv::ByteRecord::from(vec!["recording_msid", "recording_mbid", "match_type"]);
        let path = Path::new("mapping.csv");
        assert_eq!(column_index(&headers, "match_type", path).unwrap(), 2);
        let err = column_index(&headers, "artist_mbids", path).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn test_output_equals_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("userid-msid.csv");
        fs::write(&input, "user_id,recording_msid\n").unwrap();
        let relative_twin = dir.path().join("./userid-msid.csv");

        assert!(validate_output_path(&relative_twin, &[&input]).is_err());
        assert!(validate_output_path(&dir.path().join("out.csv"), &[&input]).is_ok());
    }
}
