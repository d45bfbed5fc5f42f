//! Cached on-disk decompression of compressed inputs.
//!
//! A [`Decompressor`] holds one [`Decoder`] per file extension. Preparing a
//! path whose extension has a decoder yields the sibling path with that
//! extension removed (`listens.jsonl.zst` → `listens.jsonl`). The sibling is
//! only produced when it does not exist yet, so repeated runs decode once.

use crate::error::{PipelineError, PipelineResult};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Largest zstd window accepted when decoding (2 GiB, `zstd --long=31`).
const ZSTD_WINDOW_LOG_MAX: u32 = 31;

/// A codec that can expand one compressed file into a plain file.
pub trait Decoder: Send + Sync {
    /// File extension handled by this decoder, without the leading dot.
    fn extension(&self) -> &str;

    /// Decode `source` into `destination`, which does not exist yet.
    fn decode(&self, source: &Path, destination: &Path) -> PipelineResult<()>;
}

/// In-process zstd decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdDecoder;

impl Decoder for ZstdDecoder {
    fn extension(&self) -> &str {
        "zst"
    }

    fn decode(&self, source: &Path, destination: &Path) -> PipelineResult<()> {
        let input = File::open(source).map_err(|e| PipelineError::io(source, e))?;
        let mut decoder =
            zstd::stream::read::Decoder::new(input).map_err(|e| decode_error(source, e))?;
        decoder
            .window_log_max(ZSTD_WINDOW_LOG_MAX)
            .map_err(|e| decode_error(source, e))?;

        let output = File::create(destination).map_err(|e| PipelineError::io(destination, e))?;
        let mut writer = BufWriter::new(output);
        io::copy(&mut decoder, &mut writer).map_err(|e| decode_error(source, e))?;
        writer.flush().map_err(|e| PipelineError::io(destination, e))?;
        Ok(())
    }
}

/// Decoder that runs an external program and captures its stdout.
///
/// The source path is appended as the last argument, so the program must
/// write the decoded stream to stdout (`zstd -dc`, `unzstd -c`, `gzip -dc`).
/// A program that exits cleanly but prints nothing for a non-empty input is
/// treated as a failed decode.
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    extension: String,
    program: String,
    args: Vec<String>,
}

impl CommandDecoder {
    pub fn new(extension: &str, program: &str, args: &[&str]) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a whitespace-separated command line such as `"zstd -dc"`.
    pub fn from_command_line(extension: &str, command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        let args: Vec<&str> = parts.collect();
        Some(Self::new(extension, program, &args))
    }
}

impl Decoder for CommandDecoder {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn decode(&self, source: &Path, destination: &Path) -> PipelineResult<()> {
        let output = File::create(destination).map_err(|e| PipelineError::io(destination, e))?;
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .status()
            .map_err(|e| PipelineError::Decode {
                path: source.to_path_buf(),
                reason: format!("could not run '{}': {}", self.program, e),
            })?;

        if !status.success() {
            return Err(PipelineError::Decode {
                path: source.to_path_buf(),
                reason: format!("'{}' exited with {}", self.program, status),
            });
        }

        let written = file_len(destination)?;
        if written == 0 && file_len(source)? > 0 {
            return Err(PipelineError::Decode {
                path: source.to_path_buf(),
                reason: format!(
                    "'{}' wrote nothing to stdout; use a command that decodes to stdout such as 'zstd -dc'",
                    self.program
                ),
            });
        }
        Ok(())
    }
}

fn file_len(path: &Path) -> PipelineResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| PipelineError::io(path, e))
}

fn decode_error(path: &Path, e: io::Error) -> PipelineError {
    PipelineError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Registry of decoders keyed by file extension.
pub struct Decompressor {
    decoders: Vec<Box<dyn Decoder>>,
}

impl Decompressor {
    /// A decompressor that knows no codecs; every path is returned unchanged.
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Register a decoder. A later decoder for the same extension replaces
    /// the earlier one.
    pub fn with_decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoders
            .retain(|d| !d.extension().eq_ignore_ascii_case(decoder.extension()));
        self.decoders.push(Box::new(decoder));
        self
    }

    fn decoder_for(&self, path: &Path) -> Option<&dyn Decoder> {
        let ext = path.extension()?.to_str()?;
        self.decoders
            .iter()
            .find(|d| d.extension().eq_ignore_ascii_case(ext))
            .map(|d| d.as_ref())
    }

    /// Return a readable plain path for `path`, decoding it first if needed.
    ///
    /// Decoding goes through a `.partial` sibling that is renamed into place
    /// only on success. A decoder that creates the sibling itself is an
    /// error; that file is never replaced.
    pub fn prepare(&self, path: &Path) -> PipelineResult<PathBuf> {
        let Some(decoder) = self.decoder_for(path) else {
            return Ok(path.to_path_buf());
        };
        let target = path.with_extension("");
        if target.exists() {
            debug!("Using existing decompressed file {}", target.display());
            return Ok(target);
        }
        if !path.exists() {
            return Err(PipelineError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "compressed input not found"),
            ));
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        info!("Decompressing {} to {}", path.display(), target.display());
        if let Err(e) = decoder.decode(path, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        if target.exists() {
            let _ = fs::remove_file(&partial);
            return Err(PipelineError::Decode {
                path: path.to_path_buf(),
                reason: format!(
                    "{} appeared while decoding; the decoder must not write it directly",
                    target.display()
                ),
            });
        }
        fs::rename(&partial, &target).map_err(|e| PipelineError::io(&target, e))?;
        Ok(target)
    }
}

impl Default for Decompressor {
    /// Built-in zstd decoding for `.zst` inputs.
    fn default() -> Self {
        Self::empty().with_decoder(ZstdDecoder)
    }
}
