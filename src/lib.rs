//! listen-matrix library - shared modules for all binaries.
//!
//! Turns raw listen logs into a (user, artist, listen_count) matrix in four
//! batch stages: extract, filter-mapping, canonicalize, aggregate.

pub mod aggregate;
pub mod artists;
pub mod config;
pub mod decompress;
pub mod error;
pub mod extract;
pub mod filter;
pub mod lookup;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod table;

pub use error::{PipelineError, PipelineResult};
