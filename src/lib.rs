//
// lib.rs
// Dicom-Conv-rs
//
// Exposes the transcoding engine and re-exports the CLI entry point for the binary.
//
// Thales Matheus Mendonça Santos - November 2025

// Engine: Part-10 parsing and writing, pixel codecs, and the per-file pipeline.
pub mod codec;
pub mod dataset;
pub mod error;
pub mod p10;
pub mod params;
pub mod pixel;
pub mod transcode;
pub mod transfer_syntax;

// Shell: argument parsing, directory walking, and run summaries.
pub mod batch;
pub mod cli;
pub mod models;

pub use cli::{run as run_cli, Cli};
pub use error::{Result, TranscodeError};
pub use params::TranscodeParams;
pub use transcode::{transcode_file, TranscodeReport};
pub use transfer_syntax::TargetSyntax;
