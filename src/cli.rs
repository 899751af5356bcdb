//
// cli.rs
// Dicom-Conv-rs
//
// Defines the command line with Clap, maps it onto transcode parameters, and runs the batch.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, Level};

use crate::batch;
use crate::params::{
    TranscodeParams, DEFAULT_COMPRESSION_RATIO_FACTOR, DEFAULT_JPEG_QUALITY, DEFAULT_NEAR_LOSSLESS_ERROR,
};
use crate::transfer_syntax::TargetSyntax;

/// Convert DICOM files from one transfer syntax to another.
#[derive(Debug, Parser)]
#[command(name = "dicom-conv", version)]
pub struct Cli {
    /// Input files or directories
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output file, or directory when several inputs or a directory are given
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Target transfer syntax
    #[arg(short = 't', value_enum, default_value_t = TransferSyntaxArg::RawExplicitLe)]
    pub transfer_syntax: TransferSyntaxArg,

    /// Maximum sample error for JPEG-LS near-lossless
    #[arg(
        short = 'N',
        default_value_t = DEFAULT_NEAR_LOSSLESS_ERROR,
        value_parser = clap::value_parser!(u16).range(0..=255)
    )]
    pub near_lossless_error: u16,

    /// Lossy JPEG quality (1-100)
    #[arg(
        short = 'q',
        default_value_t = DEFAULT_JPEG_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub jpeg_quality: u8,

    /// Lossy JPEG 2000 compression factor (5-100)
    #[arg(
        short = 'Q',
        default_value_t = DEFAULT_COMPRESSION_RATIO_FACTOR,
        value_parser = clap::value_parser!(u8).range(5..=100)
    )]
    pub compression_ratio_factor: u8,

    /// Keep the RGB colour model when compressing lossy
    #[arg(long = "rgb-lossy", overrides_with = "no_rgb_lossy")]
    pub rgb_lossy: bool,

    /// Convert colour images to YBR_FULL_422 when compressing lossy (default)
    #[arg(long = "no-rgb-lossy", overrides_with = "rgb_lossy")]
    pub no_rgb_lossy: bool,

    /// Number of worker threads
    #[arg(short = 'j', long = "jobs", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Write a JSON summary of the run to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Verbose mode
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only report warnings and errors
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransferSyntaxArg {
    #[value(name = "RAW_EXPLICIT_LE")]
    RawExplicitLe,
    #[value(name = "RAW_IMPLICIT_LE")]
    RawImplicitLe,
    #[value(name = "RLE_LOSSLESS")]
    RleLossless,
    #[value(name = "JPEG_BASELINE_8")]
    JpegBaseline8,
    #[value(name = "JPEG_EXTENDED_12")]
    JpegExtended12,
    #[value(name = "JPEG_SPECTRAL")]
    JpegSpectral,
    #[value(name = "JPEG_PROGRESSIVE")]
    JpegProgressive,
    #[value(name = "JPEG_LOSSLESS_P14")]
    JpegLosslessP14,
    #[value(name = "JPEG_LOSSLESS_SV1")]
    JpegLosslessSv1,
    #[value(name = "JPEG_LS_LOSSLESS")]
    JpegLsLossless,
    #[value(name = "JPEG_LS_NEAR_LOSSLESS")]
    JpegLsNearLossless,
    #[value(name = "JPEG_2000_LOSSLESS")]
    Jpeg2000Lossless,
    #[value(name = "JPEG_2000")]
    Jpeg2000,
}

impl From<TransferSyntaxArg> for TargetSyntax {
    fn from(value: TransferSyntaxArg) -> Self {
        match value {
            TransferSyntaxArg::RawExplicitLe => TargetSyntax::ExplicitVrLittleEndian,
            TransferSyntaxArg::RawImplicitLe => TargetSyntax::ImplicitVrLittleEndian,
            TransferSyntaxArg::RleLossless => TargetSyntax::RleLossless,
            TransferSyntaxArg::JpegBaseline8 => TargetSyntax::JpegBaseline,
            TransferSyntaxArg::JpegExtended12 => TargetSyntax::JpegExtended,
            TransferSyntaxArg::JpegSpectral => TargetSyntax::JpegSpectralSelection,
            TransferSyntaxArg::JpegProgressive => TargetSyntax::JpegProgressive,
            TransferSyntaxArg::JpegLosslessP14 => TargetSyntax::JpegLosslessP14,
            TransferSyntaxArg::JpegLosslessSv1 => TargetSyntax::JpegLosslessSv1,
            TransferSyntaxArg::JpegLsLossless => TargetSyntax::JpegLsLossless,
            TransferSyntaxArg::JpegLsNearLossless => TargetSyntax::JpegLsNearLossless,
            TransferSyntaxArg::Jpeg2000Lossless => TargetSyntax::Jpeg2000Lossless,
            TransferSyntaxArg::Jpeg2000 => TargetSyntax::Jpeg2000,
        }
    }
}

impl Cli {
    pub fn params(&self) -> TranscodeParams {
        TranscodeParams::new(self.transfer_syntax.into())
            .with_jpeg_quality(self.jpeg_quality)
            .with_compression_ratio_factor(self.compression_ratio_factor)
            .with_near_lossless_error(self.near_lossless_error)
            .with_keep_rgb(self.rgb_lossy && !self.no_rgb_lossy)
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::WARN
        } else {
            Level::INFO
        }
    }
}

/// Parse the process arguments and run; the exit code is 1 when any file failed.
pub fn run() -> anyhow::Result<ExitCode> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(cli.log_level())
            .with_target(false)
            .finish(),
    )
    .unwrap_or_else(|e| eprintln!("Could not install the logger: {e}"));

    let params = cli.params();
    let target = params.target;
    info!("Converting all the images to {} [{}].", target.name(), target.uid());

    let summary = batch::run(
        &cli.inputs,
        &cli.output,
        &params,
        cli.jobs.map(usize::from),
    )?;

    if let Some(path) = &cli.summary {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary)
            .with_context(|| format!("Failed to write the summary to {:?}", path))?;
    }

    Ok(if summary.all_converted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
