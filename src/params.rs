//
// params.rs
// Dicom-Conv-rs
//
// Transcode parameters: the target syntax plus the lossy-compression knobs exposed on the CLI.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::error::{Result, TranscodeError};
use crate::transfer_syntax::TargetSyntax;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_COMPRESSION_RATIO_FACTOR: u8 = 10;
pub const DEFAULT_NEAR_LOSSLESS_ERROR: u16 = 3;

/// Read-only settings applied to every file of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeParams {
    pub target: TargetSyntax,
    /// Lossy JPEG quality, 1 (worst) to 100 (best).
    pub jpeg_quality: u8,
    /// Lossy JPEG 2000 compression factor, 5 (near lossless) to 100.
    pub compression_ratio_factor: u8,
    /// Maximum absolute sample error for JPEG-LS near-lossless.
    pub near_lossless_error: u16,
    /// Keep the RGB colour model for lossy JPEG instead of switching to YBR_FULL_422.
    pub keep_rgb: bool,
}

impl Default for TranscodeParams {
    fn default() -> Self {
        TranscodeParams::new(TargetSyntax::ExplicitVrLittleEndian)
    }
}

impl TranscodeParams {
    pub fn new(target: TargetSyntax) -> Self {
        TranscodeParams {
            target,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            compression_ratio_factor: DEFAULT_COMPRESSION_RATIO_FACTOR,
            near_lossless_error: DEFAULT_NEAR_LOSSLESS_ERROR,
            keep_rgb: false,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_compression_ratio_factor(mut self, factor: u8) -> Self {
        self.compression_ratio_factor = factor;
        self
    }

    pub fn with_near_lossless_error(mut self, near: u16) -> Self {
        self.near_lossless_error = near;
        self
    }

    pub fn with_keep_rgb(mut self, keep_rgb: bool) -> Self {
        self.keep_rgb = keep_rgb;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_range("jpeg_quality", self.jpeg_quality.into(), 1, 100, "1..=100")?;
        check_range(
            "compression_ratio_factor",
            self.compression_ratio_factor.into(),
            5,
            100,
            "5..=100",
        )?;
        check_range(
            "near_lossless_error",
            self.near_lossless_error.into(),
            0,
            255,
            "0..=255",
        )?;
        Ok(())
    }

    /// The JPEG-LS NEAR value for the target, zero unless near-lossless was requested.
    pub fn effective_near(&self) -> u16 {
        match self.target {
            TargetSyntax::JpegLsNearLossless => self.near_lossless_error,
            _ => 0,
        }
    }
}

fn check_range(name: &'static str, value: i64, min: i64, max: i64, range: &'static str) -> Result<()> {
    if value < min || value > max {
        return Err(TranscodeError::InvalidParameter { name, value, range });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let params = TranscodeParams::default();
        assert_eq!(params.target, TargetSyntax::ExplicitVrLittleEndian);
        assert_eq!(params.jpeg_quality, 80);
        assert_eq!(params.compression_ratio_factor, 10);
        assert_eq!(params.near_lossless_error, 3);
        assert!(!params.keep_rgb);
        params.validate().expect("defaults are valid");
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let params = TranscodeParams::new(TargetSyntax::JpegBaseline).with_jpeg_quality(0);
        let err = params.validate().unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::InvalidParameter { name: "jpeg_quality", value: 0, .. }
        ));

        let params = TranscodeParams::new(TargetSyntax::Jpeg2000).with_compression_ratio_factor(4);
        assert!(params.validate().is_err());

        let params = TranscodeParams::new(TargetSyntax::JpegLsNearLossless).with_near_lossless_error(256);
        assert!(params.validate().is_err());
    }

    #[test]
    fn near_only_applies_to_near_lossless_target() {
        let params = TranscodeParams::new(TargetSyntax::JpegLsLossless).with_near_lossless_error(5);
        assert_eq!(params.effective_near(), 0);
        let params = TranscodeParams { target: TargetSyntax::JpegLsNearLossless, ..params };
        assert_eq!(params.effective_near(), 5);
    }
}
