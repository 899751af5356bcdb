//
// error.rs
// Dicom-Conv-rs
//
// Error type shared by the parser, the pixel codecs, and the dataset writer.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::Tag;
use thiserror::Error;

pub type Result<T, E = TranscodeError> = std::result::Result<T, E>;

/// Everything that can go wrong while transcoding a single file.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a DICOM Part-10 file (missing DICM prefix)")]
    NotPart10,

    #[error("data ended unexpectedly while reading {tag} at offset {offset}")]
    Truncated { tag: Tag, offset: usize },

    #[error("malformed data at offset {offset}: {message}")]
    Malformed { offset: usize, message: String },

    #[error("file meta information has no Transfer Syntax UID")]
    MissingTransferSyntax,

    #[error("unknown transfer syntax {0}")]
    UnknownTransferSyntax(String),

    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("invalid value {value:?} for attribute {name}")]
    InvalidAttribute { name: &'static str, value: String },

    #[error("expected {expected} frame(s) of pixel data but found {found}")]
    FrameCountMismatch { expected: usize, found: usize },

    #[error("{codec} codec error: {message}")]
    Codec { codec: &'static str, message: String },

    #[error("{0} support is not compiled into this build")]
    CodecUnavailable(&'static str),

    #[error("cannot encode pixel data as {target}: {reason}")]
    UnsupportedPixelData { target: &'static str, reason: String },

    #[error("parameter {name} = {value} is outside {range}")]
    InvalidParameter {
        name: &'static str,
        value: i64,
        range: &'static str,
    },
}

impl TranscodeError {
    pub(crate) fn codec(codec: &'static str, message: impl Into<String>) -> Self {
        TranscodeError::Codec {
            codec,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(target: &'static str, reason: impl Into<String>) -> Self {
        TranscodeError::UnsupportedPixelData {
            target,
            reason: reason.into(),
        }
    }
}
