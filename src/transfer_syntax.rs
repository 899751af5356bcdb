//
// transfer_syntax.rs
// Dicom-Conv-rs
//
// Static table of the transfer syntaxes the engine can read, plus the subset it can write.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::error::{Result, TranscodeError};

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
pub const JPEG_BASELINE_8BIT: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED_12BIT: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_SPECTRAL_SELECTION: &str = "1.2.840.10008.1.2.4.53";
pub const JPEG_FULL_PROGRESSION: &str = "1.2.840.10008.1.2.4.55";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.57";
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const JPEG_LS_NEAR_LOSSLESS: &str = "1.2.840.10008.1.2.4.81";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// DCT-based JPEG processes that share the same decoder path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JpegProcess {
    Baseline,
    Extended,
    SpectralSelection,
    Progressive,
}

/// How the Pixel Data element of a syntax is encoded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Codec {
    Native,
    Rle,
    Jpeg(JpegProcess),
    /// Process 14 with the predictor used when encoding (decoding reads it from the stream).
    JpegLossless { predictor: u8 },
    JpegLs { lossless: bool },
    Jpeg2000 { lossless: bool },
}

impl Codec {
    pub fn is_encapsulated(self) -> bool {
        !matches!(self, Codec::Native)
    }

    /// Name of the codec family, as used in error messages.
    pub fn family(self) -> &'static str {
        match self {
            Codec::Native => "native",
            Codec::Rle => "RLE",
            Codec::Jpeg(_) | Codec::JpegLossless { .. } => "JPEG",
            Codec::JpegLs { .. } => "JPEG-LS",
            Codec::Jpeg2000 { .. } => "JPEG 2000",
        }
    }

    /// True for codecs whose output is delimited by JPEG SOI/EOI markers.
    pub fn uses_jpeg_markers(self) -> bool {
        matches!(
            self,
            Codec::Jpeg(_) | Codec::JpegLossless { .. } | Codec::JpegLs { .. }
        )
    }
}

/// Encoding rules of one transfer syntax.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SyntaxProfile {
    pub uid: &'static str,
    pub name: &'static str,
    pub explicit_vr: bool,
    pub byte_order: ByteOrder,
    pub deflated: bool,
    pub codec: Codec,
}

const fn native(
    uid: &'static str,
    name: &'static str,
    explicit_vr: bool,
    byte_order: ByteOrder,
    deflated: bool,
) -> SyntaxProfile {
    SyntaxProfile {
        uid,
        name,
        explicit_vr,
        byte_order,
        deflated,
        codec: Codec::Native,
    }
}

const fn encapsulated(uid: &'static str, name: &'static str, codec: Codec) -> SyntaxProfile {
    SyntaxProfile {
        uid,
        name,
        explicit_vr: true,
        byte_order: ByteOrder::Little,
        deflated: false,
        codec,
    }
}

static PROFILES: &[SyntaxProfile] = &[
    native(
        IMPLICIT_VR_LITTLE_ENDIAN,
        "Implicit VR Little Endian",
        false,
        ByteOrder::Little,
        false,
    ),
    native(
        EXPLICIT_VR_LITTLE_ENDIAN,
        "Explicit VR Little Endian",
        true,
        ByteOrder::Little,
        false,
    ),
    native(
        DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
        "Deflated Explicit VR Little Endian",
        true,
        ByteOrder::Little,
        true,
    ),
    native(
        EXPLICIT_VR_BIG_ENDIAN,
        "Explicit VR Big Endian (Retired)",
        true,
        ByteOrder::Big,
        false,
    ),
    encapsulated(RLE_LOSSLESS, "RLE Lossless", Codec::Rle),
    encapsulated(
        JPEG_BASELINE_8BIT,
        "JPEG Baseline (Process 1)",
        Codec::Jpeg(JpegProcess::Baseline),
    ),
    encapsulated(
        JPEG_EXTENDED_12BIT,
        "JPEG Extended (Process 2 & 4)",
        Codec::Jpeg(JpegProcess::Extended),
    ),
    encapsulated(
        JPEG_SPECTRAL_SELECTION,
        "JPEG Spectral Selection, Non-Hierarchical (Process 6 & 8) (Retired)",
        Codec::Jpeg(JpegProcess::SpectralSelection),
    ),
    encapsulated(
        JPEG_FULL_PROGRESSION,
        "JPEG Full Progression, Non-Hierarchical (Process 10 & 12) (Retired)",
        Codec::Jpeg(JpegProcess::Progressive),
    ),
    encapsulated(
        JPEG_LOSSLESS,
        "JPEG Lossless, Non-Hierarchical (Process 14)",
        Codec::JpegLossless { predictor: 6 },
    ),
    encapsulated(
        JPEG_LOSSLESS_SV1,
        "JPEG Lossless, Non-Hierarchical, First-Order Prediction (Process 14 [Selection Value 1])",
        Codec::JpegLossless { predictor: 1 },
    ),
    encapsulated(
        JPEG_LS_LOSSLESS,
        "JPEG-LS Lossless Image Compression",
        Codec::JpegLs { lossless: true },
    ),
    encapsulated(
        JPEG_LS_NEAR_LOSSLESS,
        "JPEG-LS Lossy (Near-Lossless) Image Compression",
        Codec::JpegLs { lossless: false },
    ),
    encapsulated(
        JPEG_2000_LOSSLESS,
        "JPEG 2000 Image Compression (Lossless Only)",
        Codec::Jpeg2000 { lossless: true },
    ),
    encapsulated(
        JPEG_2000,
        "JPEG 2000 Image Compression",
        Codec::Jpeg2000 { lossless: false },
    ),
];

impl SyntaxProfile {
    /// Look up a transfer syntax by UID, ignoring the NUL/space padding of UI values.
    pub fn lookup(uid: &str) -> Result<&'static SyntaxProfile> {
        let uid = uid.trim_end_matches(['\0', ' ']);
        PROFILES
            .iter()
            .find(|p| p.uid == uid)
            .ok_or_else(|| TranscodeError::UnknownTransferSyntax(uid.to_string()))
    }

    pub fn all() -> &'static [SyntaxProfile] {
        PROFILES
    }

    pub fn is_native(&self) -> bool {
        self.codec == Codec::Native
    }
}

/// The transfer syntaxes a file can be transcoded into.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TargetSyntax {
    ExplicitVrLittleEndian,
    ImplicitVrLittleEndian,
    RleLossless,
    JpegBaseline,
    JpegExtended,
    JpegSpectralSelection,
    JpegProgressive,
    JpegLosslessP14,
    JpegLosslessSv1,
    JpegLsLossless,
    JpegLsNearLossless,
    Jpeg2000Lossless,
    Jpeg2000,
}

impl TargetSyntax {
    pub fn uid(self) -> &'static str {
        match self {
            TargetSyntax::ExplicitVrLittleEndian => EXPLICIT_VR_LITTLE_ENDIAN,
            TargetSyntax::ImplicitVrLittleEndian => IMPLICIT_VR_LITTLE_ENDIAN,
            TargetSyntax::RleLossless => RLE_LOSSLESS,
            TargetSyntax::JpegBaseline => JPEG_BASELINE_8BIT,
            TargetSyntax::JpegExtended => JPEG_EXTENDED_12BIT,
            TargetSyntax::JpegSpectralSelection => JPEG_SPECTRAL_SELECTION,
            TargetSyntax::JpegProgressive => JPEG_FULL_PROGRESSION,
            TargetSyntax::JpegLosslessP14 => JPEG_LOSSLESS,
            TargetSyntax::JpegLosslessSv1 => JPEG_LOSSLESS_SV1,
            TargetSyntax::JpegLsLossless => JPEG_LS_LOSSLESS,
            TargetSyntax::JpegLsNearLossless => JPEG_LS_NEAR_LOSSLESS,
            TargetSyntax::Jpeg2000Lossless => JPEG_2000_LOSSLESS,
            TargetSyntax::Jpeg2000 => JPEG_2000,
        }
    }

    pub fn profile(self) -> &'static SyntaxProfile {
        PROFILES
            .iter()
            .find(|p| p.uid == self.uid())
            .unwrap_or(&PROFILES[1])
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    /// Whether encoding into this syntax may discard information.
    pub fn is_lossy(self) -> bool {
        matches!(
            self,
            TargetSyntax::JpegBaseline
                | TargetSyntax::JpegExtended
                | TargetSyntax::JpegSpectralSelection
                | TargetSyntax::JpegProgressive
                | TargetSyntax::JpegLsNearLossless
                | TargetSyntax::Jpeg2000
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_trims_ui_padding() {
        let profile = SyntaxProfile::lookup("1.2.840.10008.1.2.1\0").expect("known syntax");
        assert_eq!(profile.uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert!(profile.explicit_vr);
        assert!(profile.is_native());
    }

    #[test]
    fn unknown_syntax_is_rejected() {
        let err = SyntaxProfile::lookup("1.2.3.4").unwrap_err();
        assert!(matches!(err, TranscodeError::UnknownTransferSyntax(uid) if uid == "1.2.3.4"));
    }

    #[test]
    fn every_target_has_a_profile() {
        let targets = [
            TargetSyntax::ExplicitVrLittleEndian,
            TargetSyntax::ImplicitVrLittleEndian,
            TargetSyntax::RleLossless,
            TargetSyntax::JpegBaseline,
            TargetSyntax::JpegExtended,
            TargetSyntax::JpegSpectralSelection,
            TargetSyntax::JpegProgressive,
            TargetSyntax::JpegLosslessP14,
            TargetSyntax::JpegLosslessSv1,
            TargetSyntax::JpegLsLossless,
            TargetSyntax::JpegLsNearLossless,
            TargetSyntax::Jpeg2000Lossless,
            TargetSyntax::Jpeg2000,
        ];
        for target in targets {
            assert_eq!(target.profile().uid, target.uid());
            // writers never produce big endian or deflated data sets
            assert_eq!(target.profile().byte_order, ByteOrder::Little);
            assert!(!target.profile().deflated);
        }
        assert!(!TargetSyntax::ImplicitVrLittleEndian.profile().explicit_vr);
    }

    #[test]
    fn lossy_targets() {
        assert!(TargetSyntax::JpegBaseline.is_lossy());
        assert!(TargetSyntax::JpegLsNearLossless.is_lossy());
        assert!(!TargetSyntax::JpegLsLossless.is_lossy());
        assert!(!TargetSyntax::RleLossless.is_lossy());
        assert!(!TargetSyntax::ExplicitVrLittleEndian.is_lossy());
    }
}
