//
// transcode.rs
// Dicom-Conv-rs
//
// Per-file pipeline: parse the Part-10 stream, decode and re-encode the pixel data,
// then write the data set back in the target transfer syntax.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::codec::{self, check_target};
use crate::dataset::{DataSet, PIXEL_DATA};
use crate::error::Result;
use crate::p10::{write_p10, P10File};
use crate::params::TranscodeParams;
use crate::pixel::ImagePixel;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    pub source_syntax: &'static str,
    pub target_syntax: &'static str,
    /// Frames that went through a codec; zero on the native fast path.
    pub frames: usize,
    pub bytes_written: u64,
}

/// Transcode `input` into `output` according to `params`.
///
/// On failure no partial output is left behind.
pub fn transcode_file(input: &Path, output: &Path, params: &TranscodeParams) -> Result<TranscodeReport> {
    let file = P10File::open(input)?;
    let out = transcode(&file, params)?;

    if let Err(e) = write_output(output, &out.data) {
        if output.exists() {
            if let Err(cleanup) = std::fs::remove_file(output) {
                warn!("Could not remove partial output {:?}: {}", output, cleanup);
            }
        }
        return Err(e);
    }
    Ok(out.report)
}

/// An encoded Part-10 stream plus its report.
#[derive(Debug)]
pub struct TranscodedBytes {
    pub data: Vec<u8>,
    pub report: TranscodeReport,
}

/// Run the pipeline in memory, returning the bytes of the new Part-10 stream.
pub fn transcode(file: &P10File, params: &TranscodeParams) -> Result<TranscodedBytes> {
    params.validate()?;
    let source = file.profile();
    let target = params.target.profile();
    let mut dataset: DataSet<'_> = file.dataset()?;

    let mut frames = 0;
    if !dataset.contains(PIXEL_DATA) {
        debug!("no Pixel Data, only the data set encoding changes");
    } else if source.is_native() && target.is_native() {
        // values are already little endian in memory, the writer re-encodes the headers
        debug!("native to native, pixel data is carried through");
    } else {
        let image = ImagePixel::from_dataset(&dataset)?;
        check_target(&image, params.target)?;
        let decoded = codec::decode_frames(&dataset, source)?;
        frames = decoded.frames.len();
        let encoded = codec::encode_frames(&decoded, params)?;
        encoded.apply(&mut dataset);
    }

    let meta = file.meta().rewritten(target.uid);
    let mut data = Vec::new();
    write_p10(&mut data, &meta, &dataset, target)?;
    Ok(TranscodedBytes {
        report: TranscodeReport {
            source_syntax: source.name,
            target_syntax: target.name,
            frames,
            bytes_written: data.len() as u64,
        },
        data,
    })
}

fn write_output(output: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output)?);
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{
        Element, Value, BITS_ALLOCATED, BITS_STORED, COLUMNS, HIGH_BIT, PHOTOMETRIC_INTERPRETATION,
        PIXEL_REPRESENTATION, ROWS, SAMPLES_PER_PIXEL, SOP_CLASS_UID,
    };
    use crate::error::TranscodeError;
    use crate::p10::FileMeta;
    use crate::transfer_syntax::TargetSyntax;
    use dicom::core::{Tag, VR};

    fn image_dataset(pixels: Vec<u8>) -> DataSet<'static> {
        let mut ds = DataSet::new();
        ds.put(Element::text(SOP_CLASS_UID, VR::UI, "1.2.840.10008.5.1.4.1.1.7"));
        ds.put(Element::text(Tag(0x0010, 0x0010), VR::PN, "Doe^Jane"));
        ds.put(Element::uint16(SAMPLES_PER_PIXEL, 1));
        ds.put(Element::text(PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"));
        ds.put(Element::uint16(ROWS, 4));
        ds.put(Element::uint16(COLUMNS, 4));
        ds.put(Element::uint16(BITS_ALLOCATED, 8));
        ds.put(Element::uint16(BITS_STORED, 8));
        ds.put(Element::uint16(HIGH_BIT, 7));
        ds.put(Element::uint16(PIXEL_REPRESENTATION, 0));
        ds.put(Element::bytes(PIXEL_DATA, VR::OB, pixels));
        ds
    }

    fn part10(ds: &DataSet<'_>, syntax: TargetSyntax) -> P10File {
        let meta = FileMeta::for_dataset(ds, syntax.uid());
        let mut bytes = Vec::new();
        write_p10(&mut bytes, &meta, ds, syntax.profile()).expect("write fixture");
        P10File::from_bytes(bytes).expect("read fixture")
    }

    #[test]
    fn native_fast_path_keeps_pixels() {
        let pixels: Vec<u8> = (0..16).collect();
        let file = part10(&image_dataset(pixels.clone()), TargetSyntax::ExplicitVrLittleEndian);
        let params = TranscodeParams::new(TargetSyntax::ImplicitVrLittleEndian);

        let out = transcode(&file, &params).expect("transcode");
        assert_eq!(out.report.frames, 0);
        let reread = P10File::from_bytes(out.data).expect("output is Part-10");
        assert_eq!(reread.profile().uid, TargetSyntax::ImplicitVrLittleEndian.uid());
        let ds = reread.dataset().expect("data set");
        assert_eq!(ds.get(PIXEL_DATA).and_then(|e| e.as_bytes()), Some(&pixels[..]));
        assert_eq!(ds.string(Tag(0x0010, 0x0010)).as_deref(), Some("Doe^Jane"));
    }

    #[test]
    fn rle_round_trip_restores_samples() {
        let pixels: Vec<u8> = (0..16).map(|i| (i / 4) as u8 * 10).collect();
        let file = part10(&image_dataset(pixels.clone()), TargetSyntax::ExplicitVrLittleEndian);

        let rle = transcode(&file, &TranscodeParams::new(TargetSyntax::RleLossless)).expect("encode");
        assert_eq!(rle.report.frames, 1);
        let compressed = P10File::from_bytes(rle.data).expect("rle output");
        assert_eq!(compressed.profile().uid, TargetSyntax::RleLossless.uid());
        assert!(matches!(
            compressed.dataset().expect("data set").get(PIXEL_DATA).map(|e| &e.value),
            Some(Value::Encapsulated(_))
        ));

        let native = transcode(&compressed, &TranscodeParams::new(TargetSyntax::ExplicitVrLittleEndian))
            .expect("decode");
        let reread = P10File::from_bytes(native.data).expect("native output");
        let ds = reread.dataset().expect("data set");
        assert_eq!(ds.get(PIXEL_DATA).and_then(|e| e.as_bytes()), Some(&pixels[..]));
    }

    #[test]
    fn dataset_without_pixels_is_rewritten() {
        let mut ds = image_dataset(Vec::new());
        ds.remove(PIXEL_DATA);
        let file = part10(&ds, TargetSyntax::ExplicitVrLittleEndian);
        let out = transcode(&file, &TranscodeParams::new(TargetSyntax::JpegLsLossless)).expect("transcode");
        let reread = P10File::from_bytes(out.data).expect("output");
        assert_eq!(reread.profile().uid, TargetSyntax::JpegLsLossless.uid());
        assert_eq!(reread.dataset().expect("data set").uint16(ROWS), Some(4));
    }

    #[test]
    fn failed_file_leaves_no_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("broken.dcm");
        let output = dir.path().join("out.dcm");
        std::fs::write(&input, b"not dicom at all").expect("write input");

        let err = transcode_file(&input, &output, &TranscodeParams::default()).unwrap_err();
        assert!(matches!(err, TranscodeError::NotPart10));
        assert!(!output.exists());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let file = part10(&image_dataset(vec![0; 16]), TargetSyntax::ExplicitVrLittleEndian);
        let params = TranscodeParams::new(TargetSyntax::JpegBaseline).with_jpeg_quality(0);
        assert!(matches!(
            transcode(&file, &params),
            Err(TranscodeError::InvalidParameter { name: "jpeg_quality", .. })
        ));
    }
}
