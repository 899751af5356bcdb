//
// mod.rs
// Dicom-Conv-rs
//
// Pixel Decoder and Pixel Encoder: move Pixel Data between a transfer syntax
// and the canonical frame buffer, and report the Image Pixel attributes that change.
//
// Thales Matheus Mendonça Santos - November 2025

pub mod encapsulation;
pub mod jpeg;
pub mod jpeg2000;
pub mod jpeg_ls;
pub mod rle;

use std::borrow::Cow;

use dicom::core::{Tag, VR};
use tracing::debug;

use crate::dataset::{
    DataSet, Element, Value, BITS_ALLOCATED, BITS_STORED, HIGH_BIT, LOSSY_IMAGE_COMPRESSION, LOSSY_IMAGE_COMPRESSION_METHOD,
    LOSSY_IMAGE_COMPRESSION_RATIO, PHOTOMETRIC_INTERPRETATION, PIXEL_DATA, PLANAR_CONFIGURATION,
};
use crate::error::{Result, TranscodeError};
use crate::params::TranscodeParams;
use crate::pixel::{expand_ybr_full_422, normalize_stored_bits, planar_to_interleaved, ImagePixel};
use crate::transfer_syntax::{Codec, SyntaxProfile, TargetSyntax};

/// All frames of an image in the canonical layout.
///
/// `image` describes the frames as they are now: interleaved, fully sampled,
/// with the photometric interpretation left by the decoder.
#[derive(Debug, Clone)]
pub struct DecodedPixels {
    pub image: ImagePixel,
    pub frames: Vec<Vec<u8>>,
}

/// A change to the data set that goes with newly encoded pixel data.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeUpdate {
    Set(Element<'static>),
    SetIfMissing(Element<'static>),
    /// Add a value to a multi-valued text attribute, creating it when absent.
    Append { tag: Tag, vr: VR, value: String },
}

impl AttributeUpdate {
    pub fn apply(self, ds: &mut DataSet<'_>) {
        match self {
            AttributeUpdate::Set(element) => {
                ds.put(element);
            }
            AttributeUpdate::SetIfMissing(element) => {
                if !ds.contains(element.tag) {
                    ds.put(element);
                }
            }
            AttributeUpdate::Append { tag, vr, value } => {
                let text = match ds.string(tag).filter(|existing| !existing.is_empty()) {
                    Some(existing) => format!("{existing}\\{value}"),
                    None => value,
                };
                ds.put(Element::text(tag, vr, &text));
            }
        }
    }
}

/// Pixel Data ready to be written, with the attribute updates it implies.
#[derive(Debug, Clone)]
pub struct EncodedPixels {
    pub vr: VR,
    pub value: Value<'static>,
    pub updates: Vec<AttributeUpdate>,
}

impl EncodedPixels {
    /// Replace the Pixel Data of `ds` and apply the attribute updates.
    pub fn apply(self, ds: &mut DataSet<'_>) {
        ds.put(Element::new(PIXEL_DATA, self.vr, self.value));
        for update in self.updates {
            update.apply(ds);
        }
    }
}

/// Reject images the target can never carry, before any decoding work.
pub fn check_target(image: &ImagePixel, target: TargetSyntax) -> Result<()> {
    if image.bits_allocated == 1 && target.profile().codec.is_encapsulated() {
        return Err(TranscodeError::unsupported(target.name(), "1-bit pixel data"));
    }
    Ok(())
}

/// Decode every frame of the Pixel Data of `ds`, stored with `profile`.
pub fn decode_frames(ds: &DataSet<'_>, profile: &SyntaxProfile) -> Result<DecodedPixels> {
    let mut image = ImagePixel::from_dataset(ds)?;
    let element = ds
        .get(PIXEL_DATA)
        .ok_or(TranscodeError::MissingAttribute("PixelData"))?;
    let frame_count = image.frame_count();

    let mut frames = match (&element.value, profile.codec) {
        (Value::Bytes(bytes), Codec::Native) => split_native(bytes, &image)?,
        (Value::Encapsulated(pixels), codec) if codec.is_encapsulated() => {
            let compressed = encapsulation::split_frames(pixels, frame_count, codec.uses_jpeg_markers())?;
            let mut frames = Vec::with_capacity(compressed.len());
            let mut converted = false;
            for data in &compressed {
                let (frame, to_rgb) = decode_frame(data, &image, codec)?;
                if frame.len() != image.frame_len() {
                    return Err(TranscodeError::codec(
                        codec.family(),
                        format!(
                            "decoded frame is {} bytes, expected {}",
                            frame.len(),
                            image.frame_len()
                        ),
                    ));
                }
                converted |= to_rgb;
                frames.push(frame);
            }
            if converted {
                image.photometric_interpretation = "RGB".to_string();
            }
            frames
        }
        (Value::Bytes(_), codec) => {
            return Err(TranscodeError::codec(
                codec.family(),
                "pixel data is not encapsulated",
            ))
        }
        _ => {
            return Err(TranscodeError::Malformed {
                offset: 0,
                message: "unexpected Pixel Data encoding for a native transfer syntax".to_string(),
            })
        }
    };

    if profile.codec.is_encapsulated() {
        for frame in &mut frames {
            normalize_stored_bits(frame, &image);
        }
    } else {
        if image.is_color() && image.planar_configuration == 1 {
            let bps = image.bytes_per_sample();
            let samples = usize::from(image.samples_per_pixel);
            for frame in &mut frames {
                *frame = planar_to_interleaved(frame, samples, bps);
            }
        }
        if image.is_ybr_full_422() {
            for frame in &mut frames {
                *frame = expand_ybr_full_422(frame, &image);
            }
        }
    }
    // decoders produce fully sampled, interleaved frames
    if image.is_ybr_full_422() {
        image.photometric_interpretation = "YBR_FULL".to_string();
    }
    image.planar_configuration = 0;

    debug!(
        "decoded {} frame(s) of {}x{}x{} at {} bits ({})",
        frames.len(),
        image.columns,
        image.rows,
        image.samples_per_pixel,
        image.bits_allocated,
        image.photometric_interpretation
    );
    Ok(DecodedPixels { image, frames })
}

fn split_native(bytes: &Cow<'_, [u8]>, image: &ImagePixel) -> Result<Vec<Vec<u8>>> {
    if image.bits_allocated == 1 {
        return Err(TranscodeError::codec(
            "native",
            "1-bit pixel data can only be copied between native transfer syntaxes",
        ));
    }
    let frame_len = image.native_frame_len();
    let expected = image.frame_count();
    if frame_len == 0 || bytes.len() < frame_len * expected {
        return Err(TranscodeError::FrameCountMismatch {
            expected,
            found: if frame_len == 0 { 0 } else { bytes.len() / frame_len },
        });
    }
    Ok(bytes
        .chunks_exact(frame_len)
        .take(expected)
        .map(<[u8]>::to_vec)
        .collect())
}

fn decode_frame(data: &[u8], image: &ImagePixel, codec: Codec) -> Result<(Vec<u8>, bool)> {
    match codec {
        Codec::Rle => Ok((rle::decode_frame(data, image)?, false)),
        Codec::Jpeg(_) | Codec::JpegLossless { .. } => jpeg::decode_frame(data, image),
        Codec::JpegLs { .. } => Ok((jpeg_ls::decode_frame(data, image)?, false)),
        Codec::Jpeg2000 { .. } => jpeg2000::decode_frame(data, image),
        Codec::Native => Err(TranscodeError::codec("native", "native frames are not encapsulated")),
    }
}

/// Encode decoded frames into the target transfer syntax of `params`.
pub fn encode_frames(pixels: &DecodedPixels, params: &TranscodeParams) -> Result<EncodedPixels> {
    let target = params.target;
    let name = target.name();
    let image = &pixels.image;
    let codec = target.profile().codec;
    check_target(image, target)?;

    let mut photometric = image.photometric_interpretation.clone();
    let mut lossy = target.is_lossy();
    let mut sample_updates = Vec::new();
    let encoded: Vec<Vec<u8>> = match codec {
        Codec::Native => {
            let mut data = pixels.frames.concat();
            if data.len() % 2 == 1 {
                data.push(0);
            }
            let vr = if image.bits_allocated > 8 { VR::OW } else { VR::OB };
            return Ok(EncodedPixels {
                vr,
                value: Value::Bytes(Cow::Owned(data)),
                updates: image_updates(image, &photometric),
            });
        }
        Codec::Rle => pixels
            .frames
            .iter()
            .map(|frame| rle::encode_frame(frame, image))
            .collect::<Result<_>>()?,
        Codec::Jpeg(process) => {
            let mut out = Vec::with_capacity(pixels.frames.len());
            for frame in &pixels.frames {
                let (data, pi) = jpeg::encode_dct(frame, image, process, params, name)?;
                photometric = pi;
                out.push(data);
            }
            if image.bits_allocated == 16 && image.bits_stored <= 8 {
                // the codestream holds 8-bit samples
                sample_updates.push(AttributeUpdate::Set(Element::uint16(BITS_ALLOCATED, 8)));
                sample_updates.push(AttributeUpdate::Set(Element::uint16(BITS_STORED, 8)));
                sample_updates.push(AttributeUpdate::Set(Element::uint16(HIGH_BIT, 7)));
            }
            out
        }
        Codec::JpegLossless { predictor } => pixels
            .frames
            .iter()
            .map(|frame| jpeg::encode_lossless(frame, image, predictor, name))
            .collect::<Result<_>>()?,
        Codec::JpegLs { .. } => {
            let near = jpeg_ls::allowed_near(image, params.effective_near());
            lossy = near > 0;
            pixels
                .frames
                .iter()
                .map(|frame| jpeg_ls::encode_frame(frame, image, near, name))
                .collect::<Result<_>>()?
        }
        Codec::Jpeg2000 { lossless } => {
            let rate = (!lossless).then_some(params.compression_ratio_factor);
            photometric = jpeg2000::encoded_photometric(image, lossless);
            pixels
                .frames
                .iter()
                .map(|frame| jpeg2000::encode_frame(frame, image, rate, name))
                .collect::<Result<_>>()?
        }
    };

    let raw: usize = pixels.frames.iter().map(Vec::len).sum();
    let compressed: usize = encoded.iter().map(Vec::len).sum();
    let mut updates = image_updates(image, &photometric);
    updates.extend(sample_updates);
    if lossy {
        let ratio = raw as f64 / compressed.max(1) as f64;
        debug!("lossy compression ratio {ratio:.2} ({raw} -> {compressed} bytes)");
        updates.push(AttributeUpdate::Set(Element::text(
            LOSSY_IMAGE_COMPRESSION,
            VR::CS,
            "01",
        )));
        updates.push(AttributeUpdate::Append {
            tag: LOSSY_IMAGE_COMPRESSION_RATIO,
            vr: VR::DS,
            value: format_ratio(ratio),
        });
        updates.push(AttributeUpdate::Append {
            tag: LOSSY_IMAGE_COMPRESSION_METHOD,
            vr: VR::CS,
            value: compression_method(codec).to_string(),
        });
    } else {
        updates.push(AttributeUpdate::SetIfMissing(Element::text(
            LOSSY_IMAGE_COMPRESSION,
            VR::CS,
            "00",
        )));
    }

    Ok(EncodedPixels {
        vr: VR::OB,
        value: Value::Encapsulated(encapsulation::encapsulate(encoded)),
        updates,
    })
}

fn image_updates(image: &ImagePixel, photometric: &str) -> Vec<AttributeUpdate> {
    let mut updates = vec![AttributeUpdate::Set(Element::text(
        PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        photometric,
    ))];
    if image.is_color() {
        updates.push(AttributeUpdate::Set(Element::uint16(PLANAR_CONFIGURATION, 0)));
    }
    updates
}

fn compression_method(codec: Codec) -> &'static str {
    match codec {
        Codec::JpegLs { .. } => "ISO_14495_1",
        Codec::Jpeg2000 { .. } => "ISO_15444_1",
        _ => "ISO_10918_1",
    }
}

/// Decimal String values are limited to 16 characters.
fn format_ratio(ratio: f64) -> String {
    let mut text = format!("{ratio:.2}");
    text.truncate(16);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{
        BITS_ALLOCATED, BITS_STORED, COLUMNS, HIGH_BIT, NUMBER_OF_FRAMES, PIXEL_REPRESENTATION,
        ROWS, SAMPLES_PER_PIXEL,
    };
    use crate::pixel::u16_to_frame;
    use crate::transfer_syntax::{EXPLICIT_VR_LITTLE_ENDIAN, RLE_LOSSLESS};

    fn dataset(spp: u16, bits: u16, stored: u16, photometric: &str, frames: u32, pixels: Vec<u8>) -> DataSet<'static> {
        let mut ds = DataSet::new();
        ds.put(Element::uint16(ROWS, 4));
        ds.put(Element::uint16(COLUMNS, 4));
        ds.put(Element::uint16(SAMPLES_PER_PIXEL, spp));
        ds.put(Element::uint16(BITS_ALLOCATED, bits));
        ds.put(Element::uint16(BITS_STORED, stored));
        ds.put(Element::uint16(HIGH_BIT, stored - 1));
        ds.put(Element::uint16(PIXEL_REPRESENTATION, 0));
        ds.put(Element::text(PHOTOMETRIC_INTERPRETATION, VR::CS, photometric));
        ds.put(Element::text(NUMBER_OF_FRAMES, VR::IS, &frames.to_string()));
        let vr = if bits > 8 { VR::OW } else { VR::OB };
        ds.put(Element::bytes(PIXEL_DATA, vr, pixels));
        ds
    }

    fn native() -> &'static SyntaxProfile {
        SyntaxProfile::lookup(EXPLICIT_VR_LITTLE_ENDIAN).expect("profile")
    }

    #[test]
    fn native_frames_are_split() {
        let samples: Vec<u16> = (0..32).map(|i| i * 100).collect();
        let ds = dataset(1, 16, 12, "MONOCHROME2", 2, u16_to_frame(&samples, 16));
        let decoded = decode_frames(&ds, native()).expect("decode");
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.frames[1], u16_to_frame(&samples[16..], 16));
    }

    #[test]
    fn short_native_pixel_data_is_a_frame_count_mismatch() {
        let ds = dataset(1, 8, 8, "MONOCHROME2", 3, vec![0; 40]);
        let err = decode_frames(&ds, native()).unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::FrameCountMismatch { expected: 3, found: 2 }
        ));
    }

    #[test]
    fn planar_colour_becomes_interleaved() {
        let mut planes = vec![10u8; 16];
        planes.extend(vec![20u8; 16]);
        planes.extend(vec![30u8; 16]);
        let mut ds = dataset(3, 8, 8, "RGB", 1, planes);
        ds.put(Element::uint16(PLANAR_CONFIGURATION, 1));
        let decoded = decode_frames(&ds, native()).expect("decode");
        assert_eq!(&decoded.frames[0][..6], &[10, 20, 30, 10, 20, 30]);
        assert_eq!(decoded.image.planar_configuration, 0);

        let encoded = encode_frames(&decoded, &TranscodeParams::new(TargetSyntax::ExplicitVrLittleEndian))
            .expect("encode");
        encoded.apply(&mut ds);
        assert_eq!(ds.uint16(PLANAR_CONFIGURATION), Some(0));
    }

    #[test]
    fn native_422_is_expanded_to_ybr_full() {
        // one row of Y1 Y2 Cb Cr pairs
        let pixels: Vec<u8> = [1u8, 2, 100, 200].repeat(8);
        let ds = dataset(3, 8, 8, "YBR_FULL_422", 1, pixels);
        let decoded = decode_frames(&ds, native()).expect("decode");
        assert_eq!(decoded.image.photometric_interpretation, "YBR_FULL");
        assert_eq!(&decoded.frames[0][..6], &[1, 100, 200, 2, 100, 200]);
    }

    #[test]
    fn rle_round_trip_sets_lossless_flag_once() {
        let samples: Vec<u16> = (0..16).map(|i| i * 250).collect();
        let mut ds = dataset(1, 16, 12, "MONOCHROME2", 1, u16_to_frame(&samples, 16));
        let decoded = decode_frames(&ds, native()).expect("decode");
        let encoded = encode_frames(&decoded, &TranscodeParams::new(TargetSyntax::RleLossless)).expect("encode");
        assert!(matches!(encoded.value, Value::Encapsulated(_)));
        encoded.apply(&mut ds);
        assert_eq!(ds.string(LOSSY_IMAGE_COMPRESSION).as_deref(), Some("00"));

        let rle = SyntaxProfile::lookup(RLE_LOSSLESS).expect("profile");
        let back = decode_frames(&ds, rle).expect("decode rle");
        assert_eq!(back.frames, decoded.frames);
    }

    #[test]
    fn lossy_targets_record_ratio_and_method() {
        let pixels: Vec<u8> = (0..16).map(|i| (i * 16) as u8).collect();
        let mut ds = dataset(1, 8, 8, "MONOCHROME2", 1, pixels);
        ds.put(Element::text(LOSSY_IMAGE_COMPRESSION_METHOD, VR::CS, "ISO_10918_1"));
        let decoded = decode_frames(&ds, native()).expect("decode");
        let encoded = encode_frames(&decoded, &TranscodeParams::new(TargetSyntax::JpegLsNearLossless))
            .expect("encode");
        encoded.apply(&mut ds);
        assert_eq!(ds.string(LOSSY_IMAGE_COMPRESSION).as_deref(), Some("01"));
        assert_eq!(
            ds.string(LOSSY_IMAGE_COMPRESSION_METHOD).as_deref(),
            Some("ISO_10918_1\\ISO_14495_1")
        );
        assert!(ds.string(LOSSY_IMAGE_COMPRESSION_RATIO).is_some());
    }

    #[test]
    fn near_zero_is_not_marked_lossy() {
        let ds = dataset(1, 8, 8, "MONOCHROME2", 1, vec![7; 16]);
        let decoded = decode_frames(&ds, native()).expect("decode");
        let params = TranscodeParams::new(TargetSyntax::JpegLsNearLossless).with_near_lossless_error(0);
        let encoded = encode_frames(&decoded, &params).expect("encode");
        assert!(encoded
            .updates
            .iter()
            .all(|u| !matches!(u, AttributeUpdate::Append { .. })));
    }

    #[test]
    fn signed_near_lossless_keeps_exact_values() {
        let values: Vec<i16> = (0..16)
            .map(|i| match i % 4 {
                0 => -2048,
                1 => 2047,
                2 => -2046 + i,
                _ => i * 100 - 800,
            })
            .collect();
        let samples: Vec<u16> = values.iter().map(|&v| v as u16).collect();
        let mut ds = dataset(1, 16, 12, "MONOCHROME2", 1, u16_to_frame(&samples, 16));
        ds.put(Element::uint16(PIXEL_REPRESENTATION, 1));
        let decoded = decode_frames(&ds, native()).expect("decode");
        let params = TranscodeParams::new(TargetSyntax::JpegLsNearLossless).with_near_lossless_error(3);
        let encoded = encode_frames(&decoded, &params).expect("encode");
        encoded.apply(&mut ds);
        assert_eq!(ds.string(LOSSY_IMAGE_COMPRESSION).as_deref(), Some("00"));

        let back = decode_frames(&ds, TargetSyntax::JpegLsNearLossless.profile()).expect("decode JPEG-LS");
        assert_eq!(back.frames[0], u16_to_frame(&samples, 16));
    }

    #[test]
    fn eight_bit_jpeg_from_sixteen_bit_words_updates_bits_allocated() {
        let samples: Vec<u16> = (0..16).map(|i| i * 15).collect();
        let mut ds = dataset(1, 16, 8, "MONOCHROME2", 1, u16_to_frame(&samples, 16));
        let decoded = decode_frames(&ds, native()).expect("decode");
        let encoded = encode_frames(&decoded, &TranscodeParams::new(TargetSyntax::JpegBaseline)).expect("encode");
        encoded.apply(&mut ds);
        assert_eq!(ds.uint16(BITS_ALLOCATED), Some(8));
        assert_eq!(ds.uint16(BITS_STORED), Some(8));
        assert_eq!(ds.uint16(HIGH_BIT), Some(7));

        let back = decode_frames(&ds, TargetSyntax::JpegBaseline.profile()).expect("decode JPEG");
        assert_eq!(back.image.bits_allocated, 8);
        assert_eq!(back.frames[0].len(), 16);
    }

    #[cfg(feature = "jpeg2000")]
    #[test]
    fn jpeg2000_marks_colour_transform_and_loss() {
        let pixels: Vec<u8> = (0..48u32).map(|i| ((i * 53) % 256) as u8).collect();
        let ds = dataset(3, 8, 8, "RGB", 1, pixels);
        let decoded = decode_frames(&ds, native()).expect("decode");

        let mut lossless = ds.clone();
        encode_frames(&decoded, &TranscodeParams::new(TargetSyntax::Jpeg2000Lossless))
            .expect("encode")
            .apply(&mut lossless);
        assert_eq!(lossless.string(PHOTOMETRIC_INTERPRETATION).as_deref(), Some("YBR_RCT"));
        assert_eq!(lossless.string(LOSSY_IMAGE_COMPRESSION).as_deref(), Some("00"));
        let back = decode_frames(&lossless, TargetSyntax::Jpeg2000Lossless.profile()).expect("decode");
        assert_eq!(back.image.photometric_interpretation, "RGB");
        assert_eq!(back.frames, decoded.frames);

        let mut lossy = ds;
        let params = TranscodeParams::new(TargetSyntax::Jpeg2000).with_compression_ratio_factor(20);
        encode_frames(&decoded, &params).expect("encode").apply(&mut lossy);
        assert_eq!(lossy.string(PHOTOMETRIC_INTERPRETATION).as_deref(), Some("YBR_ICT"));
        assert_eq!(lossy.string(LOSSY_IMAGE_COMPRESSION).as_deref(), Some("01"));
        assert_eq!(
            lossy.string(LOSSY_IMAGE_COMPRESSION_METHOD).as_deref(),
            Some("ISO_15444_1")
        );
    }

    #[test]
    fn one_bit_data_is_rejected_for_compressed_targets() {
        let ds = dataset(1, 1, 1, "MONOCHROME2", 1, vec![0xFF, 0x00]);
        let image = ImagePixel::from_dataset(&ds).expect("image");
        let err = check_target(&image, TargetSyntax::RleLossless).unwrap_err();
        assert!(matches!(err, TranscodeError::UnsupportedPixelData { .. }));
        assert!(check_target(&image, TargetSyntax::ImplicitVrLittleEndian).is_ok());
    }

    #[test]
    fn ratio_fits_a_decimal_string() {
        assert_eq!(format_ratio(12.3456), "12.35");
        assert!(format_ratio(1e20).len() <= 16);
    }
}
