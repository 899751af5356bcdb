//
// jpeg2000.rs
// Dicom-Conv-rs
//
// JPEG 2000 frames through OpenJPEG, compiled with the `jpeg2000` feature only.
// Decoding uses the `jpeg2k` wrapper, encoding drives `openjpeg-sys` directly
// for rate control.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::error::Result;
use crate::pixel::ImagePixel;

#[cfg(not(feature = "jpeg2000"))]
use crate::error::TranscodeError;

const SOC: u16 = 0xFF4F;
const SIZ: u16 = 0xFF51;
const COD: u16 = 0xFF52;
const SOT: u16 = 0xFF90;
const EOC: u16 = 0xFFD9;

/// Decode one frame; returns the canonical frame and whether colour was converted to RGB.
#[cfg(feature = "jpeg2000")]
pub fn decode_frame(data: &[u8], image: &ImagePixel) -> Result<(Vec<u8>, bool)> {
    openjpeg::decode_frame(data, image)
}

#[cfg(not(feature = "jpeg2000"))]
pub fn decode_frame(_data: &[u8], _image: &ImagePixel) -> Result<(Vec<u8>, bool)> {
    Err(TranscodeError::CodecUnavailable("JPEG 2000"))
}

/// Encode one canonical frame.
///
/// `rate` is the target compression ratio of an irreversible codestream; `None`
/// writes a reversible one.
#[cfg(feature = "jpeg2000")]
pub fn encode_frame(frame: &[u8], image: &ImagePixel, rate: Option<u8>, target: &'static str) -> Result<Vec<u8>> {
    openjpeg::encode_frame(frame, image, rate, target)
}

#[cfg(not(feature = "jpeg2000"))]
pub fn encode_frame(
    _frame: &[u8],
    _image: &ImagePixel,
    _rate: Option<u8>,
    _target: &'static str,
) -> Result<Vec<u8>> {
    Err(TranscodeError::CodecUnavailable("JPEG 2000"))
}

/// RGB frames go through the colour transform.
fn uses_colour_transform(image: &ImagePixel) -> bool {
    image.samples_per_pixel == 3 && image.photometric_interpretation == "RGB"
}

/// Photometric interpretation of the encoded frames.
pub fn encoded_photometric(image: &ImagePixel, lossless: bool) -> String {
    if !uses_colour_transform(image) {
        image.photometric_interpretation.clone()
    } else if lossless {
        "YBR_RCT".to_string()
    } else {
        "YBR_ICT".to_string()
    }
}

/// Whether the main header's COD segment enables the multiple component transform.
///
/// JP2 files are searched for their contiguous codestream.
pub fn codestream_uses_mct(data: &[u8]) -> bool {
    let start_of_codestream = [SOC.to_be_bytes(), SIZ.to_be_bytes()].concat();
    let Some(start) = data
        .windows(4)
        .position(|w| w == start_of_codestream.as_slice())
    else {
        return false;
    };
    let mut pos = start + 2;
    while let Some(header) = data.get(pos..pos + 4) {
        let marker = u16::from_be_bytes([header[0], header[1]]);
        let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
        match marker {
            // Scod, progression order, two bytes of layers, then MCT
            COD => return data.get(pos + 8).is_some_and(|&mct| mct & 1 == 1),
            SOT | EOC => return false,
            _ if len < 2 => return false,
            _ => pos += 2 + len,
        }
    }
    false
}

/// Whether OpenJPEG hands back RGB for a frame stored as `image`.
#[cfg_attr(not(feature = "jpeg2000"), allow(dead_code))]
fn decodes_to_rgb(data: &[u8], image: &ImagePixel) -> bool {
    image.samples_per_pixel == 3
        && (matches!(
            image.photometric_interpretation.as_str(),
            "YBR_ICT" | "YBR_RCT"
        ) || codestream_uses_mct(data))
}

#[cfg(feature = "jpeg2000")]
mod openjpeg {
    use std::ffi::CString;
    use std::os::raw::c_char;
    use std::ptr::NonNull;

    use jpeg2k::Image;
    use openjpeg_sys as opj;
    use tracing::{debug, warn};

    use crate::error::{Result, TranscodeError};
    use crate::pixel::{frame_to_u16, ImagePixel};

    fn codec_error(e: impl std::fmt::Display) -> TranscodeError {
        TranscodeError::codec("JPEG 2000", e.to_string())
    }

    pub fn decode_frame(data: &[u8], image: &ImagePixel) -> Result<(Vec<u8>, bool)> {
        if image.bits_allocated != 8 && image.bits_allocated != 16 {
            return Err(TranscodeError::codec(
                "JPEG 2000",
                format!("BitsAllocated {} is not supported", image.bits_allocated),
            ));
        }
        let decoded = Image::from_bytes(data).map_err(codec_error)?;
        if decoded.width() != u32::from(image.columns) || decoded.height() != u32::from(image.rows) {
            return Err(TranscodeError::codec(
                "JPEG 2000",
                format!(
                    "frame is {}x{}, the data set says {}x{}",
                    decoded.width(),
                    decoded.height(),
                    image.columns,
                    image.rows
                ),
            ));
        }

        let samples = usize::from(image.samples_per_pixel);
        let bps = image.bytes_per_sample();
        let mut frame = vec![0u8; image.frame_len()];
        let components = decoded.components();
        if components.len() > samples {
            warn!(
                "JPEG 2000 frame has {} components, keeping the first {}",
                components.len(),
                samples
            );
        }
        for (c, component) in components.iter().enumerate().take(samples) {
            for (i, value) in component.data().iter().enumerate() {
                let offset = (i * samples + c) * bps;
                if let Some(slot) = frame.get_mut(offset..offset + bps) {
                    slot.copy_from_slice(&value.to_le_bytes()[..bps]);
                }
            }
        }
        Ok((frame, super::decodes_to_rgb(data, image)))
    }

    struct Codec(NonNull<opj::opj_codec_t>);

    impl Drop for Codec {
        fn drop(&mut self) {
            unsafe { opj::opj_destroy_codec(self.0.as_ptr()) }
        }
    }

    struct RawImage(NonNull<opj::opj_image_t>);

    impl Drop for RawImage {
        fn drop(&mut self) {
            unsafe { opj::opj_image_destroy(self.0.as_ptr()) }
        }
    }

    struct Stream(NonNull<opj::opj_stream_t>);

    impl Drop for Stream {
        fn drop(&mut self) {
            unsafe { opj::opj_stream_destroy(self.0.as_ptr()) }
        }
    }

    /// Resolution levels the frame can hold, at most OpenJPEG's default of 6.
    fn resolutions(width: u32, height: u32) -> i32 {
        let smallest = width.min(height).max(1);
        (32 - smallest.leading_zeros()).min(6) as i32
    }

    /// Interleaved samples as signed integers, one plane per component.
    fn component_planes(frame: &[u8], image: &ImagePixel) -> Vec<Vec<i32>> {
        let samples = usize::from(image.samples_per_pixel);
        let mask = image.stored_mask() as u16;
        let sign = 1u16 << (image.bits_stored - 1);
        let mut planes = vec![Vec::with_capacity(image.pixel_count()); samples];
        for (i, raw) in frame_to_u16(frame, image.bits_allocated).into_iter().enumerate() {
            let value = raw & mask;
            let value = if image.is_signed() && value & sign != 0 {
                i32::from(value) - (i32::from(mask) + 1)
            } else {
                i32::from(value)
            };
            planes[i % samples].push(value);
        }
        planes
    }

    pub fn encode_frame(frame: &[u8], image: &ImagePixel, rate: Option<u8>, target: &'static str) -> Result<Vec<u8>> {
        if image.bits_allocated != 8 && image.bits_allocated != 16 {
            return Err(TranscodeError::unsupported(
                target,
                format!("BitsAllocated {} (8 or 16 required)", image.bits_allocated),
            ));
        }
        if image.bits_stored < 2 {
            return Err(TranscodeError::unsupported(target, "BitsStored below 2"));
        }
        if image.samples_per_pixel != 1 && image.samples_per_pixel != 3 {
            return Err(TranscodeError::unsupported(
                target,
                format!("{} samples per pixel", image.samples_per_pixel),
            ));
        }
        if frame.len() < image.frame_len() {
            return Err(TranscodeError::unsupported(target, "frame does not match its dimensions"));
        }

        let (width, height) = (u32::from(image.columns), u32::from(image.rows));
        let planes = component_planes(&frame[..image.frame_len()], image);
        let mct = super::uses_colour_transform(image);

        let mut component_parameters: Vec<opj::opj_image_cmptparm_t> = planes
            .iter()
            .map(|_| {
                let mut parameters: opj::opj_image_cmptparm_t = unsafe { std::mem::zeroed() };
                parameters.dx = 1;
                parameters.dy = 1;
                parameters.w = width;
                parameters.h = height;
                parameters.prec = u32::from(image.bits_stored);
                parameters.sgnd = u32::from(image.is_signed());
                parameters
            })
            .collect();
        let colour_space = match (image.samples_per_pixel, mct) {
            (1, _) => opj::COLOR_SPACE::OPJ_CLRSPC_GRAY,
            (_, true) => opj::COLOR_SPACE::OPJ_CLRSPC_SRGB,
            _ => opj::COLOR_SPACE::OPJ_CLRSPC_SYCC,
        };

        let mut parameters: opj::opj_cparameters_t = unsafe { std::mem::zeroed() };
        unsafe { opj::opj_set_default_encoder_parameters(&mut parameters) };
        parameters.tcp_numlayers = 1;
        parameters.cp_disto_alloc = 1;
        parameters.tcp_rates[0] = rate.map_or(0.0, f32::from);
        parameters.irreversible = i32::from(rate.is_some());
        parameters.tcp_mct = u8::from(mct) as c_char;
        parameters.numresolution = resolutions(width, height);
        debug!(
            "JPEG 2000 {} codestream, rate {:?}, colour transform {}",
            if rate.is_some() { "irreversible" } else { "reversible" },
            rate,
            mct
        );

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.j2k");
        let c_path = path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| codec_error(format!("unusable scratch path {:?}", path)))?;

        unsafe {
            let raw = NonNull::new(opj::opj_image_create(
                component_parameters.len() as u32,
                component_parameters.as_mut_ptr(),
                colour_space,
            ))
            .map(RawImage)
            .ok_or_else(|| codec_error("could not allocate the image"))?;
            let img = raw.0.as_ptr();
            (*img).x0 = 0;
            (*img).y0 = 0;
            (*img).x1 = width;
            (*img).y1 = height;
            let comps = std::slice::from_raw_parts_mut((*img).comps, planes.len());
            for (comp, plane) in comps.iter_mut().zip(&planes) {
                std::slice::from_raw_parts_mut(comp.data, plane.len()).copy_from_slice(plane);
            }

            let codec = NonNull::new(opj::opj_create_compress(opj::CODEC_FORMAT::OPJ_CODEC_J2K))
                .map(Codec)
                .ok_or_else(|| codec_error("could not create the encoder"))?;
            if opj::opj_setup_encoder(codec.0.as_ptr(), &mut parameters, img) == 0 {
                return Err(codec_error("encoder rejected the parameters"));
            }

            let stream = NonNull::new(opj::opj_stream_create_default_file_stream(c_path.as_ptr(), 0))
                .map(Stream)
                .ok_or_else(|| codec_error("could not open the output stream"))?;
            if opj::opj_start_compress(codec.0.as_ptr(), img, stream.0.as_ptr()) == 0
                || opj::opj_encode(codec.0.as_ptr(), stream.0.as_ptr()) == 0
                || opj::opj_end_compress(codec.0.as_ptr(), stream.0.as_ptr()) == 0
            {
                return Err(codec_error("encoding failed"));
            }
            // closes the file
            drop(stream);
        }
        Ok(std::fs::read(&path)?)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::codec::jpeg2000::codestream_uses_mct;
        use crate::pixel::u16_to_frame;

        fn image(spp: u16, bits: u16, stored: u16, photometric: &str, size: u16) -> ImagePixel {
            ImagePixel {
                rows: size,
                columns: size,
                samples_per_pixel: spp,
                bits_allocated: bits,
                bits_stored: stored,
                high_bit: stored - 1,
                pixel_representation: 0,
                photometric_interpretation: photometric.to_string(),
                planar_configuration: 0,
                number_of_frames: 1,
            }
        }

        fn textured(len: usize, max: u32) -> Vec<u16> {
            (0..len as u32)
                .map(|i| ((i * 37 + (i / 64) * 11 + (i * i) % 13) % (max + 1)) as u16)
                .collect()
        }

        #[test]
        fn luma16_is_exact_when_reversible() {
            let image = image(1, 16, 12, "MONOCHROME2", 16);
            let frame = u16_to_frame(&textured(256, 4095), 16);
            let data = encode_frame(&frame, &image, None, "JPEG 2000 Lossless").expect("encode");
            assert!(!codestream_uses_mct(&data));
            let (decoded, converted) = decode_frame(&data, &image).expect("decode");
            assert_eq!(decoded, frame);
            assert!(!converted);
        }

        #[test]
        fn signed_luma_is_exact_when_reversible() {
            let mut image = image(1, 16, 16, "MONOCHROME2", 8);
            image.pixel_representation = 1;
            let values: Vec<u16> = (0..64).map(|i: i32| (i * 997 - 32000) as i16 as u16).collect();
            let frame = u16_to_frame(&values, 16);
            let data = encode_frame(&frame, &image, None, "JPEG 2000 Lossless").expect("encode");
            let (decoded, _) = decode_frame(&data, &image).expect("decode");
            assert_eq!(decoded, frame);
        }

        #[test]
        fn rgb8_is_exact_through_the_reversible_transform() {
            let image = image(3, 8, 8, "RGB", 16);
            let frame: Vec<u8> = textured(768, 255).into_iter().map(|v| v as u8).collect();
            let data = encode_frame(&frame, &image, None, "JPEG 2000 Lossless").expect("encode");
            assert!(codestream_uses_mct(&data));

            let stored = ImagePixel {
                photometric_interpretation: "YBR_RCT".to_string(),
                ..image
            };
            let (decoded, converted) = decode_frame(&data, &stored).expect("decode");
            assert_eq!(decoded, frame);
            assert!(converted);
        }

        #[test]
        fn compression_factor_controls_the_codestream_size() {
            let image = image(1, 8, 8, "MONOCHROME2", 128);
            let frame: Vec<u8> = textured(128 * 128, 255).into_iter().map(|v| v as u8).collect();
            let mild = encode_frame(&frame, &image, Some(5), "JPEG 2000").expect("encode");
            let strong = encode_frame(&frame, &image, Some(50), "JPEG 2000").expect("encode");
            assert!(strong.len() < mild.len());
            assert!(mild.len() < frame.len());

            let (decoded, _) = decode_frame(&strong, &image).expect("decode");
            assert_eq!(decoded.len(), frame.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(spp: u16, photometric: &str) -> ImagePixel {
        ImagePixel {
            rows: 1,
            columns: 1,
            samples_per_pixel: spp,
            bits_allocated: 8,
            bits_stored: 8,
            high_bit: 7,
            pixel_representation: 0,
            photometric_interpretation: photometric.to_string(),
            planar_configuration: 0,
            number_of_frames: 1,
        }
    }

    fn main_header(mct: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F];
        // SIZ with a dummy body
        data.extend_from_slice(&[0xFF, 0x51, 0x00, 0x04, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, mct]);
        data.extend_from_slice(&[0x05, 0x04, 0x04, 0x00, 0x01]);
        data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        data
    }

    #[test]
    fn colour_transform_is_read_from_cod() {
        assert!(codestream_uses_mct(&main_header(1)));
        assert!(!codestream_uses_mct(&main_header(0)));
        assert!(!codestream_uses_mct(&[0xFF, 0x4F]));

        let mut jp2 = vec![0, 0, 0, 12, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
        jp2.extend(main_header(1));
        assert!(codestream_uses_mct(&jp2));
    }

    #[test]
    fn only_transformed_colour_decodes_to_rgb() {
        let ycbcr = image(3, "YBR_FULL");
        assert!(!decodes_to_rgb(&main_header(0), &ycbcr));
        assert!(decodes_to_rgb(&main_header(1), &ycbcr));
        assert!(decodes_to_rgb(&main_header(0), &image(3, "YBR_ICT")));
        assert!(!decodes_to_rgb(&main_header(1), &image(1, "MONOCHROME2")));
    }

    #[test]
    fn photometric_follows_the_transform() {
        assert_eq!(encoded_photometric(&image(3, "RGB"), true), "YBR_RCT");
        assert_eq!(encoded_photometric(&image(3, "RGB"), false), "YBR_ICT");
        assert_eq!(encoded_photometric(&image(3, "YBR_FULL"), false), "YBR_FULL");
        assert_eq!(encoded_photometric(&image(1, "MONOCHROME1"), false), "MONOCHROME1");
    }

    #[cfg(not(feature = "jpeg2000"))]
    #[test]
    fn reports_missing_codec() {
        let image = image(1, "MONOCHROME2");
        assert!(matches!(
            decode_frame(&[0xFF, 0x4F], &image),
            Err(TranscodeError::CodecUnavailable("JPEG 2000"))
        ));
        assert!(matches!(
            encode_frame(&[0], &image, None, "JPEG 2000"),
            Err(TranscodeError::CodecUnavailable("JPEG 2000"))
        ));
    }
}
