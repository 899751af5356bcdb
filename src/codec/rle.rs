//
// rle.rs
// Dicom-Conv-rs
//
// RLE Lossless (PS3.5 Annex G): PackBits segments, one per byte plane of each sample.
//
// Thales Matheus Mendonça Santos - November 2025

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::{Result, TranscodeError};
use crate::pixel::ImagePixel;

const HEADER_LEN: usize = 64;
const MAX_SEGMENTS: usize = 15;

fn invalid(message: impl Into<String>) -> TranscodeError {
    TranscodeError::codec("RLE", message)
}

/// Decode one RLE frame into the canonical interleaved little endian layout.
pub fn decode_frame(data: &[u8], image: &ImagePixel) -> Result<Vec<u8>> {
    let bps = image.bytes_per_sample();
    let spp = usize::from(image.samples_per_pixel);
    let pixels = image.pixel_count();

    let segments = decode_segments(data, pixels)?;
    if segments.len() != bps * spp {
        return Err(invalid(format!(
            "{} segments for {} sample(s) of {} byte(s)",
            segments.len(),
            spp,
            bps
        )));
    }

    let mut frame = vec![0u8; pixels * spp * bps];
    for sample in 0..spp {
        for plane in 0..bps {
            // segments hold the most significant byte first
            let segment = &segments[sample * bps + plane];
            let byte = bps - 1 - plane;
            for (px, value) in segment.iter().enumerate() {
                frame[(px * spp + sample) * bps + byte] = *value;
            }
        }
    }
    Ok(frame)
}

fn decode_segments(data: &[u8], expected_len: usize) -> Result<Vec<Vec<u8>>> {
    if data.len() < HEADER_LEN {
        return Err(invalid("header is incomplete"));
    }
    let count = LittleEndian::read_u32(&data[0..4]) as usize;
    if count == 0 || count > MAX_SEGMENTS {
        return Err(invalid(format!("segment count {count} is invalid")));
    }
    let mut offsets = vec![0u32; count];
    LittleEndian::read_u32_into(&data[4..4 + count * 4], &mut offsets);

    (0..count)
        .map(|i| {
            let start = offsets[i] as usize;
            let end = offsets.get(i + 1).map_or(data.len(), |&o| o as usize);
            let segment = data.get(start..end).ok_or_else(|| {
                invalid(format!("segment {i} bounds {start}-{end} are invalid"))
            })?;
            decode_segment(segment, expected_len)
                .ok_or_else(|| invalid(format!("segment {i} is too short")))
        })
        .collect()
}

fn decode_segment(mut data: &[u8], expected_len: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    while out.len() < expected_len && !data.is_empty() {
        let n = data[0];
        if n <= 127 {
            let len = usize::from(n) + 1;
            let literal = data.get(1..1 + len)?;
            out.extend_from_slice(literal);
            data = &data[1 + len..];
        } else if n > 128 {
            let value = *data.get(1)?;
            out.resize(out.len() + 257 - usize::from(n), value);
            data = &data[2..];
        } else {
            data = &data[1..];
        }
    }
    if out.len() < expected_len {
        return None;
    }
    if out.len() > expected_len {
        warn!("RLE segment decodes to {} bytes, expected {}", out.len(), expected_len);
        out.truncate(expected_len);
    }
    Some(out)
}

/// Encode one canonical frame as an RLE Lossless fragment.
pub fn encode_frame(frame: &[u8], image: &ImagePixel) -> Result<Vec<u8>> {
    let bps = image.bytes_per_sample();
    let spp = usize::from(image.samples_per_pixel);
    let pixels = image.pixel_count();
    let columns = usize::from(image.columns);

    if bps * spp > MAX_SEGMENTS {
        return Err(TranscodeError::unsupported(
            "RLE Lossless",
            format!("{} segments needed, at most {MAX_SEGMENTS} allowed", bps * spp),
        ));
    }

    let mut out = vec![0u8; HEADER_LEN];
    LittleEndian::write_u32(&mut out[0..4], (bps * spp) as u32);

    let mut plane = vec![0u8; pixels];
    for sample in 0..spp {
        for p in 0..bps {
            let byte = bps - 1 - p;
            for (px, value) in plane.iter_mut().enumerate() {
                *value = frame[(px * spp + sample) * bps + byte];
            }
            let index = sample * bps + p;
            let offset = out.len() as u32;
            LittleEndian::write_u32(&mut out[4 + index * 4..8 + index * 4], offset);
            for row in plane.chunks(columns.max(1)) {
                encode_row(row, &mut out);
            }
            if out.len() % 2 == 1 {
                out.push(0);
            }
        }
    }
    Ok(out)
}

/// PackBits encoding of a single row.
fn encode_row(mut data: &[u8], out: &mut Vec<u8>) {
    while !data.is_empty() {
        let mut run = 1;
        while run < data.len() && run < 128 && data[run] == data[0] {
            run += 1;
        }

        if run > 1 {
            out.push((257 - run) as u8);
            out.push(data[0]);
            data = &data[run..];
            continue;
        }

        let mut len = 1;
        while len < data.len() && len < 128 && data[len] != data[len - 1] {
            len += 1;
        }
        // leave the last byte for a replicate run that starts on it
        if len + 1 < data.len() && data[len - 1] == data[len] {
            len -= 1;
        }
        out.push((len - 1) as u8);
        out.extend_from_slice(&data[..len]);
        data = &data[len..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(rows: u16, columns: u16, spp: u16, bits: u16) -> ImagePixel {
        ImagePixel {
            rows,
            columns,
            samples_per_pixel: spp,
            bits_allocated: bits,
            bits_stored: bits,
            high_bit: bits - 1,
            pixel_representation: 0,
            photometric_interpretation: if spp == 3 { "RGB" } else { "MONOCHROME2" }.to_string(),
            planar_configuration: 0,
            number_of_frames: 1,
        }
    }

    fn packbits(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_row(data, &mut out);
        out
    }

    #[test]
    fn packbits_runs() {
        assert_eq!(packbits(&[42]), vec![0, 42]);
        assert_eq!(packbits(&[5, 5, 5, 5]), vec![253, 5]);
        assert_eq!(
            packbits(&[1, 2, 3, 4, 5, 5, 5, 6, 7, 8, 8, 9]),
            vec![3, 1, 2, 3, 4, 254, 5, 1, 6, 7, 255, 8, 0, 9]
        );
        assert_eq!(packbits(&[99; 129]), vec![129, 99, 0, 99]);
    }

    #[test]
    fn sixteen_bit_frame_is_restored() {
        let image = image(2, 3, 1, 16);
        let frame: Vec<u8> = [0u16, 1, 1, 1, 0x1234, 0xFFFF]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let encoded = encode_frame(&frame, &image).expect("encode");
        assert_eq!(LittleEndian::read_u32(&encoded[0..4]), 2);
        assert_eq!(decode_frame(&encoded, &image).expect("decode"), frame);
    }

    #[test]
    fn rgb_frame_is_restored() {
        let image = image(2, 2, 3, 8);
        let frame = vec![255, 0, 0, 255, 0, 0, 0, 255, 0, 10, 20, 30];
        let encoded = encode_frame(&frame, &image).expect("encode");
        assert_eq!(LittleEndian::read_u32(&encoded[0..4]), 3);
        assert_eq!(encoded.len() % 2, 0);
        assert_eq!(decode_frame(&encoded, &image).expect("decode"), frame);
    }

    #[test]
    fn too_many_segments_is_unsupported() {
        let image = image(1, 1, 4, 32);
        let err = encode_frame(&[0; 16], &image).unwrap_err();
        assert!(matches!(err, TranscodeError::UnsupportedPixelData { .. }));
    }

    #[test]
    fn short_segment_is_an_error() {
        let image = image(2, 2, 1, 8);
        let mut data = vec![0u8; HEADER_LEN];
        data[0] = 1;
        data[4] = 64;
        data.extend_from_slice(&[1, 7, 7]);
        let err = decode_frame(&data, &image).unwrap_err();
        assert!(matches!(err, TranscodeError::Codec { codec: "RLE", .. }));
    }
}
