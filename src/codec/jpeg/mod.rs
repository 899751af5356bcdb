//
// mod.rs
// Dicom-Conv-rs
//
// JPEG family codecs: marker segment plumbing plus the DCT and lossless processes.
// 8-bit DCT streams go through jpeg-decoder / jpeg-encoder, the rest is coded here.
//
// Thales Matheus Mendonça Santos - November 2025

pub mod bitio;
pub mod huffman;
pub mod lossless;
pub mod sequential;

use jpeg_decoder::PixelFormat;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use tracing::debug;

use crate::error::{Result, TranscodeError};
use crate::params::TranscodeParams;
use crate::pixel::{frame_to_u16, u16_to_frame, ImagePixel};
use crate::transfer_syntax::JpegProcess;

pub const SOF0: u8 = 0xC0;
pub const SOF1: u8 = 0xC1;
pub const SOF2: u8 = 0xC2;
pub const SOF3: u8 = 0xC3;
pub const DHT: u8 = 0xC4;
pub const SOI: u8 = 0xD8;
pub const EOI: u8 = 0xD9;
pub const SOS: u8 = 0xDA;
pub const DQT: u8 = 0xDB;
pub const DRI: u8 = 0xDD;
pub const APP14: u8 = 0xEE;
pub const SOF55: u8 = 0xF7;
pub const LSE: u8 = 0xF8;

/// Samples of a decoded JPEG-family stream, interleaved by component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u16,
    pub height: u16,
    pub precision: u8,
    pub component_ids: Vec<u8>,
    /// Colour transform flag of an Adobe APP14 segment, when present.
    pub adobe_transform: Option<u8>,
    pub samples: Vec<u16>,
}

pub struct Segment<'a> {
    pub marker: u8,
    pub body: &'a [u8],
    /// Offset just past the segment.
    pub end: usize,
}

/// Read the marker segment at `pos`, skipping any fill bytes in front of it.
pub fn next_segment(data: &[u8], mut pos: usize) -> Result<Segment<'_>> {
    if data.get(pos) != Some(&0xFF) {
        return Err(TranscodeError::codec(
            "JPEG",
            format!("expected a marker at offset {pos}"),
        ));
    }
    while data.get(pos) == Some(&0xFF) {
        pos += 1;
    }
    let marker = *data
        .get(pos)
        .ok_or_else(|| TranscodeError::codec("JPEG", "stream ends inside a marker"))?;
    pos += 1;
    if matches!(marker, SOI | EOI | 0x01 | 0xD0..=0xD7) {
        return Ok(Segment {
            marker,
            body: &[],
            end: pos,
        });
    }
    let len = data
        .get(pos..pos + 2)
        .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
        .ok_or_else(|| TranscodeError::codec("JPEG", "truncated marker segment"))?;
    let body = data
        .get(pos + 2..pos + len)
        .filter(|_| len >= 2)
        .ok_or_else(|| {
            TranscodeError::codec("JPEG", format!("marker {marker:#04X} segment overruns the stream"))
        })?;
    Ok(Segment {
        marker,
        body,
        end: pos + len,
    })
}

pub fn put_segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComponent {
    pub id: u8,
    pub h: u8,
    pub v: u8,
    pub tq: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub marker: u8,
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub components: Vec<FrameComponent>,
}

impl FrameHeader {
    pub fn parse(marker: u8, body: &[u8]) -> Result<Self> {
        if body.len() < 6 {
            return Err(TranscodeError::codec("JPEG", "truncated frame header"));
        }
        let count = usize::from(body[5]);
        if count == 0 || body.len() < 6 + 3 * count {
            return Err(TranscodeError::codec("JPEG", "truncated frame header"));
        }
        let components = body[6..6 + 3 * count]
            .chunks_exact(3)
            .map(|c| FrameComponent {
                id: c[0],
                h: c[1] >> 4,
                v: c[1] & 0x0F,
                tq: c[2],
            })
            .collect();
        Ok(FrameHeader {
            marker,
            precision: body[0],
            height: u16::from_be_bytes([body[1], body[2]]),
            width: u16::from_be_bytes([body[3], body[4]]),
            components,
        })
    }

    fn with_ids(marker: u8, precision: u8, width: u16, height: u16, ids: &[u8]) -> Self {
        FrameHeader {
            marker,
            precision,
            height,
            width,
            components: ids
                .iter()
                .map(|&id| FrameComponent { id, h: 1, v: 1, tq: 0 })
                .collect(),
        }
    }

    pub fn lossless(precision: u8, width: u16, height: u16, components: usize) -> Self {
        let ids: Vec<u8> = (1..=components as u8).collect();
        FrameHeader::with_ids(SOF3, precision, width, height, &ids)
    }

    pub fn dct(precision: u8, width: u16, height: u16, ids: &[u8]) -> Self {
        let marker = if precision == 8 { SOF0 } else { SOF1 };
        FrameHeader::with_ids(marker, precision, width, height, ids)
    }

    pub fn write(&self, marker: u8, out: &mut Vec<u8>) {
        let mut body = vec![self.precision];
        body.extend_from_slice(&self.height.to_be_bytes());
        body.extend_from_slice(&self.width.to_be_bytes());
        body.push(self.components.len() as u8);
        for c in &self.components {
            body.extend_from_slice(&[c.id, (c.h << 4) | c.v, c.tq]);
        }
        put_segment(out, marker, &body);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanComponent {
    pub id: u8,
    pub dc_table: u8,
    pub ac_table: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeader {
    pub components: Vec<ScanComponent>,
    pub ss: u8,
    pub se: u8,
    pub ah: u8,
    pub al: u8,
}

impl ScanHeader {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let count = usize::from(*body.first().unwrap_or(&0));
        if count == 0 || body.len() < 4 + 2 * count {
            return Err(TranscodeError::codec("JPEG", "truncated scan header"));
        }
        let components = body[1..1 + 2 * count]
            .chunks_exact(2)
            .map(|c| ScanComponent {
                id: c[0],
                dc_table: c[1] >> 4,
                ac_table: c[1] & 0x0F,
            })
            .collect();
        let tail = &body[1 + 2 * count..];
        Ok(ScanHeader {
            components,
            ss: tail[0],
            se: tail[1],
            ah: tail[2] >> 4,
            al: tail[2] & 0x0F,
        })
    }

    /// One interleaved scan, component `i` using DC table `i`.
    pub fn lossless(components: usize, predictor: u8) -> Self {
        ScanHeader {
            components: (0..components as u8)
                .map(|i| ScanComponent {
                    id: i + 1,
                    dc_table: i,
                    ac_table: 0,
                })
                .collect(),
            ss: predictor,
            se: 0,
            ah: 0,
            al: 0,
        }
    }

    /// One interleaved full-spectrum scan sharing table 0.
    pub fn sequential(ids: &[u8]) -> Self {
        ScanHeader {
            components: ids
                .iter()
                .map(|&id| ScanComponent {
                    id,
                    dc_table: 0,
                    ac_table: 0,
                })
                .collect(),
            ss: 0,
            se: 63,
            ah: 0,
            al: 0,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut body = vec![self.components.len() as u8];
        for c in &self.components {
            body.extend_from_slice(&[c.id, (c.dc_table << 4) | c.ac_table]);
        }
        body.extend_from_slice(&[self.ss, self.se, (self.ah << 4) | self.al]);
        put_segment(out, SOS, &body);
    }
}

/// Find the frame header of a stream.
pub fn read_frame_header(data: &[u8]) -> Result<FrameHeader> {
    let mut pos = 0;
    while pos < data.len() {
        let segment = next_segment(data, pos)?;
        match segment.marker {
            0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF | SOF55 => {
                return FrameHeader::parse(segment.marker, segment.body);
            }
            SOS | EOI => break,
            _ => pos = segment.end,
        }
    }
    Err(TranscodeError::codec("JPEG", "no frame header before the first scan"))
}

/// Full-range YCbCr to RGB for samples of the given precision.
fn ycbcr_to_rgb(samples: &mut [u16], precision: u8) {
    let max = ((1u32 << precision) - 1) as f32;
    let half = (1u32 << (precision - 1)) as f32;
    for px in samples.chunks_exact_mut(3) {
        let y = f32::from(px[0]);
        let cb = f32::from(px[1]) - half;
        let cr = f32::from(px[2]) - half;
        let clamp = |v: f32| v.round().clamp(0.0, max) as u16;
        px[0] = clamp(y + 1.402 * cr);
        px[1] = clamp(y - 0.344_136 * cb - 0.714_136 * cr);
        px[2] = clamp(y + 1.772 * cb);
    }
}

fn check_dimensions(width: u16, height: u16, image: &ImagePixel) -> Result<()> {
    if width != image.columns || height != image.rows {
        return Err(TranscodeError::codec(
            "JPEG",
            format!(
                "frame is {}x{}, the data set says {}x{}",
                width, height, image.columns, image.rows
            ),
        ));
    }
    Ok(())
}

/// Decode one JPEG (DCT or lossless) frame.
///
/// Returns the canonical frame and whether colour samples were converted to RGB.
pub fn decode_frame(data: &[u8], image: &ImagePixel) -> Result<(Vec<u8>, bool)> {
    let header = read_frame_header(data)?;
    debug!(
        "JPEG frame SOF{} precision {} with {} component(s)",
        header.marker - 0xC0,
        header.precision,
        header.components.len()
    );
    match (header.marker, header.precision) {
        (SOF3, _) => {
            let decoded = lossless::decode(data)?;
            check_dimensions(decoded.width, decoded.height, image)?;
            Ok((u16_to_frame(&decoded.samples, image.bits_allocated), false))
        }
        (SOF0..=SOF2, 8) => decode_with_jpeg_decoder(data, image),
        (SOF0 | SOF1, _) => {
            let mut decoded = sequential::decode(data)?;
            check_dimensions(decoded.width, decoded.height, image)?;
            let mut converted = false;
            if decoded.component_ids.len() == 3 {
                let rgb_ids = decoded.component_ids == sequential::RGB_COMPONENT_IDS;
                let transform = decoded.adobe_transform.unwrap_or(if rgb_ids { 0 } else { 1 });
                if transform == 1 {
                    ycbcr_to_rgb(&mut decoded.samples, decoded.precision);
                    converted = true;
                }
            }
            Ok((u16_to_frame(&decoded.samples, image.bits_allocated), converted))
        }
        (marker, precision) => Err(TranscodeError::codec(
            "JPEG",
            format!(
                "SOF{} with {}-bit precision is not supported",
                marker.wrapping_sub(0xC0),
                precision
            ),
        )),
    }
}

fn decode_with_jpeg_decoder(data: &[u8], image: &ImagePixel) -> Result<(Vec<u8>, bool)> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| TranscodeError::codec("JPEG", e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| TranscodeError::codec("JPEG", "decoder returned no image info"))?;
    check_dimensions(info.width, info.height, image)?;

    let converted = match info.pixel_format {
        PixelFormat::L8 => false,
        PixelFormat::RGB24 => true,
        other => {
            return Err(TranscodeError::codec(
                "JPEG",
                format!("unexpected pixel format {other:?}"),
            ))
        }
    };
    let frame = if image.bits_allocated > 8 {
        pixels.iter().flat_map(|&p| u16::from(p).to_le_bytes()).collect()
    } else {
        pixels
    };
    Ok((frame, converted))
}

/// Encode a frame with process 14 using the stored bits as precision.
pub fn encode_lossless(frame: &[u8], image: &ImagePixel, predictor: u8, target: &'static str) -> Result<Vec<u8>> {
    if image.bits_allocated != 8 && image.bits_allocated != 16 {
        return Err(TranscodeError::unsupported(
            target,
            format!("BitsAllocated {} (8 or 16 required)", image.bits_allocated),
        ));
    }
    if image.bits_stored < 2 {
        return Err(TranscodeError::unsupported(target, "BitsStored below 2"));
    }
    if image.samples_per_pixel > 4 {
        return Err(TranscodeError::unsupported(
            target,
            format!("{} samples per pixel", image.samples_per_pixel),
        ));
    }
    let samples = frame_to_u16(frame, image.bits_allocated);
    lossless::encode(
        &samples,
        image.columns,
        image.rows,
        usize::from(image.samples_per_pixel),
        image.bits_stored as u8,
        predictor,
    )
}

/// Encode a frame with a lossy DCT process.
///
/// Returns the compressed frame and the photometric interpretation of its content.
pub fn encode_dct(
    frame: &[u8],
    image: &ImagePixel,
    process: JpegProcess,
    params: &TranscodeParams,
    target: &'static str,
) -> Result<(Vec<u8>, String)> {
    if image.is_signed() {
        return Err(TranscodeError::unsupported(target, "signed pixel data"));
    }
    if image.samples_per_pixel != 1 && image.samples_per_pixel != 3 {
        return Err(TranscodeError::unsupported(
            target,
            format!("{} samples per pixel", image.samples_per_pixel),
        ));
    }
    if image.photometric_interpretation == "PALETTE COLOR" {
        return Err(TranscodeError::unsupported(target, "palette colour images"));
    }
    if image.bits_allocated != 8 && image.bits_allocated != 16 {
        return Err(TranscodeError::unsupported(
            target,
            format!("BitsAllocated {}", image.bits_allocated),
        ));
    }

    let mask = image.stored_mask() as u16;
    let samples: Vec<u16> = frame_to_u16(frame, image.bits_allocated)
        .into_iter()
        .map(|s| s & mask)
        .collect();
    let photometric = image.photometric_interpretation.clone();
    let sequential_process = matches!(process, JpegProcess::Baseline | JpegProcess::Extended);

    if image.bits_stored > 8 {
        if process != JpegProcess::Extended || image.bits_stored > 12 {
            return Err(TranscodeError::unsupported(
                target,
                format!("BitsStored {} exceeds the precision of the process", image.bits_stored),
            ));
        }
        let data = sequential::encode(
            &samples,
            image.columns,
            image.rows,
            usize::from(image.samples_per_pixel),
            12,
            params.jpeg_quality,
        )?;
        return Ok((data, photometric));
    }

    if image.is_color() && params.keep_rgb && sequential_process {
        let data = sequential::encode(
            &samples,
            image.columns,
            image.rows,
            3,
            8,
            params.jpeg_quality,
        )?;
        return Ok((data, photometric));
    }

    let bytes: Vec<u8> = samples.iter().map(|&s| s as u8).collect();
    let (color_type, photometric) = if !image.is_color() {
        (ColorType::Luma, photometric)
    } else {
        let color_type = if photometric.starts_with("YBR_FULL") {
            ColorType::Ycbcr
        } else {
            ColorType::Rgb
        };
        let photometric = if params.keep_rgb { "YBR_FULL" } else { "YBR_FULL_422" };
        (color_type, photometric.to_string())
    };

    let mut data = Vec::new();
    let mut encoder = Encoder::new(&mut data, params.jpeg_quality);
    encoder.set_progressive(!sequential_process);
    if image.is_color() {
        encoder.set_sampling_factor(if params.keep_rgb {
            SamplingFactor::F_1_1
        } else {
            SamplingFactor::F_2_1
        });
    }
    encoder
        .encode(&bytes, image.columns, image.rows, color_type)
        .map_err(|e| TranscodeError::codec("JPEG", e.to_string()))?;
    Ok((data, photometric))
}
