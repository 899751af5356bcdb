//
// mod.rs
// Dicom-Conv-rs
//
// JPEG-LS lossless and near-lossless streams (ITU-T T.87): frame and scan
// markers, preset parameters and the three interleave modes.
//
// Thales Matheus Mendonça Santos - November 2025

mod bitio;
mod scan;

use tracing::{debug, warn};

use self::bitio::{BitReader, BitWriter};
use self::scan::{Lines, Parameters, Preset, ScanCoder};
use super::jpeg::{
    next_segment, DecodedImage, FrameHeader, ScanComponent, ScanHeader, DRI, EOI,
    LSE, SOF55, SOI, SOS,
};
use crate::error::{Result, TranscodeError};
use crate::pixel::{frame_to_u16, u16_to_frame, ImagePixel};

fn invalid(message: impl Into<String>) -> TranscodeError {
    TranscodeError::codec("JPEG-LS", message)
}

/// How the components of a colour image share scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// One scan per component.
    None,
    /// One scan, components alternate line by line.
    Line,
    /// One scan, components alternate sample by sample.
    Sample,
}

impl Interleave {
    fn code(self) -> u8 {
        match self {
            Interleave::None => 0,
            Interleave::Line => 1,
            Interleave::Sample => 2,
        }
    }
}

fn scan_header(ids: &[u8], near: u16, interleave: Interleave) -> ScanHeader {
    ScanHeader {
        components: ids
            .iter()
            .map(|&id| ScanComponent {
                id,
                dc_table: 0,
                ac_table: 0,
            })
            .collect(),
        ss: near as u8,
        se: interleave.code(),
        ah: 0,
        al: 0,
    }
}

/// Encode interleaved samples with default coding parameters.
pub fn encode(
    samples: &[u16],
    width: u16,
    height: u16,
    components: usize,
    precision: u8,
    near: u16,
    interleave: Interleave,
) -> Result<Vec<u8>> {
    if !(2..=16).contains(&precision) {
        return Err(invalid(format!("precision {precision} is outside 2..=16")));
    }
    if !(1..=4).contains(&components) {
        return Err(invalid(format!("{components} components")));
    }
    let (w, h) = (usize::from(width), usize::from(height));
    if samples.len() != w * h * components {
        return Err(invalid(format!(
            "expected {} samples, got {}",
            w * h * components,
            samples.len()
        )));
    }
    let params = Parameters::new(precision, i32::from(near), Preset::default());
    if i32::from(near) > params.maxval / 2 {
        return Err(invalid(format!("NEAR {near} is too large for {precision}-bit samples")));
    }

    let mut out = vec![0xFF, SOI];
    FrameHeader::lossless(precision, width, height, components).write(SOF55, &mut out);
    let ids: Vec<u8> = (1..=components as u8).collect();

    let code_scan = |out: &mut Vec<u8>, scan_ids: &[u8], mode: Interleave| {
        scan_header(scan_ids, near, mode).write(out);
        let mut writer = BitWriter::new(std::mem::take(out));
        let mut coder = ScanCoder::new(params);
        let selected: Vec<usize> = scan_ids.iter().map(|&id| usize::from(id) - 1).collect();
        match mode {
            Interleave::Sample | Interleave::None => {
                let n = selected.len();
                let mut lines = Lines::new(w, n);
                for y in 0..h {
                    lines.prepare();
                    for x in 0..w {
                        for (c, &component) in selected.iter().enumerate() {
                            let i = lines.index(x, c);
                            lines.cur[i] = i32::from(samples[(y * w + x) * components + component]);
                        }
                    }
                    coder.encode_line(&mut writer, &mut lines);
                    lines.advance();
                }
            }
            Interleave::Line => {
                let mut lines: Vec<Lines> = selected.iter().map(|_| Lines::new(w, 1)).collect();
                let mut run_index = vec![0; selected.len()];
                for y in 0..h {
                    for (slot, &component) in selected.iter().enumerate() {
                        let line = &mut lines[slot];
                        line.prepare();
                        for x in 0..w {
                            let i = line.index(x, 0);
                            line.cur[i] = i32::from(samples[(y * w + x) * components + component]);
                        }
                        coder.set_run_index(run_index[slot]);
                        coder.encode_line(&mut writer, line);
                        run_index[slot] = coder.run_index();
                        line.advance();
                    }
                }
            }
        }
        *out = writer.into_inner();
    };

    match interleave {
        Interleave::None => {
            for id in &ids {
                code_scan(&mut out, std::slice::from_ref(id), Interleave::None);
            }
        }
        mode => code_scan(&mut out, &ids, mode),
    }
    out.extend_from_slice(&[0xFF, EOI]);
    Ok(out)
}

fn parse_preset(body: &[u8]) -> Result<Preset> {
    match body.first() {
        Some(1) if body.len() >= 11 => {
            let word = |i: usize| u16::from_be_bytes([body[i], body[i + 1]]);
            Ok(Preset {
                maxval: word(1),
                t1: word(3),
                t2: word(5),
                t3: word(7),
                reset: word(9),
            })
        }
        Some(1) => Err(invalid("truncated preset parameters segment")),
        Some(id) => Err(invalid(format!("LSE segment type {id} is not supported"))),
        None => Err(invalid("empty LSE segment")),
    }
}

/// Decode a complete JPEG-LS stream into interleaved samples.
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    let first = next_segment(data, 0)?;
    if first.marker != SOI {
        return Err(invalid("stream does not start with SOI"));
    }
    let mut pos = first.end;
    let mut frame: Option<FrameHeader> = None;
    let mut preset = Preset::default();
    let mut samples = Vec::new();
    let mut scans = 0;

    while pos < data.len() {
        let segment = next_segment(data, pos)?;
        match segment.marker {
            SOF55 => {
                let header = FrameHeader::parse(SOF55, segment.body)?;
                if !(2..=16).contains(&header.precision) {
                    return Err(invalid(format!("precision {} is outside 2..=16", header.precision)));
                }
                if header.height == 0 {
                    return Err(invalid("frames sized by a DNL marker are not supported"));
                }
                if header.components.iter().any(|c| c.h != 1 || c.v != 1) {
                    return Err(invalid("subsampled components are not supported"));
                }
                samples = vec![
                    0u16;
                    usize::from(header.width)
                        * usize::from(header.height)
                        * header.components.len()
                ];
                frame = Some(header);
                pos = segment.end;
            }
            LSE => {
                preset = parse_preset(segment.body)?;
                pos = segment.end;
            }
            DRI => {
                if segment.body.iter().any(|&b| b != 0) {
                    return Err(invalid("restart intervals are not supported"));
                }
                pos = segment.end;
            }
            SOS => {
                let header = frame
                    .as_ref()
                    .ok_or_else(|| invalid("scan before the frame header"))?;
                let scan = ScanHeader::parse(segment.body)?;
                pos = decode_scan(data, segment.end, header, &scan, preset, &mut samples)?;
                scans += 1;
            }
            EOI => break,
            0xC0..=0xCF if segment.marker != 0xC4 && segment.marker != 0xCC => {
                return Err(invalid(format!(
                    "frame marker {:#04X} is not JPEG-LS",
                    segment.marker
                )));
            }
            _ => pos = segment.end,
        }
    }

    let header = frame.ok_or_else(|| invalid("no frame header"))?;
    if scans == 0 {
        return Err(invalid("no scan data"));
    }
    Ok(DecodedImage {
        width: header.width,
        height: header.height,
        precision: header.precision,
        component_ids: header.components.iter().map(|c| c.id).collect(),
        adobe_transform: None,
        samples,
    })
}

fn decode_scan(
    data: &[u8],
    start: usize,
    frame: &FrameHeader,
    scan: &ScanHeader,
    preset: Preset,
    samples: &mut [u16],
) -> Result<usize> {
    let near = i32::from(scan.ss);
    let params = Parameters::new(frame.precision, near, preset);
    if near > params.maxval / 2 {
        return Err(invalid(format!("NEAR {near} exceeds MAXVAL/2")));
    }
    let total = frame.components.len();
    let selected = scan
        .components
        .iter()
        .map(|sc| {
            if sc.dc_table != 0 || sc.ac_table != 0 {
                return Err(invalid("mapping tables are not supported"));
            }
            frame
                .components
                .iter()
                .position(|fc| fc.id == sc.id)
                .ok_or_else(|| invalid(format!("scan names unknown component {}", sc.id)))
        })
        .collect::<Result<Vec<usize>>>()?;
    debug!(
        "JPEG-LS scan: {} component(s), NEAR {}, interleave {}",
        selected.len(),
        near,
        scan.se
    );

    let (w, h) = (usize::from(frame.width), usize::from(frame.height));
    let mut reader = BitReader::new(data, start);
    let mut coder = ScanCoder::new(params);
    let mut store = |line: &Lines, y: usize, c: usize, component: usize| {
        for x in 0..w {
            samples[(y * w + x) * total + component] = line.cur[line.index(x, c)] as u16;
        }
    };

    match scan.se {
        0 | 2 => {
            if scan.se == 0 && selected.len() != 1 {
                return Err(invalid("non-interleaved scan with several components"));
            }
            let mut lines = Lines::new(w, selected.len());
            for y in 0..h {
                lines.prepare();
                coder.decode_line(&mut reader, &mut lines)?;
                for (c, &component) in selected.iter().enumerate() {
                    store(&lines, y, c, component);
                }
                lines.advance();
            }
        }
        1 => {
            let mut lines: Vec<Lines> = selected.iter().map(|_| Lines::new(w, 1)).collect();
            let mut run_index = vec![0; selected.len()];
            for y in 0..h {
                for (slot, &component) in selected.iter().enumerate() {
                    let line = &mut lines[slot];
                    line.prepare();
                    coder.set_run_index(run_index[slot]);
                    coder.decode_line(&mut reader, line)?;
                    run_index[slot] = coder.run_index();
                    store(line, y, 0, component);
                    line.advance();
                }
            }
        }
        other => return Err(invalid(format!("interleave mode {other}"))),
    }
    Ok(reader.end_position())
}

/// Decode one frame into the canonical layout of `image`.
pub fn decode_frame(data: &[u8], image: &ImagePixel) -> Result<Vec<u8>> {
    let decoded = decode(data)?;
    if decoded.width != image.columns
        || decoded.height != image.rows
        || decoded.component_ids.len() != usize::from(image.samples_per_pixel)
    {
        return Err(invalid(format!(
            "frame is {}x{} with {} component(s), the data set says {}x{} with {}",
            decoded.width,
            decoded.height,
            decoded.component_ids.len(),
            image.columns,
            image.rows,
            image.samples_per_pixel
        )));
    }
    Ok(u16_to_frame(&decoded.samples, image.bits_allocated))
}

/// The NEAR value actually coded for `image`.
///
/// Signed samples are coded as their BitsStored two's complement pattern, where an
/// error of a few units can cross the sign bit, so they are only coded losslessly.
pub fn allowed_near(image: &ImagePixel, requested: u16) -> u16 {
    if requested == 0 {
        return 0;
    }
    if image.is_signed() {
        warn!(
            "signed pixel data is coded losslessly, ignoring NEAR {}",
            requested
        );
        return 0;
    }
    let precision = image.bits_stored.clamp(2, 16);
    let max_near = ((1u32 << precision) - 1) / 2;
    requested.min(max_near as u16)
}

/// Encode one canonical frame; colour frames are sample-interleaved.
pub fn encode_frame(frame: &[u8], image: &ImagePixel, near: u16, target: &'static str) -> Result<Vec<u8>> {
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
    let precision = image.bits_stored.min(16) as u8;
    let near = allowed_near(image, near);
    let mask = image.stored_mask() as u16;
    let samples: Vec<u16> = frame_to_u16(frame, image.bits_allocated)
        .into_iter()
        .map(|s| s & mask)
        .collect();
    let interleave = if image.samples_per_pixel > 1 {
        Interleave::Sample
    } else {
        Interleave::None
    };
    encode(
        &samples,
        image.columns,
        image.rows,
        usize::from(image.samples_per_pixel),
        precision,
        near,
        interleave,
    )
}
