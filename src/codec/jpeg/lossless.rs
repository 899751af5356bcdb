//
// lossless.rs
// Dicom-Conv-rs
//
// JPEG lossless, non-hierarchical (process 14): predictive coding with Huffman-coded differences.
//
// Thales Matheus Mendonça Santos - November 2025

use tracing::debug;

use super::bitio::{BitReader, BitWriter};
use super::huffman::{
    category, magnitude_bits, receive_extend, HuffmanDecoder, HuffmanEncoder, HuffmanTable,
};
use super::{
    next_segment, put_segment, DecodedImage, FrameHeader, ScanHeader, DHT, DRI, EOI, SOF3, SOI,
    SOS,
};
use crate::error::{Result, TranscodeError};

fn invalid(message: impl Into<String>) -> TranscodeError {
    TranscodeError::codec("JPEG lossless", message)
}

/// Prediction from the left (a), above (b) and above-left (c) neighbours, selection values 1..=7.
fn predict(predictor: u8, a: i32, b: i32, c: i32) -> i32 {
    match predictor {
        1 => a,
        2 => b,
        3 => c,
        4 => a + b - c,
        5 => a + ((b - c) >> 1),
        6 => b + ((a - c) >> 1),
        7 => (a + b) >> 1,
        _ => a,
    }
}

/// Predictor for the sample at (x, y) of one component plane.
///
/// The first row of a restart interval predicts from the left (its first sample from the
/// mid-range value) and the first column from above. Neighbours are taken after the point
/// transform.
#[allow(clippy::too_many_arguments)]
fn predicted(
    plane: &[u16],
    width: usize,
    x: usize,
    y: usize,
    first_row: bool,
    predictor: u8,
    initial: i32,
    point_transform: u32,
) -> i32 {
    let at = |x: usize, y: usize| i32::from(plane[y * width + x] >> point_transform);
    match (x, first_row) {
        (0, true) => initial,
        (_, true) => at(x - 1, y),
        (0, false) => at(0, y - 1),
        _ => predict(predictor, at(x - 1, y), at(x, y - 1), at(x - 1, y - 1)),
    }
}

/// Wrap a difference into the signed modulo 2^16 range used by the entropy coder.
fn wrap_difference(diff: i32) -> i32 {
    let d = diff & 0xFFFF;
    if d >= 0x8000 {
        d - 0x10000
    } else {
        d
    }
}

/// Encode interleaved samples of `precision` bits with the given selection value.
pub fn encode(
    samples: &[u16],
    width: u16,
    height: u16,
    components: usize,
    precision: u8,
    predictor: u8,
) -> Result<Vec<u8>> {
    if !(2..=16).contains(&precision) {
        return Err(invalid(format!("precision {precision} is outside 2..=16")));
    }
    if !(1..=7).contains(&predictor) {
        return Err(invalid(format!("selection value {predictor} is outside 1..=7")));
    }
    if !(1..=4).contains(&components) {
        return Err(invalid(format!("{components} components")));
    }
    let w = usize::from(width);
    let h = usize::from(height);
    if samples.len() != w * h * components {
        return Err(invalid("sample buffer does not match the frame size"));
    }

    let mask = ((1u32 << precision) - 1) as u16;
    let planes: Vec<Vec<u16>> = (0..components)
        .map(|c| samples.iter().skip(c).step_by(components).map(|s| s & mask).collect())
        .collect();
    let initial = 1i32 << (precision - 1);

    // differences in MCU order (one sample of each component per MCU)
    let mut diffs = Vec::with_capacity(samples.len());
    let mut frequencies = vec![[0u32; 256]; components];
    for y in 0..h {
        for x in 0..w {
            for (c, plane) in planes.iter().enumerate() {
                let prediction = predicted(plane, w, x, y, y == 0, predictor, initial, 0);
                let diff = wrap_difference(i32::from(plane[y * w + x]) - prediction);
                let cat = if diff == -0x8000 { 16 } else { category(diff) };
                frequencies[c][cat as usize] += 1;
                diffs.push(diff);
            }
        }
    }

    let tables: Vec<HuffmanTable> = frequencies.iter().map(HuffmanTable::from_frequencies).collect();
    let encoders: Vec<HuffmanEncoder> = tables.iter().map(HuffmanEncoder::new).collect();

    let mut out = vec![0xFF, SOI];
    FrameHeader::lossless(precision, width, height, components).write(SOF3, &mut out);
    let mut dht = Vec::new();
    for (c, table) in tables.iter().enumerate() {
        table.write_to(0, c as u8, &mut dht);
    }
    put_segment(&mut out, DHT, &dht);
    ScanHeader::lossless(components, predictor).write(&mut out);

    let mut writer = BitWriter::new(out);
    for (i, &diff) in diffs.iter().enumerate() {
        let c = i % components;
        if diff == -0x8000 {
            encoders[c].encode(&mut writer, 16);
            continue;
        }
        let cat = category(diff);
        encoders[c].encode(&mut writer, cat as u8);
        writer.write(magnitude_bits(diff, cat), cat);
    }
    let mut out = writer.into_inner();
    out.extend_from_slice(&[0xFF, EOI]);
    Ok(out)
}

/// Decode a process 14 stream into interleaved samples.
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    let mut frame: Option<FrameHeader> = None;
    let mut tables: [Option<HuffmanDecoder>; 4] = Default::default();
    let mut restart_interval = 0usize;
    let mut planes: Vec<Vec<u16>> = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let segment = next_segment(data, pos)?;
        pos = segment.end;
        match segment.marker {
            SOI => {}
            EOI => break,
            SOF3 => {
                let header = FrameHeader::parse(SOF3, segment.body)?;
                if header.components.iter().any(|c| c.h != 1 || c.v != 1) {
                    return Err(invalid("subsampled components are not supported"));
                }
                let size = usize::from(header.width) * usize::from(header.height);
                planes = vec![vec![0u16; size]; header.components.len()];
                frame = Some(header);
            }
            0xC0..=0xCF if segment.marker != DHT && segment.marker != 0xC8 && segment.marker != 0xCC => {
                return Err(invalid(format!(
                    "SOF{} is not a lossless frame",
                    segment.marker - 0xC0
                )));
            }
            DHT => {
                for (_, id, table) in HuffmanTable::parse_segment(segment.body)? {
                    let slot = tables
                        .get_mut(usize::from(id))
                        .ok_or_else(|| invalid(format!("Huffman table id {id}")))?;
                    *slot = Some(HuffmanDecoder::new(&table));
                }
            }
            DRI => {
                if segment.body.len() < 2 {
                    return Err(invalid("truncated DRI segment"));
                }
                restart_interval = usize::from(u16::from_be_bytes([segment.body[0], segment.body[1]]));
            }
            SOS => {
                let header = frame.as_ref().ok_or_else(|| invalid("scan before frame header"))?;
                let scan = ScanHeader::parse(segment.body)?;
                pos = decode_scan(data, pos, header, &scan, &tables, restart_interval, &mut planes)?;
            }
            _ => {}
        }
    }

    let header = frame.ok_or_else(|| invalid("no SOF3 frame header"))?;
    let components = header.components.len();
    let size = usize::from(header.width) * usize::from(header.height);
    let mut samples = Vec::with_capacity(size * components);
    for i in 0..size {
        for plane in &planes {
            samples.push(plane[i]);
        }
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
    pos: usize,
    frame: &FrameHeader,
    scan: &ScanHeader,
    tables: &[Option<HuffmanDecoder>; 4],
    restart_interval: usize,
    planes: &mut [Vec<u16>],
) -> Result<usize> {
    let predictor = scan.ss;
    let point_transform = u32::from(scan.al);
    if !(1..=7).contains(&predictor) {
        return Err(invalid(format!("selection value {predictor}")));
    }
    let precision = u32::from(frame.precision);
    if point_transform >= precision {
        return Err(invalid(format!("point transform {point_transform}")));
    }

    let w = usize::from(frame.width);
    let h = usize::from(frame.height);
    if restart_interval > 0 && restart_interval % w != 0 {
        return Err(invalid("restart intervals must cover whole rows"));
    }

    // component index within the frame, and the decoder for each scan component
    let mut members = Vec::with_capacity(scan.components.len());
    for sc in &scan.components {
        let index = frame
            .components
            .iter()
            .position(|c| c.id == sc.id)
            .ok_or_else(|| invalid(format!("scan component {} not in frame", sc.id)))?;
        let decoder = tables
            .get(usize::from(sc.dc_table))
            .and_then(Option::as_ref)
            .ok_or_else(|| invalid(format!("missing Huffman table {}", sc.dc_table)))?;
        members.push((index, decoder));
    }
    debug!(
        "lossless scan: {} component(s), predictor {}, point transform {}",
        members.len(),
        predictor,
        point_transform
    );

    let mask = (1u32 << (precision - point_transform)) - 1;
    let initial = 1i32 << (precision - point_transform - 1);
    let mut reader = BitReader::new(data, pos);
    let mut restarts = 0u8;
    let mut first_row_of_interval = 0;

    for y in 0..h {
        if restart_interval > 0 && y > 0 && (y * w) % restart_interval == 0 {
            reader.restart(restarts)?;
            restarts = restarts.wrapping_add(1);
            first_row_of_interval = y;
        }
        for x in 0..w {
            for &(index, decoder) in &members {
                let cat = u32::from(decoder.decode(&mut reader)?);
                let diff = match cat {
                    0..=15 => receive_extend(&mut reader, cat),
                    16 => 0x8000,
                    _ => return Err(invalid(format!("difference category {cat}"))),
                };
                let plane = &mut planes[index];
                // predictions use the point-transformed values
                let prediction = predicted(
                    plane,
                    w,
                    x,
                    y,
                    y == first_row_of_interval,
                    predictor,
                    initial,
                    point_transform,
                );
                let value = (prediction + diff) as u32 & mask;
                plane[y * w + x] = (value << point_transform) as u16;
            }
        }
    }
    Ok(reader.end_position())
}
