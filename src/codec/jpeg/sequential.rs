//
// sequential.rs
// Dicom-Conv-rs
//
// Sequential DCT JPEG with Huffman coding for 8 and 12 bit precision (processes 1, 2 and 4),
// restricted to full-resolution components.
//
// Thales Matheus Mendonça Santos - November 2025

use std::f32::consts::PI;

use super::bitio::{BitReader, BitWriter};
use super::huffman::{
    category, magnitude_bits, receive_extend, HuffmanDecoder, HuffmanEncoder, HuffmanTable,
};
use super::{
    next_segment, put_segment, DecodedImage, FrameHeader, ScanHeader, APP14, DHT, DQT, DRI, EOI,
    SOF0, SOF1, SOI, SOS,
};
use crate::error::{Result, TranscodeError};

/// Natural (row-major) index of each coefficient in zig-zag order.
const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Luminance quantization table of T.81 Annex K.1, natural order.
const LUMINANCE_QUANT: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57, 69,
    56, 14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 56, 68, 109, 103, 77, 24, 35, 55, 64, 81, 104,
    113, 92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
];

/// Component identifiers that mark an RGB stream without colour transform.
pub const RGB_COMPONENT_IDS: [u8; 3] = [b'R', b'G', b'B'];

fn invalid(message: impl Into<String>) -> TranscodeError {
    TranscodeError::codec("JPEG", message)
}

/// IJG quality scaling of the Annex K table.
pub fn quant_table(quality: u8) -> [u16; 64] {
    let quality = u32::from(quality.clamp(1, 100));
    let scale = if quality < 50 {
        5000 / quality
    } else {
        200 - 2 * quality
    };
    let mut table = [0u16; 64];
    for (q, &base) in table.iter_mut().zip(LUMINANCE_QUANT.iter()) {
        *q = ((u32::from(base) * scale + 50) / 100).clamp(1, 255) as u16;
    }
    table
}

/// Separable 8x8 DCT basis: `BASIS[u][x] = C(u)/2 * cos((2x+1)u*pi/16)`.
fn basis() -> [[f32; 8]; 8] {
    let mut table = [[0f32; 8]; 8];
    for (u, row) in table.iter_mut().enumerate() {
        let c = if u == 0 { std::f32::consts::FRAC_1_SQRT_2 } else { 1.0 };
        for (x, value) in row.iter_mut().enumerate() {
            *value = c / 2.0 * ((2 * x + 1) as f32 * u as f32 * PI / 16.0).cos();
        }
    }
    table
}

fn forward_dct(block: &[f32; 64], basis: &[[f32; 8]; 8]) -> [f32; 64] {
    let mut rows = [0f32; 64];
    for y in 0..8 {
        for u in 0..8 {
            rows[y * 8 + u] = (0..8).map(|x| basis[u][x] * block[y * 8 + x]).sum();
        }
    }
    let mut out = [0f32; 64];
    for u in 0..8 {
        for v in 0..8 {
            out[v * 8 + u] = (0..8).map(|y| basis[v][y] * rows[y * 8 + u]).sum();
        }
    }
    out
}

fn inverse_dct(coefficients: &[f32; 64], basis: &[[f32; 8]; 8]) -> [f32; 64] {
    let mut columns = [0f32; 64];
    for u in 0..8 {
        for y in 0..8 {
            columns[y * 8 + u] = (0..8).map(|v| basis[v][y] * coefficients[v * 8 + u]).sum();
        }
    }
    let mut out = [0f32; 64];
    for y in 0..8 {
        for x in 0..8 {
            out[y * 8 + x] = (0..8).map(|u| basis[u][x] * columns[y * 8 + u]).sum();
        }
    }
    out
}

/// Symbols of one block, passed to `sink` as (is_ac, symbol, extra bits, extra length).
fn block_symbols(block: &[i32; 64], previous_dc: &mut i32, mut sink: impl FnMut(bool, u8, u32, u32)) {
    let diff = block[0] - *previous_dc;
    *previous_dc = block[0];
    let cat = category(diff);
    sink(false, cat as u8, magnitude_bits(diff, cat), cat);

    let mut run = 0u32;
    for &value in &block[1..] {
        if value == 0 {
            run += 1;
            continue;
        }
        while run > 15 {
            sink(true, 0xF0, 0, 0);
            run -= 16;
        }
        let cat = category(value);
        sink(true, ((run << 4) | cat) as u8, magnitude_bits(value, cat), cat);
        run = 0;
    }
    if run > 0 {
        sink(true, 0x00, 0, 0);
    }
}

/// Encode interleaved samples without colour transform and without subsampling.
pub fn encode(
    samples: &[u16],
    width: u16,
    height: u16,
    components: usize,
    precision: u8,
    quality: u8,
) -> Result<Vec<u8>> {
    if precision != 8 && precision != 12 {
        return Err(invalid(format!("DCT precision {precision}")));
    }
    if components != 1 && components != 3 {
        return Err(invalid(format!("{components} components")));
    }
    let w = usize::from(width);
    let h = usize::from(height);
    if samples.len() != w * h * components || w == 0 || h == 0 {
        return Err(invalid("sample buffer does not match the frame size"));
    }

    let quant = quant_table(quality);
    let basis = basis();
    let shift = (1i32 << (precision - 1)) as f32;
    let max = (1u16 << precision) - 1;

    // quantized blocks in zig-zag order, interleaved MCU order
    let mut blocks = Vec::new();
    for by in 0..h.div_ceil(8) {
        for bx in 0..w.div_ceil(8) {
            for c in 0..components {
                let mut block = [0f32; 64];
                for (i, value) in block.iter_mut().enumerate() {
                    let x = (bx * 8 + i % 8).min(w - 1);
                    let y = (by * 8 + i / 8).min(h - 1);
                    let sample = samples[(y * w + x) * components + c].min(max);
                    *value = f32::from(sample) - shift;
                }
                let dct = forward_dct(&block, &basis);
                let mut zz = [0i32; 64];
                for (k, &natural) in ZIGZAG.iter().enumerate() {
                    zz[k] = (dct[natural] / f32::from(quant[natural])).round() as i32;
                }
                blocks.push(zz);
            }
        }
    }

    let mut dc_freq = [0u32; 256];
    let mut ac_freq = [0u32; 256];
    let mut predictors = vec![0i32; components];
    for (i, block) in blocks.iter().enumerate() {
        block_symbols(block, &mut predictors[i % components], |is_ac, symbol, _, _| {
            if is_ac {
                ac_freq[usize::from(symbol)] += 1;
            } else {
                dc_freq[usize::from(symbol)] += 1;
            }
        });
    }
    let dc_table = HuffmanTable::from_frequencies(&dc_freq);
    let ac_table = HuffmanTable::from_frequencies(&ac_freq);

    let mut out = vec![0xFF, SOI];
    let ids: Vec<u8> = if components == 3 {
        let mut adobe = b"Adobe".to_vec();
        adobe.extend_from_slice(&[0, 100, 0, 0, 0, 0, 0]);
        put_segment(&mut out, APP14, &adobe);
        RGB_COMPONENT_IDS.to_vec()
    } else {
        vec![1]
    };
    let mut dqt = vec![0u8];
    dqt.extend(ZIGZAG.iter().map(|&natural| quant[natural] as u8));
    put_segment(&mut out, DQT, &dqt);
    let marker = if precision == 8 { SOF0 } else { SOF1 };
    FrameHeader::dct(precision, width, height, &ids).write(marker, &mut out);
    let mut dht = Vec::new();
    dc_table.write_to(0, 0, &mut dht);
    ac_table.write_to(1, 0, &mut dht);
    put_segment(&mut out, DHT, &dht);
    ScanHeader::sequential(&ids).write(&mut out);

    let dc = HuffmanEncoder::new(&dc_table);
    let ac = HuffmanEncoder::new(&ac_table);
    let mut writer = BitWriter::new(out);
    let mut predictors = vec![0i32; components];
    for (i, block) in blocks.iter().enumerate() {
        block_symbols(block, &mut predictors[i % components], |is_ac, symbol, bits, len| {
            if is_ac {
                ac.encode(&mut writer, symbol);
            } else {
                dc.encode(&mut writer, symbol);
            }
            writer.write(bits, len);
        });
    }
    let mut out = writer.into_inner();
    out.extend_from_slice(&[0xFF, EOI]);
    Ok(out)
}

struct Tables {
    quant: [Option<[u16; 64]>; 4],
    dc: [Option<HuffmanDecoder>; 4],
    ac: [Option<HuffmanDecoder>; 4],
}

/// Decode a Huffman sequential DCT stream (SOF0 or SOF1) with full-resolution components.
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    let mut frame: Option<FrameHeader> = None;
    let mut tables = Tables {
        quant: [None; 4],
        dc: Default::default(),
        ac: Default::default(),
    };
    let mut restart_interval = 0usize;
    let mut adobe_transform = None;
    let mut coefficients: Vec<Vec<[i32; 64]>> = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let segment = next_segment(data, pos)?;
        pos = segment.end;
        match segment.marker {
            SOI => {}
            EOI => break,
            SOF0 | SOF1 => {
                let header = FrameHeader::parse(segment.marker, segment.body)?;
                if header.components.iter().any(|c| c.h != 1 || c.v != 1) {
                    return Err(invalid("subsampled components need the 8-bit decoder"));
                }
                let blocks = usize::from(header.width).div_ceil(8)
                    * usize::from(header.height).div_ceil(8);
                coefficients = vec![vec![[0i32; 64]; blocks]; header.components.len()];
                frame = Some(header);
            }
            0xC2..=0xCF if ![DHT, 0xC8, 0xCC].contains(&segment.marker) => {
                return Err(invalid(format!(
                    "SOF{} is not a sequential Huffman frame",
                    segment.marker - 0xC0
                )));
            }
            DQT => parse_quant_tables(segment.body, &mut tables.quant)?,
            DHT => {
                for (class, id, table) in HuffmanTable::parse_segment(segment.body)? {
                    let slots = if class == 0 { &mut tables.dc } else { &mut tables.ac };
                    let slot = slots
                        .get_mut(usize::from(id))
                        .ok_or_else(|| invalid(format!("Huffman table id {id}")))?;
                    *slot = Some(HuffmanDecoder::new(&table));
                }
            }
            DRI => {
                if segment.body.len() < 2 {
                    return Err(invalid("truncated DRI segment"));
                }
                restart_interval =
                    usize::from(u16::from_be_bytes([segment.body[0], segment.body[1]]));
            }
            APP14 => {
                if segment.body.len() >= 12 && segment.body.starts_with(b"Adobe") {
                    adobe_transform = Some(segment.body[11]);
                }
            }
            SOS => {
                let header = frame.as_ref().ok_or_else(|| invalid("scan before frame header"))?;
                let scan = ScanHeader::parse(segment.body)?;
                pos = decode_scan(data, pos, header, &scan, &tables, restart_interval, &mut coefficients)?;
            }
            _ => {}
        }
    }

    let header = frame.ok_or_else(|| invalid("no sequential frame header"))?;
    let w = usize::from(header.width);
    let h = usize::from(header.height);
    let components = header.components.len();
    let blocks_wide = w.div_ceil(8);
    let basis = basis();
    let shift = (1i32 << (header.precision - 1)) as f32;
    let max = ((1u32 << header.precision) - 1) as f32;

    let mut samples = vec![0u16; w * h * components];
    for (c, component) in header.components.iter().enumerate() {
        let quant = tables.quant[usize::from(component.tq & 3)]
            .ok_or_else(|| invalid(format!("missing quantization table {}", component.tq)))?;
        for (b, zz) in coefficients[c].iter().enumerate() {
            let mut block = [0f32; 64];
            for (k, &natural) in ZIGZAG.iter().enumerate() {
                block[natural] = (zz[k] * i32::from(quant[k])) as f32;
            }
            let pixels = inverse_dct(&block, &basis);
            let (bx, by) = (b % blocks_wide, b / blocks_wide);
            for (i, value) in pixels.iter().enumerate() {
                let x = bx * 8 + i % 8;
                let y = by * 8 + i / 8;
                if x < w && y < h {
                    samples[(y * w + x) * components + c] = (value + shift).round().clamp(0.0, max) as u16;
                }
            }
        }
    }

    Ok(DecodedImage {
        width: header.width,
        height: header.height,
        precision: header.precision,
        component_ids: header.components.iter().map(|c| c.id).collect(),
        adobe_transform,
        samples,
    })
}

/// Store DQT tables in zig-zag order.
fn parse_quant_tables(mut body: &[u8], quant: &mut [Option<[u16; 64]>; 4]) -> Result<()> {
    while !body.is_empty() {
        let precision = body[0] >> 4;
        let id = usize::from(body[0] & 3);
        let size = if precision == 0 { 64 } else { 128 };
        let values = body
            .get(1..1 + size)
            .ok_or_else(|| invalid("truncated DQT segment"))?;
        let mut table = [0u16; 64];
        for (k, q) in table.iter_mut().enumerate() {
            *q = if precision == 0 {
                u16::from(values[k])
            } else {
                u16::from_be_bytes([values[2 * k], values[2 * k + 1]])
            };
        }
        quant[id] = Some(table);
        body = &body[1 + size..];
    }
    Ok(())
}

fn decode_scan(
    data: &[u8],
    pos: usize,
    frame: &FrameHeader,
    scan: &ScanHeader,
    tables: &Tables,
    restart_interval: usize,
    coefficients: &mut [Vec<[i32; 64]>],
) -> Result<usize> {
    let mut members = Vec::with_capacity(scan.components.len());
    for sc in &scan.components {
        let index = frame
            .components
            .iter()
            .position(|c| c.id == sc.id)
            .ok_or_else(|| invalid(format!("scan component {} not in frame", sc.id)))?;
        let dc = tables.dc[usize::from(sc.dc_table & 3)]
            .as_ref()
            .ok_or_else(|| invalid(format!("missing DC table {}", sc.dc_table)))?;
        let ac = tables.ac[usize::from(sc.ac_table & 3)]
            .as_ref()
            .ok_or_else(|| invalid(format!("missing AC table {}", sc.ac_table)))?;
        members.push((index, dc, ac));
    }

    // with full-resolution components every MCU holds one block per scan component
    let total_blocks = coefficients.first().map_or(0, Vec::len);
    let mut reader = BitReader::new(data, pos);
    let mut predictors = vec![0i32; members.len()];
    let mut restarts = 0u8;

    for mcu in 0..total_blocks {
        if restart_interval > 0 && mcu > 0 && mcu % restart_interval == 0 {
            reader.restart(restarts)?;
            restarts = restarts.wrapping_add(1);
            predictors.iter_mut().for_each(|p| *p = 0);
        }
        for (m, &(index, dc, ac)) in members.iter().enumerate() {
            let block = &mut coefficients[index][mcu];
            let cat = u32::from(dc.decode(&mut reader)?);
            if cat > 16 {
                return Err(invalid(format!("DC category {cat}")));
            }
            predictors[m] += receive_extend(&mut reader, cat);
            block[0] = predictors[m];

            let mut k = 1;
            while k < 64 {
                let symbol = ac.decode(&mut reader)?;
                let run = usize::from(symbol >> 4);
                let size = u32::from(symbol & 0x0F);
                if size == 0 {
                    if run == 15 {
                        k += 16;
                        continue;
                    }
                    break;
                }
                k += run;
                if k > 63 {
                    return Err(invalid("AC coefficient index out of range"));
                }
                block[k] = receive_extend(&mut reader, size);
                k += 1;
            }
        }
    }
    Ok(reader.end_position())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smooth(width: usize, height: usize, components: usize, max: u16) -> Vec<u16> {
        (0..width * height * components)
            .map(|i| {
                let px = i / components;
                let (x, y) = (px % width, px / width);
                let c = i % components;
                let v = (x * 3 + y * 2 + c * 5) as f32 / (width * 3 + height * 2 + 10) as f32;
                (v * f32::from(max)) as u16
            })
            .collect()
    }

    fn max_error(a: &[u16], b: &[u16]) -> i32 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (i32::from(x) - i32::from(y)).abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn twelve_bit_round_trip_is_close() {
        let samples = smooth(21, 13, 1, 4095);
        let encoded = encode(&samples, 21, 13, 1, 12, 90).expect("encode");
        assert_eq!(encoded[encoded.len() - 2..], [0xFF, EOI]);
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(decoded.precision, 12);
        assert_eq!(decoded.samples.len(), samples.len());
        assert!(max_error(&samples, &decoded.samples) < 64);
    }

    #[test]
    fn rgb_stream_is_marked_untransformed() {
        let samples = smooth(16, 16, 3, 255);
        let encoded = encode(&samples, 16, 16, 3, 8, 95).expect("encode");
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(decoded.adobe_transform, Some(0));
        assert_eq!(decoded.component_ids, RGB_COMPONENT_IDS.to_vec());
        assert!(max_error(&samples, &decoded.samples) < 12);

        // an independent decoder sees RGB as well
        let mut decoder = jpeg_decoder::Decoder::new(&encoded[..]);
        let pixels = decoder.decode().expect("jpeg-decoder");
        let reference: Vec<u16> = pixels.iter().map(|&p| u16::from(p)).collect();
        assert!(max_error(&samples, &reference) < 12);
    }

    #[test]
    fn quality_scales_the_table() {
        assert_eq!(quant_table(50), LUMINANCE_QUANT);
        assert!(quant_table(100).iter().all(|&q| q == 1));
        assert!(quant_table(10)[0] > quant_table(90)[0]);
    }

    #[test]
    fn dct_round_trip_is_identity() {
        let basis = basis();
        let mut block = [0f32; 64];
        for (i, v) in block.iter_mut().enumerate() {
            *v = (i as f32 * 7.0) % 50.0 - 25.0;
        }
        let back = inverse_dct(&forward_dct(&block, &basis), &basis);
        for (a, b) in block.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
