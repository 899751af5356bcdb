//
// scan.rs
// Dicom-Conv-rs
//
// JPEG-LS (ITU-T T.87) context modelling, Golomb coding and run mode for one scan.
// Lines carry one border pixel on each side; a pixel holds `n` interleaved components.
//
// Thales Matheus Mendonça Santos - November 2025

use super::bitio::{BitReader, BitWriter};
use crate::error::{Result, TranscodeError};

/// Run length order table (T.87 A.7.1.2).
const J: [u32; 32] = [
    0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 9, 10, 11, 12, 13,
    14, 15,
];

const CONTEXT_COUNT: usize = 365;
const DEFAULT_RESET: i32 = 64;

/// Preset coding parameters of an LSE type 1 segment. Zero fields select the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preset {
    pub maxval: u16,
    pub t1: u16,
    pub t2: u16,
    pub t3: u16,
    pub reset: u16,
}

/// Resolved coding parameters of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub maxval: i32,
    pub near: i32,
    range: i32,
    qbpp: u32,
    limit: i32,
    t1: i32,
    t2: i32,
    t3: i32,
    reset: i32,
}

fn log2_ceil(value: i32) -> u32 {
    let mut k = 0;
    while (1i64 << k) < i64::from(value) {
        k += 1;
    }
    k
}

fn default_thresholds(maxval: i32, near: i32) -> (i32, i32, i32) {
    let clamp = |i: i32, j: i32| if i > maxval || i < j { j } else { i };
    if maxval >= 128 {
        let factor = (maxval.min(4095) + 128) / 256;
        let t1 = clamp(factor + 2 + 3 * near, near + 1);
        let t2 = clamp(factor * 4 + 3 + 5 * near, t1);
        let t3 = clamp(factor * 17 + 4 + 7 * near, t2);
        (t1, t2, t3)
    } else {
        let factor = 256 / (maxval + 1);
        let t1 = clamp((3 / factor + 3 * near).max(2), near + 1);
        let t2 = clamp((7 / factor + 5 * near).max(3), t1);
        let t3 = clamp((21 / factor + 7 * near).max(4), t2);
        (t1, t2, t3)
    }
}

impl Parameters {
    pub fn new(precision: u8, near: i32, preset: Preset) -> Self {
        let maxval = if preset.maxval != 0 {
            i32::from(preset.maxval)
        } else {
            (1 << precision) - 1
        };
        let range = (maxval + 2 * near) / (2 * near + 1) + 1;
        let bpp = (log2_ceil(maxval + 1).max(2)) as i32;
        let (t1, t2, t3) = default_thresholds(maxval, near);
        let pick = |value: u16, default: i32| {
            if value != 0 {
                i32::from(value)
            } else {
                default
            }
        };
        Parameters {
            maxval,
            near,
            range,
            qbpp: log2_ceil(range),
            limit: 2 * (bpp + bpp.max(8)),
            t1: pick(preset.t1, t1),
            t2: pick(preset.t2, t2),
            t3: pick(preset.t3, t3),
            reset: pick(preset.reset, DEFAULT_RESET),
        }
    }

    fn quantize_gradient(&self, d: i32) -> i32 {
        if d <= -self.t3 {
            -4
        } else if d <= -self.t2 {
            -3
        } else if d <= -self.t1 {
            -2
        } else if d < -self.near {
            -1
        } else if d <= self.near {
            0
        } else if d < self.t1 {
            1
        } else if d < self.t2 {
            2
        } else if d < self.t3 {
            3
        } else {
            4
        }
    }

    fn context_id(&self, d1: i32, d2: i32, d3: i32) -> i32 {
        (self.quantize_gradient(d1) * 9 + self.quantize_gradient(d2)) * 9 + self.quantize_gradient(d3)
    }

    fn clamp(&self, value: i32) -> i32 {
        value.clamp(0, self.maxval)
    }

    /// Quantized prediction error reduced modulo RANGE.
    fn error_value(&self, e: i32) -> i32 {
        let step = 2 * self.near + 1;
        let mut e = if self.near == 0 {
            e
        } else if e > 0 {
            (e + self.near) / step
        } else {
            -((self.near - e) / step)
        };
        if e < 0 {
            e += self.range;
        }
        if e >= (self.range + 1) / 2 {
            e -= self.range;
        }
        e
    }

    fn reconstruct(&self, predicted: i32, error: i32) -> i32 {
        let step = 2 * self.near + 1;
        let mut value = predicted + error * step;
        if value < -self.near {
            value += self.range * step;
        } else if value > self.maxval + self.near {
            value -= self.range * step;
        }
        self.clamp(value)
    }

    fn is_near(&self, a: i32, b: i32) -> bool {
        (a - b).abs() <= self.near
    }
}

fn predict(ra: i32, rb: i32, rc: i32) -> i32 {
    if rc >= ra.max(rb) {
        ra.min(rb)
    } else if rc <= ra.min(rb) {
        ra.max(rb)
    } else {
        ra + rb - rc
    }
}

fn sign(value: i32) -> i32 {
    if value < 0 {
        -1
    } else {
        1
    }
}

fn map_error(e: i32) -> i32 {
    if e >= 0 {
        2 * e
    } else {
        -2 * e - 1
    }
}

fn unmap_error(m: i32) -> i32 {
    if m & 1 == 0 {
        m >> 1
    } else {
        -((m + 1) >> 1)
    }
}

#[derive(Debug, Clone, Copy)]
struct RegularContext {
    a: i32,
    b: i32,
    c: i32,
    n: i32,
}

impl RegularContext {
    fn new(range: i32) -> Self {
        RegularContext {
            a: ((range + 32) / 64).max(2),
            b: 0,
            c: 0,
            n: 1,
        }
    }

    fn golomb(&self) -> u32 {
        let mut k = 0;
        while k < 24 && (self.n << k) < self.a {
            k += 1;
        }
        k
    }

    /// All ones when the mapping of the error is inverted (k = 0, lossless, negative bias).
    fn error_correction(&self, k_or_near: i32) -> i32 {
        if k_or_near != 0 {
            0
        } else {
            (2 * self.b + self.n - 1) >> 31
        }
    }

    fn update(&mut self, error: i32, near: i32, reset: i32) {
        self.a += error.abs();
        self.b += error * (2 * near + 1);
        if self.n == reset {
            self.a >>= 1;
            self.b >>= 1;
            self.n >>= 1;
        }
        self.n += 1;

        if self.b + self.n <= 0 {
            self.b += self.n;
            if self.b <= -self.n {
                self.b = -self.n + 1;
            }
            if self.c > -128 {
                self.c -= 1;
            }
        } else if self.b > 0 {
            self.b -= self.n;
            if self.b > 0 {
                self.b = 0;
            }
            if self.c < 127 {
                self.c += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RunContext {
    interruption_type: i32,
    a: i32,
    n: i32,
    nn: i32,
}

impl RunContext {
    fn new(interruption_type: i32, range: i32) -> Self {
        RunContext {
            interruption_type,
            a: ((range + 32) / 64).max(2),
            n: 1,
            nn: 0,
        }
    }

    fn golomb(&self) -> u32 {
        let target = self.a + (self.n >> 1) * self.interruption_type;
        let mut n = self.n;
        let mut k = 0;
        while k < 24 && n < target {
            n <<= 1;
            k += 1;
        }
        k
    }

    fn compute_map(&self, error: i32, k: u32) -> bool {
        (k == 0 && error > 0 && 2 * self.nn < self.n)
            || (error < 0 && 2 * self.nn >= self.n)
            || (error < 0 && k != 0)
    }

    fn error_from_mapped(&self, temp: i32, k: u32) -> i32 {
        let map = temp & 1 == 1;
        let magnitude = (temp + i32::from(map)) / 2;
        if (k != 0 || 2 * self.nn >= self.n) == map {
            -magnitude
        } else {
            magnitude
        }
    }

    fn update(&mut self, error: i32, mapped: i32, reset: i32) {
        if error < 0 {
            self.nn += 1;
        }
        self.a += (mapped + 1 - self.interruption_type) >> 1;
        if self.n == reset {
            self.a >>= 1;
            self.n >>= 1;
            self.nn >>= 1;
        }
        self.n += 1;
    }
}

fn encode_mapped(writer: &mut BitWriter, k: u32, mapped: i32, limit: i32, qbpp: u32) {
    let high = mapped >> k;
    if high < limit - qbpp as i32 - 1 {
        writer.write_zeros(high as u32);
        writer.write(1, 1);
        writer.write(mapped as u32 & ((1 << k) - 1), k);
    } else {
        writer.write_zeros((limit - qbpp as i32 - 1) as u32);
        writer.write(1, 1);
        writer.write((mapped - 1) as u32 & ((1 << qbpp) - 1), qbpp);
    }
}

fn decode_mapped(reader: &mut BitReader<'_>, k: u32, limit: i32, qbpp: u32) -> Result<i32> {
    let high = reader.read_unary(limit.max(0) as u32)? as i32;
    if high >= limit - qbpp as i32 - 1 {
        Ok(reader.read_bits(qbpp) as i32 + 1)
    } else {
        Ok((high << k) + reader.read_bits(k) as i32)
    }
}

/// A pair of line buffers with their border pixels.
pub struct Lines {
    pub prev: Vec<i32>,
    pub cur: Vec<i32>,
    width: usize,
    n: usize,
}

impl Lines {
    pub fn new(width: usize, n: usize) -> Self {
        Lines {
            prev: vec![0; (width + 2) * n],
            cur: vec![0; (width + 2) * n],
            width,
            n,
        }
    }

    /// Index of component `c` of pixel `x` in either buffer.
    pub fn index(&self, x: usize, c: usize) -> usize {
        (x + 1) * self.n + c
    }

    /// Set the border pixels used by the first and last columns.
    pub fn prepare(&mut self) {
        let n = self.n;
        for c in 0..n {
            self.prev[(self.width + 1) * n + c] = self.prev[self.width * n + c];
            self.cur[c] = self.prev[n + c];
        }
    }

    pub fn advance(&mut self) {
        std::mem::swap(&mut self.prev, &mut self.cur);
    }
}

/// Coding state shared by all lines of one scan.
pub struct ScanCoder {
    params: Parameters,
    contexts: Vec<RegularContext>,
    run: [RunContext; 2],
    run_index: usize,
}

impl ScanCoder {
    pub fn new(params: Parameters) -> Self {
        ScanCoder {
            params,
            contexts: vec![RegularContext::new(params.range); CONTEXT_COUNT],
            run: [
                RunContext::new(0, params.range),
                RunContext::new(1, params.range),
            ],
            run_index: 0,
        }
    }

    pub fn run_index(&self) -> usize {
        self.run_index
    }

    pub fn set_run_index(&mut self, run_index: usize) {
        self.run_index = run_index;
    }

    fn contexts_at(&self, lines: &Lines, x: usize) -> [i32; 4] {
        let mut qs = [0; 4];
        for (c, q) in qs.iter_mut().enumerate().take(lines.n) {
            let i = lines.index(x, c);
            let n = lines.n;
            let (ra, rb, rc, rd) = (lines.cur[i - n], lines.prev[i], lines.prev[i - n], lines.prev[i + n]);
            *q = self.params.context_id(rd - rb, rb - rc, rc - ra);
        }
        qs
    }

    /// Code the current line, replacing its samples with their reconstruction.
    pub fn encode_line(&mut self, writer: &mut BitWriter, lines: &mut Lines) {
        let mut x = 0;
        while x < lines.width {
            let qs = self.contexts_at(lines, x);
            if qs[..lines.n].iter().all(|&q| q == 0) {
                x += self.encode_run(writer, lines, x);
            } else {
                for (c, &q) in qs.iter().enumerate().take(lines.n) {
                    let i = lines.index(x, c);
                    let n = lines.n;
                    let predicted = predict(lines.cur[i - n], lines.prev[i], lines.prev[i - n]);
                    lines.cur[i] = self.encode_regular(writer, q, lines.cur[i], predicted);
                }
                x += 1;
            }
        }
    }

    pub fn decode_line(&mut self, reader: &mut BitReader<'_>, lines: &mut Lines) -> Result<()> {
        let mut x = 0;
        while x < lines.width {
            let qs = self.contexts_at(lines, x);
            if qs[..lines.n].iter().all(|&q| q == 0) {
                x += self.decode_run(reader, lines, x)?;
            } else {
                for (c, &q) in qs.iter().enumerate().take(lines.n) {
                    let i = lines.index(x, c);
                    let n = lines.n;
                    let predicted = predict(lines.cur[i - n], lines.prev[i], lines.prev[i - n]);
                    lines.cur[i] = self.decode_regular(reader, q, predicted)?;
                }
                x += 1;
            }
        }
        Ok(())
    }

    fn encode_regular(&mut self, writer: &mut BitWriter, qs: i32, value: i32, predicted: i32) -> i32 {
        let p = self.params;
        let sign = sign(qs);
        let ctx = &mut self.contexts[(qs * sign) as usize];
        let k = ctx.golomb();
        let px = p.clamp(predicted + sign * ctx.c);
        let error = p.error_value(sign * (value - px));
        let mapped = map_error(ctx.error_correction(k as i32 | p.near) ^ error);
        encode_mapped(writer, k, mapped, p.limit, p.qbpp);
        ctx.update(error, p.near, p.reset);
        p.reconstruct(px, sign * error)
    }

    fn decode_regular(&mut self, reader: &mut BitReader<'_>, qs: i32, predicted: i32) -> Result<i32> {
        let p = self.params;
        let sign = sign(qs);
        let ctx = &mut self.contexts[(qs * sign) as usize];
        let k = ctx.golomb();
        let px = p.clamp(predicted + sign * ctx.c);
        let mut error = unmap_error(decode_mapped(reader, k, p.limit, p.qbpp)?);
        if k == 0 {
            error ^= ctx.error_correction(p.near);
        }
        ctx.update(error, p.near, p.reset);
        Ok(p.reconstruct(px, sign * error))
    }

    fn encode_run(&mut self, writer: &mut BitWriter, lines: &mut Lines, x: usize) -> usize {
        let n = lines.n;
        let remain = lines.width - x;
        let mut ra = [0; 4];
        let left = lines.index(x, 0) - n;
        ra[..n].copy_from_slice(&lines.cur[left..left + n]);

        let mut len = 0;
        while len < remain {
            let i = lines.index(x + len, 0);
            if !(0..n).all(|c| self.params.is_near(lines.cur[i + c], ra[c])) {
                break;
            }
            lines.cur[i..i + n].copy_from_slice(&ra[..n]);
            len += 1;
        }

        let mut rest = len;
        while rest >= 1 << J[self.run_index] {
            writer.write(1, 1);
            rest -= 1 << J[self.run_index];
            if self.run_index < 31 {
                self.run_index += 1;
            }
        }
        if len == remain {
            if rest != 0 {
                writer.write(1, 1);
            }
            return len;
        }
        writer.write(0, 1);
        writer.write(rest as u32, J[self.run_index]);

        let i = lines.index(x + len, 0);
        if n == 1 {
            let (value, rb) = (lines.cur[i], lines.prev[i]);
            lines.cur[i] = self.encode_interruption(writer, value, ra[0], rb);
        } else {
            for c in 0..n {
                let (value, rb) = (lines.cur[i + c], lines.prev[i + c]);
                let sign = sign(rb - ra[c]);
                let error = self.params.error_value(sign * (value - rb));
                self.encode_interruption_error(writer, 0, error);
                lines.cur[i + c] = self.params.reconstruct(rb, error * sign);
            }
        }
        self.run_index = self.run_index.saturating_sub(1);
        len + 1
    }

    fn decode_run(&mut self, reader: &mut BitReader<'_>, lines: &mut Lines, x: usize) -> Result<usize> {
        let n = lines.n;
        let remain = lines.width - x;
        let mut ra = [0; 4];
        let left = lines.index(x, 0) - n;
        ra[..n].copy_from_slice(&lines.cur[left..left + n]);

        let mut len = 0;
        while reader.read_bit() == 1 {
            let chunk = 1usize << J[self.run_index];
            let count = chunk.min(remain - len);
            len += count;
            if count == chunk && self.run_index < 31 {
                self.run_index += 1;
            }
            if len == remain {
                break;
            }
        }
        if len != remain {
            len += reader.read_bits(J[self.run_index]) as usize;
        }
        if len > remain {
            return Err(TranscodeError::codec("JPEG-LS", "run length overruns the line"));
        }
        for offset in 0..len {
            let i = lines.index(x + offset, 0);
            lines.cur[i..i + n].copy_from_slice(&ra[..n]);
        }
        if len == remain {
            return Ok(len);
        }

        let i = lines.index(x + len, 0);
        if n == 1 {
            let rb = lines.prev[i];
            lines.cur[i] = self.decode_interruption(reader, ra[0], rb)?;
        } else {
            for c in 0..n {
                let rb = lines.prev[i + c];
                let sign = sign(rb - ra[c]);
                let error = self.decode_interruption_error(reader, 0)?;
                lines.cur[i + c] = self.params.reconstruct(rb, error * sign);
            }
        }
        self.run_index = self.run_index.saturating_sub(1);
        Ok(len + 1)
    }

    fn encode_interruption(&mut self, writer: &mut BitWriter, value: i32, ra: i32, rb: i32) -> i32 {
        let p = self.params;
        if p.is_near(ra, rb) {
            let error = p.error_value(value - ra);
            self.encode_interruption_error(writer, 1, error);
            p.reconstruct(ra, error)
        } else {
            let sign = sign(rb - ra);
            let error = p.error_value(sign * (value - rb));
            self.encode_interruption_error(writer, 0, error);
            p.reconstruct(rb, error * sign)
        }
    }

    fn decode_interruption(&mut self, reader: &mut BitReader<'_>, ra: i32, rb: i32) -> Result<i32> {
        let p = self.params;
        if p.is_near(ra, rb) {
            let error = self.decode_interruption_error(reader, 1)?;
            Ok(p.reconstruct(ra, error))
        } else {
            let error = self.decode_interruption_error(reader, 0)?;
            Ok(p.reconstruct(rb, error * sign(rb - ra)))
        }
    }

    fn encode_interruption_error(&mut self, writer: &mut BitWriter, index: usize, error: i32) {
        let p = self.params;
        let limit = p.limit - J[self.run_index] as i32 - 1;
        let ctx = &mut self.run[index];
        let k = ctx.golomb();
        let map = ctx.compute_map(error, k);
        let mapped = 2 * error.abs() - ctx.interruption_type - i32::from(map);
        encode_mapped(writer, k, mapped, limit, p.qbpp);
        ctx.update(error, mapped, p.reset);
    }

    fn decode_interruption_error(&mut self, reader: &mut BitReader<'_>, index: usize) -> Result<i32> {
        let p = self.params;
        let limit = p.limit - J[self.run_index] as i32 - 1;
        let ctx = &mut self.run[index];
        let k = ctx.golomb();
        let mapped = decode_mapped(reader, k, limit, p.qbpp)?;
        let error = ctx.error_from_mapped(mapped + ctx.interruption_type, k);
        ctx.update(error, mapped, p.reset);
        Ok(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_for_8_and_16_bit() {
        let p = Parameters::new(8, 0, Preset::default());
        assert_eq!((p.t1, p.t2, p.t3, p.reset), (3, 7, 21, 64));
        assert_eq!((p.range, p.qbpp, p.limit), (256, 8, 32));

        let p = Parameters::new(16, 0, Preset::default());
        assert_eq!((p.t1, p.t2, p.t3), (18, 67, 276));
        assert_eq!(p.limit, 64);
    }

    #[test]
    fn near_lossless_parameters() {
        let p = Parameters::new(8, 2, Preset::default());
        assert_eq!(p.range, 52);
        assert_eq!(p.qbpp, 6);
        assert_eq!((p.t1, p.t2, p.t3), (9, 17, 35));
    }

    #[test]
    fn preset_overrides_defaults() {
        let preset = Preset {
            maxval: 1000,
            t1: 5,
            t2: 0,
            t3: 0,
            reset: 32,
        };
        let p = Parameters::new(12, 0, preset);
        assert_eq!(p.maxval, 1000);
        assert_eq!((p.t1, p.reset), (5, 32));
    }

    #[test]
    fn error_mapping_is_invertible() {
        for e in -300..300 {
            assert_eq!(unmap_error(map_error(e)), e);
        }
    }

    #[test]
    fn modulo_reduction_wraps_into_range() {
        let p = Parameters::new(8, 0, Preset::default());
        assert_eq!(p.error_value(255), -1);
        assert_eq!(p.error_value(-200), 56);
        assert_eq!(p.reconstruct(250, 10), 4);
    }

    #[test]
    fn run_interruption_mapping_round_trips() {
        for interruption_type in 0..2 {
            let mut ctx = RunContext::new(interruption_type, 256);
            for error in [3, -2, 7, -9, 1, -1, 12] {
                let k = ctx.golomb();
                let map = ctx.compute_map(error, k);
                let mapped = 2 * error.abs() - interruption_type - i32::from(map);
                assert!(mapped >= 0);
                assert_eq!(ctx.error_from_mapped(mapped + interruption_type, k), error);
                ctx.update(error, mapped, 64);
            }
        }
    }
}
