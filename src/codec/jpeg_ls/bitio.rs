//
// bitio.rs
// Dicom-Conv-rs
//
// JPEG-LS bit streams: after an 0xFF byte the next byte carries only seven bits,
// so a marker is any 0xFF followed by a byte with its high bit set.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::error::{Result, TranscodeError};

pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    count: u32,
    after_ff: bool,
}

impl BitWriter {
    pub fn new(out: Vec<u8>) -> Self {
        BitWriter {
            out,
            acc: 0,
            count: 0,
            after_ff: false,
        }
    }

    fn byte_width(&self) -> u32 {
        if self.after_ff {
            7
        } else {
            8
        }
    }

    /// Append the `len` low bits of `bits`, most significant first.
    pub fn write(&mut self, bits: u32, len: u32) {
        debug_assert!(len <= 32);
        if len == 0 {
            return;
        }
        let mask = (1u64 << len) - 1;
        self.acc = (self.acc << len) | (u64::from(bits) & mask);
        self.count += len;
        loop {
            let width = self.byte_width();
            if self.count < width {
                break;
            }
            self.count -= width;
            let byte = (self.acc >> self.count) as u8;
            self.acc &= (1u64 << self.count) - 1;
            self.out.push(byte);
            self.after_ff = byte == 0xFF;
        }
    }

    pub fn write_zeros(&mut self, mut count: u32) {
        while count > 0 {
            let len = count.min(32);
            self.write(0, len);
            count -= len;
        }
    }

    pub fn into_inner(mut self) -> Vec<u8> {
        if self.count > 0 {
            let pad = self.byte_width() - self.count;
            self.write(0, pad);
        }
        if self.after_ff {
            self.out.push(0);
        }
        self.out
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    start: usize,
    pos: usize,
    acc: u64,
    count: u32,
    after_ff: bool,
    at_marker: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], start: usize) -> Self {
        BitReader {
            data,
            start,
            pos: start,
            acc: 0,
            count: 0,
            after_ff: false,
            at_marker: false,
        }
    }

    fn fill(&mut self) {
        while self.count <= 56 {
            if self.at_marker || self.pos >= self.data.len() {
                // zero bits past the end of the scan
                self.count += 8;
                continue;
            }
            let byte = self.data[self.pos];
            if byte == 0xFF
                && self
                    .data
                    .get(self.pos + 1)
                    .map_or(true, |&next| next & 0x80 != 0)
            {
                self.at_marker = true;
                continue;
            }
            let width = if self.after_ff { 7 } else { 8 };
            self.acc |= u64::from(byte) << (64 - self.count - width);
            self.count += width;
            self.pos += 1;
            self.after_ff = byte == 0xFF;
        }
    }

    pub fn read_bits(&mut self, len: u32) -> u32 {
        if len == 0 {
            return 0;
        }
        if self.count < len {
            self.fill();
        }
        let value = (self.acc >> (64 - len)) as u32;
        self.acc <<= len;
        self.count -= len;
        value
    }

    pub fn read_bit(&mut self) -> u32 {
        self.read_bits(1)
    }

    /// Count zero bits up to and including the terminating one bit.
    pub fn read_unary(&mut self, limit: u32) -> Result<u32> {
        let mut zeros = 0;
        while self.read_bit() == 0 {
            zeros += 1;
            if zeros > limit {
                return Err(TranscodeError::codec(
                    "JPEG-LS",
                    "invalid Golomb code in scan data",
                ));
            }
        }
        Ok(zeros)
    }

    /// Offset of the marker that ends the scan.
    pub fn end_position(&self) -> usize {
        let mut i = self.start;
        while i + 1 < self.data.len() {
            if self.data[i] == 0xFF && self.data[i + 1] & 0x80 != 0 {
                return i;
            }
            i += 1;
        }
        self.data.len()
    }
}
