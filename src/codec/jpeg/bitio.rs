//
// bitio.rs
// Dicom-Conv-rs
//
// Entropy-coded segment bit streams with 0xFF byte stuffing.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::error::{Result, TranscodeError};

pub struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    pub fn new(out: Vec<u8>) -> Self {
        BitWriter { out, acc: 0, count: 0 }
    }

    /// Append the `len` low bits of `bits`, most significant first.
    pub fn write(&mut self, bits: u32, len: u32) {
        debug_assert!(len <= 24);
        if len == 0 {
            return;
        }
        self.acc = (self.acc << len) | (bits & ((1 << len) - 1));
        self.count += len;
        while self.count >= 8 {
            let byte = (self.acc >> (self.count - 8)) as u8;
            self.push_byte(byte);
            self.count -= 8;
        }
        self.acc &= (1 << self.count) - 1;
    }

    fn push_byte(&mut self, byte: u8) {
        self.out.push(byte);
        if byte == 0xFF {
            self.out.push(0x00);
        }
    }

    /// Pad the last byte with one bits.
    pub fn flush(&mut self) {
        if self.count > 0 {
            let pad = 8 - self.count;
            self.write((1 << pad) - 1, pad);
        }
    }

    pub fn into_inner(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

/// Reader over entropy-coded data that stops at the first marker.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    count: u32,
    marker: Option<u8>,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        BitReader {
            data,
            pos,
            acc: 0,
            count: 0,
            marker: None,
        }
    }

    fn fill(&mut self) {
        while self.count <= 56 {
            let byte = if self.marker.is_some() || self.pos >= self.data.len() {
                // past the end of the segment the decoder sees zero bits
                0
            } else if self.data[self.pos] == 0xFF {
                match self.data.get(self.pos + 1) {
                    Some(0x00) => {
                        self.pos += 2;
                        0xFF
                    }
                    Some(&marker) if marker != 0xFF => {
                        self.marker = Some(marker);
                        0
                    }
                    _ => {
                        // fill bytes before a marker
                        self.pos += 1;
                        continue;
                    }
                }
            } else {
                self.pos += 1;
                self.data[self.pos - 1]
            };
            self.acc |= u64::from(byte) << (56 - self.count);
            self.count += 8;
        }
    }

    pub fn read_bit(&mut self) -> u32 {
        self.read_bits(1)
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

    /// Discard buffered bits and consume the expected RSTn marker.
    pub fn restart(&mut self, expected: u8) -> Result<()> {
        self.acc = 0;
        self.count = 0;
        if self.marker.is_none() {
            // skip to the marker, tolerating trailing bytes in the interval
            while self.pos + 1 < self.data.len()
                && !(self.data[self.pos] == 0xFF
                    && self.data[self.pos + 1] != 0x00
                    && self.data[self.pos + 1] != 0xFF)
            {
                self.pos += 1;
            }
            self.marker = self.data.get(self.pos + 1).copied();
        }
        match self.marker {
            Some(marker) if marker == 0xD0 + (expected & 7) => {
                self.pos += 2;
                self.marker = None;
                Ok(())
            }
            other => Err(TranscodeError::codec(
                "JPEG",
                format!("expected RST{} marker, found {:?}", expected & 7, other),
            )),
        }
    }

    /// Offset of the marker ending the entropy-coded segment.
    pub fn end_position(&mut self) -> usize {
        while self.marker.is_none() && self.pos < self.data.len() {
            if self.data[self.pos] == 0xFF {
                match self.data.get(self.pos + 1) {
                    Some(0x00) => self.pos += 2,
                    Some(0xFF) => self.pos += 1,
                    Some(&marker) if (0xD0..=0xD7).contains(&marker) => self.pos += 2,
                    Some(_) => break,
                    None => self.pos += 1,
                }
            } else {
                self.pos += 1;
            }
        }
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_stuffs_ff_bytes() {
        let mut writer = BitWriter::new(Vec::new());
        writer.write(0xFF, 8);
        writer.write(0b101, 3);
        assert_eq!(writer.into_inner(), vec![0xFF, 0x00, 0b1011_1111]);
    }

    #[test]
    fn reader_undoes_stuffing_and_stops_at_marker() {
        let data = [0xFF, 0x00, 0b1010_0000, 0xFF, 0xD9];
        let mut reader = BitReader::new(&data, 0);
        assert_eq!(reader.read_bits(8), 0xFF);
        assert_eq!(reader.read_bits(3), 0b101);
        assert_eq!(reader.read_bits(5), 0);
        // zeros past the marker
        assert_eq!(reader.read_bits(8), 0);
        assert_eq!(reader.end_position(), 3);
    }

    #[test]
    fn restart_markers_are_consumed() {
        let data = [0b1100_0000, 0xFF, 0xD0, 0b0100_0000, 0xFF, 0xD9];
        let mut reader = BitReader::new(&data, 0);
        assert_eq!(reader.read_bits(2), 0b11);
        reader.restart(0).expect("RST0");
        assert_eq!(reader.read_bits(2), 0b01);
    }
}
