//
// huffman.rs
// Dicom-Conv-rs
//
// Huffman tables for the JPEG codecs: optimal code construction (ITU-T T.81 Annex K.2),
// encoder lookup tables and the bit-serial decoder of Annex F.
//
// Thales Matheus Mendonça Santos - November 2025

use super::bitio::{BitReader, BitWriter};
use crate::error::{Result, TranscodeError};

/// A table in its DHT form: code counts per length (1..=16) and symbols in code order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    pub counts: [u8; 16],
    pub symbols: Vec<u8>,
}

impl HuffmanTable {
    /// Build the optimal length-limited table for the given symbol frequencies.
    pub fn from_frequencies(frequencies: &[u32; 256]) -> HuffmanTable {
        let mut freq = [0u64; 257];
        for (slot, &count) in freq.iter_mut().zip(frequencies.iter()) {
            *slot = u64::from(count);
        }
        // reserved symbol so that no real code is all ones
        freq[256] = 1;

        let mut code_size = [0usize; 257];
        let mut others = [usize::MAX; 257];

        loop {
            let Some(mut v1) = least_frequent(&freq, None) else {
                break;
            };
            let Some(mut v2) = least_frequent(&freq, Some(v1)) else {
                break;
            };
            freq[v1] += freq[v2];
            freq[v2] = 0;

            code_size[v1] += 1;
            while others[v1] != usize::MAX {
                v1 = others[v1];
                code_size[v1] += 1;
            }
            others[v1] = v2;

            code_size[v2] += 1;
            while others[v2] != usize::MAX {
                v2 = others[v2];
                code_size[v2] += 1;
            }
        }

        let max_size = code_size.iter().copied().max().unwrap_or(0).max(16);
        let mut bits = vec![0usize; max_size + 1];
        for &size in code_size.iter().filter(|&&size| size > 0) {
            bits[size] += 1;
        }

        // limit code lengths to 16 bits
        let mut i = max_size;
        while i > 16 {
            while bits[i] > 0 {
                let mut j = i - 2;
                while bits[j] == 0 {
                    j -= 1;
                }
                bits[i] -= 2;
                bits[i - 1] += 1;
                bits[j + 1] += 2;
                bits[j] -= 1;
            }
            i -= 1;
        }
        // drop the reserved code from the longest length
        while i > 0 && bits[i] == 0 {
            i -= 1;
        }
        if i > 0 {
            bits[i] -= 1;
        }

        let mut counts = [0u8; 16];
        for (len, count) in counts.iter_mut().enumerate() {
            *count = bits[len + 1] as u8;
        }

        let mut symbols = Vec::new();
        for size in 1..=max_size {
            for (symbol, &s) in code_size.iter().enumerate().take(256) {
                if s == size {
                    symbols.push(symbol as u8);
                }
            }
        }
        HuffmanTable { counts, symbols }
    }

    /// Code lengths in symbol order (Annex C.1).
    fn sizes(&self) -> Vec<u32> {
        self.counts
            .iter()
            .enumerate()
            .flat_map(|(len, &count)| std::iter::repeat(len as u32 + 1).take(usize::from(count)))
            .collect()
    }

    /// Codes in symbol order (Annex C.2).
    fn codes(&self) -> Vec<(u32, u32)> {
        let sizes = self.sizes();
        let mut codes = Vec::with_capacity(sizes.len());
        let mut code = 0u32;
        let mut current = sizes.first().copied().unwrap_or(0);
        for size in sizes {
            while size > current {
                code <<= 1;
                current += 1;
            }
            codes.push((code, size));
            code += 1;
        }
        codes
    }

    /// Parse the tables of a DHT segment body: (class, destination, table) triples.
    pub fn parse_segment(mut body: &[u8]) -> Result<Vec<(u8, u8, HuffmanTable)>> {
        let mut tables = Vec::new();
        while !body.is_empty() {
            if body.len() < 17 {
                return Err(TranscodeError::codec("JPEG", "truncated DHT segment"));
            }
            let class = body[0] >> 4;
            let id = body[0] & 0x0F;
            let mut counts = [0u8; 16];
            counts.copy_from_slice(&body[1..17]);
            let total: usize = counts.iter().map(|&c| usize::from(c)).sum();
            let symbols = body
                .get(17..17 + total)
                .ok_or_else(|| TranscodeError::codec("JPEG", "truncated DHT segment"))?
                .to_vec();
            tables.push((class, id, HuffmanTable { counts, symbols }));
            body = &body[17 + total..];
        }
        Ok(tables)
    }

    /// Append the table to a DHT segment body.
    pub fn write_to(&self, class: u8, id: u8, out: &mut Vec<u8>) {
        out.push((class << 4) | id);
        out.extend_from_slice(&self.counts);
        out.extend_from_slice(&self.symbols);
    }
}

fn least_frequent(freq: &[u64; 257], exclude: Option<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &f) in freq.iter().enumerate() {
        if f == 0 || Some(i) == exclude {
            continue;
        }
        // ties go to the highest symbol
        if best.map_or(true, |b| f <= freq[b]) {
            best = Some(i);
        }
    }
    best
}

/// Symbol to (code, length) lookup used by the encoders.
pub struct HuffmanEncoder {
    codes: [(u32, u32); 256],
}

impl HuffmanEncoder {
    pub fn new(table: &HuffmanTable) -> Self {
        let mut codes = [(0, 0); 256];
        for (&symbol, code) in table.symbols.iter().zip(table.codes()) {
            codes[usize::from(symbol)] = code;
        }
        HuffmanEncoder { codes }
    }

    pub fn encode(&self, writer: &mut BitWriter, symbol: u8) {
        let (code, len) = self.codes[usize::from(symbol)];
        debug_assert!(len > 0, "symbol {symbol} has no code");
        writer.write(code, len);
    }
}

/// Decoder tables of Annex F.2.2.3.
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    max_code: [i32; 18],
    min_code: [i32; 17],
    val_ptr: [usize; 17],
    symbols: Vec<u8>,
}

impl HuffmanDecoder {
    pub fn new(table: &HuffmanTable) -> Self {
        let mut max_code = [-1i32; 18];
        let mut min_code = [0i32; 17];
        let mut val_ptr = [0usize; 17];
        let mut code = 0i32;
        let mut k = 0usize;
        for len in 1..=16 {
            let count = usize::from(table.counts[len - 1]);
            if count > 0 {
                val_ptr[len] = k;
                min_code[len] = code;
                code += count as i32;
                k += count;
                max_code[len] = code - 1;
            }
            code <<= 1;
        }
        // sentinel so the decode loop always terminates
        max_code[17] = i32::MAX;
        HuffmanDecoder {
            max_code,
            min_code,
            val_ptr,
            symbols: table.symbols.clone(),
        }
    }

    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u8> {
        let mut code = reader.read_bit() as i32;
        let mut len = 1;
        while code > self.max_code[len] {
            code = (code << 1) | reader.read_bit() as i32;
            len += 1;
            if len > 16 {
                return Err(TranscodeError::codec("JPEG", "invalid Huffman code"));
            }
        }
        let index = self.val_ptr[len] + (code - self.min_code[len]) as usize;
        self.symbols
            .get(index)
            .copied()
            .ok_or_else(|| TranscodeError::codec("JPEG", "Huffman code out of range"))
    }
}

/// Number of bits needed for the magnitude of `value` (the SSSS category).
pub fn category(value: i32) -> u32 {
    32 - value.unsigned_abs().leading_zeros()
}

/// Additional bits for a value of the given category.
pub fn magnitude_bits(value: i32, category: u32) -> u32 {
    if value < 0 {
        (value - 1) as u32 & ((1 << category) - 1)
    } else {
        value as u32
    }
}

/// Read the additional bits of a category and restore the signed value (EXTEND in Annex F).
pub fn receive_extend(reader: &mut BitReader<'_>, category: u32) -> i32 {
    if category == 0 {
        return 0;
    }
    let bits = reader.read_bits(category) as i32;
    if bits < 1 << (category - 1) {
        bits - (1 << category) + 1
    } else {
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimal_table_is_prefix_free_and_short() {
        let mut freq = [0u32; 256];
        freq[0] = 100;
        freq[1] = 50;
        freq[2] = 25;
        freq[3] = 1;
        let table = HuffmanTable::from_frequencies(&freq);
        assert_eq!(table.symbols[0], 0);
        assert_eq!(table.symbols.len(), 4);
        assert_eq!(table.counts[0], 1);

        let codes = table.codes();
        for (i, a) in codes.iter().enumerate() {
            // no code is all ones
            assert_ne!(a.0, (1 << a.1) - 1);
            for b in codes.iter().skip(i + 1) {
                let shift = b.1 - a.1;
                assert_ne!(b.0 >> shift, a.0, "code {:?} prefixes {:?}", a, b);
            }
        }
    }

    #[test]
    fn skewed_frequencies_are_limited_to_16_bits() {
        let mut freq = [0u32; 256];
        let mut f = 1u32;
        for slot in freq.iter_mut().take(40) {
            *slot = f;
            f = f.saturating_mul(2);
        }
        let table = HuffmanTable::from_frequencies(&freq);
        assert_eq!(table.symbols.len(), 40);
        let total: usize = table.counts.iter().map(|&c| usize::from(c)).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn encode_decode_symbols() {
        let mut freq = [0u32; 256];
        for (i, slot) in freq.iter_mut().enumerate().take(12) {
            *slot = (i as u32 + 1) * 3;
        }
        let table = HuffmanTable::from_frequencies(&freq);
        let encoder = HuffmanEncoder::new(&table);
        let mut writer = BitWriter::new(Vec::new());
        let message = [0u8, 11, 5, 5, 3, 7, 1];
        for &s in &message {
            encoder.encode(&mut writer, s);
        }
        let data = writer.into_inner();

        let decoder = HuffmanDecoder::new(&table);
        let mut reader = BitReader::new(&data, 0);
        for &s in &message {
            assert_eq!(decoder.decode(&mut reader).expect("symbol"), s);
        }
    }

    #[test]
    fn categories_and_extension() {
        assert_eq!(category(0), 0);
        assert_eq!(category(-1), 1);
        assert_eq!(category(255), 8);
        assert_eq!(category(-256), 9);

        let mut writer = BitWriter::new(Vec::new());
        for value in [-5, 6, -1] {
            let cat = category(value);
            writer.write(magnitude_bits(value, cat), cat);
        }
        let data = writer.into_inner();
        let mut reader = BitReader::new(&data, 0);
        assert_eq!(receive_extend(&mut reader, 3), -5);
        assert_eq!(receive_extend(&mut reader, 3), 6);
        assert_eq!(receive_extend(&mut reader, 1), -1);
    }

    #[test]
    fn dht_segment_round_trip() {
        let mut freq = [0u32; 256];
        freq[4] = 9;
        freq[9] = 2;
        let table = HuffmanTable::from_frequencies(&freq);
        let mut body = Vec::new();
        table.write_to(1, 0, &mut body);
        let parsed = HuffmanTable::parse_segment(&body).expect("dht");
        assert_eq!(parsed, vec![(1, 0, table)]);
    }
}
