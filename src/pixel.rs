//
// pixel.rs
// Dicom-Conv-rs
//
// Image Pixel module attributes and helpers over the canonical frame buffer
// (interleaved samples, little endian, BitsAllocated bits per sample).
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::Tag;

use crate::dataset::{
    DataSet, BITS_ALLOCATED, BITS_STORED, COLUMNS, HIGH_BIT, NUMBER_OF_FRAMES,
    PHOTOMETRIC_INTERPRETATION, PIXEL_REPRESENTATION, PLANAR_CONFIGURATION, ROWS,
    SAMPLES_PER_PIXEL,
};
use crate::error::{Result, TranscodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePixel {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    pub pixel_representation: u16,
    pub photometric_interpretation: String,
    pub planar_configuration: u16,
    pub number_of_frames: u32,
}

fn required(ds: &DataSet<'_>, tag: Tag, name: &'static str) -> Result<u16> {
    ds.uint16(tag).ok_or(TranscodeError::MissingAttribute(name))
}

impl ImagePixel {
    pub fn from_dataset(ds: &DataSet<'_>) -> Result<Self> {
        let rows = required(ds, ROWS, "Rows")?;
        let columns = required(ds, COLUMNS, "Columns")?;
        let samples_per_pixel = required(ds, SAMPLES_PER_PIXEL, "SamplesPerPixel")?;
        let bits_allocated = required(ds, BITS_ALLOCATED, "BitsAllocated")?;
        let bits_stored = ds.uint16(BITS_STORED).unwrap_or(bits_allocated);
        let high_bit = ds
            .uint16(HIGH_BIT)
            .unwrap_or_else(|| bits_stored.saturating_sub(1));
        let pixel_representation = ds.uint16(PIXEL_REPRESENTATION).unwrap_or(0);
        let photometric_interpretation = ds
            .string(PHOTOMETRIC_INTERPRETATION)
            .filter(|pi| !pi.is_empty())
            .ok_or(TranscodeError::MissingAttribute("PhotometricInterpretation"))?;
        let planar_configuration = ds.uint16(PLANAR_CONFIGURATION).unwrap_or(0);

        let number_of_frames = match ds.string(NUMBER_OF_FRAMES) {
            None => 1,
            Some(text) if text.is_empty() => 1,
            Some(text) => text
                .parse::<u32>()
                .map(|n| n.max(1))
                .map_err(|_| TranscodeError::InvalidAttribute {
                    name: "NumberOfFrames",
                    value: text,
                })?,
        };

        if samples_per_pixel == 0 {
            return Err(TranscodeError::InvalidAttribute {
                name: "SamplesPerPixel",
                value: samples_per_pixel.to_string(),
            });
        }
        if bits_allocated != 1 && (bits_allocated % 8 != 0 || bits_allocated > 32) {
            return Err(TranscodeError::InvalidAttribute {
                name: "BitsAllocated",
                value: bits_allocated.to_string(),
            });
        }
        if bits_stored == 0 || bits_stored > bits_allocated {
            return Err(TranscodeError::InvalidAttribute {
                name: "BitsStored",
                value: bits_stored.to_string(),
            });
        }

        Ok(ImagePixel {
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            bits_stored,
            high_bit,
            pixel_representation,
            photometric_interpretation,
            planar_configuration,
            number_of_frames,
        })
    }

    pub fn is_signed(&self) -> bool {
        self.pixel_representation == 1
    }

    pub fn is_color(&self) -> bool {
        self.samples_per_pixel > 1
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_allocated).div_ceil(8)
    }

    pub fn pixel_count(&self) -> usize {
        usize::from(self.rows) * usize::from(self.columns)
    }

    pub fn frame_count(&self) -> usize {
        self.number_of_frames as usize
    }

    /// Size of one canonical (fully sampled) frame in bytes.
    pub fn frame_len(&self) -> usize {
        let samples = self.pixel_count() * usize::from(self.samples_per_pixel);
        if self.bits_allocated == 1 {
            samples.div_ceil(8)
        } else {
            samples * self.bytes_per_sample()
        }
    }

    /// Size of one frame as stored natively, which is smaller for subsampled YBR_FULL_422.
    pub fn native_frame_len(&self) -> usize {
        if self.is_ybr_full_422() {
            self.pixel_count() * 2 * self.bytes_per_sample()
        } else {
            self.frame_len()
        }
    }

    pub fn is_ybr_full_422(&self) -> bool {
        self.photometric_interpretation == "YBR_FULL_422" && self.samples_per_pixel == 3
    }

    /// Mask covering the stored bits of a sample.
    pub fn stored_mask(&self) -> u32 {
        if self.bits_stored >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bits_stored) - 1
        }
    }
}

/// Read a canonical frame as unsigned samples of at most 16 bits.
pub fn frame_to_u16(frame: &[u8], bits_allocated: u16) -> Vec<u16> {
    if bits_allocated <= 8 {
        frame.iter().map(|&b| u16::from(b)).collect()
    } else {
        frame
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

pub fn u16_to_frame(samples: &[u16], bits_allocated: u16) -> Vec<u8> {
    if bits_allocated <= 8 {
        samples.iter().map(|&s| s as u8).collect()
    } else {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Keep the stored bits of each sample; signed values are sign-extended to the allocated width.
pub fn normalize_stored_bits(frame: &mut [u8], image: &ImagePixel) {
    if image.bits_stored >= image.bits_allocated || image.bits_allocated > 16 {
        return;
    }
    let bits = u32::from(image.bits_stored);
    let mask = image.stored_mask() as u16;
    let sign = 1u16 << (bits - 1);
    let fix = |value: u16| -> u16 {
        let value = value & mask;
        if image.is_signed() && value & sign != 0 {
            value | !mask
        } else {
            value
        }
    };
    if image.bits_allocated == 8 {
        for b in frame.iter_mut() {
            *b = fix(u16::from(*b)) as u8;
        }
    } else {
        for chunk in frame.chunks_exact_mut(2) {
            let value = fix(u16::from_le_bytes([chunk[0], chunk[1]]));
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Convert a colour-by-plane frame (planar configuration 1) to interleaved samples.
pub fn planar_to_interleaved(frame: &[u8], samples: usize, bytes_per_sample: usize) -> Vec<u8> {
    let plane = frame.len() / samples;
    let pixels = plane / bytes_per_sample;
    let mut out = Vec::with_capacity(frame.len());
    for px in 0..pixels {
        for s in 0..samples {
            let start = s * plane + px * bytes_per_sample;
            out.extend_from_slice(&frame[start..start + bytes_per_sample]);
        }
    }
    out
}

/// Expand native YBR_FULL_422 (Y1 Y2 Cb Cr per pixel pair) to YBR_FULL.
pub fn expand_ybr_full_422(frame: &[u8], image: &ImagePixel) -> Vec<u8> {
    let bps = image.bytes_per_sample();
    let columns = usize::from(image.columns);
    let mut out = Vec::with_capacity(image.frame_len());
    for row in frame.chunks(columns * 2 * bps) {
        for pair in row.chunks(4 * bps) {
            if pair.len() < 4 * bps {
                break;
            }
            let (y1, rest) = pair.split_at(bps);
            let (y2, rest) = rest.split_at(bps);
            let (cb, cr) = rest.split_at(bps);
            for y in [y1, y2] {
                out.extend_from_slice(y);
                out.extend_from_slice(cb);
                out.extend_from_slice(cr);
            }
        }
    }
    // odd column counts leave one trailing pixel per row unexpanded
    out.resize(image.frame_len(), 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Element;
    use dicom::core::VR;

    fn image_dataset() -> DataSet<'static> {
        let mut ds = DataSet::new();
        ds.put(Element::uint16(ROWS, 2));
        ds.put(Element::uint16(COLUMNS, 2));
        ds.put(Element::uint16(SAMPLES_PER_PIXEL, 3));
        ds.put(Element::uint16(BITS_ALLOCATED, 8));
        ds.put(Element::uint16(BITS_STORED, 8));
        ds.put(Element::text(PHOTOMETRIC_INTERPRETATION, VR::CS, "YBR_FULL_422"));
        ds.put(Element::text(NUMBER_OF_FRAMES, VR::IS, "3"));
        ds
    }

    #[test]
    fn reads_image_pixel_attributes() {
        let image = ImagePixel::from_dataset(&image_dataset()).expect("image");
        assert_eq!(image.number_of_frames, 3);
        assert_eq!(image.high_bit, 7);
        assert_eq!(image.frame_len(), 12);
        assert_eq!(image.native_frame_len(), 8);
        assert!(image.is_ybr_full_422());
    }

    #[test]
    fn missing_rows_is_reported() {
        let mut ds = image_dataset();
        ds.remove(ROWS);
        let err = ImagePixel::from_dataset(&ds).unwrap_err();
        assert!(matches!(err, TranscodeError::MissingAttribute("Rows")));
    }

    #[test]
    fn bad_frame_count_is_reported() {
        let mut ds = image_dataset();
        ds.put(Element::text(NUMBER_OF_FRAMES, VR::IS, "many"));
        let err = ImagePixel::from_dataset(&ds).unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidAttribute { name: "NumberOfFrames", .. }));
    }

    #[test]
    fn planar_frames_are_interleaved() {
        let planar = [1, 2, 10, 20, 100, 200];
        assert_eq!(planar_to_interleaved(&planar, 3, 1), vec![1, 10, 100, 2, 20, 200]);
    }

    #[test]
    fn ybr_422_is_expanded() {
        let image = ImagePixel::from_dataset(&image_dataset()).expect("image");
        let native = [10, 11, 128, 129, 20, 21, 130, 131];
        let full = expand_ybr_full_422(&native, &image);
        assert_eq!(
            full,
            vec![10, 128, 129, 11, 128, 129, 20, 130, 131, 21, 130, 131]
        );
    }

    #[test]
    fn signed_samples_are_sign_extended() {
        let mut ds = image_dataset();
        ds.put(Element::uint16(SAMPLES_PER_PIXEL, 1));
        ds.put(Element::text(PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"));
        ds.put(Element::uint16(BITS_ALLOCATED, 16));
        ds.put(Element::uint16(BITS_STORED, 12));
        ds.put(Element::uint16(PIXEL_REPRESENTATION, 1));
        let image = ImagePixel::from_dataset(&ds).expect("image");
        let mut frame = u16_to_frame(&[0x0FFF, 0x0001, 0x0800], 16);
        normalize_stored_bits(&mut frame, &image);
        assert_eq!(frame_to_u16(&frame, 16), vec![0xFFFF, 0x0001, 0xF800]);
    }
}
