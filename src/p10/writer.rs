//
// writer.rs
// Dicom-Conv-rs
//
// Dataset rewriter: serializes the file meta group and a data set in the target encoding.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use dicom::core::{Tag, VR};
use tracing::warn;

use super::meta::{FileMeta, FILE_META_GROUP_LENGTH};
use super::reader::{has_long_length, UNDEFINED_LENGTH};
use crate::dataset::{DataSet, Element, Value, ITEM, ITEM_DELIMITER, SEQUENCE_DELIMITER};
use crate::error::{Result, TranscodeError};
use crate::transfer_syntax::{ByteOrder, SyntaxProfile};

/// Write a complete Part-10 stream: preamble, `DICM`, meta group, then the data set.
pub fn write_p10<W: Write>(
    out: &mut W,
    meta: &FileMeta,
    dataset: &DataSet<'_>,
    profile: &SyntaxProfile,
) -> Result<()> {
    if profile.byte_order == ByteOrder::Big || profile.deflated {
        return Err(TranscodeError::unsupported(
            profile.name,
            "only little endian, non-deflated output is written",
        ));
    }

    out.write_all(&[0u8; 128])?;
    out.write_all(b"DICM")?;

    let meta_writer = ElementWriter { explicit_vr: true };
    let mut group = Vec::new();
    for element in meta.elements().iter() {
        meta_writer.write_element(&mut group, element)?;
    }
    let group_length = u32::try_from(group.len())
        .map_err(|_| TranscodeError::unsupported(profile.name, "file meta group too large"))?;
    meta_writer.write_element(
        out,
        &Element::bytes(
            FILE_META_GROUP_LENGTH,
            VR::UL,
            group_length.to_le_bytes().to_vec(),
        ),
    )?;
    out.write_all(&group)?;

    ElementWriter {
        explicit_vr: profile.explicit_vr,
    }
    .write_dataset(out, dataset)
}

/// Encoder for little endian data sets; sequences and items always use undefined length.
struct ElementWriter {
    explicit_vr: bool,
}

impl ElementWriter {
    fn write_dataset<W: Write>(&self, out: &mut W, dataset: &DataSet<'_>) -> Result<()> {
        for element in dataset.iter() {
            // group lengths are stale once headers change size
            if element.tag.element() == 0x0000 {
                continue;
            }
            self.write_element(out, element)?;
        }
        Ok(())
    }

    fn write_element<W: Write>(&self, out: &mut W, element: &Element<'_>) -> Result<()> {
        match &element.value {
            Value::Bytes(bytes) => {
                let len = u32::try_from(bytes.len())
                    .ok()
                    .filter(|len| *len != UNDEFINED_LENGTH)
                    .ok_or_else(|| TranscodeError::Malformed {
                        offset: 0,
                        message: format!("value of {} too long to encode", element.tag),
                    })?;
                let mut vr = element.vr;
                if self.explicit_vr && !has_long_length(vr) && len > u32::from(u16::MAX) {
                    warn!(
                        "{} is {} bytes, too long for {:?}; writing as UN",
                        element.tag, len, vr
                    );
                    vr = VR::UN;
                }
                self.write_header(out, element.tag, vr, len)?;
                out.write_all(bytes)?;
            }
            Value::Sequence(items) => {
                self.write_header(out, element.tag, VR::SQ, UNDEFINED_LENGTH)?;
                for item in items {
                    write_delimiter(out, ITEM, UNDEFINED_LENGTH)?;
                    self.write_dataset(out, item)?;
                    write_delimiter(out, ITEM_DELIMITER, 0)?;
                }
                write_delimiter(out, SEQUENCE_DELIMITER, 0)?;
            }
            Value::Encapsulated(pixels) => {
                if !self.explicit_vr {
                    return Err(TranscodeError::unsupported(
                        "Implicit VR Little Endian",
                        "encapsulated pixel data requires explicit VR",
                    ));
                }
                self.write_header(out, element.tag, VR::OB, UNDEFINED_LENGTH)?;
                write_delimiter(out, ITEM, 4 * pixels.offset_table.len() as u32)?;
                for offset in &pixels.offset_table {
                    out.write_u32::<LittleEndian>(*offset)?;
                }
                for fragment in &pixels.fragments {
                    let padded = (fragment.len() + 1) & !1;
                    write_delimiter(out, ITEM, padded as u32)?;
                    out.write_all(fragment)?;
                    if padded != fragment.len() {
                        out.write_u8(0)?;
                    }
                }
                write_delimiter(out, SEQUENCE_DELIMITER, 0)?;
            }
        }
        Ok(())
    }

    fn write_header<W: Write>(&self, out: &mut W, tag: Tag, vr: VR, len: u32) -> Result<()> {
        out.write_u16::<LittleEndian>(tag.group())?;
        out.write_u16::<LittleEndian>(tag.element())?;
        if !self.explicit_vr {
            out.write_u32::<LittleEndian>(len)?;
            return Ok(());
        }
        out.write_all(&vr.to_bytes())?;
        if has_long_length(vr) {
            out.write_u16::<LittleEndian>(0)?;
            out.write_u32::<LittleEndian>(len)?;
        } else {
            out.write_u16::<LittleEndian>(len as u16)?;
        }
        Ok(())
    }
}

fn write_delimiter<W: Write>(out: &mut W, tag: Tag, len: u32) -> Result<()> {
    out.write_u16::<LittleEndian>(tag.group())?;
    out.write_u16::<LittleEndian>(tag.element())?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::dataset::{Encapsulated, PIXEL_DATA, ROWS};
    use crate::p10::{parse_dataset, P10File};
    use crate::transfer_syntax::{
        SyntaxProfile, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN, RLE_LOSSLESS,
    };

    fn sample_dataset() -> DataSet<'static> {
        let mut item = DataSet::new();
        item.put(Element::text(Tag(0x0008, 0x1150), VR::UI, "1.2.3"));
        let mut ds = DataSet::new();
        ds.put(Element::bytes(Tag(0x0008, 0x0000), VR::UL, vec![4, 0, 0, 0]));
        ds.put(Element::text(Tag(0x0010, 0x0010), VR::PN, "Doe^Jane"));
        ds.put(Element::new(
            Tag(0x0008, 0x1140),
            VR::SQ,
            Value::Sequence(vec![item]),
        ));
        ds.put(Element::uint16(ROWS, 2));
        ds
    }

    fn meta(ts: &str) -> FileMeta {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x02, 0x00, 0x10, 0x00]);
        data.extend_from_slice(b"UI");
        data.extend_from_slice(&20u16.to_le_bytes());
        data.extend_from_slice(b"1.2.840.10008.1.2.1\0");
        let (meta, _) = FileMeta::parse(&data).expect("meta");
        meta.rewritten(ts)
    }

    #[test]
    fn explicit_round_trip_drops_group_lengths() {
        let profile = SyntaxProfile::lookup(EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let mut out = Vec::new();
        write_p10(&mut out, &meta(EXPLICIT_VR_LITTLE_ENDIAN), &sample_dataset(), profile)
            .expect("write");
        assert_eq!(&out[128..132], b"DICM");

        let file = P10File::from_bytes(out).expect("reparse");
        assert_eq!(file.profile().uid, EXPLICIT_VR_LITTLE_ENDIAN);
        let ds = file.dataset().expect("dataset");
        assert!(!ds.contains(Tag(0x0008, 0x0000)));
        assert_eq!(ds.string(Tag(0x0010, 0x0010)).as_deref(), Some("Doe^Jane"));
        assert_eq!(ds.uint16(ROWS), Some(2));
        let Some(Value::Sequence(items)) = ds.get(Tag(0x0008, 0x1140)).map(|e| &e.value) else {
            panic!("sequence lost");
        };
        assert_eq!(items[0].string(Tag(0x0008, 0x1150)).as_deref(), Some("1.2.3"));
    }

    #[test]
    fn implicit_output_omits_vr() {
        let profile = SyntaxProfile::lookup(IMPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let mut ds = DataSet::new();
        ds.put(Element::uint16(ROWS, 300));
        let mut out = Vec::new();
        ElementWriter { explicit_vr: false }
            .write_dataset(&mut out, &ds)
            .expect("write");
        assert_eq!(out, vec![0x28, 0x00, 0x10, 0x00, 2, 0, 0, 0, 0x2C, 0x01]);

        let back = parse_dataset(&out, profile).expect("parse");
        assert_eq!(back.get(ROWS).map(|e| e.vr), Some(VR::US));
        assert_eq!(back.uint16(ROWS), Some(300));
    }

    #[test]
    fn encapsulated_pixel_data_layout() {
        let mut ds = DataSet::new();
        ds.put(Element::new(
            PIXEL_DATA,
            VR::OB,
            Value::Encapsulated(Encapsulated {
                offset_table: vec![0, 12],
                fragments: vec![Cow::Owned(vec![1, 2, 3, 4]), Cow::Owned(vec![5, 6])],
            }),
        ));
        let mut out = Vec::new();
        ElementWriter { explicit_vr: true }
            .write_dataset(&mut out, &ds)
            .expect("write");

        let profile = SyntaxProfile::lookup(RLE_LOSSLESS).unwrap();
        let back = parse_dataset(&out, profile).expect("parse");
        assert_eq!(back, ds);
    }

    #[test]
    fn encapsulated_pixel_data_needs_explicit_vr() {
        let mut ds = DataSet::new();
        ds.put(Element::new(
            PIXEL_DATA,
            VR::OB,
            Value::Encapsulated(Encapsulated::default()),
        ));
        let err = ElementWriter { explicit_vr: false }
            .write_dataset(&mut Vec::new(), &ds)
            .unwrap_err();
        assert!(matches!(err, TranscodeError::UnsupportedPixelData { .. }));
    }
}
