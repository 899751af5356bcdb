//
// reader.rs
// Dicom-Conv-rs
//
// Part-10 stream parser: preamble, file meta group, and a data set whose values stay borrowed.
//
// Thales Matheus Mendonça Santos - November 2025

use std::borrow::Cow;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use flate2::read::DeflateDecoder;
use tracing::{debug, warn};

use super::meta::FileMeta;
use crate::dataset::{
    DataSet, Element, Encapsulated, Value, ITEM, ITEM_DELIMITER, PIXEL_DATA, SEQUENCE_DELIMITER,
};
use crate::error::{Result, TranscodeError};
use crate::transfer_syntax::{ByteOrder, SyntaxProfile};

pub(crate) const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_DEPTH: usize = 64;

/// A Part-10 file read fully into memory.
///
/// The data set is parsed on demand by [`P10File::dataset`] and borrows from this buffer.
#[derive(Debug)]
pub struct P10File {
    meta: FileMeta,
    profile: &'static SyntaxProfile,
    buffer: Vec<u8>,
    dataset_offset: usize,
}

impl P10File {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        P10File::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let meta_start = locate_magic(&bytes)?;
        let (meta, meta_len) = FileMeta::parse(&bytes[meta_start..])?;
        let uid = meta.transfer_syntax().ok_or(TranscodeError::MissingTransferSyntax)?;
        let profile = SyntaxProfile::lookup(&uid)?;
        let dataset_offset = meta_start + meta_len;
        debug!(
            "source transfer syntax {} [{}], data set at offset {}",
            profile.name, profile.uid, dataset_offset
        );

        if profile.deflated {
            let mut inflated = Vec::with_capacity(bytes.len().saturating_sub(dataset_offset) * 4);
            DeflateDecoder::new(&bytes[dataset_offset..]).read_to_end(&mut inflated)?;
            return Ok(P10File {
                meta,
                profile,
                buffer: inflated,
                dataset_offset: 0,
            });
        }

        Ok(P10File {
            meta,
            profile,
            buffer: bytes,
            dataset_offset,
        })
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn profile(&self) -> &'static SyntaxProfile {
        self.profile
    }

    /// Parse the main data set according to the file's transfer syntax.
    pub fn dataset(&self) -> Result<DataSet<'_>> {
        parse_dataset(&self.buffer[self.dataset_offset..], self.profile)
    }
}

/// Offset of the first byte after the `DICM` prefix, with or without the 128-byte preamble.
fn locate_magic(bytes: &[u8]) -> Result<usize> {
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        Ok(132)
    } else if bytes.starts_with(b"DICM") {
        Ok(4)
    } else {
        Err(TranscodeError::NotPart10)
    }
}

pub fn parse_dataset<'a>(data: &'a [u8], profile: &SyntaxProfile) -> Result<DataSet<'a>> {
    Cursor::new(data, profile.explicit_vr, profile.byte_order).read_dataset(Container::Root)
}

/// VR of an element in an implicit VR data set.
pub(crate) fn implicit_vr(tag: Tag) -> VR {
    if tag.element() == 0x0000 {
        return VR::UL;
    }
    if tag.group() % 2 == 1 {
        // private creator elements are LO, everything else in a private group is opaque
        return if (0x0010..=0x00FF).contains(&tag.element()) {
            VR::LO
        } else {
            VR::UN
        };
    }
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.vr().relaxed())
        .unwrap_or(VR::UN)
}

/// Explicit VRs encoded with two reserved bytes and a 32-bit length.
pub(crate) fn has_long_length(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OD
            | VR::OF
            | VR::OL
            | VR::OV
            | VR::OW
            | VR::SQ
            | VR::SV
            | VR::UC
            | VR::UN
            | VR::UR
            | VR::UT
            | VR::UV
    )
}

/// Convert big endian value bytes to little endian according to the width of the VR.
fn swap_to_little(tag: Tag, vr: VR, raw: &[u8]) -> Cow<'_, [u8]> {
    let width = match vr {
        VR::AT | VR::OW | VR::SS | VR::US => 2,
        VR::FL | VR::OF | VR::OL | VR::SL | VR::UL => 4,
        VR::FD | VR::OD | VR::OV | VR::SV | VR::UV => 8,
        _ => return Cow::Borrowed(raw),
    };
    if raw.len() % width != 0 {
        warn!(
            "{} has {} bytes, not a multiple of {}; left unswapped",
            tag,
            raw.len(),
            width
        );
        return Cow::Borrowed(raw);
    }
    let mut swapped = raw.to_vec();
    for chunk in swapped.chunks_exact_mut(width) {
        chunk.reverse();
    }
    Cow::Owned(swapped)
}

#[derive(Debug, Copy, Clone)]
enum Container {
    Root,
    Defined(usize),
    UndefinedItem,
}

pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    explicit_vr: bool,
    order: ByteOrder,
    depth: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8], explicit_vr: bool, order: ByteOrder) -> Self {
        Cursor {
            data,
            pos: 0,
            explicit_vr,
            order,
            depth: 0,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn malformed(&self, offset: usize, message: String) -> TranscodeError {
        TranscodeError::Malformed { offset, message }
    }

    fn u16_at(&self, pos: usize) -> u16 {
        let bytes = &self.data[pos..pos + 2];
        match self.order {
            ByteOrder::Little => LittleEndian::read_u16(bytes),
            ByteOrder::Big => BigEndian::read_u16(bytes),
        }
    }

    fn take(&mut self, len: usize, tag: Tag) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(TranscodeError::Truncated {
                tag,
                offset: self.pos,
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self, tag: Tag) -> Result<u16> {
        let bytes = self.take(2, tag)?;
        Ok(match self.order {
            ByteOrder::Little => LittleEndian::read_u16(bytes),
            ByteOrder::Big => BigEndian::read_u16(bytes),
        })
    }

    fn read_u32(&mut self, tag: Tag) -> Result<u32> {
        let bytes = self.take(4, tag)?;
        Ok(match self.order {
            ByteOrder::Little => LittleEndian::read_u32(bytes),
            ByteOrder::Big => BigEndian::read_u32(bytes),
        })
    }

    pub(crate) fn peek_tag(&self) -> Option<Tag> {
        if self.remaining() < 4 {
            return None;
        }
        Some(Tag(self.u16_at(self.pos), self.u16_at(self.pos + 2)))
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let tag = self.peek_tag().ok_or(TranscodeError::Truncated {
            tag: Tag(0xFFFF, 0xFFFF),
            offset: self.pos,
        })?;
        self.pos += 4;
        Ok(tag)
    }

    /// End offset of a value of defined length starting at the current position.
    fn bounded_end(&self, len: usize, tag: Tag) -> Result<usize> {
        if self.remaining() < len {
            return Err(TranscodeError::Truncated {
                tag,
                offset: self.pos,
            });
        }
        Ok(self.pos + len)
    }

    fn with_encoding<T>(
        &mut self,
        explicit_vr: bool,
        order: ByteOrder,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = (self.explicit_vr, self.order);
        self.explicit_vr = explicit_vr;
        self.order = order;
        let result = f(self);
        (self.explicit_vr, self.order) = saved;
        result
    }

    fn read_header(&mut self) -> Result<(Tag, VR, u32)> {
        let start = self.pos;
        let tag = self.read_tag()?;
        if tag.group() == 0xFFFE {
            let len = self.read_u32(tag)?;
            return Ok((tag, VR::UN, len));
        }
        if !self.explicit_vr {
            let len = self.read_u32(tag)?;
            return Ok((tag, implicit_vr(tag), len));
        }

        let raw = self.take(2, tag)?;
        let vr = VR::from_binary([raw[0], raw[1]]).ok_or_else(|| {
            self.malformed(
                start,
                format!("invalid VR {:?} for {}", String::from_utf8_lossy(raw), tag),
            )
        })?;
        let len = if has_long_length(vr) {
            self.take(2, tag)?;
            self.read_u32(tag)?
        } else {
            u32::from(self.read_u16(tag)?)
        };
        Ok((tag, vr, len))
    }

    pub(crate) fn read_element(&mut self) -> Result<Element<'a>> {
        let start = self.pos;
        let (tag, vr, len) = self.read_header()?;

        if len == UNDEFINED_LENGTH {
            if tag == PIXEL_DATA && self.explicit_vr && vr != VR::SQ {
                let pixels = self.read_fragments()?;
                return Ok(Element::new(tag, VR::OB, Value::Encapsulated(pixels)));
            }
            if vr == VR::SQ {
                let items = self.read_items(None)?;
                return Ok(Element::new(tag, VR::SQ, Value::Sequence(items)));
            }
            if vr == VR::UN || !self.explicit_vr {
                // content of an undefined length UN element is implicit VR little endian
                let items =
                    self.with_encoding(false, ByteOrder::Little, |c| c.read_items(None))?;
                return Ok(Element::new(tag, VR::SQ, Value::Sequence(items)));
            }
            return Err(self.malformed(
                start,
                format!("undefined length on {:?} element {}", vr, tag),
            ));
        }

        let len = len as usize;
        if vr == VR::SQ {
            let end = self.bounded_end(len, tag)?;
            let items = self.read_items(Some(end))?;
            self.pos = end;
            return Ok(Element::new(tag, VR::SQ, Value::Sequence(items)));
        }

        let raw = self.take(len, tag)?;
        let bytes = match self.order {
            ByteOrder::Little => Cow::Borrowed(raw),
            ByteOrder::Big => swap_to_little(tag, vr, raw),
        };
        Ok(Element::bytes(tag, vr, bytes))
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.malformed(self.pos, "sequences nested too deeply".to_string()));
        }
        Ok(())
    }

    fn read_items(&mut self, end: Option<usize>) -> Result<Vec<DataSet<'a>>> {
        self.enter()?;
        let mut items = Vec::new();
        loop {
            match end {
                Some(end) if self.pos >= end => break,
                None if self.remaining() == 0 => {
                    return Err(TranscodeError::Truncated {
                        tag: SEQUENCE_DELIMITER,
                        offset: self.pos,
                    })
                }
                _ => {}
            }

            let item_start = self.pos;
            let tag = self.read_tag()?;
            let len = self.read_u32(tag)?;
            match tag {
                ITEM => {
                    if len == UNDEFINED_LENGTH {
                        items.push(self.read_dataset(Container::UndefinedItem)?);
                    } else {
                        let item_end = self.bounded_end(len as usize, tag)?;
                        items.push(self.read_dataset(Container::Defined(item_end))?);
                        self.pos = item_end;
                    }
                }
                SEQUENCE_DELIMITER => {
                    if end.is_some() {
                        warn!("sequence delimiter inside a defined length sequence");
                    }
                    break;
                }
                _ => {
                    return Err(
                        self.malformed(item_start, format!("expected an item, found {}", tag))
                    )
                }
            }
        }
        self.depth -= 1;
        Ok(items)
    }

    fn read_dataset(&mut self, container: Container) -> Result<DataSet<'a>> {
        let mut elements = Vec::new();
        loop {
            match container {
                Container::Root if self.remaining() < 8 => {
                    if self.remaining() > 0 {
                        warn!("ignoring {} trailing byte(s)", self.remaining());
                    }
                    break;
                }
                Container::Defined(end) if self.pos >= end => break,
                Container::UndefinedItem if self.remaining() == 0 => {
                    return Err(TranscodeError::Truncated {
                        tag: ITEM_DELIMITER,
                        offset: self.pos,
                    })
                }
                _ => {}
            }

            let tag = match self.peek_tag() {
                Some(tag) => tag,
                None => {
                    return Err(TranscodeError::Truncated {
                        tag: ITEM_DELIMITER,
                        offset: self.pos,
                    })
                }
            };

            match tag {
                ITEM_DELIMITER => {
                    self.pos += 4;
                    self.read_u32(tag)?;
                    if let Container::UndefinedItem = container {
                        break;
                    }
                    warn!("stray item delimiter at offset {}", self.pos - 8);
                    continue;
                }
                SEQUENCE_DELIMITER => {
                    self.pos += 4;
                    self.read_u32(tag)?;
                    warn!("stray sequence delimiter at offset {}", self.pos - 8);
                    continue;
                }
                Tag(0x0000, 0x0000) if matches!(container, Container::Root) => {
                    warn!(
                        "zero padding at offset {}, ignoring the rest of the data set",
                        self.pos
                    );
                    break;
                }
                _ => {}
            }

            let start = self.pos;
            let element = self.read_element()?;
            if let Container::Defined(end) = container {
                if self.pos > end {
                    return Err(self.malformed(
                        start,
                        format!("element {} overruns its item", element.tag),
                    ));
                }
            }
            elements.push(element);
        }
        Ok(DataSet::from_elements(elements))
    }

    fn read_fragments(&mut self) -> Result<Encapsulated<'a>> {
        let mut offset_table = None;
        let mut fragments = Vec::new();
        loop {
            let item_start = self.pos;
            let tag = self.read_tag()?;
            let len = self.read_u32(tag)?;
            match tag {
                ITEM => {
                    if len == UNDEFINED_LENGTH {
                        return Err(self.malformed(
                            item_start,
                            "pixel data fragment with undefined length".to_string(),
                        ));
                    }
                    let data = self.take(len as usize, ITEM)?;
                    if offset_table.is_none() {
                        if data.len() % 4 != 0 {
                            return Err(self.malformed(
                                item_start,
                                format!("basic offset table of {} bytes", data.len()),
                            ));
                        }
                        let offsets = data
                            .chunks_exact(4)
                            .map(|chunk| match self.order {
                                ByteOrder::Little => LittleEndian::read_u32(chunk),
                                ByteOrder::Big => BigEndian::read_u32(chunk),
                            })
                            .collect();
                        offset_table = Some(offsets);
                    } else {
                        fragments.push(Cow::Borrowed(data));
                    }
                }
                SEQUENCE_DELIMITER => break,
                _ => {
                    return Err(self.malformed(
                        item_start,
                        format!("expected a pixel data item, found {}", tag),
                    ))
                }
            }
        }
        Ok(Encapsulated {
            offset_table: offset_table.unwrap_or_default(),
            fragments,
        })
    }
}
