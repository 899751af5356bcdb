//
// dataset.rs
// Dicom-Conv-rs
//
// In-memory data set model: elements keep raw value bytes (borrowed from the file buffer when possible).
//
// Thales Matheus Mendonça Santos - November 2025

use std::borrow::Cow;

use dicom::core::{Tag, VR};
use tracing::warn;

pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
pub const PLANAR_CONFIGURATION: Tag = Tag(0x0028, 0x0006);
pub const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag(0x0028, 0x0101);
pub const HIGH_BIT: Tag = Tag(0x0028, 0x0102);
pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
pub const LOSSY_IMAGE_COMPRESSION: Tag = Tag(0x0028, 0x2110);
pub const LOSSY_IMAGE_COMPRESSION_RATIO: Tag = Tag(0x0028, 0x2112);
pub const LOSSY_IMAGE_COMPRESSION_METHOD: Tag = Tag(0x0028, 0x2114);
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
pub const ITEM_DELIMITER: Tag = Tag(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITER: Tag = Tag(0xFFFE, 0xE0DD);

/// Encapsulated pixel data: the basic offset table followed by the fragment items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encapsulated<'a> {
    pub offset_table: Vec<u32>,
    pub fragments: Vec<Cow<'a, [u8]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// Primitive value bytes, always in little endian order.
    Bytes(Cow<'a, [u8]>),
    Sequence(Vec<DataSet<'a>>),
    Encapsulated(Encapsulated<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element<'a> {
    pub tag: Tag,
    pub vr: VR,
    pub value: Value<'a>,
}

impl<'a> Element<'a> {
    pub fn new(tag: Tag, vr: VR, value: Value<'a>) -> Self {
        Element { tag, vr, value }
    }

    pub fn bytes(tag: Tag, vr: VR, bytes: impl Into<Cow<'a, [u8]>>) -> Self {
        Element::new(tag, vr, Value::Bytes(bytes.into()))
    }

    /// Build a text element, padding it to an even length as the standard requires.
    pub fn text(tag: Tag, vr: VR, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(if vr == VR::UI { 0 } else { b' ' });
        }
        Element::bytes(tag, vr, bytes)
    }

    pub fn uint16(tag: Tag, value: u16) -> Self {
        Element::bytes(tag, VR::US, value.to_le_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Text value with the trailing padding removed.
    pub fn to_str(&self) -> Option<String> {
        let bytes = self.as_bytes()?;
        let text = String::from_utf8_lossy(bytes);
        Some(text.trim_end_matches(['\0', ' ']).trim_start().to_string())
    }

    /// First value of a US/SS element.
    pub fn to_u16(&self) -> Option<u16> {
        let bytes = self.as_bytes()?;
        if bytes.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn into_owned(self) -> Element<'static> {
        Element {
            tag: self.tag,
            vr: self.vr,
            value: match self.value {
                Value::Bytes(bytes) => Value::Bytes(Cow::Owned(bytes.into_owned())),
                Value::Sequence(items) => {
                    Value::Sequence(items.into_iter().map(DataSet::into_owned).collect())
                }
                Value::Encapsulated(pixels) => Value::Encapsulated(Encapsulated {
                    offset_table: pixels.offset_table,
                    fragments: pixels
                        .fragments
                        .into_iter()
                        .map(|f| Cow::Owned(f.into_owned()))
                        .collect(),
                }),
            },
        }
    }
}

/// One nesting level of a DICOM data set, ordered by tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet<'a> {
    elements: Vec<Element<'a>>,
}

impl<'a> DataSet<'a> {
    pub fn new() -> Self {
        DataSet {
            elements: Vec::new(),
        }
    }

    /// Build a level from elements in file order, restoring tag order and dropping duplicates.
    pub fn from_elements(mut elements: Vec<Element<'a>>) -> Self {
        if elements.windows(2).any(|w| w[0].tag >= w[1].tag) {
            warn!("data set elements out of order or duplicated, re-sorting by tag");
            // stable sort keeps the first occurrence ahead of any duplicate
            elements.sort_by_key(|e| e.tag);
            elements.dedup_by(|later, earlier| {
                if later.tag == earlier.tag {
                    warn!("dropping duplicate element {}", later.tag);
                    true
                } else {
                    false
                }
            });
        }
        DataSet { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element<'a>> {
        self.elements.iter()
    }

    pub fn get(&self, tag: Tag) -> Option<&Element<'a>> {
        self.elements
            .binary_search_by_key(&tag, |e| e.tag)
            .ok()
            .map(|idx| &self.elements[idx])
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    /// Insert or replace an element, keeping tag order.
    pub fn put(&mut self, element: Element<'a>) -> Option<Element<'a>> {
        match self.elements.binary_search_by_key(&element.tag, |e| e.tag) {
            Ok(idx) => Some(std::mem::replace(&mut self.elements[idx], element)),
            Err(idx) => {
                self.elements.insert(idx, element);
                None
            }
        }
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Element<'a>> {
        self.elements
            .binary_search_by_key(&tag, |e| e.tag)
            .ok()
            .map(|idx| self.elements.remove(idx))
    }

    pub fn string(&self, tag: Tag) -> Option<String> {
        self.get(tag).and_then(Element::to_str)
    }

    pub fn uint16(&self, tag: Tag) -> Option<u16> {
        self.get(tag).and_then(Element::to_u16)
    }

    pub fn into_owned(self) -> DataSet<'static> {
        DataSet {
            elements: self.elements.into_iter().map(Element::into_owned).collect(),
        }
    }
}

impl<'a> IntoIterator for DataSet<'a> {
    type Item = Element<'a>;
    type IntoIter = std::vec::IntoIter<Element<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}
