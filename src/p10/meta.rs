//
// meta.rs
// Dicom-Conv-rs
//
// File meta information group (0002,xxxx): parsing and the rewrite applied on output.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::{Tag, VR};

use super::reader::Cursor;
use crate::dataset::{DataSet, Element, SOP_CLASS_UID, SOP_INSTANCE_UID, TRANSFER_SYNTAX_UID};
use crate::error::{Result, TranscodeError};
use crate::transfer_syntax::ByteOrder;

pub const FILE_META_GROUP_LENGTH: Tag = Tag(0x0002, 0x0000);
pub const FILE_META_INFORMATION_VERSION: Tag = Tag(0x0002, 0x0001);
pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag(0x0002, 0x0002);
pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag(0x0002, 0x0003);
pub const IMPLEMENTATION_CLASS_UID: Tag = Tag(0x0002, 0x0012);
pub const IMPLEMENTATION_VERSION_NAME: Tag = Tag(0x0002, 0x0013);

/// UUID-derived root identifying files written by this tool.
pub const IMPLEMENTATION_UID: &str = "2.25.137038125948464847900039011591283709926";
pub const IMPLEMENTATION_VERSION: &str = "DICOMCONV_010";

#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    elements: DataSet<'static>,
}

impl FileMeta {
    /// Parse group 0002 from the bytes following `DICM`, returning the meta and its encoded size.
    ///
    /// The group length element is not trusted: reading stops at the first tag outside the group.
    pub(crate) fn parse(data: &[u8]) -> Result<(FileMeta, usize)> {
        let mut cursor = Cursor::new(data, true, ByteOrder::Little);
        let mut elements = Vec::new();
        while let Some(tag) = cursor.peek_tag() {
            if tag.group() != 0x0002 {
                break;
            }
            elements.push(cursor.read_element()?.into_owned());
        }
        let meta = FileMeta {
            elements: DataSet::from_elements(elements),
        };
        if meta.transfer_syntax().is_none() {
            return Err(TranscodeError::MissingTransferSyntax);
        }
        Ok((meta, cursor.position()))
    }

    pub fn transfer_syntax(&self) -> Option<String> {
        self.elements
            .string(TRANSFER_SYNTAX_UID)
            .filter(|uid| !uid.is_empty())
    }

    pub fn media_storage_sop_class_uid(&self) -> Option<String> {
        self.elements.string(MEDIA_STORAGE_SOP_CLASS_UID)
    }

    pub fn media_storage_sop_instance_uid(&self) -> Option<String> {
        self.elements.string(MEDIA_STORAGE_SOP_INSTANCE_UID)
    }

    pub fn elements(&self) -> &DataSet<'static> {
        &self.elements
    }

    /// Meta group for an output file in `transfer_syntax`.
    ///
    /// The group length is dropped (the writer recomputes it) and the implementation
    /// identification is replaced; every other element keeps its bytes.
    pub fn rewritten(&self, transfer_syntax: &str) -> FileMeta {
        let mut elements = self.elements.clone();
        elements.remove(FILE_META_GROUP_LENGTH);
        if !elements.contains(FILE_META_INFORMATION_VERSION) {
            elements.put(Element::bytes(
                FILE_META_INFORMATION_VERSION,
                VR::OB,
                vec![0x00, 0x01],
            ));
        }
        elements.put(Element::text(TRANSFER_SYNTAX_UID, VR::UI, transfer_syntax));
        elements.put(Element::text(
            IMPLEMENTATION_CLASS_UID,
            VR::UI,
            IMPLEMENTATION_UID,
        ));
        elements.put(Element::text(
            IMPLEMENTATION_VERSION_NAME,
            VR::SH,
            IMPLEMENTATION_VERSION,
        ));
        FileMeta { elements }
    }

    /// A fresh meta group describing `dataset`, for data sets built in memory.
    pub fn for_dataset(dataset: &DataSet<'_>, transfer_syntax: &str) -> FileMeta {
        let mut elements = DataSet::new();
        if let Some(class) = dataset.string(SOP_CLASS_UID) {
            elements.put(Element::text(MEDIA_STORAGE_SOP_CLASS_UID, VR::UI, &class));
        }
        if let Some(instance) = dataset.string(SOP_INSTANCE_UID) {
            elements.put(Element::text(MEDIA_STORAGE_SOP_INSTANCE_UID, VR::UI, &instance));
        }
        FileMeta { elements }.rewritten(transfer_syntax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_syntax::{EXPLICIT_VR_LITTLE_ENDIAN, JPEG_LS_LOSSLESS};

    fn encode(tag: Tag, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.group().to_le_bytes());
        out.extend_from_slice(&tag.element().to_le_bytes());
        out.extend_from_slice(vr);
        if vr == b"OB" {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn reads_until_the_group_ends() {
        let mut data = encode(FILE_META_GROUP_LENGTH, b"UL", &999u32.to_le_bytes());
        data.extend(encode(MEDIA_STORAGE_SOP_CLASS_UID, b"UI", b"1.2.3\0"));
        data.extend(encode(TRANSFER_SYNTAX_UID, b"UI", b"1.2.840.10008.1.2.1\0"));
        let meta_len = data.len();
        data.extend(encode(Tag(0x0008, 0x0016), b"UI", b"1.2.3\0"));

        let (meta, consumed) = FileMeta::parse(&data).expect("meta");
        assert_eq!(consumed, meta_len);
        assert_eq!(meta.transfer_syntax().as_deref(), Some(EXPLICIT_VR_LITTLE_ENDIAN));
        assert_eq!(meta.media_storage_sop_class_uid().as_deref(), Some("1.2.3"));
    }

    #[test]
    fn meta_for_in_memory_dataset() {
        let mut ds = DataSet::new();
        ds.put(Element::text(SOP_CLASS_UID, VR::UI, "1.2.840.10008.5.1.4.1.1.7"));
        let meta = FileMeta::for_dataset(&ds, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(
            meta.media_storage_sop_class_uid().as_deref(),
            Some("1.2.840.10008.5.1.4.1.1.7")
        );
        assert_eq!(meta.media_storage_sop_instance_uid(), None);
        assert_eq!(meta.transfer_syntax().as_deref(), Some(EXPLICIT_VR_LITTLE_ENDIAN));
    }

    #[test]
    fn missing_transfer_syntax_is_an_error() {
        let data = encode(MEDIA_STORAGE_SOP_CLASS_UID, b"UI", b"1.2.3\0");
        let err = FileMeta::parse(&data).unwrap_err();
        assert!(matches!(err, TranscodeError::MissingTransferSyntax));
    }

    #[test]
    fn rewrite_replaces_syntax_and_implementation() {
        let mut data = encode(FILE_META_GROUP_LENGTH, b"UL", &10u32.to_le_bytes());
        data.extend(encode(MEDIA_STORAGE_SOP_INSTANCE_UID, b"UI", b"9.8.7\0"));
        data.extend(encode(TRANSFER_SYNTAX_UID, b"UI", b"1.2.840.10008.1.2\0"));
        data.extend(encode(IMPLEMENTATION_CLASS_UID, b"UI", b"1.1\0"));
        let (meta, _) = FileMeta::parse(&data).expect("meta");

        let out = meta.rewritten(JPEG_LS_LOSSLESS);
        assert_eq!(out.transfer_syntax().as_deref(), Some(JPEG_LS_LOSSLESS));
        assert_eq!(out.media_storage_sop_instance_uid().as_deref(), Some("9.8.7"));
        assert!(!out.elements().contains(FILE_META_GROUP_LENGTH));
        assert!(out.elements().contains(FILE_META_INFORMATION_VERSION));
        assert_eq!(
            out.elements().string(IMPLEMENTATION_CLASS_UID).as_deref(),
            Some(IMPLEMENTATION_UID)
        );
        // UI values stay even-length
        let ts = out.elements().get(TRANSFER_SYNTAX_UID).and_then(|e| e.as_bytes());
        assert_eq!(ts.map(|b| b.len() % 2), Some(0));
    }
}
