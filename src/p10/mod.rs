//
// mod.rs
// Dicom-Conv-rs
//
// DICOM Part-10 file reading and writing.
//
// Thales Matheus Mendonça Santos - November 2025

mod meta;
mod reader;
mod writer;

pub use meta::{FileMeta, IMPLEMENTATION_UID, IMPLEMENTATION_VERSION};
pub use reader::{parse_dataset, P10File};
pub use writer::write_p10;
