//
// encapsulation.rs
// Dicom-Conv-rs
//
// Splitting encapsulated pixel data into frames, and building it back from encoded frames.
//
// Thales Matheus Mendonça Santos - November 2025

use std::borrow::Cow;

use tracing::{debug, warn};

use crate::dataset::Encapsulated;
use crate::error::{Result, TranscodeError};

/// Group the fragments of encapsulated pixel data into `frames` compressed frames.
pub fn split_frames<'a>(
    pixels: &'a Encapsulated<'_>,
    frames: usize,
    jpeg_markers: bool,
) -> Result<Vec<Cow<'a, [u8]>>> {
    let fragments = &pixels.fragments;

    if fragments.len() == frames {
        return Ok(fragments.iter().map(|f| Cow::Borrowed(&**f)).collect());
    }

    if pixels.offset_table.len() == frames && frames > 0 {
        debug!("grouping {} fragments by basic offset table", fragments.len());
        return Ok(group_by_offset_table(pixels));
    }

    if frames == 1 {
        let parts: Vec<&[u8]> = fragments.iter().map(|f| &**f).collect();
        return Ok(vec![concat(&parts)]);
    }

    if jpeg_markers {
        let grouped = group_by_end_of_image(fragments);
        if grouped.len() == frames {
            return Ok(grouped);
        }
    }

    Err(TranscodeError::FrameCountMismatch {
        expected: frames,
        found: fragments.len(),
    })
}

fn concat<'a>(parts: &[&'a [u8]]) -> Cow<'a, [u8]> {
    match parts {
        [single] => Cow::Borrowed(*single),
        _ => Cow::Owned(parts.concat()),
    }
}

fn group_by_offset_table<'a>(pixels: &'a Encapsulated<'_>) -> Vec<Cow<'a, [u8]>> {
    // item offset of each fragment, relative to the first fragment item
    let mut position = 0u64;
    let positions: Vec<u64> = pixels
        .fragments
        .iter()
        .map(|f| {
            let at = position;
            position += 8 + f.len() as u64;
            at
        })
        .collect();

    let table = &pixels.offset_table;
    (0..table.len())
        .map(|i| {
            let start = u64::from(table[i]);
            let end = table.get(i + 1).map_or(u64::MAX, |&next| u64::from(next));
            let parts: Vec<&[u8]> = pixels
                .fragments
                .iter()
                .zip(&positions)
                .filter(|(_, at)| (start..end).contains(*at))
                .map(|(f, _)| &**f)
                .collect();
            concat(&parts)
        })
        .collect()
}

/// True when a fragment ends with an EOI marker, allowing one byte of padding after it.
fn ends_with_eoi(fragment: &[u8]) -> bool {
    fragment.ends_with(&[0xFF, 0xD9])
        || (fragment.len() >= 3 && fragment[..fragment.len() - 1].ends_with(&[0xFF, 0xD9]))
}

fn group_by_end_of_image<'a>(fragments: &'a [Cow<'_, [u8]>]) -> Vec<Cow<'a, [u8]>> {
    let mut frames = Vec::new();
    let mut current: Vec<&'a [u8]> = Vec::new();
    for fragment in fragments {
        current.push(&**fragment);
        if ends_with_eoi(fragment) {
            frames.push(concat(&current));
            current.clear();
        }
    }
    if !current.is_empty() {
        frames.push(concat(&current));
    }
    frames
}

/// One even-length fragment per frame, with a basic offset table pointing at each of them.
pub fn encapsulate(frames: Vec<Vec<u8>>) -> Encapsulated<'static> {
    let fragments: Vec<Cow<'static, [u8]>> = frames
        .into_iter()
        .map(|mut frame| {
            if frame.len() % 2 == 1 {
                frame.push(0);
            }
            Cow::Owned(frame)
        })
        .collect();
    Encapsulated {
        offset_table: offset_table(fragments.iter().map(|f| f.len())),
        fragments,
    }
}

/// Offsets of each fragment item from the first one.
///
/// Offsets are 32-bit; past 4 GiB of fragments the table is left empty.
fn offset_table(lengths: impl IntoIterator<Item = usize>) -> Vec<u32> {
    let mut table = Vec::new();
    let mut position = Some(0u32);
    for len in lengths {
        let Some(offset) = position else {
            warn!("encapsulated frames exceed 4 GiB, writing an empty basic offset table");
            return Vec::new();
        };
        table.push(offset);
        position = u32::try_from(len)
            .ok()
            .and_then(|len| len.checked_add(8))
            .and_then(|item| offset.checked_add(item));
    }
    table
}
