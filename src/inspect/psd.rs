//! PSD / PSB layer directory parsing
//!
//! Reads the file header, skips the color mode and image resource sections,
//! and walks the layer records in the layer info section. Channel image data,
//! the merged composite and thumbnails are never read.
//!
//! Layer records are stored bottom to top. A group appears as a bounding
//! section divider (`lsct` type 3), then its children, then the folder record
//! itself (`lsct` type 1 or 2). Only records at depth 0 count as top-level
//! children, so a group with ten layers counts once.

use std::io::{Read, Seek};

use super::reader::{BinaryReader, ByteOrder};
use super::InspectError;

const SIGNATURE: &[u8; 4] = b"8BPS";

/// Additional layer info keys whose length field is 8 bytes in PSB files
const PSB_LONG_KEYS: [&[u8; 4]; 13] = [
    b"LMsk", b"Lr16", b"Lr32", b"Layr", b"Mt16", b"Mt32", b"Mtrn", b"Alph", b"FMsk", b"lnk2",
    b"FEid", b"FXid", b"PxSD",
];

/// Parsed PSD/PSB file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsdHeader {
    /// 1 = PSD, 2 = PSB (large document format)
    pub version: u16,
    pub channels: u16,
    pub height: u32,
    pub width: u32,
    pub depth: u16,
    pub color_mode: u16,
}

impl PsdHeader {
    pub fn is_psb(&self) -> bool {
        self.version == 2
    }

    pub fn color_mode_name(&self) -> &'static str {
        match self.color_mode {
            0 => "Bitmap",
            1 => "Grayscale",
            2 => "Indexed",
            3 => "RGB",
            4 => "CMYK",
            7 => "Multichannel",
            8 => "Duotone",
            9 => "Lab",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Layer,
    /// Open or closed folder; closes the innermost group
    GroupStart,
    /// Hidden bounding divider; opens a group
    GroupEnd,
}

/// Read and validate the 26-byte file header
pub fn read_header<R: Read + Seek>(inner: R) -> Result<PsdHeader, InspectError> {
    let mut reader = BinaryReader::new(inner, ByteOrder::Big)?;
    parse_header(&mut reader)
}

fn parse_header<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<PsdHeader, InspectError> {
    let signature = reader.read_array::<4>()?;
    if &signature != SIGNATURE {
        return Err(InspectError::BadSignature(format!("{:02x?}", signature)));
    }

    let version = reader.read_u16()?;
    if version != 1 && version != 2 {
        return Err(InspectError::UnsupportedVersion(version));
    }

    reader.skip(6)?; // reserved

    let channels = reader.read_u16()?;
    if channels == 0 || channels > 56 {
        return Err(InspectError::Malformed(format!("channel count {}", channels)));
    }

    Ok(PsdHeader {
        version,
        channels,
        height: reader.read_u32()?,
        width: reader.read_u32()?,
        depth: reader.read_u16()?,
        color_mode: reader.read_u16()?,
    })
}

/// Count the top-level children of the layer tree
pub fn count_top_level_layers<R: Read + Seek>(inner: R) -> Result<usize, InspectError> {
    let mut reader = BinaryReader::new(inner, ByteOrder::Big)?;
    let header = parse_header(&mut reader)?;
    let psb = header.is_psb();

    let color_mode_len = reader.read_u32()?;
    reader.skip(color_mode_len as u64)?;

    let resources_len = reader.read_u32()?;
    reader.skip(resources_len as u64)?;

    let layer_mask_len = read_length(&mut reader, psb)?;
    if layer_mask_len == 0 {
        return Ok(0);
    }
    let layer_mask_end = end_of(&reader, layer_mask_len)?;

    let layer_info_len = read_length(&mut reader, psb)?;
    let kinds = if layer_info_len > 0 {
        let layer_info_end = end_of(&reader, layer_info_len)?;
        parse_layer_records(&mut reader, psb, layer_info_end)?
    } else {
        // 16- and 32-bit documents keep their layers in a global Lr16/Lr32 block
        let global_mask_len = reader.read_u32()?;
        reader.skip(global_mask_len as u64)?;
        match find_nested_layer_block(&mut reader, psb, layer_mask_end)? {
            Some(block_end) => parse_layer_records(&mut reader, psb, block_end)?,
            None => Vec::new(),
        }
    };

    Ok(count_top_level(&kinds))
}

fn read_length<R: Read + Seek>(reader: &mut BinaryReader<R>, psb: bool) -> Result<u64, InspectError> {
    if psb {
        reader.read_u64()
    } else {
        Ok(reader.read_u32()? as u64)
    }
}

fn end_of<R: Read + Seek>(reader: &BinaryReader<R>, len: u64) -> Result<u64, InspectError> {
    match reader.position().checked_add(len) {
        Some(end) if end <= reader.len() => Ok(end),
        _ => Err(InspectError::Truncated {
            offset: reader.position(),
            len: reader.len(),
        }),
    }
}

fn find_nested_layer_block<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    psb: bool,
    section_end: u64,
) -> Result<Option<u64>, InspectError> {
    while reader.position() + 12 <= section_end {
        let signature = reader.read_array::<4>()?;
        if &signature != b"8BIM" && &signature != b"8B64" {
            return Ok(None);
        }
        let key = reader.read_array::<4>()?;
        let len = if psb && PSB_LONG_KEYS.contains(&&key) {
            reader.read_u64()?
        } else {
            reader.read_u32()? as u64
        };
        let block_end = end_of(reader, len)?;

        if &key == b"Lr16" || &key == b"Lr32" || &key == b"Layr" {
            return Ok(Some(block_end));
        }

        reader.seek_to(block_end)?;
        // Blocks in this area are padded to a 4-byte boundary
        let padded = (reader.position() + 3) & !3;
        if padded > reader.position() && padded <= section_end {
            reader.seek_to(padded)?;
        }
    }
    Ok(None)
}

fn parse_layer_records<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    psb: bool,
    section_end: u64,
) -> Result<Vec<RecordKind>, InspectError> {
    // Negative count means the first alpha channel holds merged transparency
    let count = reader.read_i16()?.unsigned_abs() as usize;
    let mut kinds = Vec::with_capacity(count);

    for index in 0..count {
        let kind = parse_layer_record(reader, psb)?;
        if reader.position() > section_end {
            return Err(InspectError::Malformed(format!(
                "layer record {} overruns layer info section",
                index
            )));
        }
        kinds.push(kind);
    }

    Ok(kinds)
}

fn parse_layer_record<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    psb: bool,
) -> Result<RecordKind, InspectError> {
    reader.skip(16)?; // top, left, bottom, right

    let channels = reader.read_u16()? as u64;
    let channel_entry = if psb { 10 } else { 6 };
    reader.skip(channels * channel_entry)?;

    let blend_signature = reader.read_array::<4>()?;
    if &blend_signature != b"8BIM" {
        return Err(InspectError::BadSignature(format!(
            "blend mode signature {:02x?}",
            blend_signature
        )));
    }
    reader.skip(4 + 4)?; // blend key, opacity, clipping, flags, filler

    let extra_len = reader.read_u32()? as u64;
    let extra_end = end_of(reader, extra_len)?;

    let mask_len = reader.read_u32()?;
    reader.skip(mask_len as u64)?;
    let ranges_len = reader.read_u32()?;
    reader.skip(ranges_len as u64)?;

    // Pascal string padded to a multiple of 4 bytes, length byte included
    let name_len = reader.read_u8()? as u64;
    let padded = ((name_len + 1 + 3) & !3) - 1;
    reader.skip(padded)?;

    let mut kind = RecordKind::Layer;
    while reader.position() + 12 <= extra_end {
        let signature = reader.read_array::<4>()?;
        if &signature != b"8BIM" && &signature != b"8B64" {
            break;
        }
        let key = reader.read_array::<4>()?;
        let len = if psb && PSB_LONG_KEYS.contains(&&key) {
            reader.read_u64()?
        } else {
            reader.read_u32()? as u64
        };
        let block_end = end_of(reader, len)?;

        if (&key == b"lsct" || &key == b"lsdk") && len >= 4 {
            kind = match reader.read_u32()? {
                1 | 2 => RecordKind::GroupStart,
                3 => RecordKind::GroupEnd,
                _ => kind,
            };
        }

        if block_end > extra_end {
            return Err(InspectError::Malformed(
                "additional layer info overruns layer record".to_string(),
            ));
        }
        reader.seek_to(block_end)?;
    }

    reader.seek_to(extra_end)?;
    Ok(kind)
}

fn count_top_level(kinds: &[RecordKind]) -> usize {
    let mut depth = 0usize;
    let mut top_level = 0usize;

    for kind in kinds {
        match kind {
            RecordKind::GroupEnd => depth += 1,
            RecordKind::GroupStart => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    top_level += 1;
                }
            }
            RecordKind::Layer => {
                if depth == 0 {
                    top_level += 1;
                }
            }
        }
    }

    top_level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::fixtures::{psd_bytes, FixtureLayer};
    use std::io::Cursor;

    #[test]
    fn test_header_fields() {
        let bytes = psd_bytes(&[FixtureLayer::Plain("Background")], false);
        let header = read_header(Cursor::new(bytes)).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.width, 64);
        assert_eq!(header.height, 32);
        assert_eq!(header.color_mode_name(), "RGB");
        assert!(!header.is_psb());
    }

    #[test]
    fn test_counts_plain_layers() {
        let layers = [
            FixtureLayer::Plain("Background"),
            FixtureLayer::Plain("Ink"),
            FixtureLayer::Plain("Notes"),
        ];
        let count = count_top_level_layers(Cursor::new(psd_bytes(&layers, false))).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_group_counts_once() {
        let layers = [
            FixtureLayer::Plain("Background"),
            FixtureLayer::GroupEnd,
            FixtureLayer::Plain("child a"),
            FixtureLayer::Plain("child b"),
            FixtureLayer::Group("Folder"),
        ];
        let count = count_top_level_layers(Cursor::new(psd_bytes(&layers, false))).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_psb_uses_wide_lengths() {
        let layers = [FixtureLayer::Plain("a"), FixtureLayer::Plain("b")];
        let bytes = psd_bytes(&layers, true);
        assert_eq!(read_header(Cursor::new(bytes.clone())).unwrap().version, 2);
        assert_eq!(count_top_level_layers(Cursor::new(bytes)).unwrap(), 2);
    }

    #[test]
    fn test_no_layer_section_is_zero() {
        let bytes = psd_bytes(&[], false);
        assert_eq!(count_top_level_layers(Cursor::new(bytes)).unwrap(), 0);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut bytes = psd_bytes(&[FixtureLayer::Plain("a")], false);
        bytes[0] = b'X';
        assert!(matches!(
            count_top_level_layers(Cursor::new(bytes)),
            Err(InspectError::BadSignature(_))
        ));
    }

    #[test]
    fn test_truncated_layer_section_errors() {
        let bytes = psd_bytes(&[FixtureLayer::Plain("a"), FixtureLayer::Plain("b")], false);
        let cut = bytes[..bytes.len() - 40].to_vec();
        assert!(count_top_level_layers(Cursor::new(cut)).is_err());
    }
}
