//! TIFF page counting
//!
//! Follows the IFD chain from the header without touching strip or tile
//! data. Only classic TIFF (magic 42) is understood; BigTIFF (magic 43) is
//! reported as unsupported.

use std::collections::HashSet;
use std::io::{Read, Seek};

use super::reader::{BinaryReader, ByteOrder};
use super::InspectError;

/// Upper bound on IFDs followed before the chain is treated as corrupt
pub const MAX_PAGES: usize = 65_536;

/// Count the IFDs (pages) in the main chain
pub fn count_pages<R: Read + Seek>(inner: R) -> Result<usize, InspectError> {
    let mut reader = BinaryReader::new(inner, ByteOrder::Little)?;

    let order = match &reader.read_array::<2>()? {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        other => return Err(InspectError::BadSignature(format!("{:02x?}", other))),
    };
    reader.set_order(order);

    match reader.read_u16()? {
        42 => {}
        43 => return Err(InspectError::BigTiff),
        other => return Err(InspectError::UnsupportedVersion(other)),
    }

    let mut offset = reader.read_u32()? as u64;
    let mut visited = HashSet::new();
    let mut pages = 0usize;

    while offset != 0 {
        if !visited.insert(offset) {
            return Err(InspectError::Malformed(format!(
                "IFD chain loops back to offset {}",
                offset
            )));
        }
        if pages >= MAX_PAGES {
            return Err(InspectError::Malformed(format!(
                "more than {} IFDs",
                MAX_PAGES
            )));
        }

        reader.seek_to(offset)?;
        let entries = reader.read_u16()? as u64;
        reader.skip(entries * 12)?;
        offset = reader.read_u32()? as u64;
        pages += 1;
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::fixtures::{bigtiff_bytes, tiff_bytes, tiff_loop_bytes};
    use std::io::Cursor;

    #[test]
    fn test_single_page() {
        assert_eq!(count_pages(Cursor::new(tiff_bytes(1, false))).unwrap(), 1);
    }

    #[test]
    fn test_multi_page_both_byte_orders() {
        assert_eq!(count_pages(Cursor::new(tiff_bytes(4, false))).unwrap(), 4);
        assert_eq!(count_pages(Cursor::new(tiff_bytes(4, true))).unwrap(), 4);
    }

    #[test]
    fn test_empty_chain() {
        assert_eq!(count_pages(Cursor::new(tiff_bytes(0, false))).unwrap(), 0);
    }

    #[test]
    fn test_bigtiff_unsupported() {
        assert!(matches!(
            count_pages(Cursor::new(bigtiff_bytes())),
            Err(InspectError::BigTiff)
        ));
    }

    #[test]
    fn test_loop_detected() {
        assert!(matches!(
            count_pages(Cursor::new(tiff_loop_bytes())),
            Err(InspectError::Malformed(_))
        ));
    }

    #[test]
    fn test_offset_past_end() {
        let mut bytes = tiff_bytes(1, false);
        bytes[4..8].copy_from_slice(&10_000u32.to_le_bytes());
        assert!(matches!(
            count_pages(Cursor::new(bytes)),
            Err(InspectError::Truncated { .. })
        ));
    }
}
