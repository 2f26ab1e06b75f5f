//! Container walkers that locate embedded metadata blocks
//!
//! JPEG marker segments, Photoshop image resource blocks (used both by PSD
//! files and JPEG APP13), and the PSD resource section. All functions work
//! on borrowed slices and stop quietly at the first inconsistency.

pub(crate) const XMP_APP1_PREFIX: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub(crate) const EXIF_APP1_PREFIX: &[u8] = b"Exif\0\0";
pub(crate) const PHOTOSHOP_APP13_PREFIX: &[u8] = b"Photoshop 3.0\0";
pub(crate) const ICC_APP2_PREFIX: &[u8] = b"ICC_PROFILE\0";

/// Photoshop image resource ids
pub(crate) mod resource_id {
    pub const IPTC_NAA: u16 = 0x0404;
    pub const ICC_PROFILE: u16 = 0x040F;
    pub const EXIF_DATA_1: u16 = 0x0422;
    pub const XMP: u16 = 0x0424;
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at.checked_add(2)?)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8])
}

pub(crate) fn is_psd(bytes: &[u8]) -> bool {
    bytes.starts_with(b"8BPS")
}

/// APPn / COM segments before the first scan, as (marker, payload)
pub(crate) fn jpeg_segments(bytes: &[u8]) -> Vec<(u8, &[u8])> {
    let mut segments = Vec::new();
    if !is_jpeg(bytes) {
        return segments;
    }

    let mut pos = 2usize;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            break;
        }
        let marker = bytes[pos + 1];
        match marker {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            // standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            // start of scan / end of image
            0xDA | 0xD9 => break,
            _ => {}
        }

        let Some(len) = be_u16(bytes, pos + 2) else {
            break;
        };
        let len = len as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            break;
        }
        segments.push((marker, &bytes[pos + 4..pos + 2 + len]));
        pos += 2 + len;
    }

    segments
}

/// Photoshop image resource blocks (`8BIM` + id + pascal name + sized data)
pub(crate) fn image_resources(bytes: &[u8]) -> Vec<(u16, &[u8])> {
    let mut resources = Vec::new();
    let mut pos = 0usize;

    while pos + 12 <= bytes.len() {
        if &bytes[pos..pos + 4] != b"8BIM" {
            break;
        }
        let Some(id) = be_u16(bytes, pos + 4) else {
            break;
        };

        // Pascal name, padded so length byte + name is even
        let name_len = bytes[pos + 6] as usize;
        let name_total = (name_len + 2) & !1;
        let size_at = pos + 6 + name_total;

        let Some(size) = be_u32(bytes, size_at) else {
            break;
        };
        let data_start = size_at + 4;
        let Some(data_end) = data_start.checked_add(size as usize) else {
            break;
        };
        if data_end > bytes.len() {
            break;
        }

        resources.push((id, &bytes[data_start..data_end]));
        pos = data_end + (size as usize & 1);
    }

    resources
}

/// Image resource section of a PSD/PSB file
pub(crate) fn psd_resource_section(bytes: &[u8]) -> Option<&[u8]> {
    if !is_psd(bytes) {
        return None;
    }
    let color_mode_len = be_u32(bytes, 26)? as usize;
    let resources_len_at = 30usize.checked_add(color_mode_len)?;
    let resources_len = be_u32(bytes, resources_len_at)? as usize;
    let start = resources_len_at + 4;
    bytes.get(start..start.checked_add(resources_len)?)
}

/// Reassemble an ICC profile split across APP2 segments
pub(crate) fn jpeg_icc_profile(segments: &[(u8, &[u8])]) -> Option<Vec<u8>> {
    let mut chunks: Vec<(u8, &[u8])> = segments
        .iter()
        .filter(|(marker, payload)| *marker == 0xE2 && payload.starts_with(ICC_APP2_PREFIX))
        .filter_map(|(_, payload)| {
            let rest = &payload[ICC_APP2_PREFIX.len()..];
            (rest.len() >= 2).then(|| (rest[0], &rest[2..]))
        })
        .collect();

    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(seq, _)| *seq);
    Some(chunks.into_iter().flat_map(|(_, data)| data.iter().copied()).collect())
}

/// First byte range delimited by `<x:xmpmeta` ... `</x:xmpmeta>`
pub(crate) fn find_xmp_packet(bytes: &[u8]) -> Option<&[u8]> {
    const OPEN: &[u8] = b"<x:xmpmeta";
    const CLOSE: &[u8] = b"</x:xmpmeta>";

    let start = find(bytes, OPEN)?;
    let end = find(&bytes[start..], CLOSE)? + start + CLOSE.len();
    Some(&bytes[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::fixtures::{icc_profile, image_resource, jpeg_with_metadata, psd_bytes_with_resources};

    #[test]
    fn test_jpeg_segments_found() {
        let jpeg = jpeg_with_metadata("<x:xmpmeta></x:xmpmeta>", b"", &icc_profile("sRGB"));
        let segments = jpeg_segments(&jpeg);
        let markers: Vec<u8> = segments.iter().map(|(m, _)| *m).collect();
        assert_eq!(markers, vec![0xE1, 0xE1, 0xED, 0xE2]);
        assert!(segments[0].1.starts_with(EXIF_APP1_PREFIX));
        assert!(jpeg_icc_profile(&segments).is_some());
    }

    #[test]
    fn test_image_resources_odd_sizes() {
        let mut block = image_resource(0x0404, b"abc");
        block.extend(image_resource(0x040F, b"wxyz"));
        let resources = image_resources(&block);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0], (0x0404, &b"abc"[..]));
        assert_eq!(resources[1], (0x040F, &b"wxyz"[..]));
    }

    #[test]
    fn test_psd_resource_section() {
        let psd = psd_bytes_with_resources(&[], false, &[image_resource(0x0424, b"<x:xmpmeta/>")]);
        let section = psd_resource_section(&psd).unwrap();
        assert_eq!(image_resources(section)[0].0, resource_id::XMP);
    }

    #[test]
    fn test_xmp_packet_scan() {
        let data = b"junk<x:xmpmeta a='1'>body</x:xmpmeta>tail";
        assert_eq!(
            find_xmp_packet(data).unwrap(),
            b"<x:xmpmeta a='1'>body</x:xmpmeta>"
        );
        assert!(find_xmp_packet(b"nothing here").is_none());
    }

    #[test]
    fn test_truncated_jpeg_stops() {
        let jpeg = jpeg_with_metadata("<x:xmpmeta></x:xmpmeta>", b"", b"");
        let cut = &jpeg[..20];
        assert!(jpeg_segments(cut).is_empty());
    }
}
