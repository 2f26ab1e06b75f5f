//! ICC profile header and text tags

use super::{MetaValue, MetadataError, RawMetadata};

const HEADER_LEN: usize = 128;
const MAX_TAGS: usize = 256;

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn signature(bytes: &[u8], at: usize) -> Option<String> {
    let raw = bytes.get(at..at + 4)?;
    let text = String::from_utf8_lossy(raw).trim_end_matches([' ', '\0']).to_string();
    (!text.is_empty()).then_some(text)
}

fn class_name(sig: &str) -> &str {
    match sig {
        "scnr" => "Input Device Profile",
        "mntr" => "Display Device Profile",
        "prtr" => "Output Device Profile",
        "link" => "DeviceLink Profile",
        "spac" => "ColorSpace Conversion Profile",
        "abst" => "Abstract Profile",
        "nmcl" => "NamedColor Profile",
        other => other,
    }
}

fn tag_name(sig: &[u8]) -> Option<&'static str> {
    Some(match sig {
        b"desc" => "ProfileDescription",
        b"cprt" => "ProfileCopyright",
        b"dmnd" => "DeviceMfgDesc",
        b"dmdd" => "DeviceModelDesc",
        b"vued" => "ViewingCondDesc",
        _ => return None,
    })
}

/// Parse header fields and known text tags into `ICC_Profile:*` keys
pub(crate) fn parse(profile: &[u8]) -> Result<RawMetadata, MetadataError> {
    if profile.len() < HEADER_LEN + 4 || profile.get(36..40) != Some(b"acsp") {
        return Err(MetadataError::Malformed("not an ICC profile".to_string()));
    }

    let mut out = RawMetadata::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            out.insert(format!("ICC_Profile:{}", key), MetaValue::Text(value));
        }
    };

    put("ProfileCMMType", signature(profile, 4));
    put(
        "ProfileVersion",
        Some(format!(
            "{}.{}.{}",
            profile[8],
            profile[9] >> 4,
            profile[9] & 0x0F
        )),
    );
    put(
        "ProfileClass",
        signature(profile, 12).map(|s| class_name(&s).to_string()),
    );
    put("ColorSpaceData", signature(profile, 16));
    put("ProfileConnectionSpace", signature(profile, 20));

    let count = be_u32(profile, HEADER_LEN).unwrap_or(0) as usize;
    for i in 0..count.min(MAX_TAGS) {
        let entry = HEADER_LEN + 4 + i * 12;
        let Some(sig) = profile.get(entry..entry + 4) else {
            break;
        };
        let Some(name) = tag_name(sig) else {
            continue;
        };
        let (Some(offset), Some(size)) = (be_u32(profile, entry + 4), be_u32(profile, entry + 8))
        else {
            break;
        };
        let Some(data) = profile.get(offset as usize..(offset as usize).saturating_add(size as usize))
        else {
            continue;
        };
        put(name, text_tag(data));
    }

    Ok(out)
}

/// Decode `desc`, `text` and `mluc` tag types
fn text_tag(data: &[u8]) -> Option<String> {
    let kind = data.get(0..4)?;
    let text = match kind {
        b"desc" => {
            let len = be_u32(data, 8)? as usize;
            let raw = data.get(12..12usize.checked_add(len)?)?;
            String::from_utf8_lossy(raw).into_owned()
        }
        b"text" => String::from_utf8_lossy(data.get(8..)?).into_owned(),
        b"mluc" => {
            let records = be_u32(data, 8)?;
            if records == 0 {
                return None;
            }
            let len = be_u32(data, 20)? as usize;
            let offset = be_u32(data, 24)? as usize;
            let raw = data.get(offset..offset.checked_add(len)?)?;
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => return None,
    };

    let text = text.trim_end_matches('\0').trim().to_string();
    (!text.is_empty()).then_some(text)
}
