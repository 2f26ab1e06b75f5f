//! Exif extraction (kamadak-exif)

use std::io::Cursor;

use ::exif::{Field, In, Reader, Tag, Value};

use super::{MetaValue, MetadataError, RawMetadata};

/// Undefined/Byte payloads longer than this surface as binary
const INLINE_BYTES_MAX: usize = 16;

const TAG_XMP: u16 = 700;
const TAG_IPTC: u16 = 33723;
const TAG_ICC: u16 = 34675;

/// Exif fields plus metadata blocks embedded as TIFF tags
#[derive(Debug, Default)]
pub(crate) struct ExifBlock {
    pub fields: RawMetadata,
    pub xmp: Option<Vec<u8>>,
    pub iptc: Option<Vec<u8>>,
    pub icc: Option<Vec<u8>>,
}

/// Raw TIFF-structured Exif data (JPEG APP1 payload, PSD resource 0x0422)
pub(crate) fn read_tiff_block(data: &[u8]) -> Result<ExifBlock, MetadataError> {
    let exif = Reader::new().read_raw(data.to_vec())?;
    Ok(collect(exif.fields()))
}

/// Any container kamadak-exif understands (TIFF, JPEG, PNG, WebP, HEIF)
pub(crate) fn read_container(bytes: &[u8]) -> Result<ExifBlock, MetadataError> {
    let mut cursor = Cursor::new(bytes);
    let exif = Reader::new().read_from_container(&mut cursor)?;
    Ok(collect(exif.fields()))
}

fn collect<'a>(fields: impl Iterator<Item = &'a Field>) -> ExifBlock {
    let mut block = ExifBlock::default();

    for field in fields {
        let embedded = match field.tag.number() {
            TAG_XMP => Some(&mut block.xmp),
            TAG_IPTC => Some(&mut block.iptc),
            TAG_ICC => Some(&mut block.icc),
            _ => None,
        };
        if let Some(slot) = embedded {
            if let Value::Byte(bytes) | Value::Undefined(bytes, _) = &field.value {
                slot.get_or_insert_with(|| bytes.clone());
            }
            continue;
        }

        let Some(value) = convert(field) else {
            continue;
        };
        block.fields.insert(key_for(field.tag, field.ifd_num), value);
    }

    block
}

fn key_for(tag: Tag, ifd: In) -> String {
    if ifd == In::THUMBNAIL {
        format!("EXIF:Thumbnail{}", tag)
    } else {
        format!("EXIF:{}", tag)
    }
}

fn convert(field: &Field) -> Option<MetaValue> {
    match &field.value {
        Value::Ascii(parts) => MetaValue::from_many(
            parts
                .iter()
                .map(|p| MetaValue::Text(String::from_utf8_lossy(p).trim_end().to_string()))
                .collect(),
        ),
        Value::Byte(bytes) if bytes.len() > INLINE_BYTES_MAX => Some(MetaValue::Binary(bytes.clone())),
        Value::Byte(bytes) => ints(bytes.iter().map(|&b| b as i64)),
        Value::Undefined(bytes, _) if bytes.len() > INLINE_BYTES_MAX => {
            Some(MetaValue::Binary(bytes.clone()))
        }
        Value::Undefined(..) => Some(MetaValue::Text(field.display_value().to_string())),
        Value::Short(v) => ints(v.iter().map(|&n| n as i64)),
        Value::Long(v) => ints(v.iter().map(|&n| n as i64)),
        Value::SByte(v) => ints(v.iter().map(|&n| n as i64)),
        Value::SShort(v) => ints(v.iter().map(|&n| n as i64)),
        Value::SLong(v) => ints(v.iter().map(|&n| n as i64)),
        // zero denominators become non-finite floats
        Value::Rational(v) => floats(v.iter().map(|r| r.num as f64 / r.denom as f64)),
        Value::SRational(v) => floats(v.iter().map(|r| r.num as f64 / r.denom as f64)),
        Value::Float(v) => floats(v.iter().map(|&f| f as f64)),
        Value::Double(v) => floats(v.iter().copied()),
        _ => None,
    }
}

fn ints(values: impl Iterator<Item = i64>) -> Option<MetaValue> {
    MetaValue::from_many(values.map(MetaValue::Integer).collect())
}

fn floats(values: impl Iterator<Item = f64>) -> Option<MetaValue> {
    MetaValue::from_many(values.map(MetaValue::Float).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::fixtures::tiff_bytes;

    #[test]
    fn test_reads_make_from_tiff() {
        let block = read_tiff_block(&tiff_bytes(1, true)).unwrap();
        assert_eq!(block.fields.get("EXIF:Make"), Some(&MetaValue::text("Acme")));
        assert_eq!(block.fields.get("EXIF:ImageWidth"), Some(&MetaValue::Integer(16)));
    }

    #[test]
    fn test_container_reader_accepts_tiff() {
        let block = read_container(&tiff_bytes(2, false)).unwrap();
        assert!(block.fields.contains_key("EXIF:Make"));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(read_tiff_block(b"definitely not tiff").is_err());
    }
}
