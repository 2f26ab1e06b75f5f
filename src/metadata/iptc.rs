//! IPTC-IIM datasets (Application Record)

use std::collections::BTreeMap;

use super::{MetaValue, MetadataError, RawMetadata};

const TAG_MARKER: u8 = 0x1C;
const APPLICATION_RECORD: u8 = 2;

fn dataset_name(dataset: u8) -> Option<&'static str> {
    Some(match dataset {
        5 => "ObjectName",
        15 => "Category",
        25 => "Keywords",
        40 => "SpecialInstructions",
        55 => "DateCreated",
        60 => "TimeCreated",
        80 => "By-line",
        85 => "By-lineTitle",
        90 => "City",
        92 => "Sub-location",
        95 => "Province-State",
        101 => "Country-PrimaryLocationName",
        103 => "OriginalTransmissionReference",
        105 => "Headline",
        110 => "Credit",
        115 => "Source",
        116 => "CopyrightNotice",
        120 => "Caption-Abstract",
        122 => "Writer-Editor",
        _ => return None,
    })
}

/// Parse an IIM block into `IPTC:<Dataset>` keys; repeated datasets become lists
pub(crate) fn parse(block: &[u8]) -> Result<RawMetadata, MetadataError> {
    let mut grouped: BTreeMap<String, Vec<MetaValue>> = BTreeMap::new();
    let mut pos = 0usize;

    while pos < block.len() {
        if block[pos] != TAG_MARKER {
            // trailing padding is common
            if block[pos..].iter().all(|&b| b == 0) {
                break;
            }
            return Err(MetadataError::Malformed(format!(
                "IIM marker expected at offset {}",
                pos
            )));
        }

        let header = block
            .get(pos + 1..pos + 5)
            .ok_or_else(|| MetadataError::Malformed("truncated IIM header".to_string()))?;
        let record = header[0];
        let dataset = header[1];
        let short_len = u16::from_be_bytes([header[2], header[3]]);
        pos += 5;

        // extended dataset: low 15 bits give the width of the length field
        let len = if short_len & 0x8000 != 0 {
            let width = (short_len & 0x7FFF) as usize;
            let bytes = block
                .get(pos..pos + width)
                .filter(|b| b.len() <= 8)
                .ok_or_else(|| MetadataError::Malformed("bad extended IIM length".to_string()))?;
            pos += width;
            bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
        } else {
            short_len as usize
        };

        let value = block
            .get(pos..pos.saturating_add(len))
            .ok_or_else(|| MetadataError::Malformed("IIM dataset runs past block".to_string()))?;
        pos += len;

        if record != APPLICATION_RECORD || dataset == 0 {
            continue;
        }

        let key = match dataset_name(dataset) {
            Some(name) => format!("IPTC:{}", name),
            None => format!("IPTC:Dataset{}", dataset),
        };
        let text = String::from_utf8_lossy(value).trim_end_matches('\0').to_string();
        grouped.entry(key).or_default().push(MetaValue::Text(text));
    }

    Ok(grouped
        .into_iter()
        .filter_map(|(key, values)| MetaValue::from_many(values).map(|v| (key, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::fixtures::iim_dataset;

    #[test]
    fn test_named_datasets() {
        let mut block = iim_dataset(5, b"Harbour survey");
        block.extend(iim_dataset(116, b"(c) City Archive"));
        let meta = parse(&block).unwrap();
        assert_eq!(meta.get("IPTC:ObjectName"), Some(&MetaValue::text("Harbour survey")));
        assert_eq!(
            meta.get("IPTC:CopyrightNotice"),
            Some(&MetaValue::text("(c) City Archive"))
        );
    }

    #[test]
    fn test_repeated_keywords_become_list() {
        let mut block = iim_dataset(25, b"maps");
        block.extend(iim_dataset(25, b"ports"));
        let meta = parse(&block).unwrap();
        assert_eq!(
            meta.get("IPTC:Keywords"),
            Some(&MetaValue::List(vec![MetaValue::text("maps"), MetaValue::text("ports")]))
        );
    }

    #[test]
    fn test_envelope_record_skipped_and_padding_ok() {
        let mut block = vec![0x1C, 1, 90, 0, 3, 0x1B, 0x25, 0x47];
        block.extend(iim_dataset(90, b"Porto"));
        block.extend([0, 0, 0]);
        let meta = parse(&block).unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("IPTC:City"), Some(&MetaValue::text("Porto")));
    }

    #[test]
    fn test_truncated_dataset_is_error() {
        let mut block = iim_dataset(120, b"a long caption");
        block.truncate(10);
        assert!(parse(&block).is_err());
    }
}
