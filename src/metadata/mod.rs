//! Metadata Extractor
//!
//! Best-effort extraction of embedded descriptive metadata:
//! - Exif (kamadak-exif) from JPEG APP1, TIFF IFDs, PSD resource 0x0422
//! - XMP packets (quick-xml)
//! - IPTC-IIM from Photoshop resource blocks and TIFF tag 33723
//! - ICC profile header and text tags
//! - Image dimensions from the container header
//!
//! Every source is parsed independently. A failure in one source is logged
//! and skipped; nothing here ever fails the pipeline.

mod containers;
mod exif;
mod icc;
mod iptc;
mod value;
mod xmp;

pub use value::{MetaValue, RawMetadata};

use std::io::{Cursor, Read};

use crate::config::MetadataConfig;
use crate::inspect::psd;
use crate::source::SubmissionFile;

use containers::resource_id;

#[derive(Debug, thiserror::Error)]
pub(crate) enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Exif error: {0}")]
    Exif(#[from] ::exif::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed metadata: {0}")]
    Malformed(String),
}

/// Embedded blocks found while walking a container
#[derive(Default)]
struct Blocks<'a> {
    exif: Option<&'a [u8]>,
    xmp: Option<&'a [u8]>,
    iptc: Option<&'a [u8]>,
    icc: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    scan_limit: u64,
}

impl MetadataExtractor {
    pub fn new(scan_limit: u64) -> Self {
        Self { scan_limit }
    }

    pub fn from_config(config: &MetadataConfig) -> Self {
        Self::new(config.scan_limit)
    }

    /// Extract from the leading `scan_limit` bytes of the file
    pub fn extract(&self, file: &SubmissionFile) -> RawMetadata {
        let mut bytes = Vec::new();
        let read = file
            .open()
            .and_then(|reader| reader.take(self.scan_limit).read_to_end(&mut bytes));

        if let Err(e) = read {
            tracing::warn!(file_name = %file.name(), error = %e, "Could not read file for metadata");
            return RawMetadata::new();
        }

        let metadata = self.extract_bytes(&bytes);
        tracing::debug!(
            file_name = %file.name(),
            keys = metadata.len(),
            "Extracted embedded metadata"
        );
        metadata
    }

    /// Extract from an in-memory prefix of a file
    pub fn extract_bytes(&self, bytes: &[u8]) -> RawMetadata {
        let mut out = RawMetadata::new();

        let mut blocks = Blocks::default();
        let mut exif_block = None;

        if containers::is_jpeg(bytes) {
            let segments = containers::jpeg_segments(bytes);
            for &(marker, payload) in &segments {
                match marker {
                    0xE1 if payload.starts_with(containers::EXIF_APP1_PREFIX) => {
                        blocks.exif.get_or_insert(&payload[containers::EXIF_APP1_PREFIX.len()..]);
                    }
                    0xE1 if payload.starts_with(containers::XMP_APP1_PREFIX) => {
                        blocks.xmp.get_or_insert(&payload[containers::XMP_APP1_PREFIX.len()..]);
                    }
                    0xED if payload.starts_with(containers::PHOTOSHOP_APP13_PREFIX) => {
                        let resources = &payload[containers::PHOTOSHOP_APP13_PREFIX.len()..];
                        for (id, data) in containers::image_resources(resources) {
                            if id == resource_id::IPTC_NAA {
                                blocks.iptc.get_or_insert(data);
                            }
                        }
                    }
                    _ => {}
                }
            }
            blocks.icc = containers::jpeg_icc_profile(&segments);
        } else if containers::is_psd(bytes) {
            if let Some(section) = containers::psd_resource_section(bytes) {
                for (id, data) in containers::image_resources(section) {
                    match id {
                        resource_id::EXIF_DATA_1 => {
                            blocks.exif.get_or_insert(data);
                        }
                        resource_id::XMP => {
                            blocks.xmp.get_or_insert(data);
                        }
                        resource_id::IPTC_NAA => {
                            blocks.iptc.get_or_insert(data);
                        }
                        resource_id::ICC_PROFILE => {
                            blocks.icc.get_or_insert_with(|| data.to_vec());
                        }
                        _ => {}
                    }
                }
            }
            psd_header_fields(bytes, &mut out);
        } else {
            // TIFF, PNG, WebP, HEIF: let kamadak-exif find the block
            exif_block = keep("Exif", exif::read_container(bytes));
        }

        if let Some(data) = blocks.exif {
            exif_block = keep("Exif", exif::read_tiff_block(data));
        }

        let mut embedded_xmp = None;
        let mut embedded_iptc = None;
        if let Some(block) = exif_block {
            out.extend(block.fields);
            embedded_xmp = block.xmp;
            embedded_iptc = block.iptc;
            if blocks.icc.is_none() {
                blocks.icc = block.icc;
            }
        }

        let xmp_packet = blocks
            .xmp
            .or(embedded_xmp.as_deref())
            .or_else(|| containers::find_xmp_packet(bytes));
        if let Some(packet) = xmp_packet {
            if let Some(fields) = keep("XMP", xmp::parse(packet)) {
                out.extend(fields);
            }
        }

        if let Some(iim) = blocks.iptc.or(embedded_iptc.as_deref()) {
            if let Some(fields) = keep("IPTC", iptc::parse(iim)) {
                out.extend(fields);
            }
        }

        if let Some(profile) = blocks.icc.as_deref() {
            if let Some(fields) = keep("ICC", icc::parse(profile)) {
                out.extend(fields);
            }
        }

        if !containers::is_psd(bytes) {
            image_dimensions(bytes, &mut out);
        }

        out
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_METADATA_SCAN_LIMIT)
    }
}

fn keep<T>(source: &'static str, result: Result<T, MetadataError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(source, error = %e, "Metadata source skipped");
            None
        }
    }
}

fn psd_header_fields(bytes: &[u8], out: &mut RawMetadata) {
    let Some(header) = keep(
        "PSD header",
        psd::read_header(Cursor::new(bytes)).map_err(|e| MetadataError::Malformed(e.to_string())),
    ) else {
        return;
    };

    let format = if header.is_psb() { "PSB" } else { "PSD" };
    out.insert("File:Format".to_string(), MetaValue::text(format));
    out.insert("File:ImageWidth".to_string(), MetaValue::Integer(header.width as i64));
    out.insert("File:ImageHeight".to_string(), MetaValue::Integer(header.height as i64));
    out.insert("File:BitDepth".to_string(), MetaValue::Integer(header.depth as i64));
    out.insert(
        "File:ColorMode".to_string(),
        MetaValue::text(header.color_mode_name()),
    );
}

/// Header-only dimension probe through the image crate
fn image_dimensions(bytes: &[u8], out: &mut RawMetadata) {
    let Ok(reader) = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format() else {
        return;
    };
    let Some(format) = reader.format() else {
        return;
    };

    out.insert(
        "File:Format".to_string(),
        MetaValue::text(format!("{:?}", format).to_uppercase()),
    );
    out.insert(
        "File:MIMEType".to_string(),
        MetaValue::text(format.to_mime_type()),
    );

    match reader.into_dimensions() {
        Ok((width, height)) => {
            out.insert("File:ImageWidth".to_string(), MetaValue::Integer(width as i64));
            out.insert("File:ImageHeight".to_string(), MetaValue::Integer(height as i64));
        }
        Err(e) => {
            tracing::debug!(error = %e, "Image dimensions unavailable");
        }
    }
}
