//! Byte-level builders for PSD, TIFF and JPEG test inputs

#[derive(Debug, Clone, Copy)]
pub(crate) enum FixtureLayer {
    Plain(&'static str),
    /// Folder record (`lsct` type 1), closes a group
    Group(&'static str),
    /// Bounding divider (`lsct` type 3), opens a group
    GroupEnd,
}

struct Writer {
    buf: Vec<u8>,
    big_endian: bool,
}

impl Writer {
    fn new(big_endian: bool) -> Self {
        Self {
            buf: Vec::new(),
            big_endian,
        }
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        if self.big_endian {
            self.bytes(&v.to_be_bytes())
        } else {
            self.bytes(&v.to_le_bytes())
        }
    }

    fn u32(&mut self, v: u32) {
        if self.big_endian {
            self.bytes(&v.to_be_bytes())
        } else {
            self.bytes(&v.to_le_bytes())
        }
    }

    fn u64(&mut self, v: u64) {
        if self.big_endian {
            self.bytes(&v.to_be_bytes())
        } else {
            self.bytes(&v.to_le_bytes())
        }
    }

    fn len_field(&mut self, v: u64, wide: bool) {
        if wide {
            self.u64(v)
        } else {
            self.u32(v as u32)
        }
    }
}

fn pascal_name(w: &mut Writer, name: &str) {
    let bytes = name.as_bytes();
    w.u8(bytes.len() as u8);
    w.bytes(bytes);
    let total = bytes.len() + 1;
    let padded = (total + 3) & !3;
    w.bytes(&vec![0u8; padded - total]);
}

fn layer_record(layer: FixtureLayer, psb: bool) -> Vec<u8> {
    let mut w = Writer::new(true);
    w.bytes(&[0u8; 16]);
    w.u16(1);
    w.u16(0); // channel id
    w.len_field(2, psb);
    w.bytes(b"8BIM");
    w.bytes(b"norm");
    w.bytes(&[255, 0, 0, 0]);

    let mut extra = Writer::new(true);
    extra.u32(0); // mask
    extra.u32(0); // blending ranges
    let (name, section) = match layer {
        FixtureLayer::Plain(name) => (name, None),
        FixtureLayer::Group(name) => (name, Some(1u32)),
        FixtureLayer::GroupEnd => ("</Layer group>", Some(3u32)),
    };
    pascal_name(&mut extra, name);
    if let Some(kind) = section {
        extra.bytes(b"8BIM");
        extra.bytes(b"lsct");
        extra.u32(4);
        extra.u32(kind);
    }

    w.u32(extra.buf.len() as u32);
    w.bytes(&extra.buf);
    w.buf
}

/// Image resource block (`8BIM` + id + empty name + sized payload)
pub(crate) fn image_resource(id: u16, data: &[u8]) -> Vec<u8> {
    let mut w = Writer::new(true);
    w.bytes(b"8BIM");
    w.u16(id);
    w.bytes(&[0, 0]);
    w.u32(data.len() as u32);
    w.bytes(data);
    if data.len() % 2 == 1 {
        w.u8(0);
    }
    w.buf
}

pub(crate) fn psd_bytes(layers: &[FixtureLayer], psb: bool) -> Vec<u8> {
    psd_bytes_with_resources(layers, psb, &[])
}

pub(crate) fn psd_bytes_with_resources(
    layers: &[FixtureLayer],
    psb: bool,
    resources: &[Vec<u8>],
) -> Vec<u8> {
    let mut w = Writer::new(true);
    w.bytes(b"8BPS");
    w.u16(if psb { 2 } else { 1 });
    w.bytes(&[0u8; 6]);
    w.u16(3);
    w.u32(32);
    w.u32(64);
    w.u16(8);
    w.u16(3);

    w.u32(0); // color mode data

    let resource_bytes: Vec<u8> = resources.iter().flatten().copied().collect();
    w.u32(resource_bytes.len() as u32);
    w.bytes(&resource_bytes);

    if layers.is_empty() {
        w.len_field(0, psb);
    } else {
        let mut info = Writer::new(true);
        info.u16(layers.len() as u16);
        for layer in layers {
            info.bytes(&layer_record(*layer, psb));
        }
        for _ in layers {
            info.u16(0); // raw channel data, compression only
        }
        if info.buf.len() % 2 == 1 {
            info.u8(0);
        }

        let len_width = if psb { 8 } else { 4 };
        let section_len = len_width + info.buf.len() + 4;
        w.len_field(section_len as u64, psb);
        w.len_field(info.buf.len() as u64, psb);
        w.bytes(&info.buf);
        w.u32(0); // global layer mask
    }

    w.u16(0); // composite compression
    w.bytes(&[0u8; 16]);
    w.buf
}

/// TIFF with `pages` IFDs; the first IFD carries a Make tag
pub(crate) fn tiff_bytes(pages: usize, big_endian: bool) -> Vec<u8> {
    let mut w = Writer::new(big_endian);
    w.bytes(if big_endian { b"MM" } else { b"II" });
    w.u16(42);
    w.u32(if pages == 0 { 0 } else { 8 });

    let make = b"Acme\0";
    let ifd_len = |entries: usize| 2 + entries * 12 + 4;
    let mut offsets = Vec::with_capacity(pages);
    let mut cursor = 8usize;
    for page in 0..pages {
        offsets.push(cursor);
        cursor += ifd_len(if page == 0 { 3 } else { 2 });
    }
    let make_offset = cursor;

    for page in 0..pages {
        let entries = if page == 0 { 3 } else { 2 };
        w.u16(entries);
        for tag in [256u16, 257u16] {
            w.u16(tag);
            w.u16(3); // SHORT
            w.u32(1);
            w.u16(16);
            w.u16(0);
        }
        if page == 0 {
            w.u16(271);
            w.u16(2); // ASCII
            w.u32(make.len() as u32);
            w.u32(make_offset as u32);
        }
        let next = offsets.get(page + 1).copied().unwrap_or(0);
        w.u32(next as u32);
    }
    w.bytes(make);
    w.buf
}

/// TIFF whose only IFD points back at itself
pub(crate) fn tiff_loop_bytes() -> Vec<u8> {
    let mut w = Writer::new(false);
    w.bytes(b"II");
    w.u16(42);
    w.u32(8);
    w.u16(0);
    w.u32(8);
    w.buf
}

pub(crate) fn bigtiff_bytes() -> Vec<u8> {
    let mut w = Writer::new(false);
    w.bytes(b"II");
    w.u16(43);
    w.u16(8);
    w.u16(0);
    w.u64(16);
    w.bytes(&[0u8; 16]);
    w.buf
}

fn jpeg_segment(w: &mut Writer, marker: u8, payload: &[u8]) {
    w.u8(0xFF);
    w.u8(marker);
    w.u16((payload.len() + 2) as u16);
    w.bytes(payload);
}

/// IPTC-IIM dataset in record 2
pub(crate) fn iim_dataset(dataset: u8, value: &[u8]) -> Vec<u8> {
    let mut w = Writer::new(true);
    w.u8(0x1C);
    w.u8(2);
    w.u8(dataset);
    w.u16(value.len() as u16);
    w.bytes(value);
    w.buf
}

/// Minimal ICC v2 profile with a `desc` tag
pub(crate) fn icc_profile(description: &str) -> Vec<u8> {
    let mut desc = Writer::new(true);
    desc.bytes(b"desc");
    desc.u32(0);
    desc.u32(description.len() as u32 + 1);
    desc.bytes(description.as_bytes());
    desc.u8(0);

    let tag_offset = 128 + 4 + 12;
    let total = tag_offset + desc.buf.len();

    let mut w = Writer::new(true);
    w.u32(total as u32);
    w.bytes(b"lcms");
    w.bytes(&[2, 0x10, 0, 0]);
    w.bytes(b"mntr");
    w.bytes(b"RGB ");
    w.bytes(b"XYZ ");
    w.bytes(&[0u8; 12]); // date
    w.bytes(b"acsp");
    w.bytes(&[0u8; 128 - 40]);
    w.u32(1);
    w.bytes(b"desc");
    w.u32(tag_offset as u32);
    w.u32(desc.buf.len() as u32);
    w.bytes(&desc.buf);
    w.buf
}

/// JPEG carrying Exif (from a one-page TIFF), XMP, IPTC and ICC segments
pub(crate) fn jpeg_with_metadata(xmp: &str, iim: &[u8], icc: &[u8]) -> Vec<u8> {
    let mut w = Writer::new(true);
    w.u8(0xFF);
    w.u8(0xD8);

    let mut exif = b"Exif\0\0".to_vec();
    exif.extend_from_slice(&tiff_bytes(1, true));
    jpeg_segment(&mut w, 0xE1, &exif);

    let mut xmp_payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    xmp_payload.extend_from_slice(xmp.as_bytes());
    jpeg_segment(&mut w, 0xE1, &xmp_payload);

    let mut app13 = b"Photoshop 3.0\0".to_vec();
    app13.extend_from_slice(&image_resource(0x0404, iim));
    jpeg_segment(&mut w, 0xED, &app13);

    let mut app2 = b"ICC_PROFILE\0".to_vec();
    app2.extend_from_slice(&[1, 1]);
    app2.extend_from_slice(icc);
    jpeg_segment(&mut w, 0xE2, &app2);

    w.u8(0xFF);
    w.u8(0xD9);
    w.buf
}
