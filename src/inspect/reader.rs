//! Bounded binary reader shared by the container parsers
//!
//! Every read and skip is checked against the stream length up front so a
//! corrupt length field fails fast instead of seeking into nowhere.

use std::io::{Read, Seek, SeekFrom};

use super::InspectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Big,
    Little,
}

pub(crate) struct BinaryReader<R> {
    inner: R,
    order: ByteOrder,
    pos: u64,
    len: u64,
}

impl<R: Read + Seek> BinaryReader<R> {
    pub(crate) fn new(mut inner: R, order: ByteOrder) -> Result<Self, InspectError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            order,
            pos: 0,
            len,
        })
    }

    pub(crate) fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    fn ensure(&self, offset: u64, count: u64) -> Result<(), InspectError> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(InspectError::Truncated {
                offset,
                len: self.len,
            }),
        }
    }

    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<(), InspectError> {
        self.ensure(offset, 0)?;
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    pub(crate) fn skip(&mut self, count: u64) -> Result<(), InspectError> {
        let target = self
            .pos
            .checked_add(count)
            .ok_or(InspectError::Truncated {
                offset: self.pos,
                len: self.len,
            })?;
        self.seek_to(target)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], InspectError> {
        self.ensure(self.pos, N as u64)?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        self.pos += N as u64;
        Ok(buf)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InspectError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, InspectError> {
        let b = self.read_array::<2>()?;
        Ok(match self.order {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        })
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16, InspectError> {
        Ok(self.read_u16()? as i16)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, InspectError> {
        let b = self.read_array::<4>()?;
        Ok(match self.order {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        })
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, InspectError> {
        let b = self.read_array::<8>()?;
        Ok(match self.order {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_respect_byte_order() {
        let data = vec![0x01, 0x02, 0x03, 0x04];
        let mut be = BinaryReader::new(Cursor::new(data.clone()), ByteOrder::Big).unwrap();
        assert_eq!(be.read_u32().unwrap(), 0x0102_0304);

        let mut le = BinaryReader::new(Cursor::new(data), ByteOrder::Little).unwrap();
        assert_eq!(le.read_u16().unwrap(), 0x0201);
        assert_eq!(le.position(), 2);
    }

    #[test]
    fn test_skip_past_end_is_truncated() {
        let mut r = BinaryReader::new(Cursor::new(vec![0u8; 8]), ByteOrder::Big).unwrap();
        r.skip(4).unwrap();
        assert!(matches!(r.skip(5), Err(InspectError::Truncated { .. })));
        assert!(matches!(r.skip(u64::MAX), Err(InspectError::Truncated { .. })));
        assert!(r.read_u64().is_err());
    }
}
