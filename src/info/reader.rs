use crate::{Result, error::malformed_binary_error};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

/// A seekable byte source whose every access is bounded by the file length.
pub(crate) struct Stream<R> {
    inner: R,
    len: u64,
    endian: Endian,
}

impl<R: Read + Seek> Stream<R> {
    pub(crate) fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Stream {
            inner,
            len,
            endian: Endian::Little,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub(crate) fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Fails unless `size` bytes starting at `offset` lie inside the file.
    pub(crate) fn check_range(&self, offset: u64, size: u64, what: &str) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(malformed_binary_error(format!(
                "{what} at {offset:#x} (+{size:#x}) is outside the file"
            ))),
        }
    }

    pub(crate) fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(malformed_binary_error(format!(
                "offset {offset:#x} is past the end of the file"
            )));
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads up to `max` bytes from the start of the file. Shorter files give a shorter prefix.
    pub(crate) fn prefix(&mut self, max: usize) -> Result<Vec<u8>> {
        let take = self.len.min(max as u64) as usize;
        self.seek(0)?;
        let mut buf = vec![0; take];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    #[inline]
    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(match self.endian {
            Endian::Little => self.inner.read_u16::<LittleEndian>()?,
            Endian::Big => self.inner.read_u16::<BigEndian>()?,
        })
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(match self.endian {
            Endian::Little => self.inner.read_u32::<LittleEndian>()?,
            Endian::Big => self.inner.read_u32::<BigEndian>()?,
        })
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(match self.endian {
            Endian::Little => self.inner.read_u64::<LittleEndian>()?,
            Endian::Big => self.inner.read_u64::<BigEndian>()?,
        })
    }

    /// An address-sized field: 8 bytes in 64-bit images, 4 bytes otherwise.
    #[inline]
    pub(crate) fn word(&mut self, wide: bool) -> Result<u64> {
        if wide {
            self.u64()
        } else {
            self.u32().map(u64::from)
        }
    }

    /// Reads the nul-terminated string at `offset`. The terminator must appear before `end`.
    pub(crate) fn c_string_at(&mut self, offset: u64, end: u64) -> Result<String> {
        let end = end.min(self.len);
        if offset >= end {
            return Err(malformed_binary_error(format!(
                "string offset {offset:#x} is outside its table"
            )));
        }
        self.seek(offset)?;
        let mut buf = Vec::new();
        for _ in offset..end {
            match self.u8()? {
                0 => return Ok(String::from_utf8_lossy(&buf).into_owned()),
                byte => buf.push(byte),
            }
        }
        Err(malformed_binary_error(format!(
            "string at {offset:#x} is not terminated"
        )))
    }
}
