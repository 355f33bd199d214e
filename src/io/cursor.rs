use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Error, Result};

/// Bounds-checked little-endian reader over a byte slice.
///
/// Every read validates and advances in one step; running off the end of
/// the slice yields [`Error::TruncatedHeader`] naming the structure being
/// decoded rather than an opaque EOF.
pub struct ByteCursor<'a> {
    inner: Cursor<&'a [u8]>,
    what: &'static str,
}

impl<'a> ByteCursor<'a> {
    /// Position a cursor at `offset` within `data`.
    pub fn at(data: &'a [u8], offset: usize, what: &'static str) -> Result<Self> {
        if offset > data.len() {
            return Err(Error::TruncatedHeader {
                what,
                offset,
                needed: 0,
                available: 0,
            });
        }
        let mut inner = Cursor::new(data);
        inner.set_position(offset as u64);
        Ok(Self { inner, what })
    }

    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            inner: Cursor::new(data),
            what,
        }
    }

    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.position())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if needed > available {
            return Err(Error::TruncatedHeader {
                what: self.what,
                offset: self.position(),
                needed,
                available,
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.inner.set_position((self.position() + n) as u64);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.inner.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `count` consecutive u32 values.
    pub fn read_u32_table(&mut self, count: usize) -> Result<Vec<u32>> {
        self.ensure(count.saturating_mul(4))?;
        let mut table = vec![0u32; count];
        self.inner.read_u32_into::<LittleEndian>(&mut table)?;
        Ok(table)
    }

    /// Bytes from the current position up to the first all-zero unit of
    /// `unit` bytes (1 for narrow strings, 2 for UTF-16). The terminator is
    /// consumed; a missing terminator takes the rest of the buffer.
    pub fn read_until_nul(&mut self, unit: usize) -> &'a [u8] {
        let data: &'a [u8] = *self.inner.get_ref();
        let start = self.position().min(data.len());
        let rest = &data[start..];
        let len = rest
            .chunks_exact(unit)
            .position(|c| c.iter().all(|&b| b == 0))
            .map(|units| units * unit)
            .unwrap_or(rest.len() - rest.len() % unit);
        let consumed = (len + unit).min(rest.len());
        self.inner.set_position((start + consumed) as u64);
        &rest[..len]
    }
}
