use byteorder::{ByteOrder, LittleEndian};

use super::LoadError;

/// Bounds-checked little-endian cursor over a module image.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(LoadError::Truncated { what, offset: self.pos })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, LoadError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, LoadError> {
        Ok(LittleEndian::read_u16(self.take(2, what)?))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, LoadError> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32, LoadError> {
        Ok(LittleEndian::read_i32(self.take(4, what)?))
    }

    pub fn tag(&mut self, what: &'static str) -> Result<[u8; 4], LoadError> {
        let raw = self.take(4, what)?;
        Ok([raw[0], raw[1], raw[2], raw[3]])
    }
}

/// Read a `u32` at an absolute offset without a cursor.
pub(crate) fn u32_at(bytes: &[u8], offset: usize, what: &'static str) -> Result<u32, LoadError> {
    ByteReader::new(bytes, offset).u32(what)
}
