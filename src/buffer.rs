//! Bounds-checked little-endian cursors over a node block.
//!
//! Interval codecs only ever see these two types, so a record that
//! overruns its slot is reported as corruption instead of panicking.

use crate::error::{Error, Result};

pub struct BlockWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BlockWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&mut [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::Corrupt {
                offset: self.pos as u64,
                context: "write past end of block",
            })?;
        let slice = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.take(1)?[0] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.take(2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.take(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<()> {
        self.take(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<()> {
        self.take(8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.take(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Zero-fills `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len)?.fill(0);
        Ok(())
    }
}

pub struct BlockReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::Corrupt {
                offset: self.pos as u64,
                context: "read past end of block",
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
