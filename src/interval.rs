//! Interval record contract and the stock `BasicInterval` codec.

use std::fmt;

use crate::buffer::{BlockReader, BlockWriter};
use crate::error::{Error, Result};

/// A record that can be stored in the history tree.
///
/// Intervals cover `[start, end)`, with `end` strictly below `i64::MAX`,
/// which marks an open node. A zero-length interval `[t, t)` stands for the
/// single point `t`: a stabbing query at `t` returns it, although `t < t`
/// never holds.
///
/// `size_on_disk` must equal the number of bytes `encode` writes, since node
/// free space is computed from it.
pub trait HtInterval: Clone + Send + Sync + 'static {
    fn start(&self) -> i64;

    fn end(&self) -> i64;

    fn size_on_disk(&self) -> usize;

    fn encode(&self, writer: &mut BlockWriter<'_>) -> Result<()>;

    fn decode(reader: &mut BlockReader<'_>) -> Result<Self>;

    /// Upper bound on `size_on_disk`, if the codec has one. Used to reject a
    /// block size that could never hold a record.
    fn max_size_on_disk() -> Option<usize> {
        None
    }
}

/// Bytes used by a `BasicInterval` before its payload.
pub const BASIC_INTERVAL_HEADER: usize = 8 + 8 + 4;

/// Interval with an opaque byte payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BasicInterval {
    start: i64,
    end: i64,
    payload: Vec<u8>,
}

impl BasicInterval {
    pub fn new(start: i64, end: i64, payload: impl Into<Vec<u8>>) -> Result<Self> {
        if end < start || end == i64::MAX {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            payload: payload.into(),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

impl HtInterval for BasicInterval {
    fn start(&self) -> i64 {
        self.start
    }

    fn end(&self) -> i64 {
        self.end
    }

    fn size_on_disk(&self) -> usize {
        BASIC_INTERVAL_HEADER + self.payload.len()
    }

    fn encode(&self, writer: &mut BlockWriter<'_>) -> Result<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| Error::IntervalTooLarge {
            size: self.payload.len(),
            capacity: u32::MAX as usize,
        })?;
        writer.put_i64(self.start)?;
        writer.put_i64(self.end)?;
        writer.put_u32(len)?;
        writer.put_bytes(&self.payload)
    }

    fn decode(reader: &mut BlockReader<'_>) -> Result<Self> {
        let start = reader.get_i64()?;
        let end = reader.get_i64()?;
        let len = reader.get_u32()? as usize;
        let payload = reader.get_bytes(len)?.to_vec();
        if end < start {
            return Err(Error::Corrupt {
                offset: reader.position() as u64,
                context: "interval end precedes start",
            });
        }
        Ok(Self {
            start,
            end,
            payload,
        })
    }
}

impl fmt::Debug for BasicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) ({} payload bytes)",
            self.start,
            self.end,
            self.payload.len()
        )
    }
}
