//! Child bookkeeping for core nodes.
//!
//! Each slot records the child's sequence number, the start it had when it
//! was linked and its end time. The end stays at [`OPEN_END`] until the child
//! closes and back-patches it, so sibling ranges can overlap and lookups are
//! a linear scan rather than a search over disjoint ranges.

use crate::buffer::{BlockReader, BlockWriter};
use crate::condition::TimeRangeCondition;
use crate::error::{Error, Result};
use crate::node::OPEN_END;

/// Bytes per child slot: seq (i32) + start (i64) + end (i64).
pub const CHILD_SLOT_SIZE: usize = 4 + 8 + 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildLink {
    pub seq: u32,
    pub start: i64,
    pub end: i64,
}

impl ChildLink {
    pub fn is_open(&self) -> bool {
        self.end == OPEN_END
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CoreData {
    children: Vec<ChildLink>,
}

impl CoreData {
    pub(crate) fn new(max_children: usize) -> Self {
        Self {
            children: Vec::with_capacity(max_children),
        }
    }

    pub(crate) fn header_size(max_children: usize) -> usize {
        CHILD_SLOT_SIZE * max_children
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn children(&self) -> &[ChildLink] {
        &self.children
    }

    pub(crate) fn latest(&self) -> Option<&ChildLink> {
        self.children.last()
    }

    /// Appends a slot and returns its index.
    pub(crate) fn push(&mut self, link: ChildLink) -> usize {
        self.children.push(link);
        self.children.len() - 1
    }

    pub(crate) fn set_end(&mut self, index: usize, end: i64) {
        if let Some(link) = self.children.get_mut(index) {
            link.end = end;
        }
    }

    pub(crate) fn select_next_indices<'a>(
        &'a self,
        condition: &'a TimeRangeCondition,
    ) -> impl Iterator<Item = usize> + 'a {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, link)| condition.intersects(link.start, link.end))
            .map(|(index, _)| index)
    }

    pub(crate) fn encode(&self, writer: &mut BlockWriter<'_>, max_children: usize) -> Result<()> {
        for link in &self.children {
            writer.put_i32(link.seq as i32)?;
            writer.put_i64(link.start)?;
            writer.put_i64(link.end)?;
        }
        let unused = max_children.saturating_sub(self.children.len());
        writer.skip(unused * CHILD_SLOT_SIZE)
    }

    pub(crate) fn decode(
        reader: &mut BlockReader<'_>,
        count: usize,
        max_children: usize,
    ) -> Result<Self> {
        if count > max_children {
            return Err(Error::Corrupt {
                offset: reader.position() as u64,
                context: "child count exceeds max children",
            });
        }
        let mut children = Vec::with_capacity(max_children);
        for _ in 0..count {
            let seq = reader.get_i32()?;
            if seq < 0 {
                return Err(Error::Corrupt {
                    offset: reader.position() as u64,
                    context: "negative child sequence number",
                });
            }
            let start = reader.get_i64()?;
            let end = reader.get_i64()?;
            children.push(ChildLink {
                seq: seq as u32,
                start,
                end,
            });
        }
        reader.skip((max_children - count) * CHILD_SLOT_SIZE)?;
        Ok(Self { children })
    }
}
