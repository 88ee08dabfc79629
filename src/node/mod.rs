//! Fixed-size tree nodes.
//!
//! A node is one `block_size` block on disk:
//!
//! ```text
//! [common header: 36 bytes]
//!   type u8 | flags u8 | reserved u16 | seq i32 | parent i32
//!   start i64 | end i64 | count u32 | crc u32
//! [core only: max_children x (seq i32, start i64, end i64)]
//! [leaf only: interval records, front to back]
//! [zero padding up to block_size]
//! ```
//!
//! Nodes are open from creation until [`HtNode::close`], then immutable.

mod core_data;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::buffer::{BlockReader, BlockWriter};
use crate::condition::TimeRangeCondition;
use crate::error::{Error, Result};
use crate::interval::HtInterval;

pub use self::core_data::{ChildLink, CHILD_SLOT_SIZE};
use self::core_data::CoreData;

pub const COMMON_HEADER_SIZE: usize = 36;
/// End time reported by a node (or child link) that is still open.
pub const OPEN_END: i64 = i64::MAX;
/// Parent sequence number of the root node.
pub const NO_PARENT: i32 = -1;

const TYPE_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 1;
const SEQ_OFFSET: usize = 4;
const PARENT_OFFSET: usize = 8;
const START_OFFSET: usize = 12;
const END_OFFSET: usize = 20;
const COUNT_OFFSET: usize = 28;
const CRC_OFFSET: usize = 32;

const FLAG_CLOSED: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Leaf,
    Core,
}

impl NodeType {
    pub fn to_byte(self) -> u8 {
        match self {
            NodeType::Leaf => 1,
            NodeType::Core => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(NodeType::Leaf),
            2 => Some(NodeType::Core),
            _ => None,
        }
    }
}

/// Size of the headers of a node of this type, i.e. the bytes unavailable to
/// interval records.
pub fn header_size(node_type: NodeType, max_children: usize) -> usize {
    match node_type {
        NodeType::Leaf => COMMON_HEADER_SIZE,
        NodeType::Core => COMMON_HEADER_SIZE + CoreData::header_size(max_children),
    }
}

/// Common header shared by every node block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub closed: bool,
    pub seq: u32,
    pub parent: i32,
    pub start: i64,
    pub end: i64,
    /// Intervals held by a leaf, children linked by a core node.
    pub count: u32,
    pub crc: u32,
}

impl NodeHeader {
    pub fn to_bytes(&self) -> [u8; COMMON_HEADER_SIZE] {
        let mut buf = [0u8; COMMON_HEADER_SIZE];
        buf[TYPE_OFFSET] = self.node_type.to_byte();
        buf[FLAGS_OFFSET] = if self.closed { FLAG_CLOSED } else { 0 };
        buf[SEQ_OFFSET..SEQ_OFFSET + 4].copy_from_slice(&(self.seq as i32).to_le_bytes());
        buf[PARENT_OFFSET..PARENT_OFFSET + 4].copy_from_slice(&self.parent.to_le_bytes());
        buf[START_OFFSET..START_OFFSET + 8].copy_from_slice(&self.start.to_le_bytes());
        buf[END_OFFSET..END_OFFSET + 8].copy_from_slice(&self.end.to_le_bytes());
        buf[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&self.count.to_le_bytes());
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Parses the header at the start of `block`. `offset` is the block's
    /// position in the file and is only used for error reporting.
    pub fn from_bytes(block: &[u8], offset: u64) -> Result<Self> {
        if block.len() < COMMON_HEADER_SIZE {
            return Err(Error::Corrupt {
                offset,
                context: "block shorter than node header",
            });
        }
        let mut reader = BlockReader::new(&block[..COMMON_HEADER_SIZE]);
        let type_byte = reader.get_u8()?;
        let node_type = NodeType::from_byte(type_byte).ok_or(Error::Corrupt {
            offset,
            context: "unknown node type",
        })?;
        let flags = reader.get_u8()?;
        reader.skip(2)?;
        let seq = reader.get_i32()?;
        if seq < 0 {
            return Err(Error::Corrupt {
                offset,
                context: "negative node sequence number",
            });
        }
        Ok(Self {
            node_type,
            closed: flags & FLAG_CLOSED != 0,
            seq: seq as u32,
            parent: reader.get_i32()?,
            start: reader.get_i64()?,
            end: reader.get_i64()?,
            count: reader.get_u32()?,
            crc: reader.get_u32()?,
        })
    }
}

/// CRC32 of a node block with its checksum field treated as zero.
pub fn block_crc(block: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&block[..CRC_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&block[CRC_OFFSET + 4..]);
    hasher.finalize()
}

type CloseListener = Box<dyn FnOnce(i64) + Send + Sync>;

struct LeafData<E> {
    /// Sorted by `(end, start)`.
    intervals: Vec<E>,
    content_size: usize,
}

enum NodeData<E> {
    Leaf(LeafData<E>),
    Core(CoreData),
}

struct NodeState<E> {
    parent: i32,
    end: i64,
    closed: bool,
    data: NodeData<E>,
    listener: Option<CloseListener>,
}

pub struct HtNode<E> {
    seq: u32,
    start: i64,
    block_size: usize,
    max_children: usize,
    state: RwLock<NodeState<E>>,
}

impl<E: HtInterval> HtNode<E> {
    pub fn new(
        node_type: NodeType,
        block_size: usize,
        max_children: usize,
        seq: u32,
        parent: i32,
        start: i64,
    ) -> Self {
        let data = match node_type {
            NodeType::Leaf => NodeData::Leaf(LeafData {
                intervals: Vec::new(),
                content_size: 0,
            }),
            NodeType::Core => NodeData::Core(CoreData::new(max_children)),
        };
        Self {
            seq,
            start,
            block_size,
            max_children,
            state: RwLock::new(NodeState {
                parent,
                end: OPEN_END,
                closed: false,
                data,
                listener: None,
            }),
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn node_type(&self) -> NodeType {
        match self.state.read().data {
            NodeData::Leaf(_) => NodeType::Leaf,
            NodeData::Core(_) => NodeType::Core,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    /// The node end, or [`OPEN_END`] while the node is open.
    pub fn end(&self) -> i64 {
        self.state.read().end
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    pub fn parent(&self) -> i32 {
        self.state.read().parent
    }

    /// Re-parents the node. Parent pointers are bookkeeping, so this is
    /// allowed on closed nodes too; callers must rewrite the block.
    pub fn set_parent(&self, parent: i32) {
        self.state.write().parent = parent;
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub fn header_size(&self) -> usize {
        header_size(self.node_type(), self.max_children)
    }

    pub fn free_space(&self) -> usize {
        let state = self.state.read();
        self.free_space_locked(&state)
    }

    fn free_space_locked(&self, state: &NodeState<E>) -> usize {
        match &state.data {
            NodeData::Leaf(leaf) => self
                .block_size
                .saturating_sub(COMMON_HEADER_SIZE + leaf.content_size),
            NodeData::Core(_) => self
                .block_size
                .saturating_sub(header_size(NodeType::Core, self.max_children)),
        }
    }

    /// Percentage of the record area in use.
    pub fn usage_percent(&self) -> u64 {
        let state = self.state.read();
        match &state.data {
            NodeData::Leaf(leaf) => {
                let area = self.block_size.saturating_sub(COMMON_HEADER_SIZE);
                if area == 0 {
                    return 100;
                }
                (leaf.content_size as u64 * 100) / area as u64
            }
            NodeData::Core(core) => {
                if self.max_children == 0 {
                    return 100;
                }
                (core.len() as u64 * 100) / self.max_children as u64
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.state.read().data {
            NodeData::Leaf(leaf) => leaf.intervals.is_empty(),
            NodeData::Core(core) => core.len() == 0,
        }
    }

    /// Adds an interval to an open leaf.
    pub fn add(&self, interval: E) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::NodeClosed { seq: self.seq });
        }
        let free = self.free_space_locked(&state);
        let leaf = match &mut state.data {
            NodeData::Leaf(leaf) => leaf,
            NodeData::Core(_) => return Err(Error::NotALeafNode { seq: self.seq }),
        };
        if interval.start() < self.start {
            return Err(Error::IntervalOutsideNode {
                seq: self.seq,
                start: interval.start(),
                node_start: self.start,
            });
        }
        let size = interval.size_on_disk();
        if size > free {
            return Err(Error::NodeFull {
                seq: self.seq,
                free,
                needed: size,
            });
        }
        let key = (interval.end(), interval.start());
        let at = leaf
            .intervals
            .partition_point(|i| (i.end(), i.start()) <= key);
        leaf.intervals.insert(at, interval);
        leaf.content_size += size;
        Ok(())
    }

    /// Closes the node at `end`, firing its close listener.
    pub fn close(&self, end: i64) -> Result<()> {
        let listener = {
            let mut state = self.state.write();
            if state.closed {
                return Err(Error::NodeAlreadyClosed { seq: self.seq });
            }
            let min = match &state.data {
                NodeData::Leaf(leaf) => leaf
                    .intervals
                    .iter()
                    .map(|i| i.end())
                    .max()
                    .map_or(self.start, |e| e.max(self.start)),
                NodeData::Core(_) => self.start,
            };
            if end < min || end == OPEN_END {
                return Err(Error::InvalidEndTime {
                    seq: self.seq,
                    end,
                    min,
                });
            }
            state.end = end;
            state.closed = true;
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener(end);
        }
        Ok(())
    }

    /// Links `child` as the next child of this core node.
    ///
    /// A closed child has its end recorded immediately; an open child gets a
    /// one-shot listener that back-patches the end once it closes.
    pub fn link_new_child(self: &Arc<Self>, child: &Arc<HtNode<E>>) -> Result<()> {
        let index = {
            let mut state = self.state.write();
            if state.closed {
                return Err(Error::NodeClosed { seq: self.seq });
            }
            let core = match &mut state.data {
                NodeData::Core(core) => core,
                NodeData::Leaf(_) => return Err(Error::NotACoreNode { seq: self.seq }),
            };
            if core.len() >= self.max_children {
                return Err(Error::TooManyChildren {
                    seq: self.seq,
                    max: self.max_children,
                });
            }
            core.push(ChildLink {
                seq: child.seq,
                start: child.start,
                end: OPEN_END,
            })
        };

        let mut child_state = child.state.write();
        if child_state.closed {
            let end = child_state.end;
            drop(child_state);
            self.update_child_end(index, end);
        } else {
            debug_assert!(child_state.listener.is_none(), "child linked twice");
            let parent: Weak<HtNode<E>> = Arc::downgrade(self);
            child_state.listener = Some(Box::new(move |end| {
                if let Some(parent) = parent.upgrade() {
                    parent.update_child_end(index, end);
                }
            }));
        }
        Ok(())
    }

    fn update_child_end(&self, index: usize, end: i64) {
        if let NodeData::Core(core) = &mut self.state.write().data {
            core.set_end(index, end);
        }
    }

    pub fn child_count(&self) -> usize {
        match &self.state.read().data {
            NodeData::Core(core) => core.len(),
            NodeData::Leaf(_) => 0,
        }
    }

    /// Snapshot of the child links; empty for a leaf.
    pub fn children(&self) -> Vec<ChildLink> {
        match &self.state.read().data {
            NodeData::Core(core) => core.children().to_vec(),
            NodeData::Leaf(_) => Vec::new(),
        }
    }

    pub fn latest_child(&self) -> Option<u32> {
        match &self.state.read().data {
            NodeData::Core(core) => core.latest().map(|link| link.seq),
            NodeData::Leaf(_) => None,
        }
    }

    /// Sequence numbers of the children whose recorded range intersects the
    /// condition.
    pub fn select_next_children(&self, condition: &TimeRangeCondition) -> Vec<u32> {
        match &self.state.read().data {
            NodeData::Core(core) => core
                .select_next_indices(condition)
                .map(|index| core.children()[index].seq)
                .collect(),
            NodeData::Leaf(_) => Vec::new(),
        }
    }

    /// Snapshot of the intervals held by a leaf.
    pub fn intervals(&self) -> Vec<E> {
        match &self.state.read().data {
            NodeData::Leaf(leaf) => leaf.intervals.clone(),
            NodeData::Core(_) => Vec::new(),
        }
    }

    pub fn max_interval_start(&self) -> Option<i64> {
        match &self.state.read().data {
            NodeData::Leaf(leaf) => leaf.intervals.iter().map(|i| i.start()).max(),
            NodeData::Core(_) => None,
        }
    }

    pub fn matching_intervals<F>(&self, condition: &TimeRangeCondition, predicate: F) -> Vec<E>
    where
        F: Fn(&E) -> bool,
    {
        match &self.state.read().data {
            NodeData::Leaf(leaf) => {
                let from = leaf
                    .intervals
                    .partition_point(|i| i.end() < condition.min());
                leaf.intervals[from..]
                    .iter()
                    .filter(|i| condition.intersects_interval(i.start(), i.end()) && predicate(i))
                    .cloned()
                    .collect()
            }
            NodeData::Core(_) => Vec::new(),
        }
    }

    pub fn first_matching<F>(&self, condition: &TimeRangeCondition, predicate: F) -> Option<E>
    where
        F: Fn(&E) -> bool,
    {
        match &self.state.read().data {
            NodeData::Leaf(leaf) => {
                let from = leaf
                    .intervals
                    .partition_point(|i| i.end() < condition.min());
                leaf.intervals[from..]
                    .iter()
                    .find(|i| condition.intersects_interval(i.start(), i.end()) && predicate(i))
                    .cloned()
            }
            NodeData::Core(_) => None,
        }
    }

    /// Serializes the node into a full block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let state = self.state.read();
        let mut block = vec![0u8; self.block_size];
        let (node_type, count) = match &state.data {
            NodeData::Leaf(leaf) => (NodeType::Leaf, leaf.intervals.len()),
            NodeData::Core(core) => (NodeType::Core, core.len()),
        };
        let header = NodeHeader {
            node_type,
            closed: state.closed,
            seq: self.seq,
            parent: state.parent,
            start: self.start,
            end: state.end,
            count: count as u32,
            crc: 0,
        };
        block[..COMMON_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        let mut writer = BlockWriter::new(&mut block[COMMON_HEADER_SIZE..]);
        match &state.data {
            NodeData::Leaf(leaf) => {
                for interval in &leaf.intervals {
                    let before = writer.position();
                    interval.encode(&mut writer)?;
                    if writer.position() - before != interval.size_on_disk() {
                        return Err(Error::Corrupt {
                            offset: (COMMON_HEADER_SIZE + before) as u64,
                            context: "interval size_on_disk disagrees with encoding",
                        });
                    }
                }
            }
            NodeData::Core(core) => core.encode(&mut writer, self.max_children)?,
        }
        let used = COMMON_HEADER_SIZE + writer.position();
        if self.block_size - used != self.free_space_locked(&state) {
            return Err(Error::Corrupt {
                offset: used as u64,
                context: "node free space accounting mismatch",
            });
        }

        let crc = block_crc(&block);
        block[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(block)
    }

    /// Rebuilds a node from a block written by [`HtNode::encode`].
    pub fn decode(block: &[u8], max_children: usize, offset: u64) -> Result<Self> {
        let header = NodeHeader::from_bytes(block, offset)?;
        if block_crc(block) != header.crc {
            return Err(Error::Corrupt {
                offset,
                context: "node checksum mismatch",
            });
        }
        let mut reader = BlockReader::new(&block[COMMON_HEADER_SIZE..]);
        let count = header.count as usize;
        let data = match header.node_type {
            NodeType::Leaf => {
                // The count is untrusted until every record decodes.
                let mut intervals = Vec::with_capacity(count.min(reader.remaining()));
                let mut content_size = 0;
                for _ in 0..count {
                    let interval = E::decode(&mut reader)?;
                    content_size += interval.size_on_disk();
                    intervals.push(interval);
                }
                NodeData::Leaf(LeafData {
                    intervals,
                    content_size,
                })
            }
            NodeType::Core => NodeData::Core(CoreData::decode(&mut reader, count, max_children)?),
        };
        Ok(Self {
            seq: header.seq,
            start: header.start,
            block_size: block.len(),
            max_children,
            state: RwLock::new(NodeState {
                parent: header.parent,
                end: header.end,
                closed: header.closed,
                data,
                listener: None,
            }),
        })
    }
}

impl<E: HtInterval> fmt::Display for HtNode<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parent, closed, end) = {
            let state = self.state.read();
            (state.parent, state.closed, state.end)
        };
        let kind = match self.node_type() {
            NodeType::Leaf => format!("leaf, {} intervals", self.intervals().len()),
            NodeType::Core => format!("core, {} children", self.child_count()),
        };
        write!(f, "node #{}, ", self.seq)?;
        if parent == NO_PARENT {
            write!(f, "root")?;
        } else {
            write!(f, "parent #{parent}")?;
        }
        write!(f, ", {kind} ({}% used), [{} - ", self.usage_percent(), self.start)?;
        if closed {
            write!(f, "{end}]")
        } else {
            write!(f, "...]")
        }
    }
}

impl<E: HtInterval> fmt::Debug for HtNode<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
