//! The overlapping history tree.
//!
//! Intervals are appended in non-decreasing start order into the leaf at the
//! bottom of the latest branch (root first, leaf last). When that leaf is
//! full, the branch is closed from the deepest level whose parent still has
//! room and a fresh sub-branch is opened beside it; when no level has room,
//! the whole tree gets a new root. Closed nodes are written to disk and never
//! change again, so readers only ever contend with the latest branch.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::header::{node_offset, TreeHeader, HEADER_BLOCK_SIZE, ROOT_UNSET};
use crate::interval::HtInterval;
use crate::io::HtIo;
use crate::node::{HtNode, NodeType, NO_PARENT, OPEN_END};

/// State only the writer touches.
struct WriteState {
    last_start: i64,
    closed: bool,
}

pub struct HistoryTree<E: HtInterval> {
    io: HtIo<E>,
    config: TreeConfig,
    /// Latest branch: root at index 0, leaf last.
    branch: RwLock<Vec<Arc<HtNode<E>>>>,
    node_count: AtomicU32,
    tree_end: AtomicI64,
    writer: Mutex<WriteState>,
}

impl<E: HtInterval> HistoryTree<E> {
    /// Creates a new, empty tree at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>, config: TreeConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate(E::max_size_on_disk())?;
        let io = HtIo::create(
            path,
            config.block_size,
            config.max_children,
            config.cache_capacity,
        )?;
        // Provisional header: an interrupted build is detected on open.
        io.write_header(&TreeHeader::new(
            config.provider_version,
            config.block_size as u32,
            config.max_children as u32,
            0,
            config.tree_start,
            ROOT_UNSET,
        ))?;

        let tree = Self {
            io,
            tree_end: AtomicI64::new(config.tree_start),
            writer: Mutex::new(WriteState {
                last_start: config.tree_start,
                closed: false,
            }),
            branch: RwLock::new(Vec::new()),
            node_count: AtomicU32::new(0),
            config,
        };
        let root = tree.new_node(NodeType::Leaf, NO_PARENT, tree.config.tree_start)?;
        tree.branch.write().push(root);
        info!(
            "created history tree {} (block_size={}, max_children={}, start={})",
            path.display(),
            tree.config.block_size,
            tree.config.max_children,
            tree.config.tree_start
        );
        Ok(tree)
    }

    /// Opens a finished tree for queries only.
    pub fn open(path: impl AsRef<Path>, expected_provider_version: i32) -> Result<Self> {
        Self::open_with(path.as_ref(), expected_provider_version, false)
    }

    /// Opens a finished tree and prepares it to accept more intervals. The
    /// new intervals must not start before the last one already stored.
    pub fn open_for_append(path: impl AsRef<Path>, expected_provider_version: i32) -> Result<Self> {
        let tree = Self::open_with(path.as_ref(), expected_provider_version, true)?;
        tree.reopen_branch()?;
        Ok(tree)
    }

    fn open_with(path: &Path, expected_provider_version: i32, writable: bool) -> Result<Self> {
        Self::load(path, expected_provider_version, writable).map_err(|err| {
            if err.is_format_error() {
                warn!("rejected history tree {}: {err}", path.display());
            }
            err
        })
    }

    fn load(path: &Path, expected_provider_version: i32, writable: bool) -> Result<Self> {
        let cache_capacity = TreeConfig::default().cache_capacity;
        let (io, header) = HtIo::open(path, writable, cache_capacity)?;
        header.validate_provider(expected_provider_version)?;
        if !header.is_finalized() {
            return Err(Error::Unfinished);
        }

        let config = TreeConfig {
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
            provider_version: header.provider_version,
            tree_start: header.tree_start,
            cache_capacity,
        };
        if config.validate(None).is_err() {
            return Err(Error::Corrupt {
                offset: 0,
                context: "tree header describes an invalid geometry",
            });
        }
        if header.root_seq < 0 || header.root_seq as u32 >= header.node_count {
            return Err(Error::Corrupt {
                offset: 0,
                context: "root sequence number outside the tree",
            });
        }
        let needed = HEADER_BLOCK_SIZE as u64 + header.node_count as u64 * config.block_size as u64;
        let len = io.file_size()?;
        if len < needed {
            return Err(Error::Truncated {
                offset: HEADER_BLOCK_SIZE as u64,
                needed: needed - HEADER_BLOCK_SIZE as u64,
                len,
            });
        }

        let branch = Self::load_latest_branch(&io, header.root_seq as u32, header.node_count)?;
        let root = &branch[0];
        if root.start() != header.tree_start {
            return Err(Error::Corrupt {
                offset: node_offset(config.block_size, root.seq()),
                context: "root start does not match tree start",
            });
        }
        let tree_end = root.end();
        let last_start = branch
            .last()
            .map(|leaf| leaf.max_interval_start().unwrap_or(leaf.start()))
            .unwrap_or(header.tree_start);

        info!(
            "opened history tree {} ({} nodes, depth {}, [{}, {}]){}",
            path.display(),
            header.node_count,
            branch.len(),
            header.tree_start,
            tree_end,
            if writable { " for append" } else { "" }
        );
        Ok(Self {
            io,
            config,
            branch: RwLock::new(branch),
            node_count: AtomicU32::new(header.node_count),
            tree_end: AtomicI64::new(tree_end),
            writer: Mutex::new(WriteState {
                last_start,
                closed: !writable,
            }),
        })
    }

    /// Follows the latest child of every core node down from the root.
    fn load_latest_branch(io: &HtIo<E>, root_seq: u32, node_count: u32) -> Result<Vec<Arc<HtNode<E>>>> {
        let mut node = io.read_node(root_seq)?;
        let mut branch = Vec::new();
        loop {
            let next = node.latest_child();
            branch.push(node);
            let Some(seq) = next else { break };
            if seq >= node_count || branch.len() as u32 >= node_count {
                return Err(Error::Corrupt {
                    offset: node_offset(io.block_size(), seq),
                    context: "latest branch leaves the tree",
                });
            }
            node = io.read_node(seq)?;
        }
        if branch.last().map(|leaf| leaf.node_type()) != Some(NodeType::Leaf) {
            return Err(Error::Corrupt {
                offset: 0,
                context: "latest branch does not end in a leaf",
            });
        }
        Ok(branch)
    }

    /// Puts a new root above the stored tree and opens a fresh branch under
    /// it, so a finished file can keep growing.
    fn reopen_branch(&self) -> Result<()> {
        let start = self.writer.lock().last_start;
        let mut branch = self.branch.write();
        self.io.write_header(&TreeHeader::new(
            self.config.provider_version,
            self.config.block_size as u32,
            self.config.max_children as u32,
            self.node_count(),
            self.config.tree_start,
            ROOT_UNSET,
        ))?;
        self.add_new_root(&mut branch, start)?;
        debug!(
            "reopened {} for append at {start}, depth {}",
            self.io.path().display(),
            branch.len()
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.io.path()
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn max_children(&self) -> usize {
        self.config.max_children
    }

    pub fn provider_version(&self) -> i32 {
        self.config.provider_version
    }

    pub fn tree_start(&self) -> i64 {
        self.config.tree_start
    }

    /// Largest end time inserted so far, or the explicit end once closed.
    pub fn tree_end(&self) -> i64 {
        self.tree_end.load(Ordering::Acquire)
    }

    pub fn node_count(&self) -> u32 {
        self.node_count.load(Ordering::Acquire)
    }

    pub fn depth(&self) -> usize {
        self.branch.read().len()
    }

    pub fn root_seq(&self) -> u32 {
        self.branch.read()[0].seq()
    }

    pub fn is_read_only(&self) -> bool {
        self.io.is_read_only()
    }

    /// True once the tree has been closed (always true for read-only trees).
    pub fn is_closed(&self) -> bool {
        self.writer.lock().closed
    }

    /// Snapshot of the latest branch, root first.
    pub fn latest_branch(&self) -> Vec<Arc<HtNode<E>>> {
        self.branch.read().clone()
    }

    pub fn file_size(&self) -> Result<u64> {
        self.io.file_size()
    }

    /// Returns node `seq`, from the latest branch when it is part of it.
    pub fn read_node(&self, seq: u32) -> Result<Arc<HtNode<E>>> {
        if let Some(node) = self.branch.read().iter().find(|node| node.seq() == seq) {
            return Ok(Arc::clone(node));
        }
        let count = self.node_count();
        if seq >= count {
            return Err(Error::NoSuchNode { seq, count });
        }
        self.io.read_node(seq)
    }

    /// Inserts an interval. Starts must be non-decreasing across calls.
    pub fn insert(&self, interval: E) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let mut writer = self.writer.lock();
        if writer.closed {
            return Err(Error::TreeClosed);
        }
        let (start, end) = (interval.start(), interval.end());
        // OPEN_END is reserved for nodes that are still open.
        if end < start || end == OPEN_END {
            return Err(Error::InvalidInterval { start, end });
        }
        if start < self.config.tree_start {
            return Err(Error::StartBeforeTree {
                start,
                tree_start: self.config.tree_start,
            });
        }
        if start < writer.last_start {
            return Err(Error::OutOfOrder {
                start,
                last: writer.last_start,
            });
        }
        let size = interval.size_on_disk();
        let capacity = self.config.leaf_capacity();
        if size > capacity {
            return Err(Error::IntervalTooLarge { size, capacity });
        }

        let leaf = self.latest_leaf();
        let leaf = if leaf.free_space() >= size {
            leaf
        } else {
            let mut branch = self.branch.write();
            let depth = branch.len() - 1;
            let new_start = new_branch_start(&branch, depth, start);
            self.add_sibling_node(&mut branch, depth, new_start)?;
            Arc::clone(&branch[depth])
        };
        leaf.add(interval)?;

        writer.last_start = start;
        self.tree_end.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    fn latest_leaf(&self) -> Arc<HtNode<E>> {
        let branch = self.branch.read();
        Arc::clone(&branch[branch.len() - 1])
    }

    /// Closes every node of the latest branch at `end_time`, writes them out
    /// and finalizes the header. The tree stays queryable.
    pub fn close_tree(&self, end_time: i64) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let mut writer = self.writer.lock();
        if writer.closed {
            return Err(Error::TreeClosed);
        }
        let branch = self.branch.write();
        let tree_end = self.tree_end();
        if end_time < tree_end || end_time == OPEN_END {
            return Err(Error::InvalidEndTime {
                seq: branch[0].seq(),
                end: end_time,
                min: tree_end,
            });
        }
        self.tree_end.store(end_time, Ordering::Release);
        self.close_branch_from(&branch, 0)?;

        let root = &branch[0];
        self.io.write_header(&TreeHeader::new(
            self.config.provider_version,
            self.config.block_size as u32,
            self.config.max_children as u32,
            self.node_count(),
            root.start(),
            root.seq() as i32,
        ))?;
        self.io.sync()?;
        writer.closed = true;
        info!(
            "closed history tree {} at {end_time} ({} nodes, depth {})",
            self.io.path().display(),
            self.node_count(),
            branch.len()
        );
        Ok(())
    }

    /// Closes the tree and removes its file.
    pub fn delete_file(self) -> Result<()> {
        let path: PathBuf = self.io.path().to_path_buf();
        {
            let mut writer = self.writer.lock();
            writer.closed = true;
        }
        drop(self);
        std::fs::remove_file(&path)?;
        info!("deleted history tree {}", path.display());
        Ok(())
    }

    /// Walks every stored node and checks the parent/child bookkeeping.
    pub fn verify_integrity(&self) -> Result<()> {
        for seq in 0..self.node_count() {
            let node = self.read_node(seq)?;
            let offset = node_offset(self.config.block_size, seq);
            if node.is_closed() && node.end() < node.start() {
                return Err(Error::Corrupt {
                    offset,
                    context: "node ends before it starts",
                });
            }
            for link in node.children() {
                let child = self.read_node(link.seq)?;
                if child.parent() != seq as i32 {
                    return Err(Error::Corrupt {
                        offset,
                        context: "child does not point back to its parent",
                    });
                }
                if link.start != child.start() || child.start() < node.start() {
                    return Err(Error::Corrupt {
                        offset,
                        context: "child start outside its parent",
                    });
                }
                if child.is_closed() && link.end != child.end() {
                    return Err(Error::Corrupt {
                        offset,
                        context: "child link end disagrees with child",
                    });
                }
                if node.is_closed() && child.end() > node.end() {
                    return Err(Error::Corrupt {
                        offset,
                        context: "child ends after its parent",
                    });
                }
            }
        }
        Ok(())
    }

    fn new_node(&self, node_type: NodeType, parent: i32, start: i64) -> Result<Arc<HtNode<E>>> {
        let seq = self.node_count.load(Ordering::Acquire);
        if seq >= i32::MAX as u32 {
            return Err(Error::InvalidConfig(
                "node count exceeds what the file format can address".into(),
            ));
        }
        self.node_count.store(seq + 1, Ordering::Release);
        Ok(Arc::new(HtNode::new(
            node_type,
            self.config.block_size,
            self.config.max_children,
            seq,
            parent,
            start,
        )))
    }

    /// Closes (if still open) and writes every node of the branch from
    /// `depth` down to the leaf, deepest first so listeners reach open
    /// parents.
    fn close_branch_from(&self, branch: &[Arc<HtNode<E>>], depth: usize) -> Result<()> {
        let end = self.tree_end();
        for node in branch[depth..].iter().rev() {
            if !node.is_closed() {
                node.close(end)?;
            }
            self.io.write_node(node)?;
        }
        Ok(())
    }

    /// Replaces the branch below `depth - 1` with fresh nodes starting at
    /// `new_start`, walking up while the parent is full.
    fn add_sibling_node(
        &self,
        branch: &mut Vec<Arc<HtNode<E>>>,
        depth: usize,
        new_start: i64,
    ) -> Result<()> {
        if depth == 0 {
            return self.add_new_root(branch, new_start);
        }
        let parent = &branch[depth - 1];
        if parent.child_count() >= self.config.max_children || new_start < parent.start() {
            return self.add_sibling_node(branch, depth - 1, new_start);
        }

        self.close_branch_from(branch, depth)?;
        for i in depth..branch.len() {
            let parent = Arc::clone(&branch[i - 1]);
            let node = self.new_node(branch[i].node_type(), parent.seq() as i32, new_start)?;
            parent.link_new_child(&node)?;
            branch[i] = node;
        }
        debug!(
            "opened sibling branch at depth {depth} starting {new_start} ({} nodes)",
            self.node_count()
        );
        Ok(())
    }

    /// Grows the tree by one level: the old root becomes the first child of
    /// a new root and a fresh branch of the old depth is opened beside it.
    fn add_new_root(&self, branch: &mut Vec<Arc<HtNode<E>>>, new_start: i64) -> Result<()> {
        let old_root = Arc::clone(&branch[0]);
        let depth = branch.len();
        let new_root = self.new_node(NodeType::Core, NO_PARENT, self.config.tree_start)?;
        old_root.set_parent(new_root.seq() as i32);
        self.close_branch_from(branch, 0)?;
        new_root.link_new_child(&old_root)?;

        branch.clear();
        branch.push(Arc::clone(&new_root));
        let mut parent = new_root;
        for level in 1..=depth {
            let node_type = if level == depth {
                NodeType::Leaf
            } else {
                NodeType::Core
            };
            let node = self.new_node(node_type, parent.seq() as i32, new_start)?;
            parent.link_new_child(&node)?;
            branch.push(Arc::clone(&node));
            parent = node;
        }
        debug!(
            "new root #{} at depth {}, branch starts {new_start}",
            branch[0].seq(),
            branch.len()
        );
        Ok(())
    }
}

/// Start time of a branch replacing the node at `depth`: never earlier than
/// the node it succeeds, so siblings stay ordered by start.
fn new_branch_start<E: HtInterval>(branch: &[Arc<HtNode<E>>], depth: usize, start: i64) -> i64 {
    start.max(branch[depth].start())
}

impl<E: HtInterval> Drop for HistoryTree<E> {
    fn drop(&mut self) {
        if !self.is_read_only() && !self.writer.get_mut().closed {
            warn!(
                "history tree {} dropped without being closed; the file is unfinished",
                self.io.path().display()
            );
        }
    }
}

impl<E: HtInterval> fmt::Debug for HistoryTree<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryTree")
            .field("config", &self.config)
            .field("node_count", &self.node_count)
            .field("tree_end", &self.tree_end)
            .finish_non_exhaustive()
    }
}

impl<E: HtInterval> fmt::Display for HistoryTree<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branch = self.branch.read();
        writeln!(
            f,
            "history tree {}: {} nodes, depth {}, [{}, {}]",
            self.io.path().display(),
            self.node_count(),
            branch.len(),
            self.config.tree_start,
            self.tree_end()
        )?;
        for (depth, node) in branch.iter().enumerate() {
            writeln!(f, "{:indent$}{node}", "", indent = depth * 2)?;
        }
        Ok(())
    }
}
