//! Block file access and the node cache.
//!
//! Nodes are addressed by sequence number: node `n` lives at
//! `HEADER_BLOCK_SIZE + n * block_size`. Every write goes through the cache so
//! a node closed in memory is visible to queries before the OS flushes it.
//! Read-only trees serve blocks straight from a memory map.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::header::{node_offset, TreeHeader, HEADER_BLOCK_SIZE, HEADER_SIZE};
use crate::interval::HtInterval;
use crate::node::HtNode;

pub struct HtIo<E> {
    path: PathBuf,
    block_size: usize,
    max_children: usize,
    file: Mutex<File>,
    map: Option<Mmap>,
    cache: Mutex<LruCache<u32, Arc<HtNode<E>>>>,
}

impl<E: HtInterval> HtIo<E> {
    /// Creates (or truncates) the file at `path` for writing.
    pub fn create(
        path: &Path,
        block_size: usize,
        max_children: usize,
        cache_capacity: usize,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(HEADER_BLOCK_SIZE as u64)?;
        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            max_children,
            file: Mutex::new(file),
            map: None,
            cache: Mutex::new(new_cache(cache_capacity)),
        })
    }

    /// Opens an existing file and returns its validated header. With
    /// `writable == false` the file is memory mapped and never modified.
    pub fn open(path: &Path, writable: bool, cache_capacity: usize) -> Result<(Self, TreeHeader)> {
        let mut file = OpenOptions::new().read(true).write(writable).open(path)?;
        let header = read_header(&mut file)?;
        let map = if writable {
            None
        } else {
            // SAFETY: read-only trees never write to the file; a concurrent
            // external writer is outside the supported usage.
            Some(unsafe { Mmap::map(&file)? })
        };
        let io = Self {
            path: path.to_path_buf(),
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
            file: Mutex::new(file),
            map,
            cache: Mutex::new(new_cache(cache_capacity)),
        };
        Ok((io, header))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_read_only(&self) -> bool {
        self.map.is_some()
    }

    pub fn write_header(&self, header: &TreeHeader) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        Ok(())
    }

    pub fn read_node(&self, seq: u32) -> Result<Arc<HtNode<E>>> {
        if let Some(node) = self.cache.lock().get(&seq) {
            return Ok(Arc::clone(node));
        }

        let offset = node_offset(self.block_size, seq);
        let node = match &self.map {
            Some(map) => {
                let start = offset as usize;
                let block = map
                    .get(start..start + self.block_size)
                    .ok_or(Error::Truncated {
                        offset,
                        needed: self.block_size as u64,
                        len: map.len() as u64,
                    })?;
                HtNode::decode(block, self.max_children, offset)?
            }
            None => {
                let mut block = vec![0u8; self.block_size];
                {
                    let mut file = self.file.lock();
                    let len = file.metadata()?.len();
                    if len < offset + self.block_size as u64 {
                        return Err(Error::Truncated {
                            offset,
                            needed: self.block_size as u64,
                            len,
                        });
                    }
                    file.seek(SeekFrom::Start(offset))?;
                    file.read_exact(&mut block)?;
                }
                HtNode::decode(&block, self.max_children, offset)?
            }
        };
        if node.seq() != seq {
            return Err(Error::Corrupt {
                offset,
                context: "node sequence number does not match its position",
            });
        }

        let node = Arc::new(node);
        self.cache.lock().put(seq, Arc::clone(&node));
        Ok(node)
    }

    /// Writes the node's block and makes it the cached copy.
    pub fn write_node(&self, node: &Arc<HtNode<E>>) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let block = node.encode()?;
        let offset = node_offset(self.block_size, node.seq());
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&block)?;
        }
        self.cache.lock().put(node.seq(), Arc::clone(node));
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

fn new_cache<E>(capacity: usize) -> LruCache<u32, Arc<HtNode<E>>> {
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

/// Reads and validates the header of an open history file.
pub fn read_header(file: &mut File) -> Result<TreeHeader> {
    let len = file.metadata()?.len();
    if len < HEADER_BLOCK_SIZE as u64 {
        return Err(Error::Truncated {
            offset: 0,
            needed: HEADER_BLOCK_SIZE as u64,
            len,
        });
    }
    let mut buf = [0u8; HEADER_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)?;
    TreeHeader::from_bytes(&buf)
}

/// Reads just the header of the file at `path`.
pub fn read_header_at(path: &Path) -> Result<TreeHeader> {
    let mut file = File::open(path)?;
    read_header(&mut file)
}
