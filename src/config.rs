//! Tree configuration.
//!
//! Fixed at creation time; everything except `cache_capacity` is persisted in
//! the file header.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::{header_size, NodeType};

/// Smallest fan-out that still lets the tree grow.
pub const MIN_MAX_CHILDREN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Bytes per node block.
    /// Default: 64 KB
    pub block_size: usize,

    /// Fan-out of core nodes.
    /// Default: 50
    pub max_children: usize,

    /// Version of the component producing the intervals. A file written by
    /// a different version is rejected on open.
    /// Default: 0
    pub provider_version: i32,

    /// Earliest start time the tree accepts.
    /// Default: 0
    pub tree_start: i64,

    /// Decoded nodes kept in memory.
    /// Default: 256
    pub cache_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            max_children: 50,
            provider_version: 0,
            tree_start: 0,
            cache_capacity: 256,
        }
    }
}

impl TreeConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    pub fn with_provider_version(mut self, provider_version: i32) -> Self {
        self.provider_version = provider_version;
        self
    }

    pub fn with_tree_start(mut self, tree_start: i64) -> Self {
        self.tree_start = tree_start;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    /// Bytes available to interval records in an empty leaf.
    pub fn leaf_capacity(&self) -> usize {
        self.block_size
            .saturating_sub(header_size(NodeType::Leaf, self.max_children))
    }

    /// Checks the configuration against the largest record the codec may
    /// produce, if it declares one.
    pub fn validate(&self, max_record_size: Option<usize>) -> Result<()> {
        if self.max_children < MIN_MAX_CHILDREN {
            return Err(Error::InvalidConfig(format!(
                "max_children must be at least {MIN_MAX_CHILDREN}, got {}",
                self.max_children
            )));
        }
        if i32::try_from(self.max_children).is_err() {
            return Err(Error::InvalidConfig(format!(
                "max_children {} does not fit the file format",
                self.max_children
            )));
        }
        if u32::try_from(self.block_size).is_err() {
            return Err(Error::InvalidConfig(format!(
                "block_size {} does not fit the file format",
                self.block_size
            )));
        }
        let core_header = header_size(NodeType::Core, self.max_children);
        if self.block_size < core_header {
            return Err(Error::InvalidConfig(format!(
                "block_size {} cannot hold a core node header of {core_header} bytes",
                self.block_size
            )));
        }
        if let Some(max) = max_record_size {
            if max > self.leaf_capacity() {
                return Err(Error::IntervalTooLarge {
                    size: max,
                    capacity: self.leaf_capacity(),
                });
            }
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig("cache_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
