//! Named collection of open trees.
//!
//! Components that share trees (for example one per attribute of a model)
//! look them up here instead of through process-wide state. The registry
//! hands out `Arc`s; a tree stays open until the last handle is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::interval::HtInterval;
use crate::tree::HistoryTree;

pub struct TreeRegistry<E: HtInterval> {
    trees: Mutex<HashMap<String, Arc<HistoryTree<E>>>>,
}

impl<E: HtInterval> Default for TreeRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: HtInterval> TreeRegistry<E> {
    pub fn new() -> Self {
        Self {
            trees: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an already open tree under `name`.
    pub fn register(&self, name: impl Into<String>, tree: HistoryTree<E>) -> Result<Arc<HistoryTree<E>>> {
        let name = name.into();
        let mut trees = self.trees.lock();
        if trees.contains_key(&name) {
            return Err(Error::DuplicateTree(name));
        }
        let tree = Arc::new(tree);
        debug!("registered tree {name:?} at {}", tree.path().display());
        trees.insert(name, Arc::clone(&tree));
        Ok(tree)
    }

    /// Creates a new tree file and registers it.
    pub fn create(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        config: TreeConfig,
    ) -> Result<Arc<HistoryTree<E>>> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateTree(name));
        }
        self.register(name, HistoryTree::create(path, config)?)
    }

    /// Opens a finished tree read-only and registers it.
    pub fn open(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        expected_provider_version: i32,
    ) -> Result<Arc<HistoryTree<E>>> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateTree(name));
        }
        self.register(name, HistoryTree::open(path, expected_provider_version)?)
    }

    pub fn get(&self, name: &str) -> Option<Arc<HistoryTree<E>>> {
        self.trees.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.trees.lock().contains_key(name)
    }

    /// Sorted names of the registered trees.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.trees.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove(&self, name: &str) -> Option<Arc<HistoryTree<E>>> {
        self.trees.lock().remove(name)
    }

    /// Drops every handle without closing the trees.
    pub fn clear(&self) {
        self.trees.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.trees.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.lock().is_empty()
    }

    /// Closes every writable tree that is still open at its current end
    /// time, then empties the registry.
    ///
    /// A failure does not stop the others from closing; the first error is
    /// returned once every tree has been tried.
    pub fn close_all(&self) -> Result<()> {
        let trees: Vec<_> = self.trees.lock().drain().collect();
        let mut first_err = None;
        for (name, tree) in trees {
            if tree.is_read_only() || tree.is_closed() {
                continue;
            }
            debug!("closing tree {name:?}");
            if let Err(err) = tree.close_tree(tree.tree_end()) {
                warn!("failed to close tree {name:?}: {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BlockReader, BlockWriter};
    use crate::condition::TimeRangeCondition;
    use crate::interval::BasicInterval;

    /// Interval whose encoding can be made to fall short of its declared size.
    #[derive(Clone, Debug)]
    struct Sample {
        start: i64,
        end: i64,
        short_write: bool,
    }

    impl Sample {
        fn new(start: i64, end: i64) -> Self {
            Self {
                start,
                end,
                short_write: false,
            }
        }
    }

    impl HtInterval for Sample {
        fn start(&self) -> i64 {
            self.start
        }

        fn end(&self) -> i64 {
            self.end
        }

        fn size_on_disk(&self) -> usize {
            16
        }

        fn encode(&self, writer: &mut BlockWriter<'_>) -> Result<()> {
            writer.put_i64(self.start)?;
            if self.short_write {
                return Ok(());
            }
            writer.put_i64(self.end)
        }

        fn decode(reader: &mut BlockReader<'_>) -> Result<Self> {
            Ok(Self::new(reader.get_i64()?, reader.get_i64()?))
        }
    }

    fn config() -> TreeConfig {
        TreeConfig::default().with_block_size(1024).with_max_children(4)
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = TreeRegistry::<BasicInterval>::new();
        registry
            .create("cpu", dir.path().join("cpu.ht"), config())
            .expect("create");
        let err = registry
            .create("cpu", dir.path().join("other.ht"), config())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTree(name) if name == "cpu"));
        assert!(!dir.path().join("other.ht").exists());
        registry.close_all().expect("close");
    }

    #[test]
    fn close_all_finalizes_and_reopen_finds_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = TreeRegistry::<BasicInterval>::new();
        for name in ["b", "a"] {
            let tree = registry
                .create(name, dir.path().join(format!("{name}.ht")), config())
                .expect("create");
            tree.insert(BasicInterval::new(5, 15, name.as_bytes().to_vec()).unwrap())
                .expect("insert");
        }
        assert_eq!(registry.names(), vec!["a", "b"]);
        registry.close_all().expect("close all");
        assert!(registry.is_empty());

        let tree = registry.open("a", dir.path().join("a.ht"), 0).expect("reopen");
        let hits = tree.query_all(&TimeRangeCondition::singleton(10)).unwrap();
        assert_eq!(hits[0].payload(), b"a");
        assert!(registry.remove("a").is_some());
        assert_eq!(registry.len(), 0);

        registry.open("a", dir.path().join("a.ht"), 0).expect("reopen");
        registry.open("b", dir.path().join("b.ht"), 0).expect("reopen");
        registry.clear();
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn close_all_keeps_going_after_a_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = TreeRegistry::<Sample>::new();
        for name in ["a", "b", "c"] {
            let tree = registry
                .create(name, dir.path().join(format!("{name}.ht")), config())
                .expect("create");
            tree.insert(Sample::new(0, 10)).expect("insert");
            if name == "b" {
                tree.insert(Sample {
                    start: 1,
                    end: 20,
                    short_write: true,
                })
                .expect("insert");
            }
        }
        let broken = registry.get("b").expect("b");

        let err = registry.close_all().unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        assert!(registry.is_empty());
        assert!(!broken.is_closed());

        for name in ["a", "c"] {
            let tree = HistoryTree::<Sample>::open(dir.path().join(format!("{name}.ht")), 0)
                .expect("finished tree opens");
            assert_eq!(tree.query_all(&TimeRangeCondition::singleton(5)).unwrap().len(), 1);
        }
    }
}
