//! On-disk history tree for overlapping time intervals.
//!
//! Intervals are appended in start order into fixed-size blocks and indexed
//! by a tree built bottom-up as blocks fill. Sibling nodes may overlap in
//! time; every core node records the range of each child so queries can prune
//! whole sub-trees.
//!
//! ```no_run
//! use histree::{BasicInterval, HistoryTree, TimeRangeCondition, TreeConfig};
//!
//! let tree = HistoryTree::create("./states.ht", TreeConfig::default())?;
//! tree.insert(BasicInterval::new(10, 20, b"running".to_vec())?)?;
//! tree.insert(BasicInterval::new(15, 40, b"blocked".to_vec())?)?;
//! tree.close_tree(40)?;
//!
//! let tree = HistoryTree::<BasicInterval>::open("./states.ht", 0)?;
//! for interval in tree.query(&TimeRangeCondition::singleton(17)) {
//!     println!("{:?}", interval?);
//! }
//! # Ok::<(), histree::Error>(())
//! ```

pub mod buffer;
pub mod condition;
pub mod config;
pub mod error;
pub mod header;
pub mod interval;
pub mod io;
pub mod node;
pub mod query;
pub mod registry;
pub mod tree;

pub use condition::TimeRangeCondition;
pub use config::TreeConfig;
pub use error::{Error, Result};
pub use interval::{BasicInterval, HtInterval};
pub use node::{ChildLink, HtNode, NodeType};
pub use query::QueryIter;
pub use registry::TreeRegistry;
pub use tree::HistoryTree;
