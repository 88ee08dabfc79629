use thiserror::Error;

/// Errors surfaced by the history tree.
///
/// Format errors (`BadMagic`, `UnsupportedVersion`, `ProviderVersionMismatch`,
/// `Corrupt`, `Unfinished`, `Truncated`) mean the file cannot be trusted and
/// should be rebuilt from source. Everything else is either a usage error or
/// an I/O failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic number: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("unsupported file version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u32, found: u32 },
    #[error("provider version mismatch: expected {expected}, found {found}")]
    ProviderVersionMismatch { expected: i32, found: i32 },
    #[error("corrupt data at offset {offset}: {context}")]
    Corrupt { offset: u64, context: &'static str },
    #[error("history file was never finalized")]
    Unfinished,
    #[error("truncated file: need {needed} bytes at offset {offset}, file has {len}")]
    Truncated { offset: u64, needed: u64, len: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("interval of {size} bytes can never fit in a node ({capacity} bytes available)")]
    IntervalTooLarge { size: usize, capacity: usize },

    #[error("interval start {start} precedes previously inserted start {last}")]
    OutOfOrder { start: i64, last: i64 },
    #[error("interval start {start} precedes tree start {tree_start}")]
    StartBeforeTree { start: i64, tree_start: i64 },
    #[error("interval end {end} precedes its start {start}")]
    InvalidInterval { start: i64, end: i64 },

    #[error("a tree named {0:?} is already registered")]
    DuplicateTree(String),
    #[error("tree is closed")]
    TreeClosed,
    #[error("tree was opened read-only")]
    ReadOnly,
    #[error("node {seq} is already closed")]
    NodeAlreadyClosed { seq: u32 },
    #[error("node {seq} is closed and cannot be modified")]
    NodeClosed { seq: u32 },
    #[error("node {seq} has {free} bytes free, {needed} needed")]
    NodeFull { seq: u32, free: usize, needed: usize },
    #[error("node {seq} already holds {max} children")]
    TooManyChildren { seq: u32, max: usize },
    #[error("node {seq} is not a core node")]
    NotACoreNode { seq: u32 },
    #[error("interval start {start} precedes start {node_start} of node {seq}")]
    IntervalOutsideNode { seq: u32, start: i64, node_start: i64 },
    #[error("node {seq} is not a leaf node")]
    NotALeafNode { seq: u32 },
    #[error("end time {end} is invalid for node {seq} (must be >= {min})")]
    InvalidEndTime { seq: u32, end: i64, min: i64 },
    #[error("node {seq} does not exist (tree has {count} nodes)")]
    NoSuchNode { seq: u32, count: u32 },
}

impl Error {
    /// True when the file itself is unusable and must be rebuilt.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::BadMagic { .. }
                | Error::UnsupportedVersion { .. }
                | Error::ProviderVersionMismatch { .. }
                | Error::Corrupt { .. }
                | Error::Unfinished
                | Error::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
