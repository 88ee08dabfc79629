use crate::error::{Error, Result};

/// Space reserved at the start of the file for the tree header.
pub const HEADER_BLOCK_SIZE: usize = 4096;
/// Bytes of the header actually used.
pub const HEADER_SIZE: usize = 40;

pub const HT_MAGIC: u32 = 0x4854_4F56; // 'HTOV'
pub const HT_FILE_VERSION: u32 = 1;

/// Root sequence number of a tree that has not been finalized yet.
pub const ROOT_UNSET: i32 = -1;

const MAGIC_OFFSET: usize = 0;
const FILE_VERSION_OFFSET: usize = 4;
const PROVIDER_VERSION_OFFSET: usize = 8;
const BLOCK_SIZE_OFFSET: usize = 12;
const MAX_CHILDREN_OFFSET: usize = 16;
const NODE_COUNT_OFFSET: usize = 20;
const TREE_START_OFFSET: usize = 24;
const ROOT_SEQ_OFFSET: usize = 32;
const CRC_OFFSET: usize = 36;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeHeader {
    pub magic: u32,
    pub file_version: u32,
    pub provider_version: i32,
    pub block_size: u32,
    pub max_children: u32,
    pub node_count: u32,
    pub tree_start: i64,
    pub root_seq: i32,
}

impl TreeHeader {
    pub fn new(
        provider_version: i32,
        block_size: u32,
        max_children: u32,
        node_count: u32,
        tree_start: i64,
        root_seq: i32,
    ) -> Self {
        Self {
            magic: HT_MAGIC,
            file_version: HT_FILE_VERSION,
            provider_version,
            block_size,
            max_children,
            node_count,
            tree_start,
            root_seq,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.root_seq != ROOT_UNSET
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic.to_le_bytes());
        buf[FILE_VERSION_OFFSET..FILE_VERSION_OFFSET + 4]
            .copy_from_slice(&self.file_version.to_le_bytes());
        buf[PROVIDER_VERSION_OFFSET..PROVIDER_VERSION_OFFSET + 4]
            .copy_from_slice(&self.provider_version.to_le_bytes());
        buf[BLOCK_SIZE_OFFSET..BLOCK_SIZE_OFFSET + 4]
            .copy_from_slice(&self.block_size.to_le_bytes());
        buf[MAX_CHILDREN_OFFSET..MAX_CHILDREN_OFFSET + 4]
            .copy_from_slice(&self.max_children.to_le_bytes());
        buf[NODE_COUNT_OFFSET..NODE_COUNT_OFFSET + 4]
            .copy_from_slice(&self.node_count.to_le_bytes());
        buf[TREE_START_OFFSET..TREE_START_OFFSET + 8]
            .copy_from_slice(&self.tree_start.to_le_bytes());
        buf[ROOT_SEQ_OFFSET..ROOT_SEQ_OFFSET + 4].copy_from_slice(&self.root_seq.to_le_bytes());
        let crc = Self::crc32(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and validates a header.
    ///
    /// Magic and file version are checked before the checksum so that a
    /// foreign file is reported as such rather than as corruption.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = read_u32(bytes, MAGIC_OFFSET);
        if magic != HT_MAGIC {
            return Err(Error::BadMagic {
                expected: HT_MAGIC,
                found: magic,
            });
        }
        let file_version = read_u32(bytes, FILE_VERSION_OFFSET);
        if file_version != HT_FILE_VERSION {
            return Err(Error::UnsupportedVersion {
                expected: HT_FILE_VERSION,
                found: file_version,
            });
        }
        let crc = read_u32(bytes, CRC_OFFSET);
        if crc != Self::crc32(&bytes[..CRC_OFFSET]) {
            return Err(Error::Corrupt {
                offset: CRC_OFFSET as u64,
                context: "tree header checksum mismatch",
            });
        }
        Ok(Self {
            magic,
            file_version,
            provider_version: read_u32(bytes, PROVIDER_VERSION_OFFSET) as i32,
            block_size: read_u32(bytes, BLOCK_SIZE_OFFSET),
            max_children: read_u32(bytes, MAX_CHILDREN_OFFSET),
            node_count: read_u32(bytes, NODE_COUNT_OFFSET),
            tree_start: i64::from_le_bytes(
                bytes[TREE_START_OFFSET..TREE_START_OFFSET + 8]
                    .try_into()
                    .expect("slice length"),
            ),
            root_seq: read_u32(bytes, ROOT_SEQ_OFFSET) as i32,
        })
    }

    pub fn validate_provider(&self, expected: i32) -> Result<()> {
        if self.provider_version != expected {
            return Err(Error::ProviderVersionMismatch {
                expected,
                found: self.provider_version,
            });
        }
        Ok(())
    }

    /// File offset of node `seq`.
    pub fn node_offset(&self, seq: u32) -> u64 {
        node_offset(self.block_size as usize, seq)
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        use crc32fast::Hasher;
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }
}

pub fn node_offset(block_size: usize, seq: u32) -> u64 {
    HEADER_BLOCK_SIZE as u64 + seq as u64 * block_size as u64
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("slice length"))
}
