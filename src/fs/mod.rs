mod bitmap;
mod block_cache;
mod block_dev;
mod error;
mod inode;
mod layout;
mod volume;
mod wal;

extern crate log;

/// Use a sector size of 512 bytes
pub const BLOCK_SIZE: usize = 512;
/// 整个进程只有固定数量的缓存行, 所有扇区读写都要经过它们
pub const BLOCK_CACHE_SIZE: usize = 64;
/// Magic number for on-disk inode sanity check
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// Magic number of the WAL metadata sector
pub const WAL_META_MAGIC: u32 = 0x5741_4c4d;
/// The max number of direct pointers
pub const INODE_DIRECT_COUNT: usize = 12;
/// The number of pointers in one index block
pub const INODE_INDIRECT1_COUNT: usize = BLOCK_SIZE / 4;
/// The number of data sectors reachable through the doubly-indirect pointer
pub const INODE_INDIRECT2_COUNT: usize = INODE_INDIRECT1_COUNT * INODE_INDIRECT1_COUNT;
/// The upper bound of direct block index
pub const DIRECT_BOUND: usize = INODE_DIRECT_COUNT;
/// The upper bound of indirect1 block index
pub const INDIRECT1_BOUND: usize = DIRECT_BOUND + INODE_INDIRECT1_COUNT;
/// The upper bound of indirect2 block index
pub const INDIRECT2_BOUND: usize = INDIRECT1_BOUND + INODE_INDIRECT2_COUNT;
/// Largest file the block map can address, in bytes
pub const MAX_FILE_SIZE: usize = INDIRECT2_BOUND * BLOCK_SIZE;
/// 扇区的 bit 数量
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// Before/after image capacity of one log record
pub const LOG_PAYLOAD_SIZE: usize = 232;
/// Default number of slots in the circular log region
pub const DEFAULT_LOG_SECTORS: u32 = 1024;
/// Records the WAL keeps in memory before it has to flush
pub const LOG_BUFFER_RECORDS: usize = 32;
/// Data sectors covered by one internal `write_at` transaction
pub const WRITE_BATCH_SECTORS: usize = 8;

/// Sector holding the free map file's inode
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector holding the root directory's inode
pub const ROOT_DIR_SECTOR: u32 = 1;
/// First sector of the log region
pub const LOG_START_SECTOR: u32 = 2;

pub use bitmap::FreeMap;
pub use block_cache::{BufferCache, CacheConfig, CacheStats, EvictionPolicy};
pub use block_dev::BlockDevice;
pub use error::{FsError, Result};
pub use inode::{Inode, InodeTable};
pub use layout::{DiskInode, InodeKind, LogRecord, RecordKind, WalMeta};
pub use volume::{MountOptions, Volume};
pub use wal::{Lsn, RecoveryReport, Transaction, TxnId, Wal, WalGeometry};
