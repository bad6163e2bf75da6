//! 带预写日志的块存储引擎: 缓冲区缓存, WAL, inode 层与空闲位图.

pub mod device;
pub mod fs;
