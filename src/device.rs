//! 块设备驱动: 文件镜像 [`BlockFile`] 与内存盘 [`MemDisk`].

use crate::fs::{BlockDevice, BLOCK_SIZE};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

pub struct BlockFile {
    file: Mutex<File>,
    blocks: usize,
}

// std::file::File 由 Rust 标准库 std 提供，可以访问 Linux 上的一个文件。
// 我们将它包装成 BlockFile 类型来模拟一块磁盘，为它实现 BlockDevice 接口。
// 注意 File 本身仅通过 read/write 接口是不能实现随机读写的，
// 在访问一个特定的扇区的时候，我们必须先 seek 到这个扇区的开头位置

impl BlockFile {
    /// 创建 (或截断) 一个容量为 blocks 个扇区的镜像文件
    pub fn create(path: impl AsRef<Path>, blocks: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((blocks * BLOCK_SIZE) as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    /// 打开一个已有的镜像, 容量由文件长度决定
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let blocks = file.metadata()?.len() as usize / BLOCK_SIZE;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }
}

impl BlockDevice for BlockFile {
    /// 读取一个扇区从文件
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("Error when seeking!");
        file.read_exact(buf).expect("Not a complete block");
    }

    /// 写一个扇区到文件
    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("Error when seeking!");
        file.write_all(buf).expect("Not a complete block");
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }
}

/// 内存盘. 设备上只保留真正被写下去的数据, 所以对它做快照就相当于掉电后的磁盘
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; BLOCK_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(blocks: usize) -> Self {
        Self::from_sectors(vec![[0; BLOCK_SIZE]; blocks])
    }

    fn from_sectors(sectors: Vec<[u8; BLOCK_SIZE]>) -> Self {
        Self {
            sectors: Mutex::new(sectors),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 当前设备内容的拷贝: 缓存里尚未写回的数据不在其中
    pub fn snapshot(&self) -> Self {
        Self::from_sectors(self.sectors.lock().unwrap().clone())
    }

    /// 不经过计数直接查看扇区内容
    pub fn peek(&self, block_id: usize) -> [u8; BLOCK_SIZE] {
        self.sectors.lock().unwrap()[block_id]
    }

    /// 不经过计数直接改写扇区内容
    pub fn poke(&self, block_id: usize, data: &[u8]) {
        self.sectors.lock().unwrap()[block_id][..data.len()].copy_from_slice(data);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> usize {
        self.sectors.lock().unwrap().len()
    }
}
