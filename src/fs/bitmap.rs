//! 空闲扇区位图 [`FreeMap`]
//!
//! 每个 bit 代表一个扇区的分配状态, 0 意味着空闲, 1 意味着已经分配出去.
//! 位图常驻内存, 以 u64 为一组打包; 它的持久化副本存放在一个普通文件里,
//! 这个文件的 inode 固定在扇区 0 (挂载时由它找回位图).
//!
//! 位图的写入不经过日志, 而是经缓存写穿到设备上. 崩溃后重放日志并不会回滚位图,
//! 所以崩溃最多导致扇区泄漏, 不会导致同一扇区被分配两次.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::{
    layout::DiskInode, BufferCache, FsError, Result, BLOCK_BITS, BLOCK_SIZE, FREE_MAP_SECTOR,
};

struct FreeMapInner {
    /// 每个 u64 打包了一组 64 bits
    bits: Vec<u64>,
    total: usize,
    free: usize,
    /// 位图文件的数据扇区, 按文件内顺序排列; 为空表示尚未挂接文件
    backing: Vec<u32>,
}

impl FreeMapInner {
    fn get(&self, bit: usize) -> bool {
        let (pos, inner) = decomposition(bit);
        self.bits[pos] & (1u64 << inner) != 0
    }

    fn set(&mut self, bit: usize, value: bool) {
        let (pos, inner) = decomposition(bit);
        if value {
            self.bits[pos] |= 1u64 << inner;
        } else {
            self.bits[pos] &= !(1u64 << inner);
        }
    }

    /// 首次适配: 找到第一段长度为 count 的连续空闲 bit
    fn find_run(&self, count: usize) -> Option<usize> {
        let mut start = 0;
        let mut run = 0;
        let mut bit = 0;
        while bit < self.total {
            // 整组都已分配时直接跳过这 64 bits
            if bit % 64 == 0 && self.bits[bit / 64] == u64::MAX {
                bit += 64;
                run = 0;
                continue;
            }
            if self.get(bit) {
                run = 0;
            } else {
                if run == 0 {
                    start = bit;
                }
                run += 1;
                if run == count {
                    return Some(start);
                }
            }
            bit += 1;
        }
        None
    }

    /// 位图的字节形式, 长度为 ceil(total / 8)
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.bits.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.truncate(bitmap_bytes(self.total));
        bytes
    }
}

/// 将 bit 编号分解为组编号 bits64_pos 以及组内编号 inner_pos
fn decomposition(bit: usize) -> (usize, usize) {
    (bit / 64, bit % 64)
}

/// 管理 total 个扇区的位图需要多少字节
pub fn bitmap_bytes(total: usize) -> usize {
    (total + 7) / 8
}

pub struct FreeMap {
    cache: Arc<BufferCache>,
    inner: spin::Mutex<FreeMapInner>,
    /// 串行化 "取快照 + 写回", 较旧的快照不会覆盖较新的
    persist_lock: Mutex<()>,
}

impl FreeMap {
    /// 所有扇区都空闲的位图, 尚未挂接持久化文件
    pub fn new(cache: Arc<BufferCache>, total: usize) -> Self {
        Self {
            cache,
            inner: spin::Mutex::new(FreeMapInner {
                bits: vec![0; (total + 63) / 64],
                total,
                free: total,
                backing: Vec::new(),
            }),
            persist_lock: Mutex::new(()),
        }
    }

    /// 只在内存中把扇区标记为已分配 (格式化时预留固定区域用)
    pub fn reserve(&self, sector: u32) {
        let mut inner = self.inner.lock();
        assert!((sector as usize) < inner.total);
        if !inner.get(sector as usize) {
            inner.set(sector as usize, true);
            inner.free -= 1;
        }
    }

    /// 以 inode 所描述的文件作为位图的持久化副本
    pub fn attach(&self, inode: &DiskInode) -> Result<()> {
        let mut inner = self.inner.lock();
        let needed = bitmap_bytes(inner.total);
        if (inode.size as usize) < needed {
            return Err(FsError::Format(format!(
                "free map file holds {} bytes, {} needed",
                inode.size, needed
            )));
        }
        let mut backing = Vec::new();
        for i in 0..DiskInode::data_blocks(needed) {
            match inode.get_block_id(i, &self.cache) {
                0 => return Err(FsError::Format(format!("free map file has a hole at block {}", i))),
                sector => backing.push(sector),
            }
        }
        inner.backing = backing;
        Ok(())
    }

    /// 从扇区 0 的 inode 找到位图文件并读入位图
    pub fn load_from_disk(cache: Arc<BufferCache>) -> Result<Self> {
        let total = cache.device().num_blocks();
        let inode = DiskInode::from_bytes(&cache.read(FREE_MAP_SECTOR))
            .ok_or(FsError::CorruptInode(FREE_MAP_SECTOR))?;
        let map = Self::new(cache, total);
        map.attach(&inode)?;
        let backing = map.inner.lock().backing.clone();
        let mut bytes = Vec::with_capacity(backing.len() * BLOCK_SIZE);
        for sector in backing {
            bytes.extend_from_slice(&map.cache.read(sector));
        }
        bytes.truncate(bitmap_bytes(total));
        {
            let mut inner = map.inner.lock();
            bytes.resize(inner.bits.len() * 8, 0);
            for (i, word) in inner.bits.iter_mut().enumerate() {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
                *word = u64::from_le_bytes(raw);
            }
            // 末尾多余的 bit 不代表任何扇区
            if total % 64 != 0 {
                if let Some(last) = inner.bits.last_mut() {
                    *last &= (1u64 << (total % 64)) - 1;
                }
            }
            let used: usize = inner.bits.iter().map(|w| w.count_ones() as usize).sum();
            inner.free = total - used;
            debug!("free map: loaded, {} of {} sectors free", inner.free, total);
        }
        Ok(map)
    }

    /// 把位图整体写回位图文件
    pub fn persist_to_disk(&self) -> Result<()> {
        if self.inner.lock().backing.is_empty() {
            return Err(FsError::Format("free map has no backing file".into()));
        }
        self.persist(0, self.total());
        Ok(())
    }

    /// 写回覆盖 [first, first + count) 这些 bit 的位图扇区. 未挂接文件时什么也不做
    fn persist(&self, first: usize, count: usize) {
        let _guard = self.persist_lock.lock().unwrap();
        let (bytes, backing) = {
            let inner = self.inner.lock();
            if inner.backing.is_empty() || count == 0 {
                return;
            }
            (inner.to_bytes(), inner.backing.clone())
        };
        let first_block = first / BLOCK_BITS;
        let last_block = (first + count - 1) / BLOCK_BITS;
        for (block, &sector) in backing.iter().enumerate().take(last_block + 1).skip(first_block) {
            let mut data = [0u8; BLOCK_SIZE];
            let start = block * BLOCK_SIZE;
            let end = bytes.len().min(start + BLOCK_SIZE);
            data[..end - start].copy_from_slice(&bytes[start..end]);
            self.cache.write(sector, 0, &data);
            self.cache.flush_sector(sector);
        }
    }

    /// 分配 count 个连续扇区, 返回第一个扇区号
    pub fn allocate(&self, count: usize) -> Result<u32> {
        assert!(count > 0);
        let start = {
            let mut inner = self.inner.lock();
            let start = match inner.find_run(count) {
                Some(start) => start,
                None => {
                    warn!("free map: no run of {} free sectors", count);
                    return Err(FsError::NoSpace);
                }
            };
            for bit in start..start + count {
                inner.set(bit, true);
            }
            inner.free -= count;
            start
        };
        self.persist(start, count);
        Ok(start as u32)
    }

    pub fn allocate_one(&self) -> Result<u32> {
        self.allocate(1)
    }

    /// 释放 [sector, sector + count). 释放一个未分配的扇区是不变式被破坏
    pub fn release(&self, sector: u32, count: usize) {
        {
            let mut inner = self.inner.lock();
            let start = sector as usize;
            for bit in start..start + count {
                assert!(inner.get(bit), "releasing free sector {}", bit);
                inner.set(bit, false);
            }
            inner.free += count;
        }
        self.persist(sector as usize, count);
    }

    pub fn is_allocated(&self, sector: u32) -> bool {
        let inner = self.inner.lock();
        (sector as usize) < inner.total && inner.get(sector as usize)
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free
    }

    pub fn total(&self) -> usize {
        self.inner.lock().total
    }
}
