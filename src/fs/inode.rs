//! 内存中的索引节点 [`Inode`] 与打开表 [`InodeTable`]
//!
//! DiskInode 放在磁盘上固定的扇区中, 而 Inode 是放在内存中记录索引节点信息的数据结构.
//! 同一扇区的多次 open 共享同一个 Inode (引用计数), 最后一次 close 时它被移出打开表,
//! 若已被标记删除, 它占用的所有扇区 (数据块, 索引块以及 inode 自身) 都会归还给空闲位图.
//!
//! 对 inode 元数据, 索引块和文件数据的每一次修改都先写日志, 日志刷盘之后才作用到缓存上.
//!
//! 锁的顺序: 打开表 -> inode. 打开表与引用计数使用 spin 锁, 只保护很短的临界区;
//! 持有 inode 的 DiskInode 锁期间可能发生设备 I/O, 所以它是 std 的 Mutex.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, error, info, warn};

use super::{
    layout::{read_index_entry, DiskInode, InodeKind},
    BufferCache, FreeMap, FsError, Result, Transaction, Wal, BLOCK_SIZE, INDIRECT1_BOUND,
    INDIRECT2_BOUND, INODE_DIRECT_COUNT, INODE_INDIRECT1_COUNT, MAX_FILE_SIZE, WRITE_BATCH_SECTORS,
};

/// 在一个事务中对扇区做带日志的修改
struct TxnWriter<'a> {
    cache: &'a BufferCache,
    wal: &'a Wal,
    free_map: &'a FreeMap,
    txn: &'a Transaction<'a>,
}

impl<'a> TxnWriter<'a> {
    /// 只记录真正发生变化的字节, 日志刷盘后再写缓存
    fn logged_write(&self, sector: u32, offset: usize, data: &[u8]) -> Result<()> {
        let before = self.cache.read_partial(sector, offset, data.len());
        let lo = match before.iter().zip(data).position(|(a, b)| a != b) {
            Some(lo) => lo,
            None => return Ok(()),
        };
        let hi = data.len()
            - before
                .iter()
                .zip(data)
                .rev()
                .position(|(a, b)| a != b)
                .unwrap_or(0);
        let lsn = self
            .wal
            .log_write(self.txn, sector, offset + lo, &before[lo..hi], &data[lo..hi])?;
        self.wal.flush(lsn);
        self.cache.write(sector, offset + lo, &data[lo..hi]);
        Ok(())
    }

    fn write_inode(&self, sector: u32, disk: &DiskInode) -> Result<()> {
        self.logged_write(sector, 0, &disk.to_bytes())
    }

    /// 分配一个扇区并清零
    fn fresh_sector(&self) -> Result<u32> {
        let sector = self.free_map.allocate_one()?;
        self.logged_write(sector, 0, &[0u8; BLOCK_SIZE])?;
        Ok(sector)
    }

    /// 索引块 table 中第 index 项, 为 0 时分配一个新扇区并登记
    fn ensure_entry(&self, table: u32, index: usize) -> Result<u32> {
        match read_index_entry(self.cache, table, index) {
            0 => {
                let sector = self.fresh_sector()?;
                self.logged_write(table, index * 4, &sector.to_le_bytes())?;
                Ok(sector)
            }
            sector => Ok(sector),
        }
    }

    /// 返回第 inner_id 个数据块的扇区号, 缺少的索引块和数据块按需分配
    fn ensure_block(&self, disk: &mut DiskInode, inner_id: usize) -> Result<u32> {
        if inner_id < INODE_DIRECT_COUNT {
            if disk.direct[inner_id] == 0 {
                disk.direct[inner_id] = self.fresh_sector()?;
            }
            Ok(disk.direct[inner_id])
        } else if inner_id < INDIRECT1_BOUND {
            if disk.indirect1 == 0 {
                disk.indirect1 = self.fresh_sector()?;
            }
            self.ensure_entry(disk.indirect1, inner_id - INODE_DIRECT_COUNT)
        } else if inner_id < INDIRECT2_BOUND {
            if disk.indirect2 == 0 {
                disk.indirect2 = self.fresh_sector()?;
            }
            let last = inner_id - INDIRECT1_BOUND;
            let indirect1 = self.ensure_entry(disk.indirect2, last / INODE_INDIRECT1_COUNT)?;
            self.ensure_entry(indirect1, last % INODE_INDIRECT1_COUNT)
        } else {
            Err(FsError::FileTooLarge((inner_id + 1) * BLOCK_SIZE))
        }
    }
}

#[derive(Default)]
struct OpenState {
    open_count: usize,
    removed: bool,
    deny_write: usize,
}

pub struct Inode {
    /// inode 所在扇区, 同时也是它的编号
    sector: u32,
    state: spin::Mutex<OpenState>,
    disk: Mutex<DiskInode>,
    cache: Arc<BufferCache>,
    wal: Arc<Wal>,
    free_map: Arc<FreeMap>,
}

impl Inode {
    fn new(sector: u32, disk: DiskInode, table: &InodeTable) -> Self {
        Self {
            sector,
            state: spin::Mutex::new(OpenState::default()),
            disk: Mutex::new(disk),
            cache: Arc::clone(&table.cache),
            wal: Arc::clone(&table.wal),
            free_map: Arc::clone(&table.free_map),
        }
    }

    /// 获取 inode 锁, 并用缓存中的版本刷新内存副本
    /// (中止的事务会经由缓存回滚 inode 扇区)
    fn lock_disk(&self) -> MutexGuard<'_, DiskInode> {
        let mut disk = self.disk.lock().unwrap();
        match DiskInode::from_bytes(&self.cache.read(self.sector)) {
            Some(fresh) => *disk = fresh,
            None => error!("inode {}: on-disk copy is corrupt, using memory copy", self.sector),
        }
        disk
    }

    fn writer<'a>(&'a self, txn: &'a Transaction<'a>) -> TxnWriter<'a> {
        TxnWriter {
            cache: &self.cache,
            wal: &self.wal,
            free_map: &self.free_map,
            txn,
        }
    }

    pub fn inumber(&self) -> u32 {
        self.sector
    }

    pub fn length(&self) -> usize {
        self.lock_disk().size as usize
    }

    pub fn kind(&self) -> InodeKind {
        self.lock_disk().kind
    }

    pub fn is_dir(&self) -> bool {
        self.lock_disk().is_dir()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// 文件内偏移 offset 所在的扇区
    pub fn byte_to_sector(&self, offset: usize) -> Option<u32> {
        self.lock_disk().byte_to_sector(offset, &self.cache)
    }

    /// 标记删除, 扇区在最后一个打开者关闭时释放
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// 禁止写入, 计数不超过打开者数量
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        if state.deny_write < state.open_count {
            state.deny_write += 1;
        }
    }

    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        if state.deny_write == 0 {
            error!("inode {}: allow_write without deny_write", self.sector);
            return;
        }
        state.deny_write -= 1;
    }

    fn write_denied(&self) -> bool {
        self.state.lock().deny_write > 0
    }

    /// 从 offset 开始读, 返回实际读到的字节数 (到文件末尾为止)
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let disk = self.lock_disk();
        let size = disk.size as usize;
        let end = size.min(offset.saturating_add(buf.len()));
        let mut pos = offset;
        while pos < end {
            let sector = match disk.byte_to_sector(pos, &self.cache) {
                Some(sector) => sector,
                None => break,
            };
            let in_block = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - in_block).min(end - pos);
            let data = self.cache.read_partial(sector, in_block, n);
            buf[pos - offset..pos - offset + n].copy_from_slice(&data);
            pos += n;
        }
        // 预读下一个扇区
        if pos > offset {
            let next = (pos - 1) / BLOCK_SIZE * BLOCK_SIZE + BLOCK_SIZE;
            if let Some(sector) = disk.byte_to_sector(next, &self.cache) {
                self.cache.prefetch(sector);
            }
        }
        pos.saturating_sub(offset)
    }

    /// 在 inode 锁内扩展并写入数据. 分配失败时写到最后一个成功分配的扇区为止
    fn write_locked(
        &self,
        writer: &TxnWriter,
        disk: &mut DiskInode,
        buf: &[u8],
        offset: usize,
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset >= MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge(offset.saturating_add(buf.len())));
        }
        let end = (offset + buf.len()).min(MAX_FILE_SIZE);
        let before = disk.clone();
        let size = disk.size as usize;

        let mut limit = end;
        if end > size {
            for block in DiskInode::data_blocks(size)..DiskInode::data_blocks(end) {
                match writer.ensure_block(disk, block) {
                    Ok(_) => {}
                    Err(FsError::NoSpace) => {
                        warn!("inode {}: device full while extending to {} bytes", self.sector, end);
                        limit = block * BLOCK_SIZE;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut pos = offset;
        while pos < limit {
            let sector = disk.get_block_id(pos / BLOCK_SIZE, &self.cache);
            if sector == 0 {
                return Err(FsError::CorruptInode(self.sector));
            }
            let in_block = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - in_block).min(limit - pos);
            writer.logged_write(sector, in_block, &buf[pos - offset..pos - offset + n])?;
            pos += n;
        }

        // 长度在所有扇区都分配并写好之后才更新
        if limit > offset && limit > size {
            disk.size = limit as u32;
        }
        if *disk != before {
            writer.write_inode(self.sector, disk)?;
        }
        Ok(limit.saturating_sub(offset))
    }

    /// 从 offset 开始写, 文件按需扩展. 每 8 个扇区一个事务, 每个事务提交后检查是否需要检查点.
    /// 返回实际写入的字节数; 禁止写入时返回 0
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        if self.write_denied() {
            return 0;
        }
        let mut disk = self.lock_disk();
        let mut written = 0;
        while written < buf.len() {
            let pos = offset + written;
            let batch_end = (pos / BLOCK_SIZE + WRITE_BATCH_SECTORS).saturating_mul(BLOCK_SIZE);
            let len = (buf.len() - written).min(batch_end - pos);
            let txn = self.wal.begin_transaction();
            let result = self.write_locked(
                &self.writer(&txn),
                &mut disk,
                &buf[written..written + len],
                pos,
            );
            match result {
                Ok(n) => {
                    if let Err(e) = self.wal.commit(txn) {
                        error!("inode {}: commit failed: {}", self.sector, e);
                        break;
                    }
                    written += n;
                    self.wal.checkpoint_if_pending();
                    if n < len {
                        break;
                    }
                }
                Err(e) => {
                    error!("inode {}: write at {} failed: {}", self.sector, pos, e);
                    let _ = self.wal.abort(txn);
                    break;
                }
            }
        }
        written
    }

    /// 在调用者的事务中写入, 提交或中止由调用者负责
    pub fn write_at_in(&self, txn: &Transaction, buf: &[u8], offset: usize) -> Result<usize> {
        if self.write_denied() {
            return Ok(0);
        }
        let mut disk = self.lock_disk();
        self.write_locked(&self.writer(txn), &mut disk, buf, offset)
    }

    /// 释放所有数据块与索引块, inode 恢复为空文件
    fn truncate_to_empty(&self) -> Result<()> {
        let mut disk = self.lock_disk();
        let blocks = disk.collect_blocks(&self.cache);
        let empty = DiskInode::new(disk.kind);
        let txn = self.wal.begin_transaction();
        self.writer(&txn).write_inode(self.sector, &empty)?;
        self.wal.commit(txn)?;
        *disk = empty;
        // inode 已经不再引用它们之后再释放
        for sector in blocks {
            self.free_map.release(sector, 1);
        }
        Ok(())
    }

    /// 归还全部扇区, 包括 inode 自身所在扇区
    fn release_all(&self) {
        let disk = self.lock_disk();
        let blocks = disk.collect_blocks(&self.cache);
        for &sector in blocks.iter() {
            self.free_map.release(sector, 1);
        }
        self.free_map.release(self.sector, 1);
        info!(
            "inode {}: removed, {} sectors released",
            self.sector,
            blocks.len() + 1
        );
    }
}

/// 打开的 inode 表. 同一扇区只会有一个 Inode 实例
pub struct InodeTable {
    cache: Arc<BufferCache>,
    wal: Arc<Wal>,
    free_map: Arc<FreeMap>,
    open: spin::Mutex<BTreeMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    pub fn new(cache: Arc<BufferCache>, wal: Arc<Wal>, free_map: Arc<FreeMap>) -> Self {
        Self {
            cache,
            wal,
            free_map,
            open: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// 在 sector 上创建一个长度为 length 字节 (内容全 0) 的 inode.
    /// sector 本身由调用者分配; 失败时已分配的数据扇区会被释放
    pub fn create(&self, sector: u32, length: usize, kind: InodeKind) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge(length));
        }
        let inode = Inode::new(sector, DiskInode::new(kind), self);
        {
            let txn = self.wal.begin_transaction();
            inode.writer(&txn).write_inode(sector, &DiskInode::new(kind))?;
            self.wal.commit(txn)?;
        }
        if length > 0 {
            let written = inode.write_at(&vec![0u8; length], 0);
            if written < length {
                warn!(
                    "inode {}: created with {} of {} bytes, rolling back",
                    sector, written, length
                );
                inode.truncate_to_empty()?;
                return Err(FsError::NoSpace);
            }
        }
        debug!("inode {}: created {:?} of {} bytes", sector, kind, length);
        Ok(())
    }

    /// 打开 sector 上的 inode; 已经打开时共享同一实例并增加引用计数
    pub fn open(&self, sector: u32) -> Result<Arc<Inode>> {
        if let Some(inode) = self.open.lock().get(&sector) {
            inode.state.lock().open_count += 1;
            return Ok(Arc::clone(inode));
        }
        // 读盘不能在持有打开表锁时进行
        let disk =
            DiskInode::from_bytes(&self.cache.read(sector)).ok_or(FsError::CorruptInode(sector))?;
        let fresh = Arc::new(Inode::new(sector, disk, self));
        let mut open = self.open.lock();
        let inode = Arc::clone(open.entry(sector).or_insert(fresh));
        inode.state.lock().open_count += 1;
        Ok(inode)
    }

    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        let _open = self.open.lock();
        inode.state.lock().open_count += 1;
        Arc::clone(inode)
    }

    /// 关闭一次. 最后一次关闭时移出打开表, 已删除的 inode 释放全部扇区
    pub fn close(&self, inode: Arc<Inode>) {
        let removed = {
            let mut open = self.open.lock();
            let mut state = inode.state.lock();
            assert!(state.open_count > 0, "closing inode {} twice", inode.sector);
            state.open_count -= 1;
            if state.open_count > 0 {
                return;
            }
            state.deny_write = 0;
            open.remove(&inode.sector);
            state.removed
        };
        if removed {
            inode.release_all();
        }
    }

    /// 当前打开的 inode 编号
    pub fn open_inodes(&self) -> Vec<u32> {
        self.open.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::fs::{BlockDevice, EvictionPolicy, WalGeometry, DEFAULT_LOG_SECTORS};
    use rand::{Rng, SeedableRng};

    const DIRECT_END: usize = INODE_DIRECT_COUNT * BLOCK_SIZE;

    struct Fixture {
        disk: Arc<MemDisk>,
        wal: Arc<Wal>,
        free_map: Arc<FreeMap>,
        table: InodeTable,
    }

    fn table_on(disk: Arc<MemDisk>, fresh: bool) -> Fixture {
        let blocks = disk.num_blocks();
        let cache = BufferCache::new(disk.clone(), EvictionPolicy::Clock);
        let wal = Arc::new(Wal::new(cache.clone(), WalGeometry::new(DEFAULT_LOG_SECTORS)));
        wal.init(fresh).unwrap();
        let free_map = Arc::new(FreeMap::new(cache.clone(), blocks));
        for s in 0..wal.geometry().data_start() {
            free_map.reserve(s);
        }
        let table = InodeTable::new(cache, wal.clone(), free_map.clone());
        Fixture {
            disk,
            wal,
            free_map,
            table,
        }
    }

    fn fixture(blocks: usize) -> Fixture {
        table_on(Arc::new(MemDisk::new(blocks)), true)
    }

    fn new_file(f: &Fixture, length: usize) -> Arc<Inode> {
        let sector = f.free_map.allocate_one().unwrap();
        f.table.create(sector, length, InodeKind::File).unwrap();
        f.table.open(sector).unwrap()
    }

    #[test]
    fn addresses_route_through_each_level() {
        let f = fixture(4096);
        let length = (INDIRECT1_BOUND + 1) * BLOCK_SIZE;
        let inode = new_file(&f, length);
        assert_eq!(inode.length(), length);
        let offsets = [0, DIRECT_END - 1, DIRECT_END, INDIRECT1_BOUND * BLOCK_SIZE];
        let sectors: Vec<u32> = offsets
            .iter()
            .map(|&o| inode.byte_to_sector(o).unwrap())
            .collect();
        for (i, s) in sectors.iter().enumerate() {
            assert!(f.free_map.is_allocated(*s));
            assert!(*s >= f.wal.geometry().data_start());
            for t in sectors.iter().skip(i + 1) {
                assert_ne!(s, t);
            }
        }
        assert_eq!(inode.byte_to_sector(length), None);
        // 141 个数据块, 一级索引块, 二级索引块和它下挂的一个一级索引块, 再加 inode 自身
        let used = f.free_map.total() - f.free_map.free_count();
        assert_eq!(used as u32, f.wal.geometry().data_start() + 141 + 3 + 1);
        f.table.close(inode);
    }

    #[test]
    fn write_then_read_across_levels() {
        let f = fixture(4096);
        let inode = new_file(&f, 0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..70_000).map(|_| rng.gen()).collect();
        let offset = 3000;
        assert_eq!(inode.write_at(&data, offset), data.len());
        assert_eq!(inode.length(), offset + data.len());

        let mut back = vec![0xAAu8; offset + data.len() + 100];
        assert_eq!(inode.read_at(&mut back, 0), offset + data.len());
        assert!(back[..offset].iter().all(|&b| b == 0));
        assert_eq!(&back[offset..offset + data.len()], &data[..]);
        assert!(f.wal.active_transactions().is_empty());

        let mut tail = [0u8; 10];
        assert_eq!(inode.read_at(&mut tail, inode.length()), 0);
    }

    #[test]
    fn deny_write_is_capped_by_openers() {
        let f = fixture(4096);
        let a = new_file(&f, 0);
        let b = f.table.reopen(&a);
        for _ in 0..3 {
            a.deny_write();
        }
        assert_eq!(a.write_at(b"hello", 0), 0);
        assert_eq!(a.length(), 0);
        b.allow_write();
        assert_eq!(b.write_at(b"hello", 0), 0);
        a.allow_write();
        assert_eq!(b.write_at(b"hello", 0), 5);
        f.table.close(b);
        f.table.close(a);
    }

    #[test]
    fn unbalanced_allow_write_is_ignored() {
        let f = fixture(4096);
        let a = new_file(&f, 0);
        a.allow_write();
        a.deny_write();
        assert_eq!(a.write_at(b"x", 0), 0);
        a.allow_write();
        a.allow_write();
        assert_eq!(a.write_at(b"x", 0), 1);
        f.table.close(a);
    }

    #[test]
    fn read_at_or_past_end_returns_nothing() {
        let f = fixture(4096);
        let inode = new_file(&f, 0);
        assert_eq!(inode.write_at(b"0123456789", 0), 10);
        let mut buf = [0u8; 8];
        assert_eq!(inode.read_at(&mut buf, 10), 0);
        assert_eq!(inode.read_at(&mut buf, 4096), 0);
        assert_eq!(inode.read_at(&mut buf, usize::MAX - 2), 0);
        assert_eq!(inode.read_at(&mut buf, 6), 4);
        assert_eq!(&buf[..4], b"6789");
        // 超出最大文件长度的写入什么也不做
        assert_eq!(inode.write_at(b"abc", usize::MAX - 1), 0);
        assert_eq!(inode.length(), 10);
        f.table.close(inode);
    }

    #[test]
    fn opens_share_one_inode() {
        let f = fixture(4096);
        let a = new_file(&f, 100);
        let b = f.table.open(a.inumber()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.open_count(), 2);
        assert_eq!(f.table.open_inodes(), vec![a.inumber()]);
        f.table.close(b);
        assert_eq!(a.open_count(), 1);
        f.table.close(a);
        assert!(f.table.open_inodes().is_empty());
    }

    #[test]
    fn removed_inode_frees_everything_on_last_close() {
        let f = fixture(4096);
        let free = f.free_map.free_count();
        let inode = new_file(&f, 0);
        assert_eq!(inode.write_at(&vec![1u8; 200 * BLOCK_SIZE], 0), 200 * BLOCK_SIZE);
        let other = f.table.reopen(&inode);
        inode.remove();
        f.table.close(inode);
        assert!(other.is_removed());
        assert!(f.free_map.free_count() < free);
        let sector = other.inumber();
        f.table.close(other);
        assert_eq!(f.free_map.free_count(), free);
        assert!(!f.free_map.is_allocated(sector));
    }

    #[test]
    fn full_device_gives_short_write() {
        let f = fixture(DEFAULT_LOG_SECTORS as usize + 200);
        let inode = new_file(&f, 0);
        let want = 400 * BLOCK_SIZE;
        let written = inode.write_at(&vec![9u8; want], 0);
        assert!(written > 0 && written < want);
        assert_eq!(written % BLOCK_SIZE, 0);
        assert_eq!(inode.length(), written);
        assert_eq!(f.free_map.free_count(), 0);
        assert!(f.wal.active_transactions().is_empty());
    }

    #[test]
    fn create_rolls_back_when_device_is_full() {
        let f = fixture(DEFAULT_LOG_SECTORS as usize + 100);
        let sector = f.free_map.allocate_one().unwrap();
        let free = f.free_map.free_count();
        assert!(matches!(
            f.table.create(sector, 200 * BLOCK_SIZE, InodeKind::File),
            Err(FsError::NoSpace)
        ));
        assert_eq!(f.free_map.free_count(), free);
        assert_eq!(f.table.open(sector).unwrap().length(), 0);
    }

    #[test]
    fn aborted_caller_transaction_rolls_back() {
        let f = fixture(4096);
        let inode = new_file(&f, 0);
        assert_eq!(inode.write_at(b"keep", 0), 4);
        let txn = f.wal.begin_transaction();
        assert_eq!(inode.write_at_in(&txn, &vec![5u8; 3000], 2).unwrap(), 3000);
        assert_eq!(inode.length(), 3002);
        f.wal.abort(txn).unwrap();
        assert_eq!(inode.length(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(inode.read_at(&mut buf, 0), 4);
        assert_eq!(&buf[..4], b"keep");
    }

    #[test]
    fn committed_write_survives_crash() {
        let f = fixture(4096);
        let inode = new_file(&f, 0);
        let data: Vec<u8> = (0..20 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        assert_eq!(inode.write_at(&data, 0), data.len());
        let sector = inode.inumber();

        let image = Arc::new(f.disk.snapshot());
        let g = table_on(image, false);
        let inode = g.table.open(sector).unwrap();
        assert_eq!(inode.length(), data.len());
        let mut back = vec![0u8; data.len()];
        assert_eq!(inode.read_at(&mut back, 0), data.len());
        assert_eq!(back, data);
    }
}
