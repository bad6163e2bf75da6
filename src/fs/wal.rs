//! 预写日志 (WAL) 层.
//!
//! 对扇区的每一次修改都先以 "前像 + 后像" 的形式写入日志, 再真正作用到数据上.
//! 日志区是磁盘上固定大小的环形区域, LSN 为 n 的记录存放在
//! `log_start + (n - 1) % log_sectors` 号扇区中.
//!
//! - 追加记录只写内存缓冲区, 缓冲区满时先刷盘;
//! - 提交时强制把日志刷到 Commit 记录为止, 这是持久化点;
//! - 中止时按 LSN 逆序经由缓存回放前像;
//! - 挂载时若元数据扇区显示上次非正常关闭, 则执行 分析 / 重做 / 撤销 三阶段恢复.
//!
//! 日志记录总是绕过缓存直接写设备. 所有状态修改都在一把 spin 锁内完成,
//! 刷盘的设备 I/O 在锁外进行.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};

use super::{
    layout::{DataBlock, LogRecord, RecordKind, WalMeta},
    BufferCache, FsError, Result, BLOCK_SIZE, DEFAULT_LOG_SECTORS, LOG_BUFFER_RECORDS,
    LOG_PAYLOAD_SIZE, LOG_START_SECTOR,
};

pub type Lsn = u64;
pub type TxnId = u32;

/// 日志区在磁盘上的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalGeometry {
    pub log_start: u32,
    pub log_sectors: u32,
}

impl Default for WalGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SECTORS)
    }
}

impl WalGeometry {
    pub fn new(log_sectors: u32) -> Self {
        assert!(log_sectors > 0);
        Self {
            log_start: LOG_START_SECTOR,
            log_sectors,
        }
    }

    /// 元数据扇区紧跟在日志区之后
    pub fn meta_sector(&self) -> u32 {
        self.log_start + self.log_sectors
    }

    /// 通用分配区的第一个扇区
    pub fn data_start(&self) -> u32 {
        self.meta_sector() + 1
    }

    pub fn slot(&self, lsn: Lsn) -> u32 {
        self.log_start + ((lsn - 1) % self.log_sectors as u64) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug)]
struct TxnInfo {
    begin_lsn: Lsn,
    last_lsn: Lsn,
}

struct WalState {
    next_lsn: Lsn,
    flushed_lsn: Lsn,
    next_txn: TxnId,
    buffer: Vec<LogRecord>,
    active: BTreeMap<TxnId, TxnInfo>,
    checkpoint_lsn: Lsn,
    checkpoint_pending: bool,
}

impl WalState {
    fn fresh() -> Self {
        let meta = WalMeta::fresh();
        Self {
            next_lsn: meta.last_lsn,
            flushed_lsn: meta.last_lsn - 1,
            next_txn: meta.last_txn,
            buffer: Vec::with_capacity(LOG_BUFFER_RECORDS),
            active: BTreeMap::new(),
            checkpoint_lsn: 0,
            checkpoint_pending: false,
        }
    }
}

/// 一次恢复的统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 校验通过的记录数
    pub records: usize,
    /// 被跳过的损坏记录数
    pub skipped: usize,
    pub committed: usize,
    pub aborted: usize,
    /// 崩溃时仍未结束的事务, 恢复后它们被补记为 Abort
    pub losers: Vec<TxnId>,
    pub redone: usize,
    pub undone: usize,
    pub next_lsn: Lsn,
}

/// 活跃事务的句柄. 既未提交也未中止就被丢弃时会自动中止
pub struct Transaction<'w> {
    wal: &'w Wal,
    id: TxnId,
    done: bool,
}

impl Transaction<'_> {
    pub fn id(&self) -> TxnId {
        self.id
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && !std::thread::panicking() {
            warn!("wal: transaction {} dropped while active, aborting", self.id);
            let _ = self.wal.abort_id(self.id);
        }
    }
}

pub struct Wal {
    cache: Arc<BufferCache>,
    geometry: WalGeometry,
    state: spin::Mutex<WalState>,
    /// 串行化刷盘, 保证 flushed_lsn 之前的记录确实都已落盘
    flush_lock: Mutex<()>,
}

impl Wal {
    pub fn new(cache: Arc<BufferCache>, geometry: WalGeometry) -> Self {
        Self {
            cache,
            geometry,
            state: spin::Mutex::new(WalState::fresh()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn geometry(&self) -> WalGeometry {
        self.geometry
    }

    /// 挂载时调用. fresh 表示刚格式化; 否则读取元数据并在需要时恢复
    pub fn init(&self, fresh: bool) -> Result<Option<RecoveryReport>> {
        let blocks = self.cache.device().num_blocks();
        if self.geometry.data_start() as usize >= blocks {
            return Err(FsError::DeviceTooSmall(blocks));
        }
        if fresh {
            self.reset();
            self.write_meta(false);
            info!("wal: fresh log of {} sectors", self.geometry.log_sectors);
            return Ok(None);
        }
        let report = match self.meta() {
            None => {
                warn!("wal: metadata sector has no valid magic, reinitializing log");
                self.reset();
                None
            }
            Some(meta) => {
                {
                    let mut state = self.state.lock();
                    state.next_lsn = meta.last_lsn.max(1);
                    state.flushed_lsn = state.next_lsn - 1;
                    state.checkpoint_lsn = state.flushed_lsn;
                    state.next_txn = meta.last_txn.max(1);
                }
                if meta.clean {
                    info!("wal: clean shutdown detected, next lsn {}", meta.last_lsn);
                    None
                } else {
                    Some(self.recover())
                }
            }
        };
        self.write_meta(false);
        Ok(report)
    }

    /// 清空日志区并把计数器归位
    pub fn reset(&self) {
        let _flush = self.flush_lock.lock().unwrap();
        let device = self.cache.device();
        let zero = [0u8; BLOCK_SIZE];
        for i in 0..self.geometry.log_sectors {
            device.write_block((self.geometry.log_start + i) as usize, &zero);
        }
        *self.state.lock() = WalState::fresh();
    }

    /// 从设备读取元数据扇区
    pub fn meta(&self) -> Option<WalMeta> {
        let mut raw: DataBlock = [0; BLOCK_SIZE];
        self.cache
            .device()
            .read_block(self.geometry.meta_sector() as usize, &mut raw);
        WalMeta::decode(&raw)
    }

    fn write_meta(&self, clean: bool) {
        let meta = {
            let state = self.state.lock();
            WalMeta {
                clean,
                last_lsn: state.next_lsn,
                last_txn: state.next_txn,
            }
        };
        self.cache
            .device()
            .write_block(self.geometry.meta_sector() as usize, &meta.encode());
    }

    /// 分配 LSN 并追加到内存缓冲区, 缓冲区满时先刷盘
    fn append(&self, txn_id: TxnId, build: impl Fn(Lsn) -> LogRecord) -> Lsn {
        loop {
            {
                let mut state = self.state.lock();
                if state.buffer.len() < LOG_BUFFER_RECORDS {
                    let lsn = state.next_lsn;
                    state.next_lsn += 1;
                    state.buffer.push(build(lsn));
                    if let Some(info) = state.active.get_mut(&txn_id) {
                        if info.begin_lsn == 0 {
                            info.begin_lsn = lsn;
                        }
                        info.last_lsn = lsn;
                    }
                    // 只打标记, 真正的检查点由外层安全的调用点执行
                    let used = lsn - state.checkpoint_lsn;
                    if !state.checkpoint_pending && used * 4 > self.geometry.log_sectors as u64 * 3 {
                        state.checkpoint_pending = true;
                        debug!("wal: checkpoint pending at lsn {}", lsn);
                    }
                    return lsn;
                }
            }
            self.flush(Lsn::MAX);
        }
    }

    pub fn begin_transaction(&self) -> Transaction<'_> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_txn;
            state.next_txn += 1;
            state.active.insert(
                id,
                TxnInfo {
                    begin_lsn: 0,
                    last_lsn: 0,
                },
            );
            id
        };
        self.append(id, |lsn| LogRecord::control(lsn, id, RecordKind::Begin));
        Transaction {
            wal: self,
            id,
            done: false,
        }
    }

    fn ensure_active(&self, id: TxnId) -> Result<TxnInfo> {
        self.state
            .lock()
            .active
            .get(&id)
            .copied()
            .ok_or(FsError::InactiveTransaction(id))
    }

    /// 记录一次对 `sector` 的 [offset, offset + before.len()) 的修改.
    /// 大于一条记录容量的修改会被拆成多条记录, 返回最后一条的 LSN.
    ///
    /// 调用者在把修改作用到缓存之前应先 `flush` 到返回的 LSN,
    /// 这样脏页被写回时它的撤销信息一定已经在磁盘上.
    pub fn log_write(
        &self,
        txn: &Transaction,
        sector: u32,
        offset: usize,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        if before.len() != after.len() || offset + after.len() > BLOCK_SIZE {
            return Err(FsError::InvalidRange {
                sector,
                offset,
                length: after.len(),
            });
        }
        let mut last = self.ensure_active(txn.id)?.last_lsn;
        let mut done = 0;
        while done < after.len() {
            let len = (after.len() - done).min(LOG_PAYLOAD_SIZE);
            let (b, a) = (&before[done..done + len], &after[done..done + len]);
            let chunk_offset = offset + done;
            last = self.append(txn.id, |lsn| {
                LogRecord::write(lsn, txn.id, sector, chunk_offset, b, a)
            });
            done += len;
        }
        Ok(last)
    }

    /// 提交事务: 追加 Commit 记录并强制刷盘后才返回
    pub fn commit(&self, mut txn: Transaction) -> Result<Lsn> {
        txn.done = true;
        self.ensure_active(txn.id)?;
        let id = txn.id;
        let lsn = self.append(id, |lsn| LogRecord::control(lsn, id, RecordKind::Commit));
        self.flush(lsn);
        self.state.lock().active.remove(&id);
        debug!("wal: txn {} committed at lsn {}", id, lsn);
        Ok(lsn)
    }

    /// 中止事务: 按 LSN 逆序经缓存回放前像
    pub fn abort(&self, mut txn: Transaction) -> Result<()> {
        txn.done = true;
        self.abort_id(txn.id)
    }

    fn abort_id(&self, id: TxnId) -> Result<()> {
        let info = self.ensure_active(id)?;
        // 先刷盘, 之后才能从磁盘上扫描到本事务的记录
        self.flush(Lsn::MAX);
        let head = self.state.lock().next_lsn - 1;
        let oldest = head.saturating_sub(self.geometry.log_sectors as u64) + 1;
        if info.begin_lsn < oldest {
            warn!(
                "wal: txn {} began at lsn {} which the log has already overwritten",
                id, info.begin_lsn
            );
        }
        let writes: Vec<LogRecord> = (info.begin_lsn.max(oldest)..=head)
            .filter_map(|lsn| self.read_slot(lsn))
            .filter(|rec| rec.txn_id == id && rec.kind == RecordKind::Write)
            .collect();
        for rec in writes.iter().rev() {
            self.cache
                .write(rec.sector, rec.offset as usize, rec.before_image());
        }
        self.cache.flush_all();
        let lsn = self.append(id, |lsn| LogRecord::control(lsn, id, RecordKind::Abort));
        self.flush(lsn);
        self.state.lock().active.remove(&id);
        info!("wal: txn {} aborted, {} writes undone", id, writes.len());
        Ok(())
    }

    /// 读取并校验 LSN 对应的槽位; 槽位已被新记录覆盖时返回 None
    fn read_slot(&self, lsn: Lsn) -> Option<LogRecord> {
        let mut raw: DataBlock = [0; BLOCK_SIZE];
        self.cache
            .device()
            .read_block(self.geometry.slot(lsn) as usize, &mut raw);
        LogRecord::decode(&raw).filter(|rec| rec.lsn == lsn)
    }

    /// 把缓冲区中的记录直接写到它们在环形日志区的槽位上 (不经过缓存)
    pub fn flush(&self, up_to: Lsn) {
        let _flush = self.flush_lock.lock().unwrap();
        let records = {
            let mut state = self.state.lock();
            if state.flushed_lsn >= up_to || state.buffer.is_empty() {
                return;
            }
            std::mem::take(&mut state.buffer)
        };
        let device = self.cache.device();
        for rec in records.iter() {
            device.write_block(self.geometry.slot(rec.lsn) as usize, &rec.encode());
        }
        if let Some(last) = records.last() {
            let mut state = self.state.lock();
            state.flushed_lsn = state.flushed_lsn.max(last.lsn);
        }
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.state.lock().flushed_lsn
    }

    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    pub fn checkpoint_pending(&self) -> bool {
        self.state.lock().checkpoint_pending
    }

    pub fn active_transactions(&self) -> Vec<TxnId> {
        self.state.lock().active.keys().copied().collect()
    }

    /// 检查点: 日志与缓存全部落盘后写入 Checkpoint 记录
    pub fn checkpoint(&self) -> Lsn {
        self.flush(Lsn::MAX);
        self.cache.flush_all();
        let lsn = self.append(0, |lsn| LogRecord::control(lsn, 0, RecordKind::Checkpoint));
        self.flush(lsn);
        {
            let mut state = self.state.lock();
            state.checkpoint_lsn = lsn;
            state.checkpoint_pending = false;
        }
        info!("wal: checkpoint at lsn {}", lsn);
        lsn
    }

    /// 若日志使用量超过阈值则做一次检查点. 只能在没有持有任何引擎锁的地方调用
    pub fn checkpoint_if_pending(&self) -> bool {
        if self.checkpoint_pending() {
            self.checkpoint();
            true
        } else {
            false
        }
    }

    /// 分析 / 重做 / 撤销 三阶段恢复
    pub fn recover(&self) -> RecoveryReport {
        let device = self.cache.device();
        let mut report = RecoveryReport::default();

        // 分析: 扫描所有槽位, 校验失败的槽位当作空洞
        let mut records = Vec::new();
        for i in 0..self.geometry.log_sectors {
            let sector = self.geometry.log_start + i;
            let mut raw: DataBlock = [0; BLOCK_SIZE];
            device.read_block(sector as usize, &mut raw);
            match LogRecord::decode(&raw) {
                Some(rec) if self.geometry.slot(rec.lsn) == sector => records.push(rec),
                Some(_) => report.skipped += 1,
                None if raw.iter().any(|&b| b != 0) => {
                    warn!("wal: skipping corrupt record in slot {}", sector);
                    report.skipped += 1;
                }
                None => {}
            }
        }
        records.sort_by_key(|rec| rec.lsn);
        report.records = records.len();

        let mut txns: BTreeMap<TxnId, TxnState> = BTreeMap::new();
        let (mut max_lsn, mut max_txn) = (0, 0);
        for rec in records.iter() {
            max_lsn = max_lsn.max(rec.lsn);
            max_txn = max_txn.max(rec.txn_id);
            if rec.kind == RecordKind::Checkpoint {
                continue;
            }
            let state = txns.entry(rec.txn_id).or_insert(TxnState::Active);
            match rec.kind {
                RecordKind::Commit => *state = TxnState::Committed,
                RecordKind::Abort => *state = TxnState::Aborted,
                _ => {}
            }
        }
        let state_of = |id: TxnId| txns.get(&id).copied().unwrap_or(TxnState::Active);

        // 重做: 已提交事务的后像, LSN 升序
        for rec in records.iter() {
            if rec.kind == RecordKind::Write && state_of(rec.txn_id) == TxnState::Committed {
                self.cache
                    .write(rec.sector, rec.offset as usize, rec.after_image());
                report.redone += 1;
            }
        }
        // 撤销: 未结束事务的前像, LSN 降序
        for rec in records.iter().rev() {
            if rec.kind == RecordKind::Write && state_of(rec.txn_id) == TxnState::Active {
                self.cache
                    .write(rec.sector, rec.offset as usize, rec.before_image());
                report.undone += 1;
            }
        }
        self.cache.flush_all();

        for (&id, &state) in txns.iter() {
            match state {
                TxnState::Committed => report.committed += 1,
                TxnState::Aborted => report.aborted += 1,
                TxnState::Active => report.losers.push(id),
            }
        }

        {
            let mut state = self.state.lock();
            state.next_lsn = state.next_lsn.max(max_lsn + 1);
            state.next_txn = state.next_txn.max(max_txn + 1);
            state.buffer.clear();
            state.active.clear();
            state.flushed_lsn = state.next_lsn - 1;
        }
        // 给失败的事务补记 Abort, 之后的恢复不会再次撤销它们
        for &id in report.losers.iter() {
            self.append(id, |lsn| LogRecord::control(lsn, id, RecordKind::Abort));
        }
        self.checkpoint();
        report.next_lsn = self.next_lsn();

        info!(
            "wal: recovered {} records ({} skipped): {} committed, {} aborted, {} losers, {} redone, {} undone",
            report.records,
            report.skipped,
            report.committed,
            report.aborted,
            report.losers.len(),
            report.redone,
            report.undone
        );
        report
    }

    /// 正常关闭: 中止残留事务, 做检查点, 写入干净标记
    pub fn shutdown(&self) {
        for id in self.active_transactions() {
            warn!("wal: txn {} still active at shutdown, aborting", id);
            let _ = self.abort_id(id);
        }
        self.checkpoint();
        self.write_meta(true);
        info!("wal: clean shutdown at lsn {}", self.next_lsn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::fs::EvictionPolicy;

    const LOG: u32 = 64;
    const TARGET: u32 = 500;

    fn open(disk: Arc<MemDisk>, fresh: bool) -> (Arc<BufferCache>, Wal, Option<RecoveryReport>) {
        let cache = BufferCache::new(disk, EvictionPolicy::Clock);
        let wal = Wal::new(cache.clone(), WalGeometry::new(LOG));
        let report = wal.init(fresh).unwrap();
        (cache, wal, report)
    }

    fn logged_write(wal: &Wal, cache: &BufferCache, txn: &Transaction, sector: u32, offset: usize, after: &[u8]) -> Lsn {
        let before = cache.read_partial(sector, offset, after.len());
        let lsn = wal.log_write(txn, sector, offset, &before, after).unwrap();
        wal.flush(lsn);
        cache.write(sector, offset, after);
        lsn
    }

    /// 只保留已写到设备上的内容, 重新挂载
    fn crash(disk: &MemDisk) -> (Arc<MemDisk>, Arc<BufferCache>, Wal, RecoveryReport) {
        let image = Arc::new(disk.snapshot());
        let (cache, wal, report) = open(image.clone(), false);
        (image, cache, wal, report.expect("recovery should run after a crash"))
    }

    #[test]
    fn committed_write_survives_crash() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 10, b"after");
        wal.commit(txn).unwrap();
        assert_eq!(disk.peek(TARGET as usize)[10], 0);

        let (_image, cache, _wal, report) = crash(&disk);
        assert_eq!(report.committed, 1);
        assert_eq!(report.redone, 1);
        assert_eq!(cache.read_partial(TARGET, 10, 5), b"after".to_vec());
    }

    #[test]
    fn uncommitted_write_is_undone_after_crash() {
        let disk = Arc::new(MemDisk::new(1024));
        disk.poke(TARGET as usize, b"original");
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 0, b"scribble");
        // 脏页先于提交写到了磁盘
        cache.flush_all();
        assert_eq!(&disk.peek(TARGET as usize)[..8], b"scribble");
        let id = txn.id();
        std::mem::forget(txn);

        let (_image, cache, wal, report) = crash(&disk);
        assert_eq!(report.losers, vec![id]);
        assert_eq!(report.undone, 1);
        assert_eq!(cache.read_partial(TARGET, 0, 8), b"original".to_vec());
        assert!(wal.active_transactions().is_empty());
    }

    #[test]
    fn last_write_wins_on_redo() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        for image in [b"AAAA", b"BBBB", b"CCCC"] {
            logged_write(&wal, &cache, &txn, TARGET, 64, image);
        }
        wal.commit(txn).unwrap();

        let (_image, cache, _wal, report) = crash(&disk);
        assert_eq!(report.redone, 3);
        assert_eq!(cache.read_partial(TARGET, 64, 4), b"CCCC".to_vec());
    }

    #[test]
    fn corrupted_record_is_skipped() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 0, b"good");
        let bad_lsn = logged_write(&wal, &cache, &txn, TARGET + 1, 0, b"bad!");
        wal.commit(txn).unwrap();

        let image = disk.snapshot();
        let slot = wal.geometry().slot(bad_lsn) as usize;
        let mut raw = image.peek(slot);
        raw[300] ^= 0xFF;
        image.poke(slot, &raw);
        let image = Arc::new(image);
        let (cache, _wal, report) = open(image, false);
        let report = report.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(cache.read_partial(TARGET, 0, 4), b"good".to_vec());
        assert_eq!(cache.read_partial(TARGET + 1, 0, 4), vec![0; 4]);
    }

    #[test]
    fn corrupted_record_is_not_undone() {
        let disk = Arc::new(MemDisk::new(1024));
        disk.poke(TARGET as usize, b"old1");
        disk.poke(TARGET as usize + 1, b"old2");
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 0, b"new1");
        let bad_lsn = logged_write(&wal, &cache, &txn, TARGET + 1, 0, b"new2");
        // 脏页先于提交落盘, 随后事务未提交就掉电
        cache.flush_all();
        let id = txn.id();
        std::mem::forget(txn);

        let image = disk.snapshot();
        let slot = wal.geometry().slot(bad_lsn) as usize;
        let mut raw = image.peek(slot);
        raw[40] ^= 0x5A;
        image.poke(slot, &raw);
        let (cache, _wal, report) = open(Arc::new(image), false);
        let report = report.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.losers, vec![id]);
        assert_eq!(report.undone, 1);
        assert_eq!(cache.read_partial(TARGET, 0, 4), b"old1".to_vec());
        assert_eq!(cache.read_partial(TARGET + 1, 0, 4), b"new2".to_vec());
    }

    #[test]
    fn large_write_is_split_into_records() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        let payload: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 256) as u8).collect();
        let txn = wal.begin_transaction();
        let start = wal.next_lsn();
        let lsn = logged_write(&wal, &cache, &txn, TARGET, 0, &payload);
        assert_eq!(lsn - start + 1, 3);
        wal.commit(txn).unwrap();

        let (_image, cache, _wal, report) = crash(&disk);
        assert_eq!(report.redone, 3);
        assert_eq!(cache.read(TARGET).to_vec(), payload);
    }

    #[test]
    fn abort_restores_before_images_in_reverse() {
        let disk = Arc::new(MemDisk::new(1024));
        disk.poke(TARGET as usize, b"zero");
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 0, b"one!");
        logged_write(&wal, &cache, &txn, TARGET, 0, b"two!");
        wal.abort(txn).unwrap();
        assert_eq!(cache.read_partial(TARGET, 0, 4), b"zero".to_vec());
        assert_eq!(&disk.peek(TARGET as usize)[..4], b"zero");

        // 已中止的事务不会在恢复时被重做
        let (_image, cache, _wal, report) = crash(&disk);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.redone, 0);
        assert_eq!(cache.read_partial(TARGET, 0, 4), b"zero".to_vec());
    }

    #[test]
    fn dropped_transaction_is_aborted() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk, true);
        {
            let txn = wal.begin_transaction();
            logged_write(&wal, &cache, &txn, TARGET, 0, b"temp");
        }
        assert!(wal.active_transactions().is_empty());
        assert_eq!(cache.read_partial(TARGET, 0, 4), vec![0; 4]);
    }

    #[test]
    fn ended_transaction_rejects_writes() {
        let disk = Arc::new(MemDisk::new(1024));
        let (_cache, wal, _) = open(disk, true);
        let txn = wal.begin_transaction();
        let id = txn.id();
        wal.abort_id(id).unwrap();
        let err = wal.log_write(&txn, TARGET, 0, &[0], &[1]).unwrap_err();
        assert!(matches!(err, FsError::InactiveTransaction(x) if x == id));
        assert!(wal.log_write(&txn, TARGET, 510, &[0; 4], &[1; 4]).is_err());
        assert!(wal.commit(txn).is_err());
    }

    #[test]
    fn clean_shutdown_skips_recovery() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        let txn = wal.begin_transaction();
        logged_write(&wal, &cache, &txn, TARGET, 0, b"kept");
        wal.commit(txn).unwrap();
        let next = wal.next_lsn();
        wal.shutdown();
        assert!(wal.meta().unwrap().clean);
        assert_eq!(&disk.peek(TARGET as usize)[..4], b"kept");

        let (_cache, wal, report) = open(disk.clone(), false);
        assert!(report.is_none());
        assert!(wal.next_lsn() > next);
        assert!(!wal.meta().unwrap().clean);
    }

    #[test]
    fn bad_meta_magic_resets_log() {
        let disk = Arc::new(MemDisk::new(1024));
        disk.poke(WalGeometry::new(LOG).meta_sector() as usize, &[0xEE; 16]);
        let (_cache, wal, report) = open(disk, false);
        assert!(report.is_none());
        assert_eq!(wal.next_lsn(), 1);
        assert_eq!(wal.meta().map(|m| m.clean), Some(false));
    }

    #[test]
    fn checkpoint_flag_raised_at_three_quarters() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk, true);
        let txn = wal.begin_transaction();
        while !wal.checkpoint_pending() {
            logged_write(&wal, &cache, &txn, TARGET, 0, b"x");
        }
        assert!(wal.next_lsn() - 1 > (LOG as u64 * 3) / 4);
        wal.commit(txn).unwrap();
        assert!(wal.checkpoint_if_pending());
        assert!(!wal.checkpoint_pending());
        assert!(!wal.checkpoint_if_pending());
    }

    #[test]
    fn wrapped_log_recovers_latest_state() {
        let disk = Arc::new(MemDisk::new(1024));
        let (cache, wal, _) = open(disk.clone(), true);
        for round in 0..100u32 {
            let txn = wal.begin_transaction();
            logged_write(&wal, &cache, &txn, TARGET + round % 5, 0, &round.to_le_bytes());
            wal.commit(txn).unwrap();
            wal.checkpoint_if_pending();
        }
        assert!(wal.next_lsn() > 2 * LOG as u64);

        let (_image, cache, _wal, _report) = crash(&disk);
        for k in 0..5u32 {
            let expect = 95 + k;
            assert_eq!(cache.read_partial(TARGET + k, 0, 4), expect.to_le_bytes().to_vec());
        }
    }
}
