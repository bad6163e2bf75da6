//! 缓存层: 进程内唯一会发起扇区读写的组件, 在内存中缓存固定数量 (64 行) 的扇区.
//!
//! 每一行缓存有自己的锁和一个 "加载完成" 条件变量, 另有一把全局锁保护行标签表
//! (扇区号, 状态, 访问位, 时钟指针, 正在写回的扇区集合).
//!
//! 加锁协议 (hand-over-hand):
//!
//! 1. 持有全局锁线性扫描标签表;
//! 2. 命中时在持有全局锁的情况下获取该行的锁, 然后释放全局锁;
//!    若该行仍在 Loading, 则在行的条件变量上等待;
//! 3. 未命中时选择牺牲行 (优先 Invalid, 否则按淘汰策略), 在全局锁内将它标记为 Loading
//!    并打上新扇区号, 然后 **先释放全局锁再进行设备 I/O**.
//!
//! 任何设备 I/O 都不会在持有全局锁或行锁的情况下进行.
//! 脏行写回期间, 对该旧扇区的未命中请求会等待写回完成, 避免从磁盘读到旧数据.
//!
//! 加锁顺序永远是 全局锁 -> 行锁.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, SyncSender},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info};

use super::{layout::DataBlock, BlockDevice, BLOCK_CACHE_SIZE, BLOCK_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LineState {
    Invalid,
    Loading,
    Valid,
}

/// 缓存替换算法
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum EvictionPolicy {
    /// 时钟 (second chance): 访问位被置位的行会被清位并跳过一次
    #[default]
    Clock,
    /// 先进先出: 独立的指针, 不检查访问位
    Fifo,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub policy: EvictionPolicy,
    /// 后台写回线程的周期, None 表示不启动该线程
    pub flush_interval: Option<Duration>,
    /// 预取队列长度, 0 表示不启动预取线程
    pub prefetch_queue: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Clock,
            flush_interval: Some(Duration::from_secs(30)),
            prefetch_queue: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub writebacks: usize,
}

/// 行锁保护的内容
struct LineData {
    sector: u32,
    state: LineState,
    dirty: bool,
    data: DataBlock,
}

struct CacheLine {
    inner: Mutex<LineData>,
    /// 离开 Loading 状态时唤醒所有等待者
    loaded: Condvar,
}

/// 全局锁保护的行标签
#[derive(Clone, Copy)]
struct Tag {
    sector: u32,
    state: LineState,
    accessed: bool,
}

struct CacheTable {
    tags: Vec<Tag>,
    clock_hand: usize,
    fifo_hand: usize,
    /// 数据正在写往设备的扇区
    in_writeback: Vec<u32>,
}

impl CacheTable {
    fn find(&self, sector: u32) -> Option<usize> {
        self.tags
            .iter()
            .position(|tag| tag.state != LineState::Invalid && tag.sector == sector)
    }

    fn evictable(&self, i: usize) -> bool {
        let tag = &self.tags[i];
        tag.state == LineState::Valid && !self.in_writeback.contains(&tag.sector)
    }

    fn choose_victim(&mut self, policy: EvictionPolicy) -> Option<usize> {
        if let Some(i) = self.tags.iter().position(|tag| tag.state == LineState::Invalid) {
            return Some(i);
        }
        let n = self.tags.len();
        match policy {
            EvictionPolicy::Clock => {
                // 扫两圈: 第一圈可能只是在清访问位
                for _ in 0..2 * n {
                    let i = self.clock_hand;
                    self.clock_hand = (self.clock_hand + 1) % n;
                    if !self.evictable(i) {
                        continue;
                    }
                    if self.tags[i].accessed {
                        self.tags[i].accessed = false;
                        continue;
                    }
                    return Some(i);
                }
                None
            }
            EvictionPolicy::Fifo => {
                for _ in 0..n {
                    let i = self.fifo_hand;
                    self.fifo_hand = (self.fifo_hand + 1) % n;
                    if self.evictable(i) {
                        return Some(i);
                    }
                }
                None
            }
        }
    }

    fn finish_writeback(&mut self, sector: u32) {
        if let Some(pos) = self.in_writeback.iter().position(|&s| s == sector) {
            self.in_writeback.swap_remove(pos);
        }
    }
}

#[derive(Clone, Copy)]
enum Fill {
    /// 未命中时从设备读入
    Read,
    /// 调用者会覆盖整个扇区, 未命中时无需读设备
    Overwrite,
}

#[derive(Default)]
struct Background {
    prefetch_tx: Option<SyncSender<u32>>,
    workers: Vec<JoinHandle<()>>,
}

type StopSignal = Arc<(Mutex<bool>, Condvar)>;

pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    lines: Vec<CacheLine>,
    table: Mutex<CacheTable>,
    writeback_done: Condvar,
    policy: EvictionPolicy,
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
    writebacks: AtomicUsize,
    stop: StopSignal,
    background: spin::Mutex<Background>,
}

impl BufferCache {
    /// 创建缓存, 所有行初始为 Invalid. 后台线程需要另外调用 [`BufferCache::start_background`]
    pub fn new(device: Arc<dyn BlockDevice>, policy: EvictionPolicy) -> Arc<Self> {
        let lines = (0..BLOCK_CACHE_SIZE)
            .map(|_| CacheLine {
                inner: Mutex::new(LineData {
                    sector: 0,
                    state: LineState::Invalid,
                    dirty: false,
                    data: [0; BLOCK_SIZE],
                }),
                loaded: Condvar::new(),
            })
            .collect();
        let tags = vec![
            Tag {
                sector: 0,
                state: LineState::Invalid,
                accessed: false,
            };
            BLOCK_CACHE_SIZE
        ];
        Arc::new(Self {
            device,
            lines,
            table: Mutex::new(CacheTable {
                tags,
                clock_hand: 0,
                fifo_hand: 0,
                in_writeback: Vec::new(),
            }),
            writeback_done: Condvar::new(),
            policy,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            writebacks: AtomicUsize::new(0),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            background: spin::Mutex::new(Background::default()),
        })
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// 返回一个持有行锁, 状态为 Valid 且装着 `sector` 的缓存行
    fn lock_line(&self, sector: u32, fill: Fill) -> MutexGuard<'_, LineData> {
        loop {
            let mut table = self.table.lock().unwrap();

            if let Some(i) = table.find(sector) {
                table.tags[i].accessed = true;
                let mut line = self.lines[i].inner.lock().unwrap();
                drop(table);
                while line.state == LineState::Loading {
                    line = self.lines[i].loaded.wait(line).unwrap();
                }
                if line.state == LineState::Valid && line.sector == sector {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return line;
                }
                // 等待期间该行被换成了别的扇区
                continue;
            }

            if table.in_writeback.contains(&sector) {
                let _table = self.writeback_done.wait(table).unwrap();
                continue;
            }

            let victim = match table.choose_victim(self.policy) {
                Some(victim) => victim,
                None => {
                    // 所有行都在加载或写回, 让出 CPU 后重试
                    drop(table);
                    thread::yield_now();
                    continue;
                }
            };

            let old = table.tags[victim];
            table.tags[victim] = Tag {
                sector,
                state: LineState::Loading,
                accessed: true,
            };
            let mut line = self.lines[victim].inner.lock().unwrap();
            let writeback = if old.state == LineState::Valid && line.dirty {
                table.in_writeback.push(line.sector);
                Some((line.sector, line.data))
            } else {
                None
            };
            if old.state == LineState::Valid {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("cache: evict sector {} from line {}", old.sector, victim);
            }
            line.sector = sector;
            line.state = LineState::Loading;
            line.dirty = false;
            drop(table);
            drop(line);

            // 慢速 I/O, 不持有任何锁
            if let Some((old_sector, data)) = &writeback {
                self.device.write_block(*old_sector as usize, data);
                self.writebacks.fetch_add(1, Ordering::Relaxed);
            }
            let mut data = [0u8; BLOCK_SIZE];
            if let Fill::Read = fill {
                self.device.read_block(sector as usize, &mut data);
            }

            let mut table = self.table.lock().unwrap();
            let mut line = self.lines[victim].inner.lock().unwrap();
            line.data = data;
            line.state = LineState::Valid;
            table.tags[victim].state = LineState::Valid;
            if let Some((old_sector, _)) = writeback {
                table.finish_writeback(old_sector);
                self.writeback_done.notify_all();
            }
            drop(table);
            self.lines[victim].loaded.notify_all();
            self.misses.fetch_add(1, Ordering::Relaxed);
            return line;
        }
    }

    /// 读取整个扇区
    pub fn read(&self, sector: u32) -> DataBlock {
        self.lock_line(sector, Fill::Read).data
    }

    /// 读取扇区中 [offset, offset + length) 的字节
    pub fn read_partial(&self, sector: u32, offset: usize, length: usize) -> Vec<u8> {
        assert!(offset + length <= BLOCK_SIZE, "read beyond sector end");
        let line = self.lock_line(sector, Fill::Read);
        line.data[offset..offset + length].to_vec()
    }

    /// 将 buf 写入扇区 offset 处; 覆盖整个扇区时不会读设备
    pub fn write(&self, sector: u32, offset: usize, buf: &[u8]) {
        assert!(offset + buf.len() <= BLOCK_SIZE, "write beyond sector end");
        let fill = if offset == 0 && buf.len() == BLOCK_SIZE {
            Fill::Overwrite
        } else {
            Fill::Read
        };
        let mut line = self.lock_line(sector, fill);
        line.data[offset..offset + buf.len()].copy_from_slice(buf);
        line.dirty = true;
    }

    pub fn contains(&self, sector: u32) -> bool {
        self.table.lock().unwrap().find(sector).is_some()
    }

    /// 把第 i 行写回设备 (若它是 Valid 且脏的), 返回是否真的写了
    fn write_back_line(&self, i: usize, expect: Option<u32>) -> bool {
        let mut table = self.table.lock().unwrap();
        loop {
            let tag = table.tags[i];
            if tag.state != LineState::Valid || expect.map_or(false, |s| s != tag.sector) {
                return false;
            }
            if !table.in_writeback.contains(&tag.sector) {
                break;
            }
            // 同一扇区的上一次写回尚未完成, 两次写回不能并发
            table = self.writeback_done.wait(table).unwrap();
        }
        let mut line = self.lines[i].inner.lock().unwrap();
        if line.state != LineState::Valid || !line.dirty {
            return false;
        }
        let (sector, data) = (line.sector, line.data);
        line.dirty = false;
        table.in_writeback.push(sector);
        drop(line);
        drop(table);

        self.device.write_block(sector as usize, &data);
        self.writebacks.fetch_add(1, Ordering::Relaxed);

        let mut table = self.table.lock().unwrap();
        table.finish_writeback(sector);
        self.writeback_done.notify_all();
        true
    }

    /// 将所有脏行写回设备
    pub fn flush_all(&self) -> usize {
        let written = (0..self.lines.len())
            .filter(|&i| self.write_back_line(i, None))
            .count();
        if written > 0 {
            debug!("cache: flushed {} dirty lines", written);
        }
        written
    }

    /// 将单个扇区写穿到设备 (若已缓存且脏)
    pub fn flush_sector(&self, sector: u32) -> bool {
        let slot = self.table.lock().unwrap().find(sector);
        match slot {
            Some(i) => self.write_back_line(i, Some(sector)),
            None => false,
        }
    }

    /// 尽力而为的预取请求: 队列已满, 扇区已缓存或预取线程未启动时直接丢弃
    pub fn prefetch(&self, sector: u32) {
        if (sector as usize) >= self.device.num_blocks() || self.contains(sector) {
            return;
        }
        if let Some(tx) = &self.background.lock().prefetch_tx {
            let _ = tx.try_send(sector);
        }
    }

    fn warm(&self, sector: u32) {
        if !self.contains(sector) {
            drop(self.lock_line(sector, Fill::Read));
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
        }
    }

    /// 启动周期写回线程和预取线程. 线程只持有 Weak 引用, 缓存被丢弃后自行退出
    pub fn start_background(self: &Arc<Self>, config: &CacheConfig) {
        let mut background = self.background.lock();

        if let Some(interval) = config.flush_interval {
            let weak: Weak<Self> = Arc::downgrade(self);
            let stop = Arc::clone(&self.stop);
            let spawned = thread::Builder::new()
                .name("cache-flusher".into())
                .spawn(move || loop {
                    let (flag, cvar) = &*stop;
                    let stopped = flag.lock().unwrap();
                    // 停止信号可能在上一轮 flush_all 期间就已发出
                    let (stopped, _) = cvar
                        .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                        .unwrap();
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    match weak.upgrade() {
                        Some(cache) => {
                            cache.flush_all();
                        }
                        None => break,
                    }
                });
            match spawned {
                Ok(handle) => background.workers.push(handle),
                Err(e) => error!("cache: cannot start write-back thread: {}", e),
            }
        }

        if config.prefetch_queue > 0 {
            let (tx, rx) = mpsc::sync_channel::<u32>(config.prefetch_queue);
            let weak: Weak<Self> = Arc::downgrade(self);
            let spawned = thread::Builder::new()
                .name("cache-prefetch".into())
                .spawn(move || {
                    while let Ok(sector) = rx.recv() {
                        match weak.upgrade() {
                            Some(cache) => cache.warm(sector),
                            None => break,
                        }
                    }
                });
            match spawned {
                Ok(handle) => {
                    background.prefetch_tx = Some(tx);
                    background.workers.push(handle);
                }
                Err(e) => error!("cache: cannot start prefetch thread: {}", e),
            }
        }
    }

    fn signal_stop(&self) {
        let (flag, cvar) = &*self.stop;
        *flag.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// 停止后台线程并做最后一次同步写回
    pub fn shutdown(&self) {
        self.signal_stop();
        let workers = {
            let mut background = self.background.lock();
            background.prefetch_tx = None;
            std::mem::take(&mut background.workers)
        };
        for worker in workers {
            let _ = worker.join();
        }
        let written = self.flush_all();
        info!("cache: shutdown, {} lines written back", written);
    }
}

impl Drop for BufferCache {
    /// 丢弃缓存不会写回任何脏行 (模拟掉电), 只通知后台线程退出
    fn drop(&mut self) {
        self.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use std::time::Instant;

    /// 每次读写都先睡一会儿的内存盘
    struct SlowDisk {
        inner: Arc<MemDisk>,
        read_delay: Duration,
        write_delay: Duration,
    }

    impl BlockDevice for SlowDisk {
        fn read_block(&self, block_id: usize, buf: &mut [u8]) {
            thread::sleep(self.read_delay);
            self.inner.read_block(block_id, buf);
        }

        fn write_block(&self, block_id: usize, buf: &[u8]) {
            thread::sleep(self.write_delay);
            self.inner.write_block(block_id, buf);
        }

        fn num_blocks(&self) -> usize {
            self.inner.num_blocks()
        }
    }

    fn slow_setup(read_delay: Duration, write_delay: Duration) -> (Arc<MemDisk>, Arc<BufferCache>) {
        let disk = Arc::new(MemDisk::new(1024));
        let slow = Arc::new(SlowDisk {
            inner: disk.clone(),
            read_delay,
            write_delay,
        });
        (disk, BufferCache::new(slow, EvictionPolicy::Clock))
    }

    fn setup(policy: EvictionPolicy) -> (Arc<MemDisk>, Arc<BufferCache>) {
        let disk = Arc::new(MemDisk::new(1024));
        let cache = BufferCache::new(disk.clone(), policy);
        (disk, cache)
    }

    #[test]
    fn read_returns_last_write() {
        let (_disk, cache) = setup(EvictionPolicy::Clock);
        cache.write(10, 0, &[0xAB; BLOCK_SIZE]);
        cache.write(10, 100, b"hello");
        let data = cache.read(10);
        assert_eq!(&data[100..105], b"hello");
        assert_eq!(data[99], 0xAB);
        assert_eq!(cache.read_partial(10, 100, 5), b"hello".to_vec());
    }

    #[test]
    fn partial_write_merges_with_device_contents() {
        let (disk, cache) = setup(EvictionPolicy::Clock);
        disk.poke(7, &[0x11; BLOCK_SIZE]);
        cache.write(7, 500, &[0x22; 12]);
        let data = cache.read(7);
        assert_eq!(data[0], 0x11);
        assert_eq!(data[499], 0x11);
        assert_eq!(data[500], 0x22);
    }

    #[test]
    fn dirty_lines_reach_device_only_on_flush() {
        let (disk, cache) = setup(EvictionPolicy::Clock);
        cache.write(3, 0, &[9; BLOCK_SIZE]);
        assert_eq!(disk.peek(3), [0; BLOCK_SIZE]);
        assert_eq!(cache.flush_all(), 1);
        assert_eq!(disk.peek(3), [9; BLOCK_SIZE]);
        assert_eq!(cache.flush_all(), 0);
    }

    #[test]
    fn dropping_cache_loses_dirty_data() {
        let (disk, cache) = setup(EvictionPolicy::Clock);
        cache.write(4, 0, &[1; 16]);
        drop(cache);
        assert_eq!(disk.peek(4), [0; BLOCK_SIZE]);
    }

    #[test]
    fn eviction_keeps_every_write() {
        for policy in [EvictionPolicy::Clock, EvictionPolicy::Fifo] {
            let (_disk, cache) = setup(policy);
            let distinct = 3 * BLOCK_CACHE_SIZE;
            for s in 0..distinct {
                cache.write(s as u32, 0, &[(s % 251) as u8; BLOCK_SIZE]);
            }
            for s in 0..distinct {
                assert_eq!(cache.read(s as u32)[17], (s % 251) as u8);
            }
            let stats = cache.stats();
            assert!(stats.evictions >= distinct - BLOCK_CACHE_SIZE);
            assert!(stats.writebacks >= distinct - BLOCK_CACHE_SIZE);
        }
    }

    #[test]
    fn clock_gives_recently_used_lines_a_second_chance() {
        let (_disk, cache) = setup(EvictionPolicy::Clock);
        for s in 0..BLOCK_CACHE_SIZE as u32 {
            cache.read(s);
        }
        // 第一次淘汰清空所有访问位并换出第 0 行, 之后重新访问扇区 1
        cache.read(1000);
        cache.read(1);
        cache.read(1001);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn fifo_ignores_recent_use() {
        let (_disk, cache) = setup(EvictionPolicy::Fifo);
        for s in 0..BLOCK_CACHE_SIZE as u32 {
            cache.read(s);
        }
        // 先进先出: 重新访问扇区 1 也救不了它
        cache.read(1000);
        cache.read(1);
        cache.read(1001);
        assert!(!cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(1000));
        assert!(cache.contains(1001));
    }

    #[test]
    fn flush_sector_writes_through() {
        let (disk, cache) = setup(EvictionPolicy::Clock);
        cache.write(20, 0, &[5; 8]);
        cache.write(21, 0, &[6; 8]);
        assert!(cache.flush_sector(20));
        assert_eq!(disk.peek(20)[0], 5);
        assert_eq!(disk.peek(21)[0], 0);
        assert!(!cache.flush_sector(20));
    }

    #[test]
    fn concurrent_writers_do_not_interfere() {
        let (_disk, cache) = setup(EvictionPolicy::Clock);
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for round in 0..4u8 {
                        for s in 0..40u32 {
                            let sector = t * 100 + s;
                            cache.write(sector, 0, &[round.wrapping_add(t as u8); BLOCK_SIZE]);
                            assert_eq!(cache.read(sector)[511], round.wrapping_add(t as u8));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..8u32 {
            for s in 0..40u32 {
                assert_eq!(cache.read(t * 100 + s)[0], 3u8.wrapping_add(t as u8));
            }
        }
    }

    #[test]
    fn shared_misses_load_each_sector_once() {
        let (disk, cache) = slow_setup(Duration::from_millis(50), Duration::ZERO);
        for s in 0..4 {
            disk.poke(s, &[0xC0; BLOCK_SIZE]);
        }
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for s in 0..4u32 {
                        let offset = t as usize * 16;
                        cache.write(s, offset, &[t + 1; 16]);
                        assert_eq!(cache.read_partial(s, offset, 16), vec![t + 1; 16]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(disk.reads(), 4);
        assert_eq!(cache.flush_all(), 4);
        for s in 0..4 {
            let data = disk.peek(s);
            for t in 0..8u8 {
                let offset = t as usize * 16;
                assert!(data[offset..offset + 16].iter().all(|&b| b == t + 1));
            }
            assert!(data[8 * 16..].iter().all(|&b| b == 0xC0));
        }
    }

    #[test]
    fn shutdown_during_background_flush_does_not_wait_another_interval() {
        let (disk, cache) = slow_setup(Duration::ZERO, Duration::from_millis(500));
        cache.write(9, 0, &[7; BLOCK_SIZE]);
        cache.start_background(&CacheConfig {
            policy: EvictionPolicy::Clock,
            flush_interval: Some(Duration::from_secs(1)),
            prefetch_queue: 0,
        });
        // 写回线程在 1s 时开始写, 此时它正在慢速写设备
        thread::sleep(Duration::from_millis(1200));
        let start = Instant::now();
        cache.shutdown();
        assert!(start.elapsed() < Duration::from_millis(900));
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.peek(9), [7; BLOCK_SIZE]);
    }

    #[test]
    fn prefetch_warms_sector() {
        let (_disk, cache) = setup(EvictionPolicy::Clock);
        cache.start_background(&CacheConfig {
            policy: EvictionPolicy::Clock,
            flush_interval: None,
            prefetch_queue: 4,
        });
        cache.prefetch(42);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.contains(42) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(cache.contains(42));
        // 越界和已缓存的请求被静默丢弃
        cache.prefetch(42);
        cache.prefetch(1 << 30);
        cache.shutdown();
    }

    #[test]
    fn shutdown_flushes_dirty_lines() {
        let (disk, cache) = setup(EvictionPolicy::Fifo);
        cache.start_background(&CacheConfig::default());
        cache.write(8, 0, &[3; BLOCK_SIZE]);
        cache.shutdown();
        assert_eq!(disk.peek(8), [3; BLOCK_SIZE]);
    }
}
