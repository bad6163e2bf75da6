//! 整个卷的磁盘布局, 把缓存, 日志, 位图和 inode 层组装在一起
//!
//! [`Volume`] 知道每个布局区域所在的位置, 负责格式化, 挂载 (必要时恢复) 与正常关闭.
//!
//! Sectors: Free Map Inode(0) -> Root Dir Inode(1) -> Log [2, 2 + L) -> WAL Meta(2 + L) -> Pool

use std::sync::Arc;

use log::{info, warn};

use super::{
    bitmap::bitmap_bytes, layout::DiskInode, BlockDevice, BufferCache, CacheConfig, FreeMap,
    FsError, Inode, InodeKind, InodeTable, RecoveryReport, Result, Wal, WalGeometry, BLOCK_SIZE,
    DEFAULT_LOG_SECTORS, FREE_MAP_SECTOR, ROOT_DIR_SECTOR,
};

/// 挂载参数
#[derive(Clone, Debug)]
pub struct MountOptions {
    pub cache: CacheConfig,
    /// 日志区的槽位数, 格式化与挂载时必须一致
    pub log_sectors: u32,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            log_sectors: DEFAULT_LOG_SECTORS,
        }
    }
}

pub struct Volume {
    cache: Arc<BufferCache>,
    wal: Arc<Wal>,
    free_map: Arc<FreeMap>,
    inodes: InodeTable,
}

impl Volume {
    fn check_size(device: &Arc<dyn BlockDevice>, geometry: WalGeometry) -> Result<usize> {
        let blocks = device.num_blocks();
        // 至少要放得下位图文件的一个数据扇区
        if (geometry.data_start() as usize) + 1 > blocks {
            return Err(FsError::DeviceTooSmall(blocks));
        }
        Ok(blocks)
    }

    /// 在块设备上创建一个空卷, 返回已挂载的卷
    pub fn format(device: Arc<dyn BlockDevice>, options: &MountOptions) -> Result<Self> {
        let geometry = WalGeometry::new(options.log_sectors);
        let blocks = Self::check_size(&device, geometry)?;

        // 既然是创建, 第一次使用, 需要将块设备的所有扇区清零
        let zero = [0u8; BLOCK_SIZE];
        for i in 0..blocks {
            device.write_block(i, &zero);
        }

        let cache = BufferCache::new(device, options.cache.policy);
        let wal = Arc::new(Wal::new(Arc::clone(&cache), geometry));
        wal.init(true)?;

        // 固定区域: 两个 inode 扇区, 日志区和元数据扇区
        let free_map = Arc::new(FreeMap::new(Arc::clone(&cache), blocks));
        for sector in 0..geometry.data_start() {
            free_map.reserve(sector);
        }
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&wal), Arc::clone(&free_map));

        // 位图文件的数据扇区在挂接之前只在内存中分配
        inodes.create(FREE_MAP_SECTOR, bitmap_bytes(blocks), InodeKind::File)?;
        let map_inode = DiskInode::from_bytes(&cache.read(FREE_MAP_SECTOR))
            .ok_or(FsError::CorruptInode(FREE_MAP_SECTOR))?;
        free_map.attach(&map_inode)?;
        free_map.persist_to_disk()?;

        inodes.create(ROOT_DIR_SECTOR, 0, InodeKind::Directory)?;

        // 格式化产生的日志全部作废, 之后的恢复不会重放它们
        wal.checkpoint();
        wal.init(true)?;

        cache.start_background(&options.cache);
        info!(
            "volume: formatted {} sectors, log {} sectors, {} free",
            blocks,
            geometry.log_sectors,
            free_map.free_count()
        );
        Ok(Self {
            cache,
            wal,
            free_map,
            inodes,
        })
    }

    /// 挂载已有的卷. 上次没有正常关闭时先做恢复, 并返回恢复报告
    pub fn mount(
        device: Arc<dyn BlockDevice>,
        options: &MountOptions,
    ) -> Result<(Self, Option<RecoveryReport>)> {
        let geometry = WalGeometry::new(options.log_sectors);
        Self::check_size(&device, geometry)?;

        let cache = BufferCache::new(device, options.cache.policy);
        let wal = Arc::new(Wal::new(Arc::clone(&cache), geometry));
        // 元数据不在预期位置上, 多半是日志区大小与格式化时不同; 此时不能清空日志区
        if wal.meta().is_none() {
            return Err(FsError::Format(format!(
                "no log metadata at sector {}",
                geometry.meta_sector()
            )));
        }
        let report = wal.init(false)?;

        let free_map = Arc::new(FreeMap::load_from_disk(Arc::clone(&cache))?);
        if DiskInode::from_bytes(&cache.read(ROOT_DIR_SECTOR)).is_none() {
            return Err(FsError::CorruptInode(ROOT_DIR_SECTOR));
        }
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&wal), Arc::clone(&free_map));

        cache.start_background(&options.cache);
        info!(
            "volume: mounted, {} of {} sectors free{}",
            free_map.free_count(),
            free_map.total(),
            if report.is_some() { ", recovered" } else { "" }
        );
        Ok((
            Self {
                cache,
                wal,
                free_map,
                inodes,
            },
            report,
        ))
    }

    /// 正常关闭: 检查点, 写入干净标记, 停止缓存后台线程
    pub fn shutdown(self) {
        let open = self.inodes.open_inodes();
        if !open.is_empty() {
            warn!("volume: shutting down with open inodes {:?}", open);
        }
        self.wal.shutdown();
        self.cache.shutdown();
        info!("volume: shut down");
    }

    /// 分配一个扇区并在上面创建 inode, 返回 inode 编号
    pub fn create_inode(&self, length: usize, kind: InodeKind) -> Result<u32> {
        let sector = self.free_map.allocate_one()?;
        if let Err(e) = self.inodes.create(sector, length, kind) {
            self.free_map.release(sector, 1);
            return Err(e);
        }
        Ok(sector)
    }

    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn free_map(&self) -> &Arc<FreeMap> {
        &self.free_map
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn root_inode(&self) -> Result<Arc<Inode>> {
        self.inodes.open(ROOT_DIR_SECTOR)
    }
}
