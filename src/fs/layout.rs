//! 磁盘数据结构层: [`DiskInode`], [`LogRecord`], [`WalMeta`]
//!
//! 磁盘布局按扇区编号从小到大分为:
//!
//! - 扇区 0: 空闲位图文件的 inode
//! - 扇区 1: 根目录的 inode
//! - 扇区 [2, 2 + L): 环形日志区域, 每个扇区存放一条 [`LogRecord`]
//! - 扇区 2 + L: 日志元数据 [`WalMeta`]
//! - 其余扇区: 由空闲位图管理的通用分配区 (inode, 索引块, 文件数据)
//!
//! 所有结构都以小端序编码进一个完整的 512 字节扇区.

use lazy_static::*;

use super::{
    BufferCache, BLOCK_SIZE, INDIRECT1_BOUND, INODE_DIRECT_COUNT, INODE_INDIRECT1_COUNT,
    INODE_MAGIC, LOG_PAYLOAD_SIZE, WAL_META_MAGIC,
};

/// 一个完整扇区的字节数组
pub type DataBlock = [u8; BLOCK_SIZE];

/// 索引块 IndirectBlock 实质上是一个 u32 数组, 每个都指向一个下一级索引块或者数据块
pub type IndirectBlock = [u32; INODE_INDIRECT1_COUNT];

fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// 将一个扇区解释为索引块
pub fn decode_index_block(data: &DataBlock) -> IndirectBlock {
    let mut block = [0u32; INODE_INDIRECT1_COUNT];
    for (i, entry) in block.iter_mut().enumerate() {
        *entry = get_u32(data, i * 4);
    }
    block
}

/// 读取索引块 `sector` 中的第 `index` 个指针
pub fn read_index_entry(cache: &BufferCache, sector: u32, index: usize) -> u32 {
    let raw = cache.read_partial(sector, index * 4, 4);
    get_u32(&raw, 0)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeKind {
    File,
    Directory,
    Symlink,
}

impl InodeKind {
    fn tag(self) -> u32 {
        match self {
            InodeKind::File => 1,
            InodeKind::Directory => 2,
            InodeKind::Symlink => 3,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(InodeKind::File),
            2 => Some(InodeKind::Directory),
            3 => Some(InodeKind::Symlink),
            _ => None,
        }
    }
}

/// 每个 文件/目录 在磁盘上均以一个 DiskInode 的形式独占一个扇区
///
/// 直接索引 12 个, 一级索引 128 个, 二级索引 128 * 128 个数据扇区,
/// 因此最大文件大小约为 (12 + 128 + 16384) * 512 B ≈ 8 MB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskInode {
    /// 直接索引扇区(号组)
    pub direct: [u32; INODE_DIRECT_COUNT],
    /// 一级间接索引扇区(号)
    pub indirect1: u32,
    /// 二级间接索引扇区(号), 它指向的扇区中每个 u32 指向一个一级索引扇区
    pub indirect2: u32,
    /// 文件内容的字节数
    pub size: u32,
    pub kind: InodeKind,
}

impl DiskInode {
    pub fn new(kind: InodeKind) -> Self {
        Self {
            direct: [0; INODE_DIRECT_COUNT],
            indirect1: 0,
            indirect2: 0,
            size: 0,
            kind,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn to_bytes(&self) -> DataBlock {
        let mut buf = [0u8; BLOCK_SIZE];
        for (i, ptr) in self.direct.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        buf[48..52].copy_from_slice(&self.indirect1.to_le_bytes());
        buf[52..56].copy_from_slice(&self.indirect2.to_le_bytes());
        buf[56..60].copy_from_slice(&self.size.to_le_bytes());
        buf[60..64].copy_from_slice(&self.kind.tag().to_le_bytes());
        buf[64..68].copy_from_slice(&INODE_MAGIC.to_le_bytes());
        buf
    }

    /// 魔数或类型标签不合法时返回 None
    pub fn from_bytes(buf: &DataBlock) -> Option<Self> {
        if get_u32(buf, 64) != INODE_MAGIC {
            return None;
        }
        let kind = InodeKind::from_tag(get_u32(buf, 60))?;
        let mut direct = [0u32; INODE_DIRECT_COUNT];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = get_u32(buf, i * 4);
        }
        Some(Self {
            direct,
            indirect1: get_u32(buf, 48),
            indirect2: get_u32(buf, 52),
            size: get_u32(buf, 56),
            kind,
        })
    }

    /// 计算为了容纳 size 字节的内容需要多少个数据扇区
    pub fn data_blocks(size: usize) -> usize {
        (size + BLOCK_SIZE - 1) / BLOCK_SIZE
    }

    /// 通过索引查到第 inner_id 个数据块所在的扇区号, 未分配时为 0
    pub fn get_block_id(&self, inner_id: usize, cache: &BufferCache) -> u32 {
        if inner_id < INODE_DIRECT_COUNT {
            self.direct[inner_id]
        } else if inner_id < INDIRECT1_BOUND {
            if self.indirect1 == 0 {
                return 0;
            }
            read_index_entry(cache, self.indirect1, inner_id - INODE_DIRECT_COUNT)
        } else {
            if self.indirect2 == 0 {
                return 0;
            }
            // 先查二级索引块找到挂在它下面的一级子索引块, 再通过它找到数据块
            let last = inner_id - INDIRECT1_BOUND;
            let indirect1 = read_index_entry(cache, self.indirect2, last / INODE_INDIRECT1_COUNT);
            if indirect1 == 0 {
                return 0;
            }
            read_index_entry(cache, indirect1, last % INODE_INDIRECT1_COUNT)
        }
    }

    /// 将字节偏移转换为扇区号; 偏移超出文件长度时没有对应扇区
    pub fn byte_to_sector(&self, offset: usize, cache: &BufferCache) -> Option<u32> {
        if offset >= self.size as usize {
            return None;
        }
        match self.get_block_id(offset / BLOCK_SIZE, cache) {
            0 => None,
            sector => Some(sector),
        }
    }

    /// 收集该 inode 引用的所有数据扇区和索引扇区 (不含 inode 自身所在扇区)
    pub fn collect_blocks(&self, cache: &BufferCache) -> Vec<u32> {
        let mut v: Vec<u32> = self.direct.iter().copied().filter(|&s| s != 0).collect();
        if self.indirect1 != 0 {
            let table = decode_index_block(&cache.read(self.indirect1));
            v.extend(table.iter().copied().filter(|&s| s != 0));
            v.push(self.indirect1);
        }
        if self.indirect2 != 0 {
            let outer = decode_index_block(&cache.read(self.indirect2));
            for &indirect1 in outer.iter().filter(|&&s| s != 0) {
                let table = decode_index_block(&cache.read(indirect1));
                v.extend(table.iter().copied().filter(|&s| s != 0));
                v.push(indirect1);
            }
            v.push(self.indirect2);
        }
        v
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecordKind {
    Begin,
    Write,
    Commit,
    Abort,
    Checkpoint,
}

impl RecordKind {
    fn tag(self) -> u32 {
        match self {
            RecordKind::Begin => 1,
            RecordKind::Write => 2,
            RecordKind::Commit => 3,
            RecordKind::Abort => 4,
            RecordKind::Checkpoint => 5,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(RecordKind::Begin),
            2 => Some(RecordKind::Write),
            3 => Some(RecordKind::Commit),
            4 => Some(RecordKind::Abort),
            5 => Some(RecordKind::Checkpoint),
            _ => None,
        }
    }
}

const CHECKSUM_OFFSET: usize = 16;
const BEFORE_OFFSET: usize = 28;
const AFTER_OFFSET: usize = BEFORE_OFFSET + LOG_PAYLOAD_SIZE;

/// 日志记录, 在磁盘上恰好占据日志区的一个扇区
///
/// | 偏移 | 字段 |
/// |------|------|
/// | 0    | lsn: u64 |
/// | 8    | txn_id: u32 |
/// | 12   | kind: u32 |
/// | 16   | checksum: u32 |
/// | 20   | sector: u32 |
/// | 24   | offset: u16 |
/// | 26   | length: u16 |
/// | 28   | before: [u8; 232] |
/// | 260  | after: [u8; 232] |
/// | 492  | padding |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: u64,
    pub txn_id: u32,
    pub kind: RecordKind,
    pub sector: u32,
    pub offset: u16,
    pub length: u16,
    pub before: [u8; LOG_PAYLOAD_SIZE],
    pub after: [u8; LOG_PAYLOAD_SIZE],
}

impl LogRecord {
    /// 不携带数据的控制记录 (Begin/Commit/Abort/Checkpoint)
    pub fn control(lsn: u64, txn_id: u32, kind: RecordKind) -> Self {
        Self {
            lsn,
            txn_id,
            kind,
            sector: 0,
            offset: 0,
            length: 0,
            before: [0; LOG_PAYLOAD_SIZE],
            after: [0; LOG_PAYLOAD_SIZE],
        }
    }

    pub fn write(lsn: u64, txn_id: u32, sector: u32, offset: usize, before: &[u8], after: &[u8]) -> Self {
        assert_eq!(before.len(), after.len());
        assert!(before.len() <= LOG_PAYLOAD_SIZE);
        let mut record = Self::control(lsn, txn_id, RecordKind::Write);
        record.sector = sector;
        record.offset = offset as u16;
        record.length = before.len() as u16;
        record.before[..before.len()].copy_from_slice(before);
        record.after[..after.len()].copy_from_slice(after);
        record
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before[..self.length as usize]
    }

    pub fn after_image(&self) -> &[u8] {
        &self.after[..self.length as usize]
    }

    /// 编码并填入校验和 (校验和字段按 0 参与计算)
    pub fn encode(&self) -> DataBlock {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..8].copy_from_slice(&self.lsn.to_le_bytes());
        buf[8..12].copy_from_slice(&self.txn_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kind.tag().to_le_bytes());
        buf[20..24].copy_from_slice(&self.sector.to_le_bytes());
        buf[24..26].copy_from_slice(&self.offset.to_le_bytes());
        buf[26..28].copy_from_slice(&self.length.to_le_bytes());
        buf[BEFORE_OFFSET..AFTER_OFFSET].copy_from_slice(&self.before);
        buf[AFTER_OFFSET..AFTER_OFFSET + LOG_PAYLOAD_SIZE].copy_from_slice(&self.after);
        let sum = crc32(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    /// 校验失败, 类型未知或 lsn 为 0 的槽位都视为空洞
    pub fn decode(buf: &DataBlock) -> Option<Self> {
        let stored = get_u32(buf, CHECKSUM_OFFSET);
        let mut scratch = *buf;
        scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
        if crc32(&scratch) != stored {
            return None;
        }
        let lsn = get_u64(buf, 0);
        let kind = RecordKind::from_tag(get_u32(buf, 12))?;
        let length = get_u16(buf, 26);
        let offset = get_u16(buf, 24);
        if lsn == 0 || length as usize > LOG_PAYLOAD_SIZE || offset as usize + length as usize > BLOCK_SIZE {
            return None;
        }
        let mut before = [0u8; LOG_PAYLOAD_SIZE];
        let mut after = [0u8; LOG_PAYLOAD_SIZE];
        before.copy_from_slice(&buf[BEFORE_OFFSET..AFTER_OFFSET]);
        after.copy_from_slice(&buf[AFTER_OFFSET..AFTER_OFFSET + LOG_PAYLOAD_SIZE]);
        Some(Self {
            lsn,
            txn_id: get_u32(buf, 8),
            kind,
            sector: get_u32(buf, 20),
            offset,
            length,
            before,
            after,
        })
    }
}

/// 日志元数据扇区, 记录上次是否正常关闭以及下一次会话应继续使用的计数器
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalMeta {
    pub clean: bool,
    /// 下一个可分配的 LSN
    pub last_lsn: u64,
    /// 下一个可分配的事务号
    pub last_txn: u32,
}

impl WalMeta {
    pub fn fresh() -> Self {
        Self {
            clean: true,
            last_lsn: 1,
            last_txn: 1,
        }
    }

    pub fn encode(&self) -> DataBlock {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&WAL_META_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.clean as u32).to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_lsn.to_le_bytes());
        buf[16..20].copy_from_slice(&self.last_txn.to_le_bytes());
        buf
    }

    /// 魔数不对说明从未初始化过
    pub fn decode(buf: &DataBlock) -> Option<Self> {
        if get_u32(buf, 0) != WAL_META_MAGIC {
            return None;
        }
        Some(Self {
            clean: get_u32(buf, 4) != 0,
            last_lsn: get_u64(buf, 8),
            last_txn: get_u32(buf, 16),
        })
    }
}

lazy_static! {
    /// CRC32 查找表, 多项式 0xEDB88320 (反射形式)
    static ref CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut c = i as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            }
            *slot = c;
        }
        table
    };
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}
