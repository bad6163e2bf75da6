//! 设备仅支持以扇区为单位进行随机读写, 需要由具体的块设备驱动来实现这些方法.
//! 缓存层与日志层会调用这些方法; 设备错误不可恢复, 实现者应直接 panic.

use std::any::Any;

// 块设备接口层
// 定义设备驱动需要实现的扇区读写接口 BlockDevice trait

pub trait BlockDevice: Send + Sync + Any {
    // read_block 将编号为 block_id 的扇区从磁盘读入内存中的缓冲区 buf ;
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    // write_block 将内存中的缓冲区 buf 中的数据写入磁盘编号为 block_id 的扇区.
    fn write_block(&self, block_id: usize, buf: &[u8]);

    // num_blocks 返回设备的扇区总数
    fn num_blocks(&self) -> usize;
}
