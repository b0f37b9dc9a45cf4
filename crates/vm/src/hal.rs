//! VM 子系统所依赖的外部协作者
//!
//! 真正的页表、物理页分配器、文件系统与磁盘驱动都在本 crate 之外，
//! 这里只约定它们的边界。宿主机上的实现见 `sim` 模块

use alloc::sync::Arc;

use defines::{
    config::{PAGE_SIZE, SECTOR_SIZE},
    error::KResult,
};
use klocks::SpinMutex;

use crate::address::{PhysPageNum, VirtPageNum};

/// 一个进程的硬件页表
///
/// 由整个进程的页共享，驱逐其他进程的页时也需要访问
pub trait PageTable: Send {
    /// 建立 `vpn` 到 `ppn` 的映射，新映射的 accessed 与 dirty 位均为 0
    fn install(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> bool;
    /// 清除 `vpn` 的映射，之后的访问会产生缺页
    fn clear(&mut self, vpn: VirtPageNum);
    fn is_dirty(&self, vpn: VirtPageNum) -> bool;
    fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool);
    fn is_accessed(&self, vpn: VirtPageNum) -> bool;
    fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool);
    fn is_writable(&self, vpn: VirtPageNum) -> bool;
    fn translate(&self, vpn: VirtPageNum) -> Option<PhysPageNum>;
}

pub type PageTableRef = Arc<SpinMutex<dyn PageTable>>;

/// 用户物理页的来源
pub trait PhysMemory: Send + Sync {
    fn alloc_user_page(&self) -> Option<PhysPageNum>;
    /// 只在 VM 子系统拆除时调用，正常运行时物理页通过驱逐复用
    fn dealloc_user_page(&self, ppn: PhysPageNum);
    /// 物理页在内核地址空间中的映射
    fn frame_ptr(&self, ppn: PhysPageNum) -> *mut [u8; PAGE_SIZE];
}

/// 打开的文件，关闭即释放最后一个 `Arc`
pub trait File: Send + Sync {
    /// 重新打开一次，得到独立的句柄
    fn reopen(&self) -> KResult<Arc<dyn File>>;
    fn read_at(&self, buf: &mut [u8], offset: usize) -> KResult<usize>;
    fn write_at(&self, buf: &[u8], offset: usize) -> KResult<usize>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 交换区所在的块设备
pub trait BlockDevice: Send + Sync {
    fn sector_count(&self) -> usize;
    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]) -> KResult<()>;
    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]) -> KResult<()>;
}

/// 进程的文件描述符表，mmap 系统调用借此找到文件
pub trait FileTable {
    fn get(&self, fd: usize) -> Option<Arc<dyn File>>;
}
