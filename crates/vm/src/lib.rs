//! 请求调页的虚拟内存管理
//!
//! 每个进程有一张补充页表（[`SupplementalPageTable`]），记录每个虚拟页“应该是什么”；
//! 全局的 [`Vm`] 持有帧表与交换区，在物理页不足时驱逐其他页腾出空间。
//! 页第一次被访问时才真正分配物理页并装载内容。

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod address;
mod fault;
mod frame;
mod hal;
mod loader;
mod mmap;
mod page;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod space;
mod spt;
mod swap;

use alloc::{boxed::Box, sync::Arc};

use defines::{
    config::{KERNEL_BASE, PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP},
    error::KResult,
};

use self::frame::PinnedFrame;
pub use self::{
    address::{PhysPageNum, VirtAddr, VirtPageNum},
    fault::PageFaultFlags,
    frame::{FrameId, FrameTable},
    hal::{BlockDevice, File, FileTable, PageTable, PageTableRef, PhysMemory},
    loader::{FileSegment, FnLoader, Loader},
    page::{Page, PageType},
    space::{exit_status_of, AddressSpace},
    spt::SupplementalPageTable,
    swap::{SwapArea, SwapSlot},
};

/// 一页的内容
pub type PageBuf = [u8; PAGE_SIZE];

/// 所有进程共享的 VM 子系统状态
pub type VmRef = triomphe::Arc<Vm>;

#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// 用户栈顶（不含）
    pub stack_top: usize,
    /// 用户栈最多能增长到的大小
    pub stack_limit: usize,
    /// 内核地址空间的起点
    pub kernel_base: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_top: USER_STACK_TOP,
            stack_limit: USER_STACK_SIZE,
            kernel_base: KERNEL_BASE,
        }
    }
}

impl VmConfig {
    /// 是否落在内核地址空间中
    pub fn is_kernel(&self, addr: VirtAddr) -> bool {
        addr.0 >= self.kernel_base
    }

    /// `[addr, addr + len)` 是否完整地落在用户地址空间中，不含空地址
    pub fn is_user_range(&self, addr: VirtAddr, len: usize) -> bool {
        !addr.is_null() && addr.0.checked_add(len).is_some_and(|end| end <= self.kernel_base)
    }
}

/// 内核启动时构造一次，之后共享给每个进程
pub struct Vm {
    frames: FrameTable,
    swap: SwapArea,
    config: VmConfig,
}

impl Vm {
    pub fn new(memory: Arc<dyn PhysMemory>, swap_disk: Option<Box<dyn BlockDevice>>) -> Self {
        Self::with_config(memory, swap_disk, VmConfig::default())
    }

    pub fn with_config(
        memory: Arc<dyn PhysMemory>,
        swap_disk: Option<Box<dyn BlockDevice>>,
        config: VmConfig,
    ) -> Self {
        Self {
            frames: FrameTable::new(memory),
            swap: SwapArea::new(swap_disk),
            config,
        }
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapArea {
        &self.swap
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 取得一个空闲帧，必要时驱逐别的页
    pub(crate) fn get_frame(&self) -> KResult<PinnedFrame<'_>> {
        self.frames.get_frame(&self.swap)
    }
}
