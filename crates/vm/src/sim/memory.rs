use alloc::{boxed::Box, vec::Vec};
use core::cell::UnsafeCell;

use defines::config::PAGE_SIZE;
use klocks::SpinMutex;

use crate::{address::PhysPageNum, hal::PhysMemory, PageBuf};

/// 第一个模拟物理页的页号
const FIRST_PPN: usize = 0x80200;

struct FrameCell(UnsafeCell<PageBuf>);

// 帧内容的互斥由帧表的钉住与页表锁保证
unsafe impl Sync for FrameCell {}

/// 容量固定的用户物理页池
pub struct RamFrames {
    pages: Box<[FrameCell]>,
    free: SpinMutex<Vec<PhysPageNum>>,
}

impl RamFrames {
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: (0..capacity)
                .map(|_| FrameCell(UnsafeCell::new([0; PAGE_SIZE])))
                .collect(),
            free: SpinMutex::new(
                (0..capacity)
                    .rev()
                    .map(|i| PhysPageNum(FIRST_PPN + i))
                    .collect(),
            ),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pages.len()
    }

    pub fn free_pages(&self) -> usize {
        self.free.lock().len()
    }
}

impl PhysMemory for RamFrames {
    fn alloc_user_page(&self) -> Option<PhysPageNum> {
        self.free.lock().pop()
    }

    fn dealloc_user_page(&self, ppn: PhysPageNum) {
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&ppn), "{ppn:?} is freed twice");
        free.push(ppn);
    }

    fn frame_ptr(&self, ppn: PhysPageNum) -> *mut PageBuf {
        self.pages[ppn.0 - FIRST_PPN].0.get()
    }
}
