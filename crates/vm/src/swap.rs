//! 交换区：磁盘上按页大小划分的槽位，用位图管理
//!
//! 位图的查找与标记在全局的位图锁下进行，而真正的扇区读写不持有该锁

use alloc::{boxed::Box, vec, vec::Vec};

use defines::{
    config::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE},
    error::{errno, KResult},
};
use klocks::SpinMutex;

use crate::{hal::BlockDevice, PageBuf};

/// 交换槽的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub usize);

impl SwapSlot {
    const fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

struct SwapBitmap {
    words: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SwapBitmap {
    fn new(slots: usize) -> Self {
        Self {
            words: vec![0; slots.div_ceil(64)],
            slots,
            used: 0,
        }
    }

    /// 首次适配地找到一个空闲槽并标记
    fn scan_and_flip(&mut self) -> Option<SwapSlot> {
        for (idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let slot = idx * 64 + bit;
            if slot >= self.slots {
                return None;
            }
            *word |= 1 << bit;
            self.used += 1;
            return Some(SwapSlot(slot));
        }
        None
    }

    fn test(&self, slot: SwapSlot) -> bool {
        slot.0 < self.slots && self.words[slot.0 / 64] & (1 << (slot.0 % 64)) != 0
    }

    fn reset(&mut self, slot: SwapSlot) {
        debug_assert!(self.test(slot), "{slot:?} is freed twice");
        if self.test(slot) {
            self.words[slot.0 / 64] &= !(1 << (slot.0 % 64));
            self.used -= 1;
        }
    }
}

pub struct SwapArea {
    disk: Option<Box<dyn BlockDevice>>,
    bitmap: SpinMutex<SwapBitmap>,
}

impl SwapArea {
    /// 没有交换盘时槽位数为 0，所有换出都会失败
    pub fn new(disk: Option<Box<dyn BlockDevice>>) -> Self {
        let slots = disk
            .as_ref()
            .map_or(0, |disk| disk.sector_count() / SECTORS_PER_PAGE);
        info!("swap area initialized with {slots} slots");
        Self {
            disk,
            bitmap: SpinMutex::new(SwapBitmap::new(slots)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.bitmap.lock().slots
    }

    pub fn used_slots(&self) -> usize {
        self.bitmap.lock().used
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        self.bitmap.lock().test(slot)
    }

    pub fn alloc_slot(&self) -> KResult<SwapSlot> {
        self.bitmap.lock().scan_and_flip().ok_or_else(|| {
            warn!("swap area exhausted");
            errno::ENOMEM
        })
    }

    pub fn free_slot(&self, slot: SwapSlot) {
        self.bitmap.lock().reset(slot);
    }

    /// 把一页内容写到 `slot` 的各个扇区上
    pub fn write_slot(&self, slot: SwapSlot, page: &PageBuf) -> KResult<()> {
        let disk = self.disk.as_ref().ok_or(errno::ENOSPC)?;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in page.chunks(SECTOR_SIZE).enumerate() {
            sector_buf[..chunk.len()].copy_from_slice(chunk);
            sector_buf[chunk.len()..].fill(0);
            disk.write_sector(slot.first_sector() + i, &sector_buf)?;
        }
        Ok(())
    }

    /// 从 `slot` 读回一页，不释放槽位
    pub fn read_slot(&self, slot: SwapSlot, page: &mut PageBuf) -> KResult<()> {
        let disk = self.disk.as_ref().ok_or(errno::ENOSPC)?;
        debug_assert!(self.is_used(slot));
        let mut sector_buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in page.chunks_mut(SECTOR_SIZE).enumerate() {
            disk.read_sector(slot.first_sector() + i, &mut sector_buf)?;
            chunk.copy_from_slice(&sector_buf[..chunk.len()]);
        }
        Ok(())
    }

    /// 读回一页并释放它所占的槽位
    pub fn swap_in(&self, slot: SwapSlot, page: &mut PageBuf) -> KResult<()> {
        self.read_slot(slot, page)?;
        self.free_slot(slot);
        trace!("swap in from {slot:?}");
        Ok(())
    }
}

const _: () = assert!(SECTORS_PER_PAGE * SECTOR_SIZE >= PAGE_SIZE);
