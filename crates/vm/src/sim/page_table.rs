//! 软件模拟的页表，accessed 与 dirty 位由 [`AddressSpace`](crate::AddressSpace) 的用户访问函数维护

use alloc::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashMap;
use klocks::SpinMutex;

use crate::{
    address::{PhysPageNum, VirtPageNum},
    hal::{PageTable, PageTableRef},
};

bitflags! {
    /// page table entry flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u16 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const U = 1 << 4;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(C)]
struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        Self {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    fn ppn(&self) -> PhysPageNum {
        const LOW_44_MASK: usize = (1 << 44) - 1;
        PhysPageNum((self.bits >> 10) & LOW_44_MASK)
    }

    fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u16)
    }

    fn set_flag(&mut self, flag: PTEFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        *self = Self::new(self.ppn(), flags);
    }
}

#[derive(Default)]
pub struct SoftPageTable {
    entries: HashMap<VirtPageNum, PageTableEntry>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包装成可以在页之间共享的页表
    pub fn new_ref() -> PageTableRef {
        Arc::new(SpinMutex::new(Self::new()))
    }

    pub fn flags(&self, vpn: VirtPageNum) -> Option<PTEFlags> {
        self.entries.get(&vpn).map(PageTableEntry::flags)
    }

    /// 有效映射的个数
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }

    fn has_flag(&self, vpn: VirtPageNum, flag: PTEFlags) -> bool {
        self.flags(vpn).is_some_and(|flags| flags.contains(flag))
    }

    fn set_flag(&mut self, vpn: VirtPageNum, flag: PTEFlags, value: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set_flag(flag, value);
        }
    }
}

impl PageTable for SoftPageTable {
    fn install(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> bool {
        let mut flags = PTEFlags::V | PTEFlags::R | PTEFlags::U;
        flags.set(PTEFlags::W, writable);
        self.entries.insert(vpn, PageTableEntry::new(ppn, flags));
        true
    }

    fn clear(&mut self, vpn: VirtPageNum) {
        self.entries.remove(&vpn);
    }

    fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.has_flag(vpn, PTEFlags::D)
    }

    fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        self.set_flag(vpn, PTEFlags::D, dirty);
    }

    fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.has_flag(vpn, PTEFlags::A)
    }

    fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        self.set_flag(vpn, PTEFlags::A, accessed);
    }

    fn is_writable(&self, vpn: VirtPageNum) -> bool {
        self.has_flag(vpn, PTEFlags::W)
    }

    fn translate(&self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        self.entries.get(&vpn).map(PageTableEntry::ppn)
    }
}
