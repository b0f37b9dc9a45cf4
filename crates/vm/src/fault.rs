//! 缺页处理与栈增长

use bitflags::bitflags;
use defines::{
    config::{PAGE_SIZE, STACK_GROWTH_SLACK},
    error::{errno, KResult},
};

use crate::{address::VirtAddr, page::PageType, space::AddressSpace};

bitflags! {
    /// 缺页的原因
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFaultFlags: u8 {
        /// 访问的页不存在。不带此位说明是写了只读页
        const NOT_PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        /// 发生在用户态
        const USER = 1 << 2;
    }
}

impl AddressSpace {
    /// 处理缺页。返回错误时调用方应以 -1 结束进程
    ///
    /// `user_sp` 是用户栈指针。内核态缺页时应传入陷入内核时保存的用户栈指针
    pub fn handle_page_fault(
        &mut self,
        addr: VirtAddr,
        flags: PageFaultFlags,
        user_sp: VirtAddr,
    ) -> KResult<()> {
        trace!("page fault at {addr:?}, {flags:?}");
        if addr.is_null() || self.vm().config().is_kernel(addr) {
            warn!("fault on invalid address {addr:?}");
            return Err(errno::EFAULT);
        }
        if !flags.contains(PageFaultFlags::NOT_PRESENT) {
            warn!("write to read-only page at {addr:?}");
            return Err(errno::EACCES);
        }
        let Some(page) = self.find_page(addr).cloned() else {
            if self.is_stack_growth(addr, user_sp) {
                return self.grow_stack(addr);
            }
            warn!("segmentation fault at {addr:?}");
            return Err(errno::EFAULT);
        };
        if flags.contains(PageFaultFlags::WRITE) && !page.writable() {
            warn!("write to read-only page at {addr:?}");
            return Err(errno::EACCES);
        }
        self.do_claim_page(&page)
    }

    /// 栈区内、且不低于栈指针太多的访问视为栈增长
    fn is_stack_growth(&self, addr: VirtAddr, user_sp: VirtAddr) -> bool {
        let config = self.vm().config();
        let bottom = config.stack_top.saturating_sub(config.stack_limit);
        (bottom..config.stack_top).contains(&addr.0)
            && addr.0.saturating_add(STACK_GROWTH_SLACK) >= user_sp.0
    }

    fn grow_stack(&mut self, addr: VirtAddr) -> KResult<()> {
        let va = addr.vpn_floor().page_start();
        debug!("grow stack to {va:?}");
        self.alloc_page(PageType::Anon, va, true)?;
        self.claim_page(va)
    }

    /// 检查系统调用传入的用户缓冲区：每一页都已登记，要写入的页还需可写
    pub fn check_user_buffer(&self, addr: VirtAddr, len: usize, write: bool) -> KResult<()> {
        if len == 0 {
            return Ok(());
        }
        if !self.vm().config().is_user_range(addr, len) {
            return Err(errno::EFAULT);
        }
        let end = addr.0 + len;
        let mut va = VirtAddr(addr.0 & !(PAGE_SIZE - 1));
        while va.0 < end {
            let page = self.find_page(va).ok_or(errno::EFAULT)?;
            if write && !page.writable() {
                return Err(errno::EACCES);
            }
            va = va + PAGE_SIZE;
        }
        Ok(())
    }
}
