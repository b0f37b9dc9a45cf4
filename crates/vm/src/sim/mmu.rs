//! 模拟 MMU 访问用户内存：查页表，缺页时交给缺页处理，并维护 accessed 与 dirty 位

use defines::{config::PAGE_SIZE, error::KResult};

use crate::{address::VirtAddr, fault::PageFaultFlags, space::AddressSpace};

impl AddressSpace {
    /// 以用户身份读 `[va, va + buf.len())`
    pub fn read_user(&mut self, va: VirtAddr, buf: &mut [u8], user_sp: VirtAddr) -> KResult<()> {
        self.access_user(va, buf.len(), false, user_sp, |frame, done| {
            buf[done..done + frame.len()].copy_from_slice(frame);
        })
    }

    /// 以用户身份写 `[va, va + data.len())`
    pub fn write_user(&mut self, va: VirtAddr, data: &[u8], user_sp: VirtAddr) -> KResult<()> {
        self.access_user(va, data.len(), true, user_sp, |frame, done| {
            frame.copy_from_slice(&data[done..done + frame.len()]);
        })
    }

    fn access_user(
        &mut self,
        va: VirtAddr,
        len: usize,
        write: bool,
        user_sp: VirtAddr,
        mut copy: impl FnMut(&mut [u8], usize),
    ) -> KResult<()> {
        let mut done = 0;
        while done < len {
            let cur = va + done;
            let offset = cur.page_offset();
            let chunk = (PAGE_SIZE - offset).min(len - done);
            let vpn = cur.vpn_floor();
            loop {
                let fault = {
                    let mut page_table = self.page_table().lock();
                    match page_table.translate(vpn) {
                        Some(ppn) if !write || page_table.is_writable(vpn) => {
                            page_table.set_accessed(vpn, true);
                            if write {
                                page_table.set_dirty(vpn, true);
                            }
                            // SAFETY: 持有页表锁时映射不会被清除，而换出总是先清除映射再读写帧
                            let frame = unsafe { self.vm().frames().bytes_mut(ppn) };
                            copy(&mut frame[offset..offset + chunk], done);
                            None
                        }
                        Some(_) => Some(PageFaultFlags::USER | PageFaultFlags::WRITE),
                        None if write => Some(
                            PageFaultFlags::NOT_PRESENT | PageFaultFlags::USER | PageFaultFlags::WRITE,
                        ),
                        None => Some(PageFaultFlags::NOT_PRESENT | PageFaultFlags::USER),
                    }
                };
                match fault {
                    None => break,
                    // 换入的页可能在重试前又被驱逐，所以要重新查页表
                    Some(flags) => self.handle_page_fault(cur, flags, user_sp)?,
                }
            }
            done += chunk;
        }
        Ok(())
    }
}
