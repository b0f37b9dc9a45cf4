//! 文件的内存映射

use alloc::sync::Arc;

use defines::{
    config::{CONSOLE_FD_END, PAGE_SIZE},
    error::{errno, KResult},
};
use smallvec::SmallVec;

use crate::{
    address::VirtAddr,
    hal::{File, FileTable},
    loader::FileSegment,
    page::PageType,
    space::AddressSpace,
};

impl AddressSpace {
    /// mmap 系统调用。控制台的描述符不能映射
    pub fn sys_mmap(
        &mut self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        fd: usize,
        files: &dyn FileTable,
        offset: usize,
    ) -> KResult<VirtAddr> {
        if fd < CONSOLE_FD_END {
            warn!("mmap on console fd {fd}");
            return Err(errno::EBADF);
        }
        let file = files.get(fd).ok_or(errno::EBADF)?;
        self.do_mmap(addr, length, writable, &file, offset)
    }

    /// 把 `file` 从 `offset` 起的内容惰性地映射到 `addr`
    ///
    /// 映射持有一个重新打开的句柄，关闭原来的描述符不影响映射
    pub fn do_mmap(
        &mut self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn File>,
        offset: usize,
    ) -> KResult<VirtAddr> {
        if length == 0
            || !addr.is_page_aligned()
            || offset % PAGE_SIZE != 0
            || !self.vm().config().is_user_range(addr, length)
        {
            return Err(errno::EINVAL);
        }
        if file.is_empty() {
            return Err(errno::EINVAL);
        }

        let start = addr.vpn_floor();
        let page_count = length.div_ceil(PAGE_SIZE);
        page_count
            .checked_mul(PAGE_SIZE)
            .and_then(|span| offset.checked_add(span))
            .ok_or(errno::EINVAL)?;
        if (0..page_count).any(|i| self.contains(start + i)) {
            warn!("mmap at {addr:?} overlaps existing pages");
            return Err(errno::EEXIST);
        }

        let file = file.reopen()?;
        let mut remaining = file.len().saturating_sub(offset).min(length);
        let mut mapped = SmallVec::<[VirtAddr; 8]>::new();
        for i in 0..page_count {
            let va = (start + i).page_start();
            let read_bytes = remaining.min(PAGE_SIZE);
            let segment = FileSegment::new(Arc::clone(&file), offset + i * PAGE_SIZE, read_bytes);
            let allocated =
                self.alloc_page_with_initializer(PageType::File, va, writable, Some(Arc::new(segment)));
            if let Err(e) = allocated {
                for va in mapped {
                    self.remove_page(va);
                }
                return Err(e);
            }
            mapped.push(va);
            remaining -= read_bytes;
        }
        if let Some(first) = self.find_page(addr) {
            first.set_map_pages(page_count);
        }
        debug!("mmap {page_count} pages at {addr:?}, offset {offset:#x}");
        Ok(addr)
    }

    /// 解除 `addr` 处的映射。`addr` 不是某个映射的起点时什么也不做
    pub fn munmap(&mut self, addr: VirtAddr) {
        let Some(count) = self.find_page(addr).map(|page| page.map_pages()) else {
            return;
        };
        let start = addr.vpn_floor();
        for i in 0..count {
            self.remove_page((start + i).page_start());
        }
        debug!("munmap {count} pages at {addr:?}");
    }
}
