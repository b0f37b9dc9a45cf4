//! 进程的地址空间：补充页表与硬件页表，以及页的分配、认领、复制与销毁

use alloc::sync::Arc;

use defines::{
    config::{FAULT_EXIT_STATUS, PAGE_SIZE},
    error::{errno, KResult},
};
use scopeguard::ScopeGuard;

use crate::{
    address::{VirtAddr, VirtPageNum},
    frame::PinnedFrame,
    hal::PageTableRef,
    loader::Loader,
    page::{ForkSource, Page, PageKind, PageOps, PageType, UninitPage},
    spt::SupplementalPageTable,
    Vm, VmRef,
};

pub struct AddressSpace {
    vm: VmRef,
    page_table: PageTableRef,
    spt: SupplementalPageTable,
}

impl AddressSpace {
    /// 新建一个空的地址空间
    pub fn new(vm: VmRef, page_table: PageTableRef) -> Self {
        Self {
            vm,
            page_table,
            spt: SupplementalPageTable::new(),
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn page_table(&self) -> &PageTableRef {
        &self.page_table
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn find_page(&self, va: VirtAddr) -> Option<&Arc<Page>> {
        self.spt.find_page(va)
    }

    pub fn alloc_page(&mut self, ty: PageType, va: VirtAddr, writable: bool) -> KResult<()> {
        self.alloc_page_with_initializer(ty, va, writable, None)
    }

    /// 登记一个惰性装载的页。页在第一次缺页时才变成 `ty` 类型，并调用 `loader` 装载内容
    pub fn alloc_page_with_initializer(
        &mut self,
        ty: PageType,
        va: VirtAddr,
        writable: bool,
        loader: Option<Arc<dyn Loader>>,
    ) -> KResult<()> {
        match ty {
            PageType::Anon | PageType::File => {}
            PageType::Uninit => return Err(errno::EINVAL),
            PageType::PageCache => return Err(errno::UNSUPPORTED),
        }
        let vpn = va.vpn_floor();
        if self.spt.contains(vpn) {
            return Err(errno::EEXIST);
        }
        let page = Page::new(
            vpn,
            writable,
            Arc::clone(&self.page_table),
            PageKind::Uninit(UninitPage::new(ty, loader)),
        );
        self.spt.insert_page(Arc::new(page))
    }

    /// 立即为 `va` 所在的页分配帧并装载内容
    pub fn claim_page(&mut self, va: VirtAddr) -> KResult<()> {
        let page = self.spt.find_page(va).cloned().ok_or(errno::EFAULT)?;
        self.do_claim_page(&page)
    }

    pub(crate) fn do_claim_page(&self, page: &Arc<Page>) -> KResult<()> {
        {
            // 已经驻留的页只是映射被清除了，补上即可
            let state = page.state();
            if let Some(id) = state.frame {
                let ppn = self.vm.frames().ppn(id);
                if !page.page_table().lock().install(page.vpn(), ppn, page.writable()) {
                    return Err(errno::ENOMEM);
                }
                return Ok(());
            }
        }
        self.claim_frame(page).map(drop)
    }

    /// 为不驻留的页取得帧并装载内容，返回仍被钉住的帧
    fn claim_frame(&self, page: &Arc<Page>) -> KResult<PinnedFrame<'_>> {
        let frames = self.vm.frames();
        let frame = self.vm.get_frame()?;
        let (id, ppn) = (frame.id(), frame.ppn());

        let mut state = page.state();
        debug_assert!(state.frame.is_none(), "{:?} is claimed twice", page.vpn());
        frames.bind(id, page);
        state.frame = Some(id);
        // 任何一步失败都撤销绑定与映射，帧留给下一次分配
        let mut state = scopeguard::guard(state, |mut state| {
            page.page_table().lock().clear(page.vpn());
            frames.unbind(id);
            state.frame = None;
        });

        if !page.page_table().lock().install(page.vpn(), ppn, page.writable()) {
            return Err(errno::ENOMEM);
        }
        // SAFETY: 帧被钉住，且用户访问前会先拿页表锁，而我们持有页状态锁
        let content = unsafe { frames.bytes_mut(ppn) };
        state.kind.swap_in(&page.cx(self.vm.swap()), content)?;
        ScopeGuard::into_inner(state);
        trace!("claimed {:?} at {ppn:?}", page.vpn());
        Ok(frame)
    }

    /// 从补充页表中移除并销毁一页
    pub fn remove_page(&mut self, va: VirtAddr) -> bool {
        match self.spt.remove(va.vpn_floor()) {
            Some(page) => {
                page.destroy(self.vm.frames(), self.vm.swap());
                true
            }
            None => false,
        }
    }

    /// 复制出子进程的地址空间，失败时已复制的部分随之销毁
    pub fn fork(&self, page_table: PageTableRef) -> KResult<AddressSpace> {
        let mut child = AddressSpace::new(self.vm.clone(), page_table);
        child.copy_from(self)?;
        Ok(child)
    }

    /// 把 `src` 的每一页复制到当前地址空间。复制后两者互不影响
    pub fn copy_from(&mut self, src: &AddressSpace) -> KResult<()> {
        for parent in src.spt.pages() {
            let va = parent.vpn().page_start();
            let writable = parent.writable();
            match parent.fork_source() {
                ForkSource::Uninit {
                    target,
                    loader,
                    map_pages,
                } => {
                    self.alloc_page_with_initializer(target, va, writable, loader)?;
                    self.set_map_pages(va, map_pages);
                }
                ForkSource::Anon => {
                    self.alloc_page(PageType::Anon, va, writable)?;
                    self.copy_resident(parent, va)?;
                }
                ForkSource::File {
                    segment,
                    map_pages,
                    resident,
                } => {
                    self.alloc_page_with_initializer(
                        PageType::File,
                        va,
                        writable,
                        Some(Arc::new(segment)),
                    )?;
                    self.set_map_pages(va, map_pages);
                    if resident {
                        self.copy_resident(parent, va)?;
                    }
                }
            }
        }
        debug!("copied {} pages", src.spt.len());
        Ok(())
    }

    fn set_map_pages(&self, va: VirtAddr, count: usize) {
        if count > 0 {
            if let Some(page) = self.spt.find_page(va) {
                page.set_map_pages(count);
            }
        }
    }

    /// 认领子进程的页，再把父进程那一页的内容复制过来
    fn copy_resident(&self, parent: &Page, va: VirtAddr) -> KResult<()> {
        let child = self.spt.find_page(va).cloned().ok_or(errno::EFAULT)?;
        let frame = self.claim_frame(&child)?;
        let frames = self.vm.frames();
        // SAFETY: 子进程的帧被钉住，子进程此时还不会访问它
        let dst = unsafe { frames.bytes_mut(frame.ppn()) };
        parent.copy_content(frames, self.vm.swap(), dst)
    }

    /// 销毁所有页，之后补充页表为空，可以再次使用
    pub fn kill(&mut self) {
        let (frames, swap) = (self.vm.frames(), self.vm.swap());
        let count = self.spt.len();
        for page in self.spt.drain() {
            page.destroy(frames, swap);
        }
        if count > 0 {
            debug!("destroyed {count} pages");
        }
    }

    /// 在栈顶下方分配第一页栈并立即认领，返回初始的栈指针
    pub fn setup_stack(&mut self) -> KResult<VirtAddr> {
        let stack_top = VirtAddr(self.vm.config().stack_top);
        let va = stack_top - PAGE_SIZE;
        self.alloc_page(PageType::Anon, va, true)?;
        self.claim_page(va)?;
        Ok(stack_top)
    }

    pub fn page_count(&self) -> usize {
        self.spt.len()
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.spt.contains(vpn)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.kill();
    }
}

/// 系统调用边界上，VM 操作失败意味着进程以 -1 退出
pub fn exit_status_of<T>(result: &KResult<T>) -> Option<isize> {
    result.as_ref().err().map(|e| {
        info!("process killed: {}", e.info());
        FAULT_EXIT_STATUS
    })
}

#[cfg(test)]
mod tests {
    use std::{thread, vec::Vec};

    use defines::config::USER_STACK_TOP;

    use super::*;
    use crate::{
        loader::{FileSegment, FnLoader},
        sim::{test_space, test_vm, MemFile, SoftPageTable, SP},
        PageBuf,
    };

    fn va(n: usize) -> VirtAddr {
        VirtAddr(0x1000_0000 + n * PAGE_SIZE)
    }

    fn fill(space: &mut AddressSpace, va: VirtAddr, byte: u8) {
        space.write_user(va, &[byte; PAGE_SIZE], SP).unwrap();
    }

    fn read_page(space: &mut AddressSpace, va: VirtAddr) -> Vec<u8> {
        let mut buf = vec![0; PAGE_SIZE];
        space.read_user(va, &mut buf, SP).unwrap();
        buf
    }

    #[test]
    fn alloc_rejects_bad_requests() {
        let vm = test_vm(4, 4);
        let mut space = test_space(&vm);
        assert_eq!(space.alloc_page(PageType::Uninit, va(0), true), Err(errno::EINVAL));
        assert_eq!(
            space.alloc_page(PageType::PageCache, va(0), true),
            Err(errno::UNSUPPORTED)
        );
        space.alloc_page(PageType::Anon, va(0) + 0x10, true).unwrap();
        assert_eq!(space.alloc_page(PageType::Anon, va(0), false), Err(errno::EEXIST));
        assert_eq!(space.page_count(), 1);
        // 登记不会分配帧
        assert_eq!(vm.frames().frame_count(), 0);
        assert_eq!(space.claim_page(va(1)), Err(errno::EFAULT));
    }

    #[test]
    fn file_page_loads_on_first_claim() {
        let vm = test_vm(4, 4);
        let mut space = test_space(&vm);
        let data: Vec<u8> = (0..500).map(|i| (i % 256) as u8).collect();
        let file = MemFile::new(data.clone());
        let segment = FileSegment::new(file, 0, 200);
        space
            .alloc_page_with_initializer(PageType::File, va(0), false, Some(Arc::new(segment)))
            .unwrap();

        let page = space.find_page(va(0)).cloned().unwrap();
        assert_eq!(page.current_type(), PageType::Uninit);
        assert_eq!(page.page_type(), PageType::File);
        assert!(!page.is_resident());

        space.claim_page(va(0)).unwrap();
        assert_eq!(page.current_type(), PageType::File);
        assert!(page.is_resident());
        // 帧反向指回同一个页
        let id = page.state().frame.unwrap();
        assert!(Arc::ptr_eq(&vm.frames().bound_page(id).unwrap(), &page));

        let content = read_page(&mut space, va(0));
        assert_eq!(&content[..200], &data[..200]);
        assert!(content[200..].iter().all(|&b| b == 0));
    }

    #[test]
    fn anon_page_with_loader() {
        let vm = test_vm(4, 4);
        let mut space = test_space(&vm);
        let loader = FnLoader(|page: &mut PageBuf| -> KResult<()> {
            page[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
            Ok(())
        });
        space
            .alloc_page_with_initializer(PageType::Anon, va(0), true, Some(Arc::new(loader)))
            .unwrap();
        let content = read_page(&mut space, va(0));
        assert_eq!(&content[8..16], &[0xff; 8]);
        assert_eq!(space.find_page(va(0)).unwrap().current_type(), PageType::Anon);
    }

    #[test]
    fn failed_load_leaves_page_uninit() {
        let vm = test_vm(4, 4);
        let mut space = test_space(&vm);
        let loader = FnLoader(|_: &mut PageBuf| -> KResult<()> { Err(errno::EIO) });
        space
            .alloc_page_with_initializer(PageType::Anon, va(0), true, Some(Arc::new(loader)))
            .unwrap();

        assert_eq!(space.claim_page(va(0)), Err(errno::EIO));
        let page = space.find_page(va(0)).unwrap();
        assert_eq!(page.current_type(), PageType::Uninit);
        assert!(!page.is_resident());
        assert_eq!(space.page_table().lock().translate(va(0).vpn_floor()), None);
        // 帧已归还帧表，可以再次分配
        assert_eq!(vm.frames().resident_count(), 0);
        assert_eq!(vm.frames().frame_count(), 1);
    }

    #[test]
    fn file_page_without_backing_fails() {
        let vm = test_vm(4, 4);
        let mut space = test_space(&vm);
        let loader = FnLoader(|_: &mut PageBuf| -> KResult<()> { Ok(()) });
        space
            .alloc_page_with_initializer(PageType::File, va(0), true, Some(Arc::new(loader)))
            .unwrap();
        assert_eq!(space.claim_page(va(0)), Err(errno::EINVAL));
    }

    #[test]
    fn eviction_preserves_content() {
        let vm = test_vm(4, 32);
        let mut space = test_space(&vm);
        for i in 0..12 {
            space.alloc_page(PageType::Anon, va(i), true).unwrap();
            fill(&mut space, va(i), i as u8 + 1);
        }
        assert_eq!(vm.frames().frame_count(), 4);
        assert!(vm.swap().used_slots() >= 8);
        for i in (0..12).rev() {
            assert!(read_page(&mut space, va(i)).iter().all(|&b| b == i as u8 + 1));
        }
        // 换入后槽位即被释放，换出的页数加上驻留的页数正好是总页数
        let swapped = (0..12)
            .filter(|&i| space.find_page(va(i)).unwrap().swap_slot().is_some())
            .count();
        assert_eq!(swapped, vm.swap().used_slots());
        assert_eq!(swapped + vm.frames().resident_count(), 12);
    }

    #[test]
    fn eviction_terminates_when_every_page_is_hot() {
        let vm = test_vm(3, 8);
        let mut space = test_space(&vm);
        for i in 0..3 {
            space.alloc_page(PageType::Anon, va(i), true).unwrap();
            fill(&mut space, va(i), 1);
        }
        let page_table = space.page_table().clone();
        for i in 0..3 {
            assert!(page_table.lock().is_accessed(va(i).vpn_floor()));
        }
        space.alloc_page(PageType::Anon, va(3), true).unwrap();
        fill(&mut space, va(3), 2);
        assert_eq!(vm.swap().used_slots(), 1);
    }

    #[test]
    fn swap_exhaustion_fails_the_access() {
        let vm = test_vm(1, 0);
        let mut space = test_space(&vm);
        space.alloc_page(PageType::Anon, va(0), true).unwrap();
        space.alloc_page(PageType::Anon, va(1), true).unwrap();
        fill(&mut space, va(0), 9);
        assert_eq!(space.write_user(va(1), &[1], SP), Err(errno::ENOMEM));
        assert!(exit_status_of(&space.write_user(va(1), &[1], SP)).is_some());
        // 换出失败的页仍然驻留且内容完好
        assert!(read_page(&mut space, va(0)).iter().all(|&b| b == 9));
    }

    #[test]
    fn dirty_file_page_is_written_back_on_eviction() {
        let vm = test_vm(1, 0);
        let mut space = test_space(&vm);
        let file = MemFile::new(vec![0; 2 * PAGE_SIZE]);
        for i in 0..2 {
            let segment = FileSegment::new(file.clone(), i * PAGE_SIZE, PAGE_SIZE);
            space
                .alloc_page_with_initializer(PageType::File, va(i), true, Some(Arc::new(segment)))
                .unwrap();
        }
        // 文件页换出不需要交换区
        fill(&mut space, va(0), 5);
        assert!(read_page(&mut space, va(1)).iter().all(|&b| b == 0));
        assert_eq!(file.write_count(), 1);
        assert!(file.contents()[..PAGE_SIZE].iter().all(|&b| b == 5));

        // 干净的页换出时不写回
        assert!(read_page(&mut space, va(0)).iter().all(|&b| b == 5));
        assert_eq!(file.write_count(), 1);
    }

    #[test]
    fn fork_isolates_parent_and_child() {
        let vm = test_vm(8, 8);
        let mut parent = test_space(&vm);
        parent.alloc_page(PageType::Anon, va(0), true).unwrap();
        parent.alloc_page(PageType::Anon, va(1), true).unwrap();
        fill(&mut parent, va(0), b'p');

        let mut child = parent.fork(SoftPageTable::new_ref()).unwrap();
        assert_eq!(child.page_count(), 2);
        // 未初始化的页在子进程中仍是惰性的
        assert_eq!(child.find_page(va(1)).unwrap().current_type(), PageType::Uninit);
        assert!(child.find_page(va(0)).unwrap().is_resident());

        fill(&mut child, va(0), b'c');
        assert!(read_page(&mut parent, va(0)).iter().all(|&b| b == b'p'));
        fill(&mut parent, va(0), b'q');
        assert!(read_page(&mut child, va(0)).iter().all(|&b| b == b'c'));

        let parent_ppn = parent.page_table().lock().translate(va(0).vpn_floor());
        let child_ppn = child.page_table().lock().translate(va(0).vpn_floor());
        assert_ne!(parent_ppn, child_ppn);
    }

    #[test]
    fn fork_copies_swapped_out_pages() {
        let vm = test_vm(3, 32);
        let mut parent = test_space(&vm);
        for i in 0..6 {
            parent.alloc_page(PageType::Anon, va(i), true).unwrap();
            fill(&mut parent, va(i), 0x10 + i as u8);
        }
        let mut child = parent.fork(SoftPageTable::new_ref()).unwrap();
        for i in 0..6 {
            assert!(read_page(&mut child, va(i)).iter().all(|&b| b == 0x10 + i as u8));
            assert!(read_page(&mut parent, va(i)).iter().all(|&b| b == 0x10 + i as u8));
        }
    }

    #[test]
    fn kill_releases_everything() {
        let vm = test_vm(2, 16);
        let mut space = test_space(&vm);
        for i in 0..5 {
            space.alloc_page(PageType::Anon, va(i), true).unwrap();
            fill(&mut space, va(i), 1);
        }
        assert_eq!(vm.swap().used_slots(), 3);
        space.kill();
        assert_eq!(space.page_count(), 0);
        assert_eq!(vm.swap().used_slots(), 0);
        assert_eq!(vm.frames().resident_count(), 0);
        assert_eq!(space.page_table().lock().translate(va(4).vpn_floor()), None);

        // 清空后的补充页表可以继续使用，帧被复用
        space.alloc_page(PageType::Anon, va(0), true).unwrap();
        fill(&mut space, va(0), 2);
        assert_eq!(vm.frames().frame_count(), 2);
        drop(space);
        assert_eq!(vm.frames().resident_count(), 0);
    }

    #[test]
    fn setup_stack_claims_first_page() {
        let vm = test_vm(2, 2);
        let mut space = test_space(&vm);
        let sp = space.setup_stack().unwrap();
        assert_eq!(sp, VirtAddr(USER_STACK_TOP));
        let page = space.find_page(sp - 1).unwrap();
        assert!(page.is_resident() && page.writable());
        assert_eq!(page.page_type(), PageType::Anon);
        space.write_user(sp - 8, &42u64.to_le_bytes(), sp).unwrap();
    }

    #[test]
    fn exit_status() {
        assert_eq!(exit_status_of(&KResult::<()>::Err(errno::EFAULT)), Some(-1));
        assert_eq!(exit_status_of(&KResult::Ok(3)), None);
    }

    #[test]
    fn processes_thrash_concurrently() {
        let vm = test_vm(8, 256);
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let vm = vm.clone();
                thread::spawn(move || {
                    let mut space = test_space(&vm);
                    for i in 0..16 {
                        space.alloc_page(PageType::Anon, va(i), true).unwrap();
                        fill(&mut space, va(i), t * 16 + i as u8);
                    }
                    for _ in 0..3 {
                        for i in 0..16 {
                            let content = read_page(&mut space, va(i));
                            assert!(content.iter().all(|&b| b == t * 16 + i as u8));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(vm.swap().used_slots(), 0);
        assert_eq!(vm.frames().frame_count(), 8);
    }
}
