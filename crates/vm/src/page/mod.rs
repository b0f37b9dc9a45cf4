//! 补充页表中的页记录
//!
//! 每个页都处于 [`PageKind`] 的某一种状态。未初始化的页在第一次缺页时转变为匿名页或
//! 文件页，此后不会再变回去。各状态通过 [`PageOps`] 提供换入、换出与销毁操作。

mod anon;
mod file;
mod uninit;

use alloc::sync::Arc;

use defines::error::{errno, KResult};
use klocks::{SpinMutex, SpinMutexGuard};

pub(crate) use self::{anon::AnonPage, file::FilePage, uninit::UninitPage};
use crate::{
    address::VirtPageNum,
    frame::{FrameId, FrameTable},
    hal::{PageTable, PageTableRef},
    loader::{FileSegment, Loader},
    swap::SwapArea,
    PageBuf,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// 尚未初始化，只是内部的过渡状态，不能直接申请
    Uninit,
    /// 与文件无关的页，换出时写入交换区
    Anon,
    /// 映射了文件的页，换出时写回文件
    File,
    /// 文件系统的页缓存，VM 子系统不支持
    PageCache,
}

/// 页操作所需的上下文
pub(crate) struct PageCx<'a> {
    pub swap: &'a SwapArea,
    pub vpn: VirtPageNum,
    pub page_table: &'a SpinMutex<dyn PageTable>,
}

impl PageCx<'_> {
    /// 清除映射，并返回清除前的 dirty 位
    pub fn clear_mapping(&self) -> bool {
        let mut page_table = self.page_table.lock();
        let dirty = page_table.is_dirty(self.vpn);
        page_table.clear(self.vpn);
        dirty
    }
}

pub(crate) trait PageOps {
    /// 把页的内容装进 `frame`
    fn swap_in(&mut self, cx: &PageCx<'_>, frame: &mut PageBuf) -> KResult<()>;
    /// 把 `frame` 中的内容移到后备存储，并清除映射
    fn swap_out(&mut self, cx: &PageCx<'_>, frame: &PageBuf) -> KResult<()>;
    /// 释放该类型持有的资源。`frame` 是驻留时的内容，帧本身由调用方处理
    fn destroy(&mut self, cx: &PageCx<'_>, frame: Option<&PageBuf>);
}

pub(crate) enum PageKind {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

impl PageKind {
    pub fn page_type(&self) -> PageType {
        match self {
            PageKind::Uninit(_) => PageType::Uninit,
            PageKind::Anon(_) => PageType::Anon,
            PageKind::File(_) => PageType::File,
        }
    }
}

impl PageOps for PageKind {
    fn swap_in(&mut self, cx: &PageCx<'_>, frame: &mut PageBuf) -> KResult<()> {
        match self {
            PageKind::Uninit(uninit) => {
                // 装载成功后才真正切换状态，失败的页仍是未初始化的
                let initialized = uninit.initialize()?;
                frame.fill(0);
                if let Some(loader) = uninit.loader() {
                    loader.load(frame)?;
                }
                trace!(
                    "transmute {:?} into {:?}",
                    cx.vpn,
                    initialized.page_type()
                );
                *self = initialized;
                Ok(())
            }
            PageKind::Anon(anon) => anon.swap_in(cx, frame),
            PageKind::File(file) => file.swap_in(cx, frame),
        }
    }

    fn swap_out(&mut self, cx: &PageCx<'_>, frame: &PageBuf) -> KResult<()> {
        match self {
            PageKind::Uninit(_) => {
                if cfg!(debug_assertions) {
                    panic!("uninit page {:?} is never resident", cx.vpn);
                }
                Err(errno::EINVAL)
            }
            PageKind::Anon(anon) => anon.swap_out(cx, frame),
            PageKind::File(file) => file.swap_out(cx, frame),
        }
    }

    fn destroy(&mut self, cx: &PageCx<'_>, frame: Option<&PageBuf>) {
        match self {
            PageKind::Uninit(_) => {}
            PageKind::Anon(anon) => anon.destroy(cx, frame),
            PageKind::File(file) => file.destroy(cx, frame),
        }
    }
}

pub(crate) struct PageState {
    /// 驻留时所在的帧
    pub frame: Option<FrameId>,
    pub kind: PageKind,
}

/// 一个进程的一个虚拟页
pub struct Page {
    vpn: VirtPageNum,
    writable: bool,
    page_table: PageTableRef,
    state: SpinMutex<PageState>,
}

impl Page {
    pub(crate) fn new(
        vpn: VirtPageNum,
        writable: bool,
        page_table: PageTableRef,
        kind: PageKind,
    ) -> Self {
        Self {
            vpn,
            writable,
            page_table,
            state: SpinMutex::new(PageState { frame: None, kind }),
        }
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn page_table(&self) -> &SpinMutex<dyn PageTable> {
        &self.page_table
    }

    pub(crate) fn state(&self) -> SpinMutexGuard<'_, PageState> {
        self.state.lock()
    }

    pub(crate) fn cx<'a>(&'a self, swap: &'a SwapArea) -> PageCx<'a> {
        PageCx {
            swap,
            vpn: self.vpn,
            page_table: &self.page_table,
        }
    }

    /// 当前所处的状态
    pub fn current_type(&self) -> PageType {
        self.state().kind.page_type()
    }

    /// 页最终的类型。未初始化的页返回它将要变成的类型
    pub fn page_type(&self) -> PageType {
        match &self.state().kind {
            PageKind::Uninit(uninit) => uninit.target(),
            kind => kind.page_type(),
        }
    }

    pub fn is_resident(&self) -> bool {
        self.state().frame.is_some()
    }

    /// 交换区中保存该页内容的槽位
    pub fn swap_slot(&self) -> Option<crate::SwapSlot> {
        match &self.state().kind {
            PageKind::Anon(anon) => anon.slot(),
            _ => None,
        }
    }

    /// 若是某个 mmap 映射的第一页，返回映射的总页数，否则为 0
    pub fn map_pages(&self) -> usize {
        match &self.state().kind {
            PageKind::Uninit(uninit) => uninit.map_pages,
            PageKind::File(file) => file.map_pages,
            PageKind::Anon(_) => 0,
        }
    }

    pub(crate) fn set_map_pages(&self, count: usize) {
        match &mut self.state().kind {
            PageKind::Uninit(uninit) => uninit.map_pages = count,
            PageKind::File(file) => file.map_pages = count,
            PageKind::Anon(_) => debug_assert!(count == 0, "anon page {:?} heads no mapping", self.vpn),
        }
    }

    /// 读出 accessed 位并清零，用于时钟算法
    pub(crate) fn take_accessed(&self) -> bool {
        let mut page_table = self.page_table.lock();
        let accessed = page_table.is_accessed(self.vpn);
        if accessed {
            page_table.set_accessed(self.vpn, false);
        }
        accessed
    }

    /// 驱逐时调用。页已经不在帧 `id` 上（比如刚被销毁）时什么也不做
    pub(crate) fn swap_out(&self, swap: &SwapArea, id: FrameId, frame: &PageBuf) -> KResult<()> {
        let mut state = self.state();
        if state.frame != Some(id) {
            return Ok(());
        }
        state.kind.swap_out(&self.cx(swap), frame)?;
        state.frame = None;
        Ok(())
    }

    /// 释放页持有的资源，并解除与帧的绑定。帧留在帧表中等待复用
    pub(crate) fn destroy(&self, frames: &FrameTable, swap: &SwapArea) {
        let mut state = self.state();
        let resident = state.frame.take();
        // SAFETY: 持有页状态锁期间，驱逐者无法完成对该帧的换出
        let content = resident.map(|id| unsafe { frames.bytes(frames.ppn(id)) });
        state.kind.destroy(&self.cx(swap), content);
        if let Some(id) = resident {
            frames.unbind(id);
        }
    }

    /// fork 时复制的依据
    pub(crate) fn fork_source(&self) -> ForkSource {
        let state = self.state();
        match &state.kind {
            PageKind::Uninit(uninit) => ForkSource::Uninit {
                target: uninit.target(),
                loader: uninit.loader().cloned(),
                map_pages: uninit.map_pages,
            },
            PageKind::Anon(_) => ForkSource::Anon,
            PageKind::File(file) => ForkSource::File {
                segment: file.segment().clone(),
                map_pages: file.map_pages,
                resident: state.frame.is_some(),
            },
        }
    }

    /// 把页的当前内容复制到 `dst`。非驻留的文件页什么也不做，子进程会重新读文件
    pub(crate) fn copy_content(
        &self,
        frames: &FrameTable,
        swap: &SwapArea,
        dst: &mut PageBuf,
    ) -> KResult<()> {
        let state = self.state();
        match (state.frame, &state.kind) {
            (Some(id), _) => {
                // SAFETY: 持有页状态锁，该帧不会被换出或复用
                dst.copy_from_slice(unsafe { frames.bytes(frames.ppn(id)) });
                Ok(())
            }
            (None, PageKind::Anon(anon)) => match anon.slot() {
                Some(slot) => swap.read_slot(slot, dst),
                None => {
                    dst.fill(0);
                    Ok(())
                }
            },
            (None, _) => Ok(()),
        }
    }
}

pub(crate) enum ForkSource {
    Uninit {
        target: PageType,
        loader: Option<Arc<dyn Loader>>,
        map_pages: usize,
    },
    Anon,
    File {
        segment: FileSegment,
        map_pages: usize,
        resident: bool,
    },
}
