//! 帧表：所有用户物理页的全局记录
//!
//! 帧一旦从物理页分配器取得就不再归还，物理页不足时用时钟算法挑选牺牲者复用。
//! 帧表只通过 [`Weak`] 引用所在的页，页的生命周期由补充页表决定。

use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};

use defines::error::KResult;
use klocks::SpinMutex;

use crate::{address::PhysPageNum, hal::PhysMemory, page::Page, swap::SwapArea, PageBuf};

/// 帧在帧表中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

struct Frame {
    ppn: PhysPageNum,
    page: Option<Weak<Page>>,
    /// 被钉住的帧正在装载或换出，不参与驱逐
    pinned: bool,
}

struct FrameTableInner {
    frames: Vec<Frame>,
    hand: usize,
}

impl FrameTableInner {
    /// 时钟算法。最多转两圈，第一圈清掉的 accessed 位保证第二圈能找到牺牲者
    fn get_victim(&mut self) -> Option<FrameId> {
        let len = self.frames.len();
        for _ in 0..2 * len {
            let idx = self.hand;
            self.hand = (self.hand + 1) % len;
            let frame = &self.frames[idx];
            if frame.pinned {
                continue;
            }
            let Some(page) = frame.page.as_ref().and_then(Weak::upgrade) else {
                // 页已经没了的帧直接复用
                return Some(FrameId(idx));
            };
            if page.take_accessed() {
                continue;
            }
            return Some(FrameId(idx));
        }
        None
    }
}

pub struct FrameTable {
    memory: Arc<dyn PhysMemory>,
    inner: SpinMutex<FrameTableInner>,
}

impl FrameTable {
    pub fn new(memory: Arc<dyn PhysMemory>) -> Self {
        Self {
            memory,
            inner: SpinMutex::new(FrameTableInner {
                frames: Vec::new(),
                hand: 0,
            }),
        }
    }

    /// 目前从物理页分配器取得的帧数
    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// 正被某个页占用的帧数
    pub fn resident_count(&self) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|frame| frame.page.as_ref().is_some_and(|page| page.strong_count() > 0))
            .count()
    }

    pub(crate) fn ppn(&self, id: FrameId) -> PhysPageNum {
        self.inner.lock().frames[id.0].ppn
    }

    /// # Safety
    ///
    /// 调用方需保证没有别人同时写这个帧
    pub(crate) unsafe fn bytes<'a>(&self, ppn: PhysPageNum) -> &'a PageBuf {
        unsafe { &*self.memory.frame_ptr(ppn) }
    }

    /// # Safety
    ///
    /// 调用方需保证独占这个帧，通常意味着帧已被钉住且没有有效的映射
    pub(crate) unsafe fn bytes_mut<'a>(&self, ppn: PhysPageNum) -> &'a mut PageBuf {
        unsafe { &mut *self.memory.frame_ptr(ppn) }
    }

    /// 取得一个清零且被钉住的帧。优先向物理页分配器要，要不到则驱逐
    pub(crate) fn get_frame(&self, swap: &SwapArea) -> KResult<PinnedFrame<'_>> {
        let (id, ppn) = match self.memory.alloc_user_page() {
            Some(ppn) => {
                let mut inner = self.inner.lock();
                let id = FrameId(inner.frames.len());
                inner.frames.push(Frame {
                    ppn,
                    page: None,
                    pinned: true,
                });
                trace!("new {id:?} at {ppn:?}");
                (id, ppn)
            }
            None => self.evict_frame(swap)?,
        };
        // SAFETY: 帧刚被钉住且没有绑定任何页
        unsafe { self.bytes_mut(ppn) }.fill(0);
        Ok(PinnedFrame {
            frames: self,
            id,
            ppn,
        })
    }

    /// 选出牺牲者并把它的内容换出。换出的 I/O 不持有帧表锁
    fn evict_frame(&self, swap: &SwapArea) -> KResult<(FrameId, PhysPageNum)> {
        let (id, ppn, victim) = {
            let mut inner = self.inner.lock();
            let Some(id) = inner.get_victim() else {
                error!("no frame can be evicted among {} frames", inner.frames.len());
                panic!("out of user frames");
            };
            let frame = &mut inner.frames[id.0];
            frame.pinned = true;
            (id, frame.ppn, frame.page.take().and_then(|page| page.upgrade()))
        };
        if let Some(page) = victim {
            debug!("evict {:?} from {id:?}", page.vpn());
            // SAFETY: 帧已被钉住，换出前会先清除映射
            let content = unsafe { self.bytes(ppn) };
            if let Err(e) = page.swap_out(swap, id, content) {
                warn!("failed to evict {:?}: {}", page.vpn(), e.info());
                let mut inner = self.inner.lock();
                let frame = &mut inner.frames[id.0];
                frame.page = Some(Arc::downgrade(&page));
                frame.pinned = false;
                return Err(e);
            }
        }
        Ok((id, ppn))
    }

    /// 把帧绑定到页上。调用方持有页状态锁
    pub(crate) fn bind(&self, id: FrameId, page: &Arc<Page>) {
        self.inner.lock().frames[id.0].page = Some(Arc::downgrade(page));
    }

    /// 解除绑定，帧留待复用
    pub(crate) fn unbind(&self, id: FrameId) {
        self.inner.lock().frames[id.0].page = None;
    }

    fn unpin(&self, id: FrameId) {
        self.inner.lock().frames[id.0].pinned = false;
    }

    #[cfg(test)]
    pub(crate) fn bound_page(&self, id: FrameId) -> Option<Arc<Page>> {
        self.inner.lock().frames[id.0]
            .page
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl Drop for FrameTable {
    fn drop(&mut self) {
        for frame in self.inner.get_mut().frames.drain(..) {
            self.memory.dealloc_user_page(frame.ppn);
        }
    }
}

/// 被钉住的帧，离开作用域时解除钉住
pub(crate) struct PinnedFrame<'a> {
    frames: &'a FrameTable,
    id: FrameId,
    ppn: PhysPageNum,
}

impl PinnedFrame<'_> {
    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }
}

impl Drop for PinnedFrame<'_> {
    fn drop(&mut self) {
        self.frames.unpin(self.id);
    }
}
