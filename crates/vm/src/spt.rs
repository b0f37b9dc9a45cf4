use alloc::sync::Arc;

use defines::error::{errno, KResult};
use hashbrown::HashMap;

use crate::{
    address::{VirtAddr, VirtPageNum},
    page::Page,
};

/// 补充页表：进程的每个虚拟页应当是什么
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPageNum, Arc<Page>>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找 `va` 所在的页，`va` 不必对齐
    pub fn find_page(&self, va: VirtAddr) -> Option<&Arc<Page>> {
        self.pages.get(&va.vpn_floor())
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 同一虚拟页只能插入一次
    pub fn insert_page(&mut self, page: Arc<Page>) -> KResult<()> {
        let vpn = page.vpn();
        debug_assert!(!self.pages.contains_key(&vpn), "{vpn:?} is inserted twice");
        if self.pages.contains_key(&vpn) {
            return Err(errno::EEXIST);
        }
        self.pages.insert(vpn, page);
        Ok(())
    }

    pub(crate) fn remove(&mut self, vpn: VirtPageNum) -> Option<Arc<Page>> {
        self.pages.remove(&vpn)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.pages.values()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Arc<Page>> + '_ {
        self.pages.drain().map(|(_, page)| page)
    }
}
