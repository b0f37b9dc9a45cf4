use alloc::sync::Arc;

use defines::error::{errno, KResult};

use super::{AnonPage, FilePage, PageKind, PageType};
use crate::loader::Loader;

/// 还没被访问过的页。记录了它将变成什么，以及如何装载内容
pub(crate) struct UninitPage {
    target: PageType,
    loader: Option<Arc<dyn Loader>>,
    pub map_pages: usize,
}

impl UninitPage {
    pub fn new(target: PageType, loader: Option<Arc<dyn Loader>>) -> Self {
        debug_assert!(matches!(target, PageType::Anon | PageType::File));
        Self {
            target,
            loader,
            map_pages: 0,
        }
    }

    pub fn target(&self) -> PageType {
        self.target
    }

    pub fn loader(&self) -> Option<&Arc<dyn Loader>> {
        self.loader.as_ref()
    }

    /// 按目标类型构造初始化后的状态
    pub fn initialize(&self) -> KResult<PageKind> {
        match self.target {
            PageType::Anon => Ok(PageKind::Anon(AnonPage::new())),
            PageType::File => {
                let segment = self
                    .loader
                    .as_deref()
                    .and_then(|loader| loader.backing())
                    .ok_or(errno::EINVAL)?;
                Ok(PageKind::File(FilePage::new(segment.clone(), self.map_pages)))
            }
            PageType::Uninit | PageType::PageCache => Err(errno::UNSUPPORTED),
        }
    }
}
