use defines::error::KResult;

use super::{PageCx, PageOps};
use crate::{
    loader::{FileSegment, Loader},
    PageBuf,
};

/// 映射了文件某一段的页。只有被写过的页才会写回
pub(crate) struct FilePage {
    segment: FileSegment,
    pub map_pages: usize,
    /// 映射已清除、但写回失败的页仍是脏的
    dirty: bool,
}

impl FilePage {
    pub fn new(segment: FileSegment, map_pages: usize) -> Self {
        Self {
            segment,
            map_pages,
            dirty: false,
        }
    }

    pub fn segment(&self) -> &FileSegment {
        &self.segment
    }

    /// 先清除映射，脏页再写回文件
    fn write_back(&mut self, cx: &PageCx<'_>, frame: &PageBuf) -> KResult<()> {
        self.dirty |= cx.clear_mapping();
        if self.dirty {
            trace!("write back {:?} at offset {:#x}", cx.vpn, self.segment.offset);
            self.segment.write_back(frame)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl PageOps for FilePage {
    fn swap_in(&mut self, _cx: &PageCx<'_>, frame: &mut PageBuf) -> KResult<()> {
        self.segment.load(frame)
    }

    fn swap_out(&mut self, cx: &PageCx<'_>, frame: &PageBuf) -> KResult<()> {
        self.write_back(cx, frame)
    }

    fn destroy(&mut self, cx: &PageCx<'_>, frame: Option<&PageBuf>) {
        if let Some(frame) = frame {
            if let Err(e) = self.write_back(cx, frame) {
                warn!("lost write back of {:?}: {}", cx.vpn, e.info());
            }
        }
    }
}
