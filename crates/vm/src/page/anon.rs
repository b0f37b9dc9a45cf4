use defines::error::KResult;

use super::{PageCx, PageOps};
use crate::{swap::SwapSlot, PageBuf};

/// 匿名页，换出时内容保存在交换区
pub(crate) struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub fn new() -> Self {
        Self { slot: None }
    }

    pub fn slot(&self) -> Option<SwapSlot> {
        self.slot
    }
}

impl PageOps for AnonPage {
    fn swap_in(&mut self, cx: &PageCx<'_>, frame: &mut PageBuf) -> KResult<()> {
        match self.slot {
            Some(slot) => {
                cx.swap.swap_in(slot, frame)?;
                self.slot = None;
            }
            None => frame.fill(0),
        }
        Ok(())
    }

    fn swap_out(&mut self, cx: &PageCx<'_>, frame: &PageBuf) -> KResult<()> {
        debug_assert!(self.slot.is_none());
        let slot = cx.swap.alloc_slot()?;
        cx.clear_mapping();
        if let Err(e) = cx.swap.write_slot(slot, frame) {
            cx.swap.free_slot(slot);
            return Err(e);
        }
        trace!("{:?} swapped out to {slot:?}", cx.vpn);
        self.slot = Some(slot);
        Ok(())
    }

    fn destroy(&mut self, cx: &PageCx<'_>, frame: Option<&PageBuf>) {
        if let Some(slot) = self.slot.take() {
            cx.swap.free_slot(slot);
        }
        if frame.is_some() {
            cx.clear_mapping();
        }
    }
}
