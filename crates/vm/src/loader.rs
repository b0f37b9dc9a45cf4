//! 页第一次被访问时如何装载内容

use alloc::sync::Arc;
use core::fmt;

use defines::{
    config::PAGE_SIZE,
    error::{errno, KResult},
};

use crate::{hal::File, PageBuf};

/// 装载器。调用前页已被清零
///
/// 同一个装载器可能被 fork 出的多个页共享，因此只能通过 `&self` 访问
pub trait Loader: Send + Sync {
    fn load(&self, page: &mut PageBuf) -> KResult<()>;

    /// 若装载的是文件内容，返回对应的文件区段，文件页依此写回
    fn backing(&self) -> Option<&FileSegment> {
        None
    }
}

/// 文件中对应一页的区段：从 `offset` 起读 `read_bytes` 字节，余下的补零
#[derive(Clone)]
pub struct FileSegment {
    pub file: Arc<dyn File>,
    pub offset: usize,
    pub read_bytes: usize,
}

impl FileSegment {
    pub fn new(file: Arc<dyn File>, offset: usize, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);
        Self {
            file,
            offset,
            read_bytes,
        }
    }

    pub fn zero_bytes(&self) -> usize {
        PAGE_SIZE - self.read_bytes
    }

    /// 把页的前 `read_bytes` 字节写回文件
    pub fn write_back(&self, page: &PageBuf) -> KResult<()> {
        if self.read_bytes == 0 {
            return Ok(());
        }
        let written = self
            .file
            .write_at(&page[..self.read_bytes], self.offset)?;
        if written != self.read_bytes {
            return Err(errno::EIO);
        }
        Ok(())
    }
}

impl fmt::Debug for FileSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSegment")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .finish()
    }
}

impl Loader for FileSegment {
    fn load(&self, page: &mut PageBuf) -> KResult<()> {
        let read = self
            .file
            .read_at(&mut page[..self.read_bytes], self.offset)?;
        if read != self.read_bytes {
            warn!("short read of {self:?}: {read} bytes");
            return Err(errno::EIO);
        }
        page[self.read_bytes..].fill(0);
        Ok(())
    }

    fn backing(&self) -> Option<&FileSegment> {
        Some(self)
    }
}

/// 用闭包装载
pub struct FnLoader<F>(pub F);

impl<F> Loader for FnLoader<F>
where
    F: Fn(&mut PageBuf) -> KResult<()> + Send + Sync,
{
    fn load(&self, page: &mut PageBuf) -> KResult<()> {
        (self.0)(page)
    }
}
