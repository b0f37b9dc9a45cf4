use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use defines::{
    config::CONSOLE_FD_END,
    error::{errno, KResult},
};
use klocks::SpinMutex;

use crate::hal::{File, FileTable};

/// 内存中的文件。重新打开得到的句柄共享同一份数据，就像指向同一个 inode
pub struct MemFile {
    data: Arc<SpinMutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
    failing_writes: Arc<AtomicUsize>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Arc::new(SpinMutex::new(data)),
            writes: Arc::new(AtomicUsize::new(0)),
            failing_writes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 所有句柄累计的写次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 让接下来的 `n` 次写返回 EIO，模拟磁盘出错
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::Relaxed);
    }
}

impl File for MemFile {
    fn reopen(&self) -> KResult<Arc<dyn File>> {
        Ok(Arc::new(Self {
            data: Arc::clone(&self.data),
            writes: Arc::clone(&self.writes),
            failing_writes: Arc::clone(&self.failing_writes),
        }))
    }

    fn read_at(&self, buf: &mut [u8], offset: usize) -> KResult<usize> {
        let data = self.data.lock();
        let start = offset.min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    /// 不会让文件变长
    fn write_at(&self, buf: &[u8], offset: usize) -> KResult<usize> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(errno::EIO);
        }
        let mut data = self.data.lock();
        let start = offset.min(data.len());
        let len = buf.len().min(data.len() - start);
        data[start..start + len].copy_from_slice(&buf[..len]);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(len)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

/// 文件描述符表，0 到 2 留给控制台
pub struct FdTable {
    files: Vec<Option<Arc<dyn File>>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: (0..CONSOLE_FD_END).map(|_| None).collect(),
        }
    }

    pub fn open(&mut self, file: Arc<dyn File>) -> usize {
        self.files.push(Some(file));
        self.files.len() - 1
    }

    pub fn close(&mut self, fd: usize) {
        if let Some(slot) = self.files.get_mut(fd) {
            *slot = None;
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable for FdTable {
    fn get(&self, fd: usize) -> Option<Arc<dyn File>> {
        self.files.get(fd).cloned().flatten()
    }
}
