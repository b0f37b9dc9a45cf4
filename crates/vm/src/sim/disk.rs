use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use defines::{
    config::SECTOR_SIZE,
    error::{errno, KResult},
};
use klocks::SpinMutex;

use crate::hal::BlockDevice;

/// 内存里的块设备
pub struct RamDisk {
    sectors: SpinMutex<Vec<[u8; SECTOR_SIZE]>>,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: SpinMutex::new(alloc::vec![[0; SECTOR_SIZE]; sector_count]),
            writes: AtomicUsize::new(0),
        }
    }

    /// 累计写过的扇区数
    pub fn sector_writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> usize {
        self.sectors.lock().len()
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]) -> KResult<()> {
        let sectors = self.sectors.lock();
        *buf = *sectors.get(sector).ok_or(errno::EIO)?;
        Ok(())
    }

    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]) -> KResult<()> {
        let mut sectors = self.sectors.lock();
        *sectors.get_mut(sector).ok_or(errno::EIO)? = *buf;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sector_writes() {
        let disk = RamDisk::new(4);
        let mut buf = [7u8; SECTOR_SIZE];
        disk.write_sector(3, &buf).unwrap();
        assert_eq!(disk.write_sector(4, &buf), Err(errno::EIO));
        assert_eq!(disk.sector_writes(), 1);

        buf.fill(0);
        disk.read_sector(3, &mut buf).unwrap();
        assert_eq!(buf, [7u8; SECTOR_SIZE]);
        assert_eq!(disk.read_sector(4, &mut buf), Err(errno::EIO));
    }
}
