//! 宿主机上模拟的硬件与文件系统
//!
//! 用于测试，也可以通过 `sim` 特性提供给上层做集成测试

mod disk;
mod file;
mod memory;
mod mmu;
mod page_table;

pub use self::{
    disk::RamDisk,
    file::{FdTable, MemFile},
    memory::RamFrames,
    page_table::{PTEFlags, SoftPageTable},
};

#[cfg(test)]
pub(crate) use self::fixture::*;
