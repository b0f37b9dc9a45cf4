use core::{
    fmt,
    ops::{Add, Sub},
};

use defines::config::{PAGE_OFFSET_MASK, PAGE_SIZE, PAGE_SIZE_BITS};

/// 物理页号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPageNum(pub usize);

impl PhysPageNum {
    pub const fn page_start(self) -> usize {
        self.0 << PAGE_SIZE_BITS
    }
}

impl Add<usize> for PhysPageNum {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// 用户虚拟地址
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn page_offset(&self) -> usize {
        self.0 & PAGE_OFFSET_MASK
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// 向下取整页号
    pub const fn vpn_floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }

    /// 向上取整页号
    pub const fn vpn_ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<usize> for VirtAddr {
    type Output = Self;

    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

/// 虚拟页号，是补充页表的键
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(pub usize);

impl VirtPageNum {
    pub const fn page_start(&self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SIZE_BITS)
    }

    pub const fn with_offset(self, offset: usize) -> VirtAddr {
        VirtAddr(self.page_start().0 + offset)
    }
}

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPageNum({:#x})", self.0)
    }
}

impl Add<usize> for VirtPageNum {
    type Output = Self;

    fn add(self, len: usize) -> Self::Output {
        Self(self.0 + len)
    }
}

impl Sub<usize> for VirtPageNum {
    type Output = Self;

    fn sub(self, len: usize) -> Self::Output {
        Self(self.0 - len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        let va = VirtAddr(0x1234_5678);
        assert_eq!(va.page_offset(), 0x678);
        assert_eq!(va.vpn_floor(), VirtPageNum(0x12345));
        assert_eq!(va.vpn_ceil(), VirtPageNum(0x12346));
        assert_eq!(VirtAddr(0x5000).vpn_ceil(), VirtPageNum(5));
        assert_eq!(VirtPageNum(5).with_offset(3), VirtAddr(0x5003));
        assert!(VirtAddr(0x5000).is_page_aligned());
        assert!(!va.is_page_aligned());
    }

    #[test]
    fn null_address() {
        assert!(VirtAddr(0).is_null());
        assert!(!VirtAddr(PAGE_SIZE).is_null());
    }
}
