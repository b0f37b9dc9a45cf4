const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 磁盘扇区大小
pub const SECTOR_SIZE: usize = 512;
/// 一页占据的扇区数，向上取整
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE.div_ceil(SECTOR_SIZE);

/// 内核地址空间的起点，用户地址都在它之下
pub const KERNEL_BASE: usize = 0x80_0400_0000;

/// 用户栈顶（不含）
pub const USER_STACK_TOP: usize = 0x4748_0000;
/// 用户栈最多能增长到的大小
pub const USER_STACK_SIZE: usize = MB;
/// `push` 之类的指令可能在栈指针之下一点的位置访存
pub const STACK_GROWTH_SLACK: usize = 32;

/// 标准输入、输出、错误这三个描述符
pub const CONSOLE_FD_END: usize = 3;

/// 进程因访存错误被杀死时的退出码
pub const FAULT_EXIT_STATUS: isize = -1;
