#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(core::ffi::c_int);

impl Error {
    #[inline]
    pub fn as_isize(self) -> isize {
        self.0 as isize
    }

    /// 错误的可读描述
    pub fn info(self) -> &'static str {
        errno::error_info(self.as_isize())
    }
}

pub type KResult<T = isize> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: isize) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", stringify!($desc)),)*
                    _ => "Unknown error",
                }
            }
        };
    }

    #[rustfmt::skip]
    declare_errno!(
        UNSUPPORTED, -1024, "Do not support",

        EIO,            -5,     "I/O error.",
        EBADF,          -9,     "Bad file number.",
        ENOMEM,         -12,    "Out of memory",
        EACCES,         -13,    "Permission denied.",
        EFAULT,         -14,    "Bad address.",
        EEXIST,         -17,    "File exists.",
        EINVAL,         -22,    "Invalid argument.",
        ENOSPC,         -28,    "No space left on device.",
    );
}
