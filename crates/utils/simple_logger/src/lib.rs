#![cfg_attr(not(test), no_std)]

//! 一个简单的 `log` 后端
//!
//! 控制台与文件日志的级别分别由编译期环境变量 `KERNEL_CLOG`、`KERNEL_FLOG` 决定

use core::fmt::{self, Write};

use anstyle::{AnsiColor, Reset};
use klocks::Once;
use log::{self, Level, LevelFilter, Log, Metadata, Record};

/// 日志的输出端，比如串口或者测试时的标准输出
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// a simple logger
struct SimpleLogger {
    clog: LevelFilter,
    flog: LevelFilter,
    console: &'static dyn Console,
    file: Option<&'static dyn Console>,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.clog.max(self.flog)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.clog >= record.level() {
            let color = match record.level() {
                Level::Error => AnsiColor::Red,
                Level::Warn => AnsiColor::BrightYellow,
                Level::Info => AnsiColor::Blue,
                Level::Debug => AnsiColor::Green,
                Level::Trace => AnsiColor::BrightBlack,
            };
            // 写控制台失败也无处可报，直接忽略
            let _ = writeln!(
                ConsoleWriter(self.console),
                "{}[{:>5}] {}{}",
                color.render_fg(),
                record.level(),
                record.args(),
                Reset.render(),
            );
        }
        if let Some(file) = self.file.filter(|_| self.flog >= record.level()) {
            let _ = writeln!(ConsoleWriter(file), "[{:>5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn level_from_env(env: Option<&str>) -> LevelFilter {
    match env {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

static LOGGER: Once<SimpleLogger> = Once::new();

/// initiate logger
///
/// 重复调用时只有第一次生效
pub fn init(console: &'static dyn Console, file: Option<&'static dyn Console>) {
    let mut installed = false;
    let logger = LOGGER.call_once(|| {
        installed = true;
        SimpleLogger {
            clog: level_from_env(option_env!("KERNEL_CLOG")),
            flog: level_from_env(option_env!("KERNEL_FLOG")),
            console,
            file,
        }
    });
    if installed && log::set_logger(logger).is_ok() {
        log::set_max_level(logger.clog.max(logger.flog));
    }
}
