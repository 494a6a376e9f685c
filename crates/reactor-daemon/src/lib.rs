//! # reactor-daemon
//!
//! 进程入口的可测试部分：日志安装与受监督的关闭。`main.rs` 只负责把它们按顺序串起来。

pub mod logging;
pub mod supervisor;

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::bail;

/// 未给出参数时使用的配置文件名。
pub const DEFAULT_CONFIG: &str = "reactor.toml";

/// 从命令行参数（不含程序名）中取配置路径。
pub fn config_path(mut args: impl Iterator<Item = OsString>) -> anyhow::Result<PathBuf> {
    let path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    if args.next().is_some() {
        bail!("usage: reactor-daemon [config.toml]");
    }
    Ok(path)
}
