//! 进程级日志安装。
//!
//! - 过滤规则优先取 `RUST_LOG`，缺省为 [`DEFAULT_DIRECTIVE`]；
//! - 输出带线程名，引擎初始化线程（`engine-<name>`）与插件初始化线程（`plugin-<name>`）的日志可直接区分。

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 未设置 `RUST_LOG` 时的过滤规则。
pub const DEFAULT_DIRECTIVE: &str = "info";

/// 解析过滤规则；`directive` 非法时回退到缺省规则。
pub fn filter_from(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// 安装全局订阅者；每个进程只能成功一次。
pub fn install() -> anyhow::Result<()> {
    let directive = std::env::var("RUST_LOG").ok();
    tracing_subscriber::registry()
        .with(filter_from(directive.as_deref()))
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .try_init()
        .context("failed to install the global tracing subscriber")
}
