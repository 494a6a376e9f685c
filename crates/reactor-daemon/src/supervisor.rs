//! # supervisor 模块说明
//!
//! ## 角色定位（Why）
//! - 外部送达的终止或告警信号触发有序关闭；关闭超出宽限期，或期间再次收到信号，升级为进程强制终止；
//! - [`Reactor::shutdown`] 是阻塞调用（排空在途请求、等待初始化线程），因此放到 blocking 线程池执行，
//!   异步侧只负责计时与监听第二个信号。
//!
//! ## 契约（What）
//! - [`wait_for_signal`] 返回触发信号的名称；
//! - [`shutdown_within`] 返回 [`ShutdownOutcome`]，由进程入口决定是否终止进程。

use std::future::Future;
use std::io;
use std::time::Duration;

use reactor_hosting::{Reactor, ShutdownReport};

/// 一次受监督关闭的结果。
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// 宽限期内完成。
    Completed(ShutdownReport),
    /// 超出宽限期。
    TimedOut(Duration),
    /// 关闭期间再次收到信号。
    Interrupted(&'static str),
    /// 执行关闭的 blocking 任务异常结束。
    Failed(String),
}

impl ShutdownOutcome {
    /// 是否需要升级为强制终止。
    pub fn requires_abort(&self) -> bool {
        !matches!(self, ShutdownOutcome::Completed(_))
    }
}

/// 在宽限期内执行关闭，同时监听 `interrupt`。
pub async fn shutdown_within<F>(reactor: Reactor, grace: Duration, interrupt: F) -> ShutdownOutcome
where
    F: Future<Output = &'static str>,
{
    let task = tokio::task::spawn_blocking(move || reactor.shutdown());
    tokio::select! {
        joined = tokio::time::timeout(grace, task) => match joined {
            Ok(Ok(report)) => ShutdownOutcome::Completed(report),
            Ok(Err(error)) => ShutdownOutcome::Failed(error.to_string()),
            Err(_) => ShutdownOutcome::TimedOut(grace),
        },
        signal = interrupt => ShutdownOutcome::Interrupted(signal),
    }
}

/// 等待 SIGTERM、SIGINT 或 SIGALRM。
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut alarm = signal(SignalKind::alarm())?;
    Ok(tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
        _ = alarm.recv() => "SIGALRM",
    })
}

/// 非 unix 平台只监听 Ctrl-C。
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
