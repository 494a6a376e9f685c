//! 受监督关闭的升级路径
//!
//! 关闭钩子刻意阻塞的插件用于制造“关闭超时”与“关闭期间再次收到信号”两种局面，
//! 两者都必须被判定为需要强制终止。

use std::thread;
use std::time::Duration;

use reactor_core::{HostServices, ModuleInstance, Plugin, ReactorError};
use reactor_daemon::supervisor::{ShutdownOutcome, shutdown_within};
use reactor_hosting::{Reactor, ReactorConfig};

struct StubbornPlugin {
    linger: Duration,
}

impl Plugin for StubbornPlugin {
    fn init(&self, _: &str, _: &dyn HostServices) -> Result<(), ReactorError> {
        Ok(())
    }

    fn shutdown(&self) {
        thread::sleep(self.linger);
    }
}

fn boot_stubborn(linger: Duration) -> Reactor {
    Reactor::builder(ReactorConfig::default())
        .static_plugin("stubborn", ModuleInstance::plugin(StubbornPlugin { linger }))
        .boot()
        .expect("启动应成功")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grace_period_expiry_requires_abort() {
    let reactor = boot_stubborn(Duration::from_millis(600));
    let outcome =
        shutdown_within(reactor, Duration::from_millis(50), std::future::pending()).await;
    assert!(matches!(outcome, ShutdownOutcome::TimedOut(grace) if grace == Duration::from_millis(50)));
    assert!(outcome.requires_abort());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_signal_requires_abort() {
    let reactor = boot_stubborn(Duration::from_millis(600));
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        "SIGTERM"
    };
    let outcome = shutdown_within(reactor, Duration::from_secs(10), interrupt).await;
    assert!(matches!(outcome, ShutdownOutcome::Interrupted("SIGTERM")));
    assert!(outcome.requires_abort());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prompt_shutdown_reports_unloads() {
    let reactor = boot_stubborn(Duration::ZERO);
    let outcome = shutdown_within(reactor, Duration::from_secs(5), std::future::pending()).await;
    match outcome {
        ShutdownOutcome::Completed(report) => {
            assert_eq!(report.plugins_shut_down, 1);
            assert_eq!(report.unload_order(), vec!["stubborn"]);
        }
        other => panic!("应在宽限期内完成: {other:?}"),
    }
}
