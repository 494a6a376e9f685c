//! 关闭期的在途请求闸门与关闭报告。
//!
//! # 教案式说明
//! - **意图（Why）**：模块代码仍可能在某个请求线程上执行时，绝不能卸载其动态库；
//!   因此关闭流程必须先拒绝新请求，再等待在途请求全部退出；
//! - **契约（What）**：
//!   - [`InflightGate::enter`] 在闸门关闭后返回 `None`，调用方据此回复 `503`；
//!   - [`InflightGate::close_and_drain`] 关闭闸门并阻塞至计数归零，可重复调用；
//!   - [`InflightGate::close_and_drain_timeout`] 以固定截止时间等待，期间的任何唤醒都不会延长总等待；
//!   - 进入与关闭在同一把锁下判定，不存在“已通过检查但尚未计数”的窗口；
//! - **风险（Trade-offs）**：处理函数若无限期阻塞，排空将永远等待；宽限期由进程入口负责升级为强制终止。

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use reactor_core::ModuleKind;
use serde::Serialize;

use crate::loader::{ModuleSource, UnloadOutcome};

#[derive(Default)]
struct GateState {
    closed: bool,
    inflight: usize,
}

/// 在途请求计数闸门。
#[derive(Default)]
pub struct InflightGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl InflightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个在途请求；闸门已关闭时返回 `None`。
    pub fn enter(&self) -> Option<InflightGuard<'_>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.inflight += 1;
        Some(InflightGuard { gate: self })
    }

    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 关闭闸门并阻塞到全部在途请求退出。
    pub fn close_and_drain(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        while state.inflight > 0 {
            self.drained.wait(&mut state);
        }
    }

    /// 带超时的排空；超时返回剩余的在途数量。
    pub fn close_and_drain_timeout(&self, timeout: Duration) -> Result<(), usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.closed = true;
        while state.inflight > 0 {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return if state.inflight == 0 {
                    Ok(())
                } else {
                    Err(state.inflight)
                };
            }
        }
        Ok(())
    }

    /// 关闭后每次退出都唤醒等待方，使其重新核对计数与截止时间。
    fn leave(&self) {
        let mut state = self.state.lock();
        state.inflight -= 1;
        if state.closed {
            self.drained.notify_all();
        }
    }
}

impl fmt::Debug for InflightGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InflightGate")
            .field("closed", &state.closed)
            .field("inflight", &state.inflight)
            .finish()
    }
}

/// 在途请求凭据，析构时递减计数。
#[must_use = "dropping the guard ends the in-flight request immediately"]
pub struct InflightGuard<'a> {
    gate: &'a InflightGate,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

/// 单个模块的卸载记录。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleUnloadRecord {
    pub name: String,
    pub kind: Option<ModuleKind>,
    pub source: String,
    pub outcome: UnloadOutcome,
}

impl ModuleUnloadRecord {
    pub fn new(
        name: &str,
        kind: Option<ModuleKind>,
        source: &ModuleSource,
        outcome: UnloadOutcome,
    ) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            source: source.to_string(),
            outcome,
        }
    }
}

/// 一次关闭流程的结构化结果。
///
/// `modules` 按实际卸载顺序排列，即加载顺序的逆序。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub engines_signalled: usize,
    pub plugins_shut_down: usize,
    pub modules: Vec<ModuleUnloadRecord>,
    pub elapsed_ms: u64,
    /// 重复调用 `shutdown` 时为真，此时其余字段为空。
    pub already_shut_down: bool,
}

impl ShutdownReport {
    pub(crate) fn repeated() -> Self {
        Self {
            already_shut_down: true,
            ..Self::default()
        }
    }

    /// 因实例仍被引用而刻意泄漏代码句柄的模块数量。
    pub fn leaked(&self) -> usize {
        self.modules
            .iter()
            .filter(|record| record.outcome == UnloadOutcome::Leaked)
            .count()
    }

    /// 卸载顺序中的模块名。
    pub fn unload_order(&self) -> Vec<&str> {
        self.modules.iter().map(|record| record.name.as_str()).collect()
    }
}
