//! # lifecycle 模块说明
//!
//! ## 角色定位（Why）
//! - 每个引擎都有一次性的异步初始化；依赖方通过阻塞等待其就绪来隐式排序启动过程；
//! - 就绪必须严格发生在初始化的全部副作用可见之后，依赖方不得观察到半初始化的引擎。
//!
//! ## 状态机（What）
//! ```text
//! Uninitialized ──construct──▶ Constructing ──init Ok──▶ Ready
//!                                           └─init Err─▶ Failed（默认策略下进程直接终止）
//! ShutdownRequested：与上述状态正交的一次性标志，任何状态下都可置位
//! ```
//!
//! ## 执行逻辑（How）
//! - [`ReadinessLatch`] 以原子状态字提供无锁快路径，以互斥锁 + 条件变量挂起等待者；
//!   状态写入发生在持锁期间并以 `Release` 发布，等待方以 `Acquire` 读取，保证初始化副作用可见；
//! - [`EngineSlot::construct`] 在名为 `engine-<name>` 的独立线程上运行初始化，互不相关的引擎并行启动。
//!
//! ## 风险提示（Trade-offs）
//! - 初始化不可取消：卡死的初始化会让所有依赖方无限期等待，超时属于外部看门狗的职责；
//! - 循环依赖会死锁，宿主不建模依赖图。

use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use reactor_core::engine::{Engine, EngineLookup};
use reactor_core::guard::{guard_with_default, panic_message};
use reactor_core::{Backtracer, ReactorError, adopt_error, codes, reactor_error, wrap_error};
use serde::{Deserialize, Serialize};

/// 引擎生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Constructing = 1,
    Ready = 2,
    Failed = 3,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::Constructing,
            2 => EngineState::Ready,
            3 => EngineState::Failed,
            _ => EngineState::Uninitialized,
        }
    }

    /// 是否已到达终态（就绪或失败）。
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Failed)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Constructing => "constructing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        })
    }
}

/// 引擎初始化失败时的处置策略。
///
/// - `Abort`（默认）：记录完整错误链与调用栈后立即异常终止进程。其他引擎或插件可能已经阻塞在
///   该引擎上，带着损坏的依赖继续运行被视为不安全；
/// - `Propagate`：标记为 `Failed`，以 [`codes::ENGINE_CONSTRUCTION_FAILED`] 释放全部等待者。
///   供嵌入方与测试使用。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionFailurePolicy {
    #[default]
    Abort,
    Propagate,
}

#[derive(Default)]
struct LatchInner {
    failure: Option<String>,
}

/// 一次性就绪闩。
///
/// # 契约说明（What）
/// - [`wait`](Self::wait) 在就绪前阻塞，就绪后立即返回；多个等待者被同时释放，彼此之间无顺序保证；
/// - 状态只会单调前进，终态不可逆。
pub struct ReadinessLatch {
    state: AtomicU8,
    inner: Mutex<LatchInner>,
    released: Condvar,
}

impl ReadinessLatch {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            inner: Mutex::new(LatchInner::default()),
            released: Condvar::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// `Uninitialized → Constructing`；已离开初始态时返回 `false`。
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                EngineState::Uninitialized as u8,
                EngineState::Constructing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 标记就绪并释放全部等待者。
    pub fn open(&self) {
        let _inner = self.inner.lock();
        self.state.store(EngineState::Ready as u8, Ordering::Release);
        self.released.notify_all();
    }

    /// 标记失败并以 `cause` 释放全部等待者。
    pub fn fail(&self, cause: String) {
        let mut inner = self.inner.lock();
        inner.failure = Some(cause);
        self.state.store(EngineState::Failed as u8, Ordering::Release);
        self.released.notify_all();
    }

    /// 阻塞直至终态；失败时返回记录的原因文本。
    pub fn wait(&self) -> Result<(), String> {
        if self.is_ready() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        loop {
            match self.state() {
                EngineState::Ready => return Ok(()),
                EngineState::Failed => return Err(inner.failure.clone().unwrap_or_default()),
                _ => self.released.wait(&mut inner),
            }
        }
    }

    /// 带超时的 [`wait`](Self::wait)；超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), String>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            match self.state() {
                EngineState::Ready => return Some(Ok(())),
                EngineState::Failed => return Some(Err(inner.failure.clone().unwrap_or_default())),
                _ => {
                    if self.released.wait_until(&mut inner, deadline).timed_out()
                        && !self.state().is_terminal()
                    {
                        return None;
                    }
                }
            }
        }
    }
}

impl Default for ReadinessLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadinessLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessLatch")
            .field("state", &self.state())
            .finish()
    }
}

/// 注册表中的单个引擎。
pub struct EngineSlot {
    name: Arc<str>,
    engine: Arc<dyn Engine>,
    latch: ReadinessLatch,
    shutdown_requested: AtomicBool,
    policy: ConstructionFailurePolicy,
    worker: Mutex<Option<JoinHandle<()>>>,
    init_elapsed_ms: Mutex<Option<u64>>,
}

impl EngineSlot {
    pub fn new(name: &str, engine: Arc<dyn Engine>, policy: ConstructionFailurePolicy) -> Self {
        Self {
            name: Arc::from(name),
            engine,
            latch: ReadinessLatch::new(),
            shutdown_requested: AtomicBool::new(false),
            policy,
            worker: Mutex::new(None),
            init_elapsed_ms: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn state(&self) -> EngineState {
        self.latch.state()
    }

    pub fn is_ready(&self) -> bool {
        self.latch.is_ready()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// 初始化耗时（毫秒），尚未完成时为 `None`。
    pub fn init_elapsed_ms(&self) -> Option<u64> {
        *self.init_elapsed_ms.lock()
    }

    /// 在独立线程上启动一次性初始化；重复调用不会再次初始化。
    ///
    /// # 契约说明（What）
    /// - `engines` 传给 [`Engine::init`]，用于按名称等待其他引擎；
    /// - 返回 `Err` 仅表示线程无法创建，此时引擎按初始化失败处理。
    pub fn construct(self: &Arc<Self>, engines: Arc<dyn EngineLookup>) -> Result<(), ReactorError> {
        if !self.latch.begin() {
            return Ok(());
        }
        let slot = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("engine-{}", self.name))
            .spawn(move || slot.run_init(engines.as_ref()));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(error) => {
                let error = adopt_error!(
                    &error,
                    codes::ENGINE_CONSTRUCTION_FAILED,
                    "could not start initialization thread for engine `{}`",
                    self.name
                )
                .with_parameter("engine", &self.name);
                self.latch.fail(format!("{error:#}"));
                Err(error)
            }
        }
    }

    fn run_init(&self, engines: &dyn EngineLookup) {
        let started = Instant::now();
        tracing::debug!(engine = %self.name, "engine initialization started");

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.engine.init(engines))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(reactor_error!(
                codes::ENGINE_CONSTRUCTION_FAILED,
                "engine initialization panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        *self.init_elapsed_ms.lock() = Some(elapsed_ms);

        match outcome {
            Ok(()) => {
                self.latch.open();
                tracing::info!(engine = %self.name, elapsed_ms, "engine ready");
            }
            Err(error) => self.construction_failed(error, elapsed_ms),
        }
    }

    fn construction_failed(&self, error: ReactorError, elapsed_ms: u64) {
        let error = wrap_error!(
            error,
            codes::ENGINE_CONSTRUCTION_FAILED,
            "engine `{}` failed to initialize",
            self.name
        )
        .with_parameter("engine", &self.name);

        match self.policy {
            ConstructionFailurePolicy::Abort => {
                tracing::error!(
                    engine = %self.name,
                    elapsed_ms,
                    code = error.root_cause().code(),
                    "fatal engine construction failure, aborting process:\n{error:#}\n{}",
                    Backtracer::global().capture()
                );
                std::process::abort();
            }
            ConstructionFailurePolicy::Propagate => {
                tracing::error!(
                    engine = %self.name,
                    elapsed_ms,
                    code = error.root_cause().code(),
                    "engine construction failed:\n{error:#}"
                );
                self.latch.fail(format!("{error:#}"));
            }
        }
    }

    /// 阻塞直至就绪；失败（仅 `Propagate` 策略下可观察）时返回构造失败错误。
    pub fn wait(&self) -> Result<(), ReactorError> {
        self.latch.wait().map_err(|cause| self.failure_error(cause))
    }

    /// 带超时的等待，超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), ReactorError>> {
        self.latch
            .wait_timeout(timeout)
            .map(|outcome| outcome.map_err(|cause| self.failure_error(cause)))
    }

    fn failure_error(&self, cause: String) -> ReactorError {
        reactor_error!(
            codes::ENGINE_CONSTRUCTION_FAILED,
            "engine `{}` is unavailable because its initialization failed",
            self.name
        )
        .with_parameter("engine", &self.name)
        .with_detail(cause)
    }

    /// 置位关闭标志并调用模块的关闭钩子；幂等，可与初始化并发。
    pub fn request_shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(engine = %self.name, state = %self.state(), "engine shutdown requested");
        guard_with_default("engine_shutdown", (), || self.engine.shutdown());
    }

    /// 等待初始化线程退出。
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(engine = %self.name, "engine initialization thread panicked");
            }
        }
    }
}

impl fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSlot")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("shutdown_requested", &self.is_shutdown_requested())
            .finish()
    }
}
