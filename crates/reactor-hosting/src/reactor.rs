//! # reactor 模块说明
//!
//! ## 角色定位（Why）
//! - 装配根：加载模块、填充引擎注册表与路由表，对外暴露请求分发与关闭；
//! - 插件通过 [`HostServices`] 回调宿主，只能按名称查找引擎、登记路由，不持有宿主所有权。
//!
//! ## 启动顺序（How）
//! 1. 依声明顺序加载引擎并注册，每个引擎立即在独立线程上开始初始化；
//! 2. 依声明顺序加载插件，随后并行调用各插件的 `init`。插件在 `init` 中按需阻塞等待引擎就绪，
//!    这是唯一的依赖排序机制，不建模显式依赖图；
//! 3. 任一步骤失败即拆除已启动的部分并返回错误，不以残缺配置运行。
//!
//! ## 关闭顺序（How）
//! 1. 关闭请求闸门并等待在途请求排空；
//! 2. 向全部引擎广播关闭，按加载逆序调用插件的 `shutdown`；
//! 3. 等待引擎初始化线程退出，释放路由表与注册表持有的实例引用；
//! 4. 按加载逆序卸载模块，依赖方先于被依赖方卸载。

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reactor_core::guard::{guard_with_default, panic_message};
use reactor_core::{
    ContentHandler, Engine, EngineLookup, HostServices, ModuleInstance, ModuleKind, Plugin,
    ReactorError, Request, Response, Status, adopt_error, codes, into_error, reactor_error,
    wrap_error,
};
use reactor_router::ContentRouter;

use crate::config::{ModuleConfig, ReactorConfig};
use crate::error::{LoadError, RegistryError};
use crate::loader::ModuleHandle;
use crate::registry::EngineRegistry;
use crate::shutdown::{InflightGate, ModuleUnloadRecord, ShutdownReport};
use crate::status::{PluginStatus, ReactorStatus};

/// 已加载的插件。
struct PluginEntry {
    name: Arc<str>,
    plugin: Arc<dyn Plugin>,
    initialized: AtomicBool,
}

struct Shared {
    config: ReactorConfig,
    registry: Arc<EngineRegistry>,
    router: ContentRouter,
    plugins: Mutex<Vec<Arc<PluginEntry>>>,
    /// 插件名 → 其登记的路由键，按登记顺序。
    owned_routes: Mutex<BTreeMap<String, Vec<String>>>,
    /// 加载顺序。
    modules: Mutex<Vec<ModuleHandle>>,
    gate: InflightGate,
    shutting_down: AtomicBool,
    torn_down: AtomicBool,
}

/// 宿主运行时。
///
/// # 契约说明（What）
/// - 克隆开销为一次引用计数，全部克隆共享同一运行时；
/// - [`dispatch`](Self::dispatch) 可被任意数量的线程并发调用；
/// - [`shutdown`](Self::shutdown) 幂等，最后一个克隆析构时若尚未关闭会自动执行一次。
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

/// [`Reactor`] 的构建器，允许在配置文件之外追加进程内模块。
pub struct ReactorBuilder {
    config: ReactorConfig,
    static_engines: Vec<(String, ModuleInstance)>,
    static_plugins: Vec<(String, ModuleInstance)>,
}

impl ReactorBuilder {
    pub fn new(config: ReactorConfig) -> Self {
        Self {
            config,
            static_engines: Vec::new(),
            static_plugins: Vec::new(),
        }
    }

    /// 追加一个进程内引擎，排在配置文件声明的引擎之后。
    pub fn static_engine(mut self, name: impl Into<String>, instance: ModuleInstance) -> Self {
        self.static_engines.push((name.into(), instance));
        self
    }

    /// 追加一个进程内插件，排在配置文件声明的插件之后。
    pub fn static_plugin(mut self, name: impl Into<String>, instance: ModuleInstance) -> Self {
        self.static_plugins.push((name.into(), instance));
        self
    }

    /// 执行启动序列。
    pub fn boot(self) -> Result<Reactor, ReactorError> {
        let ReactorBuilder {
            config,
            static_engines,
            static_plugins,
        } = self;
        config.validate().map_err(|error| into_error!(error))?;

        let started = Instant::now();
        let router = ContentRouter::new();
        router.set_diagnostics(config.reactor.diagnostic_mode);
        let reactor = Reactor {
            shared: Arc::new(Shared {
                registry: Arc::new(EngineRegistry::new(config.reactor.construction_failure)),
                router,
                plugins: Mutex::new(Vec::new()),
                owned_routes: Mutex::new(BTreeMap::new()),
                modules: Mutex::new(Vec::new()),
                gate: InflightGate::new(),
                shutting_down: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                config,
            }),
        };

        match reactor.start(static_engines, static_plugins) {
            Ok(()) => {
                tracing::info!(
                    engines = reactor.shared.registry.len(),
                    plugins = reactor.shared.plugins.lock().len(),
                    routes = reactor.shared.router.len(),
                    elapsed_ms = elapsed_ms(started),
                    "reactor booted"
                );
                Ok(reactor)
            }
            Err(error) => {
                tracing::error!(code = error.code(), "reactor boot failed: {error:#}");
                reactor.shutdown();
                Err(error)
            }
        }
    }
}

impl Reactor {
    /// 以配置启动，不附加进程内模块。
    pub fn boot(config: ReactorConfig) -> Result<Self, ReactorError> {
        ReactorBuilder::new(config).boot()
    }

    pub fn builder(config: ReactorConfig) -> ReactorBuilder {
        ReactorBuilder::new(config)
    }

    fn start(
        &self,
        static_engines: Vec<(String, ModuleInstance)>,
        static_plugins: Vec<(String, ModuleInstance)>,
    ) -> Result<(), ReactorError> {
        let config = &self.shared.config;

        for module in config.enabled_engines() {
            let handle = load_module(module, ModuleKind::Engine)?;
            self.register_engine(handle)?;
        }
        for (name, instance) in static_engines {
            let handle = ModuleHandle::from_static(&name, instance, ModuleKind::Engine)
                .map_err(|error| into_error!(error))?;
            self.register_engine(handle)?;
        }

        let mut loaded = Vec::new();
        for module in config.enabled_plugins() {
            let handle = load_module(module, ModuleKind::Plugin)?;
            loaded.push(self.register_plugin(handle)?);
        }
        for (name, instance) in static_plugins {
            let handle = ModuleHandle::from_static(&name, instance, ModuleKind::Plugin)
                .map_err(|error| into_error!(error))?;
            loaded.push(self.register_plugin(handle)?);
        }

        self.init_plugins(&loaded)
    }

    fn register_engine(&self, handle: ModuleHandle) -> Result<(), ReactorError> {
        let engine = instance_engine(&handle)?;
        let name = handle.name().to_owned();
        // 句柄先入表：注册失败时由关闭流程统一卸载。
        self.shared.modules.lock().push(handle);
        self.shared.registry.register(&name, engine)?;
        Ok(())
    }

    fn register_plugin(&self, handle: ModuleHandle) -> Result<Arc<PluginEntry>, ReactorError> {
        let plugin = instance_plugin(&handle)?;
        let name: Arc<str> = Arc::from(handle.name());
        let entry = {
            let mut plugins = self.shared.plugins.lock();
            if plugins.iter().any(|entry| entry.name == name) {
                return Err(into_error!(RegistryError::DuplicateName {
                    kind: ModuleKind::Plugin,
                    name: name.to_string(),
                }));
            }
            let entry = Arc::new(PluginEntry {
                name,
                plugin,
                initialized: AtomicBool::new(false),
            });
            plugins.push(Arc::clone(&entry));
            entry
        };
        self.shared.modules.lock().push(handle);
        Ok(entry)
    }

    /// 并行初始化插件；全部结束后返回第一个失败，其余失败记录日志。
    fn init_plugins(&self, entries: &[Arc<PluginEntry>]) -> Result<(), ReactorError> {
        let mut failures: Vec<ReactorError> = thread::scope(|scope| {
            let mut workers = Vec::with_capacity(entries.len());
            let mut failures = Vec::new();
            for entry in entries {
                let spawned = thread::Builder::new()
                    .name(format!("plugin-{}", entry.name))
                    .spawn_scoped(scope, move || self.init_plugin(entry));
                match spawned {
                    Ok(worker) => workers.push((entry, worker)),
                    Err(error) => failures.push(
                        adopt_error!(
                            &error,
                            codes::PLUGIN_INIT_FAILED,
                            "could not spawn init thread for plugin `{}`",
                            entry.name
                        )
                        .with_parameter("plugin", &entry.name),
                    ),
                }
            }
            for (entry, worker) in workers {
                match worker.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => failures.push(error),
                    Err(payload) => failures.push(
                        reactor_error!(
                            codes::PLUGIN_INIT_FAILED,
                            "init thread of plugin `{}` panicked: {}",
                            entry.name,
                            panic_message(payload.as_ref())
                        )
                        .with_parameter("plugin", &entry.name),
                    ),
                }
            }
            failures
        });

        if failures.is_empty() {
            return Ok(());
        }
        for extra in failures.iter().skip(1) {
            tracing::error!(code = extra.code(), "plugin initialization failed: {extra:#}");
        }
        Err(failures.swap_remove(0))
    }

    fn init_plugin(&self, entry: &PluginEntry) -> Result<(), ReactorError> {
        let started = Instant::now();
        let host: &dyn HostServices = self;
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.plugin.init(&entry.name, host)));
        match outcome {
            Ok(Ok(())) => {
                entry.initialized.store(true, Ordering::Release);
                tracing::info!(
                    plugin = %entry.name,
                    routes = self.routes_of(&entry.name).len(),
                    elapsed_ms = elapsed_ms(started),
                    "plugin initialized"
                );
                Ok(())
            }
            Ok(Err(error)) => Err(wrap_error!(
                error,
                codes::PLUGIN_INIT_FAILED,
                "plugin `{}` failed to initialize",
                entry.name
            )
            .with_parameter("plugin", &entry.name)),
            Err(payload) => Err(reactor_error!(
                codes::PLUGIN_INIT_FAILED,
                "plugin `{}` panicked during initialization: {}",
                entry.name,
                panic_message(payload.as_ref())
            )
            .with_parameter("plugin", &entry.name)),
        }
    }

    /// 分发一个请求。
    ///
    /// - 未命中路由返回 `404`，处理函数失败或 panic 返回 `500`，都不会向调用方传播；
    /// - 关闭流程开始后返回 `503`，错误码 [`codes::REACTOR_SHUTTING_DOWN`]。
    pub fn dispatch(&self, request: &Request) -> Response {
        let Some(_inflight) = self.shared.gate.enter() else {
            let error = reactor_error!(
                codes::REACTOR_SHUTTING_DOWN,
                "reactor is shutting down and accepts no new requests"
            )
            .with_parameter("uri", request.uri());
            return Response::from_error(
                Status::SERVICE_UNAVAILABLE,
                &error,
                self.shared.router.diagnostics(),
            );
        };
        self.shared.router.dispatch(self, request)
    }

    /// 按配置的回退顺序提取 API Key。
    pub fn api_key<'r>(&self, request: &'r Request) -> Option<&'r str> {
        request.api_key(&self.shared.config.api_key)
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.shared.config
    }

    pub fn router(&self) -> &ContentRouter {
        &self.shared.router
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.shared.registry
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shared.config.shutdown_grace()
    }

    /// 阻塞等待引擎就绪并按具体类型返回。
    pub fn get<E: Engine>(&self, name: &str) -> Result<Arc<E>, ReactorError> {
        self.shared.registry.get::<E>(name)
    }

    /// 按加载顺序列出插件名。
    pub fn plugin_names(&self) -> Vec<String> {
        self.shared
            .plugins
            .lock()
            .iter()
            .map(|entry| entry.name.to_string())
            .collect()
    }

    /// 某插件登记的路由键。
    pub fn routes_of(&self, plugin: &str) -> Vec<String> {
        self.shared
            .owned_routes
            .lock()
            .get(plugin)
            .cloned()
            .unwrap_or_default()
    }

    pub fn status(&self) -> ReactorStatus {
        let owned = self.shared.owned_routes.lock().clone();
        let plugins = self
            .shared
            .plugins
            .lock()
            .iter()
            .map(|entry| PluginStatus {
                name: entry.name.to_string(),
                initialized: entry.initialized.load(Ordering::Acquire),
                routes: owned.get(&*entry.name).cloned().unwrap_or_default(),
            })
            .collect();
        ReactorStatus {
            shutting_down: self.is_shutting_down(),
            inflight: self.shared.gate.inflight(),
            engines: self.shared.registry.statuses(),
            plugins,
            routes: self.shared.router.stats(),
        }
    }

    /// 有序关闭并卸载全部模块。
    ///
    /// 重复调用立即返回 `already_shut_down = true` 的空报告。
    pub fn shutdown(&self) -> ShutdownReport {
        self.shared.shutdown()
    }
}

impl Shared {
    fn shutdown(&self) -> ShutdownReport {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::repeated();
        }
        let started = Instant::now();
        tracing::info!(inflight = self.gate.inflight(), "reactor shutdown started");

        let grace = self.config.shutdown_grace();
        if let Err(remaining) = self.gate.close_and_drain_timeout(grace) {
            tracing::warn!(
                inflight = remaining,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "in-flight requests outlived the grace period, still draining"
            );
            self.gate.close_and_drain();
        }

        let engines_signalled = self.registry.shutdown_all();

        let plugins: Vec<_> = self.plugins.lock().iter().rev().cloned().collect();
        let mut plugins_shut_down = 0;
        for entry in plugins
            .iter()
            .filter(|entry| entry.initialized.load(Ordering::Acquire))
        {
            guard_with_default("plugin.shutdown", (), || entry.plugin.shutdown());
            plugins_shut_down += 1;
            tracing::debug!(plugin = %entry.name, "plugin shut down");
        }

        self.registry.join_all();

        // 释放宿主持有的实例引用，卸载时只剩句柄自身的一份。
        for entry in &plugins {
            let removed = self.router.remove_plugin(&entry.name);
            tracing::debug!(plugin = %entry.name, removed, "plugin routes withdrawn");
        }
        self.owned_routes.lock().clear();
        drop(plugins);
        self.plugins.lock().clear();
        self.registry.clear();

        let handles: Vec<_> = std::mem::take(&mut *self.modules.lock());
        let mut modules = Vec::with_capacity(handles.len());
        for handle in handles.into_iter().rev() {
            let name = handle.name().to_owned();
            let kind = handle.kind();
            let source = handle.source().clone();
            let outcome = handle.unload();
            modules.push(ModuleUnloadRecord::new(&name, kind, &source, outcome));
        }
        self.torn_down.store(true, Ordering::Release);

        let report = ShutdownReport {
            engines_signalled,
            plugins_shut_down,
            modules,
            elapsed_ms: elapsed_ms(started),
            already_shut_down: false,
        };
        tracing::info!(
            engines = report.engines_signalled,
            plugins = report.plugins_shut_down,
            modules = report.modules.len(),
            leaked = report.leaked(),
            elapsed_ms = report.elapsed_ms,
            "reactor shutdown complete"
        );
        report
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

impl EngineLookup for Reactor {
    fn engine_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError> {
        self.shared.registry.get_dyn(name)
    }

    fn is_engine_ready(&self, name: &str) -> bool {
        self.shared.registry.is_ready(name)
    }
}

impl HostServices for Reactor {
    fn add_content_handler(
        &self,
        plugin: &str,
        path: &str,
        handler: ContentHandler,
        is_prefix: bool,
    ) -> Result<(), ReactorError> {
        if self.is_shutting_down() {
            return Err(reactor_error!(
                codes::REACTOR_SHUTTING_DOWN,
                "plugin `{plugin}` registered `{path}` after shutdown started"
            )
            .with_parameter("plugin", plugin)
            .with_parameter("route", path));
        }
        // 持锁跨越路由登记，保证簿记与路由表一致。
        let mut owned = self.shared.owned_routes.lock();
        self.shared
            .router
            .register(plugin, path, handler, is_prefix)
            .map_err(|error| into_error!(error))?;
        owned
            .entry(plugin.to_owned())
            .or_default()
            .push(path.to_owned());
        tracing::info!(plugin, route = path, prefix = is_prefix, "content handler added");
        Ok(())
    }

    fn uri_map(&self) -> BTreeMap<String, String> {
        self.shared.router.uri_map()
    }

    fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("engines", &self.shared.registry.names())
            .field("plugins", &self.plugin_names())
            .field("routes", &self.shared.router.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

fn load_module(module: &ModuleConfig, kind: ModuleKind) -> Result<ModuleHandle, ReactorError> {
    ModuleHandle::load(
        &module.name,
        &module.library,
        module.config.as_deref(),
        kind,
    )
    .map_err(|error| into_error!(error))
}

fn instance_engine(handle: &ModuleHandle) -> Result<Arc<dyn Engine>, ReactorError> {
    handle
        .instance()
        .and_then(ModuleInstance::as_engine)
        .cloned()
        .ok_or_else(|| into_error!(kind_mismatch(handle, ModuleKind::Engine)))
}

fn instance_plugin(handle: &ModuleHandle) -> Result<Arc<dyn Plugin>, ReactorError> {
    handle
        .instance()
        .and_then(ModuleInstance::as_plugin)
        .cloned()
        .ok_or_else(|| into_error!(kind_mismatch(handle, ModuleKind::Plugin)))
}

fn kind_mismatch(handle: &ModuleHandle, expected: ModuleKind) -> LoadError {
    let found = match expected {
        ModuleKind::Engine => ModuleKind::Plugin,
        ModuleKind::Plugin => ModuleKind::Engine,
    };
    LoadError::KindMismatch {
        module: handle.name().to_owned(),
        found: handle.kind().unwrap_or(found),
        expected,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
