//! 宿主集成测试共用的进程内引擎与插件。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use reactor_core::engine::{Engine, EngineLookup, EngineLookupExt};
use reactor_core::{HostServices, Plugin, ReactorError, codes, content_handler};
use reactor_hosting::{ConstructionFailurePolicy, ReactorConfig};

/// 初始化时休眠固定时长的引擎。
#[derive(Debug, Default)]
pub struct SleepyEngine {
    pub delay: Duration,
    pub inits: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub greeting: Mutex<Option<String>>,
}

impl SleepyEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn greeting(&self) -> Option<String> {
        self.greeting.lock().clone()
    }
}

impl Engine for SleepyEngine {
    fn init(&self, _: &dyn EngineLookup) -> Result<(), ReactorError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        *self.greeting.lock() = Some("hello".to_owned());
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// 初始化依赖另一个引擎的引擎。
#[derive(Debug)]
pub struct DependentEngine {
    pub upstream: &'static str,
    pub observed: Mutex<Option<String>>,
}

impl DependentEngine {
    pub fn new(upstream: &'static str) -> Self {
        Self {
            upstream,
            observed: Mutex::new(None),
        }
    }
}

impl Engine for DependentEngine {
    fn init(&self, engines: &dyn EngineLookup) -> Result<(), ReactorError> {
        let upstream = engines.engine::<SleepyEngine>(self.upstream)?;
        *self.observed.lock() = upstream.greeting();
        Ok(())
    }
}

/// 初始化必然失败的引擎。
#[derive(Debug)]
pub struct BrokenEngine {
    pub delay: Duration,
}

impl Engine for BrokenEngine {
    fn init(&self, _: &dyn EngineLookup) -> Result<(), ReactorError> {
        thread::sleep(self.delay);
        Err(ReactorError::new(codes::EXTERNAL, "backing store unreachable")
            .with_parameter("Component", "cache"))
    }
}

/// 记录关闭顺序的共享日志。
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// 在 `init` 中等待 `engine` 就绪并登记 `/<name>` 与 `/<name>/` 的插件。
pub struct GreetingPlugin {
    pub engine: &'static str,
    pub journal: Journal,
    pub shut_down: AtomicBool,
    registered_as: Mutex<String>,
}

impl GreetingPlugin {
    pub fn new(engine: &'static str, journal: Journal) -> Self {
        Self {
            engine,
            journal,
            shut_down: AtomicBool::new(false),
            registered_as: Mutex::new(String::new()),
        }
    }
}

impl Plugin for GreetingPlugin {
    fn init(&self, name: &str, host: &dyn HostServices) -> Result<(), ReactorError> {
        let engine = host.engine::<SleepyEngine>(self.engine)?;
        let greeting = engine.greeting().unwrap_or_default();

        let engine_name = self.engine;
        host.add_content_handler(
            name,
            &format!("/{name}"),
            content_handler(move |host, request, response| {
                let engine = host.engine::<SleepyEngine>(engine_name)?;
                let who = request.param("who").unwrap_or("world");
                response.set_header("content-type", "text/plain");
                response.set_body(format!(
                    "{} {who}",
                    engine.greeting().unwrap_or_else(|| greeting.clone())
                ));
                Ok(())
            }),
            false,
        )?;
        host.add_content_handler(
            name,
            &format!("/{name}/"),
            content_handler(|_, request, _| {
                Err(ReactorError::new(
                    codes::EXTERNAL,
                    format!("no such resource `{}`", request.resource()),
                ))
            }),
            true,
        )?;
        host.add_content_handler(
            name,
            &format!("/{name}/boom"),
            content_handler(|_, _, _| panic!("renderer exploded")),
            false,
        )?;
        *self.registered_as.lock() = name.to_owned();
        self.journal.push(format!("init:{name}"));
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.journal
            .push(format!("shutdown:{}", self.registered_as.lock()));
    }
}

/// 初始化失败的插件。
pub struct FailingPlugin;

impl Plugin for FailingPlugin {
    fn init(&self, _: &str, _: &dyn HostServices) -> Result<(), ReactorError> {
        Err(ReactorError::new(codes::EXTERNAL, "missing style sheet"))
    }
}

/// 传播策略下的空配置，测试中避免进程被终止。
pub fn propagate_config() -> ReactorConfig {
    let mut config = ReactorConfig::default();
    config.reactor.construction_failure = ConstructionFailurePolicy::Propagate;
    config
}
