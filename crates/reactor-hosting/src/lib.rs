//! # reactor-hosting
//!
//! 宿主装配层：
//! - [`loader`]：动态库加载、版本检查与卸载纪律；
//! - [`lifecycle`]：引擎的一次性初始化状态机与就绪闩；
//! - [`registry`]：名称键控、阻塞且类型检查的引擎查找；
//! - [`reactor`]：装配根，负责启动、分发、关闭；
//! - [`config`]：TOML 配置；[`shutdown`]：在途请求闸门与关闭报告；[`status`]：状态快照。
//!
//! ```no_run
//! use reactor_hosting::{Reactor, ReactorConfig};
//!
//! let config = ReactorConfig::from_path("/etc/reactor/reactor.toml")?;
//! let reactor = Reactor::boot(config)?;
//! let response = reactor.dispatch(&reactor_core::Request::get("/wms?layer=temperature"));
//! println!("{}", response.status().as_u16());
//! let report = reactor.shutdown();
//! assert!(!report.already_shut_down);
//! # Ok::<(), reactor_core::ReactorError>(())
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod reactor;
pub mod registry;
pub mod shutdown;
pub mod status;

pub use config::{ConfigError, ModuleConfig, ReactorConfig, RuntimeSection};
pub use error::{LoadError, RegistryError};
pub use lifecycle::{ConstructionFailurePolicy, EngineSlot, EngineState, ReadinessLatch};
pub use loader::{ModuleHandle, ModuleSource, UnloadOutcome};
pub use reactor::{Reactor, ReactorBuilder};
pub use registry::{EngineRegistry, EngineStatus};
pub use shutdown::{InflightGate, InflightGuard, ModuleUnloadRecord, ShutdownReport};
pub use status::{PluginStatus, ReactorStatus};
