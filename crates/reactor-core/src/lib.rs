//! # reactor-core
//!
//! 宿主与可加载模块共同链接的契约层：
//! - [`error`]：带来源、参数、细节与调用栈快照的错误链 [`ReactorError`]；
//! - [`backtrace`]：进程级调用栈捕获器，符号惰性解析；
//! - [`engine`] / [`plugin`]：引擎与插件的能力接口，以及插件回调宿主所用的 [`HostServices`]；
//! - [`module`]：动态库导出符号约定与 [`export_module!`] 宏；
//! - [`request`] / [`response`]：进程内的请求与响应模型。
//!
//! 本 crate 不包含任何运行时装配逻辑，路由位于 `reactor-router`，装配与生命周期位于 `reactor-hosting`。

pub mod backtrace;
pub mod engine;
pub mod error;
pub mod guard;
mod macros;
pub mod module;
pub mod plugin;
pub mod request;
pub mod response;

pub use backtrace::{BacktraceSnapshot, Backtracer};
pub use engine::{Engine, EngineLookup, EngineLookupExt};
pub use error::{
    AdoptExt, ErrorNode, ErrorReport, IntoReactorError, Origin, ReactorError, ResultExt, codes,
};
pub use module::{ModuleInstance, ModuleKind, REACTOR_API_VERSION};
pub use plugin::{ContentHandler, HostServices, Plugin, content_handler};
pub use request::{ApiKeyPolicy, Method, Request};
pub use response::{Response, Status};

/// 本 crate 统一使用的结果别名。
pub type Result<T, E = ReactorError> = core::result::Result<T, E>;
