//! 引擎能力契约。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎来自独立编译的模块，宿主只持有 `Arc<dyn Engine>` 与不透明的代码句柄，
//!   从不接触具体类型；调用方需要具体能力时再按类型向下转换；
//! - **逻辑（How）**：[`IntoAnyArc`] 以 blanket 实现为所有引擎提供 `Arc<dyn Any>` 视图，
//!   [`EngineLookupExt::engine`] 在阻塞等待就绪后执行类型检查；
//! - **契约（What）**：引擎之间、插件与引擎之间只通过 [`EngineLookup`] 按名称互相引用，不持有所有权。

use std::any::{Any, type_name};
use std::sync::Arc;

use crate::error::{Origin, ReactorError, codes};
use crate::module::REACTOR_API_VERSION;

/// 为 trait 对象提供 `Any` 视图。
pub trait IntoAnyArc {
    /// 转换为可向下转型的 `Arc<dyn Any>`。
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> IntoAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 后端能力提供者。
///
/// # 契约说明（What）
/// - [`init`](Self::init) 恰好被调用一次，且在独立线程上执行；返回 `Ok` 之前的全部副作用
///   都会在其他线程观察到“就绪”之前可见；
/// - [`shutdown`](Self::shutdown) 可能在 `init` 仍在执行时到达，实现必须容忍这种竞态；
/// - [`api_version`](Self::api_version) 使用默认实现即可，它在模块一侧编译，反映模块构建时的契约版本。
pub trait Engine: IntoAnyArc + Send + Sync + 'static {
    /// 模块编译时使用的宿主 API 版本。
    fn api_version(&self) -> u32 {
        REACTOR_API_VERSION
    }

    /// 一次性初始化；可通过 `engines` 阻塞等待其他引擎就绪。
    fn init(&self, engines: &dyn EngineLookup) -> Result<(), ReactorError>;

    /// 关闭通知钩子，默认不做任何事。
    fn shutdown(&self) {}
}

/// 按名称查找引擎的非拥有型接口。
pub trait EngineLookup: Send + Sync {
    /// 阻塞直至目标引擎就绪，返回其 trait 对象。
    ///
    /// - 未注册的名称立即返回 [`codes::ENGINE_NOT_FOUND`]；
    /// - 目标初始化失败（仅在非终止策略下可观察）返回 [`codes::ENGINE_CONSTRUCTION_FAILED`]。
    fn engine_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError>;

    /// 非阻塞地判断引擎是否已就绪；未注册时返回 `false`。
    fn is_engine_ready(&self, name: &str) -> bool;
}

/// [`EngineLookup`] 的类型化扩展。
pub trait EngineLookupExt: EngineLookup {
    /// 阻塞等待并按具体类型取回引擎。
    fn engine<E: Engine>(&self, name: &str) -> Result<Arc<E>, ReactorError> {
        let engine = self.engine_dyn(name)?;
        downcast_engine::<E>(engine).ok_or_else(|| type_mismatch::<E>(crate::origin!(), name))
    }
}

impl<L: EngineLookup + ?Sized> EngineLookupExt for L {}

/// 将引擎 trait 对象转换为具体类型，类型不符时返回 `None`。
pub fn downcast_engine<E: Engine>(engine: Arc<dyn Engine>) -> Option<Arc<E>> {
    engine.into_any_arc().downcast::<E>().ok()
}

/// 构造类型不匹配错误，参数中记录名称与期望类型；`origin` 由调用方经 [`origin!`](crate::origin) 提供。
pub fn type_mismatch<E: ?Sized>(origin: Origin, name: &str) -> ReactorError {
    ReactorError::at(
        origin,
        codes::ENGINE_TYPE_MISMATCH,
        format!("engine `{name}` does not provide `{}`", type_name::<E>()),
    )
    .with_parameter("engine", name)
    .with_parameter("expected", type_name::<E>())
}
