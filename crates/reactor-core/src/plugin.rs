//! 插件能力契约与宿主服务接口。
//!
//! # 教案式说明
//! - **意图（Why）**：插件只在初始化阶段与宿主交互：查找引擎、登记路由；
//!   处理请求时再经由同一接口回到宿主。接口放在契约层，路由与宿主装配层都只依赖它；
//! - **契约（What）**：插件持有的只是 `&dyn HostServices` 借用，从不拥有宿主；
//!   路由处理函数必须是 `Send + Sync`，因为它会在任意工作线程上并发执行。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::EngineLookup;
use crate::error::ReactorError;
use crate::module::REACTOR_API_VERSION;
use crate::request::Request;
use crate::response::Response;

/// 路由处理函数。
///
/// 参数依次为宿主、只读请求与待填写的响应；返回 `Err` 或 panic 都会在分发边界被捕获，
/// 转换为错误响应，不影响其他请求。处理函数不得无限期阻塞。
pub type ContentHandler =
    Arc<dyn Fn(&dyn HostServices, &Request, &mut Response) -> Result<(), ReactorError> + Send + Sync>;

/// 把闭包包装为 [`ContentHandler`]。
pub fn content_handler<F>(handler: F) -> ContentHandler
where
    F: Fn(&dyn HostServices, &Request, &mut Response) -> Result<(), ReactorError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(handler)
}

/// 宿主向插件暴露的服务。
pub trait HostServices: EngineLookup {
    /// 为 `plugin` 登记一条路由；`is_prefix` 为真时按前缀匹配。
    ///
    /// 同一 URI 键的精确路由只能有一条，前缀路由同理；重复时返回 `route.duplicate`。
    fn add_content_handler(
        &self,
        plugin: &str,
        path: &str,
        handler: ContentHandler,
        is_prefix: bool,
    ) -> Result<(), ReactorError>;

    /// 当前路由表快照：URI 键 → 所属插件名；前缀路由的键以 `*` 结尾。
    fn uri_map(&self) -> BTreeMap<String, String>;

    /// 宿主是否已进入关闭流程。
    fn is_shutting_down(&self) -> bool;
}

/// 请求处理提供者。
///
/// # 契约说明（What）
/// - [`init`](Self::init) 在启动期调用一次，可以阻塞等待引擎就绪，并在其中登记全部路由；
///   `name` 为配置中给出的插件名，登记路由时需原样传回；
/// - [`shutdown`](Self::shutdown) 在宿主关闭时按加载的逆序调用，此后不会再有新请求到达。
pub trait Plugin: Send + Sync + 'static {
    /// 模块编译时使用的宿主 API 版本。
    fn api_version(&self) -> u32 {
        REACTOR_API_VERSION
    }

    fn init(&self, name: &str, host: &dyn HostServices) -> Result<(), ReactorError>;

    fn shutdown(&self) {}
}
