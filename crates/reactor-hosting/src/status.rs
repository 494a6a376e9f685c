//! 就绪探针与运维接口使用的状态快照。

use reactor_router::RouteStats;
use serde::Serialize;

use crate::registry::EngineStatus;

/// 单个插件的状态。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub initialized: bool,
    /// 该插件登记的路由键，按登记顺序。
    pub routes: Vec<String>,
}

/// [`Reactor::status`](crate::Reactor::status) 的返回值。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReactorStatus {
    pub shutting_down: bool,
    pub inflight: usize,
    pub engines: Vec<EngineStatus>,
    pub plugins: Vec<PluginStatus>,
    pub routes: Vec<RouteStats>,
}

impl ReactorStatus {
    /// 全部引擎就绪、全部插件初始化完成且未进入关闭流程。
    pub fn is_ready(&self) -> bool {
        !self.shutting_down
            && self
                .engines
                .iter()
                .all(|engine| engine.state == crate::EngineState::Ready)
            && self.plugins.iter().all(|plugin| plugin.initialized)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
