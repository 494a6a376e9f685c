//! 名称键控的引擎注册表。
//!
//! # 教案式说明
//! - **意图（Why）**：注册表是引擎唯一的生命周期所有者，其他引擎与插件只能按名称查找，不持有所有权；
//! - **契约（What）**：
//!   - 名称唯一，重复注册返回 [`RegistryError::DuplicateName`]；
//!   - 注册即在独立线程上开始初始化，互不相关的引擎并行启动；
//!   - [`get`](EngineRegistry::get) 阻塞等待就绪后按类型返回；就绪之后的查找立即返回；
//! - **执行（How）**：`DashMap` 保存名称到 [`EngineSlot`] 的映射，另以注册顺序列表支撑状态快照与关闭广播；
//!   查找时先克隆出 `Arc<EngineSlot>` 再等待，绝不在持有分片锁的情况下阻塞。

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use reactor_core::engine::{Engine, EngineLookup, downcast_engine, type_mismatch};
use reactor_core::{ModuleKind, ReactorError, into_error, origin};
use serde::Serialize;

use crate::error::RegistryError;
use crate::lifecycle::{ConstructionFailurePolicy, EngineSlot, EngineState};

/// 单个引擎的状态快照。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub state: EngineState,
    pub shutdown_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_elapsed_ms: Option<u64>,
}

/// 引擎注册表。
pub struct EngineRegistry {
    engines: DashMap<Arc<str>, Arc<EngineSlot>>,
    order: Mutex<Vec<Arc<EngineSlot>>>,
    policy: ConstructionFailurePolicy,
}

impl EngineRegistry {
    pub fn new(policy: ConstructionFailurePolicy) -> Self {
        Self {
            engines: DashMap::new(),
            order: Mutex::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ConstructionFailurePolicy {
        self.policy
    }

    /// 注册引擎并立即在独立线程上启动其初始化。
    ///
    /// 引擎初始化期间通过本注册表查找依赖，因此接收者是 `Arc<Self>`。
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        engine: Arc<dyn Engine>,
    ) -> Result<Arc<EngineSlot>, ReactorError> {
        let slot = match self.engines.entry(Arc::from(name)) {
            Entry::Occupied(_) => {
                return Err(into_error!(RegistryError::DuplicateName {
                    kind: ModuleKind::Engine,
                    name: name.to_owned(),
                }));
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(EngineSlot::new(name, engine, self.policy));
                vacant.insert(Arc::clone(&slot));
                slot
            }
        };
        self.order.lock().push(Arc::clone(&slot));
        tracing::debug!(engine = name, "engine registered");

        let lookup: Arc<dyn EngineLookup> = Arc::clone(self) as Arc<dyn EngineLookup>;
        slot.construct(lookup)?;
        Ok(slot)
    }

    /// 按名称取出槽位，不等待。
    pub fn slot(&self, name: &str) -> Result<Arc<EngineSlot>, ReactorError> {
        self.engines
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                into_error!(RegistryError::NotFound {
                    name: name.to_owned(),
                })
            })
    }

    /// 阻塞等待就绪并返回 trait 对象。
    pub fn get_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError> {
        let slot = self.slot(name)?;
        slot.wait()?;
        Ok(Arc::clone(slot.engine()))
    }

    /// 阻塞等待就绪并按具体类型返回。
    pub fn get<E: Engine>(&self, name: &str) -> Result<Arc<E>, ReactorError> {
        let engine = self.get_dyn(name)?;
        downcast_engine::<E>(engine).ok_or_else(|| type_mismatch::<E>(origin!(), name))
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.engines
            .get(name)
            .is_some_and(|entry| entry.value().is_ready())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// 按注册顺序列出名称。
    pub fn names(&self) -> Vec<String> {
        self.order
            .lock()
            .iter()
            .map(|slot| slot.name().to_owned())
            .collect()
    }

    /// 向全部引擎广播关闭请求；不等待完成，返回广播数量。
    pub fn shutdown_all(&self) -> usize {
        let slots: Vec<_> = self.order.lock().iter().rev().cloned().collect();
        for slot in &slots {
            slot.request_shutdown();
        }
        slots.len()
    }

    /// 等待全部初始化线程退出。
    pub fn join_all(&self) {
        let slots: Vec<_> = self.order.lock().clone();
        for slot in slots {
            slot.join();
        }
    }

    /// 按注册顺序给出状态快照。
    pub fn statuses(&self) -> Vec<EngineStatus> {
        self.order
            .lock()
            .iter()
            .map(|slot| EngineStatus {
                name: slot.name().to_owned(),
                state: slot.state(),
                shutdown_requested: slot.is_shutdown_requested(),
                init_elapsed_ms: slot.init_elapsed_ms(),
            })
            .collect()
    }

    /// 移除全部引擎，释放注册表持有的实例引用。
    pub fn clear(&self) {
        self.order.lock().clear();
        self.engines.clear();
    }
}

impl EngineLookup for EngineRegistry {
    fn engine_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError> {
        self.get_dyn(name)
    }

    fn is_engine_ready(&self, name: &str) -> bool {
        self.is_ready(name)
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .field("policy", &self.policy)
            .finish()
    }
}
