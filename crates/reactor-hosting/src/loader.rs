//! # loader 模块说明
//!
//! ## 角色定位（Why）
//! - 把一个独立编译的动态库变成宿主可用的 [`ModuleInstance`]，并独占该库代码的生命周期；
//! - 进程内实例（嵌入方或测试直接构造的引擎/插件）走同一套版本检查与卸载顺序，只是没有代码句柄。
//!
//! ## 行为契约（What）
//! - [`ModuleHandle::load`] 先读取导出的版本静态变量，不一致时在调用任何模块函数之前拒绝；
//!   实例创建后再核对实例自报版本，不一致时立即销毁实例、卸载库；
//! - 卸载时先经由模块导出的销毁函数回收实例，再释放库句柄；
//! - 若卸载时实例仍被宿主其他部分引用，库句柄被有意泄漏并记录 WARN，保证仍可能执行的代码不被卸载。
//!
//! ## 风险提示（Trade-offs）
//! - 打开动态库会执行其静态初始化代码，这一步无法在版本检查之前避免；
//! - 泄漏的库在进程退出前不会释放，这是在“可能执行已卸载代码”与“少量内存”之间的取舍。

use core::fmt;
use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;
use reactor_core::module::{
    API_VERSION_SYMBOL, CREATE_SYMBOL, CreateFn, DESTROY_SYMBOL, DestroyFn,
};
use reactor_core::{ModuleInstance, ModuleKind, REACTOR_API_VERSION};
use serde::Serialize;

use crate::error::LoadError;

/// 模块代码的来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSource {
    /// 从磁盘加载的动态库。
    Library(PathBuf),
    /// 进程内构造的实例。
    Static,
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Library(path) => write!(f, "{}", path.display()),
            ModuleSource::Static => f.write_str("<static>"),
        }
    }
}

/// 卸载结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadOutcome {
    /// 实例已销毁，库已释放。
    Released,
    /// 实例仍被引用，库句柄被保留到进程退出。
    Leaked,
    /// 进程内实例，无库可释放。
    Static,
}

/// `create` 返回的不透明实例指针。
struct RawInstance {
    ptr: NonNull<c_void>,
    destroy: DestroyFn,
}

// SAFETY: 指针指向模块侧装箱的 `ModuleInstance`，其内容本身是 `Send + Sync` 的 trait 对象；
// 宿主只在加载时读取一次、在卸载时交还销毁函数一次，期间不做任何可变访问。
unsafe impl Send for RawInstance {}
// SAFETY: 同上，宿主不通过该指针做并发可变访问。
unsafe impl Sync for RawInstance {}

impl RawInstance {
    /// 交还模块销毁函数。
    ///
    /// # Safety
    /// 只能调用一次，且调用时库尚未释放。
    unsafe fn destroy(self) {
        // SAFETY: 指针来自同一库的 `create`，由调用方保证只交还一次。
        unsafe { (self.destroy)(self.ptr.as_ptr()) }
    }

    /// 模块侧装箱的实例是否被除箱子之外的持有者引用。
    fn is_shared(&self) -> bool {
        // SAFETY: 指针在销毁前始终有效，且只做只读访问。
        unsafe { self.ptr.cast::<ModuleInstance>().as_ref() }.is_shared()
    }
}

/// 已加载模块的句柄。
///
/// # 契约说明（What）
/// - 句柄持有实例的一个克隆，供注册表与插件表再克隆；
/// - `Drop` 时自动执行与 [`unload`](Self::unload) 相同的流程，保证销毁先于库释放。
pub struct ModuleHandle {
    name: Arc<str>,
    source: ModuleSource,
    instance: Option<ModuleInstance>,
    raw: Option<RawInstance>,
    library: Option<Library>,
    unloaded: Option<UnloadOutcome>,
}

impl ModuleHandle {
    /// 加载动态库并创建实例。
    ///
    /// # 执行逻辑（How）
    /// 1. 打开库并读取 `reactor_module_api_version`，不等于 [`REACTOR_API_VERSION`] 即拒绝；
    /// 2. 解析创建与销毁函数；
    /// 3. 以配置路径调用创建函数，空指针视为构造失败；
    /// 4. 核对实例自报版本与种类，失败时先销毁实例再释放库。
    pub fn load(
        name: &str,
        library: &Path,
        config: Option<&Path>,
        expected: ModuleKind,
    ) -> Result<Self, LoadError> {
        // SAFETY: 打开外部动态库天然不安全；库的初始化代码由模块作者负责。
        let lib = unsafe { Library::new(library) }.map_err(|error| LoadError::Open {
            path: library.to_path_buf(),
            reason: error.to_string(),
        })?;

        let missing = |symbol: &'static str, error: libloading::Error| LoadError::MissingSymbol {
            path: library.to_path_buf(),
            symbol,
            reason: error.to_string(),
        };

        // SAFETY: 版本符号按约定是 `u32` 静态变量，只读取其值，不调用任何模块函数。
        let declared = unsafe {
            let symbol = lib
                .get::<*const u32>(API_VERSION_SYMBOL)
                .map_err(|error| missing("reactor_module_api_version", error))?;
            **symbol
        };
        if declared != REACTOR_API_VERSION {
            return Err(LoadError::VersionMismatch {
                module: name.to_owned(),
                found: declared,
                expected: REACTOR_API_VERSION,
            });
        }

        // SAFETY: 符号类型由导出约定确定；函数指针被复制出来，其有效期受 `lib` 约束，
        // 而 `lib` 由本句柄持有到实例销毁之后。
        let (create, destroy) = unsafe {
            let create = *lib
                .get::<CreateFn>(CREATE_SYMBOL)
                .map_err(|error| missing("reactor_module_create", error))?;
            let destroy = *lib
                .get::<DestroyFn>(DESTROY_SYMBOL)
                .map_err(|error| missing("reactor_module_destroy", error))?;
            (create, destroy)
        };

        let config = config
            .map(|path| {
                CString::new(path.to_string_lossy().into_owned()).map_err(|_| {
                    LoadError::InvalidConfigPath {
                        module: name.to_owned(),
                        path: path.to_path_buf(),
                    }
                })
            })
            .transpose()?;
        let config_ptr = config.as_ref().map_or(core::ptr::null(), |c| c.as_ptr());

        // SAFETY: 创建函数遵循导出约定：接收空指针或 NUL 结尾字符串，返回装箱实例或空指针。
        let raw = unsafe { create(config_ptr) };
        let raw = NonNull::new(raw)
            .map(|ptr| RawInstance { ptr, destroy })
            .ok_or_else(|| LoadError::FactoryFailed {
                module: name.to_owned(),
            })?;

        // SAFETY: 非空指针指向模块侧装箱的 `ModuleInstance`，在销毁前有效。
        let instance = unsafe { raw.ptr.cast::<ModuleInstance>().as_ref() }.clone();

        if let Err(error) = check_instance(name, &instance, expected) {
            drop(instance);
            // SAFETY: 实例只被交还一次，此时库仍由 `lib` 持有。
            unsafe { raw.destroy() };
            drop(lib);
            return Err(error);
        }

        tracing::info!(
            module = name,
            kind = %expected,
            library = %library.display(),
            "module loaded"
        );

        Ok(Self {
            name: Arc::from(name),
            source: ModuleSource::Library(library.to_path_buf()),
            instance: Some(instance),
            raw: Some(raw),
            library: Some(lib),
            unloaded: None,
        })
    }

    /// 以进程内实例构造句柄，执行与动态库相同的版本与种类检查。
    pub fn from_static(
        name: &str,
        instance: ModuleInstance,
        expected: ModuleKind,
    ) -> Result<Self, LoadError> {
        check_instance(name, &instance, expected)?;
        tracing::info!(module = name, kind = %expected, "static module registered");
        Ok(Self {
            name: Arc::from(name),
            source: ModuleSource::Static,
            instance: Some(instance),
            raw: None,
            library: None,
            unloaded: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// 模块实例；卸载后为 `None`。
    pub fn instance(&self) -> Option<&ModuleInstance> {
        self.instance.as_ref()
    }

    pub fn kind(&self) -> Option<ModuleKind> {
        self.instance.as_ref().map(ModuleInstance::kind)
    }

    /// 销毁实例并释放库句柄。
    pub fn unload(mut self) -> UnloadOutcome {
        self.release()
    }

    fn release(&mut self) -> UnloadOutcome {
        if let Some(outcome) = self.unloaded {
            return outcome;
        }
        let outcome = self.release_once();
        self.unloaded = Some(outcome);
        outcome
    }

    fn release_once(&mut self) -> UnloadOutcome {
        let instance = self.instance.take();
        let Some(raw) = self.raw.take() else {
            if instance.as_ref().is_some_and(ModuleInstance::is_shared) {
                tracing::warn!(module = %self.name, "static module instance still referenced at unload");
            }
            return UnloadOutcome::Static;
        };

        drop(instance);
        let shared = raw.is_shared();
        // SAFETY: 实例只交还一次；库仍由 `self.library` 持有。
        unsafe { raw.destroy() };

        if shared {
            tracing::warn!(
                module = %self.name,
                library = %self.source,
                "module instance still referenced at unload; keeping library mapped"
            );
            if let Some(library) = self.library.take() {
                std::mem::forget(library);
            }
            UnloadOutcome::Leaked
        } else {
            drop(self.library.take());
            tracing::debug!(module = %self.name, "module unloaded");
            UnloadOutcome::Released
        }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("instance", &self.instance)
            .finish()
    }
}

fn check_instance(
    name: &str,
    instance: &ModuleInstance,
    expected: ModuleKind,
) -> Result<(), LoadError> {
    let found = instance.api_version();
    if found != REACTOR_API_VERSION {
        return Err(LoadError::VersionMismatch {
            module: name.to_owned(),
            found,
            expected: REACTOR_API_VERSION,
        });
    }
    if instance.kind() != expected {
        return Err(LoadError::KindMismatch {
            module: name.to_owned(),
            found: instance.kind(),
            expected,
        });
    }
    Ok(())
}
