//! # module 模块说明
//!
//! ## 角色定位（Why）
//! - 引擎与插件以独立编译的动态库交付，宿主与模块之间只约定三个导出符号与一个版本常量；
//! - 版本常量以静态变量导出，宿主在调用任何模块函数之前即可读取并比对。
//!
//! ## 导出符号（What）
//! | 符号 | 类型 | 语义 |
//! |---|---|---|
//! | `reactor_module_api_version` | `u32` 静态变量 | 模块编译时的 [`REACTOR_API_VERSION`] |
//! | `reactor_module_create` | [`CreateFn`] | 配置路径 → 不透明实例指针，失败返回空指针 |
//! | `reactor_module_destroy` | [`DestroyFn`] | 销毁 `create` 返回的实例 |
//!
//! ## 风险提示（Trade-offs）
//! - 实例指针背后是 `Box<ModuleInstance>`，其中包含 trait 对象，因此宿主与模块必须由同一编译器版本、
//!   针对同一版本的 `reactor-core` 构建；版本常量只能发现契约层面的显式升级；
//! - 模块通常通过 [`export_module!`](crate::export_module) 生成这些符号，避免手写 `unsafe` 代码。

use core::fmt;
use std::ffi::{CStr, c_char, c_void};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::Engine;
use crate::error::ReactorError;
use crate::guard::guard_with_default;
use crate::plugin::Plugin;

/// 宿主与模块共享的 API 版本；任何破坏 ABI 或 trait 语义的变更都必须递增。
pub const REACTOR_API_VERSION: u32 = 1;

/// 版本静态变量的符号名（含结尾 NUL）。
pub const API_VERSION_SYMBOL: &[u8] = b"reactor_module_api_version\0";
/// 创建函数的符号名。
pub const CREATE_SYMBOL: &[u8] = b"reactor_module_create\0";
/// 销毁函数的符号名。
pub const DESTROY_SYMBOL: &[u8] = b"reactor_module_destroy\0";

/// 创建函数：接收 NUL 结尾的 UTF-8 配置路径（可为空指针），返回不透明实例指针。
pub type CreateFn = unsafe extern "C" fn(config: *const c_char) -> *mut c_void;

/// 销毁函数：接收 [`CreateFn`] 返回的指针，空指针时不做任何事。
pub type DestroyFn = unsafe extern "C" fn(instance: *mut c_void);

/// 模块种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Engine,
    Plugin,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleKind::Engine => "engine",
            ModuleKind::Plugin => "plugin",
        })
    }
}

/// 模块创建出的实例。
#[derive(Clone)]
pub enum ModuleInstance {
    Engine(Arc<dyn Engine>),
    Plugin(Arc<dyn Plugin>),
}

impl ModuleInstance {
    /// 包装一个引擎。
    pub fn engine(engine: impl Engine) -> Self {
        ModuleInstance::Engine(Arc::new(engine))
    }

    /// 包装一个插件。
    pub fn plugin(plugin: impl Plugin) -> Self {
        ModuleInstance::Plugin(Arc::new(plugin))
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleInstance::Engine(_) => ModuleKind::Engine,
            ModuleInstance::Plugin(_) => ModuleKind::Plugin,
        }
    }

    pub fn as_engine(&self) -> Option<&Arc<dyn Engine>> {
        match self {
            ModuleInstance::Engine(engine) => Some(engine),
            ModuleInstance::Plugin(_) => None,
        }
    }

    pub fn as_plugin(&self) -> Option<&Arc<dyn Plugin>> {
        match self {
            ModuleInstance::Plugin(plugin) => Some(plugin),
            ModuleInstance::Engine(_) => None,
        }
    }

    /// 实例自报的 API 版本（由模块一侧编译）。
    pub fn api_version(&self) -> u32 {
        match self {
            ModuleInstance::Engine(engine) => engine.api_version(),
            ModuleInstance::Plugin(plugin) => plugin.api_version(),
        }
    }

    /// 除本句柄外是否仍有其他持有者。
    pub fn is_shared(&self) -> bool {
        match self {
            ModuleInstance::Engine(engine) => Arc::strong_count(engine) > 1,
            ModuleInstance::Plugin(plugin) => Arc::strong_count(plugin) > 1,
        }
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("kind", &self.kind())
            .field("api_version", &self.api_version())
            .finish()
    }
}

/// [`export_module!`](crate::export_module) 展开代码所用的辅助函数，不属于公开 API。
#[doc(hidden)]
pub mod __private {
    use super::*;

    pub use crate::module::REACTOR_API_VERSION;

    /// 把创建函数收到的原始指针转换为路径；空指针或空串表示未配置。
    ///
    /// # Safety
    /// `raw` 为空或指向 NUL 结尾的有效字符串。
    pub unsafe fn config_path_from_raw(raw: *const c_char) -> Option<PathBuf> {
        if raw.is_null() {
            return None;
        }
        // SAFETY: 调用方保证非空指针指向 NUL 结尾字符串。
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy();
        (!text.is_empty()).then(|| PathBuf::from(text.into_owned()))
    }

    /// 在 panic 防护下执行构造函数，并把实例装箱为不透明指针。
    pub fn guard_create<F>(module: &'static str, create: F) -> *mut c_void
    where
        F: FnOnce() -> Result<ModuleInstance, ReactorError>,
    {
        guard_with_default("reactor_module_create", core::ptr::null_mut(), || {
            match create() {
                Ok(instance) => Box::into_raw(Box::new(instance)).cast::<c_void>(),
                Err(error) => {
                    tracing::error!(module, code = error.code(), "module factory failed: {error:#}");
                    core::ptr::null_mut()
                }
            }
        })
    }

    /// 回收 [`guard_create`] 装箱的实例。
    ///
    /// # Safety
    /// `raw` 为空，或是由同一模块的 `guard_create` 返回且尚未回收的指针。
    pub unsafe fn destroy_raw(raw: *mut c_void) {
        if raw.is_null() {
            return;
        }
        guard_with_default("reactor_module_destroy", (), || {
            // SAFETY: 调用方保证指针来自 `Box::<ModuleInstance>::into_raw` 且只回收一次。
            drop(unsafe { Box::from_raw(raw.cast::<ModuleInstance>()) });
        });
    }
}

/// 为引擎或插件构造函数生成模块导出符号。
///
/// 构造函数签名为 `fn(Option<&Path>) -> Result<T, ReactorError>`，`T` 实现
/// [`Engine`](crate::Engine) 或 [`Plugin`](crate::Plugin)。
///
/// ```ignore
/// fn create(config: Option<&std::path::Path>) -> Result<GeoEngine, ReactorError> {
///     GeoEngine::from_config(config)
/// }
///
/// reactor_core::export_module!(engine: create);
/// ```
#[macro_export]
macro_rules! export_module {
    (engine: $ctor:path) => {
        $crate::export_module!(@emit Engine, $ctor);
    };
    (plugin: $ctor:path) => {
        $crate::export_module!(@emit Plugin, $ctor);
    };
    (@emit $variant:ident, $ctor:path) => {
        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static reactor_module_api_version: u32 = $crate::module::__private::REACTOR_API_VERSION;

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn reactor_module_create(
            config: *const ::std::ffi::c_char,
        ) -> *mut ::std::ffi::c_void {
            // SAFETY: 宿主按导出契约传入空指针或 NUL 结尾字符串。
            let config = unsafe { $crate::module::__private::config_path_from_raw(config) };
            $crate::module::__private::guard_create(module_path!(), move || {
                let instance = $ctor(config.as_deref())?;
                Ok($crate::module::ModuleInstance::$variant(::std::sync::Arc::new(instance)))
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn reactor_module_destroy(instance: *mut ::std::ffi::c_void) {
            // SAFETY: 宿主只回传本模块 `reactor_module_create` 返回的指针，且只回传一次。
            unsafe { $crate::module::__private::destroy_raw(instance) }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::path::Path;

    use super::*;
    use crate::engine::EngineLookup;
    use crate::error::codes;

    #[derive(Debug)]
    struct Fixture {
        config: Option<PathBuf>,
    }

    impl Engine for Fixture {
        fn init(&self, _: &dyn EngineLookup) -> Result<(), ReactorError> {
            Ok(())
        }
    }

    fn create(config: Option<&Path>) -> Result<Fixture, ReactorError> {
        Ok(Fixture {
            config: config.map(Path::to_path_buf),
        })
    }

    mod exported {
        use super::create;
        crate::export_module!(engine: create);
    }

    #[test]
    fn exported_version_matches_host() {
        assert_eq!(exported::reactor_module_api_version, REACTOR_API_VERSION);
    }

    #[test]
    fn create_then_destroy_round_trips_config_path() {
        let config = CString::new("/etc/reactor/geo.toml").expect("无内部 NUL");
        let raw = unsafe { exported::reactor_module_create(config.as_ptr()) };
        assert!(!raw.is_null());

        let instance = unsafe { &*raw.cast::<ModuleInstance>() };
        assert_eq!(instance.kind(), ModuleKind::Engine);
        let ModuleInstance::Engine(engine) = instance else {
            unreachable!("引擎模块应产出引擎实例");
        };
        let fixture = crate::engine::downcast_engine::<Fixture>(Arc::clone(engine))
            .expect("实例应为 Fixture");
        assert_eq!(
            fixture.config.as_deref(),
            Some(Path::new("/etc/reactor/geo.toml"))
        );
        drop(fixture);

        unsafe { exported::reactor_module_destroy(raw) };
    }

    #[test]
    fn null_config_means_unconfigured() {
        let raw = unsafe { exported::reactor_module_create(core::ptr::null()) };
        assert!(!raw.is_null());
        unsafe { exported::reactor_module_destroy(raw) };
        unsafe { exported::reactor_module_destroy(core::ptr::null_mut()) };
    }

    #[test]
    fn factory_errors_and_panics_yield_null() {
        let raw = __private::guard_create("fixture", || {
            Err(ReactorError::new(codes::CONFIG_INVALID, "missing grid file"))
        });
        assert!(raw.is_null(), "构造失败应返回空指针");

        let raw = __private::guard_create("fixture", || panic!("factory exploded"));
        assert!(raw.is_null(), "构造 panic 应返回空指针");
    }

    #[test]
    fn shared_instance_is_detected() {
        let instance = ModuleInstance::engine(Fixture { config: None });
        assert!(!instance.is_shared());
        let copy = instance.clone();
        assert!(instance.is_shared());
        drop(copy);
        assert!(!instance.is_shared());
    }
}
