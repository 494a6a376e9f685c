//! # reactor-test-module
//!
//! 宿主加载器的集成测试夹具。
//!
//! - 默认构建导出一个引擎：实例在被最终释放时向 `<配置路径>.dropped` 写入标记，
//!   测试据此判断模块的销毁函数是否、何时运行；
//! - `stale-api` 构建只声明一个与宿主不同的 API 版本，创建函数永远返回空指针，
//!   加载器若在版本检查之前调用了它，测试会观察到错误种类不符。

use std::fs;
use std::path::{Path, PathBuf};

use reactor_core::engine::{Engine, EngineLookup};
use reactor_core::ReactorError;

/// 释放时留下标记文件的引擎。
pub struct MarkerEngine {
    config: Option<PathBuf>,
}

impl Engine for MarkerEngine {
    fn init(&self, _: &dyn EngineLookup) -> Result<(), ReactorError> {
        Ok(())
    }
}

impl Drop for MarkerEngine {
    fn drop(&mut self) {
        if let Some(config) = &self.config {
            // 写失败只会让测试看不到标记，无需上报。
            let _ = fs::write(dropped_marker(config), b"dropped");
        }
    }
}

/// 标记文件路径。
pub fn dropped_marker(config: &Path) -> PathBuf {
    let mut marker = config.as_os_str().to_owned();
    marker.push(".dropped");
    PathBuf::from(marker)
}

#[cfg(not(feature = "stale-api"))]
fn create(config: Option<&Path>) -> Result<MarkerEngine, ReactorError> {
    Ok(MarkerEngine {
        config: config.map(Path::to_path_buf),
    })
}

#[cfg(not(feature = "stale-api"))]
reactor_core::export_module!(engine: create);

#[cfg(feature = "stale-api")]
mod stale {
    use std::ffi::{c_char, c_void};

    use reactor_core::REACTOR_API_VERSION;

    #[unsafe(no_mangle)]
    #[allow(non_upper_case_globals)]
    pub static reactor_module_api_version: u32 = REACTOR_API_VERSION + 1;

    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn reactor_module_create(_: *const c_char) -> *mut c_void {
        core::ptr::null_mut()
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn reactor_module_destroy(_: *mut c_void) {}
}
