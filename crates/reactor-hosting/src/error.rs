//! 宿主装配层的错误域。
//!
//! 细粒度失败以 `thiserror` 枚举表达，跨层传播前统一转换为 [`ReactorError`]，
//! 上下文字段写入链节点参数，供日志与错误响应检索。

use std::path::PathBuf;

use reactor_core::{IntoReactorError, ModuleKind, Origin, ReactorError, codes};
use thiserror::Error;

/// 模块加载失败。
#[derive(Debug, Error)]
pub enum LoadError {
    /// 动态库无法打开（文件缺失、格式错误、依赖缺失等）。
    #[error("module library `{}` could not be opened: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    /// 动态库缺少约定的导出符号。
    #[error("module library `{}` does not export `{symbol}`: {reason}", .path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        reason: String,
    },

    /// 模块编译所用的 API 版本与宿主不一致。
    #[error("module `{module}` was built against API version {found}, host requires {expected}")]
    VersionMismatch {
        module: String,
        found: u32,
        expected: u32,
    },

    /// 创建函数返回空实例（构造失败或 panic，详情见模块侧日志）。
    #[error("module `{module}` factory returned no instance")]
    FactoryFailed { module: String },

    /// 配置声明的种类与模块实际产出的实例种类不符。
    #[error("module `{module}` provides a {found} but is configured as {expected}")]
    KindMismatch {
        module: String,
        found: ModuleKind,
        expected: ModuleKind,
    },

    /// 模块配置路径含有内部 NUL，无法传给创建函数。
    #[error("configuration path `{}` of module `{module}` contains a NUL byte", .path.display())]
    InvalidConfigPath { module: String, path: PathBuf },
}

impl IntoReactorError for LoadError {
    fn into_error_at(self, origin: Origin) -> ReactorError {
        let message = self.to_string();
        match self {
            LoadError::Open { path, .. } => ReactorError::at(origin, codes::MODULE_LOAD, message)
                .with_parameter("library", path.display()),
            LoadError::MissingSymbol { path, symbol, .. } => {
                ReactorError::at(origin, codes::MODULE_LOAD, message)
                    .with_parameter("library", path.display())
                    .with_parameter("symbol", symbol)
            }
            LoadError::VersionMismatch {
                module,
                found,
                expected,
            } => ReactorError::at(origin, codes::MODULE_VERSION_MISMATCH, message)
                .with_parameter("module", module)
                .with_parameter("found", found)
                .with_parameter("expected", expected),
            LoadError::FactoryFailed { module } => {
                ReactorError::at(origin, codes::MODULE_LOAD, message).with_parameter("module", module)
            }
            LoadError::KindMismatch {
                module,
                found,
                expected,
            } => ReactorError::at(origin, codes::MODULE_LOAD, message)
                .with_parameter("module", module)
                .with_parameter("found", found)
                .with_parameter("expected", expected),
            LoadError::InvalidConfigPath { module, path } => {
                ReactorError::at(origin, codes::MODULE_LOAD, message)
                    .with_parameter("module", module)
                    .with_parameter("config", path.display())
            }
        }
    }
}

/// 引擎/插件注册表冲突与查找失败。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RegistryError {
    /// 名称已被同种模块占用。
    #[error("{kind} `{name}` is already registered")]
    DuplicateName { kind: ModuleKind, name: String },

    /// 名称未注册。
    #[error("engine `{name}` is not registered")]
    NotFound { name: String },
}

impl IntoReactorError for RegistryError {
    fn into_error_at(self, origin: Origin) -> ReactorError {
        let message = self.to_string();
        match self {
            RegistryError::DuplicateName { kind, name } => {
                let code = match kind {
                    ModuleKind::Engine => codes::ENGINE_DUPLICATE_NAME,
                    ModuleKind::Plugin => codes::PLUGIN_DUPLICATE_NAME,
                };
                ReactorError::at(origin, code, message).with_parameter(kind.to_string(), name)
            }
            RegistryError::NotFound { name } => {
                ReactorError::at(origin, codes::ENGINE_NOT_FOUND, message).with_parameter("engine", name)
            }
        }
    }
}

impl From<LoadError> for ReactorError {
    #[track_caller]
    fn from(error: LoadError) -> Self {
        error.into_error_at(Origin::caller())
    }
}

impl From<RegistryError> for ReactorError {
    #[track_caller]
    fn from(error: RegistryError) -> Self {
        error.into_error_at(Origin::caller())
    }
}
