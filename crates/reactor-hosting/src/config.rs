//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 宿主启动所需的全部输入集中在一个 TOML 文件中：运行参数、API Key 策略以及待加载的引擎/插件；
//! - 配置错误必须在启动序列的最早阶段暴露，并指出文件、行号与具体设置项，而不是带着残缺配置运行。
//!
//! ## 文件结构（What）
//! ```toml
//! [reactor]
//! diagnostic_mode = false
//! shutdown_grace_ms = 10000
//! construction_failure = "abort"   # 或 "propagate"
//!
//! [api_key]
//! header = "x-api-key"
//! param = "apikey"
//! access_token_param = "access_token"
//!
//! [[engine]]
//! name = "geonames"
//! library = "engines/libgeonames.so"
//! config = "engines/geonames.toml"
//!
//! [[plugin]]
//! name = "timeseries"
//! library = "plugins/libtimeseries.so"
//! disabled = true
//! ```
//! - `library` 与 `config` 的相对路径以配置文件所在目录为基准解析；
//! - 模块自己的配置文件对宿主不透明，只把路径交给模块的创建函数。

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reactor_core::{ApiKeyPolicy, IntoReactorError, Origin, ReactorError, codes};
use serde::Deserialize;
use thiserror::Error;

use crate::lifecycle::ConstructionFailurePolicy;

/// 默认的关闭宽限期。
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 文件无法读取。
    #[error("configuration file `{}` could not be read", .file.display())]
    Read {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML 语法或结构错误。
    #[error("configuration file `{}` is malformed{}: {message}",
        .file.display(),
        .line.map(|line| format!(" at line {line}")).unwrap_or_default())]
    Parse {
        file: PathBuf,
        line: Option<usize>,
        message: String,
    },

    /// 语义校验失败。
    #[error("configuration file `{}`: setting `{setting}` {message}", .file.display())]
    Invalid {
        file: PathBuf,
        setting: String,
        message: String,
    },
}

impl IntoReactorError for ConfigError {
    fn into_error_at(self, origin: Origin) -> ReactorError {
        let message = self.to_string();
        match self {
            ConfigError::Read { file, source } => {
                ReactorError::adopt_at(origin, codes::CONFIG_INVALID, message, &source)
                    .with_parameter("file", file.display())
            }
            ConfigError::Parse { file, line, .. } => {
                let mut error = ReactorError::at(origin, codes::CONFIG_INVALID, message)
                    .with_parameter("file", file.display());
                if let Some(line) = line {
                    error.add_parameter("line", line);
                }
                error
            }
            ConfigError::Invalid { file, setting, .. } => {
                ReactorError::at(origin, codes::CONFIG_INVALID, message)
                    .with_parameter("file", file.display())
                    .with_parameter("setting", setting)
            }
        }
    }
}

impl From<ConfigError> for ReactorError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        error.into_error_at(Origin::caller())
    }
}

/// `[reactor]` 段。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSection {
    /// 错误响应是否附带调用栈。
    pub diagnostic_mode: bool,
    /// 关闭流程的宽限期，超时后由进程入口升级为强制终止。
    pub shutdown_grace_ms: u64,
    /// 引擎初始化失败时的处置策略。
    pub construction_failure: ConstructionFailurePolicy,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            diagnostic_mode: false,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            construction_failure: ConstructionFailurePolicy::Abort,
        }
    }
}

/// `[[engine]]` / `[[plugin]]` 条目。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub name: String,
    pub library: PathBuf,
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default)]
    pub disabled: bool,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, library: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
            config: None,
            disabled: false,
        }
    }

    pub fn with_config(mut self, config: impl Into<PathBuf>) -> Self {
        self.config = Some(config.into());
        self
    }
}

/// 宿主配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactorConfig {
    #[serde(default)]
    pub reactor: RuntimeSection,
    #[serde(default)]
    pub api_key: ApiKeyPolicy,
    #[serde(default, rename = "engine")]
    pub engines: Vec<ModuleConfig>,
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<ModuleConfig>,
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl ReactorConfig {
    /// 读取、解析并校验配置文件；相对路径改写为以文件所在目录为基准的路径。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            file: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// 以 `file` 作为来源名解析 TOML 文本。
    pub fn from_toml_str(text: &str, file: &Path) -> Result<Self, ConfigError> {
        let mut config: ReactorConfig = toml::from_str(text).map_err(|error| ConfigError::Parse {
            file: file.to_path_buf(),
            line: error.span().map(|span| line_of(text, span.start)),
            message: error.message().to_owned(),
        })?;
        config.source = Some(file.to_path_buf());
        config.validate()?;
        if let Some(base) = file.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// 配置来源文件；以代码构造的配置为 `None`。
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.reactor.shutdown_grace_ms)
    }

    /// 未禁用的引擎条目，保持声明顺序。
    pub fn enabled_engines(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.engines.iter().filter(|module| !module.disabled)
    }

    /// 未禁用的插件条目，保持声明顺序。
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.plugins.iter().filter(|module| !module.disabled)
    }

    /// 校验名称非空、段内不重复、库路径非空。
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (section, modules) in [("engine", &self.engines), ("plugin", &self.plugins)] {
            let mut seen = HashSet::new();
            for (index, module) in modules.iter().enumerate() {
                if module.name.trim().is_empty() {
                    return Err(self.invalid(format!("{section}[{index}].name"), "must not be empty"));
                }
                if module.library.as_os_str().is_empty() {
                    return Err(self.invalid(format!("{section}[{index}].library"), "must not be empty"));
                }
                if !seen.insert(module.name.as_str()) {
                    return Err(self.invalid(
                        format!("{section}[{index}].name"),
                        format!("duplicates {section} name `{}`", module.name),
                    ));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, setting: String, message: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            file: self.source.clone().unwrap_or_default(),
            setting,
            message: message.into(),
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        for module in self.engines.iter_mut().chain(self.plugins.iter_mut()) {
            if module.library.is_relative() {
                module.library = base.join(&module.library);
            }
            if let Some(config) = module.config.as_mut() {
                if config.is_relative() {
                    *config = base.join(&*config);
                }
            }
        }
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    let offset = offset.min(text.len());
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}
