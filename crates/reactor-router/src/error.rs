//! 路由错误域。

use reactor_core::{IntoReactorError, Origin, ReactorError, codes};
use thiserror::Error;

/// 路由表的登记与解析失败。
///
/// # 教案式说明
/// - **意图 (Why)**：路由冲突属于启动期配置问题，未命中属于请求期的正常分支，两者需要区分对待；
/// - **契约 (What)**：通过 [`From<RouteError>`](From) 转换为 [`ReactorError`]，错误码分别为
///   [`codes::ROUTE_NOT_FOUND`] 与 [`codes::ROUTE_DUPLICATE`]，上下文写入链节点参数。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RouteError {
    /// 既无精确匹配也无前缀匹配。
    #[error("no content handler matches `{uri}`")]
    NotFound { uri: String },

    /// 同一键、同一匹配方式的路由已存在。
    ///
    /// - `owner` 为已登记该键的插件，`plugin` 为本次尝试登记的插件；二者相同表示插件重复登记。
    #[error("{kind} route `{key}` requested by `{plugin}` is already owned by `{owner}`")]
    Duplicate {
        key: String,
        kind: RouteKind,
        plugin: String,
        owner: String,
    },
}

/// 路由的匹配方式。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RouteKind {
    Exact,
    Prefix,
}

impl RouteKind {
    pub fn from_prefix_flag(is_prefix: bool) -> Self {
        if is_prefix {
            RouteKind::Prefix
        } else {
            RouteKind::Exact
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RouteKind::Exact => "exact",
            RouteKind::Prefix => "prefix",
        }
    }
}

impl core::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntoReactorError for RouteError {
    fn into_error_at(self, origin: Origin) -> ReactorError {
        let message = self.to_string();
        match self {
            RouteError::NotFound { uri } => {
                ReactorError::at(origin, codes::ROUTE_NOT_FOUND, message).with_parameter("uri", uri)
            }
            RouteError::Duplicate {
                key,
                kind,
                plugin,
                owner,
            } => ReactorError::at(origin, codes::ROUTE_DUPLICATE, message)
                .with_parameter("route", key)
                .with_parameter("kind", kind)
                .with_parameter("plugin", plugin)
                .with_parameter("owner", owner),
        }
    }
}

impl From<RouteError> for ReactorError {
    #[track_caller]
    fn from(error: RouteError) -> Self {
        error.into_error_at(Origin::caller())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_converts_with_parameters() {
        let error: ReactorError = RouteError::Duplicate {
            key: "/timeseries".to_owned(),
            kind: RouteKind::Exact,
            plugin: "timeseries".to_owned(),
            owner: "legacy".to_owned(),
        }
        .into();
        assert_eq!(error.code(), codes::ROUTE_DUPLICATE);
        assert_eq!(error.parameter("owner"), Some("legacy"));
        assert_eq!(error.parameter("kind"), Some("exact"));
        assert!(error.message().contains("already owned by `legacy`"));
    }
}
