//! 错误构造宏。

/// 生成包含文件、行号与所在函数完整路径的 [`Origin`](crate::error::Origin)。
#[macro_export]
macro_rules! origin {
    () => {{
        fn __reactor_origin_marker() {}
        fn __reactor_type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = __reactor_type_name_of(__reactor_origin_marker);
        let mut function = name
            .strip_suffix("::__reactor_origin_marker")
            .unwrap_or(name);
        while let ::core::option::Option::Some(outer) = function.strip_suffix("::{{closure}}") {
            function = outer;
        }
        $crate::error::Origin::new(::core::file!(), ::core::line!(), ::core::option::Option::Some(function))
    }};
}

/// 以 [`origin!`] 记录来源并构造 [`ReactorError`](crate::error::ReactorError)。
///
/// ```ignore
/// return Err(reactor_error!(codes::CONFIG_INVALID, "unknown level `{}`", level)
///     .with_parameter("setting", "log.level"));
/// ```
#[macro_export]
macro_rules! reactor_error {
    ($code:expr, $($arg:tt)+) => {
        $crate::error::ReactorError::at($crate::origin!(), $code, ::std::format!($($arg)+))
    };
}

/// 以 [`origin!`] 记录来源，在既有错误链之上新增一个节点。
#[macro_export]
macro_rules! wrap_error {
    ($error:expr, $code:expr, $($arg:tt)+) => {
        $crate::error::ReactorError::wrap_at($error, $crate::origin!(), $code, ::std::format!($($arg)+))
    };
}

/// 以 [`origin!`] 记录来源收编外部 `std::error::Error`。
#[macro_export]
macro_rules! adopt_error {
    ($source:expr, $code:expr, $($arg:tt)+) => {
        $crate::error::ReactorError::adopt_at($crate::origin!(), $code, ::std::format!($($arg)+), $source)
    };
}

/// 在当前函数处把组件错误转换为 [`ReactorError`](crate::error::ReactorError)。
///
/// ```ignore
/// let slot = self.engines.get(name).ok_or_else(|| into_error!(RegistryError::NotFound { .. }))?;
/// ```
#[macro_export]
macro_rules! into_error {
    ($error:expr) => {
        $crate::error::IntoReactorError::into_error_at($error, $crate::origin!())
    };
}
