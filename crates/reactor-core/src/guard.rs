//! panic 边界工具。
//!
//! 模块导出的 `extern "C"` 函数与路由分发都必须在边界处截住 panic：前者避免跨 FFI 展开的未定义行为，
//! 后者保证单个请求失败不会波及宿主。

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::backtrace::Backtracer;

/// 从 panic 载荷中提取可读消息。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_owned();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_owned()
}

/// 执行 `f`，发生 panic 时记录日志（含调用栈）并返回 `default`。
pub fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let backtrace = Backtracer::global().capture();
            tracing::error!(op, panic = %message, "panic at module boundary\n{backtrace}");
            default
        }
    }
}
