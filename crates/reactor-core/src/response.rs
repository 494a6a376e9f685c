//! 出站响应模型与结构化错误响应。

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{ErrorReport, ReactorError};

/// HTTP 状态码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status(u16);

impl Status {
    pub const OK: Status = Status(200);
    pub const NO_CONTENT: Status = Status(204);
    pub const BAD_REQUEST: Status = Status(400);
    pub const UNAUTHORIZED: Status = Status(401);
    pub const FORBIDDEN: Status = Status(403);
    pub const NOT_FOUND: Status = Status(404);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);
    pub const SERVICE_UNAVAILABLE: Status = Status(503);

    /// 以任意数值构造。
    pub const fn from_u16(code: u16) -> Self {
        Status(code)
    }

    /// 数值形式。
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 是否为 2xx。
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::OK
    }
}

/// 处理函数写出的响应。
///
/// 处理函数收到的是一个默认 `200`、空头部、空正文的响应，按需覆盖字段。
#[derive(Clone, Debug, Default)]
pub struct Response {
    status: Status,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    #[serde(flatten)]
    error: &'a ErrorReport,
}

impl Response {
    /// 空的 `200` 响应。
    pub fn new() -> Self {
        Self::default()
    }

    /// 把错误链渲染为 JSON 错误响应。
    ///
    /// # 契约说明（What）
    /// - 正文字段：`status`、`code`（最新节点的错误码）、`message`、`chain`（由新到旧），
    ///   以及 `include_backtrace` 为真时的 `backtrace`；
    /// - 头部 `x-reactor-error` 携带错误码，便于前端在不解析正文的情况下分类。
    pub fn from_error(status: Status, error: &ReactorError, include_backtrace: bool) -> Self {
        let report = error.report(include_backtrace);
        let body = ErrorBody {
            status: status.as_u16(),
            error: &report,
        };
        // 序列化失败时退化为纯文本。
        let (content_type, body) = match serde_json::to_vec(&body) {
            Ok(json) => ("application/json", Bytes::from(json)),
            Err(_) => ("text/plain; charset=utf-8", Bytes::from(error.to_string())),
        };
        Self::new()
            .with_status(status)
            .with_header("content-type", content_type)
            .with_header("x-reactor-error", error.code())
            .with_body(body)
    }

    /// 设置状态码。
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// 链式设置状态码。
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// 设置头部（名称转为小写，同名覆盖）。
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// 链式设置头部。
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// 设置正文。
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// 链式设置正文。
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 错误响应携带的错误码；普通响应返回 `None`。
    pub fn error_code(&self) -> Option<&str> {
        self.header("x-reactor-error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn error_response_carries_code_and_chain() {
        let error = ReactorError::new(codes::EXTERNAL, "disk unplugged")
            .wrap(codes::HANDLER_FAILED, "handler for `/boom` failed");
        let response = Response::from_error(Status::INTERNAL_SERVER_ERROR, &error, false);

        assert_eq!(response.status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(response.error_code(), Some(codes::HANDLER_FAILED));
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let json: serde_json::Value =
            serde_json::from_slice(response.body()).expect("正文应为合法 JSON");
        assert_eq!(json["status"], 500);
        assert_eq!(json["code"], codes::HANDLER_FAILED);
        assert_eq!(json["chain"].as_array().map(Vec::len), Some(2));
        assert!(json.get("backtrace").is_none(), "非诊断模式不应输出调用栈");
    }

    #[test]
    fn diagnostic_mode_includes_backtrace() {
        let error = ReactorError::new(codes::HANDLER_FAILED, "boom");
        let response = Response::from_error(Status::INTERNAL_SERVER_ERROR, &error, true);
        let json: serde_json::Value =
            serde_json::from_slice(response.body()).expect("正文应为合法 JSON");
        let backtrace = json["backtrace"].as_str().unwrap_or_default();
        assert!(backtrace.starts_with("Backtrace"), "诊断模式应附带调用栈：{backtrace}");
    }

    #[test]
    fn default_response_is_empty_ok() {
        let response = Response::new();
        assert_eq!(response.status(), Status::OK);
        assert!(response.body().is_empty());
        assert_eq!(response.error_code(), None);
    }
}
