//! 入站请求模型。
//!
//! # 教案式说明
//! - **意图（Why）**：网络前端负责解析线上协议，宿主与插件只面对这里的进程内结构；
//! - **契约（What）**：头部名称大小写不敏感（统一小写存储）；查询/表单参数允许多值，
//!   按出现顺序保存；请求体为不可变 [`Bytes`]；
//! - **API Key**：按“头部 → 请求参数 → （启用时）备用访问令牌参数”的固定顺序提取。

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Deserialize;

/// HTTP 方法。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Other(String),
}

impl Method {
    /// 规范化的大写名称。
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other(name) => name,
        }
    }
}

impl FromStr for Method {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_owned()),
        };
        Ok(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API Key 的提取策略。
///
/// - `header`：首选的头部名称；
/// - `param`：其次查找的请求参数名；
/// - `access_token_param`：为 `Some` 时最后查找的备用访问令牌参数名。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiKeyPolicy {
    pub header: String,
    pub param: String,
    pub access_token_param: Option<String>,
}

impl Default for ApiKeyPolicy {
    fn default() -> Self {
        Self {
            header: "x-api-key".to_owned(),
            param: "apikey".to_owned(),
            access_token_param: None,
        }
    }
}

/// 宿主分发的请求。
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: String,
    resource: String,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, Vec<String>>,
    body: Bytes,
}

impl Request {
    /// 以方法与 URI 构造请求；URI 中 `?` 之后的查询串会被解析为参数。
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let (resource, query) = match uri.split_once('?') {
            Some((resource, query)) => (resource.to_owned(), Some(query)),
            None => (uri.clone(), None),
        };
        let mut request = Self {
            method,
            resource,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: Bytes::new(),
            uri: String::new(),
        };
        if let Some(query) = query {
            request.extend_form(query);
        }
        request.uri = uri;
        request
    }

    /// `GET` 请求的便捷构造。
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri)
    }

    /// 追加头部（名称转为小写，同名覆盖）。
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 追加一个参数值；同名参数保留全部值。
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(name.into()).or_default().push(value.into());
        self
    }

    /// 设置请求体。
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 解析 `application/x-www-form-urlencoded` 文本并追加为参数。
    pub fn extend_form(&mut self, encoded: &str) {
        for pair in encoded.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            self.params
                .entry(decode_component(name))
                .or_default()
                .push(decode_component(value));
        }
    }

    /// 请求方法。
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// 完整 URI（含查询串）。
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 资源路径，即路由匹配所用的 URI 部分。
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// 按名称（大小写不敏感）读取头部。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 全部头部。
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// 参数的首个值。
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// 参数的全部值，未出现时为空切片。
    pub fn params(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 全部参数名。
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// 请求体。
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 按策略提取 API Key。
    ///
    /// # 执行逻辑（How）
    /// 1. 查找 `policy.header` 头部；
    /// 2. 未命中时查找 `policy.param` 参数；
    /// 3. 仍未命中且配置了 `access_token_param` 时查找该参数；
    /// 4. 空字符串视为未提供。
    pub fn api_key(&self, policy: &ApiKeyPolicy) -> Option<&str> {
        let non_empty = |value: &&str| !value.is_empty();
        self.header(&policy.header)
            .filter(non_empty)
            .or_else(|| self.param(&policy.param).filter(non_empty))
            .or_else(|| {
                policy
                    .access_token_param
                    .as_deref()
                    .and_then(|name| self.param(name))
                    .filter(non_empty)
            })
    }
}

/// 解码表单编码的一个分量：`+` 视为空格，非法转义按原样保留，非 UTF-8 字节以替换字符呈现。
fn decode_component(input: &str) -> String {
    let spaced = input.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}
