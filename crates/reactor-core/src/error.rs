//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 宿主、引擎与插件之间所有跨边界的失败都以 [`ReactorError`] 表达：一条由新到旧的因果链，
//!   每个节点携带稳定错误码、来源位置、键值参数、自由文本细节以及一次调用栈快照；
//! - 根因往往位于链的深处，而调用方通常只知道参数名，因此提供跨整条链的参数检索。
//!
//! ## 设计要求（What）
//! - 链表自底向上构建：[`ReactorError::wrap`] 在链头新增一个节点，长度恰好加一，索引 0 永远是最新节点；
//! - 参数名不要求唯一，查找返回首个匹配；查询不存在的参数返回 `None`，绝不 panic；
//! - 外部 `std::error::Error` 通过 [`ReactorError::adopt`] 纳入链路，沿 `source()` 逐层转换为节点。
//!
//! ## 扩展建议（How）
//! - 组件内部使用 `thiserror` 枚举描述细粒度失败，再通过 `From` 转换为 [`ReactorError`]；
//! - 需要记录所在函数名时使用 [`reactor_error!`](crate::reactor_error) 宏，而不是手写 [`Origin`]。

use core::fmt;
use std::borrow::Cow;
use std::panic::Location;

use serde::Serialize;

use crate::backtrace::{BacktraceSnapshot, Backtracer};

/// 稳定错误码集合，统一遵循 `<领域>.<语义>` 命名约定。
pub mod codes {
    /// 模块文件或导出符号无法解析。
    pub const MODULE_LOAD: &str = "module.load";
    /// 模块声明的 API 版本与宿主编译版本不一致。
    pub const MODULE_VERSION_MISMATCH: &str = "module.version_mismatch";
    /// 引擎初始化失败；默认策略下会终止进程。
    pub const ENGINE_CONSTRUCTION_FAILED: &str = "engine.construction_failed";
    /// 未注册的引擎名称。
    pub const ENGINE_NOT_FOUND: &str = "engine.not_found";
    /// 引擎不具备请求的能力类型。
    pub const ENGINE_TYPE_MISMATCH: &str = "engine.type_mismatch";
    /// 引擎名称重复注册。
    pub const ENGINE_DUPLICATE_NAME: &str = "engine.duplicate_name";
    /// 插件名称重复注册。
    pub const PLUGIN_DUPLICATE_NAME: &str = "plugin.duplicate_name";
    /// 插件初始化失败。
    pub const PLUGIN_INIT_FAILED: &str = "plugin.init_failed";
    /// 没有任何路由匹配请求 URI。
    pub const ROUTE_NOT_FOUND: &str = "route.not_found";
    /// 路由键重复注册。
    pub const ROUTE_DUPLICATE: &str = "route.duplicate";
    /// 请求处理函数返回错误。
    pub const HANDLER_FAILED: &str = "handler.failed";
    /// 请求处理函数发生 panic。
    pub const HANDLER_PANICKED: &str = "handler.panicked";
    /// 配置文件解析或校验失败。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 宿主正在关闭，拒绝新请求。
    pub const REACTOR_SHUTTING_DOWN: &str = "reactor.shutting_down";
    /// 从外部 `std::error::Error` 收编而来的节点。
    pub const EXTERNAL: &str = "external.error";
}

/// 错误节点的来源位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Origin {
    file: &'static str,
    line: u32,
    function: Option<&'static str>,
}

impl Origin {
    /// 以显式字段构造来源。
    pub const fn new(file: &'static str, line: u32, function: Option<&'static str>) -> Self {
        Self {
            file,
            line,
            function,
        }
    }

    /// 取调用者位置；函数名无法由 `track_caller` 获得，保持为空。
    ///
    /// 宿主内部的构造点一律经由 [`origin!`](crate::origin) 系列宏，只有模块作者直接调用
    /// [`ReactorError::new`] 时才会落到这里。
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line(), None)
    }

    /// 源文件路径。
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// 行号。
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 所在函数的完整路径（仅 [`origin!`](crate::origin) 宏可提供）。
    pub fn function(&self) -> Option<&'static str> {
        self.function
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            Some(function) => write!(f, "{}:{} ({function})", self.file, self.line),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// 错误链中的单个节点。
///
/// # 契约说明（What）
/// - 节点创建后只允许在链头位置追加参数与细节（见 [`ReactorError::add_parameter`]），
///   已被包裹的旧节点保持不可变；
/// - `cause` 指向更旧的节点，形成单向链表。
pub struct ErrorNode {
    code: &'static str,
    message: Cow<'static, str>,
    origin: Origin,
    parameters: Vec<(Cow<'static, str>, String)>,
    details: Vec<String>,
    backtrace: BacktraceSnapshot,
    cause: Option<Box<ErrorNode>>,
}

impl ErrorNode {
    fn new(
        origin: Origin,
        code: &'static str,
        message: Cow<'static, str>,
        backtrace: BacktraceSnapshot,
    ) -> Self {
        Self {
            code,
            message,
            origin,
            parameters: Vec::new(),
            details: Vec::new(),
            backtrace,
            cause: None,
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 面向排障人员的描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 节点的来源位置。
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// 按追加顺序遍历参数。
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .map(|(name, value)| (name.as_ref(), value.as_str()))
    }

    /// 本节点内首个同名参数的值。
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 自由文本细节。
    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// 节点创建时捕获的调用栈。
    pub fn backtrace(&self) -> &BacktraceSnapshot {
        &self.backtrace
    }

    /// 更旧的原因节点。
    pub fn cause(&self) -> Option<&ErrorNode> {
        self.cause.as_deref()
    }
}

impl fmt::Debug for ErrorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorNode")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("origin", &self.origin)
            .field("parameters", &self.parameters)
            .field("details", &self.details)
            .finish()
    }
}

impl fmt::Display for ErrorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorNode {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|node| node as &(dyn std::error::Error + 'static))
    }
}

/// `ReactorError` 是宿主运行时统一的结构化错误链。
///
/// # 设计背景（Why）
/// - 请求期错误需要在分发边界被转换为普通响应，启动期错误需要在进程退出前完整落盘，
///   两者都依赖同一份“错误码 + 参数 + 调用栈 + 因果链”的结构；
/// - 以显式的节点链表替代语言层面的异常继承，便于遍历、序列化与跨模块传递。
///
/// # 逻辑解析（How）
/// - 内部仅持有链头节点的 `Box`，保持 `Result<T, ReactorError>` 的体积与指针相当；
/// - 每次构造节点都会无条件捕获一次调用栈，换取事后可诊断性；
/// - `source()` 沿 `cause` 暴露整条链，兼容 `anyhow` 等上层错误框架。
///
/// # 契约说明（What）
/// - **索引**：`get(0)` 为最新节点，`get(len() - 1)` 为根因；
/// - **参数检索**：[`parameter`](Self::parameter) 自新到旧扫描全部节点，返回首个匹配；
/// - **线程安全**：类型满足 `Send + Sync + 'static`，可跨线程移动。
pub struct ReactorError {
    head: Box<ErrorNode>,
}

impl ReactorError {
    /// 以调用者位置构造单节点错误链；需要记录所在函数时改用 [`reactor_error!`](crate::reactor_error)。
    #[track_caller]
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::at(Origin::caller(), code, message)
    }

    /// 以显式来源构造单节点错误链，通常由 [`reactor_error!`](crate::reactor_error) 调用。
    pub fn at(origin: Origin, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            head: Box::new(ErrorNode::new(
                origin,
                code,
                message.into(),
                Backtracer::global().capture(),
            )),
        }
    }

    /// 链式构造：在当前链头之上新增一个节点，长度恰好加一。
    #[track_caller]
    pub fn wrap(self, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        self.wrap_at(Origin::caller(), code, message)
    }

    /// 以显式来源执行链式构造，通常由 [`wrap_error!`](crate::wrap_error) 调用。
    pub fn wrap_at(
        self,
        origin: Origin,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let mut node = ErrorNode::new(
            origin,
            code,
            message.into(),
            Backtracer::global().capture(),
        );
        node.cause = Some(self.head);
        Self {
            head: Box::new(node),
        }
    }

    /// 收编外部错误：沿 `source()` 将整条外部链转换为节点，再在其上新增一个描述节点。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：Rust 没有“当前活动异常”的概念，调用方在 `match`/`map_err` 中拿到外部错误后，
    ///   通过本方法把它连同其全部原因一起纳入错误链，等价于自动沿用正在传播的异常；
    /// - **执行 (How)**：外部节点统一使用 [`codes::EXTERNAL`]，共享同一次调用栈捕获；
    /// - **契约 (What)**：返回链的长度 = 外部链长度 + 1。
    #[track_caller]
    pub fn adopt(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        Self::adopt_at(Origin::caller(), code, message, error)
    }

    /// 以显式来源收编外部错误，通常由 [`adopt_error!`](crate::adopt_error) 调用。
    pub fn adopt_at(
        origin: Origin,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let snapshot = Backtracer::global().capture();

        let mut foreign = Vec::new();
        let mut current = Some(error);
        while let Some(err) = current {
            foreign.push(err.to_string());
            current = err.source();
        }

        let mut cause: Option<Box<ErrorNode>> = None;
        for text in foreign.into_iter().rev() {
            let mut node = ErrorNode::new(origin, codes::EXTERNAL, Cow::Owned(text), snapshot.clone());
            node.cause = cause.take();
            cause = Some(Box::new(node));
        }

        let mut head = ErrorNode::new(origin, code, message.into(), snapshot);
        head.cause = cause;
        Self {
            head: Box::new(head),
        }
    }

    /// 为链头追加自由文本细节。
    pub fn add_detail(&mut self, detail: impl Into<String>) {
        self.head.details.push(detail.into());
    }

    /// Builder 风格的 [`add_detail`](Self::add_detail)。
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.add_detail(detail);
        self
    }

    /// 为链头追加命名参数，名称允许重复。
    pub fn add_parameter(&mut self, name: impl Into<Cow<'static, str>>, value: impl fmt::Display) {
        self.head.parameters.push((name.into(), value.to_string()));
    }

    /// Builder 风格的 [`add_parameter`](Self::add_parameter)。
    pub fn with_parameter(
        mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl fmt::Display,
    ) -> Self {
        self.add_parameter(name, value);
        self
    }

    /// 最新节点的错误码。
    pub fn code(&self) -> &'static str {
        self.head.code
    }

    /// 最新节点的描述。
    pub fn message(&self) -> &str {
        &self.head.message
    }

    /// 最新节点。
    pub fn newest(&self) -> &ErrorNode {
        &self.head
    }

    /// 最旧的根因节点。
    pub fn root_cause(&self) -> &ErrorNode {
        let mut node: &ErrorNode = &self.head;
        while let Some(next) = node.cause() {
            node = next;
        }
        node
    }

    /// 链长度，至少为 1。
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// 按索引访问节点，0 为最新。
    pub fn get(&self, index: usize) -> Option<&ErrorNode> {
        self.iter().nth(index)
    }

    /// 自新到旧遍历节点。
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            next: Some(&self.head),
        }
    }

    /// 自新到旧在整条链上查找首个同名参数。
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.iter().find_map(|node| node.parameter(name))
    }

    /// 链中是否存在指定错误码的节点。
    pub fn contains_code(&self, code: &str) -> bool {
        self.iter().any(|node| node.code == code)
    }

    /// 最新节点调用栈的纯文本渲染。
    pub fn backtrace_text(&self) -> &str {
        self.head.backtrace.render()
    }

    /// 最新节点调用栈的标记语言转义渲染。
    pub fn backtrace_markup(&self) -> String {
        self.head.backtrace.render_markup()
    }

    /// 生成可序列化的报告；`include_backtrace` 控制是否附带最新节点的调用栈。
    pub fn report(&self, include_backtrace: bool) -> ErrorReport {
        ErrorReport {
            code: self.head.code.to_owned(),
            message: self.head.message.to_string(),
            chain: self
                .iter()
                .map(|node| ErrorReportEntry {
                    code: node.code.to_owned(),
                    message: node.message.to_string(),
                    origin: node.origin.to_string(),
                    parameters: node
                        .parameters()
                        .map(|(name, value)| ReportParameter {
                            name: name.to_owned(),
                            value: value.to_owned(),
                        })
                        .collect(),
                    details: node.details.clone(),
                })
                .collect(),
            backtrace: include_backtrace.then(|| self.backtrace_text().to_owned()),
        }
    }
}

impl fmt::Debug for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for ReactorError {
    /// `{}` 只输出最新节点；`{:#}` 输出整条链及参数、细节。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            return fmt::Display::fmt(&*self.head, f);
        }
        for (index, node) in self.iter().enumerate() {
            if index > 0 {
                f.write_str("\ncaused by: ")?;
            }
            write!(f, "[{}] {} at {}", node.code, node.message, node.origin)?;
            for (name, value) in node.parameters() {
                write!(f, "\n    {name} = {value}")?;
            }
            for detail in &node.details {
                write!(f, "\n    {detail}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.head
            .cause
            .as_deref()
            .map(|node| node as &(dyn std::error::Error + 'static))
    }
}

/// 自新到旧的节点迭代器。
#[derive(Clone, Debug)]
pub struct ChainIter<'a> {
    next: Option<&'a ErrorNode>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a ErrorNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.cause();
        Some(node)
    }
}

impl<'a> IntoIterator for &'a ReactorError {
    type Item = &'a ErrorNode;
    type IntoIter = ChainIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 错误链的可序列化视图，用于错误响应体与结构化日志。
#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub chain: Vec<ErrorReportEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

/// 报告中的单个节点。
#[derive(Clone, Debug, Serialize)]
pub struct ErrorReportEntry {
    pub code: String,
    pub message: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ReportParameter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// 报告中的命名参数；保留重复名称与原始顺序。
#[derive(Clone, Debug, Serialize)]
pub struct ReportParameter {
    pub name: String,
    pub value: String,
}

/// 组件错误枚举到 [`ReactorError`] 的转换。
///
/// # 教案式说明
/// - **意图 (Why)**：`From` 只能拿到转换发生的源码位置，拿不到所在函数；
///   实现本 trait 的枚举可以在产生错误的函数里经 [`into_error!`](crate::into_error) 转换，
///   让链节点记录真正的来源；
/// - **契约 (What)**：实现方同时提供 `From`，以 [`Origin::caller`] 委托到本方法，
///   保证两条路径得到相同的错误码与参数。
pub trait IntoReactorError {
    fn into_error_at(self, origin: Origin) -> ReactorError;
}

/// 在 `Result<T, ReactorError>` 上追加一层上下文。
pub trait ResultExt<T> {
    /// 失败时以 `code`/`message` 包裹现有错误链。
    fn context(self, code: &'static str, message: impl Into<Cow<'static, str>>)
    -> Result<T, ReactorError>;

    /// 惰性生成描述的 [`context`](Self::context)。
    fn with_context<F, M>(self, code: &'static str, message: F) -> Result<T, ReactorError>
    where
        F: FnOnce() -> M,
        M: Into<Cow<'static, str>>;
}

impl<T> ResultExt<T> for Result<T, ReactorError> {
    #[track_caller]
    fn context(
        self,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, ReactorError> {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(error.wrap_at(Origin::caller(), code, message)),
        }
    }

    #[track_caller]
    fn with_context<F, M>(self, code: &'static str, message: F) -> Result<T, ReactorError>
    where
        F: FnOnce() -> M,
        M: Into<Cow<'static, str>>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(error.wrap_at(Origin::caller(), code, message())),
        }
    }
}

/// 将外部错误类型的 `Result` 收编进错误链。
pub trait AdoptExt<T> {
    /// 失败时调用 [`ReactorError::adopt`]。
    fn adopt(self, code: &'static str, message: impl Into<Cow<'static, str>>)
    -> Result<T, ReactorError>;
}

impl<T, E> AdoptExt<T> for Result<T, E>
where
    E: std::error::Error + 'static,
{
    #[track_caller]
    fn adopt(
        self,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, ReactorError> {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(ReactorError::adopt(code, message, &error)),
        }
    }
}
