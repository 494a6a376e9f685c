//! # reactor-router
//!
//! URI 键控的内容处理函数路由表。
//!
//! - 精确路由存放在哈希表中，前缀路由按键长度降序排列；
//! - 解析顺序：精确匹配优先，未命中时取最长的匹配前缀；
//! - 路由表由 [`ArcSwap`] 持有，读路径零锁，登记时整表替换。

mod error;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use reactor_core::guard::panic_message;
use reactor_core::{
    ContentHandler, HostServices, Request, Response, Status, codes, into_error, reactor_error,
    wrap_error,
};
use serde::Serialize;

pub use error::{RouteError, RouteKind};

/// [`ContentRouter::uri_map`] 中前缀路由键的后缀。
pub const PREFIX_MARKER: char = '*';

/// 路由表中的一条登记。
///
/// # 契约说明（What）
/// - 键、所属插件与匹配方式在登记后不可变；
/// - `hits`/`errors` 计数器以 `Relaxed` 原子累加，只用于观测，不参与任何同步。
pub struct Route {
    key: Arc<str>,
    plugin: Arc<str>,
    kind: RouteKind,
    handler: ContentHandler,
    hits: AtomicU64,
    errors: AtomicU64,
}

impl Route {
    /// 登记的 URI 键。
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 所属插件名。
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn is_prefix(&self) -> bool {
        self.kind == RouteKind::Prefix
    }

    /// 已分发到该路由的请求数。
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// 处理函数返回错误或 panic 的次数。
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// 在 URI 快照中的键：前缀路由追加 [`PREFIX_MARKER`]。
    pub fn map_key(&self) -> String {
        match self.kind {
            RouteKind::Exact => self.key.to_string(),
            RouteKind::Prefix => format!("{}{PREFIX_MARKER}", self.key),
        }
    }

    fn stats(&self) -> RouteStats {
        RouteStats {
            key: self.key.to_string(),
            plugin: self.plugin.to_string(),
            prefix: self.is_prefix(),
            hits: self.hits(),
            errors: self.errors(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("key", &self.key)
            .field("plugin", &self.plugin)
            .field("kind", &self.kind)
            .field("hits", &self.hits())
            .field("errors", &self.errors())
            .finish()
    }
}

/// 单条路由的计数快照。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub key: String,
    pub plugin: String,
    pub prefix: bool,
    pub hits: u64,
    pub errors: u64,
}

/// `ArcSwap` 的载荷，只读共享，登记时复制后整体替换。
#[derive(Clone, Default)]
struct RouteTable {
    exact: HashMap<Arc<str>, Arc<Route>>,
    /// 按键长度降序；前缀键互不相同，因此顺序确定。
    prefixes: Vec<Arc<Route>>,
}

impl RouteTable {
    fn resolve(&self, uri: &str) -> Option<&Arc<Route>> {
        self.exact.get(uri).or_else(|| {
            self.prefixes
                .iter()
                .find(|route| uri.starts_with(route.key()))
        })
    }

    fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.exact.values().chain(self.prefixes.iter())
    }
}

/// 内容路由器。
///
/// # 教案式说明
/// - **意图 (Why)**：插件在启动期登记路由，此后每个请求都要查表；读多写少且写集中在启动期，
///   适合“读路径零锁、写路径整表替换”；
/// - **契约 (What)**：
///   - 同一键的精确路由最多一条，前缀路由同理；同一键可以同时存在一条精确路由和一条前缀路由，
///     此时该键本身命中精确路由，其余以该键开头的 URI 命中前缀路由；
///   - [`resolve`](Self::resolve) 在路由表不变时幂等；
///   - [`dispatch`](Self::dispatch) 从不 panic，也从不返回错误，所有失败都转为错误响应；
/// - **执行 (How)**：登记方持有写互斥锁，复制当前表、修改、再 `store`；解析方只做一次 `load`。
pub struct ContentRouter {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    diagnostics: AtomicBool,
}

impl ContentRouter {
    /// 空路由器，任何 URI 都解析为未命中。
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            writer: Mutex::new(()),
            diagnostics: AtomicBool::new(false),
        }
    }

    /// 诊断模式下，错误响应附带最新错误节点的调用栈。
    pub fn set_diagnostics(&self, enabled: bool) {
        self.diagnostics.store(enabled, Ordering::Relaxed);
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics.load(Ordering::Relaxed)
    }

    /// 为 `plugin` 登记路由。
    ///
    /// # 契约说明（What）
    /// - 同键同方式的路由已存在时返回 [`RouteError::Duplicate`]，路由表保持不变；
    /// - 登记成功后对随后的 [`resolve`](Self::resolve) 立即可见。
    pub fn register(
        &self,
        plugin: &str,
        key: &str,
        handler: ContentHandler,
        is_prefix: bool,
    ) -> Result<(), RouteError> {
        let kind = RouteKind::from_prefix_flag(is_prefix);
        let _writer = self.writer.lock();
        let current = self.table.load();

        let existing = match kind {
            RouteKind::Exact => current.exact.get(key),
            RouteKind::Prefix => current.prefixes.iter().find(|route| route.key() == key),
        };
        if let Some(existing) = existing {
            return Err(RouteError::Duplicate {
                key: key.to_owned(),
                kind,
                plugin: plugin.to_owned(),
                owner: existing.plugin().to_owned(),
            });
        }

        let route = Arc::new(Route {
            key: Arc::from(key),
            plugin: Arc::from(plugin),
            kind,
            handler,
            hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });

        let mut next = RouteTable::clone(&current);
        match kind {
            RouteKind::Exact => {
                next.exact.insert(Arc::clone(&route.key), route);
            }
            RouteKind::Prefix => {
                next.prefixes.push(route);
                next.prefixes
                    .sort_by(|a, b| b.key.len().cmp(&a.key.len()).then_with(|| a.key.cmp(&b.key)));
            }
        }
        self.table.store(Arc::new(next));

        tracing::debug!(plugin, route = key, kind = kind.as_str(), "content handler registered");
        Ok(())
    }

    /// 解析 URI：精确匹配优先，其次最长前缀。
    pub fn resolve(&self, uri: &str) -> Result<Arc<Route>, RouteError> {
        self.table
            .load()
            .resolve(uri)
            .cloned()
            .ok_or_else(|| RouteError::NotFound {
                uri: uri.to_owned(),
            })
    }

    /// 解析并在当前线程同步调用处理函数。
    ///
    /// # 执行逻辑（How）
    /// 1. 以 [`Request::resource`] 解析路由，未命中返回 `404`；
    /// 2. 处理函数在 `catch_unwind` 下执行，写入一个全新的 [`Response`]；
    /// 3. 处理函数返回 `Err` 时包裹一层 [`codes::HANDLER_FAILED`]，panic 时构造
    ///    [`codes::HANDLER_PANICKED`]，两者都返回 `500` 并丢弃处理函数写了一半的响应。
    ///
    /// # 风险提示（Trade-offs）
    /// - panic 被截获后，处理函数自身持有的共享状态可能处于不一致状态，由插件自行负责；
    ///   宿主只保证本次失败不扩散到其他请求。
    pub fn dispatch(&self, host: &dyn HostServices, request: &Request) -> Response {
        let diagnostics = self.diagnostics();
        let route = match self.resolve(request.resource()) {
            Ok(route) => route,
            Err(error) => {
                tracing::debug!(uri = request.resource(), "no content handler matched");
                return Response::from_error(Status::NOT_FOUND, &into_error!(error), diagnostics);
            }
        };
        route.hits.fetch_add(1, Ordering::Relaxed);

        let mut response = Response::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (route.handler)(host, request, &mut response)
        }));

        let error = match outcome {
            Ok(Ok(())) => return response,
            Ok(Err(error)) => {
                let error = wrap_error!(
                    error,
                    codes::HANDLER_FAILED,
                    "content handler for `{}` failed",
                    route.key
                )
                .with_parameter("route", &route.key)
                .with_parameter("plugin", &route.plugin)
                .with_parameter("uri", request.uri());
                tracing::warn!(
                    plugin = %route.plugin,
                    route = %route.key,
                    code = error.get(1).map(|node| node.code()).unwrap_or(codes::HANDLER_FAILED),
                    "content handler failed: {error:#}"
                );
                error
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let error = reactor_error!(
                    codes::HANDLER_PANICKED,
                    "content handler for `{}` panicked: {message}",
                    route.key
                )
                .with_parameter("route", &route.key)
                .with_parameter("plugin", &route.plugin)
                .with_parameter("uri", request.uri());
                tracing::error!(
                    plugin = %route.plugin,
                    route = %route.key,
                    panic = %message,
                    "content handler panicked"
                );
                error
            }
        };
        route.errors.fetch_add(1, Ordering::Relaxed);
        Response::from_error(Status::INTERNAL_SERVER_ERROR, &error, diagnostics)
    }

    /// 移除某插件登记的全部路由，返回移除数量。
    pub fn remove_plugin(&self, plugin: &str) -> usize {
        let _writer = self.writer.lock();
        let current = self.table.load();
        let mut next = RouteTable::clone(&current);
        next.exact.retain(|_, route| route.plugin() != plugin);
        next.prefixes.retain(|route| route.plugin() != plugin);
        let removed = current.exact.len() + current.prefixes.len()
            - next.exact.len()
            - next.prefixes.len();
        if removed > 0 {
            self.table.store(Arc::new(next));
            tracing::debug!(plugin, removed, "content handlers removed");
        }
        removed
    }

    /// 全部在用路由到所属插件的快照。
    ///
    /// 精确路由以原键出现，前缀路由以键加 [`PREFIX_MARKER`] 出现，
    /// 因此同键的精确与前缀登记在快照中各占一项。
    pub fn uri_map(&self) -> BTreeMap<String, String> {
        let table = self.table.load();
        table
            .routes()
            .map(|route| (route.map_key(), route.plugin.to_string()))
            .collect()
    }

    /// 全部路由的计数快照，按键排序，同键时精确路由在前。
    pub fn stats(&self) -> Vec<RouteStats> {
        let mut stats: Vec<_> = self.table.load().routes().map(|route| route.stats()).collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key).then(a.prefix.cmp(&b.prefix)));
        stats
    }

    /// 路由总数（精确与前缀之和）。
    pub fn len(&self) -> usize {
        let table = self.table.load();
        table.exact.len() + table.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContentRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentRouter")
            .field("routes", &self.len())
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::engine::{Engine, EngineLookup};
    use reactor_core::{ReactorError, content_handler};

    struct NullHost;

    impl EngineLookup for NullHost {
        fn engine_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError> {
            Err(ReactorError::new(codes::ENGINE_NOT_FOUND, format!("no engine `{name}`")))
        }

        fn is_engine_ready(&self, _: &str) -> bool {
            false
        }
    }

    impl HostServices for NullHost {
        fn add_content_handler(
            &self,
            _: &str,
            _: &str,
            _: ContentHandler,
            _: bool,
        ) -> Result<(), ReactorError> {
            Ok(())
        }

        fn uri_map(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }

        fn is_shutting_down(&self) -> bool {
            false
        }
    }

    fn reply(text: &'static str) -> ContentHandler {
        content_handler(move |_, _, response| {
            response.set_body(text);
            Ok(())
        })
    }

    #[test]
    fn duplicate_exact_is_rejected_and_table_unchanged() {
        let router = ContentRouter::new();
        router
            .register("geo", "/geo", reply("first"), false)
            .expect("首次登记应成功");
        let error = router
            .register("other", "/geo", reply("second"), false)
            .expect_err("重复精确键应失败");
        assert_eq!(
            error,
            RouteError::Duplicate {
                key: "/geo".to_owned(),
                kind: RouteKind::Exact,
                plugin: "other".to_owned(),
                owner: "geo".to_owned(),
            }
        );
        assert_eq!(router.len(), 1);
        assert_eq!(router.resolve("/geo").map(|r| r.plugin().to_owned()), Ok("geo".to_owned()));
    }

    #[test]
    fn same_plugin_cannot_register_prefix_twice() {
        let router = ContentRouter::new();
        router.register("wms", "/wms/", reply("a"), true).expect("首次登记应成功");
        assert!(router.register("wms", "/wms/", reply("b"), true).is_err());
    }

    #[test]
    fn exact_and_prefix_may_share_a_key() {
        let router = ContentRouter::new();
        router.register("p", "/x", reply("exact"), false).expect("精确登记");
        router.register("p", "/x", reply("prefix"), true).expect("同键前缀登记");
        assert!(!router.resolve("/x").expect("应命中").is_prefix());
        assert!(router.resolve("/xy").expect("应命中").is_prefix());
    }

    #[test]
    fn dispatch_counts_hits_and_errors() {
        let router = ContentRouter::new();
        router.register("p", "/ok", reply("ok"), false).expect("登记");
        router
            .register(
                "p",
                "/fail",
                content_handler(|_, _, _| {
                    Err(ReactorError::new(codes::EXTERNAL, "backend unavailable"))
                }),
                false,
            )
            .expect("登记");

        let request = Request::get("/ok");
        assert_eq!(router.dispatch(&NullHost, &request).body().as_ref(), b"ok");
        let failed = router.dispatch(&NullHost, &Request::get("/fail?x=1"));
        assert_eq!(failed.status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.error_code(), Some(codes::HANDLER_FAILED));

        let stats = router.stats();
        assert_eq!(stats[0].key, "/fail");
        assert_eq!((stats[0].hits, stats[0].errors), (1, 1));
        assert_eq!((stats[1].hits, stats[1].errors), (1, 0));
    }

    #[test]
    fn handler_partial_response_is_discarded_on_error() {
        let router = ContentRouter::new();
        router
            .register(
                "p",
                "/partial",
                content_handler(|_, _, response| {
                    response.set_header("x-partial", "yes");
                    Err(ReactorError::new(codes::EXTERNAL, "late failure"))
                }),
                false,
            )
            .expect("登记");
        let response = router.dispatch(&NullHost, &Request::get("/partial"));
        assert_eq!(response.header("x-partial"), None);
    }

    #[test]
    fn remove_plugin_drops_only_its_routes() {
        let router = ContentRouter::new();
        router.register("a", "/a", reply("a"), false).expect("登记");
        router.register("a", "/a/", reply("a"), true).expect("登记");
        router.register("b", "/b", reply("b"), false).expect("登记");

        assert_eq!(router.remove_plugin("a"), 2);
        assert_eq!(router.remove_plugin("a"), 0);
        let map = router.uri_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("/b").map(String::as_str), Some("b"));
    }

    #[test]
    fn uri_map_lists_exact_and_prefix_on_the_same_key() {
        let router = ContentRouter::new();
        router.register("tiles", "/wms", reply("exact"), false).expect("登记精确");
        router.register("legacy", "/wms", reply("prefix"), true).expect("登记前缀");

        let map = router.uri_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("/wms").map(String::as_str), Some("tiles"));
        assert_eq!(map.get("/wms*").map(String::as_str), Some("legacy"));
    }

    #[test]
    fn stats_serialise_for_status_pages() {
        let router = ContentRouter::new();
        router.register("a", "/a", reply("a"), false).expect("登记");
        let json = serde_json::to_value(router.stats()).expect("可序列化");
        assert_eq!(json[0]["plugin"], "a");
        assert_eq!(json[0]["prefix"], false);
    }
}
