//! 路由解析与分发场景
//!
//! - 精确与前缀并存时的解析结果；
//! - 嵌套挂载点的最长前缀；
//! - 处理函数 panic 后路由器仍可继续服务，且并发请求互不影响。

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use reactor_core::{ReactorError, Request, Status, codes, content_handler};
use reactor_router::{ContentRouter, RouteError};
use support::{NullHost, reply};
use tracing_test::traced_test;

#[test]
fn exact_beats_prefix_and_unmatched_is_not_found() {
    let router = ContentRouter::new();
    router.register("p", "/x", reply("exact"), false).expect("登记 /x");
    router.register("p", "/x/", reply("prefix"), true).expect("登记 /x/");

    let exact = router.resolve("/x").expect("/x 应命中");
    assert_eq!((exact.key(), exact.is_prefix()), ("/x", false));

    let prefix = router.resolve("/x/y").expect("/x/y 应命中");
    assert_eq!((prefix.key(), prefix.is_prefix()), ("/x/", true));

    assert_eq!(
        router.resolve("/y").map(|route| route.key().to_owned()),
        Err(RouteError::NotFound {
            uri: "/y".to_owned()
        })
    );
}

#[test]
fn longest_prefix_wins_for_nested_mounts() {
    let router = ContentRouter::new();
    router.register("outer", "/a/", reply("outer"), true).expect("登记 /a/");
    router.register("inner", "/a/b/", reply("inner"), true).expect("登记 /a/b/");

    assert_eq!(router.resolve("/a/b/c").expect("应命中").plugin(), "inner");
    assert_eq!(router.resolve("/a/c").expect("应命中").plugin(), "outer");
}

#[test]
fn query_string_does_not_affect_matching() {
    let router = ContentRouter::new();
    router.register("ts", "/timeseries", reply("rows"), false).expect("登记");
    let response = router.dispatch(&NullHost, &Request::get("/timeseries?param=t2m"));
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.body().as_ref(), b"rows");
}

#[test]
fn unmatched_dispatch_is_a_not_found_response() {
    let router = ContentRouter::new();
    let response = router.dispatch(&NullHost, &Request::get("/nowhere"));
    assert_eq!(response.status(), Status::NOT_FOUND);
    assert_eq!(response.error_code(), Some(codes::ROUTE_NOT_FOUND));
}

#[test]
#[traced_test]
fn panicking_handler_is_isolated_and_router_stays_usable() {
    let router = ContentRouter::new();
    router
        .register(
            "p",
            "/boom",
            content_handler(|_, _, _| panic!("division by zero in renderer")),
            false,
        )
        .expect("登记 /boom");
    router.register("p", "/fine", reply("fine"), false).expect("登记 /fine");

    let failed = router.dispatch(&NullHost, &Request::get("/boom"));
    assert_eq!(failed.status(), Status::INTERNAL_SERVER_ERROR);
    assert_eq!(failed.error_code(), Some(codes::HANDLER_PANICKED));
    assert!(logs_contain("content handler panicked"));
    assert!(logs_contain("division by zero in renderer"));

    let next = router.dispatch(&NullHost, &Request::get("/fine"));
    assert_eq!(next.status(), Status::OK);
    assert_eq!(next.body().as_ref(), b"fine");

    let boom = router.resolve("/boom").expect("应命中");
    assert_eq!((boom.hits(), boom.errors()), (1, 1));
}

#[test]
fn failing_requests_do_not_disturb_concurrent_ones() {
    let router = Arc::new(ContentRouter::new());
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    router
        .register(
            "p",
            "/work",
            content_handler(move |_, request, response| {
                if request.param("fail").is_some() {
                    return Err(ReactorError::new(codes::EXTERNAL, "requested failure"));
                }
                if request.param("panic").is_some() {
                    panic!("requested panic");
                }
                counter.fetch_add(1, Ordering::SeqCst);
                response.set_body("done");
                Ok(())
            }),
            false,
        )
        .expect("登记 /work");

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                let mut ok = 0;
                for i in 0..50 {
                    let uri = match (worker + i) % 3 {
                        0 => "/work?fail=1",
                        1 => "/work?panic=1",
                        _ => "/work",
                    };
                    let response = router.dispatch(&NullHost, &Request::get(uri));
                    if response.status() == Status::OK {
                        ok += 1;
                    }
                }
                ok
            })
        })
        .collect();

    let ok: usize = workers
        .into_iter()
        .map(|worker| worker.join().expect("工作线程不应 panic"))
        .sum();
    assert_eq!(ok, served.load(Ordering::SeqCst));

    let route = router.resolve("/work").expect("应命中");
    assert_eq!(route.hits(), 400);
    assert_eq!(route.errors() as usize, 400 - ok);
}

#[test]
fn diagnostic_mode_exposes_backtrace() {
    let router = ContentRouter::new();
    router
        .register(
            "p",
            "/fail",
            content_handler(|_, _, _| Err(ReactorError::new(codes::EXTERNAL, "broken"))),
            false,
        )
        .expect("登记");

    let quiet = router.dispatch(&NullHost, &Request::get("/fail"));
    assert!(!String::from_utf8_lossy(quiet.body()).contains("\"backtrace\""));

    router.set_diagnostics(true);
    let verbose = router.dispatch(&NullHost, &Request::get("/fail"));
    assert!(String::from_utf8_lossy(verbose.body()).contains("\"backtrace\""));
}

#[test]
fn handler_failure_nodes_record_their_functions() {
    let router = ContentRouter::new();
    router
        .register(
            "p",
            "/fail",
            content_handler(|_, _, _| {
                Err(reactor_core::reactor_error!(codes::EXTERNAL, "upstream {} refused", "tiles"))
            }),
            false,
        )
        .expect("登记");

    let response = router.dispatch(&NullHost, &Request::get("/fail"));
    assert_eq!(response.error_code(), Some(codes::HANDLER_FAILED));
    let body: serde_json::Value = serde_json::from_slice(response.body()).expect("错误正文应为 JSON");
    let chain = body["chain"].as_array().expect("应包含 chain");
    assert_eq!(chain.len(), 2);

    let newest = chain[0]["origin"].as_str().expect("origin 为字符串");
    assert!(newest.ends_with("dispatch)"), "包裹节点应记录分发函数: {newest}");
    let root = chain[1]["origin"].as_str().expect("origin 为字符串");
    assert!(
        root.ends_with("handler_failure_nodes_record_their_functions)"),
        "根因节点应记录处理函数所在函数: {root}"
    );

    let missing = router.dispatch(&NullHost, &Request::get("/absent"));
    let body: serde_json::Value = serde_json::from_slice(missing.body()).expect("错误正文应为 JSON");
    let origin = body["chain"][0]["origin"].as_str().expect("origin 为字符串");
    assert!(origin.ends_with("dispatch)"), "未命中错误应记录分发函数: {origin}");
}
