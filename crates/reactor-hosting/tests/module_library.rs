//! 从磁盘加载真实动态库
//!
//! 夹具模块 `reactor-test-module` 在首次使用时以独立的目标目录构建两次：
//! 默认构建导出一个引擎，`stale-api` 构建声明不一致的 API 版本。
//! 引擎实例被最终释放时写出 `<配置路径>.dropped`，据此观察销毁函数与库释放的先后。

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use reactor_core::{ModuleInstance, ModuleKind, REACTOR_API_VERSION};
use reactor_hosting::{
    LoadError, ModuleConfig, ModuleHandle, ModuleSource, Reactor, ReactorConfig, UnloadOutcome,
};

struct Fixtures {
    current: PathBuf,
    stale: PathBuf,
}

fn fixtures() -> &'static Fixtures {
    static FIXTURES: OnceLock<Fixtures> = OnceLock::new();
    FIXTURES.get_or_init(|| {
        let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("reactor-test-module");
        Fixtures {
            current: build_fixture(&target_dir, None, "current"),
            stale: build_fixture(&target_dir, Some("stale-api"), "stale"),
        }
    })
}

/// 构建夹具并复制到带标签的文件名，避免第二次构建覆盖第一次的产物。
fn build_fixture(target_dir: &Path, feature: Option<&str>, label: &str) -> PathBuf {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| OsString::from("cargo"));

    let mut command = Command::new(cargo);
    command
        .current_dir(&workspace)
        .args(["build", "--quiet", "-p", "reactor-test-module", "--target-dir"])
        .arg(target_dir);
    if let Some(feature) = feature {
        command.args(["--features", feature]);
    }
    let output = command.output().expect("启动 cargo 构建夹具模块");
    assert!(
        output.status.success(),
        "夹具模块构建失败:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let built = target_dir
        .join("debug")
        .join(format!("{DLL_PREFIX}reactor_test_module{DLL_SUFFIX}"));
    let labelled = target_dir.join(format!("{DLL_PREFIX}reactor_test_module_{label}{DLL_SUFFIX}"));
    fs::copy(&built, &labelled).expect("复制夹具模块");
    labelled
}

fn dropped_marker(config: &Path) -> PathBuf {
    let mut marker = config.as_os_str().to_owned();
    marker.push(".dropped");
    PathBuf::from(marker)
}

#[test]
fn library_engine_loads_and_is_destroyed_before_release() {
    let dir = tempfile::tempdir().expect("临时目录");
    let config = dir.path().join("marker.toml");
    let library = &fixtures().current;

    let handle = ModuleHandle::load("marker", library, Some(&config), ModuleKind::Engine)
        .expect("同版本模块应加载成功");
    assert_eq!(handle.kind(), Some(ModuleKind::Engine));
    assert_eq!(handle.source(), &ModuleSource::Library(library.clone()));
    assert!(!dropped_marker(&config).exists(), "加载期间实例不应被释放");

    assert_eq!(handle.unload(), UnloadOutcome::Released);
    assert!(
        dropped_marker(&config).exists(),
        "卸载应经由模块销毁函数释放实例"
    );
}

#[test]
fn mismatched_exported_version_is_rejected_before_create() {
    let error = ModuleHandle::load("stale", &fixtures().stale, None, ModuleKind::Engine)
        .expect_err("版本不符应拒绝");
    match error {
        LoadError::VersionMismatch {
            module,
            found,
            expected,
        } => {
            assert_eq!(module, "stale");
            assert_eq!(found, REACTOR_API_VERSION + 1);
            assert_eq!(expected, REACTOR_API_VERSION);
        }
        other => panic!("应在调用创建函数之前按版本拒绝: {other}"),
    }
}

#[test]
fn engine_library_configured_as_plugin_is_rejected_and_destroyed() {
    let dir = tempfile::tempdir().expect("临时目录");
    let config = dir.path().join("misfiled.toml");

    let error = ModuleHandle::load("misfiled", &fixtures().current, Some(&config), ModuleKind::Plugin)
        .expect_err("种类不符应拒绝");
    assert!(
        matches!(
            error,
            LoadError::KindMismatch {
                found: ModuleKind::Engine,
                expected: ModuleKind::Plugin,
                ..
            }
        ),
        "{error}"
    );
    assert!(dropped_marker(&config).exists(), "被拒绝的实例也应交还销毁函数");
}

#[test]
fn referenced_instance_keeps_library_mapped() {
    let dir = tempfile::tempdir().expect("临时目录");
    let config = dir.path().join("held.toml");

    let handle = ModuleHandle::load("held", &fixtures().current, Some(&config), ModuleKind::Engine)
        .expect("加载");
    let held = handle
        .instance()
        .and_then(ModuleInstance::as_engine)
        .map(Arc::clone)
        .expect("引擎实例");

    assert_eq!(handle.unload(), UnloadOutcome::Leaked);
    assert!(!dropped_marker(&config).exists(), "仍被引用的实例不应被释放");

    // 库未被卸载，实例代码仍可执行。
    drop(held);
    assert!(dropped_marker(&config).exists());
}

#[test]
fn configured_library_engine_boots_and_unloads_with_reactor() {
    let dir = tempfile::tempdir().expect("临时目录");
    let module_config = dir.path().join("geo.toml");

    let mut config = ReactorConfig::default();
    config
        .engines
        .push(ModuleConfig::new("geo", fixtures().current.clone()).with_config(&module_config));

    let reactor = Reactor::boot(config).expect("启动应成功");
    reactor.registry().get_dyn("geo").expect("引擎应就绪");
    assert!(reactor.status().is_ready());

    let report = reactor.shutdown();
    assert_eq!(report.unload_order(), vec!["geo"]);
    assert_eq!(report.modules[0].outcome, UnloadOutcome::Released);
    assert_eq!(report.modules[0].source, fixtures().current.display().to_string());
    assert!(dropped_marker(&module_config).exists());
}
