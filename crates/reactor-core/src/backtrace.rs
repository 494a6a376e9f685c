//! # backtrace 模块说明
//!
//! ## 角色定位（Why）
//! - 长驻服务的故障大多只能事后复盘，错误链的每个节点都需要附带一次调用栈快照；
//! - 插件在启动期陆续装载，符号表随之变化，因此符号解析必须在“渲染时”惰性完成，而不是预先缓存。
//!
//! ## 行为契约（What）
//! - [`Backtracer::global`] 提供进程级唯一实例，[`Backtracer::capture`] 只记录指令地址，开销可控；
//! - [`BacktraceSnapshot::render`] 首次调用时解析符号并缓存文本，后续调用直接复用；
//! - 渲染缓冲区由调用栈上的局部 `String` 承担，不存在共享可变状态，多线程并发捕获互不交错。
//!
//! ## 风险提示（Trade-offs）
//! - 符号名反修饰是尽力而为：失败时回退到原始名称，二者皆无时省略符号行；
//! - 解析依赖调试信息，发布构建若剥离符号，只能得到地址。

use core::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// 默认最多渲染的栈帧数量。
pub const DEFAULT_MAX_FRAMES: usize = 96;

static GLOBAL: OnceLock<Backtracer> = OnceLock::new();

/// 进程级调用栈捕获器。
///
/// # 教案式说明
/// - **意图 (Why)**：集中维护捕获参数与统计，避免各调用点各自拼装格式；
/// - **契约 (What)**：实例本身不可变，除计数器外无内部状态，可被任意线程共享；
/// - **执行 (How)**：捕获阶段调用 `backtrace::Backtrace::new_unresolved`，仅遍历栈帧，不触碰符号表。
#[derive(Debug)]
pub struct Backtracer {
    max_frames: usize,
    captures: AtomicU64,
}

impl Backtracer {
    /// 构造独立实例，主要供测试或嵌入方定制帧数上限。
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames: max_frames.max(1),
            captures: AtomicU64::new(0),
        }
    }

    /// 获取进程级唯一实例。
    pub fn global() -> &'static Backtracer {
        GLOBAL.get_or_init(|| Backtracer::new(DEFAULT_MAX_FRAMES))
    }

    /// 捕获当前线程的调用栈快照。
    ///
    /// - **前置条件**：无；任何线程、任何时刻均可调用；
    /// - **后置条件**：返回的快照尚未解析符号，首次渲染时才会解析。
    pub fn capture(&self) -> BacktraceSnapshot {
        self.captures.fetch_add(1, Ordering::Relaxed);
        BacktraceSnapshot {
            raw: backtrace::Backtrace::new_unresolved(),
            thread: thread::current().name().map(str::to_owned),
            max_frames: self.max_frames,
            rendered: OnceLock::new(),
        }
    }

    /// 自进程启动以来完成的捕获次数。
    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }
}

/// 一次调用栈捕获的结果。
///
/// # 契约说明（What）
/// - 快照由错误链节点独占持有，`Clone` 仅复制未解析的地址列表；
/// - [`render`](Self::render) 的结果缓存于快照内部，同一快照只解析一次符号。
#[derive(Clone)]
pub struct BacktraceSnapshot {
    raw: backtrace::Backtrace,
    thread: Option<String>,
    max_frames: usize,
    rendered: OnceLock<String>,
}

impl BacktraceSnapshot {
    /// 捕获时所在线程的名称（匿名线程返回 `None`）。
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    /// 以纯文本渲染调用栈，每一层一个带编号的帧块。
    pub fn render(&self) -> &str {
        self.rendered.get_or_init(|| {
            let mut resolved = self.raw.clone();
            resolved.resolve();
            render_frames(&resolved, self.thread.as_deref(), self.max_frames)
        })
    }

    /// 以标记语言转义后的形式渲染，适合嵌入 HTML 诊断页面。
    pub fn render_markup(&self) -> String {
        escape_markup(self.render())
    }
}

impl fmt::Debug for BacktraceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacktraceSnapshot")
            .field("thread", &self.thread)
            .field("frames", &self.raw.frames().len())
            .field("resolved", &self.rendered.get().is_some())
            .finish()
    }
}

impl fmt::Display for BacktraceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.render())
    }
}

fn render_frames(resolved: &backtrace::Backtrace, thread: Option<&str>, max_frames: usize) -> String {
    let mut out = String::new();
    out.push_str("Backtrace");
    if let Some(name) = thread {
        out.push_str(" (thread `");
        out.push_str(name);
        out.push_str("`)");
    }
    out.push_str(":\n");

    let frames = resolved
        .frames()
        .iter()
        .skip_while(|frame| frame.symbols().iter().any(is_capture_machinery));

    for (index, frame) in frames.take(max_frames).enumerate() {
        out.push_str(&format!("#{index:<3} {:#018x}\n", frame.ip() as usize));
        for symbol in frame.symbols() {
            if let Some(name) = symbol_name(symbol) {
                out.push_str("      ");
                out.push_str(&name);
                out.push('\n');
            }
            if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                out.push_str(&format!("      at {}:{line}\n", file.display()));
            }
        }
    }
    out
}

/// 反修饰失败时回退到原始字节，二者皆空时返回 `None`。
fn symbol_name(symbol: &backtrace::BacktraceSymbol) -> Option<String> {
    let name = symbol.name()?;
    let demangled = format!("{name:#}");
    if !demangled.is_empty() {
        return Some(demangled);
    }
    let raw = String::from_utf8_lossy(name.as_bytes());
    (!raw.is_empty()).then(|| raw.into_owned())
}

fn is_capture_machinery(symbol: &backtrace::BacktraceSymbol) -> bool {
    symbol
        .name()
        .map(|name| {
            let text = format!("{name:#}");
            text.starts_with("backtrace::") || text.starts_with("reactor_core::backtrace::")
        })
        .unwrap_or(false)
}

/// 转义 `& < > " '` 五个标记语言保留字符。
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
