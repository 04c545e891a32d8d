//! telemetry-relay - 地面站日志中继
//!
//! 把机载端多个日志文件的新增行加上 tag，通过 MAVLink STATUSTEXT 发回地面站；
//! 地面站按 tag 拆回到各自的日志文件，供 tmux 面板实时查看。
//!
//! # 核心功能
//!
//! - **帧编解码**: `[TAG] message` → 50 字节定长帧，入站按 tag 分流
//! - **出站 Relay**: 每个文件一个 tail 任务，共享一把出站锁串行发送
//! - **入站 Router**: 按 tag 追加到 `<log_dir>/<tag>.log`
//! - **Source 解析**: 目录型 Source 启动时选取最新文件
//! - **Shell**: SERIAL_CONTROL 发命令，收集 STATUSTEXT 回复
//!
//! # Feature Flags
//!
//! - `notify-tail`: 文件变化通知唤醒 tail（默认开启，否则只轮询）
//! - `cli`: `telemetry-relay` 命令行
//!
//! # 架构
//!
//! 链路对象由进程显式 `connect()` 一次，再把发送端 / 接收端交给 Relay、Router 或 Shell。
//! 核心逻辑只依赖 [`OutboundChannel`] / [`InboundChannel`]，测试使用内存回环。

pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod mavlink;
pub mod relay;
pub mod router;
pub mod shell;
pub mod shutdown;
pub mod viewer;

// Re-exports
pub use channel::{loopback, InboundChannel, LoopbackReceiver, LoopbackSender, OutboundChannel};
pub use config::{
    ListenerConfig, LineWindow, Locator, RelayConfig, ShellConfig, SourceConfig, TailMode, ViewerConfig,
};
pub use discovery::{resolve_newest, ResolvedSource};
pub use error::{Error, Result};
pub use frame::{decode, encode, Decoded, Frame, FRAME_LEN, UNKNOWN_TAG};
pub use mavlink::{LinkConfig, MavLink, Severity};
pub use relay::{OutboundGate, OutboundRelay, SourceOutcome, SourceReport};
pub use router::{InboundRouter, RoutedLine, RouterStats, TagLogs};
pub use shell::CommandShell;
pub use shutdown::Shutdown;
pub use viewer::LogViewer;
