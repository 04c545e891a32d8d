//! 入站 Router - 按 tag 分流到日志文件
//!
//! 收到的每条 STATUSTEXT 解码为 `(tag, payload)`，追加到 `<log_dir>/<tag>.log`。
//! 日志句柄在首次见到 tag 时打开，进程生命周期内不关闭、不轮转。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::channel::InboundChannel;
use crate::error::{Error, Result};
use crate::frame::{decode, sanitize_tag};
use crate::mavlink::{Message, MessageKind};
use crate::shutdown::Shutdown;

/// 一条已分流的行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedLine {
    pub tag: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl RoutedLine {
    /// 实时显示用：`HH:MM:SS.mmm [TAG] payload`
    pub fn timestamped(&self) -> String {
        format!("{} {}", self.received_at.format("%H:%M:%S%.3f"), self)
    }
}

impl std::fmt::Display for RoutedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.tag, self.payload)
    }
}

/// 按 tag 分流的追加日志
///
/// 不同来源若清洗后 tag 相同，会写入同一个文件。
pub struct TagLogs {
    dir: PathBuf,
    handles: HashMap<String, File>,
}

impl TagLogs {
    /// 创建（目录不存在时自动创建）
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            handles: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 追加一行 `payload\n`
    pub fn append(&mut self, tag: &str, payload: &str) -> Result<()> {
        let file = match self.handles.entry(sanitize_tag(tag)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.dir.join(format!("{}.log", entry.key()));
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                tracing::debug!("📝 New tag log: {:?}", path);
                entry.insert(file)
            }
        };
        file.write_all(format!("{}\n", payload).as_bytes())?;
        Ok(())
    }

    /// 已打开的 tag 数
    pub fn tag_count(&self) -> usize {
        self.handles.len()
    }
}

/// 把一条入站消息解码并写入日志；非 STATUSTEXT 返回 `None`
pub fn route_message(logs: &mut TagLogs, message: &Message) -> Result<Option<RoutedLine>> {
    let Some(text) = message.text() else {
        return Ok(None);
    };

    let decoded = decode(text);
    logs.append(&decoded.tag, &decoded.payload)?;

    Ok(Some(RoutedLine {
        tag: decoded.tag,
        payload: decoded.payload,
        received_at: Local::now(),
    }))
}

/// Router 运行统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// 入站 Router
pub struct InboundRouter<R> {
    channel: R,
    logs: TagLogs,
    display: Option<mpsc::Sender<RoutedLine>>,
    shutdown: Shutdown,
}

impl<R: InboundChannel> InboundRouter<R> {
    pub fn new(channel: R, logs: TagLogs) -> Self {
        Self {
            channel,
            logs,
            display: None,
            shutdown: Shutdown::new(),
        }
    }

    /// 实时显示通道（满了就丢，不阻塞分流）
    pub fn with_display(mut self, display: mpsc::Sender<RoutedLine>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// 运行直到停止信号或链路关闭
    pub async fn run(mut self) -> RouterStats {
        let mut stats = RouterStats::default();
        tracing::info!("📥 Router started, logging to {:?}", self.logs.dir());

        loop {
            let received = tokio::select! {
                r = self.channel.recv_match(MessageKind::StatusText, None) => r,
                _ = self.shutdown.wait() => break,
            };

            match received {
                Ok(Some(message)) => match route_message(&mut self.logs, &message) {
                    Ok(Some(line)) => {
                        stats.routed += 1;
                        tracing::debug!("{}", line);
                        if let Some(display) = &self.display {
                            if display.try_send(line).is_err() {
                                tracing::trace!("Display channel full or closed, dropping line");
                            }
                        }
                    }
                    Ok(None) => stats.skipped += 1,
                    Err(e) => {
                        stats.errors += 1;
                        tracing::error!("[ERROR] {}", e);
                    }
                },
                Ok(None) => {}
                Err(Error::ChannelClosed) => {
                    tracing::info!("Inbound link closed");
                    break;
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!("[ERROR] {}", e);
                }
            }
        }

        tracing::info!(
            "Router stopped ({} routed, {} tags, {} errors)",
            stats.routed,
            self.logs.tag_count(),
            stats.errors
        );
        stats
    }
}
