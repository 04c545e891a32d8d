//! 单个 Source 的 tail 任务

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use super::wakeup::Wakeup;
use super::OutboundGate;
use crate::channel::OutboundChannel;
use crate::config::TailMode;
use crate::discovery::ResolvedSource;
use crate::error::Error;
use crate::shutdown::Shutdown;

/// Source 结束时的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// 启动时文件不存在，未进入监听
    NotFound,
    /// 监听后因停止信号退出
    Stopped,
}

/// 单个 Source 的运行报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub tag: String,
    pub path: Option<PathBuf>,
    pub outcome: SourceOutcome,
    pub lines_sent: u64,
    pub send_failures: u64,
}

impl SourceReport {
    fn new(tag: &str, path: Option<PathBuf>, outcome: SourceOutcome) -> Self {
        Self {
            tag: tag.to_string(),
            path,
            outcome,
            lines_sent: 0,
            send_failures: 0,
        }
    }
}

pub(crate) struct SourceWatcher<C> {
    pub(crate) source: ResolvedSource,
    pub(crate) gate: Arc<OutboundGate<C>>,
    pub(crate) tail_mode: TailMode,
    pub(crate) poll_interval: Duration,
    pub(crate) shutdown: Shutdown,
}

impl<C: OutboundChannel> SourceWatcher<C> {
    /// 运行到停止信号触发（或文件不存在时立即返回）
    pub(crate) async fn run(self) -> SourceReport {
        let tag = self.source.config.tag.clone();

        let path = match self.source.path.clone() {
            Some(p) if p.is_file() => p,
            other => {
                let locator = other
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.source.config.locator.to_string());
                let err = Error::SourceNotFound {
                    tag: tag.clone(),
                    locator,
                };
                tracing::warn!("⚠️ {}", err);
                return SourceReport::new(&tag, self.source.path.clone(), SourceOutcome::NotFound);
            }
        };

        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("⚠️ {} ({})", Error::source_not_found(&tag, &path), e);
                return SourceReport::new(&tag, Some(path), SourceOutcome::NotFound);
            }
        };

        // 跳过已有内容，只转发之后追加的行
        if let Err(e) = file.seek(SeekFrom::End(0)).await {
            tracing::warn!("⚠️ [{}] Cannot seek {:?}: {}", tag, path, e);
            return SourceReport::new(&tag, Some(path), SourceOutcome::NotFound);
        }

        let mut wakeup = Wakeup::new(self.tail_mode, &path, self.poll_interval);
        tracing::info!(
            "👁️ [{}] Watching {:?} ({})",
            tag,
            path,
            if wakeup.is_notify() { "notify" } else { "poll" }
        );

        let mut report = SourceReport::new(&tag, Some(path.clone()), SourceOutcome::Stopped);
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let at_end = match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => true,
                Ok(_) if buf.last() == Some(&b'\n') => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    self.relay_line(&line, &mut report).await;
                    false
                }
                // 半行：等写入方补齐换行
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("⚠️ [{}] Read error on {:?}: {}", tag, path, e);
                    true
                }
            };

            if at_end {
                tokio::select! {
                    _ = wakeup.wait() => {}
                    _ = self.shutdown.wait() => break,
                }
            }
        }

        tracing::info!(
            "[{}] Stopped watching ({} sent, {} failed)",
            tag,
            report.lines_sent,
            report.send_failures
        );
        report
    }

    async fn relay_line(&self, raw: &str, report: &mut SourceReport) {
        let tag = &self.source.config.tag;
        let clean = raw.trim();
        if clean.is_empty() {
            return;
        }

        let message = match self.source.config.window {
            Some(window) => window.apply(clean),
            None => clean,
        };

        if self.shutdown.is_triggered() {
            return;
        }

        match self.gate.send_line(tag, message).await {
            Ok(()) => {
                report.lines_sent += 1;
                tracing::debug!("[{}] {}", tag, clean);
            }
            Err(e) => {
                report.send_failures += 1;
                tracing::warn!("⚠️ {} (line: {})", e, clean);
            }
        }
    }
}
