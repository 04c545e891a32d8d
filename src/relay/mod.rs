//! 出站 Relay - 多文件 tail + 串行发送
//!
//! 每个 Source 一个独立任务：
//! - 启动时文件不存在 → `NOT_FOUND`，该任务结束，不影响其他 Source
//! - 文件存在 → seek 到末尾，之后追加的每一行加 tag 后发送
//!
//! 所有 Source 共享一个 [`OutboundGate`]，保证链路上同一时刻只有一个发送。

mod source;
mod wakeup;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::channel::OutboundChannel;
use crate::config::{RelayConfig, TailMode};
use crate::discovery::{resolve_all, ResolvedSource};
use crate::error::{Error, Result};
use crate::frame::encode;
use crate::mavlink::Severity;
use crate::shutdown::Shutdown;

pub use source::{SourceOutcome, SourceReport};
use source::SourceWatcher;

/// 出站锁：独占持有链路，临界区只包含一次 encode + send
pub struct OutboundGate<C> {
    channel: Mutex<C>,
    severity: Severity,
}

impl<C: OutboundChannel> OutboundGate<C> {
    pub fn new(channel: C, severity: Severity) -> Self {
        Self {
            channel: Mutex::new(channel),
            severity,
        }
    }

    /// 编码并发送一行；锁在所有返回路径上释放
    pub async fn send_line(&self, tag: &str, message: &str) -> Result<()> {
        let mut channel = self.channel.lock().await;

        if !channel.is_ready() {
            return Err(Error::Send {
                tag: tag.to_string(),
                reason: Error::ChannelUnavailable("outbound link not initialized".to_string()).to_string(),
            });
        }

        let frame = encode(tag, message);
        channel
            .send_statustext(self.severity, &frame)
            .await
            .map_err(|e| Error::Send {
                tag: tag.to_string(),
                reason: e.to_string(),
            })
    }
}

/// 出站 Relay
pub struct OutboundRelay<C> {
    gate: Arc<OutboundGate<C>>,
    tail_mode: TailMode,
    poll_interval: Duration,
    shutdown: Shutdown,
}

impl<C: OutboundChannel> OutboundRelay<C> {
    pub fn new(channel: C, severity: Severity) -> Self {
        Self {
            gate: Arc::new(OutboundGate::new(channel, severity)),
            tail_mode: TailMode::Poll,
            poll_interval: Duration::from_millis(500),
            shutdown: Shutdown::new(),
        }
    }

    /// 按配置创建（链路由调用方先行 connect）
    pub fn from_config(channel: C, config: &RelayConfig) -> Self {
        Self::new(channel, config.severity)
            .with_tail_mode(config.tail_mode)
            .with_poll_interval(config.poll_interval())
    }

    pub fn with_tail_mode(mut self, mode: TailMode) -> Self {
        self.tail_mode = mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 停止信号（触发后所有 Source 任务在下一次轮询时退出）
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// 直接发送一行（不经过文件）
    pub async fn send_line(&self, tag: &str, line: &str) -> Result<()> {
        self.gate.send_line(tag, line).await
    }

    /// 启动全部 Source 并等待它们结束
    ///
    /// 正常运行时只有停止信号会让已进入监听的 Source 结束。
    pub async fn run(&self, sources: Vec<ResolvedSource>) -> Vec<SourceReport> {
        let mut tasks = JoinSet::new();

        for (index, source) in sources.into_iter().enumerate() {
            let watcher = SourceWatcher {
                source,
                gate: self.gate.clone(),
                tail_mode: self.tail_mode,
                poll_interval: self.poll_interval,
                shutdown: self.shutdown.clone(),
            };
            tasks.spawn(async move { (index, watcher.run().await) });
        }

        tracing::info!("🔄 Relay started ({} sources)", tasks.len());

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => reports.push(done),
                Err(e) => tracing::error!("Source task failed: {}", e),
            }
        }

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// 等待 settle 时间（仅当存在目录型 Source）、解析、运行
    pub async fn run_config(&self, config: &RelayConfig) -> Vec<SourceReport> {
        if config.has_dynamic_sources() && !config.settle_delay().is_zero() {
            tracing::info!("⏳ Waiting {:?} for capture files to appear...", config.settle_delay());
            tokio::select! {
                _ = tokio::time::sleep(config.settle_delay()) => {}
                _ = self.shutdown.wait() => return Vec::new(),
            }
        }

        self.run(resolve_all(&config.sources)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{loopback, InboundChannel};
    use crate::config::SourceConfig;
    use crate::frame::decode;
    use crate::mavlink::{Message, MessageKind};
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn append(path: &Path, lines: &[&str]) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    fn resolved(config: SourceConfig) -> ResolvedSource {
        let path = crate::discovery::resolve(&config.locator);
        ResolvedSource { config, path }
    }

    #[tokio::test]
    async fn test_send_line_frames_with_tag() {
        let (tx, mut rx) = loopback();
        let relay = OutboundRelay::new(tx, Severity::Notice);
        relay.send_line("BAT", "12.4V").await.unwrap();

        let msg = rx.recv_match(MessageKind::StatusText, None).await.unwrap().unwrap();
        match msg {
            Message::StatusText(st) => {
                assert_eq!(st.severity, Severity::Notice);
                let decoded = decode(st.text.as_bytes());
                assert_eq!(decoded.tag, "BAT");
                assert_eq!(decoded.payload, "12.4V");
            }
            other => panic!("Expected StatusText, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_line_fails_fast_when_channel_down() {
        let (tx, rx) = loopback();
        drop(rx);
        let relay = OutboundRelay::new(tx, Severity::Info);
        let result = relay.send_line("IR", "x").await;
        assert!(matches!(result, Err(Error::Send { .. })));
    }

    #[tokio::test]
    async fn test_window_and_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rgb.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = loopback();
        let relay = OutboundRelay::new(tx, Severity::Info).with_poll_interval(Duration::from_millis(10));
        let shutdown = relay.shutdown();
        let source = resolved(SourceConfig::file("RGB", &path).with_window(5, 10));

        let handle = tokio::spawn(async move { relay.run(vec![source]).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        append(&path, &["   ", "", "2024 frame 17 saved"]);

        let msg = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        let decoded = decode(msg.text().unwrap());
        assert_eq!(decoded.tag, "RGB");
        assert_eq!(decoded.payload, "frame");

        // 空行不发送
        let extra = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(extra.is_none());

        shutdown.trigger();
        let reports = handle.await.unwrap();
        assert_eq!(reports[0].lines_sent, 1);
        assert_eq!(reports[0].outcome, SourceOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gps.txt");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = loopback();
        let relay = OutboundRelay::new(tx, Severity::Info).with_poll_interval(Duration::from_millis(10));
        let shutdown = relay.shutdown();
        let source = resolved(SourceConfig::file("IR", &path));
        let handle = tokio::spawn(async move { relay.run(vec![source]).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            write!(f, "trigger ").unwrap();
        }
        let early = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(early.is_none());

        append(&path, &["42"]);
        let msg = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode(msg.text().unwrap()).payload, "trigger 42");

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_config_skips_settle_without_dynamic_sources() {
        let (tx, _rx) = loopback();
        let relay = OutboundRelay::new(tx, Severity::Info);
        let config = RelayConfig {
            settle_delay_secs: 3600,
            sources: vec![SourceConfig::file("XRCE", "/nonexistent/xrce.log")],
            ..Default::default()
        };

        let reports = tokio::time::timeout(Duration::from_secs(2), relay.run_config(&config))
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, SourceOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_run_config_settle_interrupted_by_shutdown() {
        let (tx, _rx) = loopback();
        let relay = OutboundRelay::new(tx, Severity::Info);
        let config = RelayConfig {
            settle_delay_secs: 3600,
            sources: vec![SourceConfig::newest("IR", "/nonexistent", None)],
            ..Default::default()
        };

        relay.shutdown().trigger();
        let reports = tokio::time::timeout(Duration::from_secs(2), relay.run_config(&config))
            .await
            .unwrap();
        assert!(reports.is_empty());
    }
}
