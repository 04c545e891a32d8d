//! 命令 Shell
//!
//! 把一行命令拆成 70 字节的 SERIAL_CONTROL 分片发送，
//! 然后在固定窗口内收集带 tag 的 STATUSTEXT 回复，并写入按 tag 分流的日志。

use std::time::Duration;

use tokio::time::Instant;

use crate::channel::{InboundChannel, OutboundChannel};
use crate::error::Result;
use crate::mavlink::{serial_flags, MessageKind, SerialControl, SERIAL_CHUNK_LEN};
use crate::router::{route_message, RoutedLine, TagLogs};
use crate::shutdown::Shutdown;

/// 单次接收的时间片
const RECV_SLICE: Duration = Duration::from_millis(100);

/// 发送后、开始收集回复前的等待
const SETTLE_AFTER_SEND: Duration = Duration::from_millis(50);

/// 把命令拆成 SERIAL_CONTROL 分片（补齐换行）
pub fn command_chunks(device: u8, command: &str) -> Vec<SerialControl> {
    let mut payload = command.as_bytes().to_vec();
    if !command.ends_with('\n') {
        payload.push(b'\n');
    }

    payload
        .chunks(SERIAL_CHUNK_LEN)
        .map(|chunk| SerialControl::chunk(device, serial_flags::EXCLUSIVE | serial_flags::RESPOND, chunk))
        .collect()
}

/// Shell 会话
pub struct CommandShell<S, R> {
    sender: S,
    receiver: R,
    logs: TagLogs,
    device: u8,
    reply_window: Duration,
    shutdown: Shutdown,
}

impl<S: OutboundChannel, R: InboundChannel> CommandShell<S, R> {
    pub fn new(sender: S, receiver: R, logs: TagLogs, device: u8) -> Self {
        Self {
            sender,
            receiver,
            logs,
            device,
            reply_window: Duration::from_secs(1),
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_reply_window(mut self, window: Duration) -> Self {
        self.reply_window = window;
        self
    }

    /// 停止信号触发时提前结束回复收集
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 依次发送命令的全部分片，返回分片数
    pub async fn send_command(&mut self, command: &str) -> Result<usize> {
        let chunks = command_chunks(self.device, command);
        for chunk in &chunks {
            self.sender.send_serial_control(chunk).await?;
            tracing::debug!("[MAVShell] Sent {:?}", String::from_utf8_lossy(chunk.payload()));
        }
        Ok(chunks.len())
    }

    /// 在 `window` 内收集全部回复（不是只取第一条），停止信号触发时返回已收到的部分
    pub async fn collect_replies(&mut self, window: Duration) -> Result<Vec<RoutedLine>> {
        let deadline = Instant::now() + window;
        let mut replies = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = RECV_SLICE.min(deadline - now);

            let received = tokio::select! {
                r = self.receiver.recv_match(MessageKind::StatusText, Some(slice)) => r?,
                _ = self.shutdown.wait() => break,
            };
            let Some(message) = received else {
                continue;
            };

            match route_message(&mut self.logs, &message) {
                Ok(Some(line)) => replies.push(line),
                Ok(None) => {}
                Err(e) => tracing::error!("[MAVShell] Failed to log reply: {}", e),
            }
        }

        Ok(replies)
    }

    /// 发送命令并收集回复
    pub async fn execute(&mut self, command: &str) -> Result<Vec<RoutedLine>> {
        self.send_command(command).await?;
        tokio::time::sleep(SETTLE_AFTER_SEND).await;
        self.collect_replies(self.reply_window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{loopback, LoopbackReceiver, LoopbackSender};
    use crate::frame::encode;
    use crate::mavlink::{Message, Severity};
    use tempfile::TempDir;

    #[test]
    fn test_command_chunks_appends_newline() {
        let chunks = command_chunks(10, "ver all");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].payload(), b"ver all\n");
        assert_eq!(chunks[0].device, 10);
        assert_eq!(chunks[0].flags, serial_flags::EXCLUSIVE | serial_flags::RESPOND);

        let chunks = command_chunks(10, "reboot\n");
        assert_eq!(chunks[0].payload(), b"reboot\n");
    }

    #[test]
    fn test_command_chunks_split_at_70_bytes() {
        let command = "a".repeat(150);
        let chunks = command_chunks(10, &command);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].count, 70);
        assert_eq!(chunks[1].count, 70);
        // 150 + '\n' = 151
        assert_eq!(chunks[2].count, 11);
        assert_eq!(chunks[2].payload().last(), Some(&b'\n'));
    }

    fn shell_pair(tmp: &TempDir) -> (CommandShell<LoopbackSender, LoopbackReceiver>, LoopbackReceiver, LoopbackSender) {
        let (cmd_tx, cmd_rx) = loopback();
        let (reply_tx, reply_rx) = loopback();
        let logs = TagLogs::open(tmp.path()).unwrap();
        let shell = CommandShell::new(cmd_tx, reply_rx, logs, 10).with_reply_window(Duration::from_millis(200));
        (shell, cmd_rx, reply_tx)
    }

    #[tokio::test]
    async fn test_send_command() {
        let tmp = TempDir::new().unwrap();
        let (mut shell, mut cmd_rx, _reply_tx) = shell_pair(&tmp);

        assert_eq!(shell.send_command("param show SYS_*").await.unwrap(), 1);
        let msg = cmd_rx
            .recv_match(MessageKind::SerialControl, Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        match msg {
            Message::SerialControl(sc) => assert_eq!(sc.payload(), b"param show SYS_*\n"),
            other => panic!("Expected SerialControl, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_collects_all_replies_and_logs_them() {
        let tmp = TempDir::new().unwrap();
        let (mut shell, _cmd_rx, reply_tx) = shell_pair(&tmp);

        reply_tx
            .inject(Message::status_text(Severity::Info, encode("NSH", "line one")))
            .unwrap();
        reply_tx.inject(Message::Other { msg_id: 1 }).unwrap();
        reply_tx
            .inject(Message::status_text(Severity::Info, encode("NSH", "line two")))
            .unwrap();

        let replies = shell.execute("ls").await.unwrap();
        let payloads: Vec<_> = replies.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec!["line one", "line two"]);

        let log = std::fs::read_to_string(tmp.path().join("NSH.log")).unwrap();
        assert_eq!(log, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_collect_replies_empty_window() {
        let tmp = TempDir::new().unwrap();
        let (mut shell, _cmd_rx, _reply_tx) = shell_pair(&tmp);
        let replies = shell.collect_replies(Duration::from_millis(50)).await.unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_collect_replies_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let (shell, _cmd_rx, reply_tx) = shell_pair(&tmp);
        let shutdown = Shutdown::new();
        let mut shell = shell.with_shutdown(shutdown.clone());

        reply_tx
            .inject(Message::status_text(Severity::Info, encode("NSH", "partial")))
            .unwrap();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.trigger();
        });

        let start = Instant::now();
        let replies = shell.collect_replies(Duration::from_secs(30)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload, "partial");
    }
}
