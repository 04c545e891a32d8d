//! 链路抽象
//!
//! Relay 只依赖 [`OutboundChannel`]，Router / Shell 只依赖 [`InboundChannel`]。
//! 生产环境使用 MAVLink UDP 链路，测试和演练使用内存回环。

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::mavlink::{MavReceiver, MavSender, Message, MessageKind, SerialControl, Severity};

/// 出站链路
///
/// 不要求线程安全：同一时刻最多只有一个发送在进行，由持有者负责串行化。
pub trait OutboundChannel: Send + 'static {
    /// 链路是否已完成初始化
    fn is_ready(&self) -> bool;

    /// 发送一条定长状态文本
    fn send_statustext(&mut self, severity: Severity, frame: &Frame) -> impl Future<Output = Result<()>> + Send;

    /// 发送一个串口透传分片
    fn send_serial_control(&mut self, control: &SerialControl) -> impl Future<Output = Result<()>> + Send;
}

/// 入站链路
pub trait InboundChannel: Send + 'static {
    /// 阻塞接收下一条指定类型的消息
    ///
    /// `timeout` 到期返回 `Ok(None)`；链路关闭返回 [`Error::ChannelClosed`]。
    fn recv_match(
        &mut self,
        kind: MessageKind,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Option<Message>>> + Send;
}

impl OutboundChannel for MavSender {
    fn is_ready(&self) -> bool {
        MavSender::is_ready(self)
    }

    async fn send_statustext(&mut self, severity: Severity, frame: &Frame) -> Result<()> {
        self.send(&Message::status_text(severity, *frame)).await
    }

    async fn send_serial_control(&mut self, control: &SerialControl) -> Result<()> {
        self.send(&Message::SerialControl(*control)).await
    }
}

impl InboundChannel for MavReceiver {
    async fn recv_match(&mut self, kind: MessageKind, timeout: Option<Duration>) -> Result<Option<Message>> {
        MavReceiver::recv_match(self, kind, timeout).await
    }
}

/// 创建一对内存回环链路
pub fn loopback() -> (LoopbackSender, LoopbackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LoopbackSender { tx }, LoopbackReceiver { rx })
}

/// 回环发送端
#[derive(Clone)]
pub struct LoopbackSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl LoopbackSender {
    /// 直接注入任意消息
    pub fn inject(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelClosed)
    }
}

impl OutboundChannel for LoopbackSender {
    fn is_ready(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send_statustext(&mut self, severity: Severity, frame: &Frame) -> Result<()> {
        self.inject(Message::status_text(severity, *frame))
    }

    async fn send_serial_control(&mut self, control: &SerialControl) -> Result<()> {
        self.inject(Message::SerialControl(*control))
    }
}

/// 回环接收端
pub struct LoopbackReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl InboundChannel for LoopbackReceiver {
    async fn recv_match(&mut self, kind: MessageKind, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let next = match deadline {
                Some(d) => match tokio::time::timeout_at(d, self.rx.recv()).await {
                    Ok(m) => m,
                    Err(_) => return Ok(None),
                },
                None => self.rx.recv().await,
            };

            match next {
                Some(message) if message.is(kind) => return Ok(Some(message)),
                Some(_) => continue,
                None => return Err(Error::ChannelClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    #[tokio::test]
    async fn test_loopback_filters_by_kind() {
        let (mut tx, mut rx) = loopback();
        tx.inject(Message::Other { msg_id: 30 }).unwrap();
        tx.send_serial_control(&SerialControl::chunk(10, 0, b"x")).await.unwrap();
        tx.send_statustext(Severity::Info, &encode("A", "one")).await.unwrap();

        let msg = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.text(), Some(encode("A", "one").as_bytes()));
    }

    #[tokio::test]
    async fn test_loopback_timeout_and_close() {
        let (tx, mut rx) = loopback();
        let got = rx
            .recv_match(MessageKind::StatusText, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(got.is_none());

        drop(tx);
        let closed = rx.recv_match(MessageKind::StatusText, None).await;
        assert!(matches!(closed, Err(Error::ChannelClosed)));
    }
}
