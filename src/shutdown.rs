//! 协作式停止信号
//!
//! 每个 Source 在轮询和发送前检查；Router 在接收时同时等待。

use std::sync::Arc;

use tokio::sync::watch;

/// 停止信号（可克隆，任意一方触发后所有持有者可见）
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 触发停止
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待停止信号
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Sender 由自身持有，不会出现 closed
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Ctrl-C 时触发停止
    pub fn trigger_on_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("收到中断信号，准备退出...");
                shutdown.trigger();
            }
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
