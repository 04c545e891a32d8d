//! 错误类型定义

use std::path::Path;

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// Source 在启动时无法解析到文件
    #[error("[{tag}] 文件不存在: {locator}")]
    SourceNotFound { tag: String, locator: String },

    /// 发送失败（消息被丢弃，不重试）
    #[error("[{tag}] 发送失败: {reason}")]
    Send { tag: String, reason: String },

    /// 链路未初始化或已断开
    #[error("链路不可用: {0}")]
    ChannelUnavailable(String),

    /// 链路已关闭，接收端不会再有消息
    #[error("链路已关闭")]
    ChannelClosed,

    /// MAVLink 报文错误
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 构造 SourceNotFound
    pub fn source_not_found(tag: &str, path: &Path) -> Self {
        Error::SourceNotFound {
            tag: tag.to_string(),
            locator: path.display().to_string(),
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
