//! 配置
//!
//! Relay 使用 JSON 配置文件描述要监听的 Source；
//! Listener / Shell / Viewer 只需要少量参数，直接用默认值 + 命令行覆盖。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{is_routable_tag, MAX_TAG_LEN, UNKNOWN_TAG};
use crate::mavlink::Severity;

/// 日志目录环境变量
pub const LOG_DIR_ENV: &str = "MAVLINK_LOG_DIR";

/// Relay 配置文件环境变量
pub const CONFIG_ENV: &str = "TELEMETRY_RELAY_CONFIG";

/// 默认日志目录
pub const DEFAULT_LOG_DIR: &str = "/tmp/mavlink_logs";

/// 按 `MAVLINK_LOG_DIR` → 默认值 的顺序确定日志目录
pub fn log_dir_from_env() -> PathBuf {
    std::env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Source 定位方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// 固定文件路径
    File { path: PathBuf },
    /// 目录中最新的文件（可选扩展名过滤）
    Newest {
        dir: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension: Option<String>,
    },
}

impl Locator {
    /// 是否需要启动时动态解析
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Locator::Newest { .. })
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::File { path } => write!(f, "{}", path.display()),
            Locator::Newest { dir, extension: Some(ext) } => {
                write!(f, "{}/*.{}", dir.display(), ext.trim_start_matches('.'))
            }
            Locator::Newest { dir, extension: None } => write!(f, "{}/*", dir.display()),
        }
    }
}

/// 行窗口：发送前按字符位置截取 `[start, end)`
///
/// 用于输出带固定宽度前缀（时间戳、级别等）的上游日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineWindow {
    pub start: usize,
    pub end: usize,
}

impl LineWindow {
    pub fn apply<'a>(&self, line: &'a str) -> &'a str {
        let mut indices = line.char_indices().map(|(i, _)| i).chain(std::iter::once(line.len()));
        let start = indices.clone().nth(self.start).unwrap_or(line.len());
        let end = indices.nth(self.end).unwrap_or(line.len());
        if start >= end {
            return "";
        }
        &line[start..end]
    }
}

/// 单个 Source 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 消息前缀 tag，例如 `XRCE`、`IR`
    pub tag: String,
    /// 文件定位
    pub locator: Locator,
    /// 可选行窗口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<LineWindow>,
}

impl SourceConfig {
    pub fn file(tag: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.to_string(),
            locator: Locator::File { path: path.into() },
            window: None,
        }
    }

    pub fn newest(tag: &str, dir: impl Into<PathBuf>, extension: Option<&str>) -> Self {
        Self {
            tag: tag.to_string(),
            locator: Locator::Newest {
                dir: dir.into(),
                extension: extension.map(str::to_string),
            },
            window: None,
        }
    }

    pub fn with_window(mut self, start: usize, end: usize) -> Self {
        self.window = Some(LineWindow { start, end });
        self
    }
}

/// tail 唤醒方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailMode {
    /// 固定间隔轮询
    #[default]
    Poll,
    /// 文件变化通知 + 轮询兜底
    Notify,
}

/// Relay 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 出站连接串，例如 `udpout:172.31.100.102:14541`
    pub target: String,
    /// 本端 system id
    pub system_id: u8,
    /// 本端 component id
    pub component_id: u8,
    /// STATUSTEXT 严重级别
    pub severity: Severity,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 动态 Source 解析前的等待时间（秒）
    pub settle_delay_secs: u64,
    /// tail 唤醒方式
    pub tail_mode: TailMode,
    /// 监听的 Source 列表
    pub sources: Vec<SourceConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target: "udpout:172.31.100.102:14541".to_string(),
            system_id: 2,
            component_id: 200,
            severity: Severity::Info,
            poll_interval_ms: 500,
            settle_delay_secs: 10,
            tail_mode: TailMode::Poll,
            sources: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// 从 JSON 文件加载
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 查找配置文件
    ///
    /// 查找顺序：
    /// 1. 显式传入的路径
    /// 2. `TELEMETRY_RELAY_CONFIG` 环境变量
    /// 3. `<config_dir>/telemetry-relay/relay.json`
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let default_path = Self::default_path()?;
        default_path.exists().then_some(default_path)
    }

    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("telemetry-relay").join("relay.json"))
    }

    /// 加载配置（找不到配置文件视为错误，因为没有 Source 可监听）
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::locate(explicit) {
            Some(path) => Self::from_file(&path),
            None => Err(Error::Config(format!(
                "no sources configured: pass --config, set {} or create {:?}",
                CONFIG_ENV,
                Self::default_path()
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("no sources configured".to_string()));
        }
        for source in &self.sources {
            if source.tag.is_empty() {
                return Err(Error::Config(format!("source {} has an empty tag", source.locator)));
            }
            if !is_routable_tag(&source.tag) {
                return Err(Error::Config(format!(
                    "[{}] tag must match [A-Z0-9_]+ and be at most {} bytes, otherwise the listener files it under {}",
                    source.tag, MAX_TAG_LEN, UNKNOWN_TAG
                )));
            }
            if let Some(w) = source.window {
                if w.start > w.end {
                    return Err(Error::Config(format!(
                        "[{}] window start {} is after end {}",
                        source.tag, w.start, w.end
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// 是否存在需要动态解析的 Source
    pub fn has_dynamic_sources(&self) -> bool {
        self.sources.iter().any(|s| s.locator.is_dynamic())
    }
}

/// Listener 配置
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// 入站连接串
    pub bind: String,
    /// 按 tag 分流的日志目录
    pub log_dir: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: "udpin:0.0.0.0:14550".to_string(),
            log_dir: log_dir_from_env(),
        }
    }
}

/// Shell 配置
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// 连接串
    pub port: String,
    /// SERIAL_CONTROL 设备号
    pub devnum: u8,
    /// 回复收集窗口
    pub reply_window: Duration,
    /// 等待对端心跳的超时
    pub heartbeat_timeout: Duration,
    /// 回复日志目录
    pub log_dir: PathBuf,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            port: "udpin:0.0.0.0:14445".to_string(),
            devnum: 10,
            reply_window: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(10),
            log_dir: log_dir_from_env(),
        }
    }
}

/// Viewer 配置
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub log_dir: PathBuf,
    /// tmux session 名称
    pub session_name: String,
    /// 等待首个日志文件的轮询间隔
    pub poll_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            log_dir: log_dir_from_env(),
            session_name: "mavwatch".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}
