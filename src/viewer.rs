//! tmux 日志面板
//!
//! 每个 `<tag>.log` 一个 `tail -f` 面板，tiled 布局。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context};

use crate::config::ViewerConfig;
use crate::error::Result;
use crate::shutdown::Shutdown;

/// 目录中的 `*.log`（按文件名排序）
pub fn list_logs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    logs.sort();
    logs
}

/// 日志文件对应的 tag
pub fn tag_of(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// 生成 tmux 命令序列（不含前导 `tmux`）
pub fn tmux_plan(session: &str, logs: &[PathBuf]) -> Vec<Vec<String>> {
    let Some((first, rest)) = logs.split_first() else {
        return Vec::new();
    };

    let owned = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let first = first.display().to_string();
    let mut plan = vec![owned(&["new-session", "-d", "-s", session, "tail", "-f", first.as_str()])];
    for log in rest {
        let log = log.display().to_string();
        plan.push(owned(&["split-window", "-t", session, "-v", "tail", "-f", log.as_str()]));
        plan.push(owned(&["select-layout", "-t", session, "tiled"]));
    }
    plan.push(owned(&["attach-session", "-t", session]));
    plan
}

/// 日志查看器
pub struct LogViewer {
    config: ViewerConfig,
}

impl LogViewer {
    pub fn new(config: ViewerConfig) -> Self {
        Self { config }
    }

    /// 轮询直到至少有一个日志文件；停止信号触发时返回空列表
    pub async fn wait_for_logs(&self, shutdown: &Shutdown) -> Vec<PathBuf> {
        loop {
            let logs = list_logs(&self.config.log_dir);
            if !logs.is_empty() {
                return logs;
            }

            tracing::info!("[INFO] No logs yet, waiting for first message...");
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.wait() => return Vec::new(),
            }
        }
    }

    /// 重建 tmux session 并 attach
    pub async fn launch(&self, shutdown: &Shutdown) -> Result<()> {
        // 旧 session 可能不存在，忽略结果
        let session = self.config.session_name.clone();
        let _ = tokio::task::spawn_blocking(move || {
            Command::new("tmux")
                .args(["kill-session", "-t", session.as_str()])
                .stderr(Stdio::null())
                .status()
        })
        .await;

        let logs = self.wait_for_logs(shutdown).await;
        if logs.is_empty() {
            return Ok(());
        }

        for log in &logs {
            tracing::info!("🖥️ Pane: {} ({:?})", tag_of(log).unwrap_or("?"), log);
        }

        for args in tmux_plan(&self.config.session_name, &logs) {
            run_blocking("tmux", args).await?;
        }
        Ok(())
    }
}

/// 在阻塞线程池中运行外部命令（`attach-session` 会一直阻塞到 detach）
async fn run_blocking(program: &'static str, args: Vec<String>) -> Result<()> {
    let label = format!("{} {}", program, args.join(" "));
    let status = tokio::task::spawn_blocking(move || Command::new(program).args(&args).status())
        .await
        .context("外部命令任务异常退出")?
        .with_context(|| format!("无法启动 {}", program))?;
    if !status.success() {
        return Err(anyhow!("{} exited with {}", label, status).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_list_logs_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        for name in ["XRCE.log", "IR.log", "notes.txt", "RGB.log"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir(tmp.path().join("dir.log")).unwrap();

        let logs = list_logs(tmp.path());
        let tags: Vec<_> = logs.iter().filter_map(|p| tag_of(p)).collect();
        assert_eq!(tags, vec!["IR", "RGB", "XRCE"]);
    }

    #[test]
    fn test_tmux_plan() {
        let logs = vec![PathBuf::from("/tmp/l/A.log"), PathBuf::from("/tmp/l/B.log")];
        let plan = tmux_plan("mavwatch", &logs);

        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], vec!["new-session", "-d", "-s", "mavwatch", "tail", "-f", "/tmp/l/A.log"]);
        assert_eq!(plan[1], vec!["split-window", "-t", "mavwatch", "-v", "tail", "-f", "/tmp/l/B.log"]);
        assert_eq!(plan[2], vec!["select-layout", "-t", "mavwatch", "tiled"]);
        assert_eq!(plan[3], vec!["attach-session", "-t", "mavwatch"]);

        assert!(tmux_plan("mavwatch", &[]).is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_logs_polls_until_present() {
        let tmp = TempDir::new().unwrap();
        let viewer = LogViewer::new(ViewerConfig {
            log_dir: tmp.path().to_path_buf(),
            session_name: "test".to_string(),
            poll_interval: Duration::from_millis(20),
        });

        let dir = tmp.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            fs::write(dir.join("GPS.log"), "fix\n").unwrap();
        });

        let logs = tokio::time::timeout(Duration::from_secs(2), viewer.wait_for_logs(&Shutdown::new()))
            .await
            .unwrap();
        assert_eq!(logs, vec![tmp.path().join("GPS.log")]);
    }

    #[tokio::test]
    async fn test_external_command_leaves_runtime_free() {
        let start = tokio::time::Instant::now();
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tokio::time::Instant::now()
        });

        run_blocking("sleep", vec!["0.3".to_string()]).await.unwrap();
        let ticked_at = ticker.await.unwrap();
        assert!(ticked_at.duration_since(start) < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_external_command_failure() {
        assert!(run_blocking("false", Vec::new()).await.is_err());
        assert!(run_blocking("/nonexistent/tmux", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_logs_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let viewer = LogViewer::new(ViewerConfig {
            log_dir: tmp.path().to_path_buf(),
            ..Default::default()
        });
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(viewer.wait_for_logs(&shutdown).await.is_empty());
    }
}
