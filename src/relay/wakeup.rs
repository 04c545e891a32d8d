//! tail 唤醒策略
//!
//! 读到文件末尾后挂起，直到下一次值得重试的时刻。

use std::path::Path;
use std::time::Duration;

use crate::config::TailMode;

#[cfg(feature = "notify-tail")]
use notify::{RecommendedWatcher, RecursiveMode};
#[cfg(feature = "notify-tail")]
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
#[cfg(feature = "notify-tail")]
use tokio::sync::mpsc;

/// 变化通知的防抖时间
#[cfg(feature = "notify-tail")]
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(50);

pub(crate) enum Wakeup {
    /// 固定间隔轮询
    Poll { interval: Duration },
    /// 文件变化通知；`interval` 作为兜底轮询
    #[cfg(feature = "notify-tail")]
    Notify {
        interval: Duration,
        rx: mpsc::Receiver<()>,
        _debouncer: Debouncer<RecommendedWatcher>,
    },
}

impl Wakeup {
    pub(crate) fn new(mode: TailMode, path: &Path, interval: Duration) -> Self {
        match mode {
            TailMode::Poll => Wakeup::Poll { interval },
            TailMode::Notify => Self::notify(path, interval),
        }
    }

    #[cfg(feature = "notify-tail")]
    fn notify(path: &Path, interval: Duration) -> Self {
        // 容量 1：多次变化合并为一次唤醒
        let (tx, rx) = mpsc::channel::<()>(1);

        let debouncer = new_debouncer(
            NOTIFY_DEBOUNCE,
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                if let Ok(events) = res {
                    if events.iter().any(|e| e.kind == DebouncedEventKind::Any) {
                        let _ = tx.try_send(());
                    }
                }
            },
        );

        let mut debouncer = match debouncer {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("⚠️ File notifications unavailable, polling instead: {}", e);
                return Wakeup::Poll { interval };
            }
        };

        if let Err(e) = debouncer.watcher().watch(path, RecursiveMode::NonRecursive) {
            tracing::warn!("⚠️ Failed to watch {:?}, polling instead: {}", path, e);
            return Wakeup::Poll { interval };
        }

        Wakeup::Notify {
            interval,
            rx,
            _debouncer: debouncer,
        }
    }

    #[cfg(not(feature = "notify-tail"))]
    fn notify(_path: &Path, interval: Duration) -> Self {
        tracing::warn!("⚠️ Built without notify-tail, polling instead");
        Wakeup::Poll { interval }
    }

    /// 挂起到下一次重试
    pub(crate) async fn wait(&mut self) {
        match self {
            Wakeup::Poll { interval } => tokio::time::sleep(*interval).await,
            #[cfg(feature = "notify-tail")]
            Wakeup::Notify { interval, rx, .. } => {
                let _ = tokio::time::timeout(*interval, rx.recv()).await;
            }
        }
    }

    pub(crate) fn is_notify(&self) -> bool {
        !matches!(self, Wakeup::Poll { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_poll_waits_interval() {
        let mut wakeup = Wakeup::new(TailMode::Poll, Path::new("/nonexistent"), Duration::from_millis(30));
        assert!(!wakeup.is_notify());
        let start = Instant::now();
        wakeup.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_notify_falls_back_to_poll_for_missing_file() {
        let wakeup = Wakeup::new(TailMode::Notify, Path::new("/nonexistent/file.log"), Duration::from_millis(30));
        assert!(!wakeup.is_notify());
    }

    #[cfg(feature = "notify-tail")]
    #[tokio::test]
    async fn test_notify_wakes_before_fallback() {
        use std::io::Write;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("capture.log");
        std::fs::write(&path, "").unwrap();

        let mut wakeup = Wakeup::new(TailMode::Notify, &path, Duration::from_secs(5));
        assert!(wakeup.is_notify());

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut f = std::fs::OpenOptions::new().append(true).open(writer_path).unwrap();
            writeln!(f, "frame saved").unwrap();
        });

        let start = Instant::now();
        wakeup.wait().await;
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
