//! Source 解析
//!
//! 固定路径原样使用；目录型 Source 在启动时选取目录中最新的文件。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::{Locator, SourceConfig};

/// 选取目录中修改时间最新的普通文件（不递归）
///
/// `extension` 可带或不带前导 `.`。目录不存在、为空或没有匹配文件时返回 `None`。
pub fn resolve_newest(dir: &Path, extension: Option<&str>) -> Option<PathBuf> {
    let wanted = extension.map(|e| e.trim_start_matches('.'));

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot scan {:?}: {}", dir, e);
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            if let Some(ext) = wanted {
                if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                    return None;
                }
            }
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((mtime, path))
        })
        // 修改时间相同时按文件名取最大，保证结果确定
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// 解析 Source 对应的具体文件
pub fn resolve(locator: &Locator) -> Option<PathBuf> {
    match locator {
        Locator::File { path } => Some(path.clone()),
        Locator::Newest { dir, extension } => resolve_newest(dir, extension.as_deref()),
    }
}

/// 一个已解析的 Source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub config: SourceConfig,
    /// `None` 表示目录型 Source 没有找到文件
    pub path: Option<PathBuf>,
}

/// 解析全部 Source（只在启动时调用一次）
pub fn resolve_all(sources: &[SourceConfig]) -> Vec<ResolvedSource> {
    sources
        .iter()
        .map(|config| {
            let path = resolve(&config.locator);
            match (&config.locator, &path) {
                (Locator::Newest { .. }, Some(p)) => {
                    tracing::info!("🔎 [{}] Resolved {} → {:?}", config.tag, config.locator, p)
                }
                (Locator::Newest { .. }, None) => {
                    tracing::warn!("🔎 [{}] No file matches {}", config.tag, config.locator)
                }
                _ => {}
            }
            ResolvedSource {
                config: config.clone(),
                path,
            }
        })
        .collect()
}
