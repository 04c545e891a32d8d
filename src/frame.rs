//! 帧编解码
//!
//! 出站：`[TAG] message` → 截断到 50 字节 → 零字节补齐。
//! 入站：去掉尾部零字节 → 匹配 `[TAG] ` 前缀 → 按 tag 分流，匹配失败归入 `UNKNOWN`。

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// 帧固定长度（STATUSTEXT.text 字段宽度）
pub const FRAME_LEN: usize = 50;

/// 无法识别 tag 时使用的桶
pub const UNKNOWN_TAG: &str = "UNKNOWN";

/// 出站 tag 最大长度：`[` + tag + `] ` 必须放得进一帧
pub const MAX_TAG_LEN: usize = FRAME_LEN - 3;

static TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([A-Z0-9_]+)\]\s+(.*)").expect("tag pattern is valid")
});

static ROUTABLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_]+$").expect("routable tag pattern is valid"));

static UNSAFE_TAG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("sanitize pattern is valid"));

/// 定长帧
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// 从原始字节构造；短于 50 字节补零，长于 50 字节截断
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; FRAME_LEN];
        let n = bytes.len().min(FRAME_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// 去掉补齐零字节后的有效内容
    pub fn content(&self) -> &[u8] {
        trim_padding(&self.0)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame")
            .field(&String::from_utf8_lossy(self.content()))
            .finish()
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub tag: String,
    pub payload: String,
}

/// 编码 `(tag, message)` 为定长帧
///
/// 调用方负责按 Source 配置做行窗口截取，这里只做通用截断。
pub fn encode(tag: &str, message: &str) -> Frame {
    let full = format!("[{}] {}", tag, message);
    Frame::from_bytes(full.as_bytes())
}

/// 解码入站文本，永不失败
pub fn decode(bytes: &[u8]) -> Decoded {
    let text = String::from_utf8_lossy(trim_padding(bytes));
    decode_str(&text)
}

/// 解码已经是字符串的入站文本
pub fn decode_str(text: &str) -> Decoded {
    let text = text.trim_end_matches('\0');
    match TAGGED.captures(text) {
        Some(caps) => Decoded {
            tag: sanitize_tag(&caps[1]),
            payload: caps[2].to_string(),
        },
        None => Decoded {
            tag: UNKNOWN_TAG.to_string(),
            payload: text.to_string(),
        },
    }
}

/// 出站 tag 能否被入站端原样解出（否则整条消息落入 `UNKNOWN`）
pub fn is_routable_tag(tag: &str) -> bool {
    tag.len() <= MAX_TAG_LEN && ROUTABLE_TAG.is_match(tag)
}

/// 把 tag 中 `[A-Za-z0-9_]` 以外的字符替换为 `_`
pub fn sanitize_tag(tag: &str) -> String {
    UNSAFE_TAG_CHARS.replace_all(tag, "_").into_owned()
}

/// 去掉尾部零字节
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    &bytes[..end]
}
