//! MAVLink 传输
//!
//! 只实现本项目用到的三种消息：
//! - `HEARTBEAT` (0)：链路握手
//! - `SERIAL_CONTROL` (126)：Shell 命令
//! - `STATUSTEXT` (253)：带 tag 的日志行
//!
//! 发送使用 MAVLink 2，接收兼容 MAVLink 1 / 2。

mod link;
mod packet;

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FRAME_LEN};

pub use link::{Endpoint, LinkConfig, MavLink, MavReceiver, MavSender};
pub use packet::{crc_x25, encode_packet, parse_datagram, Packet};

/// SERIAL_CONTROL.data 宽度
pub const SERIAL_CHUNK_LEN: usize = 70;

/// MAV_TYPE
pub mod mav_type {
    pub const GENERIC: u8 = 0;
    pub const GCS: u8 = 6;
    pub const ONBOARD_CONTROLLER: u8 = 18;
}

/// MAV_AUTOPILOT
pub mod mav_autopilot {
    pub const INVALID: u8 = 8;
}

/// SERIAL_CONTROL_FLAG
pub mod serial_flags {
    pub const RESPOND: u8 = 2;
    pub const EXCLUSIVE: u8 = 4;
}

/// MAV_SEVERITY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    #[default]
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

/// 消息种类（用于 `recv_match` 过滤）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    SerialControl,
    StatusText,
}

impl MessageKind {
    pub fn msg_id(self) -> u32 {
        match self {
            MessageKind::Heartbeat => 0,
            MessageKind::SerialControl => 126,
            MessageKind::StatusText => 253,
        }
    }
}

/// HEARTBEAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    pub fn new(mav_type: u8, autopilot: u8) -> Self {
        Self {
            custom_mode: 0,
            mav_type,
            autopilot,
            base_mode: 0,
            system_status: 0,
            mavlink_version: 3,
        }
    }
}

/// STATUSTEXT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusText {
    pub severity: Severity,
    pub text: Frame,
}

/// SERIAL_CONTROL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialControl {
    pub baudrate: u32,
    pub timeout: u16,
    pub device: u8,
    pub flags: u8,
    pub count: u8,
    pub data: [u8; SERIAL_CHUNK_LEN],
}

impl SerialControl {
    /// 构造一个命令分片；`chunk` 超过 70 字节的部分被丢弃
    pub fn chunk(device: u8, flags: u8, chunk: &[u8]) -> Self {
        let n = chunk.len().min(SERIAL_CHUNK_LEN);
        let mut data = [0u8; SERIAL_CHUNK_LEN];
        data[..n].copy_from_slice(&chunk[..n]);
        Self {
            baudrate: 0,
            timeout: 0,
            device,
            flags,
            count: n as u8,
            data,
        }
    }

    /// 有效数据
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.count as usize).min(SERIAL_CHUNK_LEN)]
    }
}

/// 解码后的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Heartbeat(Heartbeat),
    SerialControl(SerialControl),
    StatusText(StatusText),
    /// 未实现的消息，仅保留 id
    Other { msg_id: u32 },
}

impl Message {
    pub fn status_text(severity: Severity, text: Frame) -> Self {
        Message::StatusText(StatusText { severity, text })
    }

    pub fn msg_id(&self) -> u32 {
        match self {
            Message::Heartbeat(_) => MessageKind::Heartbeat.msg_id(),
            Message::SerialControl(_) => MessageKind::SerialControl.msg_id(),
            Message::StatusText(_) => MessageKind::StatusText.msg_id(),
            Message::Other { msg_id } => *msg_id,
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Message::Heartbeat(_) => Some(MessageKind::Heartbeat),
            Message::SerialControl(_) => Some(MessageKind::SerialControl),
            Message::StatusText(_) => Some(MessageKind::StatusText),
            Message::Other { .. } => None,
        }
    }

    pub fn is(&self, kind: MessageKind) -> bool {
        self.kind() == Some(kind)
    }

    /// STATUSTEXT 的文本字段（含补齐零字节）
    pub fn text(&self) -> Option<&[u8; FRAME_LEN]> {
        match self {
            Message::StatusText(st) => Some(st.text.as_bytes()),
            _ => None,
        }
    }
}
