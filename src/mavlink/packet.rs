//! MAVLink 报文编解码
//!
//! 字段按线上顺序（大类型在前）序列化，小端序。

use super::{Heartbeat, Message, SerialControl, Severity, StatusText, SERIAL_CHUNK_LEN};
use crate::error::{Error, Result};
use crate::frame::{Frame, FRAME_LEN};

const STX_V1: u8 = 0xFE;
const STX_V2: u8 = 0xFD;

const HEADER_LEN_V1: usize = 6;
const HEADER_LEN_V2: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;

const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// (msg_id, 基础载荷长度, 扩展后载荷长度, CRC_EXTRA)
const HEARTBEAT_META: (u32, usize, usize, u8) = (0, 9, 9, 50);
const SERIAL_CONTROL_META: (u32, usize, usize, u8) = (126, 79, 81, 220);
const STATUSTEXT_META: (u32, usize, usize, u8) = (253, 51, 54, 83);

fn meta(msg_id: u32) -> Option<(u32, usize, usize, u8)> {
    match msg_id {
        0 => Some(HEARTBEAT_META),
        126 => Some(SERIAL_CONTROL_META),
        253 => Some(STATUSTEXT_META),
        _ => None,
    }
}

/// 一个完整的 MAVLink 报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message: Message,
}

/// CRC-16/MCRF4XX（MAVLink 所说的 X.25）
pub fn crc_x25(bytes: &[u8], init: u16) -> u16 {
    let mut crc = init;
    for &b in bytes {
        let mut tmp = b ^ (crc & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        crc = (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }
    crc
}

fn serialize_payload(message: &Message) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    match message {
        Message::Heartbeat(hb) => {
            out.extend_from_slice(&hb.custom_mode.to_le_bytes());
            out.extend_from_slice(&[
                hb.mav_type,
                hb.autopilot,
                hb.base_mode,
                hb.system_status,
                hb.mavlink_version,
            ]);
        }
        Message::SerialControl(sc) => {
            out.extend_from_slice(&sc.baudrate.to_le_bytes());
            out.extend_from_slice(&sc.timeout.to_le_bytes());
            out.extend_from_slice(&[sc.device, sc.flags, sc.count]);
            out.extend_from_slice(&sc.data);
            // 扩展字段 target_system / target_component
            out.extend_from_slice(&[0, 0]);
        }
        Message::StatusText(st) => {
            out.push(st.severity as u8);
            out.extend_from_slice(st.text.as_bytes());
            // 扩展字段 id(u16) / chunk_seq(u8)
            out.extend_from_slice(&[0, 0, 0]);
        }
        Message::Other { .. } => return None,
    }
    Some(out)
}

fn deserialize_payload(msg_id: u32, payload: &[u8]) -> Message {
    let Some((_, _, full_len, _)) = meta(msg_id) else {
        return Message::Other { msg_id };
    };

    // MAVLink 2 会截掉尾部零字节，这里补回
    let mut p = payload.to_vec();
    if p.len() < full_len {
        p.resize(full_len, 0);
    }

    match msg_id {
        0 => Message::Heartbeat(Heartbeat {
            custom_mode: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            mav_type: p[4],
            autopilot: p[5],
            base_mode: p[6],
            system_status: p[7],
            mavlink_version: p[8],
        }),
        126 => {
            let mut data = [0u8; SERIAL_CHUNK_LEN];
            data.copy_from_slice(&p[9..9 + SERIAL_CHUNK_LEN]);
            Message::SerialControl(SerialControl {
                baudrate: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                timeout: u16::from_le_bytes([p[4], p[5]]),
                device: p[6],
                flags: p[7],
                count: p[8],
                data,
            })
        }
        _ => Message::StatusText(StatusText {
            severity: Severity::from_u8(p[0]),
            text: Frame::from_bytes(&p[1..1 + FRAME_LEN]),
        }),
    }
}

/// 编码为 MAVLink 2 报文
pub fn encode_packet(sequence: u8, system_id: u8, component_id: u8, message: &Message) -> Result<Vec<u8>> {
    let msg_id = message.msg_id();
    let (_, _, _, crc_extra) = meta(msg_id)
        .ok_or_else(|| Error::Protocol(format!("unsupported outgoing message id {}", msg_id)))?;
    let mut payload = serialize_payload(message)
        .ok_or_else(|| Error::Protocol(format!("unsupported outgoing message id {}", msg_id)))?;

    // 截掉尾部零字节，至少保留 1 字节
    let keep = payload.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(1);
    payload.truncate(keep);

    let mut out = Vec::with_capacity(HEADER_LEN_V2 + payload.len() + CHECKSUM_LEN);
    out.push(STX_V2);
    out.push(payload.len() as u8);
    out.push(0); // incompat_flags
    out.push(0); // compat_flags
    out.push(sequence);
    out.push(system_id);
    out.push(component_id);
    out.extend_from_slice(&msg_id.to_le_bytes()[..3]);
    out.extend_from_slice(&payload);

    let crc = crc_x25(&out[1..], 0xFFFF);
    let crc = crc_x25(&[crc_extra], crc);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// 解析一个数据报中的全部报文
///
/// 无法识别的字节被跳过；校验失败的报文作为 `Err` 返回，不影响后续报文。
pub fn parse_datagram(buf: &[u8]) -> Vec<Result<Packet>> {
    let mut results = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        let (header_len, stx) = match buf[pos] {
            STX_V2 => (HEADER_LEN_V2, STX_V2),
            STX_V1 => (HEADER_LEN_V1, STX_V1),
            _ => {
                pos += 1;
                continue;
            }
        };

        let rest = &buf[pos..];
        if rest.len() < header_len {
            results.push(Err(Error::Protocol("truncated header".to_string())));
            break;
        }

        let payload_len = rest[1] as usize;
        let signed = stx == STX_V2 && rest[2] & INCOMPAT_FLAG_SIGNED != 0;
        let total = header_len + payload_len + CHECKSUM_LEN + if signed { SIGNATURE_LEN } else { 0 };
        if rest.len() < total {
            results.push(Err(Error::Protocol(format!(
                "truncated packet: need {} bytes, have {}",
                total,
                rest.len()
            ))));
            break;
        }

        let (sequence, system_id, component_id, msg_id) = if stx == STX_V2 {
            (rest[4], rest[5], rest[6], u32::from_le_bytes([rest[7], rest[8], rest[9], 0]))
        } else {
            (rest[2], rest[3], rest[4], rest[5] as u32)
        };

        let payload = &rest[header_len..header_len + payload_len];
        let crc_pos = header_len + payload_len;
        let received_crc = u16::from_le_bytes([rest[crc_pos], rest[crc_pos + 1]]);

        let checked = match meta(msg_id) {
            Some((_, _, _, crc_extra)) => {
                let crc = crc_x25(&rest[1..crc_pos], 0xFFFF);
                crc_x25(&[crc_extra], crc) == received_crc
            }
            // 未知消息没有 CRC_EXTRA，无法校验
            None => true,
        };

        if checked {
            results.push(Ok(Packet {
                sequence,
                system_id,
                component_id,
                message: deserialize_payload(msg_id, payload),
            }));
        } else {
            results.push(Err(Error::Protocol(format!("bad checksum for message id {}", msg_id))));
        }

        pos += total;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use crate::mavlink::{mav_autopilot, mav_type, serial_flags};

    #[test]
    fn test_crc_x25_check_value() {
        // CRC-16/MCRF4XX 标准校验值
        assert_eq!(crc_x25(b"123456789", 0xFFFF), 0x6F91);
    }

    #[test]
    fn test_statustext_packet_layout() {
        let msg = Message::status_text(Severity::Info, encode("IR", "hello"));
        let bytes = encode_packet(7, 2, 200, &msg).unwrap();

        assert_eq!(bytes[0], STX_V2);
        // severity + "[IR] hello"，尾部零字节被截掉
        assert_eq!(bytes[1] as usize, 1 + "[IR] hello".len());
        assert_eq!(bytes[4], 7);
        assert_eq!(bytes[5], 2);
        assert_eq!(bytes[6], 200);
        assert_eq!(&bytes[7..10], &[253, 0, 0]);
        assert_eq!(bytes[10], Severity::Info as u8);
        assert_eq!(&bytes[11..21], b"[IR] hello");
        assert_eq!(bytes.len(), HEADER_LEN_V2 + 11 + CHECKSUM_LEN);
    }

    #[test]
    fn test_parse_restores_truncated_payload() {
        let msg = Message::status_text(Severity::Warning, encode("GPS", "fix lost"));
        let bytes = encode_packet(0, 1, 1, &msg).unwrap();

        let packets = parse_datagram(&bytes);
        assert_eq!(packets.len(), 1);
        let packet = packets.into_iter().next().unwrap().unwrap();
        assert_eq!(packet.system_id, 1);
        assert_eq!(packet.message, msg);
    }

    #[test]
    fn test_parse_multiple_packets_and_bad_checksum() {
        let hb = Message::Heartbeat(Heartbeat::new(mav_type::ONBOARD_CONTROLLER, mav_autopilot::INVALID));
        let sc = Message::SerialControl(SerialControl::chunk(10, serial_flags::RESPOND, b"ver all\n"));

        let mut buf = vec![0x00, 0x11];
        buf.extend(encode_packet(1, 1, 1, &hb).unwrap());
        let mut corrupt = encode_packet(2, 1, 1, &sc).unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        buf.extend(corrupt);
        buf.extend(encode_packet(3, 1, 1, &sc).unwrap());

        let results = parse_datagram(&buf);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().message, hb);
        assert!(matches!(results[1], Err(Error::Protocol(_))));
        assert_eq!(results[2].as_ref().unwrap().message, sc);
    }

    #[test]
    fn test_parse_v1_packet() {
        // 手工构造 MAVLink 1 HEARTBEAT
        let payload = [0u8, 0, 0, 0, mav_type::GCS, mav_autopilot::INVALID, 0, 4, 3];
        let mut bytes = vec![STX_V1, payload.len() as u8, 9, 255, 190, 0];
        bytes.extend_from_slice(&payload);
        let crc = crc_x25(&bytes[1..], 0xFFFF);
        let crc = crc_x25(&[HEARTBEAT_META.3], crc);
        bytes.extend_from_slice(&crc.to_le_bytes());

        let packet = parse_datagram(&bytes).remove(0).unwrap();
        assert_eq!(packet.sequence, 9);
        assert_eq!(packet.system_id, 255);
        assert_eq!(packet.component_id, 190);
        match packet.message {
            Message::Heartbeat(hb) => {
                assert_eq!(hb.mav_type, mav_type::GCS);
                assert_eq!(hb.system_status, 4);
            }
            other => panic!("Expected Heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_message_id() {
        let mut bytes = vec![STX_V2, 1, 0, 0, 0, 1, 1, 30, 0, 0, 0xAB];
        bytes.extend_from_slice(&[0x00, 0x00]);
        let packet = parse_datagram(&bytes).remove(0).unwrap();
        assert_eq!(packet.message, Message::Other { msg_id: 30 });
    }

    #[test]
    fn test_encode_other_is_rejected() {
        assert!(encode_packet(0, 1, 1, &Message::Other { msg_id: 30 }).is_err());
    }
}
