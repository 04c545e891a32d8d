//! UDP 链路
//!
//! 连接串格式：
//! - `udpout:host:port`：主动发往固定对端
//! - `udpin:host:port` / `udp:host:port`：绑定本地端口，对端从收到的首个数据报学习

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

use super::packet::{encode_packet, parse_datagram, Packet};
use super::{mav_autopilot, mav_type, Heartbeat, Message, MessageKind};
use crate::error::{Error, Result};

/// 单个数据报上限
const MAX_DATAGRAM: usize = 2048;

/// 连接端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// 发往固定对端
    UdpOut(String),
    /// 监听本地地址
    UdpIn(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, addr) = s
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("invalid connection string: {}", s)))?;

        if addr.rsplit_once(':').is_none() {
            return Err(Error::Config(format!("connection string needs host:port: {}", s)));
        }

        match scheme {
            "udpout" => Ok(Endpoint::UdpOut(addr.to_string())),
            "udpin" | "udp" => Ok(Endpoint::UdpIn(addr.to_string())),
            _ if s.starts_with("/dev/") || scheme == "serial" => Err(Error::Config(format!(
                "serial links are not supported, use a UDP bridge: {}",
                s
            ))),
            _ => Err(Error::Config(format!("unknown connection scheme '{}' in {}", scheme, s))),
        }
    }
}

/// 链路配置
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub endpoint: String,
    pub system_id: u8,
    pub component_id: u8,
    /// 心跳中声明的本端类型
    pub mav_type: u8,
    pub autopilot: u8,
}

impl LinkConfig {
    /// 机载端（Relay）默认身份
    pub fn onboard(endpoint: &str, system_id: u8, component_id: u8) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            system_id,
            component_id,
            mav_type: mav_type::ONBOARD_CONTROLLER,
            autopilot: mav_autopilot::INVALID,
        }
    }

    /// 地面端（Listener / Shell）默认身份
    pub fn ground(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            system_id: 255,
            component_id: 190,
            mav_type: mav_type::GENERIC,
            autopilot: mav_autopilot::INVALID,
        }
    }
}

struct Shared {
    socket: UdpSocket,
    /// 对端地址；udpin 模式下随入站数据报更新
    peer: RwLock<Option<SocketAddr>>,
    learn_peer: bool,
    sequence: AtomicU8,
    system_id: u8,
    component_id: u8,
    heartbeat: Heartbeat,
    heartbeat_sent: AtomicBool,
}

impl Shared {
    async fn send(&self, message: &Message) -> Result<()> {
        let peer = (*self.peer.read())
            .ok_or_else(|| Error::ChannelUnavailable("no peer address known yet".to_string()))?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_packet(seq, self.system_id, self.component_id, message)?;
        self.socket.send_to(&bytes, peer).await?;
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.send(&Message::Heartbeat(self.heartbeat)).await?;
        if !self.heartbeat_sent.swap(true, Ordering::Relaxed) {
            tracing::debug!("💓 Heartbeat sent");
        }
        Ok(())
    }
}

/// MAVLink UDP 链路
///
/// 由拥有者进程显式 `connect()` 一次，再通过 `sender()` / `receiver()` 分发给 Relay / Router。
pub struct MavLink {
    shared: Arc<Shared>,
}

impl MavLink {
    /// 建立链路
    ///
    /// `udpout` 模式下立即发送首个心跳；`udpin` 模式下对端未知，心跳在 `wait_heartbeat` 后发送。
    pub async fn connect(config: &LinkConfig) -> Result<Self> {
        let endpoint: Endpoint = config.endpoint.parse()?;

        let (socket, peer, learn_peer) = match &endpoint {
            Endpoint::UdpOut(addr) => {
                let peer = resolve(addr).await?;
                let bind_addr: SocketAddr = if peer.is_ipv4() {
                    SocketAddr::from(([0, 0, 0, 0], 0))
                } else {
                    SocketAddr::from(([0u16; 8], 0))
                };
                (UdpSocket::bind(bind_addr).await?, Some(peer), false)
            }
            Endpoint::UdpIn(addr) => {
                let local = resolve(addr).await?;
                (UdpSocket::bind(local).await?, None, true)
            }
        };

        let shared = Arc::new(Shared {
            socket,
            peer: RwLock::new(peer),
            learn_peer,
            sequence: AtomicU8::new(0),
            system_id: config.system_id,
            component_id: config.component_id,
            heartbeat: Heartbeat::new(config.mav_type, config.autopilot),
            heartbeat_sent: AtomicBool::new(false),
        });

        if peer.is_some() {
            shared.send_heartbeat().await?;
        }

        tracing::info!(
            "📡 [MAVLINK] Initialized {} (local {:?})",
            config.endpoint,
            shared.socket.local_addr().ok()
        );

        Ok(Self { shared })
    }

    /// 链路是否可发送（对端已知）
    pub fn is_ready(&self) -> bool {
        self.shared.peer.read().is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    pub fn sender(&self) -> MavSender {
        MavSender {
            shared: self.shared.clone(),
        }
    }

    pub fn receiver(&self) -> MavReceiver {
        MavReceiver {
            shared: self.shared.clone(),
            pending: VecDeque::new(),
        }
    }
}

/// 发送端
#[derive(Clone)]
pub struct MavSender {
    shared: Arc<Shared>,
}

impl MavSender {
    pub fn is_ready(&self) -> bool {
        self.shared.peer.read().is_some()
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        self.shared.send(message).await
    }

    pub async fn send_heartbeat(&self) -> Result<()> {
        self.shared.send_heartbeat().await
    }
}

/// 接收端
pub struct MavReceiver {
    shared: Arc<Shared>,
    /// 同一数据报中尚未取走的报文
    pending: VecDeque<Packet>,
}

impl MavReceiver {
    /// 接收下一个报文；`deadline` 到期返回 `None`
    pub async fn recv(&mut self, deadline: Option<Instant>) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }

            let mut buf = [0u8; MAX_DATAGRAM];
            let received = match deadline {
                Some(d) => match timeout_at(d, self.shared.socket.recv_from(&mut buf)).await {
                    Ok(r) => r,
                    Err(_) => return Ok(None),
                },
                None => self.shared.socket.recv_from(&mut buf).await,
            };
            let (n, from) = received?;

            if self.shared.learn_peer {
                let mut peer = self.shared.peer.write();
                if *peer != Some(from) {
                    tracing::debug!("📡 Peer address: {}", from);
                    *peer = Some(from);
                }
            }

            for result in parse_datagram(&buf[..n]) {
                match result {
                    Ok(packet) => self.pending.push_back(packet),
                    Err(e) => tracing::debug!("Dropping malformed packet from {}: {}", from, e),
                }
            }
        }
    }

    /// 接收下一条指定类型的消息；超时返回 `None`
    pub async fn recv_match(&mut self, kind: MessageKind, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.recv(deadline).await? {
                Some(packet) if packet.message.is(kind) => return Ok(Some(packet.message)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// 等待对端心跳，然后回一个自己的心跳
    pub async fn wait_heartbeat(&mut self, timeout: Duration) -> Result<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.recv(Some(deadline)).await? {
                Some(packet) if packet.message.is(MessageKind::Heartbeat) => {
                    tracing::info!(
                        "💓 Heartbeat from system {} component {}",
                        packet.system_id,
                        packet.component_id
                    );
                    self.shared.send_heartbeat().await?;
                    return Ok(packet);
                }
                Some(_) => continue,
                None => {
                    return Err(Error::ChannelUnavailable(format!(
                        "no heartbeat within {:?}",
                        timeout
                    )))
                }
            }
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("cannot resolve address: {}", addr)))
}
