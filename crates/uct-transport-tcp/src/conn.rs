//! 建连握手报文。
//!
//! # 线上格式（What）
//! `[event: 1 字节][ip: 16 字节][port: 2 字节，网络序]`，共 [`CONN_PACKET_LEN`] 字节。
//! IPv4 地址以 IPv4-mapped IPv6 形式存放，解码时还原为 IPv4。
//!
//! 报文只在监听侧接受连接、需要交换接口地址时使用；非阻塞建连路径不依赖它。

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use uct_core::{Result, UctError};

/// 握手报文长度。
pub const CONN_PACKET_LEN: usize = 1 + 16 + 2;

/// 握手事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnEvent {
    Req = 1,
    Ack = 2,
}

impl TryFrom<u8> for ConnEvent {
    type Error = UctError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ConnEvent::Req),
            2 => Ok(ConnEvent::Ack),
            other => Err(UctError::protocol(format!(
                "unknown connection event {other}"
            ))),
        }
    }
}

/// 握手报文：事件类型 + 发送方接口地址。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnPacket {
    pub event: ConnEvent,
    pub iface_addr: SocketAddr,
}

impl ConnPacket {
    pub fn request(iface_addr: SocketAddr) -> Self {
        Self {
            event: ConnEvent::Req,
            iface_addr,
        }
    }

    pub fn ack(iface_addr: SocketAddr) -> Self {
        Self {
            event: ConnEvent::Ack,
            iface_addr,
        }
    }

    pub fn encode(&self) -> [u8; CONN_PACKET_LEN] {
        let mut out = [0u8; CONN_PACKET_LEN];
        out[0] = self.event as u8;
        let ip = match self.iface_addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        out[1..17].copy_from_slice(&ip.octets());
        out[17..].copy_from_slice(&self.iface_addr.port().to_be_bytes());
        out
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < CONN_PACKET_LEN {
            return Err(UctError::protocol(format!(
                "connection packet needs {CONN_PACKET_LEN} bytes, got {}",
                src.len()
            )));
        }
        let event = ConnEvent::try_from(src[0])?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&src[1..17]);
        let ip = Ipv6Addr::from(octets).to_canonical();
        let port = u16::from_be_bytes([src[17], src[18]]);
        Ok(Self {
            event,
            iface_addr: SocketAddr::new(ip, port),
        })
    }
}
