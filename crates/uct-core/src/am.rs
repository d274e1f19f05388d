//! 主动消息（Active Message）帧与分发表。
//!
//! # 线上格式（What）
//! `[am_id: 1 字节][payload_length: 2 字节][payload: payload_length 字节]`，无填充，
//! 长度字段采用本机字节序；两端字节序一致由上层保证，本层不做网络序转换。

use std::fmt;

use tracing::{trace, warn};

use crate::error::{Result, UctError};

/// 主动消息 ID 上限（不含）。
pub const AM_ID_MAX: u8 = 32;

/// 帧头长度：1 字节 ID + 2 字节负载长度。
pub const AM_HEADER_LEN: usize = 3;

/// 经过范围校验的主动消息 ID。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AmId(u8);

impl AmId {
    /// 校验并构造 ID，超出 [`AM_ID_MAX`] 返回 [`UctError::InvalidAmId`]。
    pub fn new(id: u8) -> Result<Self> {
        if id < AM_ID_MAX {
            Ok(Self(id))
        } else {
            Err(UctError::InvalidAmId(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for AmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 帧头。
///
/// `am_id` 保存线上原始字节，是否合法由接收端在分发前判定，
/// 这样损坏的字节流可以被识别为协议违规而不是在解码阶段静默丢弃。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AmHeader {
    pub am_id: u8,
    pub length: u16,
}

impl AmHeader {
    pub fn new(am_id: AmId, length: u16) -> Self {
        Self {
            am_id: am_id.get(),
            length,
        }
    }

    /// 将帧头写入 `dst` 的前 [`AM_HEADER_LEN`] 字节。
    ///
    /// # Panics
    /// `dst` 短于帧头长度时 panic；调用方持有的缓冲容量恒大于帧头。
    pub fn encode_into(&self, dst: &mut [u8]) {
        dst[0] = self.am_id;
        dst[1..AM_HEADER_LEN].copy_from_slice(&self.length.to_ne_bytes());
    }

    /// 从 `src` 前缀解析帧头；字节不足时返回 `None`。
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < AM_HEADER_LEN {
            return None;
        }
        Some(Self {
            am_id: src[0],
            length: u16::from_ne_bytes([src[1], src[2]]),
        })
    }

    /// 帧在线上占用的总字节数。
    pub fn frame_len(&self) -> usize {
        AM_HEADER_LEN + usize::from(self.length)
    }
}

/// 给定缓冲容量时单帧负载的上限：`capacity - header`，并受 `u16` 长度字段约束。
pub fn max_payload(buf_size: usize) -> usize {
    buf_size
        .saturating_sub(AM_HEADER_LEN)
        .min(usize::from(u16::MAX))
}

/// 收发方向，用于帧级追踪日志。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmTrace {
    Send,
    Recv,
}

impl AmTrace {
    pub fn as_str(self) -> &'static str {
        match self {
            AmTrace::Send => "TX",
            AmTrace::Recv => "RX",
        }
    }

    /// 以 `trace` 级别记录一帧；未开启该级别时不产生格式化开销。
    pub fn record(self, am_id: u8, payload_len: usize) {
        trace!(direction = self.as_str(), am_id, len = payload_len, "AM frame");
    }
}

/// 主动消息分发回调。
///
/// 回调是同步、只产生副作用的黑盒：传输层不读取任何返回值，
/// `payload` 仅在调用期间有效，需要保留时由实现自行拷贝。
pub trait AmHandler {
    fn on_message(&mut self, am_id: AmId, payload: &[u8]);
}

impl<F> AmHandler for F
where
    F: FnMut(AmId, &[u8]),
{
    fn on_message(&mut self, am_id: AmId, payload: &[u8]) {
        self(am_id, payload)
    }
}

type BoxedHandler = Box<dyn FnMut(&[u8]) + Send>;

/// 按 ID 注册回调的分发表。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 接口层收到完整帧后只需调用 [`AmHandler::on_message`]，无需了解上层协议如何注册处理函数；
/// - 未注册的 ID 不应让进程崩溃，按默认策略记录告警后丢弃。
///
/// ## 契约 (What)
/// - `set_handler`：覆盖同一 ID 的旧回调；ID 越界返回 [`UctError::InvalidAmId`]；
/// - `clear_handler`：恢复默认丢弃行为；
/// - 回调需满足 `Send`，以便接口整体可在线程间移动。
pub struct AmHandlerTable {
    handlers: Vec<Option<BoxedHandler>>,
}

impl Default for AmHandlerTable {
    fn default() -> Self {
        Self {
            handlers: (0..AM_ID_MAX).map(|_| None).collect(),
        }
    }
}

impl AmHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler<F>(&mut self, am_id: u8, handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let id = AmId::new(am_id)?;
        self.handlers[id.index()] = Some(Box::new(handler));
        Ok(())
    }

    pub fn clear_handler(&mut self, am_id: u8) -> Result<()> {
        let id = AmId::new(am_id)?;
        self.handlers[id.index()] = None;
        Ok(())
    }

    pub fn is_registered(&self, am_id: AmId) -> bool {
        self.handlers[am_id.index()].is_some()
    }
}

impl AmHandler for AmHandlerTable {
    fn on_message(&mut self, am_id: AmId, payload: &[u8]) {
        match self.handlers[am_id.index()].as_mut() {
            Some(handler) => handler(payload),
            None => warn!(am_id = am_id.get(), len = payload.len(), "RX AM id is not registered"),
        }
    }
}

impl fmt::Debug for AmHandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect();
        f.debug_struct("AmHandlerTable")
            .field("registered", &registered)
            .finish()
    }
}
