use std::{
    fmt, io, mem,
    net::SocketAddr,
    ops::{BitOr, BitOrAssign},
};

use mio::{Interest, net::TcpStream};
use tracing::{debug, trace};
use uct_core::{
    AM_HEADER_LEN, AmHandler, AmHeader, AmId, AmSender, AmTrace, Endpoint, PendingQueue,
    PendingRejected, PendingRequest, Result, UctError, am::max_payload, error::ops,
};

use crate::{
    buffer::{BufferPool, BufferPools, TransportBuffer},
    io::{IoStatus, StreamIo},
};

/// 连接状态。
///
/// `InProgress → Connected | Refused`；`Refused` 为终止态。
/// 由已接受的套接字创建的端点直接从 `Connected` 开始。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    InProgress,
    Connected,
    Refused,
}

/// 端点向就绪通知机制登记的事件集合。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 转换为 `mio` 兴趣集；空集合没有对应值。
    pub fn to_interest(self) -> Option<Interest> {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let read = if self.contains(Self::READ) { "r" } else { "-" };
        let write = if self.contains(Self::WRITE) { "w" } else { "-" };
        write!(f, "{read}{write}")
    }
}

/// 单个 TCP 连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“一次非阻塞系统调用只完成一部分工作”的现实封装在端点内部：
///   发送侧用 `tx.offset` 记录已发出的字节，接收侧在 `rx` 中累积字节直到凑齐完整帧；
/// - 端点不知道就绪通知机制的存在，只通过 [`TcpEndpoint::wanted_events`] 声明自己需要什么，
///   由接口负责增量同步登记。
///
/// ## 逻辑 (How)
/// - 发送：`am_bcopy` 要求 `tx` 空闲，把帧头与负载打包进 `tx` 后立刻尝试发送；
///   未发完的部分留在 `tx` 中，`progress_tx` 在写就绪时继续发送，发完后按 FIFO 派发挂起请求；
/// - 接收：`progress_rx` 反复读取直到会阻塞（`mio` 为边沿触发，必须读空），每次读取后从
///   `rx` 前部解析所有完整帧并逐帧回调，剩余的半帧搬到缓冲起点；
/// - 致命错误：直接调用路径（`am_bcopy`）遇到发送失败时把原始错误存入 `fault`，
///   向调用方返回 [`UctError::EndpointFailed`]，由接口取出 `fault` 经失败回调上报一次。
///
/// ## 契约 (What)
/// - 零长度负载是合法的完整帧；
/// - 收到非法 AM ID 或超过缓冲容量的长度视为字节流损坏，`progress_rx` 返回 [`UctError::Protocol`]；
/// - `flush` 在 `tx` 非空或挂起队列非空时返回 [`UctError::NoResource`]，空闲时立即成功；
/// - 缓冲池耗尽时端点进入“饥饿”状态（[`TcpEndpoint::is_starved`]）：接收侧租不到块，
///   或发送缓冲空闲而挂起请求派发不出去。边沿触发下饥饿端点等不到新的就绪通知，由接口主动重试。
///
/// ## 注意事项 (Trade-offs)
/// - 端点本身不加锁：同一时刻只有一个进度调用驱动它，互斥由持有它的接口保证；
/// - 收发缓冲按需从池中租借，空闲时立即归还，空闲连接不占用缓冲块。
pub struct TcpEndpoint<S = TcpStream> {
    stream: S,
    state: ConnState,
    registered: EventMask,
    tx: TransportBuffer,
    rx: TransportBuffer,
    tx_pool: BufferPool,
    rx_pool: BufferPool,
    pending: PendingQueue,
    peer_addr: Option<SocketAddr>,
    fault: Option<UctError>,
    rx_starved: bool,
    max_payload: usize,
}

impl<S: StreamIo> TcpEndpoint<S> {
    pub fn new(stream: S, state: ConnState, pools: &BufferPools) -> Self {
        Self {
            stream,
            state,
            registered: EventMask::empty(),
            tx: TransportBuffer::new(),
            rx: TransportBuffer::new(),
            tx_pool: pools.tx.clone(),
            rx_pool: pools.rx.clone(),
            pending: PendingQueue::new(),
            peer_addr: None,
            fault: None,
            rx_starved: false,
            max_payload: max_payload(pools.tx.chunk_size()),
        }
    }

    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 已暂存但尚未发出的字节数。
    pub fn tx_remaining(&self) -> usize {
        self.tx.remaining()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 能否立即发起新的 `am_bcopy`。
    pub fn can_send(&self) -> bool {
        self.state == ConnState::Connected && self.tx.is_idle() && self.fault.is_none()
    }

    /// 是否因缓冲池耗尽而停滞，需要在没有就绪通知的情况下重试进度。
    pub fn is_starved(&self) -> bool {
        self.rx_starved || (self.can_send() && !self.pending.is_empty())
    }

    /// 当前应当登记的事件。
    ///
    /// - 建连中只关心写就绪（连接完成）；
    /// - 已连接时始终关心读就绪，仅在有未发完字节或挂起请求时关心写就绪；
    /// - 拒绝态不登记任何事件。
    pub fn wanted_events(&self) -> EventMask {
        match self.state {
            ConnState::InProgress => EventMask::WRITE,
            ConnState::Refused => EventMask::empty(),
            ConnState::Connected => {
                let mut mask = EventMask::READ;
                if !self.tx.is_idle() || !self.pending.is_empty() {
                    mask |= EventMask::WRITE;
                }
                mask
            }
        }
    }

    pub fn registered_events(&self) -> EventMask {
        self.registered
    }

    pub fn set_registered_events(&mut self, events: EventMask) {
        trace!(peer = ?self.peer_addr, from = %self.registered, to = %events, "tcp endpoint events changed");
        self.registered = events;
    }

    /// 取出直接调用路径上记录的致命错误。
    pub fn take_fault(&mut self) -> Option<UctError> {
        self.fault.take()
    }

    /// 处理非阻塞建连的结果。
    ///
    /// 成功时进入 `Connected` 并派发建连期间积累的挂起请求；失败时进入终止态 `Refused`。
    pub fn on_connect_result(&mut self, result: io::Result<()>) -> Result<usize> {
        debug_assert_eq!(self.state, ConnState::InProgress);
        match result {
            Ok(()) => {
                self.state = ConnState::Connected;
                debug!(peer = ?self.peer_addr, "tcp endpoint connected");
                self.dispatch_pending()
            }
            Err(err) => {
                self.state = ConnState::Refused;
                debug!(peer = ?self.peer_addr, error = %err, "tcp endpoint connection refused");
                if err.kind() == io::ErrorKind::ConnectionRefused {
                    Err(UctError::ConnectionRefused)
                } else {
                    Err(UctError::io(ops::CONNECT, err))
                }
            }
        }
    }

    /// 尽量发出 `tx` 中暂存的字节，返回本次发出的字节数。
    fn send_staged(&mut self) -> Result<usize> {
        let mut sent = 0;
        while !self.tx.is_idle() {
            match self.stream.send(self.tx.staged()) {
                Ok(IoStatus::Done(0)) | Ok(IoStatus::WouldBlock) => break,
                Ok(IoStatus::Done(n)) => {
                    self.tx.consume(n);
                    sent += n;
                    trace!(peer = ?self.peer_addr, len = n, remaining = self.tx.remaining(), "tcp endpoint sent");
                }
                Ok(IoStatus::Closed) => return Err(UctError::ConnectionClosed),
                Err(err) => return Err(UctError::io(ops::SEND, err)),
            }
        }
        Ok(sent)
    }

    /// `tx` 空闲期间按提交顺序派发挂起请求。
    fn dispatch_pending(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let mut pending = mem::take(&mut self.pending);
        let dispatched = pending.dispatch(self, |ep| ep.can_send());
        self.pending = pending;
        match self.fault.take() {
            Some(err) => Err(err),
            None => Ok(dispatched),
        }
    }

    /// 从 `rx` 前部解析并分发所有完整帧，返回分发的帧数。
    fn deliver_frames(&mut self, handler: &mut dyn AmHandler) -> Result<usize> {
        let mut delivered = 0;
        while let Some(header) = AmHeader::decode(self.rx.staged()) {
            let am_id = AmId::new(header.am_id).map_err(|_| {
                UctError::protocol(format!("received invalid am id {}", header.am_id))
            })?;
            let payload_len = usize::from(header.length);
            if payload_len > self.max_payload {
                return Err(UctError::protocol(format!(
                    "received payload length {payload_len} exceeds the limit {}",
                    self.max_payload
                )));
            }
            let frame_len = header.frame_len();
            let staged = self.rx.staged();
            if staged.len() < frame_len {
                break;
            }
            AmTrace::Recv.record(header.am_id, payload_len);
            handler.on_message(am_id, &staged[AM_HEADER_LEN..frame_len]);
            self.rx.consume(frame_len);
            delivered += 1;
        }
        self.rx.compact();
        Ok(delivered)
    }
}

impl<S: StreamIo> AmSender for TcpEndpoint<S> {
    fn am_bcopy(
        &mut self,
        am_id: AmId,
        pack: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<usize> {
        match self.state {
            ConnState::Connected => {}
            ConnState::InProgress => return Err(UctError::NoResource),
            ConnState::Refused => return Err(UctError::ConnectionRefused),
        }
        if self.fault.is_some() {
            return Err(UctError::EndpointFailed);
        }
        if !self.tx.is_idle() {
            return Err(UctError::NoResource);
        }

        self.tx.acquire(&self.tx_pool)?;
        let max = self.max_payload;
        let frame = self.tx.spare_mut();
        let packed = pack(&mut frame[AM_HEADER_LEN..AM_HEADER_LEN + max]);
        if packed > max {
            self.tx.reset();
            return Err(UctError::InvalidLength {
                op: ops::AM_BCOPY,
                length: packed,
                max,
            });
        }
        // `packed <= max <= u16::MAX`
        AmHeader::new(am_id, packed as u16).encode_into(frame);
        self.tx.commit(AM_HEADER_LEN + packed);
        AmTrace::Send.record(am_id.get(), packed);

        if let Err(err) = self.send_staged() {
            self.fault = Some(err);
            return Err(UctError::EndpointFailed);
        }
        Ok(packed)
    }
}

impl<S: StreamIo> Endpoint for TcpEndpoint<S> {
    fn progress_tx(&mut self) -> Result<usize> {
        if self.state != ConnState::Connected {
            return Ok(0);
        }
        if let Some(err) = self.fault.take() {
            return Err(err);
        }
        let sent = self.send_staged()?;
        let dispatched = self.dispatch_pending()?;
        Ok(usize::from(sent > 0) + dispatched)
    }

    fn progress_rx(&mut self, handler: &mut dyn AmHandler) -> Result<usize> {
        if self.state != ConnState::Connected {
            return Ok(0);
        }
        self.rx_starved = false;
        let mut delivered = 0;
        loop {
            if let Err(err) = self.rx.acquire(&self.rx_pool) {
                self.rx_starved = true;
                return Err(err);
            }
            match self.stream.recv(self.rx.spare_mut()) {
                Ok(IoStatus::Done(0)) | Ok(IoStatus::WouldBlock) => {
                    self.rx.compact();
                    return Ok(delivered);
                }
                Ok(IoStatus::Done(n)) => {
                    trace!(peer = ?self.peer_addr, len = n, staged = self.rx.length() + n, "tcp endpoint received");
                    self.rx.commit(n);
                }
                Ok(IoStatus::Closed) => {
                    debug!(peer = ?self.peer_addr, "tcp endpoint remote disconnected");
                    return Err(UctError::ConnectionClosed);
                }
                Err(err) => return Err(UctError::io(ops::RECV, err)),
            }
            delivered += self.deliver_frames(handler)?;
        }
    }

    fn pending_add(
        &mut self,
        request: Box<dyn PendingRequest>,
    ) -> core::result::Result<(), PendingRejected> {
        if self.can_send() && self.tx_pool.can_lease() {
            return Err(PendingRejected::busy(request));
        }
        self.pending.push(request);
        trace!(peer = ?self.peer_addr, queued = self.pending.len(), "tcp endpoint pending request added");
        Ok(())
    }

    fn pending_purge(&mut self, cb: &mut dyn FnMut(Box<dyn PendingRequest>)) {
        self.pending.purge(cb);
    }

    fn flush(&mut self) -> Result<()> {
        if self.fault.is_some() {
            return Err(UctError::EndpointFailed);
        }
        match self.state {
            ConnState::Refused => Err(UctError::ConnectionRefused),
            ConnState::InProgress => Err(UctError::NoResource),
            ConnState::Connected if self.tx.is_idle() && self.pending.is_empty() => Ok(()),
            ConnState::Connected => Err(UctError::NoResource),
        }
    }
}

impl<S> fmt::Debug for TcpEndpoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpEndpoint")
            .field("state", &self.state)
            .field("peer_addr", &self.peer_addr)
            .field("registered", &self.registered)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_mask_maps_to_interest() {
        assert_eq!(EventMask::empty().to_interest(), None);
        assert_eq!(EventMask::READ.to_interest(), Some(Interest::READABLE));
        let both = EventMask::READ | EventMask::WRITE;
        assert!(both.contains(EventMask::WRITE));
        assert_eq!(both.to_string(), "rw");
        assert_eq!(
            both.to_interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
    }

    #[test]
    fn in_progress_endpoint_waits_for_write_readiness() {
        let pools = BufferPools::new(64, 4);
        let mut ep = TcpEndpoint::new(io::Cursor::new(Vec::new()), ConnState::InProgress, &pools);
        assert_eq!(ep.wanted_events(), EventMask::WRITE);
        assert!(!ep.can_send());
        assert!(matches!(
            ep.am_send_bytes(AmId::new(1).unwrap(), b"x"),
            Err(UctError::NoResource)
        ));

        let refused = ep.on_connect_result(Err(io::ErrorKind::ConnectionRefused.into()));
        assert!(matches!(refused, Err(UctError::ConnectionRefused)));
        assert_eq!(ep.state(), ConnState::Refused);
        assert!(ep.wanted_events().is_empty());
        assert!(matches!(ep.flush(), Err(UctError::ConnectionRefused)));
    }
}
