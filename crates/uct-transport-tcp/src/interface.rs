use std::{fmt, io, net::SocketAddr, time::Duration};

use mio::{
    Events, Interest, Poll, Token,
    net::{TcpListener, TcpStream},
};
use slab::Slab;
use tracing::{debug, trace, warn};
use uct_core::{
    AmHandlerTable, AmId, AmSender, Endpoint, IfaceAttr, IfaceFlags, LinearModel,
    PendingRejected, PendingRequest, Result, TcpIfaceConfig, Transport, UctError, error::ops,
};

use crate::{
    buffer::BufferPools,
    endpoint::{ConnState, TcpEndpoint},
    sockopt,
};

/// 监听套接字的登记标签；端点标签取自 slab 下标，永远不会到达该值。
const LISTENER: Token = Token(usize::MAX);

/// 端点句柄：端点在接口注册表中的下标，同时作为就绪通知的登记标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointHandle(usize);

impl EndpointHandle {
    pub fn index(self) -> usize {
        self.0
    }

    fn token(self) -> Token {
        Token(self.0)
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}", self.0)
    }
}

type ErrorHandler = Box<dyn FnMut(EndpointHandle, &UctError) + Send>;

/// TCP 接口：持有监听套接字、就绪登记集合与全部端点。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把操作系统的就绪通知翻译为对具体端点 `progress_rx` / `progress_tx` 的调用；
/// - 端点以 `slab` 下标寻址，登记标签就是下标本身：端点在批量事件处理中途被拆除后，
///   同批次里指向它的剩余事件只会查不到条目，而不会触及已释放的内存。
///
/// ## 逻辑 (How)
/// - `progress` 以零超时轮询一次，最多处理 `max_poll` 个事件；监听标签触发时接受全部排队连接，
///   端点标签触发时先处理读、再处理写，最后按 [`TcpEndpoint::wanted_events`] 增量同步登记；
/// - 缓冲池耗尽而停滞的端点（[`TcpEndpoint::is_starved`]）记入饥饿列表，每次进度调用处理完事件后
///   按加入顺序重试一遍；其它端点在同一轮里归还的缓冲块由此被停滞端点接手，套接字中已到达的字节不会滞留；
/// - 任一进度函数返回致命错误时：记录告警、调用失败回调、注销登记、从注册表移除、清空挂起队列，
///   最后释放端点（连同其持有的收发缓冲）。
///
/// ## 契约 (What)
/// - 所有修改端点集合的方法都取 `&mut self`：跨线程使用时由调用方把接口放进一把互斥锁，
///   这把锁即端点集合的临界区；
/// - 致命错误经失败回调恰好上报一次，此后句柄失效，对其调用返回 [`UctError::UnknownEndpoint`]；
/// - `query` 返回静态描述符。
///
/// ## 注意事项 (Trade-offs)
/// - `mio` 为边沿触发，端点在一次就绪中读到会阻塞为止；单个高速对端可能在一次进度调用中占用较长时间；
/// - 句柄下标会被 slab 复用，调用方不应在收到失败回调后继续持有旧句柄。
pub struct TcpInterface {
    config: TcpIfaceConfig,
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    endpoints: Slab<TcpEndpoint>,
    pools: BufferPools,
    am_handlers: AmHandlerTable,
    error_handler: Option<ErrorHandler>,
    accepted: Vec<EndpointHandle>,
    starved: Vec<EndpointHandle>,
}

impl TcpInterface {
    pub fn new(config: TcpIfaceConfig) -> Result<Self> {
        config.validate()?;
        let poll = Poll::new().map_err(|err| UctError::io(ops::POLL, err))?;
        Ok(Self {
            events: Events::with_capacity(config.max_poll),
            pools: BufferPools::new(config.buf_size, config.max_buffers),
            config,
            poll,
            listener: None,
            endpoints: Slab::new(),
            am_handlers: AmHandlerTable::new(),
            error_handler: None,
            accepted: Vec::new(),
            starved: Vec::new(),
        })
    }

    pub fn config(&self) -> &TcpIfaceConfig {
        &self.config
    }

    pub fn buffer_pools(&self) -> &BufferPools {
        &self.pools
    }

    /// 绑定并开始监听，返回实际监听地址（端口 0 时由系统分配）。
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.listener.is_some() {
            return Err(UctError::config("interface is already listening"));
        }
        let mut listener = sockopt::bind_listener(addr, self.config.backlog)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(|err| UctError::io(ops::REGISTER, err))?;
        let local = listener
            .local_addr()
            .map_err(|err| UctError::io(ops::LISTEN, err))?;
        debug!(%local, backlog = self.config.backlog, "tcp interface listening");
        self.listener = Some(listener);
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// 发起非阻塞建连，端点以 `InProgress` 状态加入注册表。
    pub fn connect(&mut self, addr: SocketAddr) -> Result<EndpointHandle> {
        let stream = TcpStream::connect(addr).map_err(|err| UctError::io(ops::CONNECT, err))?;
        sockopt::apply_stream_options(&stream, &self.config)?;
        let endpoint =
            TcpEndpoint::new(stream, ConnState::InProgress, &self.pools).with_peer_addr(addr);
        let handle = self.insert(endpoint)?;
        debug!(endpoint = %handle, peer = %addr, "tcp endpoint created");
        Ok(handle)
    }

    /// 取走自上次调用以来被动接受的端点句柄。
    pub fn take_accepted(&mut self) -> Vec<EndpointHandle> {
        std::mem::take(&mut self.accepted)
    }

    /// 非阻塞地驱动一次进度。
    pub fn progress(&mut self) -> Result<usize> {
        self.progress_timeout(Some(Duration::ZERO))
    }

    /// 最多等待 `timeout` 后驱动一次进度；`None` 表示一直等到有事件。
    pub fn progress_timeout(&mut self, timeout: Option<Duration>) -> Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(UctError::io(ops::POLL, err)),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                let writable = event.is_writable() || event.is_write_closed() || event.is_error();
                (event.token(), readable, writable)
            })
            .collect();

        let mut progressed = 0;
        for (token, readable, writable) in ready {
            if token == LISTENER {
                progressed += self.accept_pending();
            } else {
                progressed += self.progress_endpoint(EndpointHandle(token.0), readable, writable);
            }
        }
        progressed += self.retry_starved();
        Ok(progressed)
    }

    pub fn am_bcopy(
        &mut self,
        handle: EndpointHandle,
        am_id: AmId,
        pack: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<usize> {
        let endpoint = self
            .endpoints
            .get_mut(handle.index())
            .ok_or(UctError::UnknownEndpoint(handle.index()))?;
        let result = endpoint.am_bcopy(am_id, pack);
        if let Some(fault) = endpoint.take_fault() {
            self.fail_endpoint(handle, fault);
            return result;
        }
        self.sync_or_fail(handle);
        result
    }

    pub fn am_send_bytes(
        &mut self,
        handle: EndpointHandle,
        am_id: AmId,
        payload: &[u8],
    ) -> Result<usize> {
        self.am_bcopy(handle, am_id, &mut |dst: &mut [u8]| {
            if payload.len() <= dst.len() {
                dst[..payload.len()].copy_from_slice(payload);
            }
            payload.len()
        })
    }

    pub fn pending_add(
        &mut self,
        handle: EndpointHandle,
        request: Box<dyn PendingRequest>,
    ) -> core::result::Result<(), PendingRejected> {
        let Some(endpoint) = self.endpoints.get_mut(handle.index()) else {
            return Err(PendingRejected::new(
                UctError::UnknownEndpoint(handle.index()),
                request,
            ));
        };
        endpoint.pending_add(request)?;
        self.sync_or_fail(handle);
        self.note_starved(handle);
        Ok(())
    }

    pub fn pending_purge(
        &mut self,
        handle: EndpointHandle,
        cb: &mut dyn FnMut(Box<dyn PendingRequest>),
    ) -> Result<()> {
        let endpoint = self.endpoint_mut(handle)?;
        endpoint.pending_purge(cb);
        self.sync_or_fail(handle);
        Ok(())
    }

    pub fn flush(&mut self, handle: EndpointHandle) -> Result<()> {
        self.endpoint_mut(handle)?.flush()
    }

    /// 主动关闭端点；挂起请求被丢弃。
    pub fn destroy_endpoint(&mut self, handle: EndpointHandle) -> Result<()> {
        if self.teardown(handle) {
            Ok(())
        } else {
            Err(UctError::UnknownEndpoint(handle.index()))
        }
    }

    pub fn endpoint_state(&self, handle: EndpointHandle) -> Option<ConnState> {
        self.endpoints.get(handle.index()).map(TcpEndpoint::state)
    }

    pub fn peer_addr(&self, handle: EndpointHandle) -> Option<SocketAddr> {
        self.endpoints
            .get(handle.index())
            .and_then(TcpEndpoint::peer_addr)
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// 全部端点已暂存但尚未发出的字节总数。
    pub fn outstanding(&self) -> usize {
        self.endpoints
            .iter()
            .map(|(_, endpoint)| endpoint.tx_remaining())
            .sum()
    }

    pub fn set_am_handler<F>(&mut self, am_id: u8, handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.am_handlers.set_handler(am_id, handler)
    }

    /// 设置端点失败回调；每个失败的端点恰好回调一次。
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(EndpointHandle, &UctError) + Send + 'static,
    {
        self.error_handler = Some(Box::new(handler));
    }

    fn endpoint_mut(&mut self, handle: EndpointHandle) -> Result<&mut TcpEndpoint> {
        self.endpoints
            .get_mut(handle.index())
            .ok_or(UctError::UnknownEndpoint(handle.index()))
    }

    fn insert(&mut self, mut endpoint: TcpEndpoint) -> Result<EndpointHandle> {
        let wanted = endpoint.wanted_events();
        let interest = wanted
            .to_interest()
            .ok_or_else(|| UctError::protocol("new endpoint wants no readiness events"))?;
        let entry = self.endpoints.vacant_entry();
        let handle = EndpointHandle(entry.key());
        self.poll
            .registry()
            .register(endpoint.stream_mut(), handle.token(), interest)
            .map_err(|err| UctError::io(ops::REGISTER, err))?;
        endpoint.set_registered_events(wanted);
        entry.insert(endpoint);
        Ok(handle)
    }

    fn accept_pending(&mut self) -> usize {
        let mut accepted = 0;
        loop {
            let Some(listener) = self.listener.as_ref() else {
                break;
            };
            let (stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(code = ops::ACCEPT.code, error = %err, "tcp accept failed");
                    break;
                }
            };
            if let Err(err) = sockopt::apply_stream_options(&stream, &self.config) {
                warn!(%peer, code = err.code(), error = %err, "dropping accepted connection");
                continue;
            }
            let endpoint =
                TcpEndpoint::new(stream, ConnState::Connected, &self.pools).with_peer_addr(peer);
            match self.insert(endpoint) {
                Ok(handle) => {
                    debug!(endpoint = %handle, %peer, "tcp endpoint accepted");
                    self.accepted.push(handle);
                    accepted += 1;
                }
                Err(err) => {
                    warn!(%peer, code = err.code(), error = %err, "dropping accepted connection");
                }
            }
        }
        accepted
    }

    fn progress_endpoint(&mut self, handle: EndpointHandle, readable: bool, writable: bool) -> usize {
        let index = handle.index();
        let Some(endpoint) = self.endpoints.get_mut(index) else {
            trace!(endpoint = %handle, "readiness event for a destroyed endpoint");
            return 0;
        };

        let mut progressed = 0;
        if endpoint.state() == ConnState::InProgress {
            if !writable {
                return 0;
            }
            let Some(result) = probe_connect(endpoint.stream()) else {
                return 0;
            };
            match endpoint.on_connect_result(result) {
                Ok(dispatched) => progressed += 1 + dispatched,
                Err(err) => {
                    self.fail_endpoint(handle, err);
                    return progressed;
                }
            }
        }

        if readable {
            let endpoint = &mut self.endpoints[index];
            match endpoint.progress_rx(&mut self.am_handlers) {
                Ok(delivered) => progressed += delivered,
                Err(err) if !err.category().is_fatal() => {
                    trace!(endpoint = %handle, code = err.code(), "tcp rx deferred");
                }
                Err(err) => {
                    self.fail_endpoint(handle, err);
                    return progressed;
                }
            }
        }

        if writable {
            let endpoint = &mut self.endpoints[index];
            match endpoint.progress_tx() {
                Ok(done) => progressed += done,
                Err(err) if !err.category().is_fatal() => {
                    trace!(endpoint = %handle, code = err.code(), "tcp tx deferred");
                }
                Err(err) => {
                    self.fail_endpoint(handle, err);
                    return progressed;
                }
            }
        }

        self.sync_or_fail(handle);
        self.note_starved(handle);
        progressed
    }

    fn note_starved(&mut self, handle: EndpointHandle) {
        let starved = self
            .endpoints
            .get(handle.index())
            .is_some_and(TcpEndpoint::is_starved);
        if starved && !self.starved.contains(&handle) {
            self.starved.push(handle);
        }
    }

    /// 不等就绪通知，直接再推进一遍停滞端点的收发；仍然停滞的端点重新入列。
    fn retry_starved(&mut self) -> usize {
        let mut progressed = 0;
        for handle in std::mem::take(&mut self.starved) {
            trace!(endpoint = %handle, "tcp endpoint starvation retry");
            progressed += self.progress_endpoint(handle, true, true);
        }
        progressed
    }

    /// 按端点当前需要的事件增量更新登记，只有集合变化时才触发系统调用。
    fn sync_events(&mut self, handle: EndpointHandle) -> Result<()> {
        let Some(endpoint) = self.endpoints.get_mut(handle.index()) else {
            return Ok(());
        };
        let wanted = endpoint.wanted_events();
        if wanted == endpoint.registered_events() {
            return Ok(());
        }
        let registry = self.poll.registry();
        let updated = match wanted.to_interest() {
            Some(interest) => registry.reregister(endpoint.stream_mut(), handle.token(), interest),
            None => registry.deregister(endpoint.stream_mut()),
        };
        updated.map_err(|err| UctError::io(ops::REGISTER, err))?;
        endpoint.set_registered_events(wanted);
        Ok(())
    }

    fn sync_or_fail(&mut self, handle: EndpointHandle) {
        if let Err(err) = self.sync_events(handle) {
            self.fail_endpoint(handle, err);
        }
    }

    fn fail_endpoint(&mut self, handle: EndpointHandle, err: UctError) {
        warn!(endpoint = %handle, code = err.code(), error = %err, "tcp endpoint failed");
        if let Some(handler) = self.error_handler.as_mut() {
            handler(handle, &err);
        }
        self.teardown(handle);
    }

    /// 拆除顺序：注销登记 → 移出注册表 → 清空挂起队列 → 释放端点与缓冲。
    fn teardown(&mut self, handle: EndpointHandle) -> bool {
        let Some(endpoint) = self.endpoints.get_mut(handle.index()) else {
            return false;
        };
        if !endpoint.registered_events().is_empty()
            && let Err(err) = self.poll.registry().deregister(endpoint.stream_mut())
        {
            trace!(endpoint = %handle, error = %err, "tcp endpoint deregister failed");
        }
        self.starved.retain(|starved| *starved != handle);
        let mut endpoint = self.endpoints.remove(handle.index());
        let mut purged = 0usize;
        endpoint.pending_purge(&mut |_| purged += 1);
        debug!(
            endpoint = %handle,
            peer = ?endpoint.peer_addr(),
            purged,
            "tcp endpoint destroyed"
        );
        drop(endpoint);
        true
    }
}

/// 检查非阻塞建连是否完成；`None` 表示仍在进行中。
fn probe_connect(stream: &TcpStream) -> Option<io::Result<()>> {
    match stream.take_error() {
        Ok(Some(err)) | Err(err) => return Some(Err(err)),
        Ok(None) => {}
    }
    match stream.peer_addr() {
        Ok(_) => Some(Ok(())),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => None,
        Err(err) => Some(Err(err)),
    }
}

impl Transport for TcpInterface {
    /// 只报告缓冲拷贝主动消息：TCP 不提供远端内存访问，`PUT_ZCOPY` / `GET_ZCOPY`
    /// 由单拷贝传输 `uct-transport-scopy` 的接口报告。
    fn query(&self) -> IfaceAttr {
        IfaceAttr {
            flags: IfaceFlags::AM_BCOPY | IfaceFlags::PENDING | IfaceFlags::CONNECT_TO_IFACE,
            max_bcopy: self.config.max_payload(),
            device_addr_len: 16,
            iface_addr_len: 2,
            ep_addr_len: 0,
            latency: LinearModel {
                overhead: self.config.latency_overhead_ns * 1e-9,
                growth: 0.0,
            },
            ..IfaceAttr::default()
        }
    }

    fn progress(&mut self) -> Result<usize> {
        TcpInterface::progress(self)
    }
}

impl fmt::Debug for TcpInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpInterface")
            .field("local_addr", &self.local_addr())
            .field("endpoints", &self.endpoints.len())
            .field("am_handlers", &self.am_handlers)
            .finish()
    }
}
