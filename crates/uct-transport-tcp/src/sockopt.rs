//! 套接字创建与选项设置。
//!
//! - 监听套接字经 `socket2` 创建，以便使用配置中的 `backlog`（`mio` 的 `bind` 固定为 1024）；
//! - 已建立或正在建立的流统一在此设置 `TCP_NODELAY` 与 `SO_SNDBUF`。

use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::trace;
use uct_core::{Result, TcpIfaceConfig, UctError, error::ops};

/// 绑定并监听 `addr`，返回非阻塞的 `mio` 监听器。
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| UctError::io(ops::LISTEN, err))?;
    socket
        .set_reuse_address(true)
        .map_err(|err| UctError::io(ops::CONFIGURE, err))?;
    socket
        .set_nonblocking(true)
        .map_err(|err| UctError::io(ops::CONFIGURE, err))?;
    socket
        .bind(&addr.into())
        .map_err(|err| UctError::io(ops::LISTEN, err))?;
    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket
        .listen(backlog)
        .map_err(|err| UctError::io(ops::LISTEN, err))?;
    Ok(TcpListener::from_std(socket.into()))
}

/// 按配置设置流的套接字选项。
pub fn apply_stream_options(stream: &TcpStream, config: &TcpIfaceConfig) -> Result<()> {
    stream
        .set_nodelay(config.sockopt_nodelay)
        .map_err(|err| UctError::io(ops::CONFIGURE, err))?;
    if config.sockopt_sndbuf > 0 {
        SockRef::from(stream)
            .set_send_buffer_size(config.sockopt_sndbuf)
            .map_err(|err| UctError::io(ops::CONFIGURE, err))?;
    }
    trace!(
        nodelay = config.sockopt_nodelay,
        sndbuf = config.sockopt_sndbuf,
        "tcp socket options applied"
    );
    Ok(())
}
