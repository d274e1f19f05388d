#![doc = r#"
# uct-transport-tcp

## 设计动机（Why）
- **定位**：基于 `mio` 就绪通知的非阻塞 TCP 传输，实现主动消息的 bcopy 发送、
  字节流重组与挂起请求背压；
- **架构角色**：实现 `uct-core` 的 [`Endpoint`](uct_core::Endpoint) 与
  [`Transport`](uct_core::Transport) 能力集，不依赖任何异步运行时，进度完全由调用方驱动。

## 核心契约（What）
- [`TcpInterface`]：监听、建连、接受连接、就绪事件分派与端点拆除；
- [`TcpEndpoint`]：单连接状态机，处理部分发送、部分接收与帧重组；
- [`BufferPool`]：接口持有、按方向分发给端点的定长缓冲池；
- [`StreamIo`]：端点依赖的非阻塞收发契约，对任意 `Read + Write` 流自动实现；
- [`ConnPacket`]：监听侧交换接口地址的握手报文编解码。

## 实现策略（How）
- 端点存放于 `slab` 注册表，注册表下标即 `mio::Token`；
- 写就绪只在端点有未发完字节或挂起请求时登记，登记变化按需增量同步。

## 风险与考量（Trade-offs）
- 帧长度字段为本机字节序，跨字节序部署需要上层转换；
- 接口本身不是 `Sync`，跨线程共享时由调用方加锁。
"#]

pub mod buffer;
pub mod conn;
pub mod endpoint;
pub mod interface;
pub mod io;
pub mod sockopt;

pub use buffer::{BufferPool, BufferPools, PoolStats, PooledBuf, TransportBuffer};
pub use conn::{CONN_PACKET_LEN, ConnEvent, ConnPacket};
pub use endpoint::{ConnState, EventMask, TcpEndpoint};
pub use interface::{EndpointHandle, TcpInterface};
pub use io::{IoStatus, StreamIo};
