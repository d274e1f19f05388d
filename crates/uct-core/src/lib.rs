#![doc = r#"
# uct-core

## 设计动机（Why）
- **定位**：传输层各实现（TCP、单拷贝）与内存类型缓存共享的契约 crate，
  只定义类型与 trait，不持有任何套接字或线程。
- **架构角色**：`uct-transport-tcp`、`uct-transport-scopy` 仅依赖本 crate，
  彼此之间没有直接依赖，替换或新增传输变体不影响其它实现。

## 核心契约（What）
- [`error`]：统一错误域 [`UctError`] 与处置分类 [`ErrorCategory`]；
- [`am`]：主动消息帧头的线上格式与按 ID 分发表；
- [`pending`]：端点私有的 FIFO 背压队列；
- [`iface`]：能力集 trait（`AmSender`/`Endpoint`/`Transport`）与静态接口描述符；
- [`config`]：可由 TOML 反序列化并校验的接口配置。

## 风险与考量（Trade-offs）
- 线上长度字段使用本机字节序，跨字节序部署需由上层转换；
- 分发回调被视为同步黑盒，回调内部阻塞会直接拖慢进度循环。
"#]

pub mod am;
pub mod config;
pub mod error;
pub mod iface;
pub mod pending;

pub use am::{AM_HEADER_LEN, AM_ID_MAX, AmHandler, AmHandlerTable, AmHeader, AmId, AmTrace};
pub use config::{ScopyIfaceConfig, TcpIfaceConfig};
pub use error::{ErrorCategory, OperationKind, Result, UctError};
pub use iface::{AmSender, Endpoint, IfaceAttr, IfaceFlags, LinearModel, Transport, ZcopyCaps};
pub use pending::{PendingOutcome, PendingRejected, PendingQueue, PendingRequest};
