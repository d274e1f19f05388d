#![doc = r#"
# uct-transport-scopy

## 设计动机（Why）
- **定位**：同一主机上的进程之间以单次内核拷贝完成 put/get，适合大块数据；
- **架构角色**：与 `uct-transport-tcp` 并列，只依赖 `uct-core` 的
  [`Transport`](uct_core::Transport) 契约与错误域。

## 核心契约（What）
- [`ProcessMemoryAccess`]：单次跨进程搬运原语，可替换为测试替身；
- [`ScopyEndpoint`]：`put_zcopy` / `get_zcopy`，按 `max_iov` 切批并处理部分搬运；
- [`ScopyIface`]：静态能力描述符与端点创建。

## 特性开关
- `cma`：Linux 上启用基于 `process_vm_readv` / `process_vm_writev` 的 `CmaAccess`。
"#]

pub mod access;
pub mod endpoint;
pub mod iface;
pub mod iov;

#[cfg(all(feature = "cma", target_os = "linux"))]
pub use access::CmaAccess;
pub use access::ProcessMemoryAccess;
pub use endpoint::ScopyEndpoint;
pub use iface::ScopyIface;
pub use iov::{IovBatch, IovCursor};
