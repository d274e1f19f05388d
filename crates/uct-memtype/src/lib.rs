#![doc = r#"
# uct-memtype

## 设计动机（Why）
- 数据搬运前需要判断一段地址属于主机内存还是某种设备内存，直接询问驱动代价高昂；
- 本 crate 维护一份由分配事件驱动的区间缓存，查询路径只需一次有序表定位。

## 核心契约（What）
- [`MemtypeCache`]：并发安全的区间缓存，`lookup` 只读并发，`update`/`remove` 独占；
- [`MemoryType`]：区间类型，`Unknown` 表示“非主机内存，需另行探测”；
- [`MemoryEvent`]：分配器发布的 Alloc/Free 事件，经 [`MemtypeCache::handle_event`] 应用。

## 风险与考量（Trade-offs）
- 读写锁为自旋实现，持锁区间只包含有序表操作，不调用任何外部回调；
- 缓存按原始地址区间精确判断包含关系，不做页对齐。
"#]

mod sync;

pub mod cache;
pub mod event;
pub mod region;

pub use cache::{MemtypeCache, NotFound};
pub use event::MemoryEvent;
pub use region::{MemoryType, Region};
