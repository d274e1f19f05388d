//! 内存事件适配层。
//!
//! 分配器子系统在分配或释放非主机内存时发布事件，缓存订阅这些事件以保持与真实地址空间一致。
//! 事件来源（驱动钩子、拦截库等）不在本 crate 范围内；这里只定义事件形状与缓存的响应。

use tracing::debug;

use crate::{cache::MemtypeCache, region::MemoryType};

/// 分配器发布的内存事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryEvent {
    Alloc {
        address: usize,
        size: usize,
        mem_type: MemoryType,
    },
    Free {
        address: usize,
        size: usize,
    },
}

impl MemoryEvent {
    pub fn address(&self) -> usize {
        match *self {
            MemoryEvent::Alloc { address, .. } | MemoryEvent::Free { address, .. } => address,
        }
    }

    pub fn size(&self) -> usize {
        match *self {
            MemoryEvent::Alloc { size, .. } | MemoryEvent::Free { size, .. } => size,
        }
    }
}

impl MemtypeCache {
    /// 将一次内存事件应用到缓存。
    ///
    /// - `Alloc`：以事件携带的类型覆盖区间；
    /// - `Free`：挖去区间，相邻区域的其余部分保持不变。
    pub fn handle_event(&self, event: MemoryEvent) {
        debug!(?event, "memtype_cache: memory event");
        match event {
            MemoryEvent::Alloc {
                address,
                size,
                mem_type,
            } => self.update(address, size, mem_type),
            MemoryEvent::Free { address, size } => self.remove(address, size),
        }
    }
}
