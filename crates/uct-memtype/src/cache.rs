use std::{collections::BTreeMap, fmt};

use thiserror::Error;
use tracing::trace;

use crate::{
    region::{MemoryType, Region},
    sync::RwLock,
};

/// 查询区间未被单个区域完整覆盖。
///
/// 这不是需要记录的故障：调用方应改用其它方式（例如询问设备驱动）探测内存类型。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("address range is not covered by a single cached region")]
pub struct NotFound;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    end: usize,
    mem_type: MemoryType,
}

type RegionMap = BTreeMap<usize, Slot>;

/// 内存类型区间缓存。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 数据传输热路径需要快速回答“这段地址是主机内存还是设备内存”，每次都询问驱动代价过高；
/// - 分配器/内存事件子系统在分配、释放时更新缓存，查询方只读，因此采用读写锁：
///   查询并发进行，变更独占。
///
/// ## 逻辑 (How)
/// - 以区间起始地址为键的 `BTreeMap` 保存互不重叠的区域，值记录右端与类型；
/// - `lookup`：取起始地址不大于查询地址的最后一个区域，检查其是否完整包含查询区间；
/// - `update`：截断/拆分与新区间重叠且类型不同的区域，吸收重叠或相邻的同类型区域，最后插入合并后的区间；
/// - `remove`：把释放区间从所有重叠区域中挖去，两侧剩余部分保持原有边界与类型。
///
/// ## 契约 (What)
/// - 任意两个已存区域不相交；相邻且类型相同的区域在任何触及它们的变更后被合并为一个；
/// - 缓存做精确区间包含判断，不做页对齐，调用方传入原始区间；
/// - 查询跨越多个区域（即使类型相同也不会出现，因为相同类型必然已合并）或落在空洞中时返回 [`NotFound`]；
/// - 命中 [`MemoryType::Unknown`] 区域是有效结果，表示“非主机内存，需另行探测”。
///
/// ## 注意事项 (Trade-offs)
/// - 没有升级锁的路径：写者等待所有读者退出；缓存从不回调分配器，因此不存在锁顺序死锁；
/// - 变更操作先收集受影响的区域再修改，额外分配一个小 `Vec`，换取实现上的直观。
pub struct MemtypeCache {
    regions: RwLock<RegionMap>,
}

impl Default for MemtypeCache {
    fn default() -> Self {
        Self {
            regions: RwLock::new(BTreeMap::new()),
        }
    }
}

impl MemtypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询 `[address, address + size)` 的内存类型。
    ///
    /// `size == 0` 视为对单个地址的查询。
    pub fn lookup(&self, address: usize, size: usize) -> Result<MemoryType, NotFound> {
        let regions = self.regions.read();
        let (&start, slot) = regions.range(..=address).next_back().ok_or(NotFound)?;
        let region = Region::new(start, slot.end - start, slot.mem_type);
        if region.contains(address, size) {
            Ok(region.mem_type)
        } else {
            Err(NotFound)
        }
    }

    /// 插入或覆盖 `[address, address + size)` 的类型映射。
    pub fn update(&self, address: usize, size: usize, mem_type: MemoryType) {
        let Some(end) = range_end(address, size) else {
            return;
        };
        trace!(address, size, %mem_type, "memtype_cache: update");
        let mut regions = self.regions.write();
        insert_merged(&mut regions, address, end, mem_type);
    }

    /// 释放 `[address, address + size)`：挖去所有重叠部分，保留两侧剩余区间。
    pub fn remove(&self, address: usize, size: usize) {
        let Some(end) = range_end(address, size) else {
            return;
        };
        trace!(address, size, "memtype_cache: remove");
        let mut regions = self.regions.write();
        excise(&mut regions, address, end);
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }

    /// 当前区域数量。
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// 按地址升序返回全部区域的快照。
    pub fn regions(&self) -> Vec<Region> {
        self.regions
            .read()
            .iter()
            .map(|(&start, slot)| Region::new(start, slot.end - start, slot.mem_type))
            .collect()
    }

    pub fn clear(&self) {
        self.regions.write().clear();
    }
}

impl fmt::Debug for MemtypeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemtypeCache")
            .field("regions", &self.len())
            .finish()
    }
}

/// 空区间或地址溢出时返回 `None`，对应的变更被忽略。
fn range_end(address: usize, size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    address.checked_add(size)
}

/// 收集与 `[start, end]` 重叠或首尾相接的区域。
fn touching(regions: &RegionMap, start: usize, end: usize) -> Vec<(usize, Slot)> {
    let mut found = Vec::new();
    if let Some((&s, slot)) = regions.range(..start).next_back()
        && slot.end >= start
    {
        found.push((s, *slot));
    }
    found.extend(regions.range(start..=end).map(|(&s, slot)| (s, *slot)));
    found
}

fn insert_merged(regions: &mut RegionMap, start: usize, end: usize, mem_type: MemoryType) {
    let mut merged_start = start;
    let mut merged_end = end;

    for (s, slot) in touching(regions, start, end) {
        let overlaps = s < end && slot.end > start;
        if slot.mem_type == mem_type {
            regions.remove(&s);
            merged_start = merged_start.min(s);
            merged_end = merged_end.max(slot.end);
        } else if overlaps {
            regions.remove(&s);
            keep_remainders(regions, s, slot, start, end);
        }
    }

    regions.insert(
        merged_start,
        Slot {
            end: merged_end,
            mem_type,
        },
    );
}

fn excise(regions: &mut RegionMap, start: usize, end: usize) {
    for (s, slot) in touching(regions, start, end) {
        if s < end && slot.end > start {
            regions.remove(&s);
            keep_remainders(regions, s, slot, start, end);
        }
    }
}

/// 重新插入区域 `[s, slot.end)` 落在 `[start, end)` 两侧的部分。
fn keep_remainders(regions: &mut RegionMap, s: usize, slot: Slot, start: usize, end: usize) {
    if s < start {
        regions.insert(
            s,
            Slot {
                end: start,
                mem_type: slot.mem_type,
            },
        );
    }
    if slot.end > end {
        regions.insert(
            end,
            Slot {
                end: slot.end,
                mem_type: slot.mem_type,
            },
        );
    }
}
