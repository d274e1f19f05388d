use std::fmt;

/// 地址区间所属的内存类型。
///
/// `Unknown` 是“非主机内存、需要用其它方式探测”的标记：缓存命中该类型仍属有效命中，
/// 调用方据此改走驱动查询而不是当作主机内存处理。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Host,
    Cuda,
    CudaManaged,
    Rocm,
    RocmManaged,
    Unknown,
}

impl MemoryType {
    /// 全部可缓存的类型，测试与基准按此遍历。
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Host,
        MemoryType::Cuda,
        MemoryType::CudaManaged,
        MemoryType::Rocm,
        MemoryType::RocmManaged,
        MemoryType::Unknown,
    ];

    pub fn is_host(self) -> bool {
        matches!(self, MemoryType::Host)
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryType::Host => "host",
            MemoryType::Cuda => "cuda",
            MemoryType::CudaManaged => "cuda-managed",
            MemoryType::Rocm => "rocm",
            MemoryType::RocmManaged => "rocm-managed",
            MemoryType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 缓存中的一段同类型地址区间 `[address, address + size)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub address: usize,
    pub size: usize,
    pub mem_type: MemoryType,
}

impl Region {
    pub fn new(address: usize, size: usize, mem_type: MemoryType) -> Self {
        Self {
            address,
            size,
            mem_type,
        }
    }

    /// 区间右端（不含）。
    pub fn end(&self) -> usize {
        self.address + self.size
    }

    pub fn contains(&self, address: usize, size: usize) -> bool {
        match address.checked_add(size) {
            Some(end) => self.address <= address && address < self.end() && end <= self.end(),
            None => false,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#x}, {:#x}) {}",
            self.address,
            self.end(),
            self.mem_type
        )
    }
}
