use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;
use spin::Mutex;
use uct_core::{Result, UctError};

/// 固定块大小的收发缓冲池。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 端点只在有数据暂存时才持有发送/接收缓冲，空闲端点不占内存；
/// - 缓冲池由接口持有并以句柄形式分发给每个端点，其生命周期与接口绑定，而非进程全局。
///
/// ## 逻辑 (How)
/// - `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用，其次在上限内新建；
/// - 块数达到 `max_buffers` 且自由链表为空时返回 [`UctError::NoResource`]，并计入失败次数；
/// - [`PooledBuf`] 在 `Drop` 时把底层 `BytesMut` 放回自由链表。
///
/// ## 契约 (What)
/// - 所有块的长度恒为 `chunk_size`，内容在复用时不清零；调用方只读取自己写入的部分；
/// - `Clone` 只复制句柄，多个端点共享同一池。
///
/// ## 注意事项 (Trade-offs)
/// - 自旋锁持有区间只有一次 `Vec` 的 push/pop，单线程进度循环下几乎无争用；
/// - 不提供按需扩容：帧长上限由块大小决定，超出的负载在打包阶段即被拒绝。
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    chunk_size: usize,
    max_buffers: usize,
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    allocated: AtomicUsize,
    active_leases: AtomicUsize,
    failed_acquisitions: AtomicU64,
}

/// 缓冲池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub chunk_size: usize,
    /// 已创建（含借出与空闲）的块数。
    pub allocated: usize,
    pub active_leases: usize,
    pub free: usize,
    pub failed_acquisitions: u64,
}

impl BufferPool {
    pub fn new(chunk_size: usize, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                chunk_size,
                max_buffers,
                free_list: Mutex::new(Vec::new()),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// 租借一个块；池已满时返回 [`UctError::NoResource`]。
    pub fn acquire(&self) -> Result<PooledBuf> {
        let inner = &self.inner;
        let reused = inner.free_list.lock().pop();
        let buf = match reused {
            Some(buf) => buf,
            None => {
                let reserved = inner.metrics.allocated.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |current| (current < inner.max_buffers).then_some(current + 1),
                );
                if reserved.is_err() {
                    inner
                        .metrics
                        .failed_acquisitions
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(UctError::NoResource);
                }
                BytesMut::zeroed(inner.chunk_size)
            }
        };
        inner.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        Ok(PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(inner),
        })
    }

    /// 此刻能否租借到一个块：自由链表非空，或已创建的块数尚未达到上限。
    pub fn can_lease(&self) -> bool {
        let inner = &self.inner;
        !inner.free_list.lock().is_empty()
            || inner.metrics.allocated.load(Ordering::Acquire) < inner.max_buffers
    }

    /// 释放自由链表中的全部块，返回释放的块数。
    pub fn shrink_to_fit(&self) -> usize {
        let mut list = self.inner.free_list.lock();
        let released = list.len();
        list.clear();
        self.inner
            .metrics
            .allocated
            .fetch_sub(released, Ordering::AcqRel);
        released
    }

    pub fn stats(&self) -> PoolStats {
        let metrics = &self.inner.metrics;
        PoolStats {
            chunk_size: self.inner.chunk_size,
            allocated: metrics.allocated.load(Ordering::Acquire),
            active_leases: metrics.active_leases.load(Ordering::Relaxed),
            free: self.inner.free_list.lock().len(),
            failed_acquisitions: metrics.failed_acquisitions.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolInner {
    fn reclaim(&self, buf: BytesMut) {
        self.metrics.active_leases.fetch_sub(1, Ordering::Relaxed);
        self.free_list.lock().push(buf);
    }
}

/// 接口持有的收发两个方向的缓冲池句柄，构造端点时逐一分发。
#[derive(Clone, Debug)]
pub struct BufferPools {
    pub tx: BufferPool,
    pub rx: BufferPool,
}

impl BufferPools {
    pub fn new(buf_size: usize, max_buffers: usize) -> Self {
        Self {
            tx: BufferPool::new(buf_size, max_buffers),
            rx: BufferPool::new(buf_size, max_buffers),
        }
    }
}

/// 从 [`BufferPool`] 借出的定长块，`Drop` 时自动归还。
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.reclaim(buf);
        }
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("capacity", &self.len())
            .finish()
    }
}

/// 端点的收发上下文：定长存储 + `offset/length` 游标。
///
/// # 契约 (What)
/// - 恒有 `offset <= length <= capacity`；`length - offset` 为尚未发送/尚未消费的字节；
/// - `length == 0` 即空闲，此时不持有存储块；
/// - 存储在首次 [`TransportBuffer::acquire`] 时租借，回到空闲时归还。
#[derive(Default)]
pub struct TransportBuffer {
    storage: Option<PooledBuf>,
    length: usize,
    offset: usize,
}

impl TransportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.length == 0
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, |buf| buf.len())
    }

    /// 尚未发送或尚未消费的字节数。
    pub fn remaining(&self) -> usize {
        self.length - self.offset
    }

    /// 确保持有存储块。
    pub fn acquire(&mut self, pool: &BufferPool) -> Result<()> {
        if self.storage.is_none() {
            self.storage = Some(pool.acquire()?);
        }
        Ok(())
    }

    /// `[offset, length)` 区间。
    pub fn staged(&self) -> &[u8] {
        match &self.storage {
            Some(buf) => &buf[self.offset..self.length],
            None => &[],
        }
    }

    /// `[length, capacity)` 区间，供打包或接收写入。
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let length = self.length;
        match &mut self.storage {
            Some(buf) => &mut buf[length..],
            None => &mut [],
        }
    }

    /// 标记 `n` 字节已写入 `spare_mut` 的前部。
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.length + n <= self.capacity());
        self.length += n;
    }

    /// 标记 `n` 字节已发送或已消费；全部消费后回到空闲并归还存储。
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.offset += n;
        if self.offset == self.length {
            self.reset();
        }
    }

    /// 把未消费的尾部搬到存储起点，腾出已消费字节占用的容量。
    pub fn compact(&mut self) {
        if self.offset == 0 {
            if self.length == 0 {
                self.reset();
            }
            return;
        }
        let (offset, length) = (self.offset, self.length);
        if let Some(buf) = &mut self.storage {
            buf.copy_within(offset..length, 0);
        }
        self.length -= offset;
        self.offset = 0;
        if self.length == 0 {
            self.reset();
        }
    }

    /// 回到空闲并归还存储块。
    pub fn reset(&mut self) {
        self.length = 0;
        self.offset = 0;
        self.storage = None;
    }
}

impl fmt::Debug for TransportBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuffer")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("capacity", &self.capacity())
            .finish()
    }
}
