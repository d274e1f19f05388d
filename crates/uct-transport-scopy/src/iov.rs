//! 本地 iov 列表的分批与游标。
//!
//! # 设计动机（Why）
//! - 单次跨进程拷贝系统调用最多携带 `max_iov` 个本地段，调用方给出的列表需要切成批次；
//! - 系统调用可能只搬运部分字节，游标记录“下一字节位于第几段的第几个偏移”，
//!   下一次调用从游标处重新收集本地段。
//!
//! # 契约说明（What）
//! - [`batches`] 以调用方列表中的条目数为单位切分，每批至多 `max_iov` 个条目；
//!   批内空条目不计入收集结果，总长度为 0 的批次直接跳过；
//! - [`IovCursor::gather`] / [`IovCursor::gather_mut`] 收集至多 `limit` 字节，最后一段按需截断。

use std::{
    io::{IoSlice, IoSliceMut},
    ops::Range,
};

/// 一个批次：条目下标区间与区间内的总字节数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IovBatch {
    pub entries: Range<usize>,
    pub len: usize,
}

/// 按 `max_iov` 切分条目长度列表。
pub fn batches(lens: &[usize], max_iov: usize) -> Batches<'_> {
    Batches {
        lens,
        next: 0,
        max_iov: max_iov.max(1),
    }
}

/// [`batches`] 返回的迭代器。
#[derive(Debug)]
pub struct Batches<'a> {
    lens: &'a [usize],
    next: usize,
    max_iov: usize,
}

impl Iterator for Batches<'_> {
    type Item = IovBatch;

    fn next(&mut self) -> Option<IovBatch> {
        while self.next < self.lens.len() {
            let start = self.next;
            let end = (start + self.max_iov).min(self.lens.len());
            self.next = end;
            let len = self.lens[start..end].iter().sum();
            if len > 0 {
                return Some(IovBatch {
                    entries: start..end,
                    len,
                });
            }
        }
        None
    }
}

/// 批内游标：`entry` 为条目下标（相对批次起点），`offset` 为条目内偏移。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IovCursor {
    pub entry: usize,
    pub offset: usize,
}

impl IovCursor {
    /// 前移 `n` 字节，跨过沿途的空条目。
    pub fn advance(&mut self, lens: &[usize], mut n: usize) {
        while n > 0 && self.entry < lens.len() {
            let available = lens[self.entry] - self.offset;
            if n < available {
                self.offset += n;
                return;
            }
            n -= available;
            self.entry += 1;
            self.offset = 0;
        }
    }

    pub fn gather<'b>(&self, bufs: &'b [&[u8]], limit: usize) -> Vec<IoSlice<'b>> {
        let mut slices = Vec::new();
        let mut left = limit;
        for (index, buf) in bufs.iter().enumerate().skip(self.entry) {
            if left == 0 {
                break;
            }
            let start = if index == self.entry { self.offset } else { 0 };
            let take = (buf.len() - start).min(left);
            if take > 0 {
                slices.push(IoSlice::new(&buf[start..start + take]));
                left -= take;
            }
        }
        slices
    }

    pub fn gather_mut<'b>(&self, bufs: &'b mut [&mut [u8]], limit: usize) -> Vec<IoSliceMut<'b>> {
        let mut slices = Vec::new();
        let mut left = limit;
        for (index, buf) in bufs.iter_mut().enumerate().skip(self.entry) {
            if left == 0 {
                break;
            }
            let start = if index == self.entry { self.offset } else { 0 };
            let take = (buf.len() - start).min(left);
            if take > 0 {
                slices.push(IoSliceMut::new(&mut buf[start..start + take]));
                left -= take;
            }
        }
        slices
    }
}
