use std::{io, ops::Range};

use tracing::{trace, warn};
use uct_core::{OperationKind, Result, ScopyIfaceConfig, UctError, error::ops};

use crate::{
    access::ProcessMemoryAccess,
    iov::{self, IovCursor},
};

/// 指向某个对端进程的单拷贝端点。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 数据直接在本进程缓冲与对端进程地址空间之间搬运，只经过一次内核拷贝；
/// - 操作同步完成，不需要挂起队列，也没有发送缓冲。
///
/// ## 逻辑 (How)
/// 1. 调用方 iov 列表按 `max_iov` 条目切批，总长为 0 的批次跳过；
/// 2. 每批对应一段连续的远端区间，循环调用访问原语直到该区间搬完；
///    每次调用的长度受 `seg_size` 约束（0 表示不限）；
/// 3. 每次返回后本地游标与远端地址同步前移实际搬运的字节数。
///
/// ## 契约 (What)
/// - 成功时返回搬运的总字节数，等于 iov 总长；
/// - 访问原语报错或一次调用未搬运任何字节时返回 `UctError::Io`，
///   此前已搬运的字节不回滚。
#[derive(Debug)]
pub struct ScopyEndpoint<A> {
    access: A,
    remote_pid: u32,
    max_iov: usize,
    seg_size: usize,
}

impl<A: ProcessMemoryAccess> ScopyEndpoint<A> {
    pub fn new(access: A, remote_pid: u32, config: &ScopyIfaceConfig) -> Self {
        Self {
            access,
            remote_pid,
            max_iov: config.max_iov,
            seg_size: config.seg_size,
        }
    }

    pub fn remote_pid(&self) -> u32 {
        self.remote_pid
    }

    /// 把本地 `iov` 依次写入对端 `remote_addr` 起的连续区间。
    pub fn put_zcopy(&self, iov: &[&[u8]], remote_addr: usize) -> Result<usize> {
        let lens: Vec<usize> = iov.iter().map(|buf| buf.len()).collect();
        self.drive(ops::PUT_ZCOPY, &lens, remote_addr, |entries, cursor, remote, len| {
            let local = cursor.gather(&iov[entries], len);
            self.access.write_remote(self.remote_pid, &local, remote, len)
        })
    }

    /// 从对端 `remote_addr` 起的连续区间依次读入本地 `iov`。
    pub fn get_zcopy(&self, iov: &mut [&mut [u8]], remote_addr: usize) -> Result<usize> {
        let lens: Vec<usize> = iov.iter().map(|buf| buf.len()).collect();
        self.drive(ops::GET_ZCOPY, &lens, remote_addr, |entries, cursor, remote, len| {
            let mut local = cursor.gather_mut(&mut iov[entries], len);
            self.access.read_remote(self.remote_pid, &mut local, remote, len)
        })
    }

    fn chunk_len(&self, remaining: usize) -> usize {
        match self.seg_size {
            0 => remaining,
            seg => remaining.min(seg),
        }
    }

    fn drive<F>(
        &self,
        op: OperationKind,
        lens: &[usize],
        remote_addr: usize,
        mut transfer: F,
    ) -> Result<usize>
    where
        F: FnMut(Range<usize>, &IovCursor, usize, usize) -> io::Result<usize>,
    {
        let mut remote = remote_addr;
        let mut total = 0;
        for batch in iov::batches(lens, self.max_iov) {
            let batch_lens = &lens[batch.entries.clone()];
            let mut cursor = IovCursor::default();
            let mut remaining = batch.len;
            while remaining > 0 {
                let len = self.chunk_len(remaining);
                let moved = match transfer(batch.entries.clone(), &cursor, remote, len) {
                    Ok(0) => return Err(self.fail(op, remote, len, stalled(op))),
                    Ok(moved) => moved.min(len),
                    Err(err) => return Err(self.fail(op, remote, len, err)),
                };
                cursor.advance(batch_lens, moved);
                remote += moved;
                remaining -= moved;
                total += moved;
                trace!(pid = self.remote_pid, %op, moved, remaining, "scopy transfer");
            }
        }
        Ok(total)
    }

    fn fail(&self, op: OperationKind, remote: usize, len: usize, err: io::Error) -> UctError {
        warn!(
            pid = self.remote_pid,
            remote,
            len,
            code = op.code,
            error = %err,
            "scopy transfer failed"
        );
        UctError::io(op, err)
    }
}

/// 一次调用没有搬运任何字节。
fn stalled(op: OperationKind) -> io::Error {
    let kind = if op == ops::PUT_ZCOPY {
        io::ErrorKind::WriteZero
    } else {
        io::ErrorKind::UnexpectedEof
    };
    io::Error::new(kind, "no bytes transferred")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{IoSlice, IoSliceMut};

    /// 写入从不搬运字节、读取总是被拒绝的访问原语。
    struct Stalled;

    impl ProcessMemoryAccess for Stalled {
        fn write_remote(&self, _: u32, _: &[IoSlice<'_>], _: usize, _: usize) -> io::Result<usize> {
            Ok(0)
        }

        fn read_remote(
            &self,
            _: u32,
            _: &mut [IoSliceMut<'_>],
            _: usize,
            _: usize,
        ) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn zero_progress_is_an_io_error() {
        let ep = ScopyEndpoint::new(Stalled, 42, &ScopyIfaceConfig::default());
        let err = ep.put_zcopy(&[&b"data"[..]], 0x1000).unwrap_err();
        assert_eq!(err.code(), "uct.scopy.put_zcopy_failed");

        let mut buf = [0u8; 4];
        let err = ep.get_zcopy(&mut [&mut buf[..]], 0x1000).unwrap_err();
        assert_eq!(err.code(), "uct.scopy.get_zcopy_failed");
    }

    #[test]
    fn empty_iov_moves_nothing() {
        let ep = ScopyEndpoint::new(Stalled, 42, &ScopyIfaceConfig::default());
        assert_eq!(ep.put_zcopy(&[&b""[..], &b""[..]], 0x1000).unwrap(), 0);
        assert_eq!(ep.put_zcopy(&[], 0x1000).unwrap(), 0);
    }
}
