//! 跨进程内存访问原语。
//!
//! [`ProcessMemoryAccess`] 只描述“一段远端地址区间 + 一组本地段”的单次搬运，
//! 返回实际搬运的字节数，可能少于请求长度。批次切分与重试由端点负责。
//!
//! 开启 `cma` 特性后，Linux 上提供基于 `process_vm_readv` / `process_vm_writev` 的 [`CmaAccess`]。

use std::{
    io::{self, IoSlice, IoSliceMut},
    sync::Arc,
};

/// 单次跨进程搬运。
///
/// - `remote_addr..remote_addr + len` 为目标进程中的远端区间；
/// - 本地段的总长度不小于 `len`；
/// - 返回值不超过 `len`，0 表示没有搬运任何字节。
pub trait ProcessMemoryAccess {
    fn write_remote(
        &self,
        pid: u32,
        local: &[IoSlice<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize>;

    fn read_remote(
        &self,
        pid: u32,
        local: &mut [IoSliceMut<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize>;
}

impl<T: ProcessMemoryAccess + ?Sized> ProcessMemoryAccess for Arc<T> {
    fn write_remote(
        &self,
        pid: u32,
        local: &[IoSlice<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize> {
        (**self).write_remote(pid, local, remote_addr, len)
    }

    fn read_remote(
        &self,
        pid: u32,
        local: &mut [IoSliceMut<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize> {
        (**self).read_remote(pid, local, remote_addr, len)
    }
}

#[cfg(all(feature = "cma", target_os = "linux"))]
pub use cma::CmaAccess;

#[cfg(all(feature = "cma", target_os = "linux"))]
mod cma {
    use std::io::{self, IoSlice, IoSliceMut};

    use nix::{
        sys::uio::{RemoteIoVec, process_vm_readv, process_vm_writev},
        unistd::Pid,
    };

    use super::ProcessMemoryAccess;

    /// Linux Cross Memory Attach。
    ///
    /// 目标进程需要允许调用方对其执行 ptrace 级别的访问（同一用户且未被 Yama 等策略限制）。
    #[derive(Clone, Copy, Debug, Default)]
    pub struct CmaAccess;

    fn to_pid(pid: u32) -> io::Result<Pid> {
        i32::try_from(pid)
            .map(Pid::from_raw)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))
    }

    impl ProcessMemoryAccess for CmaAccess {
        fn write_remote(
            &self,
            pid: u32,
            local: &[IoSlice<'_>],
            remote_addr: usize,
            len: usize,
        ) -> io::Result<usize> {
            let remote = [RemoteIoVec {
                base: remote_addr,
                len,
            }];
            process_vm_writev(to_pid(pid)?, local, &remote).map_err(io::Error::from)
        }

        fn read_remote(
            &self,
            pid: u32,
            local: &mut [IoSliceMut<'_>],
            remote_addr: usize,
            len: usize,
        ) -> io::Result<usize> {
            let remote = [RemoteIoVec {
                base: remote_addr,
                len,
            }];
            process_vm_readv(to_pid(pid)?, local, &remote).map_err(io::Error::from)
        }
    }
}
