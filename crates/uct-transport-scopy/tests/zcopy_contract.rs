//! `zcopy_contract` 集成测试：以内存中的“远端进程”替身验证单拷贝端点的分批与部分搬运契约。
//!
//! # 测试目标（Why）
//! - 真实的跨进程拷贝需要第二个进程与 ptrace 权限，替身让每次调用搬运多少字节完全可控；
//! - 覆盖：每批本地段数不超过 `max_iov`、空段与空批被跳过、部分搬运后游标正确续传、
//!   `seg_size` 限制单次调用长度、访问失败以 `UctError::Io` 返回。

use std::{
    io::{self, IoSlice, IoSliceMut},
    sync::{Arc, Mutex},
};

use proptest::prelude::*;
use uct_core::{IfaceFlags, ScopyIfaceConfig, Transport};
use uct_transport_scopy::{ProcessMemoryAccess, ScopyIface};

const REMOTE_PID: u32 = 4242;

/// 单次调用的记录：本地段数与请求长度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Call {
    segments: usize,
    len: usize,
}

/// 远端地址空间替身：地址即 `memory` 下标，每次调用至多搬运 `per_call` 字节。
#[derive(Clone, Debug)]
struct FakeProcess {
    memory: Arc<Mutex<Vec<u8>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    per_call: usize,
    fail_at: Option<usize>,
}

impl FakeProcess {
    fn new(size: usize, per_call: usize) -> Self {
        Self {
            memory: Arc::new(Mutex::new(vec![0; size])),
            calls: Arc::default(),
            per_call,
            fail_at: None,
        }
    }

    fn record(&self, pid: u32, segments: usize, len: usize) -> io::Result<usize> {
        assert_eq!(pid, REMOTE_PID);
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call { segments, len });
        if self.fail_at == Some(calls.len()) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(len.min(self.per_call))
    }
}

impl ProcessMemoryAccess for FakeProcess {
    fn write_remote(
        &self,
        pid: u32,
        local: &[IoSlice<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize> {
        let moved = self.record(pid, local.len(), len)?;
        let flat: Vec<u8> = local.iter().flat_map(|s| s.iter().copied()).collect();
        assert!(flat.len() >= len, "本地段总长不足请求长度");
        self.memory.lock().unwrap()[remote_addr..remote_addr + moved].copy_from_slice(&flat[..moved]);
        Ok(moved)
    }

    fn read_remote(
        &self,
        pid: u32,
        local: &mut [IoSliceMut<'_>],
        remote_addr: usize,
        len: usize,
    ) -> io::Result<usize> {
        let moved = self.record(pid, local.len(), len)?;
        let memory = self.memory.lock().unwrap();
        let mut src = &memory[remote_addr..remote_addr + moved];
        for slice in local.iter_mut() {
            if src.is_empty() {
                break;
            }
            let n = slice.len().min(src.len());
            slice[..n].copy_from_slice(&src[..n]);
            src = &src[n..];
        }
        Ok(moved)
    }
}

fn iface(access: FakeProcess, max_iov: usize, seg_size: usize) -> ScopyIface<FakeProcess> {
    ScopyIface::new(ScopyIfaceConfig { max_iov, seg_size }, access).unwrap()
}

#[test]
fn put_skips_empty_segments_and_respects_max_iov() {
    let remote = FakeProcess::new(64, usize::MAX);
    let ep = iface(remote.clone(), 2, 0).create_endpoint(REMOTE_PID);
    let iov: [&[u8]; 6] = [b"ab", b"", b"", b"", b"cde", b"f"];

    assert_eq!(ep.put_zcopy(&iov, 8).unwrap(), 6);

    assert_eq!(&remote.memory.lock().unwrap()[8..14], b"abcdef");
    // 条目 [2,3] 全空，该批被跳过。
    assert_eq!(
        *remote.calls.lock().unwrap(),
        vec![Call { segments: 1, len: 2 }, Call { segments: 2, len: 4 }]
    );
}

#[test]
fn partial_moves_resume_from_cursor() {
    let remote = FakeProcess::new(32, 3);
    let ep = iface(remote.clone(), 16, 0).create_endpoint(REMOTE_PID);
    let iov: [&[u8]; 3] = [b"hello", b" ", b"world"];

    assert_eq!(ep.put_zcopy(&iov, 0).unwrap(), 11);
    assert_eq!(&remote.memory.lock().unwrap()[..11], b"hello world");

    let lens: Vec<usize> = remote.calls.lock().unwrap().iter().map(|c| c.len).collect();
    assert_eq!(lens, vec![11, 8, 5, 2]);

    let mut a = [0u8; 4];
    let mut b = [0u8; 7];
    let moved = ep.get_zcopy(&mut [&mut a[..], &mut b[..]], 0).unwrap();
    assert_eq!(moved, 11);
    assert_eq!(&a, b"hell");
    assert_eq!(&b, b"o world");
}

#[test]
fn seg_size_caps_each_call() {
    let remote = FakeProcess::new(64, usize::MAX);
    let ep = iface(remote.clone(), 4, 5).create_endpoint(REMOTE_PID);
    let payload = [7u8; 23];

    assert_eq!(ep.put_zcopy(&[&payload[..]], 1).unwrap(), 23);
    let calls = remote.calls.lock().unwrap();
    assert!(calls.iter().all(|call| call.len <= 5));
    assert_eq!(calls.len(), 5);
    assert_eq!(&remote.memory.lock().unwrap()[1..24], &payload[..]);
}

#[test]
fn access_failure_surfaces_as_io_error() {
    let mut remote = FakeProcess::new(64, 4);
    remote.fail_at = Some(2);
    let ep = iface(remote.clone(), 16, 0).create_endpoint(REMOTE_PID);

    let err = ep.put_zcopy(&[&[1u8; 10][..]], 0).unwrap_err();
    assert_eq!(err.code(), "uct.scopy.put_zcopy_failed");
    assert!(err.category().is_fatal());
    assert_eq!(remote.calls.lock().unwrap().len(), 2, "失败后不再重试");
}

#[test]
fn query_reports_static_descriptor() {
    let iface = iface(FakeProcess::new(0, 1), 16, 0);
    let attr = iface.query();
    assert!(attr.flags.contains(
        IfaceFlags::GET_ZCOPY | IfaceFlags::PUT_ZCOPY | IfaceFlags::PENDING | IfaceFlags::CONNECT_TO_IFACE
    ));
    assert!(!attr.flags.contains(IfaceFlags::AM_BCOPY));
    assert_eq!(attr.put.max_zcopy, usize::MAX);
    assert_eq!(attr.get.opt_zcopy_align, 1);
    assert_eq!(attr.get.max_iov, 16);
    assert!((attr.latency.overhead - 80e-9).abs() < 1e-15);
    assert_eq!(attr.latency.growth, 0.0);
    assert_eq!(iface.iface_addr(), std::process::id());
}

#[test]
fn invalid_config_is_rejected() {
    let err = ScopyIface::new(
        ScopyIfaceConfig {
            max_iov: 0,
            seg_size: 0,
        },
        FakeProcess::new(0, 1),
    )
    .unwrap_err();
    assert_eq!(err.code(), "uct.config_invalid");
}

proptest! {
    /// 任意分段、任意单次搬运上限：远端映像等于本地段按序拼接，且每次调用的段数不超过 `max_iov`。
    #[test]
    fn remote_image_matches_concatenation(
        segments in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..20), 0..24),
        max_iov in 1usize..6,
        per_call in 1usize..40,
        seg_size in 0usize..16,
    ) {
        let expected: Vec<u8> = segments.concat();
        let remote = FakeProcess::new(expected.len() + 8, per_call);
        let ep = iface(remote.clone(), max_iov, seg_size).create_endpoint(REMOTE_PID);
        let iov: Vec<&[u8]> = segments.iter().map(Vec::as_slice).collect();

        prop_assert_eq!(ep.put_zcopy(&iov, 4).unwrap(), expected.len());
        prop_assert_eq!(&remote.memory.lock().unwrap()[4..4 + expected.len()], &expected[..]);
        for call in remote.calls.lock().unwrap().iter() {
            prop_assert!(call.segments <= max_iov);
            prop_assert!(call.segments > 0);
            if seg_size > 0 {
                prop_assert!(call.len <= seg_size);
            }
        }
    }
}

#[cfg(all(feature = "cma", target_os = "linux"))]
#[test]
fn cma_copies_within_own_process() {
    let iface = ScopyIface::cma(ScopyIfaceConfig::default()).unwrap();
    let ep = iface.create_endpoint(iface.iface_addr());
    let mut target = vec![0u8; 16];
    let addr = target.as_mut_ptr() as usize;

    assert_eq!(ep.put_zcopy(&[&b"single"[..], &b"-copy"[..]], addr).unwrap(), 11);
    assert_eq!(&target[..11], b"single-copy");

    let mut back = [0u8; 11];
    assert_eq!(ep.get_zcopy(&mut [&mut back[..]], addr).unwrap(), 11);
    assert_eq!(&back, b"single-copy");
}
