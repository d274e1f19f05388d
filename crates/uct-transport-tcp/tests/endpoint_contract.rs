//! `endpoint_contract` 集成测试：用脚本化字节流驱动 `TcpEndpoint`，验证部分收发、帧重组与背压契约。
//!
//! # 测试目标（Why）
//! - 真实套接字无法稳定复现“帧头被拆成两次到达”“发送只写出一半”等时序，
//!   脚本化替身流让每次 `read`/`write` 的结果完全可控；
//! - 替身流实现 `Read + Write`，走的是与 `mio::net::TcpStream` 相同的 `StreamIo` 通用实现。
//!
//! # 结构安排（How）
//! - 重组：任意切分点下帧数与内容不变（属性测试），帧头内部与负载内部的切分单独覆盖；
//! - 发送：部分发送登记写就绪、写就绪推进直至空闲、超长负载被拒绝；
//! - 背压：发送缓冲忙时排队的 S1/S2/S3 在空闲后按提交顺序各派发一次；
//!   缓冲池耗尽时排队同样被接受，端点标记为饥饿直到块归还；
//! - 失败：对端关闭、非法 AM ID、不可能的长度均以错误返回给进度调用方。

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex},
};

use proptest::prelude::*;
use uct_core::{
    AM_HEADER_LEN, AmHeader, AmId, AmSender, Endpoint, PendingOutcome, UctError,
};
use uct_transport_tcp::{BufferPools, ConnState, EventMask, TcpEndpoint};

const BUF_SIZE: usize = 256;

/// 脚本化替身流。
///
/// - `inbound` 中的每个分片对应一次 `read` 的结果，分片耗尽后返回会阻塞，`closed` 时返回 0；
/// - `write_budget` 为会阻塞之前还能写入的字节数，写入内容追加到 `written`。
#[derive(Default)]
struct ScriptedStream {
    inbound: VecDeque<Vec<u8>>,
    closed: bool,
    written: Vec<u8>,
    write_budget: usize,
    write_error: Option<io::ErrorKind>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if self.closed => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(kind.into());
        }
        if self.write_budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.write_budget);
        self.written.extend_from_slice(&buf[..n]);
        self.write_budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn endpoint(write_budget: usize) -> TcpEndpoint<ScriptedStream> {
    let pools = BufferPools::new(BUF_SIZE, 8);
    let stream = ScriptedStream {
        write_budget,
        ..ScriptedStream::default()
    };
    TcpEndpoint::new(stream, ConnState::Connected, &pools)
}

fn frame(am_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![0u8; AM_HEADER_LEN + payload.len()];
    AmHeader::new(AmId::new(am_id).unwrap(), payload.len() as u16).encode_into(&mut wire);
    wire[AM_HEADER_LEN..].copy_from_slice(payload);
    wire
}

type Received = Vec<(u8, Vec<u8>)>;

fn recorder() -> (Arc<Mutex<Received>>, impl FnMut(AmId, &[u8])) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = move |am_id: AmId, payload: &[u8]| {
        sink.lock().unwrap().push((am_id.get(), payload.to_vec()));
    };
    (seen, handler)
}

/// 帧头被拆在两次读取之间、负载被拆在三次读取之间，仍然只分发一次。
#[test]
fn split_inside_header_and_payload() {
    let mut ep = endpoint(0);
    let wire = frame(5, b"hello world");
    let (seen, mut handler) = recorder();

    for chunk in [&wire[..1], &wire[1..4], &wire[4..9], &wire[9..]] {
        ep.stream_mut().inbound.push_back(chunk.to_vec());
        ep.progress_rx(&mut handler).expect("部分到达不是错误");
    }

    assert_eq!(*seen.lock().unwrap(), vec![(5, b"hello world".to_vec())]);
}

/// 零长度负载是完整帧，立即分发；同一次读取中的多个帧逐一分发。
#[test]
fn zero_length_frames_and_batched_frames() {
    let mut ep = endpoint(0);
    let mut wire = frame(1, b"");
    wire.extend(frame(2, b"ab"));
    wire.extend(frame(3, b""));
    ep.stream_mut().inbound.push_back(wire);
    let (seen, mut handler) = recorder();

    assert_eq!(ep.progress_rx(&mut handler).unwrap(), 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(1, vec![]), (2, b"ab".to_vec()), (3, vec![])]
    );
}

/// 已消费的字节被压缩掉，剩余容量始终足以容纳下一帧。
#[test]
fn compaction_keeps_capacity_available() {
    let mut ep = endpoint(0);
    let big = vec![7u8; BUF_SIZE - AM_HEADER_LEN];
    let (seen, mut handler) = recorder();

    for _ in 0..4 {
        let wire = frame(4, &big);
        let (head, tail) = wire.split_at(100);
        ep.stream_mut().inbound.push_back(head.to_vec());
        ep.progress_rx(&mut handler).unwrap();
        ep.stream_mut().inbound.push_back(tail.to_vec());
        ep.progress_rx(&mut handler).unwrap();
    }

    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[test]
fn peer_close_is_reported_after_delivering_complete_frames() {
    let mut ep = endpoint(0);
    ep.stream_mut().inbound.push_back(frame(9, b"last"));
    ep.stream_mut().closed = true;
    let (seen, mut handler) = recorder();

    assert!(matches!(
        ep.progress_rx(&mut handler),
        Err(UctError::ConnectionClosed)
    ));
    assert_eq!(*seen.lock().unwrap(), vec![(9, b"last".to_vec())]);
}

#[test]
fn corrupted_stream_is_a_protocol_violation() {
    let (_, mut handler) = recorder();

    let mut bad_id = endpoint(0);
    bad_id.stream_mut().inbound.push_back(vec![200, 0, 0]);
    let err = bad_id.progress_rx(&mut handler).unwrap_err();
    assert_eq!(err.code(), "uct.protocol_violation");

    let mut bad_len = endpoint(0);
    let mut header = [0u8; AM_HEADER_LEN];
    AmHeader::new(AmId::new(1).unwrap(), u16::MAX).encode_into(&mut header);
    bad_len.stream_mut().inbound.push_back(header.to_vec());
    let err = bad_len.progress_rx(&mut handler).unwrap_err();
    assert!(err.category().is_fatal());
}

/// 部分发送：剩余字节留在发送缓冲，端点要求写就绪；写就绪推进后回到空闲。
#[test]
fn partial_send_registers_write_interest_until_drained() {
    let mut ep = endpoint(4);
    let id = AmId::new(2).unwrap();

    assert_eq!(ep.am_send_bytes(id, b"0123456789").unwrap(), 10);
    assert_eq!(ep.tx_remaining(), AM_HEADER_LEN + 10 - 4);
    assert_eq!(ep.wanted_events(), EventMask::READ | EventMask::WRITE);
    assert!(matches!(ep.flush(), Err(UctError::NoResource)));
    assert!(matches!(
        ep.am_send_bytes(id, b"x"),
        Err(UctError::NoResource)
    ));

    ep.stream_mut().write_budget = usize::MAX;
    assert_eq!(ep.progress_tx().unwrap(), 1);
    assert_eq!(ep.tx_remaining(), 0);
    assert_eq!(ep.wanted_events(), EventMask::READ);
    assert!(ep.flush().is_ok());
    assert_eq!(ep.stream().written, frame(2, b"0123456789"));
}

#[test]
fn oversized_payload_is_rejected_without_truncation() {
    let mut ep = endpoint(usize::MAX);
    let payload = vec![1u8; BUF_SIZE];
    let err = ep
        .am_send_bytes(AmId::new(0).unwrap(), &payload)
        .unwrap_err();
    assert!(matches!(
        err,
        UctError::InvalidLength { length, max, .. }
            if length == BUF_SIZE && max == BUF_SIZE - AM_HEADER_LEN
    ));
    assert!(ep.stream().written.is_empty());
    assert!(ep.can_send(), "拒绝后发送缓冲应保持空闲");
}

/// 发送失败后直接调用方得到 `EndpointFailed`，原始错误留给接口经失败回调上报。
#[test]
fn send_failure_is_recorded_as_fault() {
    let mut ep = endpoint(usize::MAX);
    ep.stream_mut().write_error = Some(io::ErrorKind::ConnectionReset);

    let err = ep
        .am_send_bytes(AmId::new(1).unwrap(), b"boom")
        .unwrap_err();
    assert!(matches!(err, UctError::EndpointFailed));
    let fault = ep.take_fault().expect("原始错误应被记录");
    assert_eq!(fault.code(), "uct.tcp.send_failed");
    assert!(fault.category().is_fatal());
}

fn queued_send(id: u8, log: Arc<Mutex<Vec<u8>>>) -> Box<dyn uct_core::PendingRequest> {
    Box::new(move |sender: &mut dyn AmSender| {
        match sender.am_send_bytes(AmId::new(id).unwrap(), &[id]) {
            Ok(_) => {
                log.lock().unwrap().push(id);
                PendingOutcome::Done
            }
            Err(_) => PendingOutcome::Retry,
        }
    })
}

/// S1/S2/S3 在发送缓冲忙时排队，空闲后按提交顺序各派发一次。
#[test]
fn pending_sends_dispatch_in_submission_order() {
    let mut ep = endpoint(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    assert!(
        ep.pending_add(queued_send(1, Arc::clone(&log))).is_err(),
        "空闲端点应拒绝排队"
    );

    ep.am_send_bytes(AmId::new(0).unwrap(), b"blocker").unwrap();
    for id in 1..=3 {
        ep.pending_add(queued_send(id, Arc::clone(&log)))
            .expect("发送缓冲忙时应接受排队");
    }
    assert_eq!(ep.pending_len(), 3);
    assert!(ep.wanted_events().contains(EventMask::WRITE));
    assert!(log.lock().unwrap().is_empty(), "空闲之前不得派发");

    // 每轮写就绪只放行有限字节，请求的帧会跨越多轮部分发送。
    let mut rounds = 0;
    while ep.pending_len() > 0 || ep.tx_remaining() > 0 {
        ep.stream_mut().write_budget = AM_HEADER_LEN + 7;
        ep.progress_tx().unwrap();
        rounds += 1;
        assert!(rounds < 16, "挂起请求未能派发完毕");
    }

    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    let mut expected = frame(0, b"blocker");
    for id in 1..=3 {
        expected.extend(frame(id, &[id]));
    }
    assert_eq!(ep.stream().written, expected);
    assert!(ep.flush().is_ok());
}

#[test]
fn purge_cancels_every_queued_request() {
    let mut ep = endpoint(0);
    ep.am_send_bytes(AmId::new(0).unwrap(), b"stuck").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=3 {
        ep.pending_add(queued_send(id, Arc::clone(&log))).unwrap();
    }

    let mut cancelled = 0;
    ep.pending_purge(&mut |_| cancelled += 1);
    assert_eq!(cancelled, 3);
    assert_eq!(ep.pending_len(), 0);
    assert!(log.lock().unwrap().is_empty());
}

/// 发送缓冲池被另一个端点占满：`am_bcopy` 返回 `NoResource`，排队被接受；块归还后请求派发。
#[test]
fn exhausted_tx_pool_accepts_pending_requests() {
    let pools = BufferPools::new(BUF_SIZE, 1);
    let mut holder = TcpEndpoint::new(ScriptedStream::default(), ConnState::Connected, &pools);
    let stream = ScriptedStream {
        write_budget: usize::MAX,
        ..ScriptedStream::default()
    };
    let mut waiter = TcpEndpoint::new(stream, ConnState::Connected, &pools);
    let log = Arc::new(Mutex::new(Vec::new()));

    holder.am_send_bytes(AmId::new(0).unwrap(), b"held").unwrap();
    assert!(waiter.can_send());
    assert!(matches!(
        waiter.am_send_bytes(AmId::new(1).unwrap(), b"x"),
        Err(UctError::NoResource)
    ));
    waiter
        .pending_add(queued_send(1, Arc::clone(&log)))
        .expect("缓冲池耗尽时应接受排队");
    assert!(waiter.is_starved());
    assert_eq!(waiter.progress_tx().unwrap(), 0);
    assert!(log.lock().unwrap().is_empty());

    holder.stream_mut().write_budget = usize::MAX;
    holder.progress_tx().unwrap();
    assert_eq!(waiter.progress_tx().unwrap(), 1);
    assert_eq!(*log.lock().unwrap(), vec![1]);
    assert!(!waiter.is_starved());
    assert_eq!(waiter.stream().written, frame(1, &[1]));
}

/// 接收缓冲池耗尽时端点标记为饥饿，字节留在流中；块归还后下一次进度照常分发。
#[test]
fn exhausted_rx_pool_marks_endpoint_starved() {
    let pools = BufferPools::new(BUF_SIZE, 1);
    let lease = pools.rx.acquire().unwrap();
    let mut ep = TcpEndpoint::new(ScriptedStream::default(), ConnState::Connected, &pools);
    ep.stream_mut().inbound.push_back(frame(3, b"late"));
    let (seen, mut handler) = recorder();

    assert!(matches!(
        ep.progress_rx(&mut handler),
        Err(UctError::NoResource)
    ));
    assert!(ep.is_starved());
    assert_eq!(ep.stream().inbound.len(), 1);

    drop(lease);
    assert_eq!(ep.progress_rx(&mut handler).unwrap(), 1);
    assert!(!ep.is_starved());
    assert_eq!(*seen.lock().unwrap(), vec![(3, b"late".to_vec())]);
}

fn frames_strategy() -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec(
        (
            0u8..uct_core::AM_ID_MAX,
            prop::collection::vec(any::<u8>(), 0..(BUF_SIZE - AM_HEADER_LEN)),
        ),
        1..12,
    )
}

proptest! {
    /// 任意切分点：K 个帧恰好产生 K 次回调，内容与顺序一致。
    #[test]
    fn reassembly_is_independent_of_chunking(
        frames in frames_strategy(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..24),
    ) {
        let wire: Vec<u8> = frames.iter().flat_map(|(id, payload)| frame(*id, payload)).collect();
        let mut points: Vec<usize> = cuts.iter().map(|idx| idx.index(wire.len() + 1)).collect();
        points.push(0);
        points.push(wire.len());
        points.sort_unstable();
        points.dedup();

        let mut ep = endpoint(0);
        let (seen, mut handler) = recorder();
        for pair in points.windows(2) {
            ep.stream_mut().inbound.push_back(wire[pair[0]..pair[1]].to_vec());
            ep.progress_rx(&mut handler).expect("合法字节流不应报错");
        }

        prop_assert_eq!(&*seen.lock().unwrap(), &frames);
    }
}
