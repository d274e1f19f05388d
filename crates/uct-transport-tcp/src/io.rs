//! 非阻塞收发契约。
//!
//! # 设计动机（Why）
//! - 端点的部分收发逻辑只关心四种结果：传输了 `n` 字节、会阻塞、对端有序关闭、真正的 IO 错误；
//! - 把这四种结果收敛为 [`IoStatus`] 之后，端点既能驱动真实的 `mio::net::TcpStream`，
//!   也能在测试中驱动按脚本分片投递字节的替身流。
//!
//! # 契约说明（What）
//! - `WouldBlock` 映射为 [`IoStatus::WouldBlock`]，不是错误；
//! - `Interrupted` 原地重试同一次调用：边沿触发下不会再有就绪通知补上这次收发；
//! - 对非空缓冲返回 0 字节视为对端关闭；
//! - 其余错误原样返回，由调用方包装为 `UctError::Io`。

use std::io::{self, Read, Write};

/// 一次非阻塞收发的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    Done(usize),
    WouldBlock,
    Closed,
}

/// 端点依赖的非阻塞字节流。
pub trait StreamIo {
    fn send(&mut self, buf: &[u8]) -> io::Result<IoStatus>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<IoStatus>;
}

impl<T> StreamIo for T
where
    T: Read + Write,
{
    fn send(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        loop {
            match self.write(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => return classify(result, buf.len()),
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        let requested = buf.len();
        loop {
            match self.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => return classify(result, requested),
            }
        }
    }
}

fn classify(result: io::Result<usize>, requested: usize) -> io::Result<IoStatus> {
    match result {
        Ok(0) if requested > 0 => Ok(IoStatus::Closed),
        Ok(n) => Ok(IoStatus::Done(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
        Err(err) => Err(err),
    }
}
