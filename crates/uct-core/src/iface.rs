//! 能力集接口：所有传输变体共享的端点与接口契约。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 不同传输（TCP、单拷贝）不通过继承层级复用行为，而是实现同一组 trait：
//!   `query / progress_tx / progress_rx / am_bcopy / pending_add / pending_purge / flush`；
//! - 上层协议只面向 trait 编程，替换传输时无需改动调用点。
//!
//! ## 契约说明（What）
//! - [`AmSender`]：最小发送能力，挂起请求派发时只拿到这一能力，避免在派发过程中重入队列；
//! - [`Endpoint`]：单个连接的完整能力集；
//! - [`Transport`]：接口级能力，`query` 返回静态描述符，而非运行时协商结果。

use std::ops::{BitOr, BitOrAssign};

use crate::{
    am::{AmHandler, AmId},
    error::Result,
    pending::{PendingRejected, PendingRequest},
};

/// 接口能力位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IfaceFlags(u32);

impl IfaceFlags {
    pub const AM_BCOPY: Self = Self(1 << 0);
    pub const PUT_ZCOPY: Self = Self(1 << 1);
    pub const GET_ZCOPY: Self = Self(1 << 2);
    pub const PENDING: Self = Self(1 << 3);
    pub const CONNECT_TO_IFACE: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for IfaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IfaceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 线性延迟模型：`overhead + growth * n`，单位为秒。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearModel {
    pub overhead: f64,
    pub growth: f64,
}

/// 单向零拷贝操作的能力边界。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZcopyCaps {
    pub min_zcopy: usize,
    pub max_zcopy: usize,
    pub opt_zcopy_align: usize,
    pub align_mtu: usize,
    pub max_iov: usize,
}

/// 接口静态描述符。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IfaceAttr {
    pub flags: IfaceFlags,
    /// bcopy 单条消息的最大负载。
    pub max_bcopy: usize,
    pub put: ZcopyCaps,
    pub get: ZcopyCaps,
    pub device_addr_len: usize,
    pub iface_addr_len: usize,
    pub ep_addr_len: usize,
    pub latency: LinearModel,
}

/// 最小发送能力。
pub trait AmSender {
    /// 通过打包回调把负载直接写入端点的发送缓冲。
    ///
    /// # 契约说明（What）
    /// - `pack` 接收一块容量为单帧负载上限的目标切片，返回实际写入的字节数；
    /// - 返回值超过切片长度视为长度违规，返回 [`crate::UctError::InvalidLength`]，绝不截断；
    /// - 发送缓冲忙时返回 [`crate::UctError::NoResource`]，调用方可改用 `pending_add`；
    /// - 成功时返回被接受的负载字节数。
    fn am_bcopy(&mut self, am_id: AmId, pack: &mut dyn FnMut(&mut [u8]) -> usize)
    -> Result<usize>;

    /// 发送一段现成的字节切片。
    fn am_send_bytes(&mut self, am_id: AmId, payload: &[u8]) -> Result<usize> {
        self.am_bcopy(am_id, &mut |dst: &mut [u8]| {
            if payload.len() <= dst.len() {
                dst[..payload.len()].copy_from_slice(payload);
            }
            payload.len()
        })
    }
}

/// 单个连接的能力集。
pub trait Endpoint: AmSender {
    /// 在写就绪时推进发送，返回本次取得进展的操作数。
    fn progress_tx(&mut self) -> Result<usize>;

    /// 在读就绪时推进接收，每个完整帧调用一次 `handler`。
    fn progress_rx(&mut self, handler: &mut dyn AmHandler) -> Result<usize>;

    /// 发送缓冲忙时挂起请求；若当前即可发送，则以 [`PendingRejected::busy`] 交还请求。
    fn pending_add(
        &mut self,
        request: Box<dyn PendingRequest>,
    ) -> core::result::Result<(), PendingRejected>;

    /// 清空挂起队列，对每个请求调用一次取消回调。
    fn pending_purge(&mut self, cb: &mut dyn FnMut(Box<dyn PendingRequest>));

    /// 发送缓冲非空时返回 `NoResource`；空闲时立即成功，无需完成令牌。
    fn flush(&mut self) -> Result<()>;
}

/// 接口级能力。
pub trait Transport {
    fn query(&self) -> IfaceAttr;

    /// 驱动一次进度循环，返回取得进展的事件数。
    fn progress(&mut self) -> Result<usize>;
}
