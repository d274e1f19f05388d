//! 发送背压队列。
//!
//! # 设计动机（Why）
//! - 端点发送缓冲忙时，上层可以把“稍后再发”的请求挂到端点上，而不是自旋重试；
//! - 队列必须保持提交顺序：请求只在发送缓冲重新空闲后按 FIFO 依次派发，且每个请求恰好成功一次。
//!
//! # 契约说明（What）
//! - [`PendingRequest::dispatch`] 返回 [`PendingOutcome::Done`] 时请求出队；
//!   返回 [`PendingOutcome::Retry`] 时请求留在队首，本轮派发立即停止；
//! - [`PendingQueue::purge`] 按提交顺序清空队列，常用于端点拆除。

use std::{collections::VecDeque, fmt};

use crate::{error::UctError, iface::AmSender};

/// 单次派发的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingOutcome {
    /// 请求已完成（通常是 `am_bcopy` 成功），可以出队。
    Done,
    /// 资源再次不足，保留在队首等待下一次空闲。
    Retry,
}

/// 挂起在端点上的请求。
pub trait PendingRequest: Send {
    fn dispatch(&mut self, sender: &mut dyn AmSender) -> PendingOutcome;
}

impl<F> PendingRequest for F
where
    F: FnMut(&mut dyn AmSender) -> PendingOutcome + Send,
{
    fn dispatch(&mut self, sender: &mut dyn AmSender) -> PendingOutcome {
        self(sender)
    }
}

/// `pending_add` 拒绝排队时把请求原样交还给调用方。
///
/// - 原因为 [`UctError::Busy`]：端点此刻即可发送，调用方应直接调用 `am_bcopy`；
/// - 其它原因（例如句柄不存在）由具体接口给出。
pub struct PendingRejected {
    reason: UctError,
    request: Box<dyn PendingRequest>,
}

impl PendingRejected {
    pub fn new(reason: UctError, request: Box<dyn PendingRequest>) -> Self {
        Self { reason, request }
    }

    /// 端点可以直接发送。
    pub fn busy(request: Box<dyn PendingRequest>) -> Self {
        Self::new(UctError::Busy, request)
    }

    pub fn reason(&self) -> &UctError {
        &self.reason
    }

    pub fn into_request(self) -> Box<dyn PendingRequest> {
        self.request
    }
}

impl fmt::Debug for PendingRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl From<PendingRejected> for UctError {
    fn from(rejected: PendingRejected) -> Self {
        rejected.reason
    }
}

/// 端点私有的 FIFO 挂起队列。
#[derive(Default)]
pub struct PendingQueue {
    queue: VecDeque<Box<dyn PendingRequest>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Box<dyn PendingRequest>) {
        self.queue.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 在 `can_send` 成立期间按顺序派发队首请求，返回完成的请求数。
    ///
    /// # 执行逻辑（How）
    /// 1. 队列非空且 `can_send(sender)` 为真时弹出队首；
    /// 2. 调用 `dispatch`，`Done` 则继续下一轮，`Retry` 则放回队首并结束。
    pub fn dispatch<S>(&mut self, sender: &mut S, can_send: impl Fn(&S) -> bool) -> usize
    where
        S: AmSender,
    {
        let mut completed = 0;
        while !self.queue.is_empty() && can_send(&*sender) {
            let Some(mut request) = self.queue.pop_front() else {
                break;
            };
            match request.dispatch(&mut *sender) {
                PendingOutcome::Done => completed += 1,
                PendingOutcome::Retry => {
                    self.queue.push_front(request);
                    break;
                }
            }
        }
        completed
    }

    /// 清空队列，对每个请求调用一次 `cb`。
    pub fn purge(&mut self, mut cb: impl FnMut(Box<dyn PendingRequest>)) {
        while let Some(request) = self.queue.pop_front() {
            cb(request);
        }
    }
}

impl fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.queue.len())
            .finish()
    }
}
