//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为所有传输实现（TCP、单拷贝）与内存类型缓存提供统一的错误域，调用方只需匹配一种类型；
//! - 每个变体都携带稳定错误码（`uct.<语义>`），便于日志聚合与告警规则按码值收敛；
//! - 通过 [`ErrorCategory`] 把错误显式归入“瞬时 / 资源耗尽 / 长度违规 / 连接致命 / 不变量破坏”五类，
//!   上层据此决定重试、排队（pending）还是拆除端点。
//!
//! ## 设计要求（What）
//! - 错误类型基于 `thiserror::Error` 派生，兼容 `std::error::Error` 生态；
//! - 瞬时条件（`WouldBlock`、部分 IO）**不是**错误，不会以 [`UctError`] 形式出现在进度函数的返回值中；
//! - 底层 `io::Error` 保留在 `source()` 链路上，不做字符串化丢失信息。

use std::{borrow::Cow, fmt, io};

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

/// 跨传输共享的操作表。
pub mod ops {
    use super::OperationKind;

    pub const LISTEN: OperationKind = OperationKind {
        code: "uct.tcp.listen_failed",
        message: "tcp listen",
    };
    pub const ACCEPT: OperationKind = OperationKind {
        code: "uct.tcp.accept_failed",
        message: "tcp accept",
    };
    pub const CONNECT: OperationKind = OperationKind {
        code: "uct.tcp.connect_failed",
        message: "tcp connect",
    };
    pub const SEND: OperationKind = OperationKind {
        code: "uct.tcp.send_failed",
        message: "tcp send",
    };
    pub const RECV: OperationKind = OperationKind {
        code: "uct.tcp.recv_failed",
        message: "tcp recv",
    };
    pub const CONFIGURE: OperationKind = OperationKind {
        code: "uct.tcp.configure_failed",
        message: "tcp configure",
    };
    pub const REGISTER: OperationKind = OperationKind {
        code: "uct.tcp.register_failed",
        message: "readiness registration",
    };
    pub const POLL: OperationKind = OperationKind {
        code: "uct.tcp.poll_failed",
        message: "readiness poll",
    };
    pub const AM_BCOPY: OperationKind = OperationKind {
        code: "uct.am.bcopy_failed",
        message: "am_bcopy",
    };
    pub const PUT_ZCOPY: OperationKind = OperationKind {
        code: "uct.scopy.put_zcopy_failed",
        message: "put_zcopy",
    };
    pub const GET_ZCOPY: OperationKind = OperationKind {
        code: "uct.scopy.get_zcopy_failed",
        message: "get_zcopy",
    };
}

/// 错误分类，驱动调用方的处置策略。
///
/// # 契约说明（What）
/// - `Transient`：稍后在下一次就绪事件或进度调用中重试即可；
/// - `ResourceExhausted`：发送缓冲忙或缓冲池耗尽，调用方可选择 `pending_add` 排队；
/// - `LengthViolation`：负载超过容量，同步返回给直接调用方，绝不截断；
/// - `ConnectionFatal`：端点进入终止态，经由失败回调通知且仅通知一次；
/// - `InvariantViolation`：调用方编程错误或字节流损坏；
/// - `Configuration`：配置值不满足约束，只在构造阶段出现。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Transient,
    ResourceExhausted,
    LengthViolation,
    ConnectionFatal,
    InvariantViolation,
    Configuration,
}

impl ErrorCategory {
    /// 是否意味着端点已不可继续使用。
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCategory::ConnectionFatal | ErrorCategory::InvariantViolation
        )
    }
}

/// 传输层统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把资源耗尽、长度违规、连接致命等语义区分开，使 `am_bcopy` 的调用方能够
///   在“稍后重试 / 排队 / 放弃”之间做出确定的选择，而不是解析字符串。
/// - **契约 (What)**：
///   - 所有变体满足 `Send + Sync + 'static`；
///   - [`code`](Self::code) 返回稳定错误码，[`category`](Self::category) 返回处置分类；
///   - `Io` 变体通过 `source()` 暴露原始 `io::Error`。
/// - **设计权衡 (Trade-offs)**：`Busy` 在 `pending_add` 中表示“无需排队、可直接发送”，严格来说并非故障，
///   但与 `NoResource` 对称地放在同一枚举里，能让调用方用一个 `match` 处理全部分支。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UctError {
    /// 发送缓冲忙或缓冲池暂时没有空闲块。
    #[error("no resources available, retry later")]
    NoResource,

    /// 端点当前可以直接发送，排队请求被拒绝。
    #[error("endpoint is able to send, request was not queued")]
    Busy,

    /// 负载长度超过允许的上限。
    #[error("{op}: length {length} exceeds the limit {max}")]
    InvalidLength {
        op: OperationKind,
        length: usize,
        max: usize,
    },

    /// 主动消息 ID 超出 [`crate::am::AM_ID_MAX`]。
    #[error("active message id {0} is out of range")]
    InvalidAmId(u8),

    /// 对端拒绝连接，端点已进入终止态。
    #[error("connection refused by peer")]
    ConnectionRefused,

    /// 端点此前已遭遇致命错误，正在等待拆除；原始错误经失败回调单独上报。
    #[error("endpoint has failed and awaits teardown")]
    EndpointFailed,

    /// 对端有序关闭连接。
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// 非 `WouldBlock` 的底层 IO 错误。
    #[error("{op}: {source}")]
    Io {
        op: OperationKind,
        #[source]
        source: io::Error,
    },

    /// 接收到的字节流无法解析（长度越界、非法 AM ID 等）。
    #[error("protocol violation: {reason}")]
    Protocol { reason: Cow<'static, str> },

    /// 句柄在端点注册表中不存在（已拆除或从未创建）。
    #[error("unknown endpoint handle {0}")]
    UnknownEndpoint(usize),

    /// 配置值不满足约束。
    #[error("invalid configuration: {reason}")]
    Config { reason: Cow<'static, str> },
}

impl UctError {
    /// 包装底层 IO 错误。
    pub fn io(op: OperationKind, source: io::Error) -> Self {
        UctError::Io { op, source }
    }

    /// 构造协议违规错误。
    pub fn protocol(reason: impl Into<Cow<'static, str>>) -> Self {
        UctError::Protocol {
            reason: reason.into(),
        }
    }

    /// 构造配置错误。
    pub fn config(reason: impl Into<Cow<'static, str>>) -> Self {
        UctError::Config {
            reason: reason.into(),
        }
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            UctError::NoResource => "uct.no_resource",
            UctError::Busy => "uct.busy",
            UctError::InvalidLength { .. } => "uct.invalid_length",
            UctError::InvalidAmId(_) => "uct.invalid_am_id",
            UctError::ConnectionRefused => "uct.connection_refused",
            UctError::ConnectionClosed => "uct.connection_closed",
            UctError::EndpointFailed => "uct.endpoint_failed",
            UctError::Io { op, .. } => op.code,
            UctError::Protocol { .. } => "uct.protocol_violation",
            UctError::UnknownEndpoint(_) => "uct.unknown_endpoint",
            UctError::Config { .. } => "uct.config_invalid",
        }
    }

    /// 获取处置分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            UctError::NoResource => ErrorCategory::ResourceExhausted,
            UctError::Busy => ErrorCategory::Transient,
            UctError::InvalidLength { .. } => ErrorCategory::LengthViolation,
            UctError::ConnectionRefused
            | UctError::ConnectionClosed
            | UctError::EndpointFailed => ErrorCategory::ConnectionFatal,
            UctError::Io { source, .. } => categorize_io_error(source),
            UctError::InvalidAmId(_)
            | UctError::Protocol { .. }
            | UctError::UnknownEndpoint(_) => ErrorCategory::InvariantViolation,
            UctError::Config { .. } => ErrorCategory::Configuration,
        }
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => ErrorCategory::Transient,
        _ => ErrorCategory::ConnectionFatal,
    }
}

/// 传输层统一返回值别名。
pub type Result<T, E = UctError> = core::result::Result<T, E>;
