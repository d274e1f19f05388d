//! 传输配置。
//!
//! # 设计动机（Why）
//! - 缓冲大小、套接字选项、监听 backlog、单次轮询事件数等都是外部输入，传输核心只消费已校验的值；
//! - 结构体通过 `serde` 反序列化，未出现的字段取默认值，便于在 TOML 片段里只覆盖少数选项。
//!
//! # 契约说明（What）
//! - [`TcpIfaceConfig::from_toml_str`] 解析后立即执行 [`TcpIfaceConfig::validate`]；
//! - 校验失败返回 [`UctError::Config`]，不会产生部分生效的配置。

use serde::Deserialize;

use crate::{
    am::AM_HEADER_LEN,
    error::{Result, UctError},
};

/// 单次 `epoll_wait` 的默认事件上限。
pub const DEFAULT_MAX_POLL: usize = 32;

/// TCP 接口配置。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpIfaceConfig {
    /// 收发缓冲容量（含帧头），即 bcopy 的最大帧长。
    pub buf_size: usize,
    /// 每个方向缓冲池的块数上限。
    pub max_buffers: usize,
    /// 监听队列长度。
    pub backlog: u32,
    /// 单次进度调用最多处理的就绪事件数。
    pub max_poll: usize,
    /// 是否设置 `TCP_NODELAY`。
    pub sockopt_nodelay: bool,
    /// `SO_SNDBUF`，0 表示保持系统默认值。
    pub sockopt_sndbuf: usize,
    /// 接口延迟估计（纳秒），填入 `query` 描述符。
    pub latency_overhead_ns: f64,
}

impl Default for TcpIfaceConfig {
    fn default() -> Self {
        Self {
            buf_size: 8192,
            max_buffers: 1024,
            backlog: 100,
            max_poll: DEFAULT_MAX_POLL,
            sockopt_nodelay: true,
            sockopt_sndbuf: 64 * 1024,
            latency_overhead_ns: 10_000.0,
        }
    }
}

impl TcpIfaceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| UctError::config(format!("failed to parse tcp config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buf_size <= AM_HEADER_LEN {
            return Err(UctError::config(format!(
                "buf_size {} must exceed the active message header ({AM_HEADER_LEN} bytes)",
                self.buf_size
            )));
        }
        if self.buf_size - AM_HEADER_LEN > usize::from(u16::MAX) {
            return Err(UctError::config(format!(
                "buf_size {} leaves a payload larger than the 16-bit length field",
                self.buf_size
            )));
        }
        if self.max_buffers == 0 {
            return Err(UctError::config("max_buffers must be positive"));
        }
        if self.max_poll == 0 {
            return Err(UctError::config("max_poll must be positive"));
        }
        Ok(())
    }

    /// 单帧负载上限。
    pub fn max_payload(&self) -> usize {
        crate::am::max_payload(self.buf_size)
    }
}

/// 单拷贝接口配置。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopyIfaceConfig {
    /// 单次系统调用携带的本地 iov 数量上限。
    pub max_iov: usize,
    /// 零拷贝请求的分段大小，0 表示不分段。
    pub seg_size: usize,
}

impl Default for ScopyIfaceConfig {
    fn default() -> Self {
        Self {
            max_iov: 16,
            seg_size: 0,
        }
    }
}

impl ScopyIfaceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| UctError::config(format!("failed to parse scopy config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iov == 0 {
            return Err(UctError::config("max_iov must be positive"));
        }
        Ok(())
    }
}
