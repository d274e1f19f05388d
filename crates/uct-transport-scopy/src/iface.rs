use tracing::debug;
use uct_core::{
    IfaceAttr, IfaceFlags, LinearModel, Result, ScopyIfaceConfig, Transport, ZcopyCaps,
};

use crate::{access::ProcessMemoryAccess, endpoint::ScopyEndpoint};

/// 单拷贝接口。
///
/// 接口地址即本进程 PID；对端拿到该地址后即可创建指向本进程的端点，无需额外握手。
/// 所有操作同步完成，`progress` 没有可推进的状态。
#[derive(Debug)]
pub struct ScopyIface<A> {
    config: ScopyIfaceConfig,
    access: A,
    pid: u32,
}

impl<A: ProcessMemoryAccess + Clone> ScopyIface<A> {
    pub fn new(config: ScopyIfaceConfig, access: A) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            access,
            pid: std::process::id(),
        })
    }

    pub fn config(&self) -> &ScopyIfaceConfig {
        &self.config
    }

    /// 本接口的地址（本进程 PID）。
    pub fn iface_addr(&self) -> u32 {
        self.pid
    }

    /// 以对端接口地址创建端点。
    pub fn create_endpoint(&self, remote_pid: u32) -> ScopyEndpoint<A> {
        debug!(remote_pid, "scopy endpoint created");
        ScopyEndpoint::new(self.access.clone(), remote_pid, &self.config)
    }

    fn zcopy_caps(&self) -> ZcopyCaps {
        ZcopyCaps {
            min_zcopy: 0,
            max_zcopy: usize::MAX,
            opt_zcopy_align: 1,
            align_mtu: 1,
            max_iov: self.config.max_iov,
        }
    }
}

#[cfg(all(feature = "cma", target_os = "linux"))]
impl ScopyIface<crate::access::CmaAccess> {
    /// 使用 Linux Cross Memory Attach 的接口。
    pub fn cma(config: ScopyIfaceConfig) -> Result<Self> {
        Self::new(config, crate::access::CmaAccess)
    }
}

impl<A: ProcessMemoryAccess + Clone> Transport for ScopyIface<A> {
    fn query(&self) -> IfaceAttr {
        IfaceAttr {
            flags: IfaceFlags::GET_ZCOPY
                | IfaceFlags::PUT_ZCOPY
                | IfaceFlags::PENDING
                | IfaceFlags::CONNECT_TO_IFACE,
            put: self.zcopy_caps(),
            get: self.zcopy_caps(),
            iface_addr_len: size_of::<u32>(),
            latency: LinearModel {
                overhead: 80e-9,
                growth: 0.0,
            },
            ..IfaceAttr::default()
        }
    }

    fn progress(&mut self) -> Result<usize> {
        Ok(0)
    }
}
