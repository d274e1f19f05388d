//! 读写锁垫片。
//!
//! 默认使用 `spin::RwLock`：不依赖操作系统调度原语，可以在内存事件回调这类受限上下文中获取；
//! 启用 `--cfg loom` 时切换到 Loom 的读写锁，以便模型检查穷举读者与写者的交错。

#[cfg(not(loom))]
pub(crate) use spin_impl::RwLock;

#[cfg(loom)]
pub(crate) use loom_impl::RwLock;

#[cfg(not(loom))]
mod spin_impl {
    pub(crate) struct RwLock<T>(spin::RwLock<T>);

    impl<T> RwLock<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(spin::RwLock::new(value))
        }

        pub(crate) fn read(&self) -> spin::RwLockReadGuard<'_, T> {
            self.0.read()
        }

        pub(crate) fn write(&self) -> spin::RwLockWriteGuard<'_, T> {
            self.0.write()
        }
    }
}

#[cfg(loom)]
mod loom_impl {
    use std::sync::PoisonError;

    pub(crate) struct RwLock<T>(loom::sync::RwLock<T>);

    impl<T> RwLock<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::sync::RwLock::new(value))
        }

        pub(crate) fn read(&self) -> loom::sync::RwLockReadGuard<'_, T> {
            self.0.read().unwrap_or_else(PoisonError::into_inner)
        }

        pub(crate) fn write(&self) -> loom::sync::RwLockWriteGuard<'_, T> {
            self.0.write().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
