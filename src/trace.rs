//! 日志追踪宏模块
//!
//! 对 `tracing` crate 的宏做一层薄封装。启用 `tracing` feature 时，这些宏直接
//! 转发到对应的 `tracing::*` 宏；未启用时展开为空，不产生任何运行时开销，
//! 也不要求下游引入 `tracing` 依赖。
//!
//! crate 内部统一通过这里的宏记录连接建立、连接池复用/丢弃、流打开、
//! 超时与解码失败等事件，而不是直接调用 `tracing::*`。
//!
//! 注意：这些宏展开为带 `#[cfg]` 的块语句，只能用在语句位置。

// 并非每个宏都会在所有 feature 组合下被使用
#![allow(unused_macros)]

macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

macro_rules! debug_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::debug_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    }
}

macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::info!($($arg)+);
        }
    }
}

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

macro_rules! trace_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::trace_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
