//! 条件编译辅助宏
//!
//! 本模块定义了整个 crate 使用的条件编译宏。`lib.rs` 通过 `#[macro_use]`
//! 最先引入本模块，因此后续所有模块都可以直接使用这些宏。
//!
//! - `cfg_feature!`：为一组 item 统一附加 `#[cfg(...)]` 与 docs.rs 的 `doc(cfg(...))` 标注
//! - `cfg_http2!`：仅在启用 `http2` feature 时编译（HTTP/2 多路复用依赖 `h2` crate）
//! - `cfg_rustls!`：仅在启用 `rustls` feature 时编译（TLS + ALPN 协议协商）

/// 为一组 item 统一附加条件编译属性。
///
/// 用法：
/// ```ignore
/// cfg_feature! {
///     #![feature = "http2"]
///     mod h2;
/// }
/// ```
macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}

/// 仅在启用 `http2` feature 时编译其中的 item。
macro_rules! cfg_http2 {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "http2"]
            $($item)*
        }
    }
}

/// 仅在启用 `rustls` feature 时编译其中的 item。
macro_rules! cfg_rustls {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "rustls"]
            $($item)*
        }
    }
}
