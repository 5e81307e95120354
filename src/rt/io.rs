//! 传输层 IO 抽象
//!
//! 连接器返回的传输对象（TCP、TLS 或测试用的内存管道）统一擦除为 [`Io`] trait
//! 对象。HTTP/1.1 编解码器直接在其上读写，HTTP/2 则把它交给 `h2` 驱动。

use tokio::io::{AsyncRead, AsyncWrite};

/// 可用作 HTTP 连接传输层的双向字节流。
///
/// 任何满足 `AsyncRead + AsyncWrite + Send + Unpin + 'static` 的类型都自动实现本 trait。
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// 类型擦除后的传输对象。
pub(crate) type BoxIo = Box<dyn Io>;
