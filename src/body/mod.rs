//! 请求体与响应体
//!
//! 请求和响应的消息体都是流式的，不会一次性缓冲整个消息体：
//!
//! - **[`Body`]**：请求体。空、一次性的字节，或者惰性产生数据块的流。
//! - **[`Incoming`]**：从连接接收的原始响应体，分帧已去除但内容编码仍在。
//! - **[`Decoded`]**：在 `Incoming` 之上按 `Content-Encoding` 解码后的响应体。
//!
//! 响应体类型都实现了 [`http_body::Body`]，可以配合 `http-body-util` 等生态组件使用。

pub use bytes::{Buf, Bytes};
pub use http_body::Frame;
pub use http_body::SizeHint;

pub use self::decode::Decoded;
pub use self::incoming::Incoming;
pub use self::outgoing::Body;

pub(crate) use self::length::DecodedLength;

mod decode;
mod incoming;
mod length;
mod outgoing;
