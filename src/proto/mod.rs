//! 协议编解码层
//!
//! 每个连接持有两种编解码器之一，在连接建立时根据协商结果选定：
//!
//! - [`h1`]：HTTP/1.1，一个连接同一时刻只承载一个请求/响应交换
//! - `h2`：HTTP/2，基于 `h2` crate，同一连接上可并发多个流
//!
//! 本模块还定义了两种协议共用的消息头结构与对外的 [`Protocol`]、[`StreamId`] 类型。

use std::fmt;

pub(crate) mod h1;

#[cfg(feature = "http2")]
pub(crate) mod h2;

/// 连接上协商出的 HTTP 协议版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP/1.1：每个连接同一时刻只有一个流。
    Http1,
    /// HTTP/2：同一连接上的多个流并发进行。
    Http2,
}

/// 连接内的流标识。
///
/// HTTP/2 上是协议分配的奇数流 ID；HTTP/1.1 只有一个隐式流，其 ID 固定为 1。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

#[derive(Debug, Default)]
pub(crate) struct MessageHead<S> {
    pub(crate) version: http::Version,
    pub(crate) subject: S,
    pub(crate) headers: http::HeaderMap,
}

pub(crate) type RequestHead = MessageHead<RequestLine>;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct RequestLine(pub(crate) http::Method, pub(crate) http::Uri);

pub(crate) type ResponseHead = MessageHead<http::StatusCode>;

/// 请求体的声明长度：已知字节数，或未知（HTTP/1.1 上使用 chunked）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum BodyLength {
    Known(u64),
    Unknown,
}

// ===== impl Protocol =====

impl Protocol {
    /// 对应的 `http::Version`。
    pub fn as_version(&self) -> http::Version {
        match self {
            Protocol::Http1 => http::Version::HTTP_11,
            Protocol::Http2 => http::Version::HTTP_2,
        }
    }

    /// ALPN 协议标识。
    pub fn alpn_id(&self) -> &'static [u8] {
        match self {
            Protocol::Http1 => b"http/1.1",
            Protocol::Http2 => b"h2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http1 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
        })
    }
}

// ===== impl StreamId =====

impl StreamId {
    /// HTTP/1.1 连接上唯一的隐式流。
    pub(crate) const HTTP1: StreamId = StreamId(1);

    #[cfg(feature = "http2")]
    pub(crate) fn new(id: u32) -> StreamId {
        StreamId(id)
    }

    /// 数值形式的流 ID。
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ===== impl MessageHead =====

impl ResponseHead {
    pub(crate) fn into_parts(self) -> (http::StatusCode, http::Version, http::HeaderMap) {
        (self.subject, self.version, self.headers)
    }
}
