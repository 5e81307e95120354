//! 错误与结果类型模块
//!
//! 本模块定义了 crate 唯一对外暴露的错误类型 [`Error`]。连接建立失败、连接池
//! 耗尽、流被拒绝、对端重置、连接级致命错误、各阶段超时、内容解码失败等情况
//! 都统一封装在 `Error` 中，调用方通过 `is_*` 系列方法判断错误类别。
//!
//! ## 错误分类
//!
//! | 类别 | 判断方法 | 作用范围 |
//! |---|---|---|
//! | 连接建立失败（含 TLS） | [`Error::is_connect`] | 单次请求，不在内部重试 |
//! | 连接池耗尽 | [`Error::is_pool_exhausted`] | 单次请求，调用方可重试 |
//! | 连接忙 / 流被拒绝 | [`Error::is_connection_busy`] / [`Error::is_stream_refused`] | 由分发器有界重试 |
//! | 流错误（对端 RST_STREAM） | [`Error::is_stream`] | 仅终止一个逻辑请求 |
//! | 连接错误 | [`Error::is_connection`] | 终止该连接上的所有流并将其逐出连接池 |
//! | 超时 | [`Error::is_timeout`] + [`Error::timeout_phase`] | 按阶段标记 |
//! | 内容解码失败 | [`Error::is_decode`] | 仅内容层，分帧本身有效 |
//!
//! 另外还有两个辅助类别：取消（[`Error::is_canceled`]，连接池已关闭或交换被放弃）
//! 和用户错误（[`Error::is_user`]，请求本身不合法）。
//!
//! ## 设计要点
//!
//! - `Error` 内部是 `Box<ErrorImpl>`，栈上只占一个指针宽度。
//! - 通过 `std::error::Error::source()` 暴露底层原因（io 错误、`h2::Error`、解析错误等），
//!   但原因的具体类型属于实现细节。

use std::error::Error as StdError;
use std::fmt;

/// crate 内方法通用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除后的错误，用于连接器与请求体流等用户提供的组件。
pub type BoxError = Box<dyn StdError + Send + Sync>;

type Cause = BoxError;

/// 发送请求或读取响应过程中可能出现的错误。
///
/// # 格式化
///
/// `Display` 只输出当前层级的描述，不包含 source 链。
/// 错误消息的具体措辞不保证稳定。
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 超时发生的阶段。
///
/// 每个请求有四个相互独立的截止时间。读取响应体的截止时间是"空闲超时"：
/// 每读取一个数据块前都会重新计时。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// 建立传输连接（包括 TLS 握手与协议协商），以及在连接池上排队等待。
    Connect,
    /// 写出请求头或请求体（受传输层背压影响）。
    Write,
    /// 等待响应头。
    ReadHeaders,
    /// 等待下一个响应体数据块。
    ReadBody,
}

#[derive(Debug)]
pub(super) enum Kind {
    /// 传输层或 TLS 建立失败
    Connect,
    /// 连接池容量已满，且在截止时间内没有空出槽位
    PoolExhausted,
    /// HTTP/1.1 连接上已有一个打开的流
    ConnectionBusy,
    /// HTTP/2 对端通告的并发流上限已满
    StreamRefused,
    /// 对端重置了某个流
    Stream,
    /// 连接级致命错误：传输中断、协议解析失败、GOAWAY 等
    Connection,
    /// 某个阶段超时
    Timeout(Phase),
    /// 内容编码层（gzip/deflate）解码失败
    Decode,
    /// 操作被取消
    Canceled,
    /// 调用方传入的请求不合法
    User(User),
}

/// HTTP/1.1 响应解析错误，总是作为 `Kind::Connection` 的原因出现。
#[derive(Debug)]
pub(super) enum Parse {
    Version,
    Header(Header),
    TooLarge,
    Status,
}

#[derive(Debug)]
pub(super) enum Header {
    Token,
    ContentLengthInvalid,
    TransferEncodingUnexpected,
}

#[derive(Debug)]
pub(super) enum User {
    /// 请求目标不是带 authority 的 http(s) URI
    Uri,
    /// 不支持的 scheme
    UnsupportedScheme,
    /// 请求体生产者返回了错误
    Body,
    /// 请求体实际长度与声明的 content-length 不一致
    BodyLength,
}

/// 超时错误的哨兵类型，作为 `Kind::Timeout` 的原因。
#[derive(Debug)]
pub(super) struct TimedOut;

impl Error {
    /// 传输层连接（含 TLS 握手、ALPN 协商）失败。
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// 连接池已满，等待空闲槽位超时。
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolExhausted)
    }

    /// HTTP/1.1 连接上已经有一个进行中的流。
    pub fn is_connection_busy(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectionBusy)
    }

    /// HTTP/2 对端的并发流上限已满，无法在该连接上打开新流。
    pub fn is_stream_refused(&self) -> bool {
        matches!(self.inner.kind, Kind::StreamRefused)
    }

    /// 对端重置了本次请求对应的流；连接本身仍然可用。
    pub fn is_stream(&self) -> bool {
        matches!(self.inner.kind, Kind::Stream)
    }

    /// 连接级致命错误，该连接已被逐出连接池。
    pub fn is_connection(&self) -> bool {
        matches!(self.inner.kind, Kind::Connection)
    }

    /// HTTP/1.1 响应解析失败（`is_connection` 的一个子类）。
    pub fn is_parse(&self) -> bool {
        self.find_source::<Parse>().is_some()
    }

    /// 某个阶段的截止时间已到。
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout(_))
    }

    /// 超时发生的阶段；非超时错误返回 `None`。
    pub fn timeout_phase(&self) -> Option<Phase> {
        match self.inner.kind {
            Kind::Timeout(phase) => Some(phase),
            _ => None,
        }
    }

    /// 响应体内容解码失败（不支持或损坏的 content-encoding）。
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode)
    }

    /// 操作被取消，例如连接池已关闭。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 请求本身不合法，例如缺少 authority 或请求体长度与声明不符。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 对端在 RST_STREAM 或 GOAWAY 中携带的 HTTP/2 错误码。
    #[cfg(feature = "http2")]
    pub fn reason(&self) -> Option<u32> {
        self.find_source::<h2::Error>()
            .and_then(|e| e.reason())
            .map(u32::from)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        None
    }

    pub(super) fn new_connect<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(super) fn new_pool_exhausted() -> Error {
        Error::new(Kind::PoolExhausted)
    }

    pub(super) fn new_connection_busy() -> Error {
        Error::new(Kind::ConnectionBusy)
    }

    pub(super) fn new_stream_refused() -> Error {
        Error::new(Kind::StreamRefused)
    }

    pub(super) fn new_timeout(phase: Phase) -> Error {
        Error::new(Kind::Timeout(phase)).with(TimedOut)
    }

    pub(super) fn new_decode(cause: std::io::Error) -> Error {
        Error::new(Kind::Decode).with(cause)
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(super) fn new_pool_closed() -> Error {
        Error::new_canceled().with("connection pool is shut down")
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Connection).with(cause)
    }

    pub(super) fn new_incomplete() -> Error {
        Error::new(Kind::Connection).with("connection closed before message completed")
    }

    pub(super) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Connection).with(parse)
    }

    fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(super) fn new_user_uri() -> Error {
        Error::new_user(User::Uri)
    }

    pub(super) fn new_user_scheme() -> Error {
        Error::new_user(User::UnsupportedScheme)
    }

    pub(super) fn new_user_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new_user(User::Body).with(cause)
    }

    pub(super) fn new_user_body_length() -> Error {
        Error::new_user(User::BodyLength)
    }

    /// 带原因码、但既不是 GOAWAY 也不是 io 的错误只影响单个流（对端 RST_STREAM，
    /// 或本地按原因码结束的流），归为流错误；其余归为连接错误。
    #[cfg(feature = "http2")]
    pub(super) fn new_h2(cause: h2::Error) -> Error {
        let stream_scoped = cause.is_reset()
            || (cause.reason().is_some() && !cause.is_go_away() && !cause.is_io());
        if stream_scoped {
            Error::new(Kind::Stream).with(cause)
        } else {
            Error::new(Kind::Connection).with(cause)
        }
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Connect => "error trying to connect",
            Kind::PoolExhausted => "timed out waiting for a pooled connection",
            Kind::ConnectionBusy => "connection already has a stream in flight",
            Kind::StreamRefused => "peer concurrent stream limit reached",
            Kind::Stream => "stream reset by peer",
            Kind::Connection => "connection error",
            Kind::Timeout(Phase::Connect) => "connect timed out",
            Kind::Timeout(Phase::Write) => "request write timed out",
            Kind::Timeout(Phase::ReadHeaders) => "timed out waiting for response headers",
            Kind::Timeout(Phase::ReadBody) => "timed out waiting for response body",
            Kind::Decode => "error decoding response body",
            Kind::Canceled => "operation was canceled",
            Kind::User(User::Uri) => "request target must be an absolute http(s) URI",
            Kind::User(User::UnsupportedScheme) => "unsupported URI scheme",
            Kind::User(User::Body) => "error from request body producer",
            Kind::User(User::BodyLength) => "request body length does not match content-length",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("httpcore::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

// ===== impl Phase =====

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connect => "connect",
            Phase::Write => "write",
            Phase::ReadHeaders => "read-headers",
            Phase::ReadBody => "read-body",
        })
    }
}

// ===== impl Parse =====

impl Parse {
    pub(crate) fn content_length_invalid() -> Self {
        Parse::Header(Header::ContentLengthInvalid)
    }

    pub(crate) fn transfer_encoding_unexpected() -> Self {
        Parse::Header(Header::TransferEncodingUnexpected)
    }
}

impl fmt::Display for Parse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Parse::Version => "invalid HTTP version parsed",
            Parse::Header(Header::Token) => "invalid HTTP header parsed",
            Parse::Header(Header::ContentLengthInvalid) => "invalid content-length parsed",
            Parse::Header(Header::TransferEncodingUnexpected) => {
                "unexpected transfer-encoding parsed"
            }
            Parse::TooLarge => "message head is too large",
            Parse::Status => "invalid HTTP status-code parsed",
        })
    }
}

impl StdError for Parse {}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header(Header::Token),
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}

impl From<http::status::InvalidStatusCode> for Parse {
    fn from(_: http::status::InvalidStatusCode) -> Parse {
        Parse::Status
    }
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn timeout_carries_phase() {
        let err = Error::new_timeout(Phase::ReadBody);
        assert!(err.is_timeout());
        assert_eq!(err.timeout_phase(), Some(Phase::ReadBody));
        assert!(err.find_source::<TimedOut>().is_some());
        assert_eq!(err.to_string(), "timed out waiting for response body");

        assert_eq!(Error::new_pool_exhausted().timeout_phase(), None);
    }

    #[test]
    fn parse_errors_are_connection_errors() {
        let err = Error::new_parse(Parse::from(httparse::Error::Status));
        assert!(err.is_connection());
        assert!(err.is_parse());
        assert!(!err.is_stream());
    }

    #[cfg(feature = "http2")]
    #[test]
    fn h2_reset_is_stream_error() {
        let reset = h2::Error::from(h2::Reason::REFUSED_STREAM);
        let err = Error::new_h2(reset);
        assert!(err.is_stream(), "{:?}", err);
        assert_eq!(err.reason(), Some(u32::from(h2::Reason::REFUSED_STREAM)));
    }

    #[cfg(feature = "http2")]
    #[test]
    fn h2_io_error_is_connection_error() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "peer went away");
        let err = Error::new_h2(h2::Error::from(io));
        assert!(err.is_connection(), "{:?}", err);
        assert!(!err.is_stream());
    }
}
