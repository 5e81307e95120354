//! 客户端配置
//!
//! - [`PoolLimits`]：连接池的容量与空闲策略
//! - [`Timeouts`]：四个阶段各自独立的截止时间
//! - [`VersionPref`]：协议选择策略

use std::time::Duration;

use http::Uri;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONNECTIONS: usize = 100;
const DEFAULT_MAX_KEEPALIVE: usize = 10;
const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(90);
const DEFAULT_MAX_RETRIES: usize = 2;

/// 连接池限制。
///
/// ```
/// use std::time::Duration;
/// use httpcore::client::PoolLimits;
///
/// let limits = PoolLimits::default()
///     .max_connections_per_origin(4)
///     .max_idle_time(Duration::from_secs(30));
/// # let _ = limits;
/// ```
#[derive(Clone, Debug)]
pub struct PoolLimits {
    pub(crate) max_connections_per_origin: Option<usize>,
    pub(crate) max_connections: Option<usize>,
    pub(crate) max_keepalive_connections: usize,
    pub(crate) max_idle_time: Option<Duration>,
    pub(crate) pool_timeout: Option<Duration>,
}

impl PoolLimits {
    /// 每个 `Origin` 最多同时存在的连接数（含正在建立的）。默认不限。
    pub fn max_connections_per_origin(mut self, max: usize) -> Self {
        self.max_connections_per_origin = Some(max);
        self
    }

    /// 所有 `Origin` 合计的连接数上限。默认 100，`None` 表示不限。
    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// 空闲连接的保留上限，超出时按最近最少使用逐出。默认 10。
    pub fn max_keepalive_connections(mut self, max: usize) -> Self {
        self.max_keepalive_connections = max;
        self
    }

    /// 连接空闲超过该时长后被关闭。默认 90 秒，`None` 表示不限。
    pub fn max_idle_time(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.max_idle_time = dur.into();
        self
    }

    /// 等待连接池空位的时长上限。
    ///
    /// 未设置时使用连接阶段的超时，超时后请求以连接池耗尽失败。
    pub fn pool_timeout(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.pool_timeout = dur.into();
        self
    }
}

impl Default for PoolLimits {
    fn default() -> PoolLimits {
        PoolLimits {
            max_connections_per_origin: None,
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
            max_keepalive_connections: DEFAULT_MAX_KEEPALIVE,
            max_idle_time: Some(DEFAULT_MAX_IDLE_TIME),
            pool_timeout: None,
        }
    }
}

/// 各阶段的截止时间。
///
/// `None` 表示不限时；`Duration::ZERO` 表示立即超时。
/// 把 `Timeouts` 放进请求的 extensions 可以为单个请求覆盖客户端的配置。
///
/// ```
/// use std::time::Duration;
/// use httpcore::client::Timeouts;
///
/// let mut req = httpcore::Request::get("http://example.com/").body(()).unwrap();
/// req.extensions_mut()
///     .insert(Timeouts::new(Duration::from_secs(1)).read_body(None));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timeouts {
    pub(crate) connect: Option<Duration>,
    pub(crate) write: Option<Duration>,
    pub(crate) read_headers: Option<Duration>,
    pub(crate) read_body: Option<Duration>,
}

impl Timeouts {
    /// 四个阶段使用同一个截止时间。
    pub fn new(dur: impl Into<Option<Duration>>) -> Timeouts {
        let dur = dur.into();
        Timeouts {
            connect: dur,
            write: dur,
            read_headers: dur,
            read_body: dur,
        }
    }

    /// 不设任何截止时间。
    pub fn none() -> Timeouts {
        Timeouts::new(None)
    }

    /// 建立连接（含 TLS 与协议协商）的截止时间。
    pub fn connect(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.connect = dur.into();
        self
    }

    /// 每次写入（请求头、每个请求体块）的截止时间。
    pub fn write(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.write = dur.into();
        self
    }

    /// 请求发送完成到收到响应头的截止时间。
    pub fn read_headers(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.read_headers = dur.into();
        self
    }

    /// 读取响应体时两个数据块之间的最长等待。
    pub fn read_body(mut self, dur: impl Into<Option<Duration>>) -> Self {
        self.read_body = dur.into();
        self
    }
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        Timeouts::new(DEFAULT_TIMEOUT)
    }
}

/// 协议选择策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum VersionPref {
    /// TLS 连接上按 ALPN 协商（优先 HTTP/2）；明文连接使用 HTTP/1.1。
    #[default]
    Auto,
    /// 只使用 HTTP/1.1。
    Http1Only,
    /// 只使用 HTTP/2；明文连接上直接发送 HTTP/2 前言（prior knowledge）。
    Http2Only,
}

impl VersionPref {
    /// 协商时通告的 ALPN 协议列表，按优先级排序。
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            VersionPref::Auto => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            VersionPref::Http1Only => vec![b"http/1.1".to_vec()],
            VersionPref::Http2Only => vec![b"h2".to_vec()],
        }
    }

    pub(crate) fn allows_http1(&self) -> bool {
        !matches!(self, VersionPref::Http2Only)
    }

    pub(crate) fn allows_http2(&self) -> bool {
        !matches!(self, VersionPref::Http1Only)
    }
}

/// 分发器使用的请求级配置。
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) timeouts: Timeouts,
    pub(crate) version: VersionPref,
    pub(crate) max_retries: usize,
    pub(crate) base_url: Option<Uri>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            timeouts: Timeouts::default(),
            version: VersionPref::Auto,
            max_retries: DEFAULT_MAX_RETRIES,
            base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let limits = PoolLimits::default();
        assert_eq!(limits.max_connections_per_origin, None);
        assert_eq!(limits.max_connections, Some(100));
        assert_eq!(limits.max_keepalive_connections, 10);
        assert_eq!(limits.max_idle_time, Some(Duration::from_secs(90)));

        let t = Timeouts::default();
        assert_eq!(t.connect, Some(Duration::from_secs(5)));
        assert_eq!(t.read_body, Some(Duration::from_secs(5)));

        assert_eq!(Config::default().max_retries, 2);
    }

    #[test]
    fn timeouts_override_single_phase() {
        let t = Timeouts::new(Duration::from_secs(1)).read_body(None);
        assert_eq!(t.write, Some(Duration::from_secs(1)));
        assert_eq!(t.read_body, None);
    }

    #[test]
    fn alpn_lists() {
        assert_eq!(
            VersionPref::Auto.alpn_protocols(),
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        assert!(!VersionPref::Http2Only.allows_http1());
        assert!(!VersionPref::Http1Only.allows_http2());
    }
}
