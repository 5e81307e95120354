//! 传输层连接器
//!
//! 连接池需要新连接时调用 [`Connect::connect`]，得到一个已就绪的传输对象以及
//! 在其上使用的协议：
//!
//! - [`HttpConnector`]：明文 TCP。`VersionPref::Http2Only` 时直接使用 HTTP/2
//!   （prior knowledge），否则使用 HTTP/1.1。
//! - `HttpsConnector`（`rustls` feature）：TLS，协议由 ALPN 协商结果决定。
//!
//! 连接器返回的错误统一归为连接错误（[`Error::is_connect`](crate::Error::is_connect)）。
//! 连接阶段的截止时间由连接池施加，连接器本身不需要处理超时。

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::net::TcpStream;

use super::config::VersionPref;
use super::origin::Origin;
use crate::error::BoxError;
use crate::proto::Protocol;
use crate::rt::{BoxIo, Io};

cfg_rustls! {
    mod tls;
    pub use self::tls::HttpsConnector;
}

/// 连接器返回的 future。
pub type Connecting = Pin<Box<dyn Future<Output = Result<Connected, BoxError>> + Send>>;

/// 建立到某个 `Origin` 的传输连接。
///
/// 实现方负责 DNS 解析、TCP 连接、TLS 握手与 ALPN 协商。
pub trait Connect: Send + Sync {
    /// 连接到 `origin`；`pref` 是客户端的协议偏好，TLS 连接器据此设置 ALPN 列表。
    fn connect(&self, origin: &Origin, pref: VersionPref) -> Connecting;
}

/// 已建立的传输连接。
pub struct Connected {
    pub(crate) io: BoxIo,
    pub(crate) protocol: Protocol,
}

impl Connected {
    /// 包装一个传输对象，并声明其上使用的协议。
    pub fn new<T: Io>(io: T, protocol: Protocol) -> Connected {
        Connected {
            io: Box::new(io),
            protocol,
        }
    }

    /// 在该连接上使用的协议。
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// 明文 TCP 连接器。
#[derive(Clone, Debug)]
pub struct HttpConnector {
    nodelay: bool,
}

impl HttpConnector {
    /// 创建连接器，默认开启 `TCP_NODELAY`。
    pub fn new() -> HttpConnector {
        HttpConnector { nodelay: true }
    }

    /// 设置 `TCP_NODELAY`。
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }

    pub(crate) async fn connect_tcp(&self, origin: &Origin) -> Result<TcpStream, BoxError> {
        let addr = (origin.host_unbracketed(), origin.port());
        let stream = TcpStream::connect(addr).await?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        debug!("connected to {}", origin);
        Ok(stream)
    }
}

impl Default for HttpConnector {
    fn default() -> HttpConnector {
        HttpConnector::new()
    }
}

impl Connect for HttpConnector {
    fn connect(&self, origin: &Origin, pref: VersionPref) -> Connecting {
        let this = self.clone();
        let origin = origin.clone();
        Box::pin(async move {
            if origin.is_secure() {
                return Err("https requires a TLS connector".into());
            }
            let stream = this.connect_tcp(&origin).await?;
            let protocol = match pref {
                VersionPref::Http2Only => Protocol::Http2,
                VersionPref::Auto | VersionPref::Http1Only => Protocol::Http1,
            };
            Ok(Connected::new(stream, protocol))
        })
    }
}
