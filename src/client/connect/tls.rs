//! 基于 rustls 的 TLS 连接器
//!
//! 握手时按 [`VersionPref`] 通告 ALPN 协议列表，握手完成后读取协商结果：
//! 选中 `h2` 使用 HTTP/2，选中 `http/1.1` 或未协商出结果时使用 HTTP/1.1。

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use super::{Connect, Connected, Connecting, HttpConnector};
use crate::client::config::VersionPref;
use crate::client::origin::Origin;
use crate::proto::Protocol;

/// TLS 连接器；`http` 方案的 `Origin` 退化为明文 TCP。
#[derive(Clone)]
pub struct HttpsConnector {
    http: HttpConnector,
    tls: Arc<ClientConfig>,
}

impl HttpsConnector {
    /// 使用 webpki 内置根证书创建连接器。
    pub fn new() -> HttpsConnector {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        HttpsConnector::with_tls_config(config)
    }

    /// 使用自定义的 rustls 配置。其中的 `alpn_protocols` 会在每次连接时按协议偏好覆盖。
    pub fn with_tls_config(config: ClientConfig) -> HttpsConnector {
        HttpsConnector {
            http: HttpConnector::new(),
            tls: Arc::new(config),
        }
    }

    fn config_for(&self, pref: VersionPref) -> Arc<ClientConfig> {
        let mut config = (*self.tls).clone();
        config.alpn_protocols = pref.alpn_protocols();
        Arc::new(config)
    }
}

impl Default for HttpsConnector {
    fn default() -> HttpsConnector {
        HttpsConnector::new()
    }
}

impl Connect for HttpsConnector {
    fn connect(&self, origin: &Origin, pref: VersionPref) -> Connecting {
        if !origin.is_secure() {
            return self.http.connect(origin, pref);
        }

        let http = self.http.clone();
        let config = self.config_for(pref);
        let origin = origin.clone();
        Box::pin(async move {
            let server_name = ServerName::try_from(origin.host_unbracketed().to_owned())?;
            let tcp = http.connect_tcp(&origin).await?;
            let tls = TlsConnector::from(config).connect(server_name, tcp).await?;

            let protocol = match tls.get_ref().1.alpn_protocol() {
                Some(b"h2") => Protocol::Http2,
                _ => Protocol::Http1,
            };
            if protocol == Protocol::Http1 && !pref.allows_http1() {
                return Err(format!("{} did not negotiate h2 via ALPN", origin).into());
            }
            debug!("tls handshake with {} negotiated {}", origin, protocol);
            Ok(Connected::new(tls, protocol))
        })
    }
}

impl fmt::Debug for HttpsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsConnector").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_follows_pref() {
        let connector = HttpsConnector::new();
        assert_eq!(
            connector.config_for(VersionPref::Http1Only).alpn_protocols,
            vec![b"http/1.1".to_vec()]
        );
        assert_eq!(
            connector.config_for(VersionPref::Auto).alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }
}
