use std::fmt;

use http::uri::{PathAndQuery, Uri};

/// 连接池的键：协议方案、主机、端口。
///
/// 主机名统一转为小写；未显式给出端口时使用方案的默认端口。
/// 相同 `Origin` 且协议兼容的请求可以共享连接。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

/// 支持的 URI 方案。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// 明文 TCP
    Http,
    /// TLS
    Https,
}

impl Origin {
    /// 从绝对 URI 中提取 `Origin`。
    pub fn from_uri(uri: &Uri) -> crate::Result<Origin> {
        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => Scheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => Scheme::Https,
            Some(_) => return Err(crate::Error::new_user_scheme()),
            None => return Err(crate::Error::new_user_uri()),
        };
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(crate::Error::new_user_uri()),
        };
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Origin {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// URI 方案
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// 主机名（IPv6 地址带方括号）
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 是否需要 TLS
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// 去掉 IPv6 方括号后的主机名，用于建立 TCP 连接与 TLS SNI。
    pub(crate) fn host_unbracketed(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// 将相对的请求目标按 `base` 解析为绝对 URI。
///
/// 已经是绝对 URI 的目标原样返回；只有路径（和查询）的目标沿用 `base` 的方案与主机。
pub(crate) fn resolve(base: Option<&Uri>, target: Uri) -> crate::Result<Uri> {
    if target.scheme().is_some() {
        return Ok(target);
    }
    let base = match base {
        Some(base) => base,
        None => return Err(crate::Error::new_user_uri()),
    };

    let path = target
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(path);
    Uri::from_parts(parts).map_err(|e| crate::Error::new_user_uri().with(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_defaults_and_lowercases() {
        let o = Origin::from_uri(&"HTTP://Example.COM/path".parse().unwrap()).unwrap();
        assert_eq!(o.scheme(), Scheme::Http);
        assert_eq!(o.host(), "example.com");
        assert_eq!(o.port(), 80);

        let o = Origin::from_uri(&"https://example.com:8443/".parse().unwrap()).unwrap();
        assert_eq!(o.port(), 8443);
        assert!(o.is_secure());
        assert_eq!(o.to_string(), "https://example.com:8443");
    }

    #[test]
    fn same_origin_is_equal() {
        let a = Origin::from_uri(&"http://example.com/a".parse().unwrap()).unwrap();
        let b = Origin::from_uri(&"http://EXAMPLE.com:80/b?c".parse().unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_targets() {
        let err = Origin::from_uri(&"ftp://example.com/".parse().unwrap()).unwrap_err();
        assert!(err.is_user());
        let err = Origin::from_uri(&"/relative".parse().unwrap()).unwrap_err();
        assert!(err.is_user());
    }

    #[test]
    fn ipv6_host() {
        let o = Origin::from_uri(&"http://[::1]:8080/".parse().unwrap()).unwrap();
        assert_eq!(o.host(), "[::1]");
        assert_eq!(o.host_unbracketed(), "::1");
    }

    #[test]
    fn resolve_against_base() {
        let base: Uri = "https://api.example.com/v1/users".parse().unwrap();
        let abs = resolve(Some(&base), "/health".parse().unwrap()).unwrap();
        assert_eq!(abs, "https://api.example.com/health");
        let query = resolve(Some(&base), "/v2/users?page=2".parse().unwrap()).unwrap();
        assert_eq!(query, "https://api.example.com/v2/users?page=2");
        let other = resolve(Some(&base), "http://other.example/".parse().unwrap()).unwrap();
        assert_eq!(other, "http://other.example/");

        assert!(resolve(None, "/health".parse().unwrap()).is_err());
    }
}
