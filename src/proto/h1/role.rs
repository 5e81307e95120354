//! 客户端角色：请求头编码与响应头解析

use bytes::BytesMut;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};

use super::encode::Encoder;
use crate::body::DecodedLength;
use crate::error::Parse;
use crate::headers;
use crate::proto::{BodyLength, RequestHead, ResponseHead};

/// 单个响应头中最多解析的字段数
pub(crate) const MAX_HEADERS: usize = 100;
/// 响应头（状态行 + 字段）的最大字节数
pub(crate) const MAX_HEAD_SIZE: usize = 64 * 1024;

/// 解析出的响应头，以及由它推导出的分帧方式与 keep-alive 判断。
#[derive(Debug)]
pub(crate) struct ParsedHead {
    pub(crate) head: ResponseHead,
    pub(crate) decode: DecodedLength,
    pub(crate) keep_alive: bool,
}

/// 尝试从 `buf` 中解析一个完整的响应头；字节不够时返回 `Ok(None)`。
///
/// 解析成功时，响应头占用的字节会从 `buf` 中移除。
pub(crate) fn parse_response(
    buf: &mut BytesMut,
    req_method: &Method,
) -> Result<Option<ParsedHead>, Parse> {
    if buf.is_empty() {
        return Ok(None);
    }

    let (len, status, version, headers) = {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut raw);
        let len = match res.parse(buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => {
                if buf.len() >= MAX_HEAD_SIZE {
                    debug!("response head too large: {} bytes buffered", buf.len());
                    return Err(Parse::TooLarge);
                }
                return Ok(None);
            }
        };
        trace!("Response.parse Complete({})", len);

        let status = StatusCode::from_u16(res.code.unwrap_or(0))?;
        let version = match res.version {
            Some(1) => Version::HTTP_11,
            Some(0) => Version::HTTP_10,
            _ => return Err(Parse::Version),
        };

        let mut headers = HeaderMap::with_capacity(res.headers.len());
        for h in res.headers.iter() {
            let name =
                HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| Parse::from(httparse::Error::HeaderName))?;
            let value =
                HeaderValue::from_bytes(h.value).map_err(|_| Parse::from(httparse::Error::HeaderValue))?;
            headers.append(name, value);
        }
        (len, status, version, headers)
    };
    let _ = buf.split_to(len);

    let mut keep_alive = match version {
        Version::HTTP_10 => headers
            .get(header::CONNECTION)
            .map_or(false, headers::connection_keep_alive),
        _ => !headers
            .get(header::CONNECTION)
            .map_or(false, headers::connection_close),
    };

    let decode = decoder(status, version, &headers, req_method)?;
    if decode == DecodedLength::CLOSE_DELIMITED {
        keep_alive = false;
    }
    if status == StatusCode::SWITCHING_PROTOCOLS {
        // 不支持协议升级，升级后的字节流不再是 HTTP
        keep_alive = false;
    }

    Ok(Some(ParsedHead {
        head: ResponseHead {
            version,
            subject: status,
            headers,
        },
        decode,
        keep_alive,
    }))
}

fn decoder(
    status: StatusCode,
    version: Version,
    headers: &HeaderMap,
    req_method: &Method,
) -> Result<DecodedLength, Parse> {
    // 1. HEAD responses, and Status 1xx, 204, and 304 cannot have a body.
    // 2. Status 2xx to a CONNECT cannot have a body.
    // 3. Transfer-Encoding: chunked has a chunked body.
    // 4. If multiple differing Content-Length headers or invalid, close connection.
    // 5. Content-Length header has a sized body.
    // 6. Not Client.
    // 7. Read till EOF.
    if *req_method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(DecodedLength::ZERO);
    }
    if *req_method == Method::CONNECT && status.is_success() {
        return Ok(DecodedLength::ZERO);
    }

    if headers.contains_key(header::TRANSFER_ENCODING) {
        // https://tools.ietf.org/html/rfc7230#section-3.3.3
        // If Transfer-Encoding header is present, and 'chunked' is
        // not the final encoding, and this is a Request, then it is
        // malformed. A server should respond with 400 Bad Request.
        if version == Version::HTTP_10 {
            debug!("HTTP/1.0 cannot have Transfer-Encoding header");
            return Err(Parse::transfer_encoding_unexpected());
        }
        if headers::transfer_encoding_is_chunked(headers) {
            return Ok(DecodedLength::CHUNKED);
        }
        trace!("not chunked, read till eof");
        return Ok(DecodedLength::CLOSE_DELIMITED);
    }

    if headers.contains_key(header::CONTENT_LENGTH) {
        return match headers::content_length_parse_all(headers) {
            Some(len) => DecodedLength::checked_new(len),
            None => {
                debug!("illegal Content-Length header");
                Err(Parse::content_length_invalid())
            }
        };
    }

    trace!("neither Transfer-Encoding nor Content-Length");
    Ok(DecodedLength::CLOSE_DELIMITED)
}

/// 将请求头编码到 `dst`，返回请求体应使用的编码器。
///
/// `body` 为 `None` 表示没有请求体。
pub(crate) fn encode_request(
    head: &mut RequestHead,
    body: Option<BodyLength>,
    dst: &mut Vec<u8>,
) -> Encoder {
    let method = &head.subject.0;
    let uri = &head.subject.1;

    if !head.headers.contains_key(header::HOST) {
        if let Some(host) = uri.host() {
            let value = match uri.port_u16() {
                Some(port) => HeaderValue::from_str(&format!("{}:{}", host, port)),
                None => HeaderValue::from_str(host),
            };
            if let Ok(value) = value {
                head.headers.insert(header::HOST, value);
            }
        }
    }

    let encoder = if headers::transfer_encoding_is_chunked(&head.headers) {
        Encoder::chunked()
    } else if let Some(len) = headers::content_length_parse_all(&head.headers) {
        Encoder::length(len)
    } else {
        match body {
            Some(BodyLength::Known(len)) => {
                if len > 0 || headers::method_has_defined_payload_semantics(method) {
                    headers::set_content_length_if_missing(&mut head.headers, len);
                }
                Encoder::length(len)
            }
            Some(BodyLength::Unknown) => {
                head.headers
                    .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                Encoder::chunked()
            }
            None => {
                if headers::method_has_defined_payload_semantics(method) {
                    headers::set_content_length_if_missing(&mut head.headers, 0);
                }
                Encoder::length(0)
            }
        }
    };

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("/");

    dst.reserve(64 + head.headers.len() * 32);
    dst.extend_from_slice(method.as_str().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(path.as_bytes());
    dst.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in head.headers.iter() {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");

    encoder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::RequestLine;

    fn parse(raw: &[u8], method: Method) -> ParsedHead {
        let mut buf = BytesMut::from(raw);
        parse_response(&mut buf, &method)
            .expect("parse ok")
            .expect("complete head")
    }

    #[test]
    fn parse_content_length_response() {
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Dup: a\r\nX-Dup: b\r\n\r\nhello"[..],
        );
        let parsed = parse_response(&mut buf, &Method::GET).unwrap().unwrap();
        assert_eq!(parsed.head.subject, StatusCode::OK);
        assert_eq!(parsed.decode, DecodedLength::new(5));
        assert!(parsed.keep_alive);
        let dups: Vec<_> = parsed.head.headers.get_all("x-dup").iter().collect();
        assert_eq!(dups, ["a", "b"]);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn parse_partial_head() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Le"[..]);
        assert!(parse_response(&mut buf, &Method::GET).unwrap().is_none());
        assert_eq!(buf.len(), 27);
    }

    #[test]
    fn framing_rules() {
        let chunked = parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n", Method::GET);
        assert_eq!(chunked.decode, DecodedLength::CHUNKED);

        let head = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", Method::HEAD);
        assert_eq!(head.decode, DecodedLength::ZERO);

        let no_content = parse(b"HTTP/1.1 204 No Content\r\n\r\n", Method::GET);
        assert_eq!(no_content.decode, DecodedLength::ZERO);

        let eof = parse(b"HTTP/1.1 200 OK\r\n\r\n", Method::GET);
        assert_eq!(eof.decode, DecodedLength::CLOSE_DELIMITED);
        assert!(!eof.keep_alive);
    }

    #[test]
    fn keep_alive_rules() {
        let close = parse(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n", Method::GET);
        assert!(!close.keep_alive);

        let http10 = parse(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n", Method::GET);
        assert!(!http10.keep_alive);

        let http10_ka = parse(
            b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n",
            Method::GET,
        );
        assert!(http10_ka.keep_alive);
    }

    #[test]
    fn invalid_content_length() {
        let mut buf =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n"[..]);
        assert!(parse_response(&mut buf, &Method::GET).is_err());
    }

    #[test]
    fn encode_adds_host_and_length() {
        let mut head = RequestHead {
            version: Version::HTTP_11,
            subject: RequestLine(Method::POST, "http://example.com:8080/upload?x=1".parse().unwrap()),
            headers: HeaderMap::new(),
        };
        let mut dst = Vec::new();
        let encoder = encode_request(&mut head, Some(BodyLength::Known(3)), &mut dst);
        assert!(!encoder.is_chunked());
        let text = String::from_utf8(dst).unwrap();
        assert!(text.starts_with("POST /upload?x=1 HTTP/1.1\r\n"), "{}", text);
        assert!(text.contains("host: example.com:8080\r\n"), "{}", text);
        assert!(text.contains("content-length: 3\r\n"), "{}", text);
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn encode_unknown_length_is_chunked() {
        let mut head = RequestHead {
            version: Version::HTTP_11,
            subject: RequestLine(Method::PUT, "http://example.com/".parse().unwrap()),
            headers: HeaderMap::new(),
        };
        let mut dst = Vec::new();
        let encoder = encode_request(&mut head, Some(BodyLength::Unknown), &mut dst);
        assert!(encoder.is_chunked());
        let text = String::from_utf8(dst).unwrap();
        assert!(text.contains("transfer-encoding: chunked\r\n"), "{}", text);
        assert!(!text.contains("content-length"), "{}", text);
    }

    #[test]
    fn encode_get_without_body() {
        let mut head = RequestHead {
            version: Version::HTTP_11,
            subject: RequestLine(Method::GET, "http://example.com".parse().unwrap()),
            headers: HeaderMap::new(),
        };
        let mut dst = Vec::new();
        let encoder = encode_request(&mut head, None, &mut dst);
        assert!(encoder.is_eof());
        assert_eq!(dst, b"GET / HTTP/1.1\r\nhost: example.com\r\n\r\n");
    }
}
