//! 同步 API
//!
//! [`Client`] 在内部持有一个小型的多线程 tokio 运行时，每个调用都在其上
//! `block_on` 异步客户端的同一套 future。响应体可以当作迭代器逐块读取，
//! 也可以当作 [`std::io::Read`] 使用。
//!
//! 不能在异步运行时内部使用。

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use http::{HeaderMap, Method, Request, StatusCode, Uri, Version};
use tokio::runtime::{self, Runtime};

use crate::body::Body;
use crate::client::{self, PoolStats};
use crate::proto::{Protocol, StreamId};

/// 阻塞式 HTTP 客户端。
///
/// drop 时关闭连接池。
pub struct Client {
    inner: client::Client,
    rt: Arc<Runtime>,
}

/// 阻塞式响应。
///
/// 作为迭代器时逐个产出解码后的数据块；作为 `Read` 时按字节读取。
pub struct Response {
    inner: client::Response,
    rt: Arc<Runtime>,
    buf: Bytes,
    done: bool,
}

// ===== impl Client =====

impl Client {
    /// 使用默认配置创建客户端。
    pub fn new() -> io::Result<Client> {
        Client::with_builder(&client::Builder::new())
    }

    /// 按异步客户端的构建器配置创建客户端。
    pub fn with_builder(builder: &client::Builder) -> io::Result<Client> {
        let rt = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("httpcore-blocking")
            .enable_all()
            .build()?;
        let inner = {
            let _enter = rt.enter();
            builder.build()
        };
        Ok(Client {
            inner,
            rt: Arc::new(rt),
        })
    }

    /// 发送请求，阻塞直到响应头到达。
    pub fn send(&self, req: Request<Body>) -> crate::Result<Response> {
        let inner = self.rt.block_on(self.inner.send(req))?;
        Ok(self.wrap(inner))
    }

    /// 以给定方法、目标和请求体发送请求。
    pub fn request<U>(&self, method: Method, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        let inner = self.rt.block_on(self.inner.request(method, uri, body))?;
        Ok(self.wrap(inner))
    }

    /// 发送 `GET` 请求。
    pub fn get<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::GET, uri, Body::empty())
    }

    /// 发送 `HEAD` 请求。
    pub fn head<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::HEAD, uri, Body::empty())
    }

    /// 发送 `DELETE` 请求。
    pub fn delete<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::DELETE, uri, Body::empty())
    }

    /// 发送 `OPTIONS` 请求。
    pub fn options<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::OPTIONS, uri, Body::empty())
    }

    /// 发送 `POST` 请求。
    pub fn post<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::POST, uri, body)
    }

    /// 发送 `PUT` 请求。
    pub fn put<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::PUT, uri, body)
    }

    /// 发送 `PATCH` 请求。
    pub fn patch<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::PATCH, uri, body)
    }

    /// 连接池当前的计数。
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool_stats()
    }

    /// 关闭空闲超时和超出保留上限的空闲连接。
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// 关闭连接池。
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn wrap(&self, inner: client::Response) -> Response {
        Response {
            inner,
            rt: self.rt.clone(),
            buf: Bytes::new(),
            done: false,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("inner", &self.inner).finish()
    }
}

// ===== impl Response =====

impl Response {
    /// 状态码
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// 响应行中的 HTTP 版本
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// 承载本次交换的连接协议
    pub fn protocol(&self) -> Protocol {
        self.inner.protocol()
    }

    /// 响应头
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// 本次交换在连接上的流 ID
    pub fn stream_id(&self) -> StreamId {
        self.inner.stream_id()
    }

    /// 响应体之后收到的 trailers。
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.inner.trailers()
    }

    /// 读取下一个解码后的数据块。
    pub fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        if !self.buf.is_empty() {
            return Ok(Some(std::mem::take(&mut self.buf)));
        }
        if self.done {
            return Ok(None);
        }
        let next = self.rt.block_on(self.inner.chunk());
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
        }
        next
    }

    /// 读取剩余的全部响应体。
    pub fn bytes(mut self) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }

    /// 以 UTF-8 读取剩余的全部响应体，非法字节被替换为 U+FFFD。
    pub fn text(self) -> crate::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 放弃剩余的响应体，立即归还连接。
    pub fn close(self) {
        self.inner.close();
    }
}

impl Iterator for Response {
    type Item = crate::Result<Bytes>;

    fn next(&mut self) -> Option<crate::Result<Bytes>> {
        self.chunk().transpose()
    }
}

impl Read for Response {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.buf.is_empty() {
            match self.chunk() {
                Ok(Some(chunk)) => self.buf = chunk,
                Ok(None) => return Ok(0),
                Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
            }
        }
        let n = dst.len().min(self.buf.len());
        dst[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        Ok(n)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response").field("inner", &self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockResponse};

    fn client(connector: &MockConnector) -> Client {
        let mut builder = client::Builder::new();
        builder.connector(connector.clone());
        Client::with_builder(&builder).unwrap()
    }

    #[test]
    fn read_body_through_io_read() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("hello blocking world").chunked() });
        let client = client(&connector);

        for _ in 0..2 {
            let mut res = client.get("http://example.com/").unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            let mut small = [0u8; 5];
            res.read_exact(&mut small).unwrap();
            assert_eq!(&small, b"hello");
            let mut rest = String::new();
            res.read_to_string(&mut rest).unwrap();
            assert_eq!(rest, " blocking world");
        }
        assert_eq!(connector.connects(), 1);
        assert_eq!(client.pool_stats().idle, 1);
    }

    #[test]
    fn iterate_chunks() {
        let body = "0123456789".repeat(5);
        let connector = MockConnector::h1(move |_| {
            let body = body.clone();
            async move { MockResponse::ok(body).chunked() }
        });
        let client = client(&connector);

        let res = client.post("http://example.com/", "payload").unwrap();
        let chunks: Vec<Bytes> = res.collect::<crate::Result<_>>().unwrap();
        assert!(chunks.len() > 1);
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, "0123456789".repeat(5).as_bytes());
        assert_eq!(connector.requests()[0].body, "payload");
    }

    #[test]
    fn close_and_drop_release_the_pool() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("unread").chunked() });
        let client = client(&connector);

        client.get("http://example.com/").unwrap().close();
        assert_eq!(client.pool_stats(), PoolStats::default());

        let text = client.get("http://example.com/").unwrap().text().unwrap();
        assert_eq!(text, "unread");
        assert_eq!(client.pool_stats().idle, 1);
    }

    #[test]
    fn connect_errors_surface() {
        let client = client(&MockConnector::failing());
        let err = client.get("http://example.com/").unwrap_err();
        assert!(err.is_connect());
    }
}
