//! HTTP 客户端
//!
//! [`Client`] 拥有一个连接池，把请求调度到池中的 HTTP/1.1 或 HTTP/2 连接上。
//! 协议在建立连接时确定：TLS 连接由 ALPN 协商，明文连接由 [`VersionPref`] 决定。
//!
//! ## 子模块结构
//!
//! - `config`：连接池上限、各阶段超时、协议偏好
//! - [`connect`]：传输层连接器（TCP、TLS）
//! - `origin`：请求目标的 `(scheme, host, port)`
//! - `pool`：连接池，负责复用、新建、排队与逐出
//! - `stream`：在连接上打开流，发送请求，接收响应头
//! - `dispatch`：把以上步骤串成一次请求
//! - `response`：流式响应
//!
//! ## 示例
//!
//! ```no_run
//! # async fn run() -> httpcore::Result<()> {
//! let client = httpcore::Client::new();
//! let res = client.get("http://example.com/").await?;
//! println!("{}", res.status());
//! let body = res.text().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::{Method, Request, Uri};

use crate::body::Body;
use crate::common::exec::Exec;
use crate::common::time::Time;
use crate::rt::{Executor, Timer, TokioExecutor, TokioTimer};

mod config;
pub mod connect;
mod dispatch;
mod origin;
pub(crate) mod pool;
mod response;
mod stream;

pub use self::config::{PoolLimits, Timeouts, VersionPref};
#[cfg(feature = "rustls")]
pub use self::connect::HttpsConnector;
pub use self::connect::{Connect, Connected, HttpConnector};
pub use self::origin::{Origin, Scheme};
pub use self::pool::PoolStats;
pub use self::response::Response;

use self::config::Config;
use self::pool::Pool;

/// 异步 HTTP 客户端。
///
/// 克隆开销很小，克隆出的句柄共享同一个连接池。
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

struct ClientRef {
    pool: Pool,
    config: Config,
}

/// [`Client`] 的配置构建器。
pub struct Builder {
    limits: PoolLimits,
    config: Config,
    #[cfg(feature = "http2")]
    h2: crate::proto::h2::Config,
    connector: Option<Arc<dyn Connect>>,
    exec: Option<Exec>,
    timer: Option<Time>,
}

// ===== impl Client =====

impl Client {
    /// 使用默认配置创建客户端。
    ///
    /// 需要在 tokio 运行时中使用。
    pub fn new() -> Client {
        Builder::new().build()
    }

    /// 创建配置构建器。
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// 发送请求，在响应头到达时返回。
    ///
    /// 请求扩展中的 [`Timeouts`] 会替换客户端的超时配置，只对这一个请求生效。
    /// 相对的请求目标按 [`Builder::base_url`] 解析。
    pub async fn send(&self, req: Request<Body>) -> crate::Result<Response> {
        dispatch::send(&self.inner.pool, req, &self.inner.config).await
    }

    /// 以给定方法、目标和请求体发送请求。
    pub async fn request<U>(&self, method: Method, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        let uri = Uri::try_from(uri).map_err(|e| {
            let e: http::Error = e.into();
            crate::Error::new_user_uri().with(e)
        })?;
        let mut req = Request::new(body.into());
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        self.send(req).await
    }

    /// 发送 `GET` 请求。
    pub async fn get<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::GET, uri, Body::empty()).await
    }

    /// 发送 `HEAD` 请求。
    pub async fn head<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::HEAD, uri, Body::empty()).await
    }

    /// 发送 `DELETE` 请求。
    pub async fn delete<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::DELETE, uri, Body::empty()).await
    }

    /// 发送 `OPTIONS` 请求。
    pub async fn options<U>(&self, uri: U) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::OPTIONS, uri, Body::empty()).await
    }

    /// 发送带请求体的 `POST` 请求。
    pub async fn post<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::POST, uri, body).await
    }

    /// 发送带请求体的 `PUT` 请求。
    pub async fn put<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::PUT, uri, body).await
    }

    /// 发送带请求体的 `PATCH` 请求。
    pub async fn patch<U>(&self, uri: U, body: impl Into<Body>) -> crate::Result<Response>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        self.request(Method::PATCH, uri, body).await
    }

    /// 连接池当前的计数。
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// 关闭空闲超时和超出保留上限的空闲连接，返回关闭的数量。
    ///
    /// 每次获取连接时也会顺带执行。
    pub fn evict_idle(&self) -> usize {
        self.inner.pool.evict_idle()
    }

    /// 关闭连接池。
    ///
    /// 空闲连接立即关闭，使用中的连接在响应结束后关闭；
    /// 之后的请求以及正在排队的请求都以取消失败。
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }
}

impl Default for Client {
    fn default() -> Client {
        Client::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.inner.pool)
            .field("version", &self.inner.config.version)
            .finish()
    }
}

// ===== impl Builder =====

impl Builder {
    /// 创建使用默认配置的构建器。
    pub fn new() -> Builder {
        Builder {
            limits: PoolLimits::default(),
            config: Config::default(),
            #[cfg(feature = "http2")]
            h2: Default::default(),
            connector: None,
            exec: None,
            timer: None,
        }
    }

    /// 设置连接池上限。
    pub fn pool_limits(&mut self, limits: PoolLimits) -> &mut Builder {
        self.limits = limits;
        self
    }

    /// 设置各阶段的超时。默认每个阶段 5 秒。
    pub fn timeouts(&mut self, timeouts: Timeouts) -> &mut Builder {
        self.config.timeouts = timeouts;
        self
    }

    /// 设置协议偏好。默认 [`VersionPref::Auto`]。
    pub fn version(&mut self, version: VersionPref) -> &mut Builder {
        self.config.version = version;
        self
    }

    /// 设置连接忙或流被拒绝时，强制新建连接重试的次数上限。
    ///
    /// 默认为 2。
    pub fn max_retries(&mut self, retries: usize) -> &mut Builder {
        self.config.max_retries = retries;
        self
    }

    /// 设置相对请求目标的解析基准。
    pub fn base_url(&mut self, base: Uri) -> &mut Builder {
        self.config.base_url = Some(base);
        self
    }

    /// 设置传输层连接器。
    ///
    /// 默认启用 `rustls` feature 时为 [`HttpsConnector`]，否则为 [`HttpConnector`]。
    pub fn connector<C>(&mut self, connector: C) -> &mut Builder
    where
        C: Connect + 'static,
    {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// 设置运行 HTTP/2 连接驱动任务的执行器。默认使用 [`TokioExecutor`]。
    pub fn executor<E>(&mut self, exec: E) -> &mut Builder
    where
        E: Executor<Pin<Box<dyn Future<Output = ()> + Send>>> + Send + Sync + 'static,
    {
        self.exec = Some(Exec::new(exec));
        self
    }

    /// 设置截止时间与连接池时钟使用的定时器。默认使用 [`TokioTimer`]。
    pub fn timer<M>(&mut self, timer: M) -> &mut Builder
    where
        M: Timer + Send + Sync + 'static,
    {
        self.timer = Some(Time::Timer(Arc::new(timer)));
        self
    }

    cfg_http2! {
        /// 设置 HTTP/2 流级别的初始流量控制窗口。
        ///
        /// 传入 `None` 不做任何改变。
        pub fn initial_stream_window_size(&mut self, sz: impl Into<Option<u32>>) -> &mut Builder {
            if let Some(sz) = sz.into() {
                self.h2.initial_stream_window_size = sz;
            }
            self
        }

        /// 设置 HTTP/2 连接级别的初始流量控制窗口。
        ///
        /// 传入 `None` 不做任何改变。
        pub fn initial_connection_window_size(&mut self, sz: impl Into<Option<u32>>) -> &mut Builder {
            if let Some(sz) = sz.into() {
                self.h2.initial_conn_window_size = sz;
            }
            self
        }

        /// 设置收到对端 SETTINGS 之前，本地可以并发发起的流数量。
        pub fn initial_max_send_streams(&mut self, initial: impl Into<Option<usize>>) -> &mut Builder {
            if let Some(initial) = initial.into() {
                self.h2.initial_max_send_streams = initial;
            }
            self
        }

        /// 设置 HTTP/2 最大帧大小。默认 16KB。
        pub fn max_frame_size(&mut self, sz: impl Into<Option<u32>>) -> &mut Builder {
            self.h2.max_frame_size = sz.into();
            self
        }

        /// 设置接收的头部列表的最大大小。
        pub fn max_header_list_size(&mut self, max: u32) -> &mut Builder {
            self.h2.max_header_list_size = max;
            self
        }
    }

    /// 构建客户端。
    pub fn build(&self) -> Client {
        let connector = match self.connector {
            Some(ref connector) => connector.clone(),
            None => default_connector(),
        };
        let exec = self
            .exec
            .clone()
            .unwrap_or_else(|| Exec::new(TokioExecutor::new()));
        let time = self
            .timer
            .clone()
            .unwrap_or_else(|| Time::Timer(Arc::new(TokioTimer::new())));

        let pool = Pool::new(
            self.limits.clone(),
            time,
            connector,
            exec,
            #[cfg(feature = "http2")]
            self.h2.clone(),
        );
        Client {
            inner: Arc::new(ClientRef {
                pool,
                config: self.config.clone(),
            }),
        }
    }
}

#[cfg(feature = "rustls")]
fn default_connector() -> Arc<dyn Connect> {
    Arc::new(HttpsConnector::new())
}

#[cfg(not(feature = "rustls"))]
fn default_connector() -> Arc<dyn Connect> {
    Arc::new(HttpConnector::new())
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("limits", &self.limits)
            .field("timeouts", &self.config.timeouts)
            .field("version", &self.config.version)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use bytes::Bytes;
    use http_body_util::BodyExt;

    use super::*;
    use crate::mock::{MockConnector, MockResponse, Stall};
    use crate::Phase;

    fn client(connector: &MockConnector) -> Builder {
        let mut builder = Client::builder();
        builder.connector(connector.clone());
        builder
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[tokio::test]
    async fn sequential_requests_share_one_connection() {
        let connector = MockConnector::h1(|req| async move { MockResponse::ok(req.path) });
        let client = client(&connector)
            .pool_limits(PoolLimits::default().max_connections_per_origin(1))
            .build();

        for i in 0..5 {
            let res = client.get(format!("http://example.com/{}", i)).await.unwrap();
            assert_eq!(res.status(), 200);
            assert_eq!(res.text().await.unwrap(), format!("/{}", i));
        }

        assert_eq!(connector.connects(), 1);
        assert!(connector.requests().iter().all(|r| r.conn == 0));
        let stats = client.pool_stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn second_request_waits_for_the_only_connection() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("body") });
        let client = client(&connector)
            .pool_limits(PoolLimits::default().max_connections_per_origin(1))
            .build();

        let first = client.get("http://example.com/1").await.unwrap();

        let second = tokio::spawn({
            let client = client.clone();
            async move { client.get("http://example.com/2").await }
        });
        while client.pool_stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.requests().len(), 1);

        assert_eq!(first.bytes().await.unwrap(), "body");
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.bytes().await.unwrap(), "body");

        assert_eq!(connector.connects(), 1);
        assert!(connector.requests().iter().all(|r| r.conn == 0));
    }

    #[tokio::test]
    async fn abandoned_response_returns_pool_to_baseline() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("unread body").chunked() });
        let client = client(&connector).build();

        let res = client.get("http://example.com/").await.unwrap();
        assert_eq!(client.pool_stats().in_use, 1);
        drop(res);

        let stats = client.pool_stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.open_streams, 0);
        assert_eq!(stats.connections, 0);

        let res = client.get("http://example.com/").await.unwrap();
        res.close();
        assert_eq!(client.pool_stats(), PoolStats::default());
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn connection_close_is_not_reused() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("bye").close() });
        let client = client(&connector).build();

        for _ in 0..2 {
            let res = client.get("http://example.com/").await.unwrap();
            assert_eq!(res.bytes().await.unwrap(), "bye");
        }
        assert_eq!(connector.connects(), 2);
        assert_eq!(client.pool_stats().connections, 0);
    }

    #[tokio::test]
    async fn chunked_request_and_gzip_response() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(64);
        let payload = Bytes::from(gzip(text.as_bytes()));
        let connector = MockConnector::h1({
            let payload = payload.clone();
            move |_| {
                let payload = payload.clone();
                async move {
                    MockResponse::ok(payload)
                        .header("content-encoding", "gzip")
                        .chunked()
                }
            }
        });
        let client = client(&connector).build();

        let body = Body::wrap_stream(futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>("hello "),
            Ok("chunked "),
            Ok("world"),
        ]));
        let res = client.post("http://example.com/upload", body).await.unwrap();
        assert_eq!(res.headers()["content-encoding"], "gzip");
        assert_eq!(res.bytes().await.unwrap(), text.as_bytes());

        let recorded = connector.requests();
        assert_eq!(recorded[0].method, Method::POST);
        assert_eq!(recorded[0].headers["transfer-encoding"], "chunked");
        assert_eq!(recorded[0].body, "hello chunked world");

        let res = client.get("http://example.com/raw").await.unwrap();
        let raw = res.into_raw_body().collect().await.unwrap().to_bytes();
        assert_eq!(raw, payload);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn unsupported_content_encoding_fails_the_read() {
        let connector =
            MockConnector::h1(|_| async { MockResponse::ok("zzz").header("content-encoding", "br") });
        let client = client(&connector).build();

        let res = client.get("http://example.com/").await.unwrap();
        assert_eq!(res.status(), 200);
        let err = res.bytes().await.unwrap_err();
        assert!(err.is_decode(), "{:?}", err);
    }

    #[tokio::test]
    async fn bodiless_responses_ignore_unknown_coding() {
        let connector = MockConnector::h1(|req| async move {
            let res = MockResponse::ok("").header("content-encoding", "br");
            if req.path == "/no-content" {
                res.status(204)
            } else {
                res
            }
        });
        let client = client(&connector).build();

        let res = client.head("http://example.com/").await.unwrap();
        assert_eq!(res.headers()["content-encoding"], "br");
        assert!(res.bytes().await.unwrap().is_empty());

        let res = client.get("http://example.com/no-content").await.unwrap();
        assert_eq!(res.status(), 204);
        assert!(res.bytes().await.unwrap().is_empty());

        assert_eq!(connector.connects(), 1);
        assert_eq!(client.pool_stats().idle, 1);
    }

    #[tokio::test]
    async fn explicit_chunked_header_with_empty_body_is_terminated() {
        let connector = MockConnector::h1(|req| async move { MockResponse::ok(req.body) });
        let client = client(&connector)
            .timeouts(Timeouts::new(Duration::from_secs(5)))
            .build();

        let req = Request::post("http://example.com/empty")
            .header("transfer-encoding", "chunked")
            .body(Body::empty())
            .unwrap();
        let res = client.send(req).await.unwrap();
        assert!(res.bytes().await.unwrap().is_empty());

        let recorded = connector.requests();
        assert_eq!(recorded[0].headers["transfer-encoding"], "chunked");
        assert!(recorded[0].body.is_empty());

        client.get("http://example.com/again").await.unwrap().bytes().await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn declared_length_without_body_is_user_error() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("unreachable") });
        let client = client(&connector).build();

        let req = Request::put("http://example.com/")
            .header("content-length", "5")
            .body(Body::empty())
            .unwrap();
        let err = client.send(req).await.unwrap_err();
        assert!(err.is_user(), "{:?}", err);
        assert_eq!(client.pool_stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn write_deadline_discards_the_connection() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("ok") });
        let client = client(&connector)
            .timeouts(Timeouts::new(Duration::from_secs(5)).write(Duration::ZERO))
            .build();

        let err = client.post("http://example.com/", "payload").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.timeout_phase(), Some(Phase::Write));
        assert_eq!(connector.connects(), 1);
        assert_eq!(client.pool_stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn aborted_waiter_leaves_the_queue() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("body") });
        let client = client(&connector)
            .pool_limits(PoolLimits::default().max_connections_per_origin(1))
            .build();

        let first = client.get("http://example.com/1").await.unwrap();
        let waiter = tokio::spawn({
            let client = client.clone();
            async move { client.get("http://example.com/2").await }
        });
        while client.pool_stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(client.pool_stats().waiting, 0);

        assert_eq!(first.bytes().await.unwrap(), "body");
        let stats = client.pool_stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.waiting, 0);

        client.get("http://example.com/3").await.unwrap().bytes().await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.requests().len(), 2);
    }

    #[tokio::test]
    async fn aborted_connect_returns_pool_to_baseline() {
        let connector = MockConnector::pending();
        let client = client(&connector).timeouts(Timeouts::none()).build();

        let req = tokio::spawn({
            let client = client.clone();
            async move { client.get("http://example.com/").await }
        });
        while client.pool_stats().connecting == 0 {
            tokio::task::yield_now().await;
        }
        req.abort();
        assert!(req.await.unwrap_err().is_cancelled());
        assert_eq!(client.pool_stats(), PoolStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn read_headers_deadline() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("").stall(Stall::BeforeHead) });
        let client = client(&connector)
            .timeouts(Timeouts::new(Duration::from_secs(1)))
            .build();

        let err = client.get("http://example.com/").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.timeout_phase(), Some(Phase::ReadHeaders));
        assert_eq!(client.pool_stats().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_body_deadline() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("never").stall(Stall::AfterHead) });
        let client = client(&connector)
            .timeouts(Timeouts::new(Duration::from_secs(1)))
            .build();

        let mut res = client.get("http://example.com/").await.unwrap();
        let err = res.chunk().await.unwrap_err();
        assert_eq!(err.timeout_phase(), Some(Phase::ReadBody));
        drop(res);
        assert_eq!(client.pool_stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let connector = MockConnector::h1(|_| async { MockResponse::ok("ok") });
        let client = client(&connector).build();

        client.get("http://example.com/").await.unwrap().bytes().await.unwrap();
        assert_eq!(client.pool_stats().idle, 1);

        client.shutdown();
        assert_eq!(client.pool_stats().connections, 0);
        let err = client.get("http://example.com/").await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[cfg(feature = "http2")]
    mod h2 {
        use std::collections::HashSet;

        use tokio::sync::Barrier;

        use super::*;
        use crate::proto::Protocol;

        #[tokio::test]
        async fn concurrent_requests_multiplex_on_one_connection() {
            const M: usize = 8;
            let barrier = Arc::new(Barrier::new(M));
            let connector = MockConnector::h2(move |_| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    MockResponse::ok("multiplexed")
                }
            });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            let tasks: Vec<_> = (0..M)
                .map(|i| {
                    let client = client.clone();
                    tokio::spawn(async move {
                        let res = client.get(format!("http://example.com/{}", i)).await?;
                        assert_eq!(res.protocol(), Protocol::Http2);
                        let id = res.stream_id();
                        assert_eq!(res.bytes().await?, "multiplexed");
                        crate::Result::Ok(id)
                    })
                })
                .collect();

            let mut ids = HashSet::new();
            for task in tasks {
                ids.insert(task.await.unwrap().unwrap());
            }
            assert_eq!(ids.len(), M);
            assert_eq!(connector.connects(), 1);

            let stats = client.pool_stats();
            assert_eq!(stats.connections, 1);
            assert_eq!(stats.open_streams, 0);
        }

        #[tokio::test]
        async fn peer_stream_limit_opens_another_connection() {
            let barrier = Arc::new(Barrier::new(2));
            let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let connector = MockConnector::h2_max_streams(1, {
                let gate = gate.clone();
                move |_| {
                    let barrier = barrier.clone();
                    let gate = gate.clone();
                    async move {
                        if gate.load(std::sync::atomic::Ordering::SeqCst) {
                            barrier.wait().await;
                        }
                        MockResponse::ok("ok")
                    }
                }
            });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            // 先完成一次交换，确保对端的 SETTINGS 已经生效
            client.get("http://example.com/").await.unwrap().bytes().await.unwrap();
            gate.store(true, std::sync::atomic::Ordering::SeqCst);

            let a = tokio::spawn({
                let client = client.clone();
                async move { client.get("http://example.com/a").await?.bytes().await }
            });
            let b = tokio::spawn({
                let client = client.clone();
                async move { client.get("http://example.com/b").await?.bytes().await }
            });
            assert_eq!(a.await.unwrap().unwrap(), "ok");
            assert_eq!(b.await.unwrap().unwrap(), "ok");

            assert_eq!(connector.connects(), 2);
            let conns: HashSet<usize> = connector.requests().iter().map(|r| r.conn).collect();
            assert_eq!(conns.len(), 2);
        }

        #[tokio::test]
        async fn peer_reset_fails_only_the_stream() {
            let connector = MockConnector::h2(|req| async move {
                if req.path == "/reset" {
                    MockResponse::ok("").reset(::h2::Reason::INTERNAL_ERROR)
                } else {
                    MockResponse::ok("fine")
                }
            });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            let err = client.get("http://example.com/reset").await.unwrap_err();
            assert!(err.is_stream(), "{:?}", err);
            assert_eq!(err.reason(), Some(2));

            let res = client.get("http://example.com/ok").await.unwrap();
            assert_eq!(res.text().await.unwrap(), "fine");
            assert_eq!(connector.connects(), 1);
        }

        #[tokio::test]
        async fn peer_reset_during_upload_keeps_the_connection() {
            let connector = MockConnector::h2_resetting_uploads(::h2::Reason::CANCEL, |_| async {
                MockResponse::ok("after reset")
            });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            // 远大于对端的初始流窗口，发送方一定会停在等待 WINDOW_UPDATE 上
            let upload = Bytes::from(vec![b'x'; 1024 * 1024]);
            let err = client.post("http://example.com/upload", upload).await.unwrap_err();
            assert!(err.is_stream(), "{:?}", err);
            assert!(!err.is_connection());
            assert_eq!(err.reason(), Some(u32::from(::h2::Reason::CANCEL)));

            let res = client.get("http://example.com/next").await.unwrap();
            assert_eq!(res.text().await.unwrap(), "after reset");
            assert_eq!(connector.connects(), 1);
            assert!(connector.requests().iter().all(|r| r.conn == 0));
            assert_eq!(client.pool_stats().connections, 1);
        }

        #[tokio::test]
        async fn write_deadline_fails_only_the_stream() {
            let connector = MockConnector::h2(|req| async move { MockResponse::ok(req.body) });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            client.get("http://example.com/warm").await.unwrap().bytes().await.unwrap();

            let mut req = Request::post("http://example.com/slow")
                .body(Body::from("payload"))
                .unwrap();
            req.extensions_mut()
                .insert(Timeouts::new(Duration::from_secs(5)).write(Duration::ZERO));
            let err = client.send(req).await.unwrap_err();
            assert_eq!(err.timeout_phase(), Some(Phase::Write));
            assert_eq!(client.pool_stats().open_streams, 0);

            let res = client.post("http://example.com/fast", "payload").await.unwrap();
            assert_eq!(res.bytes().await.unwrap(), "payload");
            assert_eq!(connector.connects(), 1);
        }

        #[tokio::test]
        async fn abandoned_stream_keeps_the_connection() {
            let connector = MockConnector::h2(|_| async { MockResponse::ok("x".repeat(1024)) });
            let client = client(&connector).version(VersionPref::Http2Only).build();

            let res = client.get("http://example.com/").await.unwrap();
            assert_eq!(client.pool_stats().open_streams, 1);
            drop(res);

            let stats = client.pool_stats();
            assert_eq!(stats.open_streams, 0);
            assert_eq!(stats.connections, 1);

            client.get("http://example.com/").await.unwrap().bytes().await.unwrap();
            assert_eq!(connector.connects(), 1);
        }
    }
}
