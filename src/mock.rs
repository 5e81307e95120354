//! 测试用连接器
//!
//! `MockConnector` 用 `tokio::io::duplex` 建立内存连接，并在另一端启动一个
//! 脚本化的服务端：HTTP/1.1 服务端用 `httparse` 解析请求头、用 crate 自己的
//! 分帧解码器读取请求体；HTTP/2 服务端就是 `h2::server`。每个请求都会被记录，
//! 响应由测试提供的异步处理函数生成。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::client::connect::{Connect, Connected, Connecting};
use crate::client::{Origin, VersionPref};
use crate::proto::h1::{Decoded, Decoder};
use crate::proto::Protocol;

type Handler =
    Arc<dyn Fn(Recorded) -> Pin<Box<dyn Future<Output = MockResponse> + Send>> + Send + Sync>;

/// 服务端收到的一个请求。
#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub(crate) conn: usize,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) stream_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Stall {
    Never,
    BeforeHead,
    AfterHead,
}

/// 脚本化的响应。
#[derive(Clone, Debug)]
pub(crate) struct MockResponse {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
    chunked: bool,
    stall: Stall,
    close: bool,
    #[cfg(feature = "http2")]
    reset: Option<h2::Reason>,
}

impl MockResponse {
    pub(crate) fn ok(body: impl Into<Bytes>) -> MockResponse {
        MockResponse {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: body.into(),
            chunked: false,
            stall: Stall::Never,
            close: false,
            #[cfg(feature = "http2")]
            reset: None,
        }
    }

    pub(crate) fn status(mut self, status: u16) -> MockResponse {
        self.status = StatusCode::from_u16(status).unwrap();
        self
    }

    pub(crate) fn header(mut self, name: &'static str, value: &str) -> MockResponse {
        self.headers.push((name, value.to_owned()));
        self
    }

    pub(crate) fn chunked(mut self) -> MockResponse {
        self.chunked = true;
        self
    }

    pub(crate) fn stall(mut self, stall: Stall) -> MockResponse {
        self.stall = stall;
        self
    }

    /// 响应后关闭连接（HTTP/1.1 带 `Connection: close`）。
    pub(crate) fn close(mut self) -> MockResponse {
        self.close = true;
        self
    }

    #[cfg(feature = "http2")]
    pub(crate) fn reset(mut self, reason: h2::Reason) -> MockResponse {
        self.reset = Some(reason);
        self
    }
}

enum Mode {
    H1(Handler),
    #[cfg(feature = "http2")]
    H2 {
        handler: Handler,
        max_streams: Option<u32>,
        reset_uploads: Option<h2::Reason>,
    },
    Pending,
    Fail,
}

struct Inner {
    mode: Mode,
    connects: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
}

#[derive(Clone)]
pub(crate) struct MockConnector {
    inner: Arc<Inner>,
}

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Recorded) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

impl MockConnector {
    fn with_mode(mode: Mode) -> MockConnector {
        MockConnector {
            inner: Arc::new(Inner {
                mode,
                connects: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn h1<F, Fut>(f: F) -> MockConnector
    where
        F: Fn(Recorded) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResponse> + Send + 'static,
    {
        MockConnector::with_mode(Mode::H1(handler(f)))
    }

    #[cfg(feature = "http2")]
    pub(crate) fn h2<F, Fut>(f: F) -> MockConnector
    where
        F: Fn(Recorded) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResponse> + Send + 'static,
    {
        MockConnector::with_mode(Mode::H2 {
            handler: handler(f),
            max_streams: None,
            reset_uploads: None,
        })
    }

    /// 带请求体的流在收到请求头后立即被 RST_STREAM(`reason`) 重置，不读取请求体。
    #[cfg(feature = "http2")]
    pub(crate) fn h2_resetting_uploads<F, Fut>(reason: h2::Reason, f: F) -> MockConnector
    where
        F: Fn(Recorded) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResponse> + Send + 'static,
    {
        MockConnector::with_mode(Mode::H2 {
            handler: handler(f),
            max_streams: None,
            reset_uploads: Some(reason),
        })
    }

    /// 服务端通告 `SETTINGS_MAX_CONCURRENT_STREAMS = max`。
    #[cfg(feature = "http2")]
    pub(crate) fn h2_max_streams<F, Fut>(max: u32, f: F) -> MockConnector
    where
        F: Fn(Recorded) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResponse> + Send + 'static,
    {
        MockConnector::with_mode(Mode::H2 {
            handler: handler(f),
            max_streams: Some(max),
            reset_uploads: None,
        })
    }

    /// 连接永远不会建立。
    pub(crate) fn pending() -> MockConnector {
        MockConnector::with_mode(Mode::Pending)
    }

    /// 连接总是被拒绝。
    pub(crate) fn failing() -> MockConnector {
        MockConnector::with_mode(Mode::Fail)
    }

    pub(crate) fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().unwrap().clone()
    }
}

impl Connect for MockConnector {
    fn connect(&self, _origin: &Origin, _pref: VersionPref) -> Connecting {
        let inner = self.inner.clone();
        Box::pin(async move {
            let conn = inner.connects.fetch_add(1, Ordering::SeqCst);
            match inner.mode {
                Mode::Pending => std::future::pending().await,
                Mode::Fail => Err("connection refused".into()),
                Mode::H1(ref handler) => {
                    let (client, server) = tokio::io::duplex(64 * 1024);
                    tokio::spawn(serve_h1(server, conn, inner.clone(), handler.clone()));
                    Ok(Connected::new(client, Protocol::Http1))
                }
                #[cfg(feature = "http2")]
                Mode::H2 {
                    ref handler,
                    max_streams,
                    reset_uploads,
                } => {
                    let (client, server) = tokio::io::duplex(64 * 1024);
                    tokio::spawn(serve_h2(
                        server,
                        conn,
                        inner.clone(),
                        handler.clone(),
                        max_streams,
                        reset_uploads,
                    ));
                    Ok(Connected::new(client, Protocol::Http2))
                }
            }
        })
    }
}

fn record(inner: &Inner, req: &Recorded) {
    inner.requests.lock().unwrap().push(req.clone());
}

async fn serve_h1(mut io: DuplexStream, conn: usize, inner: Arc<Inner>, handler: Handler) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        let (method, path, headers) = loop {
            if !buf.is_empty() {
                let mut raw = [httparse::EMPTY_HEADER; 64];
                let mut req = httparse::Request::new(&mut raw);
                match req.parse(&buf) {
                    Ok(httparse::Status::Complete(n)) => {
                        let method = Method::from_bytes(req.method.unwrap().as_bytes()).unwrap();
                        let path = req.path.unwrap().to_owned();
                        let mut headers = HeaderMap::new();
                        for h in req.headers.iter() {
                            headers.append(
                                HeaderName::from_bytes(h.name.as_bytes()).unwrap(),
                                HeaderValue::from_bytes(h.value).unwrap(),
                            );
                        }
                        buf.advance(n);
                        break (method, path, headers);
                    }
                    Ok(httparse::Status::Partial) => {}
                    Err(_) => return,
                }
            }
            match io.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let chunked = headers
            .get(http::header::TRANSFER_ENCODING)
            .map_or(false, |v| v.as_bytes().eq_ignore_ascii_case(b"chunked"));
        let mut decoder = if chunked {
            Decoder::chunked()
        } else {
            let len = headers
                .get(http::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Decoder::length(len)
        };
        let mut body = BytesMut::new();
        loop {
            match decoder.decode(&mut buf) {
                Ok(Decoded::Data(data)) => body.extend_from_slice(&data),
                Ok(Decoded::Trailers(_)) => {}
                Ok(Decoded::End) => break,
                Ok(Decoded::NeedMore) => match io.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                },
                Err(_) => return,
            }
        }

        let req = Recorded {
            conn,
            method,
            path,
            headers,
            body: body.freeze(),
            stream_id: 1,
        };
        record(&inner, &req);
        let resp = handler(req).await;

        if resp.stall == Stall::BeforeHead {
            std::future::pending::<()>().await;
        }

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            resp.status.as_u16(),
            resp.status.canonical_reason().unwrap_or("")
        );
        for (name, value) in &resp.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if resp.chunked {
            head.push_str("transfer-encoding: chunked\r\n");
        } else {
            head.push_str(&format!("content-length: {}\r\n", resp.body.len()));
        }
        if resp.close {
            head.push_str("connection: close\r\n");
        }
        head.push_str("\r\n");
        if io.write_all(head.as_bytes()).await.is_err() {
            return;
        }

        if resp.stall == Stall::AfterHead {
            std::future::pending::<()>().await;
        }

        let mut out = Vec::new();
        if resp.chunked {
            for chunk in resp.body.chunks(16) {
                out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                out.extend_from_slice(chunk);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"0\r\n\r\n");
        } else {
            out.extend_from_slice(&resp.body);
        }
        if io.write_all(&out).await.is_err() || io.flush().await.is_err() {
            return;
        }
        if resp.close {
            return;
        }
    }
}

#[cfg(feature = "http2")]
async fn serve_h2(
    io: DuplexStream,
    conn: usize,
    inner: Arc<Inner>,
    handler: Handler,
    max_streams: Option<u32>,
    reset_uploads: Option<h2::Reason>,
) {
    let mut builder = h2::server::Builder::new();
    if let Some(max) = max_streams {
        builder.max_concurrent_streams(max);
    }
    let mut connection = match builder.handshake::<_, Bytes>(io).await {
        Ok(connection) => connection,
        Err(_) => return,
    };
    while let Some(accepted) = connection.accept().await {
        let (request, respond) = match accepted {
            Ok(accepted) => accepted,
            Err(_) => return,
        };
        let inner = inner.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            serve_h2_stream(request, respond, conn, inner, handler, reset_uploads).await;
        });
    }
}

#[cfg(feature = "http2")]
async fn serve_h2_stream(
    request: http::Request<h2::RecvStream>,
    mut respond: h2::server::SendResponse<Bytes>,
    conn: usize,
    inner: Arc<Inner>,
    handler: Handler,
    reset_uploads: Option<h2::Reason>,
) {
    let stream_id = respond.stream_id().as_u32();
    let (parts, mut recv) = request.into_parts();
    if let Some(reason) = reset_uploads.filter(|_| !recv.is_end_stream()) {
        record(
            &inner,
            &Recorded {
                conn,
                method: parts.method,
                path: parts.uri.path().to_owned(),
                headers: parts.headers,
                body: Bytes::new(),
                stream_id,
            },
        );
        respond.send_reset(reason);
        return;
    }
    let mut body = BytesMut::new();
    while let Some(chunk) = recv.data().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => return,
        };
        let _ = recv.flow_control().release_capacity(chunk.len());
        body.extend_from_slice(&chunk);
    }

    let req = Recorded {
        conn,
        method: parts.method,
        path: parts.uri.path().to_owned(),
        headers: parts.headers,
        body: body.freeze(),
        stream_id,
    };
    record(&inner, &req);
    let resp = handler(req).await;

    if let Some(reason) = resp.reset {
        respond.send_reset(reason);
        return;
    }
    if resp.stall == Stall::BeforeHead {
        std::future::pending::<()>().await;
    }

    let mut builder = http::Response::builder().status(resp.status);
    for (name, value) in &resp.headers {
        builder = builder.header(*name, value.as_str());
    }
    let response = builder.body(()).unwrap();
    let end = resp.body.is_empty() && resp.stall == Stall::Never;
    let mut send = match respond.send_response(response, end) {
        Ok(send) => send,
        Err(_) => return,
    };
    if resp.stall == Stall::AfterHead {
        std::future::pending::<()>().await;
    }
    if !end {
        let _ = send.send_data(resp.body, true);
    }
}
