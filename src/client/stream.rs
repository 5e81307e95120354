//! 流多路复用
//!
//! 一个 [`Stream`] 是一次逻辑请求在某个连接上的载体：
//!
//! - HTTP/1.1：连接上唯一的隐式流，ID 固定为 1；同一连接上的交换严格串行，
//!   已有流打开时再打开会得到 `ConnectionBusy`。
//! - HTTP/2：发送请求头时由 `h2` 分配下一个奇数流 ID；对端的并发流上限已满时
//!   得到 `StreamRefused`。不同流之间互不阻塞。
//!
//! 流持有连接租约；请求发送完毕、响应头到达后，租约转交给响应体，
//! 在响应体读完、出错或被丢弃时归还。

use std::fmt;

#[cfg(feature = "http2")]
use bytes::Bytes;
use futures_util::future::poll_fn;
use http::{Request, Version};

use super::config::Timeouts;
use super::pool::Pooled;
use super::response::Response;
use crate::body::{Body, Decoded, Incoming};
use crate::common::time::{IdleDeadline, Time};
use crate::error::Phase;
use crate::proto::{MessageHead, Protocol, RequestLine, StreamId};
#[cfg(feature = "http2")]
use crate::{
    headers,
    proto::h2::{self, RecvBody},
    proto::BodyLength,
};

/// 一个已在连接上登记的流。
pub(crate) struct Stream {
    id: Option<StreamId>,
    lease: Pooled,
    time: Time,
    timeouts: Timeouts,
    #[cfg(feature = "http2")]
    pending: Option<::h2::client::ResponseFuture>,
}

/// 在租约的连接上打开一个流。
///
/// 失败时租约被归还，调用方可以强制新建连接后重试。
pub(crate) fn open_stream(mut lease: Pooled, time: Time, timeouts: Timeouts) -> crate::Result<Stream> {
    if !lease.open_stream() {
        return Err(match lease.protocol() {
            Protocol::Http1 => crate::Error::new_connection_busy(),
            Protocol::Http2 => crate::Error::new_stream_refused(),
        });
    }
    let id = match lease.protocol() {
        Protocol::Http1 => Some(StreamId::HTTP1),
        Protocol::Http2 => None,
    };
    trace!("stream opened on {:?}", lease);
    Ok(Stream {
        id,
        lease,
        time,
        timeouts,
        #[cfg(feature = "http2")]
        pending: None,
    })
}

impl Stream {
    /// 发送请求头，再逐块拉取并写出请求体，最后结束请求。
    ///
    /// 每次写入都受写截止时间约束；请求体的下一块只有在上一块写出后才会被拉取。
    pub(crate) async fn send_request(&mut self, req: Request<Body>) -> crate::Result<()> {
        let result = match self.lease.protocol() {
            Protocol::Http1 => self.send_h1(req).await,
            #[cfg(feature = "http2")]
            Protocol::Http2 => self.send_h2(req).await,
            #[cfg(not(feature = "http2"))]
            Protocol::Http2 => Err(crate::Error::new_stream_refused()),
        };
        if let Err(ref err) = result {
            debug!("sending request failed: {}", err);
            // HTTP/1.1 上写超时后请求可能只写出了一部分，连接不能再用
            let h1_write_timeout = err.is_timeout() && self.lease.protocol() == Protocol::Http1;
            if err.is_connection() || h1_write_timeout {
                self.lease.poison();
            }
        }
        result
    }

    async fn send_h1(&mut self, req: Request<Body>) -> crate::Result<()> {
        let (parts, mut body) = req.into_parts();
        let write = self.timeouts.write;
        let time = &self.time;
        let conn = match self.lease.h1_mut() {
            Some(conn) => conn,
            None => return Err(crate::Error::new_connection_busy()),
        };

        let head = MessageHead {
            version: Version::HTTP_11,
            subject: RequestLine(parts.method, parts.uri),
            headers: parts.headers,
        };
        let len = body.length();
        time.timeout(write, Phase::Write, conn.write_head(head, len))
            .await??;

        // 调用方自带 Transfer-Encoding 或 Content-Length 时，即使请求体为空
        // 编码器也可能在等待结尾，因此总是结束请求体
        while let Some(chunk) = body.next_chunk().await {
            let chunk = chunk?;
            time.timeout(write, Phase::Write, conn.write_body(chunk))
                .await??;
        }
        time.timeout(write, Phase::Write, conn.write_end()).await??;
        Ok(())
    }

    #[cfg(feature = "http2")]
    async fn send_h2(&mut self, req: Request<Body>) -> crate::Result<()> {
        let (parts, mut body) = req.into_parts();
        let write = self.timeouts.write;
        let time = &self.time;
        let handle = match self.lease.h2_mut() {
            Some(handle) => handle,
            None => return Err(crate::Error::new_stream_refused()),
        };

        let mut req = Request::from_parts(parts, ());
        h2::strip_connection_headers(req.headers_mut());
        if let Some(BodyLength::Known(len)) = body.length() {
            if len != 0 || headers::method_has_defined_payload_semantics(req.method()) {
                headers::set_content_length_if_missing(req.headers_mut(), len);
            }
        }

        let eos = body.is_end_stream();
        let (fut, mut tx) = time
            .timeout(write, Phase::Write, handle.send_request(req, eos))
            .await??;
        let id = StreamId::new(fut.stream_id().as_u32());
        debug!("sent request headers on http2 stream {}", id);
        self.id = Some(id);
        self.pending = Some(fut);

        if !eos {
            while let Some(chunk) = body.next_chunk().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        tx.send_reset(::h2::Reason::CANCEL);
                        return Err(err);
                    }
                };
                time.timeout(write, Phase::Write, h2::send_data(&mut tx, chunk, false))
                    .await??;
            }
            time.timeout(write, Phase::Write, h2::send_data(&mut tx, Bytes::new(), true))
                .await??;
        }
        Ok(())
    }

    /// 等待响应头（受读响应头截止时间约束），返回流式的响应。
    pub(crate) async fn receive_response(self) -> crate::Result<Response> {
        let protocol = self.lease.protocol();
        let result = match protocol {
            Protocol::Http1 => self.receive_h1().await,
            #[cfg(feature = "http2")]
            Protocol::Http2 => self.receive_h2().await,
            #[cfg(not(feature = "http2"))]
            Protocol::Http2 => Err(crate::Error::new_stream_refused()),
        };
        if let Err(ref _err) = result {
            debug!("receiving {} response failed: {}", protocol, _err);
        }
        result
    }

    async fn receive_h1(self) -> crate::Result<Response> {
        let Stream {
            id,
            mut lease,
            time,
            timeouts,
            ..
        } = self;

        let head = match lease.h1_mut() {
            Some(conn) => {
                time.timeout(
                    timeouts.read_headers,
                    Phase::ReadHeaders,
                    poll_fn(|cx| conn.poll_read_head(cx)),
                )
                .await?
            }
            None => Err(crate::Error::new_connection_busy()),
        };
        let head = match head {
            Ok(head) => head,
            Err(err) => {
                if err.is_connection() {
                    lease.poison();
                }
                return Err(err);
            }
        };
        let (status, version, headers) = head.into_parts();

        let done = lease.h1().map_or(true, |conn| conn.is_read_done());
        let body = if done {
            drop(lease);
            Incoming::empty()
        } else {
            Incoming::h1(lease, IdleDeadline::new(time, timeouts.read_body))
        };
        let body = Decoded::new(body, &headers);
        Ok(Response::new(
            status,
            version,
            Protocol::Http1,
            headers,
            id.unwrap_or(StreamId::HTTP1),
            body,
        ))
    }

    #[cfg(feature = "http2")]
    async fn receive_h2(self) -> crate::Result<Response> {
        let Stream {
            id,
            mut lease,
            time,
            timeouts,
            pending,
        } = self;

        let fut = match (pending, id) {
            (Some(fut), Some(_)) => fut,
            _ => return Err(crate::Error::new_canceled()),
        };
        let res = time
            .timeout(timeouts.read_headers, Phase::ReadHeaders, fut)
            .await?
            .map_err(crate::Error::new_h2);
        let res = match res {
            Ok(res) => res,
            Err(err) => {
                if err.is_connection() {
                    lease.poison();
                }
                return Err(err);
            }
        };

        let (parts, recv) = res.into_parts();
        let recv = RecvBody::new(recv);
        let body = if recv.is_end_stream() {
            drop(lease);
            Incoming::empty()
        } else {
            Incoming::h2(recv, lease, IdleDeadline::new(time, timeouts.read_body))
        };
        let body = Decoded::new(body, &parts.headers);
        Ok(Response::new(
            parts.status,
            parts.version,
            Protocol::Http2,
            parts.headers,
            id.unwrap_or(StreamId::HTTP1),
            body,
        ))
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("lease", &self.lease)
            .finish()
    }
}
