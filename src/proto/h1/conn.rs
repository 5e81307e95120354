//! HTTP/1.1 连接状态机
//!
//! `Conn` 在一个传输对象上串行地执行请求/响应交换，每次交换经历
//! `Init -> Body -> KeepAlive` 三个阶段（读写两侧各自独立推进），
//! 两侧都到达 `KeepAlive` 且对端允许保持连接时，连接才能被放回连接池复用。
//!
//! 写方向是 `async fn`（写出请求头、请求体块、结束标记），每次写都会 flush，
//! 因此传输层的背压会直接挂起上层的请求体生产。
//! 读方向是 poll 风格的（`poll_read_head` / `poll_read_body`），
//! 以便响应体可以被惰性地、逐块地拉取。
//!
//! 交换中途被放弃（超时、取消、错误）时，状态停留在 `Body`，
//! `is_reusable()` 返回 `false`，持有方会丢弃整个连接。

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::ready;
use http::header::CONNECTION;
use http::{Method, StatusCode};
use http_body::Frame;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use super::decode::{Decoded, Decoder};
use super::encode::Encoder;
use super::role;
use crate::headers;
use crate::proto::{BodyLength, RequestHead, ResponseHead};
use crate::rt::BoxIo;

/// 每次从传输层读取的最大字节数
const READ_CHUNK: usize = 8 * 1024;

/// 一个 HTTP/1.1 连接：传输对象 + 读写缓冲 + 状态机。
pub(crate) struct Conn {
    io: BoxIo,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    state: State,
}

struct State {
    keep_alive: KA,
    /// 当前请求的方法，决定响应的分帧方式（HEAD / CONNECT）
    method: Option<Method>,
    reading: Reading,
    writing: Writing,
}

#[derive(Debug)]
enum Reading {
    Init,
    Body(Decoder),
    KeepAlive,
    Closed,
}

#[derive(Debug)]
enum Writing {
    Init,
    Body(Encoder),
    KeepAlive,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
enum KA {
    Idle,
    #[default]
    Busy,
    Disabled,
}

impl Conn {
    pub(crate) fn new(io: BoxIo) -> Conn {
        Conn {
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: Vec::new(),
            state: State {
                keep_alive: KA::Idle,
                method: None,
                reading: Reading::Init,
                writing: Writing::Init,
            },
        }
    }

    /// 连接空闲，可以开始一次新的交换。
    pub(crate) fn can_write_head(&self) -> bool {
        matches!(
            (&self.state.reading, &self.state.writing),
            (Reading::Init, Writing::Init)
        ) && self.state.keep_alive != KA::Disabled
    }

    /// 上一次交换已完整结束，且对端允许保持连接。
    pub(crate) fn is_reusable(&self) -> bool {
        matches!(
            (&self.state.reading, &self.state.writing),
            (Reading::KeepAlive, Writing::KeepAlive)
        ) && self.state.keep_alive != KA::Disabled
            && self.read_buf.is_empty()
    }

    /// 放回连接池前重置到下一次交换的初始状态。
    pub(crate) fn prepare_reuse(&mut self) {
        debug_assert!(self.is_reusable());
        self.state.idle();
    }

    /// 响应体已经读完（或者响应没有消息体）。
    pub(crate) fn is_read_done(&self) -> bool {
        matches!(self.state.reading, Reading::KeepAlive)
    }

    #[cfg(test)]
    pub(crate) fn is_write_closed(&self) -> bool {
        matches!(self.state.writing, Writing::Closed)
    }

    // ===== 写方向 =====

    /// 编码并写出请求头。`body` 为 `None` 表示请求没有消息体。
    pub(crate) async fn write_head(
        &mut self,
        mut head: RequestHead,
        body: Option<BodyLength>,
    ) -> crate::Result<()> {
        debug_assert!(self.can_write_head());
        self.state.busy();
        if head
            .headers
            .get(CONNECTION)
            .map_or(false, headers::connection_close)
        {
            self.state.disable_keep_alive();
        }
        self.state.method = Some(head.subject.0.clone());

        let encoder = role::encode_request(&mut head, body, &mut self.write_buf);
        self.state.writing = if encoder.is_eof() {
            Writing::KeepAlive
        } else {
            Writing::Body(encoder)
        };
        trace!("wrote request head, writing={:?}", self.state.writing);
        self.flush_buf().await
    }

    /// 写出一个请求体数据块。
    pub(crate) async fn write_body(&mut self, chunk: Bytes) -> crate::Result<()> {
        let encoded = match self.state.writing {
            Writing::Body(ref mut encoder) => encoder.encode(&chunk, &mut self.write_buf),
            _ => {
                warn!("write_body invalid state: {:?}", self.state.writing);
                return Err(crate::Error::new_user_body_length());
            }
        };
        if let Err(_mismatch) = encoded {
            debug!("request body: {}", _mismatch);
            self.state.close_write();
            return Err(crate::Error::new_user_body_length());
        }
        self.flush_buf().await
    }

    /// 结束请求体（chunked 写出终止块）。
    pub(crate) async fn write_end(&mut self) -> crate::Result<()> {
        match std::mem::replace(&mut self.state.writing, Writing::KeepAlive) {
            Writing::Body(encoder) => {
                if let Err(_mismatch) = encoder.end(&mut self.write_buf) {
                    debug!("request body: {}", _mismatch);
                    self.state.close_write();
                    return Err(crate::Error::new_user_body_length());
                }
                self.flush_buf().await
            }
            other => {
                self.state.writing = other;
                Ok(())
            }
        }
    }

    async fn flush_buf(&mut self) -> crate::Result<()> {
        if !self.write_buf.is_empty() {
            if let Err(e) = self.io.write_all(&self.write_buf).await {
                self.state.close();
                return Err(crate::Error::new_io(e));
            }
            self.write_buf.clear();
        }
        if let Err(e) = self.io.flush().await {
            self.state.close();
            return Err(crate::Error::new_io(e));
        }
        Ok(())
    }

    // ===== 读方向 =====

    /// 读取响应头，跳过 1xx 中间响应（101 除外）。
    pub(crate) fn poll_read_head(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<crate::Result<ResponseHead>> {
        loop {
            let method = self.state.method.clone().unwrap_or(Method::GET);
            match role::parse_response(&mut self.read_buf, &method) {
                Ok(Some(parsed)) => {
                    let status = parsed.head.subject;
                    if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                        trace!("ignoring informational response: {}", status);
                        continue;
                    }
                    debug!(
                        "incoming response: {} {:?}, body is {}",
                        status, parsed.head.version, parsed.decode
                    );
                    if !parsed.keep_alive {
                        self.state.disable_keep_alive();
                    }
                    let decoder = Decoder::new(parsed.decode);
                    self.state.reading = if decoder.is_eof() {
                        Reading::KeepAlive
                    } else {
                        Reading::Body(decoder)
                    };
                    self.check_stray_bytes();
                    return Poll::Ready(Ok(parsed.head));
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("parse error ({}) with {} bytes", e, self.read_buf.len());
                    self.state.close();
                    return Poll::Ready(Err(crate::Error::new_parse(e)));
                }
            }

            match ready!(self.poll_read_from_io(cx)) {
                Ok(0) => {
                    trace!("read eof before response head");
                    self.state.close();
                    return Poll::Ready(Err(crate::Error::new_incomplete()));
                }
                Ok(_) => {}
                Err(e) => {
                    self.state.close();
                    return Poll::Ready(Err(crate::Error::new_io(e)));
                }
            }
        }
    }

    /// 读取下一个响应体帧；消息体结束时返回 `None`。
    pub(crate) fn poll_read_body(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<crate::Result<Frame<Bytes>>>> {
        loop {
            let decoded = match self.state.reading {
                Reading::Body(ref mut decoder) => decoder.decode(&mut self.read_buf),
                _ => return Poll::Ready(None),
            };
            match decoded {
                Ok(Decoded::Data(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                Ok(Decoded::Trailers(trailers)) => {
                    return Poll::Ready(Some(Ok(Frame::trailers(trailers))))
                }
                Ok(Decoded::End) => {
                    self.state.reading = Reading::KeepAlive;
                    self.check_stray_bytes();
                    return Poll::Ready(None);
                }
                Ok(Decoded::NeedMore) => {}
                Err(e) => {
                    self.state.close();
                    return Poll::Ready(Some(Err(e.into())));
                }
            }

            match ready!(self.poll_read_from_io(cx)) {
                Ok(0) => {
                    let ended = match self.state.reading {
                        Reading::Body(ref mut decoder) => decoder.decode_eof(),
                        _ => Ok(Decoded::End),
                    };
                    self.state.disable_keep_alive();
                    match ended {
                        Ok(_) => {
                            trace!("close-delimited body finished");
                            self.state.reading = Reading::KeepAlive;
                            return Poll::Ready(None);
                        }
                        Err(e) => {
                            self.state.close();
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.state.close();
                    return Poll::Ready(Some(Err(crate::Error::new_io(e))));
                }
            }
        }
    }

    /// 检查空闲连接是否仍然可用：对端已关闭或发来了意外的字节都视为不可用。
    ///
    /// 只做一次非阻塞的读取尝试，不会挂起。
    pub(crate) fn check_idle(&mut self) -> bool {
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match self.poll_read_from_io(&mut cx) {
            Poll::Pending => true,
            Poll::Ready(Ok(0)) => {
                debug!("idle connection closed by peer");
                self.state.close();
                false
            }
            Poll::Ready(Ok(_n)) => {
                debug!("unexpected {} bytes on idle connection", _n);
                self.state.close();
                false
            }
            Poll::Ready(Err(_e)) => {
                debug!("idle connection error: {}", _e);
                self.state.close();
                false
            }
        }
    }

    fn poll_read_from_io(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let mut tmp = [0u8; READ_CHUNK];
        let mut buf = ReadBuf::new(&mut tmp);
        ready!(Pin::new(&mut self.io).poll_read(cx, &mut buf))?;
        let n = buf.filled().len();
        self.read_buf.extend_from_slice(buf.filled());
        trace!("received {} bytes", n);
        Poll::Ready(Ok(n))
    }

    fn check_stray_bytes(&mut self) {
        if matches!(self.state.reading, Reading::KeepAlive) && !self.read_buf.is_empty() {
            debug!(
                "{} bytes remaining after response, connection won't be reused",
                self.read_buf.len()
            );
            self.state.disable_keep_alive();
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("state", &self.state)
            .field("read_buf", &self.read_buf.len())
            .finish()
    }
}

// ===== impl State =====

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("reading", &self.reading)
            .field("writing", &self.writing)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl State {
    fn close(&mut self) {
        trace!("State::close()");
        self.reading = Reading::Closed;
        self.writing = Writing::Closed;
        self.keep_alive.disable();
    }

    fn close_write(&mut self) {
        trace!("State::close_write()");
        self.writing = Writing::Closed;
        self.keep_alive.disable();
    }

    fn disable_keep_alive(&mut self) {
        self.keep_alive.disable();
    }

    fn busy(&mut self) {
        if let KA::Disabled = self.keep_alive {
            return;
        }
        self.keep_alive.busy();
    }

    fn idle(&mut self) {
        self.method = None;
        self.keep_alive.idle();
        self.reading = Reading::Init;
        self.writing = Writing::Init;
    }
}

impl KA {
    fn idle(&mut self) {
        *self = KA::Idle;
    }

    fn busy(&mut self) {
        *self = KA::Busy;
    }

    fn disable(&mut self) {
        *self = KA::Disabled;
    }
}
