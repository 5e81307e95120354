//! 响应体的内容解码
//!
//! 传输层分帧（chunked / Content-Length / HTTP/2 DATA 帧）已经由协议层去除，
//! 本模块在其上按 `Content-Encoding` 去除内容编码。解码是增量的：每个原始数据块
//! 送入解码器后立即取出已解出的字节，不会缓冲整个消息体。
//!
//! 支持的编码：`gzip`（及别名 `x-gzip`）、`deflate`（zlib 封装或裸 deflate）、
//! `identity`。多重编码按出现的逆序依次解码。其他编码在收到第一个非空数据块时
//! 以解码错误失败；没有消息体的响应（HEAD、204、304）不受影响。

use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use futures_core::ready;
use http::HeaderMap;
use http_body::{Body as _, Frame, SizeHint};

use super::Incoming;
use crate::headers;

/// 去除了内容编码的响应体。
///
/// 惰性、单次遍历：每次 poll 从底层 [`Incoming`] 读取一个原始数据块并解码。
/// 解码失败时返回 [`Error::is_decode`](crate::Error::is_decode) 为真的错误，
/// 底层连接的分帧状态不受影响。
pub struct Decoded {
    inner: Incoming,
    stages: Result<Vec<Stage>, Unsupported>,
    // 原始流结束后还需要 flush 解码器，trailers 暂存到那之后再交付
    pending_trailers: Option<HeaderMap>,
    // 空的消息体（例如 HEAD 响应）不经过解码器
    fed: bool,
    state: State,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Reading,
    Finishing,
    Done,
}

#[derive(Debug)]
struct Unsupported(String);

/// 一层内容编码的解码器
enum Stage {
    Gzip(GzDecoder<Vec<u8>>),
    /// `deflate` 在收到前两个字节之前无法判断是 zlib 封装还是裸流
    Deflate(Deflate),
}

enum Deflate {
    Sniffing(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl Decoded {
    pub(crate) fn new(inner: Incoming, headers: &HeaderMap) -> Decoded {
        let stages = match headers::content_encodings(headers) {
            Ok(codings) => codings
                .iter()
                .rev()
                .map(|coding| Stage::new(coding))
                .collect::<Result<Vec<_>, _>>(),
            Err(()) => Err(Unsupported("<invalid header>".to_owned())),
        };
        Decoded {
            inner,
            stages,
            pending_trailers: None,
            fed: false,
            state: State::Reading,
        }
    }

    /// 取回底层未解码的响应体。
    pub fn into_inner(self) -> Incoming {
        self.inner
    }

    fn poll_inner(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Frame<Bytes>>>> {
        loop {
            match self.state {
                State::Done => {
                    let trailers = self.pending_trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }
                State::Finishing => {
                    self.state = State::Done;
                    let stages = match self.stages {
                        Ok(ref mut stages) if self.fed => stages,
                        _ => continue,
                    };
                    match finish(stages) {
                        Ok(rest) if !rest.is_empty() => {
                            return Poll::Ready(Some(Ok(Frame::data(rest))))
                        }
                        Ok(_) => continue,
                        Err(e) => return Poll::Ready(Some(Err(self.fail(e)))),
                    }
                }
                State::Reading => {}
            }

            let frame = match ready!(Pin::new(&mut self.inner).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.state = State::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    self.state = State::Finishing;
                    continue;
                }
            };

            let data = match frame.into_data() {
                Ok(data) => data,
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        self.pending_trailers = Some(trailers);
                    }
                    continue;
                }
            };

            if data.is_empty() {
                continue;
            }
            self.fed = true;
            let decoded = match self.stages {
                Ok(ref mut stages) => decode(stages, data),
                Err(Unsupported(ref coding)) => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported content-encoding: {}", coding),
                )),
            };
            match decoded {
                Ok(out) if out.is_empty() => continue,
                Ok(out) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                Err(e) => return Poll::Ready(Some(Err(self.fail(e)))),
            }
        }
    }

    fn fail(&mut self, cause: io::Error) -> crate::Error {
        debug!("content decoding failed: {}", cause);
        self.state = State::Done;
        self.pending_trailers = None;
        crate::Error::new_decode(cause)
    }
}

/// 依次通过每一层解码器。
fn decode(stages: &mut [Stage], data: Bytes) -> io::Result<Bytes> {
    let mut buf = data;
    for stage in stages.iter_mut() {
        if buf.is_empty() {
            break;
        }
        buf = stage.feed(&buf)?;
    }
    Ok(buf)
}

/// 原始流结束：逐层 flush，前一层 flush 出的字节要先经过后续各层。
fn finish(stages: &mut [Stage]) -> io::Result<Bytes> {
    let mut carry = Vec::new();
    for stage in stages.iter_mut() {
        if !carry.is_empty() {
            let fed = stage.feed(&carry)?;
            carry.clear();
            carry.extend_from_slice(&fed);
        }
        let rest = stage.finish()?;
        carry.extend_from_slice(&rest);
    }
    Ok(Bytes::from(carry))
}

impl http_body::Body for Decoded {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().poll_inner(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.state == State::Done && self.pending_trailers.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.stages {
            Ok(ref stages) if stages.is_empty() => self.inner.size_hint(),
            _ => SizeHint::default(),
        }
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("inner", &self.inner)
            .field("state", &self.state)
            .finish()
    }
}

// ===== impl Stage =====

impl Stage {
    fn new(coding: &str) -> Result<Stage, Unsupported> {
        match coding {
            "gzip" | "x-gzip" => Ok(Stage::Gzip(GzDecoder::new(Vec::new()))),
            "deflate" => Ok(Stage::Deflate(Deflate::Sniffing(Vec::new()))),
            other => Err(Unsupported(other.to_owned())),
        }
    }

    fn feed(&mut self, input: &[u8]) -> io::Result<Bytes> {
        match *self {
            Stage::Gzip(ref mut dec) => {
                dec.write_all(input)?;
                Ok(take(dec.get_mut()))
            }
            Stage::Deflate(ref mut dec) => dec.feed(input),
        }
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        match *self {
            Stage::Gzip(ref mut dec) => {
                dec.try_finish()?;
                Ok(take(dec.get_mut()))
            }
            Stage::Deflate(ref mut dec) => dec.finish(),
        }
    }
}

impl Deflate {
    fn feed(&mut self, input: &[u8]) -> io::Result<Bytes> {
        if let Deflate::Sniffing(ref mut head) = *self {
            head.extend_from_slice(input);
            if head.len() < 2 {
                return Ok(Bytes::new());
            }
            let head = std::mem::take(head);
            *self = if is_zlib_header(head[0], head[1]) {
                Deflate::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                trace!("deflate body without zlib header, decoding raw");
                Deflate::Raw(DeflateDecoder::new(Vec::new()))
            };
            return self.feed(&head);
        }

        match *self {
            Deflate::Zlib(ref mut dec) => {
                dec.write_all(input)?;
                Ok(take(dec.get_mut()))
            }
            Deflate::Raw(ref mut dec) => {
                dec.write_all(input)?;
                Ok(take(dec.get_mut()))
            }
            Deflate::Sniffing(_) => Ok(Bytes::new()),
        }
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        match *self {
            // 从未收到过足够的字节，只有一个字节不可能是合法的 deflate 流
            Deflate::Sniffing(ref head) if head.is_empty() => Ok(Bytes::new()),
            Deflate::Sniffing(_) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated deflate stream",
            )),
            Deflate::Zlib(ref mut dec) => {
                dec.try_finish()?;
                Ok(take(dec.get_mut()))
            }
            Deflate::Raw(ref mut dec) => {
                dec.try_finish()?;
                Ok(take(dec.get_mut()))
            }
        }
    }
}

// zlib 头：CM = 8 (deflate)，且 (CMF * 256 + FLG) 是 31 的倍数
fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && (u16::from(cmf) * 256 + u16::from(flg)) % 31 == 0
}

fn take(buf: &mut Vec<u8>) -> Bytes {
    Bytes::from(std::mem::take(buf))
}
