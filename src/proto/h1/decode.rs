//! HTTP/1.1 响应体解码（传输层解码）
//!
//! 三种分帧方式：
//!
//! - `Length`：`Content-Length` 给出的定长消息体
//! - `Chunked`：`Transfer-Encoding: chunked`，逐字节的状态机，支持分块扩展与 trailers
//! - `Eof`：没有长度信息，读到连接关闭为止
//!
//! 解码器是 sans-IO 的：每次调用只消费 `BytesMut` 中已有的字节，
//! 不够时返回 `Decoded::NeedMore`，由连接负责继续读取。

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::body::DecodedLength;
use crate::error::Parse;

/// chunk 扩展（`;name=value`）累计的最大字节数
const CHUNKED_EXTENSIONS_LIMIT: u64 = 1024 * 16;
/// trailers 累计的最大字节数
const TRAILER_LIMIT: usize = 1024 * 16;
/// trailers 中最多解析的字段数
const MAX_TRAILERS: usize = 64;

/// 响应体解码器。
#[derive(Clone, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// 剩余字节数
    Length(u64),
    Chunked {
        state: ChunkedState,
        chunk_len: u64,
        extensions_cnt: u64,
        trailers_buf: Option<BytesMut>,
    },
    /// 读到 EOF 为止；`true` 表示已经结束
    Eof(bool),
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum ChunkedState {
    Start,
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

/// 一次解码的结果。
#[derive(Debug, PartialEq)]
pub(crate) enum Decoded {
    Data(Bytes),
    Trailers(HeaderMap),
    End,
    NeedMore,
}

/// 解码失败：分帧不合法，或者连接在消息体结束前关闭。
#[derive(Debug)]
pub(crate) enum DecodeError {
    Invalid(&'static str),
    Parse(Parse),
    Incomplete,
}

impl Decoder {
    pub(crate) fn length(x: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(x),
        }
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked {
                state: ChunkedState::new(),
                chunk_len: 0,
                extensions_cnt: 0,
                trailers_buf: None,
            },
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder {
            kind: Kind::Eof(false),
        }
    }

    pub(crate) fn new(len: DecodedLength) -> Self {
        match len {
            DecodedLength::CHUNKED => Decoder::chunked(),
            DecodedLength::CLOSE_DELIMITED => Decoder::eof(),
            length => Decoder::length(length.into_opt().unwrap_or(0)),
        }
    }

    /// 消息体是否已经完整读取。
    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self.kind,
            Kind::Length(0)
                | Kind::Chunked {
                    state: ChunkedState::End,
                    ..
                }
                | Kind::Eof(true)
        )
    }

    /// 从 `buf` 中解码出下一个事件。
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, DecodeError> {
        trace!("decode; state={:?}", self.kind);
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Decoded::End);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(*remaining, buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Kind::Chunked {
                ref mut state,
                ref mut chunk_len,
                ref mut extensions_cnt,
                ref mut trailers_buf,
            } => loop {
                if *state == ChunkedState::End {
                    if let Some(trailers) = trailers_buf.take() {
                        return decode_trailers(trailers).map(Decoded::Trailers);
                    }
                    return Ok(Decoded::End);
                }
                if *state == ChunkedState::Body && *chunk_len > 0 {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let n = std::cmp::min(*chunk_len, buf.len() as u64) as usize;
                    *chunk_len -= n as u64;
                    if *chunk_len == 0 {
                        *state = ChunkedState::BodyCr;
                    }
                    return Ok(Decoded::Data(buf.split_to(n).freeze()));
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let byte = buf.get_u8();
                *state = state.step(byte, chunk_len, extensions_cnt, trailers_buf)?;
            },
            Kind::Eof(ref mut is_eof) => {
                if *is_eof {
                    Ok(Decoded::End)
                } else if buf.is_empty() {
                    Ok(Decoded::NeedMore)
                } else {
                    Ok(Decoded::Data(buf.split().freeze()))
                }
            }
        }
    }

    /// 传输层已经读到 EOF。只有读到关闭为止的消息体能正常结束。
    pub(crate) fn decode_eof(&mut self) -> Result<Decoded, DecodeError> {
        match self.kind {
            Kind::Eof(ref mut is_eof) => {
                *is_eof = true;
                Ok(Decoded::End)
            }
            _ if self.is_eof() => Ok(Decoded::End),
            _ => Err(DecodeError::Incomplete),
        }
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

macro_rules! byte_err {
    ($msg:expr) => {
        return Err(DecodeError::Invalid($msg))
    };
}

impl ChunkedState {
    fn new() -> ChunkedState {
        ChunkedState::Start
    }

    fn step(
        self,
        byte: u8,
        size: &mut u64,
        extensions_cnt: &mut u64,
        trailers_buf: &mut Option<BytesMut>,
    ) -> Result<ChunkedState, DecodeError> {
        use self::ChunkedState::*;
        match self {
            Start | Size => {
                let digit = match byte {
                    b @ b'0'..=b'9' => b - b'0',
                    b @ b'a'..=b'f' => b + 10 - b'a',
                    b @ b'A'..=b'F' => b + 10 - b'A',
                    b'\t' | b' ' if self == Size => return Ok(SizeLws),
                    b';' if self == Size => return Ok(Extension),
                    b'\r' if self == Size => return Ok(SizeLf),
                    _ => byte_err!("invalid chunk size line"),
                };
                *size = match size.checked_mul(16).and_then(|s| s.checked_add(digit as u64)) {
                    Some(s) => s,
                    None => byte_err!("invalid chunk size: overflow"),
                };
                Ok(Size)
            }
            SizeLws => match byte {
                b'\t' | b' ' => Ok(SizeLws),
                b';' => Ok(Extension),
                b'\r' => Ok(SizeLf),
                _ => byte_err!("invalid chunk size linear white space"),
            },
            Extension => match byte {
                b'\r' => Ok(SizeLf),
                b'\n' => byte_err!("invalid chunk extension contains newline"),
                _ => {
                    *extensions_cnt += 1;
                    if *extensions_cnt >= CHUNKED_EXTENSIONS_LIMIT {
                        byte_err!("chunk extensions over limit");
                    }
                    Ok(Extension)
                }
            },
            SizeLf => match byte {
                b'\n' if *size == 0 => Ok(EndCr),
                b'\n' => {
                    trace!("incoming chunked header: {0:#X} ({0} bytes)", size);
                    Ok(Body)
                }
                _ => byte_err!("invalid chunk size LF"),
            },
            // 正文字节在 `decode` 中整段切出，走到这里说明 chunk 已读完
            Body => Ok(BodyCr),
            BodyCr => match byte {
                b'\r' => Ok(BodyLf),
                _ => byte_err!("invalid chunk body CR"),
            },
            BodyLf => match byte {
                b'\n' => {
                    *size = 0;
                    Ok(Size)
                }
                _ => byte_err!("invalid chunk body LF"),
            },
            EndCr => match byte {
                b'\r' => Ok(EndLf),
                b => {
                    push_trailer(trailers_buf, b)?;
                    Ok(Trailer)
                }
            },
            Trailer => {
                push_trailer(trailers_buf, byte)?;
                match byte {
                    b'\r' => Ok(TrailerLf),
                    _ => Ok(Trailer),
                }
            }
            TrailerLf => match byte {
                b'\n' => {
                    push_trailer(trailers_buf, byte)?;
                    Ok(EndCr)
                }
                _ => byte_err!("invalid trailer end LF"),
            },
            EndLf => match byte {
                b'\n' => Ok(End),
                _ => byte_err!("invalid chunk end LF"),
            },
            End => Ok(End),
        }
    }
}

fn push_trailer(trailers_buf: &mut Option<BytesMut>, byte: u8) -> Result<(), DecodeError> {
    let buf = trailers_buf.get_or_insert_with(BytesMut::new);
    if buf.len() >= TRAILER_LIMIT {
        byte_err!("chunk trailers bytes over limit");
    }
    buf.extend_from_slice(&[byte]);
    Ok(())
}

fn decode_trailers(mut buf: BytesMut) -> Result<HeaderMap, DecodeError> {
    buf.extend_from_slice(b"\r\n");
    let mut headers = [httparse::EMPTY_HEADER; MAX_TRAILERS];
    match httparse::parse_headers(&buf, &mut headers) {
        Ok(httparse::Status::Complete((_, parsed))) => {
            let mut trailers = HeaderMap::with_capacity(parsed.len());
            for header in parsed.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|_| DecodeError::Invalid("invalid trailer name"))?;
                let value = HeaderValue::from_bytes(header.value)
                    .map_err(|_| DecodeError::Invalid("invalid trailer value"))?;
                trailers.append(name, value);
            }
            Ok(trailers)
        }
        Ok(httparse::Status::Partial) => Err(DecodeError::Invalid("partial trailers")),
        Err(e) => Err(DecodeError::Parse(e.into())),
    }
}

// ===== impl DecodeError =====

impl From<DecodeError> for crate::Error {
    fn from(err: DecodeError) -> crate::Error {
        match err {
            DecodeError::Invalid(msg) => {
                debug!("invalid response body framing: {}", msg);
                crate::Error::new_io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
            }
            DecodeError::Parse(parse) => crate::Error::new_parse(parse),
            DecodeError::Incomplete => crate::Error::new_incomplete(),
        }
    }
}
