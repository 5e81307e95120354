use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::future::poll_fn;
use http_body::{Frame, SizeHint};

use crate::error::BoxError;
use crate::proto::BodyLength;

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// 请求体。
///
/// 可以是空、一次性缓冲的字节，或者惰性产生数据块的流。流式请求体只有在上一个
/// 数据块写入传输层之后才会被拉取下一块，传输层的背压因此会暂停数据的生产。
///
/// 流式请求体可以声明长度（写出 `Content-Length`）；未声明时 HTTP/1.1 使用
/// `Transfer-Encoding: chunked`。
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Stream {
        stream: BoxStream,
        len: Option<u64>,
    },
}

impl Body {
    /// 空请求体。
    pub fn empty() -> Body {
        Body { kind: Kind::Empty }
    }

    /// 由数据块流构造请求体，长度未知。
    pub fn wrap_stream<S, B, E>(stream: S) -> Body
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Body::stream_inner(stream, None)
    }

    /// 由数据块流构造请求体，并声明总长度。
    ///
    /// 实际写出的字节数与声明不符时，请求以用户错误失败。
    pub fn sized_stream<S, B, E>(stream: S, len: u64) -> Body
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Body::stream_inner(stream, Some(len))
    }

    fn stream_inner<S, B, E>(stream: S, len: Option<u64>) -> Body
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        use futures_util::TryStreamExt;
        let stream: BoxStream = Box::pin(stream.map_ok(Into::into).map_err(Into::into));
        Body {
            kind: Kind::Stream { stream, len },
        }
    }

    /// 编码层看到的请求体长度；`None` 表示没有请求体。
    pub(crate) fn length(&self) -> Option<BodyLength> {
        match self.kind {
            Kind::Empty => None,
            Kind::Full(ref buf) => Some(BodyLength::Known(
                buf.as_ref().map_or(0, |b| b.len() as u64),
            )),
            Kind::Stream { len: Some(len), .. } => Some(BodyLength::Known(len)),
            Kind::Stream { len: None, .. } => Some(BodyLength::Unknown),
        }
    }

    pub(crate) fn is_end_stream(&self) -> bool {
        match self.kind {
            Kind::Empty => true,
            Kind::Full(ref buf) => buf.as_ref().map_or(true, |b| b.is_empty()),
            Kind::Stream { len, .. } => len == Some(0),
        }
    }

    /// 拉取下一个非空数据块。
    pub(crate) async fn next_chunk(&mut self) -> Option<crate::Result<Bytes>> {
        loop {
            let next = poll_fn(|cx| self.poll_chunk(cx)).await;
            match next {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Some(Ok(chunk)),
                Some(Err(e)) => return Some(Err(crate::Error::new_user_body(e))),
                None => return None,
            }
        }
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, BoxError>>> {
        match self.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(ref mut buf) => Poll::Ready(buf.take().map(Ok)),
            Kind::Stream { ref mut stream, .. } => stream.as_mut().poll_next(cx),
        }
    }
}

impl Default for Body {
    fn default() -> Body {
        Body::empty()
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut()
            .poll_chunk(cx)
            .map(|opt| opt.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        Body::is_end_stream(self)
    }

    fn size_hint(&self) -> SizeHint {
        match self.length() {
            None => SizeHint::with_exact(0),
            Some(BodyLength::Known(len)) => SizeHint::with_exact(len),
            Some(BodyLength::Unknown) => SizeHint::default(),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_tuple("Body");
        match self.kind {
            Kind::Empty => builder.field(&"Empty"),
            Kind::Full(_) => builder.field(&"Full"),
            Kind::Stream { .. } => builder.field(&"Streaming"),
        };
        builder.finish()
    }
}

impl From<Bytes> for Body {
    fn from(buf: Bytes) -> Body {
        Body {
            kind: Kind::Full(Some(buf)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(vec: Vec<u8>) -> Body {
        Body::from(Bytes::from(vec))
    }
}

impl From<&'static [u8]> for Body {
    fn from(slice: &'static [u8]) -> Body {
        Body::from(Bytes::from_static(slice))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::from(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        Body::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Body {
        Body::empty()
    }
}
