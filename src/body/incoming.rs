//! `Incoming`：从连接上接收的原始响应体
//!
//! 分帧已经去除（chunked / Content-Length / DATA 帧），内容编码尚未去除。
//! `Incoming` 持有本次交换的连接租约：
//!
//! - HTTP/1.1：租约中就是连接本身，响应体直接从连接读取
//! - HTTP/2：持有流的接收端，租约只代表占用了连接上的一个流
//!
//! 响应体读完、出错或被 drop 时租约随之释放，连接池据此决定复用还是丢弃连接。
//! 读取之间的等待受读响应体截止时间约束：每次底层读取返回 `Pending` 时计时，
//! 收到数据后解除。

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use crate::client::pool::Pooled;
use crate::common::time::IdleDeadline;
#[cfg(feature = "http2")]
use crate::proto::h2::RecvBody;

/// 从网络接收到的原始响应体（未做内容解码）。
///
/// 通过 [`Response::into_raw_body`](crate::client::Response::into_raw_body) 获得。
#[must_use = "streams do nothing unless polled"]
pub struct Incoming {
    kind: Kind,
    idle: Option<IdleDeadline>,
}

enum Kind {
    Empty,
    H1 {
        lease: Pooled,
    },
    #[cfg(feature = "http2")]
    H2 {
        recv: RecvBody,
        lease: Pooled,
    },
}

impl Incoming {
    pub(crate) fn empty() -> Incoming {
        Incoming {
            kind: Kind::Empty,
            idle: None,
        }
    }

    pub(crate) fn h1(lease: Pooled, idle: IdleDeadline) -> Incoming {
        Incoming {
            kind: Kind::H1 { lease },
            idle: Some(idle),
        }
    }

    #[cfg(feature = "http2")]
    pub(crate) fn h2(recv: RecvBody, lease: Pooled, idle: IdleDeadline) -> Incoming {
        Incoming {
            kind: Kind::H2 { recv, lease },
            idle: Some(idle),
        }
    }

    /// 结束读取并释放租约。
    fn finish(&mut self) {
        self.kind = Kind::Empty;
        self.idle = None;
    }
}

impl Body for Incoming {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = match self.kind {
            Kind::Empty => return Poll::Ready(None),
            Kind::H1 { ref mut lease } => match lease.h1_mut() {
                Some(conn) => conn.poll_read_body(cx),
                None => Poll::Ready(None),
            },
            #[cfg(feature = "http2")]
            Kind::H2 { ref mut recv, .. } => recv.poll_frame(cx),
        };

        match polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(ref mut idle) = self.idle {
                    idle.disarm();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                if err.is_connection() {
                    match self.kind {
                        Kind::Empty => {}
                        Kind::H1 { ref mut lease } => lease.poison(),
                        #[cfg(feature = "http2")]
                        Kind::H2 { ref mut lease, .. } => lease.poison(),
                    }
                }
                self.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                trace!("incoming body completed");
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => {
                let elapsed = match self.idle {
                    Some(ref mut idle) => idle.poll_elapsed(cx),
                    None => Poll::Pending,
                };
                match elapsed {
                    Poll::Ready(err) => {
                        // 放弃未读完的响应体：HTTP/1.1 连接随之被丢弃，HTTP/2 流被重置
                        self.finish();
                        Poll::Ready(Some(Err(err)))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.kind {
            Kind::Empty => true,
            Kind::H1 { ref lease } => lease.h1().map_or(true, |conn| conn.is_read_done()),
            #[cfg(feature = "http2")]
            Kind::H2 { ref recv, .. } => recv.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            _ => SizeHint::default(),
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Streaming;
        #[derive(Debug)]
        struct Empty;

        let mut builder = f.debug_tuple("Incoming");
        match self.kind {
            Kind::Empty => builder.field(&Empty),
            _ => builder.field(&Streaming),
        };

        builder.finish()
    }
}
