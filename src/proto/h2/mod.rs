//! HTTP/2 编解码层
//!
//! 基于 `h2` crate。本模块提供：
//!
//! - **连接头部清理**：HTTP/2 不允许连接级头部字段，`strip_connection_headers` 负责移除。
//! - **请求体发送**：`send_data` 按对端的流控窗口分片写出数据，窗口耗尽时挂起等待，
//!   这就是请求体方向的背压。
//! - **响应体接收**：`RecvBody` 逐帧读取 DATA 与 trailers，并在交付数据后归还流控容量。

use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::ready;
use futures_util::future::poll_fn;
use h2::{RecvStream, SendStream};
use http::header::{HeaderName, CONNECTION, TE, TRANSFER_ENCODING, UPGRADE};
use http::HeaderMap;
use http_body::Frame;

pub(crate) mod client;

pub(crate) use self::client::{handshake, ClientHandle, Config};

// RFC 9110 第 7.6.1 节定义的连接级头部。
// TE 只有值为 "trailers" 时才允许出现在请求中，单独处理。
static CONNECTION_HEADERS: [HeaderName; 4] = [
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    TRANSFER_ENCODING,
    UPGRADE,
];

/// 移除 HTTP/2 请求中不允许的连接级头部。
pub(crate) fn strip_connection_headers(headers: &mut HeaderMap) {
    for header in &CONNECTION_HEADERS {
        if headers.remove(header).is_some() {
            warn!("Connection header illegal in HTTP/2: {}", header.as_str());
        }
    }

    if headers.get(TE).map_or(false, |te| te != "trailers") {
        warn!("TE headers not set to \"trailers\" are illegal in HTTP/2 requests");
        headers.remove(TE);
    }

    if let Some(header) = headers.remove(CONNECTION) {
        warn!("Connection header illegal in HTTP/2: {}", CONNECTION.as_str());
        // Connection 的值可能列出了其他逐跳头部，一并移除
        if let Ok(names) = header.to_str() {
            for name in names.split(',') {
                headers.remove(name.trim());
            }
        }
    }
}

/// 写出一个请求体数据块，按可用的发送窗口切分。
///
/// 窗口为零时挂起，直到对端发送 WINDOW_UPDATE；对端重置流时返回流错误。
pub(crate) async fn send_data(
    tx: &mut SendStream<Bytes>,
    mut data: Bytes,
    end_of_stream: bool,
) -> crate::Result<()> {
    if data.is_empty() {
        if end_of_stream {
            tx.send_data(Bytes::new(), true)
                .map_err(|e| send_error(tx, e))?;
        }
        return Ok(());
    }

    while !data.is_empty() {
        tx.reserve_capacity(data.len());
        let cap = poll_fn(|cx| poll_capacity(tx, cx)).await?;
        let chunk = data.split_to(cap.min(data.len()));
        let eos = end_of_stream && data.is_empty();
        trace!("send body chunk: {} bytes, eos={}", chunk.len(), eos);
        tx.send_data(chunk, eos).map_err(|e| send_error(tx, e))?;
    }
    Ok(())
}

fn poll_capacity(tx: &mut SendStream<Bytes>, cx: &mut Context<'_>) -> Poll<crate::Result<usize>> {
    loop {
        if let Poll::Ready(reason) = tx.poll_reset(cx).map_err(crate::Error::new_h2)? {
            debug!("stream received RST_STREAM: {:?}", reason);
            return Poll::Ready(Err(stream_reset(reason)));
        }
        match ready!(tx.poll_capacity(cx)) {
            Some(Ok(0)) => {}
            Some(Ok(n)) => return Poll::Ready(Ok(n)),
            Some(Err(e)) => return Poll::Ready(Err(crate::Error::new_h2(e))),
            // 流已经不在发送状态：被对端重置，或者已经结束
            None => return Poll::Ready(Err(stream_reset(h2::Reason::STREAM_CLOSED))),
        }
    }
}

/// 写 DATA 失败。流在两次 poll 之间被对端重置时 `h2` 只报告
/// `InactiveStreamId`，这里补查一次重置原因，保证它仍然是流错误。
fn send_error(tx: &mut SendStream<Bytes>, err: h2::Error) -> crate::Error {
    let waker = futures_util::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    match tx.poll_reset(&mut cx) {
        Poll::Ready(Ok(reason)) => {
            debug!("stream was reset while sending: {:?}", reason);
            stream_reset(reason)
        }
        _ => crate::Error::new_h2(err),
    }
}

fn stream_reset(reason: h2::Reason) -> crate::Error {
    crate::Error::new_h2(h2::Error::from(reason))
}

/// 一个 HTTP/2 流的接收方向。
#[derive(Debug)]
pub(crate) struct RecvBody {
    recv: RecvStream,
    data_done: bool,
    done: bool,
}

impl RecvBody {
    pub(crate) fn new(recv: RecvStream) -> RecvBody {
        let done = recv.is_end_stream();
        RecvBody {
            recv,
            data_done: done,
            done,
        }
    }

    pub(crate) fn is_end_stream(&self) -> bool {
        self.done
    }

    pub(crate) fn poll_frame(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<crate::Result<Frame<Bytes>>>> {
        if self.done {
            return Poll::Ready(None);
        }

        if !self.data_done {
            match ready!(self.recv.poll_data(cx)) {
                Some(Ok(bytes)) => {
                    // 交付后立即归还流控容量，对端才能继续发送
                    let _ = self.recv.flow_control().release_capacity(bytes.len());
                    return Poll::Ready(Some(Ok(Frame::data(bytes))));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return match e.reason() {
                        // NO_ERROR 结束读取，但不视为失败
                        Some(h2::Reason::NO_ERROR) => Poll::Ready(None),
                        _ => Poll::Ready(Some(Err(crate::Error::new_h2(e)))),
                    };
                }
                None => self.data_done = true,
            }
        }

        let res = ready!(self.recv.poll_trailers(cx));
        self.done = true;
        match res {
            Ok(trailers) => Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t)))),
            Err(e) => Poll::Ready(Some(Err(crate::Error::new_h2(e)))),
        }
    }
}
