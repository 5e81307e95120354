use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::future::poll_fn;
use http::{HeaderMap, StatusCode, Version};
use http_body::Body as _;

use crate::body::{Decoded, Incoming};
use crate::proto::{Protocol, StreamId};

/// 流式响应。
///
/// 响应头到达时即返回，响应体按需逐块读取，不会整体缓冲。
/// 响应体读完、读取出错、调用 [`close`](Response::close) 或直接 drop 响应，
/// 都会结束本次交换并把连接归还给连接池。提前放弃的 HTTP/1.1 连接会被关闭，
/// HTTP/2 上只重置对应的流。
pub struct Response {
    status: StatusCode,
    version: Version,
    protocol: Protocol,
    headers: HeaderMap,
    stream_id: StreamId,
    body: Decoded,
    trailers: Option<HeaderMap>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        version: Version,
        protocol: Protocol,
        headers: HeaderMap,
        stream_id: StreamId,
        body: Decoded,
    ) -> Response {
        Response {
            status,
            version,
            protocol,
            headers,
            stream_id,
            body,
            trailers: None,
        }
    }

    /// 状态码
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// 响应行中的 HTTP 版本
    pub fn version(&self) -> Version {
        self.version
    }

    /// 承载本次交换的连接协议
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// 响应头
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 本次交换在连接上的流 ID
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// 读取下一个解码后的数据块；响应体结束时返回 `None`。
    ///
    /// 等待下一块数据的时间受读响应体截止时间约束。
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        loop {
            let frame = poll_fn(|cx| Pin::new(&mut self.body).poll_frame(cx)).await;
            let frame = match frame {
                Some(frame) => frame?,
                None => return Ok(None),
            };
            match frame.into_data() {
                Ok(data) if data.is_empty() => continue,
                Ok(data) => return Ok(Some(data)),
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        self.trailers = Some(trailers);
                    }
                }
            }
        }
    }

    /// 读取并拼接剩余的全部响应体。
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// 以 UTF-8 读取剩余的全部响应体，非法字节被替换为 U+FFFD。
    pub async fn text(self) -> crate::Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 响应体之后收到的 trailers；在响应体读完之前总是 `None`。
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// 解码后的响应体。
    pub fn into_body(self) -> Decoded {
        self.body
    }

    /// 未做内容解码的原始响应体。
    pub fn into_raw_body(self) -> Incoming {
        self.body.into_inner()
    }

    /// 放弃剩余的响应体，立即归还连接。
    pub fn close(self) {
        trace!("response closed on stream {}", self.stream_id);
        drop(self.body);
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("protocol", &self.protocol)
            .field("stream_id", &self.stream_id)
            .field("headers", &self.headers)
            .finish()
    }
}
