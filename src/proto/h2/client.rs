//! HTTP/2 客户端连接
//!
//! `handshake` 完成 HTTP/2 前言与 SETTINGS 交换后，把 `h2` 的 `Connection`
//! 交给执行器在后台驱动，并返回可克隆的 [`ClientHandle`]。每个流通过句柄打开，
//! 多个流共享同一个连接。
//!
//! 连接任务在以下情况下结束，结束时调用 `on_close` 通知连接池：
//!
//! - 对端关闭连接或发送 GOAWAY，且所有流都已结束
//! - 所有 `ClientHandle` 都被 drop，且剩余的流都已结束
//! - 连接级错误

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use bytes::Bytes;
use futures_channel::mpsc;
use futures_core::Stream;
use futures_util::future::poll_fn;
use h2::client::{Builder, ResponseFuture, SendRequest};
use h2::SendStream;
use http::Request;

use crate::common::exec::Exec;
use crate::rt::BoxIo;

// 默认连接窗口 5MB，协议默认的 64KB 对吞吐限制较大
const DEFAULT_CONN_WINDOW: u32 = 1024 * 1024 * 5; // 5mb
const DEFAULT_STREAM_WINDOW: u32 = 1024 * 1024 * 2; // 2mb
const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 16; // 16kb
const DEFAULT_MAX_SEND_BUF_SIZE: usize = 1024 * 1024; // 1mb
const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 1024 * 16; // 16kb

// 收到服务端第一个 SETTINGS 之前允许打开的并发流数量，取协议建议的最小通告值。
const DEFAULT_INITIAL_MAX_SEND_STREAMS: usize = 100;

/// HTTP/2 连接参数
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) initial_conn_window_size: u32,
    pub(crate) initial_stream_window_size: u32,
    pub(crate) initial_max_send_streams: usize,
    pub(crate) max_frame_size: Option<u32>,
    pub(crate) max_header_list_size: u32,
    pub(crate) max_send_buffer_size: usize,
    pub(crate) max_concurrent_reset_streams: Option<usize>,
    pub(crate) header_table_size: Option<u32>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            initial_conn_window_size: DEFAULT_CONN_WINDOW,
            initial_stream_window_size: DEFAULT_STREAM_WINDOW,
            initial_max_send_streams: DEFAULT_INITIAL_MAX_SEND_STREAMS,
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            max_send_buffer_size: DEFAULT_MAX_SEND_BUF_SIZE,
            max_concurrent_reset_streams: None,
            header_table_size: None,
        }
    }
}

fn new_builder(config: &Config) -> Builder {
    let mut builder = Builder::default();
    builder
        .initial_max_send_streams(config.initial_max_send_streams)
        .initial_window_size(config.initial_stream_window_size)
        .initial_connection_window_size(config.initial_conn_window_size)
        .max_header_list_size(config.max_header_list_size)
        .max_send_buffer_size(config.max_send_buffer_size)
        .enable_push(false);
    if let Some(max) = config.max_frame_size {
        builder.max_frame_size(max);
    }
    if let Some(max) = config.max_concurrent_reset_streams {
        builder.max_concurrent_reset_streams(max);
    }
    if let Some(size) = config.header_table_size {
        builder.header_table_size(size);
    }
    builder
}

/// 多路复用连接的发送句柄。
///
/// 克隆句柄即共享连接；最后一个句柄被 drop 后，连接任务在剩余的流结束时退出。
#[derive(Clone)]
pub(crate) struct ClientHandle {
    tx: SendRequest<Bytes>,
    // 只用于探测所有句柄何时被 drop：drop 所有 `SendRequest` 不会唤醒停放中的 `Connection`
    _conn_drop_ref: mpsc::Sender<Infallible>,
}

/// 建立 HTTP/2 连接，并在 `exec` 上启动连接驱动任务。
pub(crate) async fn handshake<F>(
    io: BoxIo,
    config: &Config,
    exec: &Exec,
    on_close: F,
) -> crate::Result<ClientHandle>
where
    F: FnOnce() + Send + 'static,
{
    let (tx, mut conn) = new_builder(config)
        .handshake::<_, Bytes>(io)
        .await
        .map_err(crate::Error::new_h2)?;

    let (conn_drop_ref, mut conn_drop_rx) = mpsc::channel::<Infallible>(1);

    exec.execute(async move {
        let mut shutting_down = false;
        let res = poll_fn(|cx| {
            if !shutting_down {
                if let Poll::Ready(None) = Pin::new(&mut conn_drop_rx).poll_next(cx) {
                    // 句柄全部释放后再轮询一次 conn，没有活动流时它会自行结束
                    trace!("all connection handles dropped, starting conn shutdown");
                    shutting_down = true;
                }
            }
            Pin::new(&mut conn).poll(cx)
        })
        .await;
        match res {
            Ok(()) => {
                debug!("http2 connection closed");
            }
            Err(_e) => {
                debug!("http2 connection error: {}", _e);
            }
        }
        on_close();
    });

    Ok(ClientHandle {
        tx,
        _conn_drop_ref: conn_drop_ref,
    })
}

// ===== impl ClientHandle =====

impl ClientHandle {
    /// 对端当前允许的最大并发流数量（SETTINGS_MAX_CONCURRENT_STREAMS）。
    pub(crate) fn current_max_send_streams(&self) -> usize {
        self.tx.current_max_send_streams()
    }

    /// 连接是否已关闭（GOAWAY 或连接错误）。
    pub(crate) fn is_closed(&mut self) -> bool {
        let waker = futures_util::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        matches!(self.tx.poll_ready(&mut cx), Poll::Ready(Err(_)))
    }

    /// 打开一个新流并发送请求头。`end_of_stream` 为真时请求没有消息体。
    pub(crate) async fn send_request(
        &mut self,
        req: Request<()>,
        end_of_stream: bool,
    ) -> crate::Result<(ResponseFuture, SendStream<Bytes>)> {
        poll_fn(|cx| self.tx.poll_ready(cx))
            .await
            .map_err(crate::Error::new_h2)?;
        self.tx
            .send_request(req, end_of_stream)
            .map_err(crate::Error::new_h2)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_channel::oneshot;

    use super::*;
    use crate::rt::TokioExecutor;

    async fn connect_pair() -> (ClientHandle, oneshot::Receiver<()>, tokio::task::JoinHandle<usize>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            // 客户端可能在服务端握手完成前就已经关闭
            let mut conn = match h2::server::handshake(server).await {
                Ok(conn) => conn,
                Err(_) => return 0,
            };
            let mut accepted = 0;
            while let Some(res) = conn.accept().await {
                let (_req, mut respond) = match res {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let res = http::Response::new(());
                respond.send_response(res, true).unwrap();
                accepted += 1;
            }
            accepted
        });
        let (closed_tx, closed_rx) = oneshot::channel();
        let exec = Exec::new(TokioExecutor::new());
        let handle = handshake(Box::new(client), &Config::default(), &exec, move || {
            let _ = closed_tx.send(());
        })
        .await
        .unwrap();
        (handle, closed_rx, server)
    }

    #[tokio::test]
    async fn dropping_every_handle_ends_the_connection() {
        let (handle, closed, server) = connect_pair().await;
        let other = handle.clone();
        drop(handle);
        drop(other);

        tokio::time::timeout(Duration::from_secs(5), closed)
            .await
            .expect("connection task should finish")
            .unwrap();
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn connection_outlives_handles_until_streams_finish() {
        let (mut handle, closed, server) = connect_pair().await;
        let req = Request::get("http://example.com/").body(()).unwrap();
        let (response, send) = handle.send_request(req, true).await.unwrap();
        drop(send);
        drop(handle);

        let status = response.await.unwrap().status();
        assert_eq!(status, http::StatusCode::OK);
        tokio::time::timeout(Duration::from_secs(5), closed)
            .await
            .expect("connection task should finish")
            .unwrap();
        assert_eq!(server.await.unwrap(), 1);
    }
}
