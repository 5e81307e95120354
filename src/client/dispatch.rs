//! 请求调度
//!
//! 把一个请求从解析目标一路带到响应头：解析 `Origin`，从连接池获取连接，
//! 在连接上打开流，发送请求，等待响应头。连接忙或对端拒绝新流时，
//! 强制新建连接重试，次数由 `max_retries` 限定。
//!
//! 连接租约始终只有一个持有者：先是 [`Stream`]，然后是响应体。任何一条退出路径
//! 上租约被 drop 时都会恰好归还一次。

use std::mem;

use http::Request;

use super::config::{Config, Timeouts};
use super::origin::{self, Origin};
use super::pool::Pool;
use super::response::Response;
use super::stream::{self, Stream};
use crate::body::Body;

pub(crate) async fn send(pool: &Pool, mut req: Request<Body>, config: &Config) -> crate::Result<Response> {
    let timeouts = req
        .extensions_mut()
        .remove::<Timeouts>()
        .unwrap_or(config.timeouts);

    let uri = origin::resolve(config.base_url.as_ref(), mem::take(req.uri_mut()))?;
    let origin = Origin::from_uri(&uri)?;
    *req.uri_mut() = uri;

    let mut stream = open(pool, &origin, config, &timeouts).await?;
    debug!("{} {} via {:?}", req.method(), req.uri(), stream);

    stream.send_request(req).await?;
    stream.receive_response().await
}

/// 获取连接并打开流；连接忙或流被拒绝时强制新建连接重试。
async fn open(pool: &Pool, origin: &Origin, config: &Config, timeouts: &Timeouts) -> crate::Result<Stream> {
    let mut retries = 0;
    loop {
        let force_new = retries > 0;
        let lease = pool.acquire(origin, config.version, force_new, timeouts).await?;
        match stream::open_stream(lease, pool.time().clone(), *timeouts) {
            Ok(stream) => return Ok(stream),
            Err(err) if retryable(&err) && retries < config.max_retries => {
                retries += 1;
                debug!("{}, retrying on a new connection ({}/{})", err, retries, config.max_retries);
            }
            Err(err) => return Err(err),
        }
    }
}

fn retryable(err: &crate::Error) -> bool {
    err.is_connection_busy() || err.is_stream_refused()
}
