//! # 异步客户端示例
//!
//! 从命令行读取 URL 并发起 `GET` 请求，把响应头打印到标准错误，
//! 响应体逐块写到标准输出。第二个参数给出时，会在同一个客户端上并发请求多次，
//! 用来观察连接池的复用与 HTTP/2 多路复用。
//!
//! ```bash
//! cargo run --example client -- http://httpbin.org/ip
//! cargo run --example client --features rustls -- https://example.com/ 8
//! ```

#![deny(warnings)]
#![warn(rust_2018_idioms)]
use std::env;

use httpcore::client::{PoolLimits, Timeouts};
use httpcore::Client;
use tokio::io::{self, AsyncWriteExt as _};
use tracing_subscriber::filter::LevelFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let url = match env::args().nth(1) {
        Some(url) => url,
        None => {
            println!("Usage: client <url> [parallel]");
            return Ok(());
        }
    };
    let parallel: usize = match env::args().nth(2) {
        Some(n) => n.parse()?,
        None => 1,
    };

    let mut builder = Client::builder();
    builder
        .pool_limits(PoolLimits::default().max_connections_per_origin(4))
        .timeouts(Timeouts::new(std::time::Duration::from_secs(10)));
    let client = builder.build();

    if parallel == 1 {
        return fetch_url(&client, &url).await;
    }

    let mut tasks = Vec::with_capacity(parallel);
    for _ in 0..parallel {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let res = client.get(url.as_str()).await?;
            let (status, protocol, id) = (res.status(), res.protocol(), res.stream_id());
            let len = res.bytes().await?.len();
            Result::Ok(format!("{} over {} stream {}: {} bytes", status, protocol, id, len))
        }));
    }
    for task in tasks {
        eprintln!("{}", task.await??);
    }
    eprintln!("{:?}", client.pool_stats());
    client.shutdown();
    Ok(())
}

async fn fetch_url(client: &Client, url: &str) -> Result<()> {
    let mut res = client.get(url).await?;

    eprintln!("Response: {} ({})", res.status(), res.protocol());
    eprintln!("Headers: {:#?}\n", res.headers());

    let mut stdout = io::stdout();
    while let Some(chunk) = res.chunk().await? {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    eprintln!("\n\nDone!");
    Ok(())
}
