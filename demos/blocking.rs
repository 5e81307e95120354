//! # 同步客户端示例
//!
//! 不需要自己启动异步运行时：`blocking::Client` 在内部驱动请求。
//! 响应体实现了 `std::io::Read`，可以直接拷贝到标准输出。
//!
//! ```bash
//! cargo run --example blocking -- http://httpbin.org/gzip
//! ```

#![deny(warnings)]
#![warn(rust_2018_idioms)]
use std::env;
use std::io;

use httpcore::blocking::Client;
use tracing_subscriber::filter::LevelFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_writer(io::stderr)
        .init();

    let url = match env::args().nth(1) {
        Some(url) => url,
        None => {
            println!("Usage: blocking <url>");
            return Ok(());
        }
    };

    let client = Client::new()?;
    let mut res = client.get(url.as_str())?;

    eprintln!("Response: {} ({})", res.status(), res.protocol());
    eprintln!("Headers: {:#?}\n", res.headers());

    io::copy(&mut res, &mut io::stdout().lock())?;
    eprintln!("\n\n{:?}", client.pool_stats());
    Ok(())
}
