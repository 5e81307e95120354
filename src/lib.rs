#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # httpcore
//!
//! httpcore 是一个 HTTP 客户端内核：连接池、流多路复用、请求调度、
//! 分阶段超时以及响应体内容解码。
//!
//! ## 特性
//!
//! - HTTP/1.1 与 HTTP/2，TLS 连接由 ALPN 选择协议
//! - 按 `Origin` 复用连接，HTTP/2 连接上的多个请求并发进行
//! - 连接、写入、读响应头、读响应体四个阶段各自独立的截止时间
//! - 流式的请求体与响应体，`gzip` / `deflate` 响应自动解码
//! - 异步 API（[`Client`]）与同步 API（[`blocking::Client`]）
//!
//! ```no_run
//! # async fn run() -> httpcore::Result<()> {
//! let client = httpcore::Client::builder()
//!     .timeouts(httpcore::client::Timeouts::new(std::time::Duration::from_secs(10)))
//!     .build();
//!
//! let mut res = client.get("https://example.com/").await?;
//! while let Some(chunk) = res.chunk().await? {
//!     println!("read {} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # 可选特性
//!
//! - `http2`（默认开启）：HTTP/2 支持，基于 `h2` crate。
//! - `tracing`（默认开启）：通过 `tracing` 输出调试日志。
//! - `rustls`：基于 `rustls` 的 TLS 连接器与 ALPN 协商，`https` 请求需要它。
//! - `full`：开启以上全部。
//!
//! # 错误
//!
//! 每次请求要么得到响应，要么得到一个 [`Error`]，其种类可以用
//! `is_connect`、`is_pool_exhausted`、`is_timeout` 等方法区分。
//! 超时错误还会通过 [`Error::timeout_phase`] 标明是哪个阶段。

#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, Request, StatusCode, Uri, Version};

pub use crate::body::Body;
pub use crate::client::{Client, Response};
pub use crate::error::{BoxError, Error, Phase, Result};
pub use crate::proto::{Protocol, StreamId};

#[macro_use]
mod cfg;

#[macro_use]
mod trace;

pub mod blocking;
pub mod body;
pub mod client;
mod common;
mod error;
mod headers;
#[cfg(test)]
mod mock;
mod proto;
pub mod rt;
