//! HTTP/1.1 协议实现。
//!
//! 子模块分工：
//! - `conn`: 连接状态机，管理单个传输对象上的读写状态与 keep-alive
//! - `decode`: 响应体解码器（Content-Length / Chunked / EOF）
//! - `encode`: 请求体编码器
//! - `role`: 客户端角色，请求头编码与响应头解析

// Conn: HTTP/1.1 连接状态机
pub(crate) use self::conn::Conn;
// Decoder: 消息体解码器，mock 服务端同样用它解析 chunked 请求体
#[cfg(test)]
pub(crate) use self::decode::{Decoded, Decoder};

mod conn;
mod decode;
mod encode;
mod role;
