//! 运行时抽象
//!
//! 客户端需要运行时提供三种能力：
//!
//! - [`Io`]：连接器返回的传输层字节流
//! - [`Executor`]：在后台驱动 HTTP/2 连接（`h2` 的 `Connection` future 必须被持续 poll，
//!   多路复用的流才能收发帧）
//! - [`Timer`]：为各阶段截止时间提供睡眠，并为连接池提供时钟
//!
//! 默认实现 [`TokioExecutor`] 与 [`TokioTimer`] 基于 tokio。

mod io;
mod timer;
mod tokio;

pub(crate) use self::io::BoxIo;
pub use self::io::Io;
pub use self::timer::{Sleep, Timer};
pub use self::tokio::{TokioExecutor, TokioSleep, TokioTimer};

/// 执行 future 的执行器。
///
/// 客户端用它在后台运行每个 HTTP/2 连接的驱动任务。
pub trait Executor<Fut> {
    /// 将 future 放到执行器上运行。
    fn execute(&self, fut: Fut);
}
