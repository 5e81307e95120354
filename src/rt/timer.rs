//! 定时器抽象
//!
//! 客户端的所有截止时间（连接、写、读响应头、读响应体）和连接池的时钟都通过
//! [`Timer`] 获取，而不是直接调用某个运行时的 API。默认实现是
//! [`TokioTimer`](super::TokioTimer)。
//!
//! `Timer::now()` 也是连接池计算空闲时长的唯一时钟来源，测试可以替换为
//! 可控的时钟来模拟时间推进。
//!
//! # 示例
//!
//! ```ignore
//! use std::time::{Duration, Instant};
//! use std::pin::Pin;
//! use httpcore::rt::{Sleep, Timer};
//!
//! struct MyTimer;
//!
//! impl Timer for MyTimer {
//!     fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
//!         Box::pin(MySleep::new(duration))
//!     }
//!
//!     fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
//!         Box::pin(MySleep::until(deadline))
//!     }
//! }
//! ```

use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// 提供睡眠与当前时间的定时器。
pub trait Timer {
    /// 返回一个在 `duration` 之后完成的 future。
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>>;

    /// 返回一个在 `deadline` 时刻完成的 future。
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>>;

    /// 当前时间。默认使用系统单调时钟。
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// 将已有的 `Sleep` 重置到新的截止时间。
    ///
    /// 默认实现直接创建一个新的 `Sleep` 替换旧的，实现方可以复用底层计时器。
    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        *sleep = self.sleep_until(new_deadline);
    }
}

/// [`Timer`] 返回的睡眠 future。
pub trait Sleep: Send + Sync + Future<Output = ()> {}
