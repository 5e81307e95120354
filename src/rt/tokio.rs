//! 基于 tokio 的默认执行器与定时器

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use pin_project_lite::pin_project;

use super::{Executor, Sleep, Timer};

/// 使用 `tokio::spawn` 的执行器。
#[non_exhaustive]
#[derive(Default, Debug, Clone)]
pub struct TokioExecutor {}

/// 基于 `tokio::time` 的定时器。
///
/// `now()` 读取 tokio 的时钟，因此在 `tokio::time::pause()` 之后，
/// 连接池看到的时间也会随 `tokio::time::advance()` 推进。
#[non_exhaustive]
#[derive(Default, Clone, Debug)]
pub struct TokioTimer;

pin_project! {
    /// [`TokioTimer`] 返回的睡眠 future。
    #[derive(Debug)]
    pub struct TokioSleep {
        #[pin]
        inner: tokio::time::Sleep,
    }
}

// ===== impl TokioExecutor =====

impl<Fut> Executor<Fut> for TokioExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::spawn(fut);
    }
}

impl TokioExecutor {
    /// 创建一个新的执行器。
    pub fn new() -> Self {
        Self {}
    }
}

// ===== impl TokioTimer =====

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: tokio::time::sleep(duration),
        })
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: tokio::time::sleep_until(deadline.into()),
        })
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl TokioTimer {
    /// 创建一个新的定时器。
    pub fn new() -> Self {
        Self
    }
}

// ===== impl TokioSleep =====

impl Future for TokioSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl Sleep for TokioSleep {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn now_follows_paused_clock() {
        let timer = TokioTimer::new();
        let start = timer.now();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(timer.now() - start >= Duration::from_secs(30));

        let before = timer.now();
        timer.sleep(Duration::from_secs(5)).await;
        assert!(timer.now() - before >= Duration::from_secs(5));
    }
}
