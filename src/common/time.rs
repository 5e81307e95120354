//! 截止时间管理
//!
//! 本模块是各阶段超时的统一实现：
//!
//! - [`Time`]：对用户提供的 [`Timer`] 的包装，也是连接池的时钟
//! - [`Timeout`]：为一个 future 加上某个阶段的截止时间（连接、写、读响应头）
//! - [`IdleDeadline`]：在 poll 风格的代码中使用的空闲超时（读响应体），
//!   每收到一个数据块后解除，下一次等待时重新计时
//!
//! ## 设计要点
//!
//! - 截止时间为 `None` 表示不限时；为 `Some(Duration::ZERO)` 表示立即超时，
//!   被包装的 future 一次都不会被 poll，保证"零超时永不阻塞"。
//! - 超时时丢弃被包装的 future 即中止了进行中的传输操作；连接是否还能复用，
//!   由持有连接的一方在 drop 时判断。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use pin_project_lite::pin_project;

use crate::error::Phase;
use crate::rt::{Sleep, Timer};

/// 用户提供的定时器；`Empty` 表示不启用任何截止时间。
#[derive(Clone)]
pub(crate) enum Time {
    Timer(Arc<dyn Timer + Send + Sync>),
    #[cfg_attr(not(test), allow(dead_code))]
    Empty,
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Time").finish()
    }
}

impl Time {
    fn sleep(&self, duration: Duration) -> Option<Pin<Box<dyn Sleep>>> {
        match *self {
            Time::Empty => {
                warn!("timeout of {:?} configured, but no timer set", duration);
                None
            }
            Time::Timer(ref t) => Some(t.sleep(duration)),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        match *self {
            Time::Empty => Instant::now(),
            Time::Timer(ref t) => t.now(),
        }
    }

    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        if let Time::Timer(ref t) = *self {
            t.reset(sleep, new_deadline);
        }
    }

    /// 为 `fut` 加上 `phase` 阶段的截止时间。
    pub(crate) fn timeout<F: Future>(
        &self,
        dur: Option<Duration>,
        phase: Phase,
        fut: F,
    ) -> Timeout<F> {
        let state = match dur {
            Some(d) if d.is_zero() => Deadline::Expired,
            Some(d) => match self.sleep(d) {
                Some(sleep) => Deadline::Armed(sleep),
                None => Deadline::Unbounded,
            },
            None => Deadline::Unbounded,
        };
        Timeout { fut, state, phase }
    }
}

enum Deadline {
    Unbounded,
    Armed(Pin<Box<dyn Sleep>>),
    Expired,
}

pin_project! {
    /// 带阶段截止时间的 future，到期时返回 `TimeoutError{phase}`。
    #[must_use = "futures do nothing unless polled"]
    pub(crate) struct Timeout<F> {
        #[pin]
        fut: F,
        state: Deadline,
        phase: Phase,
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = crate::Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.project();
        if let Deadline::Expired = *me.state {
            trace!("{} deadline is zero", me.phase);
            return Poll::Ready(Err(crate::Error::new_timeout(*me.phase)));
        }

        if let Poll::Ready(out) = me.fut.poll(cx) {
            return Poll::Ready(Ok(out));
        }

        if let Deadline::Armed(ref mut sleep) = *me.state {
            if sleep.as_mut().poll(cx).is_ready() {
                debug!("{} deadline elapsed", me.phase);
                *me.state = Deadline::Expired;
                return Poll::Ready(Err(crate::Error::new_timeout(*me.phase)));
            }
        }
        Poll::Pending
    }
}

/// 读取响应体时使用的空闲超时。
///
/// 只在底层读取返回 `Pending` 时计时；调用 `disarm` 后，下一次等待重新开始计时。
pub(crate) struct IdleDeadline {
    time: Time,
    dur: Option<Duration>,
    sleep: Option<Pin<Box<dyn Sleep>>>,
    armed: bool,
}

impl IdleDeadline {
    pub(crate) fn new(time: Time, dur: Option<Duration>) -> IdleDeadline {
        IdleDeadline {
            time,
            dur,
            sleep: None,
            armed: false,
        }
    }

    /// 在底层读取返回 `Pending` 后调用；到期时返回超时错误。
    pub(crate) fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> Poll<crate::Error> {
        let dur = match self.dur {
            Some(dur) => dur,
            None => return Poll::Pending,
        };
        if dur.is_zero() {
            return Poll::Ready(crate::Error::new_timeout(Phase::ReadBody));
        }

        if !self.armed {
            let deadline = self.time.now() + dur;
            match self.sleep {
                Some(ref mut sleep) => self.time.reset(sleep, deadline),
                None => self.sleep = self.time.sleep(dur),
            }
            self.armed = true;
        }

        match self.sleep {
            Some(ref mut sleep) => match sleep.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    debug!("read-body deadline elapsed after {:?} of inactivity", dur);
                    Poll::Ready(crate::Error::new_timeout(Phase::ReadBody))
                }
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Pending,
        }
    }

    /// 收到数据后调用，使下一次等待重新计时。
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl fmt::Debug for IdleDeadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleDeadline")
            .field("dur", &self.dur)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::TokioTimer;

    fn tokio_time() -> Time {
        Time::Timer(Arc::new(TokioTimer::new()))
    }

    #[tokio::test]
    async fn zero_deadline_never_polls_inner() {
        let time = tokio_time();
        let never = std::future::pending::<()>();
        let err = time
            .timeout(Some(Duration::ZERO), Phase::Connect, never)
            .await
            .unwrap_err();
        assert_eq!(err.timeout_phase(), Some(Phase::Connect));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses_with_phase() {
        let time = tokio_time();
        let never = std::future::pending::<()>();
        let err = time
            .timeout(Some(Duration::from_secs(3)), Phase::ReadHeaders, never)
            .await
            .unwrap_err();
        assert_eq!(err.timeout_phase(), Some(Phase::ReadHeaders));
    }

    #[tokio::test]
    async fn ready_future_wins() {
        let time = tokio_time();
        let out = time
            .timeout(Some(Duration::from_secs(3)), Phase::Write, async { 7 })
            .await
            .unwrap();
        assert_eq!(out, 7);

        let out = Time::Empty
            .timeout(None, Phase::Write, async { 8 })
            .await
            .unwrap();
        assert_eq!(out, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_rearms_after_disarm() {
        let mut idle = IdleDeadline::new(tokio_time(), Some(Duration::from_secs(2)));
        let first = futures_util::future::poll_fn(|cx| idle.poll_elapsed(cx)).await;
        assert_eq!(first.timeout_phase(), Some(Phase::ReadBody));

        idle.disarm();
        let start = tokio::time::Instant::now();
        let _ = futures_util::future::poll_fn(|cx| idle.poll_elapsed(cx)).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
