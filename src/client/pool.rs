//! 连接池
//!
//! 连接池以 [`Origin`] 为键管理所有物理连接，是客户端唯一的共享可变状态。
//! 所有计数与集合都在一把互斥锁下修改：
//!
//! - `conns`：连接表，`ConnId` 是流回指连接时使用的编号
//! - `idle`：没有任何租约的连接，队首是最久未使用的
//! - `per_origin` / `connecting`：容量计数，正在建立的连接也占用名额
//! - `waiters`：容量不足时排队的请求，先进先出
//!
//! ## 租约
//!
//! `acquire` 返回 [`Pooled`] 租约。HTTP/1.1 的租约独占连接本身（连接对象从池中
//! 移出）；HTTP/2 的租约持有连接句柄的一个克隆，同一连接可以同时借出多份，
//! 上限是对端通告的并发流数量。租约在 drop 时归还，连接池据此决定复用、
//! 放回空闲集合或丢弃连接，并把腾出的连接或名额交给排队最久的请求。
//!
//! 正在建立的连接由 `Reservation` 守卫表示：连接失败、超时或调用方取消时
//! 守卫被 drop，名额随之归还。
//!
//! ## 锁的使用约定
//!
//! 持锁期间只做簿记，不执行任何可能再次获取同一把锁的操作：
//! 交给排队者的租约与守卫在解锁后才通过 oneshot 发送（见 `deliver`），
//! 发送失败的租约在锁外被 drop，走正常的归还流程。

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use futures_channel::oneshot;

use super::config::{PoolLimits, Timeouts, VersionPref};
use super::connect::{Connect, Connected};
use super::origin::Origin;
use crate::common::exec::Exec;
use crate::common::time::Time;
use crate::error::Phase;
use crate::proto::h1;
#[cfg(feature = "http2")]
use crate::proto::h2::{self, ClientHandle};
use crate::proto::Protocol;

/// 连接池中连接的编号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ConnId(u64);

/// 连接池的瞬时统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 已建立的连接总数（空闲 + 使用中）
    pub connections: usize,
    /// 空闲连接数
    pub idle: usize,
    /// 至少有一个租约的连接数
    pub in_use: usize,
    /// 正在建立的连接数
    pub connecting: usize,
    /// 排队等待连接的请求数
    pub waiting: usize,
    /// 所有连接上打开的流的总数
    pub open_streams: usize,
}

#[derive(Clone)]
pub(crate) struct Pool {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    state: Mutex<PoolState>,
    limits: PoolLimits,
    time: Time,
    connector: Arc<dyn Connect>,
    #[cfg_attr(not(feature = "http2"), allow(dead_code))]
    exec: Exec,
    #[cfg(feature = "http2")]
    h2: h2::Config,
}

struct PoolState {
    conns: HashMap<ConnId, Entry>,
    idle: VecDeque<ConnId>,
    per_origin: HashMap<Origin, usize>,
    connecting: usize,
    h2_connecting: HashSet<Origin>,
    known_h2: HashSet<Origin>,
    waiters: VecDeque<Waiter>,
    closed: bool,
    next_id: u64,
}

struct Entry {
    origin: Origin,
    protocol: Protocol,
    #[allow(dead_code)]
    created: Instant,
    last_active: Instant,
    open_streams: usize,
    leases: usize,
    closing: bool,
    codec: Codec,
}

/// 连接表中保存的编解码器。HTTP/1.1 连接借出时为 `None`。
enum Codec {
    H1(Option<h1::Conn>),
    #[cfg(feature = "http2")]
    H2(ClientHandle),
}

/// 租约持有的连接。
pub(crate) enum Leased {
    H1(h1::Conn),
    #[cfg(feature = "http2")]
    H2(ClientHandle),
}

struct Waiter {
    origin: Origin,
    pref: VersionPref,
    tx: oneshot::Sender<Grant>,
}

enum Grant {
    Reuse(Pooled),
    Connect(Reservation),
}

enum Checkout {
    Ready(Pooled),
    Connect(Reservation),
    Wait(oneshot::Receiver<Grant>),
}

type Deliveries = Vec<(oneshot::Sender<Grant>, Grant)>;

/// 一个连接的租约。drop 时归还给连接池。
pub(crate) struct Pooled {
    pool: Weak<Shared>,
    id: ConnId,
    protocol: Protocol,
    conn: Option<Leased>,
    fresh: bool,
    stream_open: bool,
    poisoned: bool,
}

/// 正在建立的连接占用的名额。
struct Reservation {
    shared: Arc<Shared>,
    origin: Origin,
    id: ConnId,
    h2_lock: bool,
    done: bool,
}

// ===== impl Pool =====

impl Pool {
    pub(crate) fn new(
        limits: PoolLimits,
        time: Time,
        connector: Arc<dyn Connect>,
        exec: Exec,
        #[cfg(feature = "http2")] h2: h2::Config,
    ) -> Pool {
        Pool {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    conns: HashMap::new(),
                    idle: VecDeque::new(),
                    per_origin: HashMap::new(),
                    connecting: 0,
                    h2_connecting: HashSet::new(),
                    known_h2: HashSet::new(),
                    waiters: VecDeque::new(),
                    closed: false,
                    next_id: 1,
                }),
                limits,
                time,
                connector,
                exec,
                #[cfg(feature = "http2")]
                h2,
            }),
        }
    }

    /// 获取一个可以承载新流的连接。
    ///
    /// 依次尝试：复用已有连接；等待同一 `Origin` 上正在建立的 HTTP/2 连接；
    /// 在容量允许时新建连接（必要时逐出其他 `Origin` 的空闲连接）；
    /// 以上都不行时排队，直到被分配连接或名额，或者等待超时（`PoolExhausted`）。
    ///
    /// `force_new` 为真时跳过复用，直接申请新连接。
    pub(crate) async fn acquire(
        &self,
        origin: &Origin,
        pref: VersionPref,
        force_new: bool,
        timeouts: &Timeouts,
    ) -> crate::Result<Pooled> {
        let grant = match self.shared.try_acquire(origin, pref, force_new)? {
            Checkout::Ready(pooled) => return Ok(pooled),
            Checkout::Connect(reservation) => return self.connect(reservation, pref, timeouts).await,
            Checkout::Wait(rx) => {
                let budget = self.shared.limits.pool_timeout.or(timeouts.connect);
                debug!("waiting for a connection to {} (deadline {:?})", origin, budget);
                match self.shared.time.timeout(budget, Phase::Connect, rx).await {
                    Ok(Ok(grant)) => grant,
                    Ok(Err(_canceled)) => return Err(crate::Error::new_pool_closed()),
                    Err(_timeout) => {
                        debug!("pool wait for {} expired", origin);
                        return Err(crate::Error::new_pool_exhausted());
                    }
                }
            }
        };

        match grant {
            Grant::Reuse(pooled) => Ok(pooled),
            Grant::Connect(reservation) => self.connect(reservation, pref, timeouts).await,
        }
    }

    /// 建立传输连接并完成协议协商（HTTP/2 还包括握手），整体受连接阶段截止时间约束。
    async fn connect(
        &self,
        reservation: Reservation,
        pref: VersionPref,
        timeouts: &Timeouts,
    ) -> crate::Result<Pooled> {
        let shared = &self.shared;
        let id = reservation.id;
        debug!("connecting to {} as connection {:?}", reservation.origin, id);

        let connecting = shared.connector.connect(&reservation.origin, pref);
        let setup = async {
            let connected = connecting.await.map_err(crate::Error::new_connect)?;
            shared.establish(id, connected, pref).await
        };
        let leased = match shared.time.timeout(timeouts.connect, Phase::Connect, setup).await {
            Ok(Ok(leased)) => leased,
            Ok(Err(err)) => {
                debug!("connect to {} failed: {}", reservation.origin, err);
                return Err(err);
            }
            Err(timeout) => return Err(timeout),
        };
        reservation.complete(leased)
    }

    /// 关闭空闲超时的连接，再按最近最少使用逐出超出保留上限的空闲连接。
    pub(crate) fn evict_idle(&self) -> usize {
        let mut deliveries = Vec::new();
        let evicted = {
            let mut state = self.shared.lock();
            let now = self.shared.time.now();
            let evicted = state.evict_expired(now, &self.shared.limits)
                + state.enforce_keepalive(&self.shared.limits);
            if evicted > 0 {
                self.shared.serve_waiters(&mut state, &mut deliveries);
            }
            evicted
        };
        deliver(deliveries);
        evicted
    }

    /// 关闭连接池：关闭所有空闲连接，使用中的连接在租约归还后关闭，
    /// 排队和之后的请求都以取消失败。
    pub(crate) fn shutdown(&self) {
        let waiters = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<ConnId> = state.idle.iter().copied().collect();
            for id in idle {
                state.remove_entry(id);
            }
            for entry in state.conns.values_mut() {
                entry.closing = true;
            }
            debug!(
                "pool shut down, {} connections still in use",
                state.conns.len()
            );
            std::mem::take(&mut state.waiters)
        };
        drop(waiters);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            connections: state.conns.len(),
            idle: state.idle.len(),
            in_use: state.conns.values().filter(|e| e.leases > 0).count(),
            connecting: state.connecting,
            waiting: state.waiters.iter().filter(|w| !w.tx.is_canceled()).count(),
            open_streams: state.conns.values().map(|e| e.open_streams).sum(),
        }
    }

    pub(crate) fn time(&self) -> &Time {
        &self.shared.time
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("limits", &self.shared.limits)
            .field("stats", &self.stats())
            .finish()
    }
}

// ===== impl Shared =====

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(
        self: &Arc<Self>,
        origin: &Origin,
        pref: VersionPref,
        force_new: bool,
    ) -> crate::Result<Checkout> {
        let mut deliveries = Vec::new();
        let checkout = {
            let mut state = self.lock();
            self.checkout_locked(&mut state, origin, pref, force_new, &mut deliveries)
        };
        deliver(deliveries);
        checkout
    }

    fn checkout_locked(
        self: &Arc<Self>,
        state: &mut PoolState,
        origin: &Origin,
        pref: VersionPref,
        force_new: bool,
        deliveries: &mut Deliveries,
    ) -> crate::Result<Checkout> {
        if state.closed {
            return Err(crate::Error::new_pool_closed());
        }
        let now = self.time.now();
        state.waiters.retain(|w| !w.tx.is_canceled());
        if state.evict_expired(now, &self.limits) > 0 {
            self.serve_waiters(state, deliveries);
        }

        if !force_new {
            if let Some(pooled) = state.checkout(self, origin, pref, now) {
                return Ok(Checkout::Ready(pooled));
            }
            if state.should_coalesce(origin, pref) {
                trace!("waiting for in-flight http2 connect to {}", origin);
                return Ok(Checkout::Wait(state.enqueue(origin, pref)));
            }
        }

        // 同一 Origin 已有排队者时不插队
        let queued = state.waiters.iter().any(|w| w.origin == *origin);
        if !queued && state.make_room(origin, &self.limits) {
            return Ok(Checkout::Connect(state.reserve(self, origin, pref)));
        }
        trace!("pool at capacity for {}, queueing", origin);
        Ok(Checkout::Wait(state.enqueue(origin, pref)))
    }

    async fn establish(
        self: &Arc<Self>,
        id: ConnId,
        connected: Connected,
        pref: VersionPref,
    ) -> crate::Result<Leased> {
        match connected.protocol {
            Protocol::Http1 if pref.allows_http1() => Ok(Leased::H1(h1::Conn::new(connected.io))),
            Protocol::Http1 => Err(crate::Error::new_connect(
                "peer did not negotiate HTTP/2",
            )),
            #[cfg(feature = "http2")]
            Protocol::Http2 => {
                let pool = Arc::downgrade(self);
                let on_close = move || {
                    if let Some(shared) = pool.upgrade() {
                        shared.connection_lost(id);
                    }
                };
                let handle = h2::handshake(connected.io, &self.h2, &self.exec, on_close)
                    .await
                    .map_err(crate::Error::new_connect)?;
                Ok(Leased::H2(handle))
            }
            #[cfg(not(feature = "http2"))]
            Protocol::Http2 => Err(crate::Error::new_connect(
                "HTTP/2 support is not enabled",
            )),
        }
    }

    /// 把空闲连接或空出的名额依次交给排队者。
    ///
    /// 按排队顺序检查每个排队者：能复用连接就给租约，能新建连接就给名额，
    /// 都不行则留在队列中，不阻塞后面其他 `Origin` 的排队者。
    fn serve_waiters(self: &Arc<Self>, state: &mut PoolState, deliveries: &mut Deliveries) {
        if state.closed {
            return;
        }
        let now = self.time.now();
        let mut i = 0;
        while i < state.waiters.len() {
            if state.waiters[i].tx.is_canceled() {
                state.waiters.remove(i);
                continue;
            }
            let origin = state.waiters[i].origin.clone();
            let pref = state.waiters[i].pref;

            let grant = match state.checkout(self, &origin, pref, now) {
                Some(pooled) => Some(Grant::Reuse(pooled)),
                None if state.should_coalesce(&origin, pref) => None,
                None if state.make_room(&origin, &self.limits) => {
                    Some(Grant::Connect(state.reserve(self, &origin, pref)))
                }
                None => None,
            };

            match grant {
                Some(grant) => {
                    if let Some(waiter) = state.waiters.remove(i) {
                        trace!("waking waiter for {}", origin);
                        deliveries.push((waiter.tx, grant));
                    }
                }
                None => i += 1,
            }
        }
    }

    fn release(
        self: &Arc<Self>,
        id: ConnId,
        leased: Option<Leased>,
        stream_open: bool,
        poisoned: bool,
    ) {
        let mut deliveries = Vec::new();
        {
            let mut state = self.lock();
            let now = self.time.now();
            let closed = state.closed;
            let mut keep = false;
            let mut remove = false;

            match state.conns.get_mut(&id) {
                None => {
                    trace!("released connection {:?} is no longer pooled", id);
                }
                Some(entry) => {
                    entry.leases = entry.leases.saturating_sub(1);
                    if stream_open {
                        entry.open_streams = entry.open_streams.saturating_sub(1);
                    }
                    entry.last_active = now;
                    if poisoned {
                        entry.closing = true;
                    }

                    match leased {
                        Some(Leased::H1(mut conn)) => {
                            if !closed && !entry.closing && entry.open_streams == 0 && conn.is_reusable()
                            {
                                conn.prepare_reuse();
                                entry.codec = Codec::H1(Some(conn));
                                keep = true;
                            } else {
                                debug!(
                                    "discarding http1 connection {:?} to {} (reusable={})",
                                    id,
                                    entry.origin,
                                    conn.is_reusable()
                                );
                                remove = true;
                            }
                        }
                        #[cfg(feature = "http2")]
                        Some(Leased::H2(_)) => {
                            if entry.leases == 0 {
                                if closed || entry.closing {
                                    debug!("discarding http2 connection {:?}", id);
                                    remove = true;
                                } else {
                                    keep = true;
                                }
                            }
                        }
                        None => remove = entry.leases == 0,
                    }
                }
            }

            if remove {
                state.remove_entry(id);
            } else if keep {
                trace!("connection {:?} returned to idle set", id);
                state.idle.push_back(id);
                state.enforce_keepalive(&self.limits);
            }
            self.serve_waiters(&mut state, &mut deliveries);
        }
        deliver(deliveries);
    }

    /// HTTP/2 连接任务结束后调用。
    fn connection_lost(self: &Arc<Self>, id: ConnId) {
        let mut deliveries = Vec::new();
        {
            let mut state = self.lock();
            let idle = match state.conns.get_mut(&id) {
                Some(entry) => {
                    entry.closing = true;
                    entry.leases == 0
                }
                None => false,
            };
            if idle {
                debug!("connection {:?} closed while idle", id);
                state.remove_entry(id);
            }
            self.serve_waiters(&mut state, &mut deliveries);
        }
        deliver(deliveries);
    }

    fn open_stream(&self, id: ConnId, max: usize) -> bool {
        let mut state = self.lock();
        match state.conns.get_mut(&id) {
            Some(entry) if !entry.closing && entry.open_streams < max => {
                entry.open_streams += 1;
                true
            }
            _ => false,
        }
    }
}

fn deliver(deliveries: Deliveries) {
    for (tx, grant) in deliveries {
        if let Err(_grant) = tx.send(grant) {
            // 排队者已经离开，租约或名额在这里被 drop 并归还
            trace!("waiter left before grant was delivered");
        }
    }
}

// ===== impl PoolState =====

impl PoolState {
    fn checkout(
        &mut self,
        shared: &Arc<Shared>,
        origin: &Origin,
        pref: VersionPref,
        now: Instant,
    ) -> Option<Pooled> {
        if pref.allows_http2() {
            if let Some(pooled) = self.checkout_h2(shared, origin, now) {
                return Some(pooled);
            }
        }
        if pref.allows_http1() {
            return self.checkout_h1(shared, origin, now);
        }
        None
    }

    #[cfg(feature = "http2")]
    fn checkout_h2(&mut self, shared: &Arc<Shared>, origin: &Origin, now: Instant) -> Option<Pooled> {
        let mut found = None;
        let mut dead = Vec::new();
        for (&id, entry) in self.conns.iter_mut() {
            if entry.origin != *origin || entry.closing {
                continue;
            }
            if let Codec::H2(ref mut handle) = entry.codec {
                if handle.is_closed() {
                    entry.closing = true;
                    if entry.leases == 0 {
                        dead.push(id);
                    }
                    continue;
                }
                if entry.leases < handle.current_max_send_streams() {
                    found = Some((id, handle.clone()));
                    break;
                }
            }
        }
        for id in dead {
            debug!("removing closed http2 connection {:?}", id);
            self.remove_entry(id);
        }

        let (id, handle) = found?;
        self.idle.retain(|&i| i != id);
        let entry = self.conns.get_mut(&id)?;
        entry.leases += 1;
        entry.last_active = now;
        trace!(
            "reusing http2 connection {:?} to {} ({} leases)",
            id,
            origin,
            entry.leases
        );
        Some(Pooled::new(shared, id, Protocol::Http2, Leased::H2(handle), false))
    }

    #[cfg(not(feature = "http2"))]
    fn checkout_h2(&mut self, _: &Arc<Shared>, _: &Origin, _: Instant) -> Option<Pooled> {
        None
    }

    /// 取最近使用的空闲 HTTP/1.1 连接；已被对端关闭的连接在这里被丢弃。
    fn checkout_h1(&mut self, shared: &Arc<Shared>, origin: &Origin, now: Instant) -> Option<Pooled> {
        loop {
            let conns = &self.conns;
            let pos = self.idle.iter().rposition(|id| {
                conns
                    .get(id)
                    .map_or(false, |e| e.origin == *origin && e.protocol == Protocol::Http1)
            })?;
            let id = self.idle.remove(pos)?;

            let conn = match self.conns.get_mut(&id) {
                Some(entry) => entry.codec.take_h1(),
                None => continue,
            };
            let mut conn = match conn {
                Some(conn) => conn,
                None => {
                    self.remove_entry(id);
                    continue;
                }
            };
            if !conn.check_idle() {
                debug!("idle connection {:?} to {} is no longer usable", id, origin);
                self.remove_entry(id);
                continue;
            }

            if let Some(entry) = self.conns.get_mut(&id) {
                entry.leases = 1;
                entry.last_active = now;
            }
            trace!("reusing http1 connection {:?} to {}", id, origin);
            return Some(Pooled::new(shared, id, Protocol::Http1, Leased::H1(conn), false));
        }
    }

    fn should_coalesce(&self, origin: &Origin, pref: VersionPref) -> bool {
        self.wants_h2(origin, pref) && self.h2_connecting.contains(origin)
    }

    fn wants_h2(&self, origin: &Origin, pref: VersionPref) -> bool {
        match pref {
            VersionPref::Http2Only => true,
            VersionPref::Auto => self.known_h2.contains(origin),
            VersionPref::Http1Only => false,
        }
    }

    /// 检查容量，必要时按最近最少使用逐出空闲连接来腾出名额。
    fn make_room(&mut self, origin: &Origin, limits: &PoolLimits) -> bool {
        loop {
            let total = self.conns.len() + self.connecting;
            let per = self.per_origin.get(origin).copied().unwrap_or(0);
            let global_full = limits.max_connections.map_or(false, |max| total >= max);
            let origin_full = limits
                .max_connections_per_origin
                .map_or(false, |max| per >= max);
            if !global_full && !origin_full {
                return true;
            }

            let conns = &self.conns;
            let victim = self.idle.iter().copied().find(|id| {
                !origin_full || conns.get(id).map_or(false, |e| e.origin == *origin)
            });
            match victim {
                Some(id) => {
                    debug!("evicting idle connection {:?} to make room for {}", id, origin);
                    self.remove_entry(id);
                }
                None => return false,
            }
        }
    }

    fn reserve(&mut self, shared: &Arc<Shared>, origin: &Origin, pref: VersionPref) -> Reservation {
        self.connecting += 1;
        *self.per_origin.entry(origin.clone()).or_insert(0) += 1;
        let id = ConnId(self.next_id);
        self.next_id += 1;
        let h2_lock = self.wants_h2(origin, pref) && self.h2_connecting.insert(origin.clone());
        Reservation {
            shared: shared.clone(),
            origin: origin.clone(),
            id,
            h2_lock,
            done: false,
        }
    }

    fn enqueue(&mut self, origin: &Origin, pref: VersionPref) -> oneshot::Receiver<Grant> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            origin: origin.clone(),
            pref,
            tx,
        });
        rx
    }

    fn remove_entry(&mut self, id: ConnId) -> Option<Entry> {
        let entry = self.conns.remove(&id)?;
        self.idle.retain(|&i| i != id);
        self.dec_origin(&entry.origin);
        Some(entry)
    }

    fn dec_origin(&mut self, origin: &Origin) {
        if let Some(count) = self.per_origin.get_mut(origin) {
            *count -= 1;
            if *count == 0 {
                self.per_origin.remove(origin);
            }
        }
    }

    fn evict_expired(&mut self, now: Instant, limits: &PoolLimits) -> usize {
        let max_idle = match limits.max_idle_time {
            Some(max) => max,
            None => return 0,
        };
        let conns = &self.conns;
        let expired: Vec<ConnId> = self
            .idle
            .iter()
            .copied()
            .filter(|id| {
                conns.get(id).map_or(true, |e| {
                    now.saturating_duration_since(e.last_active) > max_idle
                })
            })
            .collect();
        for &id in &expired {
            debug!("closing connection {:?}, idle longer than {:?}", id, max_idle);
            self.remove_entry(id);
        }
        expired.len()
    }

    fn enforce_keepalive(&mut self, limits: &PoolLimits) -> usize {
        let mut evicted = 0;
        while self.idle.len() > limits.max_keepalive_connections {
            match self.idle.front().copied() {
                Some(id) => {
                    debug!("keep-alive cap reached, evicting connection {:?}", id);
                    self.remove_entry(id);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

// ===== impl Codec =====

impl Codec {
    fn take_h1(&mut self) -> Option<h1::Conn> {
        match self {
            Codec::H1(slot) => slot.take(),
            #[cfg(feature = "http2")]
            Codec::H2(_) => None,
        }
    }
}

// ===== impl Reservation =====

impl Reservation {
    /// 连接建立成功：登记到连接表，并把第一份租约交给发起方。
    ///
    /// 新的 HTTP/2 连接还会立即分给在等待它的请求。
    fn complete(mut self, leased: Leased) -> crate::Result<Pooled> {
        self.done = true;
        let shared = self.shared.clone();
        let mut deliveries = Vec::new();
        let result = {
            let mut state = shared.lock();
            state.connecting -= 1;
            if self.h2_lock {
                state.h2_connecting.remove(&self.origin);
            }

            if state.closed {
                state.dec_origin(&self.origin);
                Err(crate::Error::new_pool_closed())
            } else {
                let now = shared.time.now();
                let (codec, protocol) = match leased {
                    Leased::H1(_) => (Codec::H1(None), Protocol::Http1),
                    #[cfg(feature = "http2")]
                    Leased::H2(ref handle) => (Codec::H2(handle.clone()), Protocol::Http2),
                };
                if protocol == Protocol::Http2 {
                    state.known_h2.insert(self.origin.clone());
                }
                state.conns.insert(
                    self.id,
                    Entry {
                        origin: self.origin.clone(),
                        protocol,
                        created: now,
                        last_active: now,
                        open_streams: 0,
                        leases: 1,
                        closing: false,
                        codec,
                    },
                );
                debug!(
                    "connection {:?} to {} established ({})",
                    self.id, self.origin, protocol
                );
                let pooled = Pooled::new(&shared, self.id, protocol, leased, true);
                shared.serve_waiters(&mut state, &mut deliveries);
                Ok(pooled)
            }
        };
        deliver(deliveries);
        result
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut deliveries = Vec::new();
        {
            let mut state = self.shared.lock();
            state.connecting -= 1;
            state.dec_origin(&self.origin);
            if self.h2_lock {
                state.h2_connecting.remove(&self.origin);
            }
            trace!("connect slot for {} released", self.origin);
            self.shared.serve_waiters(&mut state, &mut deliveries);
        }
        deliver(deliveries);
    }
}

// ===== impl Pooled =====

impl Pooled {
    fn new(shared: &Arc<Shared>, id: ConnId, protocol: Protocol, conn: Leased, fresh: bool) -> Pooled {
        Pooled {
            pool: Arc::downgrade(shared),
            id,
            protocol,
            conn: Some(conn),
            fresh,
            stream_open: false,
            poisoned: false,
        }
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// 连接是否为本次获取新建的。
    #[cfg(test)]
    pub(crate) fn is_fresh(&self) -> bool {
        self.fresh
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> ConnId {
        self.id
    }

    pub(crate) fn h1(&self) -> Option<&h1::Conn> {
        match self.conn {
            Some(Leased::H1(ref conn)) => Some(conn),
            _ => None,
        }
    }

    pub(crate) fn h1_mut(&mut self) -> Option<&mut h1::Conn> {
        match self.conn {
            Some(Leased::H1(ref mut conn)) => Some(conn),
            _ => None,
        }
    }

    #[cfg(feature = "http2")]
    pub(crate) fn h2_mut(&mut self) -> Option<&mut ClientHandle> {
        match self.conn {
            Some(Leased::H2(ref mut handle)) => Some(handle),
            _ => None,
        }
    }

    /// 在租约的连接上登记一个流。
    ///
    /// HTTP/1.1 连接同一时刻只允许一个流；HTTP/2 不超过对端通告的并发上限。
    /// 返回 `false` 表示连接已没有空位（或正在关闭）。
    pub(crate) fn open_stream(&mut self) -> bool {
        if self.stream_open {
            return false;
        }
        let max = match self.conn {
            Some(Leased::H1(ref conn)) => usize::from(conn.can_write_head()),
            #[cfg(feature = "http2")]
            Some(Leased::H2(ref handle)) => handle.current_max_send_streams(),
            None => 0,
        };
        let opened = match self.pool.upgrade() {
            Some(shared) => shared.open_stream(self.id, max),
            None => max > 0,
        };
        self.stream_open = opened;
        opened
    }

    /// 标记连接已不可用（连接级错误），归还时直接丢弃。
    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        let conn = self.conn.take();
        if let Some(shared) = self.pool.upgrade() {
            shared.release(self.id, conn, self.stream_open, self.poisoned);
        }
    }
}

impl fmt::Debug for Pooled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("fresh", &self.fresh)
            .field("stream_open", &self.stream_open)
            .finish()
    }
}
