//! 브로드캐스트 허브 -- 연결된 관찰자에게 상태 변경을 푸시합니다.
//!
//! # 전달 보장
//! - 발행 시점에 구독 중인 관찰자에게만 전달합니다 (재전송/영속화 없음).
//! - 같은 토픽의 이벤트는 발행 순서대로 전달됩니다.
//! - 관찰자마다 병합 키([`BroadcastEvent::coalesce_key`])당 최대 1개의
//!   미전달 이벤트만 보관합니다. 병합 창 안에 같은 키로 다시 발행되면 최신
//!   이벤트가 기존 것을 대체하므로 마지막으로 전달되는 상태는 항상 최신 쓰기를
//!   반영합니다. 키에는 서버 ID와 파일 경로가 포함되므로 목록 토픽에서 다른
//!   서버의 이벤트가 서로를 덮어쓰지 않습니다.
//! - 미전달 키 수가 한도를 넘은 관찰자는 구독이 끊기고 `lagged` 표시가
//!   남습니다. 이 관찰자는 캐시를 통한 조회로 상태를 다시 맞춰야 합니다.
//!
//! `publish`는 동기 함수이며 관찰자의 수신을 기다리지 않습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use cubehost_core::event::BroadcastEvent;
use cubehost_core::metrics as m;

/// 기본 병합 창
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(250);
/// 기본 관찰자당 미전달 병합 키 한도
pub const DEFAULT_TOPIC_LIMIT: usize = 1024;

struct Pending {
    event: BroadcastEvent,
    /// 이 키가 처음 대기열에 들어온 시각
    queued_at: Instant,
}

#[derive(Default)]
struct MailboxState {
    /// 대기 중인 병합 키 (최초 도착 순서)
    order: VecDeque<String>,
    pending: HashMap<String, Pending>,
    closed: bool,
}

struct Mailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
    lagged: AtomicBool,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
            lagged: AtomicBool::new(false),
        }
    }

    /// 이벤트를 넣습니다. 한도를 넘으면 false를 반환합니다.
    fn push(&self, event: BroadcastEvent, limit: usize) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return true;
        }

        let key = event.coalesce_key();
        if let Some(existing) = state.pending.get_mut(&key) {
            existing.event = event;
            counter!(m::BROADCAST_EVENTS_COALESCED_TOTAL).increment(1);
            return true;
        }

        if state.pending.len() >= limit {
            return false;
        }

        state.order.push_back(key.clone());
        state.pending.insert(
            key,
            Pending {
                event,
                queued_at: Instant::now(),
            },
        );
        drop(state);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.order.clear();
        state.pending.clear();
        drop(state);
        self.notify.notify_one();
    }
}

struct HubInner {
    subscribers: Mutex<HashMap<u64, Arc<Mailbox>>>,
    next_id: AtomicU64,
    window: Duration,
    topic_limit: usize,
}

impl HubInner {
    fn remove(&self, id: u64) -> Option<Arc<Mailbox>> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = subscribers.remove(&id);
        gauge!(m::BROADCAST_SUBSCRIBERS).set(subscribers.len() as f64);
        removed
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        let subscribers = self
            .subscribers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for mailbox in subscribers.values() {
            mailbox.close();
        }
    }
}

/// 토픽 기반 팬아웃 허브
///
/// 복제 비용이 낮으며(`Arc`), 복제본은 같은 구독자 집합을 공유합니다.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_COALESCE_WINDOW, DEFAULT_TOPIC_LIMIT)
    }
}

impl BroadcastHub {
    /// 병합 창과 관찰자당 미전달 키 한도로 허브를 생성합니다.
    ///
    /// `window`가 0이면 병합 대기 없이 즉시 전달합니다.
    pub fn new(window: Duration, topic_limit: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                window,
                topic_limit: topic_limit.max(1),
            }),
        }
    }

    /// 새 관찰자를 등록합니다.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new());
        {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.insert(id, Arc::clone(&mailbox));
            gauge!(m::BROADCAST_SUBSCRIBERS).set(subscribers.len() as f64);
        }
        debug!(subscriber_id = id, "observer subscribed");

        Subscription {
            id,
            mailbox,
            hub: Arc::downgrade(&self.inner),
            window: self.inner.window,
        }
    }

    /// 관찰자를 해제합니다. `Subscription`을 drop 해도 같은 효과입니다.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// 이벤트를 발행합니다. 관찰자의 수신을 기다리지 않습니다.
    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) {
        self.publish_event(BroadcastEvent::new(topic, payload));
    }

    /// 미리 만든 이벤트를 발행합니다.
    pub fn publish_event(&self, event: BroadcastEvent) {
        counter!(m::BROADCAST_EVENTS_TOTAL).increment(1);

        let targets: Vec<(u64, Arc<Mailbox>)> = {
            let subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers
                .iter()
                .map(|(id, mb)| (*id, Arc::clone(mb)))
                .collect()
        };

        for (id, mailbox) in targets {
            if !mailbox.push(event.clone(), self.inner.topic_limit) {
                warn!(
                    subscriber_id = id,
                    limit = self.inner.topic_limit,
                    "observer fell behind, dropping subscription"
                );
                mailbox.lagged.store(true, Ordering::Release);
                mailbox.close();
                self.inner.remove(id);
            }
        }
    }

    /// 현재 구독 중인 관찰자 수
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 병합 창
    pub fn coalesce_window(&self) -> Duration {
        self.inner.window
    }
}

/// 관찰자 핸들
///
/// drop 되면 자동으로 구독이 해제됩니다.
pub struct Subscription {
    id: u64,
    mailbox: Arc<Mailbox>,
    hub: Weak<HubInner>,
    window: Duration,
}

impl Subscription {
    /// 구독 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 한도 초과로 구독이 끊겼는지 확인합니다.
    pub fn is_lagged(&self) -> bool {
        self.mailbox.lagged.load(Ordering::Acquire)
    }

    /// 다음 이벤트를 기다립니다.
    ///
    /// 구독이 끊기면(허브 drop 또는 한도 초과) `None`을 반환합니다.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            let wait_until = {
                let mut state = self
                    .mailbox
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                match state.order.front().cloned() {
                    Some(key) => {
                        let ready_at = state
                            .pending
                            .get(&key)
                            .map(|p| p.queued_at + self.window)
                            .unwrap_or_else(Instant::now);
                        if Instant::now() >= ready_at {
                            state.order.pop_front();
                            if let Some(pending) = state.pending.remove(&key) {
                                return Some(pending.event);
                            }
                            continue;
                        }
                        Some(ready_at)
                    }
                    None if state.closed => return None,
                    None => None,
                }
            };

            if self.hub.strong_count() == 0 {
                return None;
            }

            match wait_until {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => self.mailbox.notify.notified().await,
            }
        }
    }

    /// 대기 없이 전달 가능한 이벤트를 꺼냅니다.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        let mut state = self
            .mailbox
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = state.order.front().cloned()?;
        let ready = state
            .pending
            .get(&key)
            .is_some_and(|p| Instant::now() >= p.queued_at + self.window);
        if !ready {
            return None;
        }
        state.order.pop_front();
        state.pending.remove(&key).map(|p| p.event)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
            debug!(subscriber_id = self.id, "observer unsubscribed");
        }
    }
}
