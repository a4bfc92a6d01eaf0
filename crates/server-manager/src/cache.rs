//! TTL 캐시 -- 비싼 조회 호출 앞에 두는 메모이제이션 저장소
//!
//! [`TtlCache`]는 `(namespace, key)` 단위로 값을 보관하고, TTL이 지나거나
//! 명시적으로 무효화되면 다음 `get`에서 재계산합니다.
//!
//! # 무효화 규칙
//! - 재계산 실패는 호출자에게 전파되며 캐시에 저장되지 않습니다.
//! - 같은 키에 대한 동시 재계산은 허용됩니다 (중복 호출 가능).
//! - `invalidate`가 반환된 뒤 시작된 `get`은 반드시 재계산합니다.
//!   무효화 이전에 시작된 재계산 결과는 세대 번호 검사로 버려집니다.
//!
//! 만료된 항목은 삽입 시 주기적으로(기본 TTL 간격) 정리되므로 한 번 조회된 뒤
//! 다시 쓰이지 않는 키가 쌓이지 않습니다.
//!
//! 만료 시각은 `tokio::time::Instant` 기준이므로 테스트에서 시간을 멈추고
//! 앞당길 수 있습니다.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use cubehost_core::metrics as m;

/// 캐시 항목
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<(String, String), CacheEntry<V>>,
    /// 무효화마다 증가하는 세대 번호
    generation: u64,
    /// 다음 만료 항목 정리 시각 (None이면 다음 삽입 시 정리)
    next_sweep: Option<Instant>,
}

fn sweep_expired<V>(entries: &mut HashMap<(String, String), CacheEntry<V>>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, e| now < e.expires_at);
    before - entries.len()
}

/// 네임스페이스별 TTL을 가진 캐시
#[derive(Debug)]
pub struct TtlCache<V> {
    default_ttl: Duration,
    namespace_ttls: HashMap<String, Duration>,
    state: RwLock<CacheState<V>>,
}

impl<V: Clone> TtlCache<V> {
    /// 기본 TTL로 캐시를 생성합니다.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            namespace_ttls: HashMap::new(),
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
                next_sweep: None,
            }),
        }
    }

    /// 네임스페이스 전용 TTL을 지정합니다.
    pub fn with_namespace(mut self, namespace: impl Into<String>, ttl: Duration) -> Self {
        self.namespace_ttls.insert(namespace.into(), ttl);
        self
    }

    /// 네임스페이스에 적용되는 TTL
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.namespace_ttls
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// 값을 조회하고, 없거나 만료되었으면 `recompute`로 채웁니다.
    pub async fn get<F, Fut, E>(&self, namespace: &str, key: &str, recompute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.get_with_ttl(namespace, key, self.ttl_for(namespace), recompute)
            .await
    }

    /// TTL을 직접 지정하여 조회합니다.
    pub async fn get_with_ttl<F, Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        recompute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cache_key = (namespace.to_owned(), key.to_owned());

        let generation = {
            let state = self.state.read().await;
            if let Some(entry) = state.entries.get(&cache_key)
                && Instant::now() < entry.expires_at
            {
                counter!(m::CACHE_HITS_TOTAL, m::LABEL_NAMESPACE => namespace.to_owned())
                    .increment(1);
                return Ok(entry.value.clone());
            }
            state.generation
        };

        counter!(m::CACHE_MISSES_TOTAL, m::LABEL_NAMESPACE => namespace.to_owned()).increment(1);

        // 잠금 없이 재계산 (느린 API 호출이 다른 키를 막지 않도록)
        let value = recompute().await?;

        let mut state = self.state.write().await;
        let now = Instant::now();
        if state.next_sweep.is_none_or(|at| now >= at) {
            let evicted = sweep_expired(&mut state.entries, now);
            if evicted > 0 {
                debug!(evicted, "evicted expired cache entries");
            }
            state.next_sweep = Some(now + self.default_ttl);
        }
        if state.generation == generation {
            state.entries.insert(
                cache_key,
                CacheEntry {
                    value: value.clone(),
                    expires_at: now + ttl,
                },
            );
        } else {
            debug!(namespace, key, "discarding value computed before invalidation");
        }
        Ok(value)
    }

    /// 만료되지 않은 값이 있으면 반환합니다 (재계산하지 않음).
    pub async fn peek(&self, namespace: &str, key: &str) -> Option<V> {
        let state = self.state.read().await;
        state
            .entries
            .get(&(namespace.to_owned(), key.to_owned()))
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| e.value.clone())
    }

    /// 키 하나를 무효화합니다.
    ///
    /// 반환 이후 시작된 모든 `get`은 재계산합니다.
    pub async fn invalidate(&self, namespace: &str, key: &str) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state
            .entries
            .remove(&(namespace.to_owned(), key.to_owned()));
        counter!(m::CACHE_INVALIDATIONS_TOTAL, m::LABEL_NAMESPACE => namespace.to_owned())
            .increment(1);
    }

    /// 키 접두어가 일치하는 항목을 모두 무효화합니다.
    pub async fn invalidate_prefix(&self, namespace: &str, prefix: &str) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state
            .entries
            .retain(|(ns, key), _| !(ns == namespace && key.starts_with(prefix)));
        counter!(m::CACHE_INVALIDATIONS_TOTAL, m::LABEL_NAMESPACE => namespace.to_owned())
            .increment(1);
    }

    /// 네임스페이스 하나 또는 전체를 비웁니다.
    pub async fn clear(&self, namespace: Option<&str>) {
        let mut state = self.state.write().await;
        state.generation += 1;
        match namespace {
            Some(ns) => state.entries.retain(|(entry_ns, _), _| entry_ns != ns),
            None => state.entries.clear(),
        }
    }

    /// 만료된 항목을 제거하고 제거된 수를 반환합니다.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.write().await;
        sweep_expired(&mut state.entries, Instant::now())
    }

    /// 보관 중인 항목 수 (만료 항목 포함)
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// 보관 중인 항목이 없는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: &Arc<AtomicUsize>, value: u32) -> impl Future<Output = Result<u32, String>> {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_skips_recompute() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache.get("inspect", "survival", || counting(&calls, 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        let b = cache.get("inspect", "survival", || counting(&calls, 2)).await.unwrap();

        assert_eq!((a, b), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get("inspect", "survival", || counting(&calls, 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let v = cache.get("inspect", "survival", || counting(&calls, 2)).await.unwrap();

        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_after_invalidate_recomputes() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get("file", "a/server.properties", || counting(&calls, 1)).await.unwrap();
        cache.invalidate("file", "a/server.properties").await;
        let v = cache
            .get("file", "a/server.properties", || counting(&calls, 2))
            .await
            .unwrap();

        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(30));
        let err = cache
            .get("inspect", "x", || async { Err::<u32, _>("docker down".to_owned()) })
            .await
            .unwrap_err();
        assert_eq!(err, "docker down");
        assert!(cache.is_empty().await);

        let v: Result<u32, String> = cache.get("inspect", "x", || async { Ok(7) }).await;
        assert_eq!(v.unwrap(), 7);
    }

    #[tokio::test]
    async fn recompute_racing_invalidation_is_not_stored() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(30)));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("inspect", "survival", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, String>("stale")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.invalidate("inspect", "survival").await;
        release_tx.send(()).unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), "stale");

        let v = cache
            .get("inspect", "survival", || async { Ok::<_, String>("fresh") })
            .await
            .unwrap();
        assert_eq!(v, "fresh");
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.get("inspect", "k", || async { Ok::<_, String>(1) }).await.unwrap();
        cache.get("file", "k", || async { Ok::<_, String>(2) }).await.unwrap();

        cache.clear(Some("inspect")).await;
        assert_eq!(cache.peek("inspect", "k").await, None);
        assert_eq!(cache.peek("file", "k").await, Some(2));

        cache.clear(None).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn namespace_ttl_overrides_default() {
        let cache = TtlCache::new(Duration::from_secs(30)).with_namespace("file", Duration::from_secs(5));
        assert_eq!(cache.ttl_for("file"), Duration::from_secs(5));
        assert_eq!(cache.ttl_for("inspect"), Duration::from_secs(30));

        cache.get("file", "k", || async { Ok::<_, String>(1) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.peek("file", "k").await, None);
    }

    #[tokio::test]
    async fn invalidate_prefix_removes_matching_keys() {
        let cache = TtlCache::new(Duration::from_secs(30));
        for key in ["alpha/a", "alpha/b", "beta/a"] {
            cache.get("file", key, || async { Ok::<_, String>(0) }).await.unwrap();
        }
        cache.invalidate_prefix("file", "alpha/").await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.peek("file", "beta/a").await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_drops_old_entries() {
        let cache = TtlCache::new(Duration::from_secs(1));
        cache.get("inspect", "a", || async { Ok::<_, String>(0) }).await.unwrap();
        cache.get("inspect", "b", || async { Ok::<_, String>(0) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_evicts_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(30));
        for key in ["alpha/server.properties", "beta/server.properties", "gamma/allowlist.json"] {
            cache.get("file", key, || async { Ok::<_, String>(0) }).await.unwrap();
        }
        assert_eq!(cache.len().await, 3);

        tokio::time::advance(Duration::from_secs(31)).await;
        cache.get("inspect", "delta", || async { Ok::<_, String>(1) }).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.peek("inspect", "delta").await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn live_entries_survive_sweep() {
        let cache = TtlCache::new(Duration::from_secs(10))
            .with_namespace("inspect", Duration::from_secs(60));
        cache.get("inspect", "alpha", || async { Ok::<_, String>(0) }).await.unwrap();
        cache.get("file", "alpha/a", || async { Ok::<_, String>(0) }).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.get("file", "alpha/b", || async { Ok::<_, String>(0) }).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.peek("inspect", "alpha").await, Some(0));
    }
}
