//! 키 단위 비동기 잠금
//!
//! 같은 서버 ID에 대한 라이프사이클 작업을 직렬화합니다.
//! 서로 다른 키는 서로를 막지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// 키별 `tokio::sync::Mutex` 모음
///
/// 사용 중이 아닌 키의 잠금은 다음 획득 시점에 정리되므로
/// 맵 크기는 동시에 잠긴 키 수에 비례합니다.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    /// 빈 잠금 모음을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 키에 대한 잠금을 획득합니다. 가드가 drop 되면 해제됩니다.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // 맵만 참조하는 잠금은 아무도 기다리지 않음
            locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(key.to_owned()).or_default())
        };
        mutex.lock_owned().await
    }

    /// 키가 지금 잠겨 있는지 확인합니다.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// 현재 추적 중인 키 수
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 추적 중인 키가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
