//! Layered concurrency permits
//!
//! A worker takes the global permit first, then the per-combo permit; the
//! pair is released in reverse order when the permit guard drops. Distinct
//! combos share the global budget, one combo can never exceed its own.

use crate::rtsp_url::ComboKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

/// Two-layer counted permits: global x per-combo
pub struct ComboLimiter {
    global: Arc<Semaphore>,
    per_combo: RwLock<HashMap<ComboKey, Arc<Semaphore>>>,
    workers_per_combo: usize,
}

/// RAII permit pair. Field order matters: the combo permit must drop
/// before the global one.
pub struct ComboPermit {
    _combo: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// Acquisition failure: the limiter was closed for shutdown
#[derive(Debug)]
pub struct LimiterClosed;

impl std::fmt::Display for LimiterClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "limiter closed")
    }
}

impl std::error::Error for LimiterClosed {}

impl ComboLimiter {
    pub fn new(max_combo_concurrency: usize, workers_per_combo: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_combo_concurrency.max(1))),
            per_combo: RwLock::new(HashMap::new()),
            workers_per_combo: workers_per_combo.max(1),
        }
    }

    async fn combo_semaphore(&self, combo: &ComboKey) -> Arc<Semaphore> {
        {
            let map = self.per_combo.read().await;
            if let Some(sem) = map.get(combo) {
                return sem.clone();
            }
        }
        let mut map = self.per_combo.write().await;
        map.entry(combo.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.workers_per_combo)))
            .clone()
    }

    /// Block until both permits are held. Fails only when the limiter has
    /// been closed for shutdown.
    pub async fn acquire(&self, combo: &ComboKey) -> Result<ComboPermit, LimiterClosed> {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        let combo_sem = self.combo_semaphore(combo).await;
        let combo_permit = combo_sem.acquire_owned().await.map_err(|_| LimiterClosed)?;
        Ok(ComboPermit {
            _combo: combo_permit,
            _global: global,
        })
    }

    /// Fail all future acquisitions; waiters are woken with an error.
    pub async fn close(&self) {
        self.global.close();
        let map = self.per_combo.read().await;
        for sem in map.values() {
            sem.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn combo(ip: &str, channel: &str) -> ComboKey {
        ComboKey {
            ip: ip.to_string(),
            channel: channel.to_string(),
        }
    }

    /// Twenty jobs on one combo with caps 4x2: at most 2 run at once and
    /// all of them finish.
    #[tokio::test]
    async fn test_per_combo_cap_holds_under_load() {
        let limiter = Arc::new(ComboLimiter::new(4, 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire(&combo("10.0.0.1", "c1")).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    /// Distinct combos cannot collectively exceed the global budget.
    #[tokio::test]
    async fn test_global_cap_holds_across_combos() {
        let limiter = Arc::new(ComboLimiter::new(3, 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..12 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let key = combo(&format!("10.0.0.{}", i % 6), "c1");
                let _permit = limiter.acquire(&key).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_close_fails_new_acquisitions() {
        let limiter = ComboLimiter::new(2, 2);
        limiter.close().await;
        assert!(limiter.acquire(&combo("10.0.0.1", "c1")).await.is_err());
    }
}
