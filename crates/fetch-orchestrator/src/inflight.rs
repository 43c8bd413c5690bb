use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use dashboard_core::{FetchError, FetchResult};

/// Coalesces concurrent computations per key: the first caller runs the
/// work, later callers wait for the same cloned outcome instead of
/// starting another network call.
pub struct InflightMap<K: Eq + Hash, T> {
    waiting: Mutex<HashMap<K, Vec<oneshot::Sender<FetchResult<T>>>>>,
}

/// What `admit` decided for this caller.
pub enum Admission<K: Eq + Hash + Clone, T: Clone> {
    /// Nothing is running for the key: this caller runs the work and must
    /// complete (or drop) the token.
    Run(RunToken<K, T>),
    /// Another caller is already running it; await the shared outcome.
    Join(oneshot::Receiver<FetchResult<T>>),
}

impl<K: Eq + Hash + Clone, T: Clone> InflightMap<K, T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            waiting: Mutex::new(HashMap::new()),
        })
    }

    pub fn admit(self: &Arc<Self>, key: K) -> Admission<K, T> {
        let mut waiting = self.waiting.lock().unwrap();
        if let Some(waiters) = waiting.get_mut(&key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Admission::Join(rx);
        }
        waiting.insert(key.clone(), Vec::new());
        Admission::Run(RunToken {
            map: Arc::clone(self),
            key: Some(key),
        })
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.waiting.lock().unwrap().contains_key(key)
    }

    fn finish(&self, key: &K, result: &FetchResult<T>) {
        let waiters = self.waiting.lock().unwrap().remove(key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Held by the caller that runs the work for a key.
pub struct RunToken<K: Eq + Hash + Clone, T: Clone> {
    map: Arc<InflightMap<K, T>>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone, T: Clone> RunToken<K, T> {
    /// Deliver the outcome to every coalesced waiter.
    pub fn complete(mut self, result: &FetchResult<T>) {
        if let Some(key) = self.key.take() {
            self.map.finish(&key, result);
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Drop for RunToken<K, T> {
    fn drop(&mut self) {
        // An abandoned run (the running caller's future was dropped)
        // releases its joiners with a cancellation rather than leaving
        // them waiting forever.
        if let Some(key) = self.key.take() {
            self.map.finish(&key, &Err(FetchError::Canceled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joiners_share_the_runners_outcome() {
        let map: Arc<InflightMap<String, i32>> = InflightMap::new();

        let token = match map.admit("k".to_string()) {
            Admission::Run(token) => token,
            Admission::Join(_) => panic!("first caller should run"),
        };
        assert!(map.is_running(&"k".to_string()));

        let rx = match map.admit("k".to_string()) {
            Admission::Join(rx) => rx,
            Admission::Run(_) => panic!("second caller should join"),
        };

        token.complete(&Ok(42));
        assert_eq!(rx.await.unwrap().unwrap(), 42);
        assert!(!map.is_running(&"k".to_string()));

        // A fresh admit after completion runs again.
        assert!(matches!(map.admit("k".to_string()), Admission::Run(_)));
    }

    #[tokio::test]
    async fn dropped_run_token_releases_joiners() {
        let map: Arc<InflightMap<String, i32>> = InflightMap::new();

        let token = match map.admit("k".to_string()) {
            Admission::Run(token) => token,
            Admission::Join(_) => panic!("first caller should run"),
        };
        let rx = match map.admit("k".to_string()) {
            Admission::Join(rx) => rx,
            Admission::Run(_) => panic!("second caller should join"),
        };

        drop(token);
        assert!(matches!(rx.await.unwrap(), Err(FetchError::Canceled)));
        assert!(!map.is_running(&"k".to_string()));
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let map: Arc<InflightMap<String, i32>> = InflightMap::new();
        let a = map.admit("a".to_string());
        let b = map.admit("b".to_string());
        assert!(matches!(a, Admission::Run(_)));
        assert!(matches!(b, Admission::Run(_)));
    }
}
