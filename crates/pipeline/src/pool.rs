//! Shared limit on concurrent backend calls
//!
//! Every recognition, inference and synthesis request holds a permit for its
//! duration. When all permits are taken, callers wait up to the acquire
//! timeout and then fail with [`Error::PoolExhausted`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use voice_call_config::PoolConfig;
use voice_call_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct BackendPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl BackendPool {
    pub fn new(config: &PoolConfig) -> Self {
        let capacity = config.max_connections.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout: config.acquire_timeout(),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::Transport("backend pool closed".to_string())),
            Err(_) => {
                tracing::warn!(
                    capacity = self.capacity,
                    waited_ms = self.acquire_timeout.as_millis() as u64,
                    "Backend pool exhausted"
                );
                Err(Error::PoolExhausted(self.acquire_timeout))
            }
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: usize, timeout_ms: u64) -> BackendPool {
        BackendPool::new(&PoolConfig {
            max_connections: max,
            acquire_timeout_ms: timeout_ms,
        })
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = pool(2, 100);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);
        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1, 50);
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_released_permit() {
        let pool = pool(1, 1000);
        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }
}
