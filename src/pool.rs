use std::sync::Arc;

use http::Method;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::ReqflowResult;
use crate::error::{ErrorKind, HttpClientError};

/// Bounded-concurrency admission gate. Saturated acquisitions queue in FIFO
/// order; a cancellation while queued removes the waiter without ever
/// granting a ticket.
#[derive(Clone)]
pub struct RequestPool {
    semaphore: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
}

impl RequestPool {
    pub fn unbounded() -> Self {
        Self {
            semaphore: None,
            capacity: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Some(Arc::new(Semaphore::new(capacity))),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Grants a ticket immediately when below capacity, otherwise waits in
    /// arrival order. Cancellation after grant never revokes the ticket; the
    /// holder still releases it.
    pub async fn acquire(
        &self,
        method: &Method,
        url: &str,
        cancel: &CancellationToken,
    ) -> ReqflowResult<PoolTicket> {
        if cancel.is_cancelled() {
            return Err(HttpClientError::cancelled(method, url, "pool admission"));
        }

        let Some(semaphore) = &self.semaphore else {
            return Ok(PoolTicket { _permit: None });
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(HttpClientError::cancelled(method, url, "pool admission"))
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => Ok(PoolTicket {
                    _permit: Some(permit),
                }),
                Err(_) => Err(HttpClientError::new(
                    ErrorKind::Unknown,
                    method.clone(),
                    url,
                    "request pool is closed",
                )),
            },
        }
    }
}

/// One admission slot. Releasing consumes the ticket, so a ticket cannot be
/// released twice or before it was granted; dropping it releases the slot on
/// abandonment paths as well.
#[derive(Debug)]
pub struct PoolTicket {
    _permit: Option<OwnedSemaphorePermit>,
}

impl PoolTicket {
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn update_max(max: &AtomicUsize, value: usize) {
        let mut current = max.load(Ordering::SeqCst);
        while value > current {
            match max.compare_exchange(current, value, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    #[tokio::test]
    async fn granted_tickets_never_exceed_capacity() {
        let pool = RequestPool::bounded(2);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            tasks.push(tokio::spawn(async move {
                let ticket = pool
                    .acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
                    .await
                    .expect("acquire should succeed");
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                update_max(&max_active, now_active);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ticket.release();
            }));
        }
        for task in tasks {
            task.await.expect("task should finish");
        }

        assert!(max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn queued_acquisition_resolves_as_cancel() {
        let pool = RequestPool::bounded(1);
        let held = pool
            .acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
            .await
            .expect("first acquire should succeed");

        let cancel = CancellationToken::new();
        let queued = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pool.acquire(&Method::GET, "https://api.example.com", &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let error = queued
            .await
            .expect("task should finish")
            .expect_err("queued acquire should resolve as cancelled");
        assert_eq!(error.kind, ErrorKind::Cancel);

        held.release();
        // The cancelled waiter must not have consumed the freed slot.
        pool.acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
            .await
            .expect("slot should be available again")
            .release();
    }

    #[tokio::test]
    async fn queued_waiters_are_granted_in_arrival_order() {
        let pool = RequestPool::bounded(1);
        let first = pool
            .acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
            .await
            .expect("first acquire should succeed");

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for index in 0..3 {
            let pool = pool.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let ticket = pool
                    .acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
                    .await
                    .expect("acquire should succeed");
                order.lock().expect("order lock").push(index);
                ticket.release();
            }));
            // Give each waiter time to enqueue before the next arrives.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        first.release();
        for waiter in waiters {
            waiter.await.expect("waiter should finish");
        }
        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unbounded_pool_grants_immediately() {
        let pool = RequestPool::unbounded();
        assert_eq!(pool.capacity(), None);
        pool.acquire(&Method::GET, "https://api.example.com", &CancellationToken::new())
            .await
            .expect("unbounded acquire should succeed")
            .release();
    }
}
