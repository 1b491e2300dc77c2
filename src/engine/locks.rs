use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::Canceled;

struct LockOwner {
    agent: String,
    count: usize,
}

struct LockState {
    table: Mutex<HashMap<String, LockOwner>>,
    released: Notify,
}

/// Named mutual-exclusion registry, reentrant per agent.
///
/// A request for several resources is sorted into the stable global
/// (lexicographic) order and granted atomically: either every resource is
/// free or already held by the requesting agent, or the caller waits.
/// Atomic all-or-nothing grants plus the stable order rule out deadlock
/// between competing multi-resource requests.
#[derive(Clone)]
pub struct ResourceLockManager {
    state: Arc<LockState>,
}

impl Default for ResourceLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLockManager {
    pub fn new() -> Self {
        ResourceLockManager {
            state: Arc::new(LockState {
                table: Mutex::new(HashMap::new()),
                released: Notify::new(),
            }),
        }
    }

    /// Acquires every named resource for `agent_id`, waiting for holders to
    /// release. The returned guard releases on drop, which is how the
    /// invoker guarantees release on every exit path.
    pub async fn acquire_all(
        &self,
        agent_id: &str,
        resources: &[String],
        cancel: &CancellationToken,
    ) -> Result<ResourceGuard, Canceled> {
        let mut sorted: Vec<String> = resources.to_vec();
        sorted.sort();
        sorted.dedup();

        loop {
            let waiter = self.state.released.notified();
            tokio::pin!(waiter);
            // Register for release notifications before re-checking, so a
            // release landing between the check and the await is not lost.
            waiter.as_mut().enable();

            if self.try_acquire(agent_id, &sorted) {
                log::debug!("agent {agent_id} acquired resources {sorted:?}");
                return Ok(ResourceGuard {
                    state: self.state.clone(),
                    agent: agent_id.to_string(),
                    resources: sorted,
                });
            }

            tokio::select! {
                _ = waiter => {}
                _ = cancel.cancelled() => return Err(Canceled),
            }
        }
    }

    fn try_acquire(&self, agent_id: &str, sorted: &[String]) -> bool {
        let mut table = self.state.table.lock().unwrap_or_else(|e| e.into_inner());

        let free = sorted.iter().all(|resource| match table.get(resource) {
            None => true,
            Some(owner) => owner.agent == agent_id,
        });
        if !free {
            return false;
        }

        for resource in sorted {
            table
                .entry(resource.clone())
                .and_modify(|owner| owner.count += 1)
                .or_insert_with(|| LockOwner {
                    agent: agent_id.to_string(),
                    count: 1,
                });
        }
        true
    }

    #[cfg(test)]
    fn holder_of(&self, resource: &str) -> Option<String> {
        let table = self.state.table.lock().unwrap();
        table.get(resource).map(|owner| owner.agent.clone())
    }
}

/// RAII handle over a granted resource set.
pub struct ResourceGuard {
    state: Arc<LockState>,
    agent: String,
    resources: Vec<String>,
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("agent", &self.agent)
            .field("resources", &self.resources)
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let mut table = self.state.table.lock().unwrap_or_else(|e| e.into_inner());
        for resource in &self.resources {
            if let Some(owner) = table.get_mut(resource) {
                owner.count -= 1;
                if owner.count == 0 {
                    table.remove(resource);
                }
            }
        }
        drop(table);
        log::debug!("agent {} released resources {:?}", self.agent, self.resources);
        self.state.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn test_reentrant_for_same_agent() {
        let locks = ResourceLockManager::new();
        let cancel = CancellationToken::new();
        let resources = vec!["db".to_string()];

        let first = locks.acquire_all("a1", &resources, &cancel).await.unwrap();
        let second = locks.acquire_all("a1", &resources, &cancel).await.unwrap();

        drop(first);
        assert_eq!(locks.holder_of("db"), Some("a1".to_string()));
        drop(second);
        assert_eq!(locks.holder_of("db"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutual_exclusion_between_agents() {
        let locks = ResourceLockManager::new();
        let cancel = CancellationToken::new();
        let resources = vec!["db".to_string()];
        let concurrent = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for agent in ["a1", "a2", "a3"] {
            let locks = locks.clone();
            let cancel = cancel.clone();
            let resources = resources.clone();
            let concurrent = concurrent.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire_all(agent, &resources, &cancel).await.unwrap();
                if concurrent.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                sleep(Duration::from_millis(50)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opposite_order_requests_do_not_deadlock() {
        let locks = ResourceLockManager::new();
        let cancel = CancellationToken::new();

        let a = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _guard = locks
                    .acquire_all(
                        "a1",
                        &["alpha".to_string(), "beta".to_string()],
                        &cancel,
                    )
                    .await
                    .unwrap();
                sleep(Duration::from_millis(20)).await;
            })
        };
        let b = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _guard = locks
                    .acquire_all(
                        "a2",
                        &["beta".to_string(), "alpha".to_string()],
                        &cancel,
                    )
                    .await
                    .unwrap();
                sleep(Duration::from_millis(20)).await;
            })
        };

        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let locks = ResourceLockManager::new();
        let cancel = CancellationToken::new();
        let resources = vec!["db".to_string()];

        let _held = locks
            .acquire_all("a1", &resources, &CancellationToken::new())
            .await
            .unwrap();

        cancel.cancel();
        let err = locks.acquire_all("a2", &resources, &cancel).await.unwrap_err();
        assert_eq!(err, Canceled);
    }
}
