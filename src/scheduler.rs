use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Delayed side effects keyed by invocation identity.
///
/// Scheduling under a key that already has a pending task aborts the older
/// one.
#[derive(Clone, Default)]
pub struct DelayedTasks {
    tasks: Arc<Mutex<HashMap<String, Entry>>>,
    next_id: Arc<Mutex<u64>>,
}

struct Entry {
    id: u64,
    handle: JoinHandle<()>,
}

impl DelayedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay` unless cancelled or superseded first.
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };

        let tasks = Arc::clone(&self.tasks);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;

            let mut tasks = tasks.lock();
            if tasks.get(&task_key).is_some_and(|entry| entry.id == id) {
                tasks.remove(&task_key);
            }
        });

        if let Some(previous) = self.tasks.lock().insert(key.clone(), Entry { id, handle }) {
            debug!(key, "Superseding pending delayed task");
            previous.handle.abort();
        }
    }

    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, entry) in self.tasks.lock().drain() {
            entry.handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|entry| !entry.handle.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(counter: &Arc<AtomicUsize>, amount: usize) -> impl Future<Output = ()> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(amount, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_after_delay() {
        let tasks = DelayedTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.schedule("t", Duration::from_millis(100), counter_task(&counter, 1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_supersedes_pending_task() {
        let tasks = DelayedTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.schedule("t", Duration::from_millis(100), counter_task(&counter, 1));
        tasks.schedule("t", Duration::from_millis(100), counter_task(&counter, 10));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_independently() {
        let tasks = DelayedTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.schedule("a", Duration::from_millis(10), counter_task(&counter, 1));
        tasks.schedule("b", Duration::from_millis(20), counter_task(&counter, 2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let tasks = DelayedTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.schedule("t", Duration::from_millis(100), counter_task(&counter, 1));
        assert_eq!(tasks.pending(), 1);

        assert!(tasks.cancel("t"));
        assert!(!tasks.cancel("t"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tasks.schedule("x", Duration::from_millis(10), counter_task(&counter, 1));
        tasks.cancel_all();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
