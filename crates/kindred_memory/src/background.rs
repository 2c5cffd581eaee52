//! Best-effort background work.
//!
//! Enrichment that must not hold up a reply (post-turn archiving and the
//! like) is queued here. Submitting never blocks; a full queue drops the job
//! with a warning. Every job runs in its own task, so an error or a panic is
//! logged and goes no further.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct Envelope {
    label: String,
    job: Job,
}

struct Inflight {
    pending: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct BackgroundPool {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    inflight: Arc<Inflight>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundPool {
    /// Start `workers` worker tasks on the current runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Envelope>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let inflight = Arc::new(Inflight {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let inflight = Arc::clone(&inflight);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(Envelope { label, job }) = next else {
                            break;
                        };
                        match tokio::spawn(job).await {
                            Ok(Ok(())) => tracing::debug!(
                                "Background job '{}' done (worker {})",
                                label,
                                worker
                            ),
                            Ok(Err(e)) => {
                                tracing::warn!("Background job '{}' failed: {:#}", label, e)
                            }
                            Err(e) if e.is_panic() => {
                                tracing::error!("Background job '{}' panicked", label)
                            }
                            Err(e) => tracing::warn!("Background job '{}' cancelled: {}", label, e),
                        }
                        inflight.finish();
                    }
                    tracing::debug!("Background worker {} stopped", worker);
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            inflight,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a job. Returns false if it was dropped (queue full or pool shut down).
    pub fn submit<F>(&self, label: &str, job: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let sender = self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(sender) = sender else {
            tracing::warn!("Background pool shut down, dropping '{}'", label);
            return false;
        };

        self.inflight.pending.fetch_add(1, Ordering::AcqRel);
        let envelope = Envelope {
            label: label.to_string(),
            job: Box::pin(job),
        };
        match sender.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(env)) => {
                tracing::warn!("Background queue full, dropping '{}'", env.label);
                self.inflight.finish();
                false
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                tracing::warn!("Background queue closed, dropping '{}'", env.label);
                self.inflight.finish();
                false
            }
        }
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.inflight.pending.load(Ordering::Acquire)
    }

    /// Wait until every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inflight.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, let queued jobs finish, and join the workers.
    pub async fn shutdown(&self) {
        let sender = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(sender);
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Background worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Background pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_and_wait_idle_returns() {
        let pool = BackgroundPool::new(2, 8);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let c = counter.clone();
            assert!(pool.submit("count", async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        pool.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let pool = BackgroundPool::new(1, 8);
        let counter = Arc::new(AtomicU32::new(0));
        pool.submit("fails", async { Err(anyhow::anyhow!("boom")) });
        pool.submit("panics", async { panic!("job panic") });
        let c = counter.clone();
        pool.submit("survivor", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        pool.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let pool = BackgroundPool::new(1, 1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit("blocker", async move {
            let _ = release_rx.await;
            Ok(())
        });
        // Give the worker a moment to pick up the blocker.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.submit("queued", async { Ok(()) }));
        assert!(!pool.submit("dropped", async { Ok(()) }));
        let _ = release_tx.send(());
        pool.wait_idle().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_refuses_new_work() {
        let pool = BackgroundPool::new(2, 8);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            pool.submit("count", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!pool.submit("late", async { Ok(()) }));
    }
}
