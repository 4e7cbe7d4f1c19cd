use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

use crate::indexer::IndexPipeline;

/// Runs an initial full pass per project, then periodic incremental passes.
///
/// Plain OS threads: a one-shot worker for the full pass and one long-lived
/// worker for the periodic loop. The per-project lock inside the pipeline
/// keeps the two from ever indexing the same project concurrently. The
/// periodic worker sleeps on a condvar so `stop()` interrupts the wait
/// instead of blocking out the full interval.
pub struct BackgroundScheduler {
    pipeline: Arc<IndexPipeline>,
    inner: Arc<Inner>,
}

struct Inner {
    running: AtomicBool,
    current_project: Mutex<Option<PathBuf>>,
    gate: Mutex<()>,
    wakeup: Condvar,
    interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Sleep one interval, returning early when `stop()` flips the flag.
    fn sleep_interruptibly(&self) {
        let guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .wakeup
            .wait_timeout_while(guard, self.interval, |_| self.running.load(Ordering::SeqCst));
    }
}

impl BackgroundScheduler {
    pub fn new(pipeline: Arc<IndexPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            inner: Arc::new(Inner {
                running: AtomicBool::new(false),
                current_project: Mutex::new(None),
                gate: Mutex::new(()),
                wakeup: Condvar::new(),
                interval,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Kick off a one-shot full pass for the project and make sure the
    /// periodic incremental worker is alive. Safe to call repeatedly; later
    /// calls retarget the periodic worker at the new project.
    pub fn start_auto_indexing(&self, project_root: &Path) {
        {
            let mut current = self
                .inner
                .current_project
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *current = Some(project_root.to_path_buf());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let root = project_root.to_path_buf();
        thread::spawn(move || {
            info!(project = %root.display(), "starting initial full index");
            match pipeline.full_index(&root) {
                Ok(summary) => info!(
                    files = summary.files_processed,
                    blocks = summary.blocks_indexed,
                    "initial full index completed"
                ),
                Err(e) => error!(error = %e, "initial full index failed"),
            }
        });

        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let pipeline = Arc::clone(&self.pipeline);
            let handle = thread::spawn(move || {
                while inner.running.load(Ordering::SeqCst) {
                    let project = inner
                        .current_project
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    if let Some(root) = project {
                        info!(project = %root.display(), "running periodic incremental index");
                        // Tick failures are logged and swallowed; the next
                        // tick proceeds on schedule.
                        if let Err(e) = pipeline.incremental_index(&root) {
                            error!(error = %e, "periodic incremental index failed");
                        }
                    }
                    inner.sleep_interruptibly();
                }
            });
            let mut worker = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner());
            *worker = Some(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop the periodic worker. A pass already in flight runs to
    /// completion; the worker exits at the next sleep boundary.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.wakeup.notify_all();
        let handle = {
            let mut worker = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        if let Some(handle) = handle {
            let _unused = handle.join();
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embeddings::EmbeddingProvider;
    use crate::store::VectorStore;
    use anyhow::Result;
    use std::time::Instant;

    struct NullEmbedder;

    impl EmbeddingProvider for NullEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0, 1.0])
        }
    }

    fn pipeline(store_dir: &Path) -> Arc<IndexPipeline> {
        Arc::new(IndexPipeline::new(
            Config::default(),
            VectorStore::new(store_dir.to_path_buf()),
            Arc::new(NullEmbedder),
        ))
    }

    #[test]
    fn stop_interrupts_the_interval_sleep() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let scheduler = BackgroundScheduler::new(
            pipeline(&dir.path().join("store")),
            Duration::from_secs(3600),
        );
        scheduler.start_auto_indexing(dir.path());
        assert!(scheduler.is_running());

        // Give the workers a moment to get past their first pass, then stop:
        // join must return long before the hour-long interval elapses.
        thread::sleep(Duration::from_millis(200));
        let begin = Instant::now();
        scheduler.stop();
        assert!(begin.elapsed() < Duration::from_secs(30));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn restart_after_stop_spawns_a_new_worker() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = BackgroundScheduler::new(
            pipeline(&dir.path().join("store")),
            Duration::from_secs(3600),
        );

        scheduler.start_auto_indexing(dir.path());
        scheduler.stop();
        assert!(!scheduler.is_running());

        scheduler.start_auto_indexing(dir.path());
        assert!(scheduler.is_running());
        scheduler.stop();
    }
}
