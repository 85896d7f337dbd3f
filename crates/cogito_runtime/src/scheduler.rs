//! The cooperative scheduler: one dedicated executor thread.
//!
//! All proof sources, listener handlers and loopback plumbing run as tasks
//! on a single current-thread tokio runtime owned by a [`Scheduler`].
//! Suspension points are queue sends/receives and task joins; nothing else
//! runs in parallel inside the core. Blocking callers bridge in from other
//! threads, and [`Scheduler::on_scheduler_thread`] lets the engine reject
//! the wrong call site explicitly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle as ThreadHandle, ThreadId};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use tokio::task::JoinError;

/// Handle to a task spawned on the scheduler.
///
/// Wraps `tokio::task::JoinHandle<T>` with abort/completion tracking.
/// Awaiting it yields `Result<T, JoinError>`; an aborted task reports a
/// cancelled `JoinError`.
#[derive(Debug)]
pub struct TaskHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    fn new(inner: JoinHandle<T>) -> Self {
        Self { inner }
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Cancels the task at its next suspension point. Completed tasks are
    /// unaffected.
    pub fn abort(&self) {
        self.inner.abort();
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Decrements the live-task counter when the task future is dropped, which
/// covers completion and abortion alike.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct SchedulerInner {
    handle: tokio::runtime::Handle,
    thread_id: ThreadId,
    active: Arc<AtomicUsize>,
    shutdown: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    thread: std::sync::Mutex<Option<ThreadHandle<()>>>,
}

/// A cooperative task scheduler on a dedicated thread.
///
/// Cheap to clone; the executor thread shuts down when the last clone is
/// dropped. Tasks can be spawned from any thread.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Starts the executor thread.
    pub fn new() -> std::io::Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("cogito-scheduler".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((runtime.handle().clone(), thread::current().id())));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;

        let (handle, thread_id) = ready_rx
            .recv()
            .map_err(|_| std::io::Error::other("scheduler thread died during startup"))??;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                handle,
                thread_id,
                active: Arc::new(AtomicUsize::new(0)),
                shutdown: std::sync::Mutex::new(Some(shutdown_tx)),
                thread: std::sync::Mutex::new(Some(thread)),
            }),
        })
    }

    /// Spawns a tracked task. Usable from any thread, including from tasks
    /// already running on the scheduler.
    pub fn spawn<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let counter = self.inner.active.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(counter);
        TaskHandle::new(self.inner.handle.spawn(async move {
            let _guard = guard;
            future.await
        }))
    }

    /// Whether the calling thread is the executor thread.
    pub fn on_scheduler_thread(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Number of tasks currently alive on the scheduler.
    pub fn active_tasks(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.lock().expect("scheduler shutdown poisoned").take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.lock().expect("scheduler thread poisoned").take() {
            let _ = thread.join();
        }
    }
}
