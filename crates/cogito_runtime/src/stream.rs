//! Lazy-stream combinators over bounded queues.
//!
//! Everything here moves [`QueueItem`]s through `tokio::sync::mpsc` channels
//! with a configurable bound: full buffers suspend producers until the
//! consumer drains, which is what keeps memory bounded under a combinatorial
//! explosion of results and what keeps multiplexing fair.
//!
//! - [`spawn_emitter`] turns an async producer into a stream;
//! - [`multiplex`] fans several streams into one;
//! - [`process_with_loopback`] lets processors feed elements back into the
//!   stream they are draining, with pill-counted termination;
//! - [`schedule_generator`] bridges a stream to a blocking iterator.
//!
//! Errors travel as queue values and are re-raised exactly once at the
//! consumer; the stream terminates and sibling producers are cancelled.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use log::trace;
use tokio::sync::mpsc;

use crate::scheduler::{Scheduler, TaskHandle};

/// Default bound of every internal queue.
pub const DEFAULT_BUFFER_SIZE: usize = 1;

/// Wire format of the internal queues.
#[derive(Debug)]
pub enum QueueItem<T, E> {
    /// An ordinary element.
    Item(T),
    /// A producer-side failure, re-raised once at the consumer.
    Error(E),
    /// Loopback bookkeeping: one more producer is in flight.
    Start,
    /// A producer finished.
    Pill,
}

/// The consumer went away; producers should wind down quietly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl std::fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "the consuming end of this stream is closed")
    }
}

impl std::error::Error for SinkClosed {}

fn channel<T, E>(buffer: usize) -> (mpsc::Sender<QueueItem<T, E>>, mpsc::Receiver<QueueItem<T, E>>) {
    mpsc::channel(buffer.max(1))
}

// ---------------------------------------------------------------------------
// Emitter streams
// ---------------------------------------------------------------------------

/// Producer-side handle of an emitter stream.
#[derive(Debug)]
pub struct EmitterSink<T, E> {
    tx: mpsc::Sender<QueueItem<T, E>>,
}

impl<T, E> Clone for EmitterSink<T, E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T, E> EmitterSink<T, E> {
    /// Emits one element, suspending while the buffer is full.
    pub async fn emit(&self, value: T) -> Result<(), SinkClosed> {
        self.tx
            .send(QueueItem::Item(value))
            .await
            .map_err(|_| SinkClosed)
    }
}

/// A stream fed by a producer task spawned on the scheduler.
///
/// Ends when the producer finishes; yields the producer's error exactly
/// once if it fails. Dropping the stream aborts the producer.
#[derive(Debug)]
pub struct EmitterStream<T, E> {
    rx: mpsc::Receiver<QueueItem<T, E>>,
    task: TaskHandle<()>,
    done: bool,
}

impl<T, E> EmitterStream<T, E> {
    /// Aborts the producer and waits for it to wind down.
    pub async fn close(mut self) {
        self.rx.close();
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl<T, E> Drop for EmitterStream<T, E> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T: Send, E: Send> Stream for EmitterStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(QueueItem::Item(value))) => return Poll::Ready(Some(Ok(value))),
                Poll::Ready(Some(QueueItem::Error(error))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(QueueItem::Start | QueueItem::Pill)) => continue,
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Runs an async producer as a scheduler task and exposes its emissions as
/// a bounded stream.
pub fn spawn_emitter<T, E, F, Fut>(
    scheduler: &Scheduler,
    buffer: usize,
    producer: F,
) -> EmitterStream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(EmitterSink<T, E>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
{
    let (tx, rx) = channel(buffer);
    let sink = EmitterSink { tx: tx.clone() };
    let task = scheduler.spawn(async move {
        if let Err(error) = producer(sink).await {
            let _ = tx.send(QueueItem::Error(error)).await;
        }
        // Dropping the sender closes the stream.
    });
    EmitterStream { rx, task, done: false }
}

// ---------------------------------------------------------------------------
// Pumping and multiplexing
// ---------------------------------------------------------------------------

/// Forwards every element of a stream into a queue, converting a failure
/// into a queued [`QueueItem::Error`] and appending a pill on completion.
pub async fn push_each_to_queue<S, T, E>(stream: S, queue: mpsc::Sender<QueueItem<T, E>>)
where
    S: Stream<Item = Result<T, E>> + Send,
{
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        let outcome = match item {
            Ok(value) => queue.send(QueueItem::Item(value)).await,
            Err(error) => {
                let _ = queue.send(QueueItem::Error(error)).await;
                return;
            }
        };
        if outcome.is_err() {
            // Consumer is gone; stop pumping.
            return;
        }
    }
    let _ = queue.send(QueueItem::Pill).await;
}

/// Fan-in of several streams over one bounded queue.
///
/// Element order within one input is preserved; order across inputs is
/// unspecified but fair, because the bounded queue blocks fast producers.
/// Dropping the stream aborts all pumps; [`Multiplexed::close`] also awaits
/// them.
#[derive(Debug)]
pub struct Multiplexed<T, E> {
    rx: mpsc::Receiver<QueueItem<T, E>>,
    pumps: Vec<TaskHandle<()>>,
    remaining: usize,
    done: bool,
}

impl<T, E> Multiplexed<T, E> {
    fn finish(&mut self) {
        self.done = true;
        for pump in &self.pumps {
            pump.abort();
        }
    }

    /// Cancels all pumps and waits for them to wind down.
    pub async fn close(mut self) {
        self.rx.close();
        self.finish();
        for mut pump in self.pumps.drain(..) {
            let _ = (&mut pump).await;
        }
    }
}

impl<T, E> Drop for Multiplexed<T, E> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<T: Send, E: Send> Stream for Multiplexed<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            if self.remaining == 0 {
                self.done = true;
                return Poll::Ready(None);
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(QueueItem::Item(value))) => return Poll::Ready(Some(Ok(value))),
                Poll::Ready(Some(QueueItem::Error(error))) => {
                    self.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(QueueItem::Pill)) => {
                    self.remaining -= 1;
                    trace!("multiplex pill received, {} source(s) left", self.remaining);
                }
                Poll::Ready(Some(QueueItem::Start)) => {}
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Multiplexes the given streams into one, with a pump task per input and a
/// shared queue bounded at `buffer`.
pub fn multiplex<T, E>(
    sources: Vec<BoxStream<'static, Result<T, E>>>,
    buffer: usize,
    scheduler: &Scheduler,
) -> Multiplexed<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = channel(buffer);
    let remaining = sources.len();
    let pumps = sources
        .into_iter()
        .map(|source| {
            let queue = tx.clone();
            scheduler.spawn(push_each_to_queue(source, queue))
        })
        .collect();
    Multiplexed {
        rx,
        pumps,
        remaining,
        done: false,
    }
}

// ---------------------------------------------------------------------------
// Loopback processing
// ---------------------------------------------------------------------------

/// A processor invoked for every element flowing through a loopback stream.
/// It may emit further elements through the sink; each one is yielded *and*
/// processed in turn.
pub type Processor<T, E> =
    Arc<dyn Fn(T, LoopbackSink<T, E>) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// Producer handle given to loopback processors.
#[derive(Debug)]
pub struct LoopbackSink<T, E> {
    tx: mpsc::Sender<QueueItem<T, E>>,
}

impl<T, E> Clone for LoopbackSink<T, E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T, E> LoopbackSink<T, E> {
    pub async fn emit(&self, value: T) -> Result<(), SinkClosed> {
        self.tx
            .send(QueueItem::Item(value))
            .await
            .map_err(|_| SinkClosed)
    }
}

async fn run_processor<T, E>(
    processor: Processor<T, E>,
    element: T,
    tx: mpsc::Sender<QueueItem<T, E>>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    let sink = LoopbackSink { tx: tx.clone() };
    match processor(element, sink).await {
        Ok(()) => {
            let _ = tx.send(QueueItem::Pill).await;
        }
        Err(error) => {
            let _ = tx.send(QueueItem::Error(error)).await;
        }
    }
}

async fn feed_loopback_inputs<T, E>(
    input: BoxStream<'static, Result<T, E>>,
    processor: Processor<T, E>,
    tx: mpsc::Sender<QueueItem<T, E>>,
    scheduler: Scheduler,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    // The feeder itself holds one start pill so the stream cannot end
    // before the input is fully consumed.
    if tx.send(QueueItem::Start).await.is_err() {
        return;
    }

    let mut input = input;
    while let Some(item) = input.next().await {
        match item {
            Ok(element) => {
                if tx.send(QueueItem::Start).await.is_err() {
                    return;
                }
                scheduler.spawn(run_processor(processor.clone(), element, tx.clone()));
            }
            Err(error) => {
                let _ = tx.send(QueueItem::Error(error)).await;
                return;
            }
        }
    }

    let _ = tx.send(QueueItem::Pill).await;
}

/// A loopback stream: every input element is handed to the processor, every
/// element a processor emits is yielded *and* handed to the processor again.
///
/// Termination is pill-counted: the feeder and every processor invocation
/// hold one start pill each, and the stream ends when the count returns to
/// zero.
#[derive(Debug)]
pub struct Loopback<T, E> {
    rx: mpsc::Receiver<QueueItem<T, E>>,
    tx: mpsc::Sender<QueueItem<T, E>>,
    processor_tasks: Vec<TaskHandle<()>>,
    feeder: TaskHandle<()>,
    processor: ProcessorCell<T, E>,
    scheduler: Scheduler,
    running: usize,
    done: bool,
}

// Arc<dyn Fn...> has no Debug; keep it newtyped so Loopback can derive.
struct ProcessorCell<T, E>(Processor<T, E>);

impl<T, E> std::fmt::Debug for ProcessorCell<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Processor")
    }
}

impl<T, E> Loopback<T, E> {
    fn finish(&mut self) {
        self.done = true;
        self.feeder.abort();
        for task in &self.processor_tasks {
            task.abort();
        }
    }

    /// Cancels feeder and processors and waits for them to wind down.
    pub async fn close(mut self) {
        self.rx.close();
        self.finish();
        let _ = (&mut self.feeder).await;
        for mut task in self.processor_tasks.drain(..) {
            let _ = (&mut task).await;
        }
    }
}

impl<T, E> Drop for Loopback<T, E> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<T, E> Stream for Loopback<T, E>
where
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(QueueItem::Start)) => {
                    self.running += 1;
                }
                Poll::Ready(Some(QueueItem::Pill)) => {
                    self.running -= 1;
                    if self.running == 0 {
                        self.done = true;
                        return Poll::Ready(None);
                    }
                }
                Poll::Ready(Some(QueueItem::Error(error))) => {
                    self.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(QueueItem::Item(value))) => {
                    // The element triggers another processor run: that run
                    // holds a start pill taken synchronously here, before
                    // the element is yielded.
                    self.running += 1;
                    let processor = self.processor.0.clone();
                    let tx = self.tx.clone();
                    let task = self
                        .scheduler
                        .spawn(run_processor(processor, value.clone(), tx));
                    self.processor_tasks.push(task);
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Builds a loopback stream over `input` with the given processor.
pub fn process_with_loopback<T, E>(
    input: BoxStream<'static, Result<T, E>>,
    processor: Processor<T, E>,
    buffer: usize,
    scheduler: &Scheduler,
) -> Loopback<T, E>
where
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = channel(buffer);
    let feeder = scheduler.spawn(feed_loopback_inputs(
        input,
        processor.clone(),
        tx.clone(),
        scheduler.clone(),
    ));
    Loopback {
        rx,
        tx,
        processor_tasks: Vec::new(),
        feeder,
        processor: ProcessorCell(processor),
        scheduler: scheduler.clone(),
        running: 0,
        done: false,
    }
}

// ---------------------------------------------------------------------------
// Blocking bridge
// ---------------------------------------------------------------------------

/// A blocking iterator over an async stream running on the scheduler.
///
/// Dropping the iterator cancels the pump and waits for it to finish, so
/// closing a half-consumed stream is prompt and leaves no task behind.
#[derive(Debug)]
pub struct BlockingStream<T, E> {
    rx: mpsc::Receiver<QueueItem<T, E>>,
    pump: Option<TaskHandle<()>>,
    scheduler: Scheduler,
    finished: bool,
}

/// Bridges an async stream to a synchronous caller through a bounded
/// thread-safe queue.
pub fn schedule_generator<S, T, E>(
    stream: S,
    buffer: usize,
    scheduler: &Scheduler,
) -> BlockingStream<T, E>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = channel(buffer);
    let pump = scheduler.spawn(push_each_to_queue(stream, tx));
    BlockingStream {
        rx,
        pump: Some(pump),
        scheduler: scheduler.clone(),
        finished: false,
    }
}

impl<T, E> Iterator for BlockingStream<T, E> {
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.blocking_recv() {
                Some(QueueItem::Item(value)) => return Some(Ok(value)),
                Some(QueueItem::Error(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                Some(QueueItem::Start) => continue,
                Some(QueueItem::Pill) | None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

impl<T, E> Drop for BlockingStream<T, E> {
    fn drop(&mut self) {
        let Some(mut pump) = self.pump.take() else {
            return;
        };
        // Pending queue items are discarded.
        self.rx.close();
        pump.abort();
        if pump.is_finished() || self.scheduler.on_scheduler_thread() {
            return;
        }
        // Reap on the scheduler and wait until the pump (and through it,
        // the whole source chain) has actually wound down.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        self.scheduler.spawn(async move {
            let _ = (&mut pump).await;
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}
