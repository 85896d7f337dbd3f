//! Cooperative multiplexing runtime for cogito.
//!
//! One engine instance owns one [`Scheduler`] on one dedicated thread; all
//! proof sources and listener handlers run as cooperative tasks on it. The
//! combinators in [`stream`] interleave many lazy streams into one result
//! stream with bounded buffering, prompt cancellation and exception
//! propagation, and [`stream::schedule_generator`] bridges the async world
//! to ordinary blocking callers.

pub mod scheduler;
pub mod stream;

pub use scheduler::{JoinError, Scheduler, TaskHandle};
pub use stream::{
    multiplex, process_with_loopback, push_each_to_queue, schedule_generator, spawn_emitter,
    BlockingStream, EmitterSink, EmitterStream, Loopback, LoopbackSink, Multiplexed, Processor,
    QueueItem, SinkClosed, DEFAULT_BUFFER_SIZE,
};
