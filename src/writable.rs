//! Pull sink exposed as a push-style writable endpoint
//!
//! On construction the sink is handed a producer and spawned. Each demand
//! from the sink takes the oldest queued write, or waits for one. Writes
//! report backpressure once the queue reaches the high-water-mark; `drain`
//! fires when it falls back below.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{lock, Completion, StreamError, StreamResult};
use crate::events::Listeners;
use crate::lifecycle::Phase;
use crate::pull::{PullSink, PullSource, Request, Response};
use crate::stream_configuration::StreamOptions;

struct PendingWrite<T> {
    chunk: T,
    callback: Option<Completion>,
}

struct WritableState<T> {
    phase: Phase,
    queue: VecDeque<PendingWrite<T>>,
    ending: bool,
    end_callbacks: Vec<Completion>,
    need_drain: bool,
    destroy_reason: Option<StreamError>,
    sink_closed: bool,
}

impl<T> WritableState<T> {
    fn take_callbacks(&mut self) -> Vec<Completion> {
        let mut callbacks: Vec<Completion> = self
            .queue
            .drain(..)
            .filter_map(|write| write.callback)
            .collect();
        callbacks.append(&mut self.end_callbacks);
        callbacks
    }
}

struct WritableShared<T> {
    state: Mutex<WritableState<T>>,
    wake: Notify,
    high_water_mark: usize,
    drain: Listeners<()>,
    finish: Listeners<()>,
    error: Listeners<StreamError>,
    close: Listeners<()>,
}

fn fail_all(callbacks: Vec<Completion>, err: &StreamError) {
    for callback in callbacks {
        callback(Err(err.clone()));
    }
}

impl<T: Send + 'static> WritableShared<T> {
    fn emit_error(&self, err: StreamError) {
        let message = err.to_string();
        if !self.error.emit_final(err) {
            log::warn!("writable errored with no error listener: {}", message);
        }
    }

    fn emit_close(&self) {
        self.close.emit_final(());
        self.drain.seal();
        self.finish.seal();
        self.error.seal();
    }

    /// Settle the endpoint once the sink's demand loop has returned
    fn complete(&self, result: StreamResult<()>) {
        let mut state = lock(&self.state);

        if state.phase == Phase::Destroyed {
            let reason = state.destroy_reason.clone();
            drop(state);
            log::debug!("sink acknowledged destroy");
            if let Some(err) = reason {
                self.emit_error(err);
            }
            self.emit_close();
            return;
        }

        match result {
            Ok(()) => {
                state.phase.advance(Phase::Ended);
                let unsent: Vec<Completion> = state
                    .queue
                    .drain(..)
                    .filter_map(|write| write.callback)
                    .collect();
                let end_callbacks = std::mem::take(&mut state.end_callbacks);
                drop(state);
                log::debug!("sink finished");
                fail_all(unsent, &StreamError::SinkClosed);
                for callback in end_callbacks {
                    callback(Ok(()));
                }
                self.finish.emit_final(());
                self.emit_close();
            }
            Err(err) => {
                state.phase.advance(Phase::Errored);
                let callbacks = state.take_callbacks();
                drop(state);
                log::debug!("sink failed: {}", err);
                fail_all(callbacks, &err);
                self.emit_error(err);
                self.emit_close();
            }
        }
    }
}

/// The pull-side face of a writable, handed to the sink
struct Producer<T> {
    shared: Arc<WritableShared<T>>,
}

#[async_trait]
impl<T: Send + 'static> PullSource<T> for Producer<T> {
    async fn request(&mut self, request: Request) -> Response<T> {
        if let Request::Abort(reason) = request {
            let mut state = lock(&self.shared.state);
            if state.phase.is_terminal() || state.sink_closed {
                return Response::End;
            }
            state.sink_closed = true;
            let callbacks = state.take_callbacks();
            drop(state);
            log::debug!("sink aborted the writable (reason: {:?})", reason);
            fail_all(callbacks, &reason.unwrap_or(StreamError::SinkClosed));
            return Response::End;
        }

        loop {
            {
                let mut state = lock(&self.shared.state);
                if state.phase == Phase::Destroyed {
                    return match state.destroy_reason.clone() {
                        Some(err) => Response::Error(err),
                        None => Response::End,
                    };
                }
                if state.phase.is_terminal() || state.sink_closed {
                    return Response::End;
                }
                if let Some(write) = state.queue.pop_front() {
                    let drained =
                        state.need_drain && state.queue.len() < self.shared.high_water_mark;
                    if drained {
                        state.need_drain = false;
                    }
                    drop(state);
                    log::trace!("delivering queued write to sink");
                    if let Some(callback) = write.callback {
                        callback(Ok(()));
                    }
                    if drained {
                        self.shared.drain.emit(&());
                    }
                    return Response::Item(write.chunk);
                }
                if state.ending {
                    log::debug!("write queue drained after end, ending sink");
                    return Response::End;
                }
            }
            self.shared.wake.notified().await;
        }
    }
}

impl<T> WritableShared<T> {
    /// Signal end-of-stream without a final chunk. Queued writes still reach
    /// the sink.
    fn end_input(&self) {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() || state.ending || state.sink_closed {
            return;
        }
        state.ending = true;
        drop(state);
        log::debug!("last writable handle dropped, ending");
        self.wake.notify_one();
    }
}

struct WritableHandle<T> {
    inner: Arc<WritableShared<T>>,
}

impl<T> Deref for WritableHandle<T> {
    type Target = WritableShared<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Drop for WritableHandle<T> {
    fn drop(&mut self) {
        self.inner.end_input();
    }
}

/// Push-style writable view of a pull sink.
///
/// Cloning yields another handle to the same endpoint. Dropping the last
/// handle ends the writable: queued writes are still delivered, then the
/// sink sees end-of-stream and its task finishes.
pub struct Writable<T> {
    shared: Arc<WritableHandle<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Writable {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Wrap `sink` as a writable endpoint.
///
/// Must be called within a Tokio runtime: the sink's demand loop is spawned
/// immediately. A high-water-mark of 0 is raised to 1, so the first write
/// reports backpressure and `drain` follows once the sink pulls it.
pub fn writeable<T, K>(sink: K, options: StreamOptions) -> Writable<T>
where
    T: Send + 'static,
    K: PullSink<T> + 'static,
{
    let high_water_mark = options.effective_high_water_mark().max(1);
    let shared = Arc::new(WritableShared {
        state: Mutex::new(WritableState {
            phase: Phase::Idle,
            queue: VecDeque::new(),
            ending: false,
            end_callbacks: Vec::new(),
            need_drain: false,
            destroy_reason: None,
            sink_closed: false,
        }),
        wake: Notify::new(),
        high_water_mark,
        drain: Listeners::new(),
        finish: Listeners::new(),
        error: Listeners::new(),
        close: Listeners::new(),
    });
    lock(&shared.state).phase.advance(Phase::Active);
    log::debug!("writable created, high water mark {}", high_water_mark);

    let task_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        let mut sink = sink;
        let mut producer = Producer {
            shared: Arc::clone(&task_shared),
        };
        let result = sink.consume(&mut producer).await;
        task_shared.complete(result);
    });

    Writable {
        shared: Arc::new(WritableHandle { inner: shared }),
    }
}

impl<T: Send + 'static> Writable<T> {
    /// Wrap `sink` with the default options
    pub fn new<K>(sink: K) -> Self
    where
        K: PullSink<T> + 'static,
    {
        writeable(sink, StreamOptions::default())
    }

    /// Queue `chunk` for the sink.
    ///
    /// `callback` runs once the sink has pulled the chunk. Returns `false`
    /// when the queue is at or above the high-water-mark; wait for `drain`
    /// before writing more. Writes after `end` or termination are rejected
    /// through the callback and never reach the sink.
    pub fn write(&self, chunk: T, callback: Option<Completion>) -> bool {
        let mut state = lock(&self.shared.state);
        if state.phase.is_terminal() || state.ending || state.sink_closed {
            let err = match state.phase {
                Phase::Destroyed => StreamError::Destroyed,
                _ if state.sink_closed => StreamError::SinkClosed,
                _ => StreamError::WriteAfterEnd,
            };
            drop(state);
            log::debug!("rejecting write: {}", err);
            if let Some(callback) = callback {
                callback(Err(err));
            }
            return false;
        }

        state.queue.push_back(PendingWrite { chunk, callback });
        let below = state.queue.len() < self.shared.high_water_mark;
        if !below {
            state.need_drain = true;
        }
        drop(state);
        self.shared.wake.notify_one();
        below
    }

    /// Queue an optional final chunk and signal end-of-stream.
    ///
    /// `callback` runs once the sink acknowledges completion, or with the
    /// error that prevented it.
    pub fn end(&self, chunk: Option<T>, callback: Option<Completion>) {
        let mut state = lock(&self.shared.state);
        if state.phase.is_terminal() || state.sink_closed || (state.ending && chunk.is_some()) {
            let err = if state.phase == Phase::Destroyed {
                StreamError::Destroyed
            } else {
                StreamError::WriteAfterEnd
            };
            drop(state);
            if let Some(callback) = callback {
                callback(Err(err));
            }
            return;
        }

        if let Some(chunk) = chunk {
            state.queue.push_back(PendingWrite {
                chunk,
                callback: None,
            });
        }
        state.ending = true;
        if let Some(callback) = callback {
            state.end_callbacks.push(callback);
        }
        drop(state);
        log::debug!("writable ending");
        self.shared.wake.notify_one();
    }

    /// Terminate immediately, discarding queued writes.
    ///
    /// The sink's next demand resolves with the reason as an error, or with
    /// end if there is none. `error` (with a reason) and then `close` fire
    /// once the sink returns. Calling this on a terminated endpoint does
    /// nothing.
    pub fn destroy(&self, reason: Option<StreamError>) {
        let mut state = lock(&self.shared.state);
        if !state.phase.advance(Phase::Destroyed) {
            return;
        }
        log::debug!("writable destroyed (reason: {:?})", reason);
        state.destroy_reason = reason;
        let callbacks = state.take_callbacks();
        state.need_drain = false;
        drop(state);
        self.shared.wake.notify_one();
        fail_all(callbacks, &StreamError::Destroyed);
    }

    pub fn on_drain<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.drain.on(handler);
    }

    pub fn once_drain<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.drain.once(handler);
    }

    pub fn on_finish<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.finish.on(handler);
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(&StreamError) + Send + 'static,
    {
        self.shared.error.on(handler);
    }

    pub fn once_error<F>(&self, handler: F)
    where
        F: FnMut(&StreamError) + Send + 'static,
    {
        self.shared.error.once(handler);
    }

    pub fn on_close<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.close.on(handler);
    }

    pub fn once_close<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.close.once(handler);
    }

    /// Number of writes queued but not yet pulled by the sink
    pub fn writable_length(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Whether a `drain` is owed to a writer that saw `false`
    pub fn needs_drain(&self) -> bool {
        lock(&self.shared.state).need_drain
    }

    pub fn is_ending(&self) -> bool {
        lock(&self.shared.state).ending
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase
    }

    /// True once the endpoint reached any terminal phase
    pub fn destroyed(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn high_water_mark(&self) -> usize {
        self.shared.high_water_mark
    }
}
