//! Pull source exposed as a push-style readable endpoint
//!
//! One spawned task per endpoint owns the source and runs the demand loop.
//! Consumers either register a data handler (flowing mode) or call
//! [`Readable::read`] when told data is buffered (paused mode). The loop
//! never has more than one request outstanding and never prefetches past
//! the high-water-mark.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures_util::StreamExt;
use tokio::sync::Notify;

use crate::error::{lock, StreamError, StreamResult};
use crate::events::Listeners;
use crate::lifecycle::Phase;
use crate::pull::{PullSource, Request, Response};
use crate::stream_configuration::StreamOptions;
use crate::RS2Stream;

struct ReadableState<T> {
    phase: Phase,
    // None until the consumer picks a mode
    flowing: Option<bool>,
    buffer: VecDeque<T>,
    want_read: bool,
    source_done: bool,
    source_error: Option<StreamError>,
    pending_abort: Option<Option<StreamError>>,
    failure: Option<StreamError>,
}

struct ReadableShared<T> {
    state: Mutex<ReadableState<T>>,
    wake: Notify,
    high_water_mark: usize,
    data: Listeners<T>,
    readable: Listeners<()>,
    end: Listeners<()>,
    error: Listeners<StreamError>,
    close: Listeners<()>,
    pause: Listeners<()>,
    resume: Listeners<()>,
}

/// Next thing the demand loop has to do
enum Step<T> {
    Wait,
    Data(T),
    Request,
    Abort {
        reason: Option<StreamError>,
        signal: bool,
    },
    Finish,
    Fail(StreamError),
    Exit,
}

impl<T: Send + Sync + 'static> ReadableShared<T> {
    fn next_step(&self) -> Step<T> {
        let mut state = lock(&self.state);

        if let Some(reason) = state.pending_abort.take() {
            let signal = !state.source_done;
            state.source_done = true;
            state.buffer.clear();
            return Step::Abort { reason, signal };
        }
        if state.phase.is_terminal() {
            return Step::Exit;
        }
        if let Some(err) = state.source_error.take() {
            state.buffer.clear();
            state.phase.advance(Phase::Errored);
            state.failure = Some(err.clone());
            return Step::Fail(err);
        }

        let flowing = state.flowing == Some(true);
        if flowing {
            if let Some(item) = state.buffer.pop_front() {
                return Step::Data(item);
            }
        }

        if state.source_done {
            // end is only announced once a consumer has seen the buffer run dry
            if state.buffer.is_empty() && (flowing || state.want_read) {
                state.phase.advance(Phase::Ended);
                return Step::Finish;
            }
            return Step::Wait;
        }

        let demand = if flowing {
            state.buffer.is_empty()
        } else {
            state.want_read && state.buffer.len() < self.high_water_mark
        };
        if demand {
            state.phase.advance(Phase::Active);
            Step::Request
        } else {
            if state.buffer.len() >= self.high_water_mark {
                state.want_read = false;
            }
            Step::Wait
        }
    }

    fn abort_pending(&self) -> bool {
        lock(&self.state).pending_abort.is_some()
    }

    fn accept(&self, response: Response<T>) {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() {
            log::trace!("discarding response resolved after termination");
            return;
        }
        match response {
            Response::Item(item) => {
                if state.flowing == Some(true) && state.buffer.is_empty() {
                    drop(state);
                    self.emit_data(item);
                } else {
                    let was_empty = state.buffer.is_empty();
                    state.buffer.push_back(item);
                    drop(state);
                    if was_empty {
                        self.readable.emit(&());
                    }
                }
            }
            Response::End => {
                log::debug!("pull source ended");
                state.source_done = true;
            }
            Response::Error(err) => {
                log::debug!("pull source failed: {}", err);
                state.source_done = true;
                state.source_error = Some(err);
            }
        }
    }

    fn emit_data(&self, item: T) {
        if !self.data.emit(&item) {
            log::trace!("flowing item dropped, no data listener");
        }
    }

    fn emit_error(&self, err: StreamError) {
        let message = err.to_string();
        if !self.error.emit_final(err) {
            log::warn!("readable errored with no error listener: {}", message);
        }
    }

    /// Emit the final `close` and seal every other event, releasing any
    /// endpoint handles their handlers captured
    fn emit_close(&self) {
        self.close.emit_final(());
        self.data.seal();
        self.readable.seal();
        self.end.seal();
        self.error.seal();
        self.pause.seal();
        self.resume.seal();
    }
}

impl<T> ReadableShared<T> {
    fn destroy(&self, reason: Option<StreamError>) {
        let mut state = lock(&self.state);
        if !state.phase.advance(Phase::Destroyed) {
            return;
        }
        log::debug!("readable destroyed (reason: {:?})", reason);
        state.failure = reason.clone();
        state.pending_abort = Some(reason);
        state.buffer.clear();
        drop(state);
        self.wake.notify_one();
    }
}

async fn drive<T, S>(shared: Arc<ReadableShared<T>>, mut source: S)
where
    T: Send + Sync + 'static,
    S: PullSource<T>,
{
    loop {
        match shared.next_step() {
            Step::Wait => shared.wake.notified().await,
            Step::Data(item) => shared.emit_data(item),
            Step::Request => {
                let response = {
                    let mut request = source.request(Request::Demand);
                    loop {
                        tokio::select! {
                            response = &mut request => break Some(response),
                            _ = shared.wake.notified() => {
                                if shared.abort_pending() {
                                    break None;
                                }
                            }
                        }
                    }
                };
                match response {
                    Some(response) => shared.accept(response),
                    None => log::debug!("abandoning in-flight request to abort"),
                }
            }
            Step::Abort { reason, signal } => {
                if signal {
                    log::debug!("signalling abort to pull source");
                    let ack = source.request(Request::Abort(reason.clone())).await;
                    if let Response::Error(err) = ack {
                        log::debug!("pull source reported error while aborting: {}", err);
                    }
                }
                if let Some(err) = reason {
                    shared.emit_error(err);
                }
                shared.emit_close();
                return;
            }
            Step::Finish => {
                shared.end.emit_final(());
                shared.emit_close();
                return;
            }
            Step::Fail(err) => {
                shared.emit_error(err);
                shared.emit_close();
                return;
            }
            Step::Exit => return,
        }
    }
}

/// Owner of the user-facing side; the demand loop only holds the shared
/// state, so dropping the last handle destroys the endpoint
struct ReadableHandle<T> {
    inner: Arc<ReadableShared<T>>,
}

impl<T> Deref for ReadableHandle<T> {
    type Target = ReadableShared<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Drop for ReadableHandle<T> {
    fn drop(&mut self) {
        if !lock(&self.inner.state).phase.is_terminal() {
            log::debug!("last readable handle dropped, destroying");
        }
        self.inner.destroy(None);
    }
}

/// Push-style readable view of a pull source.
///
/// Cloning yields another handle to the same endpoint, so handlers can
/// capture one to call `pause`, `resume` or `destroy`. Once every handle is
/// gone the endpoint is destroyed and the source aborted. A handle captured
/// by one of the endpoint's own handlers keeps it alive until it terminates.
pub struct Readable<T> {
    shared: Arc<ReadableHandle<T>>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Readable {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Wrap `source` as a readable endpoint.
///
/// Must be called within a Tokio runtime; the demand loop is spawned onto it.
/// Nothing is requested until a consumer attaches or calls `read`/`resume`.
pub fn readable<T, S>(source: S, options: StreamOptions) -> Readable<T>
where
    T: Send + Sync + 'static,
    S: PullSource<T> + 'static,
{
    let high_water_mark = options.effective_high_water_mark().max(1);
    let shared = Arc::new(ReadableShared {
        state: Mutex::new(ReadableState {
            phase: Phase::Idle,
            flowing: None,
            buffer: VecDeque::new(),
            want_read: false,
            source_done: false,
            source_error: None,
            pending_abort: None,
            failure: None,
        }),
        wake: Notify::new(),
        high_water_mark,
        data: Listeners::new(),
        readable: Listeners::new(),
        end: Listeners::new(),
        error: Listeners::new(),
        close: Listeners::new(),
        pause: Listeners::new(),
        resume: Listeners::new(),
    });
    log::debug!("readable created, high water mark {}", high_water_mark);
    tokio::spawn(drive(Arc::clone(&shared), source));
    Readable {
        shared: Arc::new(ReadableHandle { inner: shared }),
    }
}

impl<T: Send + Sync + 'static> Readable<T> {
    /// Wrap `source` with the default options
    pub fn new<S>(source: S) -> Self
    where
        S: PullSource<T> + 'static,
    {
        readable(source, StreamOptions::default())
    }

    /// Register a data handler. Switches to flowing mode unless the
    /// consumer paused explicitly.
    pub fn on_data<F>(&self, handler: F)
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.shared.data.on(handler);
        let mut state = lock(&self.shared.state);
        if state.flowing.is_none() {
            state.flowing = Some(true);
        }
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Register a handler run whenever data becomes available to `read`.
    /// Starts buffering in paused mode.
    pub fn on_readable<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.readable.on(handler);
        let mut state = lock(&self.shared.state);
        if state.flowing.is_none() {
            state.flowing = Some(false);
        }
        state.want_read = true;
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Register an end handler. After end it runs immediately, as do late
    /// `error` and `close` handlers.
    pub fn on_end<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.end.on(handler);
    }

    pub fn once_end<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.end.once(handler);
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

    pub fn on_pause<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.pause.on(handler);
    }

    pub fn on_resume<F>(&self, handler: F)
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.shared.resume.on(handler);
    }

    /// Take the oldest buffered item.
    ///
    /// `None` means nothing is buffered right now; a `readable` event follows
    /// when more arrives, or `end` once the source is exhausted.
    pub fn read(&self) -> Option<T> {
        let mut state = lock(&self.shared.state);
        if state.phase.is_terminal() {
            return None;
        }
        let item = state.buffer.pop_front();
        if state.buffer.len() < self.shared.high_water_mark {
            state.want_read = true;
        }
        drop(state);
        self.shared.wake.notify_one();
        item
    }

    /// Stop issuing new requests. An in-flight request still completes and
    /// its item is buffered.
    pub fn pause(&self) {
        let mut state = lock(&self.shared.state);
        if state.flowing == Some(false) {
            return;
        }
        state.flowing = Some(false);
        state.want_read = false;
        drop(state);
        log::trace!("readable paused");
        self.shared.pause.emit(&());
    }

    /// Re-enter flowing mode, first flushing anything buffered while paused
    pub fn resume(&self) {
        let mut state = lock(&self.shared.state);
        if state.flowing == Some(true) {
            return;
        }
        state.flowing = Some(true);
        drop(state);
        log::trace!("readable resumed");
        self.shared.wake.notify_one();
        self.shared.resume.emit(&());
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.state).flowing == Some(false)
    }

    pub fn is_flowing(&self) -> bool {
        lock(&self.shared.state).flowing == Some(true)
    }

    /// Terminate immediately and tell the source to clean up.
    ///
    /// With a reason, `error` is emitted before `close`; without one only
    /// `close` fires. Both wait for the source to acknowledge the abort.
    /// Calling this on a terminated endpoint does nothing.
    pub fn destroy(&self, reason: Option<StreamError>) {
        self.shared.destroy(reason);
    }

    /// True once the endpoint reached any terminal phase
    pub fn destroyed(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.shared.state).buffer.len()
    }

    pub fn high_water_mark(&self) -> usize {
        self.shared.high_water_mark
    }

    fn terminal_state(&self) -> Option<Option<StreamError>> {
        let state = lock(&self.shared.state);
        state.phase.is_terminal().then(|| state.failure.clone())
    }

    /// Consume the endpoint as a stream of results.
    ///
    /// Items are read in paused mode, so the source is only pulled as fast as
    /// the stream is polled. A failure is yielded once as `Err`, after which
    /// the stream finishes. Dropping the stream early destroys the endpoint.
    pub fn into_stream(self) -> RS2Stream<StreamResult<T>> {
        let signal = Arc::new(Notify::new());
        {
            let signal = Arc::clone(&signal);
            self.shared.end.on(move |_| signal.notify_one());
        }
        {
            let signal = Arc::clone(&signal);
            self.shared.error.on(move |_| signal.notify_one());
        }
        {
            let signal = Arc::clone(&signal);
            self.shared.close.on(move |_| signal.notify_one());
        }
        {
            let signal = Arc::clone(&signal);
            self.on_readable(move |_| signal.notify_one());
        }

        let guard = DestroyOnDrop(self);
        stream! {
            let readable = &guard.0;
            loop {
                if let Some(item) = readable.read() {
                    yield Ok(item);
                    continue;
                }
                if let Some(failure) = readable.terminal_state() {
                    if let Some(err) = failure {
                        yield Err(err);
                    }
                    break;
                }
                signal.notified().await;
            }
        }
        .boxed()
    }
}

struct DestroyOnDrop<T: Send + Sync + 'static>(Readable<T>);

impl<T: Send + Sync + 'static> Drop for DestroyOnDrop<T> {
    fn drop(&mut self) {
        self.0.destroy(None);
    }
}
