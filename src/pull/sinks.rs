//! Ready-made pull sinks

use async_trait::async_trait;

use super::{PullSink, PullSource, Request, Response};
use crate::error::{StreamError, StreamResult};

/// Sink gathering every item into a `Vec`
pub struct Collect<T, F> {
    items: Vec<T>,
    callback: Option<F>,
}

/// Collect all items, handing the result (or the error) to `callback`
pub fn collect<T, F>(callback: F) -> Collect<T, F>
where
    F: FnOnce(StreamResult<Vec<T>>) + Send + 'static,
{
    Collect {
        items: Vec::new(),
        callback: Some(callback),
    }
}

#[async_trait]
impl<T, F> PullSink<T> for Collect<T, F>
where
    T: Send + 'static,
    F: FnOnce(StreamResult<Vec<T>>) + Send + 'static,
{
    async fn consume(&mut self, source: &mut (dyn PullSource<T> + Send)) -> StreamResult<()> {
        loop {
            match source.request(Request::Demand).await {
                Response::Item(item) => self.items.push(item),
                Response::End => {
                    let items = std::mem::take(&mut self.items);
                    if let Some(callback) = self.callback.take() {
                        callback(Ok(items));
                    }
                    return Ok(());
                }
                Response::Error(err) => {
                    if let Some(callback) = self.callback.take() {
                        callback(Err(err.clone()));
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Sink concatenating byte-like chunks into one buffer
pub struct Concat<F> {
    buffer: Vec<u8>,
    callback: Option<F>,
}

pub fn concat<F>(callback: F) -> Concat<F>
where
    F: FnOnce(StreamResult<Vec<u8>>) + Send + 'static,
{
    Concat {
        buffer: Vec::new(),
        callback: Some(callback),
    }
}

#[async_trait]
impl<T, F> PullSink<T> for Concat<F>
where
    T: AsRef<[u8]> + Send + 'static,
    F: FnOnce(StreamResult<Vec<u8>>) + Send + 'static,
{
    async fn consume(&mut self, source: &mut (dyn PullSource<T> + Send)) -> StreamResult<()> {
        loop {
            match source.request(Request::Demand).await {
                Response::Item(chunk) => self.buffer.extend_from_slice(chunk.as_ref()),
                Response::End => {
                    let buffer = std::mem::take(&mut self.buffer);
                    if let Some(callback) = self.callback.take() {
                        callback(Ok(buffer));
                    }
                    return Ok(());
                }
                Response::Error(err) => {
                    if let Some(callback) = self.callback.take() {
                        callback(Err(err.clone()));
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Sink running an operation per item
pub struct Drain<F> {
    op: F,
}

/// Run `op` on every item. A failing `op` aborts the source with its error.
pub fn drain<T, F>(op: F) -> Drain<F>
where
    F: FnMut(T) -> StreamResult<()> + Send + 'static,
{
    Drain { op }
}

#[async_trait]
impl<T, F> PullSink<T> for Drain<F>
where
    T: Send + 'static,
    F: FnMut(T) -> StreamResult<()> + Send + 'static,
{
    async fn consume(&mut self, source: &mut (dyn PullSource<T> + Send)) -> StreamResult<()> {
        loop {
            match source.request(Request::Demand).await {
                Response::Item(item) => {
                    if let Err(err) = (self.op)(item) {
                        log::debug!("drain operation failed, aborting source: {}", err);
                        source.request(Request::Abort(Some(err.clone()))).await;
                        return Err(err);
                    }
                }
                Response::End => return Ok(()),
                Response::Error(err) => return Err(err),
            }
        }
    }
}

/// Sink taking at most `limit` items, then aborting the source
pub struct TakeSink<T, F> {
    limit: usize,
    items: Vec<T>,
    callback: Option<F>,
}

pub fn take_sink<T, F>(limit: usize, callback: F) -> TakeSink<T, F>
where
    F: FnOnce(StreamResult<Vec<T>>) + Send + 'static,
{
    TakeSink {
        limit,
        items: Vec::with_capacity(limit),
        callback: Some(callback),
    }
}

impl<T, F> TakeSink<T, F>
where
    F: FnOnce(StreamResult<Vec<T>>),
{
    fn finish(&mut self, outcome: Result<(), StreamError>) -> StreamResult<()> {
        let items = std::mem::take(&mut self.items);
        if let Some(callback) = self.callback.take() {
            callback(outcome.clone().map(|_| items));
        }
        outcome
    }
}

#[async_trait]
impl<T, F> PullSink<T> for TakeSink<T, F>
where
    T: Send + 'static,
    F: FnOnce(StreamResult<Vec<T>>) + Send + 'static,
{
    async fn consume(&mut self, source: &mut (dyn PullSource<T> + Send)) -> StreamResult<()> {
        while self.items.len() < self.limit {
            match source.request(Request::Demand).await {
                Response::Item(item) => self.items.push(item),
                Response::End => return self.finish(Ok(())),
                Response::Error(err) => return self.finish(Err(err)),
            }
        }
        source.request(Request::Abort(None)).await;
        self.finish(Ok(()))
    }
}
